use log::{debug, info};
use shared::{
    now_millis,
    protocol::{Event, MemberId, PlaybackSource, PlaybackState},
};

use crate::{broadcast::broadcast_event, room::Room, room_table::RoomTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    RoomNotFound,
    NotAdmin,
    NotLiveStreaming,
}

/// Result of a privileged mutation. `Ignored` never reaches other members
/// and is not reported back to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    Applied,
    Ignored(Rejection),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackUpdate {
    pub position_seconds: f64,
    pub is_playing: bool,
    pub client_timestamp: i64,
    pub source_url: Option<String>,
    pub source_name: Option<String>,
}

pub struct PlaybackAuthority;

impl PlaybackAuthority {
    pub async fn load_track(
        table: &RoomTable,
        room_code: &str,
        member_id: &MemberId,
        source_url: &str,
        source_name: &str,
    ) -> Authority {
        with_admin_room(table, room_code, member_id, "load-track", |room| {
            room.playback = Some(PlaybackState {
                source: Some(PlaybackSource::Track {
                    source_url: source_url.to_string(),
                    source_name: source_name.to_string(),
                }),
                position_seconds: 0.0,
                is_playing: false,
                server_timestamp: now_millis(),
            });

            broadcast_event(
                room.connections(),
                &Event::TrackChanged {
                    source_url: source_url.to_string(),
                    source_name: source_name.to_string(),
                },
            );
            broadcast_event(
                room.connections(),
                &Event::RoomUpdated {
                    room: room.snapshot(),
                },
            );

            info!("Track '{}' loaded in room {}", source_name, room.code);
            Authority::Applied
        })
        .await
        .unwrap_or_else(Authority::Ignored)
    }

    pub async fn update_playback(
        table: &RoomTable,
        room_code: &str,
        member_id: &MemberId,
        update: PlaybackUpdate,
    ) -> Authority {
        with_admin_room(table, room_code, member_id, "update-playback", |room| {
            let previous = room.playback.take().and_then(|state| state.source);
            let source = merge_source(previous, update.source_url, update.source_name);

            let state = PlaybackState {
                source,
                position_seconds: update.position_seconds.max(0.0),
                is_playing: update.is_playing,
                server_timestamp: now_millis(),
            };
            let snapshot = state.snapshot(member_id);
            room.playback = Some(state);

            broadcast_event(
                room.connections_except(member_id),
                &Event::PlaybackSnapshot { snapshot },
            );

            debug!(
                "Playback in room {} at {:.2}s ({}), client lag {}ms",
                room.code,
                update.position_seconds,
                if update.is_playing { "playing" } else { "paused" },
                now_millis().saturating_sub(update.client_timestamp)
            );
            Authority::Applied
        })
        .await
        .unwrap_or_else(Authority::Ignored)
    }

    pub async fn start_live_stream(
        table: &RoomTable,
        room_code: &str,
        member_id: &MemberId,
    ) -> Authority {
        with_admin_room(table, room_code, member_id, "start-live-stream", |room| {
            room.playback = Some(PlaybackState {
                source: Some(PlaybackSource::LiveStream),
                position_seconds: 0.0,
                is_playing: true,
                server_timestamp: now_millis(),
            });

            broadcast_event(room.connections(), &Event::LiveStreamStarted);
            broadcast_event(
                room.connections(),
                &Event::RoomUpdated {
                    room: room.snapshot(),
                },
            );

            info!("Live stream started in room {}", room.code);
            Authority::Applied
        })
        .await
        .unwrap_or_else(Authority::Ignored)
    }

    pub async fn stop_live_stream(
        table: &RoomTable,
        room_code: &str,
        member_id: &MemberId,
    ) -> Authority {
        with_admin_room(table, room_code, member_id, "stop-live-stream", |room| {
            if !room.playback.as_ref().is_some_and(PlaybackState::is_live_stream) {
                return Authority::Ignored(Rejection::NotLiveStreaming);
            }

            room.playback = None;

            broadcast_event(room.connections(), &Event::LiveStreamStopped);
            broadcast_event(
                room.connections(),
                &Event::RoomUpdated {
                    room: room.snapshot(),
                },
            );

            info!("Live stream stopped in room {}", room.code);
            Authority::Applied
        })
        .await
        .unwrap_or_else(Authority::Ignored)
    }
}

/// Runs `apply` under the room lock, but only for the room's current admin.
pub(crate) async fn with_admin_room<T, F>(
    table: &RoomTable,
    room_code: &str,
    member_id: &MemberId,
    operation: &str,
    apply: F,
) -> Result<T, Rejection>
where
    F: FnOnce(&mut Room) -> T,
{
    let Some(room) = table.lookup(room_code).await else {
        debug!("Ignoring {} for unknown room {}", operation, room_code);
        return Err(Rejection::RoomNotFound);
    };
    let mut room = room.lock().await;

    if room.is_closed() {
        return Err(Rejection::RoomNotFound);
    }

    if !room.is_admin(member_id) {
        debug!(
            "Ignoring {} from non-admin {} in room {}",
            operation, member_id, room.code
        );
        return Err(Rejection::NotAdmin);
    }

    Ok(apply(&mut *room))
}

fn merge_source(
    previous: Option<PlaybackSource>,
    source_url: Option<String>,
    source_name: Option<String>,
) -> Option<PlaybackSource> {
    match previous {
        Some(PlaybackSource::Track {
            source_url: previous_url,
            source_name: previous_name,
        }) => Some(PlaybackSource::Track {
            source_url: source_url.unwrap_or(previous_url),
            source_name: source_name.unwrap_or(previous_name),
        }),
        Some(PlaybackSource::LiveStream) if source_url.is_none() => {
            Some(PlaybackSource::LiveStream)
        }
        _ => source_url.map(|source_url| PlaybackSource::Track {
            source_url,
            source_name: source_name.unwrap_or_default(),
        }),
    }
}
