use log::debug;
use shared::{
    normalize_room_code,
    protocol::{
        MemberId, MemberInfo, Request, RequestEnvelope, Response, ResponseBody, RoomSnapshot,
    },
    tcp_command::ChunkFrame,
};

use crate::{
    broadcast::ConnectionHandle,
    error::CoordinatorError,
    membership::MembershipManager,
    playback_authority::{Authority, PlaybackAuthority, PlaybackUpdate},
    room_table::RoomMembership,
    state::ServerState,
};

pub struct TcpCommandHandler;

impl TcpCommandHandler {
    /// Returns the reply for requests that get one.
    pub async fn handle_request(
        envelope: RequestEnvelope,
        connection: &ConnectionHandle,
        state: &ServerState,
    ) -> Option<Response> {
        let request_id = envelope.request_id;
        let previous = state.rooms.connection_membership(connection.id).await;

        let body = match envelope.request {
            Request::CreateRoom {
                room_name,
                user_name,
            } => match state
                .rooms
                .create(&room_name, &user_name, connection.clone())
                .await
            {
                Ok((room_code, member)) => {
                    leave_previous(state, previous).await;
                    ResponseBody::RoomCreated { room_code, member }
                }
                Err(e) => error_body(&e),
            },

            Request::JoinRoom {
                room_code,
                user_name,
            } => match rejoin(state, &previous, &room_code).await {
                Some((room, member)) => ResponseBody::RoomJoined { room, member },
                None => match MembershipManager::join(
                    &state.rooms,
                    &room_code,
                    &user_name,
                    connection.clone(),
                )
                .await
                {
                    Ok((room, member)) => {
                        leave_previous(state, previous).await;
                        ResponseBody::RoomJoined { room, member }
                    }
                    Err(e) => error_body(&e),
                },
            },

            Request::LeaveRoom { room_code } => {
                if let Some(member_id) = caller_in(&previous, &room_code) {
                    MembershipManager::leave(&state.rooms, &room_code, &member_id).await;
                }
                ResponseBody::Left
            }

            Request::UpdatePlayback {
                room_code,
                position_seconds,
                is_playing,
                client_timestamp,
                source_url,
                source_name,
            } => {
                let update = PlaybackUpdate {
                    position_seconds,
                    is_playing,
                    client_timestamp,
                    source_url,
                    source_name,
                };
                if let Some(member_id) = caller_in(&previous, &room_code) {
                    let outcome = PlaybackAuthority::update_playback(
                        &state.rooms,
                        &room_code,
                        &member_id,
                        update,
                    )
                    .await;
                    log_ignored(connection, "update-playback", outcome);
                }
                return None;
            }

            Request::LoadTrack {
                room_code,
                source_url,
                source_name,
            } => {
                if let Some(member_id) = caller_in(&previous, &room_code) {
                    let outcome = PlaybackAuthority::load_track(
                        &state.rooms,
                        &room_code,
                        &member_id,
                        &source_url,
                        &source_name,
                    )
                    .await;
                    log_ignored(connection, "load-track", outcome);
                }
                return None;
            }

            Request::StartLiveStream { room_code } => {
                if let Some(member_id) = caller_in(&previous, &room_code) {
                    let outcome =
                        PlaybackAuthority::start_live_stream(&state.rooms, &room_code, &member_id)
                            .await;
                    log_ignored(connection, "start-live-stream", outcome);
                }
                return None;
            }

            Request::StopLiveStream { room_code } => {
                if let Some(member_id) = caller_in(&previous, &room_code) {
                    let outcome =
                        PlaybackAuthority::stop_live_stream(&state.rooms, &room_code, &member_id)
                            .await;
                    log_ignored(connection, "stop-live-stream", outcome);
                }
                return None;
            }

            Request::GetDiagnostics => ResponseBody::Diagnostics {
                report: state.diagnostics().await,
            },
        };

        Some(Response { request_id, body })
    }

    pub async fn handle_chunk(chunk: ChunkFrame, connection: &ConnectionHandle, state: &ServerState) {
        let membership = state.rooms.connection_membership(connection.id).await;

        let Some(member_id) = caller_in(&membership, &chunk.room_code) else {
            debug!(
                "Dropping chunk from connection {} outside room {}",
                connection.id, chunk.room_code
            );
            return;
        };

        state
            .relay
            .relay_chunk(
                &state.rooms,
                &chunk.room_code,
                &member_id,
                chunk.data,
                chunk.timestamp_ms,
            )
            .await;
    }
}

/// The member id this connection holds in `room_code`, if any. Identity
/// always comes from the connection, never from the request body.
fn caller_in(membership: &Option<RoomMembership>, room_code: &str) -> Option<MemberId> {
    membership
        .as_ref()
        .filter(|membership| membership.room_code == normalize_room_code(room_code))
        .map(|membership| membership.member_id.clone())
}

async fn rejoin(
    state: &ServerState,
    previous: &Option<RoomMembership>,
    room_code: &str,
) -> Option<(RoomSnapshot, MemberInfo)> {
    let member_id = caller_in(previous, room_code)?;
    MembershipManager::current(&state.rooms, room_code, &member_id).await
}

async fn leave_previous(state: &ServerState, previous: Option<RoomMembership>) {
    if let Some(previous) = previous {
        MembershipManager::leave(&state.rooms, &previous.room_code, &previous.member_id).await;
    }
}

fn error_body(error: &CoordinatorError) -> ResponseBody {
    ResponseBody::Error {
        kind: error.kind(),
        message: error.to_string(),
    }
}

fn log_ignored(connection: &ConnectionHandle, operation: &str, outcome: Authority) {
    if let Authority::Ignored(reason) = outcome {
        debug!(
            "{} from connection {} ignored: {:?}",
            operation, connection.id, reason
        );
    }
}
