use std::{sync::Arc, time::Duration};

use log::debug;
use shared::{
    protocol::{MemberId, RelayCounters},
    tcp_command::{ChunkFrame, TcpCommand},
    tcp_command_id::TcpCommandId,
};
use tokio::{sync::Mutex, time::interval};

use crate::{
    broadcast::fan_out,
    playback_authority::{Authority, with_admin_room},
    room_table::RoomTable,
};

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Fire-and-forget fan-out of opaque audio segments. Holds counters only;
/// segments are never buffered.
#[derive(Default)]
pub struct ChunkRelay {
    stats: Mutex<RelayCounters>,
}

impl ChunkRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn relay_chunk(
        &self,
        table: &RoomTable,
        room_code: &str,
        member_id: &MemberId,
        data: Vec<u8>,
        client_timestamp: i64,
    ) -> Authority {
        let outcome = with_admin_room(table, room_code, member_id, "relay-chunk", |room| {
            if !room
                .playback
                .as_ref()
                .is_some_and(|playback| playback.is_live_stream())
            {
                debug!("Relaying chunk in room {} outside live-stream mode", room.code);
            }

            let command = Arc::new(TcpCommand::Chunk(
                TcpCommandId::RelayedChunk,
                ChunkFrame {
                    room_code: room.code.clone(),
                    timestamp_ms: client_timestamp,
                    data,
                },
            ));

            // Enqueued under the room lock: per-listener order matches upload order.
            fan_out(room.connections_except(member_id), command)
        })
        .await;

        let mut stats = self.stats.lock().await;
        stats.chunks_received += 1;

        match outcome {
            Ok(report) => {
                stats.chunks_forwarded += report.delivered as u64;
                stats.chunks_dropped += report.dropped as u64;
                Authority::Applied
            }
            Err(rejection) => {
                stats.chunks_rejected += 1;
                Authority::Ignored(rejection)
            }
        }
    }

    pub async fn counters(&self) -> RelayCounters {
        self.stats.lock().await.clone()
    }

    pub fn spawn_stats_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let relay = Arc::clone(self);

        tokio::spawn(async move {
            let mut stats_interval = interval(STATS_LOG_INTERVAL);
            let mut last = RelayCounters::default();

            loop {
                stats_interval.tick().await;

                let current = relay.counters().await;
                if current != last {
                    debug!(
                        "Relay: {} received, {} forwarded, {} dropped, {} rejected",
                        current.chunks_received,
                        current.chunks_forwarded,
                        current.chunks_dropped,
                        current.chunks_rejected
                    );
                    last = current;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        membership::MembershipManager,
        playback_authority::{PlaybackAuthority, Rejection},
        test_support::{connection, drain_chunks},
    };

    #[tokio::test]
    async fn chunks_reach_every_listener_in_upload_order() {
        let table = RoomTable::new();
        let relay = ChunkRelay::new();
        let (admin_conn, mut admin_rx) = connection(1);
        let (bob_conn, mut bob_rx) = connection(2);
        let (carol_conn, mut carol_rx) = connection(3);

        let (code, admin) = table.create("Room", "Alice", admin_conn).await.unwrap();
        MembershipManager::join(&table, &code, "Bob", bob_conn)
            .await
            .unwrap();
        MembershipManager::join(&table, &code, "Carol", carol_conn)
            .await
            .unwrap();
        PlaybackAuthority::start_live_stream(&table, &code, &admin.id).await;

        for (i, segment) in [b"C1".to_vec(), b"C2".to_vec(), b"C3".to_vec()]
            .into_iter()
            .enumerate()
        {
            let outcome = relay
                .relay_chunk(&table, &code, &admin.id, segment, i as i64)
                .await;
            assert_eq!(outcome, Authority::Applied);
        }

        for rx in [&mut bob_rx, &mut carol_rx] {
            let received: Vec<Vec<u8>> = drain_chunks(rx).into_iter().map(|c| c.data).collect();
            assert_eq!(received, vec![b"C1".to_vec(), b"C2".to_vec(), b"C3".to_vec()]);
        }
        assert!(drain_chunks(&mut admin_rx).is_empty());

        let counters = relay.counters().await;
        assert_eq!(counters.chunks_received, 3);
        assert_eq!(counters.chunks_forwarded, 6);
        assert_eq!(counters.chunks_rejected, 0);
    }

    #[tokio::test]
    async fn listener_uploads_are_rejected() {
        let table = RoomTable::new();
        let relay = ChunkRelay::new();
        let (admin_conn, mut admin_rx) = connection(1);
        let (bob_conn, _bob_rx) = connection(2);

        let (code, _) = table.create("Room", "Alice", admin_conn).await.unwrap();
        let (_, bob) = MembershipManager::join(&table, &code, "Bob", bob_conn)
            .await
            .unwrap();

        let outcome = relay
            .relay_chunk(&table, &code, &bob.id, vec![1, 2, 3], 0)
            .await;

        assert_eq!(outcome, Authority::Ignored(Rejection::NotAdmin));
        assert!(drain_chunks(&mut admin_rx).is_empty());
        assert_eq!(relay.counters().await.chunks_rejected, 1);
    }

    #[tokio::test]
    async fn relay_forwards_even_outside_live_stream_mode() {
        let table = RoomTable::new();
        let relay = ChunkRelay::new();
        let (admin_conn, _admin_rx) = connection(1);
        let (bob_conn, mut bob_rx) = connection(2);

        let (code, admin) = table.create("Room", "Alice", admin_conn).await.unwrap();
        MembershipManager::join(&table, &code, "Bob", bob_conn)
            .await
            .unwrap();

        relay
            .relay_chunk(&table, &code, &admin.id, vec![9, 8, 7], 42)
            .await;

        let chunks = drain_chunks(&mut bob_rx);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data, vec![9, 8, 7]);
        assert_eq!(chunks[0].timestamp_ms, 42);
        assert_eq!(chunks[0].room_code, code);
    }
}
