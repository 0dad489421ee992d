use std::sync::Arc;

use shared::protocol::{DiagnosticsReport, MemberDiagnostics, RoomDiagnostics};

use crate::{chunk_relay::ChunkRelay, room_table::RoomTable};

/// Everything the coordinator owns. Built once per server (or per test).
pub struct ServerState {
    pub rooms: RoomTable,
    pub relay: Arc<ChunkRelay>,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            rooms: RoomTable::default(),
            relay: Arc::new(ChunkRelay::new()),
        }
    }

    /// Membership and admin flags only; playback content is not exposed.
    pub async fn diagnostics(&self) -> DiagnosticsReport {
        let mut rooms = Vec::new();

        for room in self.rooms.rooms().await {
            let room = room.lock().await;
            if room.is_closed() {
                continue;
            }

            let snapshot = room.snapshot();
            rooms.push(RoomDiagnostics {
                code: snapshot.code,
                name: snapshot.name,
                member_count: snapshot.members.len(),
                members: snapshot
                    .members
                    .into_iter()
                    .map(|member| MemberDiagnostics {
                        name: member.name,
                        is_admin: member.is_admin,
                    })
                    .collect(),
            });
        }

        rooms.sort_by(|a, b| a.code.cmp(&b.code));

        DiagnosticsReport {
            total_rooms: rooms.len(),
            rooms,
            relay: self.relay.counters().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{membership::MembershipManager, test_support::connection};

    #[tokio::test]
    async fn diagnostics_report_membership_without_content() {
        let state = ServerState::new();
        let (alice_conn, _alice_rx) = connection(1);
        let (bob_conn, _bob_rx) = connection(2);
        let (carol_conn, _carol_rx) = connection(3);

        let (code, _) = state
            .rooms
            .create("Movie Night", "Alice", alice_conn)
            .await
            .unwrap();
        MembershipManager::join(&state.rooms, &code, "Bob", bob_conn)
            .await
            .unwrap();
        state
            .rooms
            .create("Other", "Carol", carol_conn)
            .await
            .unwrap();

        let report = state.diagnostics().await;

        assert_eq!(report.total_rooms, 2);
        let movie = report.rooms.iter().find(|r| r.code == code).unwrap();
        assert_eq!(movie.member_count, 2);
        assert_eq!(
            movie.members,
            vec![
                MemberDiagnostics {
                    name: "Alice".to_string(),
                    is_admin: true
                },
                MemberDiagnostics {
                    name: "Bob".to_string(),
                    is_admin: false
                },
            ]
        );
    }
}
