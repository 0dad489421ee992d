use log::{error, info};
use shared::{
    is_valid_name, normalize_room_code,
    protocol::{Event, MemberId, MemberInfo, RoomSnapshot},
};

use crate::{
    broadcast::{ConnectionHandle, ConnectionId, broadcast_event},
    error::CoordinatorError,
    room::{Member, Room},
    room_table::{RoomMembership, RoomTable, generate_member_id},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    RoomClosed,
    /// Member or room already gone. Not an error.
    NotPresent,
}

pub struct MembershipManager;

impl MembershipManager {
    pub async fn join(
        table: &RoomTable,
        room_code: &str,
        user_name: &str,
        connection: ConnectionHandle,
    ) -> Result<(RoomSnapshot, MemberInfo), CoordinatorError> {
        if !is_valid_name(user_name) {
            return Err(CoordinatorError::InvalidName(user_name.to_string()));
        }

        let room_code = normalize_room_code(room_code);

        let room = table
            .lookup(&room_code)
            .await
            .ok_or_else(|| CoordinatorError::RoomNotFound(room_code.clone()))?;
        let mut room = room.lock().await;

        if room.is_closed() {
            return Err(CoordinatorError::RoomNotFound(room_code));
        }

        if let Err(e) = room.check_invariants() {
            error!("{}", e);
            close_room(table, &mut room).await;
            return Err(e);
        }

        let mut member_id = generate_member_id();
        while room.contains(&member_id) {
            member_id = generate_member_id();
        }

        let connection_id = connection.id;
        let member = Member {
            id: member_id,
            name: user_name.trim().to_string(),
            is_admin: false,
            connection,
        };
        let member_info = member.info();

        room.add_member(member);
        table
            .bind_connection(
                connection_id,
                RoomMembership {
                    room_code: room.code.clone(),
                    member_id: member_info.id.clone(),
                },
            )
            .await;

        broadcast_event(
            room.connections_except(&member_info.id),
            &Event::MemberJoined {
                member: member_info.clone(),
            },
        );

        let snapshot = room.snapshot();
        broadcast_event(
            room.connections_except(&member_info.id),
            &Event::RoomUpdated {
                room: snapshot.clone(),
            },
        );

        info!("{} joined room {}", member_info.name, room.code);

        Ok((snapshot, member_info))
    }

    /// The existing membership, for a connection re-joining the room it is in.
    pub async fn current(
        table: &RoomTable,
        room_code: &str,
        member_id: &MemberId,
    ) -> Option<(RoomSnapshot, MemberInfo)> {
        let room = table.lookup(room_code).await?;
        let room = room.lock().await;

        if room.is_closed() {
            return None;
        }

        let member = room.member(member_id)?.info();
        Some((room.snapshot(), member))
    }

    pub async fn leave(table: &RoomTable, room_code: &str, member_id: &MemberId) -> LeaveOutcome {
        let room_code = normalize_room_code(room_code);

        let Some(room) = table.lookup(&room_code).await else {
            return LeaveOutcome::NotPresent;
        };
        let mut room = room.lock().await;

        if room.is_closed() {
            return LeaveOutcome::NotPresent;
        }

        let Some(departed) = room.remove_member(member_id) else {
            return LeaveOutcome::NotPresent;
        };

        table
            .unbind_connection(
                departed.connection.id,
                &RoomMembership {
                    room_code: room.code.clone(),
                    member_id: departed.id.clone(),
                },
            )
            .await;

        info!("{} left room {}", departed.name, room.code);

        if departed.is_admin || room.member_count() == 0 {
            close_room(table, &mut room).await;
            return LeaveOutcome::RoomClosed;
        }

        if let Err(e) = room.check_invariants() {
            error!("{}", e);
            close_room(table, &mut room).await;
            return LeaveOutcome::RoomClosed;
        }

        broadcast_event(
            room.connections(),
            &Event::MemberLeft {
                member_id: departed.id.clone(),
            },
        );
        broadcast_event(
            room.connections(),
            &Event::RoomUpdated {
                room: room.snapshot(),
            },
        );

        LeaveOutcome::Left
    }

    /// Safe for connections that never joined anything.
    pub async fn disconnect(table: &RoomTable, connection: ConnectionId) -> LeaveOutcome {
        let Some(membership) = table.connection_membership(connection).await else {
            return LeaveOutcome::NotPresent;
        };

        let outcome = Self::leave(table, &membership.room_code, &membership.member_id).await;
        table.unbind_connection(connection, &membership).await;

        outcome
    }
}

/// Tears the room down while its lock is held so no mutation can slip in
/// between the last member leaving and the table entry disappearing.
pub(crate) async fn close_room(table: &RoomTable, room: &mut Room) {
    let remaining = room.close();
    table.remove(&room.code).await;

    for member in &remaining {
        table
            .unbind_connection(
                member.connection.id,
                &RoomMembership {
                    room_code: room.code.clone(),
                    member_id: member.id.clone(),
                },
            )
            .await;
    }

    broadcast_event(
        remaining.iter().map(|member| &member.connection),
        &Event::RoomClosed {
            room_code: room.code.clone(),
        },
    );

    info!(
        "Room {} closed ({} listeners disconnected)",
        room.code,
        remaining.len()
    );
}
