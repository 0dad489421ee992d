use std::{collections::HashMap, sync::Arc};

use log::info;
use rand::{Rng, rng};
use shared::{
    ROOM_CODE_LEN, is_valid_name,
    protocol::{MemberId, MemberInfo},
};
use tokio::sync::{Mutex, RwLock};

use crate::{
    broadcast::{ConnectionHandle, ConnectionId},
    error::CoordinatorError,
    room::{Member, Room},
};

const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub type SharedRoom = Arc<Mutex<Room>>;

/// Where a connection currently sits. Lookup only; the room owns the member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMembership {
    pub room_code: String,
    pub member_id: MemberId,
}

/// Registry of live rooms plus connection back-references.
///
/// Lock order is room -> table -> connections. The table lock is never held
/// while waiting on a room lock.
#[derive(Default)]
pub struct RoomTable {
    rooms: RwLock<HashMap<String, SharedRoom>>,
    connections: Mutex<HashMap<ConnectionId, RoomMembership>>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(
        &self,
        display_name: &str,
        creator_name: &str,
        connection: ConnectionHandle,
    ) -> Result<(String, MemberInfo), CoordinatorError> {
        if !is_valid_name(display_name) {
            return Err(CoordinatorError::InvalidName(display_name.to_string()));
        }
        if !is_valid_name(creator_name) {
            return Err(CoordinatorError::InvalidName(creator_name.to_string()));
        }

        let connection_id = connection.id;
        let admin = Member {
            id: generate_member_id(),
            name: creator_name.trim().to_string(),
            is_admin: true,
            connection,
        };
        let admin_info = admin.info();

        let room_code = {
            let mut rooms = self.rooms.write().await;

            let mut room_code = generate_room_code();
            while rooms.contains_key(&room_code) {
                room_code = generate_room_code();
            }

            let room = Room::new(&room_code, display_name.trim(), admin);
            rooms.insert(room_code.clone(), Arc::new(Mutex::new(room)));

            room_code
        };

        self.bind_connection(
            connection_id,
            RoomMembership {
                room_code: room_code.clone(),
                member_id: admin_info.id.clone(),
            },
        )
        .await;

        info!(
            "Room {} ('{}') created by {}",
            room_code,
            display_name.trim(),
            admin_info.name
        );

        Ok((room_code, admin_info))
    }

    pub async fn lookup(&self, code: &str) -> Option<SharedRoom> {
        let code = shared::normalize_room_code(code);
        self.rooms.read().await.get(&code).cloned()
    }

    /// Returns whether anything was removed; removing twice is harmless.
    pub async fn remove(&self, code: &str) -> bool {
        let code = shared::normalize_room_code(code);
        self.rooms.write().await.remove(&code).is_some()
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn rooms(&self) -> Vec<SharedRoom> {
        self.rooms.read().await.values().cloned().collect()
    }

    pub async fn connection_membership(&self, connection: ConnectionId) -> Option<RoomMembership> {
        self.connections.lock().await.get(&connection).cloned()
    }

    pub(crate) async fn bind_connection(
        &self,
        connection: ConnectionId,
        membership: RoomMembership,
    ) {
        self.connections.lock().await.insert(connection, membership);
    }

    /// Clears the back-reference only if it still points at `membership`.
    pub(crate) async fn unbind_connection(
        &self,
        connection: ConnectionId,
        membership: &RoomMembership,
    ) {
        let mut connections = self.connections.lock().await;
        if connections.get(&connection) == Some(membership) {
            connections.remove(&connection);
        }
    }
}

pub fn generate_room_code() -> String {
    let mut rng = rng();

    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn generate_member_id() -> MemberId {
    MemberId(format!("{:016x}", rng().random::<u64>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_registers_room_with_single_admin() {
        let table = RoomTable::new();
        let (connection, _rx) = ConnectionHandle::channel(7, 8);

        let (code, admin) = table.create("Movie Night", "Alice", connection).await.unwrap();

        assert_eq!(code.len(), ROOM_CODE_LEN);
        assert!(admin.is_admin);
        assert_eq!(table.len().await, 1);

        let room = table.lookup(&code.to_lowercase()).await.unwrap();
        let room = room.lock().await;
        assert_eq!(room.member_count(), 1);
        assert!(room.is_admin(&admin.id));
        assert!(room.check_invariants().is_ok());

        assert_eq!(
            table.connection_membership(7).await,
            Some(RoomMembership {
                room_code: code.clone(),
                member_id: admin.id.clone()
            })
        );
    }

    #[tokio::test]
    async fn lookup_of_unknown_code_is_none() {
        let table = RoomTable::new();
        assert!(table.lookup("NOPE00").await.is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let table = RoomTable::new();
        let (connection, _rx) = ConnectionHandle::channel(1, 8);
        let (code, _) = table.create("Room", "Alice", connection).await.unwrap();

        assert!(table.remove(&code).await);
        assert!(!table.remove(&code).await);
        assert_eq!(table.len().await, 0);
    }

    #[tokio::test]
    async fn create_rejects_blank_names() {
        let table = RoomTable::new();
        let (connection, _rx) = ConnectionHandle::channel(1, 8);

        let result = table.create("Room", "  ", connection).await;

        assert!(matches!(result, Err(CoordinatorError::InvalidName(_))));
        assert_eq!(table.len().await, 0);
    }

    #[test]
    fn generated_codes_use_uppercase_alphabet() {
        for _ in 0..100 {
            let code = generate_room_code();
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)));
        }
    }
}
