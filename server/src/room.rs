use std::collections::HashMap;

use shared::protocol::{MemberId, MemberInfo, PlaybackState, RoomSnapshot};

use crate::{broadcast::ConnectionHandle, error::CoordinatorError};

#[derive(Debug, Clone)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub is_admin: bool,
    pub connection: ConnectionHandle,
}

impl Member {
    pub fn info(&self) -> MemberInfo {
        MemberInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            is_admin: self.is_admin,
        }
    }
}

/// Authoritative state of one room. Only ever mutated behind the room's
/// mutex in [`crate::room_table::RoomTable`].
#[derive(Debug)]
pub struct Room {
    pub code: String,
    pub name: String,
    pub admin_id: MemberId,
    pub playback: Option<PlaybackState>,
    members: HashMap<MemberId, Member>,
    closed: bool,
}

impl Room {
    pub fn new(code: &str, name: &str, admin: Member) -> Self {
        let admin_id = admin.id.clone();

        Self {
            code: code.to_string(),
            name: name.to_string(),
            admin_id: admin_id.clone(),
            playback: None,
            members: HashMap::from([(admin_id, admin)]),
            closed: false,
        }
    }

    pub fn member(&self, id: &MemberId) -> Option<&Member> {
        self.members.get(id)
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.members.contains_key(id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn add_member(&mut self, member: Member) {
        self.members.insert(member.id.clone(), member);
    }

    pub fn remove_member(&mut self, id: &MemberId) -> Option<Member> {
        self.members.remove(id)
    }

    /// Authority is recomputed on every call; nothing caches it.
    pub fn is_admin(&self, id: &MemberId) -> bool {
        !self.closed
            && &self.admin_id == id
            && self.members.get(id).is_some_and(|member| member.is_admin)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Marks the room dead and hands back whoever was still inside.
    pub fn close(&mut self) -> Vec<Member> {
        self.closed = true;
        self.members.drain().map(|(_, member)| member).collect()
    }

    pub fn connections(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.members.values().map(|member| &member.connection)
    }

    pub fn connections_except<'a>(
        &'a self,
        excluded: &'a MemberId,
    ) -> impl Iterator<Item = &'a ConnectionHandle> {
        self.members
            .values()
            .filter(move |member| &member.id != excluded)
            .map(|member| &member.connection)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let mut members: Vec<MemberInfo> = self.members.values().map(Member::info).collect();
        members.sort_by(|a, b| {
            b.is_admin
                .cmp(&a.is_admin)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });

        RoomSnapshot {
            code: self.code.clone(),
            name: self.name.clone(),
            admin_id: self.admin_id.clone(),
            members,
            playback: self.playback.clone(),
        }
    }

    /// A live room has members and exactly one admin, the recorded one.
    pub fn check_invariants(&self) -> Result<(), CoordinatorError> {
        let admins: Vec<&Member> = self.members.values().filter(|m| m.is_admin).collect();

        let consistent = !self.members.is_empty()
            && admins.len() == 1
            && admins[0].id == self.admin_id;

        if consistent {
            Ok(())
        } else {
            Err(CoordinatorError::InternalInvariantViolation(
                self.code.clone(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, name: &str, is_admin: bool) -> Member {
        let (connection, _rx) = ConnectionHandle::channel(1, 1);
        Member {
            id: MemberId::from(id),
            name: name.to_string(),
            is_admin,
            connection,
        }
    }

    #[test]
    fn snapshot_lists_admin_first() {
        let mut room = Room::new("AB12CD", "Movie Night", member("a", "Alice", true));
        room.add_member(member("b", "Bob", false));
        room.add_member(member("c", "Aaron", false));

        let snapshot = room.snapshot();
        let names: Vec<&str> = snapshot.members.iter().map(|m| m.name.as_str()).collect();

        assert_eq!(names, vec!["Alice", "Aaron", "Bob"]);
        assert_eq!(snapshot.admin_id, MemberId::from("a"));
    }

    #[test]
    fn closed_room_has_no_admin() {
        let mut room = Room::new("AB12CD", "x", member("a", "Alice", true));
        assert!(room.is_admin(&MemberId::from("a")));

        let remaining = room.close();

        assert_eq!(remaining.len(), 1);
        assert!(!room.is_admin(&MemberId::from("a")));
    }

    #[test]
    fn empty_room_violates_invariants() {
        let mut room = Room::new("AB12CD", "x", member("a", "Alice", true));
        assert!(room.check_invariants().is_ok());

        room.remove_member(&MemberId::from("a"));

        assert_eq!(
            room.check_invariants(),
            Err(CoordinatorError::InternalInvariantViolation("AB12CD".to_string()))
        );
    }
}
