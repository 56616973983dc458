//! The friend table: dense friend ids, connection status, and the
//! lifecycle operations that add, accept, and remove friends.

use std::collections::HashMap;

use tox_crypto::keys::PublicKey32;
use tox_crypto::toxid;

use crate::{FriendError, FriendId, Result};

/// A friend's live connection state, as observed by the transport and
/// session layers. Distinct from [`PresenceStatus`]: this tracks whether a
/// transport path exists at all, not what the friend has broadcast about
/// themselves over it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Offline,
    Online,
}

/// The presence a friend has broadcast about themselves, carried over the
/// same channel as their name and status message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceStatus {
    None,
    Away,
    Busy,
    Online,
}

/// One entry in the friend table.
#[derive(Clone, Debug)]
pub struct Friend {
    pub friend_id: FriendId,
    pub public_key: PublicKey32,
    pub connection_status: ConnectionStatus,
    /// The friend's self-reported display name, empty until they send one.
    pub name: String,
    /// The friend's self-reported status message.
    pub status_msg: String,
    /// The friend's self-reported presence.
    pub presence: PresenceStatus,
    /// Unix timestamp of the last observed activity from this friend.
    pub last_seen: u64,
    /// Opaque host-attached data, never serialized into the save blob.
    pub user_data: Option<Vec<u8>>,
}

impl Friend {
    fn new(friend_id: FriendId, public_key: PublicKey32) -> Self {
        Self {
            friend_id,
            public_key,
            connection_status: ConnectionStatus::Offline,
            name: String::new(),
            status_msg: String::new(),
            presence: PresenceStatus::None,
            last_seen: 0,
            user_data: None,
        }
    }
}

/// Friend ids are dense and reused: deleting a friend frees its slot for
/// the next `add_*` call.
#[derive(Default)]
pub struct FriendTable {
    friends: HashMap<FriendId, Friend>,
    by_public_key: HashMap<[u8; 32], FriendId>,
}

impl FriendTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lowest_free_id(&self) -> FriendId {
        let mut id = 0;
        while self.friends.contains_key(&id) {
            id += 1;
        }
        id
    }

    /// Add a friend directly by public key, with no outbound request
    /// (used when the friend relationship is already established, e.g.
    /// after accepting an inbound request).
    pub fn add_by_public_key(&mut self, public_key: PublicKey32) -> Result<FriendId> {
        if self.by_public_key.contains_key(&public_key.0) {
            return Err(FriendError::AlreadyFriend);
        }
        let friend_id = self.lowest_free_id();
        self.friends
            .insert(friend_id, Friend::new(friend_id, public_key));
        self.by_public_key.insert(public_key.0, friend_id);
        Ok(friend_id)
    }

    /// Parse a Tox ID and add a friend, ready for the friend-request
    /// engine to queue the outbound request. Returns the new friend id
    /// and the public key/nospam the request should target.
    pub fn add_with_message(
        &mut self,
        tox_id: &str,
        message: &str,
    ) -> Result<(FriendId, PublicKey32, [u8; 4])> {
        let (public_key, nospam) = toxid::decode(tox_id)?;
        let _ = message;
        let friend_id = self.add_by_public_key(public_key)?;
        Ok((friend_id, public_key, nospam))
    }

    /// Remove a friend. The caller is responsible for tearing down any
    /// session, pending file transfers, and pending friend requests
    /// associated with `friend_id` before or after this call.
    pub fn delete(&mut self, friend_id: FriendId) -> Result<Friend> {
        let friend = self
            .friends
            .remove(&friend_id)
            .ok_or(FriendError::NoSuchFriend(friend_id))?;
        self.by_public_key.remove(&friend.public_key.0);
        Ok(friend)
    }

    /// Update connection status atomically, returning the previous value.
    pub fn set_connection_status(
        &mut self,
        friend_id: FriendId,
        status: ConnectionStatus,
    ) -> Result<ConnectionStatus> {
        let friend = self
            .friends
            .get_mut(&friend_id)
            .ok_or(FriendError::NoSuchFriend(friend_id))?;
        let previous = friend.connection_status;
        friend.connection_status = status;
        Ok(previous)
    }

    /// Record a friend's self-reported name, learned from a NAME packet.
    pub fn set_name(&mut self, friend_id: FriendId, name: String) -> Result<()> {
        self.friends
            .get_mut(&friend_id)
            .ok_or(FriendError::NoSuchFriend(friend_id))?
            .name = name;
        Ok(())
    }

    /// Record a friend's self-reported status message.
    pub fn set_status_message(&mut self, friend_id: FriendId, status_msg: String) -> Result<()> {
        self.friends
            .get_mut(&friend_id)
            .ok_or(FriendError::NoSuchFriend(friend_id))?
            .status_msg = status_msg;
        Ok(())
    }

    /// Record a friend's self-reported presence.
    pub fn set_presence(&mut self, friend_id: FriendId, presence: PresenceStatus) -> Result<()> {
        self.friends
            .get_mut(&friend_id)
            .ok_or(FriendError::NoSuchFriend(friend_id))?
            .presence = presence;
        Ok(())
    }

    /// Bump `last_seen` to `unix_secs`, e.g. on any inbound packet from this
    /// friend.
    pub fn touch_last_seen(&mut self, friend_id: FriendId, unix_secs: u64) -> Result<()> {
        let friend = self
            .friends
            .get_mut(&friend_id)
            .ok_or(FriendError::NoSuchFriend(friend_id))?;
        friend.last_seen = friend.last_seen.max(unix_secs);
        Ok(())
    }

    /// Attach opaque host data to a friend slot. Never serialized by
    /// save/load.
    pub fn set_user_data(&mut self, friend_id: FriendId, user_data: Option<Vec<u8>>) -> Result<()> {
        self.friends
            .get_mut(&friend_id)
            .ok_or(FriendError::NoSuchFriend(friend_id))?
            .user_data = user_data;
        Ok(())
    }

    pub fn get(&self, friend_id: FriendId) -> Option<&Friend> {
        self.friends.get(&friend_id)
    }

    pub fn find_by_public_key(&self, public_key: &PublicKey32) -> Option<FriendId> {
        self.by_public_key.get(&public_key.0).copied()
    }

    /// A deep-copied snapshot: callers may freely mutate the result
    /// without affecting the table.
    pub fn get_friends(&self) -> Vec<Friend> {
        let mut friends: Vec<Friend> = self.friends.values().cloned().collect();
        friends.sort_by_key(|f| f.friend_id);
        friends
    }

    pub fn len(&self) -> usize {
        self.friends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.friends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tox_crypto::keys::generate_keypair;
    use tox_crypto::nonce::generate_nospam;
    use tox_crypto::toxid;

    fn tox_id_for(public_key: PublicKey32) -> String {
        let nospam = generate_nospam();
        toxid::encode(&public_key, &nospam)
    }

    #[test]
    fn test_add_by_public_key_then_delete_frees_slot() {
        let mut table = FriendTable::new();
        let (pk, _) = generate_keypair();
        let id = table.add_by_public_key(pk).expect("add");
        assert_eq!(id, 0);
        table.delete(id).expect("delete");
        let (pk2, _) = generate_keypair();
        let id2 = table.add_by_public_key(pk2).expect("re-add");
        assert_eq!(id2, 0);
    }

    #[test]
    fn test_duplicate_public_key_rejected() {
        let mut table = FriendTable::new();
        let (pk, _) = generate_keypair();
        table.add_by_public_key(pk).expect("first add");
        let err = table.add_by_public_key(pk).unwrap_err();
        assert!(matches!(err, FriendError::AlreadyFriend));
    }

    #[test]
    fn test_friend_ids_are_dense_lowest_free() {
        let mut table = FriendTable::new();
        let ids: Vec<_> = (0..3)
            .map(|_| {
                let (pk, _) = generate_keypair();
                table.add_by_public_key(pk).expect("add")
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);

        table.delete(1).unwrap();
        let (pk, _) = generate_keypair();
        let reused = table.add_by_public_key(pk).expect("add");
        assert_eq!(reused, 1);
    }

    #[test]
    fn test_add_with_message_parses_tox_id() {
        let mut table = FriendTable::new();
        let (pk, _) = generate_keypair();
        let tox_id = tox_id_for(pk);
        let (id, parsed_pk, _nospam) = table
            .add_with_message(&tox_id, "hi, let's be friends")
            .expect("add with message");
        assert_eq!(id, 0);
        assert_eq!(parsed_pk, pk);
    }

    #[test]
    fn test_add_with_message_rejects_bad_tox_id() {
        let mut table = FriendTable::new();
        let err = table.add_with_message("not-a-tox-id", "hi").unwrap_err();
        assert!(matches!(err, FriendError::InvalidToxId(_)));
    }

    #[test]
    fn test_set_connection_status_returns_previous() {
        let mut table = FriendTable::new();
        let (pk, _) = generate_keypair();
        let id = table.add_by_public_key(pk).expect("add");
        let previous = table
            .set_connection_status(id, ConnectionStatus::Online)
            .expect("set status");
        assert_eq!(previous, ConnectionStatus::Offline);
        assert_eq!(table.get(id).unwrap().connection_status, ConnectionStatus::Online);
    }

    #[test]
    fn test_get_friends_is_a_deep_copy() {
        let mut table = FriendTable::new();
        let (pk, _) = generate_keypair();
        let id = table.add_by_public_key(pk).expect("add");
        let mut snapshot = table.get_friends();
        snapshot[0].connection_status = ConnectionStatus::Online;
        // The table itself is unaffected by mutating the snapshot.
        assert_eq!(table.get(id).unwrap().connection_status, ConnectionStatus::Offline);
    }

    #[test]
    fn test_delete_unknown_friend_errors() {
        let mut table = FriendTable::new();
        assert!(matches!(table.delete(42), Err(FriendError::NoSuchFriend(42))));
    }
}
