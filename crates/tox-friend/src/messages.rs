//! Real-time and async message delivery, plus the delivery-state machine
//! tracked per outbound message.

use std::collections::HashMap;

use tox_crypto::keys::PublicKey32;

use crate::table::{ConnectionStatus, FriendTable};
use crate::{FriendError, FriendId, Result};

/// Maximum message body size, in UTF-8 bytes.
pub const MAX_MESSAGE_BYTES: usize = 1372;

/// Application-level message kind, carried alongside the text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Normal,
    Action,
}

/// Delivery progress of one outbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryState {
    fn is_terminal(self) -> bool {
        matches!(self, DeliveryState::Read | DeliveryState::Failed)
    }
}

/// A message id, unique per friend for the lifetime of the session.
pub type MessageId = u32;

struct OutboundMessage {
    state: DeliveryState,
}

/// Tracks delivery state for outbound messages, keyed by friend and
/// message id.
#[derive(Default)]
pub struct DeliveryTracker {
    next_id: HashMap<FriendId, MessageId>,
    messages: HashMap<(FriendId, MessageId), OutboundMessage>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self, friend_id: FriendId) -> MessageId {
        let id = *self.next_id.get(&friend_id).unwrap_or(&0);
        self.next_id.insert(friend_id, id + 1);
        id
    }

    /// Record a freshly-submitted message as `pending`.
    pub fn track(&mut self, friend_id: FriendId) -> MessageId {
        let id = self.allocate_id(friend_id);
        self.messages
            .insert((friend_id, id), OutboundMessage { state: DeliveryState::Pending });
        id
    }

    pub fn state(&self, friend_id: FriendId, message_id: MessageId) -> Option<DeliveryState> {
        self.messages.get(&(friend_id, message_id)).map(|m| m.state)
    }

    /// Advance a message's delivery state. Transitions out of a terminal
    /// state are rejected; all other transitions (including no-op
    /// repeats) are accepted, since the spec's state machine is a
    /// strictly-forward pipeline the transport may re-deliver
    /// acknowledgements for.
    pub fn advance(&mut self, friend_id: FriendId, message_id: MessageId, new_state: DeliveryState) -> bool {
        let Some(entry) = self.messages.get_mut(&(friend_id, message_id)) else {
            return false;
        };
        if entry.state.is_terminal() {
            return false;
        }
        entry.state = new_state;
        true
    }
}

/// Where an outbound message should be routed, decided by the friend's
/// live connection status and whether the async store has room.
#[derive(Debug, PartialEq, Eq)]
pub enum SendPlan {
    RealTime,
    Async,
}

/// Validate a message body and friend id, returning the fully non-empty
/// byte length on success.
fn validate(text: &str) -> Result<usize> {
    let len = text.as_bytes().len();
    if text.is_empty() || len > MAX_MESSAGE_BYTES {
        return Err(FriendError::InvalidMessageLength(len));
    }
    Ok(len)
}

/// Decide how `send` should route a message, per §4.10: online friends go
/// real-time; offline friends fall back to async if available, else the
/// send fails outright rather than silently succeeding.
pub fn plan_send(
    table: &FriendTable,
    friend_id: FriendId,
    text: &str,
    async_available: bool,
) -> Result<SendPlan> {
    validate(text)?;
    let friend = table.get(friend_id).ok_or(FriendError::NoSuchFriend(friend_id))?;

    match friend.connection_status {
        ConnectionStatus::Online => Ok(SendPlan::RealTime),
        ConnectionStatus::Offline if async_available => Ok(SendPlan::Async),
        ConnectionStatus::Offline => Err(FriendError::FriendNotConnected {
            async_unavailable: true,
        }),
    }
}

/// An inbound message, decrypted and ready to dispatch to callbacks.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub friend_id: FriendId,
    pub sender_public_key: PublicKey32,
    pub text: String,
    pub kind: MessageKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tox_crypto::keys::generate_keypair;

    fn table_with_friend(status: ConnectionStatus) -> (FriendTable, FriendId) {
        let mut table = FriendTable::new();
        let (pk, _) = generate_keypair();
        let id = table.add_by_public_key(pk).expect("add");
        table.set_connection_status(id, status).expect("set status");
        (table, id)
    }

    #[test]
    fn test_empty_message_rejected() {
        let (table, id) = table_with_friend(ConnectionStatus::Online);
        let err = plan_send(&table, id, "", true).unwrap_err();
        assert!(matches!(err, FriendError::InvalidMessageLength(0)));
    }

    #[test]
    fn test_oversized_message_rejected() {
        let (table, id) = table_with_friend(ConnectionStatus::Online);
        let text = "a".repeat(MAX_MESSAGE_BYTES + 1);
        let err = plan_send(&table, id, &text, true).unwrap_err();
        assert!(matches!(err, FriendError::InvalidMessageLength(n) if n == MAX_MESSAGE_BYTES + 1));
    }

    #[test]
    fn test_max_length_message_accepted() {
        let (table, id) = table_with_friend(ConnectionStatus::Online);
        let text = "a".repeat(MAX_MESSAGE_BYTES);
        assert_eq!(plan_send(&table, id, &text, true).unwrap(), SendPlan::RealTime);
    }

    #[test]
    fn test_online_friend_uses_realtime_path() {
        let (table, id) = table_with_friend(ConnectionStatus::Online);
        assert_eq!(plan_send(&table, id, "hi", true).unwrap(), SendPlan::RealTime);
    }

    #[test]
    fn test_offline_friend_with_async_available_uses_async_path() {
        let (table, id) = table_with_friend(ConnectionStatus::Offline);
        assert_eq!(plan_send(&table, id, "hi", true).unwrap(), SendPlan::Async);
    }

    #[test]
    fn test_offline_friend_without_async_fails_loudly() {
        let (table, id) = table_with_friend(ConnectionStatus::Offline);
        let err = plan_send(&table, id, "hi", false).unwrap_err();
        assert!(matches!(
            err,
            FriendError::FriendNotConnected { async_unavailable: true }
        ));
    }

    #[test]
    fn test_send_to_nonexistent_friend_fails() {
        let table = FriendTable::new();
        let err = plan_send(&table, 99, "hi", true).unwrap_err();
        assert!(matches!(err, FriendError::NoSuchFriend(99)));
    }

    #[test]
    fn test_delivery_state_progresses_and_fires() {
        let mut tracker = DeliveryTracker::new();
        let id = tracker.track(0);
        assert_eq!(tracker.state(0, id), Some(DeliveryState::Pending));

        assert!(tracker.advance(0, id, DeliveryState::Sending));
        assert!(tracker.advance(0, id, DeliveryState::Sent));
        assert!(tracker.advance(0, id, DeliveryState::Delivered));
        assert!(tracker.advance(0, id, DeliveryState::Read));
        assert_eq!(tracker.state(0, id), Some(DeliveryState::Read));
    }

    #[test]
    fn test_delivery_state_terminal_rejects_further_transitions() {
        let mut tracker = DeliveryTracker::new();
        let id = tracker.track(0);
        assert!(tracker.advance(0, id, DeliveryState::Failed));
        assert!(!tracker.advance(0, id, DeliveryState::Sent));
        assert_eq!(tracker.state(0, id), Some(DeliveryState::Failed));
    }

    #[test]
    fn test_message_ids_increment_per_friend() {
        let mut tracker = DeliveryTracker::new();
        let a = tracker.track(0);
        let b = tracker.track(0);
        let c = tracker.track(1);
        assert_eq!((a, b, c), (0, 1, 0));
    }
}
