//! The host callback registry.
//!
//! Each callback is an `Arc<dyn Fn(..) + Send + Sync>`, the same shape
//! `tox_transport::socket` uses for its packet-type handlers. Unlike that
//! registry, these are never invoked from a spawned task: `Tox::iterate`
//! calls them directly and in sequence, so the host never observes
//! reentrancy or concurrent callback invocations.

use std::sync::Arc;

use tox_crypto::keys::PublicKey32;
use tox_friend::messages::{DeliveryState, MessageId, MessageKind};
use tox_friend::table::{ConnectionStatus, PresenceStatus};
use tox_friend::FriendId;

type FriendRequestCb = Arc<dyn Fn(PublicKey32, String) + Send + Sync>;
type FriendMessageCb = Arc<dyn Fn(FriendId, String) + Send + Sync>;
type FriendMessageDetailedCb = Arc<dyn Fn(FriendId, String, MessageKind) + Send + Sync>;
type FriendStatusCb = Arc<dyn Fn(FriendId, PresenceStatus) + Send + Sync>;
type ConnectionStatusCb = Arc<dyn Fn(FriendId, ConnectionStatus) + Send + Sync>;
type FileRecvCb = Arc<dyn Fn(FriendId, u32, u64, String) + Send + Sync>;
type FileRecvChunkCb = Arc<dyn Fn(FriendId, u32, u64, Vec<u8>) + Send + Sync>;
type FileChunkRequestCb = Arc<dyn Fn(FriendId, u32, u64, usize) + Send + Sync>;
type AsyncMessageDeliveredCb = Arc<dyn Fn(PublicKey32, Vec<u8>) + Send + Sync>;
type MessageDeliveryStateCb = Arc<dyn Fn(FriendId, MessageId, DeliveryState) + Send + Sync>;

/// The set of callbacks a host may register, one slot per event kind. A
/// slot left unset simply means that event is dropped silently once
/// drained from the inbox.
#[derive(Default, Clone)]
pub struct Callbacks {
    friend_request: Option<FriendRequestCb>,
    friend_message: Option<FriendMessageCb>,
    friend_message_detailed: Option<FriendMessageDetailedCb>,
    friend_status: Option<FriendStatusCb>,
    connection_status: Option<ConnectionStatusCb>,
    file_recv: Option<FileRecvCb>,
    file_recv_chunk: Option<FileRecvChunkCb>,
    file_chunk_request: Option<FileChunkRequestCb>,
    async_message_delivered: Option<AsyncMessageDeliveredCb>,
    message_delivery_state: Option<MessageDeliveryStateCb>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_friend_request(&mut self, f: impl Fn(PublicKey32, String) + Send + Sync + 'static) {
        self.friend_request = Some(Arc::new(f));
    }

    pub fn on_friend_message(&mut self, f: impl Fn(FriendId, String) + Send + Sync + 'static) {
        self.friend_message = Some(Arc::new(f));
    }

    pub fn on_friend_message_detailed(
        &mut self,
        f: impl Fn(FriendId, String, MessageKind) + Send + Sync + 'static,
    ) {
        self.friend_message_detailed = Some(Arc::new(f));
    }

    pub fn on_friend_status(&mut self, f: impl Fn(FriendId, PresenceStatus) + Send + Sync + 'static) {
        self.friend_status = Some(Arc::new(f));
    }

    pub fn on_connection_status(
        &mut self,
        f: impl Fn(FriendId, ConnectionStatus) + Send + Sync + 'static,
    ) {
        self.connection_status = Some(Arc::new(f));
    }

    pub fn on_file_recv(&mut self, f: impl Fn(FriendId, u32, u64, String) + Send + Sync + 'static) {
        self.file_recv = Some(Arc::new(f));
    }

    /// Register the callback fired with each inbound chunk's bytes, so the
    /// host can write them to wherever it's assembling the file.
    pub fn on_file_recv_chunk(
        &mut self,
        f: impl Fn(FriendId, u32, u64, Vec<u8>) + Send + Sync + 'static,
    ) {
        self.file_recv_chunk = Some(Arc::new(f));
    }

    pub fn on_file_chunk_request(
        &mut self,
        f: impl Fn(FriendId, u32, u64, usize) + Send + Sync + 'static,
    ) {
        self.file_chunk_request = Some(Arc::new(f));
    }

    pub fn on_async_message_delivered(
        &mut self,
        f: impl Fn(PublicKey32, Vec<u8>) + Send + Sync + 'static,
    ) {
        self.async_message_delivered = Some(Arc::new(f));
    }

    /// Register the delivery-state callback, fired on every `pending ->
    /// sending -> sent -> delivered -> read` transition (and `failed`) for
    /// a message this instance sent.
    pub fn on_message_delivery_state(
        &mut self,
        f: impl Fn(FriendId, MessageId, DeliveryState) + Send + Sync + 'static,
    ) {
        self.message_delivery_state = Some(Arc::new(f));
    }

    /// Fire the friend-request callback if one is registered. Called by
    /// `Tox::iterate` once per surfaced inbound request.
    pub(crate) fn fire_friend_request(&self, sender: PublicKey32, message: String) {
        if let Some(cb) = &self.friend_request {
            cb(sender, message);
        }
    }

    /// Fire both the simple and detailed message callbacks, per spec: both
    /// fire if both are registered.
    pub(crate) fn fire_friend_message(&self, friend_id: FriendId, text: &str, kind: MessageKind) {
        if let Some(cb) = &self.friend_message {
            cb(friend_id, text.to_string());
        }
        if let Some(cb) = &self.friend_message_detailed {
            cb(friend_id, text.to_string(), kind);
        }
    }

    pub(crate) fn fire_friend_status(&self, friend_id: FriendId, status: PresenceStatus) {
        if let Some(cb) = &self.friend_status {
            cb(friend_id, status);
        }
    }

    pub(crate) fn fire_connection_status(&self, friend_id: FriendId, status: ConnectionStatus) {
        if let Some(cb) = &self.connection_status {
            cb(friend_id, status);
        }
    }

    pub(crate) fn fire_file_recv(&self, friend_id: FriendId, file_id: u32, file_size: u64, filename: String) {
        if let Some(cb) = &self.file_recv {
            cb(friend_id, file_id, file_size, filename);
        }
    }

    pub(crate) fn fire_file_recv_chunk(&self, friend_id: FriendId, file_id: u32, position: u64, bytes: Vec<u8>) {
        if let Some(cb) = &self.file_recv_chunk {
            cb(friend_id, file_id, position, bytes);
        }
    }

    pub(crate) fn fire_file_chunk_request(
        &self,
        friend_id: FriendId,
        file_id: u32,
        position: u64,
        length: usize,
    ) {
        if let Some(cb) = &self.file_chunk_request {
            cb(friend_id, file_id, position, length);
        }
    }

    pub(crate) fn fire_async_message_delivered(&self, sender: PublicKey32, payload: Vec<u8>) {
        if let Some(cb) = &self.async_message_delivered {
            cb(sender, payload);
        }
    }

    pub(crate) fn fire_message_delivery_state(
        &self,
        friend_id: FriendId,
        message_id: MessageId,
        state: DeliveryState,
    ) {
        if let Some(cb) = &self.message_delivery_state {
            cb(friend_id, message_id, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    #[test]
    fn test_unregistered_callback_is_a_silent_no_op() {
        let callbacks = Callbacks::new();
        callbacks.fire_friend_request(PublicKey32([0u8; 32]), "hi".to_string());
    }

    #[test]
    fn test_both_simple_and_detailed_message_callbacks_fire() {
        let mut callbacks = Callbacks::new();
        let simple_calls = StdArc::new(AtomicUsize::new(0));
        let detailed_calls = StdArc::new(AtomicUsize::new(0));

        let simple_clone = StdArc::clone(&simple_calls);
        callbacks.on_friend_message(move |_id, _text| {
            simple_clone.fetch_add(1, Ordering::SeqCst);
        });
        let detailed_clone = StdArc::clone(&detailed_calls);
        callbacks.on_friend_message_detailed(move |_id, _text, _kind| {
            detailed_clone.fetch_add(1, Ordering::SeqCst);
        });

        callbacks.fire_friend_message(0, "hello", MessageKind::Normal);

        assert_eq!(simple_calls.load(Ordering::SeqCst), 1);
        assert_eq!(detailed_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_friend_request_callback_receives_sender_and_message() {
        let mut callbacks = Callbacks::new();
        let received = StdArc::new(std::sync::Mutex::new(None));
        let received_clone = StdArc::clone(&received);
        callbacks.on_friend_request(move |sender, message| {
            *received_clone.lock().expect("lock") = Some((sender, message));
        });

        let sender = PublicKey32([7u8; 32]);
        callbacks.fire_friend_request(sender, "let's be friends".to_string());

        let guard = received.lock().expect("lock");
        let (recv_sender, recv_message) = guard.as_ref().expect("callback fired");
        assert_eq!(*recv_sender, sender);
        assert_eq!(recv_message, "let's be friends");
    }

    #[test]
    fn test_message_delivery_state_callback_receives_transition() {
        let mut callbacks = Callbacks::new();
        let received = StdArc::new(std::sync::Mutex::new(None));
        let received_clone = StdArc::clone(&received);
        callbacks.on_message_delivery_state(move |friend_id, message_id, state| {
            *received_clone.lock().expect("lock") = Some((friend_id, message_id, state));
        });

        callbacks.fire_message_delivery_state(3, 7, DeliveryState::Delivered);

        let guard = received.lock().expect("lock");
        let (friend_id, message_id, state) = guard.as_ref().expect("callback fired");
        assert_eq!(*friend_id, 3);
        assert_eq!(*message_id, 7);
        assert_eq!(*state, DeliveryState::Delivered);
    }
}
