//! The [`Tox`] driver: composes every lower-layer crate into the
//! host-facing API surface, wires packet handlers to a real UDP socket,
//! and runs the Noise-IK handshake and version-commitment exchange that
//! bring up a friend session.
//!
//! Lock order, per the concurrency model this follows: friends, then
//! sessions, then the DHT routing table. No lock is ever held across a
//! callback invocation or an `.await` point.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{info, warn};

use tox_crypto::aead;
use tox_crypto::keys::{self, PublicKey32, SecretKey32};
use tox_crypto::nonce;
use tox_crypto::toxid;
use tox_dht::bootstrap::{BootstrapConfig, BootstrapManager, BootstrapTransport, SeedNode};
use tox_dht::kademlia::RoutingTable;
use tox_friend::async_store::{AsyncStore, Envelope, PreKey, PreKeyExchange, StoreConfig};
use tox_friend::files::FileTransfer;
use tox_friend::messages::{self, DeliveryState, DeliveryTracker, MessageId, MessageKind, SendPlan};
use tox_friend::prekey::{PreKeyPool, DEFAULT_BATCH_SIZE};
use tox_friend::requests::{self, RequestQueue};
use tox_friend::table::{ConnectionStatus, Friend, FriendTable, PresenceStatus};
use tox_friend::FriendId;
use tox_session::handshake::{Handshake, HandshakeMessage1, HandshakeMessage2, HandshakeOutput, Role};
use tox_session::store::{Session, SessionStore};
use tox_session::version::{self, VersionAdvertisement, VersionCommitment};
use tox_transport::clock::{Clock, SharedClock, SystemClock};
use tox_transport::UdpTransport;
use tox_packet::{Packet, PacketKind};

use crate::callbacks::Callbacks;
use crate::network::{
    self, UdpBootstrapTransport, UdpFriendRequestTransport,
};
use crate::options::{SavedataType, ToxOptions};
use crate::save::{self, SaveData};
use crate::{Result, ToxError};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const FRIEND_REQUEST_DRIVE_INTERVAL_SECS: u64 = 5;
const DHT_MAINTENANCE_INTERVAL_SECS: u64 = 10;

fn encode_body<T: Serialize>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).expect("in-memory cbor encode cannot fail");
    buf
}

fn decode_body<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Option<T> {
    ciborium::from_reader(bytes).ok()
}

#[derive(Serialize, Deserialize)]
struct PlainMessage {
    kind: u8,
    text: String,
}

fn message_kind_to_u8(kind: MessageKind) -> u8 {
    match kind {
        MessageKind::Normal => 0,
        MessageKind::Action => 1,
    }
}

fn message_kind_from_u8(b: u8) -> MessageKind {
    match b {
        1 => MessageKind::Action,
        _ => MessageKind::Normal,
    }
}

/// A legacy-box message body: used both for a Legacy-negotiated session
/// and for opportunistic delivery to an offline friend, since both cases
/// use the same self-contained per-message box keyed off long-term keys
/// rather than a negotiated session key.
///
/// `pre_key_exchange` is set when this body was sealed under one of the
/// recipient's one-time pre-keys rather than the sender's long-term
/// secret, per §4.12's forward-secrecy requirement for the async path;
/// `sender` is still carried either way, for friend lookup and display.
#[derive(Serialize, Deserialize)]
struct LegacyMessageBody {
    sender: [u8; 32],
    nonce: [u8; 24],
    ciphertext: Vec<u8>,
    pre_key_exchange: Option<PreKeyExchange>,
}

/// A Noise-session message body: counter-ordered, keyed off the
/// established session's transport key. `sender` identifies which
/// session to decrypt against; unlike the legacy body it is not itself
/// secret (the AEAD tag, not the sender field, authenticates the
/// message), so carrying it in the clear costs nothing.
#[derive(Serialize, Deserialize)]
struct NoiseMessageBody {
    sender: [u8; 32],
    counter: u64,
    nonce: [u8; 24],
    ciphertext: Vec<u8>,
}

/// File-transfer control and data wire envelopes. Both ride on an
/// established Noise session, the same counter-ordered, session-keyed
/// shape as [`NoiseMessageBody`] — file transfer has no meaning before a
/// friend is online and has completed a handshake, so there is no legacy
/// (session-less) equivalent to carry.
#[derive(Serialize, Deserialize)]
struct FileControlBody {
    sender: [u8; 32],
    counter: u64,
    nonce: [u8; 24],
    ciphertext: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct FileDataBody {
    sender: [u8; 32],
    counter: u64,
    nonce: [u8; 24],
    ciphertext: Vec<u8>,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
enum FileControlOp {
    Offer,
    Pause,
    Resume,
    Cancel,
}

#[derive(Serialize, Deserialize)]
struct PlainFileControl {
    op: FileControlOp,
    file_id: u32,
    file_size: u64,
    kind: u8,
    name: String,
}

#[derive(Serialize, Deserialize)]
struct PlainFileChunk {
    file_id: u32,
    position: u64,
    bytes: Vec<u8>,
}

/// The payload carried inside both Noise-IK handshake messages: the
/// version advertisement used for negotiation (§4.7) and a fresh batch of
/// one-time pre-keys published to whichever peer completes this handshake
/// (§4.12). The handshake layer itself treats this as an opaque encrypted
/// payload; only this crate assigns it meaning.
#[derive(Serialize, Deserialize)]
struct HandshakeHello {
    advertisement: VersionAdvertisement,
    pre_keys: Vec<PublicKey32>,
}

/// The result of a completed handshake, handed back to the initiator's
/// waiting `connect_friend` call by the message-2 handler.
struct HandshakeComplete {
    output: HandshakeOutput,
    peer_advertisement: VersionAdvertisement,
    peer_pre_keys: Vec<PublicKey32>,
}

/// A file transfer in flight, indexed by friend and a locally-assigned
/// file id.
#[derive(Default)]
struct FileTransfers {
    next_id: HashMap<FriendId, u32>,
    transfers: HashMap<(FriendId, u32), FileTransfer>,
}

impl FileTransfers {
    fn allocate(&mut self, friend_id: FriendId, file_size: u64, kind: u8, name: String) -> u32 {
        let id = *self.next_id.get(&friend_id).unwrap_or(&0);
        self.next_id.insert(friend_id, id + 1);
        self.transfers.insert((friend_id, id), FileTransfer::new(file_size, kind, name));
        id
    }

    /// Insert a receiver-side transfer at the sender's own numeric file id
    /// (the id space is per-sender; the receiver mirrors the same number
    /// rather than allocating its own).
    fn insert_inbound(&mut self, friend_id: FriendId, file_id: u32, file_size: u64, kind: u8, name: String) {
        self.transfers.insert((friend_id, file_id), FileTransfer::new(file_size, kind, name));
    }
}

/// The top-level Tox driver. Construct with [`Tox::new`] or
/// [`Tox::new_from_save`], drive with [`Tox::iterate`] at
/// [`Tox::iteration_interval`], register callbacks, then interact through
/// the friend/messaging/file/network methods.
pub struct Tox {
    self_secret_key: SecretKey32,
    self_public_key: PublicKey32,
    self_nospam: Mutex<[u8; 4]>,
    self_name: Mutex<String>,
    self_status_msg: Mutex<String>,

    friends: Arc<Mutex<FriendTable>>,
    delivery: Mutex<DeliveryTracker>,
    sessions: Arc<Mutex<SessionStore>>,
    async_store: Arc<Mutex<AsyncStore>>,
    pre_key_pool: Arc<Mutex<PreKeyPool>>,
    request_queue: Mutex<RequestQueue>,
    file_transfers: Arc<Mutex<FileTransfers>>,
    callbacks: Arc<Mutex<Callbacks>>,

    routing_table: Arc<Mutex<RoutingTable>>,
    bootstrap_manager: BootstrapManager,

    transport: Option<UdpTransport>,
    bootstrap_transport: Option<Arc<UdpBootstrapTransport>>,
    request_transport: Option<Arc<UdpFriendRequestTransport>>,
    ping_transport: Option<Arc<network::UdpPingTransport>>,
    friend_request_inbox: Arc<Mutex<Vec<requests::IncomingRequest>>>,

    pending_handshakes: Arc<Mutex<HashMap<SocketAddr, Handshake>>>,
    pending_handshake_replies: Arc<Mutex<HashMap<SocketAddr, oneshot::Sender<HandshakeComplete>>>>,
    pending_commitments: Arc<Mutex<HashMap<SocketAddr, oneshot::Sender<VersionCommitment>>>>,

    clock: SharedClock,
    last_request_drive_at: Mutex<u64>,
    last_dht_maintenance_at: Mutex<u64>,
    running: AtomicBool,
    options: ToxOptions,
}

impl Tox {
    /// Construct a fresh instance, generating a new identity unless
    /// `options.savedata_type` says otherwise.
    pub async fn new(options: ToxOptions) -> Result<Self> {
        let save_data = match options.savedata_type {
            SavedataType::None => save::fresh(),
            SavedataType::SecretKey => {
                if options.savedata_bytes.len() != 32 {
                    return Err(ToxError::InvalidArgument(format!(
                        "expected 32-byte secret key, got {}",
                        options.savedata_bytes.len()
                    )));
                }
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(&options.savedata_bytes);
                SaveData::new(SecretKey32(bytes), nonce::generate_nospam())
            }
            SavedataType::FullSave => save::decode(&options.savedata_bytes)?,
        };
        Self::from_save_data(options, save_data).await
    }

    /// Construct an instance from a previously exported save blob.
    pub async fn new_from_save(options: ToxOptions, bytes: &[u8]) -> Result<Self> {
        let mut options = options;
        options.savedata_type = SavedataType::FullSave;
        options.savedata_bytes = bytes.to_vec();
        Self::new(options).await
    }

    async fn from_save_data(options: ToxOptions, save_data: SaveData) -> Result<Self> {
        let self_secret_key = SecretKey32(save_data.secret_key);
        let self_public_key = keys::public_key_for(&self_secret_key);
        let nospam = save_data.effective_nospam();

        let mut friends = FriendTable::new();
        for saved in &save_data.friends {
            let friend_id = friends.add_by_public_key(PublicKey32(saved.public_key))?;
            friends.set_name(friend_id, saved.name.clone())?;
            friends.set_status_message(friend_id, saved.status_msg.clone())?;
            friends.set_presence(friend_id, save::presence_from_u8(saved.presence))?;
            friends.touch_last_seen(friend_id, saved.last_seen)?;
        }
        let friends = Arc::new(Mutex::new(friends));

        let routing_table = Arc::new(Mutex::new(RoutingTable::new(self_public_key.0)));
        let friend_request_inbox = Arc::new(Mutex::new(Vec::new()));
        let pending_handshakes = Arc::new(Mutex::new(HashMap::new()));
        let pending_handshake_replies = Arc::new(Mutex::new(HashMap::new()));
        let pending_commitments = Arc::new(Mutex::new(HashMap::new()));
        let callbacks = Arc::new(Mutex::new(Callbacks::new()));
        let sessions = Arc::new(Mutex::new(SessionStore::new()));
        let async_store = Arc::new(Mutex::new(AsyncStore::new(StoreConfig::default())));
        let pre_key_pool = Arc::new(Mutex::new(PreKeyPool::new()));
        let file_transfers = Arc::new(Mutex::new(FileTransfers::default()));
        let clock: SharedClock = Arc::new(SystemClock);

        let (transport, bootstrap_transport, request_transport, ping_transport) = if options.udp_enabled {
            let ip = if options.ipv6_enabled {
                std::net::Ipv6Addr::UNSPECIFIED.into()
            } else {
                std::net::Ipv4Addr::UNSPECIFIED.into()
            };
            let transport = UdpTransport::bind(ip, options.start_port, options.end_port)
                .await
                .map_err(|err| ToxError::Internal(err.to_string()))?;

            let bootstrap_transport = Arc::new(UdpBootstrapTransport::new(transport.clone()));
            bootstrap_transport.install().await;
            network::register_get_nodes_responder(&transport, Arc::clone(&routing_table)).await;
            network::register_friend_request_handler(&transport, Arc::clone(&friend_request_inbox)).await;
            network::register_ping_responder(&transport).await;

            let ping_transport = Arc::new(network::UdpPingTransport::new(transport.clone()));
            ping_transport.install().await;

            let request_transport = Arc::new(UdpFriendRequestTransport::new(
                transport.clone(),
                Arc::clone(&routing_table),
                self_public_key,
            ));

            register_handshake_handlers(
                &transport,
                self_secret_key.clone(),
                Arc::clone(&friends),
                Arc::clone(&sessions),
                Arc::clone(&callbacks),
                Arc::clone(&async_store),
                Arc::clone(&pre_key_pool),
                Arc::clone(&pending_handshakes),
                Arc::clone(&pending_handshake_replies),
                Arc::clone(&pending_commitments),
                Arc::clone(&clock),
            )
            .await;

            register_message_handlers(
                &transport,
                self_secret_key.clone(),
                Arc::clone(&friends),
                Arc::clone(&sessions),
                Arc::clone(&callbacks),
                Arc::clone(&pre_key_pool),
            )
            .await;

            register_file_handlers(
                &transport,
                Arc::clone(&friends),
                Arc::clone(&sessions),
                Arc::clone(&callbacks),
                Arc::clone(&file_transfers),
            )
            .await;

            (Some(transport), Some(bootstrap_transport), Some(request_transport), Some(ping_transport))
        } else {
            (None, None, None, None)
        };

        let bootstrap_manager = BootstrapManager::new(BootstrapConfig {
            seeds: Vec::new(),
            min_nodes: 1,
            per_attempt_timeout: Duration::from_secs(options.bootstrap_timeout_secs),
            max_attempts: 1,
        });

        Ok(Self {
            self_secret_key,
            self_public_key,
            self_nospam: Mutex::new(nospam),
            self_name: Mutex::new(save_data.self_name),
            self_status_msg: Mutex::new(save_data.self_status_msg),
            friends,
            delivery: Mutex::new(DeliveryTracker::new()),
            sessions,
            async_store,
            pre_key_pool,
            request_queue: Mutex::new(RequestQueue::new()),
            file_transfers: Arc::clone(&file_transfers),
            callbacks,
            routing_table,
            bootstrap_manager,
            transport,
            bootstrap_transport,
            request_transport,
            ping_transport,
            friend_request_inbox,
            pending_handshakes,
            pending_handshake_replies,
            pending_commitments,
            clock,
            last_request_drive_at: Mutex::new(0),
            last_dht_maintenance_at: Mutex::new(0),
            running: AtomicBool::new(true),
            options,
        })
    }

    /// Tear down the instance. Idempotent; subsequent calls to other
    /// public methods return [`ToxError::NotPermitted`].
    pub fn kill(&self) {
        if let Some(transport) = &self.transport {
            transport.close();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn require_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ToxError::NotPermitted)
        }
    }

    /// Recommended interval, in milliseconds, between `iterate` calls.
    pub fn iteration_interval(&self) -> Duration {
        Duration::from_millis(50)
    }

    /// Drain pending work: surface inbound friend requests, pace the
    /// outbound friend-request retry queue, and redeliver any
    /// async-queued messages to friends who have since reconnected. Never
    /// blocks on a full network round trip; handshakes and deliveries run
    /// in the background and report back through the queues this drains.
    pub async fn iterate(&self) {
        if !self.is_running() {
            return;
        }

        self.surface_friend_requests();
        self.drive_friend_requests_if_due().await;
        self.redeliver_queued_messages().await;
        self.dht_maintenance_if_due().await;
    }

    /// Per spec §4.6: ping the oldest node in each non-empty bucket,
    /// marking it `bad` on timeout; for buckets below half capacity, ask
    /// the freshest known neighbor in that bucket for more nodes near our
    /// own id. Gated to run at most once per [`DHT_MAINTENANCE_INTERVAL_SECS`]
    /// so a fast host driving `iterate` tightly doesn't flood the network.
    async fn dht_maintenance_if_due(&self) {
        let Some(ping_transport) = &self.ping_transport else {
            return;
        };
        let now = self.clock.now_unix_secs();
        {
            let mut last = self.last_dht_maintenance_at.lock().expect("lock poisoned");
            if now.saturating_sub(*last) < DHT_MAINTENANCE_INTERVAL_SECS {
                return;
            }
            *last = now;
        }

        let (stale_candidates, refresh_targets) = {
            let table = self.routing_table.lock().expect("lock poisoned");
            let stale = table.oldest_per_bucket();
            let refresh = table
                .below_half_capacity()
                .into_iter()
                .filter_map(|idx| table.freshest_in_bucket(idx))
                .collect::<Vec<_>>();
            (stale, refresh)
        };

        for node in stale_candidates {
            let alive = ping_transport.ping(node.net_addr.0).await;
            let mut table = self.routing_table.lock().expect("lock poisoned");
            if alive {
                table.insert(tox_dht::kademlia::NodeInfo {
                    last_seen: now,
                    status: tox_dht::kademlia::NodeStatus::Good,
                    ..node
                });
            } else {
                table.set_status(&node.node_id, tox_dht::kademlia::NodeStatus::Bad);
            }
        }

        if let Some(bootstrap_transport) = &self.bootstrap_transport {
            let local_target = self.self_public_key.0;
            for neighbor in refresh_targets {
                let seed = SeedNode { addr: neighbor.net_addr.0, node_id: neighbor.node_id };
                let nodes = bootstrap_transport.get_nodes(&seed, local_target).await;
                let mut table = self.routing_table.lock().expect("lock poisoned");
                for found in nodes.into_iter().flatten() {
                    table.insert(found);
                }
            }
        }
    }

    fn surface_friend_requests(&self) {
        let incoming: Vec<_> = {
            let mut inbox = self.friend_request_inbox.lock().expect("lock poisoned");
            std::mem::take(&mut *inbox)
        };
        let friends = self.friends.lock().expect("lock poisoned");
        let callbacks = self.callbacks.lock().expect("lock poisoned");
        for request in incoming {
            if requests::should_surface(&request.sender, &friends) {
                callbacks.fire_friend_request(request.sender, request.message);
            }
        }
    }

    async fn drive_friend_requests_if_due(&self) {
        let Some(transport) = &self.request_transport else {
            return;
        };
        let now = self.clock.now_unix_secs();
        {
            let mut last = self.last_request_drive_at.lock().expect("lock poisoned");
            if now.saturating_sub(*last) < FRIEND_REQUEST_DRIVE_INTERVAL_SECS {
                return;
            }
            *last = now;
        }
        let mut queue = self.request_queue.lock().expect("lock poisoned");
        let outcome = queue.drive_once(transport.as_ref()).await;
        if outcome.delivered > 0 || outcome.dropped > 0 {
            info!(delivered = outcome.delivered, dropped = outcome.dropped, "friend request queue drained");
        }
    }

    async fn redeliver_queued_messages(&self) {
        let Some(transport) = &self.transport else {
            return;
        };
        let online_friends: Vec<Friend> = self
            .friends
            .lock()
            .expect("lock poisoned")
            .get_friends()
            .into_iter()
            .filter(|f| f.connection_status == ConnectionStatus::Online)
            .collect();

        for friend in online_friends {
            let envelopes = {
                let mut store = self.async_store.lock().expect("lock poisoned");
                store.drain(&friend.public_key)
            };
            if envelopes.is_empty() {
                continue;
            }
            let Some(addr) = self.lookup_dht_address(&friend.public_key) else {
                continue;
            };
            let callbacks = Arc::clone(&self.callbacks);
            for envelope in envelopes {
                let body = LegacyMessageBody {
                    sender: self.self_public_key.0,
                    nonce: envelope.nonce,
                    ciphertext: envelope.ciphertext.clone(),
                    pre_key_exchange: envelope.pre_key_exchange,
                };
                let packet = Packet::new(PacketKind::FriendMessage, encode_body(&body));
                if transport.send(&packet, addr).await.is_ok() {
                    let advanced = self.delivery.lock().expect("lock poisoned").advance(
                        envelope.friend_id,
                        envelope.message_id,
                        DeliveryState::Delivered,
                    );
                    let callbacks = callbacks.lock().expect("lock poisoned");
                    if advanced {
                        callbacks.fire_message_delivery_state(
                            envelope.friend_id,
                            envelope.message_id,
                            DeliveryState::Delivered,
                        );
                    }
                    callbacks.fire_async_message_delivered(friend.public_key, envelope.ciphertext);
                }
            }
        }
    }

    fn lookup_dht_address(&self, target: &PublicKey32) -> Option<SocketAddr> {
        let table = self.routing_table.lock().expect("lock poisoned");
        table
            .find_closest(&target.0, 1)
            .into_iter()
            .find(|node| node.node_id == target.0)
            .map(|node| node.net_addr.0)
    }

    // ---- Identity ----------------------------------------------------

    /// This instance's 76-character Tox ID.
    pub fn self_address(&self) -> String {
        let nospam = *self.self_nospam.lock().expect("lock poisoned");
        toxid::encode(&self.self_public_key, &nospam)
    }

    pub fn self_public_key(&self) -> PublicKey32 {
        self.self_public_key
    }

    pub fn self_nospam(&self) -> [u8; 4] {
        *self.self_nospam.lock().expect("lock poisoned")
    }

    pub fn self_set_nospam(&self, nospam: [u8; 4]) {
        *self.self_nospam.lock().expect("lock poisoned") = nospam;
    }

    pub fn self_set_name(&self, name: impl Into<String>) {
        *self.self_name.lock().expect("lock poisoned") = name.into();
    }

    pub fn self_set_status_message(&self, status_msg: impl Into<String>) {
        *self.self_status_msg.lock().expect("lock poisoned") = status_msg.into();
    }

    // ---- Friends -------------------------------------------------------

    /// Parse `address` as a Tox ID, add it as a friend, and queue the
    /// outbound friend request carrying `message`.
    pub fn add_friend(&self, address: &str, message: &str) -> Result<FriendId> {
        self.require_running()?;
        let (friend_id, public_key, _nospam) = self
            .friends
            .lock()
            .expect("lock poisoned")
            .add_with_message(address, message)?;
        self.request_queue
            .lock()
            .expect("lock poisoned")
            .enqueue(public_key, message.to_string());
        Ok(friend_id)
    }

    /// Add a friend directly by public key, with no outbound request —
    /// for a relationship already established out of band (e.g. after
    /// accepting an inbound request).
    pub fn add_friend_by_public_key(&self, public_key: PublicKey32) -> Result<FriendId> {
        self.require_running()?;
        Ok(self.friends.lock().expect("lock poisoned").add_by_public_key(public_key)?)
    }

    pub fn delete_friend(&self, friend_id: FriendId) -> Result<()> {
        self.require_running()?;
        let friend = self.friends.lock().expect("lock poisoned").delete(friend_id)?;
        self.sessions.lock().expect("lock poisoned").remove(&friend.public_key);
        self.request_queue.lock().expect("lock poisoned").remove(&friend.public_key);
        self.file_transfers
            .lock()
            .expect("lock poisoned")
            .transfers
            .retain(|(id, _), _| *id != friend_id);
        Ok(())
    }

    pub fn friend_exists(&self, friend_id: FriendId) -> bool {
        self.friends.lock().expect("lock poisoned").get(friend_id).is_some()
    }

    pub fn get_friend_public_key(&self, friend_id: FriendId) -> Result<PublicKey32> {
        self.friends
            .lock()
            .expect("lock poisoned")
            .get(friend_id)
            .map(|f| f.public_key)
            .ok_or(ToxError::NotFound)
    }

    /// A deep-copied snapshot of every friend, taken under the friends
    /// lock alone; no other lock is held while copying.
    pub fn get_friends(&self) -> Vec<Friend> {
        self.friends.lock().expect("lock poisoned").get_friends()
    }

    /// Force a friend's connection status, bypassing handshake detection.
    /// Exposed for hosts that manage connectivity through an external
    /// relay or for deterministic tests.
    pub fn set_friend_connection_status(&self, friend_id: FriendId, status: ConnectionStatus) -> Result<()> {
        let previous = self.friends.lock().expect("lock poisoned").set_connection_status(friend_id, status)?;
        if previous != status {
            self.callbacks.lock().expect("lock poisoned").fire_connection_status(friend_id, status);
        }
        Ok(())
    }

    /// Perform the Noise-IK handshake and version-commitment exchange
    /// against an already-DHT-reachable friend, establishing a session
    /// and marking them online on success.
    pub async fn connect_friend(&self, friend_id: FriendId) -> Result<()> {
        self.require_running()?;
        let transport = self
            .transport
            .as_ref()
            .ok_or(ToxError::NotConnected { async_unavailable: true })?;

        let peer_public_key = self.get_friend_public_key(friend_id)?;
        let addr = self
            .lookup_dht_address(&peer_public_key)
            .ok_or(ToxError::NotConnected { async_unavailable: true })?;

        let mut handshake = Handshake::new_initiator(self.self_secret_key.clone(), peer_public_key);
        let my_advertisement = VersionAdvertisement::all();
        let my_pre_keys = self.pre_key_pool.lock().expect("lock poisoned").generate_batch(DEFAULT_BATCH_SIZE);
        let hello = HandshakeHello { advertisement: my_advertisement, pre_keys: my_pre_keys };
        let msg1 = handshake
            .write_message1(&encode_body(&hello))
            .map_err(tox_session::SessionError::from)?;

        let (tx, rx) = oneshot::channel();
        self.pending_handshake_replies.lock().expect("lock poisoned").insert(addr, tx);
        self.pending_handshakes.lock().expect("lock poisoned").insert(addr, handshake);

        transport
            .send(&Packet::new(PacketKind::NoiseHandshakeMessage1, encode_body(&msg1)), addr)
            .await
            .map_err(|err| ToxError::Internal(err.to_string()))?;

        let complete = tokio::time::timeout(HANDSHAKE_TIMEOUT, rx)
            .await
            .map_err(|_| ToxError::TimedOut("handshake message 2".to_string()))?
            .map_err(|_| ToxError::Internal("handshake reply channel dropped".to_string()))?;

        let negotiated = my_advertisement
            .negotiate(&complete.peer_advertisement)
            .ok_or(tox_session::SessionError::VersionMismatch)?;

        let mut session = Session::new(peer_public_key, Role::Initiator);
        session.complete(&complete.output, negotiated);
        let my_commitment = version::commit(&complete.output.handshake_hash, negotiated, &self.clock);

        let (ctx, crx) = oneshot::channel();
        self.pending_commitments.lock().expect("lock poisoned").insert(addr, ctx);
        transport
            .send(&Packet::new(PacketKind::VersionCommitment, encode_body(&my_commitment)), addr)
            .await
            .map_err(|err| ToxError::Internal(err.to_string()))?;

        let peer_commitment = tokio::time::timeout(HANDSHAKE_TIMEOUT, crx)
            .await
            .map_err(|_| ToxError::TimedOut("version commitment".to_string()))?
            .map_err(|_| ToxError::Internal("commitment reply channel dropped".to_string()))?;

        version::verify(&peer_commitment, negotiated, &complete.output.handshake_hash, &self.clock)?;

        self.sessions.lock().expect("lock poisoned").insert(session);
        if !complete.peer_pre_keys.is_empty() {
            let keys = complete.peer_pre_keys.into_iter().map(|public| PreKey { public }).collect();
            self.async_store.lock().expect("lock poisoned").publish_pre_keys(peer_public_key, keys);
        }
        self.set_friend_connection_status(friend_id, ConnectionStatus::Online)?;
        Ok(())
    }

    // ---- Messaging -----------------------------------------------------

    /// Send a message to `friend_id`, routing real-time over an
    /// established session or, for an offline friend, queuing it for
    /// opportunistic delivery once they reconnect.
    pub async fn send_friend_message(
        &self,
        friend_id: FriendId,
        text: &str,
        kind: MessageKind,
    ) -> Result<MessageId> {
        self.require_running()?;
        let async_available = true;
        let plan = {
            let friends = self.friends.lock().expect("lock poisoned");
            messages::plan_send(&friends, friend_id, text, async_available)?
        };
        let peer_public_key = self.get_friend_public_key(friend_id)?;
        let message_id = self.delivery.lock().expect("lock poisoned").track(friend_id);

        let plaintext = encode_body(&PlainMessage {
            kind: message_kind_to_u8(kind),
            text: text.to_string(),
        });

        match plan {
            SendPlan::RealTime => {
                self.send_realtime(friend_id, &peer_public_key, &plaintext).await?;
                self.delivery.lock().expect("lock poisoned").advance(friend_id, message_id, DeliveryState::Sent);
                self.callbacks.lock().expect("lock poisoned").fire_message_delivery_state(
                    friend_id,
                    message_id,
                    DeliveryState::Sent,
                );
            }
            SendPlan::Async => {
                let nonce = nonce::generate_nonce();
                let taken_pre_key = self.async_store.lock().expect("lock poisoned").take_pre_key(&peer_public_key).ok();
                let (ciphertext, pre_key_exchange) = match taken_pre_key {
                    Some(pre_key) => {
                        let (ephemeral_public, ephemeral_secret) = keys::generate_keypair();
                        let key = aead::prekey_shared_key(&ephemeral_secret, &pre_key.public);
                        let ciphertext = aead::encrypt_with_key(&key, &nonce, &plaintext)?;
                        (
                            ciphertext,
                            Some(PreKeyExchange { ephemeral_public, pre_key_public: pre_key.public }),
                        )
                    }
                    None => {
                        let ciphertext = aead::encrypt(&plaintext, &nonce, &peer_public_key, &self.self_secret_key)?;
                        (ciphertext, None)
                    }
                };
                let envelope = Envelope {
                    sender: self.self_public_key,
                    nonce,
                    ciphertext,
                    enqueued_at_unix_secs: self.clock.now_unix_secs(),
                    friend_id,
                    message_id,
                    pre_key_exchange,
                };
                self.async_store.lock().expect("lock poisoned").enqueue(peer_public_key, envelope)?;
                self.delivery.lock().expect("lock poisoned").advance(friend_id, message_id, DeliveryState::Pending);
                self.callbacks.lock().expect("lock poisoned").fire_message_delivery_state(
                    friend_id,
                    message_id,
                    DeliveryState::Pending,
                );
            }
        }

        Ok(message_id)
    }

    async fn send_realtime(&self, friend_id: FriendId, peer_public_key: &PublicKey32, plaintext: &[u8]) -> Result<()> {
        let transport = self
            .transport
            .as_ref()
            .ok_or(ToxError::NotConnected { async_unavailable: true })?;
        let addr = self
            .lookup_dht_address(peer_public_key)
            .ok_or(ToxError::NotConnected { async_unavailable: true })?;

        let has_noise_session = {
            let sessions = self.sessions.lock().expect("lock poisoned");
            sessions.get(peer_public_key).map(|s| s.is_established()).unwrap_or(false)
        };

        let packet = if has_noise_session {
            let mut sessions = self.sessions.lock().expect("lock poisoned");
            let session = sessions.get_mut(peer_public_key).ok_or(tox_session::SessionError::NoSession)?;
            let counter = session.next_send_counter();
            let send_key = *session.send_key().map_err(ToxError::from)?;
            drop(sessions);
            let nonce = nonce::generate_nonce();
            let ciphertext = aead::encrypt_with_key(&send_key, &nonce, plaintext)?;
            Packet::new(
                PacketKind::FriendMessageNoise,
                encode_body(&NoiseMessageBody {
                    sender: self.self_public_key.0,
                    counter,
                    nonce,
                    ciphertext,
                }),
            )
        } else {
            let nonce = nonce::generate_nonce();
            let ciphertext = aead::encrypt(plaintext, &nonce, peer_public_key, &self.self_secret_key)?;
            Packet::new(
                PacketKind::FriendMessage,
                encode_body(&LegacyMessageBody {
                    sender: self.self_public_key.0,
                    nonce,
                    ciphertext,
                    pre_key_exchange: None,
                }),
            )
        };

        transport.send(&packet, addr).await.map_err(|err| {
            let _ = friend_id;
            ToxError::Internal(err.to_string())
        })
    }

    // ---- Files -----------------------------------------------------------

    /// Encrypt `plaintext` under the established Noise session with
    /// `peer_public_key`, the same counter/nonce shape `send_realtime`'s
    /// Noise branch uses. File transfer has no legacy (session-less)
    /// fallback: it only makes sense between two already-connected
    /// friends.
    async fn encrypt_for_session(&self, peer_public_key: &PublicKey32, plaintext: &[u8]) -> Result<(u64, [u8; 24], Vec<u8>)> {
        let mut sessions = self.sessions.lock().expect("lock poisoned");
        let session = sessions.get_mut(peer_public_key).ok_or(tox_session::SessionError::NoSession)?;
        if !session.is_established() {
            return Err(tox_session::SessionError::HandshakeIncomplete.into());
        }
        let counter = session.next_send_counter();
        let send_key = *session.send_key().map_err(ToxError::from)?;
        drop(sessions);
        let nonce = nonce::generate_nonce();
        let ciphertext = aead::encrypt_with_key(&send_key, &nonce, plaintext)?;
        Ok((counter, nonce, ciphertext))
    }

    async fn send_file_control(&self, peer_public_key: &PublicKey32, plain: &PlainFileControl) -> Result<()> {
        let transport = self
            .transport
            .as_ref()
            .ok_or(ToxError::NotConnected { async_unavailable: true })?;
        let addr = self
            .lookup_dht_address(peer_public_key)
            .ok_or(ToxError::NotConnected { async_unavailable: true })?;
        let (counter, nonce, ciphertext) = self.encrypt_for_session(peer_public_key, &encode_body(plain)).await?;
        let packet = Packet::new(
            PacketKind::FileControl,
            encode_body(&FileControlBody { sender: self.self_public_key.0, counter, nonce, ciphertext }),
        );
        transport.send(&packet, addr).await.map_err(|err| ToxError::Internal(err.to_string()))
    }

    /// Start a new outbound file transfer and announce it to the peer with
    /// an encrypted `Offer` control packet. Requires the friend to be
    /// online with an established session; on any failure to reach the
    /// peer, no local transfer state is left behind.
    pub async fn file_send(&self, friend_id: FriendId, file_size: u64, kind: u8, name: &str) -> Result<u32> {
        self.require_running()?;
        let peer_public_key = self.get_friend_public_key(friend_id)?;

        let file_id = {
            let mut transfers = self.file_transfers.lock().expect("lock poisoned");
            let file_id = transfers.allocate(friend_id, file_size, kind, name.to_string());
            let transfer = transfers.transfers.get_mut(&(friend_id, file_id)).expect("just inserted");
            transfer.start().map_err(tox_friend::FriendError::from)?;
            file_id
        };

        let offer = PlainFileControl {
            op: FileControlOp::Offer,
            file_id,
            file_size,
            kind,
            name: name.to_string(),
        };
        if let Err(err) = self.send_file_control(&peer_public_key, &offer).await {
            self.file_transfers.lock().expect("lock poisoned").transfers.remove(&(friend_id, file_id));
            return Err(err);
        }
        Ok(file_id)
    }

    /// Pause, resume, or cancel a file transfer, applying the transition
    /// locally and notifying the peer so its mirrored transfer record
    /// follows suit.
    pub async fn file_control(&self, friend_id: FriendId, file_id: u32, control: FileControl) -> Result<()> {
        self.require_running()?;
        {
            let mut transfers = self.file_transfers.lock().expect("lock poisoned");
            let transfer = transfers
                .transfers
                .get_mut(&(friend_id, file_id))
                .ok_or(ToxError::NotFound)?;
            match control {
                FileControl::Pause => transfer.pause()?,
                FileControl::Resume => transfer.resume()?,
                FileControl::Cancel => transfer.cancel()?,
            }
        }

        let peer_public_key = self.get_friend_public_key(friend_id)?;
        let op = match control {
            FileControl::Pause => FileControlOp::Pause,
            FileControl::Resume => FileControlOp::Resume,
            FileControl::Cancel => FileControlOp::Cancel,
        };
        let plain = PlainFileControl { op, file_id, file_size: 0, kind: 0, name: String::new() };
        self.send_file_control(&peer_public_key, &plain).await
    }

    /// Transmit one chunk to the peer, updating local transferred-bytes
    /// bookkeeping, then — unless the transfer just completed — fire
    /// `file_chunk_request` asking the host to supply the next one. The
    /// host is expected to call this from that very callback, forming a
    /// self-clocking send loop.
    pub async fn file_send_chunk(&self, friend_id: FriendId, file_id: u32, position: u64, chunk: &[u8]) -> Result<()> {
        self.require_running()?;
        {
            let mut transfers = self.file_transfers.lock().expect("lock poisoned");
            let transfer = transfers
                .transfers
                .get_mut(&(friend_id, file_id))
                .ok_or(ToxError::NotFound)?;
            transfer.record_chunk(position, chunk.len(), 1.0)?;
        }

        let peer_public_key = self.get_friend_public_key(friend_id)?;
        let transport = self
            .transport
            .as_ref()
            .ok_or(ToxError::NotConnected { async_unavailable: true })?;
        let addr = self
            .lookup_dht_address(&peer_public_key)
            .ok_or(ToxError::NotConnected { async_unavailable: true })?;
        let plain = PlainFileChunk { file_id, position, bytes: chunk.to_vec() };
        let (counter, nonce, ciphertext) = self.encrypt_for_session(&peer_public_key, &encode_body(&plain)).await?;
        let packet = Packet::new(
            PacketKind::FileData,
            encode_body(&FileDataBody { sender: self.self_public_key.0, counter, nonce, ciphertext }),
        );
        transport.send(&packet, addr).await.map_err(|err| ToxError::Internal(err.to_string()))?;

        let done = {
            let transfers = self.file_transfers.lock().expect("lock poisoned");
            transfers
                .transfers
                .get(&(friend_id, file_id))
                .map(|t| t.state == tox_friend::files::TransferState::Done)
                .unwrap_or(true)
        };
        if !done {
            self.callbacks.lock().expect("lock poisoned").fire_file_chunk_request(
                friend_id,
                file_id,
                position + chunk.len() as u64,
                tox_friend::files::NOMINAL_CHUNK_SIZE,
            );
        }
        Ok(())
    }

    // ---- Network ---------------------------------------------------------

    /// Bootstrap the DHT routing table against one seed node.
    pub async fn bootstrap(&self, address: &str, port: u16, hex_public_key: &str) -> Result<()> {
        self.require_running()?;
        let Some(bootstrap_transport) = &self.bootstrap_transport else {
            return Err(ToxError::NotConnected { async_unavailable: true });
        };
        let ip: std::net::IpAddr = address
            .parse()
            .map_err(|_| ToxError::InvalidArgument(format!("invalid bootstrap address: {address}")))?;
        let node_id_bytes = hex::decode(hex_public_key)
            .map_err(|_| ToxError::InvalidArgument("bootstrap public key is not valid hex".to_string()))?;
        if node_id_bytes.len() != 32 {
            return Err(ToxError::InvalidArgument(format!(
                "bootstrap public key must be 32 bytes, got {}",
                node_id_bytes.len()
            )));
        }
        let mut node_id = [0u8; 32];
        node_id.copy_from_slice(&node_id_bytes);

        let seed = SeedNode {
            addr: SocketAddr::new(ip, port),
            node_id,
        };
        let config = BootstrapConfig {
            seeds: vec![seed],
            min_nodes: 1,
            per_attempt_timeout: Duration::from_secs(self.options.bootstrap_timeout_secs),
            max_attempts: 1,
        };
        let manager = BootstrapManager::new(config);
        let mut table = self.routing_table.lock().expect("lock poisoned");
        let result = manager
            .bootstrap(&mut table, bootstrap_transport.as_ref())
            .await?;
        if !result.success {
            warn!(?result, "bootstrap attempt did not reach min_nodes");
        }
        Ok(())
    }

    /// TCP relay support is out of scope for this implementation (spec
    /// non-goal: UDP is the only bundled transport). Recorded here so the
    /// host-facing surface matches the contract; always reports
    /// unsupported.
    pub fn add_tcp_relay(&self, _address: &str, _port: u16, _hex_public_key: &str) -> Result<()> {
        Err(ToxError::InvalidArgument("TCP relay support is not implemented".to_string()))
    }

    // ---- Callbacks ---------------------------------------------------------

    pub fn on_friend_request(&self, f: impl Fn(PublicKey32, String) + Send + Sync + 'static) {
        self.callbacks.lock().expect("lock poisoned").on_friend_request(f);
    }

    pub fn on_friend_message(&self, f: impl Fn(FriendId, String) + Send + Sync + 'static) {
        self.callbacks.lock().expect("lock poisoned").on_friend_message(f);
    }

    pub fn on_friend_message_detailed(&self, f: impl Fn(FriendId, String, MessageKind) + Send + Sync + 'static) {
        self.callbacks.lock().expect("lock poisoned").on_friend_message_detailed(f);
    }

    pub fn on_friend_status(&self, f: impl Fn(FriendId, PresenceStatus) + Send + Sync + 'static) {
        self.callbacks.lock().expect("lock poisoned").on_friend_status(f);
    }

    pub fn on_connection_status(&self, f: impl Fn(FriendId, ConnectionStatus) + Send + Sync + 'static) {
        self.callbacks.lock().expect("lock poisoned").on_connection_status(f);
    }

    pub fn on_file_recv(&self, f: impl Fn(FriendId, u32, u64, String) + Send + Sync + 'static) {
        self.callbacks.lock().expect("lock poisoned").on_file_recv(f);
    }

    pub fn on_file_recv_chunk(&self, f: impl Fn(FriendId, u32, u64, Vec<u8>) + Send + Sync + 'static) {
        self.callbacks.lock().expect("lock poisoned").on_file_recv_chunk(f);
    }

    pub fn on_file_chunk_request(&self, f: impl Fn(FriendId, u32, u64, usize) + Send + Sync + 'static) {
        self.callbacks.lock().expect("lock poisoned").on_file_chunk_request(f);
    }

    pub fn on_async_message_delivered(&self, f: impl Fn(PublicKey32, Vec<u8>) + Send + Sync + 'static) {
        self.callbacks.lock().expect("lock poisoned").on_async_message_delivered(f);
    }

    pub fn on_message_delivery_state(
        &self,
        f: impl Fn(FriendId, MessageId, DeliveryState) + Send + Sync + 'static,
    ) {
        self.callbacks.lock().expect("lock poisoned").on_message_delivery_state(f);
    }

    // ---- Save --------------------------------------------------------------

    /// Export the current state as a versioned save blob.
    pub fn get_savedata(&self) -> Result<Vec<u8>> {
        let friends = self.friends.lock().expect("lock poisoned").get_friends();
        let mut data = SaveData::new(self.self_secret_key.clone(), self.self_nospam());
        data.self_name = self.self_name.lock().expect("lock poisoned").clone();
        data.self_status_msg = self.self_status_msg.lock().expect("lock poisoned").clone();
        data.friends = friends.iter().map(save::SavedFriend::from).collect();
        save::encode(&data)
    }

    /// Replace this instance's identity and friend list with a
    /// previously exported save blob.
    pub fn load(&mut self, bytes: &[u8]) -> Result<()> {
        let data = save::decode(bytes)?;
        if keys::public_key_for(&SecretKey32(data.secret_key)) != self.self_public_key {
            return Err(ToxError::InvalidArgument(
                "save data identity does not match this instance".to_string(),
            ));
        }
        let mut friends = FriendTable::new();
        for saved in &data.friends {
            let friend_id = friends.add_by_public_key(PublicKey32(saved.public_key))?;
            friends.set_name(friend_id, saved.name.clone())?;
            friends.set_status_message(friend_id, saved.status_msg.clone())?;
            friends.set_presence(friend_id, save::presence_from_u8(saved.presence))?;
            friends.touch_last_seen(friend_id, saved.last_seen)?;
        }
        *self.friends.lock().expect("lock poisoned") = friends;
        *self.self_name.lock().expect("lock poisoned") = data.self_name;
        *self.self_status_msg.lock().expect("lock poisoned") = data.self_status_msg;
        self.self_set_nospam(data.effective_nospam());
        Ok(())
    }
}

/// A file-transfer control action, per the host-facing `file_control`
/// contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileControl {
    Pause,
    Resume,
    Cancel,
}

#[allow(clippy::too_many_arguments)]
async fn register_handshake_handlers(
    transport: &UdpTransport,
    self_secret_key: SecretKey32,
    friends: Arc<Mutex<FriendTable>>,
    sessions: Arc<Mutex<SessionStore>>,
    callbacks: Arc<Mutex<Callbacks>>,
    async_store: Arc<Mutex<AsyncStore>>,
    pre_key_pool: Arc<Mutex<PreKeyPool>>,
    pending_handshakes: Arc<Mutex<HashMap<SocketAddr, Handshake>>>,
    pending_handshake_replies: Arc<Mutex<HashMap<SocketAddr, oneshot::Sender<HandshakeComplete>>>>,
    pending_commitments: Arc<Mutex<HashMap<SocketAddr, oneshot::Sender<VersionCommitment>>>>,
    clock: SharedClock,
) {
    // Responder side: a peer is initiating a handshake with us.
    {
        let self_secret_key = self_secret_key.clone();
        let friends = Arc::clone(&friends);
        let sessions = Arc::clone(&sessions);
        let callbacks = Arc::clone(&callbacks);
        let async_store = Arc::clone(&async_store);
        let pre_key_pool = Arc::clone(&pre_key_pool);
        let pending_commitments = Arc::clone(&pending_commitments);
        let clock = Arc::clone(&clock);
        let transport_clone = transport.clone();
        transport
            .register_handler(
                PacketKind::NoiseHandshakeMessage1,
                Arc::new(move |addr: SocketAddr, packet: Packet| {
                    let Some(msg1) = decode_body::<HandshakeMessage1>(&packet.body) else {
                        return;
                    };
                    let self_secret_key = self_secret_key.clone();
                    let friends = Arc::clone(&friends);
                    let sessions = Arc::clone(&sessions);
                    let callbacks = Arc::clone(&callbacks);
                    let async_store = Arc::clone(&async_store);
                    let pre_key_pool = Arc::clone(&pre_key_pool);
                    let pending_commitments = Arc::clone(&pending_commitments);
                    let clock = Arc::clone(&clock);
                    let transport = transport_clone.clone();
                    tokio::spawn(async move {
                        let mut handshake = Handshake::new_responder(self_secret_key);
                        let Ok(initiator_payload) = handshake.read_message1(&msg1) else {
                            return;
                        };
                        let Some(initiator_hello) = decode_body::<HandshakeHello>(&initiator_payload) else {
                            return;
                        };
                        let peer_advertisement = initiator_hello.advertisement;
                        let Some(peer_static) = handshake.peer_static_public() else {
                            return;
                        };
                        let friend_id = {
                            let friends = friends.lock().expect("lock poisoned");
                            friends.find_by_public_key(&peer_static)
                        };
                        let Some(friend_id) = friend_id else {
                            return;
                        };
                        let my_advertisement = VersionAdvertisement::all();
                        let Some(negotiated) = my_advertisement.negotiate(&peer_advertisement) else {
                            return;
                        };
                        let my_pre_keys = pre_key_pool.lock().expect("lock poisoned").generate_batch(DEFAULT_BATCH_SIZE);
                        let my_hello = HandshakeHello { advertisement: my_advertisement, pre_keys: my_pre_keys };
                        let Ok(msg2) = handshake.write_message2(&encode_body(&my_hello)) else {
                            return;
                        };
                        let output = handshake.output().expect("set by write_message2").clone();
                        if !initiator_hello.pre_keys.is_empty() {
                            let keys = initiator_hello
                                .pre_keys
                                .into_iter()
                                .map(|public| PreKey { public })
                                .collect();
                            async_store.lock().expect("lock poisoned").publish_pre_keys(peer_static, keys);
                        }

                        if transport
                            .send(&Packet::new(PacketKind::NoiseHandshakeMessage2, encode_body(&msg2)), addr)
                            .await
                            .is_err()
                        {
                            return;
                        }

                        let mut session = Session::new(peer_static, Role::Responder);
                        session.complete(&output, negotiated);
                        let my_commitment = version::commit(&output.handshake_hash, negotiated, &clock);

                        let (tx, rx) = oneshot::channel();
                        pending_commitments.lock().expect("lock poisoned").insert(addr, tx);
                        if transport
                            .send(&Packet::new(PacketKind::VersionCommitment, encode_body(&my_commitment)), addr)
                            .await
                            .is_err()
                        {
                            return;
                        }

                        let Ok(Ok(peer_commitment)) = tokio::time::timeout(HANDSHAKE_TIMEOUT, rx).await else {
                            return;
                        };
                        if version::verify(&peer_commitment, negotiated, &output.handshake_hash, &clock).is_err() {
                            return;
                        }

                        sessions.lock().expect("lock poisoned").insert(session);
                        let previous = friends
                            .lock()
                            .expect("lock poisoned")
                            .set_connection_status(friend_id, ConnectionStatus::Online)
                            .unwrap_or(ConnectionStatus::Online);
                        if previous != ConnectionStatus::Online {
                            callbacks
                                .lock()
                                .expect("lock poisoned")
                                .fire_connection_status(friend_id, ConnectionStatus::Online);
                        }
                    });
                }),
            )
            .await;
    }

    // Initiator side: our earlier message 1 got a reply.
    {
        let pending_handshakes = Arc::clone(&pending_handshakes);
        let pending_handshake_replies = Arc::clone(&pending_handshake_replies);
        transport
            .register_handler(
                PacketKind::NoiseHandshakeMessage2,
                Arc::new(move |addr: SocketAddr, packet: Packet| {
                    let Some(msg2) = decode_body::<HandshakeMessage2>(&packet.body) else {
                        return;
                    };
                    let mut handshake = {
                        let mut pending = pending_handshakes.lock().expect("lock poisoned");
                        let Some(handshake) = pending.remove(&addr) else {
                            return;
                        };
                        handshake
                    };
                    let Ok(payload) = handshake.read_message2(&msg2) else {
                        return;
                    };
                    let Some(peer_hello) = decode_body::<HandshakeHello>(&payload) else {
                        return;
                    };
                    let output = handshake.output().expect("set by read_message2").clone();
                    if let Some(tx) = pending_handshake_replies.lock().expect("lock poisoned").remove(&addr) {
                        let _ = tx.send(HandshakeComplete {
                            output,
                            peer_advertisement: peer_hello.advertisement,
                            peer_pre_keys: peer_hello.pre_keys,
                        });
                    }
                }),
            )
            .await;
    }

    // Shared: a version commitment arrived, for whichever side is
    // currently waiting on one from this address.
    {
        let pending_commitments = Arc::clone(&pending_commitments);
        transport
            .register_handler(
                PacketKind::VersionCommitment,
                Arc::new(move |addr: SocketAddr, packet: Packet| {
                    let Some(commitment) = decode_body::<VersionCommitment>(&packet.body) else {
                        return;
                    };
                    if let Some(tx) = pending_commitments.lock().expect("lock poisoned").remove(&addr) {
                        let _ = tx.send(commitment);
                    }
                }),
            )
            .await;
    }
}

async fn register_message_handlers(
    transport: &UdpTransport,
    self_secret_key: SecretKey32,
    friends: Arc<Mutex<FriendTable>>,
    sessions: Arc<Mutex<SessionStore>>,
    callbacks: Arc<Mutex<Callbacks>>,
    pre_key_pool: Arc<Mutex<PreKeyPool>>,
) {
    // Legacy-box path: used by a Legacy-negotiated session and by
    // opportunistic delivery to an offline friend alike.
    {
        let self_secret_key = self_secret_key.clone();
        let friends = Arc::clone(&friends);
        let callbacks = Arc::clone(&callbacks);
        let pre_key_pool = Arc::clone(&pre_key_pool);
        transport
            .register_handler(
                PacketKind::FriendMessage,
                Arc::new(move |_addr: SocketAddr, packet: Packet| {
                    let Some(body) = decode_body::<LegacyMessageBody>(&packet.body) else {
                        return;
                    };
                    let sender = PublicKey32(body.sender);
                    let decrypted = match body.pre_key_exchange {
                        Some(exchange) => pre_key_pool
                            .lock()
                            .expect("lock poisoned")
                            .take_secret(&exchange.pre_key_public)
                            .map(|secret| aead::prekey_shared_key(&secret, &exchange.ephemeral_public))
                            .and_then(|key| aead::decrypt_with_key(&key, &body.nonce, &body.ciphertext).ok()),
                        None => aead::decrypt(&body.ciphertext, &body.nonce, &sender, &self_secret_key).ok(),
                    };
                    let Some(plaintext) = decrypted else {
                        return;
                    };
                    let Some(plain) = decode_body::<PlainMessage>(&plaintext) else {
                        return;
                    };
                    let friend_id = {
                        let friends = friends.lock().expect("lock poisoned");
                        friends.find_by_public_key(&sender)
                    };
                    let Some(friend_id) = friend_id else {
                        return;
                    };
                    callbacks.lock().expect("lock poisoned").fire_friend_message(
                        friend_id,
                        &plain.text,
                        message_kind_from_u8(plain.kind),
                    );
                }),
            )
            .await;
    }

    // Noise-session path: counter-ordered, session-key encrypted.
    {
        let friends = Arc::clone(&friends);
        let sessions = Arc::clone(&sessions);
        let callbacks = Arc::clone(&callbacks);
        transport
            .register_handler(
                PacketKind::FriendMessageNoise,
                Arc::new(move |_addr: SocketAddr, packet: Packet| {
                    let Some(body) = decode_body::<NoiseMessageBody>(&packet.body) else {
                        return;
                    };
                    let friend_public_key = PublicKey32(body.sender);

                    let recv_key = {
                        let mut sessions = sessions.lock().expect("lock poisoned");
                        let Some(session) = sessions.get_mut(&friend_public_key) else {
                            return;
                        };
                        let Ok(recv_key) = session.recv_key().map(|k| *k) else {
                            return;
                        };
                        if session.accept_recv_counter(body.counter).is_err() {
                            return;
                        }
                        recv_key
                    };
                    let Ok(plaintext) = aead::decrypt_with_key(&recv_key, &body.nonce, &body.ciphertext) else {
                        return;
                    };
                    let Some(plain) = decode_body::<PlainMessage>(&plaintext) else {
                        return;
                    };
                    let friend_id = {
                        let friends = friends.lock().expect("lock poisoned");
                        friends.find_by_public_key(&friend_public_key)
                    };
                    let Some(friend_id) = friend_id else {
                        return;
                    };
                    callbacks.lock().expect("lock poisoned").fire_friend_message(
                        friend_id,
                        &plain.text,
                        message_kind_from_u8(plain.kind),
                    );
                }),
            )
            .await;
    }
}

async fn register_file_handlers(
    transport: &UdpTransport,
    friends: Arc<Mutex<FriendTable>>,
    sessions: Arc<Mutex<SessionStore>>,
    callbacks: Arc<Mutex<Callbacks>>,
    file_transfers: Arc<Mutex<FileTransfers>>,
) {
    // Control: offer, pause, resume, cancel. Reuses the session's single
    // counter/replay window, the same as `FriendMessageNoise` — file
    // transfer only exists after a friend is online with an established
    // session, so there's no legacy-box path to mirror here.
    {
        let friends = Arc::clone(&friends);
        let sessions = Arc::clone(&sessions);
        let callbacks = Arc::clone(&callbacks);
        let file_transfers = Arc::clone(&file_transfers);
        transport
            .register_handler(
                PacketKind::FileControl,
                Arc::new(move |_addr: SocketAddr, packet: Packet| {
                    let Some(body) = decode_body::<FileControlBody>(&packet.body) else {
                        return;
                    };
                    let friend_public_key = PublicKey32(body.sender);

                    let recv_key = {
                        let mut sessions = sessions.lock().expect("lock poisoned");
                        let Some(session) = sessions.get_mut(&friend_public_key) else {
                            return;
                        };
                        let Ok(recv_key) = session.recv_key().map(|k| *k) else {
                            return;
                        };
                        if session.accept_recv_counter(body.counter).is_err() {
                            return;
                        }
                        recv_key
                    };
                    let Ok(plaintext) = aead::decrypt_with_key(&recv_key, &body.nonce, &body.ciphertext) else {
                        return;
                    };
                    let Some(plain) = decode_body::<PlainFileControl>(&plaintext) else {
                        return;
                    };
                    let friend_id = {
                        let friends = friends.lock().expect("lock poisoned");
                        friends.find_by_public_key(&friend_public_key)
                    };
                    let Some(friend_id) = friend_id else {
                        return;
                    };

                    let mut transfers = file_transfers.lock().expect("lock poisoned");
                    match plain.op {
                        FileControlOp::Offer => {
                            transfers.insert_inbound(friend_id, plain.file_id, plain.file_size, plain.kind, plain.name.clone());
                            if let Some(transfer) = transfers.transfers.get_mut(&(friend_id, plain.file_id)) {
                                let _ = transfer.start();
                            }
                            drop(transfers);
                            callbacks.lock().expect("lock poisoned").fire_file_recv(
                                friend_id,
                                plain.file_id,
                                plain.file_size,
                                plain.name,
                            );
                        }
                        FileControlOp::Pause => {
                            if let Some(transfer) = transfers.transfers.get_mut(&(friend_id, plain.file_id)) {
                                let _ = transfer.pause();
                            }
                        }
                        FileControlOp::Resume => {
                            if let Some(transfer) = transfers.transfers.get_mut(&(friend_id, plain.file_id)) {
                                let _ = transfer.resume();
                            }
                        }
                        FileControlOp::Cancel => {
                            if let Some(transfer) = transfers.transfers.get_mut(&(friend_id, plain.file_id)) {
                                let _ = transfer.cancel();
                            }
                        }
                    }
                }),
            )
            .await;
    }

    // Data: one chunk per packet, delivered to the host via
    // `file_recv_chunk` for it to write wherever it's assembling the file.
    {
        let friends = Arc::clone(&friends);
        let sessions = Arc::clone(&sessions);
        let callbacks = Arc::clone(&callbacks);
        let file_transfers = Arc::clone(&file_transfers);
        transport
            .register_handler(
                PacketKind::FileData,
                Arc::new(move |_addr: SocketAddr, packet: Packet| {
                    let Some(body) = decode_body::<FileDataBody>(&packet.body) else {
                        return;
                    };
                    let friend_public_key = PublicKey32(body.sender);

                    let recv_key = {
                        let mut sessions = sessions.lock().expect("lock poisoned");
                        let Some(session) = sessions.get_mut(&friend_public_key) else {
                            return;
                        };
                        let Ok(recv_key) = session.recv_key().map(|k| *k) else {
                            return;
                        };
                        if session.accept_recv_counter(body.counter).is_err() {
                            return;
                        }
                        recv_key
                    };
                    let Ok(plaintext) = aead::decrypt_with_key(&recv_key, &body.nonce, &body.ciphertext) else {
                        return;
                    };
                    let Some(plain) = decode_body::<PlainFileChunk>(&plaintext) else {
                        return;
                    };
                    let friend_id = {
                        let friends = friends.lock().expect("lock poisoned");
                        friends.find_by_public_key(&friend_public_key)
                    };
                    let Some(friend_id) = friend_id else {
                        return;
                    };

                    {
                        let mut transfers = file_transfers.lock().expect("lock poisoned");
                        if let Some(transfer) = transfers.transfers.get_mut(&(friend_id, plain.file_id)) {
                            let _ = transfer.record_chunk(plain.position, plain.bytes.len(), 1.0);
                        }
                    }
                    callbacks.lock().expect("lock poisoned").fire_file_recv_chunk(
                        friend_id,
                        plain.file_id,
                        plain.position,
                        plain.bytes,
                    );
                }),
            )
            .await;
    }
}
