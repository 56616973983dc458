//! Glue between the DHT/friend-request engines and a real
//! [`tox_transport::UdpTransport`].
//!
//! `tox-dht` and `tox-friend` both inject their network access through a
//! trait (`BootstrapTransport`, `RequestTransport`) so their own test
//! suites can fake delivery. This module is the production implementation
//! of those traits, plus the inbound-side handlers that answer `GetNodes`
//! and surface inbound `FriendRequest`/message packets into the queues
//! `Tox::iterate` drains.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use tox_crypto::keys::PublicKey32;
use tox_dht::bootstrap::{BootstrapTransport, SeedNode};
use tox_dht::kademlia::{NodeId, NodeInfo, RoutingTable};
use tox_dht::K;
use tox_friend::requests::RequestTransport;
use tox_packet::{Packet, PacketKind};
use tox_transport::UdpTransport;

const GET_NODES_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize, Deserialize)]
struct GetNodesBody {
    request_id: u64,
    target: NodeId,
}

#[derive(Serialize, Deserialize)]
struct SendNodesBody {
    request_id: u64,
    nodes: Vec<NodeInfo>,
}

#[derive(Serialize, Deserialize)]
struct FriendRequestBody {
    sender: [u8; 32],
    message: String,
}

fn encode_body<T: Serialize>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).expect("in-memory cbor encode cannot fail");
    buf
}

/// Production [`BootstrapTransport`]: sends a real `GetNodes` packet and
/// waits for the matching `SendNodes` reply, correlated by a per-request
/// id rather than by source address (a peer may answer from a different
/// socket than the one it was queried on, behind some NATs).
pub struct UdpBootstrapTransport {
    transport: UdpTransport,
    next_request_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Option<Vec<NodeInfo>>>>>,
}

impl UdpBootstrapTransport {
    pub fn new(transport: UdpTransport) -> Self {
        Self {
            transport,
            next_request_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the `SendNodes` handler that resolves pending `get_nodes`
    /// calls. Call once, before any bootstrap attempt.
    pub async fn install(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.transport
            .register_handler(
                PacketKind::SendNodes,
                Arc::new(move |_addr, packet: Packet| {
                    let this = Arc::clone(&this);
                    match ciborium::from_reader::<SendNodesBody, _>(packet.body.as_slice()) {
                        Ok(body) => this.resolve(body.request_id, body.nodes),
                        Err(err) => trace!(%err, "dropped unparseable send-nodes packet"),
                    }
                }),
            )
            .await;
    }

    fn resolve(&self, request_id: u64, nodes: Vec<NodeInfo>) {
        let sender = self.pending.lock().expect("lock poisoned").remove(&request_id);
        if let Some(sender) = sender {
            let _ = sender.send(Some(nodes));
        }
    }
}

impl BootstrapTransport for UdpBootstrapTransport {
    fn get_nodes(&self, seed: &SeedNode, target: NodeId) -> impl Future<Output = Option<Vec<NodeInfo>>> + Send {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("lock poisoned").insert(request_id, tx);

        let transport = self.transport.clone();
        let addr = seed.addr;
        async move {
            let body = encode_body(&GetNodesBody { request_id, target });
            if let Err(err) = transport.send(&Packet::new(PacketKind::GetNodes, body), addr).await {
                warn!(%addr, %err, "get_nodes send failed");
                return None;
            }
            tokio::time::timeout(GET_NODES_TIMEOUT, rx).await.ok().and_then(|r| r.ok()).flatten()
        }
    }
}

/// Production ping client used by the DHT maintenance step: sends a
/// `PingRequest` and waits for the matching `PingResponse`, correlated by
/// request id the same way [`UdpBootstrapTransport`] correlates `get-nodes`.
pub struct UdpPingTransport {
    transport: UdpTransport,
    next_request_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<()>>>,
}

#[derive(Serialize, Deserialize)]
struct PingBody {
    request_id: u64,
}

const PING_TIMEOUT: Duration = Duration::from_secs(3);

impl UdpPingTransport {
    pub fn new(transport: UdpTransport) -> Self {
        Self {
            transport,
            next_request_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the `PingResponse` handler that resolves pending `ping` calls.
    /// Call once, before any maintenance tick.
    pub async fn install(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.transport
            .register_handler(
                PacketKind::PingResponse,
                Arc::new(move |_addr, packet: Packet| {
                    if let Ok(body) = ciborium::from_reader::<PingBody, _>(packet.body.as_slice()) {
                        if let Some(tx) = this.pending.lock().expect("lock poisoned").remove(&body.request_id) {
                            let _ = tx.send(());
                        }
                    }
                }),
            )
            .await;
    }

    /// Ping `addr`, returning whether a response arrived within the
    /// maintenance timeout.
    pub async fn ping(&self, addr: SocketAddr) -> bool {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("lock poisoned").insert(request_id, tx);

        if self
            .transport
            .send(&Packet::new(PacketKind::PingRequest, encode_body(&PingBody { request_id })), addr)
            .await
            .is_err()
        {
            self.pending.lock().expect("lock poisoned").remove(&request_id);
            return false;
        }
        tokio::time::timeout(PING_TIMEOUT, rx).await.map(|r| r.is_ok()).unwrap_or(false)
    }
}

/// Wire the `PingRequest` responder: echoes the request id back in a
/// `PingResponse`.
pub async fn register_ping_responder(transport: &UdpTransport) {
    let transport_clone = transport.clone();
    transport
        .register_handler(
            PacketKind::PingRequest,
            Arc::new(move |addr: SocketAddr, packet: Packet| {
                let transport = transport_clone.clone();
                let Ok(body) = ciborium::from_reader::<PingBody, _>(packet.body.as_slice()) else {
                    return;
                };
                tokio::spawn(async move {
                    let reply = encode_body(&PingBody { request_id: body.request_id });
                    let _ = transport.send(&Packet::new(PacketKind::PingResponse, reply), addr).await;
                });
            }),
        )
        .await;
}

/// Wire the `GetNodes` responder: answers with the locally known closest
/// nodes to the requested target.
pub async fn register_get_nodes_responder(
    transport: &UdpTransport,
    routing_table: Arc<Mutex<RoutingTable>>,
) {
    let routing_table = Arc::clone(&routing_table);
    let transport_clone = transport.clone();
    transport
        .register_handler(
            PacketKind::GetNodes,
            Arc::new(move |addr: SocketAddr, packet: Packet| {
                let routing_table = Arc::clone(&routing_table);
                let transport = transport_clone.clone();
                let Ok(body) = ciborium::from_reader::<GetNodesBody, _>(packet.body.as_slice()) else {
                    trace!(%addr, "dropped unparseable get-nodes packet");
                    return;
                };
                tokio::spawn(async move {
                    let nodes = {
                        let table = routing_table.lock().expect("lock poisoned");
                        table.find_closest(&body.target, K)
                    };
                    let reply = encode_body(&SendNodesBody {
                        request_id: body.request_id,
                        nodes,
                    });
                    if let Err(err) = transport.send(&Packet::new(PacketKind::SendNodes, reply), addr).await {
                        debug!(%addr, %err, "send-nodes reply failed");
                    }
                });
            }),
        )
        .await;
}

/// Production [`RequestTransport`]: looks the target up in the local
/// routing table (every Tox client is itself a DHT node) and sends the
/// request directly if an address is known. A target not yet present in
/// the table reports failure, same as a timeout, so the caller's retry
/// schedule naturally re-attempts once the DHT has had a chance to learn
/// its address.
pub struct UdpFriendRequestTransport {
    transport: UdpTransport,
    routing_table: Arc<Mutex<RoutingTable>>,
    self_public_key: PublicKey32,
}

impl UdpFriendRequestTransport {
    pub fn new(
        transport: UdpTransport,
        routing_table: Arc<Mutex<RoutingTable>>,
        self_public_key: PublicKey32,
    ) -> Self {
        Self {
            transport,
            routing_table,
            self_public_key,
        }
    }
}

impl RequestTransport for UdpFriendRequestTransport {
    fn deliver(&self, target: PublicKey32, message: &str) -> impl Future<Output = bool> + Send {
        let addr = {
            let table = self.routing_table.lock().expect("lock poisoned");
            table
                .find_closest(&target.0, 1)
                .into_iter()
                .find(|node| node.node_id == target.0)
                .map(|node| node.net_addr.0)
        };

        let transport = self.transport.clone();
        let body = encode_body(&FriendRequestBody {
            sender: self.self_public_key.0,
            message: message.to_string(),
        });
        async move {
            let Some(addr) = addr else {
                return false;
            };
            transport.send(&Packet::new(PacketKind::FriendRequest, body), addr).await.is_ok()
        }
    }
}

/// Wire the inbound `FriendRequest` handler: parsed requests are pushed
/// into `inbox` for `Tox::iterate` to surface through the friend-request
/// callback.
pub async fn register_friend_request_handler(
    transport: &UdpTransport,
    inbox: Arc<Mutex<Vec<tox_friend::requests::IncomingRequest>>>,
) {
    transport
        .register_handler(
            PacketKind::FriendRequest,
            Arc::new(move |addr: SocketAddr, packet: Packet| {
                match ciborium::from_reader::<FriendRequestBody, _>(packet.body.as_slice()) {
                    Ok(body) => {
                        let request = tox_friend::requests::IncomingRequest {
                            sender: PublicKey32(body.sender),
                            message: body.message,
                        };
                        inbox.lock().expect("lock poisoned").push(request);
                    }
                    Err(err) => trace!(%addr, %err, "dropped unparseable friend-request packet"),
                }
            }),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tox_dht::kademlia::{NetAddr, NodeStatus};

    #[tokio::test]
    async fn test_get_nodes_round_trip_over_real_udp() {
        let responder_socket = UdpTransport::bind(Ipv4Addr::LOCALHOST.into(), 35000, 35050)
            .await
            .expect("bind responder");
        let responder_addr = responder_socket.local_addr().expect("addr");

        let mut table = RoutingTable::new([1u8; 32]);
        table.insert(NodeInfo {
            node_id: [9u8; 32],
            net_addr: NetAddr("127.0.0.1:1".parse().unwrap()),
            last_seen: 0,
            status: NodeStatus::Good,
        });
        let table = Arc::new(Mutex::new(table));
        register_get_nodes_responder(&responder_socket, table).await;

        let querier_socket = UdpTransport::bind(Ipv4Addr::LOCALHOST.into(), 35051, 35100)
            .await
            .expect("bind querier");
        let querier = Arc::new(UdpBootstrapTransport::new(querier_socket));
        querier.install().await;

        let seed = SeedNode {
            addr: responder_addr,
            node_id: [1u8; 32],
        };
        let nodes = querier.get_nodes(&seed, [0u8; 32]).await.expect("seed responded");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id, [9u8; 32]);
    }

    #[tokio::test]
    async fn test_get_nodes_times_out_against_silent_peer() {
        let querier_socket = UdpTransport::bind(Ipv4Addr::LOCALHOST.into(), 35101, 35150)
            .await
            .expect("bind querier");
        let querier = Arc::new(UdpBootstrapTransport::new(querier_socket));
        querier.install().await;

        // Nothing is listening on this address; get_nodes should report no
        // response rather than hang.
        let seed = SeedNode {
            addr: "127.0.0.1:1".parse().unwrap(),
            node_id: [1u8; 32],
        };
        let nodes = querier.get_nodes(&seed, [0u8; 32]).await;
        assert!(nodes.is_none());
    }

    #[tokio::test]
    async fn test_friend_request_delivers_to_known_dht_address() {
        let receiver_socket = UdpTransport::bind(Ipv4Addr::LOCALHOST.into(), 35151, 35200)
            .await
            .expect("bind receiver");
        let receiver_addr = receiver_socket.local_addr().expect("addr");
        let inbox = Arc::new(Mutex::new(Vec::new()));
        register_friend_request_handler(&receiver_socket, Arc::clone(&inbox)).await;

        let sender_socket = UdpTransport::bind(Ipv4Addr::LOCALHOST.into(), 35201, 35250)
            .await
            .expect("bind sender");
        let target = PublicKey32([5u8; 32]);
        let mut table = RoutingTable::new([2u8; 32]);
        table.insert(NodeInfo {
            node_id: target.0,
            net_addr: NetAddr(receiver_addr),
            last_seen: 0,
            status: NodeStatus::Good,
        });
        let self_pk = PublicKey32([3u8; 32]);
        let sender = UdpFriendRequestTransport::new(sender_socket, Arc::new(Mutex::new(table)), self_pk);

        let delivered = sender.deliver(target, "hi, let's be friends").await;
        assert!(delivered);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let inbox = inbox.lock().expect("lock");
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].sender, self_pk);
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let responder_socket = UdpTransport::bind(Ipv4Addr::LOCALHOST.into(), 35301, 35350)
            .await
            .expect("bind responder");
        let responder_addr = responder_socket.local_addr().expect("addr");
        register_ping_responder(&responder_socket).await;

        let querier_socket = UdpTransport::bind(Ipv4Addr::LOCALHOST.into(), 35351, 35400)
            .await
            .expect("bind querier");
        let querier = Arc::new(UdpPingTransport::new(querier_socket));
        querier.install().await;

        assert!(querier.ping(responder_addr).await);
    }

    #[tokio::test]
    async fn test_ping_times_out_against_silent_peer() {
        let querier_socket = UdpTransport::bind(Ipv4Addr::LOCALHOST.into(), 35401, 35450)
            .await
            .expect("bind querier");
        let querier = Arc::new(UdpPingTransport::new(querier_socket));
        querier.install().await;

        assert!(!querier.ping("127.0.0.1:1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn test_friend_request_fails_for_unknown_target() {
        let sender_socket = UdpTransport::bind(Ipv4Addr::LOCALHOST.into(), 35251, 35300)
            .await
            .expect("bind sender");
        let table = Arc::new(Mutex::new(RoutingTable::new([2u8; 32])));
        let sender = UdpFriendRequestTransport::new(sender_socket, table, PublicKey32([3u8; 32]));

        let delivered = sender.deliver(PublicKey32([99u8; 32]), "hi").await;
        assert!(!delivered);
    }
}
