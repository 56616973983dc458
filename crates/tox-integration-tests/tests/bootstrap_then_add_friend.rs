//! End-to-end: bootstrap one instance's DHT knowledge against another over
//! real loopback UDP, add the bootstrapped peer as a friend, and confirm
//! the friend request arrives exactly once with the right sender and text.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tox_core::options::{SavedataType, ToxOptions};
use tox_core::Tox;
use tox_crypto::keys::PublicKey32;

fn options_on(port: u16) -> ToxOptions {
    ToxOptions {
        udp_enabled: true,
        start_port: port,
        end_port: port,
        savedata_type: SavedataType::None,
        ..Default::default()
    }
}

async fn drive_until<F: Fn() -> bool>(tox: &Tox, condition: F, attempts: usize) -> bool {
    for _ in 0..attempts {
        tox.iterate().await;
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
#[ignore]
async fn bootstrap_then_add_friend_delivers_request_once() {
    // ===== Step 1: bring up two fresh instances on known loopback ports =====
    let a = Tox::new(options_on(35600)).await.expect("construct A");
    let b = Tox::new(options_on(35601)).await.expect("construct B");

    // ===== Step 2: A bootstraps its DHT knowledge against B =====
    a.bootstrap("127.0.0.1", 35601, &hex::encode(b.self_public_key().0))
        .await
        .expect("bootstrap against B");

    // ===== Step 3: A adds B as a friend by Tox ID, queuing a request =====
    let friend_id = a.add_friend(&b.self_address(), "hi").expect("add friend");

    // ===== Step 4: drive both instances so the request is sent and surfaced =====
    let received: Arc<Mutex<Vec<(PublicKey32, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);
    b.on_friend_request(move |sender, message| {
        received_clone.lock().expect("lock").push((sender, message));
    });

    a.iterate().await;
    let surfaced = drive_until(&b, || !received.lock().expect("lock").is_empty(), 100).await;
    assert!(surfaced, "B never surfaced A's friend request");

    // ===== Step 5: exactly one request, with the right sender and text =====
    let requests = received.lock().expect("lock");
    assert_eq!(requests.len(), 1, "friend request callback fired more than once");
    assert_eq!(requests[0].0, a.self_public_key());
    assert_eq!(requests[0].1, "hi");

    assert!(a.friend_exists(friend_id));
}
