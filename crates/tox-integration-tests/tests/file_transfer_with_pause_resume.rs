//! End-to-end: A sends B a small file over an established Noise session,
//! pauses partway through, resumes, and finishes. B's received bytes
//! (accumulated from its `file_recv_chunk` callback) must equal exactly
//! what A sent, in order, with no gaps or duplicates.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tox_core::options::{SavedataType, ToxOptions};
use tox_core::tox::FileControl;
use tox_core::Tox;
use tox_friend::files::NOMINAL_CHUNK_SIZE;

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
async fn file_transfer_with_pause_resume() {
    // ===== Step 1: bring up A and B, cross-friend them, and establish a
    // real Noise-IK session between them. =====
    let a = Tox::new(options_on(35800)).await.expect("construct A");
    let b = Tox::new(options_on(35801)).await.expect("construct B");

    a.bootstrap("127.0.0.1", 35801, &hex::encode(b.self_public_key().0))
        .await
        .expect("bootstrap A against B");

    let friend_id_on_a = a.add_friend_by_public_key(b.self_public_key()).expect("A adds B");
    b.add_friend_by_public_key(a.self_public_key()).expect("B adds A");

    // B's packet handlers run off its own background receive loop
    // (installed at transport bind time), so they respond to A's
    // handshake messages without B needing to call `iterate` itself.
    a.connect_friend(friend_id_on_a).await.expect("handshake must succeed");

    // ===== Step 2: B records every inbound chunk; A sends a 4096-byte
    // file in 1024-byte chunks, pausing after the first two. =====
    let received: Arc<Mutex<Vec<(u64, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);
    b.on_file_recv_chunk(move |_friend_id, _file_id, position, bytes| {
        received_clone.lock().expect("lock").push((position, bytes));
    });

    let file_size: u64 = 4096;
    let file_bytes: Vec<u8> = (0..file_size).map(|i| (i % 251) as u8).collect();
    let file_id = a
        .file_send(friend_id_on_a, file_size, 0, "picture.png")
        .await
        .expect("A announces the transfer");

    for position in [0u64, 1024] {
        let chunk = &file_bytes[position as usize..position as usize + NOMINAL_CHUNK_SIZE];
        a.file_send_chunk(friend_id_on_a, file_id, position, chunk)
            .await
            .expect("send chunk");
    }
    let got_two = drive_until(&b, || received.lock().expect("lock").len() == 2, 150).await;
    assert!(got_two, "B never received the first two chunks");

    // ===== Step 3: pause, verify no further chunk arrives, then resume
    // and finish. =====
    a.file_control(friend_id_on_a, file_id, FileControl::Pause).await.expect("pause");
    drive_until(&b, || false, 10).await; // let a few iterations pass with nothing sent

    assert_eq!(received.lock().expect("lock").len(), 2, "paused transfer must not advance");

    a.file_control(friend_id_on_a, file_id, FileControl::Resume).await.expect("resume");
    for position in [2048u64, 3072] {
        let chunk = &file_bytes[position as usize..position as usize + NOMINAL_CHUNK_SIZE];
        a.file_send_chunk(friend_id_on_a, file_id, position, chunk)
            .await
            .expect("send chunk");
    }

    let got_all = drive_until(&b, || received.lock().expect("lock").len() == 4, 150).await;
    assert!(got_all, "B never received all four chunks");

    // ===== Step 4: reassemble B's view and compare byte-for-byte. =====
    let mut chunks = received.lock().expect("lock").clone();
    chunks.sort_by_key(|(position, _)| *position);
    let mut reassembled = Vec::with_capacity(file_size as usize);
    for (position, bytes) in &chunks {
        assert_eq!(*position, reassembled.len() as u64, "no gap or overlap in the chunk stream");
        reassembled.extend_from_slice(bytes);
    }
    assert_eq!(reassembled, file_bytes, "B's reassembled file must match exactly what A sent");
}
