//! Sending to a friend id that was never added (or was since deleted)
//! must fail fast with `NotFound`, without creating any delivery state
//! or needing a network.

use tox_core::options::{SavedataType, ToxOptions};
use tox_core::{Tox, ToxError};
use tox_friend::messages::MessageKind;

fn offline_options() -> ToxOptions {
    ToxOptions {
        udp_enabled: false,
        savedata_type: SavedataType::None,
        ..Default::default()
    }
}

#[tokio::test]
async fn send_to_nonexistent_friend() {
    let tox = Tox::new(offline_options()).await.expect("construct instance");

    let err = tox
        .send_friend_message(999, "hello", MessageKind::Normal)
        .await
        .expect_err("no friend 999 exists");
    assert!(matches!(err, ToxError::NotFound));

    // Same for a friend id that existed and was deleted.
    let (key, _) = tox_crypto::keys::generate_keypair();
    let id = tox.add_friend_by_public_key(key).expect("add friend");
    tox.delete_friend(id).expect("delete friend");

    let err = tox
        .send_friend_message(id, "hello", MessageKind::Normal)
        .await
        .expect_err("friend was deleted");
    assert!(matches!(err, ToxError::NotFound));
}
