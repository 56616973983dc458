//! Integration test crate for the Tox core protocol.
//!
//! This crate has no library code of its own — it only contains
//! integration tests that exercise end-to-end flows across the
//! `tox-crypto`, `tox-packet`, `tox-transport`, `tox-dht`, `tox-session`,
//! `tox-friend`, and `tox-core` crates together, the way a single running
//! `Tox` instance would.
//!
//! Tests that bind real loopback UDP sockets and drive real timeouts are
//! `#[ignore]`d by default; run them explicitly with:
//!
//! ```text
//! cargo test -p tox-integration-tests -- --ignored
//! ```
//!
//! Tests with no networking dependency (e.g. save/load round trips) run
//! as part of the normal `cargo test` pass.
