//! Host-configurable startup options.
//!
//! Mirrors the nested-section, `#[serde(default = ...)]` shape the rest of
//! this codebase uses for daemon configuration: every field has a sensible
//! default, so a host can construct `ToxOptions::default()` and override
//! only what it cares about.

use serde::{Deserialize, Serialize};

/// What kind of payload `new_from_save` should expect in `savedata_bytes`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SavedataType {
    /// No save data; start a fresh identity.
    None,
    /// `savedata_bytes` holds just a 32-byte long-term secret key.
    SecretKey,
    /// `savedata_bytes` holds a full [`crate::save::SaveData`] blob.
    FullSave,
}

impl Default for SavedataType {
    fn default() -> Self {
        SavedataType::None
    }
}

/// Proxy transport kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyType {
    None,
    Http,
    Socks5,
}

impl Default for ProxyType {
    fn default() -> Self {
        ProxyType::None
    }
}

/// Proxy configuration. Connection-level use is out of scope for this
/// crate (spec: client-only, no bundled proxy implementation); these
/// fields are carried through so a host-supplied transport can act on
/// them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub proxy_type: ProxyType,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_start_port() -> u16 {
    33445
}

fn default_end_port() -> u16 {
    33545
}

fn default_bootstrap_timeout_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

/// Startup options for [`crate::Tox::new`], covering the recognized fields
/// from the host-facing options contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToxOptions {
    /// Whether to bind a UDP socket at all; `false` means DHT/friend
    /// traffic can only flow over a relay the host supplies out of band.
    #[serde(default = "default_true")]
    pub udp_enabled: bool,

    /// Prefer IPv6 where available.
    #[serde(default)]
    pub ipv6_enabled: bool,

    /// Broadcast LAN discovery packets to find peers on the local network.
    #[serde(default = "default_true")]
    pub local_discovery: bool,

    /// Preferred TCP relay port; `0` lets the OS pick.
    #[serde(default)]
    pub tcp_port: u16,

    /// First port tried when binding the UDP socket.
    #[serde(default = "default_start_port")]
    pub start_port: u16,

    /// Last port tried when binding the UDP socket.
    #[serde(default = "default_end_port")]
    pub end_port: u16,

    #[serde(default)]
    pub proxy: ProxyConfig,

    /// What `savedata_bytes` contains, if anything.
    #[serde(default)]
    pub savedata_type: SavedataType,

    /// Save data to seed the new instance with. Interpreted according to
    /// `savedata_type`; ignored when that is `None`.
    #[serde(default)]
    pub savedata_bytes: Vec<u8>,

    /// Per-attempt bootstrap timeout, in seconds.
    #[serde(default = "default_bootstrap_timeout_secs")]
    pub bootstrap_timeout_secs: u64,
}

impl Default for ToxOptions {
    fn default() -> Self {
        Self {
            udp_enabled: true,
            ipv6_enabled: false,
            local_discovery: true,
            tcp_port: 0,
            start_port: default_start_port(),
            end_port: default_end_port(),
            proxy: ProxyConfig::default(),
            savedata_type: SavedataType::None,
            savedata_bytes: Vec::new(),
            bootstrap_timeout_secs: default_bootstrap_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_enable_udp_and_discovery() {
        let options = ToxOptions::default();
        assert!(options.udp_enabled);
        assert!(options.local_discovery);
        assert_eq!(options.savedata_type, SavedataType::None);
    }

    #[test]
    fn test_options_round_trip_through_cbor() {
        let mut options = ToxOptions::default();
        options.tcp_port = 9001;
        options.proxy.proxy_type = ProxyType::Socks5;

        let mut buf = Vec::new();
        ciborium::into_writer(&options, &mut buf).expect("serialize options");
        let restored: ToxOptions = ciborium::from_reader(buf.as_slice()).expect("deserialize options");

        assert_eq!(restored.tcp_port, 9001);
        assert_eq!(restored.proxy.proxy_type, ProxyType::Socks5);
    }
}
