//! # pairsync
//!
//! Secure pairing between devices belonging to the same logical identity,
//! over a publish/subscribe messaging fabric. Each peer owns a channel named
//! by its identifier on which it listens for control messages, discovers
//! other peers via ping/pong, and runs a four-phase key-exchange handshake
//! per remote peer: RSA long-term public-key exchange, EC ephemeral key
//! exchange with signature verification, ECDH secret derivation, and
//! encrypted group-key distribution.
//!
//! The transport ([`Transport`] / [`PeerChannel`]) and device persistence
//! ([`DeviceStore`]) are consumed contracts supplied by the host
//! application; [`testing`] carries in-memory implementations of both.

use serde::{Deserialize, Serialize};

pub mod config;
pub mod crypto;
pub mod election;
pub mod errors;
pub mod manager;
pub mod pairing;
pub mod storage;
pub mod testing;
pub mod transport;

pub use config::{ReconnectOptions, TransportConfig};
pub use election::elect_master;
pub use errors::{Result, SyncError};
pub use manager::SyncPeer;
pub use pairing::{PairingEvent, SessionState};
pub use storage::{DeviceKeys, DeviceStore, PairedDevice};
pub use transport::{PeerChannel, Transport};

/// Event tag of a wire [`Message`], selecting its handler.
///
/// Spellings are fixed by the wire schema; `ping`/`pong` drive peer
/// discovery and everything else belongs to the pairing handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "publicKey")]
    PublicKey,
    #[serde(rename = "ECPublicKey")]
    EcPublicKey,
    #[serde(rename = "channelKey")]
    ChannelKey,
    #[serde(rename = "readyToTransfer")]
    ReadyToTransfer,
}

/// Event-specific payload: hex-encoded key material plus an optional
/// signature (EC exchange only).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// The wire unit exchanged over a channel (JSON-compatible).
///
/// `from` identifies the sender and is required on every peer-originated
/// message; a message carrying the local id as `from` is self-originated
/// and dropped by the router (loop suppression). `to` is used for
/// addressing only and is not authenticated. `ack: true` marks a message
/// as the response to an earlier request of the same event type, which is
/// what terminates the exchange loops.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ack: bool,
}

impl Message {
    /// Discovery ping, published right after subscribing a peer channel.
    pub fn ping(from: &str) -> Self {
        Self {
            from: from.to_string(),
            to: None,
            event: EventKind::Ping,
            data: None,
            ack: false,
        }
    }

    /// Discovery pong, the reply confirming the channel is up.
    pub fn pong(from: &str) -> Self {
        Self {
            from: from.to_string(),
            to: None,
            event: EventKind::Pong,
            data: None,
            ack: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tags_use_wire_spellings() {
        let msg = Message {
            from: "p1".into(),
            to: Some("p2".into()),
            event: EventKind::EcPublicKey,
            data: Some(Payload {
                key: Some("0a0b".into()),
                signature: Some("ff".into()),
            }),
            ack: true,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["event"], "ECPublicKey");
        assert_eq!(json["from"], "p1");
        assert_eq!(json["to"], "p2");
        assert_eq!(json["data"]["key"], "0a0b");
        assert_eq!(json["data"]["signature"], "ff");
        assert_eq!(json["ack"], true);
    }

    #[test]
    fn optional_fields_are_omitted_and_defaulted() {
        let ping = Message::ping("p1");
        let json = serde_json::to_string(&ping).unwrap();
        assert_eq!(json, r#"{"from":"p1","event":"ping"}"#);

        let back: Message = serde_json::from_str(r#"{"from":"p2","event":"pong"}"#).unwrap();
        assert_eq!(back.event, EventKind::Pong);
        assert!(back.to.is_none());
        assert!(back.data.is_none());
        assert!(!back.ack);
    }

    #[test]
    fn all_wire_events_round_trip() {
        for (kind, name) in [
            (EventKind::Ping, "ping"),
            (EventKind::Pong, "pong"),
            (EventKind::PublicKey, "publicKey"),
            (EventKind::EcPublicKey, "ECPublicKey"),
            (EventKind::ChannelKey, "channelKey"),
            (EventKind::ReadyToTransfer, "readyToTransfer"),
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{name}\""));
            let back: EventKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }
}
