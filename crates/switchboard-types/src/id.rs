//! Peer addresses and request IDs.

use bytes::Bytes;
use std::fmt;

/// Length of a request ID in bytes.
pub const ID_LEN: usize = 4;

// ---------------------------------------------------------------------------
// PeerAddr
// ---------------------------------------------------------------------------

/// Transport-level identity of a connected peer.
///
/// Supplied by the transport on every inbound message; the application layer
/// only ever echoes addresses it has seen.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddr(Bytes);

impl PeerAddr {
    /// Wrap a raw identity frame.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Borrow the raw identity.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The identity as a frame, for messages that name a peer.
    pub fn to_frame(&self) -> Bytes {
        self.0.clone()
    }
}

impl From<&str> for PeerAddr {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for PeerAddr {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<Bytes> for PeerAddr {
    fn from(b: Bytes) -> Self {
        Self(b)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerAddr({self})")
    }
}

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// Correlation key for one request and every frame answering it.
///
/// Generated by the requesting device; the broker treats it as opaque.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId([u8; ID_LEN]);

impl RequestId {
    /// Build an ID from its raw bytes.
    pub const fn new(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse an ID frame. Returns `None` unless the frame is exactly
    /// [`ID_LEN`] bytes long.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        let bytes: [u8; ID_LEN] = frame.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Raw bytes of the ID.
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// The ID as a frame.
    pub fn to_frame(&self) -> Bytes {
        Bytes::copy_from_slice(&self.0)
    }
}

impl From<u32> for RequestId {
    fn from(n: u32) -> Self {
        Self(n.to_be_bytes())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_from_frame() {
        let id = RequestId::from_frame(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(id.to_string(), "0xdeadbeef");
        assert_eq!(id.to_frame().as_ref(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_request_id_rejects_wrong_length() {
        assert!(RequestId::from_frame(b"HI").is_none());
        assert!(RequestId::from_frame(&[0u8; 5]).is_none());
        assert!(RequestId::from_frame(&[]).is_none());
    }

    #[test]
    fn test_request_id_from_counter() {
        assert_eq!(RequestId::from(1u32).as_bytes(), &[0, 0, 0, 1]);
    }

    #[test]
    fn test_peer_addr_display() {
        let addr = PeerAddr::from("JOE");
        assert_eq!(addr.to_string(), "JOE");
        assert_eq!(addr.as_bytes(), b"JOE");
        assert_eq!(addr, PeerAddr::from_bytes(Bytes::from_static(b"JOE")));
    }
}
