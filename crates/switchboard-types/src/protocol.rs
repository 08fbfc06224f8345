//! Command vocabulary and frame layout.
//!
//! A message is an ordered list of opaque frames. The transport adds and
//! strips the addressing frame, so everything here starts at the first
//! application frame:
//!
//! ```text
//! device -> broker   [HI] | [BYE] | [id, target, GET|SET, param, (value)]
//!                    [id, RET|MET, param, value] | [id, ERR, reason]
//! broker -> device   [OK] | [ERR, reason]
//!                    [id, ACK, target, verb, args..] | [id, verb, args..]
//! ```

use crate::error::ProtocolError;
use crate::id::{PeerAddr, RequestId, ID_LEN};
use bytes::Bytes;
use std::fmt;

/// One multipart message, addressing frames excluded.
pub type Frames = Vec<Bytes>;

/// The command set shared by broker and devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Join request.
    Hi,
    /// Join accepted.
    Ok,
    /// Refusal or failure, carries a reason.
    Err,
    /// Graceful leave.
    Bye,
    /// Read a parameter.
    Get,
    /// Write a parameter.
    Set,
    /// The broker accepted a request for forwarding.
    Ack,
    /// Result of a GET.
    Ret,
    /// Confirmation of a SET.
    Met,
}

impl Verb {
    /// Every verb, in table order.
    pub const ALL: [Verb; 9] = [
        Verb::Hi,
        Verb::Ok,
        Verb::Err,
        Verb::Bye,
        Verb::Get,
        Verb::Set,
        Verb::Ack,
        Verb::Ret,
        Verb::Met,
    ];

    /// The on-wire token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Hi => "HI",
            Verb::Ok => "OK",
            Verb::Err => "ERR",
            Verb::Bye => "BYE",
            Verb::Get => "GET",
            Verb::Set => "SET",
            Verb::Ack => "ACK",
            Verb::Ret => "RET",
            Verb::Met => "MET",
        }
    }

    /// The token as a frame.
    pub fn to_frame(&self) -> Bytes {
        Bytes::from_static(self.as_str().as_bytes())
    }

    /// Parse a token frame.
    pub fn parse(frame: &[u8]) -> Option<Verb> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().as_bytes() == frame)
    }

    /// GET and SET are the only verbs the broker forwards as new requests.
    pub fn is_request(&self) -> bool {
        matches!(self, Verb::Get | Verb::Set)
    }

    /// Verbs a target may legitimately answer a request with.
    pub fn is_reply(&self) -> bool {
        matches!(self, Verb::Ret | Verb::Met | Verb::Err)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason strings carried by `ERR`.
pub mod reason {
    /// HI from a peer that is already a member.
    pub const ALREADY_CONNECTED: &str = "already connected";
    /// Request addressed to a peer that is not a member.
    pub const DEVICE_NOT_CONNECTED: &str = "device not connected";
    /// Request whose verb is neither GET nor SET.
    pub const COMMAND_NOT_UNDERSTOOD: &str = "command not understood";
    /// Target answered with something other than RET, MET or ERR.
    pub const DEVICE_REPLIED_POORLY: &str = "device replied poorly";
    /// The broker gave up waiting for the target.
    pub const REQUEST_TIMED_OUT: &str = "request timed out";
    /// The target left while the request was in flight.
    pub const DEVICE_DISCONNECTED: &str = "device disconnected";
    /// Request from a peer that never joined.
    pub const NOT_JOINED: &str = "not joined";

    /// GET or SET for a parameter the target does not hold.
    pub fn not_param(name: &str) -> String {
        format!("{name} is not param")
    }
}

/// Frame builders for every message the broker and devices emit.
pub mod build {
    use super::*;

    /// `[HI]`
    pub fn hi() -> Frames {
        vec![Verb::Hi.to_frame()]
    }

    /// `[BYE]`
    pub fn bye() -> Frames {
        vec![Verb::Bye.to_frame()]
    }

    /// `[OK]`
    pub fn ok() -> Frames {
        vec![Verb::Ok.to_frame()]
    }

    /// `[ERR, reason]`, the untagged refusal of a join.
    pub fn refused(reason: &str) -> Frames {
        vec![Verb::Err.to_frame(), Bytes::copy_from_slice(reason.as_bytes())]
    }

    /// `[id, verb, args..]`
    pub fn tagged(id: RequestId, verb: Verb, args: impl IntoIterator<Item = Bytes>) -> Frames {
        let mut frames = vec![id.to_frame(), verb.to_frame()];
        frames.extend(args);
        frames
    }

    /// `[id, ERR, reason]`
    pub fn error(id: RequestId, reason: &str) -> Frames {
        tagged(id, Verb::Err, [Bytes::copy_from_slice(reason.as_bytes())])
    }

    /// `[id, target, verb, args..]`, a new request from a device.
    pub fn request(
        id: RequestId,
        target: &PeerAddr,
        verb: Verb,
        args: impl IntoIterator<Item = Bytes>,
    ) -> Frames {
        let mut frames = vec![id.to_frame(), target.to_frame(), verb.to_frame()];
        frames.extend(args);
        frames
    }
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// A message as seen by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerInbound {
    /// `[HI]`
    Join,
    /// `[BYE]`
    Leave,
    /// `[id, rest..]`. Whether `rest` is a new request or a reply depends on
    /// the broker's correlation state.
    Tagged {
        /// Correlation key.
        id: RequestId,
        /// Frames after the ID.
        rest: Vec<Bytes>,
    },
}

impl BrokerInbound {
    /// Classify a message by its first frame.
    pub fn parse(mut frames: Frames) -> Result<Self, ProtocolError> {
        if frames.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let head = frames.remove(0);
        if head.as_ref() == Verb::Hi.as_str().as_bytes() {
            return Ok(BrokerInbound::Join);
        }
        if head.as_ref() == Verb::Bye.as_str().as_bytes() {
            return Ok(BrokerInbound::Leave);
        }
        let id = RequestId::from_frame(&head).ok_or(ProtocolError::MalformedId {
            expected: ID_LEN,
            actual: head.len(),
        })?;
        Ok(BrokerInbound::Tagged { id, rest: frames })
    }
}

/// A message of the form `[id, verb, args..]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged {
    /// Correlation key.
    pub id: RequestId,
    /// Parsed verb, `None` when the token is not part of the vocabulary.
    pub verb: Option<Verb>,
    /// The verb frame exactly as received.
    pub raw_verb: Bytes,
    /// Frames after the verb.
    pub args: Vec<Bytes>,
}

impl Tagged {
    /// Parse `[id, verb, args..]`.
    pub fn parse(frames: Frames) -> Result<Self, ProtocolError> {
        let mut frames = frames.into_iter();
        let head = frames.next().ok_or(ProtocolError::Empty)?;
        let id = RequestId::from_frame(&head).ok_or(ProtocolError::MalformedId {
            expected: ID_LEN,
            actual: head.len(),
        })?;
        let raw_verb = frames.next().ok_or(ProtocolError::MissingFrame("verb"))?;
        Ok(Self {
            id,
            verb: Verb::parse(&raw_verb),
            raw_verb,
            args: frames.collect(),
        })
    }

    /// The argument at `index`.
    pub fn arg(&self, index: usize, name: &'static str) -> Result<&Bytes, ProtocolError> {
        self.args
            .get(index)
            .ok_or(ProtocolError::MissingFrame(name))
    }

    /// The argument at `index`, as text.
    pub fn arg_str(&self, index: usize, name: &'static str) -> Result<&str, ProtocolError> {
        std::str::from_utf8(self.arg(index, name)?).map_err(|_| ProtocolError::NotUtf8(name))
    }

    /// The verb frame as text, for logging unknown tokens.
    pub fn verb_lossy(&self) -> String {
        String::from_utf8_lossy(&self.raw_verb).into_owned()
    }
}

/// The broker's answer to `HI`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinReply {
    /// `[OK]`
    Accepted,
    /// `[ERR, reason]`
    Refused(String),
    /// Anything else.
    Other(Frames),
}

impl JoinReply {
    /// Interpret the first message received while joining.
    pub fn parse(frames: Frames) -> Self {
        match frames.first().and_then(|f| Verb::parse(f)) {
            Some(Verb::Ok) => JoinReply::Accepted,
            Some(Verb::Err) => JoinReply::Refused(
                frames
                    .get(1)
                    .map(|r| String::from_utf8_lossy(r).into_owned())
                    .unwrap_or_default(),
            ),
            _ => JoinReply::Other(frames),
        }
    }
}

/// Render frames for debug logs: printable frames as text, others as hex.
pub fn display_frames(frames: &[Bytes]) -> String {
    let parts: Vec<String> = frames
        .iter()
        .map(|f| match std::str::from_utf8(f) {
            Ok(s) if !s.is_empty() && s.chars().all(|c| !c.is_control()) => format!("{s:?}"),
            _ => format!("0x{}", hex::encode(f)),
        })
        .collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_verb_tokens() {
        for verb in Verb::ALL {
            assert_eq!(Verb::parse(verb.as_str().as_bytes()), Some(verb));
        }
        assert_eq!(Verb::parse(b"PUT"), None);
        assert_eq!(Verb::parse(b"get"), None);
        assert!(Verb::Get.is_request() && Verb::Set.is_request());
        assert!(!Verb::Ret.is_request());
        assert!(Verb::Err.is_reply() && !Verb::Ack.is_reply());
    }

    #[test]
    fn test_broker_inbound_join_and_leave() {
        assert_eq!(BrokerInbound::parse(build::hi()).unwrap(), BrokerInbound::Join);
        assert_eq!(BrokerInbound::parse(build::bye()).unwrap(), BrokerInbound::Leave);
        assert_eq!(BrokerInbound::parse(vec![]), Err(ProtocolError::Empty));
    }

    #[test]
    fn test_broker_inbound_request() {
        let id = RequestId::from(7u32);
        let frames = build::request(id, &PeerAddr::from("JOE"), Verb::Get, [b("INT")]);
        match BrokerInbound::parse(frames).unwrap() {
            BrokerInbound::Tagged { id: got, rest } => {
                assert_eq!(got, id);
                assert_eq!(rest, vec![b("JOE"), b("GET"), b("INT")]);
            }
            other => panic!("Expected Tagged, got {other:?}"),
        }
    }

    #[test]
    fn test_broker_inbound_bad_id() {
        let err = BrokerInbound::parse(vec![b("NOPE!"), b("GET")]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::MalformedId {
                expected: 4,
                actual: 5
            }
        );
    }

    #[test]
    fn test_tagged_parse() {
        let id = RequestId::from(42u32);
        let msg = Tagged::parse(build::tagged(id, Verb::Ret, [b("FLOAT"), b("blob")])).unwrap();
        assert_eq!(msg.id, id);
        assert_eq!(msg.verb, Some(Verb::Ret));
        assert_eq!(msg.arg_str(0, "param").unwrap(), "FLOAT");
        assert_eq!(msg.arg(1, "value").unwrap(), &b("blob"));
        assert_eq!(msg.arg(2, "extra"), Err(ProtocolError::MissingFrame("extra")));
    }

    #[test]
    fn test_tagged_unknown_verb() {
        let id = RequestId::from(1u32);
        let msg = Tagged::parse(vec![id.to_frame(), b("WAT")]).unwrap();
        assert_eq!(msg.verb, None);
        assert_eq!(msg.verb_lossy(), "WAT");
        assert_eq!(
            Tagged::parse(vec![id.to_frame()]).unwrap_err(),
            ProtocolError::MissingFrame("verb")
        );
    }

    #[test]
    fn test_join_reply() {
        assert_eq!(JoinReply::parse(build::ok()), JoinReply::Accepted);
        assert_eq!(
            JoinReply::parse(build::refused(reason::ALREADY_CONNECTED)),
            JoinReply::Refused("already connected".to_string())
        );
        assert!(matches!(JoinReply::parse(vec![b("HUH")]), JoinReply::Other(_)));
    }

    #[test]
    fn test_error_frames() {
        let id = RequestId::from(3u32);
        let frames = build::error(id, &reason::not_param("SPEED"));
        assert_eq!(frames[1], b("ERR"));
        assert_eq!(frames[2], b("SPEED is not param"));
    }

    #[test]
    fn test_display_frames() {
        let frames = vec![Bytes::from_static(&[0, 0, 0, 1]), b("GET")];
        assert_eq!(display_frames(&frames), "[0x00000001, \"GET\"]");
    }
}
