//! # Scalability protocols
//!
//! A scalability-protocol socket advertises its messaging pattern through the
//! WebSocket `Sec-WebSocket-Protocol` header. This module holds the static table
//! mapping each [`SpProtocol`] to its numeric id and to its canonical header
//! value, along with the peer relation used by servers to decide whether an
//! incoming client may talk to the local socket.
//!
//! ```rust
//! use spws::SpProtocol;
//!
//! assert_eq!(SpProtocol::Req.as_ws_str(), "req.sp.nanomsg.org");
//! assert_eq!(SpProtocol::from_ws_str("rep.sp.nanomsg.org"), Some(SpProtocol::Rep));
//! assert!(SpProtocol::Req.is_peer(SpProtocol::Rep));
//! ```
use std::{fmt, str::FromStr};

/// Messaging pattern of the socket on one end of a connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum SpProtocol {
    /// One-to-one bidirectional pipe.
    #[default]
    Pair,
    /// Publishing side of publish/subscribe.
    Pub,
    /// Subscribing side of publish/subscribe.
    Sub,
    /// Requesting side of request/reply.
    Req,
    /// Replying side of request/reply.
    Rep,
    /// Sending side of a pipeline.
    Push,
    /// Receiving side of a pipeline.
    Pull,
    /// Querying side of a survey.
    Surveyor,
    /// Answering side of a survey.
    Respondent,
    /// Many-to-many broadcast.
    Bus,
}

/// Static protocol table: variant, numeric id, canonical header value and short name.
static TABLE: [(SpProtocol, u16, &str, &str); 10] = [
    (SpProtocol::Pair, 16, "pair.sp.nanomsg.org", "pair"),
    (SpProtocol::Pub, 32, "pub.sp.nanomsg.org", "pub"),
    (SpProtocol::Sub, 33, "sub.sp.nanomsg.org", "sub"),
    (SpProtocol::Req, 48, "req.sp.nanomsg.org", "req"),
    (SpProtocol::Rep, 49, "rep.sp.nanomsg.org", "rep"),
    (SpProtocol::Push, 80, "push.sp.nanomsg.org", "push"),
    (SpProtocol::Pull, 81, "pull.sp.nanomsg.org", "pull"),
    (SpProtocol::Surveyor, 98, "surveyor.sp.nanomsg.org", "surveyor"),
    (
        SpProtocol::Respondent,
        99,
        "respondent.sp.nanomsg.org",
        "respondent",
    ),
    (SpProtocol::Bus, 112, "bus.sp.nanomsg.org", "bus"),
];

impl SpProtocol {
    /// Every known protocol, in table order.
    pub const ALL: [SpProtocol; 10] = [
        Self::Pair,
        Self::Pub,
        Self::Sub,
        Self::Req,
        Self::Rep,
        Self::Push,
        Self::Pull,
        Self::Surveyor,
        Self::Respondent,
        Self::Bus,
    ];

    fn entry(self) -> &'static (SpProtocol, u16, &'static str, &'static str) {
        // The table is indexed in declaration order.
        &TABLE[self as usize]
    }

    /// Numeric protocol id.
    pub fn id(self) -> u16 {
        self.entry().1
    }

    /// Canonical value carried in `Sec-WebSocket-Protocol`.
    pub fn as_ws_str(self) -> &'static str {
        self.entry().2
    }

    /// Short configuration name (`"req"`, `"pair"`, ...).
    pub fn name(self) -> &'static str {
        self.entry().3
    }

    /// Looks up a protocol by numeric id.
    pub fn from_id(id: u16) -> Option<Self> {
        TABLE
            .iter()
            .find(|(_, entry_id, _, _)| *entry_id == id)
            .map(|(protocol, ..)| *protocol)
    }

    /// Looks up a protocol by its `Sec-WebSocket-Protocol` value.
    ///
    /// Header values are compared ASCII case-insensitively.
    pub fn from_ws_str(value: &str) -> Option<Self> {
        Self::from_ws_bytes(value.as_bytes())
    }

    /// Byte-slice variant of [`SpProtocol::from_ws_str`], used on raw header slices.
    pub fn from_ws_bytes(value: &[u8]) -> Option<Self> {
        TABLE
            .iter()
            .find(|(_, _, ws, _)| ws.as_bytes().eq_ignore_ascii_case(value))
            .map(|(protocol, ..)| *protocol)
    }

    /// Whether a socket speaking `self` may be connected to one speaking `other`.
    pub fn is_peer(self, other: SpProtocol) -> bool {
        use SpProtocol::*;
        matches!(
            (self, other),
            (Pair, Pair)
                | (Pub, Sub)
                | (Sub, Pub)
                | (Req, Rep)
                | (Rep, Req)
                | (Push, Pull)
                | (Pull, Push)
                | (Surveyor, Respondent)
                | (Respondent, Surveyor)
                | (Bus, Bus)
        )
    }
}

impl fmt::Display for SpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpProtocol {
    type Err = String;

    /// Accepts either the short name (`req`) or the full header value
    /// (`req.sp.nanomsg.org`).
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        TABLE
            .iter()
            .find(|(_, _, ws, name)| {
                name.eq_ignore_ascii_case(input) || ws.eq_ignore_ascii_case(input)
            })
            .map(|(protocol, ..)| *protocol)
            .ok_or_else(|| format!("unknown scalability protocol: {input}"))
    }
}
