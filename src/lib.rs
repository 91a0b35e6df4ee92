//! # spws
//! The WebSocket opening handshake ([RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455))
//! for scalability-protocol transports, where the messaging pattern of each end
//! (pair, req/rep, pub/sub, ...) travels in the `Sec-WebSocket-Protocol` header.
//!
//! The crate is built in two layers:
//!
//! - [`Handshake`]: a sans-IO state machine. It owns a fixed 4096-byte receive
//!   buffer and a 512-byte send buffer, asks for reads, writes and a timer through
//!   [`Action`]s, consumes their completions as [`Event`]s and reports exactly one
//!   [`Outcome`] per attempt. It never blocks and never touches a socket.
//! - [`HandshakeFut`]: a tokio driver running a [`Handshake`] over any
//!   `AsyncRead + AsyncWrite` stream, handing the stream back on success.
//!
//! Both client and server roles are supported and share the header parser
//! ([`header`]), the accept-key derivation ([`accept`]) and the message builder
//! ([`builder`]).
//!
//! # Features
//!
//! - `logging`: Enables debug logging of state transitions and rejections using
//!   the `log` crate.
//!
//! # Client Example
//! ```rust,no_run
//! use tokio::net::TcpStream;
//! use spws::{Options, SpProtocol};
//!
//! async fn client() -> spws::Result<()> {
//!     let stream = TcpStream::connect("127.0.0.1:5555").await?;
//!     let options = Options::default().with_protocol(SpProtocol::Req);
//!     let upgraded = spws::connect(stream, "/", "127.0.0.1:5555", options).await?;
//!     assert_eq!(upgraded.negotiated().protocol, SpProtocol::Req);
//!     let _stream = upgraded.into_inner();
//!     Ok(())
//! }
//! ```
//!
//! # Server Example
//! ```rust,no_run
//! use tokio::net::TcpListener;
//! use spws::{Options, SpProtocol};
//!
//! async fn server() -> spws::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:5555").await?;
//!     let (stream, _) = listener.accept().await?;
//!     let options = Options::default().with_protocol(SpProtocol::Rep);
//!     let upgraded = spws::accept(stream, options).await?;
//!     if let Some(peer) = upgraded.negotiated().peer {
//!         println!("peer speaks {peer}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Limits
//! - Incoming handshakes are limited to 4096 bytes; longer ones are rejected
//!   before they are parsed.
//! - Outgoing handshakes are limited to 512 bytes.
//! - Servers read 150 bytes before looking for the end of the request, clients
//!   16 bytes before looking for the end of the reply; further reads never go
//!   past the blank line closing the header block.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod accept;
pub mod builder;
pub mod header;
mod options;
mod protocol;
mod session;
mod stream;

use thiserror::Error;

pub use builder::{ResponseCode, MAX_MESSAGE_SIZE};
pub use header::MAX_HEADER_SIZE;
pub use options::{Options, DEFAULT_TIMEOUT};
pub use protocol::SpProtocol;
pub use session::{
    Action, Event, Handshake, Mode, Negotiated, Outcome, State, Status, TimerId,
    MIN_REPLY_SIZE,
    MIN_REQUEST_SIZE,
};
pub use stream::{accept, connect, connect_url, HandshakeFut, StopHandle, Upgraded};

/// A result type for handshake operations, using [`HandshakeError`] as the error type.
pub type Result<T> = std::result::Result<T, HandshakeError>;

/// Represents errors that can occur while negotiating an opening handshake.
///
/// Every variant belongs to one of the broad categories returned by
/// [`HandshakeError::kind`]:
///
/// - Protocol violations by the peer (malformed lines, missing or invalid headers,
///   accept-key mismatch, incompatible scalability protocol)
/// - Size limits (incoming header block or outgoing message too large)
/// - Timeouts, I/O failures and explicit stops
/// - Misuse of the [`Handshake`] API
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// Returned by [`Handshake::start`] and [`Handshake::terminate`] when the
    /// session is still busy with a previous attempt, and by a [`HandshakeFut`]
    /// polled again after it completed.
    #[error("Handshake is not idle")]
    NotIdle,

    /// The request line, status line or a header line could not be parsed.
    #[error(transparent)]
    Parse(#[from] header::ParseError),

    /// A header required by RFC 6455 or by the scalability protocol is absent.
    #[error("{0} header is missing")]
    MissingHeader(&'static str),

    /// Indicates that the HTTP "Upgrade" header does not contain the required
    /// "websocket" value.
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// Indicates that the HTTP "Connection" header does not contain the required
    /// "upgrade" token.
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// The "Sec-WebSocket-Key" header is not the base64 encoding of 16 bytes.
    #[error("Sec-WebSocket-Key must encode 16 bytes")]
    InvalidSecWebSocketKey,

    /// Returned when the "Sec-WebSocket-Version" header is not set to 13.
    #[error("Sec-Websocket-Version must be 13")]
    InvalidSecWebsocketVersion,

    /// "Sec-WebSocket-Protocol" names no known scalability protocol.
    #[error("Unrecognized scalability protocol")]
    UnknownProtocol,

    /// The peer's scalability protocol cannot talk to the local one.
    #[error("{local} socket cannot talk to {peer} socket")]
    IncompatibleProtocol {
        /// Protocol of this end.
        local: SpProtocol,
        /// Protocol advertised by the peer.
        peer: SpProtocol,
    },

    /// Bytes followed the blank line closing the header block.
    #[error("Handshake cannot have a body")]
    UnexpectedBody,

    /// Returned when the server answers with anything but 101.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// "Sec-WebSocket-Accept" does not match the key sent by the client.
    #[error("Sec-WebSocket-Accept does not match Sec-WebSocket-Key")]
    AcceptKeyMismatch,

    /// The receive buffer filled up before the end of the header block.
    #[error("Handshake exceeds {} bytes", MAX_HEADER_SIZE)]
    HeaderTooLarge,

    /// The outgoing request or response does not fit the send buffer.
    #[error("Outgoing handshake exceeds {} bytes", MAX_MESSAGE_SIZE)]
    MessageTooLarge,

    /// A resource or host given to [`Handshake::start`] contains control characters.
    #[error("Invalid {0} value")]
    InvalidHeaderValue(&'static str),

    /// The handshake did not complete before the configured timeout.
    #[error("Handshake timed out")]
    Timeout,

    /// The handshake was stopped by its owner.
    #[error("Handshake stopped")]
    Stopped,

    /// Returned when connecting to an URL whose scheme is not `ws`.
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// Wraps errors from URL parsing.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Wraps standard I/O errors raised by the underlying stream.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Broad category of a [`HandshakeError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The peer sent something the handshake does not accept.
    ProtocolViolation,
    /// A fixed buffer limit was reached.
    SizeLimitExceeded,
    /// The timer expired first.
    Timeout,
    /// The stream failed.
    IoFailure,
    /// The owner stopped the handshake.
    UserStop,
    /// The API was called in the wrong state or with invalid arguments.
    Usage,
}

impl HandshakeError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        use header::ParseError;

        match self {
            Self::Parse(ParseError::TooLarge | ParseError::LineTooLong)
            | Self::HeaderTooLarge
            | Self::MessageTooLarge => ErrorKind::SizeLimitExceeded,
            Self::Parse(_)
            | Self::MissingHeader(_)
            | Self::InvalidUpgradeHeader
            | Self::InvalidConnectionHeader
            | Self::InvalidSecWebSocketKey
            | Self::InvalidSecWebsocketVersion
            | Self::UnknownProtocol
            | Self::IncompatibleProtocol { .. }
            | Self::UnexpectedBody
            | Self::InvalidStatusCode(_)
            | Self::AcceptKeyMismatch => ErrorKind::ProtocolViolation,
            Self::Timeout => ErrorKind::Timeout,
            Self::IoError(_) => ErrorKind::IoFailure,
            Self::Stopped => ErrorKind::UserStop,
            Self::NotIdle
            | Self::InvalidHeaderValue(_)
            | Self::InvalidHttpScheme
            | Self::UrlParseError(_) => ErrorKind::Usage,
        }
    }
}
