//! # Request and response builder
//!
//! Composes the outgoing half of the opening handshake into a fixed 512-byte
//! buffer. Nothing here allocates: every message is written in place and a
//! message that does not fit is reported as [`HandshakeError::MessageTooLarge`],
//! an internal limit rather than a fault of the peer.
//!
//! ```text
//! GET /path HTTP/1.1                       HTTP/1.1 101 Switching Protocols
//! Host: example.com                        Upgrade: websocket
//! Upgrade: websocket                       Connection: Upgrade
//! Connection: Upgrade                      Sec-WebSocket-Accept: <derived>
//! Sec-WebSocket-Key: <nonce>               Sec-WebSocket-Protocol: <sp>
//! Sec-WebSocket-Version: 13
//! Sec-WebSocket-Protocol: <sp>
//! ```
use std::io::{self, Cursor, Write};

use crate::{accept::ACCEPT_KEY_LEN, HandshakeError, Result, SpProtocol};

/// Capacity of the send buffer.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Status line chosen by a server in answer to a request.
///
/// Exactly one code is selected per server handshake.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// The upgrade is accepted.
    SwitchingProtocols,
    /// The request did not fit the receive buffer, or one of its lines is too long.
    TooBig,
    /// The request is malformed or lacks a mandatory WebSocket header.
    BadRequest,
    /// Bytes followed the request's header block.
    CannotHaveBody,
    /// `Sec-WebSocket-Version` is missing or is not 13.
    UpgradeRequired,
    /// `Sec-WebSocket-Protocol` is absent.
    MissingProtocol,
    /// `Sec-WebSocket-Protocol` names no known scalability protocol.
    UnknownProtocol,
    /// The client's protocol cannot talk to the local one.
    IncompatibleProtocol,
}

impl ResponseCode {
    pub fn status(self) -> u16 {
        match self {
            Self::SwitchingProtocols => 101,
            Self::UpgradeRequired => 426,
            _ => 400,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::SwitchingProtocols => "Switching Protocols",
            Self::TooBig => "Opening Handshake Too Long",
            Self::BadRequest => "Bad Request",
            Self::CannotHaveBody => "Cannot Have Body",
            Self::UpgradeRequired => "Upgrade Required",
            Self::MissingProtocol => "Missing Scalability Protocol",
            Self::UnknownProtocol => "Unrecognized Socket Type",
            Self::IncompatibleProtocol => "Incompatible Socket Type",
        }
    }
}

/// Fixed-capacity buffer holding one outgoing handshake message.
pub struct SendBuffer {
    buf: [u8; MAX_MESSAGE_SIZE],
    len: usize,
}

impl Default for SendBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SendBuffer {
    pub fn new() -> Self {
        Self {
            buf: [0; MAX_MESSAGE_SIZE],
            len: 0,
        }
    }

    /// The composed message, empty if none was composed.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Writes a client opening request for `resource` on `host`.
    ///
    /// `resource` is prefixed with `/` when it does not start with one.
    pub fn request(
        &mut self,
        resource: &str,
        host: &str,
        key: &str,
        protocol: SpProtocol,
    ) -> Result<()> {
        if !is_request_target(resource) {
            return Err(HandshakeError::InvalidHeaderValue("resource"));
        }
        if host.is_empty() || !is_header_safe(host) {
            return Err(HandshakeError::InvalidHeaderValue("host"));
        }
        let slash = if resource.starts_with('/') { "" } else { "/" };

        self.compose(|out| {
            write!(
                out,
                "GET {slash}{resource} HTTP/1.1\r\n\
                 Host: {host}\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Key: {key}\r\n\
                 Sec-WebSocket-Version: 13\r\n\
                 Sec-WebSocket-Protocol: {}\r\n\
                 \r\n",
                protocol.as_ws_str()
            )
        })
    }

    /// Writes the `101 Switching Protocols` answer.
    pub fn switching_protocols(
        &mut self,
        accept_key: &[u8; ACCEPT_KEY_LEN],
        protocol: SpProtocol,
    ) -> Result<()> {
        self.compose(|out| {
            write!(
                out,
                "HTTP/1.1 101 Switching Protocols\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Accept: "
            )?;
            out.write_all(accept_key)?;
            write!(
                out,
                "\r\nSec-WebSocket-Protocol: {}\r\n\r\n",
                protocol.as_ws_str()
            )
        })
    }

    /// Writes an error answer for `code`.
    pub fn rejection(&mut self, code: ResponseCode) -> Result<()> {
        self.compose(|out| {
            write!(out, "HTTP/1.1 {} {}\r\n", code.status(), code.reason())?;
            if code == ResponseCode::UpgradeRequired {
                write!(out, "Sec-WebSocket-Version: 13\r\n")?;
            }
            write!(out, "Connection: close\r\n\r\n")
        })
    }

    fn compose<F>(&mut self, write: F) -> Result<()>
    where
        F: FnOnce(&mut Cursor<&mut [u8]>) -> io::Result<()>,
    {
        self.len = 0;
        let mut out = Cursor::new(&mut self.buf[..]);
        match write(&mut out) {
            Ok(()) => {
                self.len = out.position() as usize;
                Ok(())
            }
            // The cursor refuses to grow past the buffer.
            Err(_) => Err(HandshakeError::MessageTooLarge),
        }
    }
}

/// Rejects values that would break out of their line.
fn is_header_safe(value: &str) -> bool {
    !value.bytes().any(|c| c.is_ascii_control())
}

/// A space would end the target early in the request line.
fn is_request_target(value: &str) -> bool {
    is_header_safe(value) && !value.contains(' ')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{accept, header};

    #[test]
    fn test_request() {
        let mut buf = SendBuffer::new();
        buf.request(
            "/chat",
            "server.example.com",
            "dGhlIHNhbXBsZSBub25jZQ==",
            SpProtocol::Req,
        )
        .unwrap();

        assert_eq!(
            buf.as_bytes(),
            b"GET /chat HTTP/1.1\r\n\
Host: server.example.com\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\
Sec-WebSocket-Protocol: req.sp.nanomsg.org\r\n\
\r\n"
        );

        // the request is accepted by our own parser
        let fields = header::parse_request(buf.as_bytes()).unwrap();
        let headers = header::Headers::new(buf.as_bytes(), &fields);
        assert_eq!(headers.get_str(header::Field::Uri), Some("/chat"));
    }

    #[test]
    fn test_request_adds_leading_slash() {
        let mut buf = SendBuffer::new();
        buf.request("", "h", "k", SpProtocol::Pair).unwrap();
        assert!(buf.as_bytes().starts_with(b"GET / HTTP/1.1\r\n"));

        buf.request("a/b?c=d", "h", "k", SpProtocol::Pair).unwrap();
        assert!(buf.as_bytes().starts_with(b"GET /a/b?c=d HTTP/1.1\r\n"));
    }

    #[test]
    fn test_request_rejects_injection() {
        let mut buf = SendBuffer::new();
        assert!(matches!(
            buf.request("/x\r\nEvil: 1", "h", "k", SpProtocol::Pair),
            Err(HandshakeError::InvalidHeaderValue("resource"))
        ));
        assert!(matches!(
            buf.request("/a b", "h", "k", SpProtocol::Pair),
            Err(HandshakeError::InvalidHeaderValue("resource"))
        ));
        assert!(matches!(
            buf.request("/", "h\n", "k", SpProtocol::Pair),
            Err(HandshakeError::InvalidHeaderValue("host"))
        ));
        assert!(matches!(
            buf.request("/", "", "k", SpProtocol::Pair),
            Err(HandshakeError::InvalidHeaderValue("host"))
        ));
    }

    #[test]
    fn test_request_too_large() {
        let mut buf = SendBuffer::new();
        let resource = "/".repeat(MAX_MESSAGE_SIZE);
        assert!(matches!(
            buf.request(&resource, "h", "k", SpProtocol::Pair),
            Err(HandshakeError::MessageTooLarge)
        ));
        assert!(buf.as_bytes().is_empty());
    }

    #[test]
    fn test_switching_protocols() {
        let mut buf = SendBuffer::new();
        let accept = accept::derive("dGhlIHNhbXBsZSBub25jZQ==");
        buf.switching_protocols(&accept, SpProtocol::Pair).unwrap();

        assert_eq!(
            buf.as_bytes(),
            b"HTTP/1.1 101 Switching Protocols\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
Sec-WebSocket-Protocol: pair.sp.nanomsg.org\r\n\
\r\n"
        );
        assert!(header::parse_reply(buf.as_bytes()).is_ok());
    }

    #[test]
    fn test_rejection() {
        let mut buf = SendBuffer::new();
        buf.rejection(ResponseCode::UpgradeRequired).unwrap();
        assert_eq!(
            buf.as_bytes(),
            b"HTTP/1.1 426 Upgrade Required\r\nSec-WebSocket-Version: 13\r\nConnection: close\r\n\r\n"
        );

        buf.rejection(ResponseCode::IncompatibleProtocol).unwrap();
        assert_eq!(
            buf.as_bytes(),
            b"HTTP/1.1 400 Incompatible Socket Type\r\nConnection: close\r\n\r\n"
        );

        for code in [
            ResponseCode::TooBig,
            ResponseCode::BadRequest,
            ResponseCode::CannotHaveBody,
            ResponseCode::MissingProtocol,
            ResponseCode::UnknownProtocol,
        ] {
            buf.rejection(code).unwrap();
            let fields = header::parse_reply(buf.as_bytes()).unwrap();
            let headers = header::Headers::new(buf.as_bytes(), &fields);
            assert_eq!(headers.status_code(), Some(400));
            assert_eq!(
                headers.get_str(header::Field::ReasonPhrase),
                Some(code.reason())
            );
        }
    }
}
