use crate::{
    accept,
    header::{self, Field},
    HandshakeError, Result, SpProtocol,
};

use super::{Handshake, Outcome, State};

/// Composes the request with a fresh key and queues it.
pub(super) fn send_request(hs: &mut Handshake, resource: &str, host: &str) {
    let key = accept::generate_key();
    hs.expected_accept = accept::derive(&key);

    match hs.send.request(resource, host, &key, hs.options.protocol) {
        Ok(()) => {
            hs.state = State::SendingRequest;
            hs.send_message();
        }
        Err(err) => hs.finish(Outcome::Error(err)),
    }
}

/// Validates a complete reply.
pub(super) fn on_reply(hs: &mut Handshake) {
    match validate(hs) {
        Ok(()) => {
            let negotiated = hs.negotiated();
            hs.finish(Outcome::Ok(negotiated));
        }
        Err(err) => hs.reject(err),
    }
}

/// Checks the reply against RFC 6455 Section 4.2.2 and the request that was sent.
fn validate(hs: &mut Handshake) -> Result<()> {
    hs.fields = header::parse_reply(&hs.recv_buf[..hs.recv_pos])?;
    let headers = hs.headers();

    match headers.status_code() {
        Some(101) => {}
        Some(code) => return Err(HandshakeError::InvalidStatusCode(code)),
        None => return Err(header::ParseError::StatusLine.into()),
    }

    if !headers.eq_ignore_ascii_case(Field::Upgrade, "websocket") {
        return Err(HandshakeError::InvalidUpgradeHeader);
    }

    if !headers.has_token(Field::Connection, "upgrade") {
        return Err(HandshakeError::InvalidConnectionHeader);
    }

    let accept_key = headers
        .get(Field::AcceptKey)
        .ok_or(HandshakeError::MissingHeader(Field::AcceptKey.name()))?;
    if accept_key != hs.expected_accept {
        return Err(HandshakeError::AcceptKeyMismatch);
    }

    // servers may leave the protocol out, but must not pick another one
    if let Some(echoed) = headers.get(Field::Protocol) {
        let local = hs.options.protocol;
        match SpProtocol::from_ws_bytes(echoed) {
            Some(protocol) if protocol == local => {}
            Some(peer) => return Err(HandshakeError::IncompatibleProtocol { local, peer }),
            None => return Err(HandshakeError::UnknownProtocol),
        }
    }

    Ok(())
}
