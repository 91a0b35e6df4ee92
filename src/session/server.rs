use crate::{
    accept,
    builder::ResponseCode,
    header::{self, Field, Headers, ParseError},
    HandshakeError, Result, SpProtocol,
};

use super::{Handshake, Outcome, State};

/// Validates a complete request and answers it.
pub(super) fn on_request(hs: &mut Handshake) {
    match validate(hs) {
        Ok(peer) => send_switching_protocols(hs, peer),
        Err(err) => hs.reject(err),
    }
}

/// Checks the request against RFC 6455 Section 4.2.1 and the local protocol.
///
/// Returns the scalability protocol advertised by the client.
fn validate(hs: &mut Handshake) -> Result<SpProtocol> {
    hs.fields = header::parse_request(&hs.recv_buf[..hs.recv_pos])?;
    let headers = hs.headers();

    required(&headers, Field::Host)?;

    required(&headers, Field::Upgrade)?;
    if !headers.eq_ignore_ascii_case(Field::Upgrade, "websocket") {
        return Err(HandshakeError::InvalidUpgradeHeader);
    }

    required(&headers, Field::Connection)?;
    if !headers.has_token(Field::Connection, "upgrade") {
        return Err(HandshakeError::InvalidConnectionHeader);
    }

    if !accept::is_valid_key(required(&headers, Field::Key)?) {
        return Err(HandshakeError::InvalidSecWebSocketKey);
    }

    if required(&headers, Field::Version)? != b"13" {
        return Err(HandshakeError::InvalidSecWebsocketVersion);
    }

    let advertised = required(&headers, Field::Protocol)?;
    let peer = SpProtocol::from_ws_bytes(advertised).ok_or(HandshakeError::UnknownProtocol)?;

    let local = hs.options.protocol;
    if !local.is_peer(peer) {
        return Err(HandshakeError::IncompatibleProtocol { local, peer });
    }

    Ok(peer)
}

fn required<'a>(headers: &Headers<'a>, field: Field) -> Result<&'a [u8]> {
    headers
        .get(field)
        .ok_or(HandshakeError::MissingHeader(field.name()))
}

fn send_switching_protocols(hs: &mut Handshake, peer: SpProtocol) {
    let accept_key = accept::derive(hs.headers().get(Field::Key).unwrap_or_default());

    hs.peer = Some(peer);
    hs.response_code = Some(ResponseCode::SwitchingProtocols);
    // the client's protocol string is echoed back
    match hs.send.switching_protocols(&accept_key, peer) {
        Ok(()) => {
            hs.state = State::SendingResponse;
            hs.send_message();
        }
        Err(err) => hs.finish(Outcome::Error(err)),
    }
}

/// Answers a rejected request, failing with `err` once the answer is written.
pub(super) fn send_rejection(hs: &mut Handshake, err: HandshakeError) {
    let code = response_code(&err);
    hs.response_code = Some(code);

    match hs.send.rejection(code) {
        Ok(()) => {
            hs.failure = Some(err);
            hs.state = State::SendingResponse;
            hs.send_message();
        }
        Err(_) => hs.finish(Outcome::Error(err)),
    }
}

/// Status line answering a request rejected with `err`.
fn response_code(err: &HandshakeError) -> ResponseCode {
    match err {
        HandshakeError::HeaderTooLarge
        | HandshakeError::Parse(ParseError::TooLarge | ParseError::LineTooLong) => {
            ResponseCode::TooBig
        }
        HandshakeError::UnexpectedBody => ResponseCode::CannotHaveBody,
        HandshakeError::InvalidSecWebsocketVersion => ResponseCode::UpgradeRequired,
        HandshakeError::MissingHeader(name) if *name == Field::Version.name() => {
            ResponseCode::UpgradeRequired
        }
        HandshakeError::MissingHeader(name) if *name == Field::Protocol.name() => {
            ResponseCode::MissingProtocol
        }
        HandshakeError::UnknownProtocol => ResponseCode::UnknownProtocol,
        HandshakeError::IncompatibleProtocol { .. } => ResponseCode::IncompatibleProtocol,
        _ => ResponseCode::BadRequest,
    }
}
