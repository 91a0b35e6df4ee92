use std::time::Duration;

use super::*;
use crate::{accept, header::Field, ErrorKind};

const RFC_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const RFC_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

fn request(protocol: &str, version: &str) -> Vec<u8> {
    format!(
        "GET /chat HTTP/1.1\r\n\
         Host: server.example.com\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {RFC_KEY}\r\n\
         Sec-WebSocket-Protocol: {protocol}\r\n\
         Sec-WebSocket-Version: {version}\r\n\
         \r\n"
    )
    .into_bytes()
}

fn rfc_request() -> Vec<u8> {
    request("pair.sp.nanomsg.org", "13")
}

/// Carries out actions against in-memory buffers, the way a reactor would.
struct Driver {
    hs: Handshake,
    input: Vec<u8>,
    read: usize,
    written: Vec<u8>,
    timer: Option<Duration>,
    timer_id: Option<TimerId>,
    stalled: Option<usize>,
    reads: Vec<usize>,
    outcomes: Vec<Outcome>,
}

impl Driver {
    fn new(options: Options) -> Self {
        Self {
            hs: Handshake::new(options),
            input: Vec::new(),
            read: 0,
            written: Vec::new(),
            timer: None,
            timer_id: None,
            stalled: None,
            reads: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    fn server(options: Options, input: &[u8]) -> Self {
        let mut driver = Self::new(options);
        driver.input.extend_from_slice(input);
        driver.hs.start(Mode::Server, "", "").unwrap();
        driver.run();
        driver
    }

    fn run(&mut self) {
        while let Some(action) = self.hs.poll_action() {
            match action {
                Action::ArmTimer(timeout, id) => {
                    self.timer = Some(timeout);
                    self.timer_id = Some(id);
                }
                Action::CancelTimer => self.timer = None,
                Action::Recv(len) => {
                    assert!(len > 0);
                    self.stalled = Some(len);
                    self.try_read();
                }
                Action::Send => {
                    self.written.extend_from_slice(self.hs.send_bytes());
                    self.hs.handle(Event::Sent);
                }
                Action::CancelIo => {
                    if self.stalled.take().is_some() {
                        self.hs.handle(Event::Aborted);
                    }
                }
                Action::Done(outcome) => self.outcomes.push(outcome),
            }
        }
    }

    fn try_read(&mut self) {
        let Some(len) = self.stalled else { return };
        if self.read + len > self.input.len() {
            return;
        }
        self.stalled = None;
        self.hs
            .recv_slot()
            .copy_from_slice(&self.input[self.read..self.read + len]);
        self.read += len;
        self.reads.push(len);
        self.hs.handle(Event::Received);
    }

    fn feed(&mut self, bytes: &[u8]) {
        self.input.extend_from_slice(bytes);
        self.try_read();
        self.run();
    }

    fn outcome(&mut self) -> Outcome {
        assert_eq!(self.outcomes.len(), 1, "{:?}", self.outcomes);
        self.outcomes.remove(0)
    }

    fn error(&mut self) -> HandshakeError {
        match self.outcome() {
            Outcome::Error(err) => err,
            outcome => panic!("expected an error, got {outcome:?}"),
        }
    }

    fn written_str(&self) -> &str {
        std::str::from_utf8(&self.written).unwrap()
    }
}

/// Builds the reply a correct server would send to the request in `written`.
fn reply_to(request: &[u8], protocol: &str) -> Vec<u8> {
    let end = header::find_terminator(request).unwrap();
    let fields = header::parse_request(&request[..end]).unwrap();
    let key = header::Headers::new(request, &fields)
        .get_str(Field::Key)
        .unwrap()
        .to_owned();
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         Sec-WebSocket-Protocol: {protocol}\r\n\
         \r\n",
        accept::derive_string(key)
    )
    .into_bytes()
}

mod server_tests {
    use super::*;

    #[test]
    fn test_accepts_rfc_request() {
        let input = rfc_request();
        let mut driver = Driver::server(Options::default(), &input);

        let Outcome::Ok(negotiated) = driver.outcome() else {
            panic!("handshake failed");
        };
        assert_eq!(negotiated.mode, Mode::Server);
        assert_eq!(negotiated.protocol, SpProtocol::Pair);
        assert_eq!(negotiated.peer, Some(SpProtocol::Pair));

        assert_eq!(
            driver.written_str(),
            format!(
                "HTTP/1.1 101 Switching Protocols\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {RFC_ACCEPT}\r\n\
                 Sec-WebSocket-Protocol: pair.sp.nanomsg.org\r\n\
                 \r\n"
            )
        );
        assert_eq!(
            driver.hs.response_code(),
            Some(ResponseCode::SwitchingProtocols)
        );
        assert_eq!(driver.timer, None);
        assert!(driver.hs.is_idle());
    }

    #[test]
    fn test_reads_never_pass_the_terminator() {
        let mut input = rfc_request();
        let len = input.len();
        input.extend_from_slice(b"\x00\x00\x00\x01first frame");
        let mut driver = Driver::server(Options::default(), &input);

        assert!(matches!(driver.outcome(), Outcome::Ok(_)));
        assert_eq!(driver.read, len);
        assert_eq!(driver.reads[0], MIN_REQUEST_SIZE);
        assert!(driver.reads[1..].iter().all(|&n| (1..=4).contains(&n)));
        assert_eq!(driver.hs.retries(), driver.reads.len() - 1);
    }

    #[test]
    fn test_headers_view_after_parse() {
        let input = rfc_request();
        let driver = Driver::server(Options::default(), &input);
        let headers = driver.hs.headers();
        assert_eq!(headers.get_str(Field::Uri), Some("/chat"));
        assert_eq!(headers.get_str(Field::Host), Some("server.example.com"));
    }

    #[test]
    fn test_peer_protocols() {
        let options = Options::default().with_protocol(SpProtocol::Rep);
        let input = request("req.sp.nanomsg.org", "13");
        let mut driver = Driver::server(options, &input);
        let Outcome::Ok(negotiated) = driver.outcome() else {
            panic!("handshake failed");
        };
        assert_eq!(negotiated.peer, Some(SpProtocol::Req));
        assert!(driver
            .written_str()
            .contains("Sec-WebSocket-Protocol: req.sp.nanomsg.org\r\n"));
    }

    #[test]
    fn test_incompatible_protocol() {
        let input = request("bus.sp.nanomsg.org", "13");
        let mut driver = Driver::server(Options::default(), &input);

        assert!(matches!(
            driver.error(),
            HandshakeError::IncompatibleProtocol {
                local: SpProtocol::Pair,
                peer: SpProtocol::Bus,
            }
        ));
        assert_eq!(
            driver.written_str(),
            "HTTP/1.1 400 Incompatible Socket Type\r\nConnection: close\r\n\r\n"
        );
        assert_eq!(
            driver.hs.response_code(),
            Some(ResponseCode::IncompatibleProtocol)
        );
    }

    #[test]
    fn test_unknown_protocol() {
        let input = request("chat.example.org", "13");
        let mut driver = Driver::server(Options::default(), &input);
        assert!(matches!(driver.error(), HandshakeError::UnknownProtocol));
        assert!(driver
            .written_str()
            .starts_with("HTTP/1.1 400 Unrecognized Socket Type\r\n"));
    }

    #[test]
    fn test_unsupported_version() {
        let input = request("pair.sp.nanomsg.org", "8");
        let mut driver = Driver::server(Options::default(), &input);
        assert!(matches!(
            driver.error(),
            HandshakeError::InvalidSecWebsocketVersion
        ));
        assert_eq!(
            driver.written_str(),
            "HTTP/1.1 426 Upgrade Required\r\nSec-WebSocket-Version: 13\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn test_missing_key() {
        let input = String::from_utf8(rfc_request())
            .unwrap()
            .replace(&format!("Sec-WebSocket-Key: {RFC_KEY}\r\n"), "");
        let mut driver = Driver::server(Options::default(), input.as_bytes());

        let err = driver.error();
        assert!(matches!(err, HandshakeError::MissingHeader("Sec-WebSocket-Key")));
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert!(driver.written_str().starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[test]
    fn test_missing_protocol() {
        let input = String::from_utf8(rfc_request())
            .unwrap()
            .replace("Sec-WebSocket-Protocol: pair.sp.nanomsg.org\r\n", "X-Padding: 0123456789\r\n");
        let mut driver = Driver::server(Options::default(), input.as_bytes());

        assert!(matches!(
            driver.error(),
            HandshakeError::MissingHeader("Sec-WebSocket-Protocol")
        ));
        assert!(driver
            .written_str()
            .starts_with("HTTP/1.1 400 Missing Scalability Protocol\r\n"));
    }

    #[test]
    fn test_bad_key() {
        let input = String::from_utf8(rfc_request())
            .unwrap()
            .replace(RFC_KEY, "c2hvcnQ=");
        let mut driver = Driver::server(Options::default(), input.as_bytes());
        assert!(matches!(driver.error(), HandshakeError::InvalidSecWebSocketKey));
    }

    #[test]
    fn test_fail_closed() {
        let options = Options::default().without_error_reply();
        let input = request("bus.sp.nanomsg.org", "13");
        let mut driver = Driver::server(options, &input);

        assert!(matches!(
            driver.error(),
            HandshakeError::IncompatibleProtocol { .. }
        ));
        assert!(driver.written.is_empty());
    }

    #[test]
    fn test_oversized_request() {
        let mut input = b"GET / HTTP/1.1\r\n".to_vec();
        while input.len() < 2 * MAX_HEADER_SIZE {
            input.extend_from_slice(b"X-Filler: 0123456789\r\n");
        }
        let mut driver = Driver::server(Options::default(), &input);

        let err = driver.error();
        assert!(matches!(err, HandshakeError::HeaderTooLarge));
        assert_eq!(err.kind(), ErrorKind::SizeLimitExceeded);
        assert_eq!(driver.read, MAX_HEADER_SIZE);
        assert!(driver
            .written_str()
            .starts_with("HTTP/1.1 400 Opening Handshake Too Long\r\n"));
    }

    #[test]
    fn test_body_after_request() {
        let mut input = b"GET / HTTP/1.1\r\nHost: a\r\n\r\n".to_vec();
        input.resize(MIN_REQUEST_SIZE, b'x');
        let mut driver = Driver::server(Options::default(), &input);

        assert!(matches!(driver.error(), HandshakeError::UnexpectedBody));
        assert!(driver
            .written_str()
            .starts_with("HTTP/1.1 400 Cannot Have Body\r\n"));
    }

    #[test]
    fn test_malformed_request_line() {
        let input = String::from_utf8(rfc_request())
            .unwrap()
            .replace("GET /chat HTTP/1.1", "POST /chat HTTP/1.1");
        let mut driver = Driver::server(Options::default(), input.as_bytes());
        assert!(matches!(
            driver.error(),
            HandshakeError::Parse(header::ParseError::RequestLine)
        ));
        assert!(driver.written_str().starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[test]
    fn test_request_arriving_in_pieces() {
        let input = rfc_request();
        let mut driver = Driver::server(Options::default(), &input[..100]);
        assert!(driver.outcomes.is_empty());
        assert_eq!(driver.hs.state(), State::AwaitingRequestHeaders);

        for chunk in input[100..].chunks(7) {
            driver.feed(chunk);
        }
        assert!(matches!(driver.outcome(), Outcome::Ok(_)));
    }

    #[test]
    fn test_io_failure_sends_nothing() {
        let mut hs = Handshake::new(Options::default());
        hs.start(Mode::Server, "", "").unwrap();
        assert!(matches!(hs.poll_action(), Some(Action::ArmTimer(..))));
        assert!(matches!(hs.poll_action(), Some(Action::Recv(MIN_REQUEST_SIZE))));

        hs.handle(Event::IoFailed(io::ErrorKind::ConnectionReset.into()));
        assert!(matches!(hs.poll_action(), Some(Action::CancelTimer)));
        let Some(Action::Done(Outcome::Error(err))) = hs.poll_action() else {
            panic!("expected an error");
        };
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert!(hs.poll_action().is_none());
        assert!(hs.send_bytes().is_empty());
    }
}

mod client_tests {
    use super::*;

    fn client(options: Options) -> Driver {
        let mut driver = Driver::new(options);
        driver.hs.start(Mode::Client, "/chat", "example.com").unwrap();
        driver.run();
        driver
    }

    #[test]
    fn test_request_and_reply() {
        let mut driver = client(Options::default().with_protocol(SpProtocol::Req));
        assert_eq!(driver.hs.state(), State::AwaitingReplyHeaders);
        assert!(driver.written_str().starts_with("GET /chat HTTP/1.1\r\n"));
        assert!(driver
            .written_str()
            .contains("Sec-WebSocket-Protocol: req.sp.nanomsg.org\r\n"));

        let reply = reply_to(&driver.written, "req.sp.nanomsg.org");
        driver.feed(&reply);

        let Outcome::Ok(negotiated) = driver.outcome() else {
            panic!("handshake failed");
        };
        assert_eq!(negotiated.mode, Mode::Client);
        assert_eq!(negotiated.protocol, SpProtocol::Req);
        assert_eq!(negotiated.peer, None);
        assert_eq!(driver.read, reply.len());
        assert_eq!(driver.reads[0], MIN_REPLY_SIZE);
        assert_eq!(driver.timer, None);
    }

    #[test]
    fn test_resource_with_space() {
        let mut driver = Driver::new(Options::default());
        driver.hs.start(Mode::Client, "/a b", "example.com").unwrap();
        driver.run();

        assert!(matches!(
            driver.error(),
            HandshakeError::InvalidHeaderValue("resource")
        ));
        assert!(driver.written.is_empty());
        assert_eq!(driver.timer, None);
    }

    #[test]
    fn test_reply_without_protocol() {
        let mut driver = client(Options::default());
        let reply = String::from_utf8(reply_to(&driver.written, "pair.sp.nanomsg.org"))
            .unwrap()
            .replace("Sec-WebSocket-Protocol: pair.sp.nanomsg.org\r\n", "");
        driver.feed(reply.as_bytes());
        assert!(matches!(driver.outcome(), Outcome::Ok(_)));
    }

    #[test]
    fn test_accept_mismatch() {
        let mut driver = client(Options::default());
        let reply = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {RFC_ACCEPT}\r\n\
             \r\n"
        );
        driver.feed(reply.as_bytes());
        assert!(matches!(driver.error(), HandshakeError::AcceptKeyMismatch));
        // clients never answer
        assert!(driver.written_str().starts_with("GET "));
    }

    #[test]
    fn test_missing_accept() {
        let mut driver = client(Options::default());
        driver.feed(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n");
        assert!(matches!(
            driver.error(),
            HandshakeError::MissingHeader("Sec-WebSocket-Accept")
        ));
    }

    #[test]
    fn test_rejected_by_server() {
        let mut driver = client(Options::default());
        driver.feed(b"HTTP/1.1 400 Incompatible Socket Type\r\nConnection: close\r\n\r\n");
        assert!(matches!(
            driver.error(),
            HandshakeError::InvalidStatusCode(400)
        ));
    }

    #[test]
    fn test_other_protocol_echoed() {
        let mut driver = client(Options::default());
        let reply = reply_to(&driver.written, "bus.sp.nanomsg.org");
        driver.feed(&reply);
        assert!(matches!(
            driver.error(),
            HandshakeError::IncompatibleProtocol {
                local: SpProtocol::Pair,
                peer: SpProtocol::Bus,
            }
        ));
    }

    #[test]
    fn test_request_too_large() {
        let mut driver = Driver::new(Options::default());
        let resource = "a".repeat(MAX_HEADER_SIZE);
        driver.hs.start(Mode::Client, &resource, "example.com").unwrap();
        driver.run();

        assert!(matches!(driver.error(), HandshakeError::MessageTooLarge));
        assert!(driver.written.is_empty());
        assert_eq!(driver.timer, None);
    }

    #[test]
    fn test_fresh_key_per_attempt() {
        let first = client(Options::default()).written;
        let second = client(Options::default()).written;
        assert_ne!(first, second);
    }
}

mod lifecycle_tests {
    use super::*;

    fn started_server() -> (Handshake, TimerId) {
        let mut hs = Handshake::new(Options::default().with_timeout(Duration::from_secs(1)));
        hs.start(Mode::Server, "", "").unwrap();
        let Some(Action::ArmTimer(timeout, timer)) = hs.poll_action() else {
            panic!("expected the timer to be armed first");
        };
        assert_eq!(timeout, Duration::from_secs(1));
        assert!(matches!(hs.poll_action(), Some(Action::Recv(MIN_REQUEST_SIZE))));
        (hs, timer)
    }

    fn drain(hs: &mut Handshake) -> Vec<Action> {
        std::iter::from_fn(|| hs.poll_action()).collect()
    }

    #[test]
    fn test_start_while_busy() {
        let (mut hs, _) = started_server();
        assert!(matches!(
            hs.start(Mode::Client, "/", "h"),
            Err(HandshakeError::NotIdle)
        ));
        assert!(matches!(hs.terminate(), Err(HandshakeError::NotIdle)));
        assert_eq!(hs.state(), State::AwaitingRequestHeaders);
    }

    #[test]
    fn test_stop_while_idle() {
        let mut hs = Handshake::new(Options::default());
        hs.stop();
        assert!(hs.is_idle());
        assert!(hs.poll_action().is_none());
        assert!(hs.terminate().is_ok());
    }

    #[test]
    fn test_stale_events_are_ignored() {
        let mut hs = Handshake::new(Options::default());
        hs.handle(Event::Received);
        hs.handle(Event::TimerExpired(TimerId(0)));
        assert!(hs.is_idle());
        assert!(hs.poll_action().is_none());
    }

    #[test]
    fn test_stop_during_read() {
        let (mut hs, timer) = started_server();
        hs.stop();
        assert_eq!(hs.state(), State::Stopping);

        let actions = drain(&mut hs);
        assert!(matches!(
            actions.as_slice(),
            [Action::CancelTimer, Action::CancelIo]
        ));

        // stop is idempotent and the timer may still fire
        hs.stop();
        hs.handle(Event::TimerExpired(timer));
        assert!(hs.poll_action().is_none());

        hs.handle(Event::Aborted);
        assert!(matches!(
            drain(&mut hs).as_slice(),
            [Action::Done(Outcome::Stopped)]
        ));
        assert!(hs.is_idle());
    }

    #[test]
    fn test_timeout_with_racing_completion() {
        let (mut hs, timer) = started_server();
        hs.handle(Event::TimerExpired(timer));
        assert_eq!(hs.state(), State::Stopping);
        assert!(matches!(drain(&mut hs).as_slice(), [Action::CancelIo]));

        // the read had already completed when it was canceled
        hs.handle(Event::Received);
        let actions = drain(&mut hs);
        assert!(matches!(
            actions.as_slice(),
            [Action::Done(Outcome::Error(HandshakeError::Timeout))]
        ));

        // a late completion after the outcome changes nothing
        hs.handle(Event::Aborted);
        assert!(hs.poll_action().is_none());
        assert!(hs.is_idle());
    }

    #[test]
    fn test_stop_wins_over_timeout() {
        let (mut hs, timer) = started_server();
        hs.handle(Event::TimerExpired(timer));
        hs.stop();
        hs.handle(Event::Aborted);

        let outcomes: Vec<_> = drain(&mut hs)
            .into_iter()
            .filter_map(|action| match action {
                Action::Done(outcome) => Some(outcome.status()),
                _ => None,
            })
            .collect();
        assert_eq!(outcomes, vec![Status::Stopped]);
    }

    #[test]
    fn test_stop_replaces_uncollected_outcome() {
        let (mut hs, _) = started_server();
        hs.handle(Event::IoFailed(io::ErrorKind::UnexpectedEof.into()));
        hs.stop();
        assert_eq!(hs.state(), State::Done(Status::Stopped));

        let actions = drain(&mut hs);
        assert!(matches!(
            actions.as_slice(),
            [Action::CancelTimer, Action::Done(Outcome::Stopped)]
        ));
    }

    #[test]
    fn test_done_until_collected() {
        let (mut hs, _) = started_server();
        hs.handle(Event::IoFailed(io::ErrorKind::UnexpectedEof.into()));
        assert_eq!(hs.state(), State::Done(Status::Error));
        assert!(matches!(
            hs.start(Mode::Server, "", ""),
            Err(HandshakeError::NotIdle)
        ));

        drain(&mut hs);
        assert!(hs.is_idle());
        assert!(hs.start(Mode::Server, "", "").is_ok());
    }

    #[test]
    fn test_reuse_after_success() {
        let input = rfc_request();
        let mut driver = Driver::server(Options::default(), &input);
        assert!(matches!(driver.outcome(), Outcome::Ok(_)));

        driver.input.clear();
        driver.read = 0;
        driver.written.clear();
        driver.input.extend_from_slice(&request("bus.sp.nanomsg.org", "13"));
        driver.hs.start(Mode::Server, "", "").unwrap();
        assert_eq!(driver.hs.retries(), 0);
        assert_eq!(driver.hs.response_code(), None);
        driver.run();

        assert!(matches!(
            driver.error(),
            HandshakeError::IncompatibleProtocol { .. }
        ));
    }

    #[test]
    fn test_stale_expiry_after_reuse() {
        let input = rfc_request();
        let mut driver = Driver::server(Options::default(), &input);
        assert!(matches!(driver.outcome(), Outcome::Ok(_)));
        let stale = driver.timer_id.unwrap();

        driver.input.clear();
        driver.read = 0;
        driver.written.clear();
        driver.hs.start(Mode::Server, "", "").unwrap();
        driver.run();
        assert_ne!(driver.timer_id, Some(stale));

        // the first attempt's timer fires after the session was restarted
        driver.hs.handle(Event::TimerExpired(stale));
        driver.run();
        assert!(driver.outcomes.is_empty());
        assert_eq!(driver.hs.state(), State::AwaitingRequestHeaders);

        driver.feed(&input);
        assert!(matches!(driver.outcome(), Outcome::Ok(_)));
    }

    #[test]
    fn test_current_expiry_after_reuse() {
        let input = rfc_request();
        let mut driver = Driver::server(Options::default(), &input);
        driver.outcome();

        driver.input.clear();
        driver.read = 0;
        driver.hs.start(Mode::Server, "", "").unwrap();
        driver.run();

        let timer = driver.timer_id.unwrap();
        driver.hs.handle(Event::TimerExpired(timer));
        driver.run();
        assert!(matches!(driver.error(), HandshakeError::Timeout));
    }

    #[test]
    fn test_terminate_clears_fields() {
        let input = rfc_request();
        let mut driver = Driver::server(Options::default(), &input);
        driver.outcome();
        assert!(driver.hs.headers().get(Field::Host).is_some());

        driver.hs.terminate().unwrap();
        assert!(driver.hs.headers().get(Field::Host).is_none());
        assert!(driver.hs.send_bytes().is_empty());
        assert_eq!(driver.hs.response_code(), None);
    }

    #[test]
    fn test_outcome_into_result() {
        assert!(matches!(
            Outcome::Stopped.into_result(),
            Err(HandshakeError::Stopped)
        ));
        assert_eq!(Outcome::Stopped.status(), Status::Stopped);
    }
}
