//! # Handshake session
//!
//! [`Handshake`] is the state machine negotiating one opening handshake at a
//! time. It performs no I/O itself: whoever drives it (the reactor) pulls
//! [`Action`]s with [`Handshake::poll_action`], carries them out on the socket and
//! the timer, and reports each completion back with [`Handshake::handle`].
//!
//! ```text
//!            start(Server)                           start(Client)
//!                 |                                        |
//!                 v                                        v
//!      AwaitingRequestHeaders                       SendingRequest
//!                 |                                        |
//!                 v                                        v
//!          SendingResponse                       AwaitingReplyHeaders
//!                 \                                       /
//!                  +-------> Done(Ok | Error | Stopped) <+
//!                                      |
//!                       poll_action() -> Action::Done
//!                                      v
//!                                    Idle
//! ```
//!
//! Any active state moves to `Stopping` when the owner calls [`Handshake::stop`]
//! or when the timer expires; the outstanding socket operation is canceled and
//! the outcome is emitted once its completion comes back.
//!
//! # Reading the header block
//!
//! A server first asks for [`MIN_REQUEST_SIZE`] bytes and a client for
//! [`MIN_REPLY_SIZE`]. While the blank line closing the header block has not been
//! seen, the session asks for exactly as many bytes as could complete it (one to
//! four, depending on how the buffer currently ends), counting each such read as
//! a retry. This never reads past the header block, so no byte belonging to the
//! next protocol layer is consumed, and the number of retries is bounded by the
//! 4096-byte receive buffer.
use std::{collections::VecDeque, fmt, io, time::Duration};

use crate::{
    accept::ACCEPT_KEY_LEN,
    builder::{ResponseCode, SendBuffer},
    header::{self, HeaderFields, Headers, MAX_HEADER_SIZE, TERMINATOR},
    HandshakeError, Options, Result, SpProtocol,
};

mod client;
mod server;

/// Bytes a server reads before looking for the end of the request.
pub const MIN_REQUEST_SIZE: usize = 150;

/// Bytes a client reads before looking for the end of the reply.
pub const MIN_REPLY_SIZE: usize = 16;

/// The role taken in the handshake.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Sends the request and validates the reply.
    Client,
    /// Validates the request and sends the reply.
    Server,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Kind of terminal outcome.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    /// The connection was upgraded.
    Ok,
    /// The handshake failed.
    Error,
    /// The owner stopped the handshake.
    Stopped,
}

/// Identifies one arming of the session timer.
///
/// Every attempt arms the timer under a new id, so an expiry left over from an
/// earlier attempt is told apart from the current one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Observable state of a [`Handshake`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// No attempt in progress.
    Idle,
    /// Server reading the client request.
    AwaitingRequestHeaders,
    /// Client reading the server reply.
    AwaitingReplyHeaders,
    /// Client writing its request.
    SendingRequest,
    /// Server writing its reply, successful or not.
    SendingResponse,
    /// Waiting for a canceled socket operation to complete.
    Stopping,
    /// The outcome is decided and waits to be collected with [`Handshake::poll_action`].
    Done(Status),
}

/// Parameters agreed on by a successful handshake.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Role this end took.
    pub mode: Mode,
    /// Scalability protocol of this end.
    pub protocol: SpProtocol,
    /// Scalability protocol advertised by the peer.
    ///
    /// Only a server learns it; a client sees its own protocol echoed back.
    pub peer: Option<SpProtocol>,
}

/// Terminal result of one handshake attempt.
#[derive(Debug)]
pub enum Outcome {
    /// The connection is upgraded and can be handed to the pipe.
    Ok(Negotiated),
    /// The handshake failed; the connection should be closed.
    Error(HandshakeError),
    /// The owner stopped the handshake.
    Stopped,
}

impl Outcome {
    pub fn status(&self) -> Status {
        match self {
            Self::Ok(_) => Status::Ok,
            Self::Error(_) => Status::Error,
            Self::Stopped => Status::Stopped,
        }
    }

    /// Converts the outcome into a `Result`, mapping a stop to [`HandshakeError::Stopped`].
    pub fn into_result(self) -> Result<Negotiated> {
        match self {
            Self::Ok(negotiated) => Ok(negotiated),
            Self::Error(err) => Err(err),
            Self::Stopped => Err(HandshakeError::Stopped),
        }
    }
}

/// Completion reported by the driver.
#[derive(Debug)]
pub enum Event {
    /// The slot returned by [`Handshake::recv_slot`] has been filled completely.
    Received,
    /// The bytes returned by [`Handshake::send_bytes`] have all been written.
    Sent,
    /// The outstanding read or write failed.
    IoFailed(io::Error),
    /// The outstanding read or write was canceled after [`Action::CancelIo`].
    Aborted,
    /// The timer armed by [`Action::ArmTimer`] with this id fired.
    TimerExpired(TimerId),
}

/// Work requested from the driver.
#[derive(Debug)]
pub enum Action {
    /// Arm the single-shot timer. Its expiry is reported with the same id.
    ArmTimer(Duration, TimerId),
    /// Disarm the timer. An expiry already in flight may still be delivered; it
    /// is ignored, even once the session has been restarted.
    CancelTimer,
    /// Read exactly this many bytes into [`Handshake::recv_slot`], then report
    /// [`Event::Received`].
    Recv(usize),
    /// Write [`Handshake::send_bytes`] completely, then report [`Event::Sent`].
    Send,
    /// Cancel the outstanding read or write. Exactly one completion must still be
    /// reported for it: its natural one if it already finished, [`Event::Aborted`]
    /// otherwise.
    CancelIo,
    /// The attempt is over. Collecting this action returns the session to idle.
    Done(Outcome),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Pending {
    Recv,
    Send,
}

/// Why the session is in `Stopping`.
#[derive(Debug)]
enum Drain {
    Stop,
    Fail(HandshakeError),
}

/// The opening handshake state machine.
///
/// One value negotiates one connection attempt at a time and may be reused once
/// it is idle again. See the [module documentation](self) for the protocol
/// between the session and its driver.
pub struct Handshake {
    options: Options,
    mode: Mode,
    state: State,
    pending: Option<Pending>,
    timer_armed: bool,
    timer_id: TimerId,
    drain: Option<Drain>,

    // receive side
    retries: usize,
    recv_pos: usize,
    recv_len: usize,
    recv_buf: Box<[u8; MAX_HEADER_SIZE]>,
    fields: HeaderFields,

    // negotiation
    expected_accept: [u8; ACCEPT_KEY_LEN],
    peer: Option<SpProtocol>,
    response_code: Option<ResponseCode>,
    failure: Option<HandshakeError>,

    send: SendBuffer,
    actions: VecDeque<Action>,
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("pending", &self.pending)
            .field("retries", &self.retries)
            .field("received", &self.recv_pos)
            .field("response_code", &self.response_code)
            .finish()
    }
}

impl Handshake {
    /// Creates an idle session.
    pub fn new(options: Options) -> Self {
        Self {
            options,
            mode: Mode::Server,
            state: State::Idle,
            pending: None,
            timer_armed: false,
            timer_id: TimerId(0),
            drain: None,
            retries: 0,
            recv_pos: 0,
            recv_len: 0,
            recv_buf: Box::new([0; MAX_HEADER_SIZE]),
            fields: HeaderFields::default(),
            expected_accept: [0; ACCEPT_KEY_LEN],
            peer: None,
            response_code: None,
            failure: None,
            send: SendBuffer::new(),
            actions: VecDeque::new(),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Role of the current or last attempt.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    /// Continuation reads issued while looking for the end of the header block.
    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Status line chosen by a server for the current or last attempt.
    pub fn response_code(&self) -> Option<ResponseCode> {
        self.response_code
    }

    /// Fields parsed from the peer's header block, resolved against the receive buffer.
    ///
    /// Empty until a complete block has been parsed; cleared by the next
    /// [`start`](Self::start) or by [`terminate`](Self::terminate).
    pub fn headers(&self) -> Headers<'_> {
        Headers::new(&self.recv_buf[..self.recv_pos], &self.fields)
    }

    /// Region the driver must fill for the outstanding [`Action::Recv`].
    ///
    /// Empty when no read is outstanding.
    pub fn recv_slot(&mut self) -> &mut [u8] {
        let end = self.recv_pos + self.recv_len;
        &mut self.recv_buf[self.recv_pos..end]
    }

    /// Bytes the driver must write for the outstanding [`Action::Send`].
    pub fn send_bytes(&self) -> &[u8] {
        self.send.as_bytes()
    }

    /// Next action requested from the driver.
    ///
    /// Returning [`Action::Done`] hands the outcome over and makes the session idle.
    pub fn poll_action(&mut self) -> Option<Action> {
        let action = self.actions.pop_front()?;
        if let Action::Done(_) = action {
            self.state = State::Idle;
        }
        Some(action)
    }

    /// Begins an attempt in `mode`.
    ///
    /// `resource` and `host` are only used by clients, to build the request line
    /// and the `Host` header.
    ///
    /// # Errors
    /// Returns [`HandshakeError::NotIdle`] if a previous attempt is still running
    /// or its outcome has not been collected. Every other failure is reported
    /// through [`Action::Done`].
    pub fn start(&mut self, mode: Mode, resource: &str, host: &str) -> Result<()> {
        if self.state != State::Idle {
            return Err(HandshakeError::NotIdle);
        }

        self.reset();
        self.mode = mode;

        #[cfg(feature = "logging")]
        log::debug!(
            "{} handshake starting (protocol={}, timeout={:?})",
            mode,
            self.options.protocol,
            self.options.timeout
        );

        self.timer_id = TimerId(self.timer_id.0.wrapping_add(1));
        self.timer_armed = true;
        self.actions
            .push_back(Action::ArmTimer(self.options.timeout, self.timer_id));

        match mode {
            Mode::Server => {
                self.state = State::AwaitingRequestHeaders;
                self.recv(MIN_REQUEST_SIZE);
            }
            Mode::Client => client::send_request(self, resource, host),
        }

        Ok(())
    }

    /// Requests the attempt to end with [`Outcome::Stopped`].
    ///
    /// Does nothing when idle. Otherwise the timer is canceled, the outstanding
    /// socket operation is canceled and the outcome is emitted when that operation
    /// reports back. A stop replaces any outcome that has not been collected yet,
    /// including a timeout being drained.
    pub fn stop(&mut self) {
        match self.state {
            State::Idle | State::Done(Status::Stopped) => {}
            State::Done(_) => {
                for action in self.actions.iter_mut() {
                    if let Action::Done(outcome) = action {
                        *outcome = Outcome::Stopped;
                    }
                }
                self.state = State::Done(Status::Stopped);
            }
            State::Stopping => self.drain = Some(Drain::Stop),
            _ => self.abort(Drain::Stop),
        }
    }

    /// Clears every buffer and field. Only valid while idle.
    pub fn terminate(&mut self) -> Result<()> {
        if self.state != State::Idle {
            return Err(HandshakeError::NotIdle);
        }
        self.reset();
        self.recv_buf.fill(0);
        self.actions.clear();
        Ok(())
    }

    /// Delivers one completion event.
    ///
    /// Events arriving while idle, or after the outcome is decided, are ignored.
    /// So are expiries of a timer other than the one last armed.
    pub fn handle(&mut self, event: Event) {
        if let Event::TimerExpired(id) = event {
            if id != self.timer_id {
                #[cfg(feature = "logging")]
                log::debug!("ignoring expiry of stale timer {:?}", id);
                return;
            }
        }

        match self.state {
            State::Idle | State::Done(_) => {
                #[cfg(feature = "logging")]
                log::debug!("ignoring {:?} in {:?}", event, self.state);
                return;
            }
            State::Stopping => return self.on_drained(event),
            _ => {}
        }

        match event {
            Event::TimerExpired(_) => {
                self.timer_armed = false;
                self.abort(Drain::Fail(HandshakeError::Timeout));
            }
            Event::IoFailed(err) => {
                self.pending = None;
                self.finish(Outcome::Error(err.into()));
            }
            Event::Aborted => {
                // nothing was canceled, the driver dropped the operation on its own
                self.pending = None;
                self.finish(Outcome::Error(io::Error::from(io::ErrorKind::Interrupted).into()));
            }
            Event::Received if self.pending == Some(Pending::Recv) => self.on_received(),
            Event::Sent if self.pending == Some(Pending::Send) => self.on_sent(),
            #[allow(unused_variables)]
            event => {
                #[cfg(feature = "logging")]
                log::warn!("unexpected {:?} in {:?}", event, self.state);
            }
        }
    }

    fn reset(&mut self) {
        self.pending = None;
        self.timer_armed = false;
        self.drain = None;
        self.retries = 0;
        self.recv_pos = 0;
        self.recv_len = 0;
        self.fields.clear();
        self.expected_accept = [0; ACCEPT_KEY_LEN];
        self.peer = None;
        self.response_code = None;
        self.failure = None;
        self.send.clear();
    }

    fn recv(&mut self, len: usize) {
        self.pending = Some(Pending::Recv);
        self.recv_len = len;
        self.actions.push_back(Action::Recv(len));
    }

    fn send_message(&mut self) {
        self.pending = Some(Pending::Send);
        self.actions.push_back(Action::Send);
    }

    fn cancel_timer(&mut self) {
        if self.timer_armed {
            self.timer_armed = false;
            self.actions.push_back(Action::CancelTimer);
        }
    }

    /// Cancels whatever is outstanding and waits for it to report back.
    fn abort(&mut self, drain: Drain) {
        self.cancel_timer();
        if self.pending.is_none() {
            return self.finish(drain.into_outcome());
        }

        #[cfg(feature = "logging")]
        log::debug!("{} handshake stopping: {:?}", self.mode, drain);

        self.state = State::Stopping;
        self.drain = Some(drain);
        self.actions.push_back(Action::CancelIo);
    }

    fn on_drained(&mut self, event: Event) {
        if let Event::TimerExpired(_) = event {
            // the timer was canceled on the way in
            self.timer_armed = false;
            return;
        }

        self.pending = None;
        let drain = self.drain.take().unwrap_or(Drain::Stop);
        self.finish(drain.into_outcome());
    }

    fn on_received(&mut self) {
        self.pending = None;

        // the terminator may straddle the previous read
        let scan_from = self.recv_pos.saturating_sub(TERMINATOR.len() - 1);
        self.recv_pos += self.recv_len;
        self.recv_len = 0;

        let end = header::find_terminator(&self.recv_buf[scan_from..self.recv_pos])
            .map(|end| scan_from + end);

        match end {
            Some(end) if end < self.recv_pos => self.reject(HandshakeError::UnexpectedBody),
            Some(_) => match self.mode {
                Mode::Server => server::on_request(self),
                Mode::Client => client::on_reply(self),
            },
            None if self.recv_pos >= MAX_HEADER_SIZE => {
                self.reject(HandshakeError::HeaderTooLarge)
            }
            None => {
                let missing = header::missing_terminator_bytes(&self.recv_buf[..self.recv_pos])
                    .min(MAX_HEADER_SIZE - self.recv_pos);
                self.retries += 1;
                self.recv(missing);
            }
        }
    }

    fn on_sent(&mut self) {
        self.pending = None;
        match self.state {
            State::SendingRequest => {
                self.state = State::AwaitingReplyHeaders;
                self.recv(MIN_REPLY_SIZE);
            }
            State::SendingResponse => match self.failure.take() {
                Some(err) => self.finish(Outcome::Error(err)),
                None => {
                    let negotiated = self.negotiated();
                    self.finish(Outcome::Ok(negotiated))
                }
            },
            _ => {}
        }
    }

    /// Fails the attempt, answering first when this end is a server configured to.
    fn reject(&mut self, err: HandshakeError) {
        #[cfg(feature = "logging")]
        log::debug!("{} handshake rejected: {}", self.mode, err);

        if self.mode == Mode::Server && self.options.reply_on_error {
            server::send_rejection(self, err);
        } else {
            self.finish(Outcome::Error(err));
        }
    }

    fn negotiated(&self) -> Negotiated {
        Negotiated {
            mode: self.mode,
            protocol: self.options.protocol,
            peer: self.peer,
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        self.cancel_timer();
        self.pending = None;
        self.drain = None;

        #[cfg(feature = "logging")]
        match &outcome {
            Outcome::Error(err) => log::warn!("{} handshake failed: {}", self.mode, err),
            outcome => log::debug!("{} handshake done: {:?}", self.mode, outcome),
        }

        self.state = State::Done(outcome.status());
        self.actions.push_back(Action::Done(outcome));
    }
}

impl Drain {
    fn into_outcome(self) -> Outcome {
        match self {
            Self::Stop => Outcome::Stopped,
            Self::Fail(err) => Outcome::Error(err),
        }
    }
}

#[cfg(test)]
mod tests;
