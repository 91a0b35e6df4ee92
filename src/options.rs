use std::time::Duration;

use crate::SpProtocol;

/// Timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration options for an opening handshake.
///
/// `Options` is handed to a [`Handshake`](crate::Handshake) when it is created and
/// applies to every attempt started on it.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use spws::{Options, SpProtocol};
///
/// let options = Options::default()
///     .with_protocol(SpProtocol::Rep)
///     .with_timeout(Duration::from_secs(2))
///     .without_error_reply();
/// assert_eq!(options.protocol, SpProtocol::Rep);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Scalability protocol of the local socket.
    ///
    /// A client advertises it in `Sec-WebSocket-Protocol`; a server only accepts
    /// clients whose advertised protocol is a peer of it.
    ///
    /// Default: [`SpProtocol::Pair`]
    pub protocol: SpProtocol,

    /// Time allowed for the whole exchange, from `start` to the terminal outcome.
    ///
    /// Default: [`DEFAULT_TIMEOUT`] (5 seconds)
    pub timeout: Duration,

    /// Whether a server answers a rejected request with an HTTP error before
    /// failing.
    ///
    /// When `false` the server fails closed: the request is dropped without an
    /// answer. Clients never answer.
    ///
    /// Default: `true`
    pub reply_on_error: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            protocol: SpProtocol::default(),
            timeout: DEFAULT_TIMEOUT,
            reply_on_error: true,
        }
    }
}

impl Options {
    /// Sets the scalability protocol of the local socket.
    pub fn with_protocol(self, protocol: SpProtocol) -> Self {
        Self { protocol, ..self }
    }

    /// Sets the handshake timeout.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Makes servers fail closed on rejected requests, without an error answer.
    pub fn without_error_reply(self) -> Self {
        Self {
            reply_on_error: false,
            ..self
        }
    }
}
