//! # Tokio driver
//!
//! [`HandshakeFut`] runs a [`Handshake`] over any `AsyncRead + AsyncWrite` stream:
//! it performs the reads and writes the session asks for, owns the timer, and
//! resolves to an [`Upgraded`] stream once the outcome is known.
use std::{
    future::Future,
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use futures::task::AtomicWaker;
use pin_project::pin_project;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    time::Sleep,
};
use url::Url;

use crate::{
    Action, Event, Handshake, HandshakeError, Mode, Negotiated, Options, Result, TimerId,
};

/// A stream whose opening handshake completed.
#[derive(Debug)]
pub struct Upgraded<S> {
    stream: S,
    negotiated: Negotiated,
}

impl<S> Upgraded<S> {
    /// Parameters agreed on during the handshake.
    pub fn negotiated(&self) -> &Negotiated {
        &self.negotiated
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Returns the stream, positioned right after the handshake.
    pub fn into_inner(self) -> S {
        self.stream
    }

    pub fn into_parts(self) -> (S, Negotiated) {
        (self.stream, self.negotiated)
    }
}

/// Stops a running [`HandshakeFut`] from another task.
///
/// The future then resolves to [`HandshakeError::Stopped`].
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopState>,
}

#[derive(Debug, Default)]
struct StopState {
    stopped: AtomicBool,
    waker: AtomicWaker,
}

impl StopHandle {
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.waker.wake();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    fn register(&self, cx: &Context<'_>) {
        self.inner.waker.register(cx.waker());
    }
}

/// Socket operation in flight.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Io {
    Idle,
    Reading { filled: usize },
    Writing { written: usize },
    Flushing,
}

/// Future negotiating the opening handshake on a stream.
///
/// Created by [`connect`], [`connect_url`] and [`accept`], or directly with
/// [`HandshakeFut::new`].
#[pin_project]
pub struct HandshakeFut<S> {
    stream: Option<S>,
    handshake: Handshake,
    io: Io,
    #[pin]
    timer: Option<Sleep>,
    timer_id: Option<TimerId>,
    stop: StopHandle,
    stop_delivered: bool,
    failed: Option<HandshakeError>,
}

impl<S> HandshakeFut<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Starts a handshake in `mode` over `stream`.
    ///
    /// `resource` and `host` are only used in [`Mode::Client`].
    pub fn new(stream: S, mode: Mode, resource: &str, host: &str, options: Options) -> Self {
        let mut handshake = Handshake::new(options);
        let failed = handshake.start(mode, resource, host).err();

        Self {
            stream: Some(stream),
            handshake,
            io: Io::Idle,
            timer: None,
            timer_id: None,
            stop: StopHandle::default(),
            stop_delivered: false,
            failed,
        }
    }

    /// Returns a handle able to stop this handshake.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// The session being driven.
    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }
}

impl<S> Future for HandshakeFut<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Output = Result<Upgraded<S>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        if let Some(err) = this.failed.take() {
            return Poll::Ready(Err(err));
        }

        loop {
            this.stop.register(cx);
            if !*this.stop_delivered && this.stop.is_stopped() {
                *this.stop_delivered = true;
                this.handshake.stop();
            }

            while let Some(action) = this.handshake.poll_action() {
                match action {
                    Action::ArmTimer(timeout, id) => {
                        this.timer.set(Some(tokio::time::sleep(timeout)));
                        *this.timer_id = Some(id);
                    }
                    Action::CancelTimer => {
                        this.timer.set(None);
                        *this.timer_id = None;
                    }
                    Action::Recv(_) => *this.io = Io::Reading { filled: 0 },
                    Action::Send => *this.io = Io::Writing { written: 0 },
                    Action::CancelIo => {
                        // operations only progress inside poll, so none is half done here
                        if *this.io != Io::Idle {
                            *this.io = Io::Idle;
                            this.handshake.handle(Event::Aborted);
                        }
                    }
                    Action::Done(outcome) => {
                        let Some(stream) = this.stream.take() else {
                            return Poll::Ready(Err(HandshakeError::NotIdle));
                        };
                        let upgraded = outcome
                            .into_result()
                            .map(|negotiated| Upgraded { stream, negotiated });
                        return Poll::Ready(upgraded);
                    }
                }
            }

            if let Some(timer) = this.timer.as_mut().as_pin_mut() {
                if timer.poll(cx).is_ready() {
                    this.timer.set(None);
                    if let Some(id) = this.timer_id.take() {
                        this.handshake.handle(Event::TimerExpired(id));
                    }
                    continue;
                }
            }

            let Some(stream) = this.stream.as_mut() else {
                // the stream was handed out with the outcome
                return Poll::Ready(Err(HandshakeError::NotIdle));
            };
            match poll_io(this.io, stream, this.handshake, cx) {
                Poll::Ready(event) => this.handshake.handle(event),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Advances the operation in flight until it completes or would block.
fn poll_io<S>(
    io: &mut Io,
    stream: &mut S,
    handshake: &mut Handshake,
    cx: &mut Context<'_>,
) -> Poll<Event>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match *io {
            Io::Idle => return Poll::Pending,
            Io::Reading { filled } => {
                let slot = handshake.recv_slot();
                if filled == slot.len() {
                    *io = Io::Idle;
                    return Poll::Ready(Event::Received);
                }

                let mut buf = ReadBuf::new(&mut slot[filled..]);
                match Pin::new(&mut *stream).poll_read(cx, &mut buf) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Err(err)) => {
                        *io = Io::Idle;
                        return Poll::Ready(Event::IoFailed(err));
                    }
                    Poll::Ready(Ok(())) if buf.filled().is_empty() => {
                        #[cfg(feature = "logging")]
                        log::debug!("peer closed the stream during the handshake");

                        *io = Io::Idle;
                        return Poll::Ready(Event::IoFailed(io::ErrorKind::UnexpectedEof.into()));
                    }
                    Poll::Ready(Ok(())) => {
                        *io = Io::Reading {
                            filled: filled + buf.filled().len(),
                        };
                    }
                }
            }
            Io::Writing { written } => {
                let bytes = handshake.send_bytes();
                if written == bytes.len() {
                    *io = Io::Flushing;
                    continue;
                }

                match Pin::new(&mut *stream).poll_write(cx, &bytes[written..]) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Err(err)) => {
                        *io = Io::Idle;
                        return Poll::Ready(Event::IoFailed(err));
                    }
                    Poll::Ready(Ok(0)) => {
                        *io = Io::Idle;
                        return Poll::Ready(Event::IoFailed(io::ErrorKind::WriteZero.into()));
                    }
                    Poll::Ready(Ok(n)) => {
                        *io = Io::Writing {
                            written: written + n,
                        }
                    }
                }
            }
            Io::Flushing => {
                let result = match Pin::new(&mut *stream).poll_flush(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(result) => result,
                };
                *io = Io::Idle;
                return Poll::Ready(match result {
                    Ok(()) => Event::Sent,
                    Err(err) => Event::IoFailed(err),
                });
            }
        }
    }
}

/// Performs the client side of the handshake for `resource` on `host`.
///
/// # Example
/// ```rust,no_run
/// use tokio::net::TcpStream;
/// use spws::{Options, SpProtocol};
///
/// # async fn run() -> spws::Result<()> {
/// let stream = TcpStream::connect("127.0.0.1:5555").await?;
/// let options = Options::default().with_protocol(SpProtocol::Sub);
/// let upgraded = spws::connect(stream, "/feed", "127.0.0.1:5555", options).await?;
/// # Ok(())
/// # }
/// ```
pub fn connect<S>(stream: S, resource: &str, host: &str, options: Options) -> HandshakeFut<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    HandshakeFut::new(stream, Mode::Client, resource, host, options)
}

/// Performs the client side of the handshake for a `ws://` URL.
///
/// The resource is the URL path and query, the host is the URL authority.
pub fn connect_url<S>(stream: S, url: &str, options: Options) -> Result<HandshakeFut<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let url = Url::parse(url)?;
    let (resource, host) = url_target(&url)?;
    Ok(connect(stream, &resource, &host, options))
}

/// Performs the server side of the handshake.
pub fn accept<S>(stream: S, options: Options) -> HandshakeFut<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    HandshakeFut::new(stream, Mode::Server, "", "", options)
}

/// Splits a `ws://` URL into the request target and the `Host` value.
fn url_target(url: &Url) -> Result<(String, String)> {
    if url.scheme() != "ws" {
        return Err(HandshakeError::InvalidHttpScheme);
    }

    let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };

    let resource = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_owned(),
    };

    Ok((resource, host))
}
