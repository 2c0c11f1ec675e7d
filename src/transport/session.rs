//! # Session
//!
//! One TCP connection slot: a reusable state machine that owns at most one socket at
//! a time.
//!
//! ## Lifecycle
//! ```text
//! Inactive -> Activating -> Active -> Closing -> Inactive
//! ```
//! Sessions are created once (by a channel's session factory or
//! [`crate::engine::Engine::new_session`]) and then activated, closed and
//! re-activated any number of times. The id never changes and is never reused.
//!
//! ## I/O Model
//! Activation splits the socket and spawns one reader task and one writer task on
//! the engine's runtime. The reader extracts complete frames with the session's
//! [`FrameValidator`], copies each one and posts it to the dispatch pool. Sends are
//! queued on an unbounded channel drained by the writer; send-completion callbacks
//! are posted to the dispatch pool once the bytes are fully written.
//!
//! Every user-visible event (accept, connect, receive, send completion, close) runs
//! on the dispatch pool. The accept/connect event is queued before the reader starts,
//! so it is always observed before the first receive.
//!
//! ## Close
//! Closing is idempotent and happens in this order: socket shutdown, removal from
//! the channel's active set, cancellation of pending response waits plus a queued
//! close event, receive-buffer reset. A close raised by the tasks of an earlier
//! activation is ignored.

use crate::config::SessionConfig;
use crate::core::buffer::{ByteBuffer, WireBuffer};
use crate::core::packet::FrameValidator;
use crate::error::{constants, CloseReason, ProtocolError, Result};
use crate::protocol::awaitable::AwaitableRequest;
use crate::protocol::correlator::ResponseCorrelator;
use crate::protocol::dispatcher::PacketDispatcher;
use crate::transport::channel::{Channel, ChannelInner};
use crate::transport::receive::ReceiveBuffer;
use crate::utils::metrics::Metrics;
use crate::utils::timeout::with_timeout_error;
use crate::utils::worker::Workers;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a session needs from its engine.
#[derive(Clone)]
pub struct IoContext {
    pub handle: Handle,
    pub workers: Workers,
    pub metrics: Arc<Metrics>,
    pub settings: SessionConfig,
}

impl IoContext {
    pub fn new(
        handle: Handle,
        workers: Workers,
        metrics: Arc<Metrics>,
        settings: SessionConfig,
    ) -> Self {
        Self {
            handle,
            workers,
            metrics,
            settings,
        }
    }

    /// Run `job` on the dispatch pool, logging if the pool is gone.
    pub(crate) fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(e) = self.workers.dispatch(job) {
            debug!(error = %e, "Dropped event, dispatch pool unavailable");
        }
    }
}

pub type AcceptHandler = Arc<dyn Fn(&Session) + Send + Sync>;
pub type ConnectHandler = Arc<dyn Fn(&Session, bool) + Send + Sync>;
pub type CloseHandler = Arc<dyn Fn(&Session, CloseReason) + Send + Sync>;
pub type ReceiveHandler = Arc<dyn Fn(&Session, ByteBuffer) + Send + Sync>;
pub type SendCallback = Box<dyn FnOnce(&Session, Bytes) + Send>;

#[derive(Default, Clone)]
struct Handlers {
    accept: Option<AcceptHandler>,
    connect: Option<ConnectHandler>,
    close: Option<CloseHandler>,
    receive: Option<ReceiveHandler>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Inactive,
    Activating,
    Active,
    Closing,
}

#[derive(Debug, Clone, Copy)]
enum Origin {
    Accepted,
    Connected,
}

struct Outbound {
    bytes: Bytes,
    on_sent: Option<SendCallback>,
}

struct Io {
    outbound: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
    generation: u64,
}

struct State {
    status: SessionStatus,
    io: Option<Io>,
    generation: u64,
    peer: Option<SocketAddr>,
    local: Option<SocketAddr>,
    receive: Option<ReceiveBuffer>,
}

struct SessionInner {
    id: u64,
    ctx: IoContext,
    state: Mutex<State>,
    handlers: RwLock<Handlers>,
    validator: RwLock<Option<FrameValidator>>,
    correlator: ResponseCorrelator,
    dispatcher: PacketDispatcher,
    channel: RwLock<Weak<ChannelInner>>,
}

/// Cloneable handle to a pooled connection slot.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("status", &state.status)
            .field("peer", &state.peer)
            .finish()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Session {}

impl Session {
    /// New inactive session. It cannot be activated until a validator is set.
    pub fn new(ctx: IoContext) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                ctx,
                state: Mutex::new(State {
                    status: SessionStatus::Inactive,
                    io: None,
                    generation: 0,
                    peer: None,
                    local: None,
                    receive: None,
                }),
                handlers: RwLock::new(Handlers::default()),
                validator: RwLock::new(None),
                correlator: ResponseCorrelator::new(),
                dispatcher: PacketDispatcher::new(),
                channel: RwLock::new(Weak::new()),
            }),
        }
    }

    pub fn with_validator(ctx: IoContext, validator: FrameValidator) -> Self {
        let session = Self::new(ctx);
        session.set_validator(validator);
        session
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().status
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().io.is_some()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.state.lock().peer
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.state.lock().local
    }

    pub fn context(&self) -> &IoContext {
        &self.inner.ctx
    }

    pub fn set_validator(&self, validator: FrameValidator) {
        *self.inner.validator.write() = Some(validator);
    }

    pub fn on_accept<F>(&self, handler: F)
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.inner.handlers.write().accept = Some(Arc::new(handler));
    }

    /// Handler for outbound connect results; `true` on success.
    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn(&Session, bool) + Send + Sync + 'static,
    {
        self.inner.handlers.write().connect = Some(Arc::new(handler));
    }

    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn(&Session, CloseReason) + Send + Sync + 'static,
    {
        self.inner.handlers.write().close = Some(Arc::new(handler));
    }

    /// Handler for frames not taken by a response wait or a dispatcher handler.
    pub fn on_receive<F>(&self, handler: F)
    where
        F: Fn(&Session, ByteBuffer) + Send + Sync + 'static,
    {
        self.inner.handlers.write().receive = Some(Arc::new(handler));
    }

    pub fn dispatcher(&self) -> &PacketDispatcher {
        &self.inner.dispatcher
    }

    pub fn correlator(&self) -> &ResponseCorrelator {
        &self.inner.correlator
    }

    /// Request/response helper using the configured response timeout.
    pub fn awaitable(&self) -> AwaitableRequest {
        AwaitableRequest::new(self.clone(), self.inner.ctx.settings.response_timeout)
    }

    /// The channel this session is pooled in, if any.
    pub fn channel(&self) -> Option<Channel> {
        self.inner.channel.read().upgrade().map(Channel::from_inner)
    }

    pub(crate) fn bind_channel(&self, channel: Weak<ChannelInner>) {
        *self.inner.channel.write() = channel;
    }

    /// Activate on an accepted socket.
    pub fn attach(&self, stream: TcpStream) -> Result<()> {
        self.activate(stream, Origin::Accepted)
    }

    /// Connect to `addr` within the configured connect timeout and activate.
    #[instrument(skip(self), fields(session_id = %self.id()))]
    pub async fn connect(&self, addr: SocketAddr) -> Result<()> {
        if self.inner.validator.read().is_none() {
            return Err(ProtocolError::InvalidArgument(
                constants::ERR_VALIDATOR_REQUIRED.to_string(),
            ));
        }
        {
            let mut state = self.inner.state.lock();
            if state.status != SessionStatus::Inactive || state.io.is_some() {
                return Err(ProtocolError::ActivatedSession);
            }
            state.status = SessionStatus::Activating;
        }

        let timeout = self.inner.ctx.settings.connect_timeout;
        let dial = async {
            TcpStream::connect(addr)
                .await
                .map_err(|e| ProtocolError::ConnectionFailed(format!("{addr}: {e}")))
        };
        let connected = match with_timeout_error(dial, timeout).await {
            Ok(stream) => self.activate(stream, Origin::Connected),
            Err(ProtocolError::Timeout) => Err(ProtocolError::ConnectionFailed(format!(
                "{addr}: timed out after {}ms",
                timeout.as_millis()
            ))),
            Err(e) => Err(e),
        };

        if let Err(e) = &connected {
            {
                let mut state = self.inner.state.lock();
                if state.io.is_none() {
                    state.status = SessionStatus::Inactive;
                }
            }
            if let Some(channel) = self.channel() {
                channel.deactivate(self);
            }
            self.inner.ctx.metrics.connect_failed();
            warn!(address = %addr, error = %e, "Connect failed");
            if let Some(handler) = self.inner.handlers.read().connect.clone() {
                let session = self.clone();
                self.inner.ctx.post(move || handler(&session, false));
            }
        }
        connected
    }

    /// Connect in the background and report the outcome on the dispatch pool.
    pub fn start_connect<F>(&self, addr: SocketAddr, on_result: F)
    where
        F: FnOnce(&Session, Result<()>) + Send + 'static,
    {
        let session = self.clone();
        self.inner.ctx.handle.spawn(async move {
            let result = session.connect(addr).await;
            let ctx = session.inner.ctx.clone();
            ctx.post(move || on_result(&session, result));
        });
    }

    fn activate(&self, stream: TcpStream, origin: Origin) -> Result<()> {
        let validator = self.inner.validator.read().clone().ok_or_else(|| {
            ProtocolError::InvalidArgument(constants::ERR_VALIDATOR_REQUIRED.to_string())
        })?;

        let _ = stream.set_nodelay(true);
        let peer = stream.peer_addr().ok();
        let local = stream.local_addr().ok();
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let (generation, buffer) = {
            let mut state = self.inner.state.lock();
            if state.io.is_some() {
                return Err(ProtocolError::ActivatedSession);
            }
            state.generation += 1;
            state.io = Some(Io {
                outbound: tx,
                cancel: cancel.clone(),
                generation: state.generation,
            });
            state.status = SessionStatus::Active;
            state.peer = peer;
            state.local = local;
            let buffer = state.receive.take().unwrap_or_else(|| {
                ReceiveBuffer::new(self.inner.ctx.settings.receive_buffer_size)
            });
            (state.generation, buffer)
        };

        let ctx = &self.inner.ctx;
        let handlers = self.inner.handlers.read().clone();
        let session = self.clone();
        match origin {
            Origin::Accepted => {
                ctx.metrics.session_accepted();
                if let Some(handler) = handlers.accept {
                    ctx.post(move || handler(&session));
                }
            }
            Origin::Connected => {
                ctx.metrics.session_connected();
                if let Some(handler) = handlers.connect {
                    ctx.post(move || handler(&session, true));
                }
            }
        }
        debug!(session_id = self.inner.id, peer = ?peer, origin = ?origin, "Session activated");

        ctx.handle.spawn(read_loop(
            self.clone(),
            reader,
            buffer,
            validator,
            cancel.clone(),
            generation,
        ));
        ctx.handle
            .spawn(write_loop(self.clone(), writer, rx, cancel, generation));
        Ok(())
    }

    /// Close with [`CloseReason::ClosedByUser`]. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        self.close_with(CloseReason::ClosedByUser)
    }

    pub fn close_with(&self, reason: CloseReason) -> bool {
        self.close_generation(None, reason)
    }

    fn close_generation(&self, generation: Option<u64>, reason: CloseReason) -> bool {
        let io = {
            let mut state = self.inner.state.lock();
            match &state.io {
                Some(io) if generation.map_or(true, |g| g == io.generation) => {}
                _ => return false,
            }
            state.status = SessionStatus::Closing;
            state.io.take()
        };
        let Some(io) = io else {
            return false;
        };

        io.cancel.cancel();

        let channel = self.channel();
        if let Some(channel) = &channel {
            channel.begin_release(self);
        }

        self.inner.correlator.cancel_all();
        let ctx = &self.inner.ctx;
        ctx.metrics.session_closed();
        if let Some(handler) = self.inner.handlers.read().close.clone() {
            let session = self.clone();
            ctx.post(move || handler(&session, reason));
        }

        {
            let mut state = self.inner.state.lock();
            if state.io.is_none() {
                if let Some(buffer) = state.receive.as_mut() {
                    buffer.clear();
                }
                state.status = SessionStatus::Inactive;
            }
        }

        // reusable only once everything above belongs to this activation
        if let Some(channel) = &channel {
            channel.finish_release(self);
        }

        info!(session_id = self.inner.id, reason = %reason, "Session closed");
        true
    }

    /// Queue raw bytes for sending.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        self.enqueue(Outbound {
            bytes: Bytes::copy_from_slice(bytes),
            on_sent: None,
        })
    }

    /// Queue raw bytes; `on_sent` runs on the dispatch pool once they are fully written.
    pub fn send_with<F>(&self, bytes: &[u8], on_sent: F) -> Result<()>
    where
        F: FnOnce(&Session, Bytes) + Send + 'static,
    {
        self.enqueue(Outbound {
            bytes: Bytes::copy_from_slice(bytes),
            on_sent: Some(Box::new(on_sent)),
        })
    }

    /// Queue the written bytes of a packet or buffer.
    pub fn send_buffer<B>(&self, buffer: &B) -> Result<()>
    where
        B: WireBuffer + ?Sized,
    {
        self.send(buffer.as_bytes())
    }

    /// Register a one-shot response handler, then send `buffer`.
    ///
    /// The handler runs on the dispatch pool with the first received frame that
    /// satisfies `predicate`. It is dropped without running if the session closes
    /// first.
    pub fn send_and_expect<B, P, H>(&self, buffer: &B, predicate: P, handler: H) -> Result<()>
    where
        B: WireBuffer + ?Sized,
        P: Fn(&ByteBuffer) -> bool + Send + Sync + 'static,
        H: FnOnce(ByteBuffer) + Send + 'static,
    {
        let wait_id = self.inner.correlator.register_handler(predicate, handler);
        self.send_buffer(buffer).inspect_err(|_| {
            self.inner.correlator.remove(wait_id);
        })
    }

    fn enqueue(&self, outbound: Outbound) -> Result<()> {
        let state = self.inner.state.lock();
        match &state.io {
            Some(io) => io
                .outbound
                .send(outbound)
                .map_err(|_| ProtocolError::NotConnected),
            None => Err(ProtocolError::NotConnected),
        }
    }

    fn deliver(&self, frame: ByteBuffer) {
        self.inner.ctx.metrics.packet_received(frame.len() as u64);
        let session = self.clone();
        self.inner.ctx.post(move || session.handle_frame(frame));
    }

    fn handle_frame(&self, frame: ByteBuffer) {
        if self.inner.correlator.dispatch(&frame) {
            return;
        }
        match self.inner.dispatcher.dispatch(self, &frame) {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                warn!(session_id = self.inner.id, error = %e, "Packet handler failed");
                return;
            }
        }
        let handler = self.inner.handlers.read().receive.clone();
        match handler {
            Some(handler) => handler(self, frame),
            None => debug!(
                session_id = self.inner.id,
                len = frame.len(),
                "Dropped frame without receive handler"
            ),
        }
    }

    fn restore_receive_buffer(&self, mut buffer: ReceiveBuffer) {
        buffer.clear();
        let mut state = self.inner.state.lock();
        if state.receive.is_none() {
            state.receive = Some(buffer);
        }
    }
}

async fn read_loop(
    session: Session,
    mut reader: OwnedReadHalf,
    mut buffer: ReceiveBuffer,
    validator: FrameValidator,
    cancel: CancellationToken,
    generation: u64,
) {
    let reason = loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break None,
            read = reader.read(buffer.spare_mut()) => read,
        };
        match read {
            Ok(0) => break Some(CloseReason::ClosedByRemote),
            Ok(n) => {
                buffer.commit(n);
                match buffer.drain_frames(&validator) {
                    Ok(frames) => {
                        for frame in frames {
                            session.deliver(frame);
                        }
                    }
                    Err(e) => {
                        session.inner.ctx.metrics.protocol_error();
                        warn!(session_id = session.id(), error = %e, "Rejected inbound stream");
                        break Some(CloseReason::ProtocolViolation);
                    }
                }
            }
            Err(e) => {
                debug!(session_id = session.id(), error = %e, "Read failed");
                break Some(CloseReason::IoError);
            }
        }
    };

    session.restore_receive_buffer(buffer);
    if let Some(reason) = reason {
        session.close_generation(Some(generation), reason);
    }
}

async fn write_loop(
    session: Session,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
    generation: u64,
) {
    let reason = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break None,
            next = outbound.recv() => next,
        };
        let Some(Outbound { bytes, on_sent }) = next else {
            break None;
        };
        let written = tokio::select! {
            _ = cancel.cancelled() => break None,
            written = writer.write_all(&bytes) => written,
        };
        match written {
            Ok(()) => {
                session.inner.ctx.metrics.packet_sent(bytes.len() as u64);
                if let Some(on_sent) = on_sent {
                    let completed = session.clone();
                    session.inner.ctx.post(move || on_sent(&completed, bytes));
                }
            }
            Err(e) => {
                debug!(session_id = session.id(), error = %e, "Write failed");
                break Some(CloseReason::IoError);
            }
        }
    };

    let _ = writer.shutdown().await;
    if let Some(reason) = reason {
        session.close_generation(Some(generation), reason);
    }
}
