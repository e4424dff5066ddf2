//! The protocol bridge: one client connection ↔ one backend desktop.
//!
//! ```text
//!  client ──frames──► client_to_backend ──ProtocolClient──► backend
//!  client ◄──writer◄── mpsc ◄── backend_to_client ◄──────── backend
//! ```
//!
//! A [`BridgeSession`] resolves its session id through the shared
//! [`SessionRegistry`], connects through the `connect` [`Policy`], then
//! relays in one of two modes:
//!
//! - **structured**: JSON actions in, screenshots and results out;
//! - **raw**: RFB bytes passed through verbatim in both directions.
//!
//! Both directions run under a child of the session's cancellation
//! token and stop together. All outbound frames go through a single
//! writer task so they never interleave. Client frames are read from
//! the moment a session is served, so a client that leaves during
//! resolve or connect cancels the setup.

pub mod messages;

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::action::ActionRequest;
use crate::error::BridgeError;
use crate::registry::{Endpoint, SessionRegistry};
use crate::resilience::Policy;
use crate::rfb::{ClientFactory, ProtocolClient, Screenshot, placeholder, raw};
use crate::state::{PhaseLog, SessionPhase};

pub use messages::{ClientFrame, InboundMessage, OutboundMessage, ServerFrame, parse_action};

const RAW_READ_CHUNK: usize = 16 * 1024;

// ── BridgeConfig ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Deadline for resolve + connect.
    pub setup_timeout: Duration,
    /// Period of pushed screenshots; zero disables them.
    pub screenshot_interval: Duration,
    /// Size of the placeholder served when capture fails.
    pub placeholder_size: (u32, u32),
    /// Outbound frames queued before the relay waits on the client.
    pub outbound_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            setup_timeout: Duration::from_secs(30),
            screenshot_interval: Duration::from_secs(1),
            placeholder_size: (placeholder::DEFAULT_WIDTH, placeholder::DEFAULT_HEIGHT),
            outbound_buffer: 64,
        }
    }
}

/// Which relay a session will run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Structured,
    Raw,
}

// ── Bridge ───────────────────────────────────────────────────────

struct Inner {
    registry: Arc<SessionRegistry>,
    factory: ClientFactory,
    connect: Policy,
    config: BridgeConfig,
    placeholder: OnceLock<Screenshot>,
}

/// Shared entry point; cheap to clone.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

/// What an HTTP one-shot action produced.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub action: &'static str,
    pub screenshot: Option<Screenshot>,
}

/// Final state of a served session.
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: Option<String>,
    pub phases: PhaseLog,
    pub error: Option<BridgeError>,
}

impl Bridge {
    pub fn new(
        registry: Arc<SessionRegistry>,
        factory: ClientFactory,
        connect: Policy,
        config: BridgeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                factory,
                connect,
                config,
                placeholder: OnceLock::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    pub fn factory(&self) -> &ClientFactory {
        &self.inner.factory
    }

    pub fn connect_policy(&self) -> &Policy {
        &self.inner.connect
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// A session in `Init`; nothing is looked up until it is opened.
    pub fn session(&self, session_id: Option<&str>) -> BridgeSession {
        let id = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let span = info_span!("session", id = id.as_deref().unwrap_or("-"));
        BridgeSession {
            bridge: self.clone(),
            id,
            phases: PhaseLog::new(),
            endpoint: None,
            backend: None,
            span,
        }
    }

    /// Resolve and connect a protocol client for `session_id`.
    pub async fn open(
        &self,
        session_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<BridgeSession, BridgeError> {
        let mut session = self.session(session_id);
        session.open(RelayMode::Structured, cancel).await?;
        Ok(session)
    }

    /// Open a session and relay until either side ends. Setup failures
    /// are reported to the client as a terminal error frame.
    ///
    /// The client's frames are read from the start: if it goes away
    /// while the session is still resolving or connecting, setup is
    /// cancelled instead of running out its retries. Frames that arrive
    /// during setup are queued for the relay.
    pub async fn serve<I, O>(
        &self,
        mode: RelayMode,
        session_id: Option<&str>,
        inbound: I,
        outbound: O,
        cancel: &CancellationToken,
    ) -> SessionReport
    where
        I: Stream<Item = ClientFrame> + Unpin + Send,
        O: Sink<ServerFrame> + Unpin + Send + 'static,
        O::Error: Display,
    {
        let setup = cancel.child_token();
        let done = CancellationToken::new();
        let (frames_tx, frames_rx) =
            futures::channel::mpsc::channel(self.inner.config.outbound_buffer);

        let forward = forward_inbound(inbound, frames_tx, setup.clone(), done.clone());
        let session = async {
            let report = self
                .serve_session(mode, session_id, frames_rx, outbound, &setup, cancel)
                .await;
            done.cancel();
            report
        };
        let ((), report) = tokio::join!(forward, session);
        report
    }

    async fn serve_session<I, O>(
        &self,
        mode: RelayMode,
        session_id: Option<&str>,
        inbound: I,
        mut outbound: O,
        setup: &CancellationToken,
        cancel: &CancellationToken,
    ) -> SessionReport
    where
        I: Stream<Item = ClientFrame> + Unpin + Send,
        O: Sink<ServerFrame> + Unpin + Send + 'static,
        O::Error: Display,
    {
        let mut session = self.session(session_id);
        if let Err(e) = session.open(mode, setup).await {
            // Nobody is left to read an error frame after a client close.
            if !matches!(e, BridgeError::Cancelled) {
                if let Ok(frame) = OutboundMessage::error(&e).to_frame() {
                    let _ = outbound.send(frame).await;
                }
            }
            let _ = outbound.send(ServerFrame::Close).await;
            let _ = outbound.close().await;
            return session.into_report(Some(e));
        }
        match mode {
            RelayMode::Structured => session.run_structured(inbound, outbound, cancel).await,
            RelayMode::Raw => session.run_raw(inbound, outbound, cancel).await,
        }
    }

    /// Open, run one action, optionally capture, close.
    pub async fn execute_once(
        &self,
        session_id: &str,
        action: ActionRequest,
        capture_after: bool,
        cancel: &CancellationToken,
    ) -> Result<ActionOutcome, BridgeError> {
        let mut session = self.open(Some(session_id), cancel).await?;
        let span = session.span.clone();
        let result = session
            .execute(&action, capture_after)
            .instrument(span)
            .await;
        session.close().await;
        Ok(ActionOutcome {
            action: action.name(),
            screenshot: result?,
        })
    }

    /// The cached degraded frame.
    fn placeholder(&self) -> Result<Screenshot, BridgeError> {
        if let Some(shot) = self.inner.placeholder.get() {
            return Ok(shot.clone());
        }
        let (w, h) = self.inner.config.placeholder_size;
        let shot = placeholder::render(w, h)?;
        let _ = self.inner.placeholder.set(shot.clone());
        Ok(shot)
    }
}

// ── BridgeSession ────────────────────────────────────────────────

enum Backend {
    Client(Box<dyn ProtocolClient>),
    Stream(TcpStream),
}

/// One client connection's view of the bridge.
pub struct BridgeSession {
    bridge: Bridge,
    id: Option<String>,
    phases: PhaseLog,
    endpoint: Option<Endpoint>,
    backend: Option<Backend>,
    span: tracing::Span,
}

impl std::fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSession")
            .field("id", &self.id)
            .field("phases", &self.phases)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl BridgeSession {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn phase(&self) -> &SessionPhase {
        self.phases.current()
    }

    pub fn phases(&self) -> &PhaseLog {
        &self.phases
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Resolve the endpoint and connect the backend for `mode`.
    ///
    /// A missing id fails before anything is looked up. Resolve and
    /// connect share the bridge's setup timeout.
    pub async fn open(
        &mut self,
        mode: RelayMode,
        cancel: &CancellationToken,
    ) -> Result<(), BridgeError> {
        let span = self.span.clone();
        let result = self.open_inner(mode, cancel).instrument(span).await;
        if let Err(e) = &result {
            let _ = self.phases.advance(|p| p.fail(e.kind()));
            self.span.in_scope(|| {
                warn!(phases = ?self.phases.names(), "session setup failed: {e}");
            });
        }
        result
    }

    async fn open_inner(
        &mut self,
        mode: RelayMode,
        cancel: &CancellationToken,
    ) -> Result<(), BridgeError> {
        let Some(id) = self.id.clone() else {
            return Err(BridgeError::MissingSession);
        };
        let timeout = self.bridge.inner.config.setup_timeout;
        match tokio::time::timeout(timeout, self.setup(&id, mode, cancel)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BridgeError::BackendUnavailable(format!(
                    "session setup timed out after {timeout:?}"
                )));
            }
        }
        self.phases.advance(SessionPhase::begin_streaming)?;
        info!(endpoint = ?self.endpoint.as_ref().map(ToString::to_string), "session streaming");
        Ok(())
    }

    async fn setup(
        &mut self,
        id: &str,
        mode: RelayMode,
        cancel: &CancellationToken,
    ) -> Result<(), BridgeError> {
        self.phases.advance(SessionPhase::begin_resolve)?;
        let endpoint = self.bridge.inner.registry.resolve(id, cancel).await?;
        self.endpoint = Some(endpoint.clone());

        self.phases.advance(SessionPhase::begin_connect)?;
        let inner = &self.bridge.inner;
        let ep = &endpoint;
        let connected = match mode {
            RelayMode::Structured => inner
                .connect
                .call(cancel, BridgeError::is_retryable, move || async move {
                    let mut client = inner.factory.create(ep);
                    client.connect().await?;
                    Ok::<_, BridgeError>(Backend::Client(client))
                })
                .await,
            RelayMode::Raw => {
                let timeout = inner.factory.options().connect_timeout;
                inner
                    .connect
                    .call(cancel, BridgeError::is_retryable, move || async move {
                        raw::dial(ep, timeout).await.map(Backend::Stream)
                    })
                    .await
            }
        };

        match connected {
            Ok(backend) => {
                self.backend = Some(backend);
                Ok(())
            }
            Err(e @ (BridgeError::Cancelled | BridgeError::Protocol(_))) => Err(e),
            Err(e) => {
                error!(%endpoint, "backend connect failed: {e}");
                Err(BridgeError::BackendUnavailable(format!("{endpoint}: {e}")))
            }
        }
    }

    fn client(&mut self) -> Result<&mut Box<dyn ProtocolClient>, BridgeError> {
        match self.backend.as_mut() {
            Some(Backend::Client(client)) => Ok(client),
            _ => Err(BridgeError::NotConnected),
        }
    }

    /// Run one action on the open client.
    pub async fn execute(
        &mut self,
        action: &ActionRequest,
        capture_after: bool,
    ) -> Result<Option<Screenshot>, BridgeError> {
        let bridge = self.bridge.clone();
        let client = self.client()?;
        let capture = Capture::new(&bridge);
        if *action == ActionRequest::Screenshot {
            return capture.take(&mut **client).await.map(Some);
        }
        client.execute(action).await?;
        info!(action = action.name(), "action executed");
        if capture_after {
            return capture.take(&mut **client).await.map(Some);
        }
        Ok(None)
    }

    /// Disconnect the backend and mark the session closed.
    pub async fn close(&mut self) {
        self.shutdown_backend().await;
        if self.phases.current().is_streaming() {
            let _ = self.phases.advance(SessionPhase::close);
        }
    }

    async fn shutdown_backend(&mut self) {
        match self.backend.take() {
            Some(Backend::Client(mut client)) => {
                if let Err(e) = client.disconnect().await {
                    debug!("backend disconnect error: {e}");
                }
            }
            Some(Backend::Stream(mut stream)) => {
                let _ = stream.shutdown().await;
            }
            None => {}
        }
    }

    fn into_report(self, error: Option<BridgeError>) -> SessionReport {
        SessionReport {
            session_id: self.id,
            phases: self.phases,
            error,
        }
    }

    /// Record how the relay ended, report a failure to the client, and
    /// let the writer drain.
    async fn finish(
        mut self,
        outcome: Result<(), BridgeError>,
        tx: mpsc::Sender<ServerFrame>,
        writer: tokio::task::JoinHandle<()>,
    ) -> SessionReport {
        // A vanished client or a cancelled scope is a normal close.
        let outcome = match outcome {
            Err(BridgeError::Cancelled) => Ok(()),
            other => other,
        };

        let span = self.span.clone();
        async move {
            let streamed = self.phases.current().streaming_duration();
            let error = match outcome {
                Ok(()) => {
                    let _ = self.phases.advance(SessionPhase::close);
                    info!(?streamed, "session closed");
                    None
                }
                Err(e) => {
                    error!(?streamed, "session failed: {e}");
                    if let Ok(frame) = OutboundMessage::error(&e).to_frame() {
                        let _ = tx.send(frame).await;
                    }
                    let _ = self.phases.advance(|p| p.fail(e.kind()));
                    Some(e)
                }
            };

            self.shutdown_backend().await;
            let _ = tx.send(ServerFrame::Close).await;
            drop(tx);
            let _ = writer.await;
            self.into_report(error)
        }
        .instrument(span)
        .await
    }

    // ── Structured relay ─────────────────────────────────────────

    /// JSON actions in, screenshots and action results out.
    pub async fn run_structured<I, O>(
        mut self,
        mut inbound: I,
        outbound: O,
        cancel: &CancellationToken,
    ) -> SessionReport
    where
        I: Stream<Item = ClientFrame> + Unpin + Send,
        O: Sink<ServerFrame> + Unpin + Send + 'static,
        O::Error: Display,
    {
        let client = match self.backend.take() {
            Some(Backend::Client(client)) => client,
            other => {
                self.backend = other;
                let e = BridgeError::ProtocolViolation("structured relay needs a protocol client");
                return self.into_report(Some(e));
            }
        };

        let (tx, rx) = mpsc::channel(self.bridge.inner.config.outbound_buffer);
        let writer = tokio::spawn(write_frames(rx, outbound).instrument(self.span.clone()));
        let scope = cancel.child_token();
        let client = Mutex::new(client);
        let capture = Capture::new(&self.bridge);
        let interval = self.bridge.inner.config.screenshot_interval;

        let relay = async {
            let shot = {
                let mut guard = client.lock().await;
                capture.take(&mut **guard).await?
            };
            send(&tx, &OutboundMessage::screenshot(&shot)).await?;

            tokio::select! {
                r = client_to_backend(&mut inbound, &client, &capture, &tx) => r,
                r = backend_to_client(interval, &client, &capture, &tx) => r,
                _ = scope.cancelled() => Ok(()),
            }
        };
        let outcome = relay.instrument(self.span.clone()).await;
        scope.cancel();

        self.backend = Some(Backend::Client(client.into_inner()));
        self.finish(outcome, tx, writer).await
    }

    // ── Raw relay ────────────────────────────────────────────────

    /// Bytes in both directions, verbatim and in order.
    pub async fn run_raw<I, O>(
        mut self,
        mut inbound: I,
        outbound: O,
        cancel: &CancellationToken,
    ) -> SessionReport
    where
        I: Stream<Item = ClientFrame> + Unpin + Send,
        O: Sink<ServerFrame> + Unpin + Send + 'static,
        O::Error: Display,
    {
        let stream = match self.backend.take() {
            Some(Backend::Stream(stream)) => stream,
            other => {
                self.backend = other;
                let e = BridgeError::ProtocolViolation("raw relay needs a backend stream");
                return self.into_report(Some(e));
            }
        };

        let (tx, rx) = mpsc::channel(self.bridge.inner.config.outbound_buffer);
        let writer = tokio::spawn(write_frames(rx, outbound).instrument(self.span.clone()));
        let scope = cancel.child_token();
        let (mut rd, mut wr) = stream.into_split();

        let up = async {
            while let Some(frame) = inbound.next().await {
                match frame {
                    ClientFrame::Binary(bytes) => wr.write_all(&bytes).await?,
                    ClientFrame::Text(text) => wr.write_all(text.as_bytes()).await?,
                    ClientFrame::Close => break,
                }
            }
            debug!("client closed raw relay");
            Ok::<(), BridgeError>(())
        };
        let down = async {
            let mut buf = vec![0u8; RAW_READ_CHUNK];
            loop {
                let n = rd.read(&mut buf).await?;
                if n == 0 {
                    debug!("backend closed raw relay");
                    return Ok::<(), BridgeError>(());
                }
                tx.send(ServerFrame::Binary(bytes::Bytes::copy_from_slice(&buf[..n])))
                    .await
                    .map_err(|_| BridgeError::Cancelled)?;
            }
        };

        let outcome = async {
            tokio::select! {
                r = up => r,
                r = down => r,
                _ = scope.cancelled() => Ok(()),
            }
        }
        .instrument(self.span.clone())
        .await;
        scope.cancel();

        let _ = wr.shutdown().await;
        self.finish(outcome, tx, writer).await
    }
}

// ── Relay directions ─────────────────────────────────────────────

/// Pump client frames into the relay queue. A close or end of stream
/// cancels `client_gone` and drops the queue, which the relay sees as
/// end of input once it has drained what was already queued.
async fn forward_inbound<I>(
    mut inbound: I,
    mut frames: futures::channel::mpsc::Sender<ClientFrame>,
    client_gone: CancellationToken,
    done: CancellationToken,
) where
    I: Stream<Item = ClientFrame> + Unpin,
{
    loop {
        let frame = tokio::select! {
            frame = inbound.next() => frame,
            _ = done.cancelled() => return,
        };
        let frame = match frame {
            Some(ClientFrame::Close) | None => {
                debug!("client closed its side");
                client_gone.cancel();
                return;
            }
            Some(frame) => frame,
        };
        tokio::select! {
            sent = frames.send(frame) => {
                if sent.is_err() {
                    return;
                }
            }
            _ = done.cancelled() => return,
        }
    }
}

async fn client_to_backend<I>(
    inbound: &mut I,
    client: &Mutex<Box<dyn ProtocolClient>>,
    capture: &Capture<'_>,
    tx: &mpsc::Sender<ServerFrame>,
) -> Result<(), BridgeError>
where
    I: Stream<Item = ClientFrame> + Unpin,
{
    while let Some(frame) = inbound.next().await {
        let text = match frame {
            ClientFrame::Text(text) => text,
            ClientFrame::Binary(_) => {
                let e = BridgeError::InvalidActionRequest(
                    "binary frames are not accepted on structured sessions".into(),
                );
                send(tx, &OutboundMessage::action_failed("unknown", &e)).await?;
                continue;
            }
            ClientFrame::Close => break,
        };

        let action = match parse_action(&text) {
            Ok(action) => action,
            Err((name, e)) => {
                warn!(action = %name, "rejected action: {e}");
                send(tx, &OutboundMessage::action_failed(&name, &e)).await?;
                continue;
            }
        };

        let name = action.name();
        let mut guard = client.lock().await;
        let result = match action {
            ActionRequest::Screenshot => match capture.take(&mut **guard).await {
                Ok(shot) => send(tx, &OutboundMessage::screenshot(&shot)).await,
                Err(e) => Err(e),
            },
            ref other => guard.execute(other).await.map(|_| ()),
        };
        drop(guard);

        match result {
            Ok(()) => {
                debug!(action = name, "action executed");
                send(tx, &OutboundMessage::action_ok(name)).await?;
            }
            Err(e) if e.is_validation() => {
                send(tx, &OutboundMessage::action_failed(name, &e)).await?;
            }
            Err(e) => {
                let _ = send(tx, &OutboundMessage::action_failed(name, &e)).await;
                return Err(e);
            }
        }
    }
    debug!("client closed structured relay");
    Ok(())
}

async fn backend_to_client(
    interval: Duration,
    client: &Mutex<Box<dyn ProtocolClient>>,
    capture: &Capture<'_>,
    tx: &mpsc::Sender<ServerFrame>,
) -> Result<(), BridgeError> {
    if interval.is_zero() {
        return std::future::pending().await;
    }
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let shot = {
            let mut guard = client.lock().await;
            capture.take(&mut **guard).await?
        };
        send(tx, &OutboundMessage::screenshot(&shot)).await?;
    }
}

async fn send(tx: &mpsc::Sender<ServerFrame>, msg: &OutboundMessage) -> Result<(), BridgeError> {
    tx.send(msg.to_frame()?)
        .await
        .map_err(|_| BridgeError::Cancelled)
}

/// Single writer: drains the outbound queue into the client sink.
async fn write_frames<O>(mut rx: mpsc::Receiver<ServerFrame>, mut sink: O)
where
    O: Sink<ServerFrame> + Unpin,
    O::Error: Display,
{
    while let Some(frame) = rx.recv().await {
        let closing = frame == ServerFrame::Close;
        if let Err(e) = sink.send(frame).await {
            debug!("client write error: {e}");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

// ── Capture ──────────────────────────────────────────────────────

/// Screenshot with placeholder fallback.
///
/// Only a client that cannot capture at all, or a capture that timed
/// out, yields the placeholder frame with `degraded` set. Anything else
/// (I/O, malformed RFB) means the backend is unusable and is returned.
struct Capture<'a> {
    bridge: &'a Bridge,
    degraded: AtomicBool,
}

impl<'a> Capture<'a> {
    fn new(bridge: &'a Bridge) -> Self {
        Self {
            bridge,
            degraded: AtomicBool::new(false),
        }
    }

    async fn take(&self, client: &mut dyn ProtocolClient) -> Result<Screenshot, BridgeError> {
        match client.screenshot().await {
            Ok(shot) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    info!("screen capture recovered");
                }
                Ok(shot)
            }
            Err(e @ (BridgeError::CaptureUnavailable(_) | BridgeError::Timeout(_))) => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    warn!(variant = %client.variant(), "screen capture unavailable, serving placeholder: {e}");
                } else {
                    debug!("capture failed again: {e}");
                }
                self.bridge.placeholder()
            }
            Err(e) => Err(e),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
