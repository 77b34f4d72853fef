//! Pull-stream session state machine
//!
//! A session owns one outbound SRT connection at a time, feeds what it
//! receives through the demux bridge and forwards packets to the router.
//!
//! ```text
//!  Idle/Stopped/Error --start--> Connecting --> Connected --> Playing
//!                                    |                           |
//!                                    +--failure--> Error <--restart (policy gave up)
//!  any non-terminal --stop--> Stopped        any --terminate--> Terminated
//! ```
//!
//! Lifecycle calls that do not apply to the current state are no-ops.
//! Stop and terminate requests may also come from other threads through a
//! [`SessionControl`]; they abandon an in-flight connect and are otherwise
//! honoured at the next processing cycle.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::Instrument;

use crate::config::{ReconnectConfig, SrtDefaults};
use crate::demux::{ts_demuxer_factory, DemuxBridge, DemuxerFactory};
use crate::dispatcher::FrameDispatcher;
use crate::error::{PullError, Result};
use crate::locator::{LocatorList, SourceLocator};
use crate::metrics::StreamRecorder;
use crate::publisher::TrackPublisher;
use crate::reconnect::{ReconnectAction, ReconnectPolicy};
use crate::router::{MediaRouter, StreamInfo};
use crate::transport::{Connection, Connector, PollableDescriptor, ReceiveOutcome};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Playing,
    Stopped,
    Error,
    Terminated,
}

impl SessionState {
    /// Connecting, Connected or Playing
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Connected | SessionState::Playing
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Playing => "playing",
            SessionState::Stopped => "stopped",
            SessionState::Error => "error",
            SessionState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// How the scheduler should drive a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingMode {
    /// Call `process_cycle` on a fixed interval
    FixedInterval,
}

/// Pending external request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ControlRequest {
    Continue,
    Stop,
    Terminate,
}

impl ControlRequest {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ControlRequest::Continue,
            1 => ControlRequest::Stop,
            _ => ControlRequest::Terminate,
        }
    }
}

#[derive(Default)]
struct ControlInner {
    request: AtomicU8,
    notify: Notify,
}

/// Thread-safe stop/terminate handle for a session
///
/// Terminate takes precedence over stop; neither can be withdrawn by a
/// weaker request.
#[derive(Clone, Default)]
pub struct SessionControl {
    inner: Arc<ControlInner>,
}

impl fmt::Debug for SessionControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionControl")
            .field("pending", &self.pending())
            .finish()
    }
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the session to stop
    pub fn stop(&self) {
        self.raise(ControlRequest::Stop);
    }

    /// Ask the session to terminate
    pub fn terminate(&self) {
        self.raise(ControlRequest::Terminate);
    }

    pub fn pending(&self) -> ControlRequest {
        ControlRequest::from_u8(self.inner.request.load(Ordering::Acquire))
    }

    /// Resolves once a stop or terminate request is pending
    pub async fn requested(&self) -> ControlRequest {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let request = self.pending();
            if request != ControlRequest::Continue {
                return request;
            }
            notified.await;
        }
    }

    fn raise(&self, request: ControlRequest) {
        self.inner.request.fetch_max(request as u8, Ordering::AcqRel);
        self.inner.notify.notify_waiters();
    }

    /// Drop a pending stop; a pending terminate stays
    fn clear_stop(&self) {
        let _ = self.inner.request.compare_exchange(
            ControlRequest::Stop as u8,
            ControlRequest::Continue as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Capability surface a scheduler drives
#[async_trait]
pub trait PullSession: Send {
    fn name(&self) -> &str;

    fn state(&self) -> SessionState;

    /// Run the full connect sequence
    ///
    /// No-op while already active. Fails with [`PullError::Terminated`]
    /// once terminated.
    async fn start(&mut self) -> Result<()>;

    /// Handle a connection loss through the reconnect policy
    async fn restart(&mut self) -> Result<()>;

    /// Tear down and move to `Stopped`
    fn stop(&mut self) -> Result<()>;

    /// Tear down and move to `Terminated`; final
    fn terminate(&mut self);

    /// One non-blocking receive/demux/dispatch step
    fn process_cycle(&mut self) -> Result<()>;

    fn pollable_descriptor(&self) -> Option<PollableDescriptor>;

    fn scheduling_mode(&self) -> SchedulingMode;

    /// Handle for stop/terminate requests from other tasks
    fn control(&self) -> SessionControl;
}

/// Collaborators a session is built with
#[derive(Clone)]
pub struct SessionContext {
    pub connector: Arc<dyn Connector>,
    pub router: Arc<dyn MediaRouter>,
    pub metrics: StreamRecorder,
    pub demuxer_factory: DemuxerFactory,
}

impl SessionContext {
    /// Context using the built-in MPEG-TS demuxer
    pub fn new(
        connector: Arc<dyn Connector>,
        router: Arc<dyn MediaRouter>,
        metrics: StreamRecorder,
    ) -> Self {
        Self {
            connector,
            router,
            metrics,
            demuxer_factory: ts_demuxer_factory(),
        }
    }

    pub fn with_demuxer_factory(mut self, factory: DemuxerFactory) -> Self {
        self.demuxer_factory = factory;
        self
    }
}

enum ConnectRace {
    Done(Result<Box<dyn Connection>>),
    Interrupted(ControlRequest),
}

/// SRT caller-mode pull session
pub struct SrtPullSession {
    stream: StreamInfo,
    locators: LocatorList,
    srt: SrtDefaults,
    connector: Arc<dyn Connector>,
    router: Arc<dyn MediaRouter>,
    metrics: StreamRecorder,
    demuxer_factory: DemuxerFactory,
    state: SessionState,
    connection: Option<Box<dyn Connection>>,
    demux: Option<DemuxBridge>,
    publisher: TrackPublisher,
    dispatcher: FrameDispatcher,
    policy: ReconnectPolicy,
    control: SessionControl,
    recv_buf: Vec<u8>,
    span: tracing::Span,
}

impl SrtPullSession {
    pub fn new(
        stream: StreamInfo,
        urls: Vec<String>,
        srt: SrtDefaults,
        reconnect: ReconnectConfig,
        context: SessionContext,
    ) -> Self {
        let span = tracing::info_span!("pull_session", stream = %stream.name, msid = stream.msid);
        let recv_buf = Vec::with_capacity(srt.recv_buffer_size);

        Self {
            stream,
            locators: LocatorList::new(urls),
            srt,
            connector: context.connector,
            router: context.router,
            metrics: context.metrics,
            demuxer_factory: context.demuxer_factory,
            state: SessionState::Idle,
            connection: None,
            demux: None,
            publisher: TrackPublisher::new(),
            dispatcher: FrameDispatcher::new(),
            policy: ReconnectPolicy::new(reconnect),
            control: SessionControl::new(),
            recv_buf,
            span,
        }
    }

    pub fn stream(&self) -> &StreamInfo {
        &self.stream
    }

    /// Index of the locator the session last connected through
    pub fn current_locator(&self) -> usize {
        self.locators.current_index()
    }

    pub fn tracks_published(&self) -> bool {
        self.publisher.is_published()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.policy.attempts()
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "Session state change");
            self.state = state;
        }
    }

    /// Drop the connection and the demuxer
    fn teardown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        if let Some(demux) = self.demux.take() {
            tracing::debug!(bytes_fed = demux.bytes_fed(), "Demuxer released");
        }
    }

    fn abandon(&mut self, request: ControlRequest) -> PullError {
        self.teardown();
        match request {
            ControlRequest::Terminate => {
                tracing::info!("Connect abandoned, session terminated");
                self.set_state(SessionState::Terminated);
                PullError::Terminated
            }
            _ => {
                tracing::info!("Connect abandoned, session stopped");
                self.control.clear_stop();
                self.set_state(SessionState::Stopped);
                PullError::Cancelled
            }
        }
    }

    /// Honour a pending external request; returns the error to surface
    fn honour_request(&mut self) -> Option<Result<()>> {
        match self.control.pending() {
            ControlRequest::Continue => None,
            ControlRequest::Stop => Some(PullSession::stop(self)),
            ControlRequest::Terminate => {
                PullSession::terminate(self);
                Some(Err(PullError::Terminated))
            }
        }
    }

    async fn connect_sequence(&mut self) -> Result<()> {
        let started = Instant::now();

        self.teardown();
        self.set_state(SessionState::Connecting);

        if self.locators.is_empty() {
            tracing::error!("No source locators configured");
            self.set_state(SessionState::Error);
            return Err(PullError::invalid_locator("", "no source locators configured"));
        }

        let candidates: Vec<(usize, String)> = self
            .locators
            .candidates()
            .map(|(index, raw)| (index, raw.to_string()))
            .collect();
        let connector = Arc::clone(&self.connector);
        let control = self.control.clone();
        let mut last_error = None;

        for (index, raw) in candidates {
            let locator = match SourceLocator::parse(&raw) {
                Ok(locator) => locator,
                Err(e) => {
                    tracing::error!(index, error = %e, "Invalid source locator");
                    last_error = Some(e);
                    continue;
                }
            };
            let params = locator.connection_params(&self.srt);

            tracing::info!(%locator, "Connecting to SRT origin");
            let connect_started = Instant::now();

            let race = tokio::select! {
                biased;
                request = control.requested() => ConnectRace::Interrupted(request),
                result = connector.connect(&params) => ConnectRace::Done(result),
            };

            match race {
                ConnectRace::Interrupted(request) => return Err(self.abandon(request)),
                ConnectRace::Done(Ok(connection)) => {
                    let connect_elapsed = connect_started.elapsed();
                    self.metrics.origin_connected(connect_elapsed);
                    self.locators.select(index);

                    self.connection = Some(connection);
                    self.demux = Some(DemuxBridge::new((self.demuxer_factory)()));
                    self.dispatcher.reset();
                    self.set_state(SessionState::Connected);

                    self.metrics.origin_subscribed(started.elapsed());
                    self.set_state(SessionState::Playing);
                    self.policy.reset();

                    tracing::info!(
                        %locator,
                        connect_ms = connect_elapsed.as_millis() as u64,
                        "SRT session playing"
                    );
                    return Ok(());
                }
                ConnectRace::Done(Err(e)) => {
                    tracing::warn!(%locator, error = %e, "Failed to connect to SRT origin");
                    self.metrics.connect_failed();
                    last_error = Some(e);
                }
            }
        }

        self.set_state(SessionState::Error);
        let error = last_error.unwrap_or(PullError::NotConnected);
        tracing::error!(error = %error, "All source locators failed");
        Err(error)
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.teardown();

        match self.policy.on_connection_lost() {
            ReconnectAction::GiveUp { attempts } => {
                tracing::error!(attempts, "Reconnect attempts exhausted");
                self.set_state(SessionState::Error);
                Err(PullError::ReconnectExhausted { attempts })
            }
            ReconnectAction::Retry { attempt, delay } => {
                tracing::warn!(
                    attempt,
                    max_attempts = self.policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Connection lost, reconnecting"
                );
                self.metrics.reconnect_attempted();

                if !delay.is_zero() {
                    let control = self.control.clone();
                    tokio::select! {
                        biased;
                        request = control.requested() => return Err(self.abandon(request)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }

                self.connect_sequence().await
            }
        }
    }

    fn on_data(&mut self, len: usize) {
        self.metrics.bytes_received(len as u64);

        let Some(demux) = self.demux.as_mut() else {
            return;
        };
        demux.feed(&self.recv_buf[..len]);

        if !self.publisher.is_published() {
            if let Some(tracks) = demux.discovered_tracks() {
                self.publisher
                    .publish_once(tracks, &self.stream, self.router.as_ref());
            }
        }

        while let Some(unit) = demux.next_unit() {
            match self.publisher.get(unit.track_id).copied() {
                Some(track) => {
                    self.dispatcher
                        .dispatch(self.stream.msid, &track, unit, self.router.as_ref());
                    self.metrics.packet_dispatched();
                }
                None => {
                    tracing::debug!(pid = unit.track_id, "No track for PID, skipping");
                    self.metrics.unit_dropped();
                }
            }
        }
    }
}

#[async_trait]
impl PullSession for SrtPullSession {
    fn name(&self) -> &str {
        &self.stream.name
    }

    fn state(&self) -> SessionState {
        self.state
    }

    async fn start(&mut self) -> Result<()> {
        match self.state {
            SessionState::Terminated => return Err(PullError::Terminated),
            state if state.is_active() => return Ok(()),
            _ => {}
        }

        // An explicit start supersedes an earlier stop request
        match self.control.pending() {
            ControlRequest::Terminate => {
                self.terminate();
                return Err(PullError::Terminated);
            }
            ControlRequest::Stop => self.control.clear_stop(),
            ControlRequest::Continue => {}
        }

        let span = self.span.clone();
        self.connect_sequence().instrument(span).await
    }

    async fn restart(&mut self) -> Result<()> {
        match self.state {
            SessionState::Terminated => return Err(PullError::Terminated),
            SessionState::Idle | SessionState::Stopped | SessionState::Connecting => {
                return Ok(())
            }
            SessionState::Connected | SessionState::Playing | SessionState::Error => {}
        }

        if let Some(result) = self.honour_request() {
            return result;
        }

        let span = self.span.clone();
        self.reconnect().instrument(span).await
    }

    fn stop(&mut self) -> Result<()> {
        if self.state == SessionState::Terminated {
            return Ok(());
        }

        let _enter = self.span.clone().entered();
        self.teardown();
        self.control.clear_stop();
        if self.state != SessionState::Stopped {
            tracing::info!("SRT session stopped");
        }
        self.set_state(SessionState::Stopped);
        Ok(())
    }

    fn terminate(&mut self) {
        let _enter = self.span.clone().entered();
        self.teardown();
        if self.state != SessionState::Terminated {
            tracing::info!(
                bytes_received = self.metrics.stream_bytes_received(),
                "SRT session terminated"
            );
        }
        self.set_state(SessionState::Terminated);
    }

    fn process_cycle(&mut self) -> Result<()> {
        if let Some(result) = self.honour_request() {
            return result;
        }

        match self.state {
            SessionState::Terminated => return Err(PullError::Terminated),
            SessionState::Playing => {}
            _ => return Err(PullError::NotConnected),
        }

        let Some(connection) = self.connection.as_mut() else {
            return Err(PullError::NotConnected);
        };

        match connection.receive(&mut self.recv_buf) {
            ReceiveOutcome::WouldBlock => Ok(()),
            ReceiveOutcome::Closed => {
                tracing::info!(parent: &self.span, "SRT connection closed by remote");
                Err(PullError::ConnectionClosed)
            }
            ReceiveOutcome::Error(reason) => {
                tracing::warn!(parent: &self.span, error = %reason, "SRT receive error");
                Err(PullError::Receive(reason))
            }
            ReceiveOutcome::Data(len) => {
                let _enter = self.span.clone().entered();
                self.on_data(len);
                Ok(())
            }
        }
    }

    fn pollable_descriptor(&self) -> Option<PollableDescriptor> {
        self.connection
            .as_ref()
            .and_then(|connection| connection.pollable_descriptor())
    }

    fn scheduling_mode(&self) -> SchedulingMode {
        SchedulingMode::FixedInterval
    }

    fn control(&self) -> SessionControl {
        self.control.clone()
    }
}

impl Drop for SrtPullSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
