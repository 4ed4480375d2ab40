//! Session orchestrator
//!
//! Drives one playback attempt at a time through
//! `Idle -> Connecting -> AwaitingFormat -> AwaitingStreamId -> Streaming`
//! and into `Stopped` or `Failed`. Every `start()` builds a fresh [`Session`];
//! the handshake runs sequentially and the steady-state loops run
//! concurrently inside a single driver task, all under one cancellation
//! token.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::{validate_target, NetworkConfig};
use crate::error::{Error, FailureKind, Result, SessionError};
use crate::network::{ControlChannel, DataChannel};
use crate::session::heartbeat::{watchdog, HeartbeatClock};
use crate::session::state::{SessionState, StateCell};
use crate::session::stats::{SessionStats, StatsSnapshot};
use crate::sink::AudioSink;

/// Why the last session ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&Error> for FailureReport {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// One playback attempt
struct Session {
    id: Uuid,
    state: Arc<StateCell>,
    cancel: CancellationToken,
    stats: Arc<SessionStats>,
    failure: Arc<Mutex<Option<FailureReport>>>,
    task: Option<JoinHandle<()>>,
}

// Dropping the orchestrator (or replacing a finished session) cancels the
// driver task
impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Everything the driver task needs, moved into it on spawn
struct DriverContext {
    host: String,
    port: u16,
    config: NetworkConfig,
    sink: Arc<dyn AudioSink>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
    clock: HeartbeatClock,
    stats: Arc<SessionStats>,
    failure: Arc<Mutex<Option<FailureReport>>>,
}

impl DriverContext {
    fn progress(&self, message: &str) {
        info!("{}", message);
        self.sink.on_log(message);
    }
}

/// Starts, stops and observes playback sessions against one sink
pub struct SessionOrchestrator {
    config: NetworkConfig,
    sink: Arc<dyn AudioSink>,
    current: Option<Session>,
    last_target: Option<(String, u16)>,
}

impl SessionOrchestrator {
    pub fn new(config: NetworkConfig, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            config,
            sink,
            current: None,
            last_target: None,
        }
    }

    /// Begin a new session against `host:port`
    ///
    /// Returns once the driver task is spawned; progress is observable
    /// through [`subscribe`](Self::subscribe) and the sink. Fails with
    /// [`SessionError::AlreadyActive`] while a previous session is still
    /// live.
    pub fn start(&mut self, host: &str, port: u16) -> Result<()> {
        validate_target(host, port)?;
        self.config.validate_timings()?;

        if let Some(session) = &self.current {
            if !session.state.get().is_terminal() {
                return Err(SessionError::AlreadyActive.into());
            }
        }

        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        let id = Uuid::new_v4();
        let state = Arc::new(StateCell::new());
        let cancel = CancellationToken::new();
        let stats = Arc::new(SessionStats::new());
        let failure = Arc::new(Mutex::new(None));

        state.transition(SessionState::Connecting);

        let ctx = DriverContext {
            host: host.to_string(),
            port,
            config: self.config.clone(),
            sink: self.sink.clone(),
            state: state.clone(),
            cancel: cancel.clone(),
            clock: HeartbeatClock::new(),
            stats: stats.clone(),
            failure: failure.clone(),
        };

        let span = info_span!("session", id = %id, host = %host, port);
        let task = runtime.spawn(drive(ctx).instrument(span));

        self.last_target = Some((host.to_string(), port));
        self.current = Some(Session {
            id,
            state,
            cancel,
            stats,
            failure,
            task: Some(task),
        });
        Ok(())
    }

    /// Cancel the current session and wait until its sockets are closed
    ///
    /// Safe to call repeatedly or with no session.
    pub async fn stop(&mut self) {
        let Some(session) = self.current.as_mut() else {
            return;
        };

        if session.state.transition(SessionState::Stopped) {
            info!(id = %session.id, "stopping session");
        }
        session.cancel.cancel();

        if let Some(task) = session.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(id = %session.id, "session driver panicked");
                }
            }
        }
    }

    /// State of the current session, `Idle` when none was started
    pub fn state(&self) -> SessionState {
        self.current
            .as_ref()
            .map(|s| s.state.get())
            .unwrap_or(SessionState::Idle)
    }

    /// Watch the current session's state transitions
    pub fn subscribe(&self) -> Option<watch::Receiver<SessionState>> {
        self.current.as_ref().map(|s| s.state.subscribe())
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.current.as_ref().map(|s| s.id)
    }

    pub fn stats(&self) -> Option<StatsSnapshot> {
        self.current.as_ref().map(|s| s.stats.snapshot())
    }

    /// Target of the most recent `start()`, kept across sessions for retry
    pub fn last_target(&self) -> Option<(String, u16)> {
        self.last_target.clone()
    }

    pub fn last_failure(&self) -> Option<FailureReport> {
        self.current.as_ref().and_then(|s| s.failure.lock().clone())
    }
}

async fn drive(ctx: DriverContext) {
    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            debug!("session cancelled");
            Ok(())
        }
        result = establish_and_stream(&ctx) => result,
    };

    // Both channels are owned by the future above and are closed by now
    if let Err(err) = result {
        // Held across the transition so observers of `Failed` see the report
        let mut failure = ctx.failure.lock();
        if ctx.state.transition(SessionState::Failed) {
            *failure = Some(FailureReport::from(&err));
            drop(failure);
            error!(kind = ?err.kind(), "session failed: {}", err);
            ctx.sink.on_error(&err.to_string(), &err);
        } else {
            debug!("error after stop ignored: {}", err);
        }
    }
}

async fn establish_and_stream(ctx: &DriverContext) -> Result<()> {
    ctx.progress(&format!("connecting to {}:{}", ctx.host, ctx.port));
    let mut control = ControlChannel::connect(&ctx.host, ctx.port, &ctx.config).await?;
    ctx.progress("TCP connected");

    if !ctx.state.transition(SessionState::AwaitingFormat) {
        return Ok(());
    }
    let format = control.request_format().await?;
    ctx.sink.on_format_ready(&format).await?;
    ctx.progress("get format success");

    if !ctx.state.transition(SessionState::AwaitingStreamId) {
        return Ok(());
    }
    let stream_id = control.start_play().await?;
    ctx.progress(&format!("start play success, stream id {stream_id}"));

    let data = DataChannel::bind(
        control.local_addr().ip(),
        control.peer_addr(),
        ctx.config.receive_buffer_bytes,
    )?;
    data.open_stream(stream_id).await?;

    ctx.clock.beat();
    if !ctx.state.transition(SessionState::Streaming) {
        return Ok(());
    }
    ctx.sink.on_playback_started();
    ctx.progress("playback started");

    let heartbeat_timeout = watchdog(
        &ctx.clock,
        ctx.config.heartbeat_interval(),
        ctx.config.heartbeat_timeout(),
    );

    tokio::select! {
        result = control.run_command_loop(&ctx.clock, &ctx.stats, &ctx.config) => result,
        err = heartbeat_timeout => Err(err.into()),
        result = data.run_receive_loop(ctx.sink.as_ref(), &format, &ctx.stats) => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;

    fn orchestrator() -> SessionOrchestrator {
        let (sink, _rx) = ChannelSink::new();
        SessionOrchestrator::new(NetworkConfig::default(), Arc::new(sink))
    }

    #[test]
    fn test_start_needs_runtime() {
        let mut orchestrator = orchestrator();
        let err = orchestrator.start("127.0.0.1", 65530).unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::NoRuntime)));
        assert_eq!(orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_invalid_target_rejected() {
        let mut orchestrator = orchestrator();
        assert_eq!(
            orchestrator.start("", 65530).unwrap_err().kind(),
            FailureKind::Config
        );
        assert_eq!(
            orchestrator.start("127.0.0.1", 0).unwrap_err().kind(),
            FailureKind::Config
        );
        assert!(orchestrator.last_target().is_none());
    }

    #[tokio::test]
    async fn test_stop_without_session() {
        let mut orchestrator = orchestrator();
        orchestrator.stop().await;
        orchestrator.stop().await;
        assert_eq!(orchestrator.state(), SessionState::Idle);
    }
}
