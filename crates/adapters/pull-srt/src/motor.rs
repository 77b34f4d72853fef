//! Fixed-interval stream motor
//!
//! Each session gets its own task. The task starts the session, calls
//! `process_cycle` on every tick and runs `restart` whenever the connection
//! is lost. Once the reconnect policy gives up the task stays parked until
//! the session is started again through [`MotorHandle::start`], or stopped
//! or terminated.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::MotorConfig;
use crate::error::PullError;
use crate::session::{ControlRequest, PullSession, SessionControl, SessionState};

/// Spawns motor tasks
#[derive(Debug, Clone)]
pub struct StreamMotor {
    interval: Duration,
}

impl StreamMotor {
    pub fn new(config: &MotorConfig) -> Self {
        Self {
            interval: config.interval(),
        }
    }

    /// Drive `session` on its own task until it stops or terminates
    pub fn spawn<S>(&self, session: S) -> MotorHandle
    where
        S: PullSession + 'static,
    {
        let name = session.name().to_string();
        let control = session.control();
        let interval = self.interval;
        let start = Arc::new(Notify::new());
        let task = tokio::spawn(run(session, interval, Arc::clone(&start)));

        MotorHandle {
            name,
            control,
            start,
            task,
        }
    }
}

/// Handle to a running motor task
pub struct MotorHandle {
    name: String,
    control: SessionControl,
    start: Arc<Notify>,
    task: JoinHandle<SessionState>,
}

impl MotorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the motor to start the session again
    ///
    /// Resumes a stream the reconnect policy gave up on. No effect while
    /// the session is active.
    pub fn start(&self) {
        self.start.notify_one();
    }

    /// Stop the session and wait for the motor to finish
    pub async fn stop(self) -> SessionState {
        self.control.stop();
        self.join().await
    }

    /// Terminate the session and wait for the motor to finish
    pub async fn terminate(self) -> SessionState {
        self.control.terminate();
        self.join().await
    }

    /// Wait for the motor to finish; returns the final session state
    pub async fn join(self) -> SessionState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(stream = %self.name, "Motor task failed: {}", e);
                SessionState::Error
            }
        }
    }
}

fn honour<S: PullSession + ?Sized>(session: &mut S, request: ControlRequest) {
    match request {
        ControlRequest::Terminate => session.terminate(),
        ControlRequest::Stop => {
            let _ = session.stop();
        }
        ControlRequest::Continue => {}
    }
}

async fn start<S: PullSession + ?Sized>(session: &mut S) {
    if let Err(e) = session.start().await {
        tracing::warn!(stream = %session.name(), error = %e, "Start failed");
    }
}

async fn run<S: PullSession>(mut session: S, interval: Duration, resume: Arc<Notify>) -> SessionState {
    let control = session.control();

    tracing::info!(stream = %session.name(), "Starting stream motor");
    start(&mut session).await;

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if matches!(
            session.state(),
            SessionState::Stopped | SessionState::Terminated
        ) {
            break;
        }

        tokio::select! {
            biased;
            request = control.requested() => {
                honour(&mut session, request);
                continue;
            }
            _ = resume.notified() => {
                start(&mut session).await;
                continue;
            }
            _ = ticker.tick() => {}
        }

        if session.state() == SessionState::Playing {
            match session.process_cycle() {
                Ok(()) => continue,
                Err(e) if e.is_transient() => {
                    tracing::warn!(stream = %session.name(), error = %e, "Connection lost");
                }
                Err(_) => continue,
            }
        }

        match session.restart().await {
            Ok(()) => {}
            Err(PullError::ReconnectExhausted { attempts }) => {
                tracing::error!(
                    stream = %session.name(),
                    attempts,
                    "Giving up on stream until it is started again"
                );
                tokio::select! {
                    biased;
                    request = control.requested() => honour(&mut session, request),
                    _ = resume.notified() => {
                        tracing::info!(stream = %session.name(), "Start requested after giving up");
                        start(&mut session).await;
                    }
                }
            }
            Err(e) => {
                tracing::debug!(stream = %session.name(), error = %e, "Reconnect attempt failed");
            }
        }
    }

    let state = session.state();
    tracing::info!(stream = %session.name(), %state, "Stream motor finished");
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::transport::PollableDescriptor;
    use crate::session::SchedulingMode;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Session that loses its connection after a few cycles, once
    struct FlakySession {
        state: SessionState,
        control: SessionControl,
        cycles: Arc<AtomicU32>,
        restarts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl PullSession for FlakySession {
        fn name(&self) -> &str {
            "flaky"
        }

        fn state(&self) -> SessionState {
            self.state
        }

        async fn start(&mut self) -> Result<()> {
            self.state = SessionState::Playing;
            Ok(())
        }

        async fn restart(&mut self) -> Result<()> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            self.state = SessionState::Playing;
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.state = SessionState::Stopped;
            Ok(())
        }

        fn terminate(&mut self) {
            self.state = SessionState::Terminated;
        }

        fn process_cycle(&mut self) -> Result<()> {
            let cycle = self.cycles.fetch_add(1, Ordering::SeqCst);
            if cycle == 3 {
                Err(PullError::ConnectionClosed)
            } else {
                Ok(())
            }
        }

        fn pollable_descriptor(&self) -> Option<PollableDescriptor> {
            None
        }

        fn scheduling_mode(&self) -> SchedulingMode {
            SchedulingMode::FixedInterval
        }

        fn control(&self) -> SessionControl {
            self.control.clone()
        }
    }

    #[tokio::test]
    async fn test_motor_restarts_after_loss_and_stops() {
        let cycles = Arc::new(AtomicU32::new(0));
        let restarts = Arc::new(AtomicU32::new(0));
        let session = FlakySession {
            state: SessionState::Idle,
            control: SessionControl::new(),
            cycles: cycles.clone(),
            restarts: restarts.clone(),
        };

        let motor = StreamMotor::new(&MotorConfig { interval_ms: 1 });
        let handle = motor.spawn(session);
        assert_eq!(handle.name(), "flaky");

        while cycles.load(Ordering::SeqCst) < 10 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(restarts.load(Ordering::SeqCst), 1);
        assert_eq!(handle.stop().await, SessionState::Stopped);
    }

    /// Session whose first start fails and whose reconnects are exhausted
    struct ExhaustedSession {
        state: SessionState,
        control: SessionControl,
        starts: Arc<AtomicU32>,
        restarts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl PullSession for ExhaustedSession {
        fn name(&self) -> &str {
            "exhausted"
        }

        fn state(&self) -> SessionState {
            self.state
        }

        async fn start(&mut self) -> Result<()> {
            if self.starts.fetch_add(1, Ordering::SeqCst) == 0 {
                self.state = SessionState::Error;
                return Err(PullError::connect("origin refused"));
            }
            self.state = SessionState::Playing;
            Ok(())
        }

        async fn restart(&mut self) -> Result<()> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            self.state = SessionState::Error;
            Err(PullError::ReconnectExhausted { attempts: 4 })
        }

        fn stop(&mut self) -> Result<()> {
            self.state = SessionState::Stopped;
            Ok(())
        }

        fn terminate(&mut self) {
            self.state = SessionState::Terminated;
        }

        fn process_cycle(&mut self) -> Result<()> {
            Ok(())
        }

        fn pollable_descriptor(&self) -> Option<PollableDescriptor> {
            None
        }

        fn scheduling_mode(&self) -> SchedulingMode {
            SchedulingMode::FixedInterval
        }

        fn control(&self) -> SessionControl {
            self.control.clone()
        }
    }

    #[tokio::test]
    async fn test_motor_start_resumes_after_giving_up() {
        let starts = Arc::new(AtomicU32::new(0));
        let restarts = Arc::new(AtomicU32::new(0));
        let session = ExhaustedSession {
            state: SessionState::Idle,
            control: SessionControl::new(),
            starts: starts.clone(),
            restarts: restarts.clone(),
        };

        let handle = StreamMotor::new(&MotorConfig { interval_ms: 1 }).spawn(session);

        while restarts.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // Parked: no further reconnects
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(restarts.load(Ordering::SeqCst), 1);
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        handle.start();
        while starts.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(restarts.load(Ordering::SeqCst), 1);
        assert!(!handle.is_finished());
        assert_eq!(handle.stop().await, SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_motor_terminate() {
        let session = FlakySession {
            state: SessionState::Idle,
            control: SessionControl::new(),
            cycles: Arc::new(AtomicU32::new(0)),
            restarts: Arc::new(AtomicU32::new(0)),
        };

        let handle = StreamMotor::new(&MotorConfig::default()).spawn(session);
        assert_eq!(handle.terminate().await, SessionState::Terminated);
    }
}
