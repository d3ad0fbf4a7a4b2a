use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::StrategyEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    Start,
    Pause,
    Resume,
    /// Run one resync + generation pass immediately, whatever the state.
    RunNow,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    Running,
    Paused,
}

/// Cloneable handle passed to the API and the binary.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    state: Arc<RwLock<SchedulerState>>,
}

impl SchedulerHandle {
    pub async fn send(&self, cmd: SchedulerCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }
}

/// Periodic driver: every tick while running retries pending writes, then
/// generates signals.
pub struct Scheduler {
    engine: StrategyEngine,
    interval: Duration,
    state: Arc<RwLock<SchedulerState>>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl Scheduler {
    pub fn new(engine: StrategyEngine, interval: Duration) -> (Self, SchedulerHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let state = Arc::new(RwLock::new(SchedulerState::Stopped));

        let handle = SchedulerHandle {
            command_tx,
            state: state.clone(),
        };
        let scheduler = Scheduler {
            engine,
            interval: interval.max(Duration::from_millis(1)),
            state,
            command_rx,
        };
        (scheduler, handle)
    }

    /// Drive ticks and commands until `Stop` or every handle is dropped.
    /// Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Scheduler initialized in Stopped state");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(SchedulerCommand::Start) => {
                        let current = *self.state.read().await;
                        if current == SchedulerState::Running {
                            info!("Scheduler already running");
                            continue;
                        }
                        info!("Scheduler started");
                        *self.state.write().await = SchedulerState::Running;
                        ticker.reset_immediately();
                    }

                    Some(SchedulerCommand::Pause) => {
                        let current = *self.state.read().await;
                        if current == SchedulerState::Running {
                            info!("Scheduler paused");
                            *self.state.write().await = SchedulerState::Paused;
                        }
                    }

                    Some(SchedulerCommand::Resume) => {
                        let current = *self.state.read().await;
                        if current == SchedulerState::Paused {
                            info!("Scheduler resumed");
                            *self.state.write().await = SchedulerState::Running;
                        } else {
                            warn!(state = ?current, "Resume received but scheduler is not paused");
                        }
                    }

                    Some(SchedulerCommand::RunNow) => {
                        info!("Manual generation pass requested");
                        self.tick().await;
                    }

                    Some(SchedulerCommand::Stop) => {
                        info!("Scheduler stopping");
                        *self.state.write().await = SchedulerState::Stopped;
                        break;
                    }

                    None => {
                        warn!("Scheduler command channel closed, shutting down");
                        *self.state.write().await = SchedulerState::Stopped;
                        break;
                    }
                },

                _ = ticker.tick() => {
                    if *self.state.read().await == SchedulerState::Running {
                        self.tick().await;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        self.engine.resync().await;
        let signals = self.engine.generate_signals().await;
        info!(signals = signals.len(), "Scheduled generation pass finished");
    }
}
