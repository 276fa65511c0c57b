//! Capture-readiness control.
//!
//! Three producers race to decide when the capture action is revealed: the
//! visual trigger detector, the server-pushed "session ended" signal, and an
//! outermost fallback timer. The state machine here is pure (events in,
//! commands out) and the async driver below executes its commands, so every
//! producer ordering can be tested without timers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::events::{EndedSignal, EventChannel};
use crate::config::DetectorConfig;
use crate::detect::{self, DetectorOutcome};
use crate::engine::platform::RenderSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessPhase {
    Idle,
    Racing,
    Settled,
}

/// Which producer won the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyCause {
    Detector,
    RemoteSignal,
    Fallback,
}

/// Events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessEvent {
    Start,
    DetectorConfirmed,
    RemoteEnded,
    FallbackElapsed,
}

/// Commands emitted by the state machine for the driver to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessCommand {
    StartDetector,
    ConnectEvents,
    ArmFallback,
    StopDetector,
    CancelFallback,
    RevealCapture(ReadyCause),
}

/// `Idle -> Racing -> Settled`, settling exactly once. Producer events after
/// settlement are complete no-ops; the event listener is deliberately left
/// connected when another producer wins.
#[derive(Debug)]
pub struct ReadinessMachine {
    phase: ReadinessPhase,
    cause: Option<ReadyCause>,
}

impl ReadinessMachine {
    pub fn new() -> Self {
        Self {
            phase: ReadinessPhase::Idle,
            cause: None,
        }
    }

    pub fn phase(&self) -> ReadinessPhase {
        self.phase
    }

    pub fn cause(&self) -> Option<ReadyCause> {
        self.cause
    }

    pub fn process(&mut self, event: ReadinessEvent) -> Vec<ReadinessCommand> {
        use ReadinessCommand::*;

        match (self.phase, event) {
            (ReadinessPhase::Idle, ReadinessEvent::Start) => {
                self.phase = ReadinessPhase::Racing;
                vec![StartDetector, ConnectEvents, ArmFallback]
            }
            (ReadinessPhase::Racing, ReadinessEvent::DetectorConfirmed) => {
                // The detector stops itself on confirmation.
                self.settle(ReadyCause::Detector, vec![CancelFallback])
            }
            (ReadinessPhase::Racing, ReadinessEvent::RemoteEnded) => {
                self.settle(ReadyCause::RemoteSignal, vec![StopDetector, CancelFallback])
            }
            (ReadinessPhase::Racing, ReadinessEvent::FallbackElapsed) => {
                self.settle(ReadyCause::Fallback, vec![StopDetector])
            }
            _ => Vec::new(),
        }
    }

    fn settle(
        &mut self,
        cause: ReadyCause,
        mut commands: Vec<ReadinessCommand>,
    ) -> Vec<ReadinessCommand> {
        self.phase = ReadinessPhase::Settled;
        self.cause = Some(cause);
        commands.push(ReadinessCommand::RevealCapture(cause));
        commands
    }
}

impl Default for ReadinessMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the race to settlement and return the winning cause.
///
/// The detector, the ended-signal waiter, and the fallback timer feed one
/// event queue; the first terminal event settles the machine and the losing
/// producers are cancelled. The event channel, when present, is connected
/// here and intentionally left connected afterwards.
pub async fn run(
    surface: Arc<dyn RenderSurface>,
    signal: EndedSignal,
    channel: Option<Arc<EventChannel>>,
    detector_config: DetectorConfig,
    fallback_delay: Duration,
) -> ReadyCause {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut machine = ReadinessMachine::new();

    let mut detector_handle = None;
    let mut fallback_task: Option<JoinHandle<()>> = None;
    let mut producers: Vec<JoinHandle<()>> = Vec::new();

    for command in machine.process(ReadinessEvent::Start) {
        match command {
            ReadinessCommand::StartDetector => {
                let (handle, task) = detect::spawn(surface.clone(), detector_config.clone());
                detector_handle = Some(handle);
                let tx = tx.clone();
                producers.push(tokio::spawn(async move {
                    if let Ok(DetectorOutcome::Confirmed) = task.await {
                        let _ = tx.send(ReadinessEvent::DetectorConfirmed);
                    }
                }));
            }
            ReadinessCommand::ConnectEvents => {
                if let Some(channel) = &channel {
                    channel.connect();
                }
                let signal = signal.clone();
                let tx = tx.clone();
                producers.push(tokio::spawn(async move {
                    signal.wait().await;
                    let _ = tx.send(ReadinessEvent::RemoteEnded);
                }));
            }
            ReadinessCommand::ArmFallback => {
                let tx = tx.clone();
                fallback_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(fallback_delay).await;
                    log::info!("Capture-readiness fallback timer elapsed");
                    let _ = tx.send(ReadinessEvent::FallbackElapsed);
                }));
            }
            _ => {}
        }
    }
    drop(tx);

    while let Some(event) = rx.recv().await {
        for command in machine.process(event) {
            match command {
                ReadinessCommand::StopDetector => {
                    if let Some(handle) = &detector_handle {
                        handle.stop();
                    }
                }
                ReadinessCommand::CancelFallback => {
                    if let Some(task) = &fallback_task {
                        task.abort();
                    }
                }
                ReadinessCommand::RevealCapture(cause) => {
                    log::info!("Capture ready ({:?})", cause);
                }
                _ => {}
            }
        }
        if machine.phase() == ReadinessPhase::Settled {
            break;
        }
    }

    // Cancel the losing producers; the event channel stays connected.
    for task in &producers {
        task.abort();
    }
    if let Some(task) = &fallback_task {
        task.abort();
    }

    machine.cause().unwrap_or(ReadyCause::Fallback)
}
