//! Interrupt handling for a run.
//!
//! `ShutdownState` starts with both flags clear. The first interrupt sets the
//! stop flag: the scheduler stops enqueuing and each worker exits after the
//! item it is working on. The second interrupt also sets the force flag:
//! workers kill their in-flight tool process and every blocking wait returns.
//! Flags are never cleared.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{error, warn};

/// Escalation level reached after an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    Stopping,
    Forced,
}

/// Process-wide stop/force flags shared by the scheduler and the workers.
#[derive(Debug, Default)]
pub struct ShutdownState {
    stop: AtomicBool,
    force: AtomicBool,
    interrupts: AtomicU32,
}

impl ShutdownState {
    /// Fresh state with both flags clear, ready to hand to every thread.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one interrupt and escalate accordingly.
    pub fn on_interrupt(&self) -> ShutdownPhase {
        let count = self.interrupts.fetch_add(1, Ordering::SeqCst) + 1;
        if count == 1 {
            self.request_stop();
            ShutdownPhase::Stopping
        } else {
            self.force_stop();
            ShutdownPhase::Forced
        }
    }

    /// Ask for a cooperative stop at the next loop boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop immediately, abandoning in-flight tool invocations.
    pub fn force_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.force.store(true, Ordering::SeqCst);
    }

    /// True once a cooperative stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// True once in-flight tools should be killed.
    pub fn force_requested(&self) -> bool {
        self.force.load(Ordering::Relaxed)
    }

    /// Current escalation level, derived from the two flags.
    pub fn phase(&self) -> ShutdownPhase {
        if self.force_requested() {
            ShutdownPhase::Forced
        } else if self.stop_requested() {
            ShutdownPhase::Stopping
        } else {
            ShutdownPhase::Running
        }
    }

    /// Raw stop flag, for blocking queue operations.
    pub fn stop_flag(&self) -> &AtomicBool {
        &self.stop
    }

    /// Raw force flag, for tool invocations.
    pub fn force_flag(&self) -> &AtomicBool {
        &self.force
    }
}

/// Listen for Ctrl-C (and SIGTERM on Unix) on a background thread.
///
/// The listener runs for the life of the process; the handle is returned so
/// callers can keep it alongside the other run threads.
pub fn install_signal_handlers(state: Arc<ShutdownState>) -> io::Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    thread::Builder::new()
        .name("puzzlebench-signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let mut signals = match InterruptSignals::register() {
                    Ok(signals) => signals,
                    Err(err) => {
                        error!("Failed to register signal handlers: {err}");
                        return;
                    }
                };
                while signals.recv().await {
                    match state.on_interrupt() {
                        ShutdownPhase::Stopping => warn!(
                            "Interrupt received; finishing in-flight items. Interrupt again to force stop."
                        ),
                        ShutdownPhase::Forced => {
                            warn!("Second interrupt received; killing tool processes");
                        }
                        ShutdownPhase::Running => {}
                    }
                }
            });
        })
}

#[cfg(unix)]
struct InterruptSignals {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl InterruptSignals {
    fn register() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next signal. Returns false once no more can arrive.
    async fn recv(&mut self) -> bool {
        tokio::select! {
            received = self.sigint.recv() => received.is_some(),
            received = self.sigterm.recv() => received.is_some(),
        }
    }
}

#[cfg(not(unix))]
struct InterruptSignals;

#[cfg(not(unix))]
impl InterruptSignals {
    fn register() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> bool {
        match tokio::signal::ctrl_c().await {
            Ok(()) => true,
            Err(err) => {
                error!("Ctrl-C listener failed: {err}");
                false
            }
        }
    }
}
