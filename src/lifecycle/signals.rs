//! Process-exit callback registration.
//!
//! # Responsibilities
//! - Run registered callbacks when the process is asked to exit (SIGINT/SIGTERM)
//! - Let an owner withdraw its callback once it has stopped on its own
//! - Exit the process when a signal finds no callback armed
//!
//! # Design Decisions
//! - Listening for a signal replaces its default disposition for the rest of
//!   the process, so one watcher thread per process stands in for it
//! - Callbacks run on their own thread and may block (a full stop does);
//!   a second signal while they run exits at once
//! - Withdrawing after the signal fired reports `ProcessExiting`; callers log it

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;

/// Callback run at most once on process exit.
pub type ExitCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("process is already exiting")]
    ProcessExiting,

    #[error("an exit callback is already registered")]
    AlreadyRegistered,

    #[error("no exit callback is registered")]
    NotRegistered,

    #[error("failed to install exit signal handlers: {0}")]
    Install(#[from] io::Error),
}

/// Register/unregister a process-exit callback.
pub trait ExitHook: Send + Sync {
    fn register(&self, callback: ExitCallback) -> Result<(), HookError>;

    /// Must be callable from inside the callback itself.
    fn unregister(&self) -> Result<(), HookError>;
}

enum Slot {
    Armed(ExitCallback),
    Fired,
}

/// Process-wide callback table shared by every [`SignalExitHook`].
struct Registry {
    watching: bool,
    hooks: Vec<(u64, Slot)>,
}

impl Registry {
    const fn new() -> Self {
        Self {
            watching: false,
            hooks: Vec::new(),
        }
    }

    fn slot(&self, id: u64) -> Option<&Slot> {
        self.hooks.iter().find(|(hook, _)| *hook == id).map(|(_, slot)| slot)
    }

    fn remove(&mut self, id: u64) -> Option<Slot> {
        let position = self.hooks.iter().position(|(hook, _)| *hook == id)?;
        Some(self.hooks.remove(position).1)
    }

    /// Take every armed callback, leaving its slot marked fired.
    fn fire(&mut self) -> Vec<ExitCallback> {
        self.hooks
            .iter_mut()
            .filter_map(|(_, slot)| match std::mem::replace(slot, Slot::Fired) {
                Slot::Armed(callback) => Some(callback),
                Slot::Fired => None,
            })
            .collect()
    }
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());
static NEXT_HOOK: AtomicU64 = AtomicU64::new(1);

fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

/// [`ExitHook`] driven by SIGINT and SIGTERM (ctrl-c off unix).
///
/// Dropping the hook withdraws its callback.
pub struct SignalExitHook {
    id: u64,
}

impl SignalExitHook {
    pub fn new() -> Self {
        Self {
            id: NEXT_HOOK.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Default for SignalExitHook {
    fn default() -> Self {
        Self::new()
    }
}

impl ExitHook for SignalExitHook {
    fn register(&self, callback: ExitCallback) -> Result<(), HookError> {
        let mut registry = registry();
        match registry.slot(self.id) {
            Some(Slot::Armed(_)) => return Err(HookError::AlreadyRegistered),
            Some(Slot::Fired) => return Err(HookError::ProcessExiting),
            None => {}
        }

        if !registry.watching {
            spawn_watcher()?;
            registry.watching = true;
        }

        registry.hooks.push((self.id, Slot::Armed(callback)));
        tracing::debug!(hook = self.id, "Exit hook registered");
        Ok(())
    }

    fn unregister(&self) -> Result<(), HookError> {
        match registry().remove(self.id) {
            None => Err(HookError::NotRegistered),
            Some(Slot::Fired) => Err(HookError::ProcessExiting),
            Some(Slot::Armed(_)) => {
                tracing::debug!(hook = self.id, "Exit hook unregistered");
                Ok(())
            }
        }
    }
}

impl Drop for SignalExitHook {
    fn drop(&mut self) {
        registry().remove(self.id);
    }
}

/// Install the signal listeners on this thread, then watch them on a
/// dedicated one for the rest of the process.
fn spawn_watcher() -> Result<(), HookError> {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    // Install here so failures reach the caller.
    let mut signals = {
        let _guard = rt.enter();
        ExitSignals::install()?
    };

    thread::Builder::new().name("exit-signals".to_string()).spawn(move || {
        rt.block_on(async move {
            loop {
                let signal = signals.recv().await;
                on_signal(signal);
            }
        })
    })?;
    Ok(())
}

fn on_signal(signal: ExitSignal) {
    let callbacks = registry().fire();
    if callbacks.is_empty() {
        tracing::info!(signal = signal.name(), "Exit signal received with no callback armed, exiting");
        std::process::exit(signal.exit_code());
    }

    tracing::info!(signal = signal.name(), callbacks = callbacks.len(), "Exit signal received");
    let spawned = thread::Builder::new().name("exit-hook".to_string()).spawn(move || {
        for callback in callbacks {
            callback();
        }
    });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "Failed to run exit callbacks, exiting");
        std::process::exit(signal.exit_code());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitSignal {
    Interrupt,
    #[cfg_attr(not(unix), allow(dead_code))]
    Terminate,
}

impl ExitSignal {
    fn name(&self) -> &'static str {
        match self {
            ExitSignal::Interrupt => "SIGINT",
            ExitSignal::Terminate => "SIGTERM",
        }
    }

    /// Shell convention: 128 + signal number.
    fn exit_code(&self) -> i32 {
        match self {
            ExitSignal::Interrupt => 130,
            ExitSignal::Terminate => 143,
        }
    }
}

#[cfg(unix)]
struct ExitSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ExitSignals {
    fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> ExitSignal {
        tokio::select! {
            _ = self.interrupt.recv() => ExitSignal::Interrupt,
            _ = self.terminate.recv() => ExitSignal::Terminate,
        }
    }
}

#[cfg(not(unix))]
struct ExitSignals;

#[cfg(not(unix))]
impl ExitSignals {
    fn install() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> ExitSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        ExitSignal::Interrupt
    }
}
