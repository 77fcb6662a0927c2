//! Boot protocol for the embedded engine
//!
//! [`EmbeddedEngine`] drives one engine instance through its lifecycle:
//! create, open the command listener, forward engine output into
//! structured logging, park a waiter thread in `wait_for_quit`, and tear
//! everything down again with a bounded grace period. Hosts that want the
//! raw control surface can use [`crate::handle::EngineHandle`] directly;
//! this manager packages the choreography around it.
//!
//! The engine's globals are not re-entrant, so at most one embedded
//! instance may be active per process; a process-wide guard enforces it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::bridge;
use crate::config::EngineOptions;
use crate::error::{log_engine_error, EngineError};
use crate::handle::EngineHandle;

/// Default command listener address
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Default command listener port
pub const DEFAULT_PORT: u16 = 57110;

/// Grace period the engine gets to exit on its own before forced cleanup
const QUIT_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle event fan-out capacity
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Shutdown command packet (address "/quit", no arguments)
const QUIT_PACKET: &[u8] = b"/quit\0\0\0,\0\0\0";

/// Whether any embedded instance is active in this process
static ACTIVE_INSTANCE: AtomicBool = AtomicBool::new(false);

/// Lifecycle state of one managed instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStatus {
    Offline,
    Booting,
    Online,
    Quitting,
}

/// Lifecycle notifications delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Instance is online and listening
    Booted,
    /// One complete line of engine output
    LogLine(String),
    /// Instance exited after a requested shutdown
    Quit,
    /// Instance exited without a shutdown request
    Panic,
}

/// Assembles print-hook chunks into complete output lines
///
/// The engine's printf-style output arrives in arbitrary chunks; only
/// complete lines are forwarded, partial tails stay buffered.
struct LineAssembler {
    buffer: String,
}

impl LineAssembler {
    fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    fn push(&mut self, chunk: &str, mut on_line: impl FnMut(&str)) {
        self.buffer.push_str(chunk);
        while let Some(index) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=index).collect();
            on_line(line.trim_end_matches(|c| c == '\n' || c == '\r'));
        }
    }
}

/// State container guarded by the manager lock
struct BootState {
    status: BootStatus,
    handle: Option<Arc<EngineHandle>>,
    waiter: Option<thread::JoinHandle<()>>,
    exit_rx: Option<mpsc::Receiver<()>>,
}

/// Manages one embedded engine instance's boot/quit lifecycle
///
/// # Example
/// ```ignore
/// let engine = EmbeddedEngine::new();
/// engine.boot(&EngineOptions::default(), DEFAULT_BIND_ADDRESS, DEFAULT_PORT)?;
/// // ... send packets through engine.handle() ...
/// engine.quit()?;
/// ```
pub struct EmbeddedEngine {
    state: Arc<Mutex<BootState>>,
    events: broadcast::Sender<EngineEvent>,
    label: String,
}

impl EmbeddedEngine {
    /// Create a manager with the default label
    pub fn new() -> Self {
        Self::with_label("server")
    }

    /// Create a manager with a custom label used in forwarded log lines
    pub fn with_label(label: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(BootState {
                status: BootStatus::Offline,
                handle: None,
                waiter: None,
                exit_rx: None,
            })),
            events,
            label: label.into(),
        }
    }

    /// Boot an engine instance and open its UDP command listener
    ///
    /// Already-booted managers return `Ok` without touching the engine.
    /// The engine constructor and listener bind run without any manager
    /// lock held.
    ///
    /// # Arguments
    /// * `options` - Engine configuration
    /// * `bind_to` - Listener address, typically [`DEFAULT_BIND_ADDRESS`]
    /// * `port` - Listener port, typically [`DEFAULT_PORT`]
    ///
    /// # Errors
    /// - `AlreadyRunning` - Another embedded instance is active in this
    ///   process
    /// - `CreationFailed` / `InvalidOption` - Engine creation failed
    /// - `BootFailed` - Listener could not be opened; the instance was
    ///   cleaned up again
    pub fn boot(
        &self,
        options: &EngineOptions,
        bind_to: &str,
        port: u16,
    ) -> Result<(), EngineError> {
        log::info!("[{}:{}/{}] booting (embedded) ...", bind_to, port, self.label);
        {
            let mut state = self.lock_state();
            if state.status != BootStatus::Offline {
                log::info!("[{}:{}/{}] ... already booted!", bind_to, port, self.label);
                return Ok(());
            }
            if ACTIVE_INSTANCE
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                let err = EngineError::AlreadyRunning;
                log_engine_error(&err, "boot");
                return Err(err);
            }
            state.status = BootStatus::Booting;
        }

        let handle = match EngineHandle::create(options) {
            Ok(handle) => Arc::new(handle),
            Err(err) => {
                self.abort_boot();
                return Err(err);
            }
        };

        match handle.open_udp(bind_to, port) {
            Ok(true) => {}
            Ok(false) => {
                let _ = handle.cleanup(false);
                self.abort_boot();
                let err = EngineError::BootFailed {
                    reason: format!("could not open UDP listener on {bind_to}:{port}"),
                };
                log_engine_error(&err, "boot");
                return Err(err);
            }
            Err(err) => {
                let _ = handle.cleanup(false);
                self.abort_boot();
                return Err(err);
            }
        }

        // Forward engine output as structured log lines and host events.
        let label = self.label.clone();
        let line_events = self.events.clone();
        let assembler = Mutex::new(LineAssembler::new());
        bridge::set_log_sink(Some(Box::new(move |chunk: &str| {
            let mut assembler = match assembler.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            assembler.push(chunk, |line| {
                log::info!("[scsynth/{label}] {line}");
                let _ = line_events.send(EngineEvent::LogLine(line.to_string()));
            });
        })));

        let (exit_tx, exit_rx) = mpsc::channel();
        {
            let mut state = self.lock_state();
            state.status = BootStatus::Online;
            state.handle = Some(Arc::clone(&handle));
            state.exit_rx = Some(exit_rx);
        }

        let waiter_state = Arc::clone(&self.state);
        let waiter_handle = Arc::clone(&handle);
        let waiter_events = self.events.clone();
        let waiter = thread::spawn(move || {
            let _ = waiter_handle.wait_for_quit(false);
            bridge::set_log_sink(None);
            let was_quitting = {
                let mut state = match waiter_state.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let was_quitting = state.status == BootStatus::Quitting;
                state.status = BootStatus::Offline;
                state.handle = None;
                was_quitting
            };
            ACTIVE_INSTANCE.store(false, Ordering::SeqCst);
            let _ = exit_tx.send(());
            let _ = waiter_events.send(if was_quitting {
                EngineEvent::Quit
            } else {
                EngineEvent::Panic
            });
        });
        self.lock_state().waiter = Some(waiter);

        let _ = self.events.send(EngineEvent::Booted);
        tracing::debug!(label = %self.label, port, "embedded engine online");
        log::info!("[{}:{}/{}] ... booted!", bind_to, port, self.label);
        Ok(())
    }

    /// Shut the managed instance down
    ///
    /// Idempotent: quitting an offline manager is a no-op. Sends the
    /// shutdown command, gives the engine a bounded grace period to exit
    /// on its own, then forces `cleanup` (which also unblocks the waiter)
    /// and joins the waiter thread. No manager lock is held while waiting.
    pub fn quit(&self) -> Result<(), EngineError> {
        let (handle, exit_rx, waiter) = {
            let mut state = self.lock_state();
            if state.status != BootStatus::Online {
                log::info!("[{}] ... already quit!", self.label);
                return Ok(());
            }
            state.status = BootStatus::Quitting;
            (state.handle.clone(), state.exit_rx.take(), state.waiter.take())
        };
        log::info!("[{}] quitting ...", self.label);

        // Ask the engine to exit on its own first.
        if let Some(handle) = &handle {
            let _ = handle.send_packet(QUIT_PACKET);
        }

        let exited = match &exit_rx {
            Some(exit_rx) => exit_rx.recv_timeout(QUIT_GRACE).is_ok(),
            None => false,
        };
        if !exited {
            if let Some(handle) = &handle {
                match handle.cleanup(false) {
                    // The waiter tore the instance down in the meantime.
                    Ok(()) | Err(EngineError::StaleHandle) => {}
                    Err(err) => log_engine_error(&err, "quit"),
                }
            }
        }

        if let Some(waiter) = waiter {
            let _ = waiter.join();
        }
        log::info!("[{}] ... quit!", self.label);
        Ok(())
    }

    /// Current lifecycle status
    pub fn status(&self) -> BootStatus {
        self.lock_state().status
    }

    /// Handle of the online instance, for direct control-surface access
    pub fn handle(&self) -> Option<Arc<EngineHandle>> {
        self.lock_state().handle.clone()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Roll back a failed boot attempt
    fn abort_boot(&self) {
        self.lock_state().status = BootStatus::Offline;
        ACTIVE_INSTANCE.store(false, Ordering::SeqCst);
    }

    /// Lock manager state, recovering from poisoning
    fn lock_state(&self) -> MutexGuard<'_, BootState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for EmbeddedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EmbeddedEngine {
    /// Last-resort shutdown for hosts that forgot to quit
    fn drop(&mut self) {
        let _ = self.quit();
    }
}
