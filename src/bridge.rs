//! Callback bridging between engine threads and host logic
//!
//! The engine invokes its print and reply hooks from internal threads the
//! host does not control, with a C calling convention and at arbitrary
//! times. This module owns the two process-wide callback slots (log sink,
//! reply sink) that bridge those invocations to host callables:
//!
//! - Each slot is guarded by its own mutex; replacing a callable and
//!   invoking it are mutually exclusive, so an invocation either runs the
//!   old callable to completion or observes the new state, never a
//!   half-replaced callable.
//! - Host callables run inside a panic-containment guard. A fault in host
//!   callback logic is discarded rather than unwinding across the
//!   `extern "C"` boundary into the engine.
//! - The log path formats into a fixed stack buffer first and only falls
//!   back to a heap allocation when the message exceeds that capacity, so
//!   the common logging case stays allocation-free while arbitrarily long
//!   messages still arrive unclipped.
//!
//! The two slot locks are independent: log and reply invocations may run
//! concurrently on different engine threads.

use std::ffi::CStr;
use std::fmt::{self, Write as _};
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::slice;
use std::str;
use std::sync::{Mutex, MutexGuard};

use crate::ffi;

/// Host-side log callback, invoked with each engine output message
pub type LogSink = Box<dyn Fn(&str) + Send + 'static>;

/// Host-side reply callback, invoked with raw reply bytes
pub type ReplySink = Box<dyn Fn(&[u8]) + Send + 'static>;

/// Capacity of the stack buffer tried before heap-formatting a log line
const LOG_STACK_CAPACITY: usize = 4096;

/// A replaceable, thread-safe reference to one host callable
///
/// The minimal "latest value" cell: a boxed callable or empty, behind a
/// dedicated mutex that serializes replacement against invocation.
pub(crate) struct CallbackSlot<F: ?Sized> {
    cell: Mutex<Option<Box<F>>>,
}

impl<F: ?Sized> CallbackSlot<F> {
    const fn new() -> Self {
        Self {
            cell: Mutex::new(None),
        }
    }

    /// Lock the slot, recovering from poisoning
    ///
    /// Invocation runs under a panic guard, so the lock cannot normally be
    /// poisoned; recovery keeps the bridge alive even if it is.
    fn lock(&self) -> MutexGuard<'_, Option<Box<F>>> {
        match self.cell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Atomically replace the slot's content; `None` clears it
    fn replace(&self, callback: Option<Box<F>>) {
        *self.lock() = callback;
    }

    /// Whether a callable is currently installed
    fn is_installed(&self) -> bool {
        self.lock().is_some()
    }
}

/// Process-wide log sink slot
static LOG_SLOT: CallbackSlot<dyn Fn(&str) + Send> = CallbackSlot::new();

/// Process-wide reply sink slot
static REPLY_SLOT: CallbackSlot<dyn Fn(&[u8]) + Send> = CallbackSlot::new();

/// Install, replace, or clear the log sink
///
/// Installing any value (including `None`) keeps the engine's print hook
/// pointed at the bridge trampoline, so engine output is never delivered
/// to a dangling function pointer. With an empty slot the trampoline is a
/// no-op.
pub fn set_log_sink(sink: Option<LogSink>) {
    LOG_SLOT.replace(sink);
    unsafe {
        ffi::set_print_func(Some(print_trampoline));
    }
}

/// Install, replace, or clear the reply sink
///
/// The choice between the bridge trampoline and the neutral no-op is made
/// per packet send, under this slot's lock.
pub fn set_reply_sink(sink: Option<ReplySink>) {
    REPLY_SLOT.replace(sink);
}

/// Run a host callable, discarding any panic it raises
///
/// Invariant: nothing may unwind across the `extern "C"` boundary into
/// the engine's internal call path. Faults are dropped silently, not
/// logged and not re-raised.
fn contain_panic<F: FnOnce()>(callable: F) {
    let _ = catch_unwind(AssertUnwindSafe(callable));
}

/// Fixed-capacity line buffer for the allocation-free logging fast path
struct StackLine {
    buf: [u8; LOG_STACK_CAPACITY],
    len: usize,
}

impl StackLine {
    const fn new() -> Self {
        Self {
            buf: [0; LOG_STACK_CAPACITY],
            len: 0,
        }
    }

    fn as_str(&self) -> Option<&str> {
        str::from_utf8(&self.buf[..self.len]).ok()
    }
}

impl fmt::Write for StackLine {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        if self.len + bytes.len() > LOG_STACK_CAPACITY {
            // Signal overflow; the caller switches to the heap path.
            return Err(fmt::Error);
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }
}

/// Format a message and deliver it to the installed log sink, if any
///
/// Two-phase: the message is formatted into a stack buffer; only when it
/// exceeds the fixed capacity is a growable heap buffer used. The sink
/// runs under the slot lock so it is serialized against replacement, and
/// inside the panic guard so sink faults never reach the caller.
pub(crate) fn emit_log(args: fmt::Arguments<'_>) {
    let guard = LOG_SLOT.lock();
    let Some(sink) = guard.as_deref() else {
        return;
    };
    let mut line = StackLine::new();
    if line.write_fmt(args).is_ok() {
        if let Some(text) = line.as_str() {
            contain_panic(|| sink(text));
        }
    } else {
        let text = fmt::format(args);
        contain_panic(|| sink(&text));
    }
}

/// Print hook handed to the engine; runs on arbitrary engine threads
pub(crate) unsafe extern "C" fn print_trampoline(message: *const c_char) -> c_int {
    if message.is_null() {
        return 0;
    }
    let bytes = CStr::from_ptr(message).to_bytes();
    match str::from_utf8(bytes) {
        Ok(text) => emit_log(format_args!("{text}")),
        Err(_) => {
            let text = String::from_utf8_lossy(bytes);
            emit_log(format_args!("{text}"));
        }
    }
    bytes.len() as c_int
}

/// Reply hook handed to the engine when a reply sink is installed
pub(crate) unsafe extern "C" fn reply_trampoline(
    _address: *mut ffi::ReplyAddress,
    message: *mut c_char,
    size: c_int,
) {
    if message.is_null() || size < 0 {
        return;
    }
    let payload = slice::from_raw_parts(message as *const u8, size as usize);
    let guard = REPLY_SLOT.lock();
    if let Some(sink) = guard.as_deref() {
        contain_panic(|| sink(payload));
    }
}

/// Neutral reply hook; keeps the engine away from null function pointers
pub(crate) unsafe extern "C" fn noop_reply(
    _address: *mut ffi::ReplyAddress,
    _message: *mut c_char,
    _size: c_int,
) {
}

/// Choose the reply function for one packet send
///
/// Decided once per call under the reply slot's lock; not re-checked
/// mid-call.
pub(crate) fn select_reply_func() -> ffi::ReplyFunc {
    if REPLY_SLOT.is_installed() {
        reply_trampoline
    } else {
        noop_reply
    }
}

/// Serialize tests that touch the process-wide slots
#[cfg(test)]
pub(crate) fn slot_test_guard() -> MutexGuard<'static, ()> {
    static SLOT_TEST_LOCK: Mutex<()> = Mutex::new(());
    match SLOT_TEST_LOCK.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    /// Install a capturing log sink and return the shared capture buffer
    fn install_capture_log_sink() -> Arc<Mutex<Vec<String>>> {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink_capture = Arc::clone(&captured);
        set_log_sink(Some(Box::new(move |text: &str| {
            sink_capture.lock().unwrap().push(text.to_string());
        })));
        captured
    }

    #[test]
    fn test_short_log_message_arrives_verbatim() {
        let _guard = slot_test_guard();
        let captured = install_capture_log_sink();

        emit_log(format_args!("late 0.{:06}", 312));

        let captured = captured.lock().unwrap();
        assert!(captured.iter().any(|line| line == "late 0.000312"));
        drop(captured);
        set_log_sink(None);
    }

    #[test]
    fn test_oversized_log_message_arrives_unclipped() {
        let _guard = slot_test_guard();
        let captured = install_capture_log_sink();

        let long = "x".repeat(5000);
        emit_log(format_args!("{long}"));

        let captured = captured.lock().unwrap();
        let delivered = captured
            .iter()
            .find(|line| line.len() == 5000)
            .expect("oversized message should be delivered");
        assert_eq!(*delivered, long);
        drop(captured);
        set_log_sink(None);
    }

    #[test]
    fn test_message_at_exact_stack_capacity_arrives() {
        let _guard = slot_test_guard();
        let captured = install_capture_log_sink();

        let exact = "y".repeat(LOG_STACK_CAPACITY);
        emit_log(format_args!("{exact}"));

        let captured = captured.lock().unwrap();
        assert!(captured.iter().any(|line| *line == exact));
        drop(captured);
        set_log_sink(None);
    }

    #[test]
    fn test_cleared_log_sink_is_noop() {
        let _guard = slot_test_guard();
        set_log_sink(None);
        // Nothing to observe; the requirement is that this neither panics
        // nor dereferences a missing callable.
        emit_log(format_args!("dropped on the floor"));
    }

    #[test]
    fn test_panicking_sink_is_contained_and_slot_survives() {
        let _guard = slot_test_guard();
        set_log_sink(Some(Box::new(|_text: &str| {
            panic!("host callback fault");
        })));

        emit_log(format_args!("this invocation faults"));

        // The slot lock must not be poisoned: a replacement sink still
        // receives messages.
        let captured = install_capture_log_sink();
        emit_log(format_args!("recovered"));
        assert!(captured.lock().unwrap().iter().any(|line| line == "recovered"));
        set_log_sink(None);
    }

    #[test]
    fn test_reply_trampoline_delivers_exact_bytes() {
        let _guard = slot_test_guard();
        let captured: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_capture = Arc::clone(&captured);
        set_reply_sink(Some(Box::new(move |payload: &[u8]| {
            sink_capture.lock().unwrap().push(payload.to_vec());
        })));

        let mut payload = vec![0x2f, 0x64, 0x00, 0xff, 0x7f, 0x00, 0x01];
        unsafe {
            reply_trampoline(
                std::ptr::null_mut(),
                payload.as_mut_ptr() as *mut c_char,
                payload.len() as c_int,
            );
        }

        assert_eq!(*captured.lock().unwrap(), vec![payload]);
        set_reply_sink(None);
    }

    #[test]
    fn test_reply_func_selection_tracks_slot() {
        let _guard = slot_test_guard();
        set_reply_sink(None);
        assert_eq!(select_reply_func() as usize, noop_reply as usize);

        set_reply_sink(Some(Box::new(|_payload: &[u8]| {})));
        assert_eq!(select_reply_func() as usize, reply_trampoline as usize);
        set_reply_sink(None);
    }

    #[test]
    fn test_concurrent_replace_and_invoke_never_tear() {
        let _guard = slot_test_guard();
        let invocations = Arc::new(AtomicUsize::new(0));

        let setter = {
            let invocations = Arc::clone(&invocations);
            thread::spawn(move || {
                for round in 0..500 {
                    if round % 2 == 0 {
                        let invocations = Arc::clone(&invocations);
                        set_reply_sink(Some(Box::new(move |payload: &[u8]| {
                            // A torn callable would fault here; observing
                            // intact payload bytes is the invariant.
                            assert_eq!(payload, b"race-probe");
                            invocations.fetch_add(1, Ordering::Relaxed);
                        })));
                    } else {
                        set_reply_sink(None);
                    }
                }
            })
        };

        let invoker = thread::spawn(move || {
            let mut payload = b"race-probe".to_vec();
            for _ in 0..500 {
                unsafe {
                    reply_trampoline(
                        std::ptr::null_mut(),
                        payload.as_mut_ptr() as *mut c_char,
                        payload.len() as c_int,
                    );
                }
            }
        });

        setter.join().expect("setter thread should not panic");
        invoker.join().expect("invoker thread should not panic");
        set_reply_sink(None);
        // Every invocation either ran a whole callable or observed the
        // empty slot; there is no partial state to count.
    }
}
