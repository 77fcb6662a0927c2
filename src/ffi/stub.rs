//! Stub engine backend for development and testing
//!
//! This module provides an in-process double of the engine's C surface that
//! can run on machines without `libscsynth` installed. The stub maintains
//! the same `unsafe fn` signatures as the native backend but renders no
//! audio: it binds real sockets (so listener behavior, including duplicate
//! binds, is the operating system's), records and echoes command packets
//! through the caller's reply trampoline, and treats a packet addressed
//! `/quit` as the engine's shutdown signal.
//!
//! This enables running `cargo test` against the full boundary layer
//! without audio hardware or a SuperCollider installation.
//!
//! Teardown contract: exactly one of [`world_wait_for_quit`] and
//! [`world_cleanup`] frees a given instance. A process-wide registry of
//! live instances decides the winner, mirroring the exactly-once guarantee
//! the real engine provides internally.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::net::{TcpListener, UdpSocket};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::slice;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use once_cell::sync::Lazy;

use super::{PrintFunc, ReplyFunc, World, WorldOptions};

/// Installed print hook, shared by every stub instance
static PRINT_HOOK: Lazy<Mutex<PrintFunc>> = Lazy::new(|| Mutex::new(None));

/// Live stub instances keyed by the identifier handed out as `*mut World`
///
/// The pointer returned by [`world_new`] is an opaque, never-reused
/// identifier minted from [`NEXT_WORLD_ID`]; it is never dereferenced.
/// An entry exists until whichever teardown path wins removes it; lookups
/// after that point fail instead of touching a dead instance.
static LIVE_WORLDS: Lazy<Mutex<HashMap<usize, Arc<StubWorld>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Source of unique instance identifiers; starts at 1 so no identifier is
/// ever the null pointer
static NEXT_WORLD_ID: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(1);

/// One stub engine instance
struct StubWorld {
    state: Mutex<StubState>,
    quit_signal: Condvar,
}

/// Mutable state of a stub instance
///
/// Sockets and packets are held for their side effects and for test
/// inspection; only the quit flag is read on the hot path.
#[allow(dead_code)]
struct StubState {
    quit_requested: bool,
    udp_sockets: Vec<UdpSocket>,
    tcp_listeners: Vec<TcpListener>,
    packets: Vec<Vec<u8>>,
    options: StubOptionsSnapshot,
}

/// Owned copies of the option strings wired into `WorldOptions`
///
/// Reading these at creation time exercises the caller's pointer/lifetime
/// contract; tests assert they arrived intact.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct StubOptionsSnapshot {
    ugen_plugins_path: Option<String>,
    #[allow(dead_code)]
    restricted_path: Option<String>,
    #[allow(dead_code)]
    password: Option<String>,
    in_device_name: Option<String>,
    out_device_name: Option<String>,
    #[allow(dead_code)]
    input_streams_enabled: Option<String>,
    #[allow(dead_code)]
    output_streams_enabled: Option<String>,
}

impl StubWorld {
    fn new(options: StubOptionsSnapshot) -> Self {
        Self {
            state: Mutex::new(StubState {
                quit_requested: false,
                udp_sockets: Vec::new(),
                tcp_listeners: Vec::new(),
                packets: Vec::new(),
                options,
            }),
            quit_signal: Condvar::new(),
        }
    }

    /// Lock instance state, recovering from poisoning
    ///
    /// The stub must stay usable even if a test thread panicked while
    /// holding the lock.
    fn lock_state(&self) -> MutexGuard<'_, StubState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn request_quit(&self) {
        let mut state = self.lock_state();
        state.quit_requested = true;
        drop(state);
        self.quit_signal.notify_all();
    }
}

/// Look up a live instance without dereferencing the raw pointer
fn lookup(world: *mut World) -> Option<Arc<StubWorld>> {
    let registry = match LIVE_WORLDS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    registry.get(&(world as usize)).cloned()
}

/// Remove an instance from the registry, dropping its sockets and state
///
/// Returns true for the caller that won teardown; false if the instance
/// was already gone. Remaining clones (a blocked waiter) keep the state
/// alive until they return.
fn teardown(world: *mut World) -> bool {
    let mut registry = match LIVE_WORLDS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    registry.remove(&(world as usize)).is_some()
}

/// Emit a newline-terminated line through the installed print hook, if any
///
/// Chunks carry their trailing newline, as the real engine's printf-style
/// output does; line assembly is the host's business.
fn emit_line(text: &str) {
    let hook = {
        match PRINT_HOOK.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    };
    if let Some(hook) = hook {
        if let Ok(message) = CString::new(format!("{text}\n")) {
            unsafe {
                hook(message.as_ptr());
            }
        }
    }
}

/// Copy an optional C string out of the options struct
unsafe fn snapshot_string(pointer: *const c_char) -> Option<String> {
    if pointer.is_null() {
        None
    } else {
        Some(CStr::from_ptr(pointer).to_string_lossy().into_owned())
    }
}

/// Construct a stub engine instance
///
/// Fails (returns null) for a null options pointer or a zero block size,
/// giving callers a deterministic creation-failure path.
///
/// # Safety
/// Same contract as the native backend: `options` must be fully
/// initialized and its string pointers readable.
pub unsafe fn world_new(options: *mut WorldOptions) -> *mut World {
    if options.is_null() {
        return ptr::null_mut();
    }
    let opts = &*options;
    if opts.buf_length == 0 {
        return ptr::null_mut();
    }

    let snapshot = StubOptionsSnapshot {
        ugen_plugins_path: snapshot_string(opts.ugen_plugins_path),
        restricted_path: snapshot_string(opts.restricted_path),
        password: snapshot_string(opts.password),
        in_device_name: snapshot_string(opts.in_device_name),
        out_device_name: snapshot_string(opts.out_device_name),
        input_streams_enabled: snapshot_string(opts.input_streams_enabled),
        output_streams_enabled: snapshot_string(opts.output_streams_enabled),
    };

    if opts.verbosity >= 0 {
        if let Some(path) = &snapshot.ugen_plugins_path {
            emit_line(&format!("loading plugins from {path}"));
        }
        if let Some(name) = &snapshot.in_device_name {
            emit_line(&format!("input device: {name}"));
        }
        if let Some(name) = &snapshot.out_device_name {
            emit_line(&format!("output device: {name}"));
        }
    }

    let world = Arc::new(StubWorld::new(snapshot));
    let pointer = NEXT_WORLD_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed) as *mut World;
    {
        let mut registry = match LIVE_WORLDS.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        registry.insert(pointer as usize, world);
    }

    emit_line("SuperCollider 3 server ready.");
    pointer
}

/// Bind a UDP command listener; nonzero on success
///
/// # Safety
/// `bind_to` must be a NUL-terminated address string.
pub unsafe fn world_open_udp(world: *mut World, bind_to: *const c_char, port: c_int) -> c_int {
    let Some(instance) = lookup(world) else {
        return 0;
    };
    let address = CStr::from_ptr(bind_to).to_string_lossy();
    match UdpSocket::bind(format!("{address}:{port}")) {
        Ok(socket) => {
            instance.lock_state().udp_sockets.push(socket);
            1
        }
        Err(err) => {
            emit_line(&format!("could not bind UDP address {address}:{port}: {err}"));
            0
        }
    }
}

/// Bind a TCP command listener; nonzero on success
///
/// # Safety
/// `bind_to` must be a NUL-terminated address string.
pub unsafe fn world_open_tcp(
    world: *mut World,
    bind_to: *const c_char,
    port: c_int,
    _max_connections: c_int,
    _backlog: c_int,
) -> c_int {
    let Some(instance) = lookup(world) else {
        return 0;
    };
    let address = CStr::from_ptr(bind_to).to_string_lossy();
    match TcpListener::bind(format!("{address}:{port}")) {
        Ok(listener) => {
            instance.lock_state().tcp_listeners.push(listener);
            1
        }
        Err(err) => {
            emit_line(&format!("could not bind TCP address {address}:{port}: {err}"));
            0
        }
    }
}

/// Record a command packet, echo it through the reply trampoline, and
/// honor `/quit`
///
/// # Safety
/// `data` must be valid for `size` bytes and writable.
pub unsafe fn world_send_packet(
    world: *mut World,
    size: c_int,
    data: *mut c_char,
    reply_func: ReplyFunc,
) -> bool {
    if size <= 0 || data.is_null() {
        return false;
    }
    let Some(instance) = lookup(world) else {
        return false;
    };

    let bytes = slice::from_raw_parts(data as *const u8, size as usize);
    let mut copy = bytes.to_vec();
    instance.lock_state().packets.push(copy.clone());

    // Echo the packet back, standing in for the engine's command replies.
    reply_func(ptr::null_mut(), copy.as_mut_ptr() as *mut c_char, size);

    if copy.starts_with(b"/quit") {
        emit_line("/quit message received");
        instance.request_quit();
    }
    true
}

/// Block until the instance receives `/quit` or a forced cleanup, then
/// tear down if this caller wins
///
/// # Safety
/// `world` must come from [`world_new`]; it is invalid once this returns.
pub unsafe fn world_wait_for_quit(world: *mut World, _unload_plugins: bool) {
    let Some(instance) = lookup(world) else {
        return;
    };
    let mut state = instance.lock_state();
    while !state.quit_requested {
        state = match instance.quit_signal.wait(state) {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
    }
    drop(state);
    teardown(world);
}

/// Force teardown, waking any blocked waiter first
///
/// # Safety
/// `world` must come from [`world_new`]; it is invalid once this returns.
pub unsafe fn world_cleanup(world: *mut World, _unload_plugins: bool) {
    let Some(instance) = lookup(world) else {
        return;
    };
    instance.request_quit();
    teardown(world);
}

/// Install or clear the print hook shared by all stub instances
///
/// # Safety
/// The hook will be invoked from whichever thread triggers engine output.
pub unsafe fn set_print_func(func: PrintFunc) {
    match PRINT_HOOK.lock() {
        Ok(mut guard) => *guard = func,
        Err(poisoned) => *poisoned.into_inner() = func,
    }
}
