//! Declared C surface of the embedded synthesis engine
//!
//! The engine is consumed through a handful of `World_*` entry points plus
//! two installable hooks (print, reply). Two backends provide them:
//!
//! - `native` (feature `scsynth`): links the system `libscsynth`.
//! - `stub` (default): an in-process engine double that binds real sockets
//!   and signals real quits, so the whole boundary layer can be exercised
//!   by `cargo test` on any machine.
//!
//! Both backends expose the same `unsafe fn` surface; everything above this
//! module is backend-agnostic.

use std::os::raw::{c_char, c_int};

/// Opaque engine instance
///
/// Only ever handled by pointer; the layout belongs to the engine.
#[repr(C)]
pub struct World {
    _opaque: [u8; 0],
}

/// Opaque reply routing context passed through to reply callbacks
#[repr(C)]
pub struct ReplyAddress {
    _opaque: [u8; 0],
}

/// Print hook installed via [`set_print_func`]
///
/// Receives a formatted, NUL-terminated message on an arbitrary engine
/// thread. Nullable: `None` uninstalls the hook.
pub type PrintFunc = Option<unsafe extern "C" fn(message: *const c_char) -> c_int>;

/// Reply callback passed to [`world_send_packet`]
///
/// Invoked on an arbitrary engine thread with the raw reply bytes. Never
/// null: callers that want no replies pass a no-op trampoline.
pub type ReplyFunc =
    unsafe extern "C" fn(address: *mut ReplyAddress, message: *mut c_char, size: c_int);

/// Native counterpart of [`crate::config::EngineOptions`]
///
/// String fields are raw pointers the engine retains for its own lifetime;
/// they must point into a [`crate::arena::StringArena`] owned by the same
/// handle (null = option absent).
#[repr(C)]
pub struct WorldOptions {
    pub password: *const c_char,
    pub num_buffers: u32,
    pub max_logins: u32,
    pub max_nodes: u32,
    pub num_audio_bus_channels: u32,
    pub num_input_bus_channels: u32,
    pub num_output_bus_channels: u32,
    pub num_control_bus_channels: u32,
    pub buf_length: u32,
    pub realtime_memory_size: u32,
    pub max_wire_bufs: u32,
    pub num_rgens: u32,
    pub max_graph_defs: u32,
    pub preferred_sample_rate: u32,
    pub preferred_hardware_buffer_frame_size: u32,
    pub load_graph_defs: u32,
    pub realtime: bool,
    pub memory_locking: bool,
    pub rendezvous: bool,
    pub verbosity: i32,
    pub shared_memory_id: i32,
    pub safety_clip_threshold: f32,
    pub ugen_plugins_path: *const c_char,
    pub restricted_path: *const c_char,
    pub in_device_name: *const c_char,
    pub out_device_name: *const c_char,
    pub input_streams_enabled: *const c_char,
    pub output_streams_enabled: *const c_char,
}

cfg_if::cfg_if! {
    if #[cfg(feature = "scsynth")] {
        mod native;
        pub use native::{
            set_print_func, world_cleanup, world_new, world_open_tcp, world_open_udp,
            world_send_packet, world_wait_for_quit,
        };
    } else {
        mod stub;
        pub use stub::{
            set_print_func, world_cleanup, world_new, world_open_tcp, world_open_udp,
            world_send_packet, world_wait_for_quit,
        };
    }
}
