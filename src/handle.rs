//! Engine handle lifecycle management
//!
//! One [`EngineHandle`] owns one raw engine instance pointer together with
//! the [`StringArena`] backing that instance's configuration strings. The
//! handle is a tagged Live/Released state behind a mutex rather than a bare
//! nullable pointer: every operation goes through [`EngineHandle::extract`]
//! and fails with `StaleHandle` instead of dereferencing a dead instance.
//!
//! Two cleanups, two triggers: dropping the handle frees only what the
//! wrapper allocated (the arena); the engine's own resources are torn down
//! exclusively by the explicit lifecycle calls (`wait_for_quit`,
//! `cleanup`), which may already have run by the time the handle goes away.

use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard};

use crate::arena::StringArena;
use crate::config::EngineOptions;
use crate::error::{log_engine_error, EngineError};
use crate::ffi;

/// Lifecycle state of the wrapped engine instance
#[derive(Debug)]
enum HandleState {
    /// Instance is (as far as the wrapper knows) alive
    Live(NonNull<ffi::World>),
    /// Instance released explicitly or torn down by the engine itself
    Released,
}

/// Opaque, host-owned token for one engine instance
///
/// Exactly one handle owns a given raw pointer; the pointer never leaves
/// this module except for the duration of a single native call. Dropping
/// the handle never re-enters native teardown: if the host forgot to
/// quit, the instance was either already dismantled by `wait_for_quit` /
/// `cleanup`, or stays alive until process exit, exactly as the engine's
/// explicit lifecycle demands.
#[derive(Debug)]
pub struct EngineHandle {
    state: Mutex<HandleState>,
    /// Owned string storage backing the native option pointers. Not read
    /// again after creation; it must simply outlive the engine instance.
    _arena: StringArena,
}

// SAFETY: the raw pointer is only obtained through extract() under the
// state mutex, and the engine's entry points accept calls from any thread.
// The arena is immutable after creation.
unsafe impl Send for EngineHandle {}
unsafe impl Sync for EngineHandle {}

impl EngineHandle {
    /// Create an engine instance from the given options
    ///
    /// Interns the optional configuration strings into a fresh arena,
    /// wires their pointers into the native options record, and invokes
    /// the engine constructor. The constructor may probe audio devices
    /// and block; no host-side lock is held across it.
    ///
    /// # Arguments
    /// * `options` - Configuration, consumed by value into the native call
    ///
    /// # Returns
    /// * `Ok(EngineHandle)` - Live handle bundling pointer and arena
    /// * `Err(EngineError)` - Validation failed, a string contained an
    ///   interior NUL, or the native constructor returned null (the arena
    ///   is discarded; no handle exists)
    pub fn create(options: &EngineOptions) -> Result<Self, EngineError> {
        options.validate().map_err(|err| {
            log_engine_error(&err, "create");
            err
        })?;

        let mut arena = StringArena::new();
        let mut native = build_world_options(options, &mut arena)?;

        let world = unsafe { ffi::world_new(&mut native) };
        let Some(world) = NonNull::new(world) else {
            let err = EngineError::CreationFailed {
                reason: "engine constructor returned null".to_string(),
            };
            log_engine_error(&err, "create");
            return Err(err);
        };

        log::info!("[Engine] instance created");
        Ok(Self {
            state: Mutex::new(HandleState::Live(world)),
            _arena: arena,
        })
    }

    /// Get the raw instance pointer for one native call
    ///
    /// The single gate every control-surface operation passes through.
    ///
    /// # Arguments
    /// * `context` - Operation name for error logging
    ///
    /// # Returns
    /// * `Ok(NonNull)` - Instance pointer; valid until a teardown path runs
    /// * `Err(EngineError::StaleHandle)` - Handle was released or the
    ///   instance already torn down; no native call may be made
    pub(crate) fn extract(&self, context: &str) -> Result<NonNull<ffi::World>, EngineError> {
        match *self.lock_state() {
            HandleState::Live(world) => Ok(world),
            HandleState::Released => {
                let err = EngineError::StaleHandle;
                log_engine_error(&err, context);
                Err(err)
            }
        }
    }

    /// Release the handle's claim on the instance
    ///
    /// Idempotent: releasing an already-released handle is a no-op, never
    /// a double-free. Performs no native call; the engine's own teardown
    /// is triggered only by `wait_for_quit` / `cleanup`.
    pub fn release(&self) {
        *self.lock_state() = HandleState::Released;
    }

    /// Whether the handle has been released
    pub fn is_released(&self) -> bool {
        matches!(*self.lock_state(), HandleState::Released)
    }

    /// Lock handle state, recovering from poisoning
    ///
    /// Native calls never run under this lock, and state transitions
    /// cannot panic midway, so a poisoned guard still holds a coherent
    /// state.
    fn lock_state(&self) -> MutexGuard<'_, HandleState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Wire options and arena-backed string pointers into the native record
fn build_world_options(
    options: &EngineOptions,
    arena: &mut StringArena,
) -> Result<ffi::WorldOptions, EngineError> {
    Ok(ffi::WorldOptions {
        password: arena.intern("password", options.password.as_deref())?,
        num_buffers: options.num_buffers,
        max_logins: options.max_logins,
        max_nodes: options.max_nodes,
        num_audio_bus_channels: options.num_audio_bus_channels,
        num_input_bus_channels: options.num_input_bus_channels,
        num_output_bus_channels: options.num_output_bus_channels,
        num_control_bus_channels: options.num_control_bus_channels,
        buf_length: options.block_size,
        realtime_memory_size: options.realtime_memory_size,
        max_wire_bufs: options.max_wire_bufs,
        num_rgens: options.num_rgens,
        max_graph_defs: options.max_graph_defs,
        preferred_sample_rate: options.preferred_sample_rate,
        preferred_hardware_buffer_frame_size: options.preferred_hardware_buffer_size,
        load_graph_defs: options.load_graph_defs,
        realtime: options.realtime,
        memory_locking: options.memory_locking,
        rendezvous: options.rendezvous,
        verbosity: options.verbosity,
        shared_memory_id: options.shared_memory_id,
        safety_clip_threshold: options.safety_clip_threshold,
        ugen_plugins_path: arena.intern("ugen_plugins_path", options.ugen_plugins_path.as_deref())?,
        restricted_path: arena.intern("restricted_path", options.restricted_path.as_deref())?,
        in_device_name: arena.intern("in_device_name", options.in_device_name.as_deref())?,
        out_device_name: arena.intern("out_device_name", options.out_device_name.as_deref())?,
        input_streams_enabled: arena
            .intern("input_streams_enabled", options.input_streams_enabled.as_deref())?,
        output_streams_enabled: arena
            .intern("output_streams_enabled", options.output_streams_enabled.as_deref())?,
    })
}
