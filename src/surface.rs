//! Control surface over a live engine instance
//!
//! Every operation follows the same discipline: extract the raw pointer
//! under the handle's state lock, drop the lock, perform the native call,
//! and only then touch host-managed state again. The native calls may
//! block for a long time (`wait_for_quit` indefinitely), so holding any
//! host-side lock across them would stall the host for the engine's whole
//! lifetime.
//!
//! The teardown operations (`wait_for_quit`, `cleanup`) mark the handle
//! Released on return; a packet send racing a teardown resolves through
//! the handle's state check rather than through engine internals.

use std::ffi::CString;
use std::os::raw::{c_char, c_int};

use crate::bridge;
use crate::error::EngineError;
use crate::ffi;
use crate::handle::EngineHandle;

/// Default maximum simultaneous TCP connections
pub const DEFAULT_TCP_MAX_CONNECTIONS: i32 = 64;

/// Default TCP accept backlog
pub const DEFAULT_TCP_BACKLOG: i32 = 128;

impl EngineHandle {
    /// Open a UDP command listener on the instance
    ///
    /// Single attempt, no retry; the result is whatever the native layer
    /// reports.
    ///
    /// # Arguments
    /// * `bind_to` - Address to bind, e.g. "127.0.0.1"
    /// * `port` - Port to bind; 0 asks the OS for an ephemeral port
    ///
    /// # Returns
    /// * `Ok(true)` - Listener opened
    /// * `Ok(false)` - Native layer reported failure (e.g. port in use)
    /// * `Err(EngineError::StaleHandle)` - Handle released; no native call
    pub fn open_udp(&self, bind_to: &str, port: u16) -> Result<bool, EngineError> {
        let world = self.extract("open_udp")?;
        let bind_to = c_string("bind_to", bind_to)?;
        let result =
            unsafe { ffi::world_open_udp(world.as_ptr(), bind_to.as_ptr(), c_int::from(port)) };
        Ok(result != 0)
    }

    /// Open a TCP command listener on the instance
    ///
    /// # Arguments
    /// * `bind_to` - Address to bind
    /// * `port` - Port to bind; 0 asks the OS for an ephemeral port
    /// * `max_connections` - Simultaneous client limit
    ///   ([`DEFAULT_TCP_MAX_CONNECTIONS`] unless the deployment says
    ///   otherwise)
    /// * `backlog` - Accept queue depth ([`DEFAULT_TCP_BACKLOG`])
    ///
    /// # Returns
    /// Same contract as [`EngineHandle::open_udp`].
    pub fn open_tcp(
        &self,
        bind_to: &str,
        port: u16,
        max_connections: i32,
        backlog: i32,
    ) -> Result<bool, EngineError> {
        let world = self.extract("open_tcp")?;
        let bind_to = c_string("bind_to", bind_to)?;
        let result = unsafe {
            ffi::world_open_tcp(
                world.as_ptr(),
                bind_to.as_ptr(),
                c_int::from(port),
                max_connections,
                backlog,
            )
        };
        Ok(result != 0)
    }

    /// Inject a raw command packet into the instance
    ///
    /// The bytes are defensively copied into a mutable buffer first: the
    /// native signature takes mutable data even though it does not modify
    /// it, and handing it a view into host-owned memory would be unsound.
    /// Replies are routed to the installed reply sink, or to a neutral
    /// no-op when none is installed; the choice is made once per call
    /// under the reply slot's lock.
    ///
    /// # Arguments
    /// * `packet` - Raw packet bytes; left untouched
    ///
    /// # Returns
    /// * `Ok(bool)` - Native layer's success report
    /// * `Err(EngineError::StaleHandle)` - Handle released; no native call
    pub fn send_packet(&self, packet: &[u8]) -> Result<bool, EngineError> {
        let world = self.extract("send_packet")?;
        let size = c_int::try_from(packet.len()).map_err(|_| EngineError::InvalidOption {
            field: "packet",
            reason: "packet exceeds the native size limit".to_string(),
        })?;
        let mut buffer = packet.to_vec();
        let reply_func = bridge::select_reply_func();
        let result = unsafe {
            ffi::world_send_packet(
                world.as_ptr(),
                size,
                buffer.as_mut_ptr() as *mut c_char,
                reply_func,
            )
        };
        Ok(result)
    }

    /// Block until the engine shuts itself down, then mark the handle stale
    ///
    /// Potentially indefinite: unblocked only by the engine's shutdown
    /// command or a forced [`EngineHandle::cleanup`] from another thread.
    /// No host-side lock is held for the duration. On return the native
    /// instance no longer exists; every subsequent operation on this
    /// handle observes `StaleHandle`.
    ///
    /// # Arguments
    /// * `unload_plugins` - Whether the engine unloads its plugins during
    ///   teardown
    pub fn wait_for_quit(&self, unload_plugins: bool) -> Result<(), EngineError> {
        let world = self.extract("wait_for_quit")?;
        unsafe { ffi::world_wait_for_quit(world.as_ptr(), unload_plugins) };
        self.release();
        log::info!("[Engine] instance quit");
        Ok(())
    }

    /// Force engine teardown without waiting for a shutdown command
    ///
    /// Bounded: returns once the engine has dismantled the instance. Also
    /// wakes a `wait_for_quit` blocked on the same instance. Afterwards
    /// the handle is stale; dropping it later remains a no-op towards the
    /// engine.
    ///
    /// # Arguments
    /// * `unload_plugins` - Whether the engine unloads its plugins during
    ///   teardown
    pub fn cleanup(&self, unload_plugins: bool) -> Result<(), EngineError> {
        let world = self.extract("cleanup")?;
        unsafe { ffi::world_cleanup(world.as_ptr(), unload_plugins) };
        self.release();
        log::info!("[Engine] instance cleaned up");
        Ok(())
    }
}

/// Convert a host string for a native call
fn c_string(field: &'static str, value: &str) -> Result<CString, EngineError> {
    CString::new(value).map_err(|_| EngineError::InvalidOption {
        field,
        reason: "contains an interior NUL byte".to_string(),
    })
}
