//! Bindings against the system `libscsynth`
//!
//! Thin `unsafe fn` wrappers over the raw symbols so both backends present
//! the same surface. Every function here may block for as long as the
//! engine pleases; callers must not hold host-side locks across these
//! calls.

use std::os::raw::{c_char, c_int};

use super::{PrintFunc, ReplyFunc, World, WorldOptions};

#[link(name = "scsynth")]
extern "C" {
    fn World_New(options: *mut WorldOptions) -> *mut World;
    fn World_OpenUDP(world: *mut World, bind_to: *const c_char, port: c_int) -> c_int;
    fn World_OpenTCP(
        world: *mut World,
        bind_to: *const c_char,
        port: c_int,
        max_connections: c_int,
        backlog: c_int,
    ) -> c_int;
    fn World_SendPacket(
        world: *mut World,
        size: c_int,
        data: *mut c_char,
        reply_func: ReplyFunc,
    ) -> bool;
    fn World_WaitForQuit(world: *mut World, unload_plugins: bool);
    fn World_Cleanup(world: *mut World, unload_plugins: bool);
    fn SetPrintFunc(func: PrintFunc);
}

/// Construct an engine instance; may perform device I/O and block
///
/// # Safety
/// `options` must point to a fully initialized [`WorldOptions`] whose
/// string pointers outlive the returned instance.
pub unsafe fn world_new(options: *mut WorldOptions) -> *mut World {
    World_New(options)
}

/// Open a UDP command listener; nonzero on success
///
/// # Safety
/// `world` must be a live engine instance; `bind_to` a NUL-terminated
/// address string.
pub unsafe fn world_open_udp(world: *mut World, bind_to: *const c_char, port: c_int) -> c_int {
    World_OpenUDP(world, bind_to, port)
}

/// Open a TCP command listener; nonzero on success
///
/// # Safety
/// Same contract as [`world_open_udp`].
pub unsafe fn world_open_tcp(
    world: *mut World,
    bind_to: *const c_char,
    port: c_int,
    max_connections: c_int,
    backlog: c_int,
) -> c_int {
    World_OpenTCP(world, bind_to, port, max_connections, backlog)
}

/// Deliver a raw command packet; replies arrive through `reply_func`
///
/// # Safety
/// `world` must be a live engine instance; `data` must be valid for
/// `size` bytes and writable (the engine API takes a mutable buffer).
pub unsafe fn world_send_packet(
    world: *mut World,
    size: c_int,
    data: *mut c_char,
    reply_func: ReplyFunc,
) -> bool {
    World_SendPacket(world, size, data, reply_func)
}

/// Block until the engine receives its shutdown command, then tear down
///
/// # Safety
/// `world` must be a live engine instance; it is invalid once this
/// returns.
pub unsafe fn world_wait_for_quit(world: *mut World, unload_plugins: bool) {
    World_WaitForQuit(world, unload_plugins)
}

/// Force engine teardown without waiting for a shutdown command
///
/// # Safety
/// `world` must be a live engine instance; it is invalid once this
/// returns.
pub unsafe fn world_cleanup(world: *mut World, unload_plugins: bool) {
    World_Cleanup(world, unload_plugins)
}

/// Install or clear the engine's print hook
///
/// # Safety
/// The hook will be invoked from arbitrary engine threads until replaced.
pub unsafe fn set_print_func(func: PrintFunc) {
    SetPrintFunc(func)
}
