// Nanosynth Embed - embedded SuperCollider synthesis server (libscsynth)
// Safe lifetime, callback, and control-surface boundary around the engine

// Module declarations
pub mod arena;
pub mod boot;
pub mod bridge;
pub mod config;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod surface;

// Re-exports for convenience
pub use boot::{BootStatus, EmbeddedEngine, EngineEvent, DEFAULT_BIND_ADDRESS, DEFAULT_PORT};
pub use bridge::{set_log_sink, set_reply_sink, LogSink, ReplySink};
pub use config::{find_ugen_plugins_path, EngineOptions};
pub use error::{EngineError, ErrorCode};
pub use handle::EngineHandle;
pub use surface::{DEFAULT_TCP_BACKLOG, DEFAULT_TCP_MAX_CONNECTIONS};
