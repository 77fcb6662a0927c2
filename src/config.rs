//! Engine options management
//!
//! This module provides the configuration record passed once, by value, to
//! engine creation, plus runtime loading from JSON files for fast iteration
//! without recompilation. Numeric defaults are the engine's own and must be
//! preserved exactly; changing them changes what the native layer allocates.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// Complete engine configuration
///
/// A flat record of fixed-size numeric fields plus optional variable-length
/// strings (paths, device names, password, stream-enable masks). Consumed by
/// [`crate::handle::EngineHandle::create`]; the struct itself has no
/// identity beyond that call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Total audio bus channels, including hardware input/output channels
    pub num_audio_bus_channels: u32,
    /// Hardware input bus channels
    pub num_input_bus_channels: u32,
    /// Hardware output bus channels
    pub num_output_bus_channels: u32,
    /// Control-rate bus channels
    pub num_control_bus_channels: u32,
    /// Samples per control period
    pub block_size: u32,
    /// Number of allocatable sample buffers
    pub num_buffers: u32,
    /// Maximum live nodes in the processing graph
    pub max_nodes: u32,
    /// Maximum loaded graph definitions
    pub max_graph_defs: u32,
    /// Maximum interconnect buffers per graph
    pub max_wire_bufs: u32,
    /// Random number generators available to the graph
    pub num_rgens: u32,
    /// Maximum simultaneous logins on the TCP interface
    pub max_logins: u32,
    /// Realtime memory pool size in kilobytes
    pub realtime_memory_size: u32,
    /// Preferred hardware sample rate (0 = device default)
    pub preferred_sample_rate: u32,
    /// Preferred hardware buffer frame size (0 = device default)
    pub preferred_hardware_buffer_size: u32,
    /// Whether to load graph definitions from disk at startup (0 or 1)
    pub load_graph_defs: u32,
    /// Lock realtime memory into physical RAM
    pub memory_locking: bool,
    /// Drive audio from the hardware clock rather than as fast as possible
    pub realtime: bool,
    /// Log verbosity; negative silences progressively more output
    pub verbosity: i32,
    /// Publish the server via zero-configuration networking
    pub rendezvous: bool,
    /// Directory to scan for unit generator plugins
    pub ugen_plugins_path: Option<String>,
    /// Restrict filesystem access to this subtree
    pub restricted_path: Option<String>,
    /// Session password required from TCP clients
    pub password: Option<String>,
    /// Hardware input device name
    pub in_device_name: Option<String>,
    /// Hardware output device name
    pub out_device_name: Option<String>,
    /// Per-channel input stream enable mask, e.g. "01100"
    pub input_streams_enabled: Option<String>,
    /// Per-channel output stream enable mask
    pub output_streams_enabled: Option<String>,
    /// Shared memory segment identifier (0 = none)
    pub shared_memory_id: i32,
    /// Output limiter threshold
    pub safety_clip_threshold: f32,
}

impl Default for EngineOptions {
    /// Engine-defined defaults, preserved bit-for-bit
    fn default() -> Self {
        Self {
            num_audio_bus_channels: 1024,
            num_input_bus_channels: 8,
            num_output_bus_channels: 8,
            num_control_bus_channels: 16384,
            block_size: 64,
            num_buffers: 1024,
            max_nodes: 1024,
            max_graph_defs: 1024,
            max_wire_bufs: 64,
            num_rgens: 64,
            max_logins: 64,
            realtime_memory_size: 8192,
            preferred_sample_rate: 0,
            preferred_hardware_buffer_size: 0,
            load_graph_defs: 1,
            memory_locking: false,
            realtime: true,
            verbosity: 0,
            rendezvous: true,
            ugen_plugins_path: None,
            restricted_path: None,
            password: None,
            in_device_name: None,
            out_device_name: None,
            input_streams_enabled: None,
            output_streams_enabled: None,
            shared_memory_id: 0,
            safety_clip_threshold: 1.26,
        }
    }
}

impl EngineOptions {
    /// Validate internal consistency before engine creation
    ///
    /// # Returns
    /// * `Ok(())` - Options are consistent
    /// * `Err(EngineError::InvalidOption)` - Audio buses cannot cover the
    ///   hardware input and output channels
    pub fn validate(&self) -> Result<(), EngineError> {
        let hardware = self.num_input_bus_channels + self.num_output_bus_channels;
        if self.num_audio_bus_channels < hardware {
            return Err(EngineError::InvalidOption {
                field: "num_audio_bus_channels",
                reason: format!(
                    "{} audio buses cannot cover {} hardware channels",
                    self.num_audio_bus_channels, hardware
                ),
            });
        }
        Ok(())
    }

    /// First audio bus index not mapped to a hardware channel
    pub fn first_private_bus_id(&self) -> u32 {
        self.num_output_bus_channels + self.num_input_bus_channels
    }

    /// Audio bus channels not mapped to hardware channels
    pub fn private_audio_bus_channel_count(&self) -> u32 {
        self.num_audio_bus_channels - self.num_input_bus_channels - self.num_output_bus_channels
    }

    /// Load options from a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON options file
    ///
    /// # Returns
    /// Loaded options, or defaults if the file is missing or invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(options) => {
                    log::info!("[Options] Loaded engine options from {:?}", path.as_ref());
                    options
                }
                Err(err) => {
                    log::warn!(
                        "[Options] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Options] Failed to read options file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}

/// Find the unit generator plugin directory for the embedded engine
///
/// Searches, in order:
/// 1. The `SC_PLUGIN_PATH` environment variable.
/// 2. Common SuperCollider installation plugin directories.
///
/// # Returns
/// * `Some(PathBuf)` - First existing candidate directory
/// * `None` - No plugin directory found
pub fn find_ugen_plugins_path() -> Option<PathBuf> {
    if let Some(env_path) = env::var_os("SC_PLUGIN_PATH") {
        let path = PathBuf::from(env_path);
        if path.is_dir() {
            return Some(path);
        }
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/SuperCollider.app/Contents/Resources/plugins",
            "/Applications/SuperCollider/SuperCollider.app/Contents/Resources/plugins",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "/usr/lib/SuperCollider/plugins",
            "/usr/local/lib/SuperCollider/plugins",
        ]
    } else {
        &[]
    };

    candidates
        .iter()
        .copied()
        .map(PathBuf::from)
        .find(|path| path.is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = EngineOptions::default();
        assert_eq!(options.num_audio_bus_channels, 1024);
        assert_eq!(options.num_input_bus_channels, 8);
        assert_eq!(options.num_output_bus_channels, 8);
        assert_eq!(options.num_control_bus_channels, 16384);
        assert_eq!(options.block_size, 64);
        assert_eq!(options.num_buffers, 1024);
        assert_eq!(options.max_nodes, 1024);
        assert_eq!(options.max_graph_defs, 1024);
        assert_eq!(options.max_wire_bufs, 64);
        assert_eq!(options.num_rgens, 64);
        assert_eq!(options.max_logins, 64);
        assert_eq!(options.realtime_memory_size, 8192);
        assert_eq!(options.preferred_sample_rate, 0);
        assert_eq!(options.preferred_hardware_buffer_size, 0);
        assert_eq!(options.load_graph_defs, 1);
        assert!(!options.memory_locking);
        assert!(options.realtime);
        assert_eq!(options.verbosity, 0);
        assert!(options.rendezvous);
        assert_eq!(options.shared_memory_id, 0);
        assert_eq!(options.safety_clip_threshold, 1.26);
        assert!(options.ugen_plugins_path.is_none());
        assert!(options.password.is_none());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(EngineOptions::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_insufficient_audio_buses() {
        let options = EngineOptions {
            num_audio_bus_channels: 8,
            num_input_bus_channels: 8,
            num_output_bus_channels: 8,
            ..EngineOptions::default()
        };
        let err = options.validate().unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidOption {
                field: "num_audio_bus_channels",
                ..
            }
        ));
    }

    #[test]
    fn test_private_bus_helpers() {
        let options = EngineOptions::default();
        assert_eq!(options.first_private_bus_id(), 16);
        assert_eq!(options.private_audio_bus_channel_count(), 1008);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut options = EngineOptions::default();
        options.password = Some("hunter2".to_string());
        options.verbosity = -1;

        let json = serde_json::to_string_pretty(&options).unwrap();
        let parsed: EngineOptions = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.password.as_deref(), Some("hunter2"));
        assert_eq!(parsed.verbosity, -1);
        assert_eq!(parsed.safety_clip_threshold, options.safety_clip_threshold);
    }

    #[test]
    fn test_load_from_missing_file_falls_back_to_defaults() {
        let options = EngineOptions::load_from_file("/nonexistent/engine_options.json");
        assert_eq!(options.num_audio_bus_channels, 1024);
    }
}
