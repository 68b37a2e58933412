//! Launch/attach configuration for the debugger.
//!
//! Mirrors the shape of a DAP `launch`/`attach` request body: the protocol
//! adapter in `dbg-protocol` decodes a request into one of these, and the
//! controller in `dbg-engine` consumes it directly. Also carries the
//! process-wide JMC and step-filter toggles read by the breakpoint manager
//! and the step-setup path (spec §4.1, §4.6).

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the debugger should attach to the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum LaunchRequest {
    /// Spawn a new process via the native shim.
    Launch(LaunchConfig),
    /// Attach to an already-running process.
    Attach(AttachConfig),
}

/// Parameters for launching a new debuggee process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LaunchConfig {
    /// Path to the managed entry assembly or host executable.
    pub program: PathBuf,
    /// Command-line arguments passed to the debuggee.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the debuggee; defaults to `program`'s parent.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Extra environment variables merged over the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Break at the entry point before any user code runs.
    #[serde(default)]
    pub stop_at_entry: bool,
    /// Debugger-wide step and JMC behavior.
    #[serde(default)]
    pub step_filtering: StepFilterConfig,
}

/// Parameters for attaching to a running debuggee process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachConfig {
    /// OS process id to attach to.
    pub process_id: u32,
    /// Debugger-wide step and JMC behavior.
    #[serde(default)]
    pub step_filtering: StepFilterConfig,
}

/// Process-wide Just-My-Code and step-filtering toggles (spec §4.1, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepFilterConfig {
    /// Apply JMC classification on module load and skip non-user frames
    /// while stepping (spec §4.1 JMC application, §4.6 StepComplete).
    pub just_my_code: bool,
    /// Enable property-getter/operator step filtering in addition to JMC.
    pub enable_step_filtering: bool,
}

impl Default for StepFilterConfig {
    fn default() -> Self {
        Self {
            just_my_code: true,
            enable_step_filtering: true,
        }
    }
}

/// Where to find the native debugging engine shim on this machine.
///
/// Loading the shim itself is out of scope (spec §1); this only resolves
/// the path the loader would use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineShimConfig {
    /// Explicit path to the shim library, if set by the user.
    #[serde(default)]
    pub shim_path: Option<PathBuf>,
    /// Directories searched in order when `shim_path` is unset.
    #[serde(default = "default_search_paths")]
    pub search_paths: Vec<PathBuf>,
}

fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".netdbg").join("shim"));
    }
    paths.push(PathBuf::from("/usr/share/netdbg/shim"));
    paths
}

impl Default for EngineShimConfig {
    fn default() -> Self {
        Self {
            shim_path: None,
            search_paths: default_search_paths(),
        }
    }
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to parse JSON launch request: {0}")]
    Json(#[from] serde_json::Error),
    #[error("launch config is missing a program path")]
    MissingProgram,
}

/// On-disk debugger settings (`netdbg.toml`), layered under an explicit
/// per-session `LaunchRequest` from the protocol adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebuggerSettings {
    #[serde(default)]
    pub step_filtering: StepFilterConfig,
    #[serde(default)]
    pub engine_shim: EngineShimConfig,
}

impl DebuggerSettings {
    /// Load settings from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Parse a `launch`/`attach` request body from JSON (as sent by a DAP
    /// client over the JSON protocol adapter).
    pub fn parse_launch_request(json: &str) -> Result<LaunchRequest, ConfigError> {
        let request: LaunchRequest = serde_json::from_str(json)?;
        if let LaunchRequest::Launch(ref cfg) = request {
            if cfg.program.as_os_str().is_empty() {
                return Err(ConfigError::MissingProgram);
            }
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_step_filtering_enables_jmc() {
        let cfg = StepFilterConfig::default();
        assert!(cfg.just_my_code);
        assert!(cfg.enable_step_filtering);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = DebuggerSettings::load(std::path::Path::new("/nonexistent/netdbg.toml"))
            .expect("missing file falls back to defaults");
        assert!(settings.step_filtering.just_my_code);
    }

    #[test]
    fn parse_launch_request_roundtrip() {
        let json = r#"{"request":"launch","program":"/bin/app.dll","args":["a"],"stop_at_entry":true}"#;
        let req = DebuggerSettings::parse_launch_request(json).unwrap();
        match req {
            LaunchRequest::Launch(cfg) => {
                assert_eq!(cfg.program, PathBuf::from("/bin/app.dll"));
                assert_eq!(cfg.args, vec!["a".to_string()]);
                assert!(cfg.stop_at_entry);
            }
            _ => panic!("expected launch"),
        }
    }

    #[test]
    fn parse_launch_request_rejects_empty_program() {
        let json = r#"{"request":"launch","program":""}"#;
        let err = DebuggerSettings::parse_launch_request(json).unwrap_err();
        assert!(matches!(err, ConfigError::MissingProgram));
    }
}
