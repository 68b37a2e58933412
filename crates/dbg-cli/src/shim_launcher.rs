//! The [`EngineLauncher`] this binary wires into its [`Controller`]
//! (spec §1, §6: "Spawning or attaching to the real CLR host is out of
//! scope; this only states the shape a binding must satisfy.").
//!
//! `ShimLauncher` resolves where the native debugging-engine shim would be
//! loaded from, the same search-path logic `dbg_config::EngineShimConfig`
//! already encodes, but stops short of dynamically loading it: every call
//! fails with a clear "not implemented in this build" error that still
//! names the path that was resolved, so a real binding can be dropped in
//! later without touching anything above this module.

use dbg_config::{AttachConfig, EngineShimConfig, LaunchConfig};
use dbg_engine::engine_api::{EngineLauncher, EngineSession};
use dbg_engine::error::{DebuggerError, Result};

pub struct ShimLauncher {
    shim: EngineShimConfig,
}

impl ShimLauncher {
    pub fn new(shim: EngineShimConfig) -> Self {
        Self { shim }
    }

    fn resolve_shim_path(&self) -> Option<std::path::PathBuf> {
        if let Some(path) = &self.shim.shim_path {
            return Some(path.clone());
        }
        self.shim.search_paths.iter().find(|p| p.exists()).cloned()
    }

    fn not_implemented(&self, operation: &str) -> DebuggerError {
        match self.resolve_shim_path() {
            Some(path) => DebuggerError::invalid_state(format!(
                "{operation}: native engine shim loading is not implemented in this build \
                 (resolved shim path: {})",
                path.display()
            )),
            None => DebuggerError::invalid_state(format!(
                "{operation}: native engine shim loading is not implemented in this build \
                 and no shim was found in any search path"
            )),
        }
    }
}

impl EngineLauncher for ShimLauncher {
    fn launch(&self, _config: &LaunchConfig) -> Result<EngineSession> {
        Err(self.not_implemented("launch"))
    }

    fn attach(&self, _config: &AttachConfig) -> Result<EngineSession> {
        Err(self.not_implemented("attach"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_reports_the_resolved_search_path_when_nothing_is_found() {
        let shim = EngineShimConfig {
            shim_path: None,
            search_paths: vec!["/nonexistent/does-not-exist".into()],
        };
        let launcher = ShimLauncher::new(shim);
        let err = launcher
            .launch(&LaunchConfig {
                program: "/bin/app.dll".into(),
                args: vec![],
                cwd: None,
                env: Default::default(),
                stop_at_entry: false,
                step_filtering: Default::default(),
            })
            .unwrap_err();
        assert!(matches!(err, DebuggerError::InvalidState(_)));
        assert!(err.to_string().contains("not implemented"));
    }

    #[test]
    fn attach_names_an_explicit_shim_path() {
        let shim = EngineShimConfig {
            shim_path: Some("/opt/netdbg/shim.so".into()),
            search_paths: vec![],
        };
        let launcher = ShimLauncher::new(shim);
        let err = launcher
            .attach(&AttachConfig { process_id: 42, step_filtering: Default::default() })
            .unwrap_err();
        assert!(err.to_string().contains("/opt/netdbg/shim.so"));
    }
}
