use tokio::sync::mpsc;

use crate::engine_api::{ManagedCallbackEvent, NativeProcess};
use crate::error::Result;
use dbg_config::{AttachConfig, LaunchConfig};

/// A freshly created engine session: the process handle plus the channel
/// callbacks are delivered on (spec §9 design note, "40+ callback methods
/// collapsed into one tagged enum delivered over a channel").
pub struct EngineSession {
    pub process: Box<dyn NativeProcess>,
    pub callbacks: mpsc::UnboundedReceiver<ManagedCallbackEvent>,
}

/// Entry point into the native engine binding (spec §6 "Operations on
/// native engine", `CreateProcess`/`DebugActiveProcess`). Spawning or
/// attaching to the real CLR host is out of scope; this only states the
/// shape a binding must satisfy.
pub trait EngineLauncher: Send + Sync {
    fn launch(&self, config: &LaunchConfig) -> Result<EngineSession>;
    fn attach(&self, config: &AttachConfig) -> Result<EngineSession>;
}
