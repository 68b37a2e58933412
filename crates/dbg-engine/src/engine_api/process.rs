use crate::engine_api::{MetadataReader, MethodToken, NativeBreakpoint, NativeThread, SymbolReader};
use crate::error::Result;
use crate::ids::{ModuleId, ThreadId};

/// Everything the controller needs about a module the moment it loads
/// (spec §4.6 `LoadModule`, §6 "Metadata interface"/"Symbol interface").
/// Reading the underlying PDB/metadata formats is out of scope; this is
/// only the resolved handle the engine binding hands back.
pub struct LoadedModuleInfo {
    pub path: String,
    /// On-disk image bytes, consumed by [`crate::entrypoint::parse_entry_point`].
    pub image: Vec<u8>,
    pub metadata: Box<dyn MetadataReader>,
    pub symbols: Option<Box<dyn SymbolReader>>,
}

/// Operations on the debuggee process as a whole (spec §6 "Operations on
/// native engine": `Continue`/`Stop`, `EnumerateThreads`,
/// `SetAllThreadsDebugState`).
pub trait NativeProcess: Send + Sync {
    /// Resume the process after a stop. `thread` is the thread the engine
    /// callback fired on, mirroring `ICorDebugProcess::Continue`.
    fn continue_process(&self, thread: ThreadId) -> Result<()>;

    /// Issue an async-stop request (spec §4.6 `Pause`).
    fn stop(&self) -> Result<()>;

    /// All threads currently known to the process, in engine enumeration
    /// order.
    fn enumerate_threads(&self) -> Result<Vec<ThreadId>>;

    /// Look a thread up by id (spec §6 `GetThread`).
    fn thread(&self, id: ThreadId) -> Result<Box<dyn NativeThread>>;

    /// Suspend every thread except `runnable`, matching
    /// `ICorDebugProcess::SetAllThreadsDebugState` as used by the eval
    /// queue (spec §4.4 step 3) and by `Disconnect` teardown (spec §4.6).
    fn set_all_threads_debug_state(&self, runnable: Option<ThreadId>) -> Result<()>;

    /// Resolve a freshly loaded module's metadata/symbols/image (spec §4.6
    /// `LoadModule`).
    fn module_info(&self, module: ModuleId) -> Result<LoadedModuleInfo>;

    /// Bind a native breakpoint to a resolved code location (spec §6
    /// `CreateBreakpoint` family).
    fn create_breakpoint(
        &self,
        module: ModuleId,
        method: MethodToken,
        il_offset: u32,
    ) -> Result<Box<dyn NativeBreakpoint>>;

    /// Enable or disable `CustomNotification` delivery for
    /// `System.Diagnostics.Debugger.CrossThreadDependencyNotification`
    /// (spec §4.6 "when `System.Private.CoreLib.dll` loads").
    fn set_enable_custom_notification(&self, enabled: bool) -> Result<()>;

    /// Terminate the process and do not wait for it.
    fn terminate(&self) -> Result<()>;

    /// Detach the debugger without terminating the process.
    fn detach(&self) -> Result<()>;
}
