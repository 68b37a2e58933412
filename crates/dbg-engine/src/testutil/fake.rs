//! A small in-memory fake of the native engine, standing in for the real
//! COM-style binding in this crate's own unit tests. Exercises the
//! [`crate::engine_api`] traits end to end without an actual debuggee.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::engine_api::{
    EngineLauncher, EngineSession, EvalCall, FieldInfo, FrameKind, FunctionEval, InterceptMask,
    LoadedModuleInfo, ManagedCallbackEvent, MetadataReader, MethodInfo, MethodToken,
    NativeBreakpoint, NativeFrame, NativeProcess, NativeStepper, NativeThread, NativeValue,
    PropertyInfo, SequencePoint, SymbolReader, TypeInfo, TypeToken, UnmappedStopMask, ValueKind,
};
use crate::error::{DebuggerError, Result};
use crate::ids::{ModuleId, ThreadId};
use dbg_config::{AttachConfig, LaunchConfig};

/// The only kind of value this fake models: a settable primitive, enough
/// to exercise the controller's condition evaluator and `SetVariable`.
#[derive(Debug, Clone)]
pub struct FakeValue {
    pub bytes: Vec<u8>,
    pub type_name: String,
}

impl FakeValue {
    pub fn int32(value: i32) -> Self {
        Self { bytes: value.to_le_bytes().to_vec(), type_name: "System.Int32".into() }
    }
}

impl NativeValue for FakeValue {
    fn kind(&self) -> ValueKind {
        ValueKind::Primitive
    }
    fn type_name(&self) -> String {
        self.type_name.clone()
    }
    fn type_token(&self) -> TypeToken {
        0
    }
    fn dereference(&self) -> Result<Box<dyn NativeValue>> {
        Err(DebuggerError::invalid_state("not a reference"))
    }
    fn unbox(&self) -> Result<Box<dyn NativeValue>> {
        Err(DebuggerError::invalid_state("not boxed"))
    }
    fn get_field_value(&self, _field_token: MethodToken) -> Result<Box<dyn NativeValue>> {
        Err(DebuggerError::invalid_state("no fields"))
    }
    fn get_static_field_value(&self, _field_token: MethodToken) -> Result<Box<dyn NativeValue>> {
        Err(DebuggerError::invalid_state("no fields"))
    }
    fn primitive_bytes(&self) -> Option<Vec<u8>> {
        Some(self.bytes.clone())
    }
    fn set_value(&self, bytes: &[u8]) -> Result<()> {
        let _ = bytes;
        Ok(())
    }
    fn to_display_string(&self) -> String {
        format!("{:?}", self.bytes)
    }
}

/// A single native stack frame, with an optional table of locals keyed by
/// slot index (spec §4.1 "named local variable").
#[derive(Debug, Clone)]
pub struct FakeFrame {
    pub kind: FrameKind,
    pub stack_address: u64,
    pub function_name: Option<String>,
    pub method_token: Option<MethodToken>,
    pub module_id: Option<ModuleId>,
    pub il_offset: Option<u32>,
    pub locals: HashMap<u32, FakeValue>,
}

impl FakeFrame {
    pub fn managed(module: ModuleId, method: MethodToken, il_offset: u32) -> Self {
        Self {
            kind: FrameKind::Managed,
            stack_address: 0,
            function_name: None,
            method_token: Some(method),
            module_id: Some(module),
            il_offset: Some(il_offset),
            locals: HashMap::new(),
        }
    }

    pub fn with_local(mut self, index: u32, value: FakeValue) -> Self {
        self.locals.insert(index, value);
        self
    }
}

impl NativeFrame for FakeFrame {
    fn kind(&self) -> FrameKind {
        self.kind.clone()
    }
    fn stack_address(&self) -> u64 {
        self.stack_address
    }
    fn function_name(&self) -> Option<String> {
        self.function_name.clone()
    }
    fn method_token(&self) -> Option<MethodToken> {
        self.method_token
    }
    fn module_id(&self) -> Option<ModuleId> {
        self.module_id
    }
    fn il_offset(&self) -> Option<u32> {
        self.il_offset
    }
    fn local_variable(&self, index: u32) -> Result<Box<dyn NativeValue>> {
        self.locals
            .get(&index)
            .cloned()
            .map(|v| Box::new(v) as Box<dyn NativeValue>)
            .ok_or_else(|| DebuggerError::not_found("local variable"))
    }
}

/// A bound native breakpoint, tracking only its own active flag; hit
/// delivery is simulated by pushing a `ManagedCallbackEvent::Breakpoint`
/// carrying `native_id()` through the session's sender.
pub struct FakeBreakpoint {
    id: u64,
    active: Mutex<bool>,
    method: MethodToken,
    il_offset: u32,
}

impl NativeBreakpoint for FakeBreakpoint {
    fn activate(&self, active: bool) -> Result<()> {
        *self.active.lock() = active;
        Ok(())
    }
    fn is_active(&self) -> Result<bool> {
        Ok(*self.active.lock())
    }
    fn function_and_offset(&self) -> Result<(MethodToken, u32)> {
        Ok((self.method, self.il_offset))
    }
    fn native_id(&self) -> u64 {
        self.id
    }
}

pub struct FakeStepper {
    pub jmc: Mutex<bool>,
}

impl NativeStepper for FakeStepper {
    fn set_intercept_mask(&self, _mask: InterceptMask) -> Result<()> {
        Ok(())
    }
    fn set_unmapped_stop_mask(&self, _mask: UnmappedStopMask) -> Result<()> {
        Ok(())
    }
    fn set_jmc(&self, enabled: bool) -> Result<()> {
        *self.jmc.lock() = enabled;
        Ok(())
    }
    fn step_range(&self, _step_in: bool, _il_start: u32, _il_end: u32) -> Result<()> {
        Ok(())
    }
    fn step(&self, _step_in: bool) -> Result<()> {
        Ok(())
    }
    fn step_out(&self) -> Result<()> {
        Ok(())
    }
    fn deactivate(&self) -> Result<()> {
        Ok(())
    }
}

pub struct FakeEval;

impl FunctionEval for FakeEval {
    fn issue(&self, _thread: ThreadId, _call: EvalCall) -> Result<()> {
        Ok(())
    }
    fn abort(&self, _thread: ThreadId) -> Result<()> {
        Ok(())
    }
}

/// A thread with a settable call stack; tests mutate `frames` directly to
/// move the fake thread between scenarios (e.g. stepping into a new frame).
pub struct FakeThread {
    pub id: ThreadId,
    pub frames: Mutex<Vec<FakeFrame>>,
    pub suspended: Mutex<bool>,
}

impl FakeThread {
    pub fn new(id: ThreadId) -> Self {
        Self { id, frames: Mutex::new(Vec::new()), suspended: Mutex::new(false) }
    }

    pub fn with_frames(id: ThreadId, frames: Vec<FakeFrame>) -> Self {
        Self { id, frames: Mutex::new(frames), suspended: Mutex::new(false) }
    }
}

impl NativeThread for Arc<FakeThread> {
    fn id(&self) -> ThreadId {
        self.as_ref().id
    }
    fn current_exception(&self) -> Result<Option<Box<dyn NativeValue>>> {
        Ok(None)
    }
    fn is_suspended(&self) -> bool {
        *self.suspended.lock()
    }
    fn frames(&self) -> Result<Vec<Box<dyn NativeFrame>>> {
        Ok(self
            .frames
            .lock()
            .iter()
            .cloned()
            .map(|f| Box::new(f) as Box<dyn NativeFrame>)
            .collect())
    }
    fn create_stepper(&self) -> Result<Box<dyn NativeStepper>> {
        Ok(Box::new(FakeStepper { jmc: Mutex::new(false) }))
    }
    fn create_eval(&self) -> Result<Box<dyn FunctionEval>> {
        Ok(Box::new(FakeEval))
    }
    fn intercept_current_exception(&self) -> Result<()> {
        Ok(())
    }
}

/// An empty metadata reader: no types, no methods. Tests that need a
/// populated one build their own [`MetadataReader`] impl the way
/// `modules.rs`'s own tests do.
#[derive(Default)]
pub struct FakeMetadata {
    pub types: Vec<TypeInfo>,
    pub methods: HashMap<TypeToken, Vec<MethodInfo>>,
}

impl MetadataReader for FakeMetadata {
    fn get_type(&self, token: TypeToken) -> Result<TypeInfo> {
        self.types.iter().find(|t| t.token == token).cloned().ok_or_else(|| DebuggerError::not_found("type"))
    }
    fn find_type_by_name(&self, name: &str) -> Result<Option<TypeInfo>> {
        Ok(self.types.iter().find(|t| t.name == name).cloned())
    }
    fn enum_type_defs(&self) -> Result<Vec<TypeInfo>> {
        Ok(self.types.clone())
    }
    fn enum_methods_with_name(&self, owner: TypeToken, name: &str) -> Result<Vec<MethodInfo>> {
        Ok(self
            .methods
            .get(&owner)
            .map(|ms| ms.iter().filter(|m| m.name == name).cloned().collect())
            .unwrap_or_default())
    }
    fn get_method(&self, token: MethodToken) -> Result<MethodInfo> {
        self.methods.values().flatten().find(|m| m.token == token).cloned().ok_or_else(|| DebuggerError::not_found("method"))
    }
    fn enum_fields(&self, _owner: TypeToken) -> Result<Vec<FieldInfo>> {
        Ok(Vec::new())
    }
    fn enum_properties(&self, _owner: TypeToken) -> Result<Vec<PropertyInfo>> {
        Ok(Vec::new())
    }
    fn scope_mvid(&self) -> Result<crate::engine_api::Mvid> {
        Ok([0u8; 16])
    }
}

/// A symbol reader driven entirely by lookup tables, for scenarios the
/// controller's stepping/JMC/condition paths need (spec §4.1).
#[derive(Default)]
pub struct FakeSymbols {
    pub lines: HashMap<(MethodToken, u32), (u32, String)>,
    pub sequence_points: HashMap<MethodToken, Vec<SequencePoint>>,
    pub locals: HashMap<(MethodToken, u32), (String, u32, u32)>,
}

impl SymbolReader for FakeSymbols {
    fn resolve_sequence_point(&self, _file: &str, _line: u32) -> Result<Option<(MethodToken, u32)>> {
        Ok(None)
    }
    fn get_line_by_il_offset(&self, method: MethodToken, il_offset: u32) -> Result<Option<(u32, String)>> {
        Ok(self.lines.get(&(method, il_offset)).cloned())
    }
    fn get_step_ranges_from_ip(&self, _method: MethodToken, _il_offset: u32) -> Result<(u32, u32)> {
        Ok((0, 0))
    }
    fn get_sequence_points(&self, method: MethodToken) -> Result<Vec<SequencePoint>> {
        Ok(self.sequence_points.get(&method).cloned().unwrap_or_default())
    }
    fn get_named_local_variable(
        &self,
        method: MethodToken,
        local_index: u32,
        _il_offset: u32,
    ) -> Result<Option<(String, u32, u32)>> {
        Ok(self.locals.get(&(method, local_index)).cloned())
    }
}

/// The fake process: a set of threads plus one-shot module-info slots
/// (spec §6 "Operations on native engine").
#[derive(Default)]
pub struct FakeProcess {
    threads: Mutex<HashMap<ThreadId, Arc<FakeThread>>>,
    modules: Mutex<HashMap<ModuleId, Option<LoadedModuleInfo>>>,
    next_breakpoint_id: AtomicU64,
    pub continued: Mutex<Vec<ThreadId>>,
    pub custom_notification_enabled: Mutex<bool>,
    pub terminated: Mutex<bool>,
    pub detached: Mutex<bool>,
}

impl FakeProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_thread(&self, thread: FakeThread) -> Arc<FakeThread> {
        let thread = Arc::new(thread);
        self.threads.lock().insert(thread.id, thread.clone());
        thread
    }

    pub fn add_module(&self, id: ModuleId, info: LoadedModuleInfo) {
        self.modules.lock().insert(id, Some(info));
    }

    pub fn continued_threads(&self) -> Vec<ThreadId> {
        self.continued.lock().clone()
    }
}

impl NativeProcess for FakeProcess {
    fn continue_process(&self, thread: ThreadId) -> Result<()> {
        self.continued.lock().push(thread);
        Ok(())
    }
    fn stop(&self) -> Result<()> {
        Ok(())
    }
    fn enumerate_threads(&self) -> Result<Vec<ThreadId>> {
        Ok(self.threads.lock().keys().copied().collect())
    }
    fn thread(&self, id: ThreadId) -> Result<Box<dyn NativeThread>> {
        self.threads
            .lock()
            .get(&id)
            .cloned()
            .map(|t| Box::new(t) as Box<dyn NativeThread>)
            .ok_or_else(|| DebuggerError::not_found("thread"))
    }
    fn set_all_threads_debug_state(&self, _runnable: Option<ThreadId>) -> Result<()> {
        Ok(())
    }
    fn module_info(&self, module: ModuleId) -> Result<LoadedModuleInfo> {
        self.modules
            .lock()
            .get_mut(&module)
            .and_then(|slot| slot.take())
            .ok_or_else(|| DebuggerError::not_found("module"))
    }
    fn create_breakpoint(
        &self,
        _module: ModuleId,
        method: MethodToken,
        il_offset: u32,
    ) -> Result<Box<dyn NativeBreakpoint>> {
        let id = self.next_breakpoint_id.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeBreakpoint { id, active: Mutex::new(true), method, il_offset }))
    }
    fn set_enable_custom_notification(&self, enabled: bool) -> Result<()> {
        *self.custom_notification_enabled.lock() = enabled;
        Ok(())
    }
    fn terminate(&self) -> Result<()> {
        *self.terminated.lock() = true;
        Ok(())
    }
    fn detach(&self) -> Result<()> {
        *self.detached.lock() = true;
        Ok(())
    }
}

impl NativeProcess for Arc<FakeProcess> {
    fn continue_process(&self, thread: ThreadId) -> Result<()> {
        (**self).continue_process(thread)
    }
    fn stop(&self) -> Result<()> {
        (**self).stop()
    }
    fn enumerate_threads(&self) -> Result<Vec<ThreadId>> {
        (**self).enumerate_threads()
    }
    fn thread(&self, id: ThreadId) -> Result<Box<dyn NativeThread>> {
        (**self).thread(id)
    }
    fn set_all_threads_debug_state(&self, runnable: Option<ThreadId>) -> Result<()> {
        (**self).set_all_threads_debug_state(runnable)
    }
    fn module_info(&self, module: ModuleId) -> Result<LoadedModuleInfo> {
        (**self).module_info(module)
    }
    fn create_breakpoint(
        &self,
        module: ModuleId,
        method: MethodToken,
        il_offset: u32,
    ) -> Result<Box<dyn NativeBreakpoint>> {
        (**self).create_breakpoint(module, method, il_offset)
    }
    fn set_enable_custom_notification(&self, enabled: bool) -> Result<()> {
        (**self).set_enable_custom_notification(enabled)
    }
    fn terminate(&self) -> Result<()> {
        (**self).terminate()
    }
    fn detach(&self) -> Result<()> {
        (**self).detach()
    }
}

/// Hands out a fresh [`FakeProcess`] on every `launch`/`attach`, keeping
/// the last one (and its callback sender) reachable for the test that
/// drove the call (spec §6 `CreateProcess`/`DebugActiveProcess`).
#[derive(Default)]
pub struct FakeLauncher {
    process: Mutex<Option<Arc<FakeProcess>>>,
    sender: Mutex<Option<mpsc::UnboundedSender<ManagedCallbackEvent>>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&self) -> Arc<FakeProcess> {
        self.process.lock().clone().expect("launch/attach not yet called")
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<ManagedCallbackEvent> {
        self.sender.lock().clone().expect("launch/attach not yet called")
    }

    fn new_session(&self) -> EngineSession {
        let process = Arc::new(FakeProcess::new());
        let (tx, rx) = mpsc::unbounded_channel();
        *self.process.lock() = Some(process.clone());
        *self.sender.lock() = Some(tx);
        EngineSession { process: Box::new(process), callbacks: rx }
    }
}

impl EngineLauncher for FakeLauncher {
    fn launch(&self, _config: &LaunchConfig) -> Result<EngineSession> {
        Ok(self.new_session())
    }
    fn attach(&self, _config: &AttachConfig) -> Result<EngineSession> {
        Ok(self.new_session())
    }
}

/// Lets a test keep its own handle to the launcher (to call
/// [`FakeLauncher::process`]/[`FakeLauncher::sender`]) after handing a copy
/// to a [`crate::controller::Controller`] as a `Box<dyn EngineLauncher>`.
impl EngineLauncher for Arc<FakeLauncher> {
    fn launch(&self, config: &LaunchConfig) -> Result<EngineSession> {
        (**self).launch(config)
    }
    fn attach(&self, config: &AttachConfig) -> Result<EngineSession> {
        (**self).attach(config)
    }
}
