//! Debugger controller: the central orchestrator that owns the engine
//! session, dispatches callback events, and implements the command surface
//! a protocol adapter drives (spec §4.6).
//!
//! Mirrors the original's split between state that is pure data
//! ([`Breakpoints`], [`Variables`]) and the controller, which is the only
//! thing allowed to call into the native engine. Guarded fields follow
//! spec §5's rule: never acquire more than one of this module's mutexes at
//! a time.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use dbg_config::{AttachConfig, LaunchConfig, LaunchRequest, StepFilterConfig};

use crate::breakpoints::{BreakpointHit, Breakpoints};
use crate::engine_api::{
    EngineLauncher, ExceptionCategory, ExceptionStage, InterceptMask, ManagedCallbackEvent, MethodToken,
    NativeBreakpoint, NativeFrame, NativeProcess, StepKind, UnmappedStopMask,
};
use crate::error::{DebuggerError, Result};
use crate::eval::queue::FunctionEvalQueue;
use crate::eval::literal::classify_literal;
use crate::eval::resolve::{
    frame_location as resolve_frame_location, local_candidate_name, resolve as resolve_expression, Resolution,
};
use crate::frames::{walk_frames, StackFrame};
use crate::ids::{FrameId, ModuleId, ThreadId, VariableRefId};
use crate::modules::{CodeLocation, Modules};
use crate::protocol_events::{EventLocation, ModuleChangeReason, ProtocolEvent, StopReason};
use crate::variables::{VariableDescriptor, VariableFilter, Variables};

/// A sentinel used to continue the engine on callbacks that carry no
/// inherent thread (e.g. `LoadModule`). The real engine's `Continue`
/// ignores the thread argument for these; this crate still needs a value
/// to satisfy [`NativeProcess::continue_process`]'s signature.
pub const PROCESS_WIDE_THREAD: ThreadId = ThreadId(0);

/// Coarse phase of a debug session (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unattached,
    Running,
    Stopped,
    Exited,
}

/// What `Disconnect` should do to the debuggee (spec §4.6 `Disconnect`).
/// `Default` behaves like `Detach` when the process was attached to and
/// like `Terminate` when it was launched; the original distinguishes the
/// two by how the session started, which this crate does not currently
/// track, so `Default` is treated as `Detach` (recorded as an explicit
/// decision — see `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    Default,
    Detach,
    Terminate,
}

/// A native breakpoint bound by the controller, tracking which manager
/// entries (line, function, or entry) share its location (spec §4.3
/// "two-map storage" extended with the native object itself, which the
/// pure-data [`Breakpoints`] type never holds).
struct NativeBreakpointBinding {
    native: Box<dyn NativeBreakpoint>,
    location: (ModuleId, MethodToken, u32),
}

/// The debugger controller (spec §4.6): owns the engine session, drives
/// the callback dispatch loop, and is the only thing in this crate allowed
/// to call into [`NativeProcess`]/[`crate::engine_api::NativeThread`].
pub struct Controller {
    launcher: Box<dyn EngineLauncher>,
    process: Mutex<Option<Box<dyn NativeProcess>>>,
    lifecycle: Mutex<Lifecycle>,

    modules: Modules,
    breakpoints: Breakpoints,
    variables: Variables,
    eval_queue: FunctionEvalQueue,

    /// Every callback that pauses the process increments this; every
    /// successful `Continue` decrements it (spec §5 `stopCounterMutex`,
    /// invariant `stopCounter >= 0`).
    stop_counter: AtomicI64,
    last_stopped_thread: Mutex<Option<ThreadId>>,
    unhandled_exception_threads: Mutex<HashSet<ThreadId>>,

    native_breakpoints: Mutex<HashMap<u64, NativeBreakpointBinding>>,
    bound_locations: Mutex<HashSet<(ModuleId, MethodToken, u32)>>,

    /// Set once, the first time the entry module is seen, so a session
    /// with `stop_at_entry` only ever binds one entry breakpoint even if
    /// `LoadModule` fires for it more than once (it shouldn't, but nothing
    /// upstream guarantees it).
    entry_module: Mutex<Option<ModuleId>>,
    stop_at_entry: std::sync::atomic::AtomicBool,
    step_filtering: Mutex<StepFilterConfig>,
}

impl Controller {
    pub fn new(launcher: Box<dyn EngineLauncher>) -> Self {
        Self {
            launcher,
            process: Mutex::new(None),
            lifecycle: Mutex::new(Lifecycle::Unattached),
            modules: Modules::new(),
            breakpoints: Breakpoints::new(),
            variables: Variables::new(),
            eval_queue: FunctionEvalQueue::new(),
            stop_counter: AtomicI64::new(0),
            last_stopped_thread: Mutex::new(None),
            unhandled_exception_threads: Mutex::new(HashSet::new()),
            native_breakpoints: Mutex::new(HashMap::new()),
            bound_locations: Mutex::new(HashSet::new()),
            entry_module: Mutex::new(None),
            stop_at_entry: std::sync::atomic::AtomicBool::new(false),
            step_filtering: Mutex::new(StepFilterConfig::default()),
        }
    }

    pub fn modules(&self) -> &Modules {
        &self.modules
    }

    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn eval_queue(&self) -> &FunctionEvalQueue {
        &self.eval_queue
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    pub fn last_stopped_thread(&self) -> Option<ThreadId> {
        *self.last_stopped_thread.lock()
    }

    // ── Session lifecycle ────────────────────────────────────────────────

    /// Start a debug session from a decoded launch/attach request (spec
    /// §4.6 `Launch`/`Attach`). Returns the callback channel the caller
    /// (normally [`Controller::run_dispatch_loop`]) should drain.
    pub fn start(
        &self,
        request: LaunchRequest,
    ) -> Result<mpsc::UnboundedReceiver<ManagedCallbackEvent>> {
        let (config, stop_at_entry) = match &request {
            LaunchRequest::Launch(cfg) => (cfg.step_filtering, cfg.stop_at_entry),
            LaunchRequest::Attach(cfg) => (cfg.step_filtering, false),
        };

        let session = match &request {
            LaunchRequest::Launch(cfg) => self.launch_native(cfg)?,
            LaunchRequest::Attach(cfg) => self.attach_native(cfg)?,
        };

        *self.process.lock() = Some(session.process);
        *self.lifecycle.lock() = Lifecycle::Stopped;
        *self.step_filtering.lock() = config;
        self.stop_counter.store(1, Ordering::SeqCst);
        self.stop_at_entry.store(stop_at_entry, Ordering::SeqCst);
        Ok(session.callbacks)
    }

    fn launch_native(&self, config: &LaunchConfig) -> Result<crate::engine_api::EngineSession> {
        self.launcher.launch(config)
    }

    fn attach_native(&self, config: &AttachConfig) -> Result<crate::engine_api::EngineSession> {
        self.launcher.attach(config)
    }

    /// `ConfigurationDone`: the protocol adapter has finished sending
    /// initial breakpoint requests; let the process actually start
    /// running (spec §4.6).
    pub fn configuration_done(&self, events: &mpsc::UnboundedSender<ProtocolEvent>) -> Result<()> {
        self.continue_thread(PROCESS_WIDE_THREAD, events)
    }

    /// `Disconnect`: tear the session down (spec §4.6). Aborts every
    /// pending eval first so no command handler is left waiting forever.
    pub fn disconnect(&self, action: DisconnectAction) -> Result<()> {
        self.eval_queue.abort_all();
        let process = self.process.lock().take();
        if let Some(process) = process {
            match action {
                DisconnectAction::Terminate => process.terminate()?,
                DisconnectAction::Default | DisconnectAction::Detach => process.detach()?,
            }
        }
        *self.lifecycle.lock() = Lifecycle::Exited;
        Ok(())
    }

    // ── Execution control ────────────────────────────────────────────────

    /// `Continue`: resume the process, honoring the stop-counter invariant
    /// (spec §4.6, §5 `stopCounter >= 0`). Resumes only when no eval is
    /// pending anywhere, matching the original's rule that a function-eval
    /// in flight owns the process's run state. Emits `Continued` (spec §6)
    /// once the engine has actually been told to resume, so it always
    /// precedes the next `Stopped` (spec §5 ordering guarantee).
    pub fn continue_thread(&self, thread: ThreadId, events: &mpsc::UnboundedSender<ProtocolEvent>) -> Result<()> {
        if self.eval_queue.any_pending() {
            return Err(DebuggerError::invalid_state("an evaluation is in progress"));
        }
        let previous = self.stop_counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
            (c > 0).then_some(c - 1)
        });
        if previous.is_err() {
            return Err(DebuggerError::invalid_state("process is not stopped"));
        }
        self.variables.clear();
        *self.lifecycle.lock() = Lifecycle::Running;
        let guard = self.process.lock();
        let process = guard.as_deref().ok_or_else(|| DebuggerError::invalid_state("no active process"))?;
        process.continue_process(thread)?;
        let _ = events.send(ProtocolEvent::Continued { thread });
        Ok(())
    }

    /// `Pause`: issue an async stop request (spec §4.6). The matching
    /// `Break` callback is what actually reports the stop.
    pub fn pause(&self) -> Result<()> {
        let guard = self.process.lock();
        let process = guard.as_deref().ok_or_else(|| DebuggerError::invalid_state("no active process"))?;
        process.stop()
    }

    /// `StepInto`/`StepOver`/`StepOut` (spec §4.6 "step setup"): creates a
    /// stepper on the given thread's current frame, applies the fixed
    /// intercept/unmapped-stop masks and the session's JMC setting, and
    /// resumes. The matching `StepComplete` callback reports the stop (via
    /// [`Controller::on_step_complete`], which transparently steps again
    /// over non-user-code frames when JMC is enabled).
    pub fn step(&self, thread: ThreadId, kind: StepKind, events: &mpsc::UnboundedSender<ProtocolEvent>) -> Result<()> {
        let guard = self.process.lock();
        let process = guard.as_deref().ok_or_else(|| DebuggerError::invalid_state("no active process"))?;
        let native_thread = process.thread(thread)?;
        let stepper = native_thread.create_stepper()?;
        stepper.set_intercept_mask(InterceptMask::step_default())?;
        stepper.set_unmapped_stop_mask(UnmappedStopMask::NONE)?;
        stepper.set_jmc(self.step_filtering.lock().just_my_code)?;

        match kind {
            StepKind::Out => stepper.step_out()?,
            StepKind::In | StepKind::Over => {
                let step_in = kind == StepKind::In;
                let frames = native_thread.frames()?;
                let range = frames
                    .iter()
                    .find(|f| f.is_il_frame())
                    .and_then(|frame| {
                        let module = frame.module_id()?;
                        let method = frame.method_token()?;
                        let il_offset = frame.il_offset()?;
                        self.modules.step_range_from_current_ip(module, method, il_offset).ok()
                    });
                match range {
                    Some((start, end)) => stepper.step_range(step_in, start, end)?,
                    None => stepper.step(step_in)?,
                }
            }
        }
        drop(guard);
        self.continue_thread(thread, events)
    }

    // ── Callback dispatch ────────────────────────────────────────────────

    /// Drive the dispatch loop until the channel closes (process exit or
    /// `Disconnect`). The returned events are what a protocol adapter
    /// forwards to its client.
    pub async fn run_dispatch_loop(
        &self,
        mut callbacks: mpsc::UnboundedReceiver<ManagedCallbackEvent>,
        events: &mpsc::UnboundedSender<ProtocolEvent>,
    ) {
        while let Some(event) = callbacks.recv().await {
            if let Err(err) = self.dispatch(event, events) {
                warn!(%err, "callback dispatch failed");
            }
        }
    }

    /// Handle one callback event (spec §4.6 "Callback dispatch table").
    /// Variants with no explicit arm fall through to the default
    /// "ignore and Continue" behavior (spec §9).
    fn dispatch(&self, event: ManagedCallbackEvent, events: &mpsc::UnboundedSender<ProtocolEvent>) -> Result<()> {
        match event {
            ManagedCallbackEvent::CreateProcess => {
                let _ = events.send(ProtocolEvent::Initialized);
                self.continue_thread(PROCESS_WIDE_THREAD, events)
            }
            ManagedCallbackEvent::ExitProcess => {
                self.eval_queue.abort_all();
                *self.lifecycle.lock() = Lifecycle::Exited;
                let _ = events.send(ProtocolEvent::Exited { exit_code: 0 });
                Ok(())
            }
            ManagedCallbackEvent::CreateThread(thread) => {
                let _ = events.send(ProtocolEvent::Thread { thread, started: true });
                self.continue_thread(thread, events)
            }
            ManagedCallbackEvent::ExitThread(thread) => {
                let _ = events.send(ProtocolEvent::Thread { thread, started: false });
                self.continue_thread(thread, events)
            }
            ManagedCallbackEvent::LoadModule(module) => self.on_load_module(module, events),
            ManagedCallbackEvent::UnloadModule(module) => {
                let path = self.modules.path_of(module);
                self.modules.unload(module);
                if let Some(path) = path {
                    let _ = events.send(ProtocolEvent::Module {
                        module,
                        path,
                        reason: ModuleChangeReason::Removed,
                    });
                }
                self.continue_thread(PROCESS_WIDE_THREAD, events)
            }
            ManagedCallbackEvent::Breakpoint { thread, native_breakpoint_id } => {
                self.on_breakpoint(thread, native_breakpoint_id, events)
            }
            ManagedCallbackEvent::StepComplete(thread) => self.on_step_complete(thread, events),
            ManagedCallbackEvent::Exception {
                thread,
                category,
                stage,
                type_name,
                message,
            } => self.on_exception(thread, category, stage, &type_name, message.as_deref(), events),
            ManagedCallbackEvent::EvalComplete { thread, result } => {
                self.eval_queue.complete(thread, result);
                self.resume_after_eval(thread)
            }
            ManagedCallbackEvent::EvalException { thread, reason } => {
                warn!(%reason, "function evaluation raised an exception");
                self.eval_queue.fail(thread, crate::error::EvalFailReason::Aborted);
                self.resume_after_eval(thread)
            }
            ManagedCallbackEvent::Break(thread) => self.report_stop(thread, StopReason::Pause, None, events),
            ManagedCallbackEvent::CustomNotification(thread) => {
                // `CrossThreadDependencyNotification`: any eval blocking this
                // thread cannot make progress, so abort every pending eval
                // rather than deadlock the process (spec §4.4 "Abort-on-
                // cross-thread-dependency").
                self.eval_queue.abort_all();
                self.continue_thread(thread, events)
            }
            ManagedCallbackEvent::NameChange(_)
            | ManagedCallbackEvent::BreakpointSetError { .. }
            | ManagedCallbackEvent::MdaNotification { .. } => Ok(()),
        }
    }

    /// Completing or failing an eval resumes the thread it ran on without
    /// touching the stop counter or emitting a `Continued` event: the
    /// engine's real API treats an eval's completion continue as
    /// out-of-band, distinct from the in-band continue this crate's
    /// [`NativeProcess::continue_process`] otherwise always represents.
    /// Conflating the two here is a deliberate simplification (see
    /// `DESIGN.md`).
    fn resume_after_eval(&self, thread: ThreadId) -> Result<()> {
        let guard = self.process.lock();
        let process = guard.as_deref().ok_or_else(|| DebuggerError::invalid_state("no active process"))?;
        process.continue_process(thread)
    }

    fn on_load_module(&self, module: ModuleId, events: &mpsc::UnboundedSender<ProtocolEvent>) -> Result<()> {
        let guard = self.process.lock();
        let process = guard.as_deref().ok_or_else(|| DebuggerError::invalid_state("no active process"))?;
        let info = process.module_info(module)?;
        drop(guard);

        let just_my_code = self.step_filtering.lock().just_my_code;
        self.modules.try_load(module, info.path.clone(), just_my_code, info.metadata, info.symbols);
        let _ = events.send(ProtocolEvent::Module {
            module,
            path: info.path.clone(),
            reason: ModuleChangeReason::New,
        });

        if info.path.ends_with("System.Private.CoreLib.dll") {
            let guard = self.process.lock();
            if let Some(process) = guard.as_deref() {
                if let Err(err) = process.set_enable_custom_notification(true) {
                    warn!(%err, "failed to enable cross-thread-dependency notifications");
                }
            }
        }

        if self.breakpoints.any_line_breakpoint_targets(&info.path)
            || self.breakpoints.has_unresolved_function_breakpoints()
        {
            self.breakpoints.try_resolve_for_module(&self.modules, module);
            for loc in self.breakpoints.all_resolved_locations() {
                self.ensure_native_breakpoint(loc);
            }
        }

        if self.stop_at_entry.load(Ordering::SeqCst) {
            let mut entry_module = self.entry_module.lock();
            if entry_module.is_none() {
                if let Some(method) = self.modules.entry_point_method(&info.image) {
                    self.breakpoints.set_entry_breakpoint(&self.modules, Some(module), &info.image);
                    self.ensure_native_breakpoint(CodeLocation { module, method, il_offset: 0 });
                    *entry_module = Some(module);
                }
            }
        }

        self.continue_thread(PROCESS_WIDE_THREAD, events)
    }

    /// Bind a native breakpoint at `loc` unless one is already bound there
    /// (spec §4.3: a line and a function breakpoint may resolve to the
    /// same location and must share one native object).
    fn ensure_native_breakpoint(&self, loc: CodeLocation) {
        let key = (loc.module, loc.method, loc.il_offset);
        let mut bound = self.bound_locations.lock();
        if bound.contains(&key) {
            return;
        }
        let guard = self.process.lock();
        let Some(process) = guard.as_deref() else { return };
        match process.create_breakpoint(loc.module, loc.method, loc.il_offset) {
            Ok(native) => {
                bound.insert(key);
                self.native_breakpoints.lock().insert(
                    native.native_id(),
                    NativeBreakpointBinding { native, location: key },
                );
            }
            Err(err) => warn!(%err, "failed to bind native breakpoint"),
        }
    }

    fn on_breakpoint(
        &self,
        thread: ThreadId,
        native_breakpoint_id: u64,
        events: &mpsc::UnboundedSender<ProtocolEvent>,
    ) -> Result<()> {
        let location = {
            let bindings = self.native_breakpoints.lock();
            bindings.get(&native_breakpoint_id).map(|b| b.location)
        };
        let Some((module, method, il_offset)) = location else {
            return self.continue_thread(thread, events);
        };

        let hits = self.breakpoints.identify_hit(module, method, il_offset);
        let is_entry = hits.iter().any(|h| matches!(h, BreakpointHit::Entry));
        if is_entry {
            // An entry breakpoint is transient: it fires once per session.
            self.breakpoints.set_entry_breakpoint(&self.modules, None, &[]);
        }

        let conditioned: Vec<BreakpointHit> = hits
            .into_iter()
            .filter(|hit| self.condition_holds(*hit, thread))
            .collect();

        if conditioned.is_empty() && !is_entry {
            return self.continue_thread(thread, events);
        }

        let breakpoint_id = conditioned.iter().find_map(|h| match h {
            BreakpointHit::Line(id) | BreakpointHit::Function(id) => Some(*id),
            BreakpointHit::Entry => None,
        });
        let reason = if is_entry && breakpoint_id.is_none() {
            StopReason::Entry
        } else {
            StopReason::Breakpoint
        };
        self.report_stop(thread, reason, breakpoint_id, events)
    }

    /// Evaluate a line/function breakpoint's condition, if it has one
    /// (spec §4.3 "Conditional breakpoint"). An entry breakpoint never
    /// carries a condition.
    fn condition_holds(&self, hit: BreakpointHit, thread: ThreadId) -> bool {
        let condition = match hit {
            BreakpointHit::Line(id) => self.breakpoints.line_breakpoint(id).ok().and_then(|b| b.condition),
            BreakpointHit::Function(id) => {
                self.breakpoints.function_breakpoint(id).ok().and_then(|b| b.condition)
            }
            BreakpointHit::Entry => None,
        };
        let Some(condition) = condition else { return true };
        self.try_evaluate_condition(thread, &condition).unwrap_or(true)
    }

    /// A narrowly scoped, synchronous condition evaluator: only
    /// `name OP literal` relational comparisons against a local variable's
    /// raw bytes are supported. Anything else — member access, function
    /// calls, unsupported operators — fails open (treated as `true`),
    /// matching the original's preference for over-stopping rather than
    /// silently skipping a breakpoint the user asked for (see `DESIGN.md`).
    fn try_evaluate_condition(&self, thread: ThreadId, condition: &str) -> Result<bool> {
        let (name, op, literal) = split_condition(condition).ok_or(DebuggerError::ParseError(condition.into()))?;

        let guard = self.process.lock();
        let process = guard.as_deref().ok_or_else(|| DebuggerError::invalid_state("no active process"))?;
        let native_thread = process.thread(thread)?;
        let frames = native_thread.frames()?;
        drop(guard);

        let frame = frames
            .iter()
            .find(|f| f.is_il_frame())
            .ok_or_else(|| DebuggerError::invalid_state("no IL frame"))?;
        let (module, method, il_offset) = match (frame.module_id(), frame.method_token(), frame.il_offset()) {
            (Some(m), Some(mt), Some(ilo)) => (m, mt, ilo),
            _ => return Err(DebuggerError::invalid_state("frame has no location")),
        };

        let index = self
            .modules
            .frame_named_local_variable(module, method, &name, il_offset)?
            .ok_or_else(|| DebuggerError::not_found("local variable"))?;
        let value = frame.local_variable(index)?;
        let bytes = value.primitive_bytes().ok_or(DebuggerError::ResolveFailed)?;

        let literal = classify_literal(&literal).map_err(|_| DebuggerError::ParseError(literal))?;
        compare_primitive(&bytes, &literal, op)
    }

    fn on_step_complete(&self, thread: ThreadId, events: &mpsc::UnboundedSender<ProtocolEvent>) -> Result<()> {
        if self.step_filtering.lock().just_my_code && !self.current_frame_is_my_code(thread)? {
            return self.step_over_and_continue(thread, events);
        }
        self.report_stop(thread, StopReason::Step, None, events)
    }

    fn step_over_and_continue(&self, thread: ThreadId, events: &mpsc::UnboundedSender<ProtocolEvent>) -> Result<()> {
        let guard = self.process.lock();
        let process = guard.as_deref().ok_or_else(|| DebuggerError::invalid_state("no active process"))?;
        let native_thread = process.thread(thread)?;
        let stepper = native_thread.create_stepper()?;
        stepper.set_jmc(true)?;
        stepper.step(false)?;
        drop(guard);
        self.continue_thread(thread, events)
    }

    fn current_frame_is_my_code(&self, thread: ThreadId) -> Result<bool> {
        let guard = self.process.lock();
        let process = guard.as_deref().ok_or_else(|| DebuggerError::invalid_state("no active process"))?;
        let native_thread = process.thread(thread)?;
        let frames = native_thread.frames()?;
        drop(guard);

        let Some(frame) = frames.iter().find(|f| f.is_il_frame()) else {
            return Ok(true);
        };
        let (Some(module), Some(method)) = (frame.module_id(), frame.method_token()) else {
            return Ok(true);
        };
        let Ok(name) = self.modules.method_name(module, method) else {
            return Ok(true);
        };
        let points = self.modules.sequence_points(module, method).unwrap_or_default();
        Ok(self.modules.is_my_code(module, method, &name, &points))
    }

    fn on_exception(
        &self,
        thread: ThreadId,
        category: ExceptionCategory,
        stage: ExceptionStage,
        type_name: &str,
        message: Option<&str>,
        events: &mpsc::UnboundedSender<ProtocolEvent>,
    ) -> Result<()> {
        if stage == ExceptionStage::Unhandled {
            self.unhandled_exception_threads.lock().insert(thread);
        }

        // An eval pending on the firing thread means this exception is
        // internal to the eval call itself; let it surface as
        // `EvalException` instead of a stop (spec §7).
        if self.eval_queue.is_pending(thread) {
            return self.continue_thread(thread, events);
        }
        // An eval pending on a different thread must not be allowed to
        // stop the world underneath it: intercept and re-deliver later.
        if self.eval_queue.any_pending() {
            let guard = self.process.lock();
            if let Some(process) = guard.as_deref() {
                if let Ok(native_thread) = process.thread(thread) {
                    let _ = native_thread.intercept_current_exception();
                }
            }
            drop(guard);
            return self.continue_thread(thread, events);
        }

        let matched = self.breakpoints.match_exception(category, stage, type_name);
        let always_stops = stage == ExceptionStage::Unhandled;
        if matched.is_none() && !always_stops {
            if let Some(message) = message {
                let _ = events.send(ProtocolEvent::Output {
                    category: "stderr".into(),
                    text: format!("{type_name}: {message}"),
                });
            }
            return self.continue_thread(thread, events);
        }

        self.report_stop(thread, StopReason::Exception, matched, events)
    }

    /// Record the stop, reset per-stop state, and emit a `Stopped` event
    /// with the current frame's source location when one is available
    /// (spec §4.6, §6 `Stopped`).
    fn report_stop(
        &self,
        thread: ThreadId,
        reason: StopReason,
        breakpoint: Option<crate::ids::BreakpointId>,
        events: &mpsc::UnboundedSender<ProtocolEvent>,
    ) -> Result<()> {
        self.stop_counter.fetch_add(1, Ordering::SeqCst);
        *self.lifecycle.lock() = Lifecycle::Stopped;
        *self.last_stopped_thread.lock() = Some(thread);
        self.variables.clear();

        let location = self.current_location(thread).ok().flatten();
        let frame = FrameId::encode(thread, crate::ids::FrameLevel(0));
        let _ = events.send(ProtocolEvent::stopped_at(thread, frame, reason, location, breakpoint));
        Ok(())
    }

    fn current_location(&self, thread: ThreadId) -> Result<Option<EventLocation>> {
        let guard = self.process.lock();
        let process = guard.as_deref().ok_or_else(|| DebuggerError::invalid_state("no active process"))?;
        let native_thread = process.thread(thread)?;
        let frames = native_thread.frames()?;
        drop(guard);

        let Some(frame) = frames.iter().find(|f| f.is_il_frame()) else {
            return Ok(None);
        };
        let (Some(module), Some(method), Some(il_offset)) =
            (frame.module_id(), frame.method_token(), frame.il_offset())
        else {
            return Ok(None);
        };
        match self.modules.frame_il_and_sequence_point(module, method, il_offset) {
            Ok((line, file)) => Ok(Some(EventLocation { file, line, column: 1 })),
            Err(_) => Ok(None),
        }
    }

    // ── Evaluator ────────────────────────────────────────────────────────

    /// `Evaluate`: resolve a watch/evaluate expression against a thread's
    /// current frame and register the result as a new variable handle
    /// (spec §4.4 name resolution, §4.5 `Evaluate`).
    ///
    /// A property member that still needs a function-eval is reported as
    /// an error rather than driven to completion here: wiring the eval
    /// queue's async rendezvous into this synchronous entry point is left
    /// to the protocol adapter, which already awaits `run_dispatch_loop`
    /// (see `DESIGN.md`).
    pub fn evaluate_expression(&self, thread: ThreadId, expression: &str) -> Result<VariableRefId> {
        let guard = self.process.lock();
        let process = guard.as_deref().ok_or_else(|| DebuggerError::invalid_state("no active process"))?;
        let native_thread = process.thread(thread)?;
        let frames = native_thread.frames()?;
        let frame = frames
            .iter()
            .find(|f| f.is_il_frame())
            .ok_or_else(|| DebuggerError::invalid_state("no IL frame"))?;
        let module = frame.module_id().ok_or_else(|| DebuggerError::invalid_state("frame has no module"))?;

        // Resolve the frame-local candidate against `self.modules` *before*
        // taking its metadata lock below: `modulesMutex` is not reentrant,
        // and `resolve_expression` itself must not need to touch the
        // registry while `with_metadata` holds it.
        let (_, method, il_offset) = resolve_frame_location(frame.as_ref())?;
        let local_index = match local_candidate_name(expression)? {
            Some(name) => self.modules.frame_named_local_variable(module, method, &name, il_offset).ok().flatten(),
            None => None,
        };

        let resolution = self.modules.with_metadata(module, |metadata| {
            resolve_expression(native_thread.as_ref(), frame.as_ref(), local_index, metadata, expression)
        })??;
        drop(guard);

        match resolution {
            Resolution::Value(value) => Ok(self.variables.create_scope(value)),
            Resolution::PendingGetter { .. } => Err(DebuggerError::invalid_state(
                "expression resolves to a property; evaluating it requires a function-eval this entry point does not issue",
            )),
        }
    }

    /// `GetVariables`/`GetChildren` (spec §4.5): expand a previously
    /// registered variable handle's members. Metadata is looked up against
    /// the current frame's module, the same way [`Controller::
    /// evaluate_expression`] does — a variable handle does not itself
    /// carry the module it was created from, but every handle reachable
    /// from a stop event traces back to the thread that was stopped.
    pub fn variable_children(
        &self,
        thread: ThreadId,
        parent: VariableRefId,
        filter: VariableFilter,
        start: u32,
        count: u32,
    ) -> Result<Vec<VariableDescriptor>> {
        let guard = self.process.lock();
        let process = guard.as_deref().ok_or_else(|| DebuggerError::invalid_state("no active process"))?;
        let native_thread = process.thread(thread)?;
        let frames = native_thread.frames()?;
        let module = frames
            .iter()
            .find(|f| f.is_il_frame())
            .and_then(|f| f.module_id())
            .ok_or_else(|| DebuggerError::invalid_state("no managed frame available for metadata lookup"))?;
        drop(guard);

        self.modules
            .with_metadata(module, |metadata| self.variables.get_children(parent, metadata, filter, start, count))?
    }

    // ── Stack access ─────────────────────────────────────────────────────

    /// `GetStackTrace`: the stitched frames for one thread (spec §4.2).
    pub fn stack_trace(&self, thread: ThreadId) -> Result<Vec<StackFrame>> {
        let guard = self.process.lock();
        let process = guard.as_deref().ok_or_else(|| DebuggerError::invalid_state("no active process"))?;
        let native_thread = process.thread(thread)?;
        let raw = native_thread.frames()?;
        Ok(walk_frames(thread, &raw))
    }
}

/// Split a condition expression of the form `name OP literal` into its
/// three parts. Anything more complex (member access, calls, logical
/// operators) is rejected, matching the evaluator's intentionally narrow
/// condition grammar (spec §4.3).
fn split_condition(condition: &str) -> Option<(String, &'static str, String)> {
    const OPERATORS: &[&str] = &["==", "!=", "<=", ">=", "<", ">"];
    for op in OPERATORS {
        if let Some(idx) = condition.find(op) {
            let name = condition[..idx].trim();
            let rest = condition[idx + op.len()..].trim();
            if name.is_empty() || rest.is_empty() || name.contains(['.', '[', '(']) {
                return None;
            }
            return Some((name.to_string(), op, rest.to_string()));
        }
    }
    None
}

fn compare_primitive(bytes: &[u8], literal: &crate::eval::literal::LiteralRequest, op: &str) -> Result<bool> {
    use crate::eval::literal::LiteralRequest;

    let lhs: i64 = match bytes.len() {
        1 => bytes[0] as i64,
        2 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        4 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        8 => i64::from_le_bytes(bytes.try_into().unwrap()),
        _ => return Err(DebuggerError::ResolveFailed),
    };
    let rhs = match literal {
        LiteralRequest::SignedInt(n) => *n,
        LiteralRequest::UnsignedInt(n) => *n as i64,
        LiteralRequest::Bool(b) => *b as i64,
        LiteralRequest::Char(c) => *c as i64,
        _ => return Err(DebuggerError::invalid_state("condition literal is not comparable to an integer local")),
    };
    Ok(match op {
        "==" => lhs == rhs,
        "!=" => lhs != rhs,
        "<" => lhs < rhs,
        "<=" => lhs <= rhs,
        ">" => lhs > rhs,
        ">=" => lhs >= rhs,
        _ => unreachable!(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_condition_rejects_member_access() {
        assert!(split_condition("a.b == 1").is_none());
    }

    #[test]
    fn split_condition_parses_simple_comparison() {
        let (name, op, literal) = split_condition("count >= 3").unwrap();
        assert_eq!(name, "count");
        assert_eq!(op, ">=");
        assert_eq!(literal, "3");
    }

    #[test]
    fn compare_primitive_matches_equal_ints() {
        let literal = classify_literal("3").unwrap();
        assert!(compare_primitive(&3i32.to_le_bytes(), &literal, "==").unwrap());
        assert!(!compare_primitive(&4i32.to_le_bytes(), &literal, "==").unwrap());
    }

    use std::collections::HashMap as StdHashMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::testutil::fake::{FakeFrame, FakeLauncher, FakeMetadata, FakeSymbols, FakeThread, FakeValue};

    fn launch_request() -> LaunchRequest {
        LaunchRequest::Launch(LaunchConfig {
            program: PathBuf::from("/app/Program.dll"),
            args: Vec::new(),
            cwd: None,
            env: StdHashMap::new(),
            stop_at_entry: false,
            step_filtering: StepFilterConfig::default(),
        })
    }

    #[test]
    fn start_marks_stopped_and_stores_step_filtering() {
        let controller = Controller::new(Box::new(FakeLauncher::new()));
        let _callbacks = controller.start(launch_request()).unwrap();
        assert_eq!(controller.lifecycle(), Lifecycle::Stopped);
        assert_eq!(controller.stop_counter.load(Ordering::SeqCst), 1);
        assert!(controller.step_filtering.lock().just_my_code);
    }

    #[test]
    fn continue_thread_rejects_when_nothing_is_stopped() {
        let controller = Controller::new(Box::new(FakeLauncher::new()));
        let (etx, _erx) = mpsc::unbounded_channel();
        assert!(controller.continue_thread(ThreadId(1), &etx).is_err());
    }

    #[test]
    fn dispatch_create_process_sends_initialized_and_continues() {
        let launcher = Arc::new(FakeLauncher::new());
        let controller = Controller::new(Box::new(launcher.clone()));
        let _callbacks = controller.start(launch_request()).unwrap();
        let process = launcher.process();

        let (etx, mut erx) = mpsc::unbounded_channel();
        controller.dispatch(ManagedCallbackEvent::CreateProcess, &etx).unwrap();

        assert_eq!(process.continued_threads(), vec![PROCESS_WIDE_THREAD]);
        assert_eq!(erx.try_recv().unwrap(), ProtocolEvent::Initialized);
        assert_eq!(erx.try_recv().unwrap(), ProtocolEvent::Continued { thread: PROCESS_WIDE_THREAD });
        assert_eq!(controller.lifecycle(), Lifecycle::Running);
    }

    #[test]
    fn try_evaluate_condition_reads_a_named_local() {
        let launcher = Arc::new(FakeLauncher::new());
        let controller = Controller::new(Box::new(launcher.clone()));
        let _callbacks = controller.start(launch_request()).unwrap();
        let process = launcher.process();

        let module = ModuleId(1);
        let method: MethodToken = 100;
        let frame = FakeFrame::managed(module, method, 4).with_local(0, FakeValue::int32(3));
        process.add_thread(FakeThread::with_frames(ThreadId(1), vec![frame]));

        let mut symbols = FakeSymbols::default();
        symbols.locals.insert((method, 0), ("count".into(), 0, 100));
        controller.modules().try_load(
            module,
            "/app/Program.dll".into(),
            false,
            Box::new(FakeMetadata::default()),
            Some(Box::new(symbols)),
        );

        assert!(controller.try_evaluate_condition(ThreadId(1), "count == 3").unwrap());
        assert!(!controller.try_evaluate_condition(ThreadId(1), "count == 4").unwrap());
    }

    #[test]
    fn evaluate_expression_registers_a_variable_handle() {
        let launcher = Arc::new(FakeLauncher::new());
        let controller = Controller::new(Box::new(launcher.clone()));
        let _callbacks = controller.start(launch_request()).unwrap();
        let process = launcher.process();

        let module = ModuleId(1);
        let method: MethodToken = 100;
        let frame = FakeFrame::managed(module, method, 4).with_local(0, FakeValue::int32(7));
        process.add_thread(FakeThread::with_frames(ThreadId(1), vec![frame]));

        let mut symbols = FakeSymbols::default();
        symbols.locals.insert((method, 0), ("count".into(), 0, 100));
        controller.modules().try_load(
            module,
            "/app/Program.dll".into(),
            false,
            Box::new(FakeMetadata::default()),
            Some(Box::new(symbols)),
        );

        let handle = controller.evaluate_expression(ThreadId(1), "count").unwrap();
        assert!(handle > 0);
    }

    #[test]
    fn evaluate_expression_rejects_unknown_locals() {
        let launcher = Arc::new(FakeLauncher::new());
        let controller = Controller::new(Box::new(launcher.clone()));
        let _callbacks = controller.start(launch_request()).unwrap();
        let process = launcher.process();

        let module = ModuleId(1);
        let method: MethodToken = 100;
        let frame = FakeFrame::managed(module, method, 4);
        process.add_thread(FakeThread::with_frames(ThreadId(1), vec![frame]));
        controller.modules().try_load(
            module,
            "/app/Program.dll".into(),
            false,
            Box::new(FakeMetadata::default()),
            Some(Box::new(FakeSymbols::default())),
        );

        assert!(controller.evaluate_expression(ThreadId(1), "missing").is_err());
    }

    #[test]
    fn step_creates_a_stepper_and_resumes_the_thread() {
        use crate::engine_api::StepKind;

        let launcher = Arc::new(FakeLauncher::new());
        let controller = Controller::new(Box::new(launcher.clone()));
        let _callbacks = controller.start(launch_request()).unwrap();
        let process = launcher.process();

        let module = ModuleId(1);
        let method: MethodToken = 100;
        let frame = FakeFrame::managed(module, method, 4);
        process.add_thread(FakeThread::with_frames(ThreadId(1), vec![frame]));
        controller.modules().try_load(
            module,
            "/app/Program.dll".into(),
            false,
            Box::new(FakeMetadata::default()),
            Some(Box::new(FakeSymbols::default())),
        );

        let (etx, _erx) = mpsc::unbounded_channel();
        controller.step(ThreadId(1), StepKind::Over, &etx).unwrap();
        assert_eq!(process.continued_threads(), vec![ThreadId(1)]);
    }

    #[test]
    fn step_out_rejects_when_no_process_is_running() {
        use crate::engine_api::StepKind;

        let controller = Controller::new(Box::new(FakeLauncher::new()));
        let (etx, _erx) = mpsc::unbounded_channel();
        assert!(controller.step(ThreadId(1), StepKind::Out, &etx).is_err());
    }
}
