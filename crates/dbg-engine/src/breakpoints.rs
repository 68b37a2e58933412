//! Breakpoint manager: line, function, exception and entry breakpoints,
//! their resolution against loaded modules, and hit identification
//! (spec §4.3).

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::engine_api::{ExceptionCategory, ExceptionStage, MethodToken};
use crate::error::{DebuggerError, Result};
use crate::ids::{BreakpointId, ModuleId};
use crate::modules::{paths_match, CodeLocation, Modules};

/// A source-line breakpoint (spec §3 `LineBreakpoint`).
#[derive(Debug, Clone)]
pub struct LineBreakpoint {
    pub id: BreakpointId,
    pub file: String,
    pub line: u32,
    pub condition: Option<String>,
    pub verified: bool,
    pub resolved: Option<CodeLocation>,
}

/// A named-function breakpoint (spec §3 `FunctionBreakpoint`). One
/// breakpoint can resolve to several `(module, method)` pairs when the
/// name is overloaded or loaded into more than one module.
#[derive(Debug, Clone)]
pub struct FunctionBreakpoint {
    pub id: BreakpointId,
    pub function_name: String,
    pub param_signature: Option<String>,
    pub condition: Option<String>,
    pub verified: bool,
    pub resolved: Vec<CodeLocation>,
}

/// Which point in an exception's lifecycle a filter matches (spec §3
/// `ExceptionBreakpoint.filter`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionFilter {
    Throw,
    UserUnhandled,
    ThrowUserUnhandled,
    Unhandled,
}

impl ExceptionFilter {
    fn matches_stage(self, stage: ExceptionStage) -> bool {
        match (self, stage) {
            (ExceptionFilter::Throw, ExceptionStage::Thrown) => true,
            (ExceptionFilter::UserUnhandled, ExceptionStage::UserUnhandled) => true,
            (ExceptionFilter::ThrowUserUnhandled, ExceptionStage::Thrown | ExceptionStage::UserUnhandled) => true,
            (ExceptionFilter::Unhandled, ExceptionStage::Unhandled) => true,
            _ => false,
        }
    }
}

/// A type-name condition on an exception breakpoint: matches if the
/// thrown type is in `type_names`, inverted when `negate` (spec §3
/// `ExceptionBreakpoint.condition`, "type-name set, XOR negate").
#[derive(Debug, Clone, Default)]
pub struct ExceptionCondition {
    pub type_names: Vec<String>,
    pub negate: bool,
}

impl ExceptionCondition {
    fn matches(&self, type_name: &str) -> bool {
        if self.type_names.is_empty() {
            return !self.negate;
        }
        let present = self.type_names.iter().any(|t| t == type_name);
        present ^ self.negate
    }
}

/// An exception breakpoint (spec §3 `ExceptionBreakpoint`).
#[derive(Debug, Clone)]
pub struct ExceptionBreakpoint {
    pub id: BreakpointId,
    pub category: ExceptionCategory,
    pub filter: ExceptionFilter,
    pub condition: ExceptionCondition,
}

impl ExceptionBreakpoint {
    fn matches(&self, category: ExceptionCategory, stage: ExceptionStage, type_name: &str) -> bool {
        self.category == category && self.filter.matches_stage(stage) && self.condition.matches(type_name)
    }
}

/// The process entry-point breakpoint (spec §3 `EntryBreakpoint`,
/// "stopAtEntry"). At most one exists per launched process.
#[derive(Debug, Clone)]
pub struct EntryBreakpoint {
    pub resolved: Option<CodeLocation>,
    pub verified: bool,
}

/// A resolved breakpoint hit identified from a native `Breakpoint`
/// callback (spec §4.3 "Hit identification").
#[derive(Debug, Clone, Copy)]
pub enum BreakpointHit {
    Line(BreakpointId),
    Function(BreakpointId),
    Entry,
}

struct Storage {
    next_id: BreakpointId,
    lines: HashMap<BreakpointId, LineBreakpoint>,
    functions: HashMap<BreakpointId, FunctionBreakpoint>,
    exceptions: HashMap<BreakpointId, ExceptionBreakpoint>,
    entry: Option<EntryBreakpoint>,
    /// Reverse index from a resolved code location to the breakpoint(s)
    /// bound there, populated as breakpoints resolve (spec §4.3
    /// "two-map storage").
    by_location: HashMap<(ModuleId, MethodToken, u32), Vec<BreakpointHitTarget>>,
}

#[derive(Debug, Clone, Copy)]
enum BreakpointHitTarget {
    Line(BreakpointId),
    Function(BreakpointId),
    Entry,
}

/// Breakpoint manager (spec §4.3). Guarded by a single `parking_lot::Mutex`
/// per spec §5's `breakpointsMutex`.
pub struct Breakpoints {
    inner: Mutex<Storage>,
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self::new()
    }
}

impl Breakpoints {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Storage {
                next_id: 1,
                lines: HashMap::new(),
                functions: HashMap::new(),
                exceptions: HashMap::new(),
                entry: None,
                by_location: HashMap::new(),
            }),
        }
    }

    fn next_id(storage: &mut Storage) -> BreakpointId {
        let id = storage.next_id;
        storage.next_id += 1;
        id
    }

    /// Replace the full set of line breakpoints for one file (spec §4.3
    /// `SetLineBreakpoints`: a client resends the complete set for a file
    /// on every change, so stale ids for that file are dropped first).
    pub fn set_line_breakpoints(
        &self,
        modules: &Modules,
        file: &str,
        requests: Vec<(u32, Option<String>)>,
    ) -> Vec<LineBreakpoint> {
        let mut storage = self.inner.lock();
        let stale: Vec<BreakpointId> = storage
            .lines
            .values()
            .filter(|b| b.file == file)
            .map(|b| b.id)
            .collect();
        for id in stale {
            storage.lines.remove(&id);
            Self::remove_from_index(&mut storage, |t| matches!(t, BreakpointHitTarget::Line(bid) if *bid == id));
        }

        let mut created = Vec::with_capacity(requests.len());
        for (line, condition) in requests {
            let id = Self::next_id(&mut storage);
            let resolved = modules.location_in_any(file, line).ok();
            let verified = resolved.is_some();
            if let Some(loc) = resolved {
                storage
                    .by_location
                    .entry((loc.module, loc.method, loc.il_offset))
                    .or_default()
                    .push(BreakpointHitTarget::Line(id));
            }
            let bp = LineBreakpoint {
                id,
                file: file.to_string(),
                line,
                condition,
                verified,
                resolved,
            };
            storage.lines.insert(id, bp.clone());
            created.push(bp);
        }
        created
    }

    /// Replace the full set of function breakpoints (spec §4.3
    /// `SetFunctionBreakpoints`).
    pub fn set_function_breakpoints(
        &self,
        modules: &Modules,
        requests: Vec<(String, Option<String>, Option<String>)>,
    ) -> Vec<FunctionBreakpoint> {
        let mut storage = self.inner.lock();
        let stale: Vec<BreakpointId> = storage.functions.keys().copied().collect();
        for id in stale {
            storage.functions.remove(&id);
            Self::remove_from_index(&mut storage, |t| matches!(t, BreakpointHitTarget::Function(bid) if *bid == id));
        }

        let mut created = Vec::with_capacity(requests.len());
        for (function_name, param_signature, condition) in requests {
            let id = Self::next_id(&mut storage);
            let resolved =
                modules.resolve_function_in_any(&function_name, param_signature.as_deref());
            let resolved: Vec<CodeLocation> = resolved
                .into_iter()
                .map(|(module, _ty, method)| CodeLocation {
                    module,
                    method,
                    il_offset: 0,
                })
                .collect();
            for loc in &resolved {
                storage
                    .by_location
                    .entry((loc.module, loc.method, loc.il_offset))
                    .or_default()
                    .push(BreakpointHitTarget::Function(id));
            }
            let verified = !resolved.is_empty();
            let bp = FunctionBreakpoint {
                id,
                function_name,
                param_signature,
                condition,
                verified,
                resolved,
            };
            storage.functions.insert(id, bp.clone());
            created.push(bp);
        }
        created
    }

    /// Replace the full set of exception breakpoints (spec §4.3
    /// `SetExceptionBreakpoints`). These never "resolve" against a module;
    /// they are matched purely at hit time.
    pub fn set_exception_breakpoints(
        &self,
        requests: Vec<(ExceptionCategory, ExceptionFilter, ExceptionCondition)>,
    ) -> Vec<BreakpointId> {
        let mut storage = self.inner.lock();
        storage.exceptions.clear();
        let mut ids = Vec::with_capacity(requests.len());
        for (category, filter, condition) in requests {
            let id = Self::next_id(&mut storage);
            storage.exceptions.insert(
                id,
                ExceptionBreakpoint {
                    id,
                    category,
                    filter,
                    condition,
                },
            );
            ids.push(id);
        }
        ids
    }

    /// Set (or clear) the entry breakpoint, resolved by scanning the
    /// entry module's image (spec §4.3 "Entry-point discovery").
    pub fn set_entry_breakpoint(&self, modules: &Modules, entry: Option<ModuleId>, image: &[u8]) {
        let new_entry = entry.map(|module| {
            let resolved = modules.entry_point_method(image).map(|method| CodeLocation {
                module,
                method,
                il_offset: 0,
            });
            EntryBreakpoint {
                verified: resolved.is_some(),
                resolved,
            }
        });

        let mut storage = self.inner.lock();
        Self::remove_from_index(&mut storage, |t| matches!(t, BreakpointHitTarget::Entry));
        if let Some(loc) = new_entry.as_ref().and_then(|e| e.resolved) {
            storage
                .by_location
                .entry((loc.module, loc.method, loc.il_offset))
                .or_default()
                .push(BreakpointHitTarget::Entry);
        }
        storage.entry = new_entry;
    }

    fn remove_from_index(storage: &mut Storage, pred: impl Fn(&BreakpointHitTarget) -> bool) {
        storage.by_location.retain(|_, targets| {
            targets.retain(|t| !pred(t));
            !targets.is_empty()
        });
    }

    pub fn delete_line_breakpoint(&self, id: BreakpointId) -> bool {
        let mut storage = self.inner.lock();
        let removed = storage.lines.remove(&id).is_some();
        if removed {
            Self::remove_from_index(&mut storage, |t| matches!(t, BreakpointHitTarget::Line(bid) if *bid == id));
        }
        removed
    }

    pub fn delete_function_breakpoint(&self, id: BreakpointId) -> bool {
        let mut storage = self.inner.lock();
        let removed = storage.functions.remove(&id).is_some();
        if removed {
            Self::remove_from_index(&mut storage, |t| matches!(t, BreakpointHitTarget::Function(bid) if *bid == id));
        }
        removed
    }

    /// Re-attempt resolution for every still-unresolved line/function
    /// breakpoint against a newly loaded module (spec §4.3
    /// `TryResolveBreakpointsForModule`).
    pub fn try_resolve_for_module(&self, modules: &Modules, module: ModuleId) {
        let mut storage = self.inner.lock();

        let unresolved_lines: Vec<BreakpointId> = storage
            .lines
            .iter()
            .filter(|(_, b)| !b.verified)
            .map(|(id, _)| *id)
            .collect();
        for id in unresolved_lines {
            let file = storage.lines[&id].file.clone();
            let line = storage.lines[&id].line;
            if let Ok(loc) = modules.location_in_module(module, &file, line) {
                storage
                    .by_location
                    .entry((loc.module, loc.method, loc.il_offset))
                    .or_default()
                    .push(BreakpointHitTarget::Line(id));
                let bp = storage.lines.get_mut(&id).unwrap();
                bp.verified = true;
                bp.resolved = Some(loc);
            }
        }

        let unresolved_functions: Vec<BreakpointId> = storage
            .functions
            .iter()
            .filter(|(_, b)| !b.verified)
            .map(|(id, _)| *id)
            .collect();
        for id in unresolved_functions {
            let (name, sig) = {
                let bp = &storage.functions[&id];
                (bp.function_name.clone(), bp.param_signature.clone())
            };
            if let Ok(hits) = modules.resolve_method_in_module(module, &name, sig.as_deref()) {
                if !hits.is_empty() {
                    let locs: Vec<CodeLocation> = hits
                        .into_iter()
                        .map(|(_ty, method)| CodeLocation {
                            module,
                            method,
                            il_offset: 0,
                        })
                        .collect();
                    for loc in &locs {
                        storage
                            .by_location
                            .entry((loc.module, loc.method, loc.il_offset))
                            .or_default()
                            .push(BreakpointHitTarget::Function(id));
                    }
                    let bp = storage.functions.get_mut(&id).unwrap();
                    bp.verified = true;
                    bp.resolved.extend(locs);
                }
            }
        }
    }

    /// Identify which breakpoint(s), if any, a native `Breakpoint`
    /// callback corresponds to (spec §4.3 "Hit identification": IL
    /// offset+token verification, then param-signature equality for
    /// function breakpoints sharing the same entry address).
    pub fn identify_hit(
        &self,
        module: ModuleId,
        method: MethodToken,
        il_offset: u32,
    ) -> Vec<BreakpointHit> {
        let storage = self.inner.lock();
        storage
            .by_location
            .get(&(module, method, il_offset))
            .map(|targets| {
                targets
                    .iter()
                    .map(|t| match t {
                        BreakpointHitTarget::Line(id) => BreakpointHit::Line(*id),
                        BreakpointHitTarget::Function(id) => BreakpointHit::Function(*id),
                        BreakpointHitTarget::Entry => BreakpointHit::Entry,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Match a thrown exception against every exception breakpoint (spec
    /// §4.3 "Exception matching"); `None` means no filter fired, which the
    /// controller reports as an `Output` event only (spec §7).
    pub fn match_exception(
        &self,
        category: ExceptionCategory,
        stage: ExceptionStage,
        type_name: &str,
    ) -> Option<BreakpointId> {
        let storage = self.inner.lock();
        storage
            .exceptions
            .values()
            .find(|b| b.matches(category, stage, type_name))
            .map(|b| b.id)
    }

    pub fn line_breakpoint(&self, id: BreakpointId) -> Result<LineBreakpoint> {
        self.inner
            .lock()
            .lines
            .get(&id)
            .cloned()
            .ok_or_else(|| DebuggerError::not_found("line breakpoint"))
    }

    pub fn function_breakpoint(&self, id: BreakpointId) -> Result<FunctionBreakpoint> {
        self.inner
            .lock()
            .functions
            .get(&id)
            .cloned()
            .ok_or_else(|| DebuggerError::not_found("function breakpoint"))
    }

    /// `paths_match`-aware equivalent of a file-owning check, exposed for
    /// the controller's `LoadModule` dispatch to decide whether re-resolution
    /// against a module is worth attempting at all.
    pub fn any_line_breakpoint_targets(&self, path: &str) -> bool {
        self.inner.lock().lines.values().any(|b| paths_match(&b.file, path))
    }

    /// Whether any function breakpoint is still waiting to resolve (spec
    /// §4.3): a function breakpoint carries no file path to match against
    /// an incoming module, so unlike [`Breakpoints::any_line_breakpoint_targets`]
    /// it cannot narrow to one module and instead just asks whether
    /// resolution against the newly loaded module is worth attempting at
    /// all.
    pub fn has_unresolved_function_breakpoints(&self) -> bool {
        self.inner.lock().functions.values().any(|b| !b.verified)
    }

    /// The current entry-point breakpoint, if one is set (spec §4.3
    /// "Entry-point breakpoint").
    pub fn entry_breakpoint(&self) -> Option<EntryBreakpoint> {
        self.inner.lock().entry.clone()
    }

    /// Every resolved code location across line and function breakpoints,
    /// used by the controller to bind native breakpoints on demand without
    /// duplicating a location shared by two breakpoint kinds.
    pub fn all_resolved_locations(&self) -> Vec<CodeLocation> {
        let storage = self.inner.lock();
        let mut locations: Vec<CodeLocation> = storage.lines.values().filter_map(|b| b.resolved).collect();
        locations.extend(storage.functions.values().flat_map(|b| b.resolved.iter().copied()));
        locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_api::{MetadataReader, MethodInfo, SymbolReader, TypeInfo};

    struct FakeMetadata;
    impl MetadataReader for FakeMetadata {
        fn get_type(&self, _t: crate::engine_api::TypeToken) -> Result<TypeInfo> {
            Err(DebuggerError::not_found("type"))
        }
        fn find_type_by_name(&self, _n: &str) -> Result<Option<TypeInfo>> {
            Ok(None)
        }
        fn enum_type_defs(&self) -> Result<Vec<TypeInfo>> {
            Ok(vec![TypeInfo {
                token: 1,
                name: "Ns.Program".into(),
                base_type: None,
                generic_arity: 0,
                is_value_type: false,
                enclosing_type: None,
                custom_attributes: Vec::new(),
            }])
        }
        fn enum_methods_with_name(
            &self,
            _owner: crate::engine_api::TypeToken,
            name: &str,
        ) -> Result<Vec<MethodInfo>> {
            if name == "Main" {
                Ok(vec![MethodInfo {
                    token: 100,
                    owner: 1,
                    name: "Main".into(),
                    param_types: vec![],
                    custom_attributes: Vec::new(),
                    is_getter: false,
                    is_setter: false,
                }])
            } else {
                Ok(vec![])
            }
        }
        fn get_method(&self, _t: MethodToken) -> Result<MethodInfo> {
            Err(DebuggerError::not_found("method"))
        }
        fn enum_fields(&self, _o: crate::engine_api::TypeToken) -> Result<Vec<crate::engine_api::FieldInfo>> {
            Ok(vec![])
        }
        fn enum_properties(&self, _o: crate::engine_api::TypeToken) -> Result<Vec<crate::engine_api::PropertyInfo>> {
            Ok(vec![])
        }
        fn scope_mvid(&self) -> Result<crate::engine_api::Mvid> {
            Ok([0; 16])
        }
    }

    struct FakeSymbols;
    impl SymbolReader for FakeSymbols {
        fn resolve_sequence_point(&self, file: &str, line: u32) -> Result<Option<(MethodToken, u32)>> {
            if file.ends_with("Program.cs") && line == 10 {
                Ok(Some((100, 2)))
            } else {
                Ok(None)
            }
        }
        fn get_line_by_il_offset(&self, _m: MethodToken, _o: u32) -> Result<Option<(u32, String)>> {
            Ok(Some((10, "Program.cs".into())))
        }
        fn get_step_ranges_from_ip(&self, _m: MethodToken, _o: u32) -> Result<(u32, u32)> {
            Ok((0, 4))
        }
        fn get_sequence_points(&self, _m: MethodToken) -> Result<Vec<crate::engine_api::SequencePoint>> {
            Ok(vec![])
        }
        fn get_named_local_variable(
            &self,
            _m: MethodToken,
            _i: u32,
            _ip: u32,
        ) -> Result<Option<(String, u32, u32)>> {
            Ok(None)
        }
    }

    fn registry_with_program() -> Modules {
        let modules = Modules::new();
        modules.try_load(
            ModuleId(1),
            "/app/Program.dll",
            true,
            Box::new(FakeMetadata),
            Some(Box::new(FakeSymbols)),
        );
        modules
    }

    #[test]
    fn line_breakpoint_resolves_and_indexes_hit() {
        let modules = registry_with_program();
        let bps = Breakpoints::new();
        let created = bps.set_line_breakpoints(&modules, "/app/Program.cs", vec![(10, None)]);
        assert_eq!(created.len(), 1);
        assert!(created[0].verified);

        let hits = bps.identify_hit(ModuleId(1), 100, 2);
        assert!(matches!(hits[0], BreakpointHit::Line(id) if id == created[0].id));
    }

    #[test]
    fn resending_line_breakpoints_drops_stale_ids() {
        let modules = registry_with_program();
        let bps = Breakpoints::new();
        let first = bps.set_line_breakpoints(&modules, "/app/Program.cs", vec![(10, None)]);
        let second = bps.set_line_breakpoints(&modules, "/app/Program.cs", vec![(10, None)]);
        assert_ne!(first[0].id, second[0].id);
        assert!(bps.line_breakpoint(first[0].id).is_err());
    }

    #[test]
    fn function_breakpoint_resolves_by_name() {
        let modules = registry_with_program();
        let bps = Breakpoints::new();
        let created = bps.set_function_breakpoints(&modules, vec![("Program.Main".into(), None, None)]);
        assert!(created[0].verified);
        assert_eq!(created[0].resolved.len(), 1);
    }

    #[test]
    fn exception_breakpoint_matches_category_filter_and_condition() {
        let bps = Breakpoints::new();
        let ids = bps.set_exception_breakpoints(vec![(
            ExceptionCategory::Clr,
            ExceptionFilter::Unhandled,
            ExceptionCondition {
                type_names: vec!["System.Exception".into()],
                negate: false,
            },
        )]);
        let hit = bps.match_exception(ExceptionCategory::Clr, ExceptionStage::Unhandled, "System.Exception");
        assert_eq!(hit, Some(ids[0]));

        let miss = bps.match_exception(ExceptionCategory::Clr, ExceptionStage::Thrown, "System.Exception");
        assert_eq!(miss, None);

        let wrong_type = bps.match_exception(ExceptionCategory::Clr, ExceptionStage::Unhandled, "System.IOException");
        assert_eq!(wrong_type, None);
    }

    #[test]
    fn exception_condition_negate_excludes_named_types() {
        let cond = ExceptionCondition {
            type_names: vec!["System.IOException".into()],
            negate: true,
        };
        assert!(cond.matches("System.Exception"));
        assert!(!cond.matches("System.IOException"));
    }

    #[test]
    fn try_resolve_for_module_binds_previously_unresolved_breakpoint() {
        let modules = Modules::new();
        let bps = Breakpoints::new();
        let created = bps.set_line_breakpoints(&modules, "/app/Program.cs", vec![(10, None)]);
        assert!(!created[0].verified);

        modules.try_load(
            ModuleId(1),
            "/app/Program.dll",
            true,
            Box::new(FakeMetadata),
            Some(Box::new(FakeSymbols)),
        );
        bps.try_resolve_for_module(&modules, ModuleId(1));
        let resolved = bps.line_breakpoint(created[0].id).unwrap();
        assert!(resolved.verified);
    }
}
