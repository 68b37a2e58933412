//! Modules registry: loaded-module bookkeeping, entry-point discovery and
//! method/sequence-point resolution (spec §4.1).
//!
//! One [`Module`] is created on a `LoadModule` callback and removed on
//! `UnloadModule`/process exit (spec §3: "one instance per address").
//! Everything that needs to resolve a source location or a function name
//! against loaded metadata goes through this registry.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::engine_api::{MetadataReader, MethodToken, SequencePoint, SymbolReader, TypeToken};
use crate::entrypoint::parse_entry_point;
use crate::error::{DebuggerError, Result};
use crate::ids::ModuleId;
use crate::typeprint::{render_generic_name, suffix_matches_dotted};

/// Whether a module's symbols could be loaded. Mirrors the distinction the
/// original keeps between "no PDB shipped" and "PDB present but unusable"
/// so a missing-symbols module still resolves breakpoints by best effort
/// (line breakpoints just never bind).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolStatus {
    Loaded,
    NotFound,
}

/// A loaded module (spec §3).
pub struct Module {
    pub id: ModuleId,
    pub path: String,
    pub symbol_status: SymbolStatus,
    pub just_my_code: bool,
    metadata: Box<dyn MetadataReader>,
    symbols: Option<Box<dyn SymbolReader>>,
}

impl Module {
    pub fn metadata(&self) -> &dyn MetadataReader {
        self.metadata.as_ref()
    }

    pub fn symbols(&self) -> Option<&dyn SymbolReader> {
        self.symbols.as_deref()
    }
}

/// Names the original excludes from "my code" purely by their mangled
/// overloaded-operator form: a method carrying no non-hidden sequence
/// point AND named like one of these is JMC-excluded even if its owning
/// type otherwise passes (original_source/jmc.cpp).
const OVERLOADED_OPERATOR_NAMES: &[&str] = &[
    "op_Addition",
    "op_Subtraction",
    "op_Multiply",
    "op_Division",
    "op_Modulus",
    "op_Equality",
    "op_Inequality",
    "op_LessThan",
    "op_GreaterThan",
    "op_LessThanOrEqual",
    "op_GreaterThanOrEqual",
    "op_UnaryNegation",
    "op_UnaryPlus",
    "op_BitwiseAnd",
    "op_BitwiseOr",
    "op_ExclusiveOr",
    "op_LeftShift",
    "op_RightShift",
    "op_Increment",
    "op_Decrement",
    "op_True",
    "op_False",
    "op_LogicalNot",
    "op_AddressOf",
    "op_OnesComplement",
    "op_PointerDereference",
    "op_LogicalAnd",
    "op_LogicalOr",
    "op_Assign",
    "op_SignedRightShift",
    "op_UnsignedRightShift",
    "op_UnsignedRightShiftAssignment",
    "op_MemberSelection",
    "op_RightShiftAssignment",
    "op_MultiplicationAssignment",
    "op_PointerToMemberSelection",
    "op_SubtractionAssignment",
    "op_ExclusiveOrAssignment",
    "op_LeftShiftAssignment",
    "op_ModulusAssignment",
    "op_AdditionAssignment",
    "op_BitwiseAndAssignment",
    "op_BitwiseOrAssignment",
    "op_Comma",
    "op_DivisionAssignment",
];

fn is_overloaded_operator_name(name: &str) -> bool {
    OVERLOADED_OPERATOR_NAMES.contains(&name)
}

/// Attribute type names that force a method (or its owner type) out of
/// "my code" outright, regardless of source info (`original_source/
/// jmc.cpp`'s `g_nonUserCode`/`g_stepThrough`, checked via `HasAttribute`).
const NON_USER_CODE_ATTRIBUTES: &[&str] = &[
    "System.Diagnostics.DebuggerNonUserCodeAttribute",
    "System.Diagnostics.DebuggerStepThroughAttribute",
];

fn has_non_user_code_marker(attributes: &[String]) -> bool {
    attributes
        .iter()
        .any(|a| NON_USER_CODE_ATTRIBUTES.iter().any(|marker| a.contains(marker)))
}

/// Whether a module's own file is framework code regardless of its JMC
/// setting (`original_source/jmc.cpp`'s `ShouldLoadSymbolsForModule`
/// basename check: `System.`/`SOS.`-prefixed modules are never "mine").
fn is_framework_module_path(path: &str) -> bool {
    let base = path.rsplit(['/', '\\']).next().unwrap_or(path);
    base.starts_with("System.") || base.starts_with("SOS.")
}

/// Rewrite a path for comparison with paths reported on Unix-like hosts,
/// where the original's `/proc/self/exe`-relative self-path never matches
/// a client-supplied absolute path verbatim (spec §4.1 "Unix path
/// substitution"): both sides are canonicalized to their file name when a
/// `/proc/self/` prefix is seen on either.
fn normalize_path_for_compare(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("/proc/self/") {
        return rest.rsplit('/').next().unwrap_or(rest).to_string();
    }
    path.to_string()
}

/// Compare two file paths the way the original does: exact match first,
/// then basename-only, case-folded (spec §4.1 "canonical-file-then-
/// basename retry").
pub fn paths_match(a: &str, b: &str) -> bool {
    let (na, nb) = (normalize_path_for_compare(a), normalize_path_for_compare(b));
    if na == nb {
        return true;
    }
    let base_a = na.rsplit(['/', '\\']).next().unwrap_or(&na);
    let base_b = nb.rsplit(['/', '\\']).next().unwrap_or(&nb);
    base_a.eq_ignore_ascii_case(base_b)
}

/// A resolved location: a method/IL-offset pair together with the module
/// that owns it (spec §3 `CodeLocation`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeLocation {
    pub module: ModuleId,
    pub method: MethodToken,
    pub il_offset: u32,
}

/// Registry of currently-loaded modules, keyed by base address (spec §4.1).
///
/// Guarded by a single `parking_lot::Mutex` per spec §5's `modulesMutex`:
/// callers never hold it across an engine call, only across the lookup
/// itself.
pub struct Modules {
    inner: Mutex<HashMap<ModuleId, Module>>,
}

impl Default for Modules {
    fn default() -> Self {
        Self::new()
    }
}

impl Modules {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a freshly loaded module (spec §4.1 `TryLoad`).
    pub fn try_load(
        &self,
        id: ModuleId,
        path: impl Into<String>,
        just_my_code: bool,
        metadata: Box<dyn MetadataReader>,
        symbols: Option<Box<dyn SymbolReader>>,
    ) {
        let symbol_status = if symbols.is_some() {
            SymbolStatus::Loaded
        } else {
            SymbolStatus::NotFound
        };
        self.inner.lock().insert(
            id,
            Module {
                id,
                path: path.into(),
                symbol_status,
                just_my_code,
                metadata,
                symbols,
            },
        );
    }

    pub fn unload(&self, id: ModuleId) {
        self.inner.lock().remove(&id);
    }

    /// Run `f` against every currently loaded module, in insertion-
    /// independent (unordered) fashion (spec §4.1 `ForEachModule`).
    pub fn for_each<F: FnMut(&Module)>(&self, mut f: F) {
        for module in self.inner.lock().values() {
            f(module);
        }
    }

    /// Run `f` against one module's metadata reader without letting the
    /// borrow escape the registry lock (spec §4.4 evaluator name
    /// resolution, which needs a `&dyn MetadataReader` but must never hold
    /// `modulesMutex` across the walk it drives).
    pub fn with_metadata<R>(&self, module: ModuleId, f: impl FnOnce(&dyn MetadataReader) -> R) -> Result<R> {
        let guard = self.inner.lock();
        let m = guard.get(&module).ok_or_else(|| DebuggerError::not_found("module"))?;
        Ok(f(m.metadata()))
    }

    /// Resolve `file:line` to a `(method, il_offset)` within one module
    /// (spec §4.1 `GetLocationInModule`).
    pub fn location_in_module(
        &self,
        module: ModuleId,
        file: &str,
        line: u32,
    ) -> Result<CodeLocation> {
        let guard = self.inner.lock();
        let m = guard
            .get(&module)
            .ok_or_else(|| DebuggerError::not_found("module"))?;
        let symbols = m.symbols().ok_or(DebuggerError::ResolveFailed)?;
        let resolved = symbols
            .resolve_sequence_point(file, line)
            .map_err(|_| DebuggerError::ResolveFailed)?
            .ok_or(DebuggerError::ResolveFailed)?;
        Ok(CodeLocation {
            module,
            method: resolved.0,
            il_offset: resolved.1,
        })
    }

    /// Resolve `file:line` against every loaded module, trying an exact
    /// path match first and a basename retry second (spec §4.1
    /// `GetLocationInAny`).
    pub fn location_in_any(&self, file: &str, line: u32) -> Result<CodeLocation> {
        let guard = self.inner.lock();
        let candidates: Vec<ModuleId> = guard
            .values()
            .filter(|m| paths_match(&m.path, file))
            .map(|m| m.id)
            .collect();
        drop(guard);
        for id in candidates {
            if let Ok(loc) = self.location_in_module(id, file, line) {
                return Ok(loc);
            }
        }
        Err(DebuggerError::ResolveFailed)
    }

    /// Look up the source line and nearest preceding non-hidden sequence
    /// point for a frame's current IL offset (spec §4.1
    /// `GetFrameILAndSequencePoint`).
    pub fn frame_il_and_sequence_point(
        &self,
        module: ModuleId,
        method: MethodToken,
        il_offset: u32,
    ) -> Result<(u32, String)> {
        let guard = self.inner.lock();
        let m = guard
            .get(&module)
            .ok_or_else(|| DebuggerError::not_found("module"))?;
        let symbols = m.symbols().ok_or(DebuggerError::ResolveFailed)?;
        symbols
            .get_line_by_il_offset(method, il_offset)
            .map_err(|_| DebuggerError::ResolveFailed)?
            .ok_or(DebuggerError::ResolveFailed)
    }

    /// Step-range lookup delegating straight to the symbol reader (spec
    /// §4.1 `GetStepRangeFromCurrentIP`).
    pub fn step_range_from_current_ip(
        &self,
        module: ModuleId,
        method: MethodToken,
        il_offset: u32,
    ) -> Result<(u32, u32)> {
        let guard = self.inner.lock();
        let m = guard
            .get(&module)
            .ok_or_else(|| DebuggerError::not_found("module"))?;
        let symbols = m.symbols().ok_or(DebuggerError::ResolveFailed)?;
        symbols
            .get_step_ranges_from_ip(method, il_offset)
            .map_err(|_| DebuggerError::ResolveFailed)
    }

    /// Resolve a function breakpoint target within one module: dotted
    /// name suffix match against every method of every type, generic-arity
    /// rendering applied before comparison when `type_args` is non-empty,
    /// and a param-signature equality check when the target carries one
    /// (spec §4.1 `ResolveMethodInModule`, §4.3 param-signature match).
    pub fn resolve_method_in_module(
        &self,
        module: ModuleId,
        target_name: &str,
        param_signature: Option<&str>,
    ) -> Result<Vec<(TypeToken, MethodToken)>> {
        let guard = self.inner.lock();
        let m = guard
            .get(&module)
            .ok_or_else(|| DebuggerError::not_found("module"))?;
        let metadata = m.metadata();
        let types = metadata
            .enum_type_defs()
            .map_err(|_| DebuggerError::ResolveFailed)?;

        let target_parts: Vec<&str> = target_name.rsplitn(2, '.').collect();
        let (target_type, target_method) = match target_parts.as_slice() {
            [method] => (None, *method),
            [method, owner] => (Some(*owner), *method),
            _ => return Err(DebuggerError::ResolveFailed),
        };

        let mut hits = Vec::new();
        for ty in &types {
            let rendered_type = render_generic_name(&ty.name, &[]);
            if let Some(owner_target) = target_type {
                if !suffix_matches_dotted(owner_target, &rendered_type) {
                    continue;
                }
            }
            let methods = metadata
                .enum_methods_with_name(ty.token, target_method)
                .unwrap_or_default();
            for method in methods {
                if let Some(sig) = param_signature {
                    let rendered = crate::typeprint::render_param_signature(&method.param_types);
                    if rendered != sig {
                        continue;
                    }
                }
                hits.push((ty.token, method.token));
            }
        }
        Ok(hits)
    }

    /// Resolve a function breakpoint target across every loaded module
    /// (spec §4.1 `ResolveFunctionInAny`).
    pub fn resolve_function_in_any(
        &self,
        target_name: &str,
        param_signature: Option<&str>,
    ) -> Vec<(ModuleId, TypeToken, MethodToken)> {
        let ids: Vec<ModuleId> = self.inner.lock().keys().copied().collect();
        let mut out = Vec::new();
        for id in ids {
            if let Ok(hits) = self.resolve_method_in_module(id, target_name, param_signature) {
                out.extend(hits.into_iter().map(|(ty, method)| (id, ty, method)));
            }
        }
        out
    }

    /// Look up a named local variable visible at `il_offset` within
    /// `method` (spec §4.1 `GetFrameNamedLocalVariable`).
    pub fn frame_named_local_variable(
        &self,
        module: ModuleId,
        method: MethodToken,
        name: &str,
        il_offset: u32,
    ) -> Result<Option<u32>> {
        let guard = self.inner.lock();
        let m = guard
            .get(&module)
            .ok_or_else(|| DebuggerError::not_found("module"))?;
        let symbols = m.symbols().ok_or(DebuggerError::ResolveFailed)?;
        // Symbol readers expose locals by index, not name; walk indices
        // until one matches, the way the original linear-scans the PDB's
        // local-scope records.
        for index in 0..256u32 {
            match symbols
                .get_named_local_variable(method, index, il_offset)
                .map_err(|_| DebuggerError::ResolveFailed)?
            {
                Some((local_name, start, end)) => {
                    if local_name == name && il_offset >= start && il_offset < end {
                        return Ok(Some(index));
                    }
                }
                None => break,
            }
        }
        Ok(None)
    }

    /// Discover a module's managed entry point by parsing its on-disk
    /// image (spec §4.3 "Entry-point discovery").
    pub fn entry_point_method(&self, image: &[u8]) -> Option<MethodToken> {
        parse_entry_point(image).map(|ep| ep.method_token)
    }

    /// Pick the nearest preceding non-hidden sequence point for an IL
    /// offset from an already-fetched point list (spec §4.1 "Sequence-
    /// point selection"). Hidden points (`0xFEEFEE`) and points strictly
    /// after `il_offset` are skipped.
    pub fn select_sequence_point(points: &[SequencePoint], il_offset: u32) -> Option<SequencePoint> {
        points
            .iter()
            .filter(|p| !p.is_hidden() && p.il_offset <= il_offset)
            .max_by_key(|p| p.il_offset)
            .copied()
    }

    /// Fetch a method's full sequence-point table, for a caller (the
    /// controller's `StepComplete`/JMC dispatch) that needs the whole list
    /// rather than a single offset lookup.
    pub fn sequence_points(&self, module: ModuleId, method: MethodToken) -> Result<Vec<SequencePoint>> {
        let guard = self.inner.lock();
        let m = guard
            .get(&module)
            .ok_or_else(|| DebuggerError::not_found("module"))?;
        let symbols = m.symbols().ok_or(DebuggerError::ResolveFailed)?;
        symbols
            .get_sequence_points(method)
            .map_err(|_| DebuggerError::ResolveFailed)
    }

    /// A method's simple name, for JMC classification and display.
    pub fn method_name(&self, module: ModuleId, method: MethodToken) -> Result<String> {
        let guard = self.inner.lock();
        let m = guard
            .get(&module)
            .ok_or_else(|| DebuggerError::not_found("module"))?;
        Ok(m.metadata().get_method(method)?.name)
    }

    /// The on-disk path of a loaded module, for `UnloadModule`/output
    /// reporting after the module itself is gone from the registry.
    pub fn path_of(&self, id: ModuleId) -> Option<String> {
        self.inner.lock().get(&id).map(|m| m.path.clone())
    }

    /// Whether a method should be treated as "my code" under
    /// Just-My-Code (spec §4.1 JMC rules, `original_source/jmc.cpp`
    /// `GetNonJMCMethodsForTypeDef`): a method outside a JMC-enabled
    /// module is never my code. Inside one, each of the following is an
    /// independent exclusion reason — any single one is enough, they are
    /// not nested: the module's own file is framework code; the method's
    /// name is a mangled operator overload; the method has no non-hidden
    /// sequence point; or the method (or its owner type) carries a
    /// `DebuggerNonUserCode`/`DebuggerStepThrough` attribute.
    pub fn is_my_code(
        &self,
        module: ModuleId,
        method: MethodToken,
        method_name: &str,
        sequence_points: &[SequencePoint],
    ) -> bool {
        let guard = self.inner.lock();
        let Some(m) = guard.get(&module) else {
            return false;
        };
        if !m.just_my_code {
            return true;
        }
        if is_framework_module_path(&m.path) {
            return false;
        }
        if is_overloaded_operator_name(method_name) {
            return false;
        }
        if !sequence_points.iter().any(|p| !p.is_hidden()) {
            return false;
        }
        let metadata = m.metadata();
        if let Ok(info) = metadata.get_method(method) {
            if has_non_user_code_marker(&info.custom_attributes) {
                return false;
            }
            if let Ok(owner) = metadata.get_type(info.owner) {
                if has_non_user_code_marker(&owner.custom_attributes) {
                    return false;
                }
            }
        }
        true
    }
}
