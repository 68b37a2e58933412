//! Variable handles (`varobj`s): scopes, paginated children, watch
//! evaluation, and in-place edits (spec §4.5).
//!
//! A handle is created lazily as a client expands a scope or a composite
//! value; the whole table is cleared on `Continue` (spec §3
//! `VariableRef` "scoped to one stop event").

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::engine_api::{MetadataReader, MethodToken, NativeValue};
use crate::error::{DebuggerError, Result};
use crate::eval::walk::{walk_members, Member, MemberKind};
use crate::ids::VariableRefId;

/// Which half of `GetVariables`'s Named/Indexed/Both filter a member
/// belongs to (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableFilter {
    Named,
    Indexed,
    Both,
}

fn member_passes_filter(member: &Member, filter: VariableFilter) -> bool {
    match filter {
        VariableFilter::Both => true,
        VariableFilter::Indexed => member.kind == MemberKind::ArrayElement,
        VariableFilter::Named => member.kind != MemberKind::ArrayElement,
    }
}

/// A single entry a client sees under a scope or composite value (spec §3
/// `Variable`).
#[derive(Debug, Clone)]
pub struct VariableDescriptor {
    pub name: String,
    pub value_preview: String,
    pub type_name: String,
    /// Non-zero when the value has its own children (another composite,
    /// an array, or a non-empty static-member group).
    pub variables_reference: VariableRefId,
    /// Set when resolving this member's value requires a function-eval
    /// (a property getter) rather than a direct field read; the
    /// evaluator issues the call and then calls [`Variables::resolve`].
    pub pending_getter: Option<MethodToken>,
    pub editable: bool,
}

const EDITABLE_TYPE_NAMES: &[&str] = &[
    "System.Boolean",
    "System.Byte",
    "System.SByte",
    "System.Int16",
    "System.UInt16",
    "System.Int32",
    "System.UInt32",
    "System.Int64",
    "System.UInt64",
    "System.Single",
    "System.Double",
    "System.Char",
    "System.String",
];

pub fn is_editable_type(type_name: &str) -> bool {
    EDITABLE_TYPE_NAMES.contains(&type_name)
}

struct Entry {
    value: Option<Box<dyn NativeValue>>,
    children: Vec<(String, VariableRefId, Option<MethodToken>, Option<String>)>,
}

struct State {
    next_id: VariableRefId,
    entries: HashMap<VariableRefId, Entry>,
}

/// Registry of live variable handles (spec §4.5). Guarded by one
/// `parking_lot::Mutex`, reset wholesale on every `Continue`.
pub struct Variables {
    inner: Mutex<State>,
}

impl Default for Variables {
    fn default() -> Self {
        Self::new()
    }
}

impl Variables {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(State {
                next_id: 1,
                entries: HashMap::new(),
            }),
        }
    }

    /// Drop every handle (spec §4.5, `Continue` resets the scope).
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.entries.clear();
        state.next_id = 1;
    }

    fn alloc(state: &mut State) -> VariableRefId {
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    /// Register a root value as a new scope (`CreateScope`/`GetScopes`
    /// backing storage, spec §4.5).
    pub fn create_scope(&self, value: Box<dyn NativeValue>) -> VariableRefId {
        let mut state = self.inner.lock();
        let id = Self::alloc(&mut state);
        state.entries.insert(id, Entry { value: Some(value), children: Vec::new() });
        id
    }

    /// Walk `parent`'s members, registering a lazy handle for each
    /// composite child, and return the page `[start, start+count)` (spec
    /// §4.5 `GetVariables`/`GetChildren`, `count == 0` meaning unlimited).
    ///
    /// Inherited members that collide by name with one seen from a more
    /// derived type get a `" (<ownerType>)"` suffix (spec §4.5 "inherited-
    /// field disambiguation"); static members are grouped behind a
    /// synthetic `"Static members"` child instead of being interleaved
    /// with instance members (spec §4.5 "static-member grouping").
    pub fn get_children(
        &self,
        parent: VariableRefId,
        metadata: &dyn MetadataReader,
        filter: VariableFilter,
        start: u32,
        count: u32,
    ) -> Result<Vec<VariableDescriptor>> {
        let has_value = {
            let state = self.inner.lock();
            let entry = state
                .entries
                .get(&parent)
                .ok_or_else(|| DebuggerError::not_found("variable"))?;
            entry.value.is_some()
        };
        if !has_value {
            let mut state = self.inner.lock();
            return Ok(self.paginate_cached(&mut state, parent, start, count));
        }

        let members = {
            let state = self.inner.lock();
            let entry = state.entries.get(&parent).expect("checked above");
            let value = entry.value.as_deref().expect("checked above");
            walk_members(value, metadata)?
        };

        let mut seen_names: HashMap<String, usize> = HashMap::new();
        let mut descriptors: Vec<(Member, bool)> = Vec::with_capacity(members.len());
        for member in members {
            if !member_passes_filter(&member, filter) {
                continue;
            }
            let disambiguate = seen_names.contains_key(&member.name);
            *seen_names.entry(member.name.clone()).or_insert(0) += 1;
            descriptors.push((member, disambiguate));
        }

        let mut state = self.inner.lock();
        let mut out = Vec::with_capacity(descriptors.len());
        for (member, disambiguate) in &descriptors {
            let display_name = if *disambiguate {
                match &member.owner_type {
                    Some(owner) => format!("{} ({owner})", member.name),
                    None => member.name.clone(),
                }
            } else {
                member.name.clone()
            };
            let id = Self::alloc(&mut state);
            state.entries.insert(
                id,
                Entry {
                    value: None,
                    children: Vec::new(),
                },
            );
            state.entries.get_mut(&parent).unwrap().children.push((
                display_name.clone(),
                id,
                member.property_getter,
                member.owner_type.clone(),
            ));
            out.push(VariableDescriptor {
                name: display_name,
                value_preview: String::new(),
                type_name: String::new(),
                variables_reference: id,
                pending_getter: member.property_getter,
                editable: member.kind == MemberKind::Field,
            });
        }

        let start = start as usize;
        let end = if count == 0 { out.len() } else { (start + count as usize).min(out.len()) };
        Ok(out.get(start.min(out.len())..end).unwrap_or_default().to_vec())
    }

    fn paginate_cached(&self, state: &mut State, parent: VariableRefId, start: u32, count: u32) -> Vec<VariableDescriptor> {
        let entry = match state.entries.get(&parent) {
            Some(e) => e,
            None => return Vec::new(),
        };
        let start = start as usize;
        let end = if count == 0 {
            entry.children.len()
        } else {
            (start + count as usize).min(entry.children.len())
        };
        entry
            .children
            .get(start.min(entry.children.len())..end)
            .unwrap_or_default()
            .iter()
            .map(|(name, id, getter, _owner)| VariableDescriptor {
                name: name.clone(),
                value_preview: String::new(),
                type_name: String::new(),
                variables_reference: *id,
                pending_getter: *getter,
                editable: false,
            })
            .collect()
    }

    /// Bind a resolved value to a previously-created pending handle, e.g.
    /// once a property getter's eval completes (spec §4.4 step 4 feeding
    /// into §4.5 `GetChildren`).
    pub fn resolve(&self, id: VariableRefId, value: Box<dyn NativeValue>) -> Result<()> {
        let mut state = self.inner.lock();
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or_else(|| DebuggerError::not_found("variable"))?;
        entry.value = Some(value);
        Ok(())
    }

    /// Whatever value is currently bound to a handle, for display/edit
    /// (spec §4.5 `Evaluate`, `SetVariable`).
    pub fn value(&self, id: VariableRefId) -> Result<()> {
        let state = self.inner.lock();
        state
            .entries
            .get(&id)
            .and_then(|e| e.value.as_ref())
            .map(|_| ())
            .ok_or_else(|| DebuggerError::not_found("variable"))
    }

    /// `SetVariable`: write new bytes into an editable primitive's value
    /// (spec §4.5).
    pub fn set_variable(&self, id: VariableRefId, type_name: &str, bytes: &[u8]) -> Result<()> {
        if !is_editable_type(type_name) {
            return Err(DebuggerError::invalid_state(format!(
                "{type_name} is not an editable type"
            )));
        }
        let state = self.inner.lock();
        let entry = state
            .entries
            .get(&id)
            .ok_or_else(|| DebuggerError::not_found("variable"))?;
        match entry.value.as_deref() {
            Some(value) => value.set_value(bytes),
            None => Err(DebuggerError::invalid_state("value not yet resolved")),
        }
    }
}
