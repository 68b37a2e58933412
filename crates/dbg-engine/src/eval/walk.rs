//! `WalkMembers`: enumerate a value's visible members for display and
//! child-expansion (spec §4.4 "Member walk").
//!
//! Arrays yield index-tuple names honoring per-dimension base indices;
//! classes/structs yield fields then properties, walking the base-type
//! chain up to (but not including) `System.Object`/`System.ValueType`/
//! `System.Enum`; compiler-generated backing fields (`<Name>k__BackingField`)
//! are rewritten to their source property name and suppressed as a
//! duplicate when the property itself is also walked;
//! `DebuggerBrowsable(Never)` members are dropped entirely.

use crate::engine_api::{FieldInfo, MetadataReader, NativeValue, PropertyInfo, TypeToken};
use crate::error::Result;

/// Base types the walk stops at without descending further (spec §4.4
/// "base-chain walk").
const WALK_STOP_TYPES: &[&str] = &["System.Object", "System.ValueType", "System.Enum"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind {
    ArrayElement,
    Field,
    Property,
}

/// One walked member (spec §4.5 `Variable`-shaped, pre-evaluation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub kind: MemberKind,
    pub name: String,
    pub field_token: Option<u32>,
    pub property_getter: Option<u32>,
    /// Set when this member was inherited from a base type, so the
    /// variable handle can disambiguate it with a `" (<ownerType>)"`
    /// suffix if a derived member shadows it (spec §4.5).
    pub owner_type: Option<String>,
}

/// Rewrite a compiler-generated auto-property backing field name
/// (`<Name>k__BackingField`) to its source property name `Name`, or return
/// the name unchanged if it isn't one (spec §4.4 "backing-field hiding").
fn unmangle_backing_field(name: &str) -> Option<&str> {
    let inner = name.strip_prefix('<')?;
    let (prop, rest) = inner.split_once('>')?;
    if rest == "k__BackingField" && !prop.is_empty() {
        Some(prop)
    } else {
        None
    }
}

/// Walk an array value's elements, naming each by its index tuple honoring
/// base indices (spec §4.4 "honoring base indices").
fn walk_array(value: &dyn NativeValue) -> Vec<Member> {
    let dims = value.array_dimensions();
    let bases = value.array_base_indices();
    let total: u32 = dims.iter().product();
    let mut members = Vec::with_capacity(total as usize);

    let mut counters = vec![0u32; dims.len()];
    for _ in 0..total {
        let indices: Vec<i32> = counters
            .iter()
            .enumerate()
            .map(|(i, c)| *c as i32 + bases.get(i).copied().unwrap_or(0))
            .collect();
        let name = format!(
            "[{}]",
            indices.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
        );
        members.push(Member {
            kind: MemberKind::ArrayElement,
            name,
            field_token: None,
            property_getter: None,
            owner_type: None,
        });

        for i in (0..counters.len()).rev() {
            counters[i] += 1;
            if counters[i] < dims[i] {
                break;
            }
            counters[i] = 0;
        }
    }
    members
}

/// Walk a class/struct value's fields and properties, including inherited
/// members from its base-type chain (spec §4.4 "Member walk").
pub fn walk_members(value: &dyn NativeValue, metadata: &dyn MetadataReader) -> Result<Vec<Member>> {
    if let Some(rank) = value.array_rank() {
        let _ = rank;
        return Ok(walk_array(value));
    }

    let mut members = Vec::new();
    let mut seen_property_names = std::collections::HashSet::new();
    let mut current_type: Option<TypeToken> = Some(value.type_token());
    let mut first = true;

    while let Some(token) = current_type {
        let info = metadata.get_type(token)?;
        if !first && WALK_STOP_TYPES.contains(&info.name.as_str()) {
            break;
        }
        first = false;

        // Property names must be known before fields are walked, so a
        // backing field can be recognized as a duplicate of its property —
        // but fields are still pushed to `members` first, matching the
        // original's field-then-property enumeration order.
        let properties: Vec<PropertyInfo> = metadata.enum_properties(token).unwrap_or_default();
        for prop in &properties {
            if !prop.debugger_browsable_never {
                seen_property_names.insert(prop.name.clone());
            }
        }

        let fields: Vec<FieldInfo> = metadata.enum_fields(token).unwrap_or_default();
        for field in &fields {
            if field.debugger_browsable_never {
                continue;
            }
            let display_name = unmangle_backing_field(&field.name);
            if let Some(prop_name) = display_name {
                if seen_property_names.contains(prop_name) {
                    continue;
                }
            }
            members.push(Member {
                kind: MemberKind::Field,
                name: display_name.unwrap_or(&field.name).to_string(),
                field_token: Some(field.token),
                property_getter: None,
                owner_type: Some(info.name.clone()),
            });
        }

        for prop in &properties {
            if prop.debugger_browsable_never {
                continue;
            }
            members.push(Member {
                kind: MemberKind::Property,
                name: prop.name.clone(),
                field_token: None,
                property_getter: prop.getter,
                owner_type: Some(info.name.clone()),
            });
        }

        current_type = info.base_type;
        if WALK_STOP_TYPES.contains(&info.name.as_str()) {
            break;
        }
    }

    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmangles_auto_property_backing_field() {
        assert_eq!(unmangle_backing_field("<Name>k__BackingField"), Some("Name"));
        assert_eq!(unmangle_backing_field("plainField"), None);
        assert_eq!(unmangle_backing_field("<>c__DisplayClass1"), None);
    }

    #[derive(Debug)]
    struct FakeArray {
        dims: Vec<u32>,
        bases: Vec<i32>,
    }
    impl NativeValue for FakeArray {
        fn kind(&self) -> crate::engine_api::ValueKind {
            crate::engine_api::ValueKind::Array
        }
        fn type_name(&self) -> String {
            "int[,]".into()
        }
        fn type_token(&self) -> TypeToken {
            0
        }
        fn dereference(&self) -> Result<Box<dyn NativeValue>> {
            Err(DebuggerErr::invalid_state("not a reference"))
        }
        fn unbox(&self) -> Result<Box<dyn NativeValue>> {
            Err(DebuggerErr::invalid_state("not boxed"))
        }
        fn get_field_value(&self, _t: u32) -> Result<Box<dyn NativeValue>> {
            Err(DebuggerErr::invalid_state("no fields"))
        }
        fn get_static_field_value(&self, _t: u32) -> Result<Box<dyn NativeValue>> {
            Err(DebuggerErr::invalid_state("no fields"))
        }
        fn array_rank(&self) -> Option<u32> {
            Some(self.dims.len() as u32)
        }
        fn array_base_indices(&self) -> Vec<i32> {
            self.bases.clone()
        }
        fn array_dimensions(&self) -> Vec<u32> {
            self.dims.clone()
        }
        fn to_display_string(&self) -> String {
            "{int[,]}".into()
        }
    }
    use crate::error::DebuggerError as DebuggerErr;

    #[test]
    fn walks_array_indices_with_base_offset() {
        let array = FakeArray { dims: vec![2, 2], bases: vec![1, 0] };
        let members = walk_array(&array);
        let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["[1, 0]", "[1, 1]", "[2, 0]", "[2, 1]"]);
    }
}
