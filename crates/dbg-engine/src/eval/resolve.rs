//! Name resolution over a parsed expression (spec §4.4 "Name resolution"),
//! tying the expression grammar ([`crate::eval::expr`]), the member walk
//! ([`crate::eval::walk`]), and a frame's locals together into the value a
//! watch/evaluate request asks for.
//!
//! Implements steps 1-3 and 6 of the name-resolution algorithm: the
//! `$exception` prefix, walking the current frame's locals, falling back to
//! `this`'s instance members, and then the member/index chain walk with
//! dereference-and-unbox at each step. The nested-enclosing-type static
//! lookup (step 4) and the bare-type-name + `EvalObjectNoConstructor`
//! fallback (step 5) are not implemented — see `DESIGN.md`.

use crate::engine_api::{MetadataReader, MethodToken, NativeFrame, NativeThread, NativeValue, ValueKind};
use crate::error::{DebuggerError, Result};
use crate::eval::expr::{parse, PathSegment};
use crate::eval::walk::{walk_members, MemberKind};
use crate::ids::ModuleId;

/// The outcome of resolving an expression, or as much of it as can be
/// resolved without a function-eval (spec §4.4 "invoking property getters
/// via the engine's function-eval facility").
pub enum Resolution {
    Value(Box<dyn NativeValue>),
    /// The next unresolved segment is a property; the caller must issue a
    /// function-eval on `getter` and feed the resulting value back through
    /// [`resume`] along with `remaining`.
    PendingGetter {
        getter: MethodToken,
        remaining: Vec<PathSegment>,
    },
}

/// Resolve `expression` against the given thread's current frame (spec
/// §4.4 steps 1-3, entry point into step 6's chain walk).
///
/// `local_index` is the frame-local slot the first path segment names, if
/// any — looked up by the caller via [`crate::modules::Modules::frame_named_local_variable`]
/// (through [`local_candidate_name`] and [`frame_location`]) *before*
/// calling in, so this function never needs to touch the module registry
/// itself: `Modules::with_metadata` already holds `modulesMutex` for the
/// `metadata` borrow by the time this runs, and that mutex is not
/// reentrant.
pub fn resolve(
    thread: &dyn NativeThread,
    frame: &dyn NativeFrame,
    local_index: Option<u32>,
    metadata: &dyn MetadataReader,
    expression: &str,
) -> Result<Resolution> {
    let parsed = parse(expression)?;

    if parsed.exception_prefix {
        let exception = thread
            .current_exception()?
            .ok_or_else(|| DebuggerError::invalid_state("no exception is in flight on this thread"))?;
        return walk_chain(exception, parsed.segments, metadata);
    }

    let mut segments = parsed.segments.into_iter();
    let first = segments
        .next()
        .ok_or_else(|| DebuggerError::ParseError("expression has no segments".into()))?;
    let name = match &first {
        PathSegment::Member { name, .. } => name.clone(),
        PathSegment::Index(_) => {
            return Err(DebuggerError::ParseError(
                "expression cannot start with an indexer".into(),
            ))
        }
    };

    let root = match local_index {
        Some(index) => frame.local_variable(index)?,
        None => {
            // Step 3: fall back to `this` (slot 0 in every instance method)
            // and resolve `name` as one of its instance members.
            let this = frame
                .local_variable(0)
                .map_err(|_| DebuggerError::not_found(name.as_str()))?;
            match resolve_member(&this, &name, metadata)? {
                Resolved::Value(v) => v,
                Resolved::Getter(getter) => {
                    return Ok(Resolution::PendingGetter {
                        getter,
                        remaining: segments.collect(),
                    })
                }
            }
        }
    };

    walk_chain(root, segments.collect(), metadata)
}

/// The name a [`resolve`] call would look up as a frame-local, if the
/// expression isn't `$exception`-prefixed and starts with a plain member
/// segment. Callers resolve this against [`crate::modules::Modules`]
/// themselves, outside of any `with_metadata` borrow, then pass the
/// result in as `resolve`'s `local_index`.
pub fn local_candidate_name(expression: &str) -> Result<Option<String>> {
    let parsed = parse(expression)?;
    if parsed.exception_prefix {
        return Ok(None);
    }
    match parsed.segments.first() {
        Some(PathSegment::Member { name, .. }) => Ok(Some(name.clone())),
        _ => Ok(None),
    }
}

/// Continue a walk with a value that just came back from a queued
/// function-eval (spec §4.4 step 4's promise, feeding back into step 6).
pub fn resume(
    value: Box<dyn NativeValue>,
    remaining: Vec<PathSegment>,
    metadata: &dyn MetadataReader,
) -> Result<Resolution> {
    walk_chain(value, remaining, metadata)
}

/// A frame's `(module, method, IL offset)`, the coordinates
/// [`crate::modules::Modules::frame_named_local_variable`] needs (spec
/// §4.4 step 2).
pub fn frame_location(frame: &dyn NativeFrame) -> Result<(ModuleId, MethodToken, u32)> {
    match (frame.module_id(), frame.method_token(), frame.il_offset()) {
        (Some(m), Some(mt), Some(ilo)) => Ok((m, mt, ilo)),
        _ => Err(DebuggerError::invalid_state("frame has no resolvable location")),
    }
}

fn walk_chain(
    mut value: Box<dyn NativeValue>,
    segments: Vec<PathSegment>,
    metadata: &dyn MetadataReader,
) -> Result<Resolution> {
    let mut iter = segments.into_iter();
    while let Some(segment) = iter.next() {
        value = normalize(value);
        match segment {
            PathSegment::Member { name, .. } => match resolve_member(&value, &name, metadata)? {
                Resolved::Value(v) => value = v,
                Resolved::Getter(getter) => {
                    return Ok(Resolution::PendingGetter { getter, remaining: iter.collect() })
                }
            },
            PathSegment::Index(indices) => value = index_value(&value, &indices)?,
        }
    }
    Ok(Resolution::Value(normalize(value)))
}

enum Resolved {
    Value(Box<dyn NativeValue>),
    Getter(MethodToken),
}

/// Look `name` up among `value`'s walked members and either read it
/// directly (a field) or report the getter a caller must invoke (a
/// property), per spec §4.4 step 6.
fn resolve_member(value: &dyn NativeValue, name: &str, metadata: &dyn MetadataReader) -> Result<Resolved> {
    let members = walk_members(value, metadata)?;
    let member = members
        .into_iter()
        .find(|m| m.name == name)
        .ok_or_else(|| DebuggerError::not_found(name))?;
    match member.kind {
        MemberKind::Field => {
            let token = member.field_token.ok_or(DebuggerError::ResolveFailed)?;
            Ok(Resolved::Value(value.get_field_value(token)?))
        }
        MemberKind::Property => {
            let getter = member.property_getter.ok_or(DebuggerError::ResolveFailed)?;
            Ok(Resolved::Getter(getter))
        }
        MemberKind::ArrayElement => Err(DebuggerError::not_found(name)),
    }
}

/// Dereference/unbox a value down to the thing its members should be
/// walked on (spec §4.4 step 6 "dereference-and-unbox the current value").
fn normalize(value: Box<dyn NativeValue>) -> Box<dyn NativeValue> {
    match value.kind() {
        ValueKind::Reference => match value.dereference() {
            Ok(inner) => normalize(inner),
            Err(_) => value,
        },
        ValueKind::Box => match value.unbox() {
            Ok(inner) => normalize(inner),
            Err(_) => value,
        },
        _ => value,
    }
}

/// Index an array value by a comma-separated multi-dimensional indexer
/// (spec §4.4 step 6 "a bracketed component indexes an array; rank must
/// match").
fn index_value(value: &dyn NativeValue, indices: &[String]) -> Result<Box<dyn NativeValue>> {
    let rank = value.array_rank().ok_or_else(|| DebuggerError::invalid_state("value is not an array"))?;
    if indices.len() as u32 != rank {
        return Err(DebuggerError::invalid_state(format!(
            "indexer has {} components but the array has rank {rank}",
            indices.len()
        )));
    }
    let parsed: Vec<i32> = indices
        .iter()
        .map(|s| s.trim().parse::<i32>().map_err(|_| DebuggerError::ParseError(s.clone())))
        .collect::<Result<_>>()?;
    value.array_element(&parsed)
}
