use crate::engine_api::{MethodToken, TypeToken};
use crate::error::Result;

/// Coarse shape of a value, enough to drive `WalkMembers`/dereference/unbox
/// decisions (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Primitive,
    String,
    Array,
    /// Reference-type instance (class).
    Class,
    /// Value-type instance (struct).
    ValueType,
    /// A reference that must be dereferenced before use.
    Reference,
    /// A boxed value type.
    Box,
    Null,
}

/// A value living in the debuggee, reached via evaluation, member walk, or
/// a function-eval result (spec §3, §4.4).
///
/// Values are handed around as `Box<dyn NativeValue>` instead of an owning
/// reference-counted COM pointer: the trait object boundary is this crate's
/// analogue of `ToRelease<ICorDebugValue>`.
pub trait NativeValue: std::fmt::Debug + Send {
    fn kind(&self) -> ValueKind;
    fn type_name(&self) -> String;
    fn type_token(&self) -> TypeToken;
    fn is_null(&self) -> bool {
        matches!(self.kind(), ValueKind::Null)
    }

    /// Follow a `Reference` to its target.
    fn dereference(&self) -> Result<Box<dyn NativeValue>>;

    /// Unwrap a `Box`ed value type to the underlying value-type value.
    fn unbox(&self) -> Result<Box<dyn NativeValue>>;

    /// Read an instance field by metadata token.
    fn get_field_value(&self, field_token: MethodToken) -> Result<Box<dyn NativeValue>>;

    /// Read a static field's value (spec §6 `GetStaticFieldValue`); callers
    /// must have already run the type's class constructor (spec §4.4
    /// "Class-constructor forcing").
    fn get_static_field_value(&self, field_token: MethodToken) -> Result<Box<dyn NativeValue>>;

    /// `Some(rank)` for array values.
    fn array_rank(&self) -> Option<u32> {
        None
    }
    /// Per-dimension lower bound (spec §4.4 "honoring base indices").
    fn array_base_indices(&self) -> Vec<i32> {
        Vec::new()
    }
    fn array_dimensions(&self) -> Vec<u32> {
        Vec::new()
    }
    fn array_element(&self, _indices: &[i32]) -> Result<Box<dyn NativeValue>> {
        Err(crate::error::DebuggerError::invalid_state("not an array"))
    }

    /// Raw bytes for a primitive/decimal value (spec §4.4 decimal parse).
    fn primitive_bytes(&self) -> Option<Vec<u8>> {
        None
    }

    /// Write raw bytes into a settable primitive value (spec §4.5 `SetVariable`).
    fn set_value(&self, _bytes: &[u8]) -> Result<()> {
        Err(crate::error::DebuggerError::invalid_state("value is not settable"))
    }

    /// Short printed representation (spec §4.5 `Variable.value`).
    fn to_display_string(&self) -> String;
}
