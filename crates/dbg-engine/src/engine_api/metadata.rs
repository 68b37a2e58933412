use crate::engine_api::{MethodToken, Mvid, TypeToken};
use crate::error::Result;

/// A type definition as reported by the metadata interface (spec §6
/// `GetTypeDefProps`, `GetNestedClassProps`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub token: TypeToken,
    /// Dotted full name without generic arity suffix rendering
    /// (e.g. `"Ns.Outer+Inner`1"`), as stored in metadata.
    pub name: String,
    pub base_type: Option<TypeToken>,
    pub generic_arity: u32,
    pub is_value_type: bool,
    pub enclosing_type: Option<TypeToken>,
    pub custom_attributes: Vec<String>,
}

/// A method definition (spec §6 `GetMethodProps`, `EnumMethodsWithName`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub token: MethodToken,
    pub owner: TypeToken,
    /// Simple (non-qualified) method name.
    pub name: String,
    /// Parameter type names in declaration order, rendered the way
    /// `TypeName` (spec §4.3 param-signature string match) would render
    /// them, e.g. `["int", "string"]`.
    pub param_types: Vec<String>,
    pub custom_attributes: Vec<String>,
    pub is_getter: bool,
    pub is_setter: bool,
}

/// Metadata/PDB reading interface (spec §6 "Metadata interface"). Reading
/// itself is out of scope (spec §1); this crate only consumes it.
pub trait MetadataReader: Send + Sync {
    fn get_type(&self, token: TypeToken) -> Result<TypeInfo>;
    fn find_type_by_name(&self, name: &str) -> Result<Option<TypeInfo>>;
    fn enum_type_defs(&self) -> Result<Vec<TypeInfo>>;
    fn enum_methods_with_name(&self, owner: TypeToken, name: &str) -> Result<Vec<MethodInfo>>;
    fn get_method(&self, token: MethodToken) -> Result<MethodInfo>;
    fn enum_fields(&self, owner: TypeToken) -> Result<Vec<FieldInfo>>;
    fn enum_properties(&self, owner: TypeToken) -> Result<Vec<PropertyInfo>>;
    fn scope_mvid(&self) -> Result<Mvid>;
}

/// A field definition, including the literal-constant blob when the field
/// is a compile-time constant (spec §4.4 "Literal construction").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub token: MethodToken,
    pub owner: TypeToken,
    pub name: String,
    pub is_static: bool,
    pub is_literal: bool,
    /// Raw signature + constant-value blob, present only when `is_literal`.
    pub literal_signature: Option<Vec<u8>>,
    pub literal_value: Option<Vec<u8>>,
    pub debugger_browsable_never: bool,
}

/// A property definition (spec §4.4 "Member walk").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    pub owner: TypeToken,
    pub name: String,
    pub getter: Option<MethodToken>,
    pub is_static: bool,
    pub debugger_browsable_never: bool,
}

/// A single IL-offset-to-source-line mapping entry (spec GLOSSARY
/// "Sequence point").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePoint {
    pub il_offset: u32,
    pub start_line: u32,
    pub end_line: u32,
    pub start_column: u32,
    pub end_column: u32,
}

/// A sequence point whose `start_line` equals `0xFEEFEE` is a hidden
/// sequence point (spec §4.1 "Sequence-point selection").
pub const HIDDEN_LINE: u32 = 0x00FE_EFEE;

impl SequencePoint {
    pub fn is_hidden(&self) -> bool {
        self.start_line == HIDDEN_LINE
    }
}

/// Symbol interface (spec §6 "Symbol interface"). Reading PDB/portable-PDB
/// data itself is out of scope; this crate only consumes resolved results.
pub trait SymbolReader: Send + Sync {
    fn resolve_sequence_point(&self, file: &str, line: u32) -> Result<Option<(MethodToken, u32)>>;
    fn get_line_by_il_offset(&self, method: MethodToken, il_offset: u32) -> Result<Option<(u32, String)>>;
    fn get_step_ranges_from_ip(&self, method: MethodToken, il_offset: u32) -> Result<(u32, u32)>;
    fn get_sequence_points(&self, method: MethodToken) -> Result<Vec<SequencePoint>>;
    fn get_named_local_variable(
        &self,
        method: MethodToken,
        local_index: u32,
        il_offset: u32,
    ) -> Result<Option<(String, u32, u32)>>;
}
