//! Type and entity model shared by the parser, the validator and every
//! generator.

use std::collections::BTreeSet;
use std::fmt;

use crate::lexer::SourcePosition;

/// Identifier of the primary key every struct receives.
pub const PRIMARY_KEY_FIELD: &str = "id";

/// Name of the value appended to every enum.
pub const UNKNOWN_VALUE: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float,
    Double,
    Bool,
    String,
    Char,
}

impl ScalarKind {
    pub const ALL: [ScalarKind; 13] = [
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::Uint8,
        Self::Uint16,
        Self::Uint32,
        Self::Uint64,
        Self::Float,
        Self::Double,
        Self::Bool,
        Self::String,
        Self::Char,
    ];

    pub fn from_keyword(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.keyword() == s)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Float => "float",
            Self::Double => "double",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Char => "char",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::Uint8
                | Self::Uint16
                | Self::Uint32
                | Self::Uint64
        )
    }
}

/// The type of a member variable.
///
/// An array owns its element type; the grammar builds element types
/// bottom-up, so an array can never contain itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDefinition {
    Scalar(ScalarKind),
    /// A struct or enum, resolved by name.
    Named(String),
    Array(Box<TypeDefinition>),
}

impl TypeDefinition {
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    pub fn element(&self) -> Option<&TypeDefinition> {
        match self {
            Self::Array(elem) => Some(elem),
            _ => None,
        }
    }

    /// The struct/enum name when the type is `Named` itself.
    pub fn named(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            _ => None,
        }
    }

    /// The name of the innermost named type, looking through arrays.
    pub fn referenced_name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::Array(elem) => elem.referenced_name(),
            Self::Scalar(_) => None,
        }
    }
}

impl fmt::Display for TypeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(kind) => f.write_str(kind.keyword()),
            Self::Named(name) => f.write_str(name),
            Self::Array(elem) => write!(f, "array<{elem}>"),
        }
    }
}

/// A non-owning link to a field of a struct, resolved by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub target_struct: String,
    pub target_field: String,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target_struct, self.target_field)
    }
}

/// Who contributed a field, function, include or hook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    /// Declared in a schema file, or synthesized by the front end.
    Schema,
    Generator(String),
}

impl Owner {
    pub fn generator(name: impl Into<String>) -> Self {
        Self::Generator(name.into())
    }

    pub fn is_schema(&self) -> bool {
        matches!(self, Self::Schema)
    }

    pub fn is_generator(&self, name: &str) -> bool {
        matches!(self, Self::Generator(n) if n == name)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema => f.write_str("schema"),
            Self::Generator(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberVariableDefinition {
    pub owner: Owner,
    pub ty: TypeDefinition,
    pub identifier: String,
    pub required: bool,
    pub auto_increment: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub reference: Option<Reference>,
    pub description: Option<String>,
    pub default_value: Option<String>,
    /// Only meaningful for arrays.
    pub min_items: Option<u64>,
    pub max_items: Option<u64>,
    pub position: Option<SourcePosition>,
}

impl MemberVariableDefinition {
    pub fn new(owner: Owner, ty: TypeDefinition, identifier: impl Into<String>) -> Self {
        Self {
            owner,
            ty,
            identifier: identifier.into(),
            required: false,
            auto_increment: false,
            primary_key: false,
            unique: false,
            reference: None,
            description: None,
            default_value: None,
            min_items: None,
            max_items: None,
            position: None,
        }
    }

    /// The `id` field appended to every struct.
    pub fn primary_key() -> Self {
        Self {
            required: true,
            auto_increment: true,
            primary_key: true,
            unique: true,
            ..Self::new(
                Owner::Schema,
                TypeDefinition::Scalar(ScalarKind::Int64),
                PRIMARY_KEY_FIELD,
            )
        }
    }

    pub fn is_synthesized_key(&self) -> bool {
        self.primary_key && self.owner.is_schema() && self.identifier == PRIMARY_KEY_FIELD
    }
}

/// Semantic role of a generated function. Backends switch on the role to
/// render a body; the model never stores code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionRole {
    ToSerializedForm,
    FromSerializedForm,
    PersistInsert,
    PersistUpdate,
    PersistDelete,
    LoadById,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub owner: Owner,
    pub role: FunctionRole,
    pub identifier: String,
    pub description: Option<String>,
}

impl FunctionDefinition {
    pub fn new(owner: Owner, role: FunctionRole, identifier: impl Into<String>) -> Self {
        Self {
            owner,
            role,
            identifier: identifier.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    BeforeGetter,
    BeforeSetter,
}

/// Something a backend wants run before a generated accessor body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookDefinition {
    pub owner: Owner,
    pub point: HookPoint,
    /// Role of the function to invoke.
    pub action: FunctionRole,
}

/// A dependency the emitted artifact needs (module, header, crate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDefinition {
    pub owner: Owner,
    pub path: String,
}

/// Marks a struct as implementing the shared capability of a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRef {
    pub owner: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDefinition {
    pub identifier: String,
    pub member_variables: Vec<MemberVariableDefinition>,
    pub functions: Vec<FunctionDefinition>,
    pub includes: Vec<IncludeDefinition>,
    pub hooks: Vec<HookDefinition>,
    pub capabilities: Vec<CapabilityRef>,
    pub position: Option<SourcePosition>,
}

impl StructDefinition {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            member_variables: Vec::new(),
            functions: Vec::new(),
            includes: Vec::new(),
            hooks: Vec::new(),
            capabilities: Vec::new(),
            position: None,
        }
    }

    pub fn member(&self, identifier: &str) -> Option<&MemberVariableDefinition> {
        self.member_variables
            .iter()
            .find(|m| m.identifier == identifier)
    }

    pub fn has_member(&self, identifier: &str) -> bool {
        self.member(identifier).is_some()
    }

    /// Appends a member unless one with the same identifier exists.
    pub fn add_member(&mut self, member: MemberVariableDefinition) -> bool {
        if self.has_member(&member.identifier) {
            return false;
        }
        self.member_variables.push(member);
        true
    }

    /// Appends a function unless the same owner already added one with the
    /// same identifier.
    pub fn add_function(&mut self, function: FunctionDefinition) -> bool {
        let exists = self
            .functions
            .iter()
            .any(|f| f.owner == function.owner && f.identifier == function.identifier);
        if exists {
            return false;
        }
        self.functions.push(function);
        true
    }

    pub fn add_include(&mut self, include: IncludeDefinition) -> bool {
        if self.includes.contains(&include) {
            return false;
        }
        self.includes.push(include);
        true
    }

    pub fn add_hook(&mut self, hook: HookDefinition) -> bool {
        if self.hooks.contains(&hook) {
            return false;
        }
        self.hooks.push(hook);
        true
    }

    pub fn implement(&mut self, capability: CapabilityRef) -> bool {
        if self.capabilities.contains(&capability) {
            return false;
        }
        self.capabilities.push(capability);
        true
    }

    pub fn implements(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c.name == capability)
    }

    pub fn function_with_role(&self, role: FunctionRole) -> Option<&FunctionDefinition> {
        self.functions.iter().find(|f| f.role == role)
    }

    pub fn hooks_at(&self, point: HookPoint) -> impl Iterator<Item = &HookDefinition> {
        self.hooks.iter().filter(move |h| h.point == point)
    }

    pub fn primary_key(&self) -> Option<&MemberVariableDefinition> {
        self.member_variables.iter().find(|m| m.primary_key)
    }

    /// Closes the struct: appends the synthesized primary key.
    pub fn finalize(&mut self) {
        self.add_member(MemberVariableDefinition::primary_key());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDefinition {
    pub identifier: String,
    /// Declaration order, with `Unknown = -1` last once finalized.
    pub values: Vec<EnumValue>,
    pub position: Option<SourcePosition>,
}

impl EnumDefinition {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            values: Vec::new(),
            position: None,
        }
    }

    pub fn value(&self, name: &str) -> Option<i64> {
        self.values.iter().find(|v| v.name == name).map(|v| v.value)
    }

    /// Adds a value; returns false if the name is taken.
    pub fn add_value(&mut self, name: impl Into<String>, value: i64) -> bool {
        let name = name.into();
        if self.value(&name).is_some() {
            return false;
        }
        self.values.push(EnumValue { name, value });
        true
    }

    pub fn finalize(&mut self) {
        self.add_value(UNKNOWN_VALUE, -1);
    }

    /// Values written by the schema author.
    pub fn declared_values(&self) -> impl Iterator<Item = &EnumValue> {
        self.values.iter().filter(|v| v.name != UNKNOWN_VALUE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Struct,
    Enum,
}

/// Every struct and enum read from a file and the files it includes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramModel {
    pub structs: Vec<StructDefinition>,
    pub enums: Vec<EnumDefinition>,
    /// Names announced by the pre-pass and not yet declared.
    pub pending_types: BTreeSet<String>,
}

impl ProgramModel {
    pub fn struct_by_name(&self, name: &str) -> Option<&StructDefinition> {
        self.structs.iter().find(|s| s.identifier == name)
    }

    pub fn struct_by_name_mut(&mut self, name: &str) -> Option<&mut StructDefinition> {
        self.structs.iter_mut().find(|s| s.identifier == name)
    }

    pub fn enum_by_name(&self, name: &str) -> Option<&EnumDefinition> {
        self.enums.iter().find(|e| e.identifier == name)
    }

    pub fn entity_kind(&self, name: &str) -> Option<EntityKind> {
        if self.struct_by_name(name).is_some() {
            Some(EntityKind::Struct)
        } else if self.enum_by_name(name).is_some() {
            Some(EntityKind::Enum)
        } else {
            None
        }
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.entity_kind(name).is_some()
    }

    /// Whether a member may use `name` as its type while parsing.
    pub fn is_type_name(&self, name: &str) -> bool {
        self.is_declared(name) || self.pending_types.contains(name)
    }

    pub fn struct_names(&self) -> Vec<String> {
        self.structs.iter().map(|s| s.identifier.clone()).collect()
    }
}
