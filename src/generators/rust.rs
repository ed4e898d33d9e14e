//! Rust source backend.
//!
//! Emits a module tree: one trait file per capability, one module per
//! struct and per enum, and a `mod.rs` re-exporting everything. Structs
//! get private fields with accessors; hooks other generators attached run
//! at the top of the accessor body, and each attached capability becomes a
//! separate trait impl.

use heck::ToSnakeCase;

use super::{Artifact, Capability, Generator, GeneratorContext, GeneratorError};
use crate::ast::{
    EnumDefinition, FunctionDefinition, FunctionRole, HookDefinition, HookPoint,
    MemberVariableDefinition, Owner, PRIMARY_KEY_FIELD, ProgramModel, ScalarKind,
    StructDefinition, TypeDefinition, UNKNOWN_VALUE,
};

pub const NAME: &str = "rust";

const HEADER: &str = "// Generated by schemagen. Do not edit.\n";

/// Used when a persistence function's owner contributed no include.
const FALLBACK_STORE: &str = "crate::store";

const DERIVES: &str = "#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]";

const KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "do",
    "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if", "impl", "in",
    "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "static", "struct", "trait", "true", "try", "type", "typeof", "unsafe",
    "unsized", "use", "virtual", "where", "while", "yield",
];

#[derive(Debug, Clone, Default)]
pub struct RustGenerator;

/// A snake_case identifier, raw-escaped when it collides with a keyword.
fn ident(name: &str) -> String {
    let snake = name.to_snake_case();
    match snake.as_str() {
        "self" | "super" | "crate" => format!("{snake}_"),
        s if KEYWORDS.contains(&s) => format!("r#{snake}"),
        _ => snake,
    }
}

fn scalar_type(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Int8 => "i8",
        ScalarKind::Int16 => "i16",
        ScalarKind::Int32 => "i32",
        ScalarKind::Int64 => "i64",
        ScalarKind::Uint8 => "u8",
        ScalarKind::Uint16 => "u16",
        ScalarKind::Uint32 => "u32",
        ScalarKind::Uint64 => "u64",
        ScalarKind::Float => "f32",
        ScalarKind::Double => "f64",
        ScalarKind::Bool => "bool",
        ScalarKind::String => "String",
        ScalarKind::Char => "char",
    }
}

fn element_type(ty: &TypeDefinition) -> String {
    match ty {
        TypeDefinition::Scalar(kind) => scalar_type(*kind).to_string(),
        TypeDefinition::Named(name) => name.clone(),
        TypeDefinition::Array(elem) => format!("Vec<{}>", element_type(elem)),
    }
}

fn field_type(model: &ProgramModel, m: &MemberVariableDefinition) -> String {
    let is_struct = m
        .ty
        .named()
        .is_some_and(|name| model.struct_by_name(name).is_some());
    let base = match &m.ty {
        // A reference stores the target's key.
        TypeDefinition::Named(_) if is_struct && m.reference.is_some() => "i64".to_string(),
        TypeDefinition::Named(name) if is_struct => format!("Box<{name}>"),
        other => element_type(other),
    };
    if m.required || m.ty.is_array() {
        base
    } else {
        format!("Option<{base}>")
    }
}

/// Crate path the owner of a function asked to be included.
fn store_path<'s>(s: &'s StructDefinition, owner: &Owner) -> &'s str {
    s.includes
        .iter()
        .find(|i| &i.owner == owner)
        .map_or(FALLBACK_STORE, |i| i.path.as_str())
}

struct Method {
    signature: String,
    body: String,
}

fn method(s: &StructDefinition, f: &FunctionDefinition) -> Method {
    let name = ident(&f.identifier);
    let store = store_path(s, &f.owner);
    let key = ident(PRIMARY_KEY_FIELD);
    let (signature, body) = match f.role {
        FunctionRole::ToSerializedForm => (
            format!("fn {name}(&self) -> String"),
            "serde_json::to_string(self).unwrap_or_default()".to_string(),
        ),
        FunctionRole::FromSerializedForm => (
            format!("fn {name}(text: &str) -> Result<Self, String>"),
            "serde_json::from_str(text).map_err(|e| e.to_string())".to_string(),
        ),
        FunctionRole::PersistInsert => (
            format!("fn {name}(&mut self) -> {store}::Result<()>"),
            format!("self.{key} = {store}::insert(self)?;\n        Ok(())"),
        ),
        FunctionRole::PersistUpdate => (
            format!("fn {name}(&self) -> {store}::Result<()>"),
            format!("{store}::update(self.{key}, self)"),
        ),
        FunctionRole::PersistDelete => (
            format!("fn {name}(&self) -> {store}::Result<()>"),
            format!("{store}::delete::<Self>(self.{key})"),
        ),
        FunctionRole::LoadById => (
            format!("fn {name}(id: i64) -> {store}::Result<Self>"),
            format!("{store}::load_by_id(id)"),
        ),
    };
    Method { signature, body }
}

/// Statement a hook contributes, and the store whose `Result` it needs
/// when the call can fail.
/// The call a hook renders to, made on `receiver`, and the store path its
/// error type comes from.
fn hook_call<'s>(
    s: &'s StructDefinition,
    hook: &HookDefinition,
    receiver: &str,
) -> Option<(String, Option<&'s str>)> {
    let f = s
        .functions
        .iter()
        .find(|f| f.role == hook.action && f.owner == hook.owner)?;
    let name = ident(&f.identifier);
    let store = store_path(s, &f.owner);
    match f.role {
        FunctionRole::ToSerializedForm => Some((format!("let _ = {receiver}.{name}();"), None)),
        FunctionRole::FromSerializedForm => None,
        FunctionRole::PersistInsert | FunctionRole::PersistUpdate | FunctionRole::PersistDelete => {
            Some((format!("{receiver}.{name}()?;"), Some(store)))
        }
        FunctionRole::LoadById => Some((
            format!("Self::{}({receiver}.{})?;", name, ident(PRIMARY_KEY_FIELD)),
            Some(store),
        )),
    }
}

fn setter_name(m: &MemberVariableDefinition) -> String {
    format!("set_{}", m.identifier.to_snake_case())
}

struct Accessor {
    lines: Vec<String>,
    store: Option<String>,
    needs_mut: bool,
}

fn accessor_hooks(s: &StructDefinition, point: HookPoint, receiver: &str) -> Accessor {
    let mut accessor = Accessor {
        lines: Vec::new(),
        store: None,
        needs_mut: false,
    };
    for hook in s.hooks_at(point) {
        if let Some((line, store)) = hook_call(s, hook, receiver) {
            accessor.needs_mut |= hook.action == FunctionRole::PersistInsert;
            if accessor.store.is_none() {
                accessor.store = store.map(str::to_string);
            }
            accessor.lines.push(line);
        }
    }
    accessor
}

impl RustGenerator {
    fn module_name(entity: &str) -> String {
        ident(entity)
    }

    pub fn capability_module(&self, capability: &Capability) -> String {
        let mut output = String::from(HEADER);
        output.push_str("\nuse super::*;\n\n");
        output.push_str(&format!(
            "/// Implemented by every struct for the `{}` generator.\n",
            capability.owner
        ));
        output.push_str(&format!("pub trait {} {{\n", capability.name()));
        for f in &capability.definition.functions {
            let m = method(&capability.definition, f);
            if let Some(desc) = &f.description {
                output.push_str(&format!("    /// {desc}\n"));
            }
            let sized = matches!(f.role, FunctionRole::FromSerializedForm | FunctionRole::LoadById);
            output.push_str(&format!(
                "    {}{};\n",
                m.signature,
                if sized { "\n    where\n        Self: Sized" } else { "" }
            ));
        }
        output.push_str("}\n");
        output
    }

    pub fn struct_module(
        &self,
        cx: &GeneratorContext<'_>,
        model: &ProgramModel,
        s: &StructDefinition,
    ) -> String {
        let mut output = String::from(HEADER);
        output.push('\n');
        for include in &s.includes {
            output.push_str(&format!("#[allow(unused_imports)]\nuse {};\n", include.path));
        }
        output.push_str("#[allow(unused_imports)]\nuse super::*;\n\n");

        output.push_str(DERIVES);
        output.push('\n');
        output.push_str(&format!("pub struct {} {{\n", s.identifier));
        for m in &s.member_variables {
            if let Some(desc) = &m.description {
                output.push_str(&format!("    /// {desc}\n"));
            }
            output.push_str(&format!(
                "    {}: {},\n",
                ident(&m.identifier),
                field_type(model, m)
            ));
        }
        output.push_str("}\n\n");

        let getter = accessor_hooks(s, HookPoint::BeforeGetter, "self");
        // Setter hooks see the record as it will be once the value is set.
        let setter = accessor_hooks(s, HookPoint::BeforeSetter, "next");

        let mut taken: Vec<String> = s.functions.iter().map(|f| ident(&f.identifier)).collect();
        for c in s.capabilities.iter().filter_map(|c| cx.capabilities.get(&c.name)) {
            taken.extend(c.definition.functions.iter().map(|f| ident(&f.identifier)));
        }
        taken.extend(s.member_variables.iter().map(setter_name));

        output.push_str(&format!("impl {} {{\n", s.identifier));
        let mut first = true;
        for m in &s.member_variables {
            if !first {
                output.push('\n');
            }
            first = false;
            self.accessors(&mut output, model, m, &taken, &getter, &setter);
        }

        let provided: Vec<&str> = s
            .capabilities
            .iter()
            .filter_map(|c| cx.capabilities.get(&c.name))
            .flat_map(|c| c.definition.functions.iter().map(|f| f.identifier.as_str()))
            .collect();
        for f in s.functions.iter().filter(|f| !provided.contains(&f.identifier.as_str())) {
            let m = method(s, f);
            output.push('\n');
            if let Some(desc) = &f.description {
                output.push_str(&format!("    /// {desc}\n"));
            }
            output.push_str(&format!("    pub {} {{\n        {}\n    }}\n", m.signature, m.body));
        }
        output.push_str("}\n");

        for attached in &s.capabilities {
            let Some(capability) = cx.capabilities.get(&attached.name) else {
                continue;
            };
            output.push_str(&format!("\nimpl {} for {} {{\n", capability.name(), s.identifier));
            for (i, f) in capability.definition.functions.iter().enumerate() {
                let m = method(s, f);
                if i > 0 {
                    output.push('\n');
                }
                output.push_str(&format!("    {} {{\n        {}\n    }}\n", m.signature, m.body));
            }
            output.push_str("}\n");
        }

        output
    }

    fn accessors(
        &self,
        output: &mut String,
        model: &ProgramModel,
        m: &MemberVariableDefinition,
        taken: &[String],
        getter: &Accessor,
        setter: &Accessor,
    ) {
        let field = ident(&m.identifier);
        let ty = field_type(model, m);
        let getter_name = if taken.contains(&field) {
            format!("get_{}", m.identifier.to_snake_case())
        } else {
            field.clone()
        };

        let receiver = if getter.needs_mut { "&mut self" } else { "&self" };
        let (ret, value) = match &getter.store {
            Some(store) => (format!("{store}::Result<&{ty}>"), format!("Ok(&self.{field})")),
            None => (format!("&{ty}"), format!("&self.{field}")),
        };
        output.push_str(&format!("    pub fn {getter_name}({receiver}) -> {ret} {{\n"));
        for line in &getter.lines {
            output.push_str(&format!("        {line}\n"));
        }
        output.push_str(&format!("        {value}\n    }}\n\n"));

        let setter_name = setter_name(m);
        let ret = match &setter.store {
            Some(store) => format!(" -> {store}::Result<()>"),
            None => String::new(),
        };
        output.push_str(&format!(
            "    pub fn {setter_name}(&mut self, value: {ty}){ret} {{\n"
        ));
        if setter.lines.is_empty() {
            output.push_str(&format!("        self.{field} = value;\n"));
        } else {
            output.push_str("        let mut next = self.clone();\n");
            output.push_str(&format!("        next.{field} = value;\n"));
            for line in &setter.lines {
                output.push_str(&format!("        {line}\n"));
            }
            output.push_str("        *self = next;\n");
        }
        if setter.store.is_some() {
            output.push_str("        Ok(())\n");
        }
        output.push_str("    }\n");
    }

    pub fn enum_module(&self, e: &EnumDefinition) -> String {
        let mut output = String::from(HEADER);
        output.push_str("\n#[allow(non_camel_case_types)]\n");
        output.push_str(
            "#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]\n",
        );
        output.push_str(&format!("pub enum {} {{\n", e.identifier));
        for v in &e.values {
            if v.name == UNKNOWN_VALUE {
                output.push_str("    #[default]\n");
            }
            output.push_str(&format!("    {},\n", v.name));
        }
        output.push_str("}\n\n");

        output.push_str(&format!("impl {} {{\n", e.identifier));
        output.push_str("    pub fn value(self) -> i64 {\n        match self {\n");
        for v in &e.values {
            output.push_str(&format!("            Self::{} => {},\n", v.name, v.value));
        }
        output.push_str("        }\n    }\n\n");

        // The first name declared for a value wins.
        output.push_str("    pub fn from_value(value: i64) -> Self {\n        match value {\n");
        let mut seen = Vec::new();
        for v in e.values.iter().filter(|v| v.name != UNKNOWN_VALUE) {
            if !seen.contains(&v.value) {
                seen.push(v.value);
                output.push_str(&format!("            {} => Self::{},\n", v.value, v.name));
            }
        }
        output.push_str("            _ => Self::Unknown,\n        }\n    }\n}\n");
        output
    }

    fn mod_file(&self, cx: &GeneratorContext<'_>, model: &ProgramModel) -> String {
        let mut names: Vec<&str> = cx.capabilities.iter().map(|c| c.name()).collect();
        names.extend(model.enums.iter().map(|e| e.identifier.as_str()));
        names.extend(model.structs.iter().map(|s| s.identifier.as_str()));

        let mut output = String::from(HEADER);
        output.push('\n');
        for name in &names {
            output.push_str(&format!("pub mod {};\n", Self::module_name(name)));
        }
        output.push('\n');
        for name in &names {
            output.push_str(&format!("pub use {}::{};\n", Self::module_name(name), name));
        }
        output
    }
}

impl Generator for RustGenerator {
    fn name(&self) -> &str {
        NAME
    }

    fn supports_interfaces(&self) -> bool {
        true
    }

    fn inject_struct(
        &self,
        _cx: &GeneratorContext<'_>,
        model: &mut ProgramModel,
        struct_name: &str,
    ) -> Result<(), GeneratorError> {
        super::struct_mut(NAME, model, struct_name)?;
        Ok(())
    }

    fn emit_capability(
        &self,
        _cx: &GeneratorContext<'_>,
        capability: &Capability,
    ) -> Result<Option<Artifact>, GeneratorError> {
        Ok(Some(Artifact::new(
            format!("{}.rs", Self::module_name(capability.name()).trim_start_matches("r#")),
            self.capability_module(capability),
        )))
    }

    fn emit(
        &self,
        cx: &GeneratorContext<'_>,
        model: &ProgramModel,
    ) -> Result<Vec<Artifact>, GeneratorError> {
        let file = |name: &str| format!("{}.rs", Self::module_name(name).trim_start_matches("r#"));
        let mut artifacts = Vec::new();
        for e in &model.enums {
            artifacts.push(Artifact::new(file(&e.identifier), self.enum_module(e)));
        }
        for s in &model.structs {
            artifacts.push(Artifact::new(
                file(&s.identifier),
                self.struct_module(cx, model, s),
            ));
        }
        artifacts.push(Artifact::new("mod.rs", self.mod_file(cx, model)));
        Ok(artifacts)
    }
}
