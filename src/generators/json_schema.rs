//! JSON Schema backend.
//!
//! Describes the wire form of every struct and enum. Only members declared
//! in the schema (and the synthesized key) are described; columns other
//! generators inject are storage details.

use serde::Serialize;
use serde_json::{Map, Value, json};

use super::{Artifact, Generator, GeneratorContext, GeneratorError};
use crate::ast::{
    EnumDefinition, FunctionDefinition, FunctionRole, MemberVariableDefinition, Owner,
    ProgramModel, ScalarKind, StructDefinition, TypeDefinition,
};

pub const NAME: &str = "json_schema";
pub const CAPABILITY: &str = "JsonSerializable";

const DIALECT: &str = "https://json-schema.org/draft/2020-12/schema";

#[derive(Debug, Clone, Default)]
pub struct JsonSchemaGenerator;

#[derive(Serialize)]
struct Document<'a> {
    #[serde(rename = "$schema")]
    schema: &'static str,
    #[serde(rename = "$id")]
    id: String,
    title: &'a str,
    #[serde(flatten)]
    body: Map<String, Value>,
}

fn file_name(entity: &str) -> String {
    format!("{entity}.schema.json")
}

fn serialization_functions() -> [FunctionDefinition; 2] {
    [
        FunctionDefinition::new(Owner::generator(NAME), FunctionRole::ToSerializedForm, "to_json")
            .with_description("Serialize to a JSON document."),
        FunctionDefinition::new(
            Owner::generator(NAME),
            FunctionRole::FromSerializedForm,
            "from_json",
        )
        .with_description("Parse from a JSON document."),
    ]
}

fn scalar_schema(kind: ScalarKind) -> Value {
    let bounds = |min: i64, max: i64| json!({ "type": "integer", "minimum": min, "maximum": max });
    match kind {
        ScalarKind::Int8 => bounds(i8::MIN.into(), i8::MAX.into()),
        ScalarKind::Int16 => bounds(i16::MIN.into(), i16::MAX.into()),
        ScalarKind::Int32 => bounds(i32::MIN.into(), i32::MAX.into()),
        ScalarKind::Int64 => json!({ "type": "integer" }),
        ScalarKind::Uint8 => bounds(0, u8::MAX.into()),
        ScalarKind::Uint16 => bounds(0, u16::MAX.into()),
        ScalarKind::Uint32 => bounds(0, u32::MAX.into()),
        ScalarKind::Uint64 => json!({ "type": "integer", "minimum": 0 }),
        ScalarKind::Float | ScalarKind::Double => json!({ "type": "number" }),
        ScalarKind::Bool => json!({ "type": "boolean" }),
        ScalarKind::String => json!({ "type": "string" }),
        ScalarKind::Char => json!({ "type": "string", "minLength": 1, "maxLength": 1 }),
    }
}

fn type_schema(ty: &TypeDefinition, by_reference: bool) -> Value {
    match ty {
        TypeDefinition::Scalar(kind) => scalar_schema(*kind),
        // A reference stores the target's key, not the target itself.
        TypeDefinition::Named(_) if by_reference => json!({ "type": "integer" }),
        TypeDefinition::Named(name) => json!({ "$ref": file_name(name) }),
        TypeDefinition::Array(elem) => json!({ "type": "array", "items": type_schema(elem, false) }),
    }
}

fn default_value(m: &MemberVariableDefinition, raw: &str) -> Value {
    match &m.ty {
        TypeDefinition::Scalar(ScalarKind::String | ScalarKind::Char) | TypeDefinition::Named(_) => {
            Value::String(raw.to_string())
        }
        _ => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

fn member_schema(model: &ProgramModel, m: &MemberVariableDefinition) -> Value {
    let by_reference = m.reference.is_some()
        && m.ty
            .named()
            .is_some_and(|name| model.struct_by_name(name).is_some());
    let mut schema = type_schema(&m.ty, by_reference);

    if let Value::Object(fields) = &mut schema {
        if let Some(desc) = &m.description {
            fields.insert("description".into(), desc.clone().into());
        }
        if let Some(raw) = &m.default_value {
            fields.insert("default".into(), default_value(m, raw));
        }
        if let Some(min) = m.min_items {
            fields.insert("minItems".into(), min.into());
        }
        if let Some(max) = m.max_items {
            fields.insert("maxItems".into(), max.into());
        }
        if m.unique && m.ty.is_array() {
            fields.insert("uniqueItems".into(), true.into());
        }
        if m.primary_key {
            fields.insert("readOnly".into(), true.into());
        }
    }
    schema
}

fn to_json(document: &Document<'_>) -> Result<String, GeneratorError> {
    serde_json::to_string_pretty(document)
        .map(|mut text| {
            text.push('\n');
            text
        })
        .map_err(|source| GeneratorError::Json {
            generator: NAME.to_string(),
            source,
        })
}

impl JsonSchemaGenerator {
    pub fn struct_document(&self, model: &ProgramModel, s: &StructDefinition) -> Result<String, GeneratorError> {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for m in s.member_variables.iter().filter(|m| m.owner.is_schema()) {
            properties.insert(m.identifier.clone(), member_schema(model, m));
            if m.required {
                required.push(Value::String(m.identifier.clone()));
            }
        }

        let mut body = Map::new();
        body.insert("type".into(), "object".into());
        body.insert("properties".into(), Value::Object(properties));
        if !required.is_empty() {
            body.insert("required".into(), Value::Array(required));
        }
        body.insert("additionalProperties".into(), false.into());

        to_json(&Document {
            schema: DIALECT,
            id: file_name(&s.identifier),
            title: &s.identifier,
            body,
        })
    }

    /// Enums travel by name; `Unknown` is accepted like any other value.
    pub fn enum_document(&self, e: &EnumDefinition) -> Result<String, GeneratorError> {
        let names: Vec<Value> = e
            .values
            .iter()
            .map(|v| Value::String(v.name.clone()))
            .collect();

        let mut body = Map::new();
        body.insert("type".into(), "string".into());
        body.insert("enum".into(), Value::Array(names));

        to_json(&Document {
            schema: DIALECT,
            id: file_name(&e.identifier),
            title: &e.identifier,
            body,
        })
    }
}

impl Generator for JsonSchemaGenerator {
    fn name(&self) -> &str {
        NAME
    }

    fn capability(&self) -> Option<StructDefinition> {
        let mut def = StructDefinition::new(CAPABILITY);
        for f in serialization_functions() {
            def.add_function(f);
        }
        Some(def)
    }

    fn inject_struct(
        &self,
        _cx: &GeneratorContext<'_>,
        model: &mut ProgramModel,
        struct_name: &str,
    ) -> Result<(), GeneratorError> {
        let s = super::struct_mut(NAME, model, struct_name)?;
        for f in serialization_functions() {
            s.add_function(f);
        }
        Ok(())
    }

    fn emit(
        &self,
        _cx: &GeneratorContext<'_>,
        model: &ProgramModel,
    ) -> Result<Vec<Artifact>, GeneratorError> {
        let mut artifacts = Vec::with_capacity(model.structs.len() + model.enums.len());
        for s in &model.structs {
            artifacts.push(Artifact::new(
                file_name(&s.identifier),
                self.struct_document(model, s)?,
            ));
        }
        for e in &model.enums {
            artifacts.push(Artifact::new(file_name(&e.identifier), self.enum_document(e)?));
        }
        Ok(artifacts)
    }
}
