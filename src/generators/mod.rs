//! Backend contract and the built-in backends.
//!
//! A generator contributes to the shared model in two ways before anything
//! is written: it may declare a capability (an interface every struct must
//! satisfy in backends that have interfaces), and it may inject fields,
//! functions, includes and hooks into each struct. Emission runs only after
//! every generator has injected into every struct, so `emit` sees the final
//! model.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::ast::{ProgramModel, StructDefinition};

pub mod json_schema;
pub mod rust;
pub mod sql;

pub use json_schema::JsonSchemaGenerator;
pub use rust::RustGenerator;
pub use sql::SqlGenerator;

/// Names of the built-in generators, in registration order.
pub const BUILTIN_GENERATORS: [&str; 3] = [sql::NAME, json_schema::NAME, rust::NAME];

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("{generator}: invalid argument `{arg}`: {reason}")]
    InvalidArgument {
        generator: String,
        arg: String,
        reason: String,
    },
    #[error("{generator}: struct `{name}` is not in the model")]
    MissingStruct { generator: String, name: String },
    #[error("{generator}: {message}")]
    Failed { generator: String, message: String },
    #[error("{generator}: failed to serialize output: {source}")]
    Json {
        generator: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A file a generator wants written, relative to its output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub contents: String,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// A command-line parameter a generator adds to the host CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: String,
    pub help: String,
}

/// Values of the parameters declared through [`Generator::register_args`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratorArgs {
    values: BTreeMap<String, String>,
}

impl GeneratorArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some("true" | "1" | "yes"))
    }
}

/// A capability collected in phase A, tagged with the generator that
/// declared it.
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub owner: String,
    /// Interface-shaped definition: its identifier names the interface and
    /// its functions are what every implementing struct must provide.
    pub definition: StructDefinition,
}

impl Capability {
    pub fn name(&self) -> &str {
        &self.definition.identifier
    }
}

/// Every capability declared by the registered generators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityRegistry {
    capabilities: Vec<Capability>,
}

impl CapabilityRegistry {
    pub fn insert(&mut self, capability: Capability) {
        if self.get(capability.name()).is_none() {
            self.capabilities.push(capability);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name() == name)
    }

    pub fn owned_by(&self, generator: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.owner == generator)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

/// What a generator can see while injecting or emitting.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorContext<'a> {
    pub capabilities: &'a CapabilityRegistry,
    /// Names of every registered generator, in registration order.
    pub peers: &'a [String],
}

impl GeneratorContext<'_> {
    pub fn has_peer(&self, name: &str) -> bool {
        self.peers.iter().any(|p| p == name)
    }
}

pub trait Generator {
    /// Log label and output subdirectory name.
    fn name(&self) -> &str;

    /// The interface this generator expects every struct to implement.
    fn capability(&self) -> Option<StructDefinition> {
        None
    }

    /// Whether emitted artifacts can express interfaces, in which case the
    /// engine asks for one capability header per capability.
    fn supports_interfaces(&self) -> bool {
        false
    }

    fn register_args(&self) -> Vec<ArgSpec> {
        Vec::new()
    }

    fn configure(&mut self, _args: &GeneratorArgs) -> Result<(), GeneratorError> {
        Ok(())
    }

    /// Called for every capability declared by another generator, once per
    /// struct, during phase A.
    fn add_capability_content(
        &self,
        _capability: &Capability,
        _target: &mut StructDefinition,
    ) -> Result<(), GeneratorError> {
        Ok(())
    }

    /// Phase B: append this generator's content to `struct_name`, or to
    /// structs related to it. Must be idempotent.
    fn inject_struct(
        &self,
        cx: &GeneratorContext<'_>,
        model: &mut ProgramModel,
        struct_name: &str,
    ) -> Result<(), GeneratorError>;

    /// Interface-only artifact for one capability.
    fn emit_capability(
        &self,
        _cx: &GeneratorContext<'_>,
        _capability: &Capability,
    ) -> Result<Option<Artifact>, GeneratorError> {
        Ok(None)
    }

    fn emit(
        &self,
        cx: &GeneratorContext<'_>,
        model: &ProgramModel,
    ) -> Result<Vec<Artifact>, GeneratorError>;
}

/// Looks up a struct for injection, reporting a missing one against the
/// generator.
pub(crate) fn struct_mut<'m>(
    generator: &str,
    model: &'m mut ProgramModel,
    name: &str,
) -> Result<&'m mut StructDefinition, GeneratorError> {
    model
        .struct_by_name_mut(name)
        .ok_or_else(|| GeneratorError::MissingStruct {
            generator: generator.to_string(),
            name: name.to_string(),
        })
}

/// Creates a built-in generator by name.
pub fn builtin(name: &str) -> Option<Box<dyn Generator>> {
    match name {
        sql::NAME => Some(Box::new(SqlGenerator::default())),
        json_schema::NAME => Some(Box::new(JsonSchemaGenerator::default())),
        rust::NAME => Some(Box::new(RustGenerator::default())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        for name in BUILTIN_GENERATORS {
            assert_eq!(builtin(name).unwrap().name(), name);
        }
        assert!(builtin("cobol").is_none());
    }

    #[test]
    fn test_generator_args() {
        let mut args = GeneratorArgs::new();
        args.set("dialect", "postgres");
        args.set("powerset", "yes");
        assert_eq!(args.get("dialect"), Some("postgres"));
        assert!(args.flag("powerset"));
        assert!(!args.flag("missing"));
    }

    #[test]
    fn test_registry_keeps_first_declaration() {
        let mut registry = CapabilityRegistry::default();
        registry.insert(Capability {
            owner: "a".into(),
            definition: StructDefinition::new("Printable"),
        });
        registry.insert(Capability {
            owner: "b".into(),
            definition: StructDefinition::new("Printable"),
        });
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("Printable").unwrap().owner, "a");
        assert!(registry.owned_by("b").is_none());
    }
}
