//! Two-phase composition of every registered generator over every struct.
//!
//! Phase A collects capabilities, attaches them to each struct and lets
//! the other generators add content tied to them. Phase B runs each
//! generator's injection over each struct, in registration order, so a
//! later generator observes what earlier ones injected. Emission starts
//! only once both phases are complete for all generators and structs.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::ast::{CapabilityRef, ProgramModel};
use crate::generators::{
    Artifact, Capability, CapabilityRegistry, Generator, GeneratorContext, GeneratorError,
};

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("generator `{0}` is registered twice")]
    DuplicateGenerator(String),
    #[error("generator name `{0}` is not a plain directory name")]
    InvalidGeneratorName(String),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error("{generator}: artifact path {} leaves the output directory", path.display())]
    UnsafePath { generator: String, path: PathBuf },
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An artifact together with the generator that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedArtifact {
    pub generator: String,
    pub artifact: Artifact,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub capabilities: usize,
    pub written: Vec<PathBuf>,
}

#[derive(Default)]
pub struct ComposeEngine {
    generators: Vec<Box<dyn Generator>>,
}

impl ComposeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a generator. Its name becomes an output subdirectory, so it
    /// must be one plain path component.
    pub fn register(&mut self, generator: Box<dyn Generator>) -> Result<(), ComposeError> {
        let mut components = Path::new(generator.name()).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(ComposeError::InvalidGeneratorName(generator.name().to_string()));
        }
        if self.generators.iter().any(|g| g.name() == generator.name()) {
            return Err(ComposeError::DuplicateGenerator(generator.name().to_string()));
        }
        debug!(generator = generator.name(), "registered generator");
        self.generators.push(generator);
        Ok(())
    }

    pub fn generator_names(&self) -> Vec<String> {
        self.generators.iter().map(|g| g.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// Runs phases A and B over `model` and returns the capabilities
    /// collected in phase A. Running it again leaves the model unchanged.
    pub fn compose(&self, model: &mut ProgramModel) -> Result<CapabilityRegistry, ComposeError> {
        let peers = self.generator_names();

        let mut registry = CapabilityRegistry::default();
        for g in &self.generators {
            if let Some(definition) = g.capability() {
                if definition.functions.is_empty() {
                    continue;
                }
                registry.insert(Capability {
                    owner: g.name().to_string(),
                    definition,
                });
            }
        }
        info!(capabilities = registry.len(), "phase A: collected capabilities");

        for capability in registry.iter() {
            let marker = CapabilityRef {
                owner: capability.owner.clone(),
                name: capability.name().to_string(),
            };
            for s in model.structs.iter_mut() {
                s.implement(marker.clone());
                for g in &self.generators {
                    if g.name() != capability.owner {
                        g.add_capability_content(capability, s)?;
                    }
                }
            }
        }

        let struct_names = model.struct_names();
        let cx = GeneratorContext {
            capabilities: &registry,
            peers: &peers,
        };
        for g in &self.generators {
            for name in &struct_names {
                g.inject_struct(&cx, model, name)?;
            }
            debug!(generator = g.name(), structs = struct_names.len(), "phase B: injected");
        }
        info!(
            generators = self.generators.len(),
            structs = struct_names.len(),
            "phase B: injection complete"
        );

        Ok(registry)
    }

    /// Collects every artifact from the final model: capability headers
    /// first, then each generator's own output.
    pub fn emit(
        &self,
        model: &ProgramModel,
        registry: &CapabilityRegistry,
    ) -> Result<Vec<EmittedArtifact>, ComposeError> {
        let peers = self.generator_names();
        let cx = GeneratorContext {
            capabilities: registry,
            peers: &peers,
        };

        let mut out = Vec::new();
        for g in &self.generators {
            let before = out.len();
            if g.supports_interfaces() {
                for capability in registry.iter() {
                    if let Some(artifact) = g.emit_capability(&cx, capability)? {
                        out.push(EmittedArtifact {
                            generator: g.name().to_string(),
                            artifact,
                        });
                    }
                }
            }
            for artifact in g.emit(&cx, model)? {
                out.push(EmittedArtifact {
                    generator: g.name().to_string(),
                    artifact,
                });
            }
            info!(generator = g.name(), artifacts = out.len() - before, "emitted");
        }
        Ok(out)
    }

    /// Writes artifacts under `output_root/<generator>/`. Files written
    /// before a failure are left in place.
    pub fn write(
        output_root: &Path,
        artifacts: &[EmittedArtifact],
    ) -> Result<Vec<PathBuf>, ComposeError> {
        let mut written = Vec::with_capacity(artifacts.len());
        for emitted in artifacts {
            let relative = &emitted.artifact.path;
            let contained = relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
            if !contained || relative.as_os_str().is_empty() {
                return Err(ComposeError::UnsafePath {
                    generator: emitted.generator.clone(),
                    path: relative.clone(),
                });
            }

            let path = output_root.join(&emitted.generator).join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| ComposeError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&path, &emitted.artifact.contents).map_err(|source| ComposeError::Io {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), "wrote artifact");
            written.push(path);
        }
        Ok(written)
    }

    pub fn run(
        &self,
        model: &mut ProgramModel,
        output_root: &Path,
    ) -> Result<RunSummary, ComposeError> {
        let registry = self.compose(model)?;
        let artifacts = self.emit(model, &registry)?;
        let written = Self::write(output_root, &artifacts)?;
        info!(files = written.len(), output = %output_root.display(), "generation complete");
        Ok(RunSummary {
            capabilities: registry.len(),
            written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        FunctionDefinition, FunctionRole, MemberVariableDefinition, Owner, ScalarKind,
        StructDefinition, TypeDefinition,
    };
    use crate::parser::parse_str;

    /// Declares a capability and adds one function per struct.
    struct Printer;

    impl Generator for Printer {
        fn name(&self) -> &str {
            "printer"
        }

        fn capability(&self) -> Option<StructDefinition> {
            let mut def = StructDefinition::new("Printable");
            def.add_function(FunctionDefinition::new(
                Owner::generator("printer"),
                FunctionRole::ToSerializedForm,
                "print",
            ));
            Some(def)
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
            let s = crate::generators::struct_mut(self.name(), model, struct_name)?;
            s.add_function(FunctionDefinition::new(
                Owner::generator("printer"),
                FunctionRole::ToSerializedForm,
                "print",
            ));
            Ok(())
        }

        fn emit_capability(
            &self,
            _cx: &GeneratorContext<'_>,
            capability: &Capability,
        ) -> Result<Option<Artifact>, GeneratorError> {
            Ok(Some(Artifact::new(
                format!("{}.iface", capability.name()),
                capability.name(),
            )))
        }

        fn emit(
            &self,
            _cx: &GeneratorContext<'_>,
            model: &ProgramModel,
        ) -> Result<Vec<Artifact>, GeneratorError> {
            Ok(model
                .structs
                .iter()
                .map(|s| {
                    let fields: Vec<&str> = s
                        .member_variables
                        .iter()
                        .map(|m| m.identifier.as_str())
                        .collect();
                    Artifact::new(format!("{}.txt", s.identifier), fields.join(","))
                })
                .collect())
        }
    }

    /// Adds a column, and records what it saw of other generators.
    struct Auditor;

    impl Generator for Auditor {
        fn name(&self) -> &str {
            "auditor"
        }

        fn add_capability_content(
            &self,
            capability: &Capability,
            target: &mut StructDefinition,
        ) -> Result<(), GeneratorError> {
            target.add_member(MemberVariableDefinition::new(
                Owner::generator("auditor"),
                TypeDefinition::Scalar(ScalarKind::Bool),
                format!("{}_checked", capability.name().to_lowercase()),
            ));
            Ok(())
        }

        fn inject_struct(
            &self,
            cx: &GeneratorContext<'_>,
            model: &mut ProgramModel,
            struct_name: &str,
        ) -> Result<(), GeneratorError> {
            let s = crate::generators::struct_mut(self.name(), model, struct_name)?;
            // Printer ran first, so its function is already present.
            let saw_printer = s.function_with_role(FunctionRole::ToSerializedForm).is_some();
            if saw_printer && cx.has_peer("printer") {
                s.add_member(MemberVariableDefinition::new(
                    Owner::generator("auditor"),
                    TypeDefinition::Scalar(ScalarKind::Int64),
                    "audited_at",
                ));
            }
            Ok(())
        }

        fn emit(
            &self,
            _cx: &GeneratorContext<'_>,
            _model: &ProgramModel,
        ) -> Result<Vec<Artifact>, GeneratorError> {
            Ok(vec![Artifact::new("../escape.txt", "nope")])
        }
    }

    fn engine() -> ComposeEngine {
        let mut engine = ComposeEngine::new();
        engine.register(Box::new(Printer)).unwrap();
        engine.register(Box::new(Auditor)).unwrap();
        engine
    }

    #[test]
    fn test_phases_and_ordering() {
        let mut model = parse_str("struct Node { string: name; }").unwrap();
        let registry = engine().compose(&mut model).unwrap();

        assert_eq!(registry.len(), 1);
        let node = &model.structs[0];
        assert!(node.implements("Printable"));
        let fields: Vec<&str> = node
            .member_variables
            .iter()
            .map(|m| m.identifier.as_str())
            .collect();
        assert_eq!(fields, vec!["name", "id", "printable_checked", "audited_at"]);
    }

    #[test]
    fn test_compose_is_idempotent() {
        let mut model = parse_str("struct A { bool: x; } struct B { bool: y; }").unwrap();
        let engine = engine();
        engine.compose(&mut model).unwrap();
        let once = model.clone();
        engine.compose(&mut model).unwrap();
        assert_eq!(model, once);
    }

    #[test]
    fn test_emission_sees_final_model() {
        let mut model = parse_str("struct Node { string: name; }").unwrap();
        let mut engine = ComposeEngine::new();
        engine.register(Box::new(Printer)).unwrap();
        let registry = engine.compose(&mut model).unwrap();
        let artifacts = engine.emit(&model, &registry).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].artifact.path, PathBuf::from("Printable.iface"));
        assert_eq!(artifacts[1].artifact.contents, "name,id");
    }

    #[test]
    fn test_duplicate_registration() {
        let mut engine = engine();
        assert!(matches!(
            engine.register(Box::new(Printer)),
            Err(ComposeError::DuplicateGenerator(name)) if name == "printer"
        ));
    }

    /// Emits nothing; only its name matters.
    struct Named(&'static str);

    impl Generator for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn inject_struct(
            &self,
            _cx: &GeneratorContext<'_>,
            _model: &mut ProgramModel,
            _struct_name: &str,
        ) -> Result<(), GeneratorError> {
            Ok(())
        }

        fn emit(
            &self,
            _cx: &GeneratorContext<'_>,
            _model: &ProgramModel,
        ) -> Result<Vec<Artifact>, GeneratorError> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_generator_names_must_be_plain() {
        let mut engine = ComposeEngine::new();
        for name in ["../x", "", ".", "a/b", "/abs"] {
            assert!(
                matches!(
                    engine.register(Box::new(Named(name))),
                    Err(ComposeError::InvalidGeneratorName(n)) if n == name
                ),
                "{name}"
            );
        }
        engine.register(Box::new(Named("graph_ql-2"))).unwrap();
        assert_eq!(engine.generator_names(), ["graph_ql-2"]);
    }

    #[test]
    fn test_write_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = parse_str("struct Node { string: name; }").unwrap();
        let err = engine().run(&mut model, dir.path()).unwrap_err();
        assert!(matches!(err, ComposeError::UnsafePath { .. }));
    }

    #[test]
    fn test_run_writes_per_generator_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = parse_str("struct Node { string: name; }").unwrap();
        let mut engine = ComposeEngine::new();
        engine.register(Box::new(Printer)).unwrap();
        let summary = engine.run(&mut model, dir.path()).unwrap();
        assert_eq!(summary.capabilities, 1);
        assert_eq!(summary.written.len(), 2);
        let text = fs::read_to_string(dir.path().join("printer/Node.txt")).unwrap();
        assert_eq!(text, "name,id");
    }
}
