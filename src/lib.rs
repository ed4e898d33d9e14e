pub mod ast;
pub mod compose;
pub mod config;
pub mod error;
pub mod generators;
pub mod ir;
pub mod lexer;
pub mod measure;
pub mod parser;
#[cfg(not(target_arch = "wasm32"))]
pub mod plugin;
pub mod serializer;
pub mod validator;

use std::path::Path;

use wasm_bindgen::prelude::*;

use ast::ProgramModel;
use compose::ComposeEngine;
use generators::SqlGenerator;
use generators::sql::Dialect;

pub use error::{Error, Result};

/// Parse and validate in-memory schema text.
pub fn compile_str(source: &str) -> Result<ProgramModel> {
    let model = parser::parse_str(source)?;
    validator::validate(&model)?;
    Ok(model)
}

/// Parse and validate every schema file under `dir`.
pub fn compile_directory(dir: &Path, recursive: bool) -> Result<ProgramModel> {
    let model = parser::load_directory(dir, recursive)?;
    validator::validate(&model)?;
    Ok(model)
}

/// DDL for every table, in dependency order.
pub fn schema_to_sql(source: &str, dialect: Dialect) -> Result<String> {
    let mut model = compile_str(source)?;
    let mut engine = ComposeEngine::new();
    engine.register(Box::new(SqlGenerator::new(dialect, false)))?;
    let registry = engine.compose(&mut model)?;
    let artifacts = engine.emit(&model, &registry)?;
    Ok(artifacts
        .into_iter()
        .find(|e| e.artifact.path == Path::new("schema.sql"))
        .map(|e| e.artifact.contents)
        .unwrap_or_default())
}

/// Initialize panic hook for better error messages in WASM
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();
}

/// Compile schema source to SQL DDL
#[wasm_bindgen(js_name = "schemaToSql")]
pub fn render_sql(source: &str, dialect: Option<String>) -> std::result::Result<String, String> {
    let dialect = match dialect.as_deref() {
        Some(name) => Dialect::from_str(name).ok_or_else(|| format!("unknown dialect `{name}`"))?,
        None => Dialect::default(),
    };
    schema_to_sql(source, dialect).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_sql() {
        let sql = render_sql(
            "struct Parent { array<Child>: kids; } struct Child { string: name; }",
            Some("postgres".into()),
        )
        .unwrap();
        assert!(sql.contains("-- dialect: postgres"));
        let parent = sql.find("CREATE TABLE IF NOT EXISTS \"Parent\"").unwrap();
        let child = sql.find("CREATE TABLE IF NOT EXISTS \"Child\"").unwrap();
        assert!(parent < child);
        assert!(sql.contains("\"ParentId\" BIGINT"));
    }

    #[test]
    fn test_render_sql_errors() {
        assert_eq!(
            render_sql("struct A { bool: b; }", Some("oracle".into())).unwrap_err(),
            "unknown dialect `oracle`"
        );
        let err = render_sql("struct A { B: b; } struct B { A: a; }", None).unwrap_err();
        assert!(err.contains("embed each other"));
    }
}
