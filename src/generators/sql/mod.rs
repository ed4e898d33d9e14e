//! Relational backend: tables, persistence statements and the optional
//! filtered-query surface.

mod dialect;
mod types;

pub use dialect::Dialect;

use heck::ToSnakeCase;
use tracing::debug;

use super::{ArgSpec, Artifact, Generator, GeneratorArgs, GeneratorContext, GeneratorError};
use crate::ast::{
    FunctionDefinition, FunctionRole, HookDefinition, HookPoint, IncludeDefinition,
    MemberVariableDefinition, Owner, PRIMARY_KEY_FIELD, ProgramModel, Reference, ScalarKind,
    StructDefinition, TypeDefinition,
};
use crate::ir::ReferenceGraph;

pub const NAME: &str = "sql";

/// Library the persistence functions are implemented against.
pub const STORE_INCLUDE: &str = "schemagen_store";

/// Widest struct the filtered-query surface is emitted for.
pub const MAX_POWERSET_COLUMNS: usize = 20;

const HEADER: &str = "-- Generated by schemagen. Do not edit.\n";

const PERSISTENCE: [(FunctionRole, &str, &str); 4] = [
    (FunctionRole::PersistInsert, "insert", "Insert a new row and assign its id."),
    (FunctionRole::PersistUpdate, "update", "Write every column of an existing row."),
    (FunctionRole::PersistDelete, "delete", "Delete the row with this id."),
    (FunctionRole::LoadById, "load_by_id", "Load one row by id."),
];

/// Name of the key column an element struct gets for `array<Element>`
/// fields of `owner`.
pub fn foreign_key_name(owner: &str) -> String {
    format!("{owner}Id")
}

/// Whether a member is stored as a column. Arrays of structs are stored
/// as a key on the element table instead.
fn is_stored(model: &ProgramModel, m: &MemberVariableDefinition) -> bool {
    !m.ty
        .element()
        .and_then(TypeDefinition::named)
        .is_some_and(|name| model.struct_by_name(name).is_some())
}

fn stored_members<'s>(
    model: &'s ProgramModel,
    s: &'s StructDefinition,
) -> impl Iterator<Item = &'s MemberVariableDefinition> + 's {
    s.member_variables.iter().filter(move |m| is_stored(model, m))
}

fn value_members<'s>(
    model: &'s ProgramModel,
    s: &'s StructDefinition,
) -> Vec<&'s MemberVariableDefinition> {
    stored_members(model, s).filter(|m| !m.primary_key).collect()
}

/// `2^n - 1`, saturating.
fn subsets(n: usize) -> u64 {
    u32::try_from(n)
        .ok()
        .and_then(|n| 1u64.checked_shl(n))
        .map_or(u64::MAX, |v| v - 1)
}

/// Exact number of filtered queries the powerset surface emits for
/// `model`: one per non-empty subset of each struct's non-key columns.
/// Call it on the composed model so injected key columns are counted.
pub fn powerset_query_count(model: &ProgramModel) -> u64 {
    model
        .structs
        .iter()
        .map(|s| subsets(value_members(model, s).len()))
        .fold(0u64, u64::saturating_add)
}

#[derive(Debug, Clone, Default)]
pub struct SqlGenerator {
    dialect: Dialect,
    powerset_queries: bool,
}

struct Column {
    definition: String,
    foreign_key: Option<(String, String)>,
}

impl SqlGenerator {
    pub fn new(dialect: Dialect, powerset_queries: bool) -> Self {
        Self {
            dialect,
            powerset_queries,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn powerset_queries(&self) -> bool {
        self.powerset_queries
    }

    fn column(&self, model: &ProgramModel, m: &MemberVariableDefinition) -> Column {
        let d = self.dialect;
        let name = d.quote(&m.identifier);
        if m.is_synthesized_key() {
            return Column {
                definition: format!("{} {}", name, d.primary_key_column()),
                foreign_key: None,
            };
        }

        let mut foreign_key = m
            .reference
            .as_ref()
            .map(|r| (r.target_struct.clone(), r.target_field.clone()));
        let mut check = None;
        let ty = match &m.ty {
            TypeDefinition::Scalar(kind) => types::column_type(*kind, d),
            TypeDefinition::Array(_) => types::list_type(d),
            TypeDefinition::Named(target) => match model.enum_by_name(target) {
                Some(e) => {
                    let values: Vec<String> = e.values.iter().map(|v| v.value.to_string()).collect();
                    check = Some(format!("CHECK ({} IN ({}))", name, values.join(", ")));
                    types::column_type(ScalarKind::Int32, d)
                }
                None => {
                    foreign_key
                        .get_or_insert_with(|| (target.clone(), PRIMARY_KEY_FIELD.to_string()));
                    types::key_type(d)
                }
            },
        };

        let mut definition = format!("{name} {ty}");
        if m.required {
            definition.push_str(" NOT NULL");
        }
        if m.unique {
            definition.push_str(" UNIQUE");
        }
        if m.auto_increment && matches!(m.ty, TypeDefinition::Scalar(k) if k.is_integer()) {
            if let Some(clause) = d.auto_increment() {
                definition.push(' ');
                definition.push_str(clause);
            }
        }
        if let Some(value) = &m.default_value {
            definition.push_str(&format!(" DEFAULT {}", default_literal(model, m, value)));
        }
        if let Some(check) = check {
            definition.push(' ');
            definition.push_str(&check);
        }

        Column {
            definition,
            foreign_key,
        }
    }

    /// `CREATE TABLE` statement for one struct.
    pub fn table(&self, model: &ProgramModel, s: &StructDefinition) -> String {
        let d = self.dialect;
        let mut entries = Vec::new();
        let mut keys = Vec::new();

        for m in stored_members(model, s) {
            let column = self.column(model, m);
            let mut entry = String::new();
            if let Some(desc) = &m.description {
                entry.push_str(&format!("    -- {}\n", desc.replace('\n', " ")));
            }
            entry.push_str("    ");
            entry.push_str(&column.definition);
            entries.push(entry);

            if let Some((table, field)) = column.foreign_key {
                keys.push(format!(
                    "    FOREIGN KEY ({}) REFERENCES {} ({})",
                    d.quote(&m.identifier),
                    d.quote(&table),
                    d.quote(&field)
                ));
            }
        }
        entries.extend(keys);

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n);\n",
            d.quote(&s.identifier),
            entries.join(",\n")
        )
    }

    /// Statement backing a persistence function, if the role has one.
    fn statement(&self, model: &ProgramModel, s: &StructDefinition, role: FunctionRole) -> Option<String> {
        let d = self.dialect;
        let table = d.quote(&s.identifier);
        let key = d.quote(PRIMARY_KEY_FIELD);
        let values: Vec<String> = value_members(model, s)
            .iter()
            .map(|m| d.quote(&m.identifier))
            .collect();

        match role {
            FunctionRole::PersistInsert if values.is_empty() => Some(match d {
                Dialect::MySQL => format!("INSERT INTO {table} () VALUES ();"),
                _ => format!("INSERT INTO {table} DEFAULT VALUES;"),
            }),
            FunctionRole::PersistInsert => {
                let params: Vec<String> = (1..=values.len()).map(|n| d.placeholder(n)).collect();
                Some(format!(
                    "INSERT INTO {} ({}) VALUES ({});",
                    table,
                    values.join(", "),
                    params.join(", ")
                ))
            }
            FunctionRole::PersistUpdate if values.is_empty() => None,
            FunctionRole::PersistUpdate => {
                let sets: Vec<String> = values
                    .iter()
                    .enumerate()
                    .map(|(i, col)| format!("{} = {}", col, d.placeholder(i + 1)))
                    .collect();
                Some(format!(
                    "UPDATE {} SET {} WHERE {} = {};",
                    table,
                    sets.join(", "),
                    key,
                    d.placeholder(values.len() + 1)
                ))
            }
            FunctionRole::PersistDelete => Some(format!(
                "DELETE FROM {} WHERE {} = {};",
                table,
                key,
                d.placeholder(1)
            )),
            FunctionRole::LoadById => Some(format!(
                "SELECT {} FROM {} WHERE {} = {};",
                self.select_list(model, s),
                table,
                key,
                d.placeholder(1)
            )),
            FunctionRole::ToSerializedForm | FunctionRole::FromSerializedForm => None,
        }
    }

    fn select_list(&self, model: &ProgramModel, s: &StructDefinition) -> String {
        stored_members(model, s)
            .map(|m| self.dialect.quote(&m.identifier))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn struct_file(&self, model: &ProgramModel, s: &StructDefinition) -> String {
        let mut output = String::from(HEADER);
        for include in &s.includes {
            output.push_str(&format!("-- requires: {}\n", include.path));
        }
        output.push('\n');
        output.push_str(&self.table(model, s));

        for f in s.functions.iter().filter(|f| f.owner.is_generator(NAME)) {
            if let Some(stmt) = self.statement(model, s, f.role) {
                output.push_str(&format!("\n-- name: {}\n{}\n", f.identifier, stmt));
            }
        }
        output
    }

    /// One `SELECT` per non-empty subset of the non-key columns.
    fn queries(&self, model: &ProgramModel, s: &StructDefinition) -> Result<String, GeneratorError> {
        let d = self.dialect;
        let columns = value_members(model, s);
        if columns.len() > MAX_POWERSET_COLUMNS {
            return Err(GeneratorError::Failed {
                generator: NAME.to_string(),
                message: format!(
                    "`{}` has {} columns; filtered queries are limited to {}",
                    s.identifier,
                    columns.len(),
                    MAX_POWERSET_COLUMNS
                ),
            });
        }

        let select = format!(
            "SELECT {} FROM {}",
            self.select_list(model, s),
            d.quote(&s.identifier)
        );
        let mut output = String::from(HEADER);
        for mask in 1u32..(1u32 << columns.len()) {
            let chosen: Vec<&MemberVariableDefinition> = columns
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, m)| *m)
                .collect();
            let name: Vec<String> = chosen.iter().map(|m| m.identifier.to_snake_case()).collect();
            let filters: Vec<String> = chosen
                .iter()
                .enumerate()
                .map(|(i, m)| format!("{} = {}", d.quote(&m.identifier), d.placeholder(i + 1)))
                .collect();
            output.push_str(&format!(
                "\n-- name: find_by_{}\n{} WHERE {};\n",
                name.join("_and_"),
                select,
                filters.join(" AND ")
            ));
        }
        Ok(output)
    }
}

fn default_literal(model: &ProgramModel, m: &MemberVariableDefinition, value: &str) -> String {
    match &m.ty {
        TypeDefinition::Scalar(kind) if types::is_textual(*kind) => {
            format!("'{}'", value.replace('\'', "''"))
        }
        TypeDefinition::Named(target) => model
            .enum_by_name(target)
            .and_then(|e| e.value(value))
            .map_or_else(|| value.to_string(), |v| v.to_string()),
        _ => value.to_string(),
    }
}

impl Generator for SqlGenerator {
    fn name(&self) -> &str {
        NAME
    }

    fn register_args(&self) -> Vec<ArgSpec> {
        vec![
            ArgSpec {
                name: "dialect".into(),
                help: "SQL dialect: sqlite, postgres or mysql".into(),
            },
            ArgSpec {
                name: "powerset_queries".into(),
                help: "Emit one filtered query per subset of each table's columns".into(),
            },
        ]
    }

    fn configure(&mut self, args: &GeneratorArgs) -> Result<(), GeneratorError> {
        if let Some(value) = args.get("dialect") {
            self.dialect = Dialect::from_str(value).ok_or_else(|| GeneratorError::InvalidArgument {
                generator: NAME.to_string(),
                arg: "dialect".to_string(),
                reason: format!("unknown dialect `{value}`, expected sqlite, postgres or mysql"),
            })?;
        }
        if args.get("powerset_queries").is_some() {
            self.powerset_queries = args.flag("powerset_queries");
        }
        Ok(())
    }

    fn inject_struct(
        &self,
        _cx: &GeneratorContext<'_>,
        model: &mut ProgramModel,
        struct_name: &str,
    ) -> Result<(), GeneratorError> {
        let owner = Owner::generator(NAME);
        let s = super::struct_mut(NAME, model, struct_name)?;

        for (role, identifier, description) in PERSISTENCE {
            s.add_function(
                FunctionDefinition::new(owner.clone(), role, identifier).with_description(description),
            );
        }
        s.add_hook(HookDefinition {
            owner: owner.clone(),
            point: HookPoint::BeforeSetter,
            action: FunctionRole::PersistUpdate,
        });
        s.add_include(IncludeDefinition {
            owner: owner.clone(),
            path: STORE_INCLUDE.to_string(),
        });

        let elements: Vec<String> = s
            .member_variables
            .iter()
            .filter_map(|m| m.ty.element().and_then(TypeDefinition::named))
            .map(str::to_string)
            .collect();

        let key = foreign_key_name(struct_name);
        for element in elements {
            // Arrays of enums stay a list column.
            let Some(target) = model.struct_by_name_mut(&element) else {
                continue;
            };
            let mut fk = MemberVariableDefinition::new(
                owner.clone(),
                TypeDefinition::Scalar(ScalarKind::Int64),
                key.clone(),
            );
            fk.reference = Some(Reference {
                target_struct: struct_name.to_string(),
                target_field: PRIMARY_KEY_FIELD.to_string(),
            });
            if target.add_member(fk) {
                debug!(owner = struct_name, element = %element, column = %key, "injected foreign key");
            }
        }
        Ok(())
    }

    fn emit(
        &self,
        _cx: &GeneratorContext<'_>,
        model: &ProgramModel,
    ) -> Result<Vec<Artifact>, GeneratorError> {
        let graph = ReferenceGraph::from_model(model);
        let mut artifacts = Vec::new();
        let mut schema = format!("{}-- dialect: {}\n", HEADER, self.dialect.name());

        for name in graph.ordered() {
            let s = model
                .struct_by_name(&name)
                .ok_or_else(|| GeneratorError::MissingStruct {
                    generator: NAME.to_string(),
                    name: name.clone(),
                })?;
            schema.push('\n');
            schema.push_str(&self.table(model, s));
            artifacts.push(Artifact::new(format!("{name}.sql"), self.struct_file(model, s)));

            if self.powerset_queries && !value_members(model, s).is_empty() {
                artifacts.push(Artifact::new(
                    format!("{name}_queries.sql"),
                    self.queries(model, s)?,
                ));
            }
        }

        artifacts.push(Artifact::new("schema.sql", schema));
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::ComposeEngine;
    use crate::generators::CapabilityRegistry;
    use crate::parser::parse_str;

    fn compose(source: &str, generator: SqlGenerator) -> (ProgramModel, Vec<Artifact>) {
        let mut model = parse_str(source).unwrap();
        let mut engine = ComposeEngine::new();
        engine.register(Box::new(generator)).unwrap();
        let registry = engine.compose(&mut model).unwrap();
        let artifacts = engine
            .emit(&model, &registry)
            .unwrap()
            .into_iter()
            .map(|e| e.artifact)
            .collect();
        (model, artifacts)
    }

    fn find<'a>(artifacts: &'a [Artifact], path: &str) -> &'a str {
        &artifacts
            .iter()
            .find(|a| a.path.to_str() == Some(path))
            .unwrap()
            .contents
    }

    #[test]
    fn test_foreign_key_injected_once() {
        let mut model = parse_str(
            "struct Parent { array<Child>: children; } struct Child { string: name; }",
        )
        .unwrap();
        let generator = SqlGenerator::default();
        let registry = CapabilityRegistry::default();
        let peers = vec![NAME.to_string()];
        let cx = GeneratorContext {
            capabilities: &registry,
            peers: &peers,
        };
        for _ in 0..3 {
            generator.inject_struct(&cx, &mut model, "Parent").unwrap();
            generator.inject_struct(&cx, &mut model, "Child").unwrap();
        }

        let child = model.struct_by_name("Child").unwrap();
        let keys: Vec<&MemberVariableDefinition> = child
            .member_variables
            .iter()
            .filter(|m| m.identifier == "ParentId")
            .collect();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].owner.is_generator(NAME));
        assert_eq!(keys[0].reference.as_ref().unwrap().to_string(), "Parent.id");

        let parent = model.struct_by_name("Parent").unwrap();
        assert_eq!(parent.functions.len(), 4);
        assert_eq!(parent.hooks.len(), 1);
        assert_eq!(parent.includes.len(), 1);
        assert!(!parent.has_member("ParentId"));
    }

    #[test]
    fn test_sqlite_table() {
        let (_, artifacts) = compose(
            "struct Node { string: name: required; }",
            SqlGenerator::default(),
        );
        assert_eq!(
            find(&artifacts, "Node.sql").split("\n\n").nth(1).unwrap(),
            "CREATE TABLE IF NOT EXISTS \"Node\" (\n    \"name\" TEXT NOT NULL,\n    \"id\" INTEGER PRIMARY KEY AUTOINCREMENT\n);"
        );
    }

    #[test]
    fn test_columns_and_keys() {
        let (_, artifacts) = compose(
            r#"
            enum Status { Open, Closed = 5 }
            struct Order {
                Customer: buyer;
                array<Line>: lines;
                array<int32>: codes;
                Status: status: default(Closed);
                string: note: default("it's");
            }
            struct Customer { string: name: unique; }
            struct Line { string: sku; }
            "#,
            SqlGenerator::default(),
        );
        let order = find(&artifacts, "Order.sql");
        assert!(order.contains("\"buyer\" INTEGER,"));
        assert!(!order.contains("\"lines\""));
        assert!(order.contains("\"codes\" TEXT"));
        assert!(order.contains("\"status\" INTEGER DEFAULT 5 CHECK (\"status\" IN (0, 5, -1))"));
        assert!(order.contains("\"note\" TEXT DEFAULT 'it''s'"));
        assert!(order.contains("FOREIGN KEY (\"buyer\") REFERENCES \"Customer\" (\"id\")"));

        let line = find(&artifacts, "Line.sql");
        assert!(line.contains("FOREIGN KEY (\"OrderId\") REFERENCES \"Order\" (\"id\")"));

        let schema = find(&artifacts, "schema.sql");
        let customer = schema.find("\"Customer\" (").unwrap();
        let order = schema.find("\"Order\" (").unwrap();
        let line = schema.find("\"Line\" (").unwrap();
        assert!(customer < order && order < line);
    }

    #[test]
    fn test_persistence_statements() {
        let (_, artifacts) = compose(
            "struct Pet { string: name; int32: age; }",
            SqlGenerator::new(Dialect::PostgreSQL, false),
        );
        let pet = find(&artifacts, "Pet.sql");
        assert!(pet.contains("-- requires: schemagen_store"));
        assert!(pet.contains("-- name: insert\nINSERT INTO \"Pet\" (\"name\", \"age\") VALUES ($1, $2);"));
        assert!(pet.contains("-- name: update\nUPDATE \"Pet\" SET \"name\" = $1, \"age\" = $2 WHERE \"id\" = $3;"));
        assert!(pet.contains("-- name: delete\nDELETE FROM \"Pet\" WHERE \"id\" = $1;"));
        assert!(pet.contains("-- name: load_by_id\nSELECT \"name\", \"age\", \"id\" FROM \"Pet\" WHERE \"id\" = $1;"));
        assert!(pet.contains("BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY"));
    }

    #[test]
    fn test_powerset_queries() {
        let source = "struct Parent { array<Child>: kids; } struct Child { string: a; int8: b; }";
        let (model, artifacts) = compose(source, SqlGenerator::new(Dialect::MySQL, true));
        // Child: a, b, ParentId
        assert_eq!(powerset_query_count(&model), 7);
        let queries = find(&artifacts, "Child_queries.sql");
        assert_eq!(queries.matches("SELECT ").count(), 7);
        assert!(queries.contains("-- name: find_by_a_and_b_and_parent_id\n"));
        assert!(queries.contains("WHERE `a` = ? AND `b` = ? AND `ParentId` = ?;"));
        assert!(!artifacts.iter().any(|a| a.path.to_str() == Some("Parent_queries.sql")));

        let (_, artifacts) = compose(source, SqlGenerator::default());
        assert!(!artifacts.iter().any(|a| a.path.to_string_lossy().ends_with("_queries.sql")));
    }

    #[test]
    fn test_powerset_count_saturates() {
        assert_eq!(subsets(0), 0);
        assert_eq!(subsets(3), 7);
        assert_eq!(subsets(64), u64::MAX);
    }

    #[test]
    fn test_configure() {
        let mut generator = SqlGenerator::default();
        let mut args = GeneratorArgs::new();
        args.set("dialect", "postgres");
        args.set("powerset_queries", "true");
        generator.configure(&args).unwrap();
        assert_eq!(generator.dialect(), Dialect::PostgreSQL);
        assert!(generator.powerset_queries());

        args.set("dialect", "oracle");
        assert!(matches!(
            generator.configure(&args),
            Err(GeneratorError::InvalidArgument { .. })
        ));
    }
}
