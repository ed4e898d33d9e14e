use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::ast::*;
use crate::lexer::{LexError, Lexer, SourcePosition, Token};

/// File extensions picked up when reading a schema directory.
pub const SCHEMA_EXTENSIONS: [&str; 2] = ["schema", "schemaLang"];

/// Words that can never name a struct, enum or member type.
const KEYWORDS: [&str; 5] = ["struct", "enum", "include", "config", "array"];

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("{position}: unexpected `{found}`, expected {expected}")]
    Unexpected {
        position: SourcePosition,
        found: String,
        expected: String,
    },
    #[error("{file}: unexpected end of input, expected {expected}")]
    UnexpectedEof { file: String, expected: String },
    #[error("{position}: {message}")]
    Invalid {
        position: SourcePosition,
        message: String,
    },
    #[error("{position}: include cycle through {}", path.display())]
    IncludeCycle {
        position: SourcePosition,
        path: PathBuf,
    },
    #[error("{position}: cannot include {}: {source}", path.display())]
    Include {
        position: SourcePosition,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to walk schema directory: {0}")]
    Walk(#[from] walkdir::Error),
}

impl ParseError {
    fn invalid(token: &Token, message: impl Into<String>) -> Self {
        Self::Invalid {
            position: token.position.clone(),
            message: message.into(),
        }
    }

    fn unexpected(token: &Token, expected: impl Into<String>) -> Self {
        Self::Unexpected {
            position: token.position.clone(),
            found: token.to_string(),
            expected: expected.into(),
        }
    }
}

/// Tokens of one file and a cursor into them.
struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
    file: Arc<str>,
    dir: PathBuf,
}

impl TokenStream {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn check(&self, text: &str) -> bool {
        matches!(self.peek(), Some(tok) if *tok == text)
    }

    fn eof(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedEof {
            file: self.file.to_string(),
            expected: expected.to_string(),
        }
    }

    fn advance(&mut self, expected: &str) -> Result<Token, ParseError> {
        let tok = self.tokens.get(self.pos).cloned().ok_or_else(|| self.eof(expected))?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, text: &str) -> Result<Token, ParseError> {
        let expected = format!("`{text}`");
        let tok = self.advance(&expected)?;
        if tok == text {
            Ok(tok)
        } else {
            Err(ParseError::unexpected(&tok, expected))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<Token, ParseError> {
        let tok = self.advance(what)?;
        if is_identifier(&tok) {
            Ok(tok)
        } else {
            Err(ParseError::unexpected(&tok, what))
        }
    }

    fn expect_integer<T: FromStr>(&mut self, what: &str) -> Result<T, ParseError> {
        let tok = self.advance(what)?;
        if tok.literal {
            return Err(ParseError::unexpected(&tok, what));
        }
        tok.text
            .parse()
            .map_err(|_| ParseError::unexpected(&tok, what))
    }
}

fn is_identifier(tok: &Token) -> bool {
    let mut chars = tok.text.chars();
    !tok.literal
        && chars
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Recursive-descent reader that accumulates every file it reads, and
/// every file those include, into one [`ProgramModel`].
#[derive(Default)]
pub struct Parser {
    model: ProgramModel,
    /// Files currently being read, innermost last.
    reading: Vec<PathBuf>,
    /// Files fully read.
    read: BTreeSet<PathBuf>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(&self) -> &ProgramModel {
        &self.model
    }

    pub fn into_model(self) -> ProgramModel {
        self.model
    }

    /// Reads a schema file and everything it includes. A file that was
    /// already read is skipped.
    pub fn read_file(&mut self, path: &Path) -> Result<(), ParseError> {
        let canonical = canonicalize(path)?;
        if self.read.contains(&canonical) {
            warn!(file = %path.display(), "schema file already read, skipping");
            return Ok(());
        }
        self.read_canonical(path, canonical)
    }

    fn read_canonical(&mut self, path: &Path, canonical: PathBuf) -> Result<(), ParseError> {
        debug!(file = %path.display(), "reading schema file");
        let source = fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.reading.push(canonical);
        let result = self.parse_source(&source, path);
        if let Some(done) = self.reading.pop() {
            self.read.insert(done);
        }
        result
    }

    /// Parses schema text as if it were the contents of `file`. Includes
    /// resolve relative to the directory of `file`.
    pub fn parse_source(&mut self, source: &str, file: &Path) -> Result<(), ParseError> {
        let name: Arc<str> = Arc::from(file.display().to_string());
        let tokens = Lexer::new(source, Arc::clone(&name)).tokenize()?;
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut stream = TokenStream {
            tokens,
            pos: 0,
            file: name,
            dir,
        };
        self.announce(&stream.tokens);
        self.parse_stream(&mut stream)
    }

    /// Registers the struct/enum names of a file without parsing it, so
    /// files read earlier may use them as member types.
    pub fn announce_file(&mut self, path: &Path) -> Result<(), ParseError> {
        let source = fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let tokens = Lexer::new(&source, path.display().to_string()).tokenize()?;
        self.announce(&tokens);
        Ok(())
    }

    fn announce(&mut self, tokens: &[Token]) {
        for pair in tokens.windows(2) {
            if (pair[0] == "struct" || pair[0] == "enum")
                && is_identifier(&pair[1])
                && !self.model.is_declared(&pair[1].text)
            {
                self.model.pending_types.insert(pair[1].text.clone());
            }
        }
    }

    fn parse_stream(&mut self, stream: &mut TokenStream) -> Result<(), ParseError> {
        while let Some(tok) = stream.peek() {
            if *tok == "include" {
                self.parse_include(stream)?;
            } else if *tok == "struct" {
                self.parse_struct(stream)?;
            } else if *tok == "enum" {
                self.parse_enum(stream)?;
            } else if *tok == "config" {
                skip_config(stream)?;
            } else {
                return Err(ParseError::unexpected(
                    tok,
                    "`include`, `struct`, `enum` or `config`",
                ));
            }
        }
        Ok(())
    }

    fn parse_include(&mut self, stream: &mut TokenStream) -> Result<(), ParseError> {
        let keyword = stream.expect("include")?;
        let mut raw = String::new();
        loop {
            let tok = stream.advance("`;` after include path")?;
            if tok == ";" {
                break;
            }
            raw.push_str(&tok.text);
        }
        if raw.is_empty() {
            return Err(ParseError::invalid(&keyword, "include without a path"));
        }

        let path = resolve_include(&stream.dir, &raw);
        let canonical = match fs::canonicalize(&path) {
            Ok(canonical) => canonical,
            Err(source) => {
                return Err(ParseError::Include {
                    position: keyword.position,
                    path,
                    source,
                });
            }
        };
        if self.reading.contains(&canonical) {
            return Err(ParseError::IncludeCycle {
                position: keyword.position,
                path,
            });
        }
        if self.read.contains(&canonical) {
            debug!(file = %path.display(), "include already read");
            return Ok(());
        }
        debug!(from = %stream.file, file = %path.display(), "resolving include");
        self.read_canonical(&path, canonical)
    }

    fn check_new_entity(&self, name: &Token) -> Result<(), ParseError> {
        if ScalarKind::from_keyword(&name.text).is_some() || KEYWORDS.contains(&name.text.as_str())
        {
            return Err(ParseError::invalid(
                name,
                format!("`{}` is reserved and cannot name a struct or enum", name.text),
            ));
        }
        if self.model.is_declared(&name.text) {
            return Err(ParseError::invalid(
                name,
                format!("`{}` is already declared", name.text),
            ));
        }
        Ok(())
    }

    fn parse_struct(&mut self, stream: &mut TokenStream) -> Result<(), ParseError> {
        stream.expect("struct")?;
        let name = stream.expect_ident("struct name")?;
        self.check_new_entity(&name)?;
        stream.expect("{")?;

        let mut def = StructDefinition::new(name.text.clone());
        def.position = Some(name.position.clone());

        while !stream.check("}") {
            if stream.peek().is_none() {
                return Err(stream.eof("member variable or `}`"));
            }
            let (ident, member) = self.parse_member(stream)?;
            if !def.add_member(member) {
                return Err(ParseError::invalid(
                    &ident,
                    format!("`{}` is declared twice in `{}`", ident.text, def.identifier),
                ));
            }
        }
        stream.expect("}")?;
        skip_semicolon(stream);

        def.finalize();
        debug!(name = %def.identifier, members = def.member_variables.len(), "parsed struct");
        self.model.pending_types.remove(&def.identifier);
        self.model.structs.push(def);
        Ok(())
    }

    fn parse_type(&self, stream: &mut TokenStream) -> Result<TypeDefinition, ParseError> {
        let tok = stream.advance("type")?;
        if tok == "array" {
            stream.expect("<")?;
            let elem = self.parse_type(stream)?;
            stream.expect(">")?;
            return Ok(TypeDefinition::Array(Box::new(elem)));
        }
        if !is_identifier(&tok) {
            return Err(ParseError::unexpected(&tok, "type"));
        }
        if let Some(kind) = ScalarKind::from_keyword(&tok.text) {
            return Ok(TypeDefinition::Scalar(kind));
        }
        if self.model.is_type_name(&tok.text) {
            return Ok(TypeDefinition::Named(tok.text));
        }
        Err(ParseError::invalid(&tok, format!("unknown type `{}`", tok.text)))
    }

    fn parse_member(
        &self,
        stream: &mut TokenStream,
    ) -> Result<(Token, MemberVariableDefinition), ParseError> {
        let ty = self.parse_type(stream)?;
        stream.expect(":")?;
        let ident = stream.expect_ident("member name")?;
        if ident.text == PRIMARY_KEY_FIELD {
            return Err(ParseError::invalid(
                &ident,
                "`id` is reserved for the synthesized primary key",
            ));
        }

        let mut member = MemberVariableDefinition::new(Owner::Schema, ty, ident.text.clone());
        member.position = Some(ident.position.clone());

        loop {
            let tok = stream.advance("`:` or `;`")?;
            if tok == ";" {
                break;
            }
            if tok != ":" {
                return Err(ParseError::unexpected(&tok, "`:` or `;`"));
            }
            parse_modifier(stream, &mut member)?;
        }
        Ok((ident, member))
    }

    fn parse_enum(&mut self, stream: &mut TokenStream) -> Result<(), ParseError> {
        stream.expect("enum")?;
        let name = stream.expect_ident("enum name")?;
        self.check_new_entity(&name)?;
        stream.expect("{")?;

        let mut def = EnumDefinition::new(name.text.clone());
        def.position = Some(name.position.clone());
        let mut last: Option<i64> = None;

        while !stream.check("}") {
            let value_name = stream.expect_ident("enum value or `}`")?;
            if value_name.text == UNKNOWN_VALUE {
                return Err(ParseError::invalid(
                    &value_name,
                    "`Unknown` is reserved for the synthesized fallback value",
                ));
            }
            let value = if stream.check("=") {
                stream.advance("`=`")?;
                stream.expect_integer::<i64>("integer")?
            } else {
                match last {
                    None => 0,
                    Some(prev) => prev.checked_add(1).ok_or_else(|| {
                        ParseError::invalid(&value_name, "implicit enum value overflows")
                    })?,
                }
            };
            if !def.add_value(value_name.text.clone(), value) {
                return Err(ParseError::invalid(
                    &value_name,
                    format!("`{}` is declared twice in `{}`", value_name.text, def.identifier),
                ));
            }
            last = Some(value);

            if stream.check(",") {
                stream.advance("`,`")?;
            } else if !stream.check("}") {
                return Err(match stream.peek() {
                    Some(tok) => ParseError::unexpected(tok, "`,` or `}`"),
                    None => stream.eof("`,` or `}`"),
                });
            }
        }
        stream.expect("}")?;
        skip_semicolon(stream);

        def.finalize();
        debug!(name = %def.identifier, values = def.values.len(), "parsed enum");
        self.model.pending_types.remove(&def.identifier);
        self.model.enums.push(def);
        Ok(())
    }
}

fn parse_modifier(
    stream: &mut TokenStream,
    member: &mut MemberVariableDefinition,
) -> Result<(), ParseError> {
    let tok = stream.expect_ident("modifier")?;
    match tok.text.as_str() {
        "required" => member.required = true,
        "optional" => member.required = false,
        "unique" => member.unique = true,
        "auto_increment" => member.auto_increment = true,
        "primary_key" => member.primary_key = true,
        "min_items" | "max_items" => {
            if !member.ty.is_array() {
                return Err(ParseError::invalid(
                    &tok,
                    format!("`{}` only applies to array members", tok.text),
                ));
            }
            stream.expect("(")?;
            let n = stream.expect_integer::<u64>("non-negative integer")?;
            stream.expect(")")?;
            if tok.text == "min_items" {
                member.min_items = Some(n);
            } else {
                member.max_items = Some(n);
            }
        }
        "reference" => {
            let reference = if stream.check("(") {
                stream.advance("`(`")?;
                let target_struct = stream.expect_ident("struct name")?.text;
                stream.expect(".")?;
                let target_field = stream.expect_ident("field name")?.text;
                stream.expect(")")?;
                Reference {
                    target_struct,
                    target_field,
                }
            } else if let Some(target) = member.ty.named() {
                Reference {
                    target_struct: target.to_string(),
                    target_field: PRIMARY_KEY_FIELD.to_string(),
                }
            } else {
                return Err(ParseError::invalid(
                    &tok,
                    "`reference` without a target needs a struct-typed member",
                ));
            };
            member.reference = Some(reference);
        }
        "description" => {
            stream.expect("(")?;
            member.description = Some(stream.advance("description text")?.text);
            stream.expect(")")?;
        }
        "default" => {
            stream.expect("(")?;
            member.default_value = Some(default_value(stream, &tok)?);
            stream.expect(")")?;
        }
        _ => {
            return Err(ParseError::invalid(
                &tok,
                format!("unknown modifier `{}`", tok.text),
            ));
        }
    }
    Ok(())
}

/// A quoted literal, or the unquoted tokens up to `)` joined together so
/// `1.5` reads as written.
fn default_value(stream: &mut TokenStream, keyword: &Token) -> Result<String, ParseError> {
    if stream.peek().is_some_and(|tok| tok.literal) {
        return Ok(stream.advance("default value")?.text);
    }
    let mut value = String::new();
    while !stream.check(")") {
        let tok = stream.advance("`)` after default value")?;
        if tok.literal || tok == ";" {
            return Err(ParseError::unexpected(&tok, "`)`"));
        }
        value.push_str(&tok.text);
    }
    if value.is_empty() {
        return Err(ParseError::invalid(keyword, "`default` without a value"));
    }
    Ok(value)
}

/// `config { ... }` blocks are opaque to the compiler.
fn skip_config(stream: &mut TokenStream) -> Result<(), ParseError> {
    stream.expect("config")?;
    stream.expect("{")?;
    let mut depth = 1usize;
    while depth > 0 {
        let tok = stream.advance("`}` closing config block")?;
        if tok == "{" {
            depth += 1;
        } else if tok == "}" {
            depth -= 1;
        }
    }
    Ok(())
}

fn skip_semicolon(stream: &mut TokenStream) {
    if stream.check(";") {
        stream.pos += 1;
    }
}

fn resolve_include(dir: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    dir.join(raw.strip_prefix("./").unwrap_or(raw))
}

fn canonicalize(path: &Path) -> Result<PathBuf, ParseError> {
    fs::canonicalize(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Lists the schema files of a directory in a stable order.
pub fn schema_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, ParseError> {
    let mut walker = WalkDir::new(dir).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }
    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        let is_schema = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SCHEMA_EXTENSIONS.contains(&e));
        if entry.file_type().is_file() && is_schema {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Reads every schema file in `dir` into one model. Names declared in any
/// of the files are usable as member types in all of them.
pub fn load_directory(dir: &Path, recursive: bool) -> Result<ProgramModel, ParseError> {
    let files = schema_files(dir, recursive)?;
    debug!(dir = %dir.display(), files = files.len(), "loading schema directory");
    let mut parser = Parser::new();
    for file in &files {
        parser.announce_file(file)?;
    }
    for file in &files {
        parser.read_file(file)?;
    }
    Ok(parser.into_model())
}

/// Parses in-memory schema text that has no includes.
pub fn parse_str(source: &str) -> Result<ProgramModel, ParseError> {
    let mut parser = Parser::new();
    parser.parse_source(source, Path::new("<input>"))?;
    Ok(parser.into_model())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err_text(source: &str) -> String {
        parse_str(source).unwrap_err().to_string()
    }

    #[test]
    fn test_parse_struct() {
        let model = parse_str("struct Node { string: name: required; }").unwrap();
        assert_eq!(model.structs.len(), 1);
        let node = &model.structs[0];
        assert_eq!(node.identifier, "Node");
        assert_eq!(node.member_variables.len(), 2);

        let name = &node.member_variables[0];
        assert_eq!(name.identifier, "name");
        assert_eq!(name.ty, TypeDefinition::Scalar(ScalarKind::String));
        assert!(name.required);

        let id = &node.member_variables[1];
        assert_eq!(id.identifier, "id");
        assert_eq!(id.ty, TypeDefinition::Scalar(ScalarKind::Int64));
        assert!(id.primary_key && id.auto_increment && id.required && id.unique);
    }

    #[test]
    fn test_parse_enum() {
        let model = parse_str("enum Color { Red, Green, Blue = 5 }").unwrap();
        let values: Vec<(&str, i64)> = model.enums[0]
            .values
            .iter()
            .map(|v| (v.name.as_str(), v.value))
            .collect();
        assert_eq!(
            values,
            vec![("Red", 0), ("Green", 1), ("Blue", 5), ("Unknown", -1)]
        );
    }

    #[test]
    fn test_enum_sparse_and_negative_values() {
        let model = parse_str("enum E { A = 10, B, C = -3, D, }").unwrap();
        let e = &model.enums[0];
        assert_eq!(e.value("B"), Some(11));
        assert_eq!(e.value("D"), Some(-2));
        assert_eq!(e.values.last().unwrap().name, "Unknown");
    }

    #[test]
    fn test_parse_modifiers() {
        let model = parse_str(
            r#"
            struct Parent {
                array<Child>: children: min_items(1): max_items(10): description("kids; all of them");
                string: nick: optional: unique: default("anon");
            }
            struct Child {
                Parent: parent: reference;
                int64: owner: reference(Parent.id);
            }
            "#,
        )
        .unwrap();
        let parent = model.struct_by_name("Parent").unwrap();
        let children = parent.member("children").unwrap();
        assert_eq!(
            children.ty,
            TypeDefinition::Array(Box::new(TypeDefinition::Named("Child".into())))
        );
        assert_eq!(children.min_items, Some(1));
        assert_eq!(children.max_items, Some(10));
        assert_eq!(children.description.as_deref(), Some("kids; all of them"));

        let nick = parent.member("nick").unwrap();
        assert!(nick.unique && !nick.required);
        assert_eq!(nick.default_value.as_deref(), Some("anon"));

        let child = model.struct_by_name("Child").unwrap();
        let parent_ref = child.member("parent").unwrap().reference.clone().unwrap();
        assert_eq!(parent_ref.to_string(), "Parent.id");
        let owner_ref = child.member("owner").unwrap().reference.clone().unwrap();
        assert_eq!(owner_ref.target_struct, "Parent");
    }

    #[test]
    fn test_default_values() {
        let model = parse_str(
            r#"struct M {
                double: ratio: default(1.5);
                int32: floor: default(-3);
                string: label: default("a)b");
            }"#,
        )
        .unwrap();
        let m = &model.structs[0];
        let default = |name: &str| m.member(name).unwrap().default_value.clone();
        assert_eq!(default("ratio").as_deref(), Some("1.5"));
        assert_eq!(default("floor").as_deref(), Some("-3"));
        assert_eq!(default("label").as_deref(), Some("a)b"));

        assert!(err_text("struct M { double: r: default(); }").contains("without a value"));
        assert!(err_text("struct M { double: r: default(1.5; }").contains("expected `)`"));
    }

    #[test]
    fn test_forward_reference_in_same_file() {
        let model = parse_str("struct A { B: b; } struct B { string: s; }").unwrap();
        assert_eq!(
            model.structs[0].member_variables[0].ty,
            TypeDefinition::Named("B".into())
        );
        assert!(model.pending_types.is_empty());
    }

    #[test]
    fn test_array_requires_element_type() {
        assert!(err_text("struct A { array: xs; }").contains("expected `<`"));
        assert!(err_text("struct A { array<>: xs; }").contains("expected type"));
        assert!(parse_str("struct A { array<int32>: xs; }").is_ok());
        assert!(parse_str("enum E { X } struct A { array<E>: xs; }").is_ok());
    }

    #[test]
    fn test_errors_carry_position() {
        let err = err_text("struct A {\n  string: name: requird;\n}");
        assert_eq!(err, "<input>:2:17: unknown modifier `requird`");
    }

    #[test]
    fn test_reserved_names() {
        assert!(err_text("struct A { int64: id; }").contains("`id` is reserved"));
        assert!(err_text("enum E { Unknown }").contains("`Unknown` is reserved"));
        assert!(err_text("struct string { }").contains("reserved"));
    }

    #[test]
    fn test_duplicates() {
        assert!(err_text("struct A { } struct A { }").contains("already declared"));
        assert!(err_text("struct A { bool: x; bool: x; }").contains("declared twice"));
        assert!(err_text("enum E { X, X }").contains("declared twice"));
    }

    #[test]
    fn test_unknown_type() {
        assert!(err_text("struct A { Missing: m; }").contains("unknown type `Missing`"));
    }

    #[test]
    fn test_item_bounds_need_array() {
        assert!(err_text("struct A { int32: n: min_items(1); }").contains("only applies to array"));
    }

    #[test]
    fn test_config_block_is_skipped() {
        let model = parse_str("config { nested { x = 1; } } struct A { bool: b; }").unwrap();
        assert_eq!(model.structs.len(), 1);
    }

    #[test]
    fn test_unexpected_eof() {
        let err = parse_str("struct A { bool: b;").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_lex_error_surfaces() {
        let err = parse_str("struct A { string: s: description(\"open); }").unwrap_err();
        assert!(matches!(err, ParseError::Lex(_)));
    }

    #[test]
    fn test_resolve_include() {
        let dir = Path::new("/schemas/app");
        assert_eq!(
            resolve_include(dir, "./common.schema"),
            PathBuf::from("/schemas/app/common.schema")
        );
        assert_eq!(
            resolve_include(dir, "../shared/a.schema"),
            PathBuf::from("/schemas/app/../shared/a.schema")
        );
        assert_eq!(
            resolve_include(dir, "/abs/b.schema"),
            PathBuf::from("/abs/b.schema")
        );
    }
}
