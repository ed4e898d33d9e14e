//! Serializer for converting a model back to schema text.

use crate::ast::{
    EnumDefinition, MemberVariableDefinition, ProgramModel, ScalarKind, StructDefinition,
    TypeDefinition,
};
use crate::lexer::PUNCTUATION;
use crate::measure::TextMetrics;

/// Serialize the schema-declared part of a model.
///
/// Synthesized members (`id`, `Unknown`) and anything a generator injected
/// are left out, so parsing the output rebuilds the same declarations.
pub fn serialize(model: &ProgramModel) -> String {
    let metrics = TextMetrics::default();
    let mut output = String::new();

    for (i, e) in model.enums.iter().enumerate() {
        if i > 0 {
            output.push('\n');
        }
        serialize_enum(&mut output, &metrics, e);
    }

    for (i, s) in model.structs.iter().enumerate() {
        if i > 0 || !model.enums.is_empty() {
            output.push('\n');
        }
        serialize_struct(&mut output, &metrics, s);
    }

    output
}

fn serialize_enum(output: &mut String, metrics: &TextMetrics, e: &EnumDefinition) {
    output.push_str(&format!("enum {} {{\n", e.identifier));

    let rows: Vec<Vec<String>> = e
        .declared_values()
        .map(|v| vec![v.name.clone(), format!("= {},", v.value)])
        .collect();
    let widths = metrics.column_widths(&rows);
    for row in &rows {
        output.push_str(&metrics.line(row, &widths));
        output.push('\n');
    }

    output.push_str("}\n");
}

fn serialize_struct(output: &mut String, metrics: &TextMetrics, s: &StructDefinition) {
    output.push_str(&format!("struct {} {{\n", s.identifier));

    let rows: Vec<Vec<String>> = s
        .member_variables
        .iter()
        .filter(|m| m.owner.is_schema() && !m.is_synthesized_key())
        .map(|m| vec![format!("{}:", m.ty), member_tail(m)])
        .collect();
    let widths = metrics.column_widths(&rows);
    for row in &rows {
        output.push_str(&metrics.line(row, &widths));
        output.push('\n');
    }

    output.push_str("}\n");
}

/// Member name and its modifiers, up to and including the `;`.
fn member_tail(m: &MemberVariableDefinition) -> String {
    let mut out = m.identifier.clone();

    // Order: required, unique, auto_increment, primary_key, reference,
    // min_items, max_items, default, description
    if m.required {
        out.push_str(": required");
    }
    if m.unique {
        out.push_str(": unique");
    }
    if m.auto_increment {
        out.push_str(": auto_increment");
    }
    if m.primary_key {
        out.push_str(": primary_key");
    }
    if let Some(r) = &m.reference {
        out.push_str(&format!(": reference({r})"));
    }
    if let Some(n) = m.min_items {
        out.push_str(&format!(": min_items({n})"));
    }
    if let Some(n) = m.max_items {
        out.push_str(&format!(": max_items({n})"));
    }
    if let Some(value) = &m.default_value {
        let textual = matches!(m.ty, TypeDefinition::Scalar(ScalarKind::String | ScalarKind::Char));
        if textual || needs_quotes(value) {
            out.push_str(&format!(": default({})", quote(value)));
        } else {
            out.push_str(&format!(": default({value})"));
        }
    }
    if let Some(desc) = &m.description {
        out.push_str(&format!(": description({})", quote(desc)));
    }

    out.push(';');
    out
}

/// Whether a bare token would lex differently from `value`.
fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value.starts_with("//")
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\' || PUNCTUATION.contains(&c))
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    #[test]
    fn test_serialize_struct() {
        let model = parse_str(
            r#"
            struct Parent {
                string: name: required: description("Shown \"as is\"");
                array<Child>: children: min_items(1): max_items(9);
            }
            struct Child { int64: owner: reference(Parent.id); string: label: default(none); }
            "#,
        )
        .unwrap();
        assert_eq!(
            serialize(&model),
            concat!(
                "struct Parent {\n",
                "    string:       name: required: description(\"Shown \\\"as is\\\"\");\n",
                "    array<Child>: children: min_items(1): max_items(9);\n",
                "}\n",
                "\n",
                "struct Child {\n",
                "    int64:  owner: reference(Parent.id);\n",
                "    string: label: default(\"none\");\n",
                "}\n",
            )
        );
    }

    #[test]
    fn test_serialize_enum() {
        let model = parse_str("enum Color { Red, Green, Blue = 5, }").unwrap();
        assert_eq!(
            serialize(&model),
            "enum Color {\n    Red   = 0,\n    Green = 1,\n    Blue  = 5,\n}\n"
        );
    }

    #[test]
    fn test_round_trip() {
        let source = r#"
            enum Level { Low = -5, High }
            struct Item {
                Level: level: default(High): description("How urgent; really");
                array<int8>: codes: unique;
                char: sep: default(",");
                Owner: owner: reference;
            }
            struct Owner { string: 名前: required; }
        "#;
        let first = parse_str(source).unwrap();
        let text = serialize(&first);
        let second = parse_str(&text).unwrap();
        assert_eq!(serialize(&second), text);

        let names = |m: &ProgramModel| -> Vec<Vec<String>> {
            m.structs
                .iter()
                .map(|s| s.member_variables.iter().map(|v| v.identifier.clone()).collect())
                .collect()
        };
        assert_eq!(names(&first), names(&second));
        assert_eq!(first.enums[0].values, second.enums[0].values);
        let item = second.struct_by_name("Item").unwrap();
        assert_eq!(item.member("sep").unwrap().default_value.as_deref(), Some(","));
        assert_eq!(
            item.member("owner").unwrap().reference.as_ref().unwrap().to_string(),
            "Owner.id"
        );
    }

    #[test]
    fn test_injected_members_are_skipped() {
        use crate::ast::Owner;
        let mut model = parse_str("struct A { bool: flag; }").unwrap();
        model.structs[0].add_member(MemberVariableDefinition::new(
            Owner::generator("sql"),
            TypeDefinition::Scalar(ScalarKind::Int64),
            "ParentId",
        ));
        assert_eq!(serialize(&model), "struct A {\n    bool: flag;\n}\n");
    }
}
