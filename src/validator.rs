//! Schema-wide checks run once every file and include has been read.

use std::fmt;

use crate::ast::{MemberVariableDefinition, ProgramModel, StructDefinition, TypeDefinition};
use crate::ir::ReferenceGraph;
use crate::lexer::SourcePosition;

/// Optional `file:line:column: ` prefix for a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location(pub Option<SourcePosition>);

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(pos) => write!(f, "{pos}: "),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error(
        "{at}`{struct_name}.{field}` embeds its own struct; mark it `reference` to store a link instead"
    )]
    SelfReference {
        at: Location,
        struct_name: String,
        field: String,
    },
    #[error(
        "`{a}.{a_field}` and `{b}.{b_field}` embed each other; add `reference` to one side, \
         either `{b}: {a_field}: reference;` in `{a}` or `{a}: {b_field}: reference;` in `{b}`"
    )]
    UnresolvedCycle {
        a: String,
        a_field: String,
        b: String,
        b_field: String,
    },
    #[error("{at}array member `{struct_name}.{field}` has no element type")]
    EmptyArrayElement {
        at: Location,
        struct_name: String,
        field: String,
    },
    #[error("{at}`{struct_name}.{field}` has unknown type `{type_name}`")]
    UnknownType {
        at: Location,
        struct_name: String,
        field: String,
        type_name: String,
    },
    #[error("{at}`{struct_name}.{field}` references unknown struct `{target}`")]
    UnknownReferenceStruct {
        at: Location,
        struct_name: String,
        field: String,
        target: String,
    },
    #[error("{at}`{struct_name}.{field}` references `{target}.{target_field}`, which `{target}` does not declare")]
    UnknownReferenceField {
        at: Location,
        struct_name: String,
        field: String,
        target: String,
        target_field: String,
    },
    #[error("{at}`{struct_name}.{field}` is marked `primary_key`; every struct already has the synthesized `id` key")]
    UserPrimaryKey {
        at: Location,
        struct_name: String,
        field: String,
    },
    #[error("{at}`{struct_name}.{field}` has min_items({min}) greater than max_items({max})")]
    InvalidItemBounds {
        at: Location,
        struct_name: String,
        field: String,
        min: u64,
        max: u64,
    },
}

/// Runs every check; the first failure wins.
pub fn validate(model: &ProgramModel) -> Result<(), ValidationError> {
    for s in &model.structs {
        for m in &s.member_variables {
            check_member(model, s, m)?;
        }
    }
    check_cycles(model)
}

fn check_member(
    model: &ProgramModel,
    s: &StructDefinition,
    m: &MemberVariableDefinition,
) -> Result<(), ValidationError> {
    let at = || Location(m.position.clone());
    let struct_name = || s.identifier.clone();
    let field = || m.identifier.clone();

    if let Some(TypeDefinition::Named(elem)) = m.ty.element() {
        if elem.is_empty() {
            return Err(ValidationError::EmptyArrayElement {
                at: at(),
                struct_name: struct_name(),
                field: field(),
            });
        }
    }

    if let Some(name) = m.ty.referenced_name() {
        if !model.is_declared(name) {
            return Err(ValidationError::UnknownType {
                at: at(),
                struct_name: struct_name(),
                field: field(),
                type_name: name.to_string(),
            });
        }
    }

    if m.ty.named() == Some(s.identifier.as_str()) && m.reference.is_none() {
        return Err(ValidationError::SelfReference {
            at: at(),
            struct_name: struct_name(),
            field: field(),
        });
    }

    if m.primary_key && !m.is_synthesized_key() {
        return Err(ValidationError::UserPrimaryKey {
            at: at(),
            struct_name: struct_name(),
            field: field(),
        });
    }

    if let (Some(min), Some(max)) = (m.min_items, m.max_items) {
        if min > max {
            return Err(ValidationError::InvalidItemBounds {
                at: at(),
                struct_name: struct_name(),
                field: field(),
                min,
                max,
            });
        }
    }

    if let Some(r) = &m.reference {
        let Some(target) = model.struct_by_name(&r.target_struct) else {
            return Err(ValidationError::UnknownReferenceStruct {
                at: at(),
                struct_name: struct_name(),
                field: field(),
                target: r.target_struct.clone(),
            });
        };
        if !target.has_member(&r.target_field) {
            return Err(ValidationError::UnknownReferenceField {
                at: at(),
                struct_name: struct_name(),
                field: field(),
                target: r.target_struct.clone(),
                target_field: r.target_field.clone(),
            });
        }
    }

    Ok(())
}

fn check_cycles(model: &ProgramModel) -> Result<(), ValidationError> {
    let graph = ReferenceGraph::from_model(model);
    for (a, b) in graph.mutual_pairs() {
        if !a.explicit_reference && !b.explicit_reference {
            return Err(ValidationError::UnresolvedCycle {
                a: a.from.clone(),
                a_field: a.field.clone(),
                b: b.from.clone(),
                b_field: b.field.clone(),
            });
        }
    }
    Ok(())
}
