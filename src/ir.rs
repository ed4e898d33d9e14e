//! Struct-to-struct reference graph, derived from a parsed model.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::ProgramModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// The member's type names the target struct.
    Field,
    /// The member is an array of the target struct.
    Array,
    /// A non-struct member with `reference(Target.field)`.
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub field: String,
    pub to: String,
    pub kind: EdgeKind,
    /// The member carries a `reference` modifier.
    pub explicit_reference: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceGraph {
    pub nodes: Vec<String>,
    pub edges: Vec<Edge>,
}

impl ReferenceGraph {
    pub fn from_model(model: &ProgramModel) -> Self {
        let nodes: Vec<String> = model.struct_names();
        let mut edges = Vec::new();

        for s in &model.structs {
            for m in &s.member_variables {
                let typed = m
                    .ty
                    .referenced_name()
                    .filter(|name| model.struct_by_name(name).is_some());
                if let Some(target) = typed {
                    edges.push(Edge {
                        from: s.identifier.clone(),
                        field: m.identifier.clone(),
                        to: target.to_string(),
                        kind: if m.ty.is_array() {
                            EdgeKind::Array
                        } else {
                            EdgeKind::Field
                        },
                        explicit_reference: m.reference.is_some(),
                    });
                } else if let Some(r) = &m.reference {
                    if model.struct_by_name(&r.target_struct).is_some() {
                        edges.push(Edge {
                            from: s.identifier.clone(),
                            field: m.identifier.clone(),
                            to: r.target_struct.clone(),
                            kind: EdgeKind::Reference,
                            explicit_reference: true,
                        });
                    }
                }
            }
        }

        Self { nodes, edges }
    }

    pub fn edges_from<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == node)
    }

    /// Pairs of direct `Field` edges `A -> B` and `B -> A` between two
    /// distinct structs, each pair reported once.
    pub fn mutual_pairs(&self) -> Vec<(&Edge, &Edge)> {
        let direct: Vec<&Edge> = self
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Field && e.from != e.to)
            .collect();

        let mut pairs = Vec::new();
        for (i, a) in direct.iter().enumerate() {
            for b in &direct[i + 1..] {
                if a.from == b.to && a.to == b.from {
                    pairs.push((*a, *b));
                }
            }
        }
        pairs
    }

    /// Groups structs into levels so that every struct comes after the
    /// structs it stores a key of. Level 0 holds structs with no such
    /// dependency; structs caught in a cycle go on a final level.
    pub fn levels(&self) -> Vec<Vec<String>> {
        if self.nodes.is_empty() {
            return vec![];
        }

        // child -> parents whose key the child stores
        let mut parents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for node in &self.nodes {
            parents.insert(node.as_str(), BTreeSet::new());
        }
        for edge in &self.edges {
            if edge.from == edge.to {
                continue;
            }
            // An array of structs is stored as a key on the element.
            let (child, parent) = match edge.kind {
                EdgeKind::Array => (edge.to.as_str(), edge.from.as_str()),
                EdgeKind::Field | EdgeKind::Reference => (edge.from.as_str(), edge.to.as_str()),
            };
            if let Some(deps) = parents.get_mut(child) {
                deps.insert(parent);
            }
        }

        let mut levels: BTreeMap<&str, usize> = BTreeMap::new();
        for (node, deps) in &parents {
            if deps.is_empty() {
                levels.insert(*node, 0);
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for (node, deps) in &parents {
                if levels.contains_key(node) {
                    continue;
                }
                let parent_levels: Vec<usize> =
                    deps.iter().filter_map(|p| levels.get(p).copied()).collect();
                if parent_levels.len() == deps.len() {
                    let level = parent_levels.iter().max().copied().unwrap_or(0) + 1;
                    levels.insert(*node, level);
                    changed = true;
                }
            }
        }

        let max_level = levels.values().copied().max().unwrap_or(0);
        let cyclic = parents.keys().any(|n| !levels.contains_key(n));
        for node in parents.keys() {
            levels.entry(*node).or_insert(max_level + 1);
        }

        let rows = max_level + if cyclic { 2 } else { 1 };
        let mut out: Vec<Vec<String>> = vec![vec![]; rows];
        for (node, level) in levels {
            out[level].push(node.to_string());
        }
        out.into_iter().filter(|r| !r.is_empty()).collect()
    }

    /// Structs in level order, alphabetical within a level.
    pub fn ordered(&self) -> Vec<String> {
        self.levels().into_iter().flatten().collect()
    }
}
