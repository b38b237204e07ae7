//! Dependency graph resolver.
//!
//! Derivation edges run from a derived concept to each of its parents. All
//! traversals are iterative with an explicit visited set, so arbitrarily deep
//! derivation chains cannot overflow the stack and no node is expanded twice.

use formulator_dsl::parse_procedure;
use formulator_store::{Concept, ConceptId, ConceptSource, ConceptStore, DictTable, TableId};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Why a draft cannot be saved. Every issue is reported, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    #[error("name is empty")]
    EmptyName,

    #[error("another concept in table {table} is already named {name:?}")]
    DuplicateName { table: TableId, name: String },

    #[error("a derived concept needs at least one parent")]
    EmptyParents,

    #[error("parent {0} does not exist")]
    UnknownParent(ConceptId),

    #[error("a concept cannot be its own parent")]
    SelfReference,

    #[error("parent {0} depends on this concept")]
    CyclicParent(ConceptId),

    #[error("parent {0} is not affiliated with this concept's table")]
    IneligibleParent(ConceptId),

    #[error("no transformation procedure")]
    MissingProcedure,

    #[error("procedure does not parse: {0}")]
    InvalidProcedure(String),

    #[error("nothing changed")]
    Unchanged,

    #[error("original concepts keep their column name")]
    RenameOriginal,
}

/// Problem found by a whole-store audit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditIssue {
    #[error("concept {concept} lists missing parent {parent}")]
    DanglingParent {
        concept: ConceptId,
        parent: ConceptId,
    },

    #[error("concept {0} is on a dependency cycle")]
    Cycle(ConceptId),

    #[error("name {name:?} is used by {count} concepts in table {table}")]
    DuplicateName {
        table: TableId,
        name: String,
        count: usize,
    },

    #[error("derived concept {0} has no parents")]
    EmptyParents(ConceptId),

    #[error("derived concept {0} has no transform")]
    MissingTransform(ConceptId),

    #[error("original concept {concept} refers to missing column {column:?} of table {table}")]
    MissingColumn {
        concept: ConceptId,
        table: TableId,
        column: String,
    },

    #[error("concept {0} is an unnamed draft")]
    UnnamedConcept(ConceptId),
}

fn children_index(store: &ConceptStore) -> HashMap<&ConceptId, Vec<&ConceptId>> {
    let mut children: HashMap<&ConceptId, Vec<&ConceptId>> = HashMap::new();
    for concept in store.concepts() {
        for parent in concept.parent_ids() {
            children.entry(parent).or_default().push(&concept.id);
        }
    }
    children
}

/// Every concept that transitively depends on `id`, in breadth-first order.
pub fn descendants_of(store: &ConceptStore, id: &ConceptId) -> Vec<ConceptId> {
    let children = children_index(store);
    let mut visited: HashSet<&ConceptId> = HashSet::from([id]);
    let mut queue: VecDeque<&ConceptId> = VecDeque::from([id]);
    let mut out = Vec::new();

    while let Some(current) = queue.pop_front() {
        for &child in children.get(current).map(Vec::as_slice).unwrap_or(&[]) {
            if visited.insert(child) {
                out.push(child.clone());
                queue.push_back(child);
            }
        }
    }
    out
}

/// Every concept `id` transitively depends on, in breadth-first order.
pub fn ancestors_of(store: &ConceptStore, id: &ConceptId) -> Vec<ConceptId> {
    let mut visited: HashSet<&ConceptId> = HashSet::from([id]);
    let mut queue: VecDeque<&ConceptId> = VecDeque::from([id]);
    let mut out = Vec::new();

    while let Some(current) = queue.pop_front() {
        let Some(concept) = store.get(current) else {
            continue;
        };
        for parent in concept.parent_ids() {
            if visited.insert(parent) {
                out.push(parent.clone());
                queue.push_back(parent);
            }
        }
    }
    out
}

/// Committed concepts `concept` may take as parents: same affiliated table,
/// named, and neither the concept itself nor one of its descendants.
pub fn eligible_parents<'s>(store: &'s ConceptStore, concept: &Concept) -> Vec<&'s Concept> {
    let excluded: HashSet<ConceptId> = descendants_of(store, &concept.id).into_iter().collect();
    store
        .concepts()
        .iter()
        .filter(|c| c.table_ref == concept.table_ref)
        .filter(|c| c.id != concept.id && !c.is_draft())
        .filter(|c| !excluded.contains(&c.id))
        .collect()
}

/// Check a scratch concept against the committed store.
///
/// Returns every reason the concept cannot be committed; an empty list means
/// the save is legal. Never touches the store.
pub fn validate(store: &ConceptStore, concept: &Concept) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if concept.is_draft() {
        issues.push(ValidationIssue::EmptyName);
    } else {
        let name = concept.name.trim();
        let clash = store.concepts().iter().any(|other| {
            other.id != concept.id
                && other.table_ref == concept.table_ref
                && other.name.trim() == name
        });
        if clash {
            issues.push(ValidationIssue::DuplicateName {
                table: concept.table_ref.clone(),
                name: name.to_string(),
            });
        }
    }

    if concept.source == ConceptSource::Original {
        if let Some(committed) = store.get(&concept.id) {
            if committed.name != concept.name {
                issues.push(ValidationIssue::RenameOriginal);
            }
        }
    }

    if concept.source != ConceptSource::Derived {
        return issues;
    }

    let Some(transform) = concept.transform.as_ref() else {
        issues.push(ValidationIssue::MissingProcedure);
        issues.push(ValidationIssue::EmptyParents);
        return issues;
    };

    if transform.code.trim().is_empty() {
        issues.push(ValidationIssue::MissingProcedure);
    } else if let Err(e) = parse_procedure(&transform.code) {
        issues.push(ValidationIssue::InvalidProcedure(e.to_string()));
    }

    if transform.parent_ids.is_empty() {
        issues.push(ValidationIssue::EmptyParents);
    }

    let descendants: HashSet<ConceptId> = descendants_of(store, &concept.id).into_iter().collect();
    for parent_id in &transform.parent_ids {
        if parent_id == &concept.id {
            if !issues.contains(&ValidationIssue::SelfReference) {
                issues.push(ValidationIssue::SelfReference);
            }
            continue;
        }
        let Some(parent) = store.get(parent_id) else {
            issues.push(ValidationIssue::UnknownParent(parent_id.clone()));
            continue;
        };
        if descendants.contains(parent_id) {
            issues.push(ValidationIssue::CyclicParent(parent_id.clone()));
        } else if parent.table_ref != concept.table_ref || parent.is_draft() {
            issues.push(ValidationIssue::IneligibleParent(parent_id.clone()));
        }
    }

    issues
}

/// Audit the whole committed graph, e.g. after loading a hand-edited snapshot.
pub fn check_store(store: &ConceptStore) -> Vec<AuditIssue> {
    let mut issues = Vec::new();

    let mut names: HashMap<(&TableId, &str), usize> = HashMap::new();
    for concept in store.concepts() {
        if concept.is_draft() {
            issues.push(AuditIssue::UnnamedConcept(concept.id.clone()));
        } else {
            *names
                .entry((&concept.table_ref, concept.name.trim()))
                .or_default() += 1;
        }

        match concept.source {
            ConceptSource::Derived => match &concept.transform {
                None => issues.push(AuditIssue::MissingTransform(concept.id.clone())),
                Some(t) if t.parent_ids.is_empty() => {
                    issues.push(AuditIssue::EmptyParents(concept.id.clone()))
                }
                Some(_) => {}
            },
            ConceptSource::Original => {
                let missing = store
                    .table(&concept.table_ref)
                    .map_or(true, |t| !t.has_column(&concept.name));
                if missing {
                    issues.push(AuditIssue::MissingColumn {
                        concept: concept.id.clone(),
                        table: concept.table_ref.clone(),
                        column: concept.name.clone(),
                    });
                }
            }
            ConceptSource::Custom => {}
        }

        for parent in concept.parent_ids() {
            if !store.contains(parent) {
                issues.push(AuditIssue::DanglingParent {
                    concept: concept.id.clone(),
                    parent: parent.clone(),
                });
            }
        }
    }

    let mut duplicates: Vec<_> = names.into_iter().filter(|(_, n)| *n > 1).collect();
    duplicates.sort_by(|a, b| a.0.cmp(&b.0));
    for ((table, name), count) in duplicates {
        issues.push(AuditIssue::DuplicateName {
            table: table.clone(),
            name: name.to_string(),
            count,
        });
    }

    for id in concepts_on_cycles(store) {
        issues.push(AuditIssue::Cycle(id));
    }

    issues
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Active,
    Done,
}

/// Concepts closing a back edge during an iterative depth-first walk, in store
/// order.
fn concepts_on_cycles(store: &ConceptStore) -> Vec<ConceptId> {
    let mut marks: HashMap<&ConceptId, Mark> = HashMap::new();
    let mut flagged: HashSet<&ConceptId> = HashSet::new();

    for root in store.concepts() {
        if marks.contains_key(&root.id) {
            continue;
        }
        // (node, index of the next parent to visit)
        let mut stack: Vec<(&ConceptId, usize)> = vec![(&root.id, 0)];
        marks.insert(&root.id, Mark::Active);

        while let Some((node, next)) = stack.pop() {
            let parents = store.get(node).map(Concept::parent_ids).unwrap_or(&[]);
            if next < parents.len() {
                stack.push((node, next + 1));
                let parent = &parents[next];
                if !store.contains(parent) {
                    continue;
                }
                match marks.get(parent) {
                    None => {
                        marks.insert(parent, Mark::Active);
                        stack.push((parent, 0));
                    }
                    Some(Mark::Active) => {
                        flagged.insert(parent);
                    }
                    Some(Mark::Done) => {}
                }
            } else {
                marks.insert(node, Mark::Done);
            }
        }
    }

    store
        .concepts()
        .iter()
        .filter(|c| flagged.contains(&c.id))
        .map(|c| c.id.clone())
        .collect()
}

/// Whether `concept` can be shown while `table` is in focus: its own name is
/// a column (original, custom) or all of its parents' names are (derived).
pub fn available_in_table(store: &ConceptStore, concept: &Concept, table: &DictTable) -> bool {
    match concept.source {
        ConceptSource::Original | ConceptSource::Custom => table.has_column(&concept.name),
        ConceptSource::Derived => concept.parent_ids().iter().all(|id| {
            store
                .get(id)
                .is_some_and(|parent| table.has_column(&parent.name))
        }),
    }
}
