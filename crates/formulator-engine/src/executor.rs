//! Transformation executor.
//!
//! Materializing a procedure:
//!
//! 1. collect the derived ancestors of its parents in dependency order
//!    (iterative post-order; a cycle is an error),
//! 2. pick one alignment table holding every originating column,
//! 3. compute each derived ancestor's column once, row by row,
//! 4. evaluate the procedure per row, recording the output or the error.
//!
//! Nothing here mutates the store, and the result depends only on its inputs.

use crate::{EngineError, Result};
use formulator_dsl::{parse_procedure, Procedure, Value as DslValue};
use formulator_store::{Concept, ConceptId, ConceptSource, ConceptStore, DictTable, TableId};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Bounds for one materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Successful rows after which evaluation stops.
    pub sample_limit: usize,
    /// Rows read from the alignment table, whatever the sample limit.
    pub max_scan_rows: usize,
    /// Interpreter steps per row.
    pub step_budget: u64,
}

impl Limits {
    pub fn rows(sample_limit: usize) -> Self {
        Self {
            sample_limit,
            ..Self::default()
        }
    }

    fn row_count(&self, available: usize) -> usize {
        self.scan_count(available).min(self.sample_limit)
    }

    fn scan_count(&self, available: usize) -> usize {
        available.min(self.max_scan_rows)
    }
}

impl Default for Limits {
    fn default() -> Self {
        let config = crate::EngineConfig::default();
        config.limits(config.preview_rows)
    }
}

/// One evaluated row: the parent values and the output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewRow {
    pub inputs: Vec<Option<Value>>,
    /// `None` when the procedure returned undefined or failed.
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Bounded, ordered result of materializing a procedure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub parent_ids: Vec<ConceptId>,
    pub parent_names: Vec<String>,
    /// Alignment table; `None` when every input is a custom value list.
    pub table: Option<TableId>,
    pub rows: Vec<PreviewRow>,
}

impl Preview {
    pub fn outputs(&self) -> impl Iterator<Item = Option<&Value>> + '_ {
        self.rows.iter().map(|r| r.output.as_ref())
    }

    pub fn failed_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.error.is_some()).count()
    }

    /// At least one row ran and every row failed.
    pub fn all_failed(&self) -> bool {
        !self.rows.is_empty() && self.failed_rows() == self.rows.len()
    }
}

/// Parent values lined up row by row on one alignment table.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedInputs {
    pub table: Option<TableId>,
    pub names: Vec<String>,
    /// One column per parent, each `row_count` long.
    pub columns: Vec<Vec<Option<Value>>>,
    pub row_count: usize,
}

impl AlignedInputs {
    /// Row `i` keyed by parent name; missing values are omitted.
    pub fn record(&self, i: usize) -> serde_json::Map<String, Value> {
        self.names
            .iter()
            .zip(&self.columns)
            .filter_map(|(name, col)| col.get(i).cloned().flatten().map(|v| (name.clone(), v)))
            .collect()
    }
}

/// Resolve and align the values of `parent_ids`, computing derived ancestors
/// first.
///
/// `affiliated` is the table the result concept belongs to; it is preferred
/// for alignment when it holds every originating column.
pub fn align_inputs(
    store: &ConceptStore,
    parent_ids: &[ConceptId],
    affiliated: Option<&TableId>,
    limits: &Limits,
) -> Result<AlignedInputs> {
    align_window(store, parent_ids, affiliated, limits, Limits::row_count)
}

fn align_window(
    store: &ConceptStore,
    parent_ids: &[ConceptId],
    affiliated: Option<&TableId>,
    limits: &Limits,
    window: fn(&Limits, usize) -> usize,
) -> Result<AlignedInputs> {
    let parents: Vec<&Concept> = parent_ids
        .iter()
        .map(|id| {
            store
                .get(id)
                .ok_or_else(|| EngineError::UnknownConcept(id.clone()))
        })
        .collect::<Result<_>>()?;
    let names: Vec<String> = parents.iter().map(|p| p.name.clone()).collect();

    if parents.is_empty() {
        return Ok(AlignedInputs {
            table: affiliated.cloned(),
            names,
            columns: Vec::new(),
            row_count: 0,
        });
    }

    let plan = Plan::build(store, parent_ids)?;
    let (table, available) = plan.align(store, affiliated)?;
    let row_count = window(limits, available);

    let mut columns = Columns {
        store,
        table,
        row_count,
        budget: limits.step_budget,
        cache: HashMap::new(),
    };
    for id in &plan.derived {
        columns.compute_derived(id);
    }

    debug!(
        rows = row_count,
        table = table.map(|t| t.id.as_str()).unwrap_or("-"),
        ancestors = plan.derived.len(),
        "aligned parent values"
    );

    Ok(AlignedInputs {
        table: table.map(|t| t.id.clone()),
        names,
        columns: parents.iter().map(|p| columns.column(p)).collect(),
        row_count,
    })
}

/// Evaluate `code` over the aligned values of `parent_ids`.
///
/// Rows are evaluated in table order until `sample_limit` of them succeed or
/// the scan window (`max_scan_rows`) is exhausted; failed rows stay in the
/// result as undefined entries.
pub fn materialize(
    store: &ConceptStore,
    code: &str,
    parent_ids: &[ConceptId],
    affiliated: Option<&TableId>,
    limits: &Limits,
) -> Result<Preview> {
    let procedure = parse_procedure(code)?;
    let inputs = align_window(store, parent_ids, affiliated, limits, Limits::scan_count)?;
    let rows = evaluate_rows(
        &procedure,
        &inputs.names,
        &inputs.columns,
        inputs.row_count,
        limits,
    );
    Ok(Preview {
        parent_ids: parent_ids.to_vec(),
        parent_names: inputs.names,
        table: inputs.table,
        rows,
    })
}

/// Values of one committed concept, bounded by `limits`.
pub fn concept_values(
    store: &ConceptStore,
    id: &ConceptId,
    limits: &Limits,
) -> Result<Vec<Option<Value>>> {
    let concept = store
        .get(id)
        .ok_or_else(|| EngineError::UnknownConcept(id.clone()))?;
    match (&concept.source, &concept.transform) {
        (ConceptSource::Derived, Some(transform)) => {
            let preview = materialize(
                store,
                &transform.code,
                &transform.parent_ids,
                Some(&concept.table_ref),
                limits,
            )?;
            Ok(preview.rows.into_iter().map(|r| r.output).collect())
        }
        (ConceptSource::Derived, None) => Err(EngineError::NotDerived(id.clone())),
        (ConceptSource::Original, _) => {
            let plan = Plan::build(store, std::slice::from_ref(id))?;
            let (table, available) = plan.align(store, Some(&concept.table_ref))?;
            let columns = Columns {
                store,
                table,
                row_count: limits.row_count(available),
                budget: limits.step_budget,
                cache: HashMap::new(),
            };
            Ok(columns.column(concept))
        }
        (ConceptSource::Custom, _) => {
            let domain = concept.domain.as_deref().unwrap_or(&[]);
            let n = limits.row_count(domain.len());
            Ok(domain[..n].iter().cloned().map(Some).collect())
        }
    }
}

fn evaluate_rows(
    procedure: &Procedure,
    parent_names: &[String],
    inputs: &[Vec<Option<Value>>],
    scan_rows: usize,
    limits: &Limits,
) -> Vec<PreviewRow> {
    let binding = procedure.binding_for(parent_names);
    let mut rows = Vec::new();
    let mut succeeded = 0;
    for i in 0..scan_rows {
        if succeeded >= limits.sample_limit {
            break;
        }
        let row: Vec<Option<Value>> = inputs
            .iter()
            .map(|col| col.get(i).cloned().flatten())
            .collect();
        let args: Vec<DslValue> = row.iter().map(to_dsl).collect();
        match procedure.call(binding, parent_names, &args, limits.step_budget) {
            Ok(value) => {
                succeeded += 1;
                rows.push(PreviewRow {
                    inputs: row,
                    output: value.to_json(),
                    error: None,
                });
            }
            Err(e) => rows.push(PreviewRow {
                inputs: row,
                output: None,
                error: Some(e.to_string()),
            }),
        }
    }
    rows
}

fn to_dsl(value: &Option<Value>) -> DslValue {
    value
        .as_ref()
        .map_or(DslValue::Undefined, DslValue::from_json)
}

// ============================================================================
// Planning
// ============================================================================

/// Everything reachable from a parent list.
struct Plan {
    /// Derived ancestors, parents before children.
    derived: Vec<ConceptId>,
    /// Names of the original columns the values come from, first-seen order.
    columns: Vec<String>,
    /// Longest value list among reachable custom concepts.
    custom_len: Option<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Active,
    Done,
}

enum Visit<'s> {
    Enter(&'s ConceptId),
    Exit(&'s ConceptId),
}

impl Plan {
    fn build(store: &ConceptStore, roots: &[ConceptId]) -> Result<Self> {
        let mut plan = Plan {
            derived: Vec::new(),
            columns: Vec::new(),
            custom_len: None,
        };
        let mut marks: HashMap<&ConceptId, Mark> = HashMap::new();
        let mut stack: Vec<Visit<'_>> = roots.iter().rev().map(Visit::Enter).collect();

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(id) => {
                    match marks.get(id) {
                        Some(Mark::Done) => continue,
                        Some(Mark::Active) => return Err(EngineError::Cycle(id.clone())),
                        None => {}
                    }
                    let concept = store
                        .get(id)
                        .ok_or_else(|| EngineError::UnknownConcept(id.clone()))?;
                    match concept.source {
                        ConceptSource::Original => {
                            marks.insert(id, Mark::Done);
                            if !plan.columns.contains(&concept.name) {
                                plan.columns.push(concept.name.clone());
                            }
                        }
                        ConceptSource::Custom => {
                            marks.insert(id, Mark::Done);
                            let len = concept.domain.as_ref().map_or(0, Vec::len);
                            plan.custom_len = Some(plan.custom_len.unwrap_or(0).max(len));
                        }
                        ConceptSource::Derived => {
                            marks.insert(id, Mark::Active);
                            stack.push(Visit::Exit(id));
                            stack.extend(concept.parent_ids().iter().rev().map(Visit::Enter));
                        }
                    }
                }
                Visit::Exit(id) => {
                    marks.insert(id, Mark::Done);
                    plan.derived.push(id.clone());
                }
            }
        }
        Ok(plan)
    }

    /// The table rows are read from, and how many rows are available.
    fn align<'s>(
        &self,
        store: &'s ConceptStore,
        affiliated: Option<&TableId>,
    ) -> Result<(Option<&'s DictTable>, usize)> {
        if self.columns.is_empty() {
            return Ok((None, self.custom_len.unwrap_or(0)));
        }
        let covers = |t: &&DictTable| t.has_columns(self.columns.iter().map(String::as_str));
        let table = affiliated
            .and_then(|id| store.table(id))
            .filter(covers)
            .or_else(|| store.tables().iter().find(covers))
            .ok_or_else(|| EngineError::NoAlignmentTable {
                columns: self.columns.clone(),
            })?;
        Ok((Some(table), table.len()))
    }
}

// ============================================================================
// Column evaluation
// ============================================================================

struct Columns<'s> {
    store: &'s ConceptStore,
    table: Option<&'s DictTable>,
    row_count: usize,
    budget: u64,
    cache: HashMap<ConceptId, Vec<Option<Value>>>,
}

impl<'s> Columns<'s> {
    /// Aligned values of a concept whose ancestors are already computed.
    fn column(&self, concept: &Concept) -> Vec<Option<Value>> {
        match concept.source {
            ConceptSource::Original => match self.table {
                Some(table) => table
                    .column(&concept.name)
                    .take(self.row_count)
                    .map(|v| v.cloned())
                    .collect(),
                None => vec![None; self.row_count],
            },
            ConceptSource::Custom => {
                let domain = concept.domain.as_deref().unwrap_or(&[]);
                (0..self.row_count).map(|i| domain.get(i).cloned()).collect()
            }
            ConceptSource::Derived => self
                .cache
                .get(&concept.id)
                .cloned()
                .unwrap_or_else(|| vec![None; self.row_count]),
        }
    }

    fn compute_derived(&mut self, id: &ConceptId) {
        if self.cache.contains_key(id) {
            return;
        }
        let store = self.store;
        let Some(concept) = store.get(id) else {
            return;
        };
        let Some(transform) = concept.transform.as_ref() else {
            return;
        };

        let values = match parse_procedure(&transform.code) {
            Ok(procedure) => {
                let mut parent_names = Vec::with_capacity(transform.parent_ids.len());
                let mut inputs = Vec::with_capacity(transform.parent_ids.len());
                for parent_id in &transform.parent_ids {
                    match store.get(parent_id) {
                        Some(parent) => {
                            parent_names.push(parent.name.clone());
                            inputs.push(self.column(parent));
                        }
                        None => {
                            parent_names.push(parent_id.to_string());
                            inputs.push(vec![None; self.row_count]);
                        }
                    }
                }
                // Ancestor columns stay row-aligned, so every row is evaluated.
                let every_row = Limits {
                    sample_limit: usize::MAX,
                    max_scan_rows: self.row_count,
                    step_budget: self.budget,
                };
                evaluate_rows(
                    &procedure,
                    &parent_names,
                    &inputs,
                    self.row_count,
                    &every_row,
                )
                .into_iter()
                .map(|r| r.output)
                .collect()
            }
            Err(e) => {
                warn!(concept = %id, error = %e, "ancestor procedure does not parse");
                vec![None; self.row_count]
            }
        };
        self.cache.insert(id.clone(), values);
    }
}
