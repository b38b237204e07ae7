//! Candidate manager: filters generated procedures before anyone sees them.

use crate::executor::{materialize, Limits, Preview};
use crate::{EngineError, Result};
use formulator_dsl::procedure_digest;
use formulator_store::{ConceptId, ConceptStore, TableId};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// A generated procedure that parsed and produced at least one value.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub code: String,
    pub digest: String,
    /// Test run over the candidate sample rows.
    pub preview: Preview,
    /// Hand-edited after generation.
    pub revised: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    Empty,
    /// Same text as a better-ranked candidate.
    Duplicate,
    Parse(String),
    AllRowsFailed { first_error: String },
    /// The parents themselves cannot be materialized.
    Execution(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Empty => f.write_str("empty candidate"),
            RejectReason::Duplicate => f.write_str("duplicate of a better-ranked candidate"),
            RejectReason::Parse(e) => write!(f, "does not parse: {e}"),
            RejectReason::AllRowsFailed { first_error } => {
                write!(f, "failed on every sample row ({first_error})")
            }
            RejectReason::Execution(e) => write!(f, "cannot run: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    /// Position in the generator's ranking.
    pub rank: usize,
    pub code: String,
    pub reason: RejectReason,
}

/// Survivors in ranking order plus everything that was dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateBatch {
    pub accepted: Vec<Candidate>,
    pub rejected: Vec<Rejected>,
}

/// Strip a surrounding Markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)\r?\n?\s*```\s*$").ok()
    });
    match fence.as_ref().and_then(|re| re.captures(text)) {
        Some(caps) => caps.get(1).map_or(text, |m| m.as_str()).trim(),
        None => text.trim(),
    }
}

/// Validate and test-run each raw candidate, keeping the generator's order.
///
/// A candidate is dropped when it is empty, duplicates an earlier one, does
/// not parse, or fails on every sample row. Candidates that fail on some rows
/// are kept. No survivors is an empty batch, not an error.
pub fn process_candidates(
    raw: &[String],
    parent_ids: &[ConceptId],
    affiliated: Option<&TableId>,
    store: &ConceptStore,
    limits: &Limits,
) -> CandidateBatch {
    let mut batch = CandidateBatch::default();
    let mut seen: HashSet<String> = HashSet::new();

    for (rank, text) in raw.iter().enumerate() {
        let code = strip_code_fences(text).to_string();
        let reject = |batch: &mut CandidateBatch, code: String, reason: RejectReason| {
            warn!(rank, %reason, "candidate discarded");
            batch.rejected.push(Rejected { rank, code, reason });
        };

        if code.is_empty() {
            reject(&mut batch, code, RejectReason::Empty);
            continue;
        }
        let digest = procedure_digest(&code);
        if !seen.insert(digest.clone()) {
            reject(&mut batch, code, RejectReason::Duplicate);
            continue;
        }

        match materialize(store, &code, parent_ids, affiliated, limits) {
            Ok(preview) if preview.all_failed() => {
                let first_error = preview
                    .rows
                    .iter()
                    .find_map(|r| r.error.clone())
                    .unwrap_or_default();
                reject(&mut batch, code, RejectReason::AllRowsFailed { first_error });
            }
            Ok(preview) => {
                debug!(rank, %digest, failed = preview.failed_rows(), "candidate accepted");
                batch.accepted.push(Candidate {
                    code,
                    digest,
                    preview,
                    revised: false,
                });
            }
            Err(EngineError::Procedure(e)) => {
                reject(&mut batch, code, RejectReason::Parse(e.to_string()));
            }
            Err(e) => {
                reject(&mut batch, code, RejectReason::Execution(e.to_string()));
            }
        }
    }
    batch
}

/// Surviving candidates of one edit session and the active one.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
    active: usize,
}

impl CandidateSet {
    /// `None` when there is nothing to choose from.
    pub fn new(candidates: Vec<Candidate>) -> Option<Self> {
        if candidates.is_empty() {
            None
        } else {
            Some(Self {
                candidates,
                active: 0,
            })
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active(&self) -> &Candidate {
        &self.candidates[self.active]
    }

    pub fn select(&mut self, index: usize) -> Result<&Candidate> {
        if index >= self.candidates.len() {
            return Err(EngineError::CandidateIndex {
                index,
                len: self.candidates.len(),
            });
        }
        self.active = index;
        Ok(&self.candidates[index])
    }

    /// Overwrite the active candidate with a hand-edited revision.
    pub(crate) fn revise_active(&mut self, code: String, preview: Preview) {
        let active = &mut self.candidates[self.active];
        active.digest = procedure_digest(&code);
        active.code = code;
        active.preview = preview;
        active.revised = true;
    }
}
