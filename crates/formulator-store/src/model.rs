//! Concept and table records.
//!
//! Field names follow the exchanged JSON layout (`type`, `semanticType`,
//! `tableRef`, `parentIDs`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier of a concept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptId(String);

impl ConceptId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id for a user-created concept.
    pub fn generate() -> Self {
        Self(format!("concept-{}", Uuid::new_v4()))
    }

    /// Deterministic id of the concept mirroring `column` of `table`.
    pub fn original(table: &TableId, column: &str) -> Self {
        Self(format!("original--{}--{column}", table.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConceptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConceptId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a loaded table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(String);

impl TableId {
    /// Affiliation of custom concepts declared outside any table.
    pub const CUSTOM: &'static str = "custom";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn custom() -> Self {
        Self(Self::CUSTOM.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ============================================================================
// Concepts
// ============================================================================

/// Declared scalar type of a concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Number,
    Boolean,
    Date,
    #[default]
    Auto,
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScalarType::String => "string",
            ScalarType::Number => "number",
            ScalarType::Boolean => "boolean",
            ScalarType::Date => "date",
            ScalarType::Auto => "auto",
        })
    }
}

impl std::str::FromStr for ScalarType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" => Ok(ScalarType::String),
            "number" => Ok(ScalarType::Number),
            "boolean" => Ok(ScalarType::Boolean),
            "date" => Ok(ScalarType::Date),
            "auto" => Ok(ScalarType::Auto),
            other => Err(format!("unknown scalar type {other:?}")),
        }
    }
}

/// Where a concept's values come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConceptSource {
    /// A raw column of a loaded table.
    Original,
    /// A user-declared value list.
    Custom,
    /// Computed by a transform.
    Derived,
}

/// Who wrote a transform's procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Generated,
    #[default]
    Manual,
}

/// Parents, procedure and description of a derived concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    #[serde(rename = "parentIDs")]
    pub parent_ids: Vec<ConceptId>,
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub provenance: Provenance,
}

impl Transform {
    pub fn new(parent_ids: Vec<ConceptId>, code: impl Into<String>) -> Self {
        Self {
            parent_ids,
            code: code.into(),
            description: String::new(),
            provenance: Provenance::Manual,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    /// Empty while the concept is an unsaved draft.
    pub name: String,
    #[serde(rename = "type", default)]
    pub scalar_type: ScalarType,
    #[serde(
        rename = "semanticType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub semantic_type: Option<String>,
    pub source: ConceptSource,
    #[serde(rename = "tableRef")]
    pub table_ref: TableId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
}

impl Concept {
    /// The concept mirroring one column of a table.
    pub fn original(table: &TableId, column: &str, scalar_type: ScalarType) -> Self {
        Self {
            id: ConceptId::original(table, column),
            name: column.to_string(),
            scalar_type,
            semantic_type: None,
            source: ConceptSource::Original,
            table_ref: table.clone(),
            domain: None,
            transform: None,
        }
    }

    pub fn custom(name: impl Into<String>, table_ref: TableId, domain: Vec<Value>) -> Self {
        Self {
            id: ConceptId::generate(),
            name: name.into(),
            scalar_type: ScalarType::Auto,
            semantic_type: None,
            source: ConceptSource::Custom,
            table_ref,
            domain: Some(domain),
            transform: None,
        }
    }

    pub fn derived(name: impl Into<String>, table_ref: TableId, transform: Transform) -> Self {
        Self {
            id: ConceptId::generate(),
            name: name.into(),
            scalar_type: ScalarType::Auto,
            semantic_type: None,
            source: ConceptSource::Derived,
            table_ref,
            domain: None,
            transform: Some(transform),
        }
    }

    pub fn with_id(mut self, id: impl Into<ConceptId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_draft(&self) -> bool {
        self.name.trim().is_empty()
    }

    pub fn is_derived(&self) -> bool {
        self.source == ConceptSource::Derived
    }

    /// Parent ids of a derived concept; empty for every other kind.
    pub fn parent_ids(&self) -> &[ConceptId] {
        self.transform
            .as_ref()
            .map(|t| t.parent_ids.as_slice())
            .unwrap_or(&[])
    }
}

// ============================================================================
// Tables
// ============================================================================

/// A named, ordered table of scalar rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictTable {
    pub id: TableId,
    /// Column names in display order.
    pub names: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl DictTable {
    pub fn new(id: impl Into<TableId>, names: Vec<String>) -> Self {
        Self {
            id: id.into(),
            names,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(mut self, rows: Vec<Map<String, Value>>) -> Self {
        self.rows = rows;
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn has_columns<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> bool {
        names.into_iter().all(|n| self.has_column(n))
    }

    /// Values of one column in row order; missing cells are `None`.
    pub fn column<'a>(&'a self, name: &'a str) -> impl Iterator<Item = Option<&'a Value>> + 'a {
        self.rows.iter().map(move |row| row.get(name))
    }
}
