//! Request and response records exchanged with the generation service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Correlates a response with the request that produced it.
///
/// Services echo the token back; error responses may carry `-1`. Tokens are
/// accepted as JSON numbers or numeric strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "TokenRepr")]
pub struct RequestToken(i64);

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenRepr {
    Int(i64),
    Str(String),
}

impl TryFrom<TokenRepr> for RequestToken {
    type Error = String;

    fn try_from(repr: TokenRepr) -> Result<Self, Self::Error> {
        match repr {
            TokenRepr::Int(n) => Ok(Self(n)),
            TokenRepr::Str(s) => s
                .trim()
                .parse()
                .map(Self)
                .map_err(|_| format!("invalid request token {s:?}")),
        }
    }
}

impl RequestToken {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Model selection forwarded to the service unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub endpoint: String,
    pub model: String,
}

/// Name, declared type and a few sample values of one input field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub scalar_type: String,
    pub values: Vec<Value>,
}

/// A bounded sample of the table the procedure will run against.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputData {
    pub name: String,
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeriveConceptRequest {
    pub token: RequestToken,
    pub description: String,
    pub output_name: String,
    pub input_fields: Vec<InputFieldInfo>,
    pub input_data: InputData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeriveConceptResponse {
    pub status: String,
    pub token: RequestToken,
    /// Procedure texts, best first.
    #[serde(default)]
    pub result: Vec<String>,
}

impl DeriveConceptResponse {
    pub fn ok(token: RequestToken, result: Vec<String>) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            token,
            result,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

pub const STATUS_OK: &str = "ok";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanDataRequest {
    pub token: RequestToken,
    pub content_type: ContentType,
    pub raw_data: String,
    #[serde(default)]
    pub image_cleaning_instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CleaningInfo {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningCandidate {
    /// Cleaned table as delimited text.
    pub content: String,
    #[serde(default)]
    pub info: CleaningInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanDataResponse {
    pub status: String,
    pub token: RequestToken,
    #[serde(default)]
    pub result: Vec<CleaningCandidate>,
}

impl CleanDataResponse {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}
