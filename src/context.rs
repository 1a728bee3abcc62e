use bon::Builder;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EvaluationError;

lazy_static! {
    static ref DOCUMENT_PATH_RE: Regex =
        Regex::new(r"^/?([A-Za-z0-9_\-]+)/([^/\s]+)$").expect("document path pattern is valid");
}

/// The kind of operation a request performs on a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Create,
        Operation::Read,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn is_write(self) -> bool {
        matches!(self, Operation::Create | Operation::Update)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = EvaluationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Operation::Create),
            "read" => Ok(Operation::Read),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(EvaluationError::MalformedRequest(format!(
                "unknown operation '{}'",
                other
            ))),
        }
    }
}

/// Per-request data handed over by the transport layer.
#[derive(Builder, Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    // Authenticated caller uid. `None` means the request is unauthenticated.
    #[builder(into)]
    pub caller_id: Option<String>,

    pub operation: Operation,
}

impl RequestContext {
    pub fn authenticated(caller_id: impl Into<String>, operation: Operation) -> Self {
        Self {
            caller_id: Some(caller_id.into()),
            operation,
        }
    }

    pub fn anonymous(operation: Operation) -> Self {
        Self {
            caller_id: None,
            operation,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.caller_id.is_some()
    }
}

/// Identifies the target document, e.g. `users/taro`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentPath {
    pub collection: String,
    pub document_id: String,
}

impl DocumentPath {
    pub fn new(collection: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            document_id: document_id.into(),
        }
    }

    /// Parses `collection/documentId`, with an optional leading slash.
    pub fn parse(path: &str) -> Result<Self, EvaluationError> {
        let caps = DOCUMENT_PATH_RE.captures(path.trim()).ok_or_else(|| {
            EvaluationError::MalformedRequest(format!("invalid document path '{}'", path))
        })?;
        Ok(Self::new(&caps[1], &caps[2]))
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.document_id)
    }
}

impl FromStr for DocumentPath {
    type Err = EvaluationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
