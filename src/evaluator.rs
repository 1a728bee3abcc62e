use thiserror::Error;
use tracing::debug;

use crate::context::{DocumentPath, Operation, RequestContext};
use crate::error::EvaluationError;
use crate::ownership::is_owner;
use crate::schema::{Schema, ValidationMode, ValidationResult, Violation};
use crate::value::CandidateDocument;

/// Why a request was denied. Informational; the storage boundary only sees allow/deny.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DenyReason {
    #[error("caller does not own the document")]
    OwnershipDenied,
    #[error("document violates the schema: {}", format_violations(.0))]
    SchemaViolation(Vec<Violation>),
    #[error("no rule matches collection '{collection}'")]
    NoMatchingRule { collection: String },
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<(), DenyReason> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(reason),
        }
    }
}

/// Schema check applied to each operation kind; every kind requires ownership.
fn validation_mode(operation: Operation) -> Option<ValidationMode> {
    match operation {
        Operation::Create => Some(ValidationMode::Create),
        Operation::Update => Some(ValidationMode::Update),
        Operation::Read | Operation::Delete => None,
    }
}

/// The loaded rules for one collection. Built once, shared read-only by every request.
#[derive(Debug, Clone)]
pub struct Ruleset {
    collection: String,
    schema: Schema,
}

impl Ruleset {
    pub fn new(collection: impl Into<String>, schema: Schema) -> Self {
        Self {
            collection: collection.into(),
            schema,
        }
    }

    /// Owner-only access to `users/{uid}` with the built-in user schema.
    pub fn users() -> Self {
        Self::new("users", Schema::users())
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Decides whether the request may reach storage.
    ///
    /// Ownership is checked first and is sufficient to deny; only owner writes reach the
    /// schema. Read and delete ignore `candidate`. Errors are reserved for requests that are
    /// missing routing information, or owner writes that carry no body.
    pub fn evaluate(
        &self,
        context: &RequestContext,
        path: &DocumentPath,
        candidate: Option<&CandidateDocument>,
    ) -> Result<Decision, EvaluationError> {
        let operation = context.operation;
        if path.collection.is_empty() {
            return Err(EvaluationError::MalformedRequest(
                "document path has no collection".to_string(),
            ));
        }
        if path.document_id.is_empty() {
            return Err(EvaluationError::MalformedRequest(
                "document path has no document id".to_string(),
            ));
        }

        let decision = self.decide(context, path, candidate)?;
        match &decision {
            Decision::Allow => debug!(%operation, %path, "allowed"),
            Decision::Deny(reason) => debug!(%operation, %path, %reason, "denied"),
        }
        Ok(decision)
    }

    fn decide(
        &self,
        context: &RequestContext,
        path: &DocumentPath,
        candidate: Option<&CandidateDocument>,
    ) -> Result<Decision, EvaluationError> {
        if path.collection != self.collection {
            return Ok(Decision::Deny(DenyReason::NoMatchingRule {
                collection: path.collection.clone(),
            }));
        }
        if !is_owner(context, path) {
            return Ok(Decision::Deny(DenyReason::OwnershipDenied));
        }
        let Some(mode) = validation_mode(context.operation) else {
            return Ok(Decision::Allow);
        };
        let candidate = candidate.ok_or_else(|| {
            EvaluationError::MalformedRequest(format!(
                "{} on {} requires a document body",
                context.operation, path
            ))
        })?;
        Ok(match self.schema.validate(candidate, mode) {
            ValidationResult::Valid => Decision::Allow,
            ValidationResult::Invalid(violations) => {
                Decision::Deny(DenyReason::SchemaViolation(violations))
            }
        })
    }

    /// Binary form of [`Ruleset::evaluate`] for the storage layer.
    pub fn authorize(
        &self,
        context: &RequestContext,
        path: &DocumentPath,
        candidate: Option<&CandidateDocument>,
    ) -> Result<bool, EvaluationError> {
        self.evaluate(context, path, candidate)
            .map(|decision| decision.is_allowed())
    }
}
