//! Per-document access rules for a `users` collection.
//!
//! A [`Ruleset`] decides, before anything reaches storage, whether a caller may create,
//! read, update or delete one document. Every operation requires the caller's uid to equal
//! the document id; writes must also satisfy the collection's closed [`Schema`].
//!
//! ```
//! use docrules::{CandidateDocument, DocumentPath, Operation, RequestContext, Ruleset};
//!
//! let rules = Ruleset::users();
//! let ctx = RequestContext::authenticated("taro", Operation::Create);
//! let body = CandidateDocument::new()
//!     .with("name", "suzuki taro")
//!     .with("gender", "male")
//!     .with("age", 30);
//! let path = DocumentPath::parse("users/taro").unwrap();
//! assert!(rules.evaluate(&ctx, &path, Some(&body)).unwrap().is_allowed());
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod ownership;
pub mod schema;
pub mod value;

pub use config::RulesConfig;
pub use context::{DocumentPath, Operation, RequestContext};
pub use error::{ConfigError, EvaluationError};
pub use evaluator::{Decision, DenyReason, Ruleset};
pub use ownership::is_owner;
pub use schema::{
    Constraint, FieldDescriptor, FieldType, Schema, ValidationMode, ValidationResult, Violation,
    ViolationKind,
};
pub use value::{CandidateDocument, FieldValue};
