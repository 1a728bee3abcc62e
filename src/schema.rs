use regex::Regex;
use rhai::{Engine, Scope, AST};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

use crate::error::ConfigError;
use crate::value::{CandidateDocument, FieldValue};

const MAX_SCRIPT_OPERATIONS: u64 = 10_000;
const MAX_SCRIPT_DEPTH: usize = 32;

pub const GENDERS: [&str; 3] = ["male", "female", "genderDiverse"];

/// The declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    /// Integer or floating point.
    Number,
    Integer,
    Boolean,
    List,
    Map,
}

impl FieldType {
    pub fn accepts(self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (FieldType::String, FieldValue::String(_))
                | (FieldType::Number, FieldValue::Int(_) | FieldValue::Double(_))
                | (FieldType::Integer, FieldValue::Int(_))
                | (FieldType::Boolean, FieldValue::Bool(_))
                | (FieldType::List, FieldValue::List(_))
                | (FieldType::Map, FieldValue::Map(_))
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::List => "list",
            FieldType::Map => "map",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value constraint attached to a field. Bounds are inclusive.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Character count for strings, element count for lists.
    Length { min: usize, max: usize },
    OneOf(Vec<String>),
    Range { min: f64, max: f64 },
    /// Must match the whole string.
    Pattern(Regex),
    /// A rhai boolean expression with the field's value bound as `value`.
    Check { expression: String, ast: AST },
}

impl Constraint {
    pub fn length(min: usize, max: usize) -> Self {
        Constraint::Length { min, max }
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Constraint::OneOf(values.into_iter().map(Into::into).collect())
    }

    pub fn range(min: f64, max: f64) -> Self {
        Constraint::Range { min, max }
    }

    pub fn pattern(field: &str, pattern: &str) -> Result<Self, ConfigError> {
        Regex::new(&format!("^(?:{})$", pattern))
            .map(Constraint::Pattern)
            .map_err(|source| ConfigError::InvalidPattern {
                field: field.to_string(),
                source,
            })
    }

    pub fn check(field: &str, expression: &str) -> Result<Self, ConfigError> {
        let ast = script_engine()
            .compile_expression(expression)
            .map_err(|err| ConfigError::InvalidScript {
                field: field.to_string(),
                message: err.to_string(),
            })?;
        Ok(Constraint::Check {
            expression: expression.to_string(),
            ast,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Constraint::Length { .. } => "length",
            Constraint::OneOf(_) => "one_of",
            Constraint::Range { .. } => "range",
            Constraint::Pattern(_) => "pattern",
            Constraint::Check { .. } => "check",
        }
    }

    pub fn applies_to(&self, field_type: FieldType) -> bool {
        match self {
            Constraint::Length { .. } => matches!(field_type, FieldType::String | FieldType::List),
            Constraint::OneOf(_) | Constraint::Pattern(_) => field_type == FieldType::String,
            Constraint::Range { .. } => {
                matches!(field_type, FieldType::Number | FieldType::Integer)
            }
            Constraint::Check { .. } => true,
        }
    }

    /// Returns the violation for `value`, if any. The value has already passed the type check.
    fn evaluate(&self, value: &FieldValue, engine: &Engine) -> Option<ViolationKind> {
        match self {
            Constraint::Length { min, max } => {
                let length = match value {
                    FieldValue::String(s) => s.chars().count(),
                    FieldValue::List(items) => items.len(),
                    _ => return None,
                };
                if length < *min || length > *max {
                    return Some(ViolationKind::LengthOutOfRange {
                        length,
                        min: *min,
                        max: *max,
                    });
                }
                None
            }
            Constraint::OneOf(allowed) => {
                let s = value.as_str()?;
                if allowed.iter().any(|a| a == s) {
                    None
                } else {
                    Some(ViolationKind::NotAllowed {
                        value: s.to_string(),
                    })
                }
            }
            Constraint::Range { min, max } => {
                let n = value.as_f64()?;
                let in_range = match value {
                    FieldValue::Int(i) => int_in_range(*i, *min, *max),
                    _ => (*min..=*max).contains(&n),
                };
                if in_range {
                    None
                } else {
                    Some(ViolationKind::OutOfRange {
                        value: n,
                        min: *min,
                        max: *max,
                    })
                }
            }
            Constraint::Pattern(re) => {
                let s = value.as_str()?;
                if re.is_match(s) {
                    None
                } else {
                    Some(ViolationKind::PatternMismatch)
                }
            }
            Constraint::Check { expression, ast } => {
                let mut scope = Scope::new();
                scope.push_dynamic("value", value.to_dynamic());
                match engine.eval_ast_with_scope::<bool>(&mut scope, ast) {
                    Ok(true) => None,
                    Ok(false) => Some(ViolationKind::CheckFailed {
                        expression: expression.clone(),
                    }),
                    Err(err) => Some(ViolationKind::CheckError {
                        message: err.to_string(),
                    }),
                }
            }
        }
    }
}

/// Inclusive range check that stays exact for integers beyond 2^53.
fn int_in_range(value: i64, min: f64, max: f64) -> bool {
    if min.is_nan() || max.is_nan() {
        return false;
    }
    // Float-to-int `as` saturates, so infinite bounds stay open-ended.
    let value = i128::from(value);
    value >= min.ceil() as i128 && value <= max.floor() as i128
}

/// One entry of the schema table.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub constraints: Vec<Constraint>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            constraints: Vec::new(),
        }
    }

    pub fn with(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// A type mismatch is reported alone; otherwise every failing constraint is reported.
    fn check(&self, value: &FieldValue, engine: &Engine) -> Vec<ViolationKind> {
        if !self.field_type.accepts(value) {
            return vec![ViolationKind::TypeMismatch {
                expected: self.field_type,
                found: value.type_name(),
            }];
        }
        self.constraints
            .iter()
            .filter_map(|c| c.evaluate(value, engine))
            .collect()
    }
}

/// Create requires the complete field set, update accepts any subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ViolationKind {
    #[error("field is not declared in the schema")]
    UnknownField,
    #[error("required field is missing")]
    MissingField,
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: FieldType,
        found: &'static str,
    },
    #[error("length {length} is outside {min}..={max}")]
    LengthOutOfRange { length: usize, min: usize, max: usize },
    #[error("value {value:?} is not one of the allowed values")]
    NotAllowed { value: String },
    #[error("value {value} is outside {min}..={max}")]
    OutOfRange { value: f64, min: f64, max: f64 },
    #[error("value does not match the required pattern")]
    PatternMismatch,
    #[error("check '{expression}' rejected the value")]
    CheckFailed { expression: String },
    #[error("check failed to run: {message}")]
    CheckError { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub field: String,
    pub kind: ViolationKind,
}

impl Violation {
    pub fn new(field: impl Into<String>, kind: ViolationKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Valid,
    Invalid(Vec<Violation>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            ValidationResult::Valid => &[],
            ValidationResult::Invalid(v) => v,
        }
    }
}

fn script_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(MAX_SCRIPT_OPERATIONS);
    engine.set_max_expr_depths(MAX_SCRIPT_DEPTH, MAX_SCRIPT_DEPTH);
    engine.on_print(|_| {});
    engine.on_debug(|_, _, _| {});
    engine
}

/// A closed document schema: an ordered table of field descriptors.
///
/// Immutable once built and cheap to clone; the script engine is shared.
#[derive(Clone)]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
    engine: Arc<Engine>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Schema").field("fields", &self.fields).finish()
    }
}

impl Schema {
    /// Builds a schema, rejecting duplicate names, misplaced constraints, and inverted bounds.
    pub fn new(fields: Vec<FieldDescriptor>) -> Result<Self, ConfigError> {
        if fields.is_empty() {
            return Err(ConfigError::EmptySchema);
        }
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ConfigError::DuplicateField(field.name.clone()));
            }
            for constraint in &field.constraints {
                if !constraint.applies_to(field.field_type) {
                    return Err(ConfigError::ConstraintTypeMismatch {
                        field: field.name.clone(),
                        field_type: field.field_type.to_string(),
                        constraint: constraint.name(),
                    });
                }
                match constraint {
                    Constraint::Length { min, max } if min > max => {
                        return Err(ConfigError::InvalidBounds {
                            field: field.name.clone(),
                            min: min.to_string(),
                            max: max.to_string(),
                        });
                    }
                    // Written as a negated comparison so NaN bounds are rejected too.
                    Constraint::Range { min, max } if !(min <= max) => {
                        return Err(ConfigError::InvalidBounds {
                            field: field.name.clone(),
                            min: min.to_string(),
                            max: max.to_string(),
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(Self {
            fields,
            engine: Arc::new(script_engine()),
        })
    }

    /// The `users` schema: `name`, `gender` and `age`, nothing else.
    pub fn users() -> Self {
        Self {
            fields: vec![
                FieldDescriptor::new("name", FieldType::String).with(Constraint::length(1, 30)),
                FieldDescriptor::new("gender", FieldType::String).with(Constraint::one_of(GENDERS)),
                FieldDescriptor::new("age", FieldType::Number).with(Constraint::range(0.0, 150.0)),
            ],
            engine: Arc::new(script_engine()),
        }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Checks `candidate` against the schema and accumulates every violation.
    ///
    /// Order: unknown fields (candidate order), missing fields (create only, schema order),
    /// then value violations (schema order). An empty update patch is valid.
    pub fn validate(
        &self,
        candidate: &CandidateDocument,
        mode: ValidationMode,
    ) -> ValidationResult {
        let mut violations = Vec::new();

        for key in candidate.keys() {
            if self.field(key).is_none() {
                trace!(field = key, "unknown field");
                violations.push(Violation::new(key, ViolationKind::UnknownField));
            }
        }

        if mode == ValidationMode::Create {
            for field in &self.fields {
                if !candidate.contains(&field.name) {
                    trace!(field = %field.name, "missing field");
                    violations.push(Violation::new(&field.name, ViolationKind::MissingField));
                }
            }
        }

        for field in &self.fields {
            if let Some(value) = candidate.get(&field.name) {
                let kinds = field.check(value, &self.engine);
                trace!(field = %field.name, %value, violations = kinds.len(), "checked field");
                violations.extend(kinds.into_iter().map(|k| Violation::new(&field.name, k)));
            }
        }

        if violations.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(violations)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correct_user() -> CandidateDocument {
        CandidateDocument::new()
            .with("name", "suzuki taro")
            .with("gender", "male")
            .with("age", 30)
    }

    fn create(doc: &CandidateDocument) -> ValidationResult {
        Schema::users().validate(doc, ValidationMode::Create)
    }

    fn update(doc: &CandidateDocument) -> ValidationResult {
        Schema::users().validate(doc, ValidationMode::Update)
    }

    #[test]
    fn test_correct_user_is_valid() {
        assert_eq!(create(&correct_user()), ValidationResult::Valid);
    }

    #[test]
    fn test_create_rejects_extra_field() {
        let result = create(&correct_user().with("place", "Japan"));
        assert_eq!(
            result.violations(),
            &[Violation::new("place", ViolationKind::UnknownField)]
        );
    }

    #[test]
    fn test_create_requires_every_field() {
        let mut doc = correct_user();
        doc.remove("gender");
        assert_eq!(
            create(&doc).violations(),
            &[Violation::new("gender", ViolationKind::MissingField)]
        );
        assert_eq!(create(&CandidateDocument::new()).violations().len(), 3);
    }

    #[test]
    fn test_type_mismatches() {
        let cases = [
            ("name", FieldValue::Int(1234), FieldType::String, "integer"),
            ("gender", FieldValue::Bool(true), FieldType::String, "boolean"),
            ("age", FieldValue::from("1"), FieldType::Number, "string"),
            ("age", FieldValue::Null, FieldType::Number, "null"),
        ];
        for (field, value, expected, found) in cases {
            let result = create(&correct_user().with(field, value));
            assert_eq!(
                result.violations(),
                &[Violation::new(field, ViolationKind::TypeMismatch { expected, found })]
            );
        }
    }

    #[test]
    fn test_name_length_bounds() {
        assert!(create(&correct_user().with("name", "a".repeat(30))).is_valid());
        assert!(create(&correct_user().with("name", "a")).is_valid());
        assert!(!create(&correct_user().with("name", "")).is_valid());
        assert!(!create(&correct_user().with("name", "a".repeat(31))).is_valid());
        // Characters, not bytes.
        assert!(create(&correct_user().with("name", "あ".repeat(30))).is_valid());
    }

    #[test]
    fn test_gender_values() {
        for gender in GENDERS {
            assert!(create(&correct_user().with("gender", gender)).is_valid(), "{}", gender);
        }
        for gender in ["", "男性", "Male", "genderdiverse", " male"] {
            let result = create(&correct_user().with("gender", gender));
            assert_eq!(
                result.violations(),
                &[Violation::new(
                    "gender",
                    ViolationKind::NotAllowed {
                        value: gender.to_string()
                    }
                )]
            );
        }
    }

    #[test]
    fn test_age_bounds() {
        assert!(create(&correct_user().with("age", 0)).is_valid());
        assert!(create(&correct_user().with("age", 150)).is_valid());
        assert!(create(&correct_user().with("age", 42.5)).is_valid());
        assert!(!create(&correct_user().with("age", -1)).is_valid());
        assert!(!create(&correct_user().with("age", 151)).is_valid());
        assert!(!create(&correct_user().with("age", 150.5)).is_valid());
        assert!(!create(&correct_user().with("age", f64::NAN)).is_valid());
    }

    #[test]
    fn test_integer_range_is_exact_past_float_precision() {
        let schema = Schema::new(vec![FieldDescriptor::new("id", FieldType::Integer)
            .with(Constraint::range(-9007199254740992.0, 9007199254740992.0))])
        .unwrap();
        let check = |n: i64| {
            schema
                .validate(&CandidateDocument::new().with("id", n), ValidationMode::Update)
                .is_valid()
        };
        assert!(check(9007199254740992));
        assert!(check(-9007199254740992));
        assert!(!check(9007199254740993));
        assert!(!check(-9007199254740993));
        assert!(!check(i64::MAX));

        let open = Schema::new(vec![FieldDescriptor::new("id", FieldType::Integer)
            .with(Constraint::range(0.5, f64::INFINITY))])
        .unwrap();
        let doc = |n: i64| CandidateDocument::new().with("id", n);
        assert!(open.validate(&doc(i64::MAX), ValidationMode::Update).is_valid());
        assert!(!open.validate(&doc(0), ValidationMode::Update).is_valid());
        assert!(open.validate(&doc(1), ValidationMode::Update).is_valid());
    }

    #[test]
    fn test_violations_accumulate_in_order() {
        let doc = CandidateDocument::new()
            .with("place", "Japan")
            .with("age", 151)
            .with("name", "");
        let result = create(&doc);
        let kinds: Vec<(&str, &ViolationKind)> = result
            .violations()
            .iter()
            .map(|v| (v.field.as_str(), &v.kind))
            .collect();
        assert_eq!(kinds.len(), 4);
        assert_eq!(kinds[0], ("place", &ViolationKind::UnknownField));
        assert_eq!(kinds[1], ("gender", &ViolationKind::MissingField));
        assert_eq!(kinds[2].0, "name");
        assert_eq!(kinds[3].0, "age");
    }

    #[test]
    fn test_update_accepts_subsets() {
        let rename = CandidateDocument::new().with("name", "suzuki \"DA MADAFAKA\" taro");
        assert!(update(&rename).is_valid());
        assert!(update(&CandidateDocument::new().with("age", 31)).is_valid());
        assert!(update(&correct_user()).is_valid());
        assert!(update(&CandidateDocument::new()).is_valid());
    }

    #[test]
    fn test_update_rejects_unknown_and_bad_values() {
        assert!(!update(&CandidateDocument::new().with("place", "Japan")).is_valid());
        assert!(!update(&CandidateDocument::new().with("name", 1234)).is_valid());
        assert!(!update(&CandidateDocument::new().with("gender", true)).is_valid());
        assert!(!update(&CandidateDocument::new().with("age", "1")).is_valid());
        assert!(!update(&CandidateDocument::new().with("age", 151)).is_valid());
    }

    #[test]
    fn test_check_and_pattern_constraints() {
        let schema = Schema::new(vec![
            FieldDescriptor::new("handle", FieldType::String)
                .with(Constraint::pattern("handle", "[a-z][a-z0-9_]*").unwrap()),
            FieldDescriptor::new("score", FieldType::Integer)
                .with(Constraint::check("score", "value % 2 == 0").unwrap()),
        ])
        .unwrap();

        let ok = CandidateDocument::new().with("handle", "taro_1").with("score", 4);
        assert!(schema.validate(&ok, ValidationMode::Create).is_valid());

        let bad = CandidateDocument::new().with("handle", "Taro").with("score", 3);
        let kinds: Vec<_> = schema
            .validate(&bad, ValidationMode::Create)
            .violations()
            .iter()
            .map(|v| v.kind.clone())
            .collect();
        assert_eq!(kinds[0], ViolationKind::PatternMismatch);
        assert!(matches!(kinds[1], ViolationKind::CheckFailed { .. }));

        let float = CandidateDocument::new().with("score", 4.0);
        assert!(matches!(
            schema.validate(&float, ValidationMode::Update).violations()[0].kind,
            ViolationKind::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_check_runtime_error_is_a_violation() {
        let check = Constraint::check("tags", "value.len() > 0 && missing_helper(value)").unwrap();
        let schema =
            Schema::new(vec![FieldDescriptor::new("tags", FieldType::List).with(check)]).unwrap();
        let doc = CandidateDocument::new().with("tags", FieldValue::List(vec!["a".into()]));
        let result = schema.validate(&doc, ValidationMode::Update);
        assert!(matches!(result.violations()[0].kind, ViolationKind::CheckError { .. }));
    }

    #[test]
    fn test_schema_rejects_bad_definitions() {
        assert!(matches!(Schema::new(vec![]), Err(ConfigError::EmptySchema)));
        assert!(matches!(
            Schema::new(vec![
                FieldDescriptor::new("a", FieldType::String),
                FieldDescriptor::new("a", FieldType::Number),
            ]),
            Err(ConfigError::DuplicateField(name)) if name == "a"
        ));
        assert!(matches!(
            Schema::new(vec![
                FieldDescriptor::new("a", FieldType::Boolean).with(Constraint::range(0.0, 1.0))
            ]),
            Err(ConfigError::ConstraintTypeMismatch { constraint: "range", .. })
        ));
        assert!(matches!(
            Schema::new(vec![
                FieldDescriptor::new("a", FieldType::String).with(Constraint::length(5, 1))
            ]),
            Err(ConfigError::InvalidBounds { .. })
        ));
        assert!(matches!(Constraint::pattern("a", "("), Err(ConfigError::InvalidPattern { .. })));
        assert!(matches!(
            Constraint::check("a", "value >"),
            Err(ConfigError::InvalidScript { .. })
        ));
    }
}
