//! Statement model
//!
//! A [`Statement`] is one subject–predicate–object fact plus the provenance of
//! its value. Statements are validated on construction and never mutated
//! afterwards; use [`StatementBuilder`] to accumulate the statements of one
//! source record.

mod builder;

pub use builder::StatementBuilder;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const MAX_SUBJECT_ID_LEN: usize = 100;
pub const MAX_PREDICATE_LEN: usize = 50;
pub const MAX_OBJECT_ID_LEN: usize = 512;
pub const MAX_OBJECT_TYPE_LEN: usize = 50;
pub const MAX_SOURCE_ID_LEN: usize = 50;
pub const MAX_SOURCE_RECORD_ID_LEN: usize = 50;
/// Provenance paths longer than this are truncated rather than rejected
pub const MAX_SOURCE_RECORD_PATH_LEN: usize = 50;

pub const XSD_BOOLEAN: &str = "xsd:boolean";

const ELLIPSIS: &str = "...";

/// Raised when a statement cannot be constructed. Aborts the whole record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatementError {
    #[error("subject_id missing")]
    MissingSubject,

    #[error("{subject}: predicate missing")]
    MissingPredicate { subject: String },

    #[error("{subject}: no source_id given")]
    MissingSourceId { subject: String },

    #[error("{subject} > {predicate}: no source_record_id given")]
    MissingSourceRecordId { subject: String, predicate: String },

    #[error("{subject} > {predicate}: invalid object: {reason}")]
    InvalidObject {
        subject: String,
        predicate: String,
        reason: &'static str,
    },

    #[error("{subject}: {field} is {len} chars, limit is {max}")]
    FieldTooLong {
        subject: String,
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// Scalar object value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Literal {
    fn is_empty_text(&self) -> bool {
        matches!(self, Literal::Text(s) if s.is_empty())
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{}", x),
            Literal::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Text(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::Text(s)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Boolean(b)
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Integer(i)
    }
}

/// The object half of a statement, before it is attached to a subject
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementObject {
    pub id: Option<String>,
    pub literal: Option<Literal>,
    pub label: Option<String>,
    pub object_type: Option<String>,
}

impl StatementObject {
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn literal(literal: impl Into<Literal>) -> Self {
        Self {
            literal: Some(literal.into()),
            ..Default::default()
        }
    }

    /// A typed `xsd:boolean` literal; `false` is a usable value here
    pub fn boolean(value: bool) -> Self {
        Self::literal(value).with_type(XSD_BOOLEAN)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_type = Some(object_type.into());
        self
    }

    fn is_boolean_typed(&self) -> bool {
        self.object_type.as_deref() == Some(XSD_BOOLEAN)
    }

    fn usable_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    fn usable_literal(&self) -> Option<&Literal> {
        self.literal.as_ref().filter(|lit| match lit {
            Literal::Boolean(false) => self.is_boolean_typed(),
            other => !other.is_empty_text(),
        })
    }
}

/// Where a statement's value came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: String,
    pub source_record_id: String,
    pub source_record_path: Option<String>,
}

impl Provenance {
    pub fn new(source_id: impl Into<String>, source_record_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source_record_id: source_record_id.into(),
            source_record_path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.source_record_path = Some(path.into());
        self
    }

    /// Overlay the fields set in `over` onto this provenance
    pub fn merge(&self, over: &ProvenanceOverride) -> Provenance {
        Provenance {
            source_id: over.source_id.clone().unwrap_or_else(|| self.source_id.clone()),
            source_record_id: over
                .source_record_id
                .clone()
                .unwrap_or_else(|| self.source_record_id.clone()),
            source_record_path: over
                .source_record_path
                .clone()
                .or_else(|| self.source_record_path.clone()),
        }
    }
}

/// Per-statement provenance adjustments on top of a builder's base provenance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceOverride {
    pub source_id: Option<String>,
    pub source_record_id: Option<String>,
    pub source_record_path: Option<String>,
}

impl ProvenanceOverride {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            source_record_path: Some(path.into()),
            ..Default::default()
        }
    }
}

/// One persisted fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    subject_id: String,
    predicate: String,
    object_id: Option<String>,
    object_literal: Option<Literal>,
    object_label: Option<String>,
    object_type: Option<String>,
    source_id: String,
    source_record_id: String,
    source_record_path: Option<String>,
    creator_id: u32,
    index: usize,
}

impl Statement {
    /// Validate and construct a statement
    pub fn new(
        subject_id: impl Into<String>,
        predicate: impl Into<String>,
        object: StatementObject,
        creator_id: u32,
        provenance: Provenance,
        index: usize,
    ) -> Result<Self, StatementError> {
        let subject_id = subject_id.into();
        let predicate = predicate.into();

        if subject_id.is_empty() {
            return Err(StatementError::MissingSubject);
        }
        if predicate.is_empty() {
            return Err(StatementError::MissingPredicate {
                subject: subject_id,
            });
        }
        check_width(&subject_id, "subject_id", &subject_id, MAX_SUBJECT_ID_LEN)?;
        check_width(&subject_id, "predicate", &predicate, MAX_PREDICATE_LEN)?;

        let invalid = |reason| StatementError::InvalidObject {
            subject: subject_id.clone(),
            predicate: predicate.clone(),
            reason,
        };
        let (object_id, object_literal) = match (object.usable_id(), object.usable_literal()) {
            (Some(_), Some(_)) => return Err(invalid("both object_id and object_literal given")),
            (None, None) => return Err(invalid("no object given")),
            (Some(id), None) => (Some(id.to_string()), None),
            (None, Some(lit)) => (None, Some(lit.clone())),
        };
        if let Some(ref id) = object_id {
            check_width(&subject_id, "object_id", id, MAX_OBJECT_ID_LEN)?;
        }
        if let Some(ref ty) = object.object_type {
            check_width(&subject_id, "object_type", ty, MAX_OBJECT_TYPE_LEN)?;
        }

        if provenance.source_id.is_empty() {
            return Err(StatementError::MissingSourceId {
                subject: subject_id,
            });
        }
        if provenance.source_record_id.is_empty() {
            return Err(StatementError::MissingSourceRecordId {
                subject: subject_id,
                predicate,
            });
        }
        check_width(&subject_id, "source_id", &provenance.source_id, MAX_SOURCE_ID_LEN)?;
        check_width(
            &subject_id,
            "source_record_id",
            &provenance.source_record_id,
            MAX_SOURCE_RECORD_ID_LEN,
        )?;

        Ok(Self {
            subject_id,
            predicate,
            object_id,
            object_literal,
            object_label: object.label,
            object_type: object.object_type,
            source_id: provenance.source_id,
            source_record_id: provenance.source_record_id,
            source_record_path: provenance.source_record_path.map(truncate_path),
            creator_id,
            index,
        })
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    pub fn object_id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }

    pub fn object_literal(&self) -> Option<&Literal> {
        self.object_literal.as_ref()
    }

    pub fn object_label(&self) -> Option<&str> {
        self.object_label.as_deref()
    }

    pub fn object_type(&self) -> Option<&str> {
        self.object_type.as_deref()
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn source_record_id(&self) -> &str {
        &self.source_record_id
    }

    pub fn source_record_path(&self) -> Option<&str> {
        self.source_record_path.as_deref()
    }

    pub fn creator_id(&self) -> u32 {
        self.creator_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether this statement carries the same object value: literals are
    /// compared when `object` has one, ids otherwise.
    pub fn matches_object(&self, object: &StatementObject) -> bool {
        match object.literal {
            Some(ref lit) => self.object_literal.as_ref() == Some(lit),
            None => object.id.is_some() && self.object_id == object.id,
        }
    }

    /// Primary key of the statement in the store
    pub fn key(&self) -> (&str, &str, usize) {
        (&self.subject_id, &self.predicate, self.index)
    }
}

fn check_width(
    subject: &str,
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<(), StatementError> {
    let len = value.chars().count();
    if len > max {
        return Err(StatementError::FieldTooLong {
            subject: subject.to_string(),
            field,
            len,
            max,
        });
    }
    Ok(())
}

fn truncate_path(path: String) -> String {
    if path.chars().count() <= MAX_SOURCE_RECORD_PATH_LEN {
        return path;
    }
    let keep = MAX_SOURCE_RECORD_PATH_LEN - ELLIPSIS.len();
    let mut truncated: String = path.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn prov() -> Provenance {
        Provenance::new("10004", "1234")
    }

    fn statement(predicate: &str, object: StatementObject) -> Result<Statement, StatementError> {
        Statement::new("b1234", predicate, object, 1, prov(), 0)
    }

    #[test]
    fn test_predicate_width_boundary() {
        let fifty = "p".repeat(50);
        let fifty_one = "p".repeat(51);

        assert!(statement(&fifty, StatementObject::id("X")).is_ok());
        let err = statement(&fifty_one, StatementObject::id("X")).unwrap_err();
        assert_eq!(
            err,
            StatementError::FieldTooLong {
                subject: "b1234".to_string(),
                field: "predicate",
                len: 51,
                max: 50,
            }
        );
    }

    #[test]
    fn test_object_id_width_limit() {
        assert!(statement("bf:note", StatementObject::id("x".repeat(512))).is_ok());
        assert!(matches!(
            statement("bf:note", StatementObject::id("x".repeat(513))),
            Err(StatementError::FieldTooLong { field: "object_id", .. })
        ));
    }

    #[test]
    fn test_boolean_false_allowed_only_when_typed() {
        let typed = statement("nypl:suppressed", StatementObject::boolean(false)).unwrap();
        assert_eq!(typed.object_literal(), Some(&Literal::Boolean(false)));
        assert_eq!(typed.object_type(), Some(XSD_BOOLEAN));

        let untyped = statement("nypl:suppressed", StatementObject::literal(false));
        assert!(matches!(untyped, Err(StatementError::InvalidObject { .. })));
    }

    #[test]
    fn test_missing_object_is_rejected() {
        let err = statement("dcterms:title", StatementObject::default()).unwrap_err();
        assert!(err.to_string().contains("no object given"));

        let empty = statement("dcterms:title", StatementObject::literal(""));
        assert!(empty.is_err());
    }

    #[test]
    fn test_both_objects_are_rejected() {
        let object = StatementObject {
            id: Some("urn:bnum:b1".to_string()),
            literal: Some(Literal::from("b1")),
            ..Default::default()
        };
        assert!(statement("nypl:bnum", object).is_err());
    }

    #[test]
    fn test_missing_subject_and_provenance() {
        assert_eq!(
            Statement::new("", "bf:note", StatementObject::id("X"), 1, prov(), 0),
            Err(StatementError::MissingSubject)
        );
        let no_record = Provenance::new("10004", "");
        assert!(matches!(
            Statement::new("b1", "bf:note", StatementObject::id("X"), 1, no_record, 0),
            Err(StatementError::MissingSourceRecordId { .. })
        ));
    }

    #[test]
    fn test_long_path_is_truncated() {
        let long_path = "varFields.856.subfields.".repeat(4);
        let s = Statement::new(
            "b1",
            "bf:note",
            StatementObject::literal("note"),
            1,
            prov().with_path(long_path),
            0,
        )
        .unwrap();

        let path = s.source_record_path().unwrap();
        assert_eq!(path.chars().count(), MAX_SOURCE_RECORD_PATH_LEN);
        assert!(path.ends_with("..."));
    }

    #[test]
    fn test_provenance_merge_keeps_base_fields() {
        let merged = prov().merge(&ProvenanceOverride::path("856 $u"));
        assert_eq!(merged.source_id, "10004");
        assert_eq!(merged.source_record_id, "1234");
        assert_eq!(merged.source_record_path.as_deref(), Some("856 $u"));
    }

    proptest! {
        #[test]
        fn prop_exactly_one_object_field_is_set(
            id in proptest::option::of("[a-z:]{0,12}"),
            text in proptest::option::of("[a-z ]{0,12}"),
            flag in proptest::option::of(any::<bool>()),
            typed in any::<bool>(),
        ) {
            let literal = flag.map(Literal::Boolean).or(text.map(Literal::Text));
            let object = StatementObject {
                id,
                literal,
                label: None,
                object_type: typed.then(|| XSD_BOOLEAN.to_string()),
            };
            if let Ok(s) = statement("bf:note", object) {
                prop_assert!(s.object_id().is_some() != s.object_literal().is_some());
                if s.object_literal() == Some(&Literal::Boolean(false)) {
                    prop_assert_eq!(s.object_type(), Some(XSD_BOOLEAN));
                }
            }
        }
    }
}
