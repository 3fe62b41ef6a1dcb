use regex::Regex;
use std::fmt;

use crate::record::{CatalogRecord, RecordKind};

/// Bibs converted from the accession file are never indexed
pub const DO_NOT_INDEX_PATTERN: &str = r"(?i)Rare Book Division Accession File.*?Converted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingId,
    DoNotIndex,
    NotSeekTarget,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingId => f.write_str("no primary key"),
            SkipReason::DoNotIndex => f.write_str("matches do-not-index pattern"),
            SkipReason::NotSeekTarget => f.write_str("not the record being sought"),
        }
    }
}

/// Gate applied after enrichment
#[derive(Debug, Clone)]
pub struct ValidityFilter {
    do_not_index: Regex,
    seek: Option<String>,
}

impl ValidityFilter {
    pub fn new(seek: Option<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            do_not_index: Regex::new(DO_NOT_INDEX_PATTERN)?,
            seek,
        })
    }

    pub fn check(&self, record: &CatalogRecord) -> Result<(), SkipReason> {
        let id = record.id().ok_or(SkipReason::MissingId)?;

        if let Some(ref target) = self.seek {
            let prefixed = record.prefixed_id();
            if id != target && prefixed.as_deref() != Some(target.as_str()) {
                return Err(SkipReason::NotSeekTarget);
            }
        }

        if record.kind == RecordKind::Bib {
            let flagged = serde_json::to_string(record)
                .map(|json| self.do_not_index.is_match(&json))
                .unwrap_or(false);
            if flagged {
                return Err(SkipReason::DoNotIndex);
            }
        }

        Ok(())
    }
}
