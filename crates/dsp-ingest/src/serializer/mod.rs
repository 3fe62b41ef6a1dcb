//! Record serializers
//!
//! A serializer turns one decoded record into the complete statement set for
//! its subject, or fails. Serializers are registered per [`RecordKind`].

mod bib;
mod holding;
mod item;

pub use bib::BibSerializer;
pub use holding::HoldingSerializer;
pub use item::ItemSerializer;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::mapping::{MappingContext, MappingError};
use crate::record::{CatalogRecord, RecordKind};
use crate::statement::{Provenance, Statement, StatementBuilder, StatementError};

/// Transform that produced a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Creator {
    pub id: u32,
    pub name: &'static str,
}

impl Creator {
    pub const CORE_SERIALIZER: Creator = Creator {
        id: 1,
        name: "Core serializer",
    };
}

/// Catalog a record was drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datasource {
    pub id: u32,
    pub nypl_source: &'static str,
}

impl Datasource {
    pub const SIERRA_NYPL: Datasource = Datasource {
        id: 10004,
        nypl_source: "sierra-nypl",
    };
    pub const RECAP_NYPL: Datasource = Datasource {
        id: 10010,
        nypl_source: "recap-nypl",
    };
    pub const RECAP_PUL: Datasource = Datasource {
        id: 10011,
        nypl_source: "recap-pul",
    };
    pub const RECAP_CUL: Datasource = Datasource {
        id: 10012,
        nypl_source: "recap-cul",
    };

    const ALL: [Datasource; 4] = [
        Self::SIERRA_NYPL,
        Self::RECAP_NYPL,
        Self::RECAP_PUL,
        Self::RECAP_CUL,
    ];

    /// Records without a `nyplSource` are Sierra records
    pub fn for_nypl_source(source: Option<&str>) -> Option<Datasource> {
        let source = source.unwrap_or(Self::SIERRA_NYPL.nypl_source).to_lowercase();
        Self::ALL.into_iter().find(|d| d.nypl_source == source)
    }

    pub fn nypl_source(&self) -> &'static str {
        self.nypl_source
    }
}

#[derive(Error, Debug)]
pub enum SerializeError {
    #[error(transparent)]
    Statement(#[from] StatementError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("Unable to parse datasource from nyplSource {0:?}")]
    UnknownDatasource(Option<String>),

    #[error("Record at offset {offset} has no id")]
    MissingId { offset: u64 },

    #[error("No serializer registered for {0} records")]
    NoSerializer(RecordKind),
}

#[async_trait]
pub trait RecordSerializer: Send + Sync {
    fn kind(&self) -> RecordKind;

    /// All statements for `record`; any error rejects the whole record
    async fn serialize(&self, record: &CatalogRecord) -> Result<Vec<Statement>, SerializeError>;
}

/// Serializers keyed by record kind
#[derive(Clone, Default)]
pub struct SerializerRegistry {
    serializers: HashMap<RecordKind, Arc<dyn RecordSerializer>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bib, item and holding serializers over the given mapping tables
    pub fn with_defaults(mapping: Arc<MappingContext>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BibSerializer::new(Arc::clone(&mapping))));
        registry.register(Arc::new(ItemSerializer::new(Arc::clone(&mapping))));
        registry.register(Arc::new(HoldingSerializer::new(mapping)));
        registry
    }

    pub fn register(&mut self, serializer: Arc<dyn RecordSerializer>) {
        self.serializers.insert(serializer.kind(), serializer);
    }

    pub fn get(&self, kind: RecordKind) -> Option<&Arc<dyn RecordSerializer>> {
        self.serializers.get(&kind)
    }

    /// Serialize a record followed by its enrichment companions
    pub async fn serialize(&self, record: &CatalogRecord) -> Result<Vec<Statement>, SerializeError> {
        let mut statements = self.serialize_one(record).await?;
        for companion in &record.companions {
            statements.extend(self.serialize_one(companion).await?);
        }
        Ok(statements)
    }

    async fn serialize_one(&self, record: &CatalogRecord) -> Result<Vec<Statement>, SerializeError> {
        let serializer = self
            .get(record.kind)
            .ok_or(SerializeError::NoSerializer(record.kind))?;
        serializer.serialize(record).await
    }
}

/// Builder for `record` with core-serializer provenance
pub(crate) fn core_builder(
    record: &CatalogRecord,
) -> Result<(StatementBuilder, Datasource), SerializeError> {
    let datasource = Datasource::for_nypl_source(record.nypl_source.as_deref())
        .ok_or_else(|| SerializeError::UnknownDatasource(record.nypl_source.clone()))?;
    let (id, subject) = match (record.id(), record.prefixed_id()) {
        (Some(id), Some(subject)) => (id, subject),
        _ => return Err(SerializeError::MissingId { offset: record.offset }),
    };

    let builder = StatementBuilder::new(
        subject,
        Creator::CORE_SERIALIZER.id,
        Provenance::new(datasource.id.to_string(), id),
    )?;
    Ok((builder, datasource))
}

/// `urn:bnum:` identifier of a bib, carrying the partner prefix of `record`
pub(crate) fn bnum_urn(record: &CatalogRecord, bib_id: &str) -> String {
    let prefix = if record.is_partner_record() {
        record
            .nypl_source
            .as_deref()
            .and_then(|s| s.chars().nth(6))
            .map(|c| c.to_ascii_lowercase().to_string())
            .unwrap_or_default()
    } else {
        String::new()
    };
    format!("urn:bnum:{}b{}", prefix, bib_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datasource_resolution() {
        assert_eq!(Datasource::for_nypl_source(None), Some(Datasource::SIERRA_NYPL));
        assert_eq!(
            Datasource::for_nypl_source(Some("recap-PUL")).map(|d| d.id),
            Some(10011)
        );
        assert_eq!(Datasource::for_nypl_source(Some("test")), None);
    }

    #[test]
    fn test_bnum_urn_uses_partner_prefix() {
        let mut record = CatalogRecord {
            nypl_source: Some("recap-cul".to_string()),
            ..Default::default()
        };
        assert_eq!(bnum_urn(&record, "42"), "urn:bnum:cb42");

        record.nypl_source = Some("sierra-nypl".to_string());
        assert_eq!(bnum_urn(&record, "42"), "urn:bnum:b42");
    }
}
