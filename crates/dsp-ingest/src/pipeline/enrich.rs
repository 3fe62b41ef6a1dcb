//! Record enrichment stages run ahead of serialization

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::mapping::MappingContext;
use crate::persist::{StatementStore, StoreError};
use crate::record::{CatalogRecord, ElectronicResource, ElectronicResourceType, RecordKind};

pub const RESOURCE_CLASS_TABLE: &str = "856-label-to-resource-class";

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait Enricher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn enrich(&self, record: CatalogRecord) -> Result<CatalogRecord, EnrichError>;
}

/// Pulls electronic resources out of a bib's 856 fields
///
/// Bibs with at least one full-text resource get an electronic item companion
/// `{id}-e` carrying those links.
pub struct ElectronicItemExtractor {
    mapping: Arc<MappingContext>,
}

impl ElectronicItemExtractor {
    pub fn new(mapping: Arc<MappingContext>) -> Self {
        Self { mapping }
    }

    /// Classified links of `record`; unclassified labels are dropped
    pub fn extract(&self, record: &CatalogRecord) -> Vec<ElectronicResource> {
        record
            .var_field_blocks("856")
            .filter_map(|block| {
                let values: Vec<&str> = block
                    .subfields
                    .iter()
                    .map(|s| s.content.as_str())
                    .filter(|v| !v.is_empty())
                    .collect();

                let url = values.iter().find(|v| is_url(v))?;
                let mut label: Option<&str> = None;
                for value in values.iter().filter(|v| !is_url(v)) {
                    match label {
                        Some(l) if value.len() <= l.len() => {}
                        _ => label = Some(value),
                    }
                }
                let label = label?;

                let resource_type = match self.mapping.lookup(RESOURCE_CLASS_TABLE, label) {
                    Some("ER") => ElectronicResourceType::Resource,
                    Some("Appendix") => ElectronicResourceType::Appendix,
                    _ => {
                        debug!(label, "Unclassified 856 label");
                        return None;
                    }
                };

                Some(ElectronicResource {
                    url: url.to_string(),
                    label: Some(label.to_string()),
                    resource_type,
                })
            })
            .collect()
    }
}

fn is_url(value: &str) -> bool {
    value.starts_with("http:") || value.starts_with("https:")
}

#[async_trait]
impl Enricher for ElectronicItemExtractor {
    fn name(&self) -> &'static str {
        "electronic-item-extractor"
    }

    async fn enrich(&self, mut record: CatalogRecord) -> Result<CatalogRecord, EnrichError> {
        if record.kind != RecordKind::Bib {
            return Ok(record);
        }

        let resources = self.extract(&record);
        let full_text: Vec<ElectronicResource> = resources
            .iter()
            .filter(|r| r.resource_type == ElectronicResourceType::Resource)
            .cloned()
            .collect();

        if let (Some(id), false) = (record.id(), full_text.is_empty()) {
            debug!(bib_id = id, links = full_text.len(), "Adding electronic item");
            let item = CatalogRecord {
                id: Some(format!("{}-e", id)),
                nypl_source: record.nypl_source.clone(),
                bib_ids: vec![id.to_string()],
                kind: RecordKind::Item,
                offset: record.offset,
                electronic_resources: full_text,
                ..Default::default()
            };
            record.companions.push(item);
        }

        record.electronic_resources = resources;
        Ok(record)
    }
}

/// Recovers missing bib ids of items and holdings from statements already stored
pub struct BibIdRemediator {
    store: Arc<dyn StatementStore>,
    scope: String,
}

impl BibIdRemediator {
    pub fn new(store: Arc<dyn StatementStore>, scope: impl Into<String>) -> Self {
        Self {
            store,
            scope: scope.into(),
        }
    }
}

#[async_trait]
impl Enricher for BibIdRemediator {
    fn name(&self) -> &'static str {
        "bib-id-remediator"
    }

    async fn enrich(&self, mut record: CatalogRecord) -> Result<CatalogRecord, EnrichError> {
        if record.kind == RecordKind::Bib || !record.bib_ids.is_empty() {
            return Ok(record);
        }
        let Some(subject) = record.prefixed_id() else {
            return Ok(record);
        };

        let stored = self
            .store
            .get_statement(&self.scope, &subject, "nypl:bnum")
            .await?;

        if let Some(bib_id) = stored.as_ref().and_then(|s| s.object_id()).and_then(bib_id_from_urn) {
            info!(subject = %subject, bib_id, "Remediated missing bib id");
            record.bib_ids.push(bib_id.to_string());
        }
        Ok(record)
    }
}

/// `urn:bnum:pb123` -> `123`
fn bib_id_from_urn(urn: &str) -> Option<&str> {
    let (_, id) = urn.strip_prefix("urn:bnum:")?.split_once('b')?;
    (!id.is_empty()).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStatementStore;
    use crate::statement::{Provenance, Statement, StatementObject};
    use serde_json::json;

    fn decode(kind: RecordKind, value: serde_json::Value) -> CatalogRecord {
        CatalogRecord::from_slice(kind, 7, value.to_string().as_bytes()).unwrap()
    }

    fn extractor() -> ElectronicItemExtractor {
        ElectronicItemExtractor::new(Arc::new(MappingContext::builtin().unwrap()))
    }

    fn link(url: &str, label: &str) -> serde_json::Value {
        json!({ "marcTag": "856", "subfields": [
            { "tag": "u", "content": url },
            { "tag": "z", "content": label },
            { "tag": "3", "content": "v.1" }
        ]})
    }

    #[test]
    fn test_extract_pairs_url_with_longest_label() {
        let bib = decode(
            RecordKind::Bib,
            json!({ "id": "1", "varFields": [link("http://example.org/ft", "Full text")] }),
        );
        let resources = extractor().extract(&bib);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].url, "http://example.org/ft");
        assert_eq!(resources[0].label.as_deref(), Some("Full text"));
        assert_eq!(resources[0].resource_type, ElectronicResourceType::Resource);
    }

    #[test]
    fn test_extract_drops_incomplete_and_unclassified() {
        let bib = decode(
            RecordKind::Bib,
            json!({ "id": "1", "varFields": [
                { "marcTag": "856", "subfields": [{ "tag": "u", "content": "http://example.org" }] },
                link("https://example.org/x", "Something nobody classified")
            ]}),
        );
        assert!(extractor().extract(&bib).is_empty());
    }

    #[tokio::test]
    async fn test_enrich_adds_electronic_item() {
        let bib = decode(
            RecordKind::Bib,
            json!({ "id": "12", "nyplSource": "sierra-nypl",
                    "varFields": [link("http://example.org/ft", "Full text")] }),
        );
        let bib = extractor().enrich(bib).await.unwrap();

        assert_eq!(bib.companions.len(), 1);
        let item = &bib.companions[0];
        assert_eq!(item.id(), Some("12-e"));
        assert_eq!(item.kind, RecordKind::Item);
        assert_eq!(item.bib_ids, vec!["12".to_string()]);
        assert_eq!(item.electronic_resources.len(), 1);
    }

    #[tokio::test]
    async fn test_enrich_passes_items_through() {
        let item = decode(RecordKind::Item, json!({ "id": "5", "varFields": [link("http://x", "Full text")] }));
        let item = extractor().enrich(item).await.unwrap();
        assert!(item.companions.is_empty());
        assert!(item.electronic_resources.is_empty());
    }

    #[test]
    fn test_bib_id_from_urn() {
        assert_eq!(bib_id_from_urn("urn:bnum:b123"), Some("123"));
        assert_eq!(bib_id_from_urn("urn:bnum:pb99"), Some("99"));
        assert_eq!(bib_id_from_urn("urn:barcode:1"), None);
    }

    #[tokio::test]
    async fn test_remediator_fills_bib_id_from_store() {
        let store = Arc::new(MemoryStatementStore::new());
        let stored = Statement::new(
            "i10",
            "nypl:bnum",
            StatementObject::id("urn:bnum:b77"),
            1,
            Provenance::new("10004", "10"),
            0,
        )
        .unwrap();
        store.insert("resource", stored).await;

        let remediator = BibIdRemediator::new(store, "resource");
        let item = decode(RecordKind::Item, json!({ "id": "10" }));
        let item = remediator.enrich(item).await.unwrap();
        assert_eq!(item.bib_ids, vec!["77".to_string()]);

        let known = decode(RecordKind::Item, json!({ "id": "11", "bibIds": ["5"] }));
        let known = remediator.enrich(known).await.unwrap();
        assert_eq!(known.bib_ids, vec!["5".to_string()]);
    }
}
