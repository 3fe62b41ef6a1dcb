use async_trait::async_trait;
use std::sync::Arc;

use super::{bnum_urn, core_builder, RecordSerializer, SerializeError};
use crate::mapping::MappingContext;
use crate::record::{CatalogRecord, ElectronicResourceType, RecordKind};
use crate::statement::{ProvenanceOverride, Statement, StatementObject};

pub struct ItemSerializer {
    mapping: Arc<MappingContext>,
}

impl ItemSerializer {
    pub fn new(mapping: Arc<MappingContext>) -> Self {
        Self { mapping }
    }
}

#[async_trait]
impl RecordSerializer for ItemSerializer {
    fn kind(&self) -> RecordKind {
        RecordKind::Item
    }

    async fn serialize(&self, record: &CatalogRecord) -> Result<Vec<Statement>, SerializeError> {
        let (mut builder, datasource) = core_builder(record)?;
        let fields = &self.mapping.fields;

        builder.add("rdfs:type", StatementObject::id("bf:Item"), Some(0), None)?;

        let bib_path = ProvenanceOverride::path("bibIds");
        for (index, bib_id) in record.bib_ids.iter().enumerate() {
            builder.add(
                "nypl:bnum",
                StatementObject::id(bnum_urn(record, bib_id)),
                Some(index),
                Some(&bib_path),
            )?;
        }

        // Items extracted from a bib's 856 fields carry nothing but their links
        if !record.electronic_resources.is_empty() {
            let locator = fields.predicate_for(RecordKind::Item, "Electronic locator")?;
            let links = record
                .electronic_resources
                .iter()
                .filter(|r| r.resource_type == ElectronicResourceType::Resource);
            for (index, resource) in links.enumerate() {
                let mut object = StatementObject::literal(resource.url.as_str());
                if let Some(ref label) = resource.label {
                    object = object.with_label(label.as_str());
                }
                builder.add(locator, object, Some(index), Some(&ProvenanceOverride::path("856")))?;
            }
            return Ok(builder.into_statements());
        }

        let suppressed_pred = fields.predicate_for(RecordKind::Item, "Suppressed")?;
        let (suppressed, rationale) = record.suppression();
        if suppressed {
            builder.add(
                suppressed_pred,
                StatementObject::boolean(true),
                Some(0),
                Some(&ProvenanceOverride::path(rationale.join(", "))),
            )?;
            return Ok(builder.into_statements());
        }
        builder.add(suppressed_pred, StatementObject::boolean(false), Some(0), None)?;

        let source = datasource.nypl_source();
        let barcode = fields.predicate_for(RecordKind::Item, "Barcode")?;
        for path in fields.paths_for(RecordKind::Item, "Barcode", source)? {
            let over = ProvenanceOverride::path(path.describe());
            for value in record.var_field(&path.marc, &path.subfield_refs()) {
                let object = StatementObject::id(format!("urn:barcode:{}", value.trim()));
                builder.add(barcode, object, None, Some(&over))?;
            }
        }

        let call_number = fields.predicate_for(RecordKind::Item, "Call number")?;
        for path in fields.paths_for(RecordKind::Item, "Call number", source)? {
            let over = ProvenanceOverride::path(path.describe());
            for value in record.var_field(&path.marc, &path.subfield_refs()) {
                let value = value.strip_prefix("|h").unwrap_or(&value).to_string();
                builder.add(call_number, StatementObject::literal(value), None, Some(&over))?;
            }
        }

        Ok(builder.into_statements())
    }
}
