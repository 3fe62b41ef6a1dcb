use async_trait::async_trait;
use std::sync::Arc;

use super::{core_builder, RecordSerializer, SerializeError};
use crate::mapping::MappingContext;
use crate::record::{CatalogRecord, ElectronicResourceType, RecordKind};
use crate::statement::{ProvenanceOverride, Statement, StatementBuilder, StatementObject};

const LANGUAGE_LABELS: &str = "language-code-to-label";

pub struct BibSerializer {
    mapping: Arc<MappingContext>,
}

impl BibSerializer {
    pub fn new(mapping: Arc<MappingContext>) -> Self {
        Self { mapping }
    }

    /// Literal statements for every value of a mapped MARC field
    fn add_mapped_literals(
        &self,
        builder: &mut StatementBuilder,
        record: &CatalogRecord,
        name: &str,
        nypl_source: &str,
    ) -> Result<(), SerializeError> {
        let fields = &self.mapping.fields;
        let predicate = fields.predicate_for(RecordKind::Bib, name)?;
        for path in fields.paths_for(RecordKind::Bib, name, nypl_source)? {
            let over = ProvenanceOverride::path(path.describe());
            for value in record.var_field(&path.marc, &path.subfield_refs()) {
                builder.add(predicate, StatementObject::literal(value), None, Some(&over))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSerializer for BibSerializer {
    fn kind(&self) -> RecordKind {
        RecordKind::Bib
    }

    async fn serialize(&self, record: &CatalogRecord) -> Result<Vec<Statement>, SerializeError> {
        let (mut builder, datasource) = core_builder(record)?;
        let source = datasource.nypl_source();
        let fields = &self.mapping.fields;

        let bnum = format!("urn:bnum:{}", builder.subject_id());
        builder.add("rdfs:type", StatementObject::id("nypl:Item"), Some(0), None)?;
        builder.add(
            "dcterms:identifier",
            StatementObject::id(bnum),
            Some(0),
            Some(&ProvenanceOverride::path("id")),
        )?;

        let (suppressed, rationale) = record.suppression();
        let suppression_path = (!rationale.is_empty())
            .then(|| ProvenanceOverride::path(rationale.join(", ")));
        builder.add(
            fields.predicate_for(RecordKind::Bib, "Suppressed")?,
            StatementObject::boolean(suppressed),
            Some(0),
            suppression_path.as_ref(),
        )?;

        self.add_mapped_literals(&mut builder, record, "Title", source)?;

        let language = fields.predicate_for(RecordKind::Bib, "Language")?;
        for path in fields.paths_for(RecordKind::Bib, "Language", source)? {
            let over = ProvenanceOverride::path(path.describe());
            for code in record.var_field(&path.marc, &path.subfield_refs()) {
                let code = code.trim().to_lowercase();
                let mut object = StatementObject::id(format!("lang:{}", code));
                if let Some(label) = self.mapping.lookup(LANGUAGE_LABELS, &code) {
                    object = object.with_label(label);
                }
                builder.add(language, object, None, Some(&over))?;
            }
        }

        self.add_mapped_literals(&mut builder, record, "Contributor literal", source)?;
        self.add_mapped_literals(&mut builder, record, "Publisher literal", source)?;
        self.add_mapped_literals(&mut builder, record, "Note", source)?;

        // Appendix-type links stay on the bib; ER links become an electronic item
        let appendices = record
            .electronic_resources
            .iter()
            .filter(|r| r.resource_type == ElectronicResourceType::Appendix);
        for (index, resource) in appendices.enumerate() {
            let mut object = StatementObject::literal(resource.url.as_str());
            if let Some(ref label) = resource.label {
                object = object.with_label(label.as_str());
            }
            builder.add(
                "bf:supplementaryContent",
                object,
                Some(index),
                Some(&ProvenanceOverride::path("856")),
            )?;
        }

        Ok(builder.into_statements())
    }
}
