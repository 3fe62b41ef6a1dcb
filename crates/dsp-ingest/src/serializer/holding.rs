use async_trait::async_trait;
use std::sync::Arc;

use super::{core_builder, RecordSerializer, SerializeError};
use crate::mapping::MappingContext;
use crate::record::{CatalogRecord, CheckInBox, RecordKind};
use crate::statement::{Literal, ProvenanceOverride, Statement, StatementObject};

pub struct HoldingSerializer {
    mapping: Arc<MappingContext>,
}

impl HoldingSerializer {
    pub fn new(mapping: Arc<MappingContext>) -> Self {
        Self { mapping }
    }
}

/// Nested fields of a check-in box; empty values are left out
fn check_in_box_fields(b: &CheckInBox) -> Vec<(String, StatementObject)> {
    let mut fields = vec![("rdf:type".to_string(), StatementObject::id("nypl:CheckInBox"))];

    let coverage = b.coverage();
    if !coverage.is_empty() {
        fields.push(("dcterms:coverage".to_string(), StatementObject::literal(coverage)));
    }
    if let Some(status) = b.status.label.as_deref().filter(|s| !s.is_empty()) {
        fields.push(("bf:status".to_string(), StatementObject::literal(status)));
    }
    if let Some(count) = b.copy_count {
        fields.push(("bf:count".to_string(), StatementObject::literal(Literal::Integer(count))));
    }
    if let Some(part) = b.box_count {
        fields.push(("bf:part".to_string(), StatementObject::literal(Literal::Integer(part))));
    }
    fields
}

#[async_trait]
impl RecordSerializer for HoldingSerializer {
    fn kind(&self) -> RecordKind {
        RecordKind::Holding
    }

    async fn serialize(&self, record: &CatalogRecord) -> Result<Vec<Statement>, SerializeError> {
        let (mut builder, datasource) = core_builder(record)?;
        let fields = &self.mapping.fields;
        let predicate = |name: &str| fields.predicate_for(RecordKind::Holding, name);

        builder.add("rdfs:type", StatementObject::id("nypl:Holding"), Some(0), None)?;

        let bib_path = ProvenanceOverride::path("bibIds");
        for (index, bib_id) in record.bib_ids.iter().enumerate() {
            builder.add(
                "nypl:bnum",
                StatementObject::id(format!("urn:bnum:b{}", bib_id)),
                Some(index),
                Some(&bib_path),
            )?;
        }

        let (suppressed, rationale) = record.suppression();
        if suppressed {
            builder.add(
                predicate("Suppressed")?,
                StatementObject::boolean(true),
                Some(0),
                Some(&ProvenanceOverride::path(rationale.join(", "))),
            )?;
            return Ok(builder.into_statements());
        }
        builder.add(predicate("Suppressed")?, StatementObject::boolean(false), Some(0), None)?;

        // Call number and physical location both come from the 852
        let source = datasource.nypl_source();
        if let Some(path) = fields
            .paths_for(RecordKind::Holding, "Call Number", source)?
            .first()
        {
            let over = ProvenanceOverride::path(path.describe());
            let location_over = ProvenanceOverride::path("852 $khinz");
            for (index, call_number) in record
                .var_field(&path.marc, &path.subfield_refs())
                .iter()
                .enumerate()
            {
                let call_number = call_number.strip_prefix("|h").unwrap_or(call_number);
                builder.add(
                    predicate("Call Number")?,
                    StatementObject::literal(call_number),
                    Some(index),
                    Some(&over),
                )?;
                builder.add(
                    predicate("Physical Location")?,
                    StatementObject::literal(call_number),
                    Some(index),
                    Some(&location_over),
                )?;
            }
        }

        if let Some(location) = record.location.as_ref().filter(|l| !l.code.is_empty()) {
            let mut object = StatementObject::id(format!("loc:{}", location.code));
            if let Some(ref name) = location.name {
                object = object.with_label(name.as_str());
            }
            builder.add(
                predicate("Location")?,
                object,
                Some(0),
                Some(&ProvenanceOverride::path("location")),
            )?;
        }

        let statement_path = ProvenanceOverride::path("holdings.holding_statement");
        for (index, h) in record.holding_strings().into_iter().enumerate() {
            builder.add(
                predicate("Holding Statement")?,
                StatementObject::literal(h),
                Some(index),
                Some(&statement_path),
            )?;
        }

        // Format: 843 $a, falling back on the legacy `i` field tag
        let format = record
            .var_field("843", &["a"])
            .into_iter()
            .next()
            .map(|f| (f, "843 $a"))
            .or_else(|| record.field_tag("i").into_iter().next().map(|f| (f, "fieldTag i")));
        if let Some((value, path)) = format {
            builder.add(
                predicate("Format")?,
                StatementObject::literal(value),
                Some(0),
                Some(&ProvenanceOverride::path(path)),
            )?;
        }

        let note_path = ProvenanceOverride::path("fieldTag n");
        for (index, note) in record.field_tag("n").into_iter().enumerate() {
            builder.add(predicate("Note")?, StatementObject::literal(note), Some(index), Some(&note_path))?;
        }

        let box_path = ProvenanceOverride::path("checkInCards");
        for (index, check_in_box) in record.check_in_cards.iter().enumerate() {
            builder.add_blank_node(
                predicate("Check In Box")?,
                check_in_box_fields(check_in_box),
                index,
                Some(&box_path),
            )?;
        }

        Ok(builder.into_statements())
    }
}
