//! Catalog record model
//!
//! Records arrive as Sierra-style JSON documents. Only the fields the
//! serializers read are typed; everything else is kept in `extra` so the
//! validity filter can match against the full document.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of record carried by a stream; selects the serializer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    #[default]
    Bib,
    Item,
    Holding,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Bib => "bib",
            RecordKind::Item => "item",
            RecordKind::Holding => "holding",
        }
    }

    /// Single-letter marker used in prefixed ids (`b1234`, `pi567`)
    fn id_marker(&self) -> char {
        match self {
            RecordKind::Bib => 'b',
            RecordKind::Item => 'i',
            RecordKind::Holding => 'h',
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bib" | "bibs" => Ok(RecordKind::Bib),
            "item" | "items" => Ok(RecordKind::Item),
            "holding" | "holdings" => Ok(RecordKind::Holding),
            _ => Err(anyhow::anyhow!("Invalid record kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subfield {
    pub tag: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VarField {
    #[serde(default)]
    pub field_tag: Option<String>,
    #[serde(default)]
    pub marc_tag: Option<String>,
    #[serde(default)]
    pub ind1: Option<String>,
    #[serde(default)]
    pub ind2: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "subFields")]
    pub subfields: Vec<Subfield>,
}

impl VarField {
    /// Joined content of the selected subfields (all when `subfields` is empty),
    /// falling back on `content` when no subfields are selected
    fn extract(&self, subfields: &[&str]) -> Option<String> {
        let value = if subfields.is_empty() {
            match self.content.as_deref() {
                Some(c) if !c.is_empty() => c.to_string(),
                _ => join_subfields(self.subfields.iter()),
            }
        } else {
            join_subfields(
                self.subfields
                    .iter()
                    .filter(|s| subfields.contains(&s.tag.as_str())),
            )
        };
        (!value.is_empty()).then_some(value)
    }

    /// First subfield with `tag`
    pub fn subfield(&self, tag: &str) -> Option<&str> {
        self.subfields
            .iter()
            .find(|s| s.tag == tag)
            .map(|s| s.content.as_str())
    }
}

fn join_subfields<'a>(subs: impl Iterator<Item = &'a Subfield>) -> String {
    subs.map(|s| s.content.as_str())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixedField {
    pub label: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoldingStatement {
    #[serde(default)]
    pub holding_string: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enumeration {
    #[serde(default)]
    pub enumeration: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxStatus {
    #[serde(default)]
    pub label: Option<String>,
}

/// One box of a serial check-in card
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckInBox {
    #[serde(default)]
    pub enumeration: Enumeration,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub status: BoxStatus,
    #[serde(default)]
    pub copy_count: Option<i64>,
    #[serde(default)]
    pub box_count: Option<i64>,
}

impl CheckInBox {
    /// Enumeration followed by the date span, e.g. `v. 12 (2020-01-01 - 2020-02-01)`
    pub fn coverage(&self) -> String {
        let enumeration = self.enumeration.enumeration.clone().unwrap_or_default();
        let dates = match (&self.start_date, &self.end_date) {
            (Some(start), Some(end)) => Some(format!("{} - {}", start, end)),
            (Some(start), None) => Some(start.clone()),
            (None, Some(end)) => Some(end.clone()),
            (None, None) => None,
        };
        match dates {
            Some(d) if enumeration.is_empty() => d,
            Some(d) => format!("{} ({})", enumeration, d),
            None => enumeration,
        }
    }
}

/// Whether an 856 link points at the resource itself or at supplementary content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectronicResourceType {
    #[serde(rename = "ER")]
    Resource,
    Appendix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectronicResource {
    pub url: String,
    pub label: Option<String>,
    pub resource_type: ElectronicResourceType,
}

/// A decoded catalog record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub nypl_source: Option<String>,
    #[serde(default, deserialize_with = "strings_or_numbers")]
    pub bib_ids: Vec<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub suppressed: bool,
    #[serde(default)]
    pub var_fields: Vec<VarField>,
    #[serde(default)]
    pub fixed_fields: BTreeMap<String, FixedField>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub holdings: Vec<HoldingStatement>,
    #[serde(default, alias = "check_in_cards")]
    pub check_in_cards: Vec<CheckInBox>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,

    #[serde(skip)]
    pub kind: RecordKind,
    /// Stream offset the record was read from
    #[serde(skip)]
    pub offset: u64,
    /// Links extracted from 856 fields during enrichment
    #[serde(skip)]
    pub electronic_resources: Vec<ElectronicResource>,
    /// Records derived from this one during enrichment, serialized alongside it
    #[serde(skip)]
    pub companions: Vec<CatalogRecord>,
}

impl CatalogRecord {
    /// Decode a wire payload
    pub fn from_slice(kind: RecordKind, offset: u64, bytes: &[u8]) -> serde_json::Result<Self> {
        let mut record: CatalogRecord = serde_json::from_slice(bytes)?;
        record.kind = kind;
        record.offset = offset;
        Ok(record)
    }

    /// True when the payload carried no usable content at all
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.var_fields.is_empty()
            && self.fixed_fields.is_empty()
            && self.bib_ids.is_empty()
            && self.extra.is_empty()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Presently matches known partner sources: recap-pul and recap-cul
    pub fn is_partner_record(&self) -> bool {
        partner_prefix(self.nypl_source.as_deref()).is_some()
    }

    /// Id prefixed with the partner letter and kind marker (`b123`, `pb123`, `ci9`)
    pub fn prefixed_id(&self) -> Option<String> {
        let id = self.id()?;
        let mut out = String::with_capacity(id.len() + 2);
        if let Some(p) = partner_prefix(self.nypl_source.as_deref()) {
            out.push(p);
        }
        out.push(self.kind.id_marker());
        out.push_str(id);
        Some(out)
    }

    /// Content of every varField with `marc` tag, restricted to `subfields` when given
    pub fn var_field(&self, marc: &str, subfields: &[&str]) -> Vec<String> {
        self.var_fields
            .iter()
            .filter(|f| f.marc_tag.as_deref() == Some(marc))
            .filter_map(|f| f.extract(subfields))
            .collect()
    }

    pub fn var_field_blocks<'a>(&'a self, marc: &'a str) -> impl Iterator<Item = &'a VarField> + 'a {
        self.var_fields
            .iter()
            .filter(move |f| f.marc_tag.as_deref() == Some(marc))
    }

    /// Legacy (non-MARC) varFields addressed by field tag
    pub fn field_tag(&self, tag: &str) -> Vec<String> {
        self.var_fields
            .iter()
            .filter(|f| f.marc_tag.is_none() && f.field_tag.as_deref() == Some(tag))
            .filter_map(|f| f.extract(&[]))
            .collect()
    }

    /// Fixed field value by label
    pub fn fixed(&self, label: &str) -> Option<&Value> {
        self.fixed_fields
            .values()
            .find(|f| f.label == label)
            .map(|f| &f.value)
    }

    /// Suppression flag and the reasons for it
    pub fn suppression(&self) -> (bool, Vec<&'static str>) {
        let mut rationale = Vec::new();
        if self.deleted {
            rationale.push("deleted");
        }
        if self.suppressed {
            rationale.push("suppressed");
        }
        (!rationale.is_empty(), rationale)
    }

    pub fn holding_strings(&self) -> Vec<&str> {
        self.holdings
            .iter()
            .filter_map(|h| h.holding_string.as_deref())
            .filter(|h| !h.is_empty())
            .collect()
    }
}

fn partner_prefix(source: Option<&str>) -> Option<char> {
    let source = source?.to_lowercase();
    match source.strip_prefix("recap-")?.chars().next()? {
        c @ ('p' | 'c') => Some(c),
        _ => None,
    }
}

fn value_to_id(v: Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_or_number<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(d)?.and_then(value_to_id))
}

fn strings_or_numbers<'de, D>(d: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Value>>::deserialize(d)?.unwrap_or_default();
    Ok(values.into_iter().filter_map(value_to_id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bib(value: Value) -> CatalogRecord {
        CatalogRecord::from_slice(RecordKind::Bib, 0, value.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_numeric_ids_are_accepted() {
        let r = bib(json!({ "id": 10011630, "bibIds": [1, "2"] }));
        assert_eq!(r.id(), Some("10011630"));
        assert_eq!(r.bib_ids, vec!["1", "2"]);
    }

    #[test]
    fn test_prefixed_ids() {
        let nypl = bib(json!({ "id": "123", "nyplSource": "sierra-nypl" }));
        assert_eq!(nypl.prefixed_id().as_deref(), Some("b123"));

        let pul = bib(json!({ "id": "123", "nyplSource": "recap-pul" }));
        assert!(pul.is_partner_record());
        assert_eq!(pul.prefixed_id().as_deref(), Some("pb123"));

        let mut item = bib(json!({ "id": "9", "nyplSource": "recap-cul" }));
        item.kind = RecordKind::Item;
        assert_eq!(item.prefixed_id().as_deref(), Some("ci9"));
    }

    #[test]
    fn test_var_field_subfield_selection() {
        let r = bib(json!({
            "id": "1",
            "varFields": [
                { "marcTag": "245", "subfields": [
                    { "tag": "a", "content": "Hamlet /" },
                    { "tag": "c", "content": "Shakespeare." }
                ]},
                { "marcTag": "041", "subfields": [{ "tag": "a", "content": "eng" }] },
                { "fieldTag": "n", "content": "Legacy note" }
            ]
        }));

        assert_eq!(r.var_field("245", &["a"]), vec!["Hamlet /"]);
        assert_eq!(r.var_field("245", &[]), vec!["Hamlet / Shakespeare."]);
        assert!(r.var_field("300", &[]).is_empty());
        assert_eq!(r.field_tag("n"), vec!["Legacy note"]);
    }

    #[test]
    fn test_fixed_field_by_label() {
        let r = bib(json!({
            "id": "1",
            "fixedFields": { "30": { "label": "Material Type", "value": "a" } }
        }));
        assert_eq!(r.fixed("Material Type"), Some(&json!("a")));
        assert_eq!(r.fixed("Language"), None);
    }

    #[test]
    fn test_empty_payload() {
        assert!(bib(json!({})).is_empty());
        assert!(!bib(json!({ "title": "x" })).is_empty());
    }

    #[test]
    fn test_check_in_box_coverage() {
        let b = CheckInBox {
            enumeration: Enumeration { enumeration: Some("v. 12".to_string()) },
            start_date: Some("2020-01-01".to_string()),
            end_date: Some("2020-02-01".to_string()),
            ..Default::default()
        };
        assert_eq!(b.coverage(), "v. 12 (2020-01-01 - 2020-02-01)");
        assert_eq!(CheckInBox::default().coverage(), "");
    }
}
