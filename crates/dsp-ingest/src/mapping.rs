//! Field-mapping and lookup registry
//!
//! Both tables are loaded once at process start and shared with the
//! serializers through [`MappingContext`].

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::record::RecordKind;

const BUILTIN_FIELD_MAPPING: &str = include_str!("../data/field-mapping.json");
const BUILTIN_LOOKUPS: &[(&str, &str)] = &[
    (
        "856-label-to-resource-class",
        include_str!("../data/lookup-856-label-to-resource-class.csv"),
    ),
    (
        "language-code-to-label",
        include_str!("../data/lookup-language-code-to-label.csv"),
    ),
];

const LOOKUP_FILE_PREFIX: &str = "lookup-";

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("Invalid mapping name: {kind}/{name}")]
    UnknownField { kind: RecordKind, name: String },

    #[error("Failed to read mapping file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse field mapping: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse lookup table {table}: {source}")]
    Csv {
        table: String,
        #[source]
        source: csv::Error,
    },
}

/// Where a mapped field is read from
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MarcPath {
    pub marc: String,
    #[serde(default)]
    pub subfields: Vec<String>,
    /// Sources this path applies to; `*` or absent means all
    #[serde(default)]
    pub nypl_sources: Option<Vec<String>>,
}

impl MarcPath {
    fn applies_to(&self, nypl_source: &str) -> bool {
        match &self.nypl_sources {
            None => true,
            Some(sources) => sources.iter().any(|s| s == "*" || s == nypl_source),
        }
    }

    pub fn subfield_refs(&self) -> Vec<&str> {
        self.subfields.iter().map(String::as_str).collect()
    }

    /// Provenance path, e.g. `245 $a $b`
    pub fn describe(&self) -> String {
        let mut out = self.marc.clone();
        for s in &self.subfields {
            out.push_str(" $");
            out.push_str(s);
        }
        out
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldMapping {
    pub pred: String,
    #[serde(default)]
    pub paths: Vec<MarcPath>,
}

/// Field name → predicate, per record kind
#[derive(Debug, Clone, Default)]
pub struct FieldMapper {
    tables: HashMap<RecordKind, BTreeMap<String, FieldMapping>>,
}

impl FieldMapper {
    pub fn builtin() -> Result<Self, MappingError> {
        Self::from_json_str(BUILTIN_FIELD_MAPPING)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MappingError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mapper = Self::from_json_str(&raw)?;
        info!(path = %path.as_ref().display(), "Loaded field mapping");
        Ok(mapper)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, MappingError> {
        let tables: HashMap<RecordKind, BTreeMap<String, FieldMapping>> =
            serde_json::from_str(raw)?;
        Ok(Self { tables })
    }

    pub fn mapping(&self, kind: RecordKind, name: &str) -> Result<&FieldMapping, MappingError> {
        self.tables
            .get(&kind)
            .and_then(|t| t.get(name))
            .ok_or_else(|| MappingError::UnknownField {
                kind,
                name: name.to_string(),
            })
    }

    /// Predicate for a named field; unknown names are an error
    pub fn predicate_for(&self, kind: RecordKind, name: &str) -> Result<&str, MappingError> {
        self.mapping(kind, name).map(|m| m.pred.as_str())
    }

    /// Paths of a named field that apply to records from `nypl_source`
    pub fn paths_for(
        &self,
        kind: RecordKind,
        name: &str,
        nypl_source: &str,
    ) -> Result<Vec<&MarcPath>, MappingError> {
        Ok(self
            .mapping(kind, name)?
            .paths
            .iter()
            .filter(|p| p.applies_to(nypl_source))
            .collect())
    }
}

/// Two-column key/label table
#[derive(Debug, Clone, Default)]
pub struct LookupTable {
    rows: Vec<(String, String)>,
}

impl LookupTable {
    pub fn from_csv_reader<R: std::io::Read>(name: &str, reader: R) -> Result<Self, MappingError> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows = Vec::new();
        for record in csv.records() {
            let record = record.map_err(|source| MappingError::Csv {
                table: name.to_string(),
                source,
            })?;
            if let (Some(key), Some(label)) = (record.get(0), record.get(1)) {
                rows.push((key.to_string(), label.to_string()));
            }
        }
        Ok(Self { rows })
    }

    /// Label for `key`. Missing and ambiguous keys both yield `None`.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        let mut matches = self.rows.iter().filter(|(k, _)| k == key);
        match (matches.next(), matches.next()) {
            (Some((_, label)), None) => Some(label.as_str()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LookupRegistry {
    tables: HashMap<String, LookupTable>,
}

impl LookupRegistry {
    pub fn builtin() -> Result<Self, MappingError> {
        let mut registry = Self::default();
        for (name, raw) in BUILTIN_LOOKUPS {
            registry.insert(*name, LookupTable::from_csv_reader(name, raw.as_bytes())?);
        }
        Ok(registry)
    }

    /// Load every `lookup-<table>.csv` in `dir`, replacing built-in tables of the same name
    pub fn load_dir(mut self, dir: impl AsRef<Path>) -> Result<Self, MappingError> {
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            let Some(table) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix(LOOKUP_FILE_PREFIX))
                .map(str::to_string)
            else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }

            let file = std::fs::File::open(&path)?;
            let loaded = LookupTable::from_csv_reader(&table, file)?;
            debug!(table = %table, rows = loaded.len(), "Loaded lookup table");
            self.insert(table, loaded);
        }
        Ok(self)
    }

    pub fn insert(&mut self, name: impl Into<String>, table: LookupTable) {
        self.tables.insert(name.into(), table);
    }

    pub fn lookup(&self, table: &str, key: &str) -> Option<&str> {
        self.tables.get(table).and_then(|t| t.lookup(key))
    }
}

/// Everything a serializer or enricher needs to map fields
#[derive(Debug, Clone, Default)]
pub struct MappingContext {
    pub fields: FieldMapper,
    pub lookups: LookupRegistry,
}

impl MappingContext {
    pub fn builtin() -> Result<Self, MappingError> {
        Ok(Self {
            fields: FieldMapper::builtin()?,
            lookups: LookupRegistry::builtin()?,
        })
    }

    /// Built-in tables overridden by the optional mapping file and lookup directory
    pub fn load(
        mapping_path: Option<&Path>,
        lookup_dir: Option<&Path>,
    ) -> Result<Self, MappingError> {
        let fields = match mapping_path {
            Some(path) => FieldMapper::from_path(path)?,
            None => FieldMapper::builtin()?,
        };
        let mut lookups = LookupRegistry::builtin()?;
        if let Some(dir) = lookup_dir {
            lookups = lookups.load_dir(dir)?;
        }
        Ok(Self { fields, lookups })
    }

    pub fn predicate_for(&self, kind: RecordKind, name: &str) -> Result<&str, MappingError> {
        self.fields.predicate_for(kind, name)
    }

    pub fn lookup(&self, table: &str, key: &str) -> Option<&str> {
        self.lookups.lookup(table, key)
    }
}
