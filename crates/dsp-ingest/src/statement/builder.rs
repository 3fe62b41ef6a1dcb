use super::{Provenance, ProvenanceOverride, Statement, StatementError, StatementObject};

/// Accumulates the statements of one source record
///
/// Scoped to a `(subject_id, creator_id, base provenance)` triple for the
/// lifetime of one record's transformation. Any error aborts the record;
/// callers must discard the builder rather than persist a partial set.
#[derive(Debug)]
pub struct StatementBuilder {
    subject_id: String,
    creator_id: u32,
    provenance: Provenance,
    statements: Vec<Statement>,
    blank_nodes: usize,
}

impl StatementBuilder {
    pub fn new(
        subject_id: impl Into<String>,
        creator_id: u32,
        provenance: Provenance,
    ) -> Result<Self, StatementError> {
        let subject_id = subject_id.into();
        if subject_id.is_empty() {
            return Err(StatementError::MissingSubject);
        }
        if provenance.source_id.is_empty() {
            return Err(StatementError::MissingSourceId { subject: subject_id });
        }

        Ok(Self {
            subject_id,
            creator_id,
            provenance,
            statements: Vec::new(),
            blank_nodes: 0,
        })
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Add a statement about the builder's subject
    ///
    /// Without an explicit `index`, an existing statement for `predicate`
    /// carrying the same object is reused (re-adding is a no-op); otherwise
    /// the value is appended after the existing ones.
    pub fn add(
        &mut self,
        predicate: &str,
        object: StatementObject,
        index: Option<usize>,
        provenance: Option<&ProvenanceOverride>,
    ) -> Result<(), StatementError> {
        let subject_id = self.subject_id.clone();
        self.push(subject_id, predicate, object, index, provenance)
    }

    /// Add a blank node linked from the subject through `predicate`
    ///
    /// The node id is `{subject}#{creator}.{counter:04}`. Each nested field
    /// becomes a statement whose subject is the blank node.
    pub fn add_blank_node<I>(
        &mut self,
        predicate: &str,
        fields: I,
        index: usize,
        provenance: Option<&ProvenanceOverride>,
    ) -> Result<String, StatementError>
    where
        I: IntoIterator<Item = (String, StatementObject)>,
    {
        let node_id = format!(
            "{}#{}.{:04}",
            self.subject_id, self.creator_id, self.blank_nodes
        );
        self.blank_nodes += 1;

        // Validate the whole node before committing any of it
        let mut pending = Vec::new();
        pending.push(self.build(
            self.subject_id.clone(),
            predicate,
            StatementObject::id(node_id.clone()),
            index,
            provenance,
        )?);
        for (field, object) in fields {
            pending.push(self.build(node_id.clone(), &field, object, 0, provenance)?);
        }
        self.statements.extend(pending);

        Ok(node_id)
    }

    /// All statements about the builder's subject for `predicate`
    pub fn get_all(&self, predicate: &str) -> Vec<&Statement> {
        self.for_subject(&self.subject_id, predicate).collect()
    }

    pub fn get(&self, predicate: &str) -> Option<&Statement> {
        self.for_subject(&self.subject_id, predicate).next()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<Statement> {
        self.statements
    }

    fn for_subject<'a, 'b>(
        &'a self,
        subject: &'b str,
        predicate: &'b str,
    ) -> impl Iterator<Item = &'a Statement> + 'b
    where
        'a: 'b,
    {
        self.statements
            .iter()
            .filter(move |s| s.subject_id() == subject && s.predicate() == predicate)
    }

    fn push(
        &mut self,
        subject: String,
        predicate: &str,
        object: StatementObject,
        index: Option<usize>,
        provenance: Option<&ProvenanceOverride>,
    ) -> Result<(), StatementError> {
        let index = match index {
            Some(index) => index,
            None => {
                if self
                    .for_subject(&subject, predicate)
                    .any(|s| s.matches_object(&object))
                {
                    return Ok(());
                }
                self.for_subject(&subject, predicate).count()
            },
        };

        let statement = self.build(subject, predicate, object, index, provenance)?;
        // An explicit index that restates an existing value is also a no-op
        if !self.statements.iter().any(|s| s == &statement) {
            self.statements.push(statement);
        }
        Ok(())
    }

    fn build(
        &self,
        subject: String,
        predicate: &str,
        object: StatementObject,
        index: usize,
        provenance: Option<&ProvenanceOverride>,
    ) -> Result<Statement, StatementError> {
        let provenance = match provenance {
            Some(over) => self.provenance.merge(over),
            None => self.provenance.clone(),
        };
        Statement::new(subject, predicate, object, self.creator_id, provenance, index)
    }
}
