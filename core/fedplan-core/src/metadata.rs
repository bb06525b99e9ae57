//! Metadata interface
//!
//! Group and element records the planner consults: model ownership, access
//! patterns, optional cardinality hints and view definitions. Lookups are
//! synchronous and in-memory; failures propagate to the caller unchanged.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::datatypes::DataType;
use thiserror::Error;

use crate::command::Command;
use crate::error::PlanResult;
use crate::sql::CommandResolver;

/// Errors raised by metadata and capability collaborators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetadataError {
    #[error("group '{0}' not found")]
    GroupNotFound(String),

    #[error("element '{element}' not found in group '{group}'")]
    ElementNotFound { group: String, element: String },

    #[error("model '{0}' not found")]
    ModelNotFound(String),

    #[error("capabilities unavailable for model '{0}'")]
    CapabilitiesUnavailable(String),

    #[error("invalid definition for virtual group '{group}': {message}")]
    InvalidDefinition { group: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementRecord {
    pub name: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupKind {
    Physical,
    /// View backed by a resolved command
    Virtual(Arc<Command>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupRecord {
    /// Full name, also the metadata id
    pub name: String,
    pub model: String,
    pub elements: Vec<ElementRecord>,
    /// Alternative sets of columns that must be bound; any one set suffices.
    pub access_patterns: Vec<Vec<String>>,
    pub cardinality: Option<u64>,
    pub kind: GroupKind,
}

impl GroupRecord {
    pub fn is_virtual(&self) -> bool {
        matches!(self.kind, GroupKind::Virtual(_))
    }

    pub fn element(&self, name: &str) -> Option<&ElementRecord> {
        self.elements
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }
}

/// Read-only metadata lookups.
pub trait QueryMetadata: Send + Sync {
    /// Group by metadata id (full name, case-insensitive).
    fn group(&self, name: &str) -> Result<Arc<GroupRecord>, MetadataError>;

    fn elements(&self, group: &str) -> Result<Vec<ElementRecord>, MetadataError> {
        Ok(self.group(group)?.elements.clone())
    }

    fn model_of(&self, group: &str) -> Result<String, MetadataError> {
        Ok(self.group(group)?.model.clone())
    }

    fn access_patterns(&self, group: &str) -> Result<Vec<Vec<String>>, MetadataError> {
        Ok(self.group(group)?.access_patterns.clone())
    }

    /// `None` means unknown; callers must not treat it as zero.
    fn cardinality(&self, group: &str) -> Result<Option<u64>, MetadataError> {
        Ok(self.group(group)?.cardinality)
    }

    fn virtual_definition(&self, group: &str) -> Result<Option<Arc<Command>>, MetadataError> {
        Ok(match &self.group(group)?.kind {
            GroupKind::Virtual(command) => Some(command.clone()),
            GroupKind::Physical => None,
        })
    }
}

/// Definition of a physical group for [`InMemoryMetadata`].
#[derive(Debug, Clone)]
pub struct GroupDef {
    record: GroupRecord,
}

impl GroupDef {
    pub fn physical(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            record: GroupRecord {
                name: name.into(),
                model: model.into(),
                elements: Vec::new(),
                access_patterns: Vec::new(),
                cardinality: None,
                kind: GroupKind::Physical,
            },
        }
    }

    pub fn column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.record.elements.push(ElementRecord {
            name: name.into(),
            data_type,
        });
        self
    }

    pub fn cardinality(mut self, rows: u64) -> Self {
        self.record.cardinality = Some(rows);
        self
    }

    pub fn access_pattern(mut self, columns: &[&str]) -> Self {
        self.record
            .access_patterns
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }
}

/// In-memory metadata store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetadata {
    groups: BTreeMap<String, Arc<GroupRecord>>,
}

impl InMemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&mut self, def: GroupDef) -> &mut Self {
        let record = def.record;
        self.groups
            .insert(record.name.to_ascii_lowercase(), Arc::new(record));
        self
    }

    /// Register a view; the definition is resolved against the groups
    /// registered so far.
    pub fn add_virtual_group(
        &mut self,
        name: &str,
        model: &str,
        definition_sql: &str,
    ) -> PlanResult<&mut Self> {
        let command = CommandResolver::new(&*self).resolve_sql(definition_sql)?;
        let elements = command
            .output_columns()
            .into_iter()
            .map(|symbol| ElementRecord {
                name: symbol.name,
                data_type: symbol.data_type,
            })
            .collect();
        let record = GroupRecord {
            name: name.to_string(),
            model: model.to_string(),
            elements,
            access_patterns: Vec::new(),
            cardinality: None,
            kind: GroupKind::Virtual(Arc::new(command)),
        };
        self.groups
            .insert(name.to_ascii_lowercase(), Arc::new(record));
        Ok(self)
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.values().map(|g| g.name.as_str())
    }
}

impl QueryMetadata for InMemoryMetadata {
    fn group(&self, name: &str) -> Result<Arc<GroupRecord>, MetadataError> {
        self.groups
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| MetadataError::GroupNotFound(name.to_string()))
    }
}
