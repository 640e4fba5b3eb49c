// Specification documents as reconciliation seeds. Content only, never state.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::model::{ContentPatch, Entity, EntityKind};

/// One enumerated document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSeed {
    pub kind: EntityKind,
    pub business_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "purpose")]
    pub description: String,
    /// Business id of the parent capability (enablers only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl DocumentSeed {
    pub fn new(kind: EntityKind, business_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            business_id: business_id.into(),
            name: name.into(),
            description: String::new(),
            parent_reference: None,
            file_path: None,
        }
    }

    pub fn with_parent(mut self, parent_business_id: impl Into<String>) -> Self {
        self.parent_reference = Some(parent_business_id.into());
        self
    }

    pub fn with_file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn content(&self) -> ContentPatch {
        ContentPatch {
            name: Some(self.name.clone()),
            description: Some(self.description.clone()),
            file_path: self.file_path.clone(),
        }
    }

    /// True when the document carries a non-blank field the entity does not
    /// match, or moves an enabler to another parent. `parent_internal_id` is
    /// the cached store id of the declared parent, `None` when not cached.
    pub fn differs_from(&self, entity: &Entity, parent_internal_id: Option<i64>) -> bool {
        let content = self.content();
        content.name().is_some_and(|name| name != entity.name)
            || content
                .description()
                .is_some_and(|description| description != entity.description)
            || content
                .file_path()
                .is_some_and(|path| Some(path) != entity.file_path.as_deref())
            || self.moves_parent(entity, parent_internal_id)
    }

    fn moves_parent(&self, entity: &Entity, parent_internal_id: Option<i64>) -> bool {
        entity.kind == EntityKind::Enabler
            && self
                .parent_reference
                .as_deref()
                .is_some_and(|parent| !parent.trim().is_empty())
            && (parent_internal_id.is_none()
                || parent_internal_id != entity.parent_capability_internal_id)
    }
}

/// Enumerates specification documents
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<DocumentSeed>>;
}

#[derive(Debug, Deserialize, Serialize)]
struct Manifest {
    #[serde(default)]
    documents: Vec<DocumentSeed>,
}

/// Reads `{"documents": [...]}` from a JSON file
#[derive(Debug, Clone)]
pub struct ManifestDocumentSource {
    path: PathBuf,
}

impl ManifestDocumentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DocumentSource for ManifestDocumentSource {
    async fn enumerate(&self) -> Result<Vec<DocumentSeed>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read document manifest {}", self.path.display()))?;
        let manifest: Manifest = serde_json::from_str(&content)
            .with_context(|| format!("Invalid document manifest {}", self.path.display()))?;
        debug!(
            path = %self.path.display(),
            documents = manifest.documents.len(),
            "document manifest loaded"
        );
        Ok(manifest.documents)
    }
}

/// Registered documents keyed by kind and business id
#[derive(Debug, Clone, Default)]
pub struct DocumentIndex {
    documents: BTreeMap<(EntityKind, String), DocumentSeed>,
}

impl DocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later registrations replace earlier ones
    pub fn register(&mut self, seed: DocumentSeed) {
        self.documents
            .insert((seed.kind, seed.business_id.clone()), seed);
    }

    pub fn remove(&mut self, kind: EntityKind, business_id: &str) -> Option<DocumentSeed> {
        self.documents.remove(&(kind, business_id.to_string()))
    }

    pub fn get(&self, kind: EntityKind, business_id: &str) -> Option<&DocumentSeed> {
        self.documents.get(&(kind, business_id.to_string()))
    }

    pub fn contains(&self, kind: EntityKind, business_id: &str) -> bool {
        self.get(kind, business_id).is_some()
    }

    /// Ordered by business id
    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &DocumentSeed> {
        self.documents
            .iter()
            .filter(move |((k, _), _)| *k == kind)
            .map(|(_, seed)| seed)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
