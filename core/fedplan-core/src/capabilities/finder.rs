//! Capability lookup collaborators.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use super::SourceCapabilities;
use crate::metadata::MetadataError;

/// Source of capability sets, queried per model name.
pub trait CapabilitiesFinder: Send + Sync {
    fn find_capabilities(&self, model: &str) -> Result<Arc<SourceCapabilities>, MetadataError>;
}

/// Fixed model-to-capabilities mapping.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilitiesFinder {
    models: BTreeMap<String, Arc<SourceCapabilities>>,
    default: Option<Arc<SourceCapabilities>>,
}

impl StaticCapabilitiesFinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: &str, capabilities: SourceCapabilities) -> Self {
        self.models
            .insert(model.to_ascii_lowercase(), Arc::new(capabilities));
        self
    }

    /// Capabilities for models without an explicit entry.
    pub fn with_default(mut self, capabilities: SourceCapabilities) -> Self {
        self.default = Some(Arc::new(capabilities));
        self
    }
}

impl CapabilitiesFinder for StaticCapabilitiesFinder {
    fn find_capabilities(&self, model: &str) -> Result<Arc<SourceCapabilities>, MetadataError> {
        self.models
            .get(&model.to_ascii_lowercase())
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| MetadataError::CapabilitiesUnavailable(model.to_string()))
    }
}

/// Caches another finder's answers; shareable across concurrent compiles.
pub struct CachingCapabilitiesFinder<F> {
    inner: F,
    cache: RwLock<AHashMap<String, Arc<SourceCapabilities>>>,
}

impl<F: CapabilitiesFinder> CachingCapabilitiesFinder<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            cache: RwLock::new(AHashMap::new()),
        }
    }

    /// Drop every cached entry (e.g. after a connector was reconfigured).
    pub fn invalidate(&self) {
        self.cache.write().clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}

impl<F: CapabilitiesFinder> CapabilitiesFinder for CachingCapabilitiesFinder<F> {
    fn find_capabilities(&self, model: &str) -> Result<Arc<SourceCapabilities>, MetadataError> {
        let key = model.to_ascii_lowercase();
        if let Some(hit) = self.cache.read().get(&key) {
            return Ok(hit.clone());
        }
        let found = self.inner.find_capabilities(model)?;
        self.cache.write().insert(key, found.clone());
        Ok(found)
    }
}
