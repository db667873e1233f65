use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use prost_reflect::MessageDescriptor;

use crate::schema::{MessageSchema, SchemaRegistry};

/// Build-through cache of message schemas keyed by descriptor identity.
///
/// Readers take the current registry snapshot under a read lock. Builders
/// hold `build_lock` for the whole read-build-commit sequence, so two
/// threads never build the same schema twice.
pub(crate) struct ModelCache {
    /// Serializes cache writes.
    build_lock: Mutex<()>,
    /// Latest committed snapshot.
    registry: RwLock<Arc<SchemaRegistry>>,
}

impl ModelCache {
    pub(crate) fn new() -> Self {
        Self {
            build_lock: Mutex::new(()),
            registry: RwLock::new(Arc::new(SchemaRegistry::default())),
        }
    }

    pub(crate) fn lock_build(&self) -> MutexGuard<'_, ()> {
        self.build_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> Arc<SchemaRegistry> {
        Arc::clone(
            &self
                .registry
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Schema for `descriptor` together with the snapshot that holds it.
    pub(crate) fn lookup(
        &self,
        descriptor: &MessageDescriptor,
    ) -> Option<(Arc<MessageSchema>, Arc<SchemaRegistry>)> {
        let registry = self.snapshot();
        let schema = Arc::clone(registry.get(descriptor)?);
        Some((schema, registry))
    }

    pub(crate) fn commit(&self, registry: SchemaRegistry) -> Arc<SchemaRegistry> {
        let registry = Arc::new(registry);
        *self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&registry);
        registry
    }

    pub(crate) fn clear(&self) {
        let _guard = self.lock_build();
        *self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(SchemaRegistry::default());
    }
}
