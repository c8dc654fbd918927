//! Caller-owned cache of built descriptors, keyed by target type.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::descriptor::{build_descriptor, FieldDescriptor};
use crate::error::BuildError;
use crate::types::{Schema, TypeRef};

/// Descriptor trees for every target type seen so far.
///
/// Construct one at startup and share it by reference; lookups take a read
/// lock and the returned descriptors are immutable, so any number of threads
/// may normalize documents at once.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    entries: RwLock<HashMap<TypeId, Arc<FieldDescriptor>>>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the descriptor for `T`, building it on first use.
    ///
    /// Failed builds are not cached; the error is returned again on the
    /// next call.
    pub fn descriptor<T: Schema>(&self) -> Result<Arc<FieldDescriptor>, BuildError> {
        self.get_or_build(&TypeRef::of::<T>())
    }

    /// Like [`descriptor`](Self::descriptor), for an already resolved type.
    pub fn get_or_build(&self, ty: &TypeRef) -> Result<Arc<FieldDescriptor>, BuildError> {
        if let Some(found) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ty.id())
        {
            tracing::debug!(type_name = ty.name(), "descriptor cache hit");
            return Ok(Arc::clone(found));
        }

        let built = Arc::new(build_descriptor(ty)?);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have finished first; keep whichever landed.
        Ok(Arc::clone(entries.entry(ty.id()).or_insert(built)))
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
