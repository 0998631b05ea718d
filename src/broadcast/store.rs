//! Worker-side resource storage.

use super::types::{BroadcastHandle, BroadcastId};
use crate::error::{AnnotatorError, Result};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type Decoded = Arc<dyn Any + Send + Sync>;

/// Broadcast values held by one worker: encoded bytes plus decoded cache.
#[derive(Default)]
pub struct ResourceStore {
    encoded: DashMap<BroadcastId, Arc<Vec<u8>>>,
    decoded: DashMap<BroadcastId, Decoded>,
    decode_count: AtomicU64,
}

impl ResourceStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stores encoded bytes. A repeated store of the same id is ignored.
    pub fn store(&self, id: BroadcastId, bytes: Vec<u8>) -> bool {
        if self.encoded.contains_key(&id) {
            tracing::debug!("Broadcast {} already stored, ignoring", id);
            return false;
        }
        self.encoded.insert(id, Arc::new(bytes));
        true
    }

    pub fn remove(&self, id: BroadcastId) {
        self.encoded.remove(&id);
        self.decoded.remove(&id);
    }

    pub fn contains(&self, id: BroadcastId) -> bool {
        self.encoded.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.encoded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    /// How many times a value was decoded from bytes on this worker.
    pub fn decode_count(&self) -> u64 {
        self.decode_count.load(Ordering::SeqCst)
    }

    fn resolve<T>(&self, handle: &BroadcastHandle<T>) -> Result<Arc<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let id = handle.id;
        let bytes = self
            .encoded
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(AnnotatorError::UnknownResource(id.0))?;

        let decoded = self
            .decoded
            .entry(id)
            .or_try_insert_with(|| {
                let value: T = bincode::deserialize(&bytes).map_err(|e| {
                    AnnotatorError::serialization(format!("decoding {}", id), e)
                })?;
                self.decode_count.fetch_add(1, Ordering::SeqCst);
                tracing::debug!("Decoded {} ({} bytes)", id, bytes.len());
                Ok::<Decoded, AnnotatorError>(Arc::new(value))
            })?
            .value()
            .clone();

        decoded.downcast::<T>().map_err(|_| {
            AnnotatorError::serialization(
                format!("resolving {}", id),
                format!(
                    "value was decoded as a different type than {}",
                    std::any::type_name::<T>()
                ),
            )
        })
    }
}

/// Read-only view of the broadcast resources, handed to every labeling function call.
#[derive(Clone)]
pub struct ResourceContext {
    store: Arc<ResourceStore>,
}

impl ResourceContext {
    pub fn new(store: Arc<ResourceStore>) -> Self {
        Self { store }
    }

    /// Empty context, for running functions outside a cluster.
    pub fn empty() -> Self {
        Self::new(ResourceStore::new())
    }

    /// Dereferences a broadcast handle to its worker-local value.
    pub fn get<T>(&self, handle: &BroadcastHandle<T>) -> Result<Arc<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.store.resolve(handle)
    }
}
