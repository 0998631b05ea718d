use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// Session-unique identifier of a broadcast value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BroadcastId(pub u64);

impl fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "broadcast-{}", self.0)
    }
}

/// Typed reference to a broadcast value.
///
/// Resolved on a worker through `ResourceContext::get`.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct BroadcastHandle<T> {
    pub id: BroadcastId,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T> BroadcastHandle<T> {
    pub(crate) fn new(id: BroadcastId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for BroadcastHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BroadcastHandle<T> {}

impl<T> PartialEq for BroadcastHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for BroadcastHandle<T> {}

impl<T> fmt::Debug for BroadcastHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHandle")
            .field("id", &self.id)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// Coordinator-side bookkeeping for a live broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastRecord {
    pub id: BroadcastId,
    pub type_name: String,
    pub size_bytes: usize,
    pub workers: usize,
}
