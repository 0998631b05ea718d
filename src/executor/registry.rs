//! Labeling Function Registry
//!
//! Maps labeling function names to executable Rust closures. The registry is
//! deployed to every worker, so a labeling run only has to ship the ordered
//! list of names; the name list defines the column order of the label matrix.

use super::types::Vote;
use crate::broadcast::store::ResourceContext;
use crate::candidate::types::Candidate;
use crate::error::{AnnotatorError, Result};

use dashmap::DashMap;
use std::sync::Arc;

/// Type alias for a thread-safe labeling function.
/// It receives the candidate and a read-only view of the broadcast resources.
pub type LabelingFn =
    Arc<dyn Fn(&Candidate, &ResourceContext) -> anyhow::Result<Vote> + Send + Sync>;

/// A labeling function resolved for one run: its column, name and code.
#[derive(Clone)]
pub struct ResolvedLf {
    pub column: u32,
    pub name: String,
    pub function: LabelingFn,
}

/// Registry holding the mapping between function names and their implementation.
pub struct LfRegistry {
    functions: DashMap<String, LabelingFn>,
}

impl LfRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a labeling function under a specific name.
    ///
    /// Registering an existing name replaces the previous function.
    pub fn register<F>(&self, name: &str, function: F)
    where
        F: Fn(&Candidate, &ResourceContext) -> anyhow::Result<Vote> + Send + Sync + 'static,
    {
        if self
            .functions
            .insert(name.to_string(), Arc::new(function))
            .is_some()
        {
            tracing::warn!("Replaced labeling function: {}", name);
        } else {
            tracing::info!("Registered labeling function: {}", name);
        }
    }

    /// Registers `name` as the combination of two registered functions using
    /// [`Vote::combine`]: abstain if either abstains, else the product of signs.
    pub fn register_combined(&self, name: &str, left: &str, right: &str) -> Result<()> {
        let left_fn = self.get(left)?;
        let right_fn = self.get(right)?;

        self.register(name, move |candidate, ctx| {
            let a = left_fn(candidate, ctx)?;
            if a.is_abstain() {
                return Ok(Vote::ABSTAIN);
            }
            let b = right_fn(candidate, ctx)?;
            Ok(a.combine(b))
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<LabelingFn> {
        self.functions
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AnnotatorError::UnknownFunction(name.to_string()))
    }

    /// Resolves an ordered list of names; position in the list becomes the column.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<ResolvedLf>> {
        names
            .iter()
            .enumerate()
            .map(|(column, name)| {
                let name = name.as_ref();
                Ok(ResolvedLf {
                    column: column as u32,
                    name: name.to_string(),
                    function: self.get(name)?,
                })
            })
            .collect()
    }

    /// Returns all registered names, sorted.
    pub fn list_functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }
}

impl Default for LfRegistry {
    fn default() -> Self {
        Self {
            functions: DashMap::new(),
        }
    }
}
