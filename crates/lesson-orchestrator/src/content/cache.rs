//! Run-scoped content cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;

use super::ContentRequest;
use crate::error::Result;
use crate::request::Difficulty;
use crate::template::Slot;

/// Identity of a piece of AI content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Slot.
    pub slot: Slot,
    /// Topic slug.
    pub topic_slug: String,
    /// Module slug, for module slots.
    pub module_slug: Option<String>,
    /// Difficulty.
    pub difficulty: Difficulty,
}

impl CacheKey {
    /// Key for a content request.
    #[must_use]
    pub fn for_request(request: &ContentRequest<'_>) -> Self {
        Self {
            slot: request.slot,
            topic_slug: request.topic.slug.clone(),
            module_slug: request.module.map(|m| m.slug.clone()),
            difficulty: request.topic.difficulty,
        }
    }
}

/// Concurrent insert-if-absent cache.
///
/// Concurrent requests for the same key share a single computation; a
/// failed computation leaves the key empty so a later request can retry.
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: Mutex<HashMap<CacheKey, Arc<OnceCell<String>>>>,
}

impl ContentCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Returns `true` if nothing has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached value for `key`, computing it with `init` if absent.
    ///
    /// The boolean is `true` when the value was not computed by this call.
    pub async fn get_or_try_insert<F, Fut>(&self, key: CacheKey, init: F) -> Result<(String, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(key).or_default())
        };

        if let Some(value) = cell.get() {
            return Ok((value.clone(), true));
        }

        let mut computed = false;
        let value = cell
            .get_or_try_init(|| {
                computed = true;
                init()
            })
            .await?;
        Ok((value.clone(), !computed))
    }
}
