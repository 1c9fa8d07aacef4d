//! Cache key resolution
//!
//! Renders a [`CacheSpec`] against a [`CacheContext`] and drives the store:
//! restore tries keys in declared order, save always uses the primary key.

use crate::cache::archive::ArchivePath;
use crate::cache::context::CacheContext;
use crate::cache::store::CacheStore;
use crate::cache::template::KeyTemplate;
use crate::error::{CircletError, CircletResult};
use crate::pipeline::CacheSpec;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a restore attempt
#[derive(Debug, Clone)]
pub enum RestoreOutcome {
    /// A stored entry matched
    Hit {
        /// The stored key
        key: String,
        archive: Vec<u8>,
    },
    /// Nothing matched; the job continues cold
    Miss {
        /// Rendered keys that were tried
        tried: Vec<String>,
    },
}

impl RestoreOutcome {
    /// Whether the restore found an entry
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }
}

/// Renders cache specs and talks to a store
#[derive(Clone)]
pub struct CacheResolver {
    store: Arc<dyn CacheStore>,
}

impl CacheResolver {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// The backing store
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Restore the first matching key
    pub async fn restore(
        &self,
        spec: &CacheSpec,
        ctx: &CacheContext,
    ) -> CircletResult<RestoreOutcome> {
        let keys = render_blocking(spec.keys().map(str::to_string).collect(), ctx).await?;
        debug!("Restoring cache, keys: {:?}", keys);

        match self.store.restore(&keys).await? {
            Some(hit) => {
                info!("Found cache {}", hit.key);
                Ok(RestoreOutcome::Hit {
                    key: hit.key,
                    archive: hit.archive,
                })
            }
            None => {
                warn!("No cache found for keys: {}", keys.join(", "));
                Ok(RestoreOutcome::Miss { tried: keys })
            }
        }
    }

    /// Save paths under the rendered primary key; returns that key
    pub async fn save(
        &self,
        spec: &CacheSpec,
        ctx: &CacheContext,
        paths: &[ArchivePath],
    ) -> CircletResult<String> {
        let key = render_blocking(vec![spec.primary.clone()], ctx)
            .await?
            .pop()
            .ok_or_else(|| CircletError::Internal("no key rendered".to_string()))?;
        self.store.save(&key, paths).await?;
        info!("Saved cache {}", key);
        Ok(key)
    }
}

/// Render templates on a blocking thread; `checksum` reads files
async fn render_blocking(templates: Vec<String>, ctx: &CacheContext) -> CircletResult<Vec<String>> {
    let ctx = ctx.clone();
    tokio::task::spawn_blocking(move || {
        templates
            .iter()
            .map(|template| KeyTemplate::parse(template)?.render(&ctx))
            .collect::<CircletResult<Vec<_>>>()
    })
    .await
    .map_err(|e| CircletError::Internal(format!("key render task failed: {}", e)))?
}
