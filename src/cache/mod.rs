//! Cache key resolution and storage
//!
//! Cache keys are rendered from templates against an explicit
//! [`CacheContext`]. Restored and saved content travels as tar archives
//! through a [`CacheStore`].
//!
//! # Restore precedence
//!
//! | Step | Rule |
//! |------|------|
//! | 1 | Keys are tried in declared order |
//! | 2 | Per key: exact match, then newest entry with that prefix |
//! | 3 | No match is a miss, never an error |

pub mod archive;
pub mod context;
pub mod local;
pub mod resolver;
pub mod store;
pub mod template;

pub use archive::{ArchivePath, ArchiveRoots};
pub use context::CacheContext;
pub use local::LocalCacheStore;
pub use resolver::{CacheResolver, RestoreOutcome};
pub use store::{CacheEntry, CacheHit, CacheStore, MemoryCacheStore};
pub use template::{checksum_file, render_key, KeyTemplate};

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
