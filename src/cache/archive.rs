//! Tar packing for cached paths
//!
//! Archive entries are rooted at `workspace/` (the job working directory)
//! or `home/` (the user's home directory), so a cache saved by one job can be
//! unpacked into another job's directories.

use crate::error::{CircletError, CircletResult};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

const WORKSPACE_ROOT: &str = "workspace";
const HOME_ROOT: &str = "home";

/// A cached path on disk and its name inside the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePath {
    pub source: PathBuf,
    pub entry: String,
}

/// Directories archive entries are resolved against
#[derive(Debug, Clone)]
pub struct ArchiveRoots {
    pub workspace: PathBuf,
    pub home: Option<PathBuf>,
    /// The job's declared `working_directory`; paths under it map into the workspace
    pub alias: Option<String>,
}

impl ArchiveRoots {
    /// Roots for a working directory and the current user's home
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            home: dirs::home_dir(),
            alias: None,
        }
    }

    /// Override the home root
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    /// Treat paths under the declared working directory as workspace paths
    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias.map(|a| a.trim_end_matches('/').to_string());
        self
    }

    /// Resolve a `save_cache` path (`target`, `~/.cargo`, or absolute)
    pub fn resolve(&self, path: &str) -> CircletResult<ArchivePath> {
        if let Some(alias) = self.alias.as_deref().filter(|a| !a.is_empty()) {
            if path == alias {
                return entry_for(WORKSPACE_ROOT, &self.workspace, Path::new(""), path);
            }
            if let Some(rest) = path.strip_prefix(alias).and_then(|r| r.strip_prefix('/')) {
                return entry_for(WORKSPACE_ROOT, &self.workspace, Path::new(rest), path);
            }
        }

        if path == "~" || path.starts_with("~/") {
            let home = self
                .home
                .as_ref()
                .ok_or_else(|| CircletError::CacheStore("home directory unknown".to_string()))?;
            let rel = Path::new(path.trim_start_matches('~').trim_start_matches('/'));
            return entry_for(HOME_ROOT, home, rel, path);
        }

        let candidate = Path::new(path);
        if candidate.is_absolute() {
            if let Ok(rel) = candidate.strip_prefix(&self.workspace) {
                return entry_for(WORKSPACE_ROOT, &self.workspace, rel, path);
            }
            if let Some(home) = &self.home {
                if let Ok(rel) = candidate.strip_prefix(home) {
                    return entry_for(HOME_ROOT, home, rel, path);
                }
            }
            return Err(CircletError::CachePathOutside {
                path: candidate.to_path_buf(),
            });
        }

        entry_for(WORKSPACE_ROOT, &self.workspace, candidate, path)
    }

    fn root_for(&self, name: &str) -> Option<&Path> {
        match name {
            WORKSPACE_ROOT => Some(&self.workspace),
            HOME_ROOT => self.home.as_deref(),
            _ => None,
        }
    }
}

fn entry_for(root_name: &str, root: &Path, rel: &Path, original: &str) -> CircletResult<ArchivePath> {
    if !is_plain_relative(rel) {
        return Err(CircletError::CachePathOutside {
            path: PathBuf::from(original),
        });
    }

    let mut entry = PathBuf::from(root_name);
    entry.extend(rel.components());
    Ok(ArchivePath {
        source: root.join(rel),
        entry: entry.to_string_lossy().into_owned(),
    })
}

fn is_plain_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Pack paths into an in-memory tar archive; missing paths are skipped
pub fn pack(paths: &[ArchivePath]) -> CircletResult<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    for path in paths {
        let meta = match fs::symlink_metadata(&path.source) {
            Ok(meta) => meta,
            Err(_) => {
                warn!("Cache path {} does not exist, skipping", path.source.display());
                continue;
            }
        };

        let result = if meta.is_dir() {
            builder.append_dir_all(&path.entry, &path.source)
        } else {
            builder.append_path_with_name(&path.source, &path.entry)
        };
        result.map_err(|e| archive_error(format!("adding {}", path.source.display()), e))?;
        debug!("Packed {} as {}", path.source.display(), path.entry);
    }

    builder
        .into_inner()
        .map_err(|e| archive_error("finishing archive", e))
}

/// Unpack an archive produced by [`pack`]; returns the number of entries written
pub fn unpack(archive: &[u8], roots: &ArchiveRoots) -> CircletResult<usize> {
    let mut archive = tar::Archive::new(archive);
    archive.set_preserve_mtime(true);

    let mut written = 0;
    let entries = archive
        .entries()
        .map_err(|e| archive_error("reading archive", e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| archive_error("reading archive entry", e))?;
        let name = entry
            .path()
            .map_err(|e| archive_error("reading entry path", e))?
            .into_owned();

        let mut components = name.components();
        let root = match components.next() {
            Some(Component::Normal(first)) => first.to_str().and_then(|r| roots.root_for(r)),
            _ => None,
        };
        let rel = components.as_path();
        let Some(root) = root.filter(|_| is_plain_relative(rel)) else {
            warn!("Skipping unexpected archive entry {}", name.display());
            continue;
        };

        let dest = root.join(rel);
        if entry.header().entry_type().is_dir() {
            fs::create_dir_all(&dest)
                .map_err(|e| archive_error(format!("creating {}", dest.display()), e))?;
            continue;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| archive_error(format!("creating {}", parent.display()), e))?;
        }
        if entry.header().entry_type().is_symlink() && dest.symlink_metadata().is_ok() {
            fs::remove_file(&dest)
                .map_err(|e| archive_error(format!("replacing {}", dest.display()), e))?;
        }
        entry
            .unpack(&dest)
            .map_err(|e| archive_error(format!("writing {}", dest.display()), e))?;
        written += 1;
    }

    Ok(written)
}

fn archive_error(context: impl Into<String>, source: std::io::Error) -> CircletError {
    CircletError::CacheArchive {
        context: context.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn roots(workspace: &Path, home: &Path) -> ArchiveRoots {
        ArchiveRoots::new(workspace).with_home(Some(home.to_path_buf()))
    }

    #[test]
    fn resolve_relative_home_and_absolute() {
        let r = roots(Path::new("/work/muta"), Path::new("/home/ci"));

        let target = r.resolve("target").unwrap();
        assert_eq!(target.source, PathBuf::from("/work/muta/target"));
        assert_eq!(target.entry, "workspace/target");

        let registry = r.resolve("~/.cargo/registry").unwrap();
        assert_eq!(registry.source, PathBuf::from("/home/ci/.cargo/registry"));
        assert_eq!(registry.entry, "home/.cargo/registry");

        let abs = r.resolve("/home/ci/.rustup").unwrap();
        assert_eq!(abs.entry, "home/.rustup");
    }

    #[test]
    fn resolve_declared_working_directory() {
        let r = roots(Path::new("/work/muta"), Path::new("/home/ci"))
            .with_alias(Some("~/muta/".to_string()));

        let target = r.resolve("~/muta/target").unwrap();
        assert_eq!(target.entry, "workspace/target");
        assert_eq!(target.source, PathBuf::from("/work/muta/target"));

        let cargo = r.resolve("~/.cargo").unwrap();
        assert_eq!(cargo.entry, "home/.cargo");
    }

    #[test]
    fn resolve_rejects_escaping_paths() {
        let r = roots(Path::new("/work/muta"), Path::new("/home/ci"));
        assert!(r.resolve("../elsewhere").is_err());
        assert!(r.resolve("/usr/local/bin").is_err());
        assert!(r.resolve("~/../root").is_err());
    }

    #[test]
    fn pack_then_unpack_into_new_roots() {
        let source = TempDir::new().unwrap();
        let work = source.path().join("work");
        let home = source.path().join("home");
        fs::create_dir_all(work.join("target/debug")).unwrap();
        fs::create_dir_all(home.join(".cargo")).unwrap();
        fs::write(work.join("target/debug/muta"), b"binary").unwrap();
        fs::write(home.join(".cargo/config"), b"[net]").unwrap();

        let r = roots(&work, &home);
        let paths = vec![
            r.resolve("target").unwrap(),
            r.resolve("~/.cargo/config").unwrap(),
            r.resolve("missing-dir").unwrap(),
        ];
        let bytes = pack(&paths).unwrap();

        let dest = TempDir::new().unwrap();
        let dest_work = dest.path().join("work");
        let dest_home = dest.path().join("home");
        let written = unpack(&bytes, &roots(&dest_work, &dest_home)).unwrap();

        assert_eq!(written, 2);
        assert_eq!(fs::read(dest_work.join("target/debug/muta")).unwrap(), b"binary");
        assert_eq!(fs::read(dest_home.join(".cargo/config")).unwrap(), b"[net]");
    }

    #[test]
    fn unpack_rejects_garbage() {
        let dest = TempDir::new().unwrap();
        let garbage = vec![7u8; 1024];
        assert!(unpack(&garbage, &ArchiveRoots::new(dest.path())).is_err());
    }
}
