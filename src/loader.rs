//! Corpus loader and classifier.
//!
//! Walks the corpus root, matches each file against the code and docs glob
//! sets (code wins when both match), drops ignored paths, and turns every
//! accepted file into a [`LoadedFile`] with its hash, language, and line count.
//!
//! Per-file problems (oversized, empty, unreadable) are logged and collected
//! in [`LoadOutcome::skipped`]; they never abort the scan.

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::error::{IndexError, LoadError};
use crate::language;
use crate::models::{DocType, LoadedFile};

/// Always-ignored directories, in addition to `corpus.ignore_globs`.
const DEFAULT_IGNORES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

pub struct Loader {
    root: PathBuf,
    code: GlobSet,
    docs: GlobSet,
    ignore: GlobSet,
    max_file_bytes: u64,
    follow_symlinks: bool,
}

/// Result of a full corpus scan.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    /// Accepted files, sorted by path.
    pub files: Vec<LoadedFile>,
    /// Files that matched a pattern but were rejected.
    pub skipped: Vec<LoadError>,
}

impl Loader {
    pub fn new(config: &CorpusConfig) -> Result<Self, LoadError> {
        let mut ignores: Vec<String> = DEFAULT_IGNORES.iter().map(|s| s.to_string()).collect();
        ignores.extend(config.ignore_globs.iter().cloned());

        Ok(Self {
            root: config.root.clone(),
            code: build_globset(&config.code_globs)?,
            docs: build_globset(&config.docs_globs)?,
            ignore: build_globset(&ignores)?,
            max_file_bytes: config.max_file_bytes,
            follow_symlinks: config.follow_symlinks,
        })
    }

    /// Category for a root-relative path, or `None` if ignored or unmatched.
    pub fn classify(&self, relative: &str) -> Option<DocType> {
        if self.ignore.is_match(relative) {
            return None;
        }
        if self.code.is_match(relative) {
            Some(DocType::Code)
        } else if self.docs.is_match(relative) {
            Some(DocType::Docs)
        } else {
            None
        }
    }

    /// Enumerate and load every accepted file under the root.
    pub fn scan(&self) -> Result<LoadOutcome, LoadError> {
        if !self.root.exists() {
            return Err(LoadError::RootMissing(self.root.clone()));
        }

        let mut outcome = LoadOutcome::default();

        let walker = WalkDir::new(&self.root).follow_links(self.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let rel = relative_key(&self.root, entry.path());
            let Some(doc_type) = self.classify(&rel) else {
                continue;
            };

            match self.load_one(entry.path(), &rel, doc_type) {
                Ok(file) => outcome.files.push(file),
                Err(e) => {
                    warn!(error = %e, "skipping file");
                    outcome.skipped.push(e);
                }
            }
        }

        // Deterministic ordering, and the walk never yields a path twice
        outcome.files.sort_by(|a, b| a.path.cmp(&b.path));
        outcome.files.dedup_by(|a, b| a.path == b.path);

        debug!(
            accepted = outcome.files.len(),
            skipped = outcome.skipped.len(),
            "corpus scan complete"
        );
        Ok(outcome)
    }

    /// Load a single explicitly named file (absolute, or relative to the root).
    pub fn load_path(&self, path: &Path) -> Result<LoadedFile, IndexError> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        if !absolute.is_file() {
            return Err(IndexError::FileNotFound(path.to_path_buf()));
        }

        // Resolve `..` and symlinks before checking containment
        let root = canonical(&self.root)?;
        let target = canonical(&absolute)?;
        if !target.starts_with(&root) {
            return Err(LoadError::OutsideRoot(path.display().to_string()).into());
        }

        let rel = relative_key(&root, &target);
        let doc_type = self
            .classify(&rel)
            .ok_or_else(|| LoadError::NotMatched(rel.clone()))?;

        Ok(self.load_one(&target, &rel, doc_type)?)
    }

    fn load_one(&self, path: &Path, rel: &str, doc_type: DocType) -> Result<LoadedFile, LoadError> {
        let read_err = |source| LoadError::Read {
            path: rel.to_string(),
            source,
        };

        let size = std::fs::metadata(path).map_err(read_err)?.len();
        if size > self.max_file_bytes {
            return Err(LoadError::TooLarge {
                path: rel.to_string(),
                size,
                limit: self.max_file_bytes,
            });
        }

        let content = std::fs::read_to_string(path).map_err(read_err)?;
        if content.trim().is_empty() {
            return Err(LoadError::Empty {
                path: rel.to_string(),
            });
        }

        Ok(LoadedFile {
            path: rel.to_string(),
            doc_type,
            content_hash: hash_content(&content),
            language: language::detect(rel).map(str::to_string),
            line_count: content.lines().count() as i64,
            content,
        })
    }
}

/// SHA-256 hex digest of raw file content.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonical(path: &Path) -> Result<PathBuf, LoadError> {
    path.canonicalize().map_err(|source| LoadError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// Root-relative path with `/` separators, used as the document key.
fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, LoadError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
