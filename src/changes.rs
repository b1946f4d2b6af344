//! Hash-based change detection.
//!
//! Compares the loader's accepted files against the `path → content_hash`
//! map held by the store and decides what needs embedding, what can be
//! skipped, and which stored paths no longer exist on disk.

use std::collections::{HashMap, HashSet};

use crate::models::LoadedFile;

#[derive(Debug, Default)]
pub struct ChangeSet {
    /// New or modified files (every file when forced), in loader order.
    pub to_embed: Vec<LoadedFile>,
    /// Files whose stored hash matches.
    pub unchanged: usize,
    /// Stored paths absent from the current scan, sorted.
    pub removed: Vec<String>,
}

/// Diff `files` against the stored hashes.
pub fn plan(files: Vec<LoadedFile>, stored: &HashMap<String, String>, force: bool) -> ChangeSet {
    let current: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();

    let mut removed: Vec<String> = stored
        .keys()
        .filter(|p| !current.contains(p.as_str()))
        .cloned()
        .collect();
    removed.sort();

    let mut to_embed = Vec::new();
    let mut unchanged = 0;
    for file in files {
        if needs_embedding(&file, stored, force) {
            to_embed.push(file);
        } else {
            unchanged += 1;
        }
    }

    ChangeSet {
        to_embed,
        unchanged,
        removed,
    }
}

/// The single-file rule: embed unless forced-off and the stored hash matches.
pub fn needs_embedding(file: &LoadedFile, stored: &HashMap<String, String>, force: bool) -> bool {
    force || stored.get(&file.path) != Some(&file.content_hash)
}
