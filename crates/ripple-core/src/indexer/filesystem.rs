//! Filesystem scanning helpers for analysis passes.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

const LANGUAGE_BY_EXTENSION: &[(&str, &str)] = &[
    (".py", "python"),
    (".ts", "typescript"),
    (".tsx", "typescript"),
    (".go", "go"),
    (".java", "java"),
];

/// One scannable source file, path relative to the repository root with `/`
/// separators.
#[derive(Clone, Debug)]
pub struct SourceFile {
    pub path: String,
    pub absolute: PathBuf,
    pub language: String,
}

/// Map a path to its source language by extension.
pub fn detect_language(path: &str) -> Option<String> {
    let ext = Path::new(path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))?;
    LANGUAGE_BY_EXTENSION
        .iter()
        .find(|(e, _)| *e == ext.as_str())
        .map(|(_, lang)| lang.to_string())
}

/// SHA-256 hex digest of a byte slice.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// SHA-256 hex digest of a file's content.
pub fn compute_content_hash(path: &Path) -> std::io::Result<String> {
    Ok(hash_bytes(&std::fs::read(path)?))
}

/// Walk the repository (gitignore-aware) and collect supported source files.
///
/// Returns `(files_seen, records)`: `files_seen` counts every regular file
/// visited, while `records` holds only files in a supported language, sorted
/// by relative path for deterministic batch processing.
pub fn scan_repo_files(repo_root: &Path) -> (i64, Vec<SourceFile>) {
    let mut files_seen = 0i64;
    let mut records = Vec::new();

    let walker = ignore::WalkBuilder::new(repo_root)
        .hidden(true)
        .git_ignore(true)
        .git_exclude(true)
        .build();

    for entry in walker.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        files_seen += 1;
        let rel = path
            .strip_prefix(repo_root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let language = match detect_language(&rel) {
            Some(l) => l,
            None => continue,
        };
        records.push(SourceFile {
            path: rel,
            absolute: path.to_path_buf(),
            language,
        });
    }

    records.sort_by(|a, b| a.path.cmp(&b.path));
    (files_seen, records)
}
