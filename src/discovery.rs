//! Discovery of serialized component trees.
//!
//! Recursively scans a directory for `*.component.json` files produced by the
//! front-end and loads them. A file that fails to load is logged and skipped.

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::ast::Component;

pub const COMPONENT_SUFFIX: &str = ".component.json";

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.') || name == "target" || name == "node_modules")
            .unwrap_or(false)
}

/// Recursively find all component files in a directory, in a stable order.
pub fn find_component_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|name| name.ends_with(COMPONENT_SUFFIX))
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

pub fn load_component_file(path: &Path) -> Result<Component, String> {
    let source = fs::read_to_string(path).map_err(|e| format!("Failed to read file: {}", e))?;
    serde_json::from_str(&source).map_err(|e| format!("Invalid component tree: {}", e))
}

pub fn load_components(dir: &Path) -> Vec<(PathBuf, Component)> {
    let mut components = Vec::new();
    if !dir.exists() {
        return components;
    }
    for path in find_component_files(dir) {
        match load_component_file(&path) {
            Ok(component) => components.push((path, component)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping component");
            }
        }
    }
    tracing::debug!(count = components.len(), dir = %dir.display(), "discovered components");
    components
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "reactive-compiler-discovery-{}-{}",
            tag,
            std::process::id()
        ));
        fs::remove_dir_all(&dir).ok();
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_finds_component_files_and_skips_hidden() {
        let dir = scratch_dir("find");
        fs::create_dir_all(dir.join("widgets")).unwrap();
        fs::create_dir_all(dir.join(".cache")).unwrap();
        fs::write(dir.join("App.component.json"), r#"{"name":"App"}"#).unwrap();
        fs::write(dir.join("widgets/Row.component.json"), r#"{"name":"Row"}"#).unwrap();
        fs::write(dir.join(".cache/Old.component.json"), r#"{"name":"Old"}"#).unwrap();
        fs::write(dir.join("notes.json"), "{}").unwrap();

        let files = find_component_files(&dir);
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| !f.to_string_lossy().contains(".cache")));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_broken_file_is_skipped() {
        let dir = scratch_dir("broken");
        fs::write(dir.join("Good.component.json"), r#"{"name":"Good"}"#).unwrap();
        fs::write(dir.join("Bad.component.json"), "{").unwrap();

        let loaded = load_components(&dir);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].1.name, "Good");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let missing = std::env::temp_dir().join("reactive-compiler-does-not-exist-xyz");
        assert!(load_components(&missing).is_empty());
    }
}
