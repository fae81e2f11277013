use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ast::Component;
use crate::compile::CompiledComponent;
use crate::config::CompileOptions;
use crate::session::ComponentRegistry;

#[derive(Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    pub compiled: CompiledComponent,
}

pub struct IncrementalCache {
    cache_dir: PathBuf,
}

impl IncrementalCache {
    pub fn new(cache_dir: &Path) -> Self {
        if !cache_dir.exists() {
            fs::create_dir_all(cache_dir).ok();
        }
        Self {
            cache_dir: cache_dir.to_path_buf(),
        }
    }

    /// Everything a compilation reads: the component, the shapes of every
    /// other component, and the emission options.
    pub fn compute_hash(
        component: &Component,
        registry: &ComponentRegistry,
        options: &CompileOptions,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(component).unwrap_or_default());
        hasher.update(registry.fingerprint().as_bytes());
        hasher.update([options.emit_js as u8]);
        hasher.update(options.runtime_module.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn get_cache_path(&self, name: &str) -> PathBuf {
        let safe_name = name.replace(|c: char| !c.is_ascii_alphanumeric() && c != '_', "_");
        self.cache_dir.join(format!("{}.json", safe_name))
    }

    pub fn get(&self, name: &str, hash: &str) -> Option<CompiledComponent> {
        let cache_path = self.get_cache_path(name);
        if !cache_path.exists() {
            return None;
        }

        let data = fs::read_to_string(&cache_path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&data) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(component = name, error = %e, "cache entry is corrupt, removing");
                fs::remove_file(cache_path).ok();
                return None;
            }
        };

        if entry.hash == hash {
            tracing::debug!(component = name, "cache hit");
            Some(entry.compiled)
        } else {
            None
        }
    }

    pub fn set(&self, name: &str, hash: &str, compiled: &CompiledComponent) {
        let cache_path = self.get_cache_path(name);
        let entry = CacheEntry {
            hash: hash.to_string(),
            compiled: compiled.clone(),
        };
        if let Ok(data) = serde_json::to_string(&entry) {
            fs::write(cache_path, data).ok();
        }
    }
}
