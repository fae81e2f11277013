use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const CACHE_DIR_ENV: &str = "REACTIVE_COMPILER_CACHE_DIR";
pub const NO_CACHE_ENV: &str = "REACTIVE_COMPILER_NO_CACHE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOptions {
    /// Where compiled components are cached between builds.
    pub cache_dir: PathBuf,
    pub use_cache: bool,
    /// Render the JavaScript class alongside the compiled plan.
    pub emit_js: bool,
    /// Module the emitted class imports `rt` from.
    pub runtime_module: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".reactive/cache"),
            use_cache: false,
            emit_js: true,
            runtime_module: "@reactive/runtime".to_string(),
        }
    }
}

impl CompileOptions {
    /// Defaults overridden by `REACTIVE_COMPILER_CACHE_DIR` (enables caching)
    /// and `REACTIVE_COMPILER_NO_CACHE` (disables it again).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();
        if let Some(dir) = lookup(CACHE_DIR_ENV).filter(|d| !d.is_empty()) {
            options.cache_dir = PathBuf::from(dir);
            options.use_cache = true;
        }
        if lookup(NO_CACHE_ENV).is_some() {
            options.use_cache = false;
        }
        options
    }
}
