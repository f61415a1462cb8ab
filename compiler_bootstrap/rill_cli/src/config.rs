//! Optional `rill.toml` configuration: GC thresholds, stack sizes and
//! async-native timeouts. Every field has a VM-side default usable with
//! no config file present at all.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Initial heap page size, in bytes, before the GC's first collection
/// decides whether to grow it.
pub const DEFAULT_HEAP_PAGE_SIZE: usize = 64 * 1024;

/// GC runs once live bytes after a collection exceed this fraction of
/// the current heap budget, before growing it.
pub const DEFAULT_GC_GROW_FACTOR: f64 = 2.0;

/// Coroutine stack size, in frames, before a stack-overflow panic.
pub const DEFAULT_STACK_FRAMES: usize = 1024;

/// How long an async-native call may stay `Waiting` before the host
/// treats it as abandoned. `rill_cli` is a single-threaded embedding
/// with no wall clock driving it, so this bounds the REPL's own polling
/// loop rather than anything inside the VM.
pub const DEFAULT_ASYNC_NATIVE_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    pub heap_page_size: usize,
    pub grow_factor: f64,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig { heap_page_size: DEFAULT_HEAP_PAGE_SIZE, grow_factor: DEFAULT_GC_GROW_FACTOR }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub frames: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig { frames: DEFAULT_STACK_FRAMES }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncConfig {
    pub native_timeout_ms: u64,
}

impl Default for AsyncConfig {
    fn default() -> Self {
        AsyncConfig { native_timeout_ms: DEFAULT_ASYNC_NATIVE_TIMEOUT_MS }
    }
}

/// Top-level shape of `rill.toml`. Every section is optional; a missing
/// file or a file missing a section falls back to VM defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gc: GcConfig,
    pub stack: StackConfig,
    pub r#async: AsyncConfig,
}

impl Config {
    /// Loads `rill.toml` from `dir` if present, otherwise returns
    /// defaults. A present-but-unparseable file is an error: the user
    /// asked for specific settings and silently ignoring a typo would
    /// hide it.
    pub fn load(dir: &Path) -> Result<Config> {
        let path = dir.join("rill.toml");
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.gc.heap_page_size, DEFAULT_HEAP_PAGE_SIZE);
        assert_eq!(config.stack.frames, DEFAULT_STACK_FRAMES);
    }

    #[test]
    fn partial_file_fills_in_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rill.toml"), "[gc]\nheap_page_size = 65536\n").unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.gc.heap_page_size, 65536);
        assert_eq!(config.gc.grow_factor, DEFAULT_GC_GROW_FACTOR);
        assert_eq!(config.r#async.native_timeout_ms, DEFAULT_ASYNC_NATIVE_TIMEOUT_MS);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rill.toml"), "not valid toml = [").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }
}
