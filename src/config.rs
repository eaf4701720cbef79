//! Configuration for the tracked index.
//!
//! Settings are layered:
//! - Default values
//! - TOML configuration file (`.trackdex/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TD_` and use double underscores
//! to separate nested levels:
//! - `TD_INDEX__BUFFER_SIZE=100` sets `index.buffer_size`
//! - `TD_EMBEDDING__MODEL=hashing` sets `embedding.model`
//! - `TD_TRACKING__DEBOUNCE_MS=250` sets `tracking.debounce_ms`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding settings and the index, relative to the workspace root.
pub const CONFIG_DIR: &str = ".trackdex";

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "TD_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding the index artifacts
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Workspace root directory (where .trackdex is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Global debug mode
    #[serde(default)]
    pub debug: bool,

    /// Index structure and flush policy
    #[serde(default)]
    pub index: IndexConfig,

    /// Embedding model settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Tracked folder settings
    #[serde(default)]
    pub tracking: TrackingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Embedding dimension, fixed for the lifetime of an index
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Buffered embeddings that trigger an automatic flush
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Cumulative vector count at which the flat index is partitioned
    #[serde(default = "default_upgrade_threshold")]
    pub upgrade_threshold: usize,

    /// Upper bound on partitions
    #[serde(default = "default_max_partitions")]
    pub max_partitions: usize,

    /// Vectors per partition used to size the partition count
    #[serde(default = "default_vectors_per_partition")]
    pub vectors_per_partition: usize,

    /// Partitions probed per query
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,

    /// Seed for k-means initialization
    #[serde(default = "default_kmeans_seed")]
    pub kmeans_seed: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// fastembed model name, or "hashing" for the offline generator
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Show progress while the model downloads
    #[serde(default)]
    pub show_download_progress: bool,

    /// Where downloaded models are cached
    #[serde(default = "default_models_dir")]
    pub cache_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TrackingConfig {
    /// File extensions (without dot) that are indexed
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Extra gitignore-style patterns to skip
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Debounce interval in milliseconds (default: 500ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("index")
}
fn default_dimension() -> usize {
    crate::vector::VECTOR_DIMENSION_384
}
fn default_buffer_size() -> usize {
    50
}
fn default_upgrade_threshold() -> usize {
    40
}
fn default_max_partitions() -> usize {
    4
}
fn default_vectors_per_partition() -> usize {
    10
}
fn default_nprobe() -> usize {
    1
}
fn default_kmeans_seed() -> u64 {
    42
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_extensions() -> Vec<String> {
    ["py", "js", "ts", "json", "md", "rs"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}
fn default_debounce_ms() -> u64 {
    500
}

/// Shared cache directory for downloaded embedding models.
pub fn default_models_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("trackdex").join("models"))
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("models"))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            workspace_root: None,
            debug: false,
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            tracking: TrackingConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            buffer_size: default_buffer_size(),
            upgrade_threshold: default_upgrade_threshold(),
            max_partitions: default_max_partitions(),
            vectors_per_partition: default_vectors_per_partition(),
            nprobe: default_nprobe(),
            kmeans_seed: default_kmeans_seed(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            show_download_progress: false,
            cache_dir: default_models_dir(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            ignore_patterns: vec![CONFIG_DIR.to_string() + "/"],
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                // If workspace_root is not set in config, detect it
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore (__) separates nested levels
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find settings.toml by looking for .trackdex in the current directory
    /// and its ancestors
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Get the workspace root directory (where .trackdex is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Index directory, resolved against the workspace root when relative.
    pub fn index_dir(&self) -> PathBuf {
        match &self.workspace_root {
            Some(root) if self.index_path.is_relative() => root.join(&self.index_path),
            _ => self.index_path.clone(),
        }
    }

    /// Rejects values the index cannot operate with.
    pub fn validate(&self) -> Result<(), String> {
        let index = &self.index;
        let positive = [
            ("index.dimension", index.dimension),
            ("index.buffer_size", index.buffer_size),
            ("index.upgrade_threshold", index.upgrade_threshold),
            ("index.max_partitions", index.max_partitions),
            ("index.vectors_per_partition", index.vectors_per_partition),
            ("index.nprobe", index.nprobe),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(format!("{name} must be greater than zero"));
            }
        }
        if self.tracking.extensions.is_empty() {
            return Err("tracking.extensions must list at least one extension".to_string());
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file under `root`.
    pub fn init_config_file(root: &Path, force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = root.join(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        let settings = Settings {
            workspace_root: Some(root.to_path_buf()),
            ..Settings::default()
        };
        settings.save(&config_path)?;

        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.index_path, PathBuf::from(".trackdex/index"));
        assert_eq!(settings.index.dimension, 384);
        assert_eq!(settings.index.buffer_size, 50);
        assert_eq!(settings.index.upgrade_threshold, 40);
        assert_eq!(settings.index.max_partitions, 4);
        assert_eq!(settings.index.vectors_per_partition, 10);
        assert!(settings.tracking.extensions.contains(&"py".to_string()));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[index]
buffer_size = 8
upgrade_threshold = 100

[embedding]
model = "hashing"

[tracking]
extensions = ["rs"]
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.index.buffer_size, 8);
        assert_eq!(settings.index.upgrade_threshold, 100);
        assert_eq!(settings.embedding.model, "hashing");
        assert_eq!(settings.tracking.extensions, vec!["rs"]);
        // Untouched values keep their defaults
        assert_eq!(settings.index.max_partitions, 4);
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.index.nprobe = 2;
        settings.debug = true;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.index.nprobe, 2);
        assert!(loaded.debug);
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[index]\nkmeans_seed = 7\n").unwrap();

        unsafe {
            std::env::set_var("TD_INDEX__KMEANS_SEED", "99");
        }
        let settings = Settings::load_from(&config_path).unwrap();
        unsafe {
            std::env::remove_var("TD_INDEX__KMEANS_SEED");
        }

        assert_eq!(settings.index.kmeans_seed, 99);
    }

    #[test]
    fn test_init_config_file() {
        let temp_dir = TempDir::new().unwrap();

        let path = Settings::init_config_file(temp_dir.path(), false).unwrap();
        assert!(path.exists());
        assert!(Settings::init_config_file(temp_dir.path(), false).is_err());
        assert!(Settings::init_config_file(temp_dir.path(), true).is_ok());

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.workspace_root.as_deref(), Some(temp_dir.path()));
        assert_eq!(loaded.index_dir(), temp_dir.path().join(".trackdex/index"));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut settings = Settings::default();
        settings.index.buffer_size = 0;
        assert!(settings.validate().unwrap_err().contains("buffer_size"));

        let mut settings = Settings::default();
        settings.tracking.extensions.clear();
        assert!(settings.validate().is_err());
    }
}
