//! Embedding producers.
//!
//! [`EmbeddingGenerator`] maps text to fixed-length vectors. Two
//! implementations ship with the crate:
//! - [`FastEmbedGenerator`]: a fastembed model that is loaded lazily, on the
//!   first embedding call or an explicit [`EmbeddingGenerator::prepare`].
//! - [`HashingEmbeddingGenerator`]: deterministic feature hashing that needs
//!   no model download. Used by tests and by offline setups.

use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::config::EmbeddingConfig;
use crate::vector::types::{VectorDimension, VectorError};

/// Name under which the hashing generator is selected in configuration.
pub const HASHING_MODEL_NAME: &str = "hashing";

/// Trait for generating embeddings from text.
///
/// Implementations must be thread-safe; the index calls them without
/// holding its own lock.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate one embedding per input text.
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Dimension of every embedding this generator produces.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Brings the generator into its ready state.
    ///
    /// Generators without an expensive setup are always ready.
    fn prepare(&self) -> Result<(), VectorError> {
        Ok(())
    }

    /// Model identifier recorded in index metadata.
    fn model_name(&self) -> &str;
}

/// Parse a model name from configuration into a fastembed model.
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" => Ok(EmbeddingModel::BGEBaseENV15),
        "MultilingualE5Small" => Ok(EmbeddingModel::MultilingualE5Small),
        _ => Err(VectorError::EmbeddingFailed(format!(
            "Unknown embedding model '{name}'. Supported: AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15, BGEBaseENV15, MultilingualE5Small, {HASHING_MODEL_NAME}"
        ))),
    }
}

/// Output dimension of a supported fastembed model.
#[must_use]
pub fn model_dimension(model: &EmbeddingModel) -> VectorDimension {
    match model {
        EmbeddingModel::BGEBaseENV15 => VectorDimension::new(768).unwrap_or(VectorDimension::dimension_384()),
        _ => VectorDimension::dimension_384(),
    }
}

/// Builds the generator selected by `config`.
///
/// `dimension` is the index dimension; the hashing generator adopts it,
/// while fastembed models must produce it natively.
pub fn generator_from_config(
    config: &EmbeddingConfig,
    dimension: VectorDimension,
) -> Result<Box<dyn EmbeddingGenerator>, VectorError> {
    if config.model == HASHING_MODEL_NAME {
        return Ok(Box::new(HashingEmbeddingGenerator::new(dimension)));
    }

    let model = parse_embedding_model(&config.model)?;
    let native = model_dimension(&model);
    if native != dimension {
        return Err(VectorError::DimensionMismatch {
            expected: dimension.get(),
            actual: native.get(),
        });
    }

    Ok(Box::new(FastEmbedGenerator::new(
        model,
        config.model.clone(),
        config.cache_dir.clone(),
        config.show_download_progress,
    )))
}

/// Lifecycle of the fastembed model.
enum ModelSlot {
    /// Constructed but not loaded
    Pending,
    Ready(TextEmbedding),
}

/// fastembed-backed generator with a lazily loaded model.
///
/// Construction is cheap. The model is downloaded (first run) and loaded
/// when [`EmbeddingGenerator::prepare`] or the first embedding call runs;
/// the transition happens once, under the generator's mutex.
pub struct FastEmbedGenerator {
    slot: Mutex<ModelSlot>,
    model: EmbeddingModel,
    model_name: String,
    cache_dir: PathBuf,
    show_download_progress: bool,
    dimension: VectorDimension,
}

impl FastEmbedGenerator {
    /// Creates a generator in the pending state.
    #[must_use]
    pub fn new(
        model: EmbeddingModel,
        model_name: String,
        cache_dir: PathBuf,
        show_download_progress: bool,
    ) -> Self {
        let dimension = model_dimension(&model);
        Self {
            slot: Mutex::new(ModelSlot::Pending),
            model,
            model_name,
            cache_dir,
            show_download_progress,
            dimension,
        }
    }

    /// Whether the model has been loaded.
    pub fn is_ready(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| matches!(*slot, ModelSlot::Ready(_)))
            .unwrap_or(false)
    }

    fn load(&self) -> Result<TextEmbedding, VectorError> {
        tracing::info!(
            "loading embedding model {} (cache: {})",
            self.model_name,
            self.cache_dir.display()
        );
        TextEmbedding::try_new(
            InitOptions::new(self.model.clone())
                .with_cache_dir(self.cache_dir.clone())
                .with_show_download_progress(self.show_download_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download")
        ))
    }

    fn lock_slot(&self) -> Result<std::sync::MutexGuard<'_, ModelSlot>, VectorError> {
        self.slot.lock().map_err(|_| {
            VectorError::EmbeddingFailed(
                "Failed to acquire embedding model lock - model may be poisoned".to_string(),
            )
        })
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut slot = self.lock_slot()?;
        if matches!(*slot, ModelSlot::Pending) {
            *slot = ModelSlot::Ready(self.load()?);
        }
        let ModelSlot::Ready(model) = &mut *slot else {
            return Err(VectorError::EmbeddingFailed(
                "Embedding model is not loaded".to_string(),
            ));
        };

        let embeddings = model.embed(texts.to_vec(), None).map_err(|e| {
            VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
        })?;

        if embeddings.len() != texts.len() {
            return Err(VectorError::EmbeddingFailed(format!(
                "Model returned {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn prepare(&self) -> Result<(), VectorError> {
        let mut slot = self.lock_slot()?;
        if matches!(*slot, ModelSlot::Pending) {
            *slot = ModelSlot::Ready(self.load()?);
        }
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Deterministic embeddings from hashed text features.
///
/// Each lowercase word and each character trigram is hashed (FNV-1a) into
/// one of `D` buckets with a hash-derived sign; the result is normalized to
/// unit length. Texts sharing many words and trigrams land close together.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingGenerator {
    dimension: VectorDimension,
}

impl HashingEmbeddingGenerator {
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension.get();
        let mut embedding = vec![0.0f32; dim];
        let lowered = text.to_lowercase();

        let mut add_feature = |feature: &[u8], weight: f32| {
            let hash = fnv1a(feature);
            let bucket = (hash % dim as u64) as usize;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign * weight;
        };

        for word in lowered
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
        {
            add_feature(word.as_bytes(), 2.0);
        }

        let chars: Vec<char> = lowered.chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            add_feature(trigram.as_bytes(), 1.0);
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        }
        embedding
    }
}

impl EmbeddingGenerator for HashingEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        HASHING_MODEL_NAME
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}
