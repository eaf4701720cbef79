use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use trackdex::vector::{
    EmbeddingGenerator, HASHING_MODEL_NAME, HashingEmbeddingGenerator, VectorDimension,
    VectorError,
};
use trackdex::{Settings, TrackedIndex};

/// Small dimension keeps the tests fast; the hashing model adopts any size.
pub const TEST_DIMENSION: usize = 64;

pub struct TestProject {
    pub dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn add_file(&self, path: &str, content: &str) -> PathBuf {
        let file_path = self.dir.path().join(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&file_path, content).expect("Failed to write file");
        file_path
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Settings with an isolated, absolute index directory under `dir`.
pub fn test_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.index_path = dir.join("index");
    settings.workspace_root = Some(dir.to_path_buf());
    settings.index.dimension = TEST_DIMENSION;
    settings.embedding.model = HASHING_MODEL_NAME.to_string();
    settings
}

pub fn hashing_generator() -> Box<dyn EmbeddingGenerator> {
    Box::new(HashingEmbeddingGenerator::new(
        VectorDimension::new(TEST_DIMENSION).unwrap(),
    ))
}

pub fn open_index(settings: &Settings) -> TrackedIndex {
    TrackedIndex::open(settings, hashing_generator()).expect("Failed to open index")
}

/// Creates a TrackedIndex in its own temp dir.
pub fn create_test_index() -> (TrackedIndex, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let index = open_index(&test_settings(temp_dir.path()));
    (index, temp_dir)
}

/// Hashing generator that refuses texts containing `FAIL` and reports its
/// own model name.
pub struct FailingGenerator {
    inner: HashingEmbeddingGenerator,
    name: String,
}

impl FailingGenerator {
    pub fn new(name: &str) -> Self {
        Self {
            inner: HashingEmbeddingGenerator::new(VectorDimension::new(TEST_DIMENSION).unwrap()),
            name: name.to_string(),
        }
    }
}

impl EmbeddingGenerator for FailingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.iter().any(|text| text.contains("FAIL")) {
            return Err(VectorError::EmbeddingFailed("model unavailable".to_string()));
        }
        self.inner.generate_embeddings(texts)
    }

    fn dimension(&self) -> VectorDimension {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// Distinct, python-looking source for document `i`.
pub fn sample_source(i: usize) -> String {
    format!(
        "def handler_{i}(request):\n    total_{i} = request.count * {}\n    return total_{i}\n",
        i * 7 + 3
    )
}
