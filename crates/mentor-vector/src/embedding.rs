//! Embedding provider trait and implementations.
//!
//! - `OnnxEmbeddingProvider` loads a sentence-transformer ONNX export (e.g.
//!   all-MiniLM-L6-v2) via ort and tokenizes with the HuggingFace tokenizers
//!   crate. This is the production backend.
//! - `MockEmbedding` produces deterministic hash-based vectors for testing
//!   and for running without a model.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex};

use mentor_core::error::MentorError;
use ort::session::Session;
use ort::value::TensorRef;
use tokenizers::Tokenizer;
use tracing::info;

/// Provider of text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors capturing
/// semantic content. Used on the write path (advisor summaries during sync)
/// and on the read path (profile text and search queries). Output must be
/// deterministic for identical input within a process lifetime.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn encode(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, MentorError>> + Send;

    /// Generate embeddings for multiple texts.
    fn encode_batch(
        &self,
        texts: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<Vec<f32>>, MentorError>> + Send;

    /// Return the dimensionality of vectors produced by this provider.
    fn dimension(&self) -> usize;
}

/// Object-safe version of [`EmbeddingProvider`] for dynamic dispatch.
///
/// Because `EmbeddingProvider::encode` returns `impl Future` it is not
/// object-safe. This trait uses boxed futures instead, allowing
/// `Box<dyn DynEmbeddingProvider>` to be stored in structs without generics.
///
/// A blanket implementation is provided so that every `EmbeddingProvider`
/// automatically implements `DynEmbeddingProvider`.
pub trait DynEmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text (boxed future).
    fn encode_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<f32>, MentorError>> + Send + 'a>,
    >;

    /// Generate embeddings for multiple texts (boxed future).
    fn encode_batch_boxed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<Vec<f32>>, MentorError>> + Send + 'a>,
    >;

    /// Return the dimensionality of vectors produced by this provider.
    fn dimension(&self) -> usize;
}

impl<T: EmbeddingProvider> DynEmbeddingProvider for T {
    fn encode_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<f32>, MentorError>> + Send + 'a>,
    > {
        Box::pin(self.encode(text))
    }

    fn encode_batch_boxed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<Vec<f32>>, MentorError>> + Send + 'a>,
    > {
        Box::pin(self.encode_batch(texts))
    }

    fn dimension(&self) -> usize {
        EmbeddingProvider::dimension(self)
    }
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingProvider - real ONNX Runtime inference
// ---------------------------------------------------------------------------

/// ONNX Runtime-backed embedding provider using a sentence-transformer model.
///
/// Expects a model directory containing:
/// - `model.onnx`  — the sentence-transformer ONNX export
/// - `tokenizer.json` — the HuggingFace fast-tokenizer file
///
/// The model should accept `input_ids`, `attention_mask`, and
/// `token_type_ids` as i64 inputs and produce token-level embeddings.
/// Masked mean pooling plus L2 normalization yields one vector per input.
pub struct OnnxEmbeddingProvider {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimension: usize,
}

// ort::Session is Send + Sync internally (uses Arc<SharedSessionInner>).
unsafe impl Send for OnnxEmbeddingProvider {}
unsafe impl Sync for OnnxEmbeddingProvider {}

impl std::fmt::Debug for OnnxEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingProvider")
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl OnnxEmbeddingProvider {
    /// Load a sentence-transformer model from the given directory.
    ///
    /// The directory must contain `model.onnx` and `tokenizer.json`.
    pub fn from_directory(model_dir: &Path) -> Result<Self, MentorError> {
        Self::from_files(
            &model_dir.join("model.onnx"),
            &model_dir.join("tokenizer.json"),
        )
    }

    /// Load from explicit model and tokenizer file paths.
    pub fn from_files(model_path: &Path, tokenizer_path: &Path) -> Result<Self, MentorError> {
        if !model_path.exists() {
            return Err(MentorError::Provider(format!(
                "ONNX model not found at {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(MentorError::Provider(format!(
                "Tokenizer not found at {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| MentorError::Provider(format!("ONNX session builder: {}", e)))?
            .with_intra_threads(1)
            .map_err(|e| MentorError::Provider(format!("ONNX set threads: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| MentorError::Provider(format!("ONNX load model: {}", e)))?;

        // Sentence-transformer output is [batch, seq_len, hidden_dim]; the
        // last shape entry is the embedding dimension.
        let dimension = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .map(|d| if d > 0 { d as usize } else { 384 })
            .unwrap_or(384);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| MentorError::Provider(format!("Failed to load tokenizer: {}", e)))?;

        info!(
            model = %model_path.display(),
            dimension,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimension,
        })
    }

    /// Tokenize, run inference, and mean-pool the output.
    fn encode_sync(&self, text: &str) -> Result<Vec<f32>, MentorError> {
        if text.is_empty() {
            return Err(MentorError::Validation(
                "Cannot embed empty text".to_string(),
            ));
        }

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| MentorError::Provider(format!("Tokenization failed: {}", e)))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding
            .get_type_ids()
            .iter()
            .map(|&t| t as i64)
            .collect();

        let seq_len = input_ids.len();

        let ids_array = ndarray::Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(|e| MentorError::Provider(format!("input_ids array: {}", e)))?;
        let mask_array = ndarray::Array2::from_shape_vec((1, seq_len), attention_mask.clone())
            .map_err(|e| MentorError::Provider(format!("attention_mask array: {}", e)))?;
        let type_array = ndarray::Array2::from_shape_vec((1, seq_len), token_type_ids)
            .map_err(|e| MentorError::Provider(format!("token_type_ids array: {}", e)))?;

        let ids_ref = TensorRef::from_array_view(&ids_array)
            .map_err(|e| MentorError::Provider(format!("TensorRef input_ids: {}", e)))?;
        let mask_ref = TensorRef::from_array_view(&mask_array)
            .map_err(|e| MentorError::Provider(format!("TensorRef attention_mask: {}", e)))?;
        let type_ref = TensorRef::from_array_view(&type_array)
            .map_err(|e| MentorError::Provider(format!("TensorRef token_type_ids: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| MentorError::Provider(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(|e| MentorError::Provider(format!("ONNX inference failed: {}", e)))?;

        // Token embeddings as a flat slice: [1, seq_len, hidden_dim].
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| MentorError::Provider(format!("Extract embeddings: {}", e)))?;

        let shape_dims: Vec<i64> = shape.iter().copied().collect();
        if shape_dims.len() < 2 {
            return Err(MentorError::Provider(format!(
                "Unexpected output shape: {:?}",
                shape_dims
            )));
        }

        let hidden_dim = shape_dims[shape_dims.len() - 1] as usize;

        // Mean pooling over the sequence dimension, masked by attention_mask.
        let mut pooled = vec![0.0f32; hidden_dim];
        let mut count = 0.0f32;

        for (tok_idx, &mask_val) in attention_mask.iter().enumerate() {
            if mask_val > 0 {
                let offset = tok_idx * hidden_dim;
                for dim in 0..hidden_dim {
                    pooled[dim] += data[offset + dim];
                }
                count += 1.0;
            }
        }

        if count > 0.0 {
            for val in &mut pooled {
                *val /= count;
            }
        }

        // L2-normalize the embedding.
        let norm: f32 = pooled.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut pooled {
                *val /= norm;
            }
        }

        Ok(pooled)
    }

    fn clone_handles(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            tokenizer: Arc::clone(&self.tokenizer),
            dimension: self.dimension,
        }
    }
}

impl EmbeddingProvider for OnnxEmbeddingProvider {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, MentorError> {
        // ONNX Runtime inference is CPU-bound; run on a blocking thread.
        let provider = self.clone_handles();
        let text_owned = text.to_string();

        tokio::task::spawn_blocking(move || provider.encode_sync(&text_owned))
            .await
            .map_err(|e| MentorError::Provider(format!("Embedding task panicked: {}", e)))?
    }

    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MentorError> {
        let provider = self.clone_handles();
        let texts_owned: Vec<String> = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            texts_owned
                .iter()
                .map(|text| provider.encode_sync(text))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| MentorError::Provider(format!("Embedding task panicked: {}", e)))?
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors
// ---------------------------------------------------------------------------

/// Mock embedding provider returning deterministic unit vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs. Used in tests and as the fallback when
/// no ONNX model is configured.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimension: usize,
}

impl MockEmbedding {
    /// Create a provider with the standard 384 dimensions.
    pub fn new() -> Self {
        Self { dimension: 384 }
    }

    /// Create a provider with a custom dimensionality.
    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        // L2-normalize to produce unit vectors, matching the ONNX provider.
        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingProvider for MockEmbedding {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, MentorError> {
        if text.is_empty() {
            return Err(MentorError::Validation(
                "Cannot embed empty text".to_string(),
            ));
        }
        Ok(self.hash_to_vector(text))
    }

    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MentorError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.encode(text).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_dimension() {
        let provider = MockEmbedding::new();
        let vec = provider.encode("graph neural networks").await.unwrap();
        assert_eq!(vec.len(), 384);

        let provider = MockEmbedding::with_dimension(8);
        let vec = provider.encode("graph neural networks").await.unwrap();
        assert_eq!(vec.len(), 8);
    }

    #[tokio::test]
    async fn test_mock_deterministic() {
        let provider = MockEmbedding::new();
        let v1 = provider.encode("same text").await.unwrap();
        let v2 = provider.encode("same text").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_different_inputs() {
        let provider = MockEmbedding::new();
        let v1 = provider.encode("text one").await.unwrap();
        let v2 = provider.encode("text two").await.unwrap();
        assert_ne!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_empty_text_rejected() {
        let provider = MockEmbedding::new();
        let result = provider.encode("").await;
        assert!(matches!(result, Err(MentorError::Validation(_))));
    }

    #[tokio::test]
    async fn test_mock_unit_norm() {
        let provider = MockEmbedding::new();
        let vec = provider.encode("normalization check").await.unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_mock_encode_batch() {
        let provider = MockEmbedding::new();
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let vectors = provider.encode_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], provider.encode("alpha").await.unwrap());
        assert_eq!(vectors[1], provider.encode("beta").await.unwrap());
    }

    #[tokio::test]
    async fn test_dyn_provider_dispatch() {
        let provider: Box<dyn DynEmbeddingProvider> = Box::new(MockEmbedding::with_dimension(16));
        assert_eq!(provider.dimension(), 16);
        let vec = provider.encode_boxed("dynamic dispatch").await.unwrap();
        assert_eq!(vec.len(), 16);
    }

    #[test]
    fn test_onnx_missing_model() {
        let result = OnnxEmbeddingProvider::from_directory(Path::new("/nonexistent"));
        assert!(matches!(result, Err(MentorError::Provider(_))));
    }
}
