//! The `vector` stage kernel (§4.C): cosine similarity between the query's
//! embedding and each persisted chunk's embedding, threshold-gated and
//! capped at 0.9. Only the query is embedded here (candle BERT mean
//! pooling + L2 normalize + dot-product cosine); chunk embeddings are
//! read back from the embedding store rather than recomputed.

use crate::deadline::Deadline;
use crate::types::Hit;

use super::common::StageContext;

const SCORE_CEILING: f64 = 0.9;
const SIMILARITY_THRESHOLD: f64 = 0.35;

/// Anything that can turn query text into a fixed-dimension embedding.
pub trait QueryEmbedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dim(&self) -> usize;
}

/// Deterministic hashing bag-of-tokens embedder: always available (no
/// network, no model weights), used when the `semantic` feature's model
/// isn't loaded. Tokens are hashed into buckets and L2-normalized, giving a
/// stable, comparable vector for exact-token-overlap queries without
/// pulling in a real encoder.
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl QueryEmbedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for tok in crate::query::strong_tokens(text) {
            let bucket = (fnv1a(tok.to_lowercase().as_bytes()) as usize) % self.dim;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-9 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot as f64
}

pub fn vector(ctx: &StageContext, query: &str, k: usize, deadline: &Deadline) -> Vec<Hit> {
    vector_with_embedder(ctx, query, k, deadline, &HashingEmbedder::default())
}

/// Same algorithm, with an injectable embedder (production callers pass the
/// candle-backed one behind the `semantic` feature; tests pass the hashing
/// fallback for determinism without model weights).
pub fn vector_with_embedder(
    ctx: &StageContext,
    query: &str,
    k: usize,
    deadline: &Deadline,
    embedder: &dyn QueryEmbedder,
) -> Vec<Hit> {
    if query.trim().is_empty() || ctx.known_chunks.is_empty() {
        return Vec::new();
    }
    let query_emb = embedder.embed(query);

    let mut scored: Vec<(f64, usize)> = ctx
        .known_chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.embedding.len() == query_emb.len())
        .map(|(i, c)| (cosine(&query_emb, &c.embedding), i))
        .filter(|(score, _)| *score >= SIMILARITY_THRESHOLD)
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut hits = Vec::new();
    for (score, idx) in scored.into_iter().take(k) {
        if deadline.expired() {
            break;
        }
        let chunk = &ctx.known_chunks[idx];
        hits.push(Hit {
            score: (score * SCORE_CEILING).min(SCORE_CEILING),
            file_rel: chunk.meta.file_rel.clone(),
            meta: chunk.meta.clone(),
            stage: "vector",
        });
    }
    hits
}

#[cfg(feature = "semantic")]
pub use candle_backed::CandleEmbedder;

#[cfg(feature = "semantic")]
mod candle_backed {
    use super::QueryEmbedder;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::VarBuilder;
    use candle_transformers::models::bert::{BertModel, Config as BertConfig};
    use hf_hub::{api::sync::Api, Repo, RepoType};
    use std::sync::Mutex;
    use tokenizers::Tokenizer;

    /// Lazily-loaded `sentence-transformers/all-MiniLM-L6-v2` embedder
    /// producing mean-pooled, L2-normalized BERT embeddings. Only ever
    /// encodes a single query string per call.
    pub struct CandleEmbedder {
        inner: Mutex<Option<(BertModel, Tokenizer, Device)>>,
        dim: usize,
    }

    impl CandleEmbedder {
        pub fn new() -> Self {
            Self { inner: Mutex::new(None), dim: 384 }
        }

        fn ensure_loaded(&self) -> Result<(), String> {
            let mut guard = self.inner.lock().unwrap();
            if guard.is_some() {
                return Ok(());
            }
            let device = Device::Cpu;
            let model_id = "sentence-transformers/all-MiniLM-L6-v2";
            let api = Api::new().map_err(|e| format!("HF API init failed: {e}"))?;
            let repo = api.repo(Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string()));

            let config_path = repo.get("config.json").map_err(|e| e.to_string())?;
            let tokenizer_path = repo.get("tokenizer.json").map_err(|e| e.to_string())?;
            let weights_path = repo.get("model.safetensors").map_err(|e| e.to_string())?;

            let config_str = std::fs::read_to_string(config_path).map_err(|e| e.to_string())?;
            let config: BertConfig = serde_json::from_str(&config_str).map_err(|e| e.to_string())?;
            let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| e.to_string())?;
            let vb = unsafe {
                VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
                    .map_err(|e| e.to_string())?
            };
            let model = BertModel::load(vb, &config).map_err(|e| e.to_string())?;

            *guard = Some((model, tokenizer, device));
            Ok(())
        }

        fn encode(&self, text: &str) -> Result<Vec<f32>, String> {
            self.ensure_loaded()?;
            let guard = self.inner.lock().unwrap();
            let (model, tokenizer, device) = guard.as_ref().ok_or("model not loaded")?;

            let encoding = tokenizer.encode(text, true).map_err(|e| e.to_string())?;
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let type_ids = encoding.get_type_ids();
            let len = ids.len();

            let input_ids = Tensor::from_vec(ids.to_vec(), (1, len), device).map_err(|e| e.to_string())?;
            let attention_mask = Tensor::from_vec(
                mask.iter().map(|&m| m as f32).collect::<Vec<_>>(),
                (1, len),
                device,
            )
            .map_err(|e| e.to_string())?;
            let token_type_ids =
                Tensor::from_vec(type_ids.to_vec(), (1, len), device).map_err(|e| e.to_string())?;

            let output = model
                .forward(&input_ids, &token_type_ids, Some(&attention_mask))
                .map_err(|e| e.to_string())?;

            let mask_expanded = attention_mask
                .unsqueeze(2)
                .map_err(|e| e.to_string())?
                .broadcast_as(output.shape())
                .map_err(|e| e.to_string())?;
            let masked = output.mul(&mask_expanded).map_err(|e| e.to_string())?;
            let summed = masked.sum(1).map_err(|e| e.to_string())?;
            let mask_sum = mask_expanded
                .sum(1)
                .map_err(|e| e.to_string())?
                .clamp(1e-9, f64::MAX)
                .map_err(|e| e.to_string())?;
            let mean_pooled = summed.div(&mask_sum).map_err(|e| e.to_string())?;

            let norms = mean_pooled
                .sqr()
                .map_err(|e| e.to_string())?
                .sum(1)
                .map_err(|e| e.to_string())?
                .sqrt()
                .map_err(|e| e.to_string())?
                .unsqueeze(1)
                .map_err(|e| e.to_string())?
                .broadcast_as(mean_pooled.shape())
                .map_err(|e| e.to_string())?
                .clamp(1e-9, f64::MAX)
                .map_err(|e| e.to_string())?;
            let normalized = mean_pooled.div(&norms).map_err(|e| e.to_string())?;

            normalized.flatten_all().map_err(|e| e.to_string())?.to_vec1().map_err(|e| e.to_string())
        }
    }

    impl Default for CandleEmbedder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl QueryEmbedder for CandleEmbedder {
        fn embed(&self, text: &str) -> Vec<f32> {
            self.encode(text).unwrap_or_else(|_| vec![0.0; self.dim])
        }

        fn dim(&self) -> usize {
            self.dim
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ChunkMeta};

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let a = vec![0.6, 0.8];
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn hashing_embedder_overlapping_queries_score_above_threshold() {
        let embedder = HashingEmbedder::new(64);
        let chunk = Chunk {
            embedding: embedder.embed("build_snippet scope resolution"),
            meta: ChunkMeta {
                file_rel: "a.py".into(),
                line_start: 1,
                line_end: 5,
                text_preview: "def build_snippet(): pass".into(),
                terms: vec!["build_snippet".into()],
                ts_ms: 0,
            },
        };
        let cfg_dir = tempfile::tempdir().unwrap();
        let cfg = crate::config::RetrievalConfig::load(cfg_dir.path()).unwrap();
        let chunks = vec![chunk];
        let ctx = StageContext { project_root: cfg_dir.path(), config: &cfg, known_chunks: &chunks, open_buffers: &[] };

        let hits = vector_with_embedder(&ctx, "build_snippet scope resolution", 5, &Deadline::new(250), &embedder);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score <= SCORE_CEILING + 1e-9);
    }
}
