//! Offline feature-hashing backend.
//!
//! Lowercased character 3- and 4-grams are hashed with FNV-1a into `dims`
//! signed buckets and the result is L2-normalized. Deterministic, no model,
//! no network. Texts sharing many n-grams land close together, which is
//! enough for smoke runs and tests.

use async_trait::async_trait;

use super::EmbeddingBackend;
use crate::error::EmbeddingError;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001B3;
const NGRAM_MIN: usize = 3;
const NGRAM_MAX: usize = 4;

#[derive(Debug, Clone)]
pub struct HashBackend {
    dims: usize,
}

impl HashBackend {
    pub fn new(dims: usize) -> Result<Self, EmbeddingError> {
        if dims == 0 {
            return Err(EmbeddingError::Fatal(
                "hash backend needs dims > 0".to_string(),
            ));
        }
        Ok(Self { dims })
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for n in NGRAM_MIN..=NGRAM_MAX {
            if n > chars.len() {
                continue;
            }
            for window in chars.windows(n) {
                let gram: String = window.iter().collect();
                let h = fnv1a(gram.as_bytes());
                let bucket = (h as usize) % self.dims;
                let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
                vector[bucket] += sign;
            }
        }

        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingBackend for HashBackend {
    fn name(&self) -> &str {
        "hash"
    }

    async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
