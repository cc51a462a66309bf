//! Embedding generation and vector math.
//!
//! The default [`HashingEmbedder`] maps text to a fixed-dimension vector by
//! hashing word unigrams and in-word character trigrams into buckets, then
//! unit-normalising.  It is pure and deterministic: the same text always
//! produces the same vector, near-duplicate texts share most buckets, and
//! unrelated texts share few.  A model-backed embedder can replace it behind
//! the [`Embedder`] trait without callers noticing.
//!
//! # Example
//!
//! ```rust
//! use mnemos_memory::embedding::{cosine_similarity, Embedder, HashingEmbedder};
//!
//! let embedder = HashingEmbedder::new(128);
//! let a = embedder.embed("the build pipeline failed");
//! let b = embedder.embed("the build pipeline failed");
//! assert_eq!(a, b);
//! assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
//! ```

use md5::{Digest, Md5};

/// Weight of a whole-word bucket relative to a trigram bucket.
const WORD_WEIGHT: f32 = 2.0;

/// Text-to-vector contract used by the engine.
///
/// Implementations must be deterministic and return vectors of exactly
/// [`dimension`][Embedder::dimension] elements, unit-normalised unless the
/// input carries no signal, in which case the all-zero vector is returned.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Feature-hashing embedder; no I/O, no model files.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn bucket(&self, feature: &str) -> usize {
        let digest = Md5::digest(feature.as_bytes());
        let hash = u128::from_be_bytes(digest.into());
        (hash % self.dim as u128) as usize
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        let lowered = text.to_lowercase();

        for word in tokenize(&lowered) {
            vector[self.bucket(word)] += WORD_WEIGHT;

            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                // Prefix keeps "cat" the trigram apart from "cat" the word.
                vector[self.bucket(&format!("#{trigram}"))] += 1.0;
            }
        }

        normalize(&mut vector);
        vector
    }
}

/// Split lowercase text into alphanumeric words.
fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

/// Scale `v` to unit length in place.  A zero vector is left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = magnitude(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Euclidean length of `v`.
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Compute the cosine similarity between two equal-length vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` if either vector has zero norm
/// or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = magnitude(a);
    let norm_b = magnitude(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

/// Unweighted element-wise mean of `vectors`, not renormalised.
///
/// Returns `None` for an empty input.  Vectors whose length differs from the
/// first one are skipped.
pub fn mean_vector<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut iter = vectors.into_iter();
    let first = iter.next()?;
    let mut sum = first.to_vec();
    let mut count = 1usize;
    for v in iter {
        if v.len() != sum.len() {
            continue;
        }
        for (s, x) in sum.iter_mut().zip(v) {
            *s += x;
        }
        count += 1;
    }
    for s in sum.iter_mut() {
        *s /= count as f32;
    }
    Some(sum)
}
