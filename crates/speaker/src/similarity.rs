//! Cosine similarity helpers
//!
//! All scores are mapped onto [0, 1] so the matching thresholds apply the
//! same way whether a score came from the vector index or was computed
//! in-process.

/// Cosine similarity between two vectors, mapped onto [0, 1].
/// Zero-length or mismatched inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cos = dot / (norm_a * norm_b);
    ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Score one query against many targets
pub fn batch_cosine_similarity(query: &[f32], targets: &[Vec<f32>]) -> Vec<f32> {
    targets
        .iter()
        .map(|t| cosine_similarity(query, t))
        .collect()
}

/// Arithmetic mean of normalized vectors. Returns `None` for empty input
/// or mismatched dimensions.
pub fn mean_embedding(embeddings: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = embeddings.first()?;
    let dim = first.len();
    if dim == 0 || embeddings.iter().any(|e| e.len() != dim) {
        return None;
    }

    let mut sum = vec![0.0f32; dim];
    for embedding in embeddings {
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            continue;
        }
        for (acc, &x) in sum.iter_mut().zip(embedding) {
            *acc += x / norm;
        }
    }
    let n = embeddings.len() as f32;
    for x in &mut sum {
        *x /= n;
    }
    Some(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_score_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_score_half() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn mean_normalizes_before_averaging() {
        // same direction, different magnitudes: mean must be the direction
        let embeddings = vec![vec![2.0, 0.0], vec![10.0, 0.0]];
        let mean = mean_embedding(&embeddings).unwrap();
        assert!((mean[0] - 1.0).abs() < 1e-6);
        assert!(mean[1].abs() < 1e-6);
    }

    #[test]
    fn mean_rejects_mixed_dimensions() {
        assert!(mean_embedding(&[vec![1.0], vec![1.0, 2.0]]).is_none());
        assert!(mean_embedding(&[]).is_none());
    }

    #[test]
    fn batch_matches_single() {
        let q = vec![1.0, 2.0, 3.0];
        let targets = vec![vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0]];
        let scores = batch_cosine_similarity(&q, &targets);
        assert_eq!(scores.len(), 2);
        assert!((scores[0] - cosine_similarity(&q, &targets[0])).abs() < 1e-6);
    }
}
