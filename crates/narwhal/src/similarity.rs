//! Embedding similarity feeding the same-community attraction springs.

use crate::graph::SimilarityPair;
use nalgebra::DMatrix;

/// Parses a little-endian `f32` embedding blob. Blobs whose length is not a multiple of 4 are
/// malformed and yield `None`.
pub fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if !blob.len().is_multiple_of(4) {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Pairwise cosine similarity, rounded to four decimals.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    ids: Vec<String>,
    values: DMatrix<f64>,
}

impl SimilarityMatrix {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.ids.iter().position(|id| id == a)?;
        let j = self.ids.iter().position(|id| id == b)?;
        Some(self.values[(i, j)])
    }

    /// Unordered pairs (`a < b`) scoring at least `min_score`.
    pub fn pairs(&self, min_score: f64) -> Vec<SimilarityPair> {
        let mut out = Vec::new();
        for i in 0..self.ids.len() {
            for j in (i + 1)..self.ids.len() {
                let score = self.values[(i, j)];
                if score >= min_score {
                    let (a, b) = if self.ids[i] <= self.ids[j] { (i, j) } else { (j, i) };
                    out.push(SimilarityPair {
                        a: self.ids[a].clone(),
                        b: self.ids[b].clone(),
                        score,
                    });
                }
            }
        }
        out
    }
}

/// Builds the cosine similarity matrix of the given `(entity id, blob)` embeddings.
///
/// Malformed blobs and blobs whose dimension differs from the first valid one are skipped along
/// with their id. Zero vectors are left unnormalized, so they score 0 against everything.
pub fn cosine_matrix<I, S, B>(embeddings: I) -> SimilarityMatrix
where
    I: IntoIterator<Item = (S, B)>,
    S: Into<String>,
    B: AsRef<[u8]>,
{
    let mut ids = Vec::new();
    let mut rows: Vec<Vec<f32>> = Vec::new();
    for (id, blob) in embeddings {
        let id = id.into();
        let Some(vector) = decode_embedding(blob.as_ref()) else {
            tracing::warn!(entity = %id, len = blob.as_ref().len(), "skipping malformed embedding");
            continue;
        };
        if let Some(first) = rows.first() {
            if first.len() != vector.len() {
                tracing::warn!(
                    entity = %id,
                    expected = first.len(),
                    got = vector.len(),
                    "skipping embedding with mismatched dimension"
                );
                continue;
            }
        }
        ids.push(id);
        rows.push(vector);
    }

    let dim = rows.first().map_or(0, Vec::len);
    let mut mat = DMatrix::<f64>::from_fn(rows.len(), dim, |r, c| f64::from(rows[r][c]));
    for mut row in mat.row_iter_mut() {
        let norm = row.norm();
        if norm > 0.0 {
            row /= norm;
        }
    }
    let values = (&mat * mat.transpose()).map(|v| (v * 10_000.0).round() / 10_000.0);

    SimilarityMatrix { ids, values }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(v: &[f32]) -> Vec<u8> {
        v.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    #[test]
    fn decode_rejects_ragged_blobs() {
        assert_eq!(decode_embedding(&blob(&[1.0, -2.5])), Some(vec![1.0, -2.5]));
        assert_eq!(decode_embedding(&[0, 0, 128]), None);
        assert_eq!(decode_embedding(&[]), Some(Vec::new()));
    }

    #[test]
    fn cosine_of_parallel_orthogonal_and_zero_vectors() {
        let m = cosine_matrix([
            ("a", blob(&[1.0, 0.0])),
            ("b", blob(&[3.0, 0.0])),
            ("c", blob(&[0.0, 2.0])),
            ("z", blob(&[0.0, 0.0])),
        ]);
        assert_eq!(m.get("a", "b"), Some(1.0));
        assert_eq!(m.get("a", "c"), Some(0.0));
        assert_eq!(m.get("z", "a"), Some(0.0));
        assert_eq!(m.get("a", "missing"), None);
    }

    #[test]
    fn malformed_and_mismatched_embeddings_are_dropped_with_their_ids() {
        let m = cosine_matrix([
            ("a", blob(&[1.0, 1.0])),
            ("bad", vec![1, 2, 3]),
            ("wide", blob(&[1.0, 1.0, 1.0])),
            ("b", blob(&[1.0, 0.0])),
        ]);
        assert_eq!(m.ids(), ["a".to_string(), "b".to_string()]);
        assert_eq!(m.get("a", "b"), Some(0.7071));
    }

    #[test]
    fn pairs_are_ordered_and_thresholded() {
        let m = cosine_matrix([
            ("y", blob(&[1.0, 0.1])),
            ("x", blob(&[1.0, 0.0])),
            ("w", blob(&[0.0, 1.0])),
        ]);
        let pairs = m.pairs(0.5);
        assert_eq!(pairs.len(), 1);
        assert_eq!((pairs[0].a.as_str(), pairs[0].b.as_str()), ("x", "y"));
        assert!(pairs[0].score > 0.99);
    }
}
