use crate::clustering::domain::batch_window::BatchWindow;
use crate::shared::vector_math::EmbeddingMatrix;

/// Most similar reference found for a query face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch {
    /// Row of the matched face in the embedding matrix.
    pub index: usize,
    pub similarity: f64,
}

impl BestMatch {
    /// The match, if it is similar enough to join.
    pub fn accepted(self, join_threshold: f64) -> Option<Self> {
        (self.similarity >= join_threshold).then_some(self)
    }
}

/// Finds the nearest earlier face for each query in a window.
///
/// Implementations must be pure: the result for a query depends only on the
/// matrix, the window and the query itself, never on evaluation order. That
/// is what lets the engine fan queries out across threads and still apply
/// merges deterministically.
pub trait SimilaritySearch: Send + Sync {
    /// Returns one entry per query, in query order. An entry is `None` when
    /// the query has no comparable reference (first face, or a degenerate
    /// embedding).
    ///
    /// Scanning for a query may stop as soon as a candidate reaches
    /// `early_exit_threshold`.
    fn best_matches(
        &self,
        matrix: &EmbeddingMatrix,
        window: &BatchWindow,
        queries: &[usize],
        early_exit_threshold: f64,
    ) -> Vec<Option<BestMatch>>;
}
