/// Brute-force nearest-neighbour scan over a batch window.
///
/// Each query is compared against every earlier face in its window, most
/// recent first, so temporally close faces (usually the same event) are
/// found before the early-exit check kicks in. With more than one worker the
/// queries are split into contiguous chunks and scanned on scoped threads.
use crate::clustering::domain::batch_window::BatchWindow;
use crate::clustering::domain::similarity_search::{BestMatch, SimilaritySearch};
use crate::shared::constants::MIN_PARALLEL_QUERIES;
use crate::shared::vector_math::EmbeddingMatrix;

pub struct LinearWindowSearch {
    workers: usize,
}

impl LinearWindowSearch {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn sequential() -> Self {
        Self::new(1)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Default for LinearWindowSearch {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(workers)
    }
}

impl SimilaritySearch for LinearWindowSearch {
    fn best_matches(
        &self,
        matrix: &EmbeddingMatrix,
        window: &BatchWindow,
        queries: &[usize],
        early_exit_threshold: f64,
    ) -> Vec<Option<BestMatch>> {
        if self.workers == 1 || queries.len() < MIN_PARALLEL_QUERIES {
            return queries
                .iter()
                .map(|&q| scan(matrix, window, q, early_exit_threshold))
                .collect();
        }

        let mut results: Vec<Option<BestMatch>> = vec![None; queries.len()];
        let chunk = queries.len().div_ceil(self.workers);

        std::thread::scope(|s| {
            for (query_chunk, out_chunk) in queries.chunks(chunk).zip(results.chunks_mut(chunk)) {
                s.spawn(move || {
                    for (q, out) in query_chunk.iter().zip(out_chunk.iter_mut()) {
                        *out = scan(matrix, window, *q, early_exit_threshold);
                    }
                });
            }
        });

        results
    }
}

fn scan(
    matrix: &EmbeddingMatrix,
    window: &BatchWindow,
    query: usize,
    early_exit_threshold: f64,
) -> Option<BestMatch> {
    if matrix.is_degenerate(query) {
        return None;
    }

    let mut best: Option<BestMatch> = None;
    for candidate in window.references_for(query).rev() {
        if matrix.is_degenerate(candidate) {
            continue;
        }
        let similarity = matrix.similarity(query, candidate);
        if best.map_or(true, |b| similarity > b.similarity) {
            best = Some(BestMatch {
                index: candidate,
                similarity,
            });
            if similarity >= early_exit_threshold {
                break;
            }
        }
    }
    best
}
