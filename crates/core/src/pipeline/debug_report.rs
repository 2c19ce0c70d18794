//! Read-only projection of a clustering run for a diagnostic view.

use std::collections::HashMap;

use serde::Serialize;

use crate::clustering::domain::clustering_results::{Cluster, ClusteringResults};
use crate::shared::constants::{DEBUG_REPORT_EDGE_CLUSTERS, DEBUG_REPORT_FACES_PER_CLUSTER};
use crate::shared::face::{Face, FaceDirection, FaceId, FileId};
use crate::shared::vector_math::cosine_similarity;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugFace {
    #[serde(rename = "faceID")]
    pub face_id: FaceId,
    #[serde(rename = "fileID")]
    pub file_id: FileId,
    pub blur: f64,
    pub score: f64,
    pub direction: FaceDirection,
    pub is_bad_face: bool,
    /// Cosine similarity to the cluster's highest-scoring face.
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugCluster {
    pub representative: FaceId,
    pub size: usize,
    pub faces: Vec<DebugFace>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnclusteredFace {
    #[serde(rename = "faceID")]
    pub face_id: FaceId,
    #[serde(rename = "fileID")]
    pub file_id: FileId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDebugReport {
    pub total_face_count: usize,
    pub filtered_face_count: usize,
    pub malformed_face_count: usize,
    pub clustered_face_count: usize,
    pub unclustered_face_count: usize,
    pub time_taken_ms: u64,
    pub largest_clusters: Vec<DebugCluster>,
    pub smallest_clusters: Vec<DebugCluster>,
    pub unclustered_faces_with_file: Vec<UnclusteredFace>,
}

impl ClusterDebugReport {
    /// Builds the report from `results` and the faces the run was given.
    ///
    /// Clusters in `results` are expected largest first. The largest and
    /// smallest groups never overlap; with few clusters the smallest list is
    /// shorter or empty.
    pub fn build(results: &ClusteringResults, faces: &[Face]) -> Self {
        let by_id: HashMap<&str, &Face> = faces.iter().map(|f| (f.face_id.as_str(), f)).collect();

        let top = results.clusters.len().min(DEBUG_REPORT_EDGE_CLUSTERS);
        let rest = &results.clusters[top..];
        let bottom = &rest[rest.len().saturating_sub(DEBUG_REPORT_EDGE_CLUSTERS)..];

        let stats = &results.stats;
        Self {
            total_face_count: stats.total_face_count,
            filtered_face_count: stats.filtered_face_count,
            malformed_face_count: stats.malformed_face_count,
            clustered_face_count: stats.clustered_face_count,
            unclustered_face_count: stats.unclustered_face_count,
            time_taken_ms: stats.time_taken_ms,
            largest_clusters: results.clusters[..top]
                .iter()
                .map(|c| debug_cluster(c, &by_id))
                .collect(),
            smallest_clusters: bottom.iter().map(|c| debug_cluster(c, &by_id)).collect(),
            unclustered_faces_with_file: results
                .noise
                .iter()
                .filter_map(|id| by_id.get(id.as_str()))
                .map(|f| UnclusteredFace {
                    face_id: f.face_id.clone(),
                    file_id: f.file_id,
                })
                .collect(),
        }
    }
}

fn debug_cluster(cluster: &Cluster, by_id: &HashMap<&str, &Face>) -> DebugCluster {
    let members: Vec<&Face> = cluster
        .faces
        .iter()
        .filter_map(|id| by_id.get(id.as_str()).copied())
        .collect();

    // First face wins ties so the anchor is stable.
    let anchor = members
        .iter()
        .copied()
        .reduce(|best, f| if f.score > best.score { f } else { best });

    let mut faces: Vec<DebugFace> = members
        .iter()
        .map(|f| DebugFace {
            face_id: f.face_id.clone(),
            file_id: f.file_id,
            blur: f.blur,
            score: f.score,
            direction: f.direction,
            is_bad_face: f.is_bad_face,
            similarity: anchor.map_or(0.0, |a| cosine_similarity(&a.embedding, &f.embedding)),
        })
        .collect();
    faces.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    faces.truncate(DEBUG_REPORT_FACES_PER_CLUSTER);

    DebugCluster {
        representative: cluster.representative.clone(),
        size: cluster.len(),
        faces,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::domain::clustering_results::ClusteringStats;
    use approx::assert_relative_eq;

    fn face(id: &str, file_id: FileId, embedding: Vec<f32>, score: f64) -> Face {
        Face {
            face_id: id.into(),
            file_id,
            embedding,
            blur: 100.0,
            score,
            box_size: 0.2,
            direction: FaceDirection::Straight,
            is_bad_face: false,
        }
    }

    fn cluster(rep: &str, ids: &[&str]) -> Cluster {
        Cluster::new(rep.into(), ids.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_faces_sorted_by_similarity_to_best_scoring_face() {
        let faces = vec![
            face("a", 1, vec![0.0, 1.0], 0.85),
            face("b", 2, vec![1.0, 0.0], 0.99),
            face("c", 3, vec![0.8, 0.6], 0.9),
        ];
        let results = ClusteringResults {
            clusters: vec![cluster("a", &["a", "b", "c"])],
            noise: vec![],
            stats: ClusteringStats::default(),
        };

        let report = ClusterDebugReport::build(&results, &faces);
        let ids: Vec<_> = report.largest_clusters[0]
            .faces
            .iter()
            .map(|f| f.face_id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_relative_eq!(report.largest_clusters[0].faces[1].similarity, 0.8, epsilon = 1e-6);
        assert!(report.smallest_clusters.is_empty());
    }

    #[test]
    fn test_edge_clusters_do_not_overlap() {
        let mut faces = Vec::new();
        let mut clusters = Vec::new();
        for i in 0..70 {
            let ids = [format!("{i}_0"), format!("{i}_1")];
            faces.push(face(&ids[0], i, vec![1.0, 0.0], 0.9));
            faces.push(face(&ids[1], i, vec![1.0, 0.0], 0.9));
            clusters.push(Cluster::new(ids[0].clone(), ids.to_vec()));
        }
        let results = ClusteringResults {
            clusters,
            noise: vec![],
            stats: ClusteringStats::default(),
        };

        let report = ClusterDebugReport::build(&results, &faces);
        assert_eq!(report.largest_clusters.len(), 30);
        assert_eq!(report.smallest_clusters.len(), 30);
        assert_eq!(report.largest_clusters[0].representative, "0_0");
        assert_eq!(report.smallest_clusters[0].representative, "40_0");
    }

    #[test]
    fn test_faces_per_cluster_capped() {
        let faces: Vec<Face> = (0..60)
            .map(|i| face(&format!("f{i}"), i, vec![1.0, i as f32 * 0.01], 0.9))
            .collect();
        let ids: Vec<String> = faces.iter().map(|f| f.face_id.clone()).collect();
        let results = ClusteringResults {
            clusters: vec![Cluster::new("f0".into(), ids)],
            noise: vec![],
            stats: ClusteringStats::default(),
        };

        let report = ClusterDebugReport::build(&results, &faces);
        assert_eq!(report.largest_clusters[0].size, 60);
        assert_eq!(report.largest_clusters[0].faces.len(), 50);
    }

    #[test]
    fn test_unclustered_faces_carry_file_ids() {
        let faces = vec![face("x", 42, vec![1.0, 0.0], 0.9)];
        let results = ClusteringResults {
            clusters: vec![],
            noise: vec!["x".into()],
            stats: ClusteringStats {
                total_face_count: 1,
                unclustered_face_count: 1,
                ..ClusteringStats::default()
            },
        };

        let report = ClusterDebugReport::build(&results, &faces);
        assert_eq!(
            report.unclustered_faces_with_file,
            vec![UnclusteredFace {
                face_id: "x".into(),
                file_id: 42
            }]
        );
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"unclusteredFacesWithFile\":[{\"faceID\":\"x\",\"fileID\":42}]"));
        assert!(json.contains("\"totalFaceCount\":1"));
    }
}
