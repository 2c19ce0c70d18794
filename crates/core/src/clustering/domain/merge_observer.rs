use serde::Serialize;

use crate::shared::face::FaceId;

/// Outcome of matching one new face during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeDecision {
    #[serde(rename = "faceID")]
    pub face_id: FaceId,
    /// Best candidate found, whether or not it cleared the join threshold.
    /// `None` when there was nothing to compare against.
    #[serde(rename = "matchedID")]
    pub matched_id: Option<FaceId>,
    pub similarity: Option<f64>,
    pub was_merged: bool,
    /// Zero-based index of the batch the decision was made in.
    pub batch: usize,
}

/// Receives every join/no-join decision made by the engine.
///
/// Observers only watch: nothing they do can influence clustering.
pub trait MergeObserver: Send {
    fn record(&mut self, decision: MergeDecision);
}

/// Observer that discards everything.
pub struct NullMergeObserver;

impl MergeObserver for NullMergeObserver {
    fn record(&mut self, _decision: MergeDecision) {}
}

/// Append-only, in-memory record of decisions for diagnostic replay.
#[derive(Debug, Default, Clone)]
pub struct MergeLog {
    decisions: Vec<MergeDecision>,
}

impl MergeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions(&self) -> &[MergeDecision] {
        &self.decisions
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn merges(&self) -> impl Iterator<Item = &MergeDecision> {
        self.decisions.iter().filter(|d| d.was_merged)
    }

    /// Why `face_id` did or did not join a cluster.
    pub fn explain(&self, face_id: &str) -> Option<&MergeDecision> {
        self.decisions.iter().find(|d| d.face_id == face_id)
    }
}

impl MergeObserver for MergeLog {
    fn record(&mut self, decision: MergeDecision) {
        self.decisions.push(decision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(
        face: &str,
        matched: Option<&str>,
        sim: Option<f64>,
        merged: bool,
    ) -> MergeDecision {
        MergeDecision {
            face_id: face.into(),
            matched_id: matched.map(String::from),
            similarity: sim,
            was_merged: merged,
            batch: 0,
        }
    }

    #[test]
    fn test_log_appends_in_order() {
        let mut log = MergeLog::new();
        log.record(decision("a", None, None, false));
        log.record(decision("b", Some("a"), Some(0.91), true));
        log.record(decision("c", Some("b"), Some(0.3), false));

        assert_eq!(log.len(), 3);
        assert_eq!(log.decisions()[1].face_id, "b");
        assert_eq!(log.merges().count(), 1);
    }

    #[test]
    fn test_explain_finds_decision() {
        let mut log = MergeLog::new();
        log.record(decision("c", Some("b"), Some(0.3), false));
        let d = log.explain("c").unwrap();
        assert_eq!(d.matched_id.as_deref(), Some("b"));
        assert!(!d.was_merged);
        assert!(log.explain("zzz").is_none());
    }

    #[test]
    fn test_null_observer_is_noop() {
        let mut observer = NullMergeObserver;
        observer.record(decision("a", None, None, false));
    }

    #[test]
    fn test_decision_json_field_names() {
        let json = serde_json::to_string(&decision("b", Some("a"), Some(0.5), true)).unwrap();
        assert!(json.contains("\"faceID\":\"b\""));
        assert!(json.contains("\"matchedID\":\"a\""));
        assert!(json.contains("\"wasMerged\":true"));
    }
}
