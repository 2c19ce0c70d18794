//! Disjoint-set forest keyed by face ID.
//!
//! Union is by size, with ties going to the lexicographically smaller
//! representative, so identical merge sequences always produce identical
//! labels. Maps are ordered so that iteration and serialisation are stable.

use std::collections::{BTreeMap, HashMap};

use crate::clustering::domain::clustering_results::Cluster;
use crate::shared::face::FaceId;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterStore {
    parent: BTreeMap<FaceId, FaceId>,
    /// Only representatives have an entry.
    size: BTreeMap<FaceId, usize>,
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from persisted parts. Sizes are recomputed from the
    /// parent pointers, so a stale size map cannot skew union-by-size.
    pub fn from_parent_map(mut parent: BTreeMap<FaceId, FaceId>) -> Self {
        let dangling: Vec<FaceId> = parent
            .values()
            .filter(|p| !parent.contains_key(*p))
            .cloned()
            .collect();
        for id in dangling {
            parent.insert(id.clone(), id);
        }

        // A hand-edited file can contain parent cycles; cut each one at the
        // face where the walk gave up.
        let limit = parent.len();
        let ids: Vec<FaceId> = parent.keys().cloned().collect();
        for id in ids {
            let mut current = id.clone();
            let mut steps = 0;
            while parent[&current] != current && steps <= limit {
                current = parent[&current].clone();
                steps += 1;
            }
            if steps > limit {
                parent.insert(current.clone(), current);
            }
        }

        let mut store = Self {
            parent,
            size: BTreeMap::new(),
        };
        let ids: Vec<FaceId> = store.parent.keys().cloned().collect();
        for id in ids {
            let root = store.find(&id);
            *store.size.entry(root).or_insert(0) += 1;
        }
        store
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.parent.contains_key(id)
    }

    /// Representative of `id`, inserting it as a singleton if unseen.
    /// Compresses the path by halving.
    pub fn find(&mut self, id: &str) -> FaceId {
        if !self.parent.contains_key(id) {
            self.parent.insert(id.to_string(), id.to_string());
            self.size.insert(id.to_string(), 1);
            return id.to_string();
        }

        let mut current = id.to_string();
        loop {
            let parent = self.parent[&current].clone();
            if parent == current {
                return current;
            }
            let grandparent = self.parent[&parent].clone();
            self.parent.insert(current, grandparent.clone());
            current = grandparent;
        }
    }

    /// Representative of `id` without mutating the forest. Safe to call from
    /// concurrent readers.
    pub fn root(&self, id: &str) -> Option<&str> {
        let mut current = self.parent.get_key_value(id)?.0.as_str();
        loop {
            let parent = self.parent[current].as_str();
            if parent == current {
                return Some(current);
            }
            current = parent;
        }
    }

    /// Merges the sets containing `a` and `b`, returning the surviving
    /// representative.
    pub fn union(&mut self, a: &str, b: &str) -> FaceId {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }

        let size_a = self.cluster_size(&ra);
        let size_b = self.cluster_size(&rb);
        let (winner, loser) = if size_a > size_b || (size_a == size_b && ra < rb) {
            (ra, rb)
        } else {
            (rb, ra)
        };

        self.parent.insert(loser.clone(), winner.clone());
        self.size.remove(&loser);
        self.size.insert(winner.clone(), size_a + size_b);
        winner
    }

    /// Number of faces in the set represented by `representative`. Zero for
    /// anything that is not currently a representative.
    pub fn cluster_size(&self, representative: &str) -> usize {
        self.size.get(representative).copied().unwrap_or(0)
    }

    /// Points every face directly at its representative.
    pub fn flatten(&mut self) {
        let ids: Vec<FaceId> = self.parent.keys().cloned().collect();
        for id in ids {
            let root = self.find(&id);
            self.parent.insert(id, root);
        }
    }

    pub fn parent_map(&self) -> &BTreeMap<FaceId, FaceId> {
        &self.parent
    }

    pub fn size_map(&self) -> &BTreeMap<FaceId, usize> {
        &self.size
    }

    /// Groups every known face by representative, dropping groups smaller
    /// than `min_cluster_size`.
    pub fn representative_faces(&self, min_cluster_size: usize) -> Vec<Cluster> {
        self.representative_faces_among(self.parent.keys().map(|k| k.as_str()), min_cluster_size)
    }

    /// Like [`Self::representative_faces`] but only over `ids`, keeping their
    /// order inside each cluster. Unknown IDs are ignored.
    ///
    /// Clusters are ordered by descending size, then by representative.
    pub fn representative_faces_among<'a, I>(&self, ids: I, min_cluster_size: usize) -> Vec<Cluster>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut groups: HashMap<&str, Vec<FaceId>> = HashMap::new();
        for id in ids {
            if let Some(root) = self.root(id) {
                groups.entry(root).or_default().push(id.to_string());
            }
        }

        let mut clusters: Vec<Cluster> = groups
            .into_iter()
            .filter(|(_, faces)| faces.len() >= min_cluster_size)
            .map(|(root, faces)| Cluster::new(root.to_string(), faces))
            .collect();
        clusters.sort_by(|a, b| {
            b.faces
                .len()
                .cmp(&a.faces.len())
                .then_with(|| a.representative.cmp(&b.representative))
        });
        clusters
    }
}
