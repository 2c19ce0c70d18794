//! On-device face clustering engine.
//!
//! Consumes face embeddings produced by an external detector/embedder and
//! partitions them into per-person clusters incrementally, persisting the
//! union-find state between runs.

pub mod clustering;
pub mod index;
pub mod pipeline;
pub mod quality;
pub mod shared;
