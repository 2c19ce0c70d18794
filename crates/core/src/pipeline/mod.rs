pub mod cluster_engine;
pub mod clustering_logger;
pub mod debug_report;
pub mod infrastructure;
pub mod status;
