pub mod batch_window;
pub mod clustering_opts;
pub mod clustering_results;
pub mod clustering_state;
pub mod merge_observer;
pub mod similarity_search;
pub mod state_store;
pub mod union_find;
