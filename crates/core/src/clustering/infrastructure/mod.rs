pub mod json_state_store;
pub mod linear_window_search;
pub mod memory_state_store;
