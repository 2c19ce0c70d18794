pub mod cluster_worker;
