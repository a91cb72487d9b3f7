//! Graph algorithms over node-level adjacency.
pub mod topology;
