pub mod graph;
pub mod identifier;
pub mod navigator;
