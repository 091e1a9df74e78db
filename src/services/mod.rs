// src/services/mod.rs

pub mod aggregator;
pub mod reports;
pub mod scoring;
pub mod test_flow;
