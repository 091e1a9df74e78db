// src/handlers/mod.rs

pub mod auth;
pub mod reports;
pub mod test_flow;
