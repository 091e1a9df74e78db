// src/clients/mod.rs

pub mod llm;
