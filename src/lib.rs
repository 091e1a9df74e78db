// src/lib.rs

pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod queue;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;
pub mod worker;

pub use routes::create_router;
