// src/models/mod.rs

pub mod history;
pub mod job;
pub mod report;
pub mod teacher_test;
pub mod test_record;
pub mod user;
