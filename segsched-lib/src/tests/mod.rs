//! Shared test fixtures and whole-pipeline scenarios

pub mod fixtures;
