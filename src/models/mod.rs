// src/models/mod.rs
pub mod credential;
pub mod registration;
pub mod subject;
