// src/utils/mod.rs
pub mod claims;
pub mod crypto;
pub mod serialization;
