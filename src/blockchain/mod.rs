// src/blockchain/mod.rs
pub mod ca_client;
pub mod gateway_client;
