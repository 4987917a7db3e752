// src/services/mod.rs
pub mod api_server;
pub mod authenticator;
pub mod identity_bridge;
pub mod transaction_submitter;
