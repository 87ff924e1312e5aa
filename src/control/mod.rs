//! Control Plane Module
//!
//! HTTP clients for the compute provider's control plane: sandbox
//! operations, credit balance, wallet balances, and the inference
//! endpoint. The core consumes these only through the traits in
//! `types`, so everything here is swappable.

pub mod client;
pub mod inference;

pub use client::ControlHttpClient;
pub use inference::InferenceHttpClient;
