//! Social Module
//!
//! Relay-backed messaging. The heartbeat's inbox poll is the only core
//! consumer; it talks to the relay through the `MessagingClient` trait.

pub mod client;

pub use client::RelayClient;
