pub mod config;
pub mod connection;
pub mod error;
pub mod persistence;
pub mod pipeline;
pub mod protocol;
pub mod rendezvous;
pub mod security;
pub mod session;
pub mod transfer;
