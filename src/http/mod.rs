//! HTTP client module for the coordinator RPC surface.

mod client;

pub use client::{CoordinatorClient, RpcError};
