//! Qdrant implementation of the backend traits.

mod client;
mod config;
mod convert;

pub use client::{QdrantConnection, QdrantConnectionFactory};
pub use config::QdrantConfig;
