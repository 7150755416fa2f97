//! Vector Engine - Entry Point
//!
//! Minimal entry point that delegates to the library.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    vector_engine::run().await
}
