//! Shared test utilities
//!
//! - `TestDataBuilder`: deterministic ids, collection names and embeddings
//!   (always available)
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `assertions`: assertion helpers (always available)
//!
//! # Redis Testing
//!
//! Add `features = ["redis"]` to your dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! Then in your tests:
//!
//! ```rust,ignore
//! use test_utils::TestRedis;
//! use redis::AsyncCommands;
//!
//! #[tokio::test]
//! #[ignore = "requires Docker"]
//! async fn my_redis_test() {
//!     let redis = TestRedis::new().await;
//!     let mut conn = redis.connection_manager();
//!
//!     conn.set::<_, _, ()>("key", "value").await.unwrap();
//!     let value: String = conn.get("key").await.unwrap();
//!     assert_eq!(value, "value");
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Builder for test data with deterministic randomization
///
/// The same seed always yields the same ids, names and embeddings.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_insert_vectors");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// splitmix64 step over the seed and a stream position
    fn mix(&self, position: u64) -> u64 {
        let mut z = self
            .seed
            .wrapping_add(position.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Collection name valid for the vector engine, e.g. `test-1234-docs`
    pub fn collection(&self, suffix: &str) -> String {
        format!("test-{}-{}", self.seed % 1_000_000, suffix)
    }

    /// Deterministic point id for `index`
    pub fn point_id(&self, index: u64) -> Uuid {
        let hi = self.mix(index.wrapping_mul(2));
        let lo = self.mix(index.wrapping_mul(2).wrapping_add(1));
        Uuid::from_u64_pair(hi, lo)
    }

    /// Deterministic unit-length embedding of `dim` components
    pub fn embedding(&self, dim: usize, index: u64) -> Vec<f32> {
        let base = index.wrapping_mul(dim as u64).wrapping_add(1 << 32);
        let raw: Vec<f32> = (0..dim as u64)
            .map(|i| {
                let bits = self.mix(base.wrapping_add(i)) >> 40;
                (bits as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
            })
            .collect();

        let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return raw;
        }
        raw.into_iter().map(|v| v / norm).collect()
    }

    /// `count` embeddings for indexes `0..count`
    pub fn embeddings(&self, count: usize, dim: usize) -> Vec<Vec<f32>> {
        (0..count as u64).map(|i| self.embedding(dim, i)).collect()
    }
}

/// Test assertion helpers
pub mod assertions {
    /// Assert two floats are within `epsilon`
    pub fn assert_close(actual: f32, expected: f32, epsilon: f32, context: &str) {
        assert!(
            (actual - expected).abs() <= epsilon,
            "{}: expected {} ± {}, got {}",
            context,
            expected,
            epsilon,
            actual
        );
    }

    /// Assert scores are sorted descending
    pub fn assert_descending(scores: &[f32], context: &str) {
        if let Some(pos) = scores.windows(2).position(|w| w[0] < w[1]) {
            panic!(
                "{}: scores not descending at {}: {} < {}",
                context,
                pos,
                scores[pos],
                scores[pos + 1]
            );
        }
    }

    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }
}
