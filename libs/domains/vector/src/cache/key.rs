use std::fmt;

use sha2::{Digest, Sha256};

use crate::models::{Aggregation, SearchFilter};

/// Fully qualified cache key: `{namespace}{kind}:{fingerprint}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Start fingerprinting a request under a target namespace.
    pub fn builder(namespace: String, kind: &'static str, decimals: u32) -> CacheKeyBuilder {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        CacheKeyBuilder {
            namespace,
            kind,
            scale: 10f64.powi(decimals as i32),
            hasher,
        }
    }

    /// Key without a fingerprint, for values that exist once per target.
    pub fn fixed(namespace: &str, kind: &'static str) -> Self {
        Self(format!("{}{}", namespace, kind))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic hash over every input that changes a result.
///
/// Each field is written with a tag so different field sequences cannot
/// collide. Vector components are truncated to the configured number of
/// decimal places first.
pub struct CacheKeyBuilder {
    namespace: String,
    kind: &'static str,
    scale: f64,
    hasher: Sha256,
}

impl CacheKeyBuilder {
    fn tag(&mut self, tag: &[u8]) {
        self.hasher.update([0xff]);
        self.hasher.update(tag);
    }

    fn quantize(&self, v: f32) -> i64 {
        (f64::from(v) * self.scale).trunc() as i64
    }

    pub fn vector(mut self, vector: &[f32]) -> Self {
        self.tag(b"vector");
        self.hasher.update((vector.len() as u64).to_le_bytes());
        for v in vector {
            let q = self.quantize(*v);
            self.hasher.update(q.to_le_bytes());
        }
        self
    }

    pub fn vectors(mut self, vectors: &[Vec<f32>]) -> Self {
        self.tag(b"vectors");
        self.hasher.update((vectors.len() as u64).to_le_bytes());
        vectors.iter().fold(self, |builder, v| builder.vector(v))
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.tag(b"limit");
        self.hasher.update(limit.to_le_bytes());
        self
    }

    pub fn filter(mut self, filter: Option<&SearchFilter>) -> Self {
        self.tag(b"filter");
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            // BTreeMap fields serialize in key order
            let encoded = serde_json::to_vec(filter).unwrap_or_default();
            self.hasher.update(encoded);
        }
        self
    }

    pub fn threshold(mut self, threshold: Option<f32>) -> Self {
        self.tag(b"threshold");
        if let Some(t) = threshold {
            self.hasher.update(t.to_bits().to_le_bytes());
        }
        self
    }

    pub fn aggregation(mut self, aggregation: Aggregation, weights: Option<&[f32]>) -> Self {
        self.tag(b"aggregation");
        self.hasher.update(format!("{:?}", aggregation).as_bytes());
        if let Some(weights) = weights {
            for w in weights {
                self.hasher.update(w.to_bits().to_le_bytes());
            }
        }
        self
    }

    pub fn text(mut self, field: &str, text: &str) -> Self {
        self.tag(b"text");
        self.hasher.update(field.as_bytes());
        self.hasher.update([0]);
        self.hasher.update(text.as_bytes());
        self
    }

    pub fn weights(mut self, a: f32, b: f32) -> Self {
        self.tag(b"weights");
        self.hasher.update(a.to_bits().to_le_bytes());
        self.hasher.update(b.to_bits().to_le_bytes());
        self
    }

    pub fn flag(mut self, name: &'static str, value: bool) -> Self {
        self.tag(name.as_bytes());
        self.hasher.update([u8::from(value)]);
        self
    }

    pub fn build(self) -> CacheKey {
        let digest = self.hasher.finalize();
        let hex: String = digest[..16].iter().map(|b| format!("{:02x}", b)).collect();
        CacheKey(format!("{}{}:{}", self.namespace, self.kind, hex))
    }
}
