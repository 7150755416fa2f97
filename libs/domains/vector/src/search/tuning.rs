use crate::config::SearchConfig;

/// `hnsw_ef` for a query returning `limit` results.
pub fn ef_for_limit(limit: u32, config: &SearchConfig) -> u64 {
    (u64::from(limit) * config.ef_factor)
        .max(config.min_ef)
        .min(config.max_ef)
}

/// `(offset, limit)` of each sub-query needed to cover `limit` results with
/// sub-queries of at most `threshold` results.
pub fn split_limit(limit: u32, threshold: u32) -> Vec<(u64, u64)> {
    let threshold = u64::from(threshold.max(1));
    let limit = u64::from(limit);
    (0..limit.div_ceil(threshold))
        .map(|i| {
            let offset = i * threshold;
            (offset, threshold.min(limit - offset))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ef_is_scaled_and_clamped() {
        let config = SearchConfig::default();
        assert_eq!(ef_for_limit(5, &config), 64);
        assert_eq!(ef_for_limit(100, &config), 200);
        assert_eq!(ef_for_limit(5000, &config), 512);
    }

    #[test]
    fn test_split_limit() {
        assert_eq!(split_limit(50, 100), vec![(0, 50)]);
        assert_eq!(split_limit(250, 100), vec![(0, 100), (100, 100), (200, 50)]);

        let parts = split_limit(5000, 100);
        assert_eq!(parts.len(), 50);
        assert_eq!(parts.iter().map(|(_, n)| n).sum::<u64>(), 5000);
        assert_eq!(parts.last(), Some(&(4900, 100)));
    }
}
