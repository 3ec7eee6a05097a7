#[cfg(test)]
mod tests {
    use super::super::CacheConfig;

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ring_capacity, 100);
        assert_eq!(config.ring_capacity_ceiling, 100 * 1024);
        assert_eq!(config.incoming_buffer, 100);
        assert_eq!(config.list_page_size, 10_000);
    }

    #[test]
    fn test_empty_table_deserializes_to_defaults() {
        let config: CacheConfig = toml::from_str("").expect("empty config should parse");
        assert_eq!(config.ring_capacity, CacheConfig::default().ring_capacity);
        assert_eq!(
            config.bookmark_frequency_ms,
            CacheConfig::default().bookmark_frequency_ms
        );
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let config: CacheConfig =
            toml::from_str("ring_capacity = 8\nincoming_buffer = 4").expect("should parse");
        assert_eq!(config.ring_capacity, 8);
        assert_eq!(config.incoming_buffer, 4);
        assert_eq!(config.list_page_size, CacheConfig::default().list_page_size);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_ring_capacity_rejected() {
        let config = CacheConfig {
            ring_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ceiling_below_capacity_rejected() {
        let config = CacheConfig {
            ring_capacity: 200,
            ring_capacity_ceiling: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_budget_refresh_above_cap_rejected() {
        let config = CacheConfig {
            dispatch_budget_cap_ms: 10,
            dispatch_budget_refresh_ms: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_ordering_rejected() {
        let config = CacheConfig {
            relist_backoff_initial_ms: 5_000,
            relist_backoff_max_ms: 1_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
