#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::jitter;

    #[test]
    fn test_jitter_stays_within_bounds() {
        let base = Duration::from_secs(1);
        for _ in 0..100 {
            let jittered = jitter(base, 0.25);
            assert!(jittered >= Duration::from_millis(750), "{jittered:?}");
            assert!(jittered <= Duration::from_millis(1250), "{jittered:?}");
        }
    }

    #[test]
    fn test_zero_factor_is_identity() {
        let base = Duration::from_secs(7);
        assert_eq!(jitter(base, 0.0), base);
    }
}
