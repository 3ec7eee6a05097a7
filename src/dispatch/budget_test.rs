#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::budget::TimeBudget;

    #[test]
    fn test_starts_at_cap() {
        let budget = TimeBudget::new(Duration::from_millis(100), Duration::from_millis(10));
        assert_eq!(budget.available(), Duration::from_millis(100));
    }

    #[test]
    fn test_take_drains_everything() {
        let budget = TimeBudget::new(Duration::from_millis(100), Duration::from_millis(10));
        assert_eq!(budget.take_available(), Duration::from_millis(100));
        assert_eq!(budget.take_available(), Duration::ZERO);
    }

    #[test]
    fn test_return_unused_is_capped() {
        let budget = TimeBudget::new(Duration::from_millis(100), Duration::from_millis(10));
        let taken = budget.take_available();
        budget.return_unused(taken);
        budget.return_unused(Duration::from_millis(500));
        assert_eq!(budget.available(), Duration::from_millis(100));
    }

    #[test]
    fn test_replenish_accumulates_up_to_cap() {
        let budget = TimeBudget::new(Duration::from_millis(25), Duration::from_millis(10));
        budget.take_available();
        budget.replenish();
        assert_eq!(budget.available(), Duration::from_millis(10));
        budget.replenish();
        budget.replenish();
        assert_eq!(budget.available(), Duration::from_millis(25));
    }
}
