#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::timeout;
    use tokio::time::Duration;

    use crate::ready::ReadyGate;

    #[tokio::test]
    async fn test_starts_not_ready() {
        let gate = ReadyGate::new();
        assert!(!gate.check());
        assert!(
            timeout(Duration::from_millis(50), gate.wait()).await.is_err(),
            "wait must block while not ready"
        );
    }

    #[tokio::test]
    async fn test_set_ready_wakes_waiters() {
        let gate = Arc::new(ReadyGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_and_read_generation().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.set(true);

        let generation = waiter.await.expect("join").expect("ready");
        assert_eq!(generation, 1);
        assert!(gate.check());
    }

    #[tokio::test]
    async fn test_generation_increments_per_ready_transition() {
        let gate = ReadyGate::new();
        gate.set(true);
        assert_eq!(gate.check_and_read_generation(), (true, 1));

        gate.set(false);
        assert_eq!(gate.check_and_read_generation(), (false, 1));

        gate.set(true);
        assert_eq!(gate.check_and_read_generation(), (true, 2));

        // Setting ready while already ready does not bump the generation.
        gate.set(true);
        assert_eq!(gate.check_and_read_generation(), (true, 2));
    }

    #[tokio::test]
    async fn test_stop_fails_current_and_future_waits() {
        let gate = Arc::new(ReadyGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.stop();

        assert!(waiter.await.expect("join").is_err());
        assert!(gate.wait().await.is_err());
        assert!(!gate.check());

        // A stopped gate cannot be revived.
        gate.set(true);
        assert!(!gate.check());
    }

    #[tokio::test]
    async fn test_unready_blocks_new_waiters() {
        let gate = Arc::new(ReadyGate::new());
        gate.set(true);
        gate.wait().await.expect("ready");

        gate.set(false);
        assert!(
            timeout(Duration::from_millis(50), gate.wait()).await.is_err(),
            "wait must block again after a disconnect"
        );
    }
}
