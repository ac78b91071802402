/*
    changes.rs - Debounced change notifications for a live force

    Wraps the force's revision channel: a burst of mutations inside the
    quiet period is reported once, with the newest revision.
*/

use super::force::Force;
use std::time::Duration;
use tokio::sync::watch;

pub struct ChangeFeed {
    rx: watch::Receiver<u64>,
    debounce: Duration,
}

impl ChangeFeed {
    pub fn new(force: &Force, debounce: Duration) -> Self {
        ChangeFeed {
            rx: force.subscribe_changes(),
            debounce,
        }
    }

    /// Wait for the next burst of changes to settle.
    ///
    /// Returns `None` once the force has been dropped.
    pub async fn next_debounced(&mut self) -> Option<u64> {
        self.rx.changed().await.ok()?;
        loop {
            match tokio::time::timeout(self.debounce, self.rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => break,
            }
        }
        Some(*self.rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GameSystem;

    #[tokio::test(start_paused = true)]
    async fn test_burst_reported_once() {
        let mut force = GameSystem::Classic.new_force("Burst");
        let mut feed = ChangeFeed::new(&force, Duration::from_millis(300));

        for i in 0..5 {
            force.set_name(format!("Burst {}", i));
        }
        let rev = feed.next_debounced().await;
        assert_eq!(rev, Some(5));

        crate::test_utils::assert_times_out(Duration::from_secs(5), feed.next_debounced()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_ends_with_force() {
        let force = GameSystem::AlphaStrike.new_force("Gone");
        let mut feed = ChangeFeed::new(&force, Duration::from_millis(50));
        drop(force);
        assert_eq!(feed.next_debounced().await, None);
    }
}
