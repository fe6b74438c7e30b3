//! Per-document diagnostics debouncing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tracks one publication deadline per document. Rescheduling replaces the
/// previous deadline, so only the latest edit is ever published.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadlines: HashMap<String, Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadlines: HashMap::new(),
        }
    }

    pub fn schedule(&mut self, uri: &str, now: Instant) {
        self.deadlines.insert(uri.to_string(), now + self.delay);
    }

    pub fn cancel(&mut self, uri: &str) {
        self.deadlines.remove(uri);
    }

    /// Documents whose deadline has passed, sorted. Each is returned once.
    pub fn take_due(&mut self, now: Instant) -> Vec<String> {
        let mut due: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(uri, _)| uri.clone())
            .collect();
        for uri in &due {
            self.deadlines.remove(uri);
        }
        due.sort();
        due
    }

    /// Earliest pending deadline, for a caller's timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    pub fn is_pending(&self, uri: &str) -> bool {
        self.deadlines.contains_key(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reschedule_replaces_deadline() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(300));
        debouncer.schedule("file:///a.py", start);
        debouncer.schedule("file:///a.py", start + Duration::from_millis(200));

        assert!(debouncer.take_due(start + Duration::from_millis(350)).is_empty());
        assert_eq!(
            debouncer.take_due(start + Duration::from_millis(500)),
            vec!["file:///a.py"]
        );
        assert!(debouncer.take_due(start + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn test_cancel_and_next_deadline() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        debouncer.schedule("file:///b.py", start + Duration::from_millis(50));
        debouncer.schedule("file:///a.py", start);
        assert_eq!(
            debouncer.next_deadline(),
            Some(start + Duration::from_millis(100))
        );
        debouncer.cancel("file:///a.py");
        assert!(!debouncer.is_pending("file:///a.py"));
        assert_eq!(
            debouncer.take_due(start + Duration::from_millis(200)),
            vec!["file:///b.py"]
        );
    }

    #[test]
    fn test_zero_delay_is_due_immediately() {
        let now = Instant::now();
        let mut debouncer = Debouncer::new(Duration::ZERO);
        debouncer.schedule("file:///a.py", now);
        assert_eq!(debouncer.take_due(now), vec!["file:///a.py"]);
    }
}
