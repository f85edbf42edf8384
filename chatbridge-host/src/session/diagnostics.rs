//! Bounded record of recovered errors

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::warn;

use chatbridge_utils::{BridgeError, ErrorCategory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub category: ErrorCategory,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Ring of the most recent diagnostics; the oldest is dropped when full
#[derive(Debug, Clone)]
pub struct Diagnostics {
    records: VecDeque<Diagnostic>,
    capacity: usize,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Record `error` and log it
    pub fn record(&mut self, error: &BridgeError) {
        let category = error.category();
        warn!(category = ?category, error = %error, "Recorded diagnostic");

        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(Diagnostic {
            category,
            message: error.to_string(),
            at: Utc::now(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.records.iter()
    }

    /// Number of retained records in `category`
    pub fn count(&self, category: ErrorCategory) -> usize {
        self.records
            .iter()
            .filter(|d| d.category == category)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_count() {
        let mut diags = Diagnostics::new(8);
        diags.record(&BridgeError::decode("bad json"));
        diags.record(&BridgeError::violation("ChatLine", "LoggedOut"));
        diags.record(&BridgeError::decode("bad status"));

        assert_eq!(diags.len(), 3);
        assert_eq!(diags.count(ErrorCategory::ProtocolDecodeError), 2);
        assert_eq!(diags.count(ErrorCategory::ProtocolViolation), 1);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut diags = Diagnostics::new(2);
        diags.record(&BridgeError::decode("first"));
        diags.record(&BridgeError::decode("second"));
        diags.record(&BridgeError::decode("third"));

        let messages: Vec<&str> = diags.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("second"));
        assert!(messages[1].contains("third"));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut diags = Diagnostics::new(0);
        diags.record(&BridgeError::NotConnected);
        assert_eq!(diags.len(), 1);
    }
}
