//! Bounded alert log

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use super::models::{Alert, AlertCategory, AlertSeverity};

/// Append-only alert list capped at `max_alerts`, oldest evicted first
#[derive(Debug)]
pub struct AlertLog {
    alerts: VecDeque<Alert>,
    max_alerts: usize,
}

impl AlertLog {
    pub fn new(max_alerts: usize) -> Self {
        Self {
            alerts: VecDeque::new(),
            max_alerts: max_alerts.max(1),
        }
    }

    pub fn push(
        &mut self,
        timestamp: DateTime<Utc>,
        severity: AlertSeverity,
        category: AlertCategory,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> &Alert {
        self.alerts.push_back(Alert {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            severity,
            category,
            message: message.into(),
            details,
            resolved: false,
        });
        while self.alerts.len() > self.max_alerts {
            self.alerts.pop_front();
        }
        // just pushed, so never empty
        &self.alerts[self.alerts.len() - 1]
    }

    /// Newest first
    pub fn newest_first(&self) -> Vec<Alert> {
        self.alerts.iter().rev().cloned().collect()
    }

    pub fn unresolved_count(&self) -> usize {
        self.alerts.iter().filter(|a| !a.resolved).count()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alerts_are_capped() {
        let mut log = AlertLog::new(3);
        for i in 0..5 {
            log.push(
                Utc::now(),
                AlertSeverity::Info,
                AlertCategory::CircuitBreaker,
                format!("alert {}", i),
                None,
            );
        }
        assert_eq!(log.len(), 3);
        let messages: Vec<String> = log.newest_first().into_iter().map(|a| a.message).collect();
        assert_eq!(messages, vec!["alert 4", "alert 3", "alert 2"]);
    }

    #[test]
    fn test_new_alerts_are_unresolved() {
        let mut log = AlertLog::new(10);
        let alert = log.push(
            Utc::now(),
            AlertSeverity::Warning,
            AlertCategory::BudgetWarning,
            "budget at 80%",
            Some(serde_json::json!({"utilisation": 0.8})),
        );
        assert!(!alert.resolved);
        assert_eq!(log.unresolved_count(), 1);
        log.clear();
        assert!(log.is_empty());
    }
}
