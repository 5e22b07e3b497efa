//! Notification payload

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::anomaly::{Direction, EvaluationResult};
use crate::chart::escape;

/// An anomaly that passed the throttle gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub metric_name: String,
    pub display_name: String,
    pub direction: Direction,
    pub current_value: f64,
    pub reference_value: f64,
    pub relative_change: f64,
    pub current_timestamp: NaiveDateTime,
    pub reference_timestamp: NaiveDateTime,
    pub detected_at: NaiveDateTime,
    /// Cooldown in whole hours, shown as a hint in the message
    pub cooldown_hours: i64,
}

impl Notification {
    /// Build from an evaluated result; `None` if the result carries no values
    pub fn from_evaluation(
        metric_name: &str,
        display_name: &str,
        result: &EvaluationResult,
        detected_at: NaiveDateTime,
        cooldown: Duration,
    ) -> Option<Self> {
        Some(Self {
            metric_name: metric_name.to_string(),
            display_name: display_name.to_string(),
            direction: result.direction()?,
            current_value: result.current_value?,
            reference_value: result.reference_value?,
            relative_change: result.relative_change?,
            current_timestamp: result.current_timestamp,
            reference_timestamp: result.reference_timestamp,
            detected_at,
            cooldown_hours: cooldown.num_hours(),
        })
    }

    /// Message text with Telegram-compatible HTML markup
    pub fn render_html(&self) -> String {
        let (marker, direction) = match self.direction {
            Direction::Increase => ("🔴", "📈 INCREASE"),
            Direction::Decrease => ("🟡", "📉 DECREASE"),
        };

        let mut text = format!("{marker} <b>ANOMALY DETECTED</b>\n\n");
        text.push_str(&format!("<b>Metric:</b> {}\n", escape(&self.display_name)));
        text.push_str(&format!("<b>Direction:</b> {direction}\n"));
        text.push_str(&format!("<b>Current value:</b> {:.2}\n", self.current_value));
        text.push_str(&format!(
            "<b>Deviation:</b> {:+.1}%\n",
            self.relative_change * 100.0
        ));
        text.push_str(&format!(
            "<b>Detected at:</b> {}\n",
            self.detected_at.format("%Y-%m-%d %H:%M")
        ));
        if self.cooldown_hours > 0 {
            text.push_str(&format!(
                "\n<i>Next alert for this metric possible in {} h</i>",
                self.cooldown_hours
            ));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{EvaluationStatus, UnevaluableReason};

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn evaluated(current: f64, reference: f64) -> EvaluationResult {
        EvaluationResult {
            is_anomalous: true,
            current_value: Some(current),
            relative_change: Some(current / reference - 1.0),
            current_timestamp: ts("2025-07-18 12:00:00"),
            reference_value: Some(reference),
            reference_timestamp: ts("2025-07-11 12:00:00"),
            status: EvaluationStatus::Evaluated,
        }
    }

    #[test]
    fn test_render_increase() {
        let notification = Notification::from_evaluation(
            "views_per_user",
            "Views per user",
            &evaluated(14.0, 10.0),
            ts("2025-07-18 12:03:27"),
            Duration::hours(4),
        )
        .unwrap();

        let text = notification.render_html();
        assert!(text.contains("Views per user"));
        assert!(text.contains("INCREASE"));
        assert!(text.contains("14.00"));
        assert!(text.contains("+40.0%"));
        assert!(text.contains("2025-07-18 12:03"));
        assert!(text.contains("4 h"));
    }

    #[test]
    fn test_render_decrease_escapes_name() {
        let notification = Notification::from_evaluation(
            "ctr",
            "CTR <feed>",
            &evaluated(5.0, 10.0),
            ts("2025-07-18 12:00:00"),
            Duration::zero(),
        )
        .unwrap();

        let text = notification.render_html();
        assert!(text.contains("DECREASE"));
        assert!(text.contains("-50.0%"));
        assert!(text.contains("CTR &lt;feed&gt;"));
        assert!(!text.contains("Next alert"));
    }

    #[test]
    fn test_unevaluated_result_builds_nothing() {
        let result = EvaluationResult {
            is_anomalous: false,
            current_value: None,
            relative_change: None,
            current_timestamp: ts("2025-07-18 12:00:00"),
            reference_value: None,
            reference_timestamp: ts("2025-07-11 12:00:00"),
            status: EvaluationStatus::CannotEvaluate(UnevaluableReason::MissingReference),
        };

        assert!(Notification::from_evaluation(
            "ctr",
            "CTR",
            &result,
            ts("2025-07-18 12:00:00"),
            Duration::hours(4)
        )
        .is_none());
    }
}
