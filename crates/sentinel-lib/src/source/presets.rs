//! Built-in dataset queries
//!
//! Both queries bucket raw events into 15-minute slots and emit per-user
//! ratios, so growth of the active audience alone does not trip alerts.

use super::Dataset;

pub const FEED_DATASET: &str = "feed";
pub const MESSAGES_DATASET: &str = "messages";

pub const DEFAULT_FEED_TABLE: &str = "simulator.feed_actions";
pub const DEFAULT_MESSAGES_TABLE: &str = "simulator.message_actions";

/// Feed activity: active users, views/likes per user and CTR
pub fn feed_dataset(table: &str) -> Dataset {
    Dataset::new(
        FEED_DATASET,
        format!(
            r#"SELECT
    ts,
    date,
    hm,
    users_feed,
    views / users_feed AS views_per_user,
    likes / users_feed AS likes_per_user,
    likes / views AS CTR
FROM (
    SELECT
        toStartOfFifteenMinutes(time) AS ts,
        toDate(time) AS date,
        formatDateTime(toStartOfFifteenMinutes(time), '%R') AS hm,
        uniqExact(user_id) AS users_feed,
        countIf(action = 'view') AS views,
        countIf(action = 'like') AS likes
    FROM {table}
    WHERE time >= today() - {{lookback_days}}
      AND time < toStartOfFifteenMinutes(now())
    GROUP BY ts, date, hm
)
ORDER BY ts"#
        ),
    )
}

/// Messenger activity: active senders and messages per user
pub fn messages_dataset(table: &str) -> Dataset {
    Dataset::new(
        MESSAGES_DATASET,
        format!(
            r#"SELECT
    ts,
    date,
    hm,
    users_messages,
    sent_messages / users_messages AS sent_message_per_user
FROM (
    SELECT
        toStartOfFifteenMinutes(time) AS ts,
        toDate(time) AS date,
        formatDateTime(toStartOfFifteenMinutes(time), '%R') AS hm,
        uniqExact(user_id) AS users_messages,
        count() AS sent_messages
    FROM {table}
    WHERE time >= today() - {{lookback_days}}
      AND time < toStartOfFifteenMinutes(now())
    GROUP BY ts, date, hm
)
ORDER BY ts"#
        ),
    )
}

/// Default metric columns and their display names
pub fn default_metrics() -> Vec<(&'static str, &'static str, &'static str)> {
    vec![
        ("views_per_user", "Views per user", FEED_DATASET),
        ("likes_per_user", "Likes per user", FEED_DATASET),
        ("CTR", "CTR", FEED_DATASET),
        (
            "sent_message_per_user",
            "Messages sent per user",
            MESSAGES_DATASET,
        ),
    ]
}
