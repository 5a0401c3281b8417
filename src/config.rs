use log::warn;
use std::str::FromStr;
use std::time::Duration;

/// Default history page size, matching the service's page limit.
pub const DEFAULT_PAGE_SIZE: usize = 30;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// Messages requested per history page.
    pub history_page_size: usize,
    /// Conversations requested per page of the conversation list.
    pub conversation_page_size: usize,
    /// Inactivity after the last keystroke before typing is ended.
    pub typing_stop_delay: Duration,
    /// Settle delay before an open conversation is marked read remotely.
    pub mark_read_delay: Duration,
    pub event_channel_capacity: usize,
    /// Group members requested when a roster is loaded.
    pub member_page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            history_page_size: DEFAULT_PAGE_SIZE,
            conversation_page_size: DEFAULT_PAGE_SIZE,
            typing_stop_delay: Duration::from_secs(1),
            mark_read_delay: Duration::from_secs(1),
            event_channel_capacity: 100,
            member_page_size: 50,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid value {raw:?} for {key}");
            default
        }),
        None => default,
    }
}

impl SyncConfig {
    /// Defaults overridden by `CHATSYNC_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            history_page_size: parse_or(
                &lookup,
                "CHATSYNC_HISTORY_PAGE_SIZE",
                defaults.history_page_size,
            ),
            conversation_page_size: parse_or(
                &lookup,
                "CHATSYNC_CONVERSATION_PAGE_SIZE",
                defaults.conversation_page_size,
            ),
            typing_stop_delay: Duration::from_millis(parse_or(
                &lookup,
                "CHATSYNC_TYPING_STOP_MS",
                defaults.typing_stop_delay.as_millis() as u64,
            )),
            mark_read_delay: Duration::from_millis(parse_or(
                &lookup,
                "CHATSYNC_MARK_READ_MS",
                defaults.mark_read_delay.as_millis() as u64,
            )),
            event_channel_capacity: parse_or(
                &lookup,
                "CHATSYNC_EVENT_CAPACITY",
                defaults.event_channel_capacity,
            )
            .max(1),
            member_page_size: parse_or(
                &lookup,
                "CHATSYNC_MEMBER_PAGE_SIZE",
                defaults.member_page_size,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("CHATSYNC_HISTORY_PAGE_SIZE", "50"),
            ("CHATSYNC_TYPING_STOP_MS", "250"),
            ("CHATSYNC_EVENT_CAPACITY", "0"),
        ]
        .into_iter()
        .collect();
        let config = SyncConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.history_page_size, 50);
        assert_eq!(config.conversation_page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.typing_stop_delay, Duration::from_millis(250));
        assert_eq!(config.mark_read_delay, Duration::from_secs(1));
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.member_page_size, 50);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = SyncConfig::from_lookup(|k| {
            (k == "CHATSYNC_CONVERSATION_PAGE_SIZE").then(|| "lots".to_string())
        });
        assert_eq!(config, SyncConfig::default());
    }
}
