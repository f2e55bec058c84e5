use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

static EVENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Rough token estimate: four characters per token, never below one.
pub fn estimate_tokens(text: &str) -> u64 {
    std::cmp::max(1, (text.chars().count() / 4) as u64)
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HistoryEvent {
    pub id: String,
    pub tab: String,
    pub agent: String,
    pub model: String,
    pub tokens_est: u64,
    /// RFC 3339 UTC timestamp.
    pub ts: String,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UsageStats {
    pub models: Vec<ModelUsageStats>,
    pub total_requests: u64,
    pub total_tokens_est: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModelUsageStats {
    pub model: String,
    pub requests: u64,
    pub tokens_est: u64,
}

/// Per-session run log. Nothing here outlives the session.
#[derive(Debug, Clone, Default)]
pub struct SessionHistory {
    events: Vec<HistoryEvent>,
}

impl SessionHistory {
    pub fn record(
        &mut self,
        tab: &str,
        agent: &str,
        model: &str,
        tokens_est: u64,
        meta: Option<serde_json::Value>,
    ) -> &HistoryEvent {
        let event = HistoryEvent {
            id: new_event_id(),
            tab: tab.to_string(),
            agent: agent.to_string(),
            model: model.to_string(),
            tokens_est,
            ts: Utc::now().to_rfc3339(),
            meta: meta.unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        };
        self.events.push(event);
        &self.events[self.events.len() - 1]
    }

    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }

    /// Drop every event; returns how many there were.
    pub fn clear(&mut self) -> usize {
        std::mem::take(&mut self.events).len()
    }

    pub fn usage_stats(&self) -> UsageStats {
        let mut by_model: BTreeMap<&str, ModelUsageStats> = BTreeMap::new();
        for event in &self.events {
            let stat = by_model
                .entry(event.model.as_str())
                .or_insert_with(|| ModelUsageStats {
                    model: event.model.clone(),
                    requests: 0,
                    tokens_est: 0,
                });
            stat.requests += 1;
            stat.tokens_est += event.tokens_est;
        }

        let models: Vec<ModelUsageStats> = by_model.into_values().collect();
        UsageStats {
            total_requests: models.iter().map(|m| m.requests).sum(),
            total_tokens_est: models.iter().map(|m| m.tokens_est).sum(),
            models,
        }
    }
}

fn new_event_id() -> String {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let counter = EVENT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();

    let mut h = Sha256::new();
    h.update(now.to_le_bytes());
    h.update(pid.to_le_bytes());
    h.update(counter.to_le_bytes());
    let digest = h.finalize();
    hex_lower(&digest[..8])
}

pub fn hex_lower(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_has_floor_of_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("醫療器材查驗登記"), 2);
    }

    #[test]
    fn usage_is_aggregated_per_model() {
        let mut history = SessionHistory::default();
        history.record("tw_premarket", "TFDA 預審形式審查代理", "gemini-2.5-flash", 100, None);
        history.record("note_keeper", "Polisher", "gpt-4.1-mini", 40, None);
        history.record("tw_premarket", "TFDA 申請書撰寫助手", "gemini-2.5-flash", 60, None);

        let stats = history.usage_stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.total_tokens_est, 200);
        assert_eq!(stats.models[0].model, "gemini-2.5-flash");
        assert_eq!(stats.models[0].requests, 2);
        assert_eq!(stats.models[0].tokens_est, 160);
    }

    #[test]
    fn events_get_distinct_ids_and_empty_meta_object() {
        let mut history = SessionHistory::default();
        let first = history.record("a", "agent", "gpt-4o-mini", 1, None).id.clone();
        let second = history.record("a", "agent", "gpt-4o-mini", 1, None).id.clone();
        assert_ne!(first, second);
        assert_eq!(first.len(), 16);
        assert!(history.events()[0].meta.is_object());
    }

    #[test]
    fn clear_empties_the_log() {
        let mut history = SessionHistory::default();
        history.record("agents", "Polisher", "gpt-4.1-mini", 10, None);
        history.record("agents", "Polisher", "gpt-4.1-mini", 12, None);
        assert_eq!(history.clear(), 2);
        assert!(history.events().is_empty());
        assert_eq!(history.usage_stats().total_requests, 0);
        assert_eq!(history.clear(), 0);
    }
}
