//! Message counters fed by `hook:stats:entry`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::bus::{BusEvent, BusListener, StatsKind};

#[derive(Default)]
pub struct StatsCounter {
    counts: RwLock<BTreeMap<String, u64>>,
}

impl StatsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, kind: StatsKind) -> u64 {
        let key = serde_json::to_value(kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        self.counts.read().await.get(&key).copied().unwrap_or(0)
    }

    pub async fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts.read().await.clone()
    }
}

#[async_trait]
impl BusListener for StatsCounter {
    async fn on_event(&self, event: &BusEvent) -> anyhow::Result<()> {
        if let BusEvent::StatsEntry { kind, label } = event {
            let key = serde_json::to_value(kind)?
                .as_str()
                .map(str::to_string)
                .unwrap_or_default();
            *self.counts.write().await.entry(key).or_insert(0) += 1;
            log::trace!("stats: {}", label);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_entries_by_kind() {
        let counter = StatsCounter::new();
        for kind in [StatsKind::Outgoing, StatsKind::Outgoing, StatsKind::NewUsers] {
            counter
                .on_event(&BusEvent::stats(kind, "x"))
                .await
                .unwrap();
        }
        assert_eq!(counter.get(StatsKind::Outgoing).await, 2);
        assert_eq!(counter.get(StatsKind::Incoming).await, 0);
        assert_eq!(counter.snapshot().await.get("new_users"), Some(&1));
    }
}
