//! Consistency monitor: a periodic sweep reconciling in-memory mission state
//! against what persistence reports. Emits warnings only; it never pauses,
//! stops, or mutates a running mission.

use std::sync::Arc;
use std::time::Duration;

use crate::context::ContextStore;

/// A discrepancy found by one sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Discrepancy {
    /// Mission held in memory but missing from durable storage.
    MissingFromStorage { mission_id: String },
    /// Stored status differs from the in-memory status.
    StatusDiverged {
        mission_id: String,
        memory: String,
        stored: String,
    },
    /// More than one report version marked current.
    MultipleCurrentVersions { mission_id: String, count: usize },
}

pub struct ConsistencyMonitor {
    store: Arc<ContextStore>,
    interval: Duration,
}

impl ConsistencyMonitor {
    pub fn new(store: Arc<ContextStore>) -> Self {
        Self {
            store,
            interval: Duration::from_secs(300),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs one sweep and returns the discrepancies found (already logged).
    pub async fn sweep(&self) -> Vec<Discrepancy> {
        let mut found = Vec::new();
        for mission_id in self.store.loaded_mission_ids() {
            let Ok(memory) = self.store.get(&mission_id).await else {
                continue;
            };
            match self.store.persistence().load_context(&mission_id).await {
                Ok(Some(stored)) => {
                    if stored.status != memory.status {
                        found.push(Discrepancy::StatusDiverged {
                            mission_id: mission_id.clone(),
                            memory: memory.status.as_str().to_string(),
                            stored: stored.status.as_str().to_string(),
                        });
                    }
                }
                Ok(None) => {
                    found.push(Discrepancy::MissingFromStorage {
                        mission_id: mission_id.clone(),
                    });
                }
                Err(e) => {
                    tracing::warn!(mission = %mission_id, error = %e, "consistency sweep read failed");
                }
            }
            if let Ok(versions) = self.store.list_report_versions(&mission_id).await {
                let current = versions.iter().filter(|v| v.is_current).count();
                if current > 1 {
                    found.push(Discrepancy::MultipleCurrentVersions {
                        mission_id: mission_id.clone(),
                        count: current,
                    });
                }
            }
        }
        for d in &found {
            tracing::warn!(discrepancy = ?d, "consistency sweep finding");
        }
        found
    }

    /// Spawns the periodic sweep task.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let _ = self.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryPersistence;
    use crate::schemas::ToolSelection;

    #[tokio::test]
    async fn clean_state_yields_no_findings() {
        let store = Arc::new(ContextStore::new(Arc::new(MemoryPersistence::new())));
        store
            .create_mission("u", "c", "r", ToolSelection::default(), None, None)
            .await
            .unwrap();
        let monitor = ConsistencyMonitor::new(store);
        assert!(monitor.sweep().await.is_empty());
    }

    #[tokio::test]
    async fn missing_storage_row_is_flagged() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = Arc::new(ContextStore::new(persistence.clone()));
        let ctx = store
            .create_mission("u", "c", "r", ToolSelection::default(), None, None)
            .await
            .unwrap();
        // Simulate an external wipe of the durable row.
        persistence.wipe_context_for_test(&ctx.mission_id);
        let monitor = ConsistencyMonitor::new(store);
        let findings = monitor.sweep().await;
        assert_eq!(
            findings,
            vec![Discrepancy::MissingFromStorage {
                mission_id: ctx.mission_id
            }]
        );
    }
}
