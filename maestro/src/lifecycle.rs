//! Mission lifecycle manager: tracks executing missions and the cancellation
//! primitives for each.
//!
//! Cancellation is cooperative. `stop` flips the status and signals the
//! token; the worker exits at its next checkpoint. `pause` flips the status;
//! the worker blocks on the resume notify at its next checkpoint and re-checks
//! after `resume`. Workers are never terminated forcefully.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::ContextStore;
use crate::schemas::MissionStatus;

struct MissionHandle {
    worker: JoinHandle<()>,
    cancel: CancellationToken,
    resume: Arc<Notify>,
}

pub struct LifecycleManager {
    store: Arc<ContextStore>,
    missions: DashMap<String, MissionHandle>,
}

impl LifecycleManager {
    pub fn new(store: Arc<ContextStore>) -> Self {
        Self {
            store,
            missions: DashMap::new(),
        }
    }

    /// Registers a mission worker with its cancellation token and resume signal.
    pub fn register(
        &self,
        mission_id: impl Into<String>,
        worker: JoinHandle<()>,
        cancel: CancellationToken,
        resume: Arc<Notify>,
    ) {
        let mission_id = mission_id.into();
        tracing::info!(mission = %mission_id, "registered mission worker");
        self.missions.insert(
            mission_id,
            MissionHandle {
                worker,
                cancel,
                resume,
            },
        );
    }

    /// Flips the mission to `paused`. Does not join the worker; it blocks at
    /// its next checkpoint. Returns false when the transition is illegal.
    pub async fn pause(&self, mission_id: &str) -> bool {
        self.store
            .update_status(mission_id, MissionStatus::Paused, None)
            .await
            .is_ok()
    }

    /// Flips a paused mission back to `running` and wakes its worker.
    pub async fn resume(&self, mission_id: &str) -> bool {
        let Ok(MissionStatus::Paused) = self.store.status(mission_id).await else {
            return false;
        };
        if self
            .store
            .update_status(mission_id, MissionStatus::Running, None)
            .await
            .is_err()
        {
            return false;
        }
        if let Some(handle) = self.missions.get(mission_id) {
            handle.resume.notify_waiters();
        }
        true
    }

    /// Flips the mission to `stopped` and signals the cancel token. The worker
    /// is expected to exit at its next checkpoint; in-flight tool calls finish
    /// but their results are discarded. Returns false when already terminal.
    pub async fn stop(&self, mission_id: &str) -> bool {
        if self
            .store
            .update_status(mission_id, MissionStatus::Stopped, None)
            .await
            .is_err()
        {
            return false;
        }
        if let Some(handle) = self.missions.get(mission_id) {
            handle.cancel.cancel();
            // A paused worker is parked on the resume notify; wake it so it
            // observes the stop.
            handle.resume.notify_waiters();
        }
        tracing::info!(mission = %mission_id, "signalled stop");
        true
    }

    /// Removes tracking entries after a worker has exited.
    pub fn cleanup(&self, mission_id: &str) {
        if self.missions.remove(mission_id).is_some() {
            tracing::info!(mission = %mission_id, "cleaned up mission worker");
        }
    }

    pub fn is_running(&self, mission_id: &str) -> bool {
        self.missions
            .get(mission_id)
            .map(|h| !h.worker.is_finished())
            .unwrap_or(false)
    }

    pub fn list_running(&self) -> Vec<String> {
        self.missions
            .iter()
            .filter(|e| !e.worker.is_finished())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Signals stop to every tracked mission; returns the count signalled.
    pub async fn stop_all(&self) -> usize {
        let ids: Vec<String> = self.missions.iter().map(|e| e.key().clone()).collect();
        let mut stopped = 0;
        for id in ids {
            if self.stop(&id).await {
                stopped += 1;
            }
        }
        stopped
    }
}

/// Per-worker control handle threaded through the controller and agents.
/// Checkpoints implement the cooperative pause/stop protocol.
#[derive(Clone)]
pub struct ControlHandle {
    mission_id: String,
    store: Arc<ContextStore>,
    cancel: CancellationToken,
    resume: Arc<Notify>,
}

impl ControlHandle {
    pub fn new(mission_id: impl Into<String>, store: Arc<ContextStore>) -> Self {
        Self {
            mission_id: mission_id.into(),
            store,
            cancel: CancellationToken::new(),
            resume: Arc::new(Notify::new()),
        }
    }

    pub fn mission_id(&self) -> &str {
        &self.mission_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn resume_notify(&self) -> Arc<Notify> {
        self.resume.clone()
    }

    /// Checkpoint called after every suspension point. Returns true while the
    /// mission should keep going; blocks while paused; false once stopped.
    /// Cancellation wins over resume.
    pub async fn should_continue(&self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            match self.store.status(&self.mission_id).await {
                Ok(MissionStatus::Running) | Ok(MissionStatus::Planning) => return true,
                Ok(MissionStatus::Paused) => {
                    // Register interest before re-checking so a resume between
                    // the status read and the wait is not lost.
                    let notified = self.resume.notified();
                    if self.cancel.is_cancelled() {
                        return false;
                    }
                    if let Ok(MissionStatus::Paused) = self.store.status(&self.mission_id).await {
                        // The sleep arm re-checks status periodically in case
                        // the notify fired before this future was polled.
                        tokio::select! {
                            _ = notified => {}
                            _ = self.cancel.cancelled() => return false,
                            _ = tokio::time::sleep(std::time::Duration::from_millis(250)) => {}
                        }
                    }
                }
                _ => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryPersistence;
    use crate::schemas::ToolSelection;
    use std::time::Duration;

    async fn setup() -> (Arc<ContextStore>, LifecycleManager, String) {
        let store = Arc::new(ContextStore::new(Arc::new(MemoryPersistence::new())));
        let manager = LifecycleManager::new(store.clone());
        let ctx = store
            .create_mission("u", "c", "req", ToolSelection::default(), None, None)
            .await
            .unwrap();
        store
            .update_status(&ctx.mission_id, MissionStatus::Planning, None)
            .await
            .unwrap();
        store
            .update_status(&ctx.mission_id, MissionStatus::Running, None)
            .await
            .unwrap();
        (store, manager, ctx.mission_id)
    }

    #[tokio::test]
    async fn pause_then_resume_round_trip() {
        let (store, manager, id) = setup().await;
        assert!(manager.pause(&id).await);
        assert_eq!(store.status(&id).await.unwrap(), MissionStatus::Paused);
        assert!(manager.resume(&id).await);
        assert_eq!(store.status(&id).await.unwrap(), MissionStatus::Running);
    }

    #[tokio::test]
    async fn resume_requires_paused() {
        let (_store, manager, id) = setup().await;
        assert!(!manager.resume(&id).await);
    }

    #[tokio::test]
    async fn stop_is_idempotent_false_second_time() {
        let (store, manager, id) = setup().await;
        assert!(manager.stop(&id).await);
        assert_eq!(store.status(&id).await.unwrap(), MissionStatus::Stopped);
        assert!(!manager.stop(&id).await);
    }

    #[tokio::test]
    async fn checkpoint_blocks_on_pause_and_wakes_on_resume() {
        let (store, manager, id) = setup().await;
        let handle = ControlHandle::new(id.clone(), store.clone());
        let worker_handle = handle.clone();
        let worker = tokio::spawn(async move { worker_handle.should_continue().await });
        manager.register(
            id.clone(),
            tokio::spawn(async {}),
            handle.cancel_token().clone(),
            handle.resume_notify(),
        );

        manager.pause(&id).await;
        // register after pause: spawn a checkpoint that should block
        let blocked_handle = handle.clone();
        let blocked = tokio::spawn(async move { blocked_handle.should_continue().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished(), "checkpoint must block while paused");

        // LifecycleManager::resume notifies the registered handle's notify.
        assert!(manager.resume(&id).await);
        let cont = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .unwrap()
            .unwrap();
        assert!(cont);
        let _ = worker.await;
    }

    #[tokio::test]
    async fn stop_wakes_paused_checkpoint_with_false() {
        let (store, manager, id) = setup().await;
        let handle = ControlHandle::new(id.clone(), store.clone());
        manager.register(
            id.clone(),
            tokio::spawn(async {}),
            handle.cancel_token().clone(),
            handle.resume_notify(),
        );
        manager.pause(&id).await;
        let blocked_handle = handle.clone();
        let blocked = tokio::spawn(async move { blocked_handle.should_continue().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(manager.stop(&id).await);
        let cont = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .unwrap()
            .unwrap();
        assert!(!cont, "stop must win over pause");
    }

    #[tokio::test]
    async fn cleanup_removes_tracking() {
        let (_store, manager, id) = setup().await;
        manager.register(
            id.clone(),
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }),
            CancellationToken::new(),
            Arc::new(Notify::new()),
        );
        assert!(manager.is_running(&id));
        assert_eq!(manager.list_running(), vec![id.clone()]);
        manager.cleanup(&id);
        assert!(!manager.is_running(&id));
        assert!(manager.list_running().is_empty());
    }

    #[tokio::test]
    async fn stop_all_counts_signalled() {
        let (store, manager, id) = setup().await;
        manager.register(
            id.clone(),
            tokio::spawn(async {}),
            CancellationToken::new(),
            Arc::new(Notify::new()),
        );
        let other = store
            .create_mission("u", "c", "req2", ToolSelection::default(), None, None)
            .await
            .unwrap();
        store
            .update_status(&other.mission_id, MissionStatus::Planning, None)
            .await
            .unwrap();
        manager.register(
            other.mission_id.clone(),
            tokio::spawn(async {}),
            CancellationToken::new(),
            Arc::new(Notify::new()),
        );
        assert_eq!(manager.stop_all().await, 2);
    }
}
