//! Context store: owns every mutation of mission state.
//!
//! Agents read snapshots via [`ContextStore::get`] and submit typed updates;
//! each mutation persists in the same logical action and emits a typed event
//! to the realtime bus. Mutations take a per-mission lock; missions never
//! block each other. A persistence failure rolls the in-memory change back
//! and surfaces as [`ContextError::Persistence`] — callers must treat the
//! mutation as not applied.

pub mod persistence;

pub use persistence::{MemoryPersistence, MissionPersistence, SqlitePersistence};

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use mission_event::MissionEvent;
use tokio::sync::Mutex;

use crate::bus::EventSink;
use crate::error::ContextError;
use crate::schemas::{
    validate_outline, ExecutionLogEntry, GoalEntry, GoalStatus, MissionContext, MissionMetadata,
    MissionSettings, MissionStats, MissionStatus, Note, ReportSection, ResearchReportVersion,
    ThoughtEntry, ToolSelection, THOUGHT_PAD_CAPACITY,
};

pub struct ContextStore {
    missions: DashMap<String, Arc<Mutex<MissionContext>>>,
    persistence: Arc<dyn MissionPersistence>,
    events: Option<Arc<dyn EventSink>>,
    thought_pad_capacity: usize,
}

impl ContextStore {
    pub fn new(persistence: Arc<dyn MissionPersistence>) -> Self {
        Self {
            missions: DashMap::new(),
            persistence,
            events: None,
            thought_pad_capacity: THOUGHT_PAD_CAPACITY,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_thought_pad_capacity(mut self, capacity: usize) -> Self {
        self.thought_pad_capacity = capacity;
        self
    }

    /// Loads every non-terminal mission from storage into memory (startup).
    pub async fn restore(&self) -> Result<usize, ContextError> {
        let open = self.persistence.load_open_missions().await?;
        let count = open.len();
        for ctx in open {
            self.missions
                .insert(ctx.mission_id.clone(), Arc::new(Mutex::new(ctx)));
        }
        Ok(count)
    }

    /// Creates a mission in `pending` with empty log/notes/plan.
    pub async fn create_mission(
        &self,
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        user_request: impl Into<String>,
        tool_selection: ToolSelection,
        document_group_id: Option<String>,
        mission_settings: Option<MissionSettings>,
    ) -> Result<MissionContext, ContextError> {
        let mission_id = format!("mission_{}", uuid::Uuid::new_v4().simple());
        let mut ctx = MissionContext::new(mission_id.clone(), chat_id, user_id, user_request);
        ctx.metadata = MissionMetadata {
            tool_selection,
            document_group_id,
            mission_settings: mission_settings.unwrap_or_default(),
            initial_questions: None,
            final_questions: None,
        };
        self.persistence.save_context(&ctx).await?;
        self.missions
            .insert(mission_id, Arc::new(Mutex::new(ctx.clone())));
        Ok(ctx)
    }

    /// Snapshot of the mission context, safe to read without locking.
    pub async fn get(&self, mission_id: &str) -> Result<MissionContext, ContextError> {
        let entry = self.entry(mission_id)?;
        let guard = entry.lock().await;
        Ok(guard.clone())
    }

    /// Current status, or `NotFound`.
    pub async fn status(&self, mission_id: &str) -> Result<MissionStatus, ContextError> {
        Ok(self.get(mission_id).await?.status)
    }

    /// True while the mission should keep making progress.
    pub async fn should_continue(&self, mission_id: &str) -> bool {
        matches!(
            self.status(mission_id).await,
            Ok(MissionStatus::Running) | Ok(MissionStatus::Planning)
        )
    }

    pub async fn get_stats(&self, mission_id: &str) -> Result<MissionStats, ContextError> {
        Ok(self.get(mission_id).await?.stats)
    }

    /// Rejects illegal transitions per the lifecycle state machine.
    pub async fn update_status(
        &self,
        mission_id: &str,
        status: MissionStatus,
        error_info: Option<String>,
    ) -> Result<(), ContextError> {
        let mid = mission_id.to_string();
        let event = self
            .mutate(mission_id, move |ctx| {
                if !ctx.status.can_transition(status) {
                    return Err(ContextError::IllegalTransition {
                        mission_id: mid.clone(),
                        from: ctx.status.as_str().to_string(),
                        to: status.as_str().to_string(),
                    });
                }
                ctx.status = status;
                if error_info.is_some() {
                    ctx.error_info = error_info.clone();
                }
                Ok(MissionEvent::StatusChanged {
                    status: status.as_str().to_string(),
                    error_info: error_info.clone(),
                })
            })
            .await?;
        self.emit(mission_id, event).await;
        Ok(())
    }

    /// Appends a log entry; folds `model_details` into stats exactly once.
    pub async fn append_log(
        &self,
        mission_id: &str,
        entry: ExecutionLogEntry,
    ) -> Result<(), ContextError> {
        let persisted_entry = entry.clone();
        let stats_changed = entry.model_details.is_some();
        let event_value = serde_json::to_value(&entry).unwrap_or_default();
        let stats = self
            .mutate(mission_id, move |ctx| {
                if let Some(details) = &entry.model_details {
                    ctx.stats.absorb(details);
                }
                ctx.execution_log.push(entry);
                Ok(ctx.stats.clone())
            })
            .await?;
        // Log rows get their own table; failure here only warns, the entry is
        // already in the context blob.
        if let Err(e) = self
            .persistence
            .append_log_entry(mission_id, &persisted_entry)
            .await
        {
            tracing::warn!(mission = %mission_id, error = %e, "log row write failed");
        }
        self.emit(mission_id, MissionEvent::LogEntry { entry: event_value })
            .await;
        if stats_changed {
            self.emit(
                mission_id,
                MissionEvent::StatsUpdated {
                    stats: serde_json::to_value(&stats).unwrap_or_default(),
                },
            )
            .await;
        }
        Ok(())
    }

    /// Replaces the plan after validating outline invariants.
    pub async fn store_plan(
        &self,
        mission_id: &str,
        outline: Vec<ReportSection>,
    ) -> Result<(), ContextError> {
        validate_outline(&outline).map_err(ContextError::InvalidOutline)?;
        let event_value = serde_json::to_value(&outline).unwrap_or_default();
        self.mutate(mission_id, move |ctx| {
            ctx.plan = Some(outline);
            Ok(())
        })
        .await?;
        self.emit(
            mission_id,
            MissionEvent::PlanUpdated {
                outline: event_value,
            },
        )
        .await;
        Ok(())
    }

    /// Inserts or replaces a note by id.
    pub async fn upsert_note(&self, mission_id: &str, note: Note) -> Result<(), ContextError> {
        let count = self
            .mutate(mission_id, move |ctx| {
                match ctx.notes.iter_mut().find(|n| n.note_id == note.note_id) {
                    Some(existing) => *existing = note,
                    None => ctx.notes.push(note),
                }
                Ok(ctx.notes.len())
            })
            .await?;
        self.emit(mission_id, MissionEvent::NotesUpdated { note_count: count })
            .await;
        Ok(())
    }

    /// Marks notes discarded; they stay in the record but leave assignment.
    pub async fn discard_notes(
        &self,
        mission_id: &str,
        note_ids: &[String],
    ) -> Result<(), ContextError> {
        if note_ids.is_empty() {
            return Ok(());
        }
        let ids: std::collections::HashSet<String> = note_ids.iter().cloned().collect();
        let count = self
            .mutate(mission_id, move |ctx| {
                for note in ctx.notes.iter_mut() {
                    if ids.contains(&note.note_id) {
                        note.discarded = true;
                    }
                }
                Ok(ctx.notes.len())
            })
            .await?;
        self.emit(mission_id, MissionEvent::NotesUpdated { note_count: count })
            .await;
        Ok(())
    }

    /// Stores the latest draft for a section present in the plan.
    pub async fn set_section_content(
        &self,
        mission_id: &str,
        section_id: &str,
        markdown: impl Into<String>,
    ) -> Result<(), ContextError> {
        let sid = section_id.to_string();
        let markdown = markdown.into();
        self.mutate(mission_id, move |ctx| {
            let known = ctx
                .plan
                .as_deref()
                .map(|p| crate::schemas::find_section(p, &sid).is_some())
                .unwrap_or(false);
            if !known {
                return Err(ContextError::UnknownSection(sid.clone()));
            }
            ctx.report_content.insert(sid.clone(), markdown);
            Ok(())
        })
        .await?;
        self.emit(
            mission_id,
            MissionEvent::SectionUpdated {
                section_id: section_id.to_string(),
            },
        )
        .await;
        Ok(())
    }

    /// Rewrites a section's assigned note ids.
    pub async fn set_section_notes(
        &self,
        mission_id: &str,
        section_id: &str,
        note_ids: Vec<String>,
    ) -> Result<(), ContextError> {
        let sid = section_id.to_string();
        self.mutate(mission_id, move |ctx| {
            let plan = ctx
                .plan
                .as_mut()
                .ok_or_else(|| ContextError::UnknownSection(sid.clone()))?;
            fn set_in(
                sections: &mut [ReportSection],
                sid: &str,
                note_ids: &[String],
            ) -> bool {
                for s in sections {
                    if s.section_id == sid {
                        s.associated_note_ids = note_ids.to_vec();
                        return true;
                    }
                    if set_in(&mut s.subsections, sid, note_ids) {
                        return true;
                    }
                }
                false
            }
            if !set_in(plan, &sid, &note_ids) {
                return Err(ContextError::UnknownSection(sid.clone()));
            }
            Ok(())
        })
        .await
    }

    /// Adds an active goal; returns its id.
    pub async fn add_goal(
        &self,
        mission_id: &str,
        text: impl Into<String>,
        source_agent: impl Into<String>,
    ) -> Result<String, ContextError> {
        let goal = GoalEntry {
            goal_id: format!("goal_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            text: text.into(),
            status: GoalStatus::Active,
            source_agent: source_agent.into(),
            created_at: Utc::now(),
        };
        let goal_id = goal.goal_id.clone();
        self.mutate(mission_id, move |ctx| {
            ctx.goal_pad.push(goal);
            Ok(())
        })
        .await?;
        Ok(goal_id)
    }

    pub async fn update_goal_status(
        &self,
        mission_id: &str,
        goal_id: &str,
        status: GoalStatus,
    ) -> Result<(), ContextError> {
        let gid = goal_id.to_string();
        self.mutate(mission_id, move |ctx| {
            match ctx.goal_pad.iter_mut().find(|g| g.goal_id == gid) {
                Some(goal) => {
                    goal.status = status;
                    Ok(())
                }
                None => Err(ContextError::NotFound(format!("goal {}", gid))),
            }
        })
        .await
    }

    /// Appends a thought, evicting the oldest beyond capacity.
    pub async fn add_thought(
        &self,
        mission_id: &str,
        text: impl Into<String>,
        source_agent: impl Into<String>,
    ) -> Result<(), ContextError> {
        let thought = ThoughtEntry {
            thought_id: format!("thought_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            text: text.into(),
            source_agent: source_agent.into(),
            created_at: Utc::now(),
        };
        let capacity = self.thought_pad_capacity;
        self.mutate(mission_id, move |ctx| {
            ctx.thought_pad.push(thought);
            while ctx.thought_pad.len() > capacity {
                ctx.thought_pad.remove(0);
            }
            Ok(())
        })
        .await
    }

    /// Counts one retrieval call into the mission stats.
    pub async fn record_search_call(
        &self,
        mission_id: &str,
        web: bool,
    ) -> Result<(), ContextError> {
        let stats = self
            .mutate(mission_id, move |ctx| {
                if web {
                    ctx.stats.total_web_search_calls += 1;
                } else {
                    ctx.stats.total_doc_search_calls += 1;
                }
                Ok(ctx.stats.clone())
            })
            .await?;
        self.emit(
            mission_id,
            MissionEvent::StatsUpdated {
                stats: serde_json::to_value(&stats).unwrap_or_default(),
            },
        )
        .await;
        Ok(())
    }

    pub async fn update_scratchpad(
        &self,
        mission_id: &str,
        text: impl Into<String>,
    ) -> Result<(), ContextError> {
        let text = text.into();
        self.mutate(mission_id, move |ctx| {
            ctx.agent_scratchpad = Some(text);
            Ok(())
        })
        .await
    }

    /// Merges recognized metadata updates (initial/final questions, settings).
    pub async fn update_metadata<F>(&self, mission_id: &str, f: F) -> Result<(), ContextError>
    where
        F: FnOnce(&mut MissionMetadata) + Send,
    {
        self.mutate(mission_id, move |ctx| {
            f(&mut ctx.metadata);
            Ok(())
        })
        .await
    }

    /// Appends a report version (`version = max + 1`), atomically flipping
    /// `is_current`. Returns the new version number.
    pub async fn add_report_version(
        &self,
        mission_id: &str,
        title: impl Into<String>,
        content: impl Into<String>,
        revision_notes: Option<String>,
        make_current: bool,
    ) -> Result<u32, ContextError> {
        let existing = self.persistence.list_report_versions(mission_id).await?;
        let version = existing.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        let row = ResearchReportVersion {
            mission_id: mission_id.to_string(),
            version,
            title: title.into(),
            content: content.into(),
            revision_notes,
            is_current: make_current,
            created_at: Utc::now(),
        };
        self.persistence.insert_report_version(&row).await?;
        if make_current {
            self.mutate(mission_id, move |ctx| {
                ctx.current_report_version = Some(version);
                Ok(())
            })
            .await?;
        }
        self.emit(
            mission_id,
            MissionEvent::ReportVersionAdded {
                version,
                is_current: make_current,
            },
        )
        .await;
        Ok(version)
    }

    pub async fn set_current_report_version(
        &self,
        mission_id: &str,
        version: u32,
    ) -> Result<(), ContextError> {
        self.persistence
            .set_current_version(mission_id, version)
            .await?;
        self.mutate(mission_id, move |ctx| {
            ctx.current_report_version = Some(version);
            Ok(())
        })
        .await
    }

    pub async fn list_report_versions(
        &self,
        mission_id: &str,
    ) -> Result<Vec<ResearchReportVersion>, ContextError> {
        self.persistence.list_report_versions(mission_id).await
    }

    /// The version marked current, if any.
    pub async fn get_current_report(
        &self,
        mission_id: &str,
    ) -> Result<Option<ResearchReportVersion>, ContextError> {
        Ok(self
            .persistence
            .list_report_versions(mission_id)
            .await?
            .into_iter()
            .find(|v| v.is_current))
    }

    pub async fn get_logs(
        &self,
        mission_id: &str,
        since: Option<chrono::DateTime<Utc>>,
    ) -> Result<Vec<ExecutionLogEntry>, ContextError> {
        self.persistence.load_logs(mission_id, since).await
    }

    /// Mission ids currently held in memory.
    pub fn loaded_mission_ids(&self) -> Vec<String> {
        self.missions.iter().map(|e| e.key().clone()).collect()
    }

    pub(crate) fn persistence(&self) -> &Arc<dyn MissionPersistence> {
        &self.persistence
    }

    fn entry(&self, mission_id: &str) -> Result<Arc<Mutex<MissionContext>>, ContextError> {
        self.missions
            .get(mission_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ContextError::NotFound(mission_id.to_string()))
    }

    /// Applies one mutation under the per-mission lock, persisting in the same
    /// logical action. On persistence failure the in-memory state is restored.
    async fn mutate<T, F>(&self, mission_id: &str, f: F) -> Result<T, ContextError>
    where
        F: FnOnce(&mut MissionContext) -> Result<T, ContextError> + Send,
        T: Send,
    {
        let entry = self.entry(mission_id)?;
        let mut guard = entry.lock().await;
        let backup = guard.clone();
        let out = match f(&mut guard) {
            Ok(v) => v,
            Err(e) => {
                *guard = backup;
                return Err(e);
            }
        };
        let now = Utc::now();
        guard.updated_at = if now > guard.updated_at {
            now
        } else {
            guard.updated_at + chrono::Duration::milliseconds(1)
        };
        if let Err(e) = self.persistence.save_context(&guard).await {
            *guard = backup;
            return Err(e);
        }
        Ok(out)
    }

    async fn emit(&self, mission_id: &str, event: MissionEvent) {
        if let Some(events) = &self.events {
            events.emit(mission_id, event).await;
        }
    }
}
