//! # Maestro
//!
//! Mission execution core of a multi-agent research assistant. A mission
//! takes a research request through analysis, planning, iterative retrieval
//! and note-taking, reflection, writing passes, and citation processing,
//! while staying pausable, resumable, stoppable, and observable.
//!
//! ## Main modules
//!
//! - [`context`]: [`ContextStore`] — typed per-mission state, SQLite
//!   persistence, event emission. The single owner of every mutation.
//! - [`lifecycle`]: [`LifecycleManager`], [`ControlHandle`] — cooperative
//!   pause/resume/stop via cancellation token + resume notify.
//! - [`controller`]: [`Controller`] — the phase sequencer owning the mission
//!   run loop and the mission control API.
//! - [`agents`]: messenger, planner, research, reflection, note assignment,
//!   writer, citation processing.
//! - [`dispatch`]: [`ModelDispatcher`] — tier routing, global rate limiting,
//!   retries, schema-constrained JSON with repair.
//! - [`llm`]: [`LlmClient`] trait, OpenAI-compatible client, [`MockLlm`].
//! - [`tools`]: [`Tool`] trait + registry; document search, web search with
//!   query analysis, cached web fetch, calculator.
//! - [`governor`]: process-wide LLM semaphore, web-fetch semaphore,
//!   per-mission fan-out semaphores.
//! - [`bus`]: [`RealtimeBus`] — per-connection queues, dedup window, fan-out
//!   by mission/user/session topic.
//! - [`monitor`]: [`ConsistencyMonitor`] — periodic reconciliation sweep.
//! - [`schemas`]: the typed data model and structured LLM output shapes.
//! - [`error`]: the error taxonomy shared by all of the above.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use maestro::{
//!     Controller, ContextStore, LifecycleManager, MemoryPersistence, MockLlm,
//!     ModelDispatcher, RealtimeBus, ToolRegistry, ToolSelection,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = RealtimeBus::new();
//! let store = Arc::new(
//!     ContextStore::new(Arc::new(MemoryPersistence::new())).with_events(bus.clone()),
//! );
//! let lifecycle = Arc::new(LifecycleManager::new(store.clone()));
//! let dispatcher = Arc::new(ModelDispatcher::with_client_for_all(Arc::new(
//!     MockLlm::new("{}"),
//! )));
//! let controller = Controller::new(
//!     store,
//!     dispatcher,
//!     Arc::new(ToolRegistry::new()),
//!     lifecycle,
//!     Some(bus),
//! );
//! let mission_id = controller
//!     .create_and_start_mission("user-1", "chat-1", "Summarize the CAP theorem",
//!         ToolSelection::default(), None, None)
//!     .await
//!     .unwrap();
//! println!("started {}", mission_id);
//! # }
//! ```

pub mod agents;
pub mod bus;
pub mod context;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod governor;
pub mod lifecycle;
pub mod llm;
pub mod monitor;
pub mod schemas;
pub mod tools;

pub use bus::{ConnectionType, EventSink, RealtimeBus};
pub use context::{ContextStore, MemoryPersistence, MissionPersistence, SqlitePersistence};
pub use controller::{assemble_report, writing_order, Controller};
pub use dispatch::{parse_structured, ModelDispatcher, ModelTier};
pub use error::{BusError, ContextError, DispatchError, ErrorKind, RunError, ToolError};
pub use lifecycle::{ControlHandle, LifecycleManager};
pub use llm::{
    CompletionOptions, LlmClient, LlmCompletion, LlmError, LlmUsage, Message, MockLlm,
    OpenAiCompatClient,
};
pub use monitor::{ConsistencyMonitor, Discrepancy};
pub use schemas::{
    ExecutionLogEntry, GoalEntry, GoalStatus, LogStatus, MissionContext, MissionSettings,
    MissionStats, MissionStatus, ModelCallDetails, Note, NoteAssignments, ReflectionOutput,
    ReportSection, RequestAnalysis, ResearchReportVersion, ResearchStrategy, SourceType,
    ThoughtEntry, ToolSelection,
};
pub use tools::{
    CalculatorTool, ChunkHit, DocSearchFilters, DocumentSearchTool, DocumentSearcher,
    FetchedPage, HttpSearchProvider, InMemoryDocumentIndex, StaticSearchProvider, Tool,
    ToolCallContext, ToolRegistry, ToolSpec, WebFetchTool, WebResult, WebSearchProvider,
    WebSearchTool,
};
