//! Tool system: typed registry plus the retrieval tools the research agents
//! call (document search, web search, web fetch, calculator).

mod calculator;
mod document_search;
mod query_analyzer;
mod registry;
mod r#trait;
mod web_fetch;
mod web_search;

pub use calculator::{CalculatorTool, TOOL_CALCULATE};
pub use document_search::{
    ChunkHit, DocSearchFilters, DocumentSearchTool, DocumentSearcher, InMemoryDocumentIndex,
    TOOL_DOCUMENT_SEARCH,
};
pub use query_analyzer::{analyze_query, QueryAnalysis, SearchDepth};
pub use registry::ToolRegistry;
pub use r#trait::{Tool, ToolCallContext, ToolOutput, ToolSpec};
pub use web_fetch::{FetchBackend, FetchedPage, WebFetchTool, TOOL_WEB_FETCH};
pub use web_search::{
    HttpSearchProvider, StaticSearchProvider, WebResult, WebSearchParams, WebSearchProvider,
    WebSearchTool, TOOL_WEB_SEARCH,
};
