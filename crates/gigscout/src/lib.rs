pub mod agent;
pub mod concert;
pub mod config;
pub mod error;
pub mod llm;
pub mod mcp_server;
pub mod media;
pub mod pipeline;
pub mod query;
pub mod repl;
pub mod sink;
pub mod tool;
pub mod watch;

pub use agent::{AgentOutput, AgentRunner, StructuredOutput, json_schema_for, parse_structured};
pub use concert::{
    BandEnrichment, BandInfo, CSV_HEADER, Concert, ConcertExtraction, ConcertRow,
    EnrichedBandInfo, EnrichedConcertExtraction, aggregate_by_band, dedupe_bands,
};
pub use config::{
    EnrichmentConfig, ExtractionConfig, GigscoutConfig, PipelineConfig, ProviderConfig,
    QueryConfig,
};
pub use error::Error;
pub use llm::anthropic::AnthropicProvider;
pub use llm::openai::OpenAiProvider;
pub use llm::types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, ResponseFormat, Role,
    StopReason, TokenUsage, ToolCall, ToolChoice, ToolDefinition, ToolResult, UserLocation,
    WebSearchOptions,
};
pub use llm::{BoxedProvider, DynLlmProvider, LlmProvider, provider_from_config};
pub use mcp_server::McpServer;
pub use pipeline::{
    AgentExtractor, BandEnricher, ConcertExtractor, ConcertPipeline, ProcessedImage,
    WebSearchEnricher,
};
pub use query::{ConcertTable, query_tools, render_for_prompt};
pub use repl::run_repl;
pub use sink::CsvSink;
pub use tool::mcp::McpClient;
pub use tool::{Tool, ToolOutput, validate_tool_input};
pub use watch::FolderWatcher;
