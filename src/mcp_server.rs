use std::sync::Arc;

use anyhow::Result;
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler, ServiceExt,
    handler::server::{router::prompt::PromptRouter, tool::ToolRouter, wrapper::Parameters},
    service::RequestContext,
    model::*,
    prompt, prompt_handler, prompt_router, tool, tool_handler, tool_router,
};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::types::*;

#[derive(Clone)]
pub struct SliceMcpServer {
    engine: Arc<Engine>,
    tool_router: ToolRouter<Self>,
    prompt_router: PromptRouter<Self>,
}

impl SliceMcpServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            tool_router: Self::tool_router(),
            prompt_router: Self::prompt_router(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("Serialization failed: {}", e))
}

/// Caller mistakes go back quietly; engine-side failures are also logged
fn tool_error(e: EngineError) -> String {
    if !e.is_user_error() {
        tracing::error!("Tool call failed: {}", e);
    }
    e.to_string()
}

#[tool_router(router = tool_router)]
impl SliceMcpServer {
    #[tool(
        description = "Index a directory tree for retrieval. Unchanged files are skipped by content signature; pass force=true to re-chunk everything, recursive=false to stay at the top level, enable_semantic to toggle the semantic channel, watch=true to keep the index live."
    )]
    async fn index_path(
        &self,
        Parameters(req): Parameters<IndexPathRequest>,
    ) -> Result<String, String> {
        let report = self
            .engine
            .index_path(req)
            .await
            .map_err(tool_error)?;
        to_json(&report)
    }

    #[tool(
        description = "Search indexed code with hybrid BM25 + semantic ranking. Results carry per-channel scores and a query-focused summary."
    )]
    async fn search_code(
        &self,
        Parameters(req): Parameters<SearchCodeRequest>,
    ) -> Result<String, String> {
        let response = self.engine.search(req).await.map_err(tool_error)?;
        to_json(&response)
    }

    #[tool(
        description = "Assemble a token-budgeted context pack of the most relevant code for a task description."
    )]
    async fn context_pack(
        &self,
        Parameters(req): Parameters<ContextPackRequest>,
    ) -> Result<String, String> {
        let response = self
            .engine
            .context_pack(req)
            .await
            .map_err(tool_error)?;
        to_json(&response)
    }

    #[tool(
        description = "Re-index the currently bound root, or control the incremental watcher with action=start|stop|status. A no-op with an explanatory message when nothing has been indexed yet."
    )]
    async fn auto_index(
        &self,
        Parameters(req): Parameters<AutoIndexRequest>,
    ) -> Result<String, String> {
        let response = self
            .engine
            .auto_index(req)
            .await
            .map_err(tool_error)?;
        to_json(&response)
    }

    #[tool(
        description = "Engine statistics: indexed files and chunks, embedding coverage, watcher state, and cache counters."
    )]
    async fn get_stats(
        &self,
        Parameters(_req): Parameters<StatsRequest>,
    ) -> Result<String, String> {
        let stats = self.engine.stats().await.map_err(tool_error)?;
        to_json(&stats)
    }

    #[tool(description = "Per-namespace cache statistics (entries, hits, misses, evictions).")]
    async fn cache_stats(
        &self,
        Parameters(req): Parameters<CacheStatsRequest>,
    ) -> Result<String, String> {
        let response = self.engine.cache_stats(req).map_err(tool_error)?;
        to_json(&response)
    }

    #[tool(
        description = "Clear one cache namespace or all of them; returns the counter values from before the reset."
    )]
    async fn cache_clear(
        &self,
        Parameters(req): Parameters<CacheClearRequest>,
    ) -> Result<String, String> {
        let response = self.engine.cache_clear(req).map_err(tool_error)?;
        to_json(&response)
    }

    #[tool(
        description = "Record a session summary (what was done, what comes next) so a later session can resume."
    )]
    async fn record_session(
        &self,
        Parameters(req): Parameters<RecordSessionRequest>,
    ) -> Result<String, String> {
        let record = self.engine.record_session(req).map_err(tool_error)?;
        to_json(&record)
    }

    #[tool(
        description = "Resume context for the current root: last recorded session summary, open TODO/FIXME markers, and recent commits."
    )]
    async fn resume(&self, Parameters(req): Parameters<ResumeRequest>) -> Result<String, String> {
        let response = self.engine.resume(req).await.map_err(tool_error)?;
        to_json(&response)
    }
}

// Prompts for slash commands
#[prompt_router]
impl SliceMcpServer {
    #[prompt(
        name = "index",
        description = "Index a directory so its code becomes searchable"
    )]
    async fn index_prompt(
        &self,
        Parameters(args): Parameters<serde_json::Value>,
    ) -> Result<Vec<PromptMessage>, McpError> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        Ok(vec![PromptMessage::new_text(
            PromptMessageRole::User,
            format!(
                "Please index the directory '{}' with the index_path tool, then report how many files and chunks were indexed.",
                path
            ),
        )])
    }

    #[prompt(name = "search", description = "Search the indexed code")]
    async fn search_prompt(
        &self,
        Parameters(args): Parameters<serde_json::Value>,
    ) -> Result<Vec<PromptMessage>, McpError> {
        let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("");
        Ok(vec![PromptMessage::new_text(
            PromptMessageRole::User,
            format!("Please search the indexed code for: {}", query),
        )])
    }

    #[prompt(
        name = "pack",
        description = "Build a token-budgeted context pack for a task"
    )]
    async fn pack_prompt(
        &self,
        Parameters(args): Parameters<serde_json::Value>,
    ) -> Result<Vec<PromptMessage>, McpError> {
        let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("");
        Ok(vec![PromptMessage::new_text(
            PromptMessageRole::User,
            format!(
                "Please build a context pack for the task: {}. Use the context_pack tool and show the packed sections.",
                query
            ),
        )])
    }

    #[prompt(
        name = "resume",
        description = "Pick up where the last session left off"
    )]
    async fn resume_prompt(&self) -> Vec<PromptMessage> {
        vec![PromptMessage::new_text(
            PromptMessageRole::User,
            "Please call the resume tool and summarize the last session, open TODOs, and recent commits.",
        )]
    }
}

#[tool_handler(router = self.tool_router)]
#[prompt_handler]
impl ServerHandler for SliceMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_prompts()
                .build(),
            server_info: Implementation {
                name: "code-slice".into(),
                title: Some("code-slice - Hybrid Code Retrieval".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Hybrid code retrieval over a local index. \
                Use index_path to make a tree searchable, search_code for ranked hits, \
                context_pack for a token-budgeted selection, and resume to pick up \
                prior session context."
                    .into(),
            ),
        }
    }
}

impl SliceMcpServer {
    /// Serve the engine over stdio until the client disconnects
    pub async fn serve_stdio(engine: Arc<Engine>) -> Result<()> {
        tracing::info!("Starting code-slice MCP server");

        let server = Self::new(engine.clone());
        let transport = rmcp::transport::io::stdio();
        server.serve(transport).await?.waiting().await?;

        engine.shutdown().await;
        Ok(())
    }
}
