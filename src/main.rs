use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use code_slice::config::Config;
use code_slice::engine::Engine;
use code_slice::mcp_server::SliceMcpServer;
use code_slice::types::IndexPathRequest;

#[derive(Parser, Debug)]
#[command(name = "code-slice", version, about = "Hybrid code retrieval MCP server")]
struct Args {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Index this directory in the background on startup
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Watch the root for changes after the initial index
    #[arg(short, long, default_value_t = false)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the MCP protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CODE_SLICE_LOG")
                .unwrap_or_else(|_| EnvFilter::new("code_slice=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load_or_default(args.config.as_deref())?;
    let engine = Arc::new(Engine::new(config));

    if let Some(root) = args.root {
        let engine = engine.clone();
        let watch = args.watch;
        // Serve immediately; the initial index fills in behind the scenes
        tokio::spawn(async move {
            let request = IndexPathRequest {
                path: root.display().to_string(),
                force: false,
                recursive: true,
                enable_semantic: None,
                watch,
            };
            match engine.index_path(request).await {
                Ok(report) => tracing::info!(
                    "Initial index of {} complete: {} files, {} chunks",
                    report.root,
                    report.files_indexed,
                    report.chunks_created
                ),
                Err(e) => warn!("Initial index failed: {}", e),
            }
        });
    }

    SliceMcpServer::serve_stdio(engine).await
}
