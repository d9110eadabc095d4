use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tokio::io::BufReader;

use gigscout::query::{TOOL_INSTRUCTIONS, embedded_prompt};
use gigscout::{
    AgentRunner, GigscoutConfig, McpClient, McpServer, provider_from_config, query_tools,
    render_for_prompt, run_repl,
};

const SERVER_NAME: &str = "CSV Query Server";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QueryMode {
    /// Whole CSV in the system prompt
    Embed,
    /// Query tools served by a `gigscout serve-mcp` child process
    Mcp,
}

pub async fn run(config: &GigscoutConfig, mode: QueryMode, csv: Option<PathBuf>) -> Result<()> {
    let csv = csv.unwrap_or_else(|| config.query.csv_file.clone());
    let provider = Arc::new(provider_from_config(&config.provider, config.query_model())?);
    let builder = AgentRunner::builder(provider)
        .name("query")
        .max_turns(config.query.max_turns)
        .max_tokens(config.query.max_tokens);

    let agent = match mode {
        QueryMode::Embed => {
            let data = render_for_prompt(&csv)
                .with_context(|| format!("failed to load {}", csv.display()))?;
            println!("Query Agent of custom dataset");
            println!("Loaded data from: {}", csv.display());
            println!("Ask questions about the concert data. Type 'q' to exit.");
            builder.instructions(embedded_prompt(&data)).build()
        }
        QueryMode::Mcp => {
            let exe = std::env::current_exe().context("failed to locate the gigscout binary")?;
            let args = vec![
                "serve-mcp".to_string(),
                "--csv".to_string(),
                csv.display().to_string(),
            ];
            let client = McpClient::connect_stdio(&exe.to_string_lossy(), &args, &HashMap::new())
                .await
                .context("failed to start the MCP query server")?;
            tracing::info!(
                tools = client.tool_definitions().len(),
                "connected to MCP query server"
            );
            println!("MCP Query Agent - Token-Efficient CSV Queries");
            println!("Using MCP server for on-demand data retrieval");
            println!("Ask questions about the concert data. Type 'q' to exit.\n");
            builder
                .instructions(TOOL_INSTRUCTIONS)
                .tools(client.into_tools())
                .build()
        }
    };

    let input = BufReader::new(tokio::io::stdin());
    let mut output = tokio::io::stdout();
    tokio::select! {
        result = run_repl(&agent, input, &mut output) => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("\nGoodbye!");
            // A pending stdin read cannot be cancelled and would block runtime shutdown.
            std::process::exit(0);
        }
    }
    Ok(())
}

pub async fn serve_mcp(config: &GigscoutConfig, csv: Option<PathBuf>) -> Result<()> {
    let csv = csv.unwrap_or_else(|| config.query.csv_file.clone());
    tracing::info!(csv = %csv.display(), "serving CSV query tools");
    McpServer::new(SERVER_NAME, query_tools(csv))
        .serve_stdio()
        .await?;
    Ok(())
}
