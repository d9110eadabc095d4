//! MCP client against the in-process CSV query server over an in-memory
//! byte stream, and an agent driving those tools with a scripted model.

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use gigscout::{
    AgentRunner, CSV_HEADER, CompletionRequest, CompletionResponse, ContentBlock, Error,
    LlmProvider, McpClient, McpServer, StopReason, TokenUsage, query_tools,
};

fn write_csv(path: &Path) {
    let body = format!(
        "{}\n\
         2025-01-01T10:00:00,tuska.png,Nightwish,Symphonic Metal,Finland,Kaisaniemi,Helsinki,2025-06-27,Tuska\n\
         2025-01-01T10:00:00,tuska.png,Ghost,Heavy Metal,Sweden,Kaisaniemi,Helsinki,2025-06-28,Tuska\n\
         2025-01-02T09:00:00,club.jpg,Kent,Alternative Rock,Sweden,Nosturi,Helsinki,2025-09-01,\n",
        CSV_HEADER.join(",")
    );
    std::fs::write(path, body).unwrap();
}

/// Start a server on one end of a duplex stream and connect a client to
/// the other.
async fn connect(csv: &Path) -> McpClient {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = McpServer::new("CSV Query Server", query_tools(csv));
    tokio::spawn(async move {
        let (reader, writer) = tokio::io::split(server_io);
        server.serve(reader, writer).await
    });

    let (reader, writer) = tokio::io::split(client_io);
    McpClient::connect_streams(reader, writer).await.unwrap()
}

#[tokio::test]
async fn client_discovers_all_query_tools() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("concerts.csv");
    write_csv(&csv);

    let client = connect(&csv).await;
    let mut names: Vec<String> = client
        .tool_definitions()
        .into_iter()
        .map(|d| d.name)
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "count_bands_by_genre",
            "get_band_details",
            "get_bands_by_country",
            "get_bands_by_genre",
            "get_total_records",
            "list_all_bands",
            "list_all_countries",
            "list_all_genres",
            "search_records",
        ]
    );
}

#[tokio::test]
async fn remote_tools_answer_from_csv() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("concerts.csv");
    write_csv(&csv);

    let tools = connect(&csv).await.into_tools();
    let tool = |name: &str| {
        tools
            .iter()
            .find(|t| t.definition().name == name)
            .cloned()
            .unwrap()
    };

    let out = tool("list_all_countries").execute(json!({})).await.unwrap();
    assert!(!out.is_error);
    assert_eq!(out.content, "Countries:\nSweden: 2\nFinland: 1");

    let out = tool("get_band_details")
        .execute(json!({"band_name": "ghost"}))
        .await
        .unwrap();
    assert_eq!(
        out.content,
        "- Ghost: Heavy Metal from Sweden, playing at Kaisaniemi, Helsinki on 2025-06-28"
    );

    let out = tool("search_records")
        .execute(json!({"search_term": "tuska"}))
        .await
        .unwrap();
    assert_eq!(
        out.content,
        "Found 2 record(s) containing 'tuska':\n\
         - Nightwish: Symphonic Metal (Finland)\n\
         - Ghost: Heavy Metal (Sweden)"
    );

    let out = tool("get_bands_by_genre").execute(json!({})).await.unwrap();
    assert!(out.is_error);
}

/// First turn calls a tool, second turn answers with text.
struct ToolThenAnswer {
    requests: Mutex<Vec<CompletionRequest>>,
}

impl LlmProvider for ToolThenAnswer {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        let turn = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let usage = TokenUsage {
            input_tokens: 50,
            output_tokens: 10,
        };
        let response = if turn == 1 {
            CompletionResponse {
                content: vec![ContentBlock::ToolUse {
                    id: "call_1".into(),
                    name: "count_bands_by_genre".into(),
                    input: json!({"genre": "metal"}),
                }],
                stop_reason: StopReason::ToolUse,
                usage,
                raw: Value::Null,
            }
        } else {
            CompletionResponse {
                content: vec![ContentBlock::text("There are 2 metal bands.")],
                stop_reason: StopReason::EndTurn,
                usage,
                raw: Value::Null,
            }
        };
        Ok(response)
    }
}

#[tokio::test]
async fn agent_uses_remote_tools() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("concerts.csv");
    write_csv(&csv);

    let provider = Arc::new(ToolThenAnswer {
        requests: Mutex::new(Vec::new()),
    });
    let agent = AgentRunner::builder(Arc::clone(&provider))
        .name("query")
        .instructions(gigscout::query::TOOL_INSTRUCTIONS)
        .tools(connect(&csv).await.into_tools())
        .build();

    let output = agent.execute("How many metal bands are there?").await.unwrap();
    assert_eq!(output.result, "There are 2 metal bands.");
    assert_eq!(output.tool_calls_made, 1);
    assert_eq!(output.tokens_used.input_tokens, 100);

    let requests = provider.requests.lock().unwrap();
    assert_eq!(requests[0].tools.len(), 9);
    let tool_result = requests[1]
        .messages
        .last()
        .and_then(|m| m.content.first())
        .cloned()
        .unwrap();
    match tool_result {
        ContentBlock::ToolResult {
            content, is_error, ..
        } => {
            assert_eq!(content, "Number of metal bands: 2");
            assert!(!is_error);
        }
        other => panic!("expected tool result, got {other:?}"),
    }
}
