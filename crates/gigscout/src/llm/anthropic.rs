use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::Error;
use crate::llm::LlmProvider;
use crate::llm::types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, RESPOND_TOOL_DESCRIPTION,
    RESPOND_TOOL_NAME, StopReason, TokenUsage, ToolChoice, WebSearchOptions,
};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const WEB_SEARCH_TOOL_TYPE: &str = "web_search_20250305";

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

impl LlmProvider for AnthropicProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        let body = build_request_body(&self.model, &request);

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = if status.as_u16() == 401 || status.as_u16() == 403 {
                format!("authentication failed (HTTP {})", status.as_u16())
            } else {
                response.text().await.unwrap_or_default()
            };
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        let raw: Value = response.json().await?;
        into_completion_response(raw)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

fn build_request_body(model: &str, request: &CompletionRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(message_to_anthropic).collect();

    let mut body = json!({
        "model": model,
        "max_tokens": request.max_tokens,
        "messages": messages,
    });

    if !request.system.is_empty() {
        body["system"] = Value::String(request.system.clone());
    }

    let mut tools: Vec<Value> = request
        .tools
        .iter()
        .map(|t| serde_json::to_value(t).unwrap_or_default())
        .collect();

    if let Some(options) = &request.web_search {
        tools.push(web_search_tool(options));
    }

    let mut tool_choice = request.tool_choice.clone();

    // Structured output is a synthetic tool whose input schema is the
    // requested format. A forced tool choice skips server-side search, so it
    // is only forced without web search.
    if let Some(format) = &request.response_format {
        tools.push(json!({
            "name": RESPOND_TOOL_NAME,
            "description": RESPOND_TOOL_DESCRIPTION,
            "input_schema": format.schema,
        }));
        if request.web_search.is_none() {
            tool_choice = Some(ToolChoice::Tool {
                name: RESPOND_TOOL_NAME.into(),
            });
        }
        let hint = format!(
            "Always finish by calling the `{RESPOND_TOOL_NAME}` tool with your answer."
        );
        body["system"] = match body.get("system").and_then(Value::as_str) {
            Some(system) => Value::String(format!("{system}\n\n{hint}")),
            None => Value::String(hint),
        };
    }

    if !tools.is_empty() {
        body["tools"] = Value::Array(tools);
    }

    if let Some(choice) = tool_choice {
        body["tool_choice"] = serde_json::to_value(choice).unwrap_or_default();
    }

    body
}

fn web_search_tool(options: &WebSearchOptions) -> Value {
    let mut tool = json!({
        "type": WEB_SEARCH_TOOL_TYPE,
        "name": "web_search",
    });
    if let Some(max_uses) = options.max_uses {
        tool["max_uses"] = json!(max_uses);
    }
    if !options.allowed_domains.is_empty() {
        tool["allowed_domains"] = json!(options.allowed_domains);
    }
    if let Some(location) = &options.user_location {
        let mut loc = serde_json::to_value(location).unwrap_or_else(|_| json!({}));
        loc["type"] = json!("approximate");
        tool["user_location"] = loc;
    }
    tool
}

fn message_to_anthropic(message: &Message) -> Value {
    let content: Vec<Value> = message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Image { media_type, data } => json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": media_type,
                    "data": data,
                }
            }),
            other => serde_json::to_value(other).unwrap_or_default(),
        })
        .collect();

    json!({
        "role": message.role,
        "content": content,
    })
}

// --- API response types ---

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ApiContentBlock>,
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// Server tool traffic (`server_tool_use`, `web_search_tool_result`)
    /// stays in the raw body only.
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

fn into_completion_response(raw: Value) -> Result<CompletionResponse, Error> {
    let api: ApiResponse = serde_json::from_value(raw.clone())?;

    let mut content = Vec::new();
    let mut respond_payload = None;
    for block in api.content {
        match block {
            ApiContentBlock::Text { text } => content.push(ContentBlock::Text { text }),
            ApiContentBlock::ToolUse { name, input, .. } if name == RESPOND_TOOL_NAME => {
                respond_payload = Some(input);
            }
            ApiContentBlock::ToolUse { id, name, input } => {
                content.push(ContentBlock::ToolUse { id, name, input })
            }
            ApiContentBlock::Other => {}
        }
    }

    // The structured payload is the whole reply; narration around it is dropped.
    let responded = respond_payload.is_some();
    if let Some(payload) = respond_payload {
        content = vec![ContentBlock::Text {
            text: payload.to_string(),
        }];
    }

    let stop_reason = match api.stop_reason.as_deref() {
        Some("tool_use") if !responded => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some(other) => {
            if !matches!(other, "end_turn" | "tool_use" | "stop_sequence") {
                debug!(stop_reason = other, "unmapped stop_reason, treating as end_turn");
            }
            StopReason::EndTurn
        }
        None => StopReason::EndTurn,
    };

    Ok(CompletionResponse {
        content,
        stop_reason,
        usage: TokenUsage {
            input_tokens: api.usage.input_tokens,
            output_tokens: api.usage.output_tokens,
        },
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{ResponseFormat, ToolDefinition, UserLocation};

    #[test]
    fn build_request_body_minimal() {
        let request = CompletionRequest {
            max_tokens: 1024,
            ..Default::default()
        };

        let body = build_request_body("claude-haiku-4-5", &request);
        assert_eq!(body["model"], "claude-haiku-4-5");
        assert_eq!(body["max_tokens"], 1024);
        assert!(body.get("system").is_none());
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn build_request_body_with_system_and_tools() {
        let request = CompletionRequest {
            system: "You are helpful.".into(),
            messages: vec![Message::user("hi")],
            tools: vec![ToolDefinition {
                name: "search".into(),
                description: "Search".into(),
                input_schema: json!({"type": "object"}),
            }],
            max_tokens: 2048,
            ..Default::default()
        };

        let body = build_request_body("m", &request);
        assert_eq!(body["system"], "You are helpful.");
        assert_eq!(body["tools"][0]["name"], "search");
        assert_eq!(body["messages"][0]["content"][0]["text"], "hi");
    }

    #[test]
    fn image_blocks_use_base64_source() {
        let request = CompletionRequest {
            messages: vec![Message::user_with_content(vec![
                ContentBlock::text("what is this"),
                ContentBlock::image("image/png", b"png-bytes"),
            ])],
            max_tokens: 100,
            ..Default::default()
        };

        let body = build_request_body("m", &request);
        let image = &body["messages"][0]["content"][1];
        assert_eq!(image["type"], "image");
        assert_eq!(image["source"]["type"], "base64");
        assert_eq!(image["source"]["media_type"], "image/png");
        assert!(image.get("data").is_none());
    }

    #[test]
    fn web_search_tool_carries_options() {
        let request = CompletionRequest {
            messages: vec![Message::user("Where is Crazy Town in Tampere located?")],
            max_tokens: 1024,
            web_search: Some(WebSearchOptions {
                max_uses: Some(5),
                allowed_domains: vec!["crazytown.fi".into(), "tampere.fi".into()],
                user_location: Some(UserLocation {
                    city: Some("Tampere".into()),
                    region: Some("Pirkanmaa".into()),
                    country: Some("FI".into()),
                    timezone: Some("Europe/Helsinki".into()),
                }),
            }),
            ..Default::default()
        };

        let body = build_request_body("m", &request);
        let tool = &body["tools"][0];
        assert_eq!(tool["type"], WEB_SEARCH_TOOL_TYPE);
        assert_eq!(tool["name"], "web_search");
        assert_eq!(tool["max_uses"], 5);
        assert_eq!(tool["allowed_domains"][1], "tampere.fi");
        assert_eq!(tool["user_location"]["type"], "approximate");
        assert_eq!(tool["user_location"]["timezone"], "Europe/Helsinki");
    }

    #[test]
    fn response_format_forces_respond_tool() {
        let request = CompletionRequest {
            messages: vec![Message::user("list movies")],
            max_tokens: 512,
            response_format: Some(ResponseFormat {
                name: "movie_list".into(),
                schema: json!({"type": "object"}),
            }),
            ..Default::default()
        };

        let body = build_request_body("m", &request);
        assert_eq!(body["tools"][0]["name"], RESPOND_TOOL_NAME);
        assert_eq!(body["tool_choice"]["type"], "tool");
        assert_eq!(body["tool_choice"]["name"], RESPOND_TOOL_NAME);
        assert!(body["system"].as_str().unwrap().contains(RESPOND_TOOL_NAME));
    }

    #[test]
    fn response_format_with_web_search_does_not_force() {
        let request = CompletionRequest {
            messages: vec![Message::user("band info")],
            max_tokens: 512,
            web_search: Some(WebSearchOptions::default()),
            response_format: Some(ResponseFormat {
                name: "band".into(),
                schema: json!({"type": "object"}),
            }),
            ..Default::default()
        };

        let body = build_request_body("m", &request);
        assert_eq!(body["tools"].as_array().unwrap().len(), 2);
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn response_maps_text_and_tool_use() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "tool_use", "id": "id1", "name": "tool1", "input": {}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 100, "output_tokens": 50}
        });

        let response = into_completion_response(raw.clone()).unwrap();
        assert_eq!(response.content.len(), 2);
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.usage.input_tokens, 100);
        assert_eq!(response.usage.output_tokens, 50);
        assert_eq!(response.raw, raw);
    }

    #[test]
    fn response_skips_server_tool_blocks() {
        let raw = json!({
            "content": [
                {"type": "server_tool_use", "id": "s1", "name": "web_search", "input": {"query": "crazy town"}},
                {"type": "web_search_tool_result", "tool_use_id": "s1", "content": []},
                {"type": "text", "text": "It is on Hämeenkatu.", "citations": []}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });

        let response = into_completion_response(raw).unwrap();
        assert_eq!(response.content.len(), 1);
        assert_eq!(response.text(), "It is on Hämeenkatu.");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
    }

    #[test]
    fn respond_tool_becomes_json_text() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "Here you go."},
                {"type": "tool_use", "id": "r1", "name": RESPOND_TOOL_NAME, "input": {"genre": "Metal", "country": "Finland"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        });

        let response = into_completion_response(raw).unwrap();
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert!(response.tool_calls().is_empty());
        let parsed: Value = serde_json::from_str(&response.text()).unwrap();
        assert_eq!(parsed["country"], "Finland");
    }

    #[test]
    fn respond_payload_wins_over_trailing_text() {
        let raw = json!({
            "content": [
                {"type": "server_tool_use", "id": "s1", "name": "web_search", "input": {"query": "Nightwish"}},
                {"type": "web_search_tool_result", "tool_use_id": "s1", "content": []},
                {"type": "tool_use", "id": "r1", "name": RESPOND_TOOL_NAME, "input": {"genre": "Symphonic metal", "country": "Finland"}},
                {"type": "text", "text": "Done."}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        });

        let response = into_completion_response(raw).unwrap();
        assert_eq!(response.content.len(), 1);
        let parsed: Value = serde_json::from_str(&response.text()).unwrap();
        assert_eq!(parsed["genre"], "Symphonic metal");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
    }

    #[test]
    fn max_tokens_stop_reason() {
        let raw = json!({
            "content": [{"type": "text", "text": "trunc"}],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        });
        let response = into_completion_response(raw).unwrap();
        assert_eq!(response.stop_reason, StopReason::MaxTokens);
    }
}
