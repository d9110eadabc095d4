use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::error::Error;
use crate::llm::LlmProvider;
use crate::llm::types::{
    CompletionRequest, CompletionResponse, ContentBlock, ResponseFormat, Role, StopReason,
    TokenUsage, ToolChoice, ToolDefinition, WebSearchOptions,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI provider. Plain requests go to Chat Completions; requests with web
/// search go to the Responses API, where search is a hosted tool.
///
/// Any endpoint speaking the same wire format works through
/// [`OpenAiProvider::with_base_url`].
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl AsRef<str>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn responses_endpoint(&self) -> String {
        format!("{}/responses", self.base_url)
    }

    async fn post(&self, url: String, body: &Value) -> Result<Value, Error> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // Auth failures may echo key fragments; don't surface the body.
            let message = if status.as_u16() == 401 || status.as_u16() == 403 {
                format!("authentication failed (HTTP {})", status.as_u16())
            } else {
                response
                    .text()
                    .await
                    .unwrap_or_else(|e| format!("<body read error: {e}>"))
            };
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

impl LlmProvider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        // Chat Completions only searches on dedicated search models. The
        // Responses API offers search as a tool on any model.
        if request.web_search.is_some() {
            let body = build_responses_request(&self.model, &request)?;
            let raw = self.post(self.responses_endpoint(), &body).await?;
            return into_responses_completion(raw);
        }

        let body = build_openai_request(&self.model, &request)?;
        let raw = self.post(self.endpoint(), &body).await?;
        into_completion_response(raw)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// --- Request building: our types → OpenAI format ---

fn build_openai_request(model: &str, request: &CompletionRequest) -> Result<Value, Error> {
    let mut messages = Vec::new();

    if !request.system.is_empty() {
        messages.push(json!({
            "role": "system",
            "content": request.system,
        }));
    }

    for msg in &request.messages {
        match msg.role {
            Role::User => push_user_message(&mut messages, &msg.content),
            Role::Assistant => messages.push(assistant_message(&msg.content)?),
        }
    }

    // Newer chat models reject `max_tokens` in favour of this field.
    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_completion_tokens": request.max_tokens,
    });

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request.tools.iter().map(tool_to_openai).collect();
        body["tools"] = Value::Array(tools);
    }

    if let Some(choice) = &request.tool_choice {
        body["tool_choice"] = match choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Any => json!("required"),
            ToolChoice::Tool { name } => json!({
                "type": "function",
                "function": { "name": name },
            }),
        };
    }

    if let Some(format) = &request.response_format {
        body["response_format"] = response_format(format);
    }

    Ok(body)
}

fn push_user_message(messages: &mut Vec<Value>, content: &[ContentBlock]) {
    let mut parts = Vec::new();
    let mut has_image = false;

    for block in content {
        match block {
            ContentBlock::Text { text } => parts.push(json!({"type": "text", "text": text})),
            ContentBlock::Image { media_type, data } => {
                has_image = true;
                parts.push(json!({
                    "type": "image_url",
                    "image_url": { "url": format!("data:{media_type};base64,{data}") },
                }));
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                // OpenAI format has no is_error field; prefix content
                // so the LLM sees the error context.
                let content = if *is_error {
                    format!("[ERROR] {content}")
                } else {
                    content.clone()
                };
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                }));
            }
            ContentBlock::ToolUse { .. } => {}
        }
    }

    if has_image {
        messages.push(json!({"role": "user", "content": parts}));
    } else if !parts.is_empty() {
        let text: Vec<&str> = parts.iter().filter_map(|p| p["text"].as_str()).collect();
        messages.push(json!({"role": "user", "content": text.join("\n\n")}));
    } else if !content
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
    {
        messages.push(json!({"role": "user", "content": ""}));
    }
}

fn assistant_message(content: &[ContentBlock]) -> Result<Value, Error> {
    let text: String = content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    let mut tool_calls = Vec::new();
    for block in content {
        if let ContentBlock::ToolUse { id, name, input } = block {
            tool_calls.push(json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": name,
                    "arguments": serde_json::to_string(input)?,
                }
            }));
        }
    }

    let mut msg = json!({"role": "assistant"});
    msg["content"] = if text.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    };
    if !tool_calls.is_empty() {
        msg["tool_calls"] = Value::Array(tool_calls);
    }
    Ok(msg)
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

fn response_format(format: &ResponseFormat) -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": format.name,
            "schema": strict_schema(format),
            "strict": true,
        }
    })
}

fn strict_schema(format: &ResponseFormat) -> Value {
    let mut schema = format.schema.clone();
    make_strict(&mut schema);
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
    }
    schema
}

/// Strict mode wants every object closed and every property listed as
/// required. Optional fields stay expressible through a `null` type.
fn make_strict(schema: &mut Value) {
    match schema {
        Value::Object(obj) => {
            if let Some(Value::Object(props)) = obj.get("properties") {
                let names: Vec<Value> = props.keys().cloned().map(Value::String).collect();
                obj.insert("required".into(), Value::Array(names));
                obj.insert("additionalProperties".into(), Value::Bool(false));
            }
            for value in obj.values_mut() {
                make_strict(value);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(make_strict),
        _ => {}
    }
}

// --- Response parsing: OpenAI format → our types ---

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Deserialize)]
struct OpenAiFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

fn into_completion_response(raw: Value) -> Result<CompletionResponse, Error> {
    let api: OpenAiResponse = serde_json::from_value(raw.clone())?;
    let choice = api.choices.into_iter().next().ok_or_else(|| Error::Api {
        status: 0,
        message: "empty choices array in response".into(),
    })?;

    if let Some(refusal) = choice.message.refusal.filter(|r| !r.is_empty()) {
        return Err(Error::Agent(format!("model refused: {refusal}")));
    }

    let mut content = Vec::new();

    if let Some(text) = choice.message.content
        && !text.is_empty()
    {
        content.push(ContentBlock::Text { text });
    }

    if let Some(tool_calls) = choice.message.tool_calls {
        for tc in tool_calls {
            let input = tool_arguments(&tc.function.name, &tc.function.arguments);
            content.push(ContentBlock::ToolUse {
                id: tc.id,
                name: tc.function.name,
                input,
            });
        }
    }

    let stop_reason = match choice.finish_reason.as_deref() {
        Some("stop") => StopReason::EndTurn,
        Some("tool_calls") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        Some(other) => {
            warn!(
                finish_reason = other,
                "unknown finish_reason, treating as EndTurn"
            );
            StopReason::EndTurn
        }
        None => StopReason::EndTurn,
    };

    let usage = api.usage.map_or(TokenUsage::default(), |u| TokenUsage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });

    Ok(CompletionResponse {
        content,
        stop_reason,
        usage,
        raw,
    })
}

fn tool_arguments(tool: &str, arguments: &str) -> Value {
    if arguments.is_empty() {
        return json!({});
    }
    serde_json::from_str(arguments).unwrap_or_else(|e| {
        warn!(
            tool,
            error = %e,
            "malformed tool arguments JSON, defaulting to empty object"
        );
        json!({})
    })
}

// --- Responses API: requests that need web search ---

fn build_responses_request(model: &str, request: &CompletionRequest) -> Result<Value, Error> {
    let mut input = Vec::new();
    for msg in &request.messages {
        match msg.role {
            Role::User => push_responses_user(&mut input, &msg.content),
            Role::Assistant => push_responses_assistant(&mut input, &msg.content)?,
        }
    }

    let mut body = json!({
        "model": model,
        "input": input,
        "max_output_tokens": request.max_tokens,
    });

    if !request.system.is_empty() {
        body["instructions"] = json!(request.system);
    }

    let mut tools = Vec::new();
    if let Some(options) = &request.web_search {
        tools.push(web_search_tool(options)?);
        // The Responses API caps built-in tool calls per response, not per tool.
        if let Some(max_uses) = options.max_uses {
            body["max_tool_calls"] = json!(max_uses);
        }
    }
    tools.extend(request.tools.iter().map(|tool| {
        json!({
            "type": "function",
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
            "strict": false,
        })
    }));
    body["tools"] = Value::Array(tools);

    if let Some(choice) = &request.tool_choice {
        body["tool_choice"] = match choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Any => json!("required"),
            ToolChoice::Tool { name } => json!({"type": "function", "name": name}),
        };
    }

    if let Some(format) = &request.response_format {
        body["text"] = json!({
            "format": {
                "type": "json_schema",
                "name": format.name,
                "schema": strict_schema(format),
                "strict": true,
            }
        });
    }

    Ok(body)
}

fn web_search_tool(options: &WebSearchOptions) -> Result<Value, Error> {
    let mut tool = json!({"type": "web_search"});
    if !options.allowed_domains.is_empty() {
        tool["filters"] = json!({ "allowed_domains": options.allowed_domains });
    }
    if let Some(location) = &options.user_location {
        let mut value = serde_json::to_value(location)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("type".into(), json!("approximate"));
        }
        tool["user_location"] = value;
    }
    Ok(tool)
}

fn push_responses_user(input: &mut Vec<Value>, content: &[ContentBlock]) {
    let mut parts = Vec::new();
    for block in content {
        match block {
            ContentBlock::Text { text } => {
                parts.push(json!({"type": "input_text", "text": text}));
            }
            ContentBlock::Image { media_type, data } => parts.push(json!({
                "type": "input_image",
                "image_url": format!("data:{media_type};base64,{data}"),
            })),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let output = if *is_error {
                    format!("[ERROR] {content}")
                } else {
                    content.clone()
                };
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": tool_use_id,
                    "output": output,
                }));
            }
            ContentBlock::ToolUse { .. } => {}
        }
    }
    if !parts.is_empty() {
        input.push(json!({"role": "user", "content": parts}));
    }
}

fn push_responses_assistant(
    input: &mut Vec<Value>,
    content: &[ContentBlock],
) -> Result<(), Error> {
    for block in content {
        match block {
            ContentBlock::Text { text } => {
                input.push(json!({"role": "assistant", "content": text}));
            }
            ContentBlock::ToolUse {
                id,
                name,
                input: arguments,
            } => input.push(json!({
                "type": "function_call",
                "call_id": id,
                "name": name,
                "arguments": serde_json::to_string(arguments)?,
            })),
            _ => {}
        }
    }
    Ok(())
}

#[derive(Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<ResponsesItem>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponsesItem {
    Message {
        #[serde(default)]
        content: Vec<ResponsesContent>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    /// `web_search_call`, `reasoning` and anything newer.
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponsesContent {
    OutputText { text: String },
    Refusal { refusal: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct IncompleteDetails {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponsesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

fn into_responses_completion(raw: Value) -> Result<CompletionResponse, Error> {
    let api: ResponsesResponse = serde_json::from_value(raw.clone())?;

    let mut content = Vec::new();
    for item in api.output {
        match item {
            ResponsesItem::Message { content: parts } => {
                for part in parts {
                    match part {
                        ResponsesContent::OutputText { text } if !text.is_empty() => {
                            content.push(ContentBlock::Text { text });
                        }
                        ResponsesContent::Refusal { refusal } => {
                            return Err(Error::Agent(format!("model refused: {refusal}")));
                        }
                        _ => {}
                    }
                }
            }
            ResponsesItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                let input = tool_arguments(&name, &arguments);
                content.push(ContentBlock::ToolUse {
                    id: call_id,
                    name,
                    input,
                });
            }
            ResponsesItem::Other => {}
        }
    }

    let truncated = api.status.as_deref() == Some("incomplete")
        && api
            .incomplete_details
            .and_then(|d| d.reason)
            .is_some_and(|r| r == "max_output_tokens");
    let stop_reason = if content
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    {
        StopReason::ToolUse
    } else if truncated {
        StopReason::MaxTokens
    } else {
        StopReason::EndTurn
    };

    let usage = api.usage.map_or(TokenUsage::default(), |u| TokenUsage {
        input_tokens: u.input_tokens,
        output_tokens: u.output_tokens,
    });

    Ok(CompletionResponse {
        content,
        stop_reason,
        usage,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{Message, UserLocation};

    #[test]
    fn build_request_minimal() {
        let request = CompletionRequest {
            messages: vec![Message::user("hello")],
            max_tokens: 1024,
            ..Default::default()
        };

        let body = build_openai_request("gpt-5.2", &request).unwrap();
        assert_eq!(body["model"], "gpt-5.2");
        assert_eq!(body["max_completion_tokens"], 1024);

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "hello");
        assert!(body.get("response_format").is_none());
        assert!(body.get("web_search_options").is_none());
    }

    #[test]
    fn build_request_with_system() {
        let request = CompletionRequest {
            system: "You are helpful.".into(),
            messages: vec![Message::user("hi")],
            max_tokens: 1024,
            ..Default::default()
        };

        let body = build_openai_request("model", &request).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "You are helpful.");
        assert_eq!(messages[1]["role"], "user");
    }

    #[test]
    fn build_request_with_image_uses_content_parts() {
        let request = CompletionRequest {
            messages: vec![Message::user_with_content(vec![
                ContentBlock::text("Extract all concert information from this image."),
                ContentBlock::image("image/png", b"abc"),
            ])],
            max_tokens: 1024,
            ..Default::default()
        };

        let body = build_openai_request("model", &request).unwrap();
        let parts = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,YWJj");
    }

    #[test]
    fn build_request_with_tools_and_choice() {
        let request = CompletionRequest {
            messages: vec![Message::user("search")],
            tools: vec![ToolDefinition {
                name: "search".into(),
                description: "Search the web".into(),
                input_schema: json!({"type": "object", "properties": {"q": {"type": "string"}}}),
            }],
            tool_choice: Some(ToolChoice::Any),
            max_tokens: 1024,
            ..Default::default()
        };

        let body = build_openai_request("model", &request).unwrap();
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["name"], "search");
        assert_eq!(body["tool_choice"], "required");
    }

    #[test]
    fn build_request_assistant_tool_calls_and_results() {
        let request = CompletionRequest {
            messages: vec![
                Message::user("search for rust"),
                Message {
                    role: Role::Assistant,
                    content: vec![
                        ContentBlock::text("Let me search."),
                        ContentBlock::ToolUse {
                            id: "call-1".into(),
                            name: "search".into(),
                            input: json!({"q": "rust"}),
                        },
                    ],
                },
                Message::tool_results(vec![crate::llm::types::ToolResult::error(
                    "call-1", "timeout",
                )]),
            ],
            max_tokens: 1024,
            ..Default::default()
        };

        let body = build_openai_request("model", &request).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"], "Let me search.");
        let args = messages[1]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        assert_eq!(serde_json::from_str::<Value>(args).unwrap(), json!({"q": "rust"}));
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call-1");
        assert_eq!(messages[2]["content"], "[ERROR] timeout");
    }

    fn enrichment_request(web_search: WebSearchOptions) -> CompletionRequest {
        CompletionRequest {
            system: "Find the genre and country of origin for the band.".into(),
            messages: vec![Message::user("Nightwish")],
            max_tokens: 256,
            web_search: Some(web_search),
            response_format: Some(ResponseFormat {
                name: "band_enrichment".into(),
                schema: json!({
                    "type": "object",
                    "properties": {
                        "genre": {"type": "string"},
                        "country": {"type": "string"}
                    }
                }),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn chat_request_never_carries_search_options() {
        let request = enrichment_request(WebSearchOptions::default());
        let body = build_openai_request("gpt-5.2", &request).unwrap();
        assert!(body.get("web_search_options").is_none());
    }

    #[test]
    fn responses_request_maps_domains_and_max_uses() {
        let request = enrichment_request(WebSearchOptions {
            max_uses: Some(3),
            allowed_domains: vec!["metal-archives.com".into()],
            user_location: None,
        });

        let body = build_responses_request("gpt-5.2", &request).unwrap();
        assert_eq!(body["model"], "gpt-5.2");
        assert_eq!(body["max_output_tokens"], 256);
        assert_eq!(body["max_tool_calls"], 3);
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"], "web_search");
        assert_eq!(
            tools[0]["filters"]["allowed_domains"],
            json!(["metal-archives.com"])
        );
        assert!(tools[0].get("user_location").is_none());
    }

    #[test]
    fn responses_request_without_limits_is_plain_search() {
        let request = enrichment_request(WebSearchOptions::default());
        let body = build_responses_request("gpt-5.2", &request).unwrap();
        assert!(body.get("max_tool_calls").is_none());
        assert_eq!(body["tools"], json!([{"type": "web_search"}]));
    }

    #[test]
    fn responses_request_user_location() {
        let request = enrichment_request(WebSearchOptions {
            user_location: Some(UserLocation {
                city: Some("Tampere".into()),
                country: Some("FI".into()),
                ..Default::default()
            }),
            ..Default::default()
        });

        let body = build_responses_request("gpt-5.2", &request).unwrap();
        let location = &body["tools"][0]["user_location"];
        assert_eq!(location["type"], "approximate");
        assert_eq!(location["city"], "Tampere");
        assert_eq!(location["country"], "FI");
        assert!(location.get("region").is_none());
    }

    #[test]
    fn responses_request_instructions_input_and_format() {
        let mut request = enrichment_request(WebSearchOptions::default());
        request.messages = vec![Message::user_with_content(vec![
            ContentBlock::text("Who is on this poster?"),
            ContentBlock::image("image/png", b"abc"),
        ])];

        let body = build_responses_request("gpt-5.2", &request).unwrap();
        assert_eq!(
            body["instructions"],
            "Find the genre and country of origin for the band."
        );
        let parts = body["input"][0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "input_text");
        assert_eq!(parts[1]["type"], "input_image");
        assert_eq!(parts[1]["image_url"], "data:image/png;base64,YWJj");

        let format = &body["text"]["format"];
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["name"], "band_enrichment");
        assert_eq!(format["strict"], true);
        let required = format["schema"]["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
        assert!(required.contains(&json!("genre")));
        assert_eq!(format["schema"]["additionalProperties"], false);
    }

    #[test]
    fn responses_request_function_tools_and_history() {
        let mut request = enrichment_request(WebSearchOptions::default());
        request.response_format = None;
        request.tools = vec![ToolDefinition {
            name: "list_all_bands".into(),
            description: "Get a list of all unique band names".into(),
            input_schema: json!({"type": "object", "properties": {}}),
        }];
        request.tool_choice = Some(ToolChoice::Tool {
            name: "list_all_bands".into(),
        });
        request.messages.push(Message {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: "call-1".into(),
                name: "list_all_bands".into(),
                input: json!({}),
            }],
        });
        request
            .messages
            .push(Message::tool_results(vec![crate::llm::types::ToolResult::error(
                "call-1", "boom",
            )]));

        let body = build_responses_request("gpt-5.2", &request).unwrap();
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[1]["type"], "function");
        assert_eq!(tools[1]["name"], "list_all_bands");
        assert_eq!(
            body["tool_choice"],
            json!({"type": "function", "name": "list_all_bands"})
        );

        let input = body["input"].as_array().unwrap();
        assert_eq!(input.len(), 3);
        assert_eq!(input[1]["type"], "function_call");
        assert_eq!(input[1]["call_id"], "call-1");
        assert_eq!(input[2]["type"], "function_call_output");
        assert_eq!(input[2]["output"], "[ERROR] boom");
    }

    #[test]
    fn parse_responses_search_then_message() {
        let raw = json!({
            "status": "completed",
            "output": [
                {"type": "web_search_call", "id": "ws_1", "status": "completed"},
                {
                    "type": "message",
                    "id": "msg_1",
                    "role": "assistant",
                    "content": [{
                        "type": "output_text",
                        "text": "{\"genre\":\"Symphonic metal\",\"country\":\"Finland\"}",
                        "annotations": []
                    }]
                }
            ],
            "usage": {"input_tokens": 30, "output_tokens": 12}
        });

        let response = into_responses_completion(raw.clone()).unwrap();
        assert_eq!(
            response.text(),
            r#"{"genre":"Symphonic metal","country":"Finland"}"#
        );
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 30);
        assert_eq!(response.usage.output_tokens, 12);
        assert_eq!(response.raw, raw);
    }

    #[test]
    fn parse_responses_function_call() {
        let raw = json!({
            "status": "completed",
            "output": [{
                "type": "function_call",
                "call_id": "call-7",
                "name": "bands_by_genre",
                "arguments": "{\"genre\":\"metal\"}"
            }]
        });

        let response = into_responses_completion(raw).unwrap();
        let calls = response.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call-7");
        assert_eq!(calls[0].input, json!({"genre": "metal"}));
        assert_eq!(response.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn parse_responses_incomplete_is_max_tokens() {
        let raw = json!({
            "status": "incomplete",
            "incomplete_details": {"reason": "max_output_tokens"},
            "output": [{
                "type": "message",
                "content": [{"type": "output_text", "text": "cut"}]
            }]
        });
        let response = into_responses_completion(raw).unwrap();
        assert_eq!(response.stop_reason, StopReason::MaxTokens);
    }

    #[test]
    fn parse_responses_refusal_is_error() {
        let raw = json!({
            "status": "completed",
            "output": [{
                "type": "message",
                "content": [{"type": "refusal", "refusal": "No."}]
            }]
        });
        let err = into_responses_completion(raw).unwrap_err();
        assert!(matches!(err, Error::Agent(_)));
    }

    #[test]
    fn response_format_is_strict_json_schema() {
        let request = CompletionRequest {
            messages: vec![Message::user("movies")],
            max_tokens: 256,
            response_format: Some(ResponseFormat {
                name: "movie_list".into(),
                schema: json!({
                    "$schema": "http://json-schema.org/draft-07/schema#",
                    "type": "object",
                    "properties": {
                        "movies": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "title": {"type": "string"},
                                    "year": {"type": ["integer", "null"]}
                                },
                                "required": ["title"]
                            }
                        }
                    }
                }),
            }),
            ..Default::default()
        };

        let body = build_openai_request("model", &request).unwrap();
        let format = &body["response_format"];
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], "movie_list");
        assert_eq!(format["json_schema"]["strict"], true);
        let schema = &format["json_schema"]["schema"];
        assert!(schema.get("$schema").is_none());
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["required"], json!(["movies"]));
        let item = &schema["properties"]["movies"]["items"];
        assert_eq!(item["additionalProperties"], false);
        assert_eq!(item["required"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn parse_text_response_keeps_raw() {
        let raw = json!({
            "choices": [{
                "message": {"content": "Hello!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        });

        let response = into_completion_response(raw.clone()).unwrap();
        assert_eq!(response.text(), "Hello!");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 10);
        assert_eq!(response.usage.output_tokens, 5);
        assert_eq!(response.raw, raw);
    }

    #[test]
    fn parse_tool_call_response() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call-1",
                        "type": "function",
                        "function": {"name": "list_all_bands", "arguments": ""}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });

        let response = into_completion_response(raw).unwrap();
        let calls = response.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "list_all_bands");
        assert_eq!(calls[0].input, json!({}));
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.usage, TokenUsage::default());
    }

    #[test]
    fn parse_length_finish_reason() {
        let raw = json!({
            "choices": [{"message": {"content": "cut"}, "finish_reason": "length"}]
        });
        let response = into_completion_response(raw).unwrap();
        assert_eq!(response.stop_reason, StopReason::MaxTokens);
    }

    #[test]
    fn parse_empty_choices_is_error() {
        let err = into_completion_response(json!({"choices": []})).unwrap_err();
        assert!(err.to_string().contains("empty choices"));
    }

    #[test]
    fn parse_refusal_is_error() {
        let raw = json!({
            "choices": [{
                "message": {"content": null, "refusal": "I can't help with that."},
                "finish_reason": "stop"
            }]
        });
        let err = into_completion_response(raw).unwrap_err();
        assert!(matches!(err, Error::Agent(_)));
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let provider = OpenAiProvider::with_base_url("k", "m", "http://localhost:8080/v1/");
        assert_eq!(provider.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(
            provider.responses_endpoint(),
            "http://localhost:8080/v1/responses"
        );
    }
}
