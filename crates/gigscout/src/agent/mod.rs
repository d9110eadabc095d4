pub mod context;

use std::collections::HashMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Error;
use crate::llm::LlmProvider;
use crate::llm::types::{
    ContentBlock, Message, ResponseFormat, Role, StopReason, TokenUsage, ToolCall,
    ToolDefinition, ToolResult, WebSearchOptions,
};
use crate::tool::{Tool, ToolOutput, validate_tool_input};

use self::context::AgentContext;

/// Output of an agent run.
#[derive(Debug, Clone)]
pub struct AgentOutput {
    pub result: String,
    pub tool_calls_made: usize,
    pub tokens_used: TokenUsage,
}

/// Typed output of [`AgentRunner::execute_structured`].
#[derive(Debug, Clone)]
pub struct StructuredOutput<T> {
    pub value: T,
    pub tokens_used: TokenUsage,
}

/// Runs an agent loop: LLM call → tool execution → repeat until done.
pub struct AgentRunner<P: LlmProvider> {
    provider: Arc<P>,
    name: String,
    instructions: String,
    tools: HashMap<String, Arc<dyn Tool>>,
    tool_defs: Vec<ToolDefinition>,
    web_search: Option<WebSearchOptions>,
    max_turns: usize,
    max_tokens: u32,
}

impl<P: LlmProvider> AgentRunner<P> {
    pub fn builder(provider: Arc<P>) -> AgentRunnerBuilder<P> {
        AgentRunnerBuilder {
            provider,
            name: String::new(),
            instructions: String::new(),
            tools: Vec::new(),
            web_search: None,
            max_turns: 10,
            max_tokens: 4096,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn execute(&self, task: &str) -> Result<AgentOutput, Error> {
        self.execute_with_content(vec![ContentBlock::text(task)])
            .await
    }

    /// Run with arbitrary user content, e.g. text plus an image.
    pub async fn execute_with_content(
        &self,
        content: Vec<ContentBlock>,
    ) -> Result<AgentOutput, Error> {
        self.run(self.context(content)).await
    }

    /// Run and parse the final reply into `T`.
    ///
    /// `T`'s JSON Schema is sent as the response format. The reply must be
    /// a JSON document that validates against it; anything else is
    /// [`Error::StructuredOutput`].
    pub async fn execute_structured<T>(
        &self,
        content: Vec<ContentBlock>,
    ) -> Result<StructuredOutput<T>, Error>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = json_schema_for::<T>();
        let format = ResponseFormat {
            name: schema_name::<T>(),
            schema: schema.clone(),
        };
        let ctx = self.context(content).with_response_format(format);
        let output = self.run(ctx).await?;
        let value = parse_structured(&output.result, &schema)?;
        Ok(StructuredOutput {
            value,
            tokens_used: output.tokens_used,
        })
    }

    fn context(&self, content: Vec<ContentBlock>) -> AgentContext {
        AgentContext::new(&self.instructions, content, self.tool_defs.clone())
            .with_max_turns(self.max_turns)
            .with_max_tokens(self.max_tokens)
            .with_web_search(self.web_search.clone())
    }

    async fn run(&self, mut ctx: AgentContext) -> Result<AgentOutput, Error> {
        let mut total_tool_calls = 0usize;
        let mut total_usage = TokenUsage::default();

        loop {
            if ctx.current_turn() >= ctx.max_turns() {
                return Err(Error::MaxTurnsExceeded(ctx.max_turns()));
            }

            ctx.increment_turn();
            debug!(agent = %self.name, turn = ctx.current_turn(), "executing turn");
            let response = self.provider.complete(ctx.to_request()).await?;
            total_usage += response.usage;

            let tool_calls = response.tool_calls();

            ctx.add_assistant_message(Message {
                role: Role::Assistant,
                content: response.content,
            });

            if tool_calls.is_empty() {
                if response.stop_reason == StopReason::MaxTokens {
                    return Err(Error::Truncated);
                }

                debug!(
                    agent = %self.name,
                    tool_calls = total_tool_calls,
                    input_tokens = total_usage.input_tokens,
                    output_tokens = total_usage.output_tokens,
                    "agent finished"
                );
                return Ok(AgentOutput {
                    result: ctx.last_assistant_text().unwrap_or_default(),
                    tool_calls_made: total_tool_calls,
                    tokens_used: total_usage,
                });
            }

            total_tool_calls += tool_calls.len();
            let results = self.execute_tools_parallel(&tool_calls).await;
            ctx.add_tool_results(results);
        }
    }

    /// Execute tools in parallel via JoinSet, returning results in original call order.
    async fn execute_tools_parallel(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut join_set = tokio::task::JoinSet::new();

        for (idx, call) in calls.iter().enumerate() {
            let tool = self.tools.get(&call.name).cloned();
            let input = call.input.clone();
            let call_id = call.id.clone();
            let call_name = call.name.clone();

            join_set.spawn(async move {
                let output = match tool {
                    Some(t) => match validate_tool_input(&t.definition().input_schema, &input) {
                        Ok(()) => t.execute(input).await,
                        Err(msg) => Ok(ToolOutput::error(msg)),
                    },
                    None => Ok(ToolOutput::error(format!("Tool not found: {call_name}"))),
                };
                (idx, call_id, output)
            });
        }

        let mut results: Vec<(usize, ToolResult)> = Vec::with_capacity(calls.len());
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok((idx, call_id, Ok(output))) => {
                    results.push((idx, tool_output_to_result(call_id, output)));
                }
                Ok((idx, call_id, Err(e))) => {
                    results.push((idx, ToolResult::error(call_id, e.to_string())));
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "tool task panicked");
                }
            }
        }

        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, r)| r).collect()
    }
}

fn tool_output_to_result(tool_use_id: String, output: ToolOutput) -> ToolResult {
    if output.is_error {
        ToolResult::error(tool_use_id, output.content)
    } else {
        ToolResult::success(tool_use_id, output.content)
    }
}

/// JSON Schema for `T` with every `$ref` resolved in place and the
/// `definitions` table removed.
pub fn json_schema_for<T: JsonSchema>() -> Value {
    let root = schemars::schema_for!(T);
    let mut schema = serde_json::to_value(root).unwrap_or_else(|_| Value::Object(Map::new()));
    let definitions = schema
        .as_object_mut()
        .and_then(|obj| obj.remove("definitions"));
    if let Some(Value::Object(defs)) = definitions {
        inline_refs(&mut schema, &defs);
    }
    schema
}

fn inline_refs(value: &mut Value, defs: &Map<String, Value>) {
    let replacement = match value {
        Value::Object(obj) => obj
            .get("$ref")
            .and_then(Value::as_str)
            .and_then(|r| r.strip_prefix("#/definitions/"))
            .and_then(|name| defs.get(name))
            .cloned(),
        _ => None,
    };
    if let Some(mut def) = replacement {
        inline_refs(&mut def, defs);
        *value = def;
        return;
    }
    match value {
        Value::Object(obj) => obj.values_mut().for_each(|v| inline_refs(v, defs)),
        Value::Array(items) => items.iter_mut().for_each(|v| inline_refs(v, defs)),
        _ => {}
    }
}

/// Schema name restricted to `[A-Za-z0-9_-]`.
fn schema_name<T: JsonSchema>() -> String {
    T::schema_name()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Parse a model reply into `T`, validating it against `schema` first.
///
/// Tolerates a surrounding Markdown code fence.
pub fn parse_structured<T: DeserializeOwned>(text: &str, schema: &Value) -> Result<T, Error> {
    let body = strip_code_fence(text.trim());
    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::StructuredOutput(format!("reply is not JSON: {e}")))?;
    validate_tool_input(schema, &value).map_err(Error::StructuredOutput)?;
    serde_json::from_value(value).map_err(|e| Error::StructuredOutput(e.to_string()))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub struct AgentRunnerBuilder<P: LlmProvider> {
    provider: Arc<P>,
    name: String,
    instructions: String,
    tools: Vec<Arc<dyn Tool>>,
    web_search: Option<WebSearchOptions>,
    max_turns: usize,
    max_tokens: u32,
}

impl<P: LlmProvider> AgentRunnerBuilder<P> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// System prompt for every run.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Enable provider-side web search.
    pub fn web_search(mut self, options: WebSearchOptions) -> Self {
        self.web_search = Some(options);
        self
    }

    pub fn max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn build(self) -> AgentRunner<P> {
        let tool_defs: Vec<ToolDefinition> = self.tools.iter().map(|t| t.definition()).collect();
        let tools: HashMap<String, Arc<dyn Tool>> = self
            .tools
            .into_iter()
            .map(|t| (t.definition().name, t))
            .collect();

        AgentRunner {
            provider: self.provider,
            name: self.name,
            instructions: self.instructions,
            tools,
            tool_defs,
            web_search: self.web_search,
            max_turns: self.max_turns,
            max_tokens: self.max_tokens,
        }
    }
}
