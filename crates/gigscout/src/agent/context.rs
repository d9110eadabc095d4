use crate::llm::types::{
    CompletionRequest, ContentBlock, Message, ResponseFormat, Role, ToolDefinition, ToolResult,
    WebSearchOptions,
};

/// Conversation context for an agent run.
pub struct AgentContext {
    system: String,
    messages: Vec<Message>,
    tools: Vec<ToolDefinition>,
    max_turns: usize,
    max_tokens: u32,
    current_turn: usize,
    web_search: Option<WebSearchOptions>,
    response_format: Option<ResponseFormat>,
}

impl AgentContext {
    pub fn new(
        system: impl Into<String>,
        content: Vec<ContentBlock>,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            system: system.into(),
            messages: vec![Message::user_with_content(content)],
            tools,
            max_turns: 10,
            max_tokens: 4096,
            current_turn: 0,
            web_search: None,
            response_format: None,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_web_search(mut self, web_search: Option<WebSearchOptions>) -> Self {
        self.web_search = web_search;
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn current_turn(&self) -> usize {
        self.current_turn
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn increment_turn(&mut self) {
        self.current_turn += 1;
    }

    pub fn add_assistant_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn add_tool_results(&mut self, results: Vec<ToolResult>) {
        self.messages.push(Message::tool_results(results));
    }

    /// Text of the most recent assistant message, if any.
    pub fn last_assistant_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| {
                m.content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect()
            })
    }

    pub fn to_request(&self) -> CompletionRequest {
        CompletionRequest {
            system: self.system.clone(),
            messages: self.messages.clone(),
            tools: self.tools.clone(),
            max_tokens: self.max_tokens,
            tool_choice: None,
            web_search: self.web_search.clone(),
            response_format: self.response_format.clone(),
        }
    }
}
