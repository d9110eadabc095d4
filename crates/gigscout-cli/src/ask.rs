use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use gigscout::media::media_type_for;
use gigscout::{
    CompletionRequest, ContentBlock, GigscoutConfig, LlmProvider, Message, ResponseFormat,
    UserLocation, WebSearchOptions, parse_structured, provider_from_config,
};

#[derive(Args)]
pub struct AskArgs {
    /// Prompt text
    #[arg(required = true, trailing_var_arg = true)]
    prompt: Vec<String>,

    /// Model to use (default: provider.model)
    #[arg(long)]
    model: Option<String>,

    /// System instructions
    #[arg(long, default_value = "Be concise, reply with one sentence.")]
    system: String,

    /// Attach an image file
    #[arg(long)]
    image: Option<PathBuf>,

    /// Constrain the reply to the JSON Schema in this file
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Enable provider-side web search
    #[arg(long)]
    web_search: bool,

    /// Restrict web search to a domain (repeatable; implies --web-search)
    #[arg(long = "allowed-domain")]
    allowed_domains: Vec<String>,

    /// Maximum number of searches (implies --web-search)
    #[arg(long)]
    max_uses: Option<u32>,

    /// Approximate user city for web search
    #[arg(long)]
    city: Option<String>,

    /// Approximate user region for web search
    #[arg(long)]
    region: Option<String>,

    /// Approximate user country (ISO code) for web search
    #[arg(long)]
    country: Option<String>,

    /// User timezone (IANA) for web search
    #[arg(long)]
    timezone: Option<String>,

    #[arg(long, default_value_t = 4096)]
    max_tokens: u32,

    /// Print the raw provider response JSON
    #[arg(long)]
    raw: bool,
}

impl AskArgs {
    pub fn prompt_text(&self) -> String {
        self.prompt.join(" ")
    }

    fn user_location(&self) -> Option<UserLocation> {
        if self.city.is_none()
            && self.region.is_none()
            && self.country.is_none()
            && self.timezone.is_none()
        {
            return None;
        }
        Some(UserLocation {
            city: self.city.clone(),
            region: self.region.clone(),
            country: self.country.clone(),
            timezone: self.timezone.clone(),
        })
    }

    pub fn web_search_options(&self) -> Option<WebSearchOptions> {
        let user_location = self.user_location();
        let enabled = self.web_search
            || !self.allowed_domains.is_empty()
            || self.max_uses.is_some()
            || user_location.is_some();
        enabled.then(|| WebSearchOptions {
            max_uses: self.max_uses,
            allowed_domains: self.allowed_domains.clone(),
            user_location,
        })
    }
}

fn read_schema(path: &Path) -> Result<ResponseFormat> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let schema: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "response".into());
    Ok(ResponseFormat { name, schema })
}

pub async fn run(config: &GigscoutConfig, args: AskArgs) -> Result<()> {
    let model = args.model.as_deref().unwrap_or(&config.provider.model);
    let provider = provider_from_config(&config.provider, model)?;

    let mut content = vec![ContentBlock::text(args.prompt_text())];
    if let Some(path) = &args.image {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        content.push(ContentBlock::image(media_type_for(path), &bytes));
    }

    let response_format = args.schema.as_deref().map(read_schema).transpose()?;
    let request = CompletionRequest {
        system: args.system.clone(),
        messages: vec![Message::user_with_content(content)],
        max_tokens: args.max_tokens,
        web_search: args.web_search_options(),
        response_format: response_format.clone(),
        ..Default::default()
    };

    tracing::info!(provider = provider.name(), model, "sending request");
    let response = provider.complete(request).await?;

    if args.raw {
        println!("{}", serde_json::to_string_pretty(&response.raw)?);
    }
    match &response_format {
        Some(format) => {
            let value: Value = parse_structured(&response.text(), &format.schema)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        None => println!("{}", response.text()),
    }
    eprintln!(
        "\n---\nTokens used: {} in / {} out",
        response.usage.input_tokens, response.usage.output_tokens
    );
    Ok(())
}
