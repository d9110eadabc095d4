pub mod anthropic;
pub mod openai;
pub mod types;

use std::future::Future;
use std::pin::Pin;

use crate::config::ProviderConfig;
use crate::error::Error;
use crate::llm::anthropic::AnthropicProvider;
use crate::llm::openai::OpenAiProvider;
use crate::llm::types::{CompletionRequest, CompletionResponse};

/// Trait for LLM providers.
///
/// Implementors must be thread-safe (`Send + Sync`) to allow
/// shared usage across concurrent agent tasks.
pub trait LlmProvider: Send + Sync {
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> impl Future<Output = Result<CompletionResponse, Error>> + Send;

    /// Short provider name for logs.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Object-safe mirror of [`LlmProvider`], so providers chosen at runtime
/// can live behind a `Box<dyn _>`.
pub trait DynLlmProvider: Send + Sync {
    fn complete_dyn(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, Error>> + Send + '_>>;

    fn name_dyn(&self) -> &str;
}

impl<P: LlmProvider> DynLlmProvider for P {
    fn complete_dyn(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, Error>> + Send + '_>> {
        Box::pin(self.complete(request))
    }

    fn name_dyn(&self) -> &str {
        self.name()
    }
}

/// A type-erased provider that still implements [`LlmProvider`].
pub struct BoxedProvider(Box<dyn DynLlmProvider>);

impl BoxedProvider {
    pub fn new<P: LlmProvider + 'static>(provider: P) -> Self {
        Self(Box::new(provider))
    }
}

impl LlmProvider for BoxedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        self.0.complete_dyn(request).await
    }

    fn name(&self) -> &str {
        self.0.name_dyn()
    }
}

/// Build the provider named in `config`, talking to `model`.
///
/// The API key is read from the environment variable named by
/// `config.api_key_env` (or the provider's conventional variable).
/// A missing key fails immediately.
pub fn provider_from_config(config: &ProviderConfig, model: &str) -> Result<BoxedProvider, Error> {
    let key_var = config.api_key_var();
    let api_key = std::env::var(&key_var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("{key_var} not set; check the .env file.")))?;

    match config.name.as_str() {
        "anthropic" => Ok(BoxedProvider::new(AnthropicProvider::new(api_key, model))),
        "openai" => {
            let provider = match &config.base_url {
                Some(url) => OpenAiProvider::with_base_url(api_key, model, url),
                None => OpenAiProvider::new(api_key, model),
            };
            Ok(BoxedProvider::new(provider))
        }
        other => Err(Error::Config(format!(
            "unknown provider '{other}': must be anthropic or openai"
        ))),
    }
}
