use std::env;
use std::time::{Duration, Instant};

use pulse_common::{ModelConfig, ModelProvider};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{CompletionClient, CompletionError, CompletionRequest, Role};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const JSON_ONLY_INSTRUCTION: &str =
    "Respond with a single JSON object and nothing else. Do not wrap it in markdown.";

#[derive(Debug, Clone)]
pub struct HttpCompletionClient {
    client: Client,
    provider: ModelProvider,
    endpoint: String,
    model_id: String,
    api_key: Option<String>,
    default_max_output_tokens: u32,
}

impl HttpCompletionClient {
    pub fn from_config(config: &ModelConfig) -> Result<Self, CompletionError> {
        let key_env = config
            .api_key_env
            .as_deref()
            .or_else(|| config.provider.default_api_key_env());
        let api_key = match key_env {
            Some(name) => Some(env::var(name).map_err(|_| {
                CompletionError::Config(format!(
                    "environment variable {name} is not set for provider {}",
                    config.provider.as_str()
                ))
            })?),
            None => None,
        };
        Self::new(config, api_key)
    }

    pub fn new(config: &ModelConfig, api_key: Option<String>) -> Result<Self, CompletionError> {
        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        if api_key.is_none() && !matches!(config.provider, ModelProvider::Ollama) {
            return Err(CompletionError::Config(format!(
                "provider {} requires an API key",
                config.provider.as_str()
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        // Covers connect and body read.
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .default_headers(headers)
            .build()
            .map_err(|err| {
                CompletionError::Config(format!("failed to build HTTP client: {err}"))
            })?;

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| config.provider.default_endpoint().to_string());

        Ok(Self {
            client,
            provider: config.provider.clone(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model_id: config.model_id.clone(),
            api_key,
            default_max_output_tokens: config.max_output_tokens,
        })
    }

    pub fn provider(&self) -> &ModelProvider {
        &self.provider
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    fn complete_gemini(
        &self,
        request: &CompletionRequest,
        model: &str,
    ) -> Result<String, CompletionError> {
        let mut contents = Vec::new();
        let mut system = Vec::new();
        for message in &request.messages {
            match message.role {
                Role::System => system.push(json!({ "text": message.content })),
                Role::User => contents.push(json!({
                    "role": "user",
                    "parts": [{ "text": message.content }]
                })),
                Role::Assistant => contents.push(json!({
                    "role": "model",
                    "parts": [{ "text": message.content }]
                })),
            }
        }

        let mut generation = json!({ "maxOutputTokens": self.max_tokens(request) });
        if request.structured {
            generation["responseMimeType"] = json!("application/json");
        }
        let mut body = json!({ "contents": contents, "generationConfig": generation });
        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": system });
        }

        let builder = self
            .client
            .post(format!("{}/models/{model}:generateContent", self.endpoint))
            .header("x-goog-api-key", self.key())
            .json(&body);
        let parsed: GeminiResponse = self.send(builder)?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();
        non_empty(text)
    }

    fn complete_openai(
        &self,
        request: &CompletionRequest,
        model: &str,
    ) -> Result<String, CompletionError> {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|message| json!({ "role": message.role.as_str(), "content": message.content }))
            .collect();
        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": self.max_tokens(request),
        });
        if request.structured {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let builder = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header(AUTHORIZATION, format!("Bearer {}", self.key()))
            .json(&body);
        let parsed: OpenAiResponse = self.send(builder)?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        non_empty(text)
    }

    fn complete_anthropic(
        &self,
        request: &CompletionRequest,
        model: &str,
    ) -> Result<String, CompletionError> {
        let mut system: Vec<&str> = request
            .messages
            .iter()
            .filter(|message| message.role == Role::System)
            .map(|message| message.content.as_str())
            .collect();
        // No native JSON mode; steer through the system prompt instead.
        if request.structured {
            system.push(JSON_ONLY_INSTRUCTION);
        }
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|message| message.role != Role::System)
            .map(|message| json!({ "role": message.role.as_str(), "content": message.content }))
            .collect();
        let mut body = json!({
            "model": model,
            "max_tokens": self.max_tokens(request),
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }

        let builder = self
            .client
            .post(format!("{}/messages", self.endpoint))
            .header("x-api-key", self.key())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let parsed: AnthropicResponse = self.send(builder)?;
        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<String>();
        non_empty(text)
    }

    fn complete_ollama(
        &self,
        request: &CompletionRequest,
        model: &str,
    ) -> Result<String, CompletionError> {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|message| json!({ "role": message.role.as_str(), "content": message.content }))
            .collect();
        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": { "num_predict": self.max_tokens(request) },
        });
        if request.structured {
            body["format"] = json!("json");
        }

        let builder = self
            .client
            .post(format!("{}/api/chat", self.endpoint))
            .json(&body);
        let parsed: OllamaResponse = self.send(builder)?;
        non_empty(parsed.message.content)
    }

    fn max_tokens(&self, request: &CompletionRequest) -> u32 {
        request
            .max_output_tokens
            .unwrap_or(self.default_max_output_tokens)
    }

    fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, CompletionError> {
        let started = Instant::now();
        let response = builder.send().map_err(|err| {
            if err.is_timeout() {
                CompletionError::Timeout
            } else {
                CompletionError::Transport(err.to_string())
            }
        })?;
        info!(
            provider = self.provider.as_str(),
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completion response received"
        );
        let response = check_status(response)?;
        response
            .json::<T>()
            .map_err(|err| CompletionError::Content(format!("unexpected response body: {err}")))
    }
}

impl CompletionClient for HttpCompletionClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        if request.messages.is_empty() {
            return Err(CompletionError::Config(
                "completion request has no messages".to_string(),
            ));
        }
        let model = request.model.as_deref().unwrap_or(self.model_id.as_str());
        debug!(
            provider = self.provider.as_str(),
            model,
            messages = request.messages.len(),
            structured = request.structured,
            "sending completion request"
        );
        match self.provider {
            ModelProvider::Gemini => self.complete_gemini(request, model),
            ModelProvider::OpenAi => self.complete_openai(request, model),
            ModelProvider::Anthropic => self.complete_anthropic(request, model),
            ModelProvider::Ollama => self.complete_ollama(request, model),
        }
    }
}

fn check_status(response: Response) -> Result<Response, CompletionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CompletionError::Unauthorized(body),
        StatusCode::TOO_MANY_REQUESTS => CompletionError::RateLimited,
        _ => CompletionError::Status {
            status: status.as_u16(),
            body,
        },
    })
}

fn non_empty(text: String) -> Result<String, CompletionError> {
    if text.trim().is_empty() {
        return Err(CompletionError::Content(
            "provider returned an empty completion".to_string(),
        ));
    }
    Ok(text)
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}
