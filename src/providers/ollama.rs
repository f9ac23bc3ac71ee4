use crate::config::OllamaConfig;
use crate::error::{AikaraError, Result};
use crate::providers::ndjson::{NdjsonDecoder, parse_generate_line};
use crate::providers::retry::retry_with_backoff;
use crate::providers::{GenerateRequest, ModelInfo, Provider, ProviderInfo, StreamChunk, Usage};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OllamaProvider {
    base_url: String,
    client: Client,
    embed_model: String,
    chat_model: String,
    embed_timeout: Duration,
    generate_timeout: Duration,
    max_retries: u32,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified_at: Option<String>,
}

impl OllamaProvider {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            embed_model: config.embed_model.clone(),
            chat_model: config.chat_model.clone(),
            embed_timeout: Duration::from_secs(config.embed_timeout_secs),
            generate_timeout: Duration::from_secs(config.generate_timeout_secs),
            max_retries: config.max_retries,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }
}

/// Map a send failure. A refused or unreachable connection means the
/// service is not running, which deserves its own message.
fn send_error(base_url: &str, err: reqwest::Error) -> AikaraError {
    if err.is_connect() {
        AikaraError::InferenceUnavailable {
            url: base_url.to_string(),
            reason: err.to_string(),
        }
    } else {
        AikaraError::Http(err)
    }
}

fn idle_timeout(idle: Duration) -> AikaraError {
    AikaraError::ApiRequest(format!(
        "timeout: Ollama sent no data for {}s",
        idle.as_secs()
    ))
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response.text().await.unwrap_or_default();
    Err(AikaraError::ApiRequest(format!(
        "Ollama API error {}: {}",
        status,
        error_text.trim()
    )))
}

#[async_trait]
impl Provider for OllamaProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "ollama".to_string(),
            display_name: "Ollama".to_string(),
            base_url: self.base_url.clone(),
            embed_model: self.embed_model.clone(),
            chat_model: self.chat_model.clone(),
        }
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.endpoint("embed");
        let body = serde_json::json!({
            "model": self.embed_model,
            "input": texts,
        });

        let data: EmbedResponse = retry_with_backoff(self.max_retries, INITIAL_RETRY_DELAY, || {
            let client = self.client.clone();
            let url = url.clone();
            let body = body.clone();
            let base_url = self.base_url.clone();
            let timeout = self.embed_timeout;
            async move {
                let response = client
                    .post(&url)
                    .timeout(timeout)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| send_error(&base_url, e))?;
                let response = ensure_success(response).await?;
                Ok(response.json::<EmbedResponse>().await?)
            }
        })
        .await?;

        if data.embeddings.len() != texts.len() {
            return Err(AikaraError::ApiRequest(format!(
                "Expected {} embeddings from {}, got {}",
                texts.len(),
                self.embed_model,
                data.embeddings.len()
            )));
        }

        debug!(
            model = %self.embed_model,
            count = data.embeddings.len(),
            dimension = data.embeddings.first().map(|e| e.len()).unwrap_or(0),
            "Embedded texts"
        );
        Ok(data.embeddings)
    }

    async fn generate_stream(
        &self,
        request: GenerateRequest,
        tx: tokio::sync::mpsc::Sender<StreamChunk>,
    ) -> Result<String> {
        let url = self.endpoint("generate");
        let body = serde_json::json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": true,
        });

        info!(model = %request.model, prompt_chars = request.prompt.len(), "Starting generation");

        // Only opening the stream is retried; a stream that fails midway is
        // reported as is. The generate timeout bounds each wait for data, not
        // the whole answer.
        let idle = self.generate_timeout;
        let response = retry_with_backoff(self.max_retries, INITIAL_RETRY_DELAY, || {
            let client = self.client.clone();
            let url = url.clone();
            let body = body.clone();
            let base_url = self.base_url.clone();
            async move {
                let send = client.post(&url).json(&body).send();
                let response = tokio::time::timeout(idle, send)
                    .await
                    .map_err(|_| idle_timeout(idle))?
                    .map_err(|e| send_error(&base_url, e))?;
                ensure_success(response).await
            }
        })
        .await?;

        let mut lines = NdjsonDecoder::new(response.bytes_stream());
        let mut full_response = String::new();

        loop {
            let next = tokio::time::timeout(idle, lines.next())
                .await
                .map_err(|_| idle_timeout(idle))?;
            let Some(line) = next else {
                break;
            };
            let line = line?;
            let Some(parsed) = parse_generate_line(&line) else {
                continue;
            };

            if let Some(error) = parsed.error {
                return Err(AikaraError::ApiRequest(format!(
                    "Ollama generation error: {}",
                    error
                )));
            }

            if !parsed.response.is_empty() {
                full_response.push_str(&parsed.response);
                if tx
                    .send(StreamChunk::ContentDelta(parsed.response))
                    .await
                    .is_err()
                {
                    debug!("Stream receiver dropped, stopping generation");
                    break;
                }
            }

            if parsed.done {
                let prompt_tokens = parsed.prompt_eval_count.unwrap_or(0);
                let completion_tokens = parsed.eval_count.unwrap_or(0);
                let _ = tx
                    .send(StreamChunk::Usage(Usage {
                        prompt_tokens,
                        completion_tokens,
                        total_tokens: prompt_tokens.saturating_add(completion_tokens),
                    }))
                    .await;
                break;
            }
        }

        let _ = tx.send(StreamChunk::Done).await;
        debug!(chars = full_response.len(), "Generation finished");
        Ok(full_response)
    }

    async fn list_available_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(self.endpoint("tags"))
            .timeout(self.embed_timeout)
            .send()
            .await
            .map_err(|e| send_error(&self.base_url, e))?;
        let data: TagsResponse = ensure_success(response).await?.json().await?;

        Ok(data
            .models
            .into_iter()
            .map(|m| ModelInfo {
                name: m.name,
                size_bytes: m.size,
                modified_at: m.modified_at,
            })
            .collect())
    }
}
