use crate::config::{AikaraConfig, ProviderType};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod ndjson;
pub mod ollama;
pub mod retry;

/// A chunk from a streaming generation response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Incremental content delta
    ContentDelta(String),
    /// Usage information (sent at the end)
    Usage(Usage),
    /// Stream is done
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub display_name: String,
    pub base_url: String,
    pub embed_model: String,
    pub chat_model: String,
}

/// A model installed on the inference service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn info(&self) -> ProviderInfo;

    /// Embed each input text. One vector per input, same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Stream a generation. Deltas go to `tx` as they arrive; the assembled
    /// text is returned once the service reports completion.
    async fn generate_stream(
        &self,
        request: GenerateRequest,
        tx: tokio::sync::mpsc::Sender<StreamChunk>,
    ) -> Result<String>;

    /// Models available on the service. Default is an empty list.
    async fn list_available_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(Vec::new())
    }

    /// Cheap reachability probe.
    async fn health_check(&self) -> Result<()> {
        self.list_available_models().await.map(|_| ())
    }
}

pub fn create_provider(config: &AikaraConfig) -> Result<Arc<dyn Provider>> {
    match config.provider {
        ProviderType::Ollama => Ok(Arc::new(ollama::OllamaProvider::new(&config.ollama)?)),
    }
}
