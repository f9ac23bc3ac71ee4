//! The retrieval-augmented answer pipeline.
//!
//! embed question -> top-k chunks -> prompt -> streamed generation -> cleanup

use crate::citation::{CleanAnswer, clean_answer};
use crate::config::AikaraConfig;
use crate::error::{AikaraError, Result};
use crate::prompt::{build_prompt, context_json};
use crate::providers::{GenerateRequest, Provider, StreamChunk, Usage};
use crate::store::{ScoredChunk, VectorStore};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub top_k: usize,
    pub chat_model: String,
    pub subject: String,
}

impl From<&AikaraConfig> for AssistantSettings {
    fn from(config: &AikaraConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            chat_model: config.ollama.chat_model.clone(),
            subject: config.assistant.subject.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// Text exactly as streamed by the model.
    pub raw: String,
    pub clean: CleanAnswer,
    pub retrieved: Vec<ScoredChunk>,
    pub usage: Option<Usage>,
}

pub struct Assistant {
    store: Arc<VectorStore>,
    provider: Arc<dyn Provider>,
    settings: AssistantSettings,
}

impl Assistant {
    pub fn new(
        store: Arc<VectorStore>,
        provider: Arc<dyn Provider>,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    pub fn settings(&self) -> &AssistantSettings {
        &self.settings
    }

    pub fn set_chat_model(&mut self, model: impl Into<String>) {
        self.settings.chat_model = model.into();
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Embed the question and return the closest chunks.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredChunk>> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AikaraError::EmptyQuestion);
        }

        let mut embeddings = self.provider.embed(&[question.to_string()]).await?;
        let query = embeddings.pop().ok_or_else(|| {
            AikaraError::ApiRequest("Embedding service returned no vectors".to_string())
        })?;

        let results = self.store.search(&query, self.settings.top_k)?;
        debug!(
            top_score = results.first().map(|r| r.score).unwrap_or(0.0),
            "Retrieved context"
        );
        Ok(results)
    }

    /// Answer a question. Stream chunks are forwarded to `tx` as they arrive.
    pub async fn ask(&self, question: &str, tx: mpsc::Sender<StreamChunk>) -> Result<Answer> {
        let question = question.trim();
        let retrieved = self.retrieve(question).await?;

        let context = context_json(&retrieved)?;
        let prompt = build_prompt(&self.settings.subject, question, &context);

        info!(
            chunks = retrieved.len(),
            model = %self.settings.chat_model,
            "Answering question"
        );

        let (inner_tx, mut inner_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let provider = Arc::clone(&self.provider);
        let request = GenerateRequest {
            model: self.settings.chat_model.clone(),
            prompt,
        };
        let generation =
            tokio::spawn(async move { provider.generate_stream(request, inner_tx).await });

        let mut usage = None;
        while let Some(chunk) = inner_rx.recv().await {
            if let StreamChunk::Usage(u) = &chunk {
                usage = Some(u.clone());
            }
            // The caller may stop listening; the answer is still assembled.
            let _ = tx.send(chunk).await;
        }

        let raw = generation
            .await
            .map_err(|e| AikaraError::ApiRequest(format!("Generation task failed: {}", e)))??;

        let clean = clean_answer(&raw);
        debug!(citations = clean.citations.len(), "Answer cleaned");

        Ok(Answer {
            raw,
            clean,
            retrieved,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citation::UNCITED_SOURCE;
    use crate::providers::ProviderInfo;
    use crate::store::ChunkRecord;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Embeds by keyword and replays a scripted response.
    struct FakeProvider {
        deltas: Vec<String>,
        prompts: Mutex<Vec<String>>,
        embed_calls: Mutex<u32>,
    }

    impl FakeProvider {
        fn new(deltas: &[&str]) -> Self {
            Self {
                deltas: deltas.iter().map(|d| d.to_string()).collect(),
                prompts: Mutex::new(Vec::new()),
                embed_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "fake".to_string(),
                display_name: "Fake".to_string(),
                base_url: String::new(),
                embed_model: "fake-embed".to_string(),
                chat_model: "fake-chat".to_string(),
            }
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            *self.embed_calls.lock().unwrap() += 1;
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("defuzz") {
                        vec![0.0, 1.0, 0.0]
                    } else {
                        vec![1.0, 0.0, 0.0]
                    }
                })
                .collect())
        }

        async fn generate_stream(
            &self,
            request: GenerateRequest,
            tx: mpsc::Sender<StreamChunk>,
        ) -> Result<String> {
            self.prompts.lock().unwrap().push(request.prompt);
            let mut full = String::new();
            for delta in &self.deltas {
                full.push_str(delta);
                let _ = tx.send(StreamChunk::ContentDelta(delta.clone())).await;
            }
            let _ = tx
                .send(StreamChunk::Usage(Usage {
                    prompt_tokens: 100,
                    completion_tokens: 10,
                    total_tokens: 110,
                }))
                .await;
            let _ = tx.send(StreamChunk::Done).await;
            Ok(full)
        }
    }

    fn store() -> Arc<VectorStore> {
        let chunk = |number: &str, start: f64, text: &str, embedding: Vec<f32>| ChunkRecord {
            id: None,
            number: number.to_string(),
            title: format!("Lecture {}", number),
            start,
            end: None,
            text: text.to_string(),
            embedding,
        };
        Arc::new(
            VectorStore::from_records(vec![
                chunk("2", 50.08, "A fuzzy set has graded membership", vec![1.0, 0.0, 0.0]),
                chunk("3", 12.0, "Defuzzification yields a crisp output", vec![0.0, 1.0, 0.0]),
                chunk("4", 99.0, "Neural networks", vec![0.0, 0.0, 1.0]),
            ])
            .unwrap(),
        )
    }

    fn settings(top_k: usize) -> AssistantSettings {
        AssistantSettings {
            top_k,
            chat_model: "fake-chat".to_string(),
            subject: "Fuzzy Logic".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retrieve_returns_closest_chunk_first() {
        let provider = Arc::new(FakeProvider::new(&[]));
        let assistant = Assistant::new(store(), provider, settings(2));

        let results = assistant.retrieve("how does defuzzification work").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].number, "3");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_ask_streams_and_cleans() {
        let provider = Arc::new(FakeProvider::new(&[
            "A fuzzy set allows ",
            "partial membership [Lecture 2, ",
            "50.08].\n",
        ]));
        let assistant = Assistant::new(store(), provider.clone(), settings(1));

        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let collector = tokio::spawn(async move {
            let mut chunks = Vec::new();
            while let Some(chunk) = rx.recv().await {
                chunks.push(chunk);
            }
            chunks
        });

        let answer = assistant.ask("What is a fuzzy set?", tx).await.unwrap();
        let chunks = collector.await.unwrap();

        let streamed: String = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::ContentDelta(d) => Some(d.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(streamed, answer.raw);
        assert_eq!(chunks.last(), Some(&StreamChunk::Done));

        assert_eq!(answer.clean.text, "A fuzzy set allows partial membership .");
        assert_eq!(
            answer.clean.source_line(),
            "Source: Lecture 2 | Time: 00:50 (50.08s)"
        );
        assert_eq!(answer.usage.as_ref().map(|u| u.total_tokens), Some(110));
        assert_eq!(answer.retrieved.len(), 1);

        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].contains("**USER QUESTION:** \"What is a fuzzy set?\""));
        assert!(prompts[0].contains("A fuzzy set has graded membership"));
        assert!(!prompts[0].contains("Neural networks"));
    }

    #[tokio::test]
    async fn test_ask_without_citation_falls_back() {
        let provider = Arc::new(FakeProvider::new(&["I cannot find that in the lectures."]));
        let assistant = Assistant::new(store(), provider, settings(3));

        let (tx, _rx) = mpsc::channel(CHANNEL_CAPACITY);
        let answer = assistant.ask("Who invented fuzzy logic?", tx).await.unwrap();

        assert_eq!(answer.clean.source_line(), UNCITED_SOURCE);
        assert_eq!(answer.clean.text, "I cannot find that in the lectures.");
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected_before_any_request() {
        let provider = Arc::new(FakeProvider::new(&["unused"]));
        let assistant = Assistant::new(store(), provider.clone(), settings(3));

        let (tx, _rx) = mpsc::channel(CHANNEL_CAPACITY);
        let err = assistant.ask("   ", tx).await.unwrap_err();

        assert!(matches!(err, AikaraError::EmptyQuestion));
        assert_eq!(*provider.embed_calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_settings_from_config() {
        let config = AikaraConfig::default();
        let settings = AssistantSettings::from(&config);
        assert_eq!(settings.top_k, 5);
        assert_eq!(settings.chat_model, "llama3.2");
    }
}
