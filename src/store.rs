//! Lecture vector store: precomputed transcript chunks and their embeddings.
//!
//! The store is produced offline and loaded read-only at start-up. Retrieval
//! is a linear cosine-similarity scan, which is plenty for a course worth of
//! lecture chunks.

use crate::error::{AikaraError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// One transcript chunk with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    #[serde(default)]
    pub id: Option<String>,
    /// Lecture number. Accepted as a JSON string or number.
    #[serde(deserialize_with = "string_or_number")]
    pub number: String,
    pub title: String,
    /// Chunk start, in seconds from the beginning of the lecture.
    pub start: f64,
    #[serde(default)]
    pub end: Option<f64>,
    pub text: String,
    pub embedding: Vec<f32>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number for lecture number, got {}",
            other
        ))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoreDocument {
    Records(Vec<ChunkRecord>),
    Wrapped { chunks: Vec<ChunkRecord> },
}

/// A retrieved chunk and its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub id: String,
    pub number: String,
    pub title: String,
    pub start: f64,
    pub end: Option<f64>,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub chunks: usize,
    pub dimension: usize,
    pub lectures: usize,
}

pub struct VectorStore {
    records: Vec<ChunkRecord>,
    dimension: usize,
}

impl VectorStore {
    /// Load a store from disk. `.jsonl`/`.ndjson` files hold one record per
    /// line; anything else is a JSON array or `{"chunks": [...]}`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AikaraError::VectorStore(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let line_delimited = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("jsonl") | Some("ndjson")
        );

        let records = if line_delimited {
            parse_json_lines(&content)?
        } else {
            match serde_json::from_str::<StoreDocument>(&content).map_err(|e| {
                AikaraError::VectorStore(format!("Invalid store file {}: {}", path.display(), e))
            })? {
                StoreDocument::Records(records) => records,
                StoreDocument::Wrapped { chunks } => chunks,
            }
        };

        let store = Self::from_records(records)?;
        info!(
            path = %path.display(),
            chunks = store.len(),
            dimension = store.dimension,
            "Loaded vector store"
        );
        Ok(store)
    }

    /// Build a store from records, enforcing uniform non-zero dimensionality
    /// and finite values.
    pub fn from_records(mut records: Vec<ChunkRecord>) -> Result<Self> {
        let first = records
            .first()
            .ok_or_else(|| AikaraError::VectorStore("Store contains no chunks".to_string()))?;
        let dimension = first.embedding.len();

        if dimension == 0 {
            return Err(AikaraError::VectorStore(
                "First chunk has an empty embedding".to_string(),
            ));
        }

        for (index, record) in records.iter_mut().enumerate() {
            if record.id.is_none() {
                record.id = Some(format!("chunk-{}", index));
            }

            if record.embedding.len() != dimension {
                return Err(AikaraError::VectorStore(format!(
                    "Chunk {} has dimension {}, expected {}",
                    record_label(record, index),
                    record.embedding.len(),
                    dimension
                )));
            }

            if record.embedding.iter().any(|v| !v.is_finite()) {
                return Err(AikaraError::VectorStore(format!(
                    "Chunk {} contains a non-finite embedding value",
                    record_label(record, index)
                )));
            }
        }

        Ok(Self { records, dimension })
    }

    /// Top `k` chunks by cosine similarity, highest first. Ties keep store order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if query.len() != self.dimension {
            return Err(AikaraError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, record)| (i, cosine_similarity(query, &record.embedding)))
            .collect();

        // sort_by is stable, so equal scores stay in index order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let results: Vec<ScoredChunk> = scored
            .into_iter()
            .take(k)
            .map(|(i, score)| {
                let record = &self.records[i];
                ScoredChunk {
                    id: record.id.clone().unwrap_or_else(|| format!("chunk-{}", i)),
                    number: record.number.clone(),
                    title: record.title.clone(),
                    start: record.start,
                    end: record.end,
                    text: record.text.clone(),
                    score,
                }
            })
            .collect();

        debug!(k, returned = results.len(), "Vector search complete");
        Ok(results)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn stats(&self) -> StoreStats {
        let lectures: BTreeSet<(&str, &str)> = self
            .records
            .iter()
            .map(|r| (r.number.as_str(), r.title.as_str()))
            .collect();

        StoreStats {
            chunks: self.records.len(),
            dimension: self.dimension,
            lectures: lectures.len(),
        }
    }
}

fn parse_json_lines(content: &str) -> Result<Vec<ChunkRecord>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<ChunkRecord>(line).map_err(|e| {
                AikaraError::VectorStore(format!("Invalid record on line {}: {}", n + 1, e))
            })
        })
        .collect()
}

fn record_label(record: &ChunkRecord, index: usize) -> String {
    record
        .id
        .clone()
        .unwrap_or_else(|| format!("#{}", index))
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    // Accumulate in f64: squaring large f32 components overflows f32.
    let dot_product: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    let magnitude_a = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let magnitude_b = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    let similarity = dot_product / (magnitude_a * magnitude_b);
    if similarity.is_finite() {
        similarity as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(number: &str, start: f64, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: None,
            number: number.to_string(),
            title: format!("Lecture {}", number),
            start,
            end: None,
            text: format!("text at {}", start),
            embedding,
        }
    }

    fn sample_store() -> VectorStore {
        VectorStore::from_records(vec![
            record("1", 0.0, vec![1.0, 0.0, 0.0]),
            record("1", 30.5, vec![0.0, 1.0, 0.0]),
            record("2", 12.0, vec![0.7, 0.7, 0.0]),
            record("2", 50.08, vec![0.0, 0.0, 1.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_search_orders_by_descending_similarity() {
        let store = sample_store();
        let results = store.search(&[1.0, 0.1, 0.0], 3).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "chunk-0");
        assert_eq!(results[1].id, "chunk-2");
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_huge_components_do_not_disturb_ranking() {
        let store = VectorStore::from_records(vec![
            record("1", 0.0, vec![1.0, 0.0]),
            record("2", 0.0, vec![3.0e38, 3.0e38]),
            record("3", 0.0, vec![0.7, 0.7]),
        ])
        .unwrap();

        let similarity = cosine_similarity(&[3.0e38, 3.0e38], &[1.0, 1.0]);
        assert!((similarity - 1.0).abs() < 1e-6);

        let results = store.search(&[0.707, 0.707], 3).unwrap();
        assert!(results.iter().all(|r| r.score.is_finite()));
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(results[2].number, "1");
    }

    #[test]
    fn test_search_bounds() {
        let store = sample_store();
        assert!(store.search(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());
        assert_eq!(store.search(&[1.0, 0.0, 0.0], 50).unwrap().len(), 4);
    }

    #[test]
    fn test_search_ties_keep_store_order() {
        let store = VectorStore::from_records(vec![
            record("1", 0.0, vec![1.0, 0.0]),
            record("2", 0.0, vec![2.0, 0.0]),
            record("3", 0.0, vec![0.0, 1.0]),
        ])
        .unwrap();

        let results = store.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results[0].number, "1");
        assert_eq!(results[1].number, "2");
    }

    #[test]
    fn test_search_rejects_wrong_dimension() {
        let store = sample_store();
        let err = store.search(&[1.0, 0.0], 5).unwrap_err();
        assert!(matches!(
            err,
            AikaraError::DimensionMismatch { expected: 3, actual: 2 }
        ));
    }

    #[test]
    fn test_from_records_validation() {
        assert!(VectorStore::from_records(vec![]).is_err());
        assert!(VectorStore::from_records(vec![record("1", 0.0, vec![])]).is_err());
        assert!(
            VectorStore::from_records(vec![
                record("1", 0.0, vec![1.0, 0.0]),
                record("1", 5.0, vec![1.0, 0.0, 0.0]),
            ])
            .is_err()
        );
        assert!(VectorStore::from_records(vec![record("1", 0.0, vec![f32::NAN, 1.0])]).is_err());
    }

    #[test]
    fn test_load_json_array_with_numeric_lecture_number() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"[
                {{"number": 2, "title": "Fuzzy Sets", "start": 50.08, "end": 55.0,
                  "text": "membership functions", "embedding": [0.1, 0.2]}},
                {{"id": "l2-b", "number": "2", "title": "Fuzzy Sets", "start": 60.0,
                  "text": "alpha cuts", "embedding": [0.3, 0.4]}}
            ]"#
        )
        .unwrap();

        let store = VectorStore::load(file.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.dimension(), 2);

        let stats = store.stats();
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.lectures, 1);

        let results = store.search(&[0.3, 0.4], 1).unwrap();
        assert_eq!(results[0].id, "l2-b");
    }

    #[test]
    fn test_load_wrapped_document() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"chunks": [{{"number": "1", "title": "Intro", "start": 0, "text": "hello", "embedding": [1.0]}}]}}"#
        )
        .unwrap();

        let store = VectorStore::load(file.path()).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_load_json_lines_skips_blank_lines() {
        let mut file = tempfile::Builder::new().suffix(".jsonl").tempfile().unwrap();
        writeln!(file, r#"{{"number": 1, "title": "Intro", "start": 0, "text": "a", "embedding": [1.0, 0.0]}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"number": 1, "title": "Intro", "start": 9.5, "text": "b", "embedding": [0.0, 1.0]}}"#).unwrap();

        let store = VectorStore::load(file.path()).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_load_reports_bad_line() {
        let mut file = tempfile::Builder::new().suffix(".jsonl").tempfile().unwrap();
        writeln!(file, r#"{{"number": 1, "title": "Intro", "start": 0, "text": "a", "embedding": [1.0]}}"#).unwrap();
        writeln!(file, "not json").unwrap();

        let err = VectorStore::load(file.path()).err().unwrap();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = VectorStore::load(Path::new("/nonexistent/embeddings.json")).err().unwrap();
        assert!(matches!(err, AikaraError::VectorStore(_)));
    }
}
