use crate::error::Result;
use crate::store::ScoredChunk;
use serde::Serialize;

/// The slice of a chunk the model gets to see.
#[derive(Serialize)]
struct ContextRecord<'a> {
    number: &'a str,
    title: &'a str,
    start: f64,
    text: &'a str,
}

/// Serialize retrieved chunks as a JSON array, in retrieval order.
pub fn context_json(chunks: &[ScoredChunk]) -> Result<String> {
    let records: Vec<ContextRecord<'_>> = chunks
        .iter()
        .map(|c| ContextRecord {
            number: &c.number,
            title: &c.title,
            start: c.start,
            text: &c.text,
        })
        .collect();

    Ok(serde_json::to_string(&records)?)
}

/// Fill the teaching-assistant template with the question and its context.
pub fn build_prompt(subject: &str, question: &str, context_json: &str) -> String {
    format!(
        r#"
You are **AIKARA**, a highly precise, professional AI Teaching Assistant specialized in the current video lecture material ({subject}).

**YOUR CORE INSTRUCTIONS:**
1.  **Language:** Respond in the same language as the user's question (e.g., Hindi for Hindi, English for English).
2.  **Be Concise:** Answer the question directly and professionally.
3.  **STRICT CITATION RULE:** You MUST cite the source immediately following the relevant information. Use the **EXACT** format: **[Lecture Title or Number, TIME_IN_SECONDS]**. Example: [Lecture 2, 50.08].
4.  **NO EXTERNAL SOURCES:** Do NOT use or mention any external references, names, or books not explicitly present in the provided context.
5.  **NO PADDING:** Do not start or end with conversational padding (e.g., "You're interested in..." or "Does that help?").

**VIDEO SUBTITLE CONTEXT (For your use only):**
---
{context_json}
---
**USER QUESTION:** "{question}"

**AIKARA RESPONSE (Start immediately with the answer):**
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(number: &str, start: f64, text: &str) -> ScoredChunk {
        ScoredChunk {
            id: format!("c-{}", start),
            number: number.to_string(),
            title: "Fuzzy Sets".to_string(),
            start,
            end: Some(start + 4.0),
            text: text.to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn test_context_json_keeps_order_and_fields() {
        let json = context_json(&[chunk("2", 50.08, "alpha cut"), chunk("1", 3.0, "intro")]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        let items = parsed.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["number"], "2");
        assert_eq!(items[0]["start"], 50.08);
        assert_eq!(items[1]["text"], "intro");
        // Score, id and end stay out of the prompt
        assert!(items[0].get("score").is_none());
        assert!(items[0].get("end").is_none());
    }

    #[test]
    fn test_context_json_empty() {
        assert_eq!(context_json(&[]).unwrap(), "[]");
    }

    #[test]
    fn test_build_prompt_contains_question_context_and_rules() {
        let prompt = build_prompt("Fuzzy Logic", "What is a fuzzy set?", "[{\"number\":\"2\"}]");

        assert!(prompt.contains("specialized in the current video lecture material (Fuzzy Logic)"));
        assert!(prompt.contains("**USER QUESTION:** \"What is a fuzzy set?\""));
        assert!(prompt.contains("---\n[{\"number\":\"2\"}]\n---"));
        assert!(prompt.contains("[Lecture Title or Number, TIME_IN_SECONDS]"));
        assert!(prompt.trim_end().ends_with("(Start immediately with the answer):**"));
    }
}
