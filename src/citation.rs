//! Citation extraction and answer cleanup.
//!
//! The model is told to cite as `[Lecture 2, 50.08]`. After the stream ends
//! we pull those citations out, turn the seconds into `MM:SS`, and strip the
//! bracketed spans from the visible answer.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub const UNCITED_SOURCE: &str = "Source: General Knowledge / Uncited";

static CITATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\s*([^,\[\]]+),\s*([\d.]+)\s*\]").expect("citation pattern is valid")
});

static BRACKETED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[.*?\]").expect("bracket pattern is valid"));

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    /// Lecture title or number as written by the model.
    pub source: String,
    /// Seconds exactly as written by the model.
    pub seconds: String,
}

impl Citation {
    pub fn timestamp(&self) -> String {
        format_timestamp(&self.seconds)
    }

    pub fn display(&self) -> String {
        format!(
            "Source: {} | Time: {} ({}s)",
            self.source,
            self.timestamp(),
            self.seconds
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
}

impl CleanAnswer {
    pub fn source_line(&self) -> String {
        self.citations
            .first()
            .map(Citation::display)
            .unwrap_or_else(|| UNCITED_SOURCE.to_string())
    }
}

/// Render seconds as `MM:SS`. Anything that is not a finite, non-negative
/// number renders as `N/A`.
pub fn format_timestamp(seconds: &str) -> String {
    match ascii_digits(seconds.trim()).parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => {
            let total = value.floor() as u64;
            format!("{:02}:{:02}", total / 60, total % 60)
        }
        _ => "N/A".to_string(),
    }
}

/// Zero code points of the decimal digit blocks a model answering in Hindi
/// or English may emit. Each block runs zero to nine contiguously.
const DIGIT_ZEROS: &[u32] = &[
    0x0660, // Arabic-Indic
    0x06F0, // Extended Arabic-Indic
    0x0966, // Devanagari
    0x09E6, // Bengali
    0x0A66, // Gurmukhi
    0x0AE6, // Gujarati
    0x0B66, // Oriya
    0x0BE6, // Tamil
    0x0C66, // Telugu
    0x0CE6, // Kannada
    0x0D66, // Malayalam
    0x0E50, // Thai
    0xFF10, // Fullwidth
];

/// Rewrites non-ASCII decimal digits as ASCII so `f64::from_str` accepts them.
/// Digits outside the known blocks are kept and fail to parse.
fn ascii_digits(s: &str) -> String {
    s.chars()
        .map(|c| {
            let code = c as u32;
            DIGIT_ZEROS
                .iter()
                .find(|zero| (**zero..**zero + 10).contains(&code))
                .and_then(|zero| char::from_digit(code - zero, 10))
                .unwrap_or(c)
        })
        .collect()
}

pub fn extract_citations(text: &str) -> Vec<Citation> {
    CITATION_RE
        .captures_iter(text)
        .filter_map(|cap| {
            let source = cap.get(1)?.as_str().trim().to_string();
            let seconds = cap.get(2)?.as_str().to_string();
            Some(Citation { source, seconds })
        })
        .collect()
}

/// Strip citations and bracketed artifacts from a finished response.
///
/// Without any citation the text is only trimmed, so an answer that happens
/// to contain brackets is left alone.
pub fn clean_answer(raw: &str) -> CleanAnswer {
    let citations = extract_citations(raw);

    let text = if citations.is_empty() {
        raw.trim().to_string()
    } else {
        let stripped = BRACKETED_RE.replace_all(raw, "");
        collapse_whitespace(&stripped.replace('\n', " "))
    };

    CleanAnswer { text, citations }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
