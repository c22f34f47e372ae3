// src/analyze/mod.rs
//! Sentiment & context engine.
//!
//! Flow per item: clean feed HTML → keyword gate → compound score →
//! negativity threshold → severity tier → context windows around each
//! keyword hit. Text without a keyword match is never scored.

pub mod vader;

use once_cell::sync::OnceCell;
use regex::{Regex, RegexBuilder};
use sha2::{Digest, Sha256};

use crate::error::AnalysisError;
use vader::{SentimentScorer, Severity};

/// Pain keywords of one niche, compiled once at startup.
///
/// Matching is case-insensitive on word prefixes, so "ship" also hits
/// "shipping"; multi-word phrases match as a whole.
#[derive(Debug)]
pub struct KeywordSet {
    patterns: Vec<(String, Regex)>,
}

impl KeywordSet {
    pub fn compile(keywords: &[String]) -> Result<Self, AnalysisError> {
        let mut patterns = Vec::with_capacity(keywords.len());
        for kw in keywords {
            let kw = kw.trim();
            if kw.is_empty() {
                continue;
            }
            let re = RegexBuilder::new(&format!(r"\b{}\w*\b", regex::escape(kw)))
                .case_insensitive(true)
                .build()
                .map_err(|e| AnalysisError::MalformedInput(format!("keyword '{kw}': {e}")))?;
            patterns.push((kw.to_string(), re));
        }
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Outcome of a successful analysis: the item is a pain point.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    /// Compound sentiment, strictly below the negativity threshold.
    pub score: f64,
    pub severity: Severity,
    pub matched_keywords: Vec<String>,
    /// Bounded text spans surrounding each keyword hit, overlaps removed.
    pub windows: Vec<String>,
}

#[derive(Debug)]
pub struct PainAnalyzer {
    scorer: SentimentScorer,
    negativity_threshold: f64,
    window_sentences: usize,
    max_snippet_chars: usize,
    min_text_chars: usize,
}

impl PainAnalyzer {
    pub fn new(
        negativity_threshold: f64,
        window_sentences: usize,
        max_snippet_chars: usize,
        min_text_chars: usize,
    ) -> Self {
        Self {
            scorer: SentimentScorer::new(),
            negativity_threshold,
            window_sentences,
            max_snippet_chars,
            min_text_chars,
        }
    }

    /// Analyze combined title + body of one item against a niche's keywords.
    ///
    /// `Ok(None)` means "not a pain point" (no keyword hit, too short, or
    /// sentiment at/above threshold). `Err` only for markup-only payloads.
    pub fn analyze(
        &self,
        text: &str,
        keywords: &KeywordSet,
    ) -> Result<Option<AnalysisResult>, AnalysisError> {
        let clean = clean_text(text);
        if clean.is_empty() && !text.trim().is_empty() {
            return Err(AnalysisError::MalformedInput(
                "payload empty after markup removal".into(),
            ));
        }
        if clean.chars().count() < self.min_text_chars {
            return Ok(None);
        }

        // Keyword gate before any scoring.
        let matched: Vec<String> = keywords
            .patterns
            .iter()
            .filter(|(_, re)| re.is_match(&clean))
            .map(|(kw, _)| kw.clone())
            .collect();
        if matched.is_empty() {
            return Ok(None);
        }

        let score = self.scorer.compound(&clean);
        if score >= self.negativity_threshold {
            return Ok(None);
        }
        let severity = Severity::from_score(score);

        let sentences = split_sentences(&clean);
        let mut windows = Vec::new();
        let mut seen_fingerprints = Vec::new();
        for (kw, re) in keywords.patterns.iter() {
            if !matched.iter().any(|m| m == kw) {
                continue;
            }
            let indices = matching_sentence_indices(&sentences, re);
            for idx in indices.iter().copied() {
                let w = self.window_around(&sentences, idx);
                let fp = window_fingerprint(&w);
                if seen_fingerprints.contains(&fp) {
                    continue;
                }
                seen_fingerprints.push(fp);
                windows.push(w);
            }
            // Match lives only in a dropped short fragment: fall back to a
            // char-bounded slice around the raw hit.
            if indices.is_empty() {
                if let Some(m) = re.find(&clean) {
                    let w = self.char_window(&clean, m.start(), m.end());
                    let fp = window_fingerprint(&w);
                    if !seen_fingerprints.contains(&fp) {
                        seen_fingerprints.push(fp);
                        windows.push(w);
                    }
                }
            }
        }

        Ok(Some(AnalysisResult {
            score,
            severity,
            matched_keywords: matched,
            windows,
        }))
    }

    fn window_around(&self, sentences: &[String], idx: usize) -> String {
        let start = idx.saturating_sub(self.window_sentences);
        let end = (idx + self.window_sentences + 1).min(sentences.len());
        let joined = sentences[start..end].join(" ");
        truncate_chars(&joined, self.max_snippet_chars)
    }

    fn char_window(&self, text: &str, m_start: usize, m_end: usize) -> String {
        let half = self.max_snippet_chars / 2;
        let start = text[..m_start]
            .char_indices()
            .rev()
            .nth(half.saturating_sub(1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let end = text[m_end..]
            .char_indices()
            .nth(half)
            .map(|(i, _)| m_end + i)
            .unwrap_or(text.len());
        truncate_chars(text[start..end].trim(), self.max_snippet_chars)
    }
}

/// Strip markup and feed artefacts down to plain prose.
pub fn clean_text(s: &str) -> String {
    // 1) Entity decode, then tag strip.
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 2) Curly quotes to ASCII.
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 3) Feed artefacts.
    static RE_ARTEFACTS: OnceCell<Regex> = OnceCell::new();
    let re_art = RE_ARTEFACTS
        .get_or_init(|| Regex::new(r"(?i)\[link\]|\[comments\]|submitted by /u/\S+").unwrap());
    out = re_art.replace_all(&out, " ").to_string();

    // 4) Collapse whitespace.
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Split prose into sentences on terminal punctuation runs. Fragments of
/// ten characters or fewer are treated as noise and dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let at_run_end = !matches!(chars.peek(), Some('.') | Some('!') | Some('?'));
            let followed_by_space = matches!(chars.peek(), Some(w) if w.is_whitespace());
            if at_run_end && (followed_by_space || chars.peek().is_none()) {
                push_sentence(&mut out, &mut current);
            }
        }
    }
    push_sentence(&mut out, &mut current);
    out
}

fn push_sentence(out: &mut Vec<String>, current: &mut String) {
    let s = current.trim();
    if s.chars().count() > 10 {
        out.push(s.to_string());
    }
    current.clear();
}

fn matching_sentence_indices(sentences: &[String], re: &Regex) -> Vec<usize> {
    sentences
        .iter()
        .enumerate()
        .filter(|(_, s)| re.is_match(s))
        .map(|(i, _)| i)
        .collect()
}

/// Overlap fingerprint: hash of the window head, so windows that share
/// their leading context collapse to one.
fn window_fingerprint(window: &str) -> u64 {
    let head: String = window.chars().take(100).collect();
    let digest = Sha256::digest(head.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("sha256 yields 32 bytes"))
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}...")
}
