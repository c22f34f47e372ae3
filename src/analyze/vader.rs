// src/analyze/vader.rs
//! Lexicon/rule compound scorer tuned for social-media text.
//!
//! Valence lexicon (including emoticons) plus a small rule set: negation
//! flips with damping, booster/dampener words shift magnitude, ALL-CAPS and
//! exclamation runs add emphasis. The raw sum is squashed into [-1, 1] with
//! the usual `x / sqrt(x^2 + alpha)` normalization. Pure function of the
//! text, no external state.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

static LEXICON: Lazy<HashMap<String, f64>> = Lazy::new(|| {
    let raw = include_str!("../../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, f64>>(raw).expect("valid sentiment lexicon")
});

const BOOST_STEP: f64 = 0.293;
const NEGATION_DAMP: f64 = -0.74;
const CAPS_EMPHASIS: f64 = 0.733;
const EXCLAIM_STEP: f64 = 0.292;
const NORM_ALPHA: f64 = 15.0;

/// Severity tier derived from the compound score. Tier cutpoints belong to
/// the lower-magnitude tier: exactly -0.5 is MODERATE, exactly -0.25 MILD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Severe,
    Moderate,
    Mild,
}

impl Severity {
    /// Classify a compound score already known to be below the negativity
    /// threshold. Total over [-1.0, -0.05).
    pub fn from_score(score: f64) -> Self {
        if score < -0.5 {
            Severity::Severe
        } else if score < -0.25 {
            Severity::Moderate
        } else {
            Severity::Mild
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Severe => "SEVERE",
            Severity::Moderate => "MODERATE",
            Severity::Mild => "MILD",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SentimentScorer;

impl SentimentScorer {
    pub fn new() -> Self {
        Self
    }

    /// Compound polarity of `text` in [-1.0, 1.0].
    pub fn compound(&self, text: &str) -> f64 {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return 0.0;
        }
        let all_caps = tokens.iter().all(|t| t.is_caps);

        let mut sum = 0.0f64;
        for i in 0..tokens.len() {
            let tok = &tokens[i];
            let mut valence = match lexicon_valence(tok) {
                Some(v) => v,
                None => continue,
            };

            // Shouting adds emphasis unless the whole text shouts.
            if tok.is_caps && !all_caps {
                valence += CAPS_EMPHASIS * valence.signum();
            }

            // Boosters/dampeners in the preceding three tokens, decaying
            // with distance.
            for k in 1..=3usize {
                if i < k {
                    break;
                }
                let prev = tokens[i - k].word.as_str();
                let scalar = booster_scalar(prev) * distance_decay(k);
                if scalar != 0.0 {
                    valence += scalar * valence.signum();
                }
            }

            // Negation within three tokens flips and damps.
            let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].word.as_str()));
            if negated {
                valence *= NEGATION_DAMP;
            }

            sum += valence;
        }

        // Punctuation emphasis amplifies in the direction of the sum.
        if sum != 0.0 {
            let bangs = text.chars().filter(|&c| c == '!').count().min(4) as f64;
            sum += bangs * EXCLAIM_STEP * sum.signum();
        }

        normalize(sum)
    }
}

impl Default for SentimentScorer {
    fn default() -> Self {
        Self::new()
    }
}

struct Token {
    /// Raw whitespace-split chunk (emoticon lookups).
    raw: String,
    /// Lower-cased word form, punctuation stripped, apostrophes kept.
    word: String,
    is_caps: bool,
}

fn tokenize(s: &str) -> Vec<Token> {
    s.split_whitespace()
        .map(|chunk| {
            let word: String = chunk
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '\'')
                .collect();
            let is_caps = word.len() > 1
                && word.chars().any(|c| c.is_alphabetic())
                && word.chars().all(|c| !c.is_lowercase());
            Token {
                raw: chunk.to_string(),
                word: word.to_lowercase(),
                is_caps,
            }
        })
        .filter(|t| !t.raw.is_empty())
        .collect()
}

fn lexicon_valence(tok: &Token) -> Option<f64> {
    // Emoticons are looked up verbatim (minus trailing sentence
    // punctuation), words by their cleaned lower-case form.
    let raw_trim = tok.raw.trim_end_matches(['.', ',']);
    if let Some(v) = LEXICON.get(raw_trim) {
        return Some(*v);
    }
    LEXICON.get(tok.word.as_str()).copied()
}

fn distance_decay(k: usize) -> f64 {
    match k {
        1 => 1.0,
        2 => 0.95,
        _ => 0.9,
    }
}

fn booster_scalar(tok: &str) -> f64 {
    match tok {
        "absolutely" | "amazingly" | "completely" | "deeply" | "enormously" | "entirely"
        | "especially" | "exceptionally" | "extremely" | "hugely" | "incredibly"
        | "insanely" | "really" | "remarkably" | "seriously" | "so" | "such" | "totally"
        | "truly" | "utterly" | "very" => BOOST_STEP,
        "almost" | "barely" | "hardly" | "kinda" | "less" | "little" | "marginally"
        | "occasionally" | "partly" | "scarcely" | "slightly" | "somewhat" => -BOOST_STEP,
        _ => 0.0,
    }
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not"
            | "no"
            | "never"
            | "none"
            | "nobody"
            | "nothing"
            | "neither"
            | "cannot"
            | "cant"
            | "can't"
            | "wont"
            | "won't"
            | "isnt"
            | "isn't"
            | "wasnt"
            | "wasn't"
            | "arent"
            | "aren't"
            | "dont"
            | "don't"
            | "doesnt"
            | "doesn't"
            | "didnt"
            | "didn't"
            | "aint"
            | "ain't"
            | "without"
            | "rarely"
            | "seldom"
    )
}

fn normalize(sum: f64) -> f64 {
    let c = sum / (sum * sum + NORM_ALPHA).sqrt();
    c.clamp(-1.0, 1.0)
}
