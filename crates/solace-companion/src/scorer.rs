//! Keyword-heuristic emotion scorer.

use futures_util::future::BoxFuture;
use solace_types::{EmotionScore, LabelIntensity};

use crate::{CompanionError, EmotionScorer};

/// Per-label keyword lists. Matching is case-insensitive on whole words.
const LABEL_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "anxiety",
        &[
            "anxious", "anxiety", "worried", "worry", "nervous", "panic", "overwhelmed", "stress",
            "stressed", "afraid",
        ],
    ),
    (
        "sadness",
        &[
            "sad", "sadness", "down", "depressed", "lonely", "alone", "hopeless", "crying", "cry",
            "grief",
        ],
    ),
    (
        "anger",
        &[
            "angry", "anger", "furious", "frustrated", "frustrating", "annoyed", "resent", "hate",
        ],
    ),
    (
        "fear",
        &["scared", "fear", "terrified", "dread", "frightened"],
    ),
    (
        "joy",
        &[
            "happy", "joy", "glad", "grateful", "excited", "hopeful", "better", "calm", "relieved",
            "proud",
        ],
    ),
];

/// Labels that pull valence upward; all others pull it down.
const POSITIVE_LABELS: &[&str] = &["joy"];

/// Intensity contributed by each matched keyword, saturating at 1.0.
const INTENSITY_PER_MATCH: f64 = 0.35;

/// The keyword-heuristic scorer currently shipped by the platform.
///
/// Pure and deterministic: the same text always produces the same score,
/// and scoring never fails. Kept behind the [`EmotionScorer`] trait so a
/// model-backed scorer can replace it wholesale.
#[derive(Debug, Clone, Default)]
pub struct KeywordScorer;

impl KeywordScorer {
    pub fn new() -> Self {
        Self
    }

    fn score_text(text: &str) -> EmotionScore {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();

        let mut labels = Vec::new();
        let mut valence = 0.0;

        for (label, keywords) in LABEL_KEYWORDS {
            let matches = words
                .iter()
                .filter(|w| keywords.contains(&w.as_str()))
                .count();
            if matches == 0 {
                continue;
            }

            let intensity = (matches as f64 * INTENSITY_PER_MATCH).min(1.0);
            if POSITIVE_LABELS.contains(label) {
                valence += intensity;
            } else {
                valence -= intensity;
            }
            labels.push(LabelIntensity {
                label: (*label).to_string(),
                intensity,
            });
        }

        EmotionScore {
            valence: valence.clamp(-1.0, 1.0),
            labels,
        }
    }
}

impl EmotionScorer for KeywordScorer {
    fn score<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<EmotionScore, CompanionError>> {
        Box::pin(async move { Ok(Self::score_text(text)) })
    }
}
