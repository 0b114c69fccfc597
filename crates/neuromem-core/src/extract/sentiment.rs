//! Sentiment extraction - Lexicon-based valence scoring
//!
//! Pure lexicon lookup with negation and intensifier handling; no models,
//! no network. Emits a coarse valence, an intensity in [0, 1], and emotion
//! tags used to create affective synapses at encode time.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use super::tokenizer::{Token, Tokenizer, UnicodeTokenizer};

// ============================================================================
// TYPES
// ============================================================================

/// Coarse sentiment polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Valence {
    Pos,
    Neg,
    #[default]
    Neu,
}

/// Result of sentiment extraction
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Sentiment {
    /// Polarity of the dominant signal
    pub valence: Valence,
    /// Strength of the signal in [0, 1]
    pub intensity: f64,
    /// Emotion labels contributed by matched terms
    pub emotion_tags: Vec<String>,
}

impl Sentiment {
    /// Whether the content carried any affective signal
    pub fn is_neutral(&self) -> bool {
        self.valence == Valence::Neu
    }
}

// ============================================================================
// LEXICONS
// ============================================================================

/// English positive terms
const POSITIVE_EN: &[&str] = &[
    "accomplish", "achieve", "admire", "adore", "advantage", "agree", "amazing", "appreciate",
    "approve", "awesome", "beautiful", "benefit", "best", "better", "breakthrough", "brilliant",
    "calm", "celebrate", "charming", "clean", "clear", "clever", "comfortable", "confident",
    "congratulations", "convenient", "correct", "delight", "delighted", "dependable", "eager",
    "easy", "effective", "efficient", "elegant", "encourage", "enjoy", "enthusiastic",
    "excellent", "excited", "exciting", "fantastic", "fast", "favorite", "fine", "fixed",
    "flawless", "fresh", "friendly", "fun", "genius", "glad", "good", "gorgeous", "graceful",
    "grateful", "great", "happy", "harmless", "helpful", "hopeful", "ideal", "important",
    "impressive", "improve", "improved", "incredible", "innovative", "inspire", "interesting",
    "joy", "keen", "kind", "like", "love", "lovely", "loyal", "lucky", "magnificent",
    "marvelous", "motivated", "neat", "nice", "optimal", "outstanding", "passed", "peaceful",
    "perfect", "pleasant", "pleased", "positive", "powerful", "praise", "precise", "prefer",
    "pretty", "productive", "progress", "promising", "proud", "quick", "recommend", "relaxed",
    "reliable", "relieved", "remarkable", "resolved", "respect", "rewarding", "right", "robust",
    "safe", "satisfied", "secure", "sharp", "shine", "simple", "smart", "smooth", "solid",
    "solved", "spectacular", "splendid", "stable", "straightforward", "strong", "stunning",
    "succeed", "success", "successful", "superb", "superior", "support", "sweet", "terrific",
    "thank", "thanks", "thrilled", "tidy", "triumph", "trust", "trustworthy", "useful",
    "valuable", "vibrant", "victory", "warm", "welcome", "win", "wonderful", "works", "worthy",
    "wow",
];

/// English negative terms
const NEGATIVE_EN: &[&str] = &[
    "abandon", "abort", "absurd", "afraid", "angry", "annoy", "annoying", "anxious", "ashamed",
    "awful", "bad", "badly", "bitter", "blame", "block", "blocked", "break", "broke", "broken",
    "bug", "buggy", "burden", "catastrophe", "chaos", "cheat", "complain", "confused",
    "confusing", "corrupt", "corrupted", "crash", "crashed", "critical", "cruel", "crush",
    "damage", "danger", "dangerous", "dead", "deadlock", "defect", "defective", "delay",
    "delayed", "denied", "deny", "depressed", "desperate", "destroy", "difficult", "dirty",
    "disagree", "disappoint", "disappointed", "disaster", "dislike", "dismal", "doubt", "down",
    "dread", "dreadful", "error", "evil", "exhausted", "expensive", "fail", "failed", "failing",
    "failure", "fake", "fatal", "fault", "faulty", "fear", "flaky", "flaw", "flawed", "fool",
    "forget", "forgot", "fragile", "frustrated", "frustrating", "frustration", "furious",
    "garbage", "glitch", "gloomy", "grief", "gross", "guilty", "hang", "harm", "harmful",
    "harsh", "hate", "hideous", "hopeless", "horrible", "hurt", "ignore", "ill", "impossible",
    "inadequate", "incident", "incompatible", "incomplete", "incorrect", "inferior",
    "insecure", "insult", "invalid", "issue", "jealous", "junk", "lack", "lag", "laggy",
    "late", "leak", "lonely", "lose", "loss", "lost", "mad", "mess", "messy", "miserable",
    "miss", "missing", "mistake", "nasty", "negative", "nervous", "noise", "obsolete",
    "outage", "outdated", "overdue", "painful", "panic", "pathetic", "poor", "problem",
    "problematic", "refuse", "regression", "regret", "reject", "rejected", "risk", "risky",
    "rotten", "rude", "ruin", "sad", "scared", "severe", "shame", "sick", "slow", "sorry",
    "stale", "struggle", "stuck", "stupid", "suffer", "suspicious", "terrible", "threat",
    "timeout", "tired", "toxic", "tragic", "trouble", "ugly", "unable", "unacceptable",
    "unhappy", "unreliable", "unsafe", "unstable", "upset", "urgent", "useless", "vulnerable",
    "waste", "weak", "worse", "worst", "worthless", "wrong",
];

/// Vietnamese positive terms
const POSITIVE_VI: &[&str] = &[
    "tốt", "hay", "đẹp", "giỏi", "tuyệt", "xuất sắc", "vui", "mừng", "hạnh phúc", "thích",
    "yêu", "hài lòng", "ổn", "ổn định", "nhanh", "mượt", "tiện", "tiện lợi", "dễ", "dễ dàng",
    "hiệu quả", "thành công", "hoàn hảo", "đáng tin", "tin cậy", "an toàn", "chắc chắn",
    "thông minh", "sáng tạo", "tuyệt vời", "đỉnh", "chất lượng", "hữu ích", "đáng giá",
    "khỏe", "mạnh", "tươi", "sạch", "gọn", "rõ ràng", "chính xác", "hợp lý", "thuận lợi",
    "phấn khởi", "tự hào", "yên tâm", "thoải mái", "dễ chịu", "đáng khen", "tiến bộ",
];

/// Vietnamese negative terms
const NEGATIVE_VI: &[&str] = &[
    "xấu", "tệ", "kém", "dở", "hỏng", "lỗi", "chậm", "buồn", "giận", "tức", "chán", "sợ",
    "lo", "lo lắng", "thất bại", "thất vọng", "khó", "khó khăn", "nguy hiểm", "rủi ro",
    "mất", "thiếu", "sai", "nhầm", "phiền", "rối", "mệt", "mệt mỏi", "đau", "khổ", "tồi",
    "tồi tệ", "vỡ", "gãy", "trễ", "muộn", "quá tải", "treo", "đơ", "giật", "lag", "bực",
    "bực mình", "vô dụng", "vô lý", "không ổn", "bất ổn", "nghiêm trọng", "khẩn cấp",
];

/// Negation markers; flip polarity of terms within the following window
const NEGATORS: &[&str] = &["not", "never", "no", "n't", "dont", "don't", "cannot", "can't",
    "không", "chưa", "chẳng", "đừng"];

/// Intensity multipliers
const INTENSIFIERS: &[&str] = &["very", "extremely", "really", "so", "totally", "absolutely",
    "highly", "rất", "quá", "cực", "siêu", "lắm"];
const DIMINISHERS: &[&str] = &["slightly", "somewhat", "barely", "a bit", "hơi", "tạm"];

/// Tokens a negator can reach
const NEGATION_WINDOW: usize = 3;

/// Emotion tags keyed by trigger terms
static EMOTION_TRIGGERS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    for w in ["happy", "joy", "delighted", "glad", "thrilled", "vui", "mừng", "hạnh phúc"] {
        m.insert(w, "joy");
    }
    for w in ["frustrated", "frustrating", "frustration", "annoyed", "annoying", "bực", "bực mình"] {
        m.insert(w, "frustration");
    }
    for w in ["urgent", "critical", "deadline", "asap", "khẩn cấp", "gấp"] {
        m.insert(w, "urgency");
    }
    for w in ["afraid", "fear", "scared", "anxious", "nervous", "sợ", "lo lắng"] {
        m.insert(w, "fear");
    }
    for w in ["angry", "furious", "mad", "giận", "tức"] {
        m.insert(w, "anger");
    }
    for w in ["sad", "unhappy", "miserable", "grief", "buồn", "khổ"] {
        m.insert(w, "sadness");
    }
    for w in ["surprise", "surprised", "unexpected", "wow", "bất ngờ"] {
        m.insert(w, "surprise");
    }
    m
});

static POLARITY: LazyLock<HashMap<&'static str, f64>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    for w in POSITIVE_EN.iter().chain(POSITIVE_VI) {
        m.insert(*w, 1.0);
    }
    for w in NEGATIVE_EN.iter().chain(NEGATIVE_VI) {
        m.insert(*w, -1.0);
    }
    m
});

// ============================================================================
// EXTRACTOR
// ============================================================================

/// Lexicon-based sentiment extractor
#[derive(Debug, Default)]
pub struct SentimentExtractor {
    tokenizer: UnicodeTokenizer,
}

impl SentimentExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score a text. Never fails; unscorable input is neutral.
    pub fn extract(&self, text: &str) -> Sentiment {
        let tokens = self.tokenizer.tokenize(text);
        self.extract_tokens(&tokens)
    }

    /// Score pre-tokenized text
    pub fn extract_tokens(&self, tokens: &[Token]) -> Sentiment {
        if tokens.is_empty() {
            return Sentiment::default();
        }

        let lowered: Vec<String> = tokens.iter().map(Token::lower).collect();
        let mut score = 0.0f64;
        let mut magnitude = 0.0f64;
        let mut hits = 0usize;
        let mut emotion_tags: Vec<String> = Vec::new();

        for (i, word) in lowered.iter().enumerate() {
            let Some(&base) = POLARITY.get(word.as_str()) else {
                if let Some(tag) = EMOTION_TRIGGERS.get(word.as_str()) {
                    if !emotion_tags.iter().any(|t| t == tag) {
                        emotion_tags.push((*tag).to_string());
                    }
                }
                continue;
            };

            let mut value = base;

            // A negator within the preceding window flips polarity
            let window_start = i.saturating_sub(NEGATION_WINDOW);
            if lowered[window_start..i]
                .iter()
                .any(|w| NEGATORS.contains(&w.as_str()))
            {
                value = -value;
            }

            // Intensifiers and diminishers scale the nearest term
            if i > 0 {
                let prev = lowered[i - 1].as_str();
                if INTENSIFIERS.contains(&prev) {
                    value *= 1.5;
                } else if DIMINISHERS.contains(&prev) {
                    value *= 0.5;
                }
            }

            score += value;
            magnitude += value.abs();
            hits += 1;

            if let Some(tag) = EMOTION_TRIGGERS.get(word.as_str()) {
                if !emotion_tags.iter().any(|t| t == tag) {
                    emotion_tags.push((*tag).to_string());
                }
            }
        }

        if hits == 0 {
            return Sentiment {
                valence: Valence::Neu,
                intensity: 0.0,
                emotion_tags,
            };
        }

        // Normalize against hit count so a single strong term still reads
        // as intense in short content
        let intensity = (magnitude / hits as f64).min(1.5) / 1.5;
        let valence = if score > 0.05 {
            Valence::Pos
        } else if score < -0.05 {
            Valence::Neg
        } else {
            Valence::Neu
        };

        Sentiment {
            valence,
            intensity,
            emotion_tags,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
