use crate::error::{AnnotatorError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Stable primary key of a candidate.
///
/// Ascending key order defines row order in every label matrix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CandidateKey(pub u64);

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Logical split a candidate belongs to (e.g. `train`, `dev`, `test`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Split(pub String);

impl Split {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn train() -> Self {
        Self::new("train")
    }

    pub fn dev() -> Self {
        Self::new("dev")
    }

    pub fn test() -> Self {
        Self::new("test")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sentence a mention was extracted from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Sentence {
    pub document: String,
    pub position: u32,
    pub text: String,
    pub words: Vec<String>,
}

impl Sentence {
    /// Builds a sentence, tokenizing on whitespace.
    pub fn new(document: impl Into<String>, position: u32, text: impl Into<String>) -> Self {
        let text = text.into();
        let words = text.split_whitespace().map(|w| w.to_string()).collect();
        Self {
            document: document.into(),
            position,
            text,
            words,
        }
    }
}

/// A mention inside a sentence, addressed by word offsets (inclusive).
///
/// Offsets are always within the sentence; deserialization re-checks them.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
pub struct Span {
    pub(crate) sentence: Sentence,
    pub(crate) word_start: usize,
    pub(crate) word_end: usize,
}

#[derive(Deserialize)]
struct SpanFields {
    sentence: Sentence,
    word_start: usize,
    word_end: usize,
}

impl<'de> Deserialize<'de> for Span {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let fields = SpanFields::deserialize(deserializer)?;
        Span::new(fields.sentence, fields.word_start, fields.word_end)
            .map_err(serde::de::Error::custom)
    }
}

impl Span {
    /// Creates a span over `sentence.words[word_start..=word_end]`.
    pub fn new(sentence: Sentence, word_start: usize, word_end: usize) -> Result<Self> {
        if word_start > word_end || word_end >= sentence.words.len() {
            return Err(AnnotatorError::invalid_input(format!(
                "span {}..={} out of bounds for sentence of {} words",
                word_start,
                word_end,
                sentence.words.len()
            )));
        }
        Ok(Self {
            sentence,
            word_start,
            word_end,
        })
    }

    /// The mention text.
    pub fn get_span(&self) -> String {
        self.sentence.words[self.word_start..=self.word_end].join(" ")
    }

    pub fn get_parent(&self) -> &Sentence {
        &self.sentence
    }

    pub fn get_word_start(&self) -> usize {
        self.word_start
    }

    pub fn get_word_end(&self) -> usize {
        self.word_end
    }

    /// Up to `window` words preceding the mention.
    pub fn left_window(&self, window: usize) -> &[String] {
        let start = self.word_start.saturating_sub(window);
        &self.sentence.words[start..self.word_start]
    }

    /// Up to `window` words following the mention.
    pub fn right_window(&self, window: usize) -> &[String] {
        let start = (self.word_end + 1).min(self.sentence.words.len());
        let end = (start + window).min(self.sentence.words.len());
        &self.sentence.words[start..end]
    }
}

/// Words strictly between two spans of the same sentence, in sentence order.
pub fn words_between<'a>(a: &'a Span, b: &Span) -> &'a [String] {
    let (first, second) = if a.word_start <= b.word_start {
        (a, b)
    } else {
        (b, a)
    };
    let start = (first.word_end + 1).min(a.sentence.words.len());
    let end = second.word_start.max(start).min(a.sentence.words.len());
    &a.sentence.words[start..end]
}

/// `words_between` joined with single spaces.
pub fn text_between(a: &Span, b: &Span) -> String {
    words_between(a, b).join(" ")
}

/// Value stored in a candidate slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SlotValue {
    Span(Span),
    Text(String),
    Number(i64),
}

impl SlotValue {
    pub fn as_span(&self) -> Option<&Span> {
        match self {
            SlotValue::Span(span) => Some(span),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SlotValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            SlotValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Declared shape of a candidate type: a name plus ordered slot names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CandidateSchema {
    pub name: String,
    pub slots: Vec<String>,
}

impl CandidateSchema {
    pub fn new(name: impl Into<String>, slots: &[&str]) -> Self {
        Self {
            name: name.into(),
            slots: slots.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn slot_index(&self, slot: &str) -> Option<usize> {
        self.slots.iter().position(|s| s == slot)
    }
}

/// A single unit of data to be labeled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub key: CandidateKey,
    pub split: Split,
    pub schema: CandidateSchema,
    pub values: Vec<SlotValue>,
}

impl Candidate {
    pub fn new(
        key: CandidateKey,
        split: Split,
        schema: CandidateSchema,
        values: Vec<SlotValue>,
    ) -> Result<Self> {
        if values.len() != schema.slots.len() {
            return Err(AnnotatorError::invalid_input(format!(
                "candidate {} has {} values, schema {} declares {} slots",
                key,
                values.len(),
                schema.name,
                schema.slots.len()
            )));
        }
        Ok(Self {
            key,
            split,
            schema,
            values,
        })
    }

    /// Looks a slot up by its declared name.
    pub fn slot(&self, name: &str) -> Option<&SlotValue> {
        self.schema
            .slot_index(name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Shorthand for a slot holding a span.
    pub fn span(&self, name: &str) -> Option<&Span> {
        self.slot(name).and_then(SlotValue::as_span)
    }
}

/// Ordered, deduplicated collection of candidates of one split and schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSet {
    name: String,
    split: Split,
    schema: CandidateSchema,
    candidates: Vec<Candidate>,
}

impl CandidateSet {
    /// Validates and orders candidates by ascending key.
    ///
    /// Rejects duplicated keys, foreign splits and schema mismatches.
    pub fn new(
        name: impl Into<String>,
        split: Split,
        schema: CandidateSchema,
        mut candidates: Vec<Candidate>,
    ) -> Result<Self> {
        let name = name.into();
        for candidate in &candidates {
            if candidate.split != split {
                return Err(AnnotatorError::invalid_input(format!(
                    "candidate {} belongs to split {}, set '{}' is split {}",
                    candidate.key, candidate.split, name, split
                )));
            }
            if candidate.schema != schema {
                return Err(AnnotatorError::invalid_input(format!(
                    "candidate {} has schema {}, set '{}' expects {}",
                    candidate.key, candidate.schema.name, name, schema.name
                )));
            }
        }

        candidates.sort_by_key(|c| c.key);
        if let Some(pair) = candidates.windows(2).find(|w| w[0].key == w[1].key) {
            return Err(AnnotatorError::invalid_input(format!(
                "duplicate candidate key {} in set '{}'",
                pair[0].key, name
            )));
        }

        Ok(Self {
            name,
            split,
            schema,
            candidates,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn split(&self) -> &Split {
        &self.split
    }

    pub fn schema(&self) -> &CandidateSchema {
        &self.schema
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn keys(&self) -> Vec<CandidateKey> {
        self.candidates.iter().map(|c| c.key).collect()
    }

    /// Content version of the set: changes when row count, identities or content change.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.schema.hash(&mut hasher);
        self.candidates.len().hash(&mut hasher);
        for candidate in &self.candidates {
            candidate.hash(&mut hasher);
        }
        hasher.finish()
    }
}
