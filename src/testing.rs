//! Fixtures shared by the module tests.

use crate::candidate::types::{
    Candidate, CandidateKey, CandidateSchema, CandidateSet, Sentence, SlotValue, Span, Split,
};
use crate::config::AnnotatorConfig;
use crate::executor::registry::LfRegistry;
use crate::executor::types::Vote;

use std::sync::Arc;

pub fn text_schema() -> CandidateSchema {
    CandidateSchema::new("Token", &["text"])
}

pub fn text_candidate(key: u64, split: &Split, text: &str) -> Candidate {
    Candidate::new(
        CandidateKey(key),
        split.clone(),
        text_schema(),
        vec![SlotValue::Text(text.to_string())],
    )
    .unwrap()
}

/// A set of `count` candidates with keys `10, 20, 30, ...` and text `"cand-<key>"`.
pub fn text_set(name: &str, split: &Split, count: u64) -> CandidateSet {
    let candidates = (1..=count)
        .map(|i| text_candidate(i * 10, split, &format!("cand-{}", i * 10)))
        .collect();
    CandidateSet::new(name, split.clone(), text_schema(), candidates).unwrap()
}

pub fn pair_schema() -> CandidateSchema {
    CandidateSchema::new("ChemicalDisease", &["chemical", "disease"])
}

/// Chemical-disease candidate over `text`, with both mentions given as inclusive word offsets.
pub fn pair_candidate(
    key: u64,
    split: &Split,
    text: &str,
    chemical: (usize, usize),
    disease: (usize, usize),
) -> Candidate {
    let sentence = Sentence::new(format!("doc-{}", key), 0, text);
    let chemical = Span::new(sentence.clone(), chemical.0, chemical.1).unwrap();
    let disease = Span::new(sentence, disease.0, disease.1).unwrap();
    Candidate::new(
        CandidateKey(key),
        split.clone(),
        pair_schema(),
        vec![SlotValue::Span(chemical), SlotValue::Span(disease)],
    )
    .unwrap()
}

/// Registry with `plus`, `minus` and `abstain` constant functions.
pub fn constant_registry() -> Arc<LfRegistry> {
    let registry = LfRegistry::new();
    registry.register("plus", |_, _| Ok(Vote::POSITIVE));
    registry.register("minus", |_, _| Ok(Vote::NEGATIVE));
    registry.register("abstain", |_, _| Ok(Vote::ABSTAIN));
    registry
}

pub fn test_config(workers: usize) -> AnnotatorConfig {
    AnnotatorConfig::default()
        .with_workers(workers)
        .with_partitions_per_worker(2)
}
