//! Candidate Model Module
//!
//! Defines the units of data that labeling functions vote on.
//!
//! ## Core Concepts
//! - **Schema**: Every candidate type declares a fixed, ordered set of named slots
//!   (e.g. `ChemicalDisease(chemical, disease)`). Slots are resolved by position, not reflection.
//! - **Slot Values**: A tagged `SlotValue` carries either a `Span` (a mention inside a sentence),
//!   free text or an integer.
//! - **Candidate Sets**: An ordered, deduplicated collection sharing a split and a schema.
//!   The ascending key order is the row order of every label matrix derived from the set.
//! - **Sources**: `CandidateSource` is the boundary to the session/store that owns candidates.

pub mod source;
pub mod types;
