//! HTTP Protocol Definitions
//!
//! Endpoint paths and the Data Transfer Objects (DTOs) of the annotator's HTTP surface.

use crate::cluster::types::TransportSnapshot;
use crate::executor::types::{FailureMode, LfFault};
use crate::stats::types::StatsReport;
use crate::storage::cache::CacheHandle;
use serde::{Deserialize, Serialize};

pub const ENDPOINT_APPLY: &str = "/annotator/apply";
pub const ENDPOINT_CACHE: &str = "/annotator/cache";
pub const ENDPOINT_FUNCTIONS: &str = "/annotator/functions";

/// Request to run labeling functions over a cached candidate set.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub set_name: String,
    pub split: String,
    /// Ordered function names; the order becomes the column order.
    pub functions: Vec<String>,
    /// Overrides the configured failure mode.
    pub mode: Option<FailureMode>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub success: bool,
    pub run_id: Option<String>,
    pub report: Option<StatsReport>,
    pub faults: Vec<LfFault>,
    pub error: Option<String>,
}

impl ApplyResponse {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            run_id: None,
            report: None,
            faults: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheStatusResponse {
    pub handles: Vec<CacheHandle>,
    pub distributions: u64,
    pub transport: TransportSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FunctionListResponse {
    pub functions: Vec<String>,
}
