use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::CrawlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SelectorNotFound,
    NavigationTimeout,
    ContextLost,
    PaginationExhausted,
    ConfigurationInvalid,
}

impl ErrorKind {
    pub fn from_error(err: &CrawlError) -> Self {
        match err {
            CrawlError::TimeoutError(_) => ErrorKind::NavigationTimeout,
            CrawlError::ElementNotFound(_) => ErrorKind::SelectorNotFound,
            CrawlError::ConfigurationInvalid(_) => ErrorKind::ConfigurationInvalid,
            _ => ErrorKind::ContextLost,
        }
    }
}

/// One recorded, non-fatal failure while processing a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub step_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

pub type FieldValues = BTreeMap<String, Option<String>>;

/// Per-item record: listing-page fields merged with workflow step outputs.
/// Exactly one per item, regardless of partial failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub item_index: usize,
    pub base_fields: FieldValues,
    pub step_outputs: BTreeMap<String, FieldValues>,
    pub success: bool,
    pub errors: Vec<StepError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub source_url: String,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractionResult {
    pub fn new(item_index: usize, source_url: impl Into<String>) -> Self {
        Self {
            item_index,
            base_fields: BTreeMap::new(),
            step_outputs: BTreeMap::new(),
            success: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            source_url: source_url.into(),
            extracted_at: Utc::now(),
        }
    }

    pub fn record_error(
        &mut self,
        step_id: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) {
        self.errors.push(StepError {
            step_id: step_id.into(),
            kind,
            message: message.into(),
        });
    }

    pub fn record_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn step_output_mut(&mut self, step_id: &str) -> &mut FieldValues {
        self.step_outputs.entry(step_id.to_string()).or_default()
    }
}
