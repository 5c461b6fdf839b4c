use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::errors::{CrawlError, Result};

/// What role a named selection plays on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    DataField,
    ItemsContainer,
    Pagination,
    Navigation,
}

/// How a value is read from a matched element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractionKind {
    Text,
    Href,
    Src,
    Attribute { attr_name: String },
}

impl Default for ExtractionKind {
    fn default() -> Self {
        ExtractionKind::Text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionAction {
    Click,
    Hover,
    ExtractOnly,
}

/// A named rule describing how to locate and read one field or control.
/// Immutable once loaded; referenced by name from workflow steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub name: String,
    pub selector: String,
    pub kind: SelectionKind,
    #[serde(default)]
    pub extraction: ExtractionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<SelectionAction>,
    /// Visible text of the control captured at configuration time. When the
    /// selector matches several nodes (common for pagination bars), the node
    /// whose text matches is the one driven.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_text: Option<String>,
}

impl Selection {
    pub fn new(name: impl Into<String>, selector: impl Into<String>, kind: SelectionKind) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
            kind,
            extraction: ExtractionKind::Text,
            action: None,
            expected_text: None,
        }
    }

    pub fn with_extraction(mut self, extraction: ExtractionKind) -> Self {
        self.extraction = extraction;
        self
    }

    pub fn with_expected_text(mut self, text: impl Into<String>) -> Self {
        self.expected_text = Some(text.into());
        self
    }
}

/// Condition applied after a step's browser action settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitCondition {
    NetworkIdle,
    DomLoaded,
    Selector { target: String },
}

impl Default for WaitCondition {
    fn default() -> Self {
        WaitCondition::NetworkIdle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Click,
    Extract,
    NavigateBack,
    OpenNewTab,
}

pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 10_000;

fn default_step_timeout_ms() -> u64 {
    DEFAULT_STEP_TIMEOUT_MS
}

fn default_delay_ms() -> u64 {
    1_000
}

/// One interaction or extraction action in an ordered sequence. Extracted
/// fields are stored in the per-item result under `step_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_id: String,
    pub action: StepAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extract_fields: Vec<String>,
    #[serde(default)]
    pub wait_condition: WaitCondition,
    #[serde(default = "default_step_timeout_ms")]
    pub timeout_ms: u64,
    /// A failed required step aborts the remainder of the workflow for the
    /// current item. Default false: failures are recorded and skipped.
    #[serde(default)]
    pub required: bool,
}

impl WorkflowStep {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Named ordered sequence of steps, executed once per item root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
}

/// Root aggregate: everything a crawl run needs, persisted as one JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    pub base_url: String,
    pub selections: Vec<Selection>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination_selection: Option<Selection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Configuration {
    /// Load and eagerly validate a configuration. Invalid configurations are
    /// rejected here, before any browsing begins.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Configuration = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn items_container(&self) -> Option<&Selection> {
        self.selections
            .iter()
            .find(|s| s.kind == SelectionKind::ItemsContainer)
    }

    /// Structural checks: unique selection names, an items container, unique
    /// step ids per workflow, click targets present, and no workflow field
    /// referencing a selection that does not exist.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for selection in &self.selections {
            if !names.insert(selection.name.as_str()) {
                return Err(CrawlError::ConfigurationInvalid(format!(
                    "duplicate selection name: {}",
                    selection.name
                )));
            }
        }

        if self.items_container().is_none() {
            return Err(CrawlError::ConfigurationInvalid(
                "no items_container selection".to_string(),
            ));
        }

        for workflow in &self.workflows {
            let mut step_ids = HashSet::new();
            for step in &workflow.steps {
                if !step_ids.insert(step.step_id.as_str()) {
                    return Err(CrawlError::ConfigurationInvalid(format!(
                        "workflow {}: duplicate step_id {}",
                        workflow.name, step.step_id
                    )));
                }
                if matches!(step.action, StepAction::Click | StepAction::OpenNewTab)
                    && step.target_selector.is_none()
                {
                    return Err(CrawlError::ConfigurationInvalid(format!(
                        "workflow {}: step {} needs a target_selector",
                        workflow.name, step.step_id
                    )));
                }
                for field in &step.extract_fields {
                    if !names.contains(field.as_str()) {
                        return Err(CrawlError::ConfigurationInvalid(format!(
                            "workflow {}: step {} references unknown selection {}",
                            workflow.name, step.step_id, field
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}
