use crate::config::model::{
    Selection, StepAction, WaitCondition, Workflow, WorkflowStep, DEFAULT_STEP_TIMEOUT_MS,
};
use crate::errors::{CrawlError, Result};
use std::collections::HashSet;

/// Fluent construction of workflows. Steps accumulate unvalidated; `build`
/// checks duplicate step ids and dangling selection references, so an
/// invalid workflow never reaches the interpreter.
pub struct WorkflowBuilder {
    name: String,
    steps: Vec<WorkflowStep>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Click an element within the item root, wait, then extract the named
    /// fields from the page that was navigated to.
    pub fn click_and_extract(
        mut self,
        step_id: impl Into<String>,
        target_selector: impl Into<String>,
        extract_fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.steps.push(WorkflowStep {
            step_id: step_id.into(),
            action: StepAction::Click,
            target_selector: Some(target_selector.into()),
            extract_fields: extract_fields.into_iter().map(Into::into).collect(),
            wait_condition: WaitCondition::NetworkIdle,
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            required: false,
        });
        self
    }

    /// Follow the link within the item root into a fresh tab and extract the
    /// named fields there. The tab is closed when the workflow returns.
    pub fn open_tab_and_extract(
        mut self,
        step_id: impl Into<String>,
        link_selector: impl Into<String>,
        extract_fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.steps.push(WorkflowStep {
            step_id: step_id.into(),
            action: StepAction::OpenNewTab,
            target_selector: Some(link_selector.into()),
            extract_fields: extract_fields.into_iter().map(Into::into).collect(),
            wait_condition: WaitCondition::NetworkIdle,
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            required: false,
        });
        self
    }

    /// Extract the named fields from the active context without navigating.
    pub fn extract_only(
        mut self,
        step_id: impl Into<String>,
        extract_fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.steps.push(WorkflowStep {
            step_id: step_id.into(),
            action: StepAction::Extract,
            target_selector: None,
            extract_fields: extract_fields.into_iter().map(Into::into).collect(),
            wait_condition: WaitCondition::NetworkIdle,
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            required: false,
        });
        self
    }

    /// Return to the previous browsing context.
    pub fn navigate_back(mut self, step_id: impl Into<String>) -> Self {
        self.steps.push(WorkflowStep {
            step_id: step_id.into(),
            action: StepAction::NavigateBack,
            target_selector: None,
            extract_fields: vec![],
            wait_condition: WaitCondition::NetworkIdle,
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            required: false,
        });
        self
    }

    /// Override the wait condition of the most recently added step.
    pub fn wait_for(mut self, condition: WaitCondition) -> Self {
        if let Some(step) = self.steps.last_mut() {
            step.wait_condition = condition;
        }
        self
    }

    /// Override the timeout of the most recently added step.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        if let Some(step) = self.steps.last_mut() {
            step.timeout_ms = timeout_ms;
        }
        self
    }

    /// Mark the most recently added step required: on failure the remainder
    /// of the workflow is aborted for the current item.
    pub fn required(mut self) -> Self {
        if let Some(step) = self.steps.last_mut() {
            step.required = true;
        }
        self
    }

    pub fn build(self, selections: &[Selection]) -> Result<Workflow> {
        let known: HashSet<&str> = selections.iter().map(|s| s.name.as_str()).collect();
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_id.as_str()) {
                return Err(CrawlError::ConfigurationInvalid(format!(
                    "workflow {}: duplicate step_id {}",
                    self.name, step.step_id
                )));
            }
            for field in &step.extract_fields {
                if !known.contains(field.as_str()) {
                    return Err(CrawlError::ConfigurationInvalid(format!(
                        "workflow {}: step {} references unknown selection {}",
                        self.name, step.step_id, field
                    )));
                }
            }
        }
        Ok(Workflow {
            name: self.name,
            steps: self.steps,
        })
    }
}
