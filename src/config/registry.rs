use std::collections::{HashMap, HashSet};

use crate::config::model::{Configuration, Selection, SelectionKind};
use crate::errors::{CrawlError, Result};

/// Resolves named field selectors to their extraction rules. Built once per
/// run from a validated configuration; pure lookup afterwards.
pub struct SelectionRegistry {
    by_name: HashMap<String, Selection>,
    items_container: Selection,
    listing_fields: Vec<Selection>,
    pagination: Option<Selection>,
}

impl SelectionRegistry {
    pub fn new(config: &Configuration) -> Result<Self> {
        config.validate()?;

        let items_container = config.items_container().cloned().ok_or_else(|| {
            CrawlError::ConfigurationInvalid("no items_container selection".to_string())
        })?;

        let referenced: HashSet<&str> = config
            .workflows
            .iter()
            .flat_map(|w| w.steps.iter())
            .flat_map(|s| s.extract_fields.iter())
            .map(String::as_str)
            .collect();

        // Fields claimed by a workflow step belong to another page; the
        // listing pass extracts only the rest.
        let listing_fields = config
            .selections
            .iter()
            .filter(|s| s.kind == SelectionKind::DataField && !referenced.contains(s.name.as_str()))
            .cloned()
            .collect();

        let by_name = config
            .selections
            .iter()
            .map(|s| (s.name.clone(), s.clone()))
            .collect();

        Ok(Self {
            by_name,
            items_container,
            listing_fields,
            pagination: config.pagination_selection.clone(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Selection> {
        self.by_name.get(name)
    }

    pub fn items_container(&self) -> &Selection {
        &self.items_container
    }

    /// Data-field selections extracted directly from each item root on the
    /// listing page.
    pub fn listing_fields(&self) -> &[Selection] {
        &self.listing_fields
    }

    pub fn pagination(&self) -> Option<&Selection> {
        self.pagination.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{StepAction, WaitCondition, Workflow, WorkflowStep};

    fn config_with_workflow_field() -> Configuration {
        Configuration {
            name: "demo".to_string(),
            base_url: "https://example.com".to_string(),
            selections: vec![
                Selection::new("items", ".product", SelectionKind::ItemsContainer),
                Selection::new("title", "h2", SelectionKind::DataField),
                Selection::new("description", ".desc", SelectionKind::DataField),
            ],
            workflows: vec![Workflow {
                name: "detail".to_string(),
                steps: vec![WorkflowStep {
                    step_id: "step1".to_string(),
                    action: StepAction::Extract,
                    target_selector: None,
                    extract_fields: vec!["description".to_string()],
                    wait_condition: WaitCondition::default(),
                    timeout_ms: 10_000,
                    required: false,
                }],
            }],
            pagination_selection: Some(Selection::new(
                "next",
                ".next",
                SelectionKind::Pagination,
            )),
            max_pages: None,
            delay_ms: 1_000,
        }
    }

    #[test]
    fn listing_fields_exclude_workflow_claimed_ones() {
        let registry = SelectionRegistry::new(&config_with_workflow_field()).unwrap();
        let names: Vec<&str> = registry
            .listing_fields()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, ["title"]);
    }

    #[test]
    fn lookups_resolve_by_name() {
        let registry = SelectionRegistry::new(&config_with_workflow_field()).unwrap();
        assert_eq!(registry.get("description").unwrap().selector, ".desc");
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.items_container().selector, ".product");
        assert_eq!(registry.pagination().unwrap().selector, ".next");
    }
}
