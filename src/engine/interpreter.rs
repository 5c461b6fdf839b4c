use crate::browser::BrowserDriver;
use crate::config::{ExtractionKind, Selection, SelectionRegistry, StepAction, Workflow, WorkflowStep};
use crate::engine::navigation::NavigationState;
use crate::engine::result::{ErrorKind, ExtractionResult};
use crate::errors::{CrawlError, Result};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Completed,
    /// A required step failed; the rest of the workflow was skipped.
    Aborted,
}

/// Executes one workflow against one item root, recording step outputs and
/// step errors on the item's result. Driver-level failures that invalidate
/// the whole item (stale roots, lost contexts) propagate as errors; the
/// caller retries the item from baseline.
pub struct StepInterpreter<'a, D: BrowserDriver> {
    driver: &'a D,
    registry: &'a SelectionRegistry,
}

impl<'a, D: BrowserDriver> StepInterpreter<'a, D> {
    pub fn new(driver: &'a D, registry: &'a SelectionRegistry) -> Self {
        Self { driver, registry }
    }

    /// Run every step in order, then restore baseline unconditionally:
    /// success, abort, and error paths all pass through `reset`.
    pub async fn run_workflow(
        &self,
        nav: &mut NavigationState<D>,
        workflow: &Workflow,
        item_index: usize,
        result: &mut ExtractionResult,
    ) -> Result<WorkflowOutcome> {
        let outcome = self.run_steps(nav, workflow, item_index, result).await;
        let reset = nav.reset(self.driver).await;
        let outcome = outcome?;
        reset?;
        Ok(outcome)
    }

    async fn run_steps(
        &self,
        nav: &mut NavigationState<D>,
        workflow: &Workflow,
        item_index: usize,
        result: &mut ExtractionResult,
    ) -> Result<WorkflowOutcome> {
        for step in &workflow.steps {
            debug!(
                "item {} workflow {} step {} ({:?})",
                item_index, workflow.name, step.step_id, step.action
            );
            let step_ok = match step.action {
                StepAction::Click => self.exec_click(nav, step, item_index, result).await?,
                StepAction::Extract => {
                    self.extract_fields(nav, step, item_index, result).await?;
                    true
                }
                StepAction::NavigateBack => {
                    self.exec_navigate_back(nav, step, result).await?;
                    true
                }
                StepAction::OpenNewTab => {
                    self.exec_open_new_tab(nav, step, item_index, result).await?
                }
            };
            if !step_ok && step.required {
                warn!(
                    "item {}: required step {} failed, aborting workflow {}",
                    item_index, step.step_id, workflow.name
                );
                result.success = false;
                return Ok(WorkflowOutcome::Aborted);
            }
        }
        Ok(WorkflowOutcome::Completed)
    }

    /// Fresh handle to this item's container on the listing page. Roots are
    /// re-resolved by index on every use; a vanished root means the page
    /// changed under us.
    async fn item_root(&self, nav: &NavigationState<D>, item_index: usize) -> Result<D::Element> {
        let items = self.registry.items_container();
        let roots = self
            .driver
            .query_all(nav.active(), None, &items.selector)
            .await?;
        roots.into_iter().nth(item_index).ok_or_else(|| {
            CrawlError::StaleElement(format!("item {} no longer present on listing", item_index))
        })
    }

    /// At baseline, selectors are scoped to the item root; once a step has
    /// navigated away, they resolve against the whole active document.
    async fn resolve_in_scope(
        &self,
        nav: &NavigationState<D>,
        item_index: usize,
        selector: &str,
    ) -> Result<Option<D::Element>> {
        if nav.is_baseline() {
            let root = self.item_root(nav, item_index).await?;
            self.driver.query(nav.active(), Some(&root), selector).await
        } else {
            self.driver.query(nav.active(), None, selector).await
        }
    }

    async fn exec_click(
        &self,
        nav: &mut NavigationState<D>,
        step: &WorkflowStep,
        item_index: usize,
        result: &mut ExtractionResult,
    ) -> Result<bool> {
        let selector = step.target_selector.as_deref().unwrap_or_default();
        let element = match self.resolve_in_scope(nav, item_index, selector).await? {
            Some(element) => element,
            None => {
                result.record_error(
                    &step.step_id,
                    ErrorKind::SelectorNotFound,
                    format!("no element matches {}", selector),
                );
                return Ok(false);
            }
        };
        if !self.driver.is_interactable(nav.active(), &element).await? {
            result.record_error(
                &step.step_id,
                ErrorKind::SelectorNotFound,
                format!("element {} is not interactable", selector),
            );
            return Ok(false);
        }

        let url_before = self.driver.current_url(nav.active()).await?;
        self.driver.click(nav.active(), &element).await?;
        if let Err(e) = self
            .driver
            .wait_for(nav.active(), &step.wait_condition, step.timeout())
            .await
        {
            // Best-effort: keep going with whatever state the click produced.
            result.record_error(&step.step_id, ErrorKind::NavigationTimeout, e.to_string());
        }

        let url_after = self.driver.current_url(nav.active()).await?;
        if url_after != url_before {
            nav.enter_same_context(url_before);
        }

        if !step.extract_fields.is_empty() {
            self.extract_fields(nav, step, item_index, result).await?;
        }
        Ok(true)
    }

    async fn exec_navigate_back(
        &self,
        nav: &mut NavigationState<D>,
        step: &WorkflowStep,
        result: &mut ExtractionResult,
    ) -> Result<()> {
        if !nav.leave(self.driver).await? {
            result.record_warning(format!(
                "step {}: navigate_back with no context to return to",
                step.step_id
            ));
        }
        Ok(())
    }

    async fn exec_open_new_tab(
        &self,
        nav: &mut NavigationState<D>,
        step: &WorkflowStep,
        item_index: usize,
        result: &mut ExtractionResult,
    ) -> Result<bool> {
        let selector = step.target_selector.as_deref().unwrap_or_default();
        let element = match self.resolve_in_scope(nav, item_index, selector).await? {
            Some(element) => element,
            None => {
                result.record_error(
                    &step.step_id,
                    ErrorKind::SelectorNotFound,
                    format!("no element matches {}", selector),
                );
                return Ok(false);
            }
        };
        let href = match self
            .driver
            .read_attribute(nav.active(), &element, "href")
            .await?
        {
            Some(href) => href,
            None => {
                result.record_error(
                    &step.step_id,
                    ErrorKind::SelectorNotFound,
                    format!("element {} has no href", selector),
                );
                return Ok(false);
            }
        };
        let current = self.driver.current_url(nav.active()).await?;
        let target_url = resolve_href(&current, &href)?;

        let ctx = self.driver.new_context().await?;
        match tokio::time::timeout(step.timeout(), self.open_and_settle(&ctx, &target_url, step))
            .await
        {
            Ok(Ok(())) => {
                nav.enter_tab(ctx);
                if !step.extract_fields.is_empty() {
                    self.extract_fields(nav, step, item_index, result).await?;
                }
                Ok(true)
            }
            Ok(Err(CrawlError::TimeoutError(message))) => {
                let _ = self.driver.close_context(&ctx).await;
                result.record_error(&step.step_id, ErrorKind::NavigationTimeout, message);
                Ok(false)
            }
            Ok(Err(e)) => {
                let _ = self.driver.close_context(&ctx).await;
                Err(e)
            }
            Err(_) => {
                let _ = self.driver.close_context(&ctx).await;
                result.record_error(
                    &step.step_id,
                    ErrorKind::NavigationTimeout,
                    format!(
                        "new tab did not load {} within {}ms",
                        target_url, step.timeout_ms
                    ),
                );
                Ok(false)
            }
        }
    }

    async fn open_and_settle(
        &self,
        ctx: &D::Context,
        url: &str,
        step: &WorkflowStep,
    ) -> Result<()> {
        self.driver.navigate(ctx, url).await?;
        self.driver
            .wait_for(ctx, &step.wait_condition, step.timeout())
            .await
    }

    /// Read every named field from the active context into
    /// `step_outputs[step_id]`. A missing element yields None, not an error.
    async fn extract_fields(
        &self,
        nav: &NavigationState<D>,
        step: &WorkflowStep,
        item_index: usize,
        result: &mut ExtractionResult,
    ) -> Result<()> {
        for field in &step.extract_fields {
            let selection = match self.registry.get(field) {
                Some(selection) => selection,
                None => {
                    result.record_error(
                        &step.step_id,
                        ErrorKind::ConfigurationInvalid,
                        format!("unknown selection {}", field),
                    );
                    continue;
                }
            };
            let value = match self
                .resolve_in_scope(nav, item_index, &selection.selector)
                .await?
            {
                Some(element) => {
                    read_selection(self.driver, nav.active(), &element, selection).await?
                }
                None => None,
            };
            result
                .step_output_mut(&step.step_id)
                .insert(selection.name.clone(), value);
        }
        Ok(())
    }
}

/// Read one value according to the selection's extraction kind.
pub(crate) async fn read_selection<D: BrowserDriver>(
    driver: &D,
    ctx: &D::Context,
    element: &D::Element,
    selection: &Selection,
) -> Result<Option<String>> {
    match &selection.extraction {
        ExtractionKind::Text => driver.read_text(ctx, element).await,
        ExtractionKind::Href => driver.read_attribute(ctx, element, "href").await,
        ExtractionKind::Src => driver.read_attribute(ctx, element, "src").await,
        ExtractionKind::Attribute { attr_name } => {
            driver.read_attribute(ctx, element, attr_name).await
        }
    }
}

/// Absolute hrefs pass through; relative ones resolve against the page the
/// link was found on.
fn resolve_href(current: &str, href: &str) -> Result<String> {
    match Url::parse(href) {
        Ok(absolute) => Ok(absolute.to_string()),
        Err(_) => {
            let base = Url::parse(current)
                .map_err(|e| CrawlError::InvalidUrl(format!("{}: {}", current, e)))?;
            let joined = base
                .join(href)
                .map_err(|e| CrawlError::InvalidUrl(format!("{}: {}", href, e)))?;
            Ok(joined.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, Selection, SelectionKind, WaitCondition, WorkflowBuilder};
    use crate::testing::{MockDriver, MockNode, MockPage};

    const LIST: &str = "https://site.test/list";
    const DETAIL: &str = "https://site.test/detail/1";

    fn selections() -> Vec<Selection> {
        vec![
            Selection::new("items", ".item", SelectionKind::ItemsContainer),
            Selection::new("title", "h2", SelectionKind::DataField),
            Selection::new("description", ".desc", SelectionKind::DataField),
        ]
    }

    fn registry() -> SelectionRegistry {
        let config = Configuration {
            name: "demo".to_string(),
            base_url: LIST.to_string(),
            selections: selections(),
            workflows: vec![],
            pagination_selection: None,
            max_pages: None,
            delay_ms: 1_000,
        };
        SelectionRegistry::new(&config).unwrap()
    }

    fn detail_site() -> MockDriver {
        MockDriver::new(vec![
            MockPage::new(LIST).node(
                MockNode::new(".item")
                    .child(MockNode::new("h2").text("Alpha"))
                    .child(
                        MockNode::new(".detail-link")
                            .attr("href", "/detail/1")
                            .clicks_to(DETAIL),
                    ),
            ),
            MockPage::new(DETAIL).node(MockNode::new(".desc").text("Full description")),
        ])
    }

    async fn baseline(driver: &MockDriver) -> NavigationState<MockDriver> {
        let ctx = driver.new_context().await.unwrap();
        driver.navigate(&ctx, LIST).await.unwrap();
        NavigationState::new(ctx, LIST)
    }

    #[tokio::test]
    async fn click_navigate_extract_back_restores_baseline() {
        let driver = detail_site();
        let registry = registry();
        let interpreter = StepInterpreter::new(&driver, &registry);
        let mut nav = baseline(&driver).await;
        let mut result = ExtractionResult::new(0, LIST);

        let workflow = WorkflowBuilder::new("detail")
            .click_and_extract("step1", ".detail-link", ["description"])
            .wait_for(WaitCondition::Selector {
                target: ".desc".to_string(),
            })
            .navigate_back("step2")
            .build(&selections())
            .unwrap();

        let outcome = interpreter
            .run_workflow(&mut nav, &workflow, 0, &mut result)
            .await
            .unwrap();

        assert_eq!(outcome, WorkflowOutcome::Completed);
        assert!(result.success);
        assert!(result.errors.is_empty());
        assert_eq!(
            result.step_outputs["step1"]["description"],
            Some("Full description".to_string())
        );
        assert!(nav.is_baseline());
        assert_eq!(driver.current_url(nav.active()).await.unwrap(), LIST);
    }

    #[tokio::test]
    async fn missing_click_target_is_recorded_and_skipped() {
        let driver = detail_site();
        let registry = registry();
        let interpreter = StepInterpreter::new(&driver, &registry);
        let mut nav = baseline(&driver).await;
        let mut result = ExtractionResult::new(0, LIST);

        let workflow = WorkflowBuilder::new("detail")
            .click_and_extract("step1", ".missing-link", ["description"])
            .build(&selections())
            .unwrap();

        let outcome = interpreter
            .run_workflow(&mut nav, &workflow, 0, &mut result)
            .await
            .unwrap();

        assert_eq!(outcome, WorkflowOutcome::Completed);
        assert!(result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, ErrorKind::SelectorNotFound);
        assert!(!result.step_outputs.contains_key("step1"));
    }

    #[tokio::test]
    async fn required_step_failure_aborts_the_workflow() {
        let driver = detail_site();
        let registry = registry();
        let interpreter = StepInterpreter::new(&driver, &registry);
        let mut nav = baseline(&driver).await;
        let mut result = ExtractionResult::new(0, LIST);

        let workflow = WorkflowBuilder::new("detail")
            .click_and_extract("step1", ".missing-link", Vec::<&str>::new())
            .required()
            .extract_only("step2", ["title"])
            .build(&selections())
            .unwrap();

        let outcome = interpreter
            .run_workflow(&mut nav, &workflow, 0, &mut result)
            .await
            .unwrap();

        assert_eq!(outcome, WorkflowOutcome::Aborted);
        assert!(!result.success);
        assert!(!result.step_outputs.contains_key("step2"));
        assert!(nav.is_baseline());
    }

    #[tokio::test]
    async fn open_new_tab_extracts_and_cleans_up() {
        let driver = detail_site();
        let registry = registry();
        let interpreter = StepInterpreter::new(&driver, &registry);
        let mut nav = baseline(&driver).await;
        let mut result = ExtractionResult::new(0, LIST);

        let workflow = WorkflowBuilder::new("detail")
            .open_tab_and_extract("step1", ".detail-link", ["description"])
            .navigate_back("step2")
            .build(&selections())
            .unwrap();

        let outcome = interpreter
            .run_workflow(&mut nav, &workflow, 0, &mut result)
            .await
            .unwrap();

        assert_eq!(outcome, WorkflowOutcome::Completed);
        assert_eq!(
            result.step_outputs["step1"]["description"],
            Some("Full description".to_string())
        );
        assert!(nav.is_baseline());
        assert_eq!(nav.opened_tab_count(), 0);
        // Only the baseline context stays open.
        assert_eq!(driver.open_context_count(), 1);
    }

    #[tokio::test]
    async fn open_new_tab_timeout_leaves_no_tab_behind() {
        let driver = detail_site();
        driver.mark_slow(DETAIL);
        let registry = registry();
        let interpreter = StepInterpreter::new(&driver, &registry);
        let mut nav = baseline(&driver).await;
        let mut result = ExtractionResult::new(0, LIST);

        let workflow = WorkflowBuilder::new("detail")
            .open_tab_and_extract("step1", ".detail-link", ["description"])
            .timeout_ms(50)
            .build(&selections())
            .unwrap();

        let outcome = interpreter
            .run_workflow(&mut nav, &workflow, 0, &mut result)
            .await
            .unwrap();

        assert_eq!(outcome, WorkflowOutcome::Completed);
        assert!(result.success);
        assert_eq!(result.errors[0].kind, ErrorKind::NavigationTimeout);
        assert_eq!(nav.opened_tab_count(), 0);
        assert_eq!(driver.open_context_count(), 1);
    }

    #[tokio::test]
    async fn navigate_back_at_baseline_records_a_warning() {
        let driver = detail_site();
        let registry = registry();
        let interpreter = StepInterpreter::new(&driver, &registry);
        let mut nav = baseline(&driver).await;
        let mut result = ExtractionResult::new(0, LIST);

        let workflow = WorkflowBuilder::new("detail")
            .navigate_back("step1")
            .build(&selections())
            .unwrap();

        let outcome = interpreter
            .run_workflow(&mut nav, &workflow, 0, &mut result)
            .await
            .unwrap();

        assert_eq!(outcome, WorkflowOutcome::Completed);
        assert!(result.success);
        assert!(result.errors.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn workflow_end_without_navigate_back_still_restores() {
        let driver = detail_site();
        let registry = registry();
        let interpreter = StepInterpreter::new(&driver, &registry);
        let mut nav = baseline(&driver).await;
        let mut result = ExtractionResult::new(0, LIST);

        // No explicit navigate_back; reset at workflow end must clean up.
        let workflow = WorkflowBuilder::new("detail")
            .open_tab_and_extract("step1", ".detail-link", ["description"])
            .build(&selections())
            .unwrap();

        interpreter
            .run_workflow(&mut nav, &workflow, 0, &mut result)
            .await
            .unwrap();

        assert!(nav.is_baseline());
        assert_eq!(driver.open_context_count(), 1);
        assert_eq!(driver.current_url(nav.active()).await.unwrap(), LIST);
    }

    #[test]
    fn hrefs_resolve_against_the_current_page() {
        assert_eq!(
            resolve_href("https://site.test/list", "/detail/1").unwrap(),
            "https://site.test/detail/1"
        );
        assert_eq!(
            resolve_href("https://site.test/list", "https://other.test/x").unwrap(),
            "https://other.test/x"
        );
    }
}
