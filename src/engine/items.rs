use crate::browser::BrowserDriver;
use crate::config::{Configuration, SelectionRegistry};
use crate::engine::interpreter::{read_selection, StepInterpreter};
use crate::engine::navigation::NavigationState;
use crate::engine::result::{ErrorKind, ExtractionResult};
use crate::errors::Result;
use tracing::{debug, warn};

/// Step id under which item-level failures (stale roots, lost contexts) are
/// recorded when no single step can be blamed.
const ITEM_STEP_ID: &str = "item";

/// Enumerates item containers on the current listing page and merges
/// listing fields with workflow outputs into one record per item. Roots are
/// re-resolved by index on every access instead of holding element handles
/// across navigation boundaries.
pub struct ItemIterator<'a, D: BrowserDriver> {
    driver: &'a D,
    registry: &'a SelectionRegistry,
    config: &'a Configuration,
}

impl<'a, D: BrowserDriver> ItemIterator<'a, D> {
    pub fn new(
        driver: &'a D,
        registry: &'a SelectionRegistry,
        config: &'a Configuration,
    ) -> Self {
        Self {
            driver,
            registry,
            config,
        }
    }

    /// Process every item on the current listing page. Items that fail at
    /// the item level are retried once from baseline; a second failure marks
    /// their result failed and iteration moves on. A run deadline cuts the
    /// page short at the next item boundary; results so far are returned.
    pub async fn process_page(
        &self,
        baseline: &D::Context,
        deadline: Option<std::time::Instant>,
    ) -> Result<Vec<ExtractionResult>> {
        let items_selector = &self.registry.items_container().selector;
        let page_url = self.driver.current_url(baseline).await?;
        let total = self
            .driver
            .query_all(baseline, None, items_selector)
            .await?
            .len();
        debug!("found {} items on {}", total, page_url);

        let mut results = Vec::with_capacity(total);
        'items: for index in 0..total {
            if deadline.is_some_and(|d| std::time::Instant::now() >= d) {
                warn!("run deadline reached, stopping after {} items", index);
                break;
            }
            let mut attempts = 0;
            loop {
                attempts += 1;
                match self.process_item(baseline, &page_url, index).await {
                    Ok(Some(result)) => {
                        results.push(result);
                        break;
                    }
                    Ok(None) => {
                        // The listing no longer holds this index; the page
                        // changed underneath us and later indices are gone too.
                        warn!("item {} no longer present, stopping page", index + 1);
                        let mut result = ExtractionResult::new(index, page_url.as_str());
                        result.success = false;
                        result.record_error(
                            ITEM_STEP_ID,
                            ErrorKind::ContextLost,
                            format!("item {} no longer present on listing", index),
                        );
                        results.push(result);
                        break 'items;
                    }
                    Err(e) if e.is_item_level() && attempts == 1 => {
                        warn!("item {} failed ({}), retrying from baseline", index, e);
                        let mut nav =
                            NavigationState::<D>::new(baseline.clone(), page_url.clone());
                        nav.reset(self.driver).await?;
                    }
                    Err(e) if e.is_item_level() => {
                        let mut result = ExtractionResult::new(index, page_url.as_str());
                        result.success = false;
                        result.record_error(ITEM_STEP_ID, ErrorKind::from_error(&e), e.to_string());
                        results.push(result);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(results)
    }

    /// One attempt at one item: listing fields, then every configured
    /// workflow. Ok(None) when the item root has vanished.
    async fn process_item(
        &self,
        baseline: &D::Context,
        page_url: &str,
        index: usize,
    ) -> Result<Option<ExtractionResult>> {
        let items_selector = &self.registry.items_container().selector;
        let roots = self
            .driver
            .query_all(baseline, None, items_selector)
            .await?;
        let root = match roots.into_iter().nth(index) {
            Some(root) => root,
            None => return Ok(None),
        };

        let mut result = ExtractionResult::new(index, page_url);

        for selection in self.registry.listing_fields() {
            let value = match self
                .driver
                .query(baseline, Some(&root), &selection.selector)
                .await?
            {
                Some(element) => {
                    read_selection(self.driver, baseline, &element, selection).await?
                }
                None => None,
            };
            result.base_fields.insert(selection.name.clone(), value);
        }

        let interpreter = StepInterpreter::new(self.driver, self.registry);
        for workflow in &self.config.workflows {
            let mut nav = NavigationState::<D>::new(baseline.clone(), page_url.to_string());
            interpreter
                .run_workflow(&mut nav, workflow, index, &mut result)
                .await?;
        }

        Ok(Some(result))
    }
}
