use crate::browser::BrowserDriver;
use crate::config::{Configuration, SelectionRegistry, WaitCondition};
use crate::engine::items::ItemIterator;
use crate::engine::result::ExtractionResult;
use crate::errors::Result;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Pagination state machine. `Done` is terminal; a page is never re-entered
/// once left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveState {
    LoadingPage,
    ProcessingItems,
    Advancing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Pagination control absent, disabled, or clicking it changed nothing.
    PaginationExhausted,
    MaxPagesReached,
    NoItemsOnPage,
    DeadlineExceeded,
}

/// One processed listing page's worth of results.
#[derive(Debug, Clone)]
pub struct PageBatch {
    pub page_number: u32,
    pub results: Vec<ExtractionResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub configuration: String,
    pub pages_visited: u32,
    pub total_items: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub stop_reason: Option<StopReason>,
}

enum AdvanceOutcome {
    Advanced,
    Stop(StopReason),
}

/// A crawl in progress: pull one page at a time with `next_page`, or drain
/// with `run_to_end`. Accumulated results survive whatever stopped the run.
pub struct CrawlRun<D: BrowserDriver> {
    driver: D,
    config: Configuration,
    registry: SelectionRegistry,
    baseline: D::Context,
    state: DriveState,
    pages_visited: u32,
    results: Vec<ExtractionResult>,
    run_id: Uuid,
    deadline_at: Option<Instant>,
    stop: Option<StopReason>,
}

impl<D: BrowserDriver> CrawlRun<D> {
    /// Validate the configuration, open the baseline context, and load the
    /// first listing page.
    pub async fn start(driver: D, config: Configuration) -> Result<Self> {
        let registry = SelectionRegistry::new(&config)?;
        let baseline = driver.new_context().await?;
        driver.navigate(&baseline, &config.base_url).await?;
        if let Err(e) = driver
            .wait_for(&baseline, &WaitCondition::NetworkIdle, PAGE_LOAD_TIMEOUT)
            .await
        {
            warn!("initial page load did not settle: {}", e);
        }

        let run_id = Uuid::new_v4();
        info!("run {} starting at {}", run_id, config.base_url);

        Ok(Self {
            driver,
            config,
            registry,
            baseline,
            state: DriveState::LoadingPage,
            pages_visited: 0,
            results: Vec::new(),
            run_id,
            deadline_at: None,
            stop: None,
        })
    }

    /// Cancel the whole crawl once `deadline` has elapsed; accumulated
    /// results remain available.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_at = Some(Instant::now() + deadline);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn results(&self) -> &[ExtractionResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ExtractionResult> {
        self.results
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    pub fn summary(&self) -> RunSummary {
        let failed = self.results.iter().filter(|r| !r.success).count();
        RunSummary {
            run_id: self.run_id,
            configuration: self.config.name.clone(),
            pages_visited: self.pages_visited,
            total_items: self.results.len(),
            succeeded: self.results.len() - failed,
            failed,
            stop_reason: self.stop,
        }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline_at.is_some_and(|d| Instant::now() >= d)
    }

    fn finish(&mut self, reason: StopReason) {
        debug!("run {} done: {:?}", self.run_id, reason);
        self.stop = Some(reason);
        self.state = DriveState::Done;
    }

    /// Drive the state machine through one listing page. Returns None once
    /// the run is done; `Done` is reached exactly once and is terminal.
    pub async fn next_page(&mut self) -> Result<Option<PageBatch>> {
        loop {
            if self.state != DriveState::Done && self.deadline_passed() {
                self.finish(StopReason::DeadlineExceeded);
                return Ok(None);
            }
            match self.state {
                DriveState::Done => return Ok(None),
                DriveState::LoadingPage => {
                    let items = self
                        .driver
                        .query_all(&self.baseline, None, &self.registry.items_container().selector)
                        .await?;
                    if items.is_empty() {
                        self.finish(StopReason::NoItemsOnPage);
                        return Ok(None);
                    }
                    self.state = DriveState::ProcessingItems;
                }
                DriveState::ProcessingItems => {
                    let iterator = ItemIterator::new(&self.driver, &self.registry, &self.config);
                    let page_results =
                        iterator.process_page(&self.baseline, self.deadline_at).await?;
                    self.pages_visited += 1;
                    info!(
                        "page {}: extracted {} items",
                        self.pages_visited,
                        page_results.len()
                    );
                    self.results.extend(page_results.iter().cloned());
                    self.state = DriveState::Advancing;
                    return Ok(Some(PageBatch {
                        page_number: self.pages_visited,
                        results: page_results,
                    }));
                }
                DriveState::Advancing => {
                    if self
                        .config
                        .max_pages
                        .is_some_and(|max| self.pages_visited >= max)
                    {
                        self.finish(StopReason::MaxPagesReached);
                        return Ok(None);
                    }
                    match self.advance().await? {
                        AdvanceOutcome::Advanced => self.state = DriveState::LoadingPage,
                        AdvanceOutcome::Stop(reason) => {
                            self.finish(reason);
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    /// Drain the remaining pages and report totals.
    pub async fn run_to_end(&mut self) -> Result<RunSummary> {
        while self.next_page().await?.is_some() {}
        Ok(self.summary())
    }

    /// Close the baseline context and hand back everything extracted.
    pub async fn shutdown(self) -> Result<Vec<ExtractionResult>> {
        self.driver.close_context(&self.baseline).await?;
        Ok(self.results)
    }

    /// Click the pagination control and verify the listing actually moved:
    /// the new page must hold items and they must differ from the old ones,
    /// guarding against disabled or no-op "next" buttons.
    async fn advance(&self) -> Result<AdvanceOutcome> {
        let pagination = match self.registry.pagination() {
            Some(p) => p.clone(),
            None => return Ok(AdvanceOutcome::Stop(StopReason::PaginationExhausted)),
        };

        let candidates = self
            .driver
            .query_all(&self.baseline, None, &pagination.selector)
            .await?;
        if candidates.is_empty() {
            info!("pagination element not found: {}", pagination.selector);
            return Ok(AdvanceOutcome::Stop(StopReason::PaginationExhausted));
        }

        let mut element = None;
        match &pagination.expected_text {
            Some(expected) => {
                let expected = expected.trim().to_lowercase();
                for candidate in &candidates {
                    let text = self
                        .driver
                        .read_text(&self.baseline, candidate)
                        .await?
                        .unwrap_or_default()
                        .trim()
                        .to_lowercase();
                    if !text.is_empty()
                        && (text == expected || text.contains(&expected) || expected.contains(&text))
                    {
                        element = Some(candidate.clone());
                        break;
                    }
                }
                if element.is_none() {
                    info!("no pagination element matching '{}'", expected);
                    return Ok(AdvanceOutcome::Stop(StopReason::PaginationExhausted));
                }
            }
            None => element = candidates.first().cloned(),
        }
        let element = match element {
            Some(e) => e,
            None => return Ok(AdvanceOutcome::Stop(StopReason::PaginationExhausted)),
        };

        if !self.driver.is_interactable(&self.baseline, &element).await? {
            info!("pagination element is not clickable");
            return Ok(AdvanceOutcome::Stop(StopReason::PaginationExhausted));
        }

        let fingerprint_before = self.page_fingerprint().await?;

        self.driver.click(&self.baseline, &element).await?;
        if let Err(e) = self
            .driver
            .wait_for(&self.baseline, &WaitCondition::NetworkIdle, PAGE_LOAD_TIMEOUT)
            .await
        {
            warn!("next page did not settle: {}", e);
        }
        tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;

        let items = self
            .driver
            .query_all(&self.baseline, None, &self.registry.items_container().selector)
            .await?;
        if items.is_empty() {
            return Ok(AdvanceOutcome::Stop(StopReason::NoItemsOnPage));
        }
        if self.page_fingerprint().await? == fingerprint_before {
            info!("pagination click was a no-op, stopping");
            return Ok(AdvanceOutcome::Stop(StopReason::PaginationExhausted));
        }

        Ok(AdvanceOutcome::Advanced)
    }

    /// Identity of the current listing: URL plus item count plus item texts.
    async fn page_fingerprint(&self) -> Result<u64> {
        let mut hasher = DefaultHasher::new();
        self.driver
            .current_url(&self.baseline)
            .await?
            .hash(&mut hasher);
        let items = self
            .driver
            .query_all(&self.baseline, None, &self.registry.items_container().selector)
            .await?;
        items.len().hash(&mut hasher);
        for item in &items {
            self.driver
                .read_text(&self.baseline, item)
                .await?
                .hash(&mut hasher);
        }
        Ok(hasher.finish())
    }
}

/// Run a whole crawl in one call: start, drain, close.
pub async fn crawl<D: BrowserDriver>(
    driver: D,
    config: Configuration,
) -> Result<Vec<ExtractionResult>> {
    let mut run = CrawlRun::start(driver, config).await?;
    run.run_to_end().await?;
    run.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Selection, SelectionKind, Workflow, WorkflowBuilder};
    use crate::testing::{MockDriver, MockNode, MockPage};

    const PAGE1: &str = "https://site.test/list";
    const PAGE2: &str = "https://site.test/list?page=2";
    const PAGE3: &str = "https://site.test/list?page=3";

    fn selections() -> Vec<Selection> {
        vec![
            Selection::new("items", ".item", SelectionKind::ItemsContainer),
            Selection::new("title", "h2", SelectionKind::DataField),
            Selection::new("description", ".desc", SelectionKind::DataField),
        ]
    }

    fn config(workflows: Vec<Workflow>, max_pages: Option<u32>) -> Configuration {
        Configuration {
            name: "demo".to_string(),
            base_url: PAGE1.to_string(),
            selections: selections(),
            workflows,
            pagination_selection: Some(
                Selection::new("next", ".next", SelectionKind::Pagination)
                    .with_expected_text("Next"),
            ),
            max_pages,
            delay_ms: 0,
        }
    }

    fn listing_page(url: &str, titles: &[&str], next: Option<MockNode>) -> MockPage {
        let mut page = MockPage::new(url);
        for title in titles {
            page = page.node(MockNode::new(".item").text(*title).child(
                MockNode::new("h2").text(format!("Title {}", title)),
            ));
        }
        if let Some(next) = next {
            page = page.node(next);
        }
        page
    }

    fn next_button(to: &str) -> MockNode {
        MockNode::new(".next").text("Next").clicks_to(to)
    }

    fn three_page_site() -> MockDriver {
        MockDriver::new(vec![
            listing_page(PAGE1, &["a1", "a2"], Some(next_button(PAGE2))),
            listing_page(PAGE2, &["b1"], Some(next_button(PAGE3))),
            listing_page(PAGE3, &["c1", "c2", "c3"], None),
        ])
    }

    #[tokio::test]
    async fn crawls_until_pagination_stops_resolving() {
        let driver = three_page_site();
        let mut run = CrawlRun::start(driver, config(vec![], None)).await.unwrap();

        let mut pages = 0;
        while let Some(batch) = run.next_page().await.unwrap() {
            pages += 1;
            assert_eq!(batch.page_number, pages);
        }
        assert_eq!(pages, 3);
        assert_eq!(run.stop_reason(), Some(StopReason::PaginationExhausted));
        assert_eq!(run.results().len(), 6);

        // Done is terminal: further pulls stay empty.
        assert!(run.next_page().await.unwrap().is_none());
        assert_eq!(run.summary().pages_visited, 3);
    }

    #[tokio::test]
    async fn max_pages_caps_the_run() {
        let driver = three_page_site();
        let mut run = CrawlRun::start(driver, config(vec![], Some(2)))
            .await
            .unwrap();
        let summary = run.run_to_end().await.unwrap();

        assert_eq!(summary.pages_visited, 2);
        assert_eq!(summary.total_items, 3);
        assert_eq!(summary.stop_reason, Some(StopReason::MaxPagesReached));
    }

    #[tokio::test]
    async fn disabled_next_button_stops_the_run() {
        let driver = MockDriver::new(vec![listing_page(
            PAGE1,
            &["a1"],
            Some(next_button(PAGE2).not_interactable()),
        )]);
        let mut run = CrawlRun::start(driver, config(vec![], None)).await.unwrap();
        let summary = run.run_to_end().await.unwrap();

        assert_eq!(summary.pages_visited, 1);
        assert_eq!(summary.stop_reason, Some(StopReason::PaginationExhausted));
    }

    #[tokio::test]
    async fn no_op_next_button_stops_the_run() {
        // The click "succeeds" but reloads the same listing.
        let driver = MockDriver::new(vec![listing_page(
            PAGE1,
            &["a1", "a2"],
            Some(next_button(PAGE1)),
        )]);
        let mut run = CrawlRun::start(driver, config(vec![], None)).await.unwrap();
        let summary = run.run_to_end().await.unwrap();

        assert_eq!(summary.pages_visited, 1);
        assert_eq!(summary.total_items, 2);
        assert_eq!(summary.stop_reason, Some(StopReason::PaginationExhausted));
    }

    #[tokio::test]
    async fn post_click_page_without_items_stops_the_run() {
        let driver = MockDriver::new(vec![
            listing_page(PAGE1, &["a1"], Some(next_button(PAGE2))),
            MockPage::new(PAGE2),
        ]);
        let mut run = CrawlRun::start(driver, config(vec![], None)).await.unwrap();
        let summary = run.run_to_end().await.unwrap();

        assert_eq!(summary.pages_visited, 1);
        assert_eq!(summary.stop_reason, Some(StopReason::NoItemsOnPage));
    }

    #[tokio::test]
    async fn mismatched_pagination_text_stops_the_run() {
        let driver = MockDriver::new(vec![listing_page(
            PAGE1,
            &["a1"],
            Some(MockNode::new(".next").text("Previous").clicks_to(PAGE2)),
        )]);
        let mut run = CrawlRun::start(driver, config(vec![], None)).await.unwrap();
        let summary = run.run_to_end().await.unwrap();

        assert_eq!(summary.pages_visited, 1);
        assert_eq!(summary.stop_reason, Some(StopReason::PaginationExhausted));
    }

    #[tokio::test]
    async fn workflow_failures_do_not_stop_pagination() {
        // Item a2 has no detail link; the run must still reach page 2.
        let detail = WorkflowBuilder::new("detail")
            .click_and_extract("step1", ".detail-link", ["description"])
            .navigate_back("step2")
            .build(&selections())
            .unwrap();

        let page1 = MockPage::new(PAGE1)
            .node(
                MockNode::new(".item")
                    .text("a1")
                    .child(MockNode::new("h2").text("Title a1"))
                    .child(
                        MockNode::new(".detail-link").clicks_to("https://site.test/detail/a1"),
                    ),
            )
            .node(
                MockNode::new(".item")
                    .text("a2")
                    .child(MockNode::new("h2").text("Title a2")),
            )
            .node(next_button(PAGE2));
        let driver = MockDriver::new(vec![
            page1,
            MockPage::new("https://site.test/detail/a1")
                .node(MockNode::new(".desc").text("Detail a1")),
            listing_page(PAGE2, &["b1"], None),
        ]);

        let mut run = CrawlRun::start(driver, config(vec![detail], None))
            .await
            .unwrap();
        let summary = run.run_to_end().await.unwrap();

        assert_eq!(summary.pages_visited, 2);
        assert_eq!(summary.total_items, 3);
        assert_eq!(summary.failed, 0);

        let results = run.results();
        assert_eq!(
            results[0].step_outputs["step1"]["description"],
            Some("Detail a1".to_string())
        );
        assert!(!results[1].step_outputs.contains_key("step1"));
        assert_eq!(results[1].errors.len(), 1);
    }

    #[tokio::test]
    async fn baseline_context_is_the_only_survivor() {
        let detail = WorkflowBuilder::new("detail")
            .open_tab_and_extract("step1", ".detail-link", ["description"])
            .navigate_back("step2")
            .build(&selections())
            .unwrap();

        let mut page1 = MockPage::new(PAGE1);
        for item in ["a1", "a2"] {
            page1 = page1.node(
                MockNode::new(".item")
                    .text(item)
                    .child(MockNode::new("h2").text(format!("Title {}", item)))
                    .child(
                        MockNode::new(".detail-link")
                            .attr("href", format!("/detail/{}", item))
                            .clicks_to(format!("https://site.test/detail/{}", item)),
                    ),
            );
        }
        page1 = page1.node(next_button(PAGE2));
        let driver = MockDriver::new(vec![
            page1,
            listing_page(PAGE2, &["b1"], None),
            MockPage::new("https://site.test/detail/a1")
                .node(MockNode::new(".desc").text("Detail a1")),
            MockPage::new("https://site.test/detail/a2")
                .node(MockNode::new(".desc").text("Detail a2")),
        ]);

        let probe = driver.clone();
        let mut run = CrawlRun::start(driver, config(vec![detail], None))
            .await
            .unwrap();
        let summary = run.run_to_end().await.unwrap();
        assert_eq!(summary.pages_visited, 2);
        assert_eq!(summary.failed, 0);

        assert_eq!(
            run.results()[0].step_outputs["step1"]["description"],
            Some("Detail a1".to_string())
        );

        // Every detail tab was closed again; only the baseline remains.
        assert_eq!(probe.open_context_count(), 1);
        let results = run.shutdown().await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(probe.open_context_count(), 0);
    }

    #[tokio::test]
    async fn empty_workflow_output_matches_plain_listing_extraction() {
        let with_workflows = {
            let driver = three_page_site();
            crawl(driver, config(vec![], None)).await.unwrap()
        };
        for result in &with_workflows {
            assert!(result.success);
            assert!(result.step_outputs.is_empty());
            assert!(result.base_fields.contains_key("title"));
        }
    }

    #[tokio::test]
    async fn expired_deadline_stops_before_any_page() {
        let driver = three_page_site();
        let mut run = CrawlRun::start(driver, config(vec![], None))
            .await
            .unwrap()
            .with_deadline(Duration::ZERO);
        let summary = run.run_to_end().await.unwrap();

        assert_eq!(summary.pages_visited, 0);
        assert_eq!(summary.stop_reason, Some(StopReason::DeadlineExceeded));
        assert!(run.results().is_empty());
    }
}
