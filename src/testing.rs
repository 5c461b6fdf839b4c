//! Scripted in-memory driver for exercising the engine without a browser.
//!
//! A `MockDriver` serves a fixed set of pages keyed by URL. Selector
//! matching is exact-string, nodes form a tree per page, and navigation
//! bumps a per-context epoch so element handles from before a navigation go
//! stale, the same way real DOM handles do.

use crate::browser::BrowserDriver;
use crate::config::WaitCondition;
use crate::errors::{CrawlError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MockNode {
    selector: String,
    text: Option<String>,
    attrs: HashMap<String, String>,
    interactable: bool,
    click_goes_to: Option<String>,
    children: Vec<MockNode>,
}

impl MockNode {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            text: None,
            attrs: HashMap::new(),
            interactable: true,
            click_goes_to: None,
            children: Vec::new(),
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn not_interactable(mut self) -> Self {
        self.interactable = false;
        self
    }

    /// Clicking this node navigates its context to `url`.
    pub fn clicks_to(mut self, url: impl Into<String>) -> Self {
        self.click_goes_to = Some(url.into());
        self
    }

    pub fn child(mut self, node: MockNode) -> Self {
        self.children.push(node);
        self
    }
}

#[derive(Debug, Clone)]
pub struct MockPage {
    url: String,
    nodes: Vec<MockNode>,
}

impl MockPage {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            nodes: Vec::new(),
        }
    }

    pub fn node(mut self, node: MockNode) -> Self {
        self.nodes.push(node);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockContext {
    id: u64,
}

/// Path of child indices from the page root, valid for one epoch.
#[derive(Debug, Clone)]
pub struct MockElement {
    ctx_id: u64,
    epoch: u64,
    path: Vec<usize>,
}

struct ContextState {
    url: String,
    epoch: u64,
    closed: bool,
}

struct Inner {
    pages: HashMap<String, MockPage>,
    contexts: HashMap<u64, ContextState>,
    next_id: u64,
    slow_urls: HashSet<String>,
    fail_once: Option<String>,
}

/// Clones share one scripted site, so a test can keep a probe handle while
/// the engine owns the driver.
#[derive(Clone)]
pub struct MockDriver {
    inner: Arc<Mutex<Inner>>,
}

fn collect_matches<'a>(
    nodes: &'a [MockNode],
    prefix: &mut Vec<usize>,
    selector: &str,
    out: &mut Vec<(Vec<usize>, &'a MockNode)>,
) {
    for (i, node) in nodes.iter().enumerate() {
        prefix.push(i);
        if node.selector == selector {
            out.push((prefix.clone(), node));
        }
        collect_matches(&node.children, prefix, selector, out);
        prefix.pop();
    }
}

fn node_at<'a>(nodes: &'a [MockNode], path: &[usize]) -> Option<&'a MockNode> {
    let (&first, rest) = path.split_first()?;
    let node = nodes.get(first)?;
    if rest.is_empty() {
        Some(node)
    } else {
        node_at(&node.children, rest)
    }
}

impl MockDriver {
    pub fn new(pages: Vec<MockPage>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                pages: pages.into_iter().map(|p| (p.url.clone(), p)).collect(),
                contexts: HashMap::new(),
                next_id: 1,
                slow_urls: HashSet::new(),
                fail_once: None,
            })),
        }
    }

    /// Navigations to `url` hang until cancelled by the caller's timeout.
    pub fn mark_slow(&self, url: impl Into<String>) {
        self.inner.lock().unwrap().slow_urls.insert(url.into());
    }

    /// The next query for exactly `selector` fails with a stale-element
    /// error, once. Simulates the DOM being replaced mid-item.
    pub fn fail_next_query(&self, selector: impl Into<String>) {
        self.inner.lock().unwrap().fail_once = Some(selector.into());
    }

    pub fn is_closed(&self, ctx: &MockContext) -> bool {
        self.inner
            .lock()
            .unwrap()
            .contexts
            .get(&ctx.id)
            .map(|c| c.closed)
            .unwrap_or(true)
    }

    pub fn open_context_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .contexts
            .values()
            .filter(|c| !c.closed)
            .count()
    }

    fn with_page<T>(
        &self,
        ctx: &MockContext,
        f: impl FnOnce(&MockPage, u64) -> Result<T>,
    ) -> Result<T> {
        let inner = self.inner.lock().unwrap();
        let state = inner
            .contexts
            .get(&ctx.id)
            .ok_or_else(|| CrawlError::ContextLost(format!("unknown context {}", ctx.id)))?;
        if state.closed {
            return Err(CrawlError::ContextLost(format!("context {} closed", ctx.id)));
        }
        let epoch = state.epoch;
        match inner.pages.get(&state.url) {
            Some(page) => f(page, epoch),
            None => {
                // Unknown URLs render as empty documents.
                let empty = MockPage::new(state.url.clone());
                f(&empty, epoch)
            }
        }
    }

    /// Resolve an element handle, distinguishing "stale epoch" from "gone".
    fn resolve<T>(
        &self,
        ctx: &MockContext,
        element: &MockElement,
        f: impl FnOnce(Option<&MockNode>, bool) -> Result<T>,
    ) -> Result<T> {
        self.with_page(ctx, |page, epoch| {
            if element.ctx_id != ctx.id || element.epoch != epoch {
                return f(None, true);
            }
            f(node_at(&page.nodes, &element.path), false)
        })
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    type Context = MockContext;
    type Element = MockElement;

    async fn new_context(&self) -> Result<Self::Context> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.contexts.insert(
            id,
            ContextState {
                url: "about:blank".to_string(),
                epoch: 0,
                closed: false,
            },
        );
        Ok(MockContext { id })
    }

    async fn navigate(&self, ctx: &Self::Context, url: &str) -> Result<()> {
        let slow = self.inner.lock().unwrap().slow_urls.contains(url);
        if slow {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .contexts
            .get_mut(&ctx.id)
            .ok_or_else(|| CrawlError::ContextLost(format!("unknown context {}", ctx.id)))?;
        if state.closed {
            return Err(CrawlError::ContextLost(format!("context {} closed", ctx.id)));
        }
        state.url = url.to_string();
        state.epoch += 1;
        Ok(())
    }

    async fn current_url(&self, ctx: &Self::Context) -> Result<String> {
        let inner = self.inner.lock().unwrap();
        let state = inner
            .contexts
            .get(&ctx.id)
            .ok_or_else(|| CrawlError::ContextLost(format!("unknown context {}", ctx.id)))?;
        if state.closed {
            return Err(CrawlError::ContextLost(format!("context {} closed", ctx.id)));
        }
        Ok(state.url.clone())
    }

    async fn query(
        &self,
        ctx: &Self::Context,
        scope: Option<&Self::Element>,
        selector: &str,
    ) -> Result<Option<Self::Element>> {
        Ok(self.query_all(ctx, scope, selector).await?.into_iter().next())
    }

    async fn query_all(
        &self,
        ctx: &Self::Context,
        scope: Option<&Self::Element>,
        selector: &str,
    ) -> Result<Vec<Self::Element>> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_once.as_deref() == Some(selector) {
                inner.fail_once = None;
                return Err(CrawlError::StaleElement(selector.to_string()));
            }
        }
        self.with_page(ctx, |page, epoch| {
            let mut matches = Vec::new();
            match scope {
                None => {
                    let mut prefix = Vec::new();
                    collect_matches(&page.nodes, &mut prefix, selector, &mut matches);
                }
                Some(parent) => {
                    if parent.ctx_id != ctx.id || parent.epoch != epoch {
                        return Err(CrawlError::StaleElement(selector.to_string()));
                    }
                    let root = node_at(&page.nodes, &parent.path)
                        .ok_or_else(|| CrawlError::StaleElement(selector.to_string()))?;
                    let mut prefix = parent.path.clone();
                    collect_matches(&root.children, &mut prefix, selector, &mut matches);
                }
            }
            Ok(matches
                .into_iter()
                .map(|(path, _)| MockElement {
                    ctx_id: ctx.id,
                    epoch,
                    path,
                })
                .collect())
        })
    }

    async fn click(&self, ctx: &Self::Context, element: &Self::Element) -> Result<()> {
        let target = self.resolve(ctx, element, |node, stale| {
            if stale {
                return Err(CrawlError::StaleElement("clicked element".to_string()));
            }
            let node =
                node.ok_or_else(|| CrawlError::StaleElement("clicked element".to_string()))?;
            Ok(node.click_goes_to.clone())
        })?;
        if let Some(url) = target {
            self.navigate(ctx, &url).await?;
        }
        Ok(())
    }

    async fn is_interactable(&self, ctx: &Self::Context, element: &Self::Element) -> Result<bool> {
        self.resolve(ctx, element, |node, _| {
            Ok(node.map(|n| n.interactable).unwrap_or(false))
        })
    }

    async fn read_text(
        &self,
        ctx: &Self::Context,
        element: &Self::Element,
    ) -> Result<Option<String>> {
        self.resolve(ctx, element, |node, _| {
            Ok(node.and_then(|n| n.text.clone()))
        })
    }

    async fn read_attribute(
        &self,
        ctx: &Self::Context,
        element: &Self::Element,
        attribute: &str,
    ) -> Result<Option<String>> {
        self.resolve(ctx, element, |node, _| {
            Ok(node.and_then(|n| n.attrs.get(attribute).cloned()))
        })
    }

    async fn wait_for(
        &self,
        ctx: &Self::Context,
        condition: &WaitCondition,
        timeout: Duration,
    ) -> Result<()> {
        match condition {
            WaitCondition::NetworkIdle | WaitCondition::DomLoaded => Ok(()),
            WaitCondition::Selector { target } => self.with_page(ctx, |page, _| {
                let mut matches = Vec::new();
                let mut prefix = Vec::new();
                collect_matches(&page.nodes, &mut prefix, target, &mut matches);
                if matches.is_empty() {
                    Err(CrawlError::TimeoutError(format!(
                        "selector {} not present within {}ms",
                        target,
                        timeout.as_millis()
                    )))
                } else {
                    Ok(())
                }
            }),
        }
    }

    async fn close_context(&self, ctx: &Self::Context) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.contexts.get_mut(&ctx.id) {
            state.closed = true;
        }
        Ok(())
    }
}
