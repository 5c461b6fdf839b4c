use crate::config::WaitCondition;
use crate::errors::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Handle to one browsing context (page/tab). Cheap to clone; equality
    /// identifies the same underlying context.
    type Context: Clone + PartialEq + Send + Sync + std::fmt::Debug;

    /// Handle to one located element. Handles may go stale after navigation;
    /// callers re-query rather than holding them across navigations.
    type Element: Clone + Send + Sync;

    /// Open a fresh browsing context (tab).
    async fn new_context(&self) -> Result<Self::Context>;

    /// Navigate a context to a URL and wait for the initial load.
    async fn navigate(&self, ctx: &Self::Context, url: &str) -> Result<()>;

    /// Current URL of a context.
    async fn current_url(&self, ctx: &Self::Context) -> Result<String>;

    /// First element matching `selector`, searched within `scope` when given,
    /// otherwise document-wide.
    async fn query(
        &self,
        ctx: &Self::Context,
        scope: Option<&Self::Element>,
        selector: &str,
    ) -> Result<Option<Self::Element>>;

    /// All elements matching `selector`, in document order.
    async fn query_all(
        &self,
        ctx: &Self::Context,
        scope: Option<&Self::Element>,
        selector: &str,
    ) -> Result<Vec<Self::Element>>;

    /// Dispatch a click on an element.
    async fn click(&self, ctx: &Self::Context, element: &Self::Element) -> Result<()>;

    /// Whether an element is visible, enabled, and accepts pointer events.
    async fn is_interactable(&self, ctx: &Self::Context, element: &Self::Element) -> Result<bool>;

    /// Text content of an element; Ok(None) when the element is gone.
    async fn read_text(&self, ctx: &Self::Context, element: &Self::Element)
        -> Result<Option<String>>;

    /// Attribute value of an element; Ok(None) when absent or gone.
    async fn read_attribute(
        &self,
        ctx: &Self::Context,
        element: &Self::Element,
        attribute: &str,
    ) -> Result<Option<String>>;

    /// Block until the condition holds or the timeout elapses
    /// (`CrawlError::TimeoutError`).
    async fn wait_for(
        &self,
        ctx: &Self::Context,
        condition: &WaitCondition,
        timeout: Duration,
    ) -> Result<()>;

    /// Close a context. Closing an already-closed context is not an error.
    async fn close_context(&self, ctx: &Self::Context) -> Result<()>;
}
