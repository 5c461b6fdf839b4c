use crate::browser::BrowserDriver;
use crate::config::WaitCondition;
use crate::errors::Result;
use std::time::Duration;
use tracing::{debug, warn};

const RESTORE_TIMEOUT: Duration = Duration::from_secs(10);

/// How the previous browsing context is restored when a frame is left.
/// Clicks that navigate the current tab are undone by URL; new tabs are
/// closed and the prior tab reactivated.
enum Frame<C> {
    SameContext { prior_url: String },
    NewContext { prior: C },
}

/// Tracks the active browsing context and the stack of contexts to unwind.
/// Owned by one in-flight item; at item boundaries the stack and the tab
/// registry are both empty ("baseline restored").
pub struct NavigationState<D: BrowserDriver> {
    baseline: D::Context,
    baseline_url: String,
    active: D::Context,
    stack: Vec<Frame<D::Context>>,
    opened_tabs: Vec<D::Context>,
}

impl<D: BrowserDriver> NavigationState<D> {
    pub fn new(baseline: D::Context, baseline_url: impl Into<String>) -> Self {
        Self {
            active: baseline.clone(),
            baseline,
            baseline_url: baseline_url.into(),
            stack: Vec::new(),
            opened_tabs: Vec::new(),
        }
    }

    pub fn active(&self) -> &D::Context {
        &self.active
    }

    /// Stack and tab registry both empty; the item iterator may resolve
    /// item roots only in this state.
    pub fn is_baseline(&self) -> bool {
        self.stack.is_empty() && self.opened_tabs.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn opened_tab_count(&self) -> usize {
        self.opened_tabs.len()
    }

    /// Record that the active context navigated away; `leave` will navigate
    /// it back to `prior_url`.
    pub fn enter_same_context(&mut self, prior_url: impl Into<String>) {
        self.stack.push(Frame::SameContext {
            prior_url: prior_url.into(),
        });
    }

    /// Make a freshly opened tab the active context. The tab is registered
    /// and closed again on `leave` or `reset`, whichever comes first.
    pub fn enter_tab(&mut self, ctx: D::Context) {
        self.opened_tabs.push(ctx.clone());
        let prior = std::mem::replace(&mut self.active, ctx);
        self.stack.push(Frame::NewContext { prior });
    }

    /// Pop one frame: restore the previous context, closing the context
    /// being left when it was one we opened. Returns false (nothing to
    /// return to) when the stack is already empty.
    pub async fn leave(&mut self, driver: &D) -> Result<bool> {
        match self.stack.pop() {
            None => Ok(false),
            Some(Frame::SameContext { prior_url }) => {
                driver.navigate(&self.active, &prior_url).await?;
                if let Err(e) = driver
                    .wait_for(&self.active, &WaitCondition::NetworkIdle, RESTORE_TIMEOUT)
                    .await
                {
                    warn!("settle after back-navigation timed out: {}", e);
                }
                Ok(true)
            }
            Some(Frame::NewContext { prior }) => {
                let leaving = std::mem::replace(&mut self.active, prior);
                if let Some(pos) = self.opened_tabs.iter().position(|t| *t == leaving) {
                    self.opened_tabs.remove(pos);
                    if let Err(e) = driver.close_context(&leaving).await {
                        warn!("closing tab failed: {}", e);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Force-restore baseline: close every opened tab, drop all frames, and
    /// bring the baseline context back to the listing page. Runs at the end
    /// of every item, on success and failure alike.
    pub async fn reset(&mut self, driver: &D) -> Result<()> {
        for tab in self.opened_tabs.drain(..) {
            if let Err(e) = driver.close_context(&tab).await {
                warn!("closing tab during reset failed: {}", e);
            }
        }
        self.stack.clear();
        self.active = self.baseline.clone();

        let current = driver.current_url(&self.baseline).await?;
        if current != self.baseline_url {
            debug!("restoring listing page {}", self.baseline_url);
            driver.navigate(&self.baseline, &self.baseline_url).await?;
            if let Err(e) = driver
                .wait_for(&self.baseline, &WaitCondition::NetworkIdle, RESTORE_TIMEOUT)
                .await
            {
                warn!("settle after listing restore timed out: {}", e);
            }
        }
        Ok(())
    }
}
