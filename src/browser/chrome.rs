use crate::browser::driver::BrowserDriver;
use crate::config::WaitCondition;
use crate::errors::{CrawlError, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
// readyState must hold 'complete' across two polls before the network is
// treated as idle.
const IDLE_SETTLE_POLLS: u32 = 2;

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: Option<String>,
    pub disable_images: bool,
    pub args: Vec<String>,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1280,
            window_height: 720,
            user_agent: None,
            disable_images: false,
            args: vec![],
        }
    }
}

/// Handle to one Chrome tab. Equality is identity of the underlying target,
/// not of the page currently loaded in it.
#[derive(Clone)]
pub struct ChromeContext {
    id: u64,
    tab: Arc<Tab>,
}

impl PartialEq for ChromeContext {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Debug for ChromeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChromeContext({})", self.id)
    }
}

/// Element handle: a JS expression locating the node. Re-evaluated on every
/// operation, so a handle silently stops resolving once the DOM is replaced.
#[derive(Debug, Clone)]
pub struct ChromeElement {
    js_path: String,
}

/// Chrome implementation of the browser driver, driven through CDP
/// `evaluate` calls.
pub struct ChromeDriver {
    browser: Browser,
    next_context_id: AtomicU64,
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

impl ChromeDriver {
    pub fn launch(options: &ChromeOptions) -> Result<Self> {
        let window_size_arg = format!(
            "--window-size={},{}",
            options.window_width, options.window_height
        );
        let user_agent_arg = options
            .user_agent
            .as_ref()
            .map(|ua| format!("--user-agent={}", ua));

        let mut args = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new(&window_size_arg),
        ];
        if let Some(ref ua_arg) = user_agent_arg {
            args.push(OsStr::new(ua_arg));
        }
        if options.disable_images {
            args.push(OsStr::new("--blink-settings=imagesEnabled=false"));
        }
        for arg in &options.args {
            args.push(OsStr::new(arg));
        }

        let launch_options = LaunchOptions::default_builder()
            .headless(options.headless)
            .args(args)
            .build()
            .map_err(|e| CrawlError::LaunchFailed(e.to_string()))?;

        let browser =
            Browser::new(launch_options).map_err(|e| CrawlError::LaunchFailed(e.to_string()))?;

        Ok(Self {
            browser,
            next_context_id: AtomicU64::new(1),
        })
    }

    fn eval(&self, ctx: &ChromeContext, script: &str) -> Result<Value> {
        let result = ctx
            .tab
            .evaluate(script, false)
            .map_err(|e| CrawlError::JavaScriptFailed(e.to_string()))?;
        Ok(result.value.unwrap_or(Value::Null))
    }

    /// Count of nodes matching `selector` under `scope`; -1 marks a stale
    /// scope handle.
    fn count_script(scope: Option<&ChromeElement>, selector: &str) -> String {
        let sel = js_string(selector);
        match scope {
            Some(parent) => format!(
                "(() => {{ try {{ const p = {path}; if (!p) return -1; \
                 return p.querySelectorAll({sel}).length; }} catch (e) {{ return -1; }} }})()",
                path = parent.js_path,
                sel = sel
            ),
            None => format!("document.querySelectorAll({}).length", sel),
        }
    }

    fn element_path(scope: Option<&ChromeElement>, selector: &str, index: usize) -> ChromeElement {
        let sel = js_string(selector);
        let js_path = match scope {
            Some(parent) => format!(
                "{path}.querySelectorAll({sel})[{index}]",
                path = parent.js_path,
                sel = sel,
                index = index
            ),
            None => format!("document.querySelectorAll({})[{}]", sel, index),
        };
        ChromeElement { js_path }
    }

    /// Evaluate `body` with `el` bound to the element, yielding `miss` when
    /// the handle no longer resolves.
    fn element_script(element: &ChromeElement, body: &str, miss: &str) -> String {
        format!(
            "(() => {{ try {{ const el = {path}; if (!el) return {miss}; {body} }} \
             catch (e) {{ return {miss}; }} }})()",
            path = element.js_path,
            body = body,
            miss = miss
        )
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    type Context = ChromeContext;
    type Element = ChromeElement;

    async fn new_context(&self) -> Result<Self::Context> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| CrawlError::ContextCreationFailed(e.to_string()))?;
        Ok(ChromeContext {
            id: self.next_context_id.fetch_add(1, Ordering::Relaxed),
            tab,
        })
    }

    async fn navigate(&self, ctx: &Self::Context, url: &str) -> Result<()> {
        ctx.tab
            .navigate_to(url)
            .map_err(|e| CrawlError::NavigationFailed(e.to_string()))?;
        ctx.tab
            .wait_until_navigated()
            .map_err(|e| CrawlError::NavigationFailed(e.to_string()))?;
        Ok(())
    }

    async fn current_url(&self, ctx: &Self::Context) -> Result<String> {
        Ok(ctx.tab.get_url())
    }

    async fn query(
        &self,
        ctx: &Self::Context,
        scope: Option<&Self::Element>,
        selector: &str,
    ) -> Result<Option<Self::Element>> {
        let count = self.eval(ctx, &Self::count_script(scope, selector))?;
        match count.as_i64() {
            Some(-1) => Err(CrawlError::StaleElement(selector.to_string())),
            Some(0) | None => Ok(None),
            Some(_) => Ok(Some(Self::element_path(scope, selector, 0))),
        }
    }

    async fn query_all(
        &self,
        ctx: &Self::Context,
        scope: Option<&Self::Element>,
        selector: &str,
    ) -> Result<Vec<Self::Element>> {
        let count = self.eval(ctx, &Self::count_script(scope, selector))?;
        match count.as_i64() {
            Some(-1) => Err(CrawlError::StaleElement(selector.to_string())),
            Some(n) if n > 0 => Ok((0..n as usize)
                .map(|i| Self::element_path(scope, selector, i))
                .collect()),
            _ => Ok(vec![]),
        }
    }

    async fn click(&self, ctx: &Self::Context, element: &Self::Element) -> Result<()> {
        let script = Self::element_script(
            element,
            "el.scrollIntoView({block: 'center'}); el.click(); return 'ok';",
            "'missing'",
        );
        match self.eval(ctx, &script)?.as_str() {
            Some("ok") => Ok(()),
            _ => Err(CrawlError::StaleElement(element.js_path.clone())),
        }
    }

    async fn is_interactable(&self, ctx: &Self::Context, element: &Self::Element) -> Result<bool> {
        let body = r#"
            if (el.hasAttribute('disabled')) return false;
            if (el.getAttribute('aria-disabled') === 'true') return false;
            const cls = (el.getAttribute('class') || '').toLowerCase();
            const disabledClasses = ['disabled', 'btn-disabled', 'inactive',
                                     'not-clickable', 'btn-inactive'];
            if (disabledClasses.some(c => cls.includes(c))) return false;
            const rect = el.getBoundingClientRect();
            if (rect.width === 0 || rect.height === 0) return false;
            const style = getComputedStyle(el);
            if (style.display === 'none' || style.visibility === 'hidden') return false;
            if (style.pointerEvents === 'none') return false;
            if (parseFloat(style.opacity) < 0.1) return false;
            return true;
        "#;
        let script = Self::element_script(element, body, "false");
        Ok(self.eval(ctx, &script)?.as_bool().unwrap_or(false))
    }

    async fn read_text(
        &self,
        ctx: &Self::Context,
        element: &Self::Element,
    ) -> Result<Option<String>> {
        let script = Self::element_script(element, "return el.textContent;", "null");
        Ok(self
            .eval(ctx, &script)?
            .as_str()
            .map(|s| s.trim().to_string()))
    }

    async fn read_attribute(
        &self,
        ctx: &Self::Context,
        element: &Self::Element,
        attribute: &str,
    ) -> Result<Option<String>> {
        let body = format!("return el.getAttribute({});", js_string(attribute));
        let script = Self::element_script(element, &body, "null");
        Ok(self.eval(ctx, &script)?.as_str().map(|s| s.to_string()))
    }

    async fn wait_for(
        &self,
        ctx: &Self::Context,
        condition: &WaitCondition,
        timeout: Duration,
    ) -> Result<()> {
        let script = match condition {
            WaitCondition::DomLoaded => {
                "['interactive', 'complete'].includes(document.readyState)".to_string()
            }
            WaitCondition::NetworkIdle => "document.readyState === 'complete'".to_string(),
            WaitCondition::Selector { target } => {
                format!("document.querySelector({}) !== null", js_string(target))
            }
        };
        let settle_polls = match condition {
            WaitCondition::NetworkIdle => IDLE_SETTLE_POLLS,
            _ => 1,
        };

        let start = Instant::now();
        let mut satisfied_polls = 0;
        while start.elapsed() < timeout {
            match self.eval(ctx, &script) {
                Ok(Value::Bool(true)) => {
                    satisfied_polls += 1;
                    if satisfied_polls >= settle_polls {
                        return Ok(());
                    }
                }
                _ => satisfied_polls = 0,
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Err(CrawlError::TimeoutError(format!(
            "wait condition {:?} not met within {}ms",
            condition,
            timeout.as_millis()
        )))
    }

    async fn close_context(&self, ctx: &Self::Context) -> Result<()> {
        // Target may already be gone when the page closed itself.
        let _ = ctx.tab.close(false);
        Ok(())
    }
}
