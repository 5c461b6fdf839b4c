pub mod browser;
pub mod config;
pub mod engine;
pub mod errors;
pub mod output;
pub mod testing;

pub use browser::{BrowserDriver, ChromeDriver, ChromeOptions};
pub use config::{
    Configuration, ExtractionKind, Selection, SelectionKind, SelectionRegistry, StepAction,
    WaitCondition, Workflow, WorkflowBuilder, WorkflowStep,
};
pub use engine::{crawl, CrawlRun, ExtractionResult, PageBatch, RunSummary, StopReason};
pub use errors::{CrawlError, Result};
