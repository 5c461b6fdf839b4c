pub mod interpreter;
pub mod items;
pub mod navigation;
pub mod pagination;
pub mod result;

pub use interpreter::{StepInterpreter, WorkflowOutcome};
pub use items::ItemIterator;
pub use navigation::NavigationState;
pub use pagination::{crawl, CrawlRun, PageBatch, RunSummary, StopReason};
pub use result::{ErrorKind, ExtractionResult, FieldValues, StepError};
