pub mod builder;
pub mod model;
pub mod registry;

pub use builder::WorkflowBuilder;
pub use model::{
    Configuration, ExtractionKind, Selection, SelectionAction, SelectionKind, StepAction,
    WaitCondition, Workflow, WorkflowStep, DEFAULT_STEP_TIMEOUT_MS,
};
pub use registry::SelectionRegistry;
