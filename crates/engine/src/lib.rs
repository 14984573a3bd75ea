//! Workflow engine and orchestrators.
//!
//! Every end-user verb is a fixed composition of stages run by the
//! [`workflow::Workflow`] engine against a shared [`bag::Bag`]: setups in
//! order, executes in order, teardowns in reverse, errors preserved with
//! the stage that raised them.

pub mod bag;
pub mod error;
pub mod incremental;
pub mod orchestrator;
pub mod stages;
pub mod workflow;

pub use bag::{Bag, BagValue};
pub use error::{EngineError, WorkflowError};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use workflow::{Stage, StageState, Workflow};
