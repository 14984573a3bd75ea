//! The workflow engine.
//!
//! A workflow is an ordered chain of named stages. The engine runs every
//! `setup` in order, every `execute` in order, and every `teardown` in
//! reverse order. A failing setup tears down the already-setup prefix; a
//! failing execute still tears down everything that completed setup. The
//! originating `(stage_name, error)` is preserved in both cases.

use crate::bag::Bag;
use crate::error::{EngineError, WorkflowError};
use tracing::{debug, error, info};

/// One step of a workflow.
pub trait Stage {
    /// Stage name, used in logs and error reports.
    fn name(&self) -> &str;

    /// Prepare state. Default: nothing to do.
    fn setup(&mut self, _bag: &mut Bag) -> Result<(), EngineError> {
        Ok(())
    }

    /// Do the work.
    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError>;

    /// Release state and finalise outputs. Default: nothing to do.
    fn teardown(&mut self, _bag: &mut Bag) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Stage lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    NotStarted,
    Setup,
    Ready,
    Executing,
    Done,
    Failing,
    TornDown,
}

struct Slot {
    stage: Box<dyn Stage>,
    state: StageState,
}

/// An ordered chain of stages.
#[derive(Default)]
pub struct Workflow {
    slots: Vec<Slot>,
}

impl Workflow {
    /// Empty workflow.
    pub fn new() -> Self {
        Workflow { slots: Vec::new() }
    }

    /// Append a stage.
    pub fn push(&mut self, stage: Box<dyn Stage>) -> &mut Self {
        self.slots.push(Slot {
            stage,
            state: StageState::NotStarted,
        });
        self
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// States in chain order; drives the lifecycle assertions in tests.
    pub fn states(&self) -> Vec<StageState> {
        self.slots.iter().map(|s| s.state).collect()
    }

    /// Run the whole chain against `bag`.
    pub fn run(&mut self, bag: &mut Bag) -> Result<(), WorkflowError> {
        // setups, in order
        for index in 0..self.slots.len() {
            if bag.is_cancelled() {
                let name = self.slots[index].stage.name().to_string();
                self.teardown_prefix(index, bag);
                return Err(WorkflowError::new(&name, EngineError::Cancelled));
            }
            let slot = &mut self.slots[index];
            slot.state = StageState::Setup;
            debug!(stage = slot.stage.name(), "setup");
            if let Err(e) = slot.stage.setup(bag) {
                let name = slot.stage.name().to_string();
                slot.state = StageState::Failing;
                error!(stage = %name, error = %e, "setup failed");
                self.teardown_prefix(index, bag);
                return Err(WorkflowError::new(&name, e));
            }
            slot.state = StageState::Ready;
        }

        // executes, in order; teardown always runs afterwards
        let mut failure: Option<WorkflowError> = None;
        for index in 0..self.slots.len() {
            if bag.is_cancelled() {
                let name = self.slots[index].stage.name().to_string();
                failure = Some(WorkflowError::new(&name, EngineError::Cancelled));
                break;
            }
            let slot = &mut self.slots[index];
            slot.state = StageState::Executing;
            debug!(stage = slot.stage.name(), "execute");
            match slot.stage.execute(bag) {
                Ok(()) => slot.state = StageState::Done,
                Err(e) => {
                    let name = slot.stage.name().to_string();
                    slot.state = StageState::Failing;
                    error!(stage = %name, error = %e, "execute failed");
                    failure = Some(WorkflowError::new(&name, e));
                    break;
                }
            }
        }

        // teardowns in reverse for every stage that completed setup
        self.teardown_prefix(self.slots.len(), bag);

        match failure {
            Some(err) => Err(err),
            None => {
                info!(stages = self.slots.len(), "workflow complete");
                Ok(())
            }
        }
    }

    /// Tear down `slots[..upto]` in reverse order, skipping stages that
    /// never completed setup. Teardown errors are logged, not propagated;
    /// the original failure stays the surfaced one.
    fn teardown_prefix(&mut self, upto: usize, bag: &mut Bag) {
        for slot in self.slots[..upto].iter_mut().rev() {
            let ran_setup = matches!(
                slot.state,
                StageState::Ready | StageState::Executing | StageState::Done | StageState::Failing
            );
            if !ran_setup {
                continue;
            }
            debug!(stage = slot.stage.name(), "teardown");
            if let Err(e) = slot.stage.teardown(bag) {
                error!(stage = slot.stage.name(), error = %e, "teardown failed");
            }
            slot.state = StageState::TornDown;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Scripted {
        name: String,
        log: Log,
        fail_setup: bool,
        fail_execute: bool,
    }

    impl Scripted {
        fn new(name: &str, log: &Log) -> Self {
            Scripted {
                name: name.to_string(),
                log: log.clone(),
                fail_setup: false,
                fail_execute: false,
            }
        }
    }

    impl Stage for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        fn setup(&mut self, _bag: &mut Bag) -> Result<(), EngineError> {
            self.log.lock().unwrap().push(format!("setup {}", self.name));
            if self.fail_setup {
                return Err(EngineError::Stage("setup boom".to_string()));
            }
            Ok(())
        }

        fn execute(&mut self, _bag: &mut Bag) -> Result<(), EngineError> {
            self.log.lock().unwrap().push(format!("execute {}", self.name));
            if self.fail_execute {
                return Err(EngineError::Stage("execute boom".to_string()));
            }
            Ok(())
        }

        fn teardown(&mut self, _bag: &mut Bag) -> Result<(), EngineError> {
            self.log.lock().unwrap().push(format!("teardown {}", self.name));
            Ok(())
        }
    }

    #[test]
    fn test_happy_path_ordering() {
        let log: Log = Arc::default();
        let mut workflow = Workflow::new();
        workflow.push(Box::new(Scripted::new("A", &log)));
        workflow.push(Box::new(Scripted::new("B", &log)));
        workflow.push(Box::new(Scripted::new("C", &log)));

        let mut bag = Bag::new();
        workflow.run(&mut bag).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            [
                "setup A", "setup B", "setup C", "execute A", "execute B", "execute C",
                "teardown C", "teardown B", "teardown A",
            ]
        );
        assert!(workflow.states().iter().all(|s| *s == StageState::TornDown));
    }

    #[test]
    fn test_execute_failure_skips_later_stages_but_not_teardown() {
        let log: Log = Arc::default();
        let mut workflow = Workflow::new();
        workflow.push(Box::new(Scripted::new("A", &log)));
        let mut b = Scripted::new("B", &log);
        b.fail_execute = true;
        workflow.push(Box::new(b));
        workflow.push(Box::new(Scripted::new("C", &log)));

        let mut bag = Bag::new();
        let err = workflow.run(&mut bag).unwrap_err();
        assert_eq!(err.stage, "B");

        // C's execute never ran; every stage that completed setup tears
        // down, in reverse order
        assert_eq!(
            *log.lock().unwrap(),
            [
                "setup A", "setup B", "setup C", "execute A", "execute B",
                "teardown C", "teardown B", "teardown A",
            ]
        );
    }

    #[test]
    fn test_setup_failure_tears_down_prefix_only() {
        let log: Log = Arc::default();
        let mut workflow = Workflow::new();
        workflow.push(Box::new(Scripted::new("A", &log)));
        let mut b = Scripted::new("B", &log);
        b.fail_setup = true;
        workflow.push(Box::new(b));
        workflow.push(Box::new(Scripted::new("C", &log)));

        let mut bag = Bag::new();
        let err = workflow.run(&mut bag).unwrap_err();
        assert_eq!(err.stage, "B");
        assert!(matches!(err.source, EngineError::Stage(_)));

        assert_eq!(*log.lock().unwrap(), ["setup A", "setup B", "teardown A"]);
        let states = workflow.states();
        assert_eq!(states[0], StageState::TornDown);
        assert_eq!(states[2], StageState::NotStarted);
    }

    #[test]
    fn test_cancellation_between_stages() {
        struct Canceller {
            log: Log,
        }
        impl Stage for Canceller {
            fn name(&self) -> &str {
                "canceller"
            }
            fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
                self.log.lock().unwrap().push("execute canceller".to_string());
                bag.cancel();
                Ok(())
            }
        }

        let log: Log = Arc::default();
        let mut workflow = Workflow::new();
        workflow.push(Box::new(Canceller { log: log.clone() }));
        workflow.push(Box::new(Scripted::new("after", &log)));

        let mut bag = Bag::new();
        let err = workflow.run(&mut bag).unwrap_err();
        assert!(matches!(err.source, EngineError::Cancelled));
        assert_eq!(err.stage, "after");
        // "after" never executed
        assert!(!log.lock().unwrap().iter().any(|l| l == "execute after"));
    }

    #[test]
    fn test_empty_workflow() {
        let mut workflow = Workflow::new();
        workflow.run(&mut Bag::new()).unwrap();
    }
}
