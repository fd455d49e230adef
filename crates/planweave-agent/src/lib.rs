pub mod context;
pub mod debugger;
pub mod executor;
pub mod graph;
pub mod plan_loop;
pub mod runner;
pub mod session;
pub mod summary;

pub use context::ExecutionContext;
pub use debugger::{GraphDebugger, NodeDetails, OutputDiff, ReplayReport};
pub use executor::{DagExecutor, ExecutionReport, RunOutcome};
pub use graph::{Edge, GraphAttributes, Globals, Iteration, PlanGraph, PlanSpec, StepNode, ROOT_ID};
pub use plan_loop::{PlanLoop, PlanRequest};
pub use runner::{IterationRecord, StepOutcome, StepRunner};
pub use session::{SessionDocument, SessionStore};
pub use summary::{ExecutionSummary, StepCost};
