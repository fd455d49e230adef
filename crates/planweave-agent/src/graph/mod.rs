//! Plan graph data model.
//!
//! A plan is a DAG of `StepNode`s connected by `Edge`s. Edges may hang off
//! the virtual `ROOT` anchor, which is always considered complete. Steps
//! exchange data through the `Globals` namespace: each step declares the
//! keys it reads and the keys it writes.

pub mod edge;
pub mod globals;
pub mod node;
pub mod plan;

pub use edge::{Edge, ROOT_ID};
pub use globals::Globals;
pub use node::{Iteration, StepNode};
pub use plan::{GraphAttributes, PlanGraph, PlanSpec};
