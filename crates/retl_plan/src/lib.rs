//! RETL Planner
//!
//! Compiles pipeline definitions into stream graphs: variables are
//! substituted, operators instantiated and branch routes checked before
//! anything runs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod compiler;
pub mod graph;
pub mod validate;

pub use ast::{Definition, OperatorCall, ResourceDecl, StreamDecl};
pub use compiler::{Compiler, CompilerOutput, CompilerWarning};
pub use graph::{Component, Edge, OperatorNode, PipelineGraph, START_STREAM, Stream};
pub use validate::{ValidationError, Validator};
