//! RETL Operator System
//!
//! The uniform operator contract, the registry that resolves operators by
//! name, the branch router, and the document sink. A small set of builtins
//! covers reading and splitting delimited text.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod trait_;
pub mod branch;
pub mod builtin;
pub mod registry;
pub mod sink;

pub use trait_::{
    Emission, Operator, OperatorFactory, OperatorRole, RecordFeed, Resource, ResourceFactory,
    Routed,
};
pub use branch::{BranchTarget, SendFieldsToBranch};
pub use builtin::register_builtins;
pub use registry::{OperatorRegistry, RegistryError};
pub use sink::{
    CollectionFactory, CollectionWriter, Document, DocumentStore, FieldIndexMap, JsonLinesStore,
    MemoryStore,
};
