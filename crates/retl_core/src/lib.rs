//! RETL Core Types
//!
//! Records, field addresses, configuration values and template
//! substitution. This crate performs no I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod field;
pub mod id;
pub mod record;
pub mod template;
pub mod value;

// Re-exports
pub use error::{RetlError, RetlResult};
pub use field::{FieldAddress, FieldTerm};
pub use id::RunId;
pub use record::{Record, Scalar};
pub use template::{Substitution, Variables};
pub use value::{RangeLiteral, Value};
