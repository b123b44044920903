//! Compiles data selectors into parameterised SQL over the Wiser item schema.

pub mod alias;
pub mod compile;
pub mod error;
pub mod include;
pub mod parse;
pub mod validate;
pub mod variables;

pub use compile::{ColumnBinding, CompileOptions, CompiledQuery, ConnectionNode, SelectorCompiler};
pub use error::CompileError;
pub use variables::{RequestContext, UserContext};
