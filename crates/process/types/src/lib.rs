//! Process domain types
//!
//! The data model shared by the process engine and its collaborators:
//!
//! - **ProcessGraph**: the closed set of element kinds joined by sequence flows
//! - **ProcessDefinition**: an immutable, versioned, checksummed graph
//! - **ProcessInstance**: tokens, variables and status of one execution
//! - **Timer** / **MessageSubscription**: what suspended tokens wait for
//! - **DefinitionParser**: the seam that turns documents into graphs
//!
//! Keys are plain `i64` newtypes drawn from one engine-wide sequence.

#![deny(unsafe_code)]

pub mod definition;
pub mod duration;
pub mod errors;
pub mod graph;
pub mod instance;
pub mod keys;
pub mod parser;
pub mod subscription;
pub mod timer;

pub use definition::*;
pub use duration::{format_iso8601, parse_iso8601};
pub use errors::*;
pub use graph::*;
pub use instance::*;
pub use keys::*;
pub use parser::*;
pub use subscription::*;
pub use timer::*;
