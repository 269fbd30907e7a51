//! # dynamate-tools
//!
//! The molecular-dynamics tools the agents call: structure download and preparation,
//! ligand parameterisation, tleap topology building, the GROMACS stages, MMPBSA and
//! literature search.
//!
//! Tools form a closed set ([`ToolKind`]); arguments decode into typed records
//! ([`ToolCall`]) and the [`Toolbox`] dispatches them with a `match`. Every tool works
//! inside the session sandbox carried by [`ToolContext`] and returns text for the
//! model. Expected failures are narrated in that text; only spawn and sandbox I/O
//! faults surface as [`ToolFault`].

#![deny(unsafe_code)]

/// Unwrap `Ok`, or end the tool with the error's text as its narrated output.
macro_rules! or_narrate {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(narration) => return Ok(narration.to_string()),
        }
    };
}

pub mod amber;
pub mod call;
pub mod error;
pub mod files;
pub mod gromacs;
pub mod ligand;
pub mod mmpbsa;
pub mod papers;
pub mod pdb;
pub mod process;
pub mod sandbox;
pub mod schema;
pub mod structure;
pub mod toolbox;

pub use call::{ToolCall, ToolKind, Toolset};
pub use error::ToolFault;
pub use papers::PaperIndex;
pub use sandbox::{PathRefusal, ToolContext};
pub use schema::{definitions, SchemaHints};
pub use toolbox::{ToolExecutor, Toolbox};
