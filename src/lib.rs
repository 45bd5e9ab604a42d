//! Embeddable debug server speaking the High-Level Debug Protocol (HLDP).
//!
//! A build-script interpreter embeds an [`HldpServer`] and reports its
//! execution through the per-statement hook and the event hooks; an
//! external GUI client connects over TCP to set breakpoints, step through
//! statements, walk the call stack and inspect or edit variables. The
//! interpreter side of the seam is the [`host::ScriptHost`] trait.

pub mod error;
pub mod host;
pub mod protocol;
pub mod server;

pub use crate::error::Error;
pub use crate::host::{FunctionCall, MessageKind, ScopePosition, ScriptHost, VariableAccess};
pub use crate::server::{HldpServer, StatementScope};
