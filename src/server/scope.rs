//! Statement scopes. The interpreter holds a [`StatementScope`] guard for
//! the duration of each statement; dropping it pops the server's call stack
//! and performs the step-out completion check, on every exit path.

use crate::host::{FunctionCall, ScopePosition};
use crate::server::HldpServer;

pub type ScopeId = i32;

/// No step stop is pending.
pub const NO_SCOPE: ScopeId = -1;
/// Stop as soon as execution returns to the top level.
pub const ROOT_SCOPE: ScopeId = -2;

/// One entry of the call stack: the statement being executed at that depth.
#[derive(Debug, Clone)]
pub struct ScopeEntry {
    pub id: ScopeId,
    pub source_file: String,
    pub function: FunctionCall,
    pub position: ScopePosition,
}

/// Guard returned by [`HldpServer::on_statement`]. Must be dropped when the
/// statement finishes executing, including unwinding paths.
pub struct StatementScope<'a> {
    server: &'a HldpServer,
    id: ScopeId,
}

impl<'a> StatementScope<'a> {
    pub(super) fn new(server: &'a HldpServer, id: ScopeId) -> Self {
        Self { server, id }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }
}

impl Drop for StatementScope<'_> {
    fn drop(&mut self) {
        self.server.exit_scope(self.id);
    }
}
