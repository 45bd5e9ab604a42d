//! The seam between the debug server and the script interpreter that embeds
//! it. The interpreter drives the server through [`crate::server::HldpServer`]
//! and answers its queries through [`ScriptHost`].

/// Opaque token identifying a point in the interpreter's variable-scope
/// chain. Captured when a statement scope is entered and handed back on
/// variable lookups so expressions evaluate against the right frame.
pub type ScopePosition = u64;

/// One parsed statement of a build script, as the interpreter is about to
/// execute it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    /// Command name as written in the source.
    pub name: String,
    /// One-based source line of the statement.
    pub line: i32,
    /// Evaluated argument values.
    pub arguments: Vec<String>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, line: i32, arguments: Vec<String>) -> Self {
        Self {
            name: name.into(),
            line,
            arguments,
        }
    }
}

/// Classification of a message emitted by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Status,
    Warning,
    AuthorWarning,
    DeprecationWarning,
    AuthorError,
    DeprecationError,
    FatalError,
    InternalError,
}

impl MessageKind {
    /// Whether a message of this kind aborts script evaluation. The debug
    /// server reports these as an `Exception` stop.
    pub fn is_fatal_class(self) -> bool {
        matches!(
            self,
            MessageKind::AuthorError
                | MessageKind::DeprecationError
                | MessageKind::FatalError
                | MessageKind::InternalError
        )
    }
}

/// Kind of a variable access reported to the variable hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableAccess {
    Read,
    Write,
}

/// Services the embedding interpreter provides to the debug server.
///
/// All methods are queries or idempotent signals; none of them may call back
/// into the server. In particular `lookup_variable` and `update_variable`
/// must not fire the variable-access hook - the debugger inspecting a
/// variable is not a watched access.
pub trait ScriptHost {
    /// Source file of the statement currently being executed.
    fn current_source_file(&self) -> String;

    /// Scope position of the statement currently being executed.
    fn current_position(&self) -> ScopePosition;

    /// Canonical real path of `path`, or an empty string when the path does
    /// not resolve to an existing file.
    fn real_path(&self, path: &str) -> String;

    /// Value of a script variable visible from `position`.
    fn lookup_variable(&self, position: ScopePosition, name: &str) -> Option<String>;

    /// Overwrite a script variable visible from `position`.
    fn update_variable(
        &self,
        position: ScopePosition,
        name: &str,
        value: &str,
    ) -> Result<(), String>;

    /// Value of a persistent cache entry.
    fn cache_entry(&self, key: &str) -> Option<String>;

    /// Whether a build target with this name exists.
    fn has_target(&self, name: &str) -> bool;

    /// Properties of a build target, as name/value pairs.
    fn target_properties(&self, name: &str) -> Vec<(String, String)>;

    /// Raise the interpreter's fatal-error flag, aborting script evaluation
    /// as soon as the interpreter regains control.
    fn mark_fatal_error(&self);
}
