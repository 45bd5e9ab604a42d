//! The expression tree served to the client while the target is stopped.
//!
//! Expressions form a flat cache of nodes addressed by id; composite nodes
//! (the environment meta-container and targets) enumerate their children
//! lazily on the first csQueryExpressionChildren and reference them by id,
//! so there are no pointer cycles. The whole cache is invalidated when the
//! target resumes.

use crate::host::ScriptHost;
use crate::server::scope::ScopeEntry;
use std::collections::BTreeMap;
use std::env;

pub type ExpressionId = i32;

/// Child count reported before a composite node has computed its children.
pub const CHILD_COUNT_UNKNOWN: i32 = -1;

/// Variant tag deciding how a node enumerates children and whether its
/// value can be edited.
#[derive(Debug, Clone)]
enum ExpressionKind {
    /// Plain name/value leaf, used for children of composite nodes.
    Simple,
    /// A script variable resolved against the frame it was created in.
    ScriptVariable {
        name: String,
        position: crate::host::ScopePosition,
    },
    /// A persistent cache entry.
    CacheEntry,
    /// A process environment variable; updates are exported to the host
    /// process environment.
    EnvironmentVariable { name: String },
    /// The `ENV` meta-container with one child per environment entry.
    EnvironmentMeta,
    /// A build target; children are its properties.
    Target { name: String },
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub id: ExpressionId,
    pub name: String,
    pub type_label: String,
    pub value: String,
    /// `CHILD_COUNT_UNKNOWN` until children have been registered.
    pub child_count: i32,
    pub children_registered: bool,
    pub registered_children: Vec<ExpressionId>,
    kind: ExpressionKind,
}

impl Expression {
    fn new(
        name: impl Into<String>,
        type_label: &str,
        value: impl Into<String>,
        kind: ExpressionKind,
        child_count: i32,
    ) -> Self {
        Self {
            id: -1,
            name: name.into(),
            type_label: type_label.to_string(),
            value: value.into(),
            child_count,
            children_registered: false,
            registered_children: Vec::new(),
            kind,
        }
    }

    /// Resolve a top-level expression against a stack frame. The lookup
    /// order is environment-meta, environment-variable, script-variable,
    /// target, cache-entry.
    pub fn resolve(host: &dyn ScriptHost, text: &str, scope: &ScopeEntry) -> Option<Expression> {
        if text == "ENV" || text == "$ENV" {
            return Some(Expression::new(
                text,
                "(Environment)",
                "",
                ExpressionKind::EnvironmentMeta,
                CHILD_COUNT_UNKNOWN,
            ));
        }

        if let Some(name) = text.strip_prefix("ENV{").and_then(|t| t.strip_suffix('}')) {
            if let Ok(value) = env::var(name) {
                return Some(Expression::new(
                    text,
                    "(Environment Variable)",
                    value,
                    ExpressionKind::EnvironmentVariable {
                        name: name.to_string(),
                    },
                    0,
                ));
            }
        }

        if let Some(value) = host.lookup_variable(scope.position, text) {
            return Some(Expression::new(
                text,
                "(Script Variable)",
                value,
                ExpressionKind::ScriptVariable {
                    name: text.to_string(),
                    position: scope.position,
                },
                0,
            ));
        }

        if host.has_target(text) {
            return Some(Expression::new(
                text,
                "(Target)",
                "",
                ExpressionKind::Target {
                    name: text.to_string(),
                },
                CHILD_COUNT_UNKNOWN,
            ));
        }

        if let Some(value) = host.cache_entry(text) {
            return Some(Expression::new(
                text,
                "(Cache Entry)",
                value,
                ExpressionKind::CacheEntry,
                0,
            ));
        }

        None
    }

    /// Build this node's children. Leaves return an empty list.
    pub fn create_children(&self, host: &dyn ScriptHost) -> Vec<Expression> {
        match &self.kind {
            ExpressionKind::EnvironmentMeta => env::vars_os()
                .filter_map(|(name, value)| {
                    Some((name.into_string().ok()?, value.into_string().ok()?))
                })
                .map(|(name, value)| {
                    Expression::new(
                        format!("[{name}]"),
                        "(Environment Variable)",
                        value,
                        ExpressionKind::EnvironmentVariable { name },
                        0,
                    )
                })
                .collect(),
            ExpressionKind::Target { name } => host
                .target_properties(name)
                .into_iter()
                .map(|(property, value)| {
                    Expression::new(property, "(Property)", value, ExpressionKind::Simple, 0)
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Replace this node's value, propagating the change to the variable
    /// store or the process environment. Returns the client-facing reason
    /// on rejection.
    pub fn update_value(&mut self, host: &dyn ScriptHost, value: &str) -> Result<(), String> {
        match &self.kind {
            ExpressionKind::ScriptVariable { name, position } => {
                host.update_variable(*position, name, value)?;
                self.value = value.to_string();
                Ok(())
            }
            ExpressionKind::EnvironmentVariable { name } => {
                // Deliberate side effect: the exported value is visible to
                // the whole host process. The debug session is
                // single-threaded while stopped.
                unsafe { env::set_var(name, value) };
                self.value = value.to_string();
                Ok(())
            }
            _ => Err("This expression cannot be edited.".to_string()),
        }
    }
}

/// Flat id-to-node store. Ids stay monotonic across clears so a stale
/// client handle can never alias a new node.
#[derive(Default)]
pub struct ExpressionCache {
    next_id: ExpressionId,
    by_id: BTreeMap<ExpressionId, Expression>,
}

impl ExpressionCache {
    pub fn insert(&mut self, mut expression: Expression) -> ExpressionId {
        let id = self.next_id;
        self.next_id += 1;
        expression.id = id;
        self.by_id.insert(id, expression);
        id
    }

    pub fn get(&self, id: ExpressionId) -> Option<&Expression> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: ExpressionId) -> Option<&mut Expression> {
        self.by_id.get_mut(&id)
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
    }
}
