//! Indexed breakpoint storage. Location breakpoints are keyed by canonical
//! path and line, function breakpoints by case-insensitive command name, and
//! domain-specific breakpoints are matched by predicate over their
//! extension.

use crate::host::ScriptHost;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub type BreakpointId = i32;

/// Id `0` is reserved as "no breakpoint".
pub const INVALID_BREAKPOINT_ID: BreakpointId = 0;

fn cmp_ignore_ascii_case(left: &str, right: &str) -> Ordering {
    let l = left.bytes().map(|b| b.to_ascii_lowercase());
    let r = right.bytes().map(|b| b.to_ascii_lowercase());
    l.cmp(r)
}

/// A name compared and ordered without regard to ASCII case.
#[derive(Debug, Clone, Eq)]
pub struct CaseInsensitiveName(String);

impl CaseInsensitiveName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for CaseInsensitiveName {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_ignore_ascii_case(&self.0, &other.0)
    }
}

impl PartialOrd for CaseInsensitiveName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CaseInsensitiveName {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

/// A source location with the path already canonicalized. Ordered by line
/// first, then by case-insensitive path comparison.
#[derive(Debug, Clone, Eq)]
pub struct CanonicalLocation {
    pub path: String,
    pub one_based_line: i32,
}

impl CanonicalLocation {
    pub fn new(path: impl Into<String>, one_based_line: i32) -> Self {
        Self {
            path: path.into(),
            one_based_line,
        }
    }
}

impl Ord for CanonicalLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.one_based_line
            .cmp(&other.one_based_line)
            .then_with(|| cmp_ignore_ascii_case(&self.path, &other.path))
    }
}

impl PartialOrd for CanonicalLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CanonicalLocation {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

/// Trigger of a breakpoint that fires on a host-emitted event rather than
/// on reaching a source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainSpecificBreakpoint {
    /// A variable with this name was read.
    VariableAccessed(String),
    /// A variable with this name was written.
    VariableUpdated(String),
    /// A message containing this substring was produced.
    MessageSent(String),
    /// A target with this name was created; an empty name matches any
    /// target.
    TargetCreated(String),
}

#[derive(Debug)]
pub enum BreakpointKind {
    Location(CanonicalLocation),
    Function(CaseInsensitiveName),
    DomainSpecific(DomainSpecificBreakpoint),
}

#[derive(Debug)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub enabled: bool,
    pub kind: BreakpointKind,
}

impl Breakpoint {
    pub fn domain_specific(&self) -> Option<&DomainSpecificBreakpoint> {
        match &self.kind {
            BreakpointKind::DomainSpecific(ext) => Some(ext),
            _ => None,
        }
    }
}

/// Breakpoint store with secondary indexes for the per-statement lookups.
///
/// Invariant: every id referenced by the by-location and by-function
/// indexes is present in the by-id map, and deleting a breakpoint removes
/// it from all three.
pub struct BreakpointManager {
    next_id: BreakpointId,
    by_id: BTreeMap<BreakpointId, Breakpoint>,
    by_location: BTreeMap<CanonicalLocation, BTreeSet<BreakpointId>>,
    by_function: BTreeMap<CaseInsensitiveName, BTreeSet<BreakpointId>>,
    // Memoized real-path lookups; hit on every statement with a location
    // breakpoint candidate.
    canonical_paths: HashMap<String, String>,
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self {
            next_id: 1,
            by_id: BTreeMap::new(),
            by_location: BTreeMap::new(),
            by_function: BTreeMap::new(),
            canonical_paths: HashMap::new(),
        }
    }
}

impl BreakpointManager {
    fn assign_id(&mut self) -> BreakpointId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn canonical_location(
        &mut self,
        host: &dyn ScriptHost,
        file: &str,
        one_based_line: i32,
    ) -> CanonicalLocation {
        let path = match self.canonical_paths.get(file) {
            Some(path) => path.clone(),
            None => {
                let path = host.real_path(file);
                self.canonical_paths.insert(file.to_string(), path.clone());
                path
            }
        };
        CanonicalLocation::new(path, one_based_line)
    }

    /// Create a location breakpoint. Returns [`INVALID_BREAKPOINT_ID`] when
    /// `file` does not resolve to an existing file.
    pub fn create_location_breakpoint(
        &mut self,
        host: &dyn ScriptHost,
        file: &str,
        one_based_line: i32,
    ) -> BreakpointId {
        let location = self.canonical_location(host, file, one_based_line);
        if location.path.is_empty() {
            return INVALID_BREAKPOINT_ID;
        }

        let id = self.assign_id();
        self.by_location
            .entry(location.clone())
            .or_default()
            .insert(id);
        self.by_id.insert(
            id,
            Breakpoint {
                id,
                enabled: true,
                kind: BreakpointKind::Location(location),
            },
        );
        id
    }

    pub fn create_function_breakpoint(&mut self, function: &str) -> BreakpointId {
        let name = CaseInsensitiveName::new(function);
        let id = self.assign_id();
        self.by_function.entry(name.clone()).or_default().insert(id);
        self.by_id.insert(
            id,
            Breakpoint {
                id,
                enabled: true,
                kind: BreakpointKind::Function(name),
            },
        );
        id
    }

    pub fn create_domain_specific_breakpoint(
        &mut self,
        extension: DomainSpecificBreakpoint,
    ) -> BreakpointId {
        let id = self.assign_id();
        self.by_id.insert(
            id,
            Breakpoint {
                id,
                enabled: true,
                kind: BreakpointKind::DomainSpecific(extension),
            },
        );
        id
    }

    /// Remove a breakpoint from all indexes. No-op for an unknown id.
    pub fn delete(&mut self, id: BreakpointId) {
        let Some(breakpoint) = self.by_id.remove(&id) else {
            return;
        };
        match &breakpoint.kind {
            BreakpointKind::Location(location) => {
                if let Some(ids) = self.by_location.get_mut(location) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.by_location.remove(location);
                    }
                }
            }
            BreakpointKind::Function(name) => {
                if let Some(ids) = self.by_function.get_mut(name) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.by_function.remove(name);
                    }
                }
            }
            BreakpointKind::DomainSpecific(_) => {}
        }
    }

    /// First breakpoint registered at the canonical location of
    /// `file:one_based_line`, if any. Multiple breakpoints at one location
    /// are functionally equivalent, so any of them is an acceptable answer.
    pub fn try_get_at_location(
        &mut self,
        host: &dyn ScriptHost,
        file: &str,
        one_based_line: i32,
    ) -> Option<&Breakpoint> {
        let location = self.canonical_location(host, file, one_based_line);
        let id = *self.by_location.get(&location)?.iter().next()?;
        self.by_id.get(&id)
    }

    pub fn try_get_for_function(&mut self, function: &str) -> Option<&Breakpoint> {
        let name = CaseInsensitiveName::new(function);
        let id = *self.by_function.get(&name)?.iter().next()?;
        self.by_id.get(&id)
    }

    pub fn try_lookup(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.by_id.get(&id)
    }

    pub fn try_lookup_mut(&mut self, id: BreakpointId) -> Option<&mut Breakpoint> {
        self.by_id.get_mut(&id)
    }

    /// Linear scan for the first enabled domain-specific breakpoint whose
    /// extension satisfies `predicate`.
    pub fn find_enabled_domain_specific(
        &self,
        predicate: impl Fn(&DomainSpecificBreakpoint) -> bool,
    ) -> BreakpointId {
        for breakpoint in self.by_id.values() {
            if !breakpoint.enabled {
                continue;
            }
            if let Some(extension) = breakpoint.domain_specific() {
                if predicate(extension) {
                    return breakpoint.id;
                }
            }
        }
        INVALID_BREAKPOINT_ID
    }

    #[cfg(test)]
    fn indexed_ids(&self) -> BTreeSet<BreakpointId> {
        self.by_location
            .values()
            .chain(self.by_function.values())
            .flatten()
            .copied()
            .collect()
    }
}
