//! Per-run memo of finished builds, so one command never builds the same
//! package with the same options twice.

use std::collections::{BTreeMap, HashSet};

use crate::package::{DepConstraint, Package};

/// Identity of one build: the package and the options it was built with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildKey {
    pub name: String,
    pub version: String,
    pub skip_deps: Vec<String>,
    /// Names of the additional dependencies, sorted.
    pub additional_deps: Vec<String>,
    pub release: bool,
}

impl BuildKey {
    pub fn new(
        pkg: &Package,
        skip_deps: &[String],
        additional_deps: &BTreeMap<String, Vec<DepConstraint>>,
        release: bool,
    ) -> Self {
        Self {
            name: pkg.name.clone(),
            version: pkg.version.clone(),
            skip_deps: skip_deps.to_vec(),
            additional_deps: additional_deps.keys().cloned().collect(),
            release,
        }
    }
}

/// Build memo shared by nested pipeline operations.
///
/// Each operation calls [`enter`](Self::enter) before and
/// [`exit`](Self::exit) after its work. The memo survives nested scopes and
/// is cleared only when the outermost scope exits.
#[derive(Debug, Default)]
pub struct BuildCache {
    depth: usize,
    built: HashSet<BuildKey>,
}

impl BuildCache {
    pub fn enter(&mut self) {
        self.depth = self.depth.saturating_add(1);
    }

    pub fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.built.clear();
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn contains(&self, key: &BuildKey) -> bool {
        self.built.contains(key)
    }

    /// Record a finished build. Outside any scope nothing is remembered.
    pub fn insert(&mut self, key: BuildKey) {
        if self.depth > 0 {
            self.built.insert(key);
        }
    }

    pub fn len(&self) -> usize {
        self.built.len()
    }

    pub fn is_empty(&self) -> bool {
        self.built.is_empty()
    }
}
