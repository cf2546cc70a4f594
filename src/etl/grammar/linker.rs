//! Deferred binding of production calls.
//!
//! Inside one compilation session a production may call another production
//! that has not been compiled yet, including mutual recursion. Rather than
//! topologically sorting the call graph, every call registers against the
//! target's entry name; when that entry's state machine is finalized the
//! linker binds all registered sites in one step. A site is bound exactly
//! once, and finalizing an entry twice is a usage error in the compiler,
//! not a data error.

use crate::etl::grammar::CallSite;
use std::collections::HashMap;

/// Scoped to one grammar compilation session.
#[derive(Debug, Default)]
pub struct ActionLinker {
    pending: HashMap<String, Vec<usize>>,
    resolved: HashMap<String, usize>,
}

impl ActionLinker {
    pub fn new() -> Self {
        ActionLinker::default()
    }

    /// Register that `site` must be bound to entry `target` once it exists.
    /// Binds immediately when the target is already resolved.
    pub fn link_block(&mut self, sites: &mut [CallSite], site: usize, target: &str) {
        if let Some(&state) = self.resolved.get(target) {
            sites[site].bind_local(state);
        } else {
            self.pending.entry(target.to_string()).or_default().push(site);
        }
    }

    /// Announce that `target`'s state machine is built, binding every site
    /// registered so far. Resolving a target with no pending callers is a
    /// no-op.
    ///
    /// # Panics
    ///
    /// Panics if `target` was already resolved; entries are build-once.
    pub fn resolve_block(&mut self, sites: &mut [CallSite], target: &str, entry_state: usize) {
        if self.resolved.contains_key(target) {
            panic!("entry '{}' resolved twice", target);
        }
        if let Some(waiting) = self.pending.remove(target) {
            for site in waiting {
                sites[site].bind_local(entry_state);
            }
        }
        self.resolved.insert(target.to_string(), entry_state);
    }

    /// Entry names that still have unbound callers. Non-empty after the
    /// whole grammar is built means the grammar referenced a production
    /// that was never defined.
    pub fn unresolved(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pending.keys().cloned().collect();
        names.sort();
        names
    }
}
