//! Extends inheritance resolver.
//!
//! Resolves each job's `extends` chain into a fully merged job under
//! GitLab's per-field merge rules. A job whose chain closes a loop is
//! returned in its original unresolved form with one circular record; all
//! acyclic jobs resolve normally regardless of ordering.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use log::{debug, warn};
use serde_yaml::{Mapping, Value};

use crate::model::builder::extract_job;
use crate::model::{CircularDependency, CycleKind, Job};

/// Keys where a child's lines replace the parent's wholesale instead of
/// concatenating.
const SCRIPT_KEYS: [&str; 3] = ["script", "before_script", "after_script"];

/// Outcome of resolving a jobs mapping.
#[derive(Debug)]
pub struct ExtendsResolution {
    /// Jobs in original order, each replaced by its merged form (or kept
    /// unresolved when its chain was cyclic)
    pub resolved: IndexMap<String, Job>,
    pub circular: Vec<CircularDependency>,
}

enum Outcome {
    Merged(Job),
    /// Ancestor chain at the point the loop closed
    Cycle(Vec<String>),
}

struct Resolver<'a> {
    jobs: &'a IndexMap<String, Job>,
    /// Fully merged jobs, done
    done: HashMap<String, Job>,
    /// Names on the current ancestor path, in order
    resolving: Vec<String>,
    /// Entry jobs already known to sit on a cycle
    cyclic: HashSet<String>,
}

/// Resolves every job's extends chain.
pub fn resolve_all_extends(jobs: &IndexMap<String, Job>) -> ExtendsResolution {
    let mut resolver = Resolver {
        jobs,
        done: HashMap::new(),
        resolving: Vec::new(),
        cyclic: HashSet::new(),
    };

    let mut resolved = IndexMap::new();
    let mut circular = Vec::new();

    for (name, job) in jobs {
        match resolver.resolve(name) {
            Outcome::Merged(merged) => {
                resolved.insert(name.clone(), merged);
            }
            Outcome::Cycle(chain) => {
                warn!("Circular extends chain at job '{name}'");
                resolver.cyclic.insert(name.clone());
                circular.push(CircularDependency {
                    path: name.clone(),
                    chain,
                    kind: CycleKind::Extends,
                });
                // Degrade to the original, unresolved job.
                resolved.insert(name.clone(), job.clone());
            }
        }
        debug_assert!(resolver.resolving.is_empty());
    }

    debug!(
        "Extends resolution finished: {} jobs, {} cycles",
        resolved.len(),
        circular.len()
    );

    ExtendsResolution { resolved, circular }
}

impl Resolver<'_> {
    fn resolve(&mut self, name: &str) -> Outcome {
        if let Some(done) = self.done.get(name) {
            return Outcome::Merged(done.clone());
        }
        if self.cyclic.contains(name) {
            // A chain passing through a known-cyclic job is itself cyclic.
            let mut chain = self.resolving.clone();
            chain.push(name.to_string());
            return Outcome::Cycle(chain);
        }

        // Entry loop only calls resolve for existing names.
        let jobs = self.jobs;
        let job = &jobs[name];
        if job.extends.is_empty() {
            self.done.insert(name.to_string(), job.clone());
            return Outcome::Merged(job.clone());
        }

        self.resolving.push(name.to_string());

        // Parents left to right; each successive parent's merge result
        // becomes the new base for the next.
        let mut base: Option<Mapping> = None;
        for parent in &job.extends {
            if self.resolving.contains(parent) {
                let mut chain = self.resolving.clone();
                chain.push(parent.clone());
                self.resolving.pop();
                return Outcome::Cycle(chain);
            }
            if !self.jobs.contains_key(parent) {
                // Unknown parent: leave the child as-is for this parent.
                // The graph layer renders it as a template reference.
                continue;
            }
            let parent_job = match self.resolve(parent) {
                Outcome::Merged(parent_job) => parent_job,
                Outcome::Cycle(chain) => {
                    self.resolving.pop();
                    return Outcome::Cycle(chain);
                }
            };
            base = Some(match base {
                None => parent_job.raw,
                Some(accumulated) => merge_job_mappings(&accumulated, &parent_job.raw),
            });
        }

        self.resolving.pop();

        let mut merged_raw = match base {
            Some(base) => merge_job_mappings(&base, &job.raw),
            None => job.raw.clone(),
        };
        merged_raw.remove("extends");

        let merged = extract_job(name, &merged_raw, job.span.clone());
        self.done.insert(name.to_string(), merged.clone());
        Outcome::Merged(merged)
    }
}

/// Merges a parent job mapping into a child's, child values taking
/// precedence, under the per-field rules:
///
/// - script keys: child replaces parent wholesale if it has any lines
/// - other sequences: parent's items then child's items
/// - mappings: recursive deep merge, child keys win
/// - everything else: child wins if present
pub fn merge_job_mappings(parent: &Mapping, child: &Mapping) -> Mapping {
    let mut merged = Mapping::new();

    // Parent-only keys first so parent field order is kept, then child keys.
    for (key, parent_value) in parent {
        if !child.contains_key(key) {
            merged.insert(key.clone(), parent_value.clone());
        }
    }

    for (key, child_value) in child {
        let value = match parent.get(key) {
            None => child_value.clone(),
            Some(parent_value) => merge_field(key, parent_value, child_value),
        };
        merged.insert(key.clone(), value);
    }

    merged
}

fn merge_field(key: &Value, parent: &Value, child: &Value) -> Value {
    let is_script_key = key
        .as_str()
        .is_some_and(|k| SCRIPT_KEYS.contains(&k));

    if is_script_key {
        return if script_is_empty(child) {
            parent.clone()
        } else {
            child.clone()
        };
    }

    match (parent, child) {
        (Value::Sequence(parent_items), Value::Sequence(child_items)) => {
            let mut items = parent_items.clone();
            items.extend(child_items.iter().cloned());
            Value::Sequence(items)
        }
        (Value::Mapping(parent_map), Value::Mapping(child_map)) => {
            let mut merged = parent_map.clone();
            crate::engine::includes::deep_merge(&mut merged, child_map);
            Value::Mapping(merged)
        }
        _ => child.clone(),
    }
}

fn script_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Sequence(items) => items.is_empty(),
        _ => false,
    }
}
