//! Execution-plan construction: dependency validation and topological
//! batching over `depends_on` edges.
//!
//! Kahn's algorithm, layered: batch 0 is every check with no unmet
//! dependencies; removing a batch exposes the next one. Checks inside a
//! batch have no ordering obligations and run concurrently.

use crate::engine::registry::{CheckDefinition, CheckRegistry};
use crate::error::Error;
use std::collections::HashMap;
use std::sync::Arc;

/// The execution plan: batches in dependency order. Stable for the
/// lifetime of a scan.
pub type ExecutionPlan = Vec<Vec<Arc<CheckDefinition>>>;

/// Validates the registry's dependency graph and layers it into batches.
///
/// # Validation rules
///
/// 1. Every `depends_on` reference must name a registered check.
/// 2. The graph must be acyclic.
///
/// Within a batch, checks keep registration order.
///
/// # Errors
///
/// `UNKNOWN_DEPENDENCY` for a reference to an unregistered check (no stub
/// nodes are created); `CYCLIC_DEPENDENCIES` naming the checks left on the
/// cycle.
pub fn build_plan(registry: &CheckRegistry) -> Result<ExecutionPlan, Error> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for check in registry.iter() {
        in_degree.entry(check.id()).or_insert(0);
        for dep in &check.metadata().depends_on {
            if registry.get(dep).is_none() {
                return Err(Error::unknown_dependency(check.id(), dep));
            }
            *in_degree.entry(check.id()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(check.id());
        }
    }

    let mut plan: ExecutionPlan = Vec::new();
    let mut remaining = registry.len();

    while remaining > 0 {
        // Registration order within the layer
        let ready: Vec<&Arc<CheckDefinition>> = registry
            .iter()
            .filter(|check| in_degree.get(check.id()) == Some(&0))
            .collect();

        if ready.is_empty() {
            let mut on_cycle: Vec<String> = registry
                .iter()
                .filter(|check| in_degree.get(check.id()).is_some_and(|d| *d > 0))
                .map(|check| check.id().to_string())
                .collect();
            on_cycle.sort();
            return Err(Error::cyclic_dependencies(&on_cycle));
        }

        for check in &ready {
            in_degree.remove(check.id());
            for dependent in dependents.get(check.id()).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                }
            }
        }

        remaining -= ready.len();
        plan.push(ready.into_iter().map(Arc::clone).collect());
    }

    Ok(plan)
}
