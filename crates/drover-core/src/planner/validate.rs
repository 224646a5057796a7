//! Plan validation and normalization.
//!
//! Validates:
//! - The plan is non-empty.
//! - Task identifiers are unique.
//! - `depends_on` references point to existing task identifiers.
//! - The dependency graph is acyclic (topological sort).
//!
//! [`normalize`] additionally reorders the list into a deterministic
//! topological order; [`validate_plan`] is the strict plan-accept check
//! that requires dependencies to appear earlier in the list as given.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use drover_types::{Plan, Task};
use thiserror::Error;

/// Errors from plan validation.
#[derive(Debug, Error)]
pub enum PlanValidationError {
    #[error("plan must contain at least one task")]
    NoTasks,

    #[error("duplicate task identifier: {0:?}")]
    DuplicateTaskId(String),

    #[error("task {task:?} depends on unknown task {dependency:?}")]
    UnknownDependency { task: String, dependency: String },

    #[error("task {task:?} depends on {dependency:?}, which does not appear earlier in the plan")]
    OrderViolation { task: String, dependency: String },

    #[error("dependency cycle detected involving tasks: {0}")]
    CycleDetected(String),
}

/// Strict plan-accept validation.
///
/// Every dependency must refer to a task appearing *earlier* in the list,
/// which implies acyclicity. Used by the state manager when a plan is
/// accepted; plans coming out of [`normalize`] always satisfy it.
pub fn validate_plan(plan: &Plan) -> Result<(), PlanValidationError> {
    if plan.tasks.is_empty() {
        return Err(PlanValidationError::NoTasks);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let all: HashSet<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();

    for task in &plan.tasks {
        if !seen.insert(&task.id) {
            return Err(PlanValidationError::DuplicateTaskId(task.id.clone()));
        }
        for dep in &task.depends_on {
            if seen.contains(dep.as_str()) {
                continue;
            }
            if all.contains(dep.as_str()) {
                return Err(PlanValidationError::OrderViolation {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
            return Err(PlanValidationError::UnknownDependency {
                task: task.id.clone(),
                dependency: dep.clone(),
            });
        }
    }

    Ok(())
}

/// Normalize a task list into deterministic topological order.
///
/// Kahn's algorithm, breaking ties by original list index so the result
/// is stable: a list that is already topologically ordered comes back
/// unchanged. Returns the sorted tasks and whether any reordering
/// happened.
pub fn normalize(tasks: Vec<Task>) -> Result<(Vec<Task>, bool), PlanValidationError> {
    if tasks.is_empty() {
        return Err(PlanValidationError::NoTasks);
    }

    // Identifier uniqueness and index lookup.
    let mut name_to_idx: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());
    for (i, task) in tasks.iter().enumerate() {
        if name_to_idx.insert(task.id.as_str(), i).is_some() {
            return Err(PlanValidationError::DuplicateTaskId(task.id.clone()));
        }
    }

    // Build adjacency list and in-degree map; edge dep -> task.
    let n = tasks.len();
    let mut in_degree = vec![0usize; n];
    let mut adj: Vec<Vec<usize>> = vec![vec![]; n];

    for (task_idx, task) in tasks.iter().enumerate() {
        for dep in &task.depends_on {
            let Some(&dep_idx) = name_to_idx.get(dep.as_str()) else {
                return Err(PlanValidationError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            };
            adj[dep_idx].push(task_idx);
            in_degree[task_idx] += 1;
        }
    }

    // Kahn's algorithm with a min-heap over original indices so ties
    // resolve to the input order.
    let mut ready: BinaryHeap<Reverse<usize>> = BinaryHeap::new();
    for (i, deg) in in_degree.iter().enumerate() {
        if *deg == 0 {
            ready.push(Reverse(i));
        }
    }

    let mut order: Vec<usize> = Vec::with_capacity(n);
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &neighbor in &adj[node] {
            in_degree[neighbor] -= 1;
            if in_degree[neighbor] == 0 {
                ready.push(Reverse(neighbor));
            }
        }
    }

    if order.len() != n {
        let cycle_tasks: Vec<&str> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg > 0)
            .map(|(i, _)| tasks[i].id.as_str())
            .collect();
        return Err(PlanValidationError::CycleDetected(cycle_tasks.join(", ")));
    }

    let reordered = order.iter().enumerate().any(|(pos, &idx)| pos != idx);

    let mut slots: Vec<Option<Task>> = tasks.into_iter().map(Some).collect();
    let sorted = order
        .into_iter()
        .map(|idx| slots[idx].take().expect("each index appears once"))
        .collect();

    Ok((sorted, reordered))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(
            id,
            format!("Task {id}"),
            format!("Do {id}."),
            deps.iter().map(|d| d.to_string()).collect(),
        )
    }

    #[test]
    fn validate_accepts_ordered_plan() {
        let plan = Plan::new(vec![task("a", &[]), task("b", &["a"])]);
        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn validate_rejects_empty_plan() {
        let err = validate_plan(&Plan::default()).unwrap_err();
        assert!(matches!(err, PlanValidationError::NoTasks));
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let plan = Plan::new(vec![task("a", &[]), task("a", &[])]);
        let err = validate_plan(&plan).unwrap_err();
        assert!(matches!(err, PlanValidationError::DuplicateTaskId(ref id) if id == "a"));
    }

    #[test]
    fn validate_rejects_unknown_dependency() {
        let plan = Plan::new(vec![task("a", &["ghost"])]);
        let err = validate_plan(&plan).unwrap_err();
        assert!(matches!(err, PlanValidationError::UnknownDependency { .. }));
    }

    #[test]
    fn validate_rejects_forward_dependency() {
        let plan = Plan::new(vec![task("b", &["a"]), task("a", &[])]);
        let err = validate_plan(&plan).unwrap_err();
        assert!(matches!(err, PlanValidationError::OrderViolation { .. }));
    }

    #[test]
    fn normalize_keeps_ordered_list_unchanged() {
        let (sorted, reordered) =
            normalize(vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])]).unwrap();
        assert!(!reordered);
        let ids: Vec<&str> = sorted.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn normalize_reorders_forward_dependency() {
        let (sorted, reordered) = normalize(vec![task("b", &["a"]), task("a", &[])]).unwrap();
        assert!(reordered);
        let ids: Vec<&str> = sorted.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn normalize_is_stable_for_independent_tasks() {
        let (sorted, reordered) =
            normalize(vec![task("z", &[]), task("m", &[]), task("a", &[])]).unwrap();
        assert!(!reordered);
        let ids: Vec<&str> = sorted.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["z", "m", "a"]);
    }

    #[test]
    fn normalize_handles_diamond() {
        let (sorted, _) = normalize(vec![
            task("d", &["b", "c"]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("a", &[]),
        ])
        .unwrap();
        let ids: Vec<&str> = sorted.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids.len(), 4);
        let pos = |id: &str| ids.iter().position(|t| *t == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn normalize_rejects_direct_cycle() {
        let err = normalize(vec![task("a", &["b"]), task("b", &["a"])]).unwrap_err();
        assert!(matches!(err, PlanValidationError::CycleDetected(_)));
    }

    #[test]
    fn normalize_rejects_transitive_cycle() {
        let err = normalize(vec![
            task("a", &["c"]),
            task("b", &["a"]),
            task("c", &["b"]),
        ])
        .unwrap_err();
        assert!(matches!(err, PlanValidationError::CycleDetected(_)));
    }

    #[test]
    fn normalize_rejects_self_dependency() {
        let err = normalize(vec![task("a", &["a"])]).unwrap_err();
        assert!(matches!(err, PlanValidationError::CycleDetected(_)));
    }

    #[test]
    fn normalized_plan_passes_strict_validation() {
        let (sorted, _) = normalize(vec![task("b", &["a"]), task("a", &[])]).unwrap();
        assert!(validate_plan(&Plan::new(sorted)).is_ok());
    }
}
