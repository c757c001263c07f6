//! Dependency analysis over the planner-supplied task set.
//!
//! The graph is built once per pipeline run, validated for cycles, and then
//! queried (never mutated) as tasks complete. Nodes are arena-style integer
//! indices so traversal is allocation-free and cheap to test in isolation.

use crate::errors::{CycleError, PipelineError};
use crate::task::{TaskId, TaskSpec};
use std::collections::{HashMap, HashSet, VecDeque};

/// A directed acyclic graph of task dependencies.
///
/// Edges point from a task to the tasks it depends on. Immutable after
/// [`DependencyGraph::build`].
#[derive(Debug)]
pub struct DependencyGraph {
    /// Arena: node index to task id.
    ids: Vec<TaskId>,
    /// Reverse lookup from task id to node index.
    index: HashMap<TaskId, usize>,
    /// Dependency edges: node -> nodes it depends on.
    deps: Vec<Vec<usize>>,
    /// Reverse edges: node -> nodes that depend on it.
    dependents: Vec<Vec<usize>>,
}

/// DFS colors for cycle detection.
#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

impl DependencyGraph {
    /// Builds and validates the graph from planner specs.
    ///
    /// Fails with [`PipelineError::DuplicateTask`] on repeated ids,
    /// [`PipelineError::UnknownDependency`] on edges to absent tasks, and
    /// [`PipelineError::Cycle`] naming the participating task ids when the
    /// task set is cyclic. A cyclic set is fatal: nothing is scheduled.
    pub fn build(specs: &[TaskSpec]) -> Result<Self, PipelineError> {
        let mut ids = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());

        for spec in specs {
            if index.insert(spec.id.clone(), ids.len()).is_some() {
                return Err(PipelineError::DuplicateTask {
                    id: spec.id.clone(),
                });
            }
            ids.push(spec.id.clone());
        }

        let mut deps = vec![Vec::new(); specs.len()];
        let mut dependents = vec![Vec::new(); specs.len()];

        for (node, spec) in specs.iter().enumerate() {
            for dep in &spec.dependencies {
                let Some(&dep_node) = index.get(dep) else {
                    return Err(PipelineError::UnknownDependency {
                        task: spec.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                deps[node].push(dep_node);
                dependents[dep_node].push(node);
            }
        }

        let graph = Self {
            ids,
            index,
            deps,
            dependents,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Returns the number of tasks in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the graph holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns every task id in the graph.
    #[must_use]
    pub fn ids(&self) -> &[TaskId] {
        &self.ids
    }

    /// Returns the dependency ids of one task, if it exists.
    #[must_use]
    pub fn dependencies_of(&self, id: &TaskId) -> Option<Vec<&TaskId>> {
        let node = *self.index.get(id)?;
        Some(self.deps[node].iter().map(|&d| &self.ids[d]).collect())
    }

    /// Returns every task whose full dependency set is a subset of
    /// `completed`.
    ///
    /// Tasks already in `completed` are excluded. The orchestrator re-queries
    /// this whenever a task reaches the configured completion threshold to
    /// discover newly unblocked tasks; filtering out tasks that have already
    /// been admitted is the caller's job.
    #[must_use]
    pub fn admissible(&self, completed: &HashSet<TaskId>) -> Vec<TaskId> {
        self.ids
            .iter()
            .enumerate()
            .filter(|(node, id)| {
                !completed.contains(id)
                    && self.deps[*node].iter().all(|&d| completed.contains(&self.ids[d]))
            })
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Returns every task that transitively depends on a task in `failed`.
    ///
    /// These tasks can never become admissible. They are reported as
    /// permanently blocked, distinct from Failed: they never ran.
    #[must_use]
    pub fn blocked_by_failure(&self, failed: &HashSet<TaskId>) -> Vec<TaskId> {
        let mut seen = vec![false; self.ids.len()];
        let mut queue: VecDeque<usize> = failed
            .iter()
            .filter_map(|id| self.index.get(id).copied())
            .collect();

        while let Some(node) = queue.pop_front() {
            for &dependent in &self.dependents[node] {
                if !seen[dependent] {
                    seen[dependent] = true;
                    queue.push_back(dependent);
                }
            }
        }

        seen.iter()
            .enumerate()
            .filter(|&(node, &hit)| hit && !failed.contains(&self.ids[node]))
            .map(|(node, _)| self.ids[node].clone())
            .collect()
    }

    /// Depth-first cycle check tracking the recursion stack.
    fn check_acyclic(&self) -> Result<(), CycleError> {
        let mut marks = vec![Mark::Unvisited; self.ids.len()];
        let mut stack = Vec::new();

        for start in 0..self.ids.len() {
            if marks[start] == Mark::Unvisited {
                self.visit(start, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        node: usize,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Result<(), CycleError> {
        marks[node] = Mark::OnStack;
        stack.push(node);

        for &dep in &self.deps[node] {
            match marks[dep] {
                Mark::Done => {}
                Mark::Unvisited => self.visit(dep, marks, stack)?,
                Mark::OnStack => {
                    // Reconstruct the cycle path from the stack, closing it
                    // with the revisited node.
                    let from = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<TaskId> =
                        stack[from..].iter().map(|&n| self.ids[n].clone()).collect();
                    cycle.push(self.ids[dep].clone());
                    return Err(CycleError::new(cycle));
                }
            }
        }

        stack.pop();
        marks[node] = Mark::Done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn diamond() -> Vec<TaskSpec> {
        vec![
            TaskSpec::new("a", "root"),
            TaskSpec::new("b", "left").with_dependency("a"),
            TaskSpec::new("c", "right").with_dependency("a"),
            TaskSpec::new("d", "join")
                .with_dependency("b")
                .with_dependency("c"),
        ]
    }

    fn completed(ids: &[&str]) -> HashSet<TaskId> {
        ids.iter().map(|id| TaskId::new(*id)).collect()
    }

    #[test]
    fn test_build_diamond() {
        let graph = DependencyGraph::build(&diamond()).unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(
            graph.dependencies_of(&TaskId::new("d")).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_admissible_initially_roots_only() {
        let graph = DependencyGraph::build(&diamond()).unwrap();
        let ready = graph.admissible(&HashSet::new());
        assert_eq!(ready, vec![TaskId::new("a")]);
    }

    #[test]
    fn test_admissible_unblocks_incrementally() {
        let graph = DependencyGraph::build(&diamond()).unwrap();

        let mut ready = graph.admissible(&completed(&["a"]));
        ready.sort();
        assert_eq!(ready, vec![TaskId::new("b"), TaskId::new("c")]);

        // d needs both b and c
        let ready = graph.admissible(&completed(&["a", "b"]));
        assert_eq!(ready, vec![TaskId::new("c")]);

        let ready = graph.admissible(&completed(&["a", "b", "c"]));
        assert_eq!(ready, vec![TaskId::new("d")]);
    }

    #[test]
    fn test_independent_tasks_all_admissible() {
        let specs = vec![
            TaskSpec::new("x", "one"),
            TaskSpec::new("y", "two"),
            TaskSpec::new("z", "three"),
        ];
        let graph = DependencyGraph::build(&specs).unwrap();
        assert_eq!(graph.admissible(&HashSet::new()).len(), 3);
    }

    #[test]
    fn test_cycle_rejected_with_path() {
        let specs = vec![
            TaskSpec::new("a", "a").with_dependency("c"),
            TaskSpec::new("b", "b").with_dependency("a"),
            TaskSpec::new("c", "c").with_dependency("b"),
        ];
        let err = DependencyGraph::build(&specs).unwrap_err();
        let PipelineError::Cycle(cycle) = err else {
            panic!("expected cycle error, got {err}");
        };
        // Every participant is named and the path closes on itself.
        assert_eq!(cycle.cycle.first(), cycle.cycle.last());
        assert_eq!(cycle.cycle.len(), 4);
    }

    #[test]
    fn test_self_cycle_rejected() {
        let specs = vec![TaskSpec::new("a", "a").with_dependency("a")];
        let err = DependencyGraph::build(&specs).unwrap_err();
        assert!(matches!(err, PipelineError::Cycle(_)));
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let specs = vec![TaskSpec::new("a", "one"), TaskSpec::new("a", "two")];
        let err = DependencyGraph::build(&specs).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateTask { .. }));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let specs = vec![TaskSpec::new("a", "a").with_dependency("ghost")];
        let err = DependencyGraph::build(&specs).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownDependency { .. }));
    }

    #[test]
    fn test_blocked_by_failure_is_transitive() {
        let graph = DependencyGraph::build(&diamond()).unwrap();
        let mut blocked = graph.blocked_by_failure(&completed(&["b"]));
        blocked.sort();
        // d depends on b directly; a and c are unaffected.
        assert_eq!(blocked, vec![TaskId::new("d")]);

        let mut blocked = graph.blocked_by_failure(&completed(&["a"]));
        blocked.sort();
        assert_eq!(
            blocked,
            vec![TaskId::new("b"), TaskId::new("c"), TaskId::new("d")]
        );
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::build(&[]).unwrap();
        assert!(graph.is_empty());
        assert!(graph.admissible(&HashSet::new()).is_empty());
    }
}
