//! Single-worker executor
//!
//! Walks a solved graph in its deterministic topological order and runs one
//! action at a time. The first failure stops scheduling.

use std::collections::BTreeSet;

use crate::core::action::ActionId;
use crate::core::solver::SolvedGraph;
use crate::error::{ExecutorError, OrchestraError};

/// Runs concrete actions
pub trait ActionRunner {
    /// Run an action
    fn run(&mut self, id: ActionId) -> Result<(), OrchestraError>;

    /// Whether the action reached its satisfied state after running
    fn verify(&mut self, id: ActionId) -> Result<bool, OrchestraError>;

    /// Human-readable name
    fn describe(&self, id: ActionId) -> String;
}

/// Executor knobs
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorOptions {
    /// Print the plan, run nothing
    pub pretend: bool,
    /// Run only the roots
    pub no_deps: bool,
}

/// What the executor did (or would do, in pretend mode)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Actions in the order they ran or would run
    pub actions: Vec<String>,
    pub pretend: bool,
}

/// Execute a solved graph
pub fn execute(
    solved: &SolvedGraph,
    runner: &mut dyn ActionRunner,
    options: ExecutorOptions,
) -> Result<ExecutionReport, OrchestraError> {
    let mut pending: BTreeSet<ActionId> = if options.no_deps {
        solved.roots.iter().copied().collect()
    } else {
        solved.nodes().into_iter().collect()
    };
    let order: Vec<ActionId> = solved
        .execution_order()
        .into_iter()
        .filter(|id| pending.contains(id))
        .collect();

    // Actions on a cycle never become ready
    if order.len() < pending.len() {
        for id in &order {
            pending.remove(id);
        }
        return Err(ExecutorError::SchedulingHalt {
            pending: pending.iter().map(|id| runner.describe(*id)).collect(),
        }
        .into());
    }

    let mut report = ExecutionReport {
        actions: Vec::new(),
        pretend: options.pretend,
    };

    if options.pretend {
        report.actions = order.iter().map(|id| runner.describe(*id)).collect();
        return Ok(report);
    }

    for id in order {
        let name = runner.describe(id);
        tracing::info!("Running {name}");
        runner.run(id).map_err(|source| ExecutorError::ActionFailed {
            action: name.clone(),
            source: Box::new(source),
        })?;
        if !runner.verify(id)? {
            return Err(ExecutorError::NotSatisfied { action: name }.into());
        }
        report.actions.push(name);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use petgraph::graphmap::DiGraphMap;
    use std::collections::HashSet;

    #[derive(Default)]
    struct RecordingRunner {
        ran: Vec<ActionId>,
        fail: HashSet<ActionId>,
        never_satisfied: HashSet<ActionId>,
    }

    impl ActionRunner for RecordingRunner {
        fn run(&mut self, id: ActionId) -> Result<(), OrchestraError> {
            self.ran.push(id);
            if self.fail.contains(&id) {
                return Err(OrchestraError::Generic(format!("action {} failed", id.0)));
            }
            Ok(())
        }

        fn verify(&mut self, id: ActionId) -> Result<bool, OrchestraError> {
            Ok(!self.never_satisfied.contains(&id))
        }

        fn describe(&self, id: ActionId) -> String {
            format!("action {}", id.0)
        }
    }

    /// 2 depends on 1 depends on 0, 3 depends on 0
    fn chain() -> SolvedGraph {
        let mut graph = DiGraphMap::new();
        graph.add_edge(ActionId(2), ActionId(1), ());
        graph.add_edge(ActionId(1), ActionId(0), ());
        graph.add_edge(ActionId(3), ActionId(0), ());
        SolvedGraph {
            graph,
            roots: vec![ActionId(2), ActionId(3)],
        }
    }

    #[test]
    fn test_runs_in_dependency_order() {
        let mut runner = RecordingRunner::default();
        let report = execute(&chain(), &mut runner, ExecutorOptions::default()).unwrap();
        assert_eq!(
            runner.ran,
            vec![ActionId(0), ActionId(1), ActionId(2), ActionId(3)]
        );
        assert_eq!(report.actions.len(), 4);
    }

    #[test]
    fn test_pretend_runs_nothing() {
        let mut runner = RecordingRunner::default();
        let report = execute(
            &chain(),
            &mut runner,
            ExecutorOptions {
                pretend: true,
                no_deps: false,
            },
        )
        .unwrap();
        assert!(runner.ran.is_empty());
        assert!(report.pretend);
        assert_eq!(report.actions[0], "action 0");
        assert_eq!(report.actions.len(), 4);
    }

    #[test]
    fn test_no_deps_runs_only_roots() {
        let mut runner = RecordingRunner::default();
        execute(
            &chain(),
            &mut runner,
            ExecutorOptions {
                pretend: false,
                no_deps: true,
            },
        )
        .unwrap();
        assert_eq!(runner.ran, vec![ActionId(2), ActionId(3)]);
    }

    #[test]
    fn test_first_failure_stops_scheduling() {
        let mut runner = RecordingRunner::default();
        runner.fail.insert(ActionId(1));
        let err = execute(&chain(), &mut runner, ExecutorOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            OrchestraError::Executor(ExecutorError::ActionFailed { ref action, .. }) if action == "action 1"
        ));
        assert_eq!(runner.ran, vec![ActionId(0), ActionId(1)]);
    }

    #[test]
    fn test_unsatisfied_after_run_is_an_error() {
        let mut runner = RecordingRunner::default();
        runner.never_satisfied.insert(ActionId(0));
        let err = execute(&chain(), &mut runner, ExecutorOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            OrchestraError::Executor(ExecutorError::NotSatisfied { .. })
        ));
    }

    #[test]
    fn test_cycle_halts_scheduling() {
        let mut graph = DiGraphMap::new();
        graph.add_edge(ActionId(0), ActionId(1), ());
        graph.add_edge(ActionId(1), ActionId(0), ());
        let solved = SolvedGraph {
            graph,
            roots: vec![ActionId(0)],
        };
        let mut runner = RecordingRunner::default();
        let err = execute(&solved, &mut runner, ExecutorOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            OrchestraError::Executor(ExecutorError::SchedulingHalt { ref pending }) if pending.len() == 2
        ));
        assert!(runner.ran.is_empty());
    }

    #[test]
    fn test_cycle_halts_before_running_ready_actions() {
        let mut graph = DiGraphMap::new();
        graph.add_edge(ActionId(1), ActionId(2), ());
        graph.add_edge(ActionId(2), ActionId(1), ());
        graph.add_node(ActionId(0));
        let solved = SolvedGraph {
            graph,
            roots: vec![ActionId(0), ActionId(1)],
        };
        let mut runner = RecordingRunner::default();
        let err = execute(&solved, &mut runner, ExecutorOptions::default()).unwrap_err();
        match err {
            OrchestraError::Executor(ExecutorError::SchedulingHalt { pending }) => {
                assert_eq!(pending, ["action 1", "action 2"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(runner.ran.is_empty());
    }
}
