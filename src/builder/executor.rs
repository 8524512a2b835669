//! Staged build executor.
//!
//! Stages run strictly in order with a barrier between them. The steps of
//! one stage are dispatched to a rayon pool when more than one worker is
//! configured; the executor waits for every step of the stage before it
//! commits their output and moves on.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::builder::context::{BuildResult, ResultContext, StepContext, StepOutput};
use crate::builder::errors::{BuildFailure, ExecutionError};
use crate::builder::events::BuildEvent;
use crate::core::chain::{ChainBuilder, StepHandle};
use crate::core::item::ItemId;
use crate::resolver::DependencyGraph;

/// Lifecycle of one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Initialized,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildState::Initialized => "initialized",
            BuildState::Running => "running",
            BuildState::Completed => "completed",
            BuildState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Receives build events as they happen.
///
/// Events for steps of the same stage may arrive from several worker
/// threads at once.
pub trait BuildObserver: Send + Sync {
    fn on_event(&self, event: &BuildEvent);
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl BuildObserver for NoopObserver {
    fn on_event(&self, _event: &BuildEvent) {}
}

/// Timing of one executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTiming {
    pub name: String,
    pub stage: usize,
    pub duration: Duration,
}

/// Timing summary of a build.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Executed steps in execution order.
    pub steps: Vec<StepTiming>,
    /// Number of stages that ran.
    pub stages: usize,
    pub total: Duration,
}

impl BuildReport {
    /// Get the names of executed steps in execution order.
    pub fn executed_steps(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }

    /// Get the timing of a step by name.
    pub fn step(&self, name: &str) -> Option<&StepTiming> {
        self.steps.iter().find(|s| s.name == name)
    }
}

struct StepRun {
    handle: StepHandle,
    name: String,
    outcome: Result<StepOutput, ExecutionError>,
    elapsed: Duration,
}

/// Executes a computed dependency graph.
pub struct BuildExecutor<'a> {
    chain: &'a ChainBuilder,
    graph: &'a DependencyGraph,
    jobs: usize,
    fail_fast: bool,
    observer: &'a dyn BuildObserver,
    state: BuildState,
}

impl<'a> BuildExecutor<'a> {
    /// Create an executor for `graph`, which must have been built from `chain`.
    pub fn new(chain: &'a ChainBuilder, graph: &'a DependencyGraph) -> Self {
        BuildExecutor {
            chain,
            graph,
            jobs: default_jobs(),
            fail_fast: true,
            observer: &NoopObserver,
            state: BuildState::Initialized,
        }
    }

    /// Set the worker pool size. One worker runs every stage sequentially.
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Stop a sequential stage at its first failing step.
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Report events to `observer`.
    pub fn observer(mut self, observer: &'a dyn BuildObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Get the current state.
    pub fn state(&self) -> BuildState {
        self.state
    }

    fn transition(&mut self, next: BuildState) {
        tracing::debug!("build {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run every stage of the graph.
    pub fn execute(&mut self) -> Result<BuildResult, BuildFailure> {
        if self.state != BuildState::Initialized {
            return Err(BuildFailure::execution(
                vec![ExecutionError::AlreadyExecuted {
                    state: self.state.to_string(),
                }],
                Vec::new(),
            ));
        }
        self.transition(BuildState::Running);

        let start = Instant::now();
        let mut report = BuildReport::default();
        let result = self.run_stages(&mut report);
        report.total = start.elapsed();
        let duration_ms = report.total.as_millis() as u64;

        match result {
            Ok(results) => {
                self.transition(BuildState::Completed);
                tracing::info!(
                    "finished {} step(s) in {:.2}s",
                    report.steps.len(),
                    report.total.as_secs_f64()
                );
                self.observer
                    .on_event(&BuildEvent::finished(true, duration_ms, report.steps.len()));
                Ok(BuildResult::new(
                    results,
                    self.graph.finals().to_vec(),
                    report,
                ))
            }
            Err(errors) => {
                self.transition(BuildState::Failed);
                self.observer
                    .on_event(&BuildEvent::finished(false, duration_ms, report.steps.len()));
                Err(BuildFailure::execution(errors, report.executed_steps()))
            }
        }
    }

    fn run_stages(&self, report: &mut BuildReport) -> Result<ResultContext, Vec<ExecutionError>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .thread_name(|i| format!("buildchain-worker-{}", i))
            .build()
            .map_err(|e| {
                vec![ExecutionError::WorkerPool {
                    message: e.to_string(),
                }]
            })?;

        let mut results = ResultContext::new(self.chain.items());
        for initial in self.chain.initial_items() {
            results.seed(initial);
        }

        let stages = self.graph.stages();
        tracing::info!(
            "running {} step(s) in {} stage(s) with {} worker(s)",
            self.graph.len(),
            stages.len(),
            self.jobs
        );
        self.observer
            .on_event(&BuildEvent::started(self.graph.len(), stages.len(), self.jobs));

        let mut produced: BTreeMap<StepHandle, BTreeMap<ItemId, usize>> = BTreeMap::new();

        for stage in stages {
            let concurrent = self.jobs > 1 && stage.len() > 1;
            let mut order = stage.steps().to_vec();
            if concurrent {
                order.sort_by(|a, b| self.name_of(*a).cmp(self.name_of(*b)));
            }

            tracing::debug!("stage {}: {} step(s)", stage.index(), order.len());
            self.observer.on_event(&BuildEvent::stage(
                stage.index(),
                order.iter().map(|h| self.name_of(*h).to_string()).collect(),
            ));

            let runs: Vec<StepRun> = if concurrent {
                let shared = &results;
                pool.install(|| {
                    order
                        .par_iter()
                        .map(|h| self.run_step(*h, stage.index(), shared))
                        .collect()
                })
            } else {
                let mut runs = Vec::with_capacity(order.len());
                for handle in &order {
                    let run = self.run_step(*handle, stage.index(), &results);
                    let failed = run.outcome.is_err();
                    runs.push(run);
                    if failed && self.fail_fast {
                        break;
                    }
                }
                runs
            };

            let mut failures = Vec::new();
            let mut outputs = Vec::new();
            for run in runs {
                report.steps.push(StepTiming {
                    name: run.name,
                    stage: stage.index(),
                    duration: run.elapsed,
                });
                match run.outcome {
                    Ok(output) => outputs.push((run.handle, output)),
                    Err(e) => failures.push(e),
                }
            }
            report.stages += 1;

            if !failures.is_empty() {
                tracing::debug!(
                    "stage {} failed; discarding output of {} step(s)",
                    stage.index(),
                    outputs.len()
                );
                return Err(failures);
            }

            // Commit in registration order so multi items are deterministic.
            outputs.sort_by_key(|(handle, _)| *handle);
            for (handle, output) in outputs {
                let Some(step) = self.chain.step(handle) else {
                    continue;
                };
                produced.insert(handle, output.produced.clone());
                if let Err(e) = results.commit(step, output) {
                    failures.push(e);
                }
            }
            if !failures.is_empty() {
                return Err(failures);
            }
        }

        let unfulfilled = self.check_productions(&produced);
        if !unfulfilled.is_empty() {
            return Err(unfulfilled);
        }

        Ok(results)
    }

    fn run_step(&self, handle: StepHandle, stage: usize, results: &ResultContext) -> StepRun {
        let name = self.name_of(handle).to_string();
        let start = Instant::now();

        let outcome = match self.chain.step(handle) {
            Some(step) => {
                tracing::debug!("running step `{}`", name);
                self.observer
                    .on_event(&BuildEvent::step_started(name.as_str(), stage));

                let mut ctx = StepContext::new(step, results);
                let action = step.action();
                match catch_unwind(AssertUnwindSafe(|| action(&mut ctx))) {
                    Ok(Ok(())) => Ok(ctx.finish()),
                    Ok(Err(source)) => Err(into_execution_error(&name, source)),
                    Err(payload) => Err(ExecutionError::StepPanicked {
                        step: name.clone(),
                        message: panic_message(payload.as_ref()),
                    }),
                }
            }
            None => Err(ExecutionError::Internal {
                message: format!("step #{} is not registered", handle.index()),
            }),
        };

        let elapsed = start.elapsed();
        let error = outcome.as_ref().err().map(|e| e.to_string());
        match &error {
            Some(e) => tracing::debug!("step `{}` failed: {}", name, e),
            None => tracing::debug!("step `{}` finished in {:?}", name, elapsed),
        }
        self.observer.on_event(&BuildEvent::step_finished(
            name.as_str(),
            stage,
            elapsed.as_millis() as u64,
            error,
        ));

        StepRun {
            handle,
            name,
            outcome,
            elapsed,
        }
    }

    /// Every non-optional produce must have been fulfilled by its step.
    fn check_productions(
        &self,
        produced: &BTreeMap<StepHandle, BTreeMap<ItemId, usize>>,
    ) -> Vec<ExecutionError> {
        let mut errors = Vec::new();
        for stage in self.graph.stages() {
            for &handle in stage.steps() {
                let Some(step) = self.chain.step(handle) else {
                    continue;
                };
                for produce in step.produces().iter().filter(|p| !p.flags.optional) {
                    let count = produced
                        .get(&handle)
                        .and_then(|counts| counts.get(produce.item.id()))
                        .copied()
                        .unwrap_or(0);
                    if count == 0 {
                        errors.push(ExecutionError::UnfulfilledProduction {
                            item: produce.item.id().to_string(),
                            step: step.name().to_string(),
                        });
                    }
                }
            }
        }
        errors
    }

    fn name_of(&self, handle: StepHandle) -> &str {
        self.graph.step_name(handle).unwrap_or_default()
    }
}

/// Errors raised through the step context keep their own identity.
fn into_execution_error(step: &str, source: anyhow::Error) -> ExecutionError {
    match source.downcast::<ExecutionError>() {
        Ok(err) => err,
        Err(source) => ExecutionError::StepFailed {
            step: step.to_string(),
            source,
        },
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Default worker count: the available parallelism of the host.
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step::{new_step, ProduceFlags};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<BuildEvent>>,
    }

    impl BuildObserver for Recorder {
        fn on_event(&self, event: &BuildEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_linear_execution() {
        let mut chain = ChainBuilder::new();
        let x = chain.declare_simple::<u32>("x").unwrap();
        let y = chain.declare_simple::<u32>("y").unwrap();

        let kx = x.clone();
        chain
            .register_step(
                new_step("p")
                    .produces(&x)
                    .build(move |ctx| Ok(ctx.produce(&kx, 20)?))
                    .unwrap(),
            )
            .unwrap();
        let (kx, ky) = (x.clone(), y.clone());
        chain
            .register_step(
                new_step("q")
                    .requires(&x)
                    .produces(&y)
                    .build(move |ctx| {
                        let x = ctx.require(&kx)?;
                        ctx.produce(&ky, *x + 1)?;
                        Ok(())
                    })
                    .unwrap(),
            )
            .unwrap();

        let graph = chain.graph(&[y.id().clone()]).unwrap();
        let mut executor = BuildExecutor::new(&chain, &graph).jobs(1);
        let result = executor.execute().unwrap();

        assert_eq!(executor.state(), BuildState::Completed);
        assert_eq!(*result.get(&y).unwrap(), 21);
        assert_eq!(result.report().executed_steps(), vec!["p", "q"]);
        assert_eq!(result.report().stages, 2);
    }

    #[test]
    fn test_step_failure_stops_later_stages() {
        let mut chain = ChainBuilder::new();
        let x = chain.declare_simple::<u32>("x").unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        chain
            .register_step(
                new_step("broken")
                    .produces(&x)
                    .build(|_| anyhow::bail!("disk full"))
                    .unwrap(),
            )
            .unwrap();
        let counter = ran.clone();
        chain
            .register_step(
                new_step("after")
                    .requires(&x)
                    .build(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap(),
            )
            .unwrap();

        let graph = chain.graph(&[]).unwrap();
        let mut executor = BuildExecutor::new(&chain, &graph);
        let failure = executor.execute().unwrap_err();

        assert_eq!(executor.state(), BuildState::Failed);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(failure.executed_steps(), &["broken".to_string()]);
        assert!(matches!(
            failure.execution_errors()[0],
            ExecutionError::StepFailed { step, .. } if step == "broken"
        ));
    }

    #[test]
    fn test_concurrent_failures_are_collected() {
        let mut chain = ChainBuilder::new();
        for name in ["b", "a", "c"] {
            let fails = name != "c";
            chain
                .register_step(
                    new_step(name)
                        .build(move |ctx| {
                            if fails {
                                anyhow::bail!("{} failed", ctx.step_name());
                            }
                            Ok(())
                        })
                        .unwrap(),
                )
                .unwrap();
        }

        let graph = chain.graph(&[]).unwrap();
        let failure = BuildExecutor::new(&chain, &graph)
            .jobs(4)
            .execute()
            .unwrap_err();

        let errors = failure.execution_errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].step(), Some("a"));
        assert_eq!(errors[1].step(), Some("b"));
        assert_eq!(failure.executed_steps().len(), 3);
    }

    #[test]
    fn test_panic_is_reported() {
        let mut chain = ChainBuilder::new();
        chain
            .register_step(new_step("explode").build(|_| panic!("kaboom")).unwrap())
            .unwrap();

        let graph = chain.graph(&[]).unwrap();
        let failure = BuildExecutor::new(&chain, &graph).execute().unwrap_err();
        assert!(matches!(
            failure.execution_errors()[0],
            ExecutionError::StepPanicked { message, .. } if message == "kaboom"
        ));
    }

    #[test]
    fn test_unfulfilled_production() {
        let mut chain = ChainBuilder::new();
        let x = chain.declare_simple::<u32>("x").unwrap();
        let maybe = chain.declare_simple::<u32>("maybe").unwrap();
        chain
            .register_step(
                new_step("lazy")
                    .produces(&x)
                    .produces_with(&maybe, ProduceFlags::NONE.optional())
                    .build(|_| Ok(()))
                    .unwrap(),
            )
            .unwrap();

        let graph = chain.graph(&[]).unwrap();
        let failure = BuildExecutor::new(&chain, &graph).execute().unwrap_err();
        let errors = failure.execution_errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            ExecutionError::UnfulfilledProduction { item, .. } if item == "x"
        ));
    }

    #[test]
    fn test_context_errors_keep_identity() {
        let mut chain = ChainBuilder::new();
        let x = chain.declare_simple::<u32>("x").unwrap();
        let key = x.clone();
        chain
            .register_step(
                new_step("sneaky")
                    .build(move |ctx| Ok(ctx.produce(&key, 1)?))
                    .unwrap(),
            )
            .unwrap();

        let graph = chain.graph(&[]).unwrap();
        let failure = BuildExecutor::new(&chain, &graph).execute().unwrap_err();
        assert!(matches!(
            failure.execution_errors()[0],
            ExecutionError::UndeclaredAccess { .. }
        ));
    }

    #[test]
    fn test_events_are_reported() {
        let mut chain = ChainBuilder::new();
        let m = chain.declare_marker("m").unwrap();
        let key = m.clone();
        chain
            .register_step(
                new_step("mark")
                    .produces(&m)
                    .build(move |ctx| Ok(ctx.produce_marker(&key)?))
                    .unwrap(),
            )
            .unwrap();

        let graph = chain.graph(&[]).unwrap();
        let recorder = Recorder::default();
        let result = BuildExecutor::new(&chain, &graph)
            .observer(&recorder)
            .execute()
            .unwrap();
        assert!(result.is_present(&m));

        let events = recorder.events.lock().unwrap();
        assert!(matches!(events[0], BuildEvent::BuildStarted { steps: 1, .. }));
        assert!(matches!(events[1], BuildEvent::StageStarted { stage: 0, .. }));
        assert!(matches!(events[2], BuildEvent::StepStarted { .. }));
        assert!(matches!(
            events[3],
            BuildEvent::StepFinished { success: true, .. }
        ));
        assert!(matches!(
            events[4],
            BuildEvent::BuildFinished { success: true, steps_run: 1, .. }
        ));
    }

    #[test]
    fn test_executor_runs_once() {
        let chain = ChainBuilder::new();
        let graph = chain.graph(&[]).unwrap();
        let mut executor = BuildExecutor::new(&chain, &graph);

        assert!(executor.execute().is_ok());
        let failure = executor.execute().unwrap_err();
        assert!(matches!(
            failure.execution_errors()[0],
            ExecutionError::AlreadyExecuted { state } if state == "completed"
        ));
        assert!(failure.executed_steps().is_empty());
    }
}
