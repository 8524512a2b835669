//! Dependency graph construction.
//!
//! The graph is derived from a [`ChainBuilder`]: nodes are steps, and an
//! edge runs from a producer to each consumer of the items it produces.
//! A destructive consumer additionally gets an edge from every
//! non-destructive consumer of the same item so the destructive read is
//! always last. Steps are then layered into stages with Kahn's algorithm;
//! a step's stage is one more than the highest stage of its predecessors.
//!
//! The graph is immutable once built and is discarded with the build.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;

use crate::core::chain::{ChainBuilder, StepHandle};
use crate::core::item::{ItemId, ItemKind};
use crate::resolver::errors::{ChainError, ChainErrors};
use crate::util::hash::Fingerprint;

/// Why an edge exists between two steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// The source step produces an item the target consumes.
    Produces,
    /// The source reads an item that the target consumes destructively.
    ReadBeforeDestroy,
}

/// One item-level reason for an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EdgeReason {
    pub item: ItemId,
    pub kind: EdgeKind,
}

/// A directed edge with every item that causes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub from: StepHandle,
    pub to: StepHandle,
    pub reasons: Vec<EdgeReason>,
}

/// A set of mutually independent steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    index: usize,
    steps: Vec<StepHandle>,
}

impl Stage {
    /// Get the stage number.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Get the steps of this stage in registration order.
    pub fn steps(&self) -> &[StepHandle] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Producer {
    step: StepHandle,
    weak: bool,
    overridable: bool,
}

/// The computed step graph for one build.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<StepHandle, Vec<EdgeReason>>,
    nodes: BTreeMap<StepHandle, NodeIndex>,
    names: BTreeMap<StepHandle, String>,
    stages: Vec<Stage>,
    stage_of: BTreeMap<StepHandle, usize>,
    finals: Vec<ItemId>,
}

impl DependencyGraph {
    /// Build the graph for `chain`, keeping only steps that feed `finals`.
    ///
    /// An empty `finals` slice keeps every step. All configuration errors
    /// found are returned together.
    pub fn build(chain: &ChainBuilder, finals: &[ItemId]) -> Result<Self, ChainErrors> {
        let mut errors = Vec::new();

        for item in finals {
            if !chain.items().contains(item) {
                errors.push(ChainError::UnknownFinalItem {
                    item: item.to_string(),
                });
            }
        }

        let producers = collect_producers(chain, &mut errors);
        check_destructive_consumers(chain, &mut errors);

        let included = include_steps(chain, finals, &producers);
        check_satisfied(chain, &included, &producers, &mut errors);

        let mut dag = DependencyGraph::wire(chain, &included, &producers);
        dag.finals = finals.to_vec();

        if let Err(cycle) = dag.assign_stages() {
            errors.push(cycle);
        }

        if !errors.is_empty() {
            tracing::debug!("build chain has {} configuration error(s)", errors.len());
            return Err(ChainErrors::new(errors));
        }

        tracing::debug!(
            "computed graph: {} of {} step(s) in {} stage(s)",
            dag.len(),
            chain.len(),
            dag.stages.len()
        );

        Ok(dag)
    }

    fn wire(
        chain: &ChainBuilder,
        included: &BTreeSet<StepHandle>,
        producers: &BTreeMap<ItemId, Vec<Producer>>,
    ) -> Self {
        let mut dag = DependencyGraph {
            graph: DiGraph::new(),
            nodes: BTreeMap::new(),
            names: BTreeMap::new(),
            stages: Vec::new(),
            stage_of: BTreeMap::new(),
            finals: Vec::new(),
        };

        for (handle, step) in chain.iter_steps() {
            if included.contains(&handle) {
                let node = dag.graph.add_node(handle);
                dag.nodes.insert(handle, node);
                dag.names.insert(handle, step.name().to_string());
            }
        }

        for (consumer, step) in chain.iter_steps() {
            if !included.contains(&consumer) {
                continue;
            }
            for consume in step.consumes() {
                let id = consume.item.id();
                for producer in producers.get(id).into_iter().flatten() {
                    if producer.step != consumer && included.contains(&producer.step) {
                        dag.add_reason(producer.step, consumer, id, EdgeKind::Produces);
                    }
                }

                if consume.is_destructive() {
                    for (reader, other) in chain.iter_steps() {
                        let reads = other
                            .consume_of(id)
                            .is_some_and(|c| !c.is_destructive());
                        if reader != consumer && reads && included.contains(&reader) {
                            dag.add_reason(reader, consumer, id, EdgeKind::ReadBeforeDestroy);
                        }
                    }
                }
            }
        }

        dag
    }

    fn add_reason(&mut self, from: StepHandle, to: StepHandle, item: &ItemId, kind: EdgeKind) {
        let (Some(&a), Some(&b)) = (self.nodes.get(&from), self.nodes.get(&to)) else {
            return;
        };
        let reason = EdgeReason {
            item: item.clone(),
            kind,
        };

        match self.graph.find_edge(a, b) {
            Some(edge) => {
                let reasons = &mut self.graph[edge];
                if !reasons.contains(&reason) {
                    reasons.push(reason);
                }
            }
            None => {
                self.graph.add_edge(a, b, vec![reason]);
            }
        }
    }

    /// Layer steps into stages, or report the first cycle found.
    fn assign_stages(&mut self) -> Result<(), ChainError> {
        let mut in_degree: BTreeMap<StepHandle, usize> = BTreeMap::new();
        let mut ready = BTreeSet::new();

        for (&handle, &node) in &self.nodes {
            let degree = self.graph.edges_directed(node, Direction::Incoming).count();
            in_degree.insert(handle, degree);
            if degree == 0 {
                ready.insert(handle);
            }
        }

        let mut stage_of = BTreeMap::new();
        while let Some(handle) = ready.pop_first() {
            let Some(&node) = self.nodes.get(&handle) else {
                continue;
            };

            let stage = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|pred| stage_of.get(&self.graph[pred]))
                .map(|s: &usize| s + 1)
                .max()
                .unwrap_or(0);
            stage_of.insert(handle, stage);

            for succ in self.graph.neighbors_directed(node, Direction::Outgoing) {
                let succ = self.graph[succ];
                if let Some(degree) = in_degree.get_mut(&succ) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(succ);
                    }
                }
            }
        }

        if stage_of.len() < self.nodes.len() {
            return Err(ChainError::CyclicDependency {
                cycle: self.find_cycle(&stage_of),
            });
        }

        let stage_count = stage_of.values().map(|s| s + 1).max().unwrap_or(0);
        let mut stages: Vec<Stage> = (0..stage_count)
            .map(|index| Stage {
                index,
                steps: Vec::new(),
            })
            .collect();
        // BTreeMap iteration keeps registration order inside each stage.
        for (&handle, &stage) in &stage_of {
            stages[stage].steps.push(handle);
        }

        self.stages = stages;
        self.stage_of = stage_of;
        Ok(())
    }

    /// Name the steps of one cycle among the steps Kahn's algorithm left over.
    fn find_cycle(&self, placed: &BTreeMap<StepHandle, usize>) -> Vec<String> {
        let mut best: Option<BTreeSet<NodeIndex>> = None;
        for scc in tarjan_scc(&self.graph) {
            if scc.len() < 2 || scc.iter().any(|n| placed.contains_key(&self.graph[*n])) {
                continue;
            }
            let members: BTreeSet<NodeIndex> = scc.into_iter().collect();
            let lowest = |set: &BTreeSet<NodeIndex>| set.iter().map(|n| self.graph[*n]).min();
            if best.as_ref().map_or(true, |b| lowest(&members) < lowest(b)) {
                best = Some(members);
            }
        }

        let Some(members) = best else {
            return Vec::new();
        };
        let Some(&start) = members.iter().min_by_key(|n| self.graph[**n]) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut visited = BTreeSet::from([start]);
        self.walk_cycle(start, start, &members, &mut visited, &mut path);

        path.push(start);
        path.iter()
            .map(|n| self.names.get(&self.graph[*n]).cloned().unwrap_or_default())
            .collect()
    }

    fn walk_cycle(
        &self,
        current: NodeIndex,
        start: NodeIndex,
        members: &BTreeSet<NodeIndex>,
        visited: &mut BTreeSet<NodeIndex>,
        path: &mut Vec<NodeIndex>,
    ) -> bool {
        let mut successors: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(current, Direction::Outgoing)
            .filter(|n| members.contains(n))
            .collect();
        successors.sort_by_key(|n| self.graph[*n]);

        if successors.contains(&start) {
            return true;
        }
        for succ in successors {
            if visited.insert(succ) {
                path.push(succ);
                if self.walk_cycle(succ, start, members, visited, path) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    /// Get the stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Get the stage a step was assigned to.
    pub fn stage_of(&self, handle: StepHandle) -> Option<usize> {
        self.stage_of.get(&handle).copied()
    }

    /// Get the stage of a step by name.
    pub fn stage_of_step(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .and_then(|(h, _)| self.stage_of(*h))
    }

    /// Check whether a step survived pruning.
    pub fn contains(&self, handle: StepHandle) -> bool {
        self.nodes.contains_key(&handle)
    }

    /// Get the name of an included step.
    pub fn step_name(&self, handle: StepHandle) -> Option<&str> {
        self.names.get(&handle).map(String::as_str)
    }

    /// Iterate over included steps in registration order.
    pub fn steps(&self) -> impl Iterator<Item = StepHandle> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of included steps.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if no steps are included.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get the final items this graph was pruned for.
    pub fn finals(&self) -> &[ItemId] {
        &self.finals
    }

    /// Get the direct predecessors of a step in registration order.
    pub fn predecessors(&self, handle: StepHandle) -> Vec<StepHandle> {
        self.neighbors(handle, Direction::Incoming)
    }

    /// Get the direct successors of a step in registration order.
    pub fn successors(&self, handle: StepHandle) -> Vec<StepHandle> {
        self.neighbors(handle, Direction::Outgoing)
    }

    fn neighbors(&self, handle: StepHandle, direction: Direction) -> Vec<StepHandle> {
        let Some(&node) = self.nodes.get(&handle) else {
            return Vec::new();
        };
        let mut out: Vec<StepHandle> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n])
            .collect();
        out.sort();
        out
    }

    /// Get every edge, ordered by source then target.
    pub fn edges(&self) -> Vec<GraphEdge> {
        let mut edges: Vec<GraphEdge> = self
            .graph
            .edge_references()
            .map(|e| {
                let mut reasons = e.weight().clone();
                reasons.sort();
                GraphEdge {
                    from: self.graph[e.source()],
                    to: self.graph[e.target()],
                    reasons,
                }
            })
            .collect();
        edges.sort_by_key(|e| (e.from, e.to));
        edges
    }

    /// Steps with no predecessors.
    pub fn start_steps(&self) -> Vec<StepHandle> {
        self.steps()
            .filter(|h| self.predecessors(*h).is_empty())
            .collect()
    }

    /// Steps with no successors.
    pub fn end_steps(&self) -> Vec<StepHandle> {
        self.steps()
            .filter(|h| self.successors(*h).is_empty())
            .collect()
    }

    /// Hash of the stage assignment and edges.
    ///
    /// Two graphs built from the same registry and finals have the same
    /// fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut fp = Fingerprint::new();
        for stage in &self.stages {
            fp.update_str(&format!("stage {}", stage.index));
            fp.update_strs(stage.steps.iter().filter_map(|h| self.step_name(*h)));
        }
        for edge in self.edges() {
            fp.update_opt(self.step_name(edge.from));
            fp.update_opt(self.step_name(edge.to));
            fp.update_strs(edge.reasons.iter().map(|r| r.item.as_str()));
        }
        fp.finish_short()
    }
}

fn collect_producers(
    chain: &ChainBuilder,
    errors: &mut Vec<ChainError>,
) -> BTreeMap<ItemId, Vec<Producer>> {
    let mut producers: BTreeMap<ItemId, Vec<Producer>> = BTreeMap::new();

    for (handle, step) in chain.iter_steps() {
        for produce in step.produces() {
            let id = produce.item.id();
            if produce.item.kind() == ItemKind::Simple && chain.is_initial(id) {
                errors.push(ChainError::InitialItemProduced {
                    item: id.to_string(),
                    step: step.name().to_string(),
                });
                continue;
            }

            producers.entry(id.clone()).or_default().push(Producer {
                step: handle,
                weak: produce.flags.weak,
                overridable: produce.flags.overridable,
            });
        }
    }

    // Overridable producers stay wired so their value is committed before
    // any consumer runs, but they never make a simple item ambiguous
    // while a regular producer exists.
    for (id, list) in &producers {
        if chain.items().kind_of(id) != Some(ItemKind::Simple) {
            continue;
        }
        let regular: Vec<&Producer> = list.iter().filter(|p| !p.overridable).collect();
        let contenders: Vec<&Producer> = if regular.is_empty() {
            list.iter().collect()
        } else {
            regular
        };
        if contenders.len() > 1 {
            errors.push(ChainError::AmbiguousProducer {
                item: id.to_string(),
                producers: contenders
                    .iter()
                    .filter_map(|p| chain.step(p.step).map(|s| s.name().to_string()))
                    .collect(),
            });
        }
    }

    producers
}

fn check_destructive_consumers(chain: &ChainBuilder, errors: &mut Vec<ChainError>) {
    let mut destructive: BTreeMap<&ItemId, Vec<String>> = BTreeMap::new();
    for (_, step) in chain.iter_steps() {
        for consume in step.consumes().iter().filter(|c| c.is_destructive()) {
            destructive
                .entry(consume.item.id())
                .or_default()
                .push(step.name().to_string());
        }
    }

    for (item, consumers) in destructive {
        if consumers.len() > 1 {
            errors.push(ChainError::MultipleDestructiveConsumers {
                item: item.to_string(),
                consumers,
            });
        }
    }
}

/// Walk back from the final items to every step that feeds them.
fn include_steps(
    chain: &ChainBuilder,
    finals: &[ItemId],
    producers: &BTreeMap<ItemId, Vec<Producer>>,
) -> BTreeSet<StepHandle> {
    if finals.is_empty() {
        return chain.iter_steps().map(|(h, _)| h).collect();
    }

    let mut included = BTreeSet::new();
    let mut queue = VecDeque::new();

    let pull = |id: &ItemId, included: &mut BTreeSet<StepHandle>, queue: &mut VecDeque<StepHandle>| {
        for producer in producers.get(id).into_iter().flatten() {
            if !producer.weak && included.insert(producer.step) {
                queue.push_back(producer.step);
            }
        }
    };

    for id in finals {
        pull(id, &mut included, &mut queue);
    }
    while let Some(handle) = queue.pop_front() {
        if let Some(step) = chain.step(handle) {
            for consume in step.consumes() {
                pull(consume.item.id(), &mut included, &mut queue);
            }
        }
    }

    tracing::debug!(
        "pruned build chain to {} of {} step(s)",
        included.len(),
        chain.len()
    );
    included
}

fn check_satisfied(
    chain: &ChainBuilder,
    included: &BTreeSet<StepHandle>,
    producers: &BTreeMap<ItemId, Vec<Producer>>,
    errors: &mut Vec<ChainError>,
) {
    for (handle, step) in chain.iter_steps() {
        if !included.contains(&handle) {
            continue;
        }
        for consume in step.consumes().iter().filter(|c| c.is_required()) {
            let id = consume.item.id();
            let produced = producers
                .get(id)
                .is_some_and(|ps| ps.iter().any(|p| included.contains(&p.step)));
            if !produced && !chain.is_initial(id) {
                errors.push(ChainError::UnsatisfiedDependency {
                    item: id.to_string(),
                    step: step.name().to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step::{new_step, Consumption, ProduceFlags, Requirement};

    fn noop(step: crate::core::step::StepBuilder) -> crate::core::step::StepDescriptor {
        step.build(|_| Ok(())).unwrap()
    }

    #[test]
    fn test_linear_chain_stages() {
        let mut chain = ChainBuilder::new();
        let x = chain.declare_simple::<String>("x").unwrap();
        let y = chain.declare_simple::<String>("y").unwrap();

        let r = chain.register_step(noop(new_step("r").requires(&y))).unwrap();
        let q = chain
            .register_step(noop(new_step("q").requires(&x).produces(&y)))
            .unwrap();
        let p = chain.register_step(noop(new_step("p").produces(&x))).unwrap();

        let graph = chain.graph(&[]).unwrap();
        assert_eq!(graph.stage_of(p), Some(0));
        assert_eq!(graph.stage_of(q), Some(1));
        assert_eq!(graph.stage_of(r), Some(2));
        assert_eq!(graph.stages().len(), 3);
        assert_eq!(graph.predecessors(q), vec![p]);
    }

    #[test]
    fn test_unsatisfied_reports_all() {
        let mut chain = ChainBuilder::new();
        let a = chain.declare_simple::<String>("a").unwrap();
        let b = chain.declare_multi::<String>("b").unwrap();

        chain.register_step(noop(new_step("one").requires(&a))).unwrap();
        chain.register_step(noop(new_step("two").requires(&b))).unwrap();

        let err = chain.graph(&[]).unwrap_err();
        assert_eq!(err.len(), 2);
        assert!(err.errors().iter().all(|e| matches!(e, ChainError::UnsatisfiedDependency { .. })));
        assert!(err.to_string().contains("`one`"));
        assert!(err.to_string().contains("`two`"));
    }

    #[test]
    fn test_optional_without_producer_is_fine() {
        let mut chain = ChainBuilder::new();
        let z = chain.declare_simple::<String>("z").unwrap();
        let s = chain.register_step(noop(new_step("s").optionally(&z))).unwrap();

        let graph = chain.graph(&[]).unwrap();
        assert_eq!(graph.stage_of(s), Some(0));
    }

    #[test]
    fn test_ambiguous_simple_producer() {
        let mut chain = ChainBuilder::new();
        let x = chain.declare_simple::<String>("x").unwrap();
        chain.register_step(noop(new_step("a").produces(&x))).unwrap();
        chain.register_step(noop(new_step("b").produces(&x))).unwrap();

        let err = chain.graph(&[]).unwrap_err();
        assert!(matches!(
            &err.errors()[0],
            ChainError::AmbiguousProducer { producers, .. } if producers == &["a", "b"]
        ));
    }

    #[test]
    fn test_multi_allows_many_producers() {
        let mut chain = ChainBuilder::new();
        let m = chain.declare_multi::<String>("m").unwrap();
        chain.register_step(noop(new_step("a").produces(&m))).unwrap();
        chain.register_step(noop(new_step("b").produces(&m))).unwrap();
        let c = chain.register_step(noop(new_step("c").requires(&m))).unwrap();

        let graph = chain.graph(&[]).unwrap();
        assert_eq!(graph.stage_of(c), Some(1));
        assert_eq!(graph.stages()[0].len(), 2);
    }

    #[test]
    fn test_overridable_producer_is_ordered_before_consumers() {
        let mut chain = ChainBuilder::new();
        let x = chain.declare_simple::<String>("x").unwrap();
        let fallback = chain
            .register_step(noop(new_step("default").produces_with(&x, ProduceFlags::NONE.overridable())))
            .unwrap();
        let real = chain.register_step(noop(new_step("real").produces(&x))).unwrap();
        let reader = chain.register_step(noop(new_step("reader").requires(&x))).unwrap();

        // Not ambiguous: one regular producer plus a fallback
        let graph = chain.graph(&[]).unwrap();
        assert_eq!(graph.predecessors(reader), vec![fallback, real]);
        assert_eq!(graph.successors(fallback), vec![reader]);
    }

    #[test]
    fn test_overridable_precedes_destructive_consumer() {
        let mut chain = ChainBuilder::new();
        let x = chain.declare_simple::<String>("x").unwrap();
        let a = chain.declare_simple::<String>("a").unwrap();
        let b = chain.declare_simple::<String>("b").unwrap();

        chain.register_step(noop(new_step("real").produces(&x))).unwrap();
        let eat = chain
            .register_step(noop(
                new_step("eat").consumes(&x, Requirement::Required, Consumption::Destructive),
            ))
            .unwrap();
        chain.register_step(noop(new_step("a").produces(&a))).unwrap();
        chain.register_step(noop(new_step("b").requires(&a).produces(&b))).unwrap();
        let fallback = chain
            .register_step(noop(
                new_step("default")
                    .requires(&b)
                    .produces_with(&x, ProduceFlags::NONE.overridable()),
            ))
            .unwrap();

        let graph = chain.graph(&[]).unwrap();
        assert!(graph.stage_of(fallback).unwrap() < graph.stage_of(eat).unwrap());
    }

    #[test]
    fn test_overridable_pulled_in_by_pruning() {
        let mut chain = ChainBuilder::new();
        let x = chain.declare_simple::<String>("x").unwrap();
        let out = chain.declare_simple::<String>("out").unwrap();

        let real = chain
            .register_step(noop(new_step("real").produces_with(&x, ProduceFlags::NONE.optional())))
            .unwrap();
        let fallback = chain
            .register_step(noop(new_step("default").produces_with(&x, ProduceFlags::NONE.overridable())))
            .unwrap();
        chain
            .register_step(noop(new_step("use").requires(&x).produces(&out)))
            .unwrap();

        let graph = chain.graph(&[out.id().clone()]).unwrap();
        assert!(graph.contains(real));
        assert!(graph.contains(fallback));
    }

    #[test]
    fn test_two_overridable_producers_alone_are_ambiguous() {
        let mut chain = ChainBuilder::new();
        let x = chain.declare_simple::<String>("x").unwrap();
        for name in ["default-1", "default-2"] {
            chain
                .register_step(noop(new_step(name).produces_with(&x, ProduceFlags::NONE.overridable())))
                .unwrap();
        }

        let err = chain.graph(&[]).unwrap_err();
        assert!(matches!(err.errors()[0], ChainError::AmbiguousProducer { .. }));
    }

    #[test]
    fn test_overridable_used_when_alone() {
        let mut chain = ChainBuilder::new();
        let x = chain.declare_simple::<String>("x").unwrap();
        let fallback = chain
            .register_step(noop(new_step("default").produces_with(&x, ProduceFlags::NONE.overridable())))
            .unwrap();
        let reader = chain.register_step(noop(new_step("reader").requires(&x))).unwrap();

        let graph = chain.graph(&[x.id().clone()]).unwrap();
        assert!(graph.contains(fallback));
        assert_eq!(graph.predecessors(reader), Vec::<StepHandle>::new());
        assert!(!graph.contains(reader));
    }

    #[test]
    fn test_cycle_detected_with_names() {
        let mut chain = ChainBuilder::new();
        let a = chain.declare_simple::<String>("a").unwrap();
        let b = chain.declare_simple::<String>("b").unwrap();
        let c = chain.declare_simple::<String>("c").unwrap();

        chain.register_step(noop(new_step("first").requires(&c).produces(&a))).unwrap();
        chain.register_step(noop(new_step("second").requires(&a).produces(&b))).unwrap();
        chain.register_step(noop(new_step("third").requires(&b).produces(&c))).unwrap();

        let err = chain.graph(&[]).unwrap_err();
        assert!(err.has_cycle());
        assert_eq!(
            err.errors()[0],
            ChainError::CyclicDependency {
                cycle: vec![
                    "first".to_string(),
                    "second".to_string(),
                    "third".to_string(),
                    "first".to_string()
                ]
            }
        );
    }

    #[test]
    fn test_destructive_consumer_runs_last() {
        let mut chain = ChainBuilder::new();
        let t = chain.declare_simple::<String>("t").unwrap();

        let b = chain
            .register_step(noop(new_step("b").consumes(&t, Requirement::Required, Consumption::Destructive)))
            .unwrap();
        let a = chain.register_step(noop(new_step("a").requires(&t))).unwrap();
        let c = chain.register_step(noop(new_step("c").produces(&t))).unwrap();

        let graph = chain.graph(&[]).unwrap();
        assert_eq!(graph.stage_of(c), Some(0));
        assert_eq!(graph.stage_of(a), Some(1));
        assert_eq!(graph.stage_of(b), Some(2));
        assert_eq!(graph.predecessors(b), vec![a, c]);
    }

    #[test]
    fn test_multiple_destructive_consumers() {
        let mut chain = ChainBuilder::new();
        let t = chain.declare_multi::<String>("t").unwrap();
        chain.register_step(noop(new_step("p").produces(&t))).unwrap();
        chain
            .register_step(noop(new_step("x").consumes(&t, Requirement::Optional, Consumption::Destructive)))
            .unwrap();
        chain
            .register_step(noop(new_step("y").consumes(&t, Requirement::Required, Consumption::Destructive)))
            .unwrap();

        let err = chain.graph(&[]).unwrap_err();
        assert!(matches!(
            &err.errors()[0],
            ChainError::MultipleDestructiveConsumers { consumers, .. } if consumers.len() == 2
        ));
    }

    #[test]
    fn test_pruning_to_finals() {
        let mut chain = ChainBuilder::new();
        let x = chain.declare_simple::<String>("x").unwrap();
        let y = chain.declare_simple::<String>("y").unwrap();
        let unrelated = chain.declare_simple::<String>("unrelated").unwrap();

        let p = chain.register_step(noop(new_step("p").produces(&x))).unwrap();
        let q = chain.register_step(noop(new_step("q").requires(&x).produces(&y))).unwrap();
        let r = chain.register_step(noop(new_step("r").requires(&y))).unwrap();
        let u = chain.register_step(noop(new_step("u").produces(&unrelated))).unwrap();

        let graph = chain.graph(&[y.id().clone()]).unwrap();
        assert!(graph.contains(p));
        assert!(graph.contains(q));
        assert!(!graph.contains(r));
        assert!(!graph.contains(u));
        assert_eq!(graph.finals(), &[y.id().clone()]);
    }

    #[test]
    fn test_pruned_steps_do_not_report_errors() {
        let mut chain = ChainBuilder::new();
        let x = chain.declare_simple::<String>("x").unwrap();
        let missing = chain.declare_simple::<String>("missing").unwrap();

        chain.register_step(noop(new_step("p").produces(&x))).unwrap();
        chain.register_step(noop(new_step("broken").requires(&missing))).unwrap();

        assert!(chain.graph(&[x.id().clone()]).is_ok());
        assert!(chain.graph(&[]).is_err());
    }

    #[test]
    fn test_weak_producer_not_pulled_in() {
        let mut chain = ChainBuilder::new();
        let report = chain.declare_multi::<String>("report").unwrap();
        let weak = chain
            .register_step(noop(new_step("weak").produces_with(&report, ProduceFlags::NONE.weak())))
            .unwrap();
        let strong = chain.register_step(noop(new_step("strong").produces(&report))).unwrap();

        let graph = chain.graph(&[report.id().clone()]).unwrap();
        assert!(graph.contains(strong));
        assert!(!graph.contains(weak));
    }

    #[test]
    fn test_unknown_final_item() {
        let chain = ChainBuilder::new();
        let err = chain.graph(&[ItemId::new("nope")]).unwrap_err();
        assert!(matches!(err.errors()[0], ChainError::UnknownFinalItem { .. }));
    }

    #[test]
    fn test_initial_item_satisfies_and_cannot_be_produced() {
        let mut chain = ChainBuilder::new();
        let mode = chain.declare_simple::<String>("mode").unwrap();
        chain.add_initial(&mode, "prod".to_string()).unwrap();
        chain.register_step(noop(new_step("reader").requires(&mode))).unwrap();
        assert!(chain.graph(&[]).is_ok());

        chain.register_step(noop(new_step("writer").produces(&mode))).unwrap();
        let err = chain.graph(&[]).unwrap_err();
        assert!(matches!(err.errors()[0], ChainError::InitialItemProduced { .. }));
    }

    #[test]
    fn test_independent_steps_share_stage() {
        let mut chain = ChainBuilder::new();
        let a = chain.declare_simple::<String>("a").unwrap();
        let b = chain.declare_simple::<String>("b").unwrap();
        let first = chain.register_step(noop(new_step("first").produces(&a))).unwrap();
        let second = chain.register_step(noop(new_step("second").produces(&b))).unwrap();

        let graph = chain.graph(&[]).unwrap();
        assert_eq!(graph.stage_of(first), graph.stage_of(second));
        assert_eq!(graph.stages()[0].steps(), &[first, second]);
    }

    #[test]
    fn test_graph_is_deterministic() {
        let mut chain = ChainBuilder::new();
        let m = chain.declare_multi::<String>("m").unwrap();
        let out = chain.declare_simple::<String>("out").unwrap();
        for name in ["z", "y", "x"] {
            chain.register_step(noop(new_step(name).produces(&m))).unwrap();
        }
        chain.register_step(noop(new_step("sink").requires(&m).produces(&out))).unwrap();

        let first = chain.graph(&[]).unwrap();
        let second = chain.graph(&[]).unwrap();
        assert_eq!(first.stages(), second.stages());
        assert_eq!(first.edges(), second.edges());
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_edges_merge_items() {
        let mut chain = ChainBuilder::new();
        let a = chain.declare_simple::<String>("a").unwrap();
        let b = chain.declare_marker("b").unwrap();
        chain.register_step(noop(new_step("p").produces(&a).produces(&b))).unwrap();
        chain.register_step(noop(new_step("c").requires(&a).requires(&b))).unwrap();

        let graph = chain.graph(&[]).unwrap();
        let edges = graph.edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].reasons.len(), 2);
    }
}
