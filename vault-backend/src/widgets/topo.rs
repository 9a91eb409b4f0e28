//! Kahn ordering, cycle tracing and phase planning.

use crate::widgets::graph::{DependencyGraph, Scope};
use std::collections::VecDeque;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortResult {
    /// Computable fields, dependencies first
    pub sorted: Vec<String>,
    /// One traced path per distinct cycle
    pub cycles: Vec<Vec<String>>,
    /// Every field that cannot be ordered: cycle members and fields downstream of them
    pub cycle_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputationPhase {
    pub scope: Scope,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputationPlan {
    pub phases: Vec<ComputationPhase>,
    pub cycle_fields: Vec<String>,
    pub cycles: Vec<Vec<String>>,
    /// `a -> b -> a` style descriptions
    pub warnings: Vec<String>,
}

impl ComputationPlan {
    pub fn is_cycle_field(&self, name: &str) -> bool {
        self.cycle_fields.iter().any(|f| f == name)
    }
}

pub fn topological_sort(graph: &DependencyGraph) -> SortResult {
    let n = graph.len();
    let mut in_degree: Vec<usize> = (0..n).map(|i| graph.dependencies(i).len()).collect();

    // Reverse edges, filled in declaration order so ties stay stable
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for node in 0..n {
        for &dep in graph.dependencies(node) {
            dependents[dep].push(node);
        }
    }

    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(n);
    while let Some(node) = queue.pop_front() {
        sorted.push(node);
        for &dependent in &dependents[node] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    let participants: Vec<usize> = (0..n).filter(|&i| in_degree[i] > 0).collect();
    let cycles = trace_cycles(graph, &participants);

    SortResult {
        sorted: sorted.iter().map(|&i| graph.name(i).to_string()).collect(),
        cycles: cycles
            .into_iter()
            .map(|path| path.into_iter().map(|i| graph.name(i).to_string()).collect())
            .collect(),
        cycle_fields: participants.iter().map(|&i| graph.name(i).to_string()).collect(),
    }
}

/// Walk dependency edges inside the participant set, one path per cycle.
///
/// A walk that closes on its start node is reported whole. A walk that
/// closes on an inner node reports only the loop from that node; the nodes
/// before it merely depend on the cycle. A walk that cannot continue is
/// reported as the partial path when it has more than one node.
fn trace_cycles(graph: &DependencyGraph, participants: &[usize]) -> Vec<Vec<usize>> {
    let n = graph.len();
    let mut in_set = vec![false; n];
    for &p in participants {
        in_set[p] = true;
    }
    let mut assigned = vec![false; n];
    let mut cycles = Vec::new();

    for &start in participants {
        if assigned[start] {
            continue;
        }

        let mut path = vec![start];
        let mut on_path = vec![false; n];
        on_path[start] = true;
        let mut current = start;

        let report = loop {
            let deps = graph.dependencies(current);
            if deps.contains(&start) {
                break path.clone();
            }
            if let Some(pos) = path.iter().position(|node| deps.contains(node)) {
                break path[pos..].to_vec();
            }
            let next = deps
                .iter()
                .copied()
                .find(|&d| in_set[d] && !assigned[d] && !on_path[d]);
            match next {
                Some(node) => {
                    path.push(node);
                    on_path[node] = true;
                    current = node;
                }
                None if path.len() > 1 => break path.clone(),
                None => break Vec::new(),
            }
        };

        for &node in &path {
            assigned[node] = true;
        }
        if !report.is_empty() {
            cycles.push(report);
        }
    }

    cycles
}

pub fn describe_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {}", cycle.join(" -> "), first),
        None => String::new(),
    }
}

/// Group consecutive same-scope fields of the sorted order into phases
pub fn build_plan(graph: &DependencyGraph) -> ComputationPlan {
    let sort = topological_sort(graph);

    let mut phases: Vec<ComputationPhase> = Vec::new();
    for name in sort.sorted {
        let scope = graph
            .index_of(&name)
            .map(|i| graph.scope(i))
            .unwrap_or(Scope::Collection);
        match phases.last_mut() {
            Some(phase) if phase.scope == scope => phase.fields.push(name),
            _ => phases.push(ComputationPhase {
                scope,
                fields: vec![name],
            }),
        }
    }

    let warnings = sort
        .cycles
        .iter()
        .map(|cycle| format!("Dependency cycle: {}", describe_cycle(cycle)))
        .collect();

    ComputationPlan {
        phases,
        cycle_fields: sort.cycle_fields,
        cycles: sort.cycles,
        warnings,
    }
}
