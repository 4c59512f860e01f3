//! Dependency graph construction and validation for workflow phases.
//!
//! The builder takes a list of phase definitions and constructs a directed
//! acyclic graph. Building fails on duplicate names, unknown dependencies and
//! cycles, which is how workflows are rejected at creation time.

use crate::errors::ConfigError;
use crate::phase::PhaseDefinition;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Index into the phase list.
pub type PhaseIndex = usize;

/// A validated directed acyclic graph of phases.
#[derive(Debug)]
pub struct PhaseGraph {
    /// Phases in declaration order
    phases: Vec<PhaseDefinition>,
    /// Map from phase name to index
    index_map: HashMap<String, PhaseIndex>,
    /// index -> phases that depend on it
    forward_edges: Vec<Vec<PhaseIndex>>,
    /// index -> phases it depends on
    reverse_edges: Vec<Vec<PhaseIndex>>,
}

impl PhaseGraph {
    /// Build and validate a graph from phase definitions.
    pub fn build(phases: &[PhaseDefinition]) -> Result<Self, ConfigError> {
        let mut index_map = HashMap::new();
        for (i, phase) in phases.iter().enumerate() {
            if index_map.insert(phase.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicatePhase {
                    name: phase.name.clone(),
                });
            }
        }

        let mut forward_edges: Vec<Vec<PhaseIndex>> = vec![Vec::new(); phases.len()];
        let mut reverse_edges: Vec<Vec<PhaseIndex>> = vec![Vec::new(); phases.len()];

        for (to_idx, phase) in phases.iter().enumerate() {
            for dep in &phase.dependencies {
                let from_idx =
                    *index_map
                        .get(dep)
                        .ok_or_else(|| ConfigError::UnknownDependency {
                            phase: phase.name.clone(),
                            dependency: dep.clone(),
                        })?;
                // A repeated dependency name adds no extra ordering.
                if !reverse_edges[to_idx].contains(&from_idx) {
                    forward_edges[from_idx].push(to_idx);
                    reverse_edges[to_idx].push(from_idx);
                }
            }
        }

        let graph = Self {
            phases: phases.to_vec(),
            index_map,
            forward_edges,
            reverse_edges,
        };
        graph.topological_order()?;
        Ok(graph)
    }

    /// Get the number of phases in the graph.
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Get a phase by its name.
    pub fn get_phase(&self, name: &str) -> Option<&PhaseDefinition> {
        self.index_map.get(name).and_then(|&i| self.phases.get(i))
    }

    /// Get phases that depend on the given phase.
    pub fn dependents(&self, index: PhaseIndex) -> &[PhaseIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Get phases that the given phase depends on.
    pub fn dependencies(&self, index: PhaseIndex) -> &[PhaseIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Get phases with no dependencies.
    pub fn root_phases(&self) -> Vec<PhaseIndex> {
        self.reverse_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Kahn's algorithm, always taking the lowest declaration index among ready
    /// phases. This is the order the executor produces when every task succeeds.
    pub fn topological_order(&self) -> Result<Vec<String>, ConfigError> {
        let mut in_degree: Vec<usize> = self.reverse_edges.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<PhaseIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(node) = ready.pop_first() {
            order.push(self.phases[node].name.clone());
            for &dependent in self.dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.len() {
            let phases = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| self.phases[i].name.clone())
                .collect();
            return Err(ConfigError::CyclicDependency { phases });
        }

        Ok(order)
    }

    /// Group phases into waves: every phase in a wave depends only on earlier waves.
    pub fn compute_waves(&self) -> Vec<Vec<String>> {
        let mut waves = Vec::new();
        let mut done: HashSet<PhaseIndex> = HashSet::new();

        loop {
            let ready: Vec<PhaseIndex> = (0..self.len())
                .filter(|i| !done.contains(i))
                .filter(|&i| self.dependencies(i).iter().all(|d| done.contains(d)))
                .collect();

            if ready.is_empty() {
                break;
            }
            done.extend(ready.iter().copied());
            waves.push(ready.iter().map(|&i| self.phases[i].name.clone()).collect());
        }

        waves
    }
}
