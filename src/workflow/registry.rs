/// Hot-reload definition registry using ArcSwap
///
/// Provides lock-free, atomic updates to the in-memory definition registry.
/// Each definition update swaps the entire registry pointer, so concurrent
/// executions keep the compiled definition they started with while new runs
/// pick up the fresh one.

use crate::workflow::{storage::DefinitionStorage, types::{WorkflowDefinition, WorkflowStep}};
use anyhow::Result;
use arc_swap::ArcSwap;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Lock-free registry of compiled workflow definitions
#[derive(Debug)]
pub struct DefinitionRegistry {
    /// Thread-safe atomic pointer to the definition map
    definitions: ArcSwap<HashMap<String, Arc<CompiledDefinition>>>,
    /// Reference to persistent storage for reload operations
    storage: DefinitionStorage,
}

/// A validated definition with its execution plan
///
/// Compilation validates the step graph (DAG, known references, reachable
/// start) and fixes the deterministic execution order: the topological order
/// of the steps reachable from the start step.
#[derive(Debug)]
pub struct CompiledDefinition {
    /// Base workflow definition
    pub definition: WorkflowDefinition,
    /// Step ids in execution order
    pub order: Vec<String>,
    /// Step id → position in `order`
    positions: HashMap<String, usize>,
    /// Step id → step
    steps: HashMap<String, WorkflowStep>,
}

impl CompiledDefinition {
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.get(step_id)
    }

    pub fn position(&self, step_id: &str) -> Option<usize> {
        self.positions.get(step_id).copied()
    }
}

impl DefinitionRegistry {
    /// Create a new registry instance with storage backend
    pub fn new(storage: DefinitionStorage) -> Self {
        Self {
            definitions: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Initialize the registry by loading all definitions from storage
    ///
    /// Called during application startup. Compiles each stored definition;
    /// a definition that fails to compile is skipped with an error log rather
    /// than taking the whole registry down.
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_all_definitions().await?;

        let mut compiled = HashMap::new();
        for (id, definition) in stored {
            match compile_definition(definition) {
                Ok(c) => {
                    compiled.insert(id, Arc::new(c));
                }
                Err(e) => {
                    tracing::error!("❌ Skipping definition '{}' that fails to compile: {}", id, e);
                }
            }
        }

        self.definitions.store(Arc::new(compiled));

        tracing::info!(
            "📊 Initialized definition registry with {} workflows",
            self.definitions.load().len()
        );
        Ok(())
    }

    /// Hot-reload a single definition from storage
    ///
    /// Atomic pointer swap; does not block concurrent executions.
    pub async fn reload_definition(&self, definition_id: &str) -> Result<()> {
        let definition = self
            .storage
            .get_definition(definition_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Definition not found: {}", definition_id))?;

        let compiled = compile_definition(definition)?;

        let current = self.definitions.load();
        let mut next = (**current).clone();
        next.insert(definition_id.to_string(), Arc::new(compiled));
        self.definitions.store(Arc::new(next));

        tracing::info!("🔥 Hot-reloaded definition: {}", definition_id);
        Ok(())
    }

    /// Get a compiled definition by id (lock-free read)
    pub fn get(&self, definition_id: &str) -> Option<Arc<CompiledDefinition>> {
        self.definitions.load().get(definition_id).cloned()
    }

    /// List all registered definition ids
    pub fn list_ids(&self) -> Vec<String> {
        self.definitions.load().keys().cloned().collect()
    }

    /// Remove a definition from the registry
    pub fn remove_definition(&self, definition_id: &str) {
        let current = self.definitions.load();
        let mut next = (**current).clone();

        if next.remove(definition_id).is_some() {
            self.definitions.store(Arc::new(next));
            tracing::info!("Removed definition from registry: {}", definition_id);
        }
    }
}

/// Compile and validate a definition into its execution plan
pub fn compile_definition(definition: WorkflowDefinition) -> Result<CompiledDefinition> {
    if definition.steps.is_empty() {
        return Err(anyhow::anyhow!("Workflow must declare at least one step"));
    }

    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut id_to_index: HashMap<String, NodeIndex> = HashMap::new();
    let mut steps: HashMap<String, WorkflowStep> = HashMap::new();

    for step in &definition.steps {
        if steps.contains_key(&step.id) {
            return Err(anyhow::anyhow!("Duplicate step id: {}", step.id));
        }
        if let Some(threshold) = step.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(anyhow::anyhow!(
                    "Step '{}' has confidence_threshold {} outside [0,1]",
                    step.id,
                    threshold
                ));
            }
        }
        let index = graph.add_node(step.id.clone());
        id_to_index.insert(step.id.clone(), index);
        steps.insert(step.id.clone(), step.clone());
    }

    for edge in &definition.edges {
        let from = id_to_index
            .get(&edge.from)
            .ok_or_else(|| anyhow::anyhow!("Edge references unknown step: {}", edge.from))?;
        let to = id_to_index
            .get(&edge.to)
            .ok_or_else(|| anyhow::anyhow!("Edge references unknown step: {}", edge.to))?;
        graph.add_edge(*from, *to, ());
    }

    let start_index = *id_to_index
        .get(&definition.start_step)
        .ok_or_else(|| anyhow::anyhow!("Start step not found: {}", definition.start_step))?;

    let topo_order = toposort(&graph, None)
        .map_err(|_| anyhow::anyhow!("Workflow contains cycles - must be a DAG"))?;

    // Execution covers only the steps reachable from the start step
    let reachable = reachable_from(&graph, start_index);
    let order: Vec<String> = topo_order
        .iter()
        .filter(|idx| reachable.contains(idx))
        .map(|idx| graph[*idx].clone())
        .collect();

    let positions = order
        .iter()
        .enumerate()
        .map(|(pos, id)| (id.clone(), pos))
        .collect();

    Ok(CompiledDefinition {
        definition,
        order,
        positions,
        steps,
    })
}

/// All nodes reachable from the start node (BFS over out-edges)
fn reachable_from(graph: &DiGraph<String, ()>, start: NodeIndex) -> HashSet<NodeIndex> {
    let mut reachable = HashSet::new();
    let mut queue = VecDeque::new();

    queue.push_back(start);
    reachable.insert(start);

    while let Some(current) = queue.pop_front() {
        for target in graph.neighbors(current) {
            if reachable.insert(target) {
                queue.push_back(target);
            }
        }
    }

    reachable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{Edge, StepType};
    use serde_json::json;

    fn step(id: &str) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            step_type: StepType::HttpCall,
            description: String::new(),
            params: json!({}),
            confidence_threshold: None,
        }
    }

    fn definition(steps: Vec<WorkflowStep>, edges: Vec<(&str, &str)>, start: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf-test".to_string(),
            name: "Test".to_string(),
            steps,
            edges: edges
                .into_iter()
                .map(|(from, to)| Edge { from: from.to_string(), to: to.to_string() })
                .collect(),
            start_step: start.to_string(),
        }
    }

    #[test]
    fn linear_chain_compiles_in_order() {
        let compiled = compile_definition(definition(
            vec![step("a"), step("b"), step("c")],
            vec![("a", "b"), ("b", "c")],
            "a",
        ))
        .unwrap();

        assert_eq!(compiled.order, vec!["a", "b", "c"]);
        assert_eq!(compiled.position("b"), Some(1));
    }

    #[test]
    fn unreachable_steps_are_excluded_from_the_plan() {
        let compiled = compile_definition(definition(
            vec![step("a"), step("b"), step("orphan")],
            vec![("a", "b")],
            "a",
        ))
        .unwrap();

        assert_eq!(compiled.order, vec!["a", "b"]);
        assert!(compiled.position("orphan").is_none());
    }

    #[test]
    fn cycles_are_rejected() {
        let err = compile_definition(definition(
            vec![step("a"), step("b")],
            vec![("a", "b"), ("b", "a")],
            "a",
        ))
        .unwrap_err();

        assert!(err.to_string().contains("cycles"));
    }

    #[test]
    fn unknown_edge_and_start_references_are_rejected() {
        let err = compile_definition(definition(vec![step("a")], vec![("a", "ghost")], "a"))
            .unwrap_err();
        assert!(err.to_string().contains("unknown step"));

        let err = compile_definition(definition(vec![step("a")], vec![], "ghost")).unwrap_err();
        assert!(err.to_string().contains("Start step"));
    }

    #[test]
    fn out_of_range_thresholds_are_rejected() {
        let mut bad = step("a");
        bad.confidence_threshold = Some(1.5);
        let err = compile_definition(definition(vec![bad], vec![], "a")).unwrap_err();
        assert!(err.to_string().contains("outside [0,1]"));
    }
}
