//! Per-job progress aggregation.
//!
//! [`ProgressTracker`] maps per-node fractional progress reported by the
//! engine into one overall percentage:
//!
//! ```text
//! progress = floor(100 * sum(node fractions) / total nodes)
//! ```
//!
//! Every top-level key of the workflow is a node. Node fractions never
//! decrease, so the overall percentage never decreases either.

use std::collections::HashMap;

use crate::messages::{ComfyUIMessage, ExecutingData, ProgressData};
use crate::normalizer::EngineEvent;

/// Absorbs float error such as `100.0 * 0.29 == 28.999999999999996`.
const FLOOR_EPSILON: f64 = 1e-9;

/// Lifecycle of a single workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Pending,
    Executing,
    Completed,
}

#[derive(Debug, Clone)]
struct NodeState {
    fraction: f64,
    status: NodeStatus,
}

/// Stateful aggregator owned by exactly one job.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    nodes: HashMap<String, NodeState>,
    total_nodes: usize,
    active_node: Option<String>,
    progress: u8,
}

impl ProgressTracker {
    /// Build a tracker from a workflow description.
    pub fn new(workflow: &serde_json::Map<String, serde_json::Value>) -> Self {
        Self::from_node_ids(workflow.keys().cloned())
    }

    /// Build a tracker from an explicit list of node ids.
    pub fn from_node_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let nodes: HashMap<String, NodeState> = ids
            .into_iter()
            .map(|id| {
                (
                    id.into(),
                    NodeState {
                        fraction: 0.0,
                        status: NodeStatus::Pending,
                    },
                )
            })
            .collect();
        let total_nodes = nodes.len();
        if total_nodes == 0 {
            tracing::warn!("Progress tracker built for a workflow with no nodes");
        }
        Self {
            nodes,
            total_nodes,
            active_node: None,
            progress: 0,
        }
    }

    /// Current overall percentage (0-100).
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn total_nodes(&self) -> usize {
        self.total_nodes
    }

    /// The node that most recently became active.
    pub fn active_node(&self) -> Option<&str> {
        self.active_node.as_deref()
    }

    pub fn node_fraction(&self, node: &str) -> Option<f64> {
        self.nodes.get(node).map(|n| n.fraction)
    }

    pub fn node_status(&self, node: &str) -> Option<NodeStatus> {
        self.nodes.get(node).map(|n| n.status)
    }

    /// Apply one normalized engine event and return the overall progress.
    ///
    /// Events that carry no progress information (including parse-failure
    /// markers) are logged and skipped.
    pub fn update(&mut self, event: &EngineEvent) -> u8 {
        match event {
            EngineEvent::Message(ComfyUIMessage::Executing(data)) => self.on_executing(data),
            EngineEvent::Message(ComfyUIMessage::Progress(data)) => self.on_progress(data),
            EngineEvent::Message(other) => {
                tracing::trace!(message = ?other, "Event carries no node progress");
            }
            EngineEvent::Unrecognized(value) => {
                tracing::debug!(event = %value, "Skipping unrecognized engine event");
            }
            EngineEvent::Invalid(marker) => {
                tracing::warn!(
                    error = marker.error,
                    raw_data = %marker.raw_data,
                    "Skipping malformed engine event",
                );
            }
        }
        self.recalculate();
        self.progress
    }

    fn on_executing(&mut self, data: &ExecutingData) {
        let Some(node) = data.node.as_deref() else {
            // Engine finished the prompt: whatever ran last is done.
            if let Some(previous) = self.active_node.take() {
                self.complete(&previous);
            }
            return;
        };

        let Some(state) = self.nodes.get_mut(node) else {
            tracing::debug!(node, "Executing event for a node outside the workflow");
            return;
        };
        // Fraction is left as-is so a node that re-enters execution does not regress.
        state.status = NodeStatus::Executing;

        if let Some(previous) = self.active_node.replace(node.to_string()) {
            if previous != node {
                self.complete(&previous);
            }
        }
    }

    fn on_progress(&mut self, data: &ProgressData) {
        let Some(node) = data.node.clone().or_else(|| self.active_node.clone()) else {
            tracing::debug!("Progress event with no node and no active node");
            return;
        };
        if !(data.max > 0.0) || !data.value.is_finite() {
            tracing::warn!(
                node = %node,
                value = data.value,
                max = data.max,
                "Ignoring progress event with invalid bounds",
            );
            return;
        }
        let Some(state) = self.nodes.get_mut(&node) else {
            tracing::debug!(node = %node, "Progress event for a node outside the workflow");
            return;
        };

        let fraction = (data.value / data.max).clamp(0.0, 1.0);
        if fraction >= state.fraction {
            state.fraction = fraction;
        }
        state.status = NodeStatus::Executing;
    }

    /// Engines do not always emit a final 100% sample before moving on.
    fn complete(&mut self, node: &str) {
        if let Some(state) = self.nodes.get_mut(node) {
            state.status = NodeStatus::Completed;
            state.fraction = 1.0;
        }
    }

    fn recalculate(&mut self) {
        if self.total_nodes == 0 {
            self.progress = 0;
            return;
        }
        let sum: f64 = self.nodes.values().map(|n| n.fraction).sum();
        let percent = (100.0 * sum / self.total_nodes as f64 + FLOOR_EPSILON)
            .floor()
            .clamp(0.0, 100.0) as u8;
        self.progress = self.progress.max(percent);
    }
}
