//! Successor selection and the per-walk visit guard.

use std::collections::HashMap;

use crate::types::*;

/// Walks one [`ScenarioGraph`]. Created fresh for every scenario execution,
/// so visit counts never leak between walks.
pub struct GraphNavigator<'g> {
    graph: &'g ScenarioGraph,
    visits: HashMap<&'g str, u32>,
    default_max_visits: u32,
}

impl<'g> GraphNavigator<'g> {
    /// `default_max_visits` of 1 allows every node to be entered once.
    /// A node's `maxVisits` step option raises its own limit.
    pub fn new(graph: &'g ScenarioGraph, default_max_visits: u32) -> Self {
        Self {
            graph,
            visits: HashMap::new(),
            default_max_visits: default_max_visits.max(1),
        }
    }

    /// Enter the start node. `None` when the graph has none.
    pub fn start(&mut self) -> Option<&'g Node> {
        let start = self.graph.start_node()?;
        self.record_visit(start);
        Some(start)
    }

    /// Pick and enter the successor of `current`.
    ///
    /// Returns `None` at an `end` node, when no edge leads on, or when the
    /// successor has used up its visits (the walk ends as if it reached
    /// `end`).
    pub fn advance(&mut self, current: &Node, branch: Option<bool>) -> Option<&'g Node> {
        let next = self.next_node(current, branch)?;
        let seen = self.visits.get(next.id.as_str()).copied().unwrap_or(0);
        if seen >= self.visit_limit(next) {
            tracing::debug!(
                from = %current.id,
                to = %next.id,
                visits = seen,
                "visit limit reached, ending walk"
            );
            return None;
        }
        self.record_visit(next);
        Some(next)
    }

    /// Successor of `current` without touching visit counts.
    ///
    /// Condition nodes prefer the edge labelled with the evaluated branch
    /// (`"yes"` / `"no"`) and fall back to the first unlabelled edge. Every
    /// other non-end node takes its first outgoing edge.
    pub fn next_node(&self, current: &Node, branch: Option<bool>) -> Option<&'g Node> {
        let target = match (current.kind, branch) {
            (NodeKind::End, _) => return None,
            (NodeKind::Condition, Some(outcome)) => {
                let label = branch_label(outcome);
                self.outgoing(current)
                    .find(|c| c.branch.as_deref() == Some(label))
                    .or_else(|| self.outgoing(current).find(|c| c.branch.is_none()))?
            }
            _ => self.outgoing(current).next()?,
        };
        let next = self.graph.node(&target.to);
        if next.is_none() {
            tracing::warn!(from = %current.id, to = %target.to, "connection points at missing node");
        }
        next
    }

    fn outgoing<'a>(&'a self, current: &'a Node) -> impl Iterator<Item = &'g Connection> + 'a {
        self.graph
            .connections
            .iter()
            .filter(move |c| c.from == current.id)
    }

    fn record_visit(&mut self, node: &'g Node) {
        *self.visits.entry(node.id.as_str()).or_insert(0) += 1;
    }

    fn visit_limit(&self, node: &Node) -> u32 {
        StepOptions::from_node(node)
            .max_visits
            .unwrap_or(self.default_max_visits)
            .max(1)
    }
}
