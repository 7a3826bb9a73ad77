use std::collections::HashMap;

use tracing::debug;

use crate::error::{GymError, Result};
use crate::graph::{NodeRef, RepertoireGraph};
use crate::position::PositionKey;
use crate::selector::RandomSource;

/// An ordered path through one line, from a root (or a chosen branch point)
/// down to a single leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    line: usize,
    nodes: Vec<NodeRef>,
    by_key: HashMap<PositionKey, usize>,
    terminal_key: PositionKey,
}

impl SessionPlan {
    /// Plans a whole line: the deepest leaf under any of its roots.
    pub fn for_line<R>(graph: &RepertoireGraph, line: usize, rng: &mut R) -> Result<Self>
    where
        R: RandomSource + ?Sized,
    {
        let tree = graph.line(line);
        let mut leaves = Vec::new();
        for &root in &tree.roots {
            collect_leaves(graph, NodeRef { line, node: root }, &mut leaves);
        }
        Self::from_leaves(graph, line, None, leaves, rng)
    }

    /// Plans from a mid-line node. The node itself is the first ply.
    pub fn from_node<R>(graph: &RepertoireGraph, start: NodeRef, rng: &mut R) -> Result<Self>
    where
        R: RandomSource + ?Sized,
    {
        let mut leaves = Vec::new();
        collect_leaves(graph, start, &mut leaves);
        Self::from_leaves(graph, start.line, Some(start.node), leaves, rng)
    }

    fn from_leaves<R>(
        graph: &RepertoireGraph,
        line: usize,
        start: Option<usize>,
        leaves: Vec<NodeRef>,
        rng: &mut R,
    ) -> Result<Self>
    where
        R: RandomSource + ?Sized,
    {
        let no_plan = || GymError::NoPlan {
            line_id: graph.line(line).line.id.clone(),
        };

        let deepest = leaves
            .iter()
            .map(|&r| graph.node(r).depth)
            .max()
            .ok_or_else(no_plan)?;
        let preferred: Vec<NodeRef> = leaves
            .into_iter()
            .filter(|&r| graph.node(r).depth == deepest)
            .collect();
        let leaf = preferred[rng.next_index(preferred.len())];

        let tree = graph.line(line);
        let mut path = Vec::new();
        let mut cursor = Some(leaf.node);
        while let Some(idx) = cursor {
            path.push(NodeRef { line, node: idx });
            if Some(idx) == start {
                break;
            }
            cursor = tree.nodes[idx].parent;
        }
        path.reverse();

        let mut by_key = HashMap::new();
        for (i, &r) in path.iter().enumerate() {
            by_key.entry(graph.node(r).key.clone()).or_insert(i);
        }

        let last = graph.node(leaf);
        debug!(
            line = %tree.line.id,
            plies = path.len(),
            leaf = %last.id(),
            candidates = preferred.len(),
            "session plan built"
        );

        Ok(Self {
            line,
            terminal_key: last.after_key.clone(),
            nodes: path,
            by_key,
        })
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    pub fn node_at(&self, depth: usize) -> Option<NodeRef> {
        self.nodes.get(depth).copied()
    }

    /// Index of the first plan node played from `key`.
    pub fn depth_of(&self, key: &PositionKey) -> Option<usize> {
        self.by_key.get(key).copied()
    }

    pub fn terminal_key(&self) -> &PositionKey {
        &self.terminal_key
    }

    pub fn start_position<'g>(&self, graph: &'g RepertoireGraph) -> &'g str {
        &graph.node(self.nodes[0]).position_before
    }
}

fn collect_leaves(graph: &RepertoireGraph, at: NodeRef, out: &mut Vec<NodeRef>) {
    let node = graph.node(at);
    if node.is_leaf() {
        out.push(at);
        return;
    }
    for &child in &node.children {
        collect_leaves(graph, NodeRef { line: at.line, node: child }, out);
    }
}
