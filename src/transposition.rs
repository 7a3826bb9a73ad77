use std::cmp::Ordering;
use std::collections::HashMap;

use crate::graph::{compare_node_ids, LineTree, NodeRef};
use crate::position::PositionKey;

/// Position key → every node of an opening played from that position.
///
/// Buckets are stored in deterministic order only. The preferred order
/// depends on the session's active line, so it is computed per lookup.
#[derive(Debug, Clone, Default)]
pub struct TranspositionIndex {
    buckets: HashMap<PositionKey, Vec<NodeRef>>,
}

fn deterministic(lines: &[LineTree], a: NodeRef, b: NodeRef) -> Ordering {
    let na = &lines[a.line].nodes[a.node];
    let nb = &lines[b.line].nodes[b.node];
    compare_node_ids(na.id(), nb.id())
        .then_with(|| na.move_text().cmp(nb.move_text()))
        .then_with(|| lines[a.line].line.id.cmp(&lines[b.line].line.id))
}

impl TranspositionIndex {
    pub fn build(lines: &[LineTree]) -> Self {
        let mut buckets: HashMap<PositionKey, Vec<NodeRef>> = HashMap::new();
        for (line_idx, tree) in lines.iter().enumerate() {
            for (node_idx, node) in tree.nodes.iter().enumerate() {
                buckets.entry(node.key.clone()).or_default().push(NodeRef {
                    line: line_idx,
                    node: node_idx,
                });
            }
        }
        for bucket in buckets.values_mut() {
            bucket.sort_by(|&a, &b| deterministic(lines, a, b));
        }
        Self { buckets }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Candidates for `key`: active line first, then higher line priority,
    /// then the deterministic order.
    pub fn ranked(&self, key: &PositionKey, active_line: Option<usize>, lines: &[LineTree]) -> Vec<NodeRef> {
        let Some(bucket) = self.buckets.get(key) else {
            return Vec::new();
        };
        let mut ranked = bucket.clone();
        ranked.sort_by(|&a, &b| {
            let a_active = Some(a.line) == active_line;
            let b_active = Some(b.line) == active_line;
            b_active.cmp(&a_active).then_with(|| {
                let pa = lines[a.line].line.effective_priority();
                let pb = lines[b.line].line.effective_priority();
                pb.partial_cmp(&pa).unwrap_or(Ordering::Equal)
            })
        });
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::{chain, line, opening};
    use crate::graph::{GraphBuilder, RepertoireGraph};
    use crate::position::ShakmatyEngine;

    // l1: 1.e4 e5 2.Nf3 Nc6, l2: 1.Nf3 Nc6 2.e4 e5 (same position after
    // four plies), l3: 1.e4 c5
    fn graph(p1: f64, p2: f64, p3: f64) -> RepertoireGraph {
        let engine = ShakmatyEngine::new();
        let mut nodes = chain("l1", &["e2e4", "e7e5", "g1f3", "b8c6", "f1b5"]);
        nodes.extend(chain("l2", &["g1f3", "b8c6", "e2e4", "e7e5", "f1c4"]));
        nodes.extend(chain("l3", &["e2e4", "c7c5"]));
        GraphBuilder::new(&engine).build(
            opening("o1", true),
            vec![
                line("l1", "o1", p1, Some("white")),
                line("l2", "o1", p2, Some("white")),
                line("l3", "o1", p3, Some("white")),
            ],
            nodes,
        )
    }

    fn line_ids(g: &RepertoireGraph, refs: &[NodeRef]) -> Vec<String> {
        refs.iter().map(|r| g.line(r.line).line.id.clone()).collect()
    }

    #[test]
    fn every_node_is_indexed_under_its_own_key() {
        let g = graph(1.0, 1.0, 1.0);
        for (li, tree) in g.lines().iter().enumerate() {
            for (ni, n) in tree.nodes.iter().enumerate() {
                let found = g.candidates(&n.key, None);
                assert!(found.contains(&NodeRef { line: li, node: ni }));
            }
        }
    }

    #[test]
    fn transposed_positions_share_a_bucket() {
        let g = graph(1.0, 1.0, 1.0);
        let bishop_move = g.line(0).nodes[4].key.clone();
        let found = g.candidates(&bishop_move, None);
        assert_eq!(found.len(), 2);
        assert_eq!(line_ids(&g, &found), vec!["l1", "l2"]);
    }

    #[test]
    fn active_line_ranks_first() {
        let g = graph(1.0, 1.0, 1.0);
        let key = g.line(0).nodes[4].key.clone();
        let found = g.candidates(&key, Some(1));
        assert_eq!(line_ids(&g, &found), vec!["l2", "l1"]);
    }

    #[test]
    fn priority_breaks_ties_among_inactive_lines() {
        let g = graph(1.0, 3.0, 2.0);
        let after_e4 = g.line(0).nodes[1].key.clone();
        let found = g.candidates(&after_e4, None);
        assert_eq!(line_ids(&g, &found), vec!["l3", "l1"]);

        let found = g.candidates(&after_e4, Some(0));
        assert_eq!(line_ids(&g, &found), vec!["l1", "l3"]);
    }

    #[test]
    fn equal_priority_falls_back_to_deterministic_order() {
        let g = graph(1.0, 1.0, 1.0);
        let start = g.line(0).nodes[0].key.clone();
        let found = g.candidates(&start, None);
        // all three roots have id "1"; l1 e2e4 < l3 e2e4 by line id, g1f3 sorts after e2e4
        assert_eq!(line_ids(&g, &found), vec!["l1", "l3", "l2"]);
    }

    #[test]
    fn unknown_key_yields_nothing() {
        let g = graph(1.0, 1.0, 1.0);
        let key = PositionKey::from_fen("8/8/8/8/8/8/8/K6k w - - 0 1");
        assert!(g.candidates(&key, None).is_empty());
        assert!(g.transpositions().ranked(&key, None, g.lines()).is_empty());
    }
}
