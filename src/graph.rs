use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{Line, MistakeTemplate, NodeRecord, Opening, RepertoireFile};
use crate::position::{PositionEngine, PositionKey};
use crate::transposition::TranspositionIndex;

/// Address of a node inside one opening's graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub line: usize,
    pub node: usize,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub record: NodeRecord,
    pub position_before: String,
    pub key: PositionKey,
    pub position_after: String,
    pub after_key: PositionKey,
    /// Roots sit at depth 1.
    pub depth: u32,
    pub san: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl Node {
    pub fn id(&self) -> &str {
        &self.record.node_id
    }

    pub fn move_text(&self) -> &str {
        &self.record.move_text
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn accepts(&self, uci: &str) -> bool {
        let uci = uci.trim();
        self.record.move_text == uci || self.record.accept.iter().any(|m| m.trim() == uci)
    }
}

#[derive(Debug, Clone)]
pub struct LineTree {
    pub line: Line,
    pub start_position: String,
    pub nodes: Vec<Node>,
    pub roots: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    UnknownLine,
    InvalidStart { reason: String },
    DuplicateNode,
    MissingParent { parent_id: String },
    IllegalMove { mv: String },
    AncestorRejected,
    Unreachable,
}

/// A record excluded from the graph. Construction carries on without it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub opening_id: String,
    pub line_id: String,
    pub node_id: Option<String>,
    pub kind: DiagnosticKind,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.opening_id, self.line_id)?;
        if let Some(node_id) = &self.node_id {
            write!(f, "#{}", node_id)?;
        }
        match &self.kind {
            DiagnosticKind::UnknownLine => write!(f, ": node refers to an unknown line"),
            DiagnosticKind::InvalidStart { reason } => {
                write!(f, ": invalid start position ({})", reason)
            }
            DiagnosticKind::DuplicateNode => write!(f, ": duplicate node id ignored"),
            DiagnosticKind::MissingParent { parent_id } => {
                write!(f, ": parent '{}' does not exist", parent_id)
            }
            DiagnosticKind::IllegalMove { mv } => {
                write!(f, ": move '{}' is illegal in its position", mv)
            }
            DiagnosticKind::AncestorRejected => write!(f, ": an ancestor was rejected"),
            DiagnosticKind::Unreachable => write!(f, ": not reachable from any root"),
        }
    }
}

/// Node ids compare numerically when both are integers, otherwise as text.
pub fn compare_node_ids(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<u64>(), b.trim().parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

fn compare_records(a: &NodeRecord, b: &NodeRecord) -> Ordering {
    compare_node_ids(&a.node_id, &b.node_id).then_with(|| a.move_text.cmp(&b.move_text))
}

fn parent_of(record: &NodeRecord) -> Option<&str> {
    record
        .parent_node_id
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// All lines of one opening, replayed into position-annotated trees.
#[derive(Debug, Clone)]
pub struct RepertoireGraph {
    pub opening: Opening,
    lines: Vec<LineTree>,
    line_index: HashMap<String, usize>,
    diagnostics: Vec<Diagnostic>,
    transpositions: TranspositionIndex,
}

impl RepertoireGraph {
    pub fn lines(&self) -> &[LineTree] {
        &self.lines
    }

    pub fn line(&self, idx: usize) -> &LineTree {
        &self.lines[idx]
    }

    pub fn line_position(&self, line_id: &str) -> Option<usize> {
        self.line_index.get(line_id).copied()
    }

    pub fn line_by_id(&self, line_id: &str) -> Option<&LineTree> {
        self.line_position(line_id).map(|idx| &self.lines[idx])
    }

    pub fn node(&self, r: NodeRef) -> &Node {
        &self.lines[r.line].nodes[r.node]
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn transpositions(&self) -> &TranspositionIndex {
        &self.transpositions
    }

    /// Nodes whose position-before matches `key`, best candidate first for
    /// the given active line.
    pub fn candidates(&self, key: &PositionKey, active_line: Option<usize>) -> Vec<NodeRef> {
        self.transpositions.ranked(key, active_line, &self.lines)
    }

    pub fn node_count(&self) -> usize {
        self.lines.iter().map(|l| l.nodes.len()).sum()
    }
}

pub struct GraphBuilder<'e> {
    engine: &'e dyn PositionEngine,
}

impl<'e> GraphBuilder<'e> {
    pub fn new(engine: &'e dyn PositionEngine) -> Self {
        Self { engine }
    }

    /// Builds one opening's graph. `nodes` must already be restricted to the
    /// given lines; anything unreplayable is reported, never fatal.
    pub fn build(&self, opening: Opening, lines: Vec<Line>, nodes: Vec<NodeRecord>) -> RepertoireGraph {
        let mut diagnostics = Vec::new();
        let mut records_by_line: HashMap<String, Vec<NodeRecord>> = HashMap::new();
        for record in nodes {
            records_by_line
                .entry(record.line_id.clone())
                .or_default()
                .push(record);
        }

        let mut trees = Vec::with_capacity(lines.len());
        let mut line_index = HashMap::new();
        for line in lines {
            if line_index.contains_key(&line.id) {
                warn!(opening = %opening.id, line = %line.id, "duplicate line id ignored");
                continue;
            }
            let records = records_by_line.remove(&line.id).unwrap_or_default();
            let tree = self.build_line(&opening, line, records, &mut diagnostics);
            line_index.insert(tree.line.id.clone(), trees.len());
            trees.push(tree);
        }

        for (line_id, records) in records_by_line {
            for record in records {
                diagnostics.push(Diagnostic {
                    opening_id: opening.id.clone(),
                    line_id: line_id.clone(),
                    node_id: Some(record.node_id),
                    kind: DiagnosticKind::UnknownLine,
                });
            }
        }

        for diagnostic in &diagnostics {
            warn!("excluded from repertoire: {}", diagnostic);
        }

        let transpositions = TranspositionIndex::build(&trees);
        debug!(
            opening = %opening.id,
            lines = trees.len(),
            positions = transpositions.len(),
            "repertoire graph built"
        );

        RepertoireGraph {
            opening,
            lines: trees,
            line_index,
            diagnostics,
            transpositions,
        }
    }

    fn build_line(
        &self,
        opening: &Opening,
        line: Line,
        records: Vec<NodeRecord>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> LineTree {
        let diag = |node_id: Option<&str>, kind: DiagnosticKind| Diagnostic {
            opening_id: opening.id.clone(),
            line_id: line.id.clone(),
            node_id: node_id.map(str::to_string),
            kind,
        };

        let raw_start = line
            .start_position
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&opening.starting_position)
            .to_string();
        let start_position = match self.engine.load(&raw_start) {
            Ok(fen) => fen,
            Err(e) => {
                diagnostics.push(diag(
                    None,
                    DiagnosticKind::InvalidStart {
                        reason: e.to_string(),
                    },
                ));
                return LineTree {
                    line,
                    start_position: raw_start,
                    nodes: Vec::new(),
                    roots: Vec::new(),
                };
            }
        };

        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(records.len());
        for record in records {
            if seen.insert(record.node_id.clone()) {
                unique.push(record);
            } else {
                diagnostics.push(diag(Some(&record.node_id), DiagnosticKind::DuplicateNode));
            }
        }

        let mut children_of: HashMap<Option<String>, Vec<usize>> = HashMap::new();
        for (idx, record) in unique.iter().enumerate() {
            match parent_of(record) {
                Some(parent) if !seen.contains(parent) => {
                    diagnostics.push(diag(
                        Some(&record.node_id),
                        DiagnosticKind::MissingParent {
                            parent_id: parent.to_string(),
                        },
                    ));
                }
                parent => children_of
                    .entry(parent.map(str::to_string))
                    .or_default()
                    .push(idx),
            }
        }
        for group in children_of.values_mut() {
            group.sort_by(|&a, &b| compare_records(&unique[a], &unique[b]));
        }

        let mut replay = Replay {
            engine: self.engine,
            records: &unique,
            children_of: &children_of,
            nodes: Vec::new(),
            visited: vec![false; unique.len()],
            rejected: Vec::new(),
        };

        let mut roots = Vec::new();
        if let Some(root_records) = children_of.get(&None) {
            for &rec in root_records {
                if let Some(idx) = replay.visit(rec, &start_position, None, 1) {
                    roots.push(idx);
                }
            }
        }

        for (rec, kind) in replay.rejected.drain(..) {
            diagnostics.push(diag(Some(&unique[rec].node_id), kind));
        }
        for (idx, record) in unique.iter().enumerate() {
            let orphaned = parent_of(record).is_some_and(|p| !seen.contains(p));
            if !replay.visited[idx] && !orphaned {
                diagnostics.push(diag(Some(&record.node_id), DiagnosticKind::Unreachable));
            }
        }

        let nodes = replay.nodes;
        LineTree {
            line,
            start_position,
            nodes,
            roots,
        }
    }
}

struct Replay<'a> {
    engine: &'a dyn PositionEngine,
    records: &'a [NodeRecord],
    children_of: &'a HashMap<Option<String>, Vec<usize>>,
    nodes: Vec<Node>,
    visited: Vec<bool>,
    rejected: Vec<(usize, DiagnosticKind)>,
}

impl Replay<'_> {
    fn visit(&mut self, rec: usize, position_before: &str, parent: Option<usize>, depth: u32) -> Option<usize> {
        if self.visited[rec] {
            return None;
        }
        self.visited[rec] = true;

        let record = &self.records[rec];
        let applied = match self.engine.apply_move(position_before, &record.move_text) {
            Ok(applied) => applied,
            Err(_) => {
                self.rejected.push((
                    rec,
                    DiagnosticKind::IllegalMove {
                        mv: record.move_text.clone(),
                    },
                ));
                self.reject_descendants(rec);
                return None;
            }
        };

        let idx = self.nodes.len();
        self.nodes.push(Node {
            record: record.clone(),
            position_before: position_before.to_string(),
            key: PositionKey::from_fen(position_before),
            after_key: PositionKey::from_fen(&applied.fen),
            position_after: applied.fen.clone(),
            depth,
            san: applied.san,
            parent,
            children: Vec::new(),
        });

        let child_records = self
            .children_of
            .get(&Some(record.node_id.clone()))
            .cloned()
            .unwrap_or_default();
        for child in child_records {
            if let Some(child_idx) = self.visit(child, &applied.fen, Some(idx), depth + 1) {
                self.nodes[idx].children.push(child_idx);
            }
        }

        Some(idx)
    }

    fn reject_descendants(&mut self, rec: usize) {
        let key = Some(self.records[rec].node_id.clone());
        let children = self.children_of.get(&key).cloned().unwrap_or_default();
        for child in children {
            if !self.visited[child] {
                self.visited[child] = true;
                self.rejected.push((child, DiagnosticKind::AncestorRejected));
                self.reject_descendants(child);
            }
        }
    }
}

/// Every opening of a data feed, plus the shared mistake templates.
#[derive(Debug, Clone, Default)]
pub struct Repertoire {
    graphs: Vec<RepertoireGraph>,
    index: HashMap<String, usize>,
    templates: HashMap<String, MistakeTemplate>,
    orphans: Vec<Diagnostic>,
}

impl Repertoire {
    pub fn build(file: RepertoireFile, engine: &dyn PositionEngine) -> Self {
        let builder = GraphBuilder::new(engine);
        let opening_ids: HashSet<String> = file.openings.iter().map(|o| o.id.clone()).collect();

        let mut lines_by_opening: HashMap<String, Vec<Line>> = HashMap::new();
        let mut line_owner: HashMap<String, String> = HashMap::new();
        let mut orphans = Vec::new();
        for line in file.lines {
            if !opening_ids.contains(&line.opening_id) {
                warn!(line = %line.id, opening = %line.opening_id, "line refers to an unknown opening");
                orphans.push(Diagnostic {
                    opening_id: line.opening_id.clone(),
                    line_id: line.id.clone(),
                    node_id: None,
                    kind: DiagnosticKind::UnknownLine,
                });
                continue;
            }
            line_owner.insert(line.id.clone(), line.opening_id.clone());
            lines_by_opening
                .entry(line.opening_id.clone())
                .or_default()
                .push(line);
        }

        let mut nodes_by_opening: HashMap<String, Vec<NodeRecord>> = HashMap::new();
        for record in file.nodes {
            match line_owner.get(&record.line_id) {
                Some(opening_id) => nodes_by_opening
                    .entry(opening_id.clone())
                    .or_default()
                    .push(record),
                None => {
                    let diagnostic = Diagnostic {
                        opening_id: String::from("?"),
                        line_id: record.line_id.clone(),
                        node_id: Some(record.node_id.clone()),
                        kind: DiagnosticKind::UnknownLine,
                    };
                    warn!("excluded from repertoire: {}", diagnostic);
                    orphans.push(diagnostic);
                }
            }
        }

        let mut graphs = Vec::with_capacity(file.openings.len());
        let mut index = HashMap::new();
        for opening in file.openings {
            if index.contains_key(&opening.id) {
                warn!(opening = %opening.id, "duplicate opening id ignored");
                continue;
            }
            let lines = lines_by_opening.remove(&opening.id).unwrap_or_default();
            let nodes = nodes_by_opening.remove(&opening.id).unwrap_or_default();
            index.insert(opening.id.clone(), graphs.len());
            graphs.push(builder.build(opening, lines, nodes));
        }

        let templates = file
            .mistake_templates
            .into_iter()
            .map(|t| (t.code.clone(), t))
            .collect();

        Self {
            graphs,
            index,
            templates,
            orphans,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P, engine: &dyn PositionEngine) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let file: RepertoireFile = serde_json::from_str(&text)?;
        Ok(Self::build(file, engine))
    }

    pub fn opening(&self, id: &str) -> Option<&RepertoireGraph> {
        self.index.get(id).map(|&idx| &self.graphs[idx])
    }

    pub fn openings(&self) -> impl Iterator<Item = &RepertoireGraph> {
        self.graphs.iter()
    }

    pub fn published(&self) -> impl Iterator<Item = &RepertoireGraph> {
        self.graphs.iter().filter(|g| g.opening.published)
    }

    pub fn mistake_template(&self, code: &str) -> Option<&MistakeTemplate> {
        self.templates.get(code.trim())
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.orphans
            .iter()
            .chain(self.graphs.iter().flat_map(|g| g.diagnostics().iter()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::position::{ShakmatyEngine, START_FEN};

    pub(crate) fn opening(id: &str, allow_transpositions: bool) -> Opening {
        Opening {
            id: id.to_string(),
            name: id.to_uppercase(),
            starting_position: "start".to_string(),
            book_max_plies: 6,
            allow_transpositions,
            published: true,
        }
    }

    pub(crate) fn line(id: &str, opening_id: &str, priority: f64, side: Option<&str>) -> Line {
        Line {
            id: id.to_string(),
            opening_id: opening_id.to_string(),
            name: format!("Line {}", id),
            priority,
            drill_side: side.map(str::to_string),
            start_position: None,
        }
    }

    pub(crate) fn node(line_id: &str, node_id: &str, parent: Option<&str>, mv: &str) -> NodeRecord {
        NodeRecord {
            line_id: line_id.to_string(),
            node_id: node_id.to_string(),
            parent_node_id: parent.map(str::to_string),
            move_text: mv.to_string(),
            ..NodeRecord::default()
        }
    }

    /// Appends a straight chain of moves with ids 1..=n.
    pub(crate) fn chain(line_id: &str, moves: &[&str]) -> Vec<NodeRecord> {
        let mut out = Vec::new();
        for (i, mv) in moves.iter().enumerate() {
            let id = (i + 1).to_string();
            let parent = if i == 0 { None } else { Some(i.to_string()) };
            out.push(node(line_id, &id, parent.as_deref(), mv));
        }
        out
    }

    fn build(lines: Vec<Line>, nodes: Vec<NodeRecord>) -> RepertoireGraph {
        let engine = ShakmatyEngine::new();
        GraphBuilder::new(&engine).build(opening("o1", true), lines, nodes)
    }

    fn replay(engine: &ShakmatyEngine, tree: &LineTree, idx: usize) -> String {
        let mut path = Vec::new();
        let mut cursor = Some(idx);
        while let Some(i) = cursor {
            path.push(tree.nodes[i].move_text().to_string());
            cursor = tree.nodes[i].parent;
        }
        path.reverse();
        path.pop();
        let mut fen = tree.start_position.clone();
        for mv in path {
            fen = engine.apply_move(&fen, &mv).unwrap().fen;
        }
        fen
    }

    mod build_tests {
        use super::*;

        #[test]
        fn straight_line_gets_positions_and_depths() {
            let graph = build(
                vec![line("l1", "o1", 1.0, Some("white"))],
                chain("l1", &["e2e4", "e7e5", "g1f3"]),
            );
            let tree = graph.line_by_id("l1").unwrap();
            assert_eq!(tree.nodes.len(), 3);
            assert_eq!(tree.roots, vec![0]);

            let depths: Vec<u32> = tree.nodes.iter().map(|n| n.depth).collect();
            assert_eq!(depths, vec![1, 2, 3]);
            assert_eq!(tree.nodes[0].position_before, START_FEN);
            assert_eq!(tree.nodes[2].san, "Nf3");
            assert!(tree.nodes[2].is_leaf());
            assert!(graph.diagnostics().is_empty());
        }

        #[test]
        fn child_position_is_parent_position_advanced() {
            let engine = ShakmatyEngine::new();
            let mut nodes = chain("l1", &["e2e4", "e7e5", "g1f3", "b8c6"]);
            nodes.push(node("l1", "5", Some("3"), "d7d6"));
            nodes.push(node("l1", "6", Some("4"), "f1b5"));
            let graph = GraphBuilder::new(&engine).build(
                opening("o1", false),
                vec![line("l1", "o1", 1.0, Some("white"))],
                nodes,
            );

            let tree = graph.line_by_id("l1").unwrap();
            for (idx, n) in tree.nodes.iter().enumerate() {
                assert_eq!(replay(&engine, tree, idx), n.position_before);
                if let Some(parent) = n.parent {
                    let p = &tree.nodes[parent];
                    let advanced = engine.apply_move(&p.position_before, p.move_text()).unwrap();
                    assert_eq!(advanced.fen, n.position_before);
                    assert_eq!(p.position_after, n.position_before);
                }
            }
        }

        #[test]
        fn construction_order_is_independent_of_input_order() {
            let mut nodes = chain("l1", &["e2e4", "e7e5"]);
            nodes.push(node("l1", "10", Some("1"), "c7c5"));
            nodes.push(node("l1", "3", Some("1"), "e7e6"));

            let mut reversed = nodes.clone();
            reversed.reverse();

            let a = build(vec![line("l1", "o1", 1.0, Some("white"))], nodes);
            let b = build(vec![line("l1", "o1", 1.0, Some("white"))], reversed);

            let ids = |g: &RepertoireGraph| -> Vec<String> {
                g.line(0).nodes.iter().map(|n| n.id().to_string()).collect()
            };
            assert_eq!(ids(&a), ids(&b));

            let root = &a.line(0).nodes[0];
            let child_ids: Vec<&str> = root
                .children
                .iter()
                .map(|&c| a.line(0).nodes[c].id())
                .collect();
            assert_eq!(child_ids, vec!["2", "3", "10"]);
        }

        #[test]
        fn illegal_move_drops_node_and_subtree() {
            let mut nodes = chain("l1", &["e2e4", "e7e5", "g1f3"]);
            nodes.push(node("l1", "4", Some("1"), "e2e4"));
            nodes.push(node("l1", "5", Some("4"), "g1f3"));

            let graph = build(vec![line("l1", "o1", 1.0, Some("white"))], nodes);
            let tree = graph.line(0);
            assert_eq!(tree.nodes.len(), 3);

            let kinds: Vec<&DiagnosticKind> = graph.diagnostics().iter().map(|d| &d.kind).collect();
            assert!(kinds.contains(&&DiagnosticKind::IllegalMove {
                mv: "e2e4".to_string()
            }));
            assert!(kinds.contains(&&DiagnosticKind::AncestorRejected));
        }

        #[test]
        fn missing_parent_and_duplicates_are_reported() {
            let mut nodes = chain("l1", &["d2d4", "d7d5"]);
            nodes.push(node("l1", "2", Some("1"), "g8f6"));
            nodes.push(node("l1", "9", Some("42"), "c2c4"));

            let graph = build(vec![line("l1", "o1", 1.0, Some("white"))], nodes);
            assert_eq!(graph.line(0).nodes.len(), 2);

            let kinds: Vec<DiagnosticKind> =
                graph.diagnostics().iter().map(|d| d.kind.clone()).collect();
            assert!(kinds.contains(&DiagnosticKind::DuplicateNode));
            assert!(kinds.contains(&DiagnosticKind::MissingParent {
                parent_id: "42".to_string()
            }));
        }

        #[test]
        fn cycles_are_unreachable() {
            let mut nodes = chain("l1", &["d2d4"]);
            nodes.push(node("l1", "7", Some("8"), "d7d5"));
            nodes.push(node("l1", "8", Some("7"), "c2c4"));

            let graph = build(vec![line("l1", "o1", 1.0, Some("white"))], nodes);
            let unreachable = graph
                .diagnostics()
                .iter()
                .filter(|d| d.kind == DiagnosticKind::Unreachable)
                .count();
            assert_eq!(unreachable, 2);
        }

        #[test]
        fn invalid_start_position_empties_line() {
            let mut l = line("l1", "o1", 1.0, Some("white"));
            l.start_position = Some("this is not a fen".to_string());
            let graph = build(vec![l], chain("l1", &["e2e4"]));
            assert!(graph.line(0).nodes.is_empty());
            assert_eq!(graph.line(0).start_position, "this is not a fen");
            assert_eq!(graph.line(0).line.id, "l1");
            assert!(matches!(
                graph.diagnostics()[0].kind,
                DiagnosticKind::InvalidStart { .. }
            ));
        }

        #[test]
        fn line_start_position_overrides_opening() {
            let mut l = line("l1", "o1", 1.0, Some("black"));
            l.start_position =
                Some("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1".to_string());
            let graph = build(vec![l], chain("l1", &["c7c5"]));
            let tree = graph.line(0);
            assert_eq!(tree.nodes[0].san, "c5");
            assert_eq!(tree.nodes[0].key.side_to_move(), Some(crate::models::Side::Black));
        }

        #[test]
        fn blank_parent_id_marks_root() {
            let mut n = node("l1", "1", None, "e2e4");
            n.parent_node_id = Some("  ".to_string());
            let graph = build(vec![line("l1", "o1", 1.0, Some("white"))], vec![n]);
            assert_eq!(graph.line(0).roots, vec![0]);
        }
    }

    mod repertoire_tests {
        use super::*;

        #[test]
        fn splits_by_opening_and_reports_orphans() {
            let engine = ShakmatyEngine::new();
            let mut nodes = chain("l1", &["e2e4"]);
            nodes.extend(chain("l2", &["d2d4"]));
            nodes.push(node("ghost", "1", None, "c2c4"));

            let file = RepertoireFile {
                openings: vec![opening("o1", false), opening("o2", false)],
                lines: vec![
                    line("l1", "o1", 1.0, Some("white")),
                    line("l2", "o2", 1.0, Some("white")),
                    line("l3", "nowhere", 1.0, Some("white")),
                ],
                nodes,
                mistake_templates: vec![MistakeTemplate {
                    code: "X".to_string(),
                    coach_message: "msg".to_string(),
                    why_wrong: String::new(),
                    hint: String::new(),
                }],
            };
            let repertoire = Repertoire::build(file, &engine);

            assert_eq!(repertoire.openings().count(), 2);
            assert_eq!(repertoire.opening("o1").unwrap().node_count(), 1);
            assert_eq!(repertoire.opening("o2").unwrap().node_count(), 1);
            assert!(repertoire.opening("o3").is_none());
            assert_eq!(repertoire.diagnostics().count(), 2);
            assert!(repertoire.mistake_template(" X ").is_some());
        }

        #[test]
        fn unpublished_openings_are_hidden() {
            let engine = ShakmatyEngine::new();
            let mut hidden = opening("o2", false);
            hidden.published = false;
            let file = RepertoireFile {
                openings: vec![opening("o1", false), hidden],
                ..RepertoireFile::default()
            };
            let repertoire = Repertoire::build(file, &engine);
            let ids: Vec<&str> = repertoire.published().map(|g| g.opening.id.as_str()).collect();
            assert_eq!(ids, vec!["o1"]);
        }

        #[test]
        fn bundled_demo_repertoire_loads_cleanly() {
            let engine = ShakmatyEngine::new();
            let path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/repertoire.json");
            let repertoire = Repertoire::load(path, &engine).unwrap();

            assert_eq!(repertoire.diagnostics().count(), 0);
            assert_eq!(repertoire.published().count(), 2);

            let italian = repertoire.opening("italian").unwrap();
            let giuoco = italian.line_by_id("giuoco").unwrap();
            let two_knights = italian.line_by_id("two-knights").unwrap();
            let last = |tree: &LineTree| tree.nodes.iter().max_by_key(|n| n.depth).unwrap().after_key.clone();
            assert_eq!(last(giuoco), last(two_knights));
            assert!(repertoire.mistake_template("EARLY_QUEEN").is_some());
        }
    }

    mod compare_tests {
        use super::*;

        #[test]
        fn numeric_ids_compare_numerically() {
            assert_eq!(compare_node_ids("2", "10"), Ordering::Less);
            assert_eq!(compare_node_ids("b", "a"), Ordering::Greater);
            assert_eq!(compare_node_ids("10", "a"), Ordering::Less);
        }
    }
}
