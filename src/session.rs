use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{GymError, Result};
use crate::graph::{Node, NodeRef, Repertoire, RepertoireGraph};
use crate::models::{line_key, Line, Mode, Quality, ReviewDetails, ReviewRecord, Side};
use crate::plan::SessionPlan;
use crate::position::{AppliedMove, PositionEngine, PositionKey};
use crate::scheduler::{self, ReviewStore};
use crate::selector::RandomSource;

/// Wrong tries on a single ply before the run counts as a lapse.
const LAPSE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Planned,
    Advancing,
    OutOfLine,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchSwitch {
    pub from_line: String,
    pub to_line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mistake {
    /// The move is listed in the node's mistake map.
    Template { code: String, message: String },
    /// Node-specific feedback for any wrong move.
    Coached { message: String },
    NotInRepertoire { expected_san: String, expected_uci: String },
}

impl Mistake {
    pub fn message(&self) -> String {
        match self {
            Mistake::Template { message, .. } | Mistake::Coached { message } => message.clone(),
            Mistake::NotInRepertoire { expected_san, .. } => {
                format!("Not in your repertoire here. The line continues with {}.", expected_san)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MoveOutcome {
    /// Rejected by the rules; nothing changed.
    Illegal { mv: String },
    Correct { san: String, comment: Option<String> },
    /// Reached a known position by another move order.
    Transposed { san: String },
    /// The move belongs to another repertoire node from the same position.
    Branched { san: String, switch: BranchSwitch },
    /// Wrong move; the board did not advance.
    Mistake { mistake: Mistake, attempts: u32 },
    /// Free play past the book.
    Free { san: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReply {
    generation: u64,
    key: PositionKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplyOutcome {
    Played { san: String, uci: String },
    /// The session moved on after the reply was scheduled.
    Stale,
    NoReply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpectedMove {
    pub line_id: String,
    pub node_id: String,
    pub san: String,
    pub uci: String,
}

/// Everything a front end needs to draw the session. Pure data.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSignals {
    pub opening_id: String,
    pub line_id: Option<String>,
    pub line_name: Option<String>,
    pub mode: Mode,
    pub state: SessionState,
    pub learner_side: Side,
    pub learner_to_move: bool,
    pub expected: Option<ExpectedMove>,
    pub prompt: Option<String>,
    pub out_of_line: bool,
    pub out_of_book: bool,
    pub branch_switch: Option<BranchSwitch>,
    pub completed: bool,
    pub progress: String,
    pub position: String,
}

#[derive(Debug, Clone)]
struct Snapshot {
    position: String,
    plan: Option<SessionPlan>,
    cursor: usize,
    state: SessionState,
    plies: u32,
    out_of_book: bool,
}

fn non_empty(text: &Option<String>) -> Option<&str> {
    text.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// One learner working through one opening. All mutation goes through
/// `&mut self`, so callers serialize moves and opponent replies.
pub struct Session<'a> {
    repertoire: &'a Repertoire,
    graph: &'a RepertoireGraph,
    engine: &'a dyn PositionEngine,
    mode: Mode,
    side: Side,
    origin: Option<usize>,
    plan: Option<SessionPlan>,
    position: String,
    cursor: usize,
    state: SessionState,
    plies: u32,
    out_of_book: bool,
    mistakes: u32,
    wrong_attempts: u32,
    had_lapse: bool,
    hint_level: u8,
    reveal_stage: u8,
    generation: u64,
    history: Vec<Snapshot>,
    last_switch: Option<BranchSwitch>,
}

impl<'a> Session<'a> {
    pub fn new(
        repertoire: &'a Repertoire,
        opening_id: &str,
        engine: &'a dyn PositionEngine,
        mode: Mode,
    ) -> Result<Self> {
        let graph = repertoire
            .opening(opening_id)
            .ok_or_else(|| GymError::UnknownOpening(opening_id.to_string()))?;
        Ok(Self {
            repertoire,
            graph,
            engine,
            mode,
            side: Side::White,
            origin: None,
            plan: None,
            position: String::new(),
            cursor: 0,
            state: SessionState::Idle,
            plies: 0,
            out_of_book: false,
            mistakes: 0,
            wrong_attempts: 0,
            had_lapse: false,
            hint_level: 0,
            reveal_stage: 0,
            generation: 0,
            history: Vec::new(),
            last_switch: None,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn position(&self) -> &str {
        &self.position
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn mistakes(&self) -> u32 {
        self.mistakes
    }

    pub fn had_lapse(&self) -> bool {
        self.had_lapse
    }

    pub fn out_of_book(&self) -> bool {
        self.out_of_book
    }

    pub fn last_switch(&self) -> Option<&BranchSwitch> {
        self.last_switch.as_ref()
    }

    /// The line currently being followed; changes on a branch switch.
    pub fn active_line(&self) -> Option<&'a Line> {
        let graph = self.graph;
        self.plan.as_ref().map(|p| &graph.line(p.line()).line)
    }

    pub fn plan(&self) -> Option<&SessionPlan> {
        self.plan.as_ref()
    }

    fn live_key(&self) -> PositionKey {
        PositionKey::from_fen(&self.position)
    }

    pub fn is_learner_turn(&self) -> bool {
        self.live_key().side_to_move() == Some(self.side)
    }

    fn transpositions_enabled(&self) -> bool {
        matches!(self.mode, Mode::Practice | Mode::Game) && self.graph.opening.allow_transpositions
    }

    pub fn start_line<R>(&mut self, line_id: &str, rng: &mut R) -> Result<SessionSignals>
    where
        R: RandomSource + ?Sized,
    {
        let graph = self.graph;
        let idx = graph
            .line_position(line_id)
            .ok_or_else(|| GymError::UnknownLine {
                opening_id: graph.opening.id.clone(),
                line_id: line_id.to_string(),
            })?;
        let side = Self::drill_side(&graph.line(idx).line)?;
        let plan = SessionPlan::for_line(graph, idx, rng)?;
        self.origin = Some(idx);
        self.begin(side, plan);
        Ok(self.signals())
    }

    /// Starts from an explicitly chosen node instead of a line root.
    pub fn start_from_node<R>(&mut self, at: NodeRef, rng: &mut R) -> Result<SessionSignals>
    where
        R: RandomSource + ?Sized,
    {
        let graph = self.graph;
        let side = Self::drill_side(&graph.line(at.line).line)?;
        let plan = SessionPlan::from_node(graph, at, rng)?;
        self.origin = Some(at.line);
        self.begin(side, plan);
        Ok(self.signals())
    }

    /// Replans the line the session was started with.
    pub fn restart<R>(&mut self, rng: &mut R) -> Result<SessionSignals>
    where
        R: RandomSource + ?Sized,
    {
        let origin = self.origin.ok_or(GymError::NoActiveSession)?;
        let line_id = self.graph.line(origin).line.id.clone();
        self.start_line(&line_id, rng)
    }

    /// Drops the plan and invalidates pending replies.
    pub fn reset(&mut self) {
        self.plan = None;
        self.state = SessionState::Idle;
        self.history.clear();
        self.last_switch = None;
        self.generation += 1;
    }

    fn drill_side(line: &Line) -> Result<Side> {
        line.side().ok_or_else(|| GymError::MissingDrillSide {
            line_id: line.id.clone(),
        })
    }

    fn begin(&mut self, side: Side, plan: SessionPlan) {
        self.side = side;
        self.position = plan.start_position(self.graph).to_string();
        info!(
            opening = %self.graph.opening.id,
            line = %self.graph.line(plan.line()).line.id,
            mode = self.mode.as_str(),
            plies = plan.len(),
            "session started"
        );
        self.plan = Some(plan);
        self.cursor = 0;
        self.state = SessionState::Planned;
        self.plies = 0;
        // Without a ply budget game mode has no book at all
        self.out_of_book = self.mode == Mode::Game && self.graph.opening.book_max_plies == 0;
        self.mistakes = 0;
        self.wrong_attempts = 0;
        self.had_lapse = false;
        self.clear_hints();
        self.history.clear();
        self.last_switch = None;
        self.generation += 1;
    }

    fn clear_hints(&mut self) {
        self.hint_level = 0;
        self.reveal_stage = 0;
    }

    /// The repertoire node expected from the live position, if any.
    pub fn expected_node(&self) -> Option<NodeRef> {
        if !matches!(self.state, SessionState::Planned | SessionState::Advancing) || self.out_of_book {
            return None;
        }
        let plan = self.plan.as_ref()?;
        let key = self.live_key();

        if let Some(r) = plan.node_at(self.cursor) {
            if self.graph.node(r).key == key {
                return Some(r);
            }
        }
        if let Some(depth) = plan.depth_of(&key) {
            return plan.node_at(depth);
        }
        if self.transpositions_enabled() {
            return self.graph.candidates(&key, Some(plan.line())).into_iter().next();
        }
        None
    }

    fn ensure_learner_move(&self) -> Result<()> {
        match self.state {
            SessionState::Idle => return Err(GymError::NoActiveSession),
            SessionState::Completed => return Err(GymError::SessionFinished),
            SessionState::OutOfLine => return Err(GymError::OutOfLine),
            SessionState::Planned | SessionState::Advancing => {}
        }
        if !self.is_learner_turn() {
            return Err(GymError::NotLearnerTurn);
        }
        Ok(())
    }

    fn push_snapshot(&mut self) {
        self.history.push(Snapshot {
            position: self.position.clone(),
            plan: self.plan.clone(),
            cursor: self.cursor,
            state: self.state,
            plies: self.plies,
            out_of_book: self.out_of_book,
        });
    }

    /// Plays the learner's move in coordinate notation.
    pub fn play<R>(&mut self, mv: &str, rng: &mut R) -> Result<MoveOutcome>
    where
        R: RandomSource + ?Sized,
    {
        self.ensure_learner_move()?;
        let applied = match self.engine.apply_move(&self.position, mv) {
            Ok(applied) => applied,
            Err(GymError::IllegalMove { .. }) => {
                return Ok(MoveOutcome::Illegal {
                    mv: mv.trim().to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        if self.mode == Mode::Game {
            return Ok(self.play_free(applied, rng));
        }

        let graph = self.graph;
        let expected = self.expected_node().ok_or(GymError::OutOfLine)?;
        let node = graph.node(expected);

        if node.accepts(&applied.uci) || node.accepts(mv) {
            self.push_snapshot();
            self.wrong_attempts = 0;
            self.clear_hints();
            // Alternate spellings of the move still follow the repertoire move
            self.position = node.position_after.clone();
            self.advance(rng);
            let comment = match self.mode {
                Mode::Learning => node.record.learn_explain.clone(),
                _ => node.record.practice_good.clone(),
            };
            return Ok(MoveOutcome::Correct {
                san: node.san.clone(),
                comment,
            });
        }

        if let Some(alt) = self.alternative(&applied.uci) {
            return self.branch_to(alt, rng);
        }

        if self.transpositions_enabled() && self.reaches_known_position(&applied) {
            self.push_snapshot();
            self.wrong_attempts = 0;
            self.clear_hints();
            self.position = applied.fen;
            self.advance(rng);
            return Ok(MoveOutcome::Transposed { san: applied.san });
        }

        Ok(self.mistake(node, &applied))
    }

    /// A node of another line played from the same position with the same move.
    fn alternative(&self, uci: &str) -> Option<NodeRef> {
        let active = self.plan.as_ref().map(SessionPlan::line)?;
        self.graph
            .candidates(&self.live_key(), Some(active))
            .into_iter()
            .find(|&r| r.line != active && self.graph.node(r).accepts(uci))
    }

    fn reaches_known_position(&self, applied: &AppliedMove) -> bool {
        let key = PositionKey::from_fen(&applied.fen);
        let Some(plan) = self.plan.as_ref() else {
            return false;
        };
        plan.depth_of(&key).is_some()
            || self
                .graph
                .candidates(&key, Some(plan.line()))
                .iter()
                .any(|r| r.line != plan.line())
    }

    fn branch_to<R>(&mut self, alt: NodeRef, rng: &mut R) -> Result<MoveOutcome>
    where
        R: RandomSource + ?Sized,
    {
        let graph = self.graph;
        let plan = SessionPlan::from_node(graph, alt, rng)?;
        let switch = BranchSwitch {
            from_line: self.active_line().map(|l| l.id.clone()).unwrap_or_default(),
            to_line: graph.line(alt.line).line.id.clone(),
        };
        debug!(from = %switch.from_line, to = %switch.to_line, "learner chose another branch");

        self.push_snapshot();
        self.mistakes += 1;
        self.wrong_attempts = 0;
        self.clear_hints();
        self.plan = Some(plan);
        self.cursor = 0;
        self.last_switch = Some(switch.clone());

        let node = graph.node(alt);
        self.position = node.position_after.clone();
        self.advance(rng);
        Ok(MoveOutcome::Branched {
            san: node.san.clone(),
            switch,
        })
    }

    fn mistake(&mut self, expected: &Node, applied: &AppliedMove) -> MoveOutcome {
        self.mistakes += 1;
        self.wrong_attempts += 1;
        if self.wrong_attempts >= LAPSE_ATTEMPTS {
            self.had_lapse = true;
        }

        let template = expected
            .record
            .mistake_map
            .get(&applied.uci)
            .and_then(|code| self.repertoire.mistake_template(code));
        let mistake = if let Some(t) = template {
            Mistake::Template {
                code: t.code.clone(),
                message: t.render(),
            }
        } else if let Some(text) = non_empty(&expected.record.practice_bad) {
            Mistake::Coached {
                message: text.to_string(),
            }
        } else {
            Mistake::NotInRepertoire {
                expected_san: expected.san.clone(),
                expected_uci: expected.move_text().to_string(),
            }
        };
        debug!(played = %applied.uci, expected = %expected.move_text(), attempts = self.wrong_attempts, "wrong move");

        MoveOutcome::Mistake {
            mistake,
            attempts: self.wrong_attempts,
        }
    }

    fn play_free<R>(&mut self, applied: AppliedMove, rng: &mut R) -> MoveOutcome
    where
        R: RandomSource + ?Sized,
    {
        debug!(san = %applied.san, capture = applied.is_capture, ply = self.plies + 1, "free move");
        self.push_snapshot();
        self.position = applied.fen;
        self.plies += 1;
        if !self.out_of_book {
            self.advance(rng);
            self.settle_book();
        }
        if self.out_of_book {
            MoveOutcome::Free { san: applied.san }
        } else {
            MoveOutcome::Correct {
                san: applied.san,
                comment: None,
            }
        }
    }

    /// In free play the book ends at the ply limit or when the moves leave
    /// the repertoire.
    fn settle_book(&mut self) {
        let exhausted = self.plies >= self.graph.opening.book_max_plies;
        if exhausted || matches!(self.state, SessionState::OutOfLine | SessionState::Completed) {
            if !self.out_of_book {
                debug!(plies = self.plies, "left the book");
            }
            self.out_of_book = true;
            self.state = SessionState::Advancing;
        }
    }

    /// Moves the cursor to match the live position, re-rooting through the
    /// transposition index when the plan has no answer.
    fn advance<R>(&mut self, rng: &mut R)
    where
        R: RandomSource + ?Sized,
    {
        let graph = self.graph;
        let key = self.live_key();
        let Some(plan) = self.plan.as_ref() else {
            return;
        };

        if self.cursor + 1 == plan.len() && &key == plan.terminal_key() {
            self.cursor = plan.len();
            self.state = SessionState::Completed;
            info!(line = %graph.line(plan.line()).line.id, mistakes = self.mistakes, "line completed");
            return;
        }

        if let Some(depth) = plan.depth_of(&key) {
            self.cursor = depth;
            self.state = SessionState::Advancing;
            return;
        }

        if self.transpositions_enabled() {
            let active = plan.line();
            let target = graph
                .candidates(&key, Some(active))
                .into_iter()
                .find(|r| r.line != active);
            if let Some(target) = target {
                if let Ok(next) = SessionPlan::from_node(graph, target, rng) {
                    let switch = BranchSwitch {
                        from_line: graph.line(active).line.id.clone(),
                        to_line: graph.line(target.line).line.id.clone(),
                    };
                    debug!(from = %switch.from_line, to = %switch.to_line, "transposed into another line");
                    self.plan = Some(next);
                    self.cursor = 0;
                    self.state = SessionState::Advancing;
                    self.last_switch = Some(switch);
                    return;
                }
            }
        }

        debug!(position = %key, "position left the plan");
        self.state = SessionState::OutOfLine;
    }

    /// Captures the session identity for an opponent reply played later.
    pub fn schedule_opponent_reply(&self) -> Option<PendingReply> {
        if self.is_learner_turn() {
            return None;
        }
        self.expected_node()?;
        Some(PendingReply {
            generation: self.generation,
            key: self.live_key(),
        })
    }

    /// Plays a scheduled reply unless the session has moved on since.
    pub fn resolve_pending<R>(&mut self, pending: PendingReply, rng: &mut R) -> Result<ReplyOutcome>
    where
        R: RandomSource + ?Sized,
    {
        if pending.generation != self.generation || pending.key != self.live_key() {
            debug!("discarding stale opponent reply");
            return Ok(ReplyOutcome::Stale);
        }
        if self.is_learner_turn() {
            return Ok(ReplyOutcome::NoReply);
        }
        let Some(r) = self.expected_node() else {
            return Ok(ReplyOutcome::NoReply);
        };

        let graph = self.graph;
        let node = graph.node(r);
        self.push_snapshot();
        self.position = node.position_after.clone();
        if self.mode == Mode::Game {
            self.plies += 1;
            self.advance(rng);
            self.settle_book();
        } else {
            self.advance(rng);
        }
        Ok(ReplyOutcome::Played {
            san: node.san.clone(),
            uci: node.move_text().to_string(),
        })
    }

    /// Schedules and immediately resolves the opponent's reply.
    pub fn opponent_reply<R>(&mut self, rng: &mut R) -> Result<ReplyOutcome>
    where
        R: RandomSource + ?Sized,
    {
        match self.schedule_opponent_reply() {
            Some(pending) => self.resolve_pending(pending, rng),
            None => Ok(ReplyOutcome::NoReply),
        }
    }

    /// Steps back to the last position where the learner was to move.
    pub fn undo(&mut self) -> bool {
        let Some(mut snapshot) = self.history.pop() else {
            return false;
        };
        while PositionKey::from_fen(&snapshot.position).side_to_move() != Some(self.side) {
            match self.history.pop() {
                Some(earlier) => snapshot = earlier,
                None => break,
            }
        }
        self.position = snapshot.position;
        self.plan = snapshot.plan;
        self.cursor = snapshot.cursor;
        self.state = snapshot.state;
        self.plies = snapshot.plies;
        self.out_of_book = snapshot.out_of_book;
        self.wrong_attempts = 0;
        self.clear_hints();
        self.generation += 1;
        true
    }

    pub fn hint(&mut self) -> Option<String> {
        if self.mode != Mode::Practice {
            return None;
        }
        let graph = self.graph;
        let node = graph.node(self.expected_node()?);
        if self.hint_level == 0 {
            if let Some(hint) = non_empty(&node.record.practice_hint) {
                self.hint_level = 1;
                return Some(format!("Hint: {}", hint));
            }
        } else if self.hint_level == 1 {
            if let Some(deep) = non_empty(&node.record.practice_deep_hint) {
                self.hint_level = 2;
                return Some(format!("Deep hint: {}", deep));
            }
        }
        Some(String::from(
            "Keep trying. Make a few attempts to unlock more hints.",
        ))
    }

    /// First shows the deep hint if unseen; after that names the move and
    /// marks the run as lapsed.
    pub fn reveal(&mut self) -> Option<String> {
        if self.mode != Mode::Practice {
            return None;
        }
        let graph = self.graph;
        let node = graph.node(self.expected_node()?);
        if self.reveal_stage == 0 && self.hint_level < 2 {
            if let Some(deep) = non_empty(&node.record.practice_deep_hint) {
                self.hint_level = 2;
                self.reveal_stage = 1;
                return Some(format!("Deep hint: {}", deep));
            }
        }
        self.reveal_stage = 2;
        self.had_lapse = true;
        Some(format!("Correct move: {}", node.san))
    }

    /// Legal moves from the live position, in coordinate notation.
    pub fn legal_moves(&self) -> Result<Vec<String>> {
        self.engine.legal_moves(&self.position)
    }

    pub fn quality(&self) -> Quality {
        if self.had_lapse {
            Quality::Fail
        } else if self.mistakes == 0 {
            Quality::Perfect
        } else {
            Quality::Pass
        }
    }

    pub fn review_details(&self) -> ReviewDetails {
        ReviewDetails {
            mistake_count: self.mistakes,
        }
    }

    /// Books a completed run: a review in practice, a study pass in learning.
    /// Free play and unfinished runs record nothing.
    pub fn record_completion(&self, store: &dyn ReviewStore, today: NaiveDate) -> Option<ReviewRecord> {
        if self.state != SessionState::Completed {
            return None;
        }
        let line = self.active_line()?;
        let key = line_key(&self.graph.opening.id, &line.id);
        match self.mode {
            Mode::Practice => Some(scheduler::record_review(
                store,
                &key,
                self.quality(),
                &self.review_details(),
                today,
            )),
            Mode::Learning => Some(scheduler::record_study(store, &key)),
            Mode::Game => None,
        }
    }

    pub fn signals(&self) -> SessionSignals {
        let graph = self.graph;
        let line = self.active_line();
        let expected = self.expected_node().map(|r| {
            let node = graph.node(r);
            ExpectedMove {
                line_id: graph.line(r.line).line.id.clone(),
                node_id: node.id().to_string(),
                san: node.san.clone(),
                uci: node.move_text().to_string(),
            }
        });
        let learner_to_move = self.state != SessionState::Idle && self.is_learner_turn();
        let prompt = match (self.mode, learner_to_move, self.expected_node()) {
            (Mode::Learning, true, Some(r)) => graph.node(r).record.learn_prompt.clone(),
            _ => None,
        };
        let total = self.plan.as_ref().map_or(0, SessionPlan::len);

        SessionSignals {
            opening_id: graph.opening.id.clone(),
            line_id: line.map(|l| l.id.clone()),
            line_name: line.map(|l| l.display_name().to_string()),
            mode: self.mode,
            state: self.state,
            learner_side: self.side,
            learner_to_move,
            expected,
            prompt,
            out_of_line: self.state == SessionState::OutOfLine,
            out_of_book: self.out_of_book,
            branch_switch: self.last_switch.clone(),
            completed: self.state == SessionState::Completed,
            progress: format!("Ply {} of {}", self.cursor.min(total), total),
            position: self.position.clone(),
        }
    }
}
