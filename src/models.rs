use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// Side of the board a learner drills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "white" | "w" => Some(Side::White),
            "black" | "b" => Some(Side::Black),
            _ => None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_priority() -> f64 {
    1.0
}

fn default_start() -> String {
    String::from("start")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opening {
    pub id: String,
    pub name: String,
    #[serde(default = "default_start")]
    pub starting_position: String,
    #[serde(default)]
    pub book_max_plies: u32,
    #[serde(default)]
    pub allow_transpositions: bool,
    #[serde(default = "default_true")]
    pub published: bool,
}

impl Opening {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    pub id: String,
    pub opening_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_priority")]
    pub priority: f64,
    // Kept raw: a missing or unknown side is refused at session start
    #[serde(default)]
    pub drill_side: Option<String>,
    #[serde(default)]
    pub start_position: Option<String>,
}

impl Line {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn side(&self) -> Option<Side> {
        self.drill_side.as_deref().and_then(Side::from_str)
    }

    pub fn effective_priority(&self) -> f64 {
        if self.priority.is_finite() && self.priority > 0.0 {
            self.priority
        } else {
            1.0
        }
    }
}

// One ply of a line, as it arrives from the data feed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRecord {
    pub line_id: String,
    pub node_id: String,
    #[serde(default)]
    pub parent_node_id: Option<String>,
    pub move_text: String,
    #[serde(default)]
    pub accept: Vec<String>,
    #[serde(default)]
    pub learn_prompt: Option<String>,
    #[serde(default)]
    pub learn_explain: Option<String>,
    #[serde(default)]
    pub practice_good: Option<String>,
    #[serde(default)]
    pub practice_bad: Option<String>,
    #[serde(default)]
    pub practice_hint: Option<String>,
    #[serde(default)]
    pub practice_deep_hint: Option<String>,
    #[serde(default)]
    pub mistake_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MistakeTemplate {
    pub code: String,
    #[serde(default)]
    pub coach_message: String,
    #[serde(default)]
    pub why_wrong: String,
    #[serde(default)]
    pub hint: String,
}

impl MistakeTemplate {
    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        if !self.coach_message.is_empty() {
            parts.push(self.coach_message.clone());
        }
        if !self.why_wrong.is_empty() {
            parts.push(self.why_wrong.clone());
        }
        if !self.hint.is_empty() {
            parts.push(format!("Hint: {}", self.hint));
        }
        parts.join("\n")
    }
}

// The whole pre-parsed data feed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepertoireFile {
    #[serde(default)]
    pub openings: Vec<Opening>,
    #[serde(default)]
    pub lines: Vec<Line>,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub mistake_templates: Vec<MistakeTemplate>,
}

// Training modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Learning,
    Practice,
    Game,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Learning => "learning",
            Mode::Practice => "practice",
            Mode::Game => "game",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "learning" | "learn" | "l" => Some(Mode::Learning),
            "practice" | "drill" | "p" => Some(Mode::Practice),
            "game" | "play" | "g" => Some(Mode::Game),
            _ => None,
        }
    }
}

// Coarse self-assessment fed to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    Fail = 1,
    Pass = 3,
    Perfect = 5,
}

impl Quality {
    pub fn score(&self) -> i32 {
        *self as i32
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Fail => "fail",
            Quality::Pass => "pass",
            Quality::Perfect => "perfect",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fail" | "f" | "lapse" | "1" => Some(Quality::Fail),
            "pass" | "p" | "ok" | "3" => Some(Quality::Pass),
            "perfect" | "clean" | "5" => Some(Quality::Perfect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewStats {
    pub completed: u32,
    pub studied: u32,
    pub perfect: u32,
    pub total_mistakes: u32,
    pub total_attempts: u32,
}

pub const DEFAULT_EASE: f64 = 2.5;
pub const MIN_EASE: f64 = 1.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub last_practiced: Option<NaiveDate>,
    pub due: Option<NaiveDate>,
    pub interval_days: i64,
    pub ease: f64,
    pub reps: u32,
    pub lapses: u32,
    #[serde(default)]
    pub stats: ReviewStats,
}

impl Default for ReviewRecord {
    fn default() -> Self {
        Self {
            last_practiced: None,
            due: None,
            interval_days: 0,
            ease: DEFAULT_EASE,
            reps: 0,
            lapses: 0,
            stats: ReviewStats::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDetails {
    pub mistake_count: u32,
}

// One row of the review audit trail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewHistoryEntry {
    pub id: i64,
    pub key: String,
    pub quality: Quality,
    pub mistakes: u32,
    pub reviewed_at: DateTime<Utc>,
}

/// Stable persistence key for a line's review record.
pub fn line_key(opening_id: &str, line_id: &str) -> String {
    format!("{}:{}", opening_id, line_id)
}

// Line listing row for the CLI
#[derive(Debug, Clone, Serialize)]
pub struct LineSummary {
    pub opening_id: String,
    pub line_id: String,
    pub name: String,
    pub priority: f64,
    pub drill_side: Option<Side>,
    pub due: bool,
    pub due_label: String,
    pub record: ReviewRecord,
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
