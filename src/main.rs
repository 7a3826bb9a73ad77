mod db;
mod error;
mod graph;
mod models;
mod plan;
mod position;
mod scheduler;
mod selector;
mod session;
mod transposition;

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use db::Database;
use error::GymError;
use graph::{NodeRef, Repertoire, RepertoireGraph};
use models::{line_key, JsonOutput, LineSummary, Mode, Quality, ReviewDetails};
use position::ShakmatyEngine;
use scheduler::{MemoryStore, ReviewStore};
use selector::Candidate;
use session::{MoveOutcome, ReplyOutcome, Session};

const DEFAULT_DB_NAME: &str = "chessgym.db";
const DEFAULT_REPERTOIRE_NAME: &str = "repertoire.json";

#[derive(Parser)]
#[command(name = "chessgym")]
#[command(about = "Drill chess opening repertoires with spaced repetition")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Repertoire file (overrides CHESSGYM_REPERTOIRE)
    #[arg(long, global = true)]
    repertoire: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// List published openings
    Openings {
        /// Include unpublished openings
        #[arg(long)]
        all: bool,
    },

    /// Report repertoire records that could not be replayed
    Check,

    /// List the lines of an opening with their review state
    Lines {
        /// Opening ID
        opening: String,

        /// Only lines due today
        #[arg(long)]
        due: bool,
    },

    /// Pick the next line to train (weighted random selection)
    Next {
        /// Opening ID
        opening: String,

        /// Prefer lines due today
        #[arg(long)]
        due: bool,

        /// Seed for reproducible selection
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Train a line interactively
    Drill {
        /// Opening ID
        opening: String,

        /// Line ID (picked by the selector when omitted)
        #[arg(long, short)]
        line: Option<String>,

        /// Training mode: learning/practice/game
        #[arg(long, short, default_value = "practice")]
        mode: String,

        /// Prefer lines due today when picking
        #[arg(long)]
        due: bool,

        /// Seed for reproducible line and leaf choice
        #[arg(long)]
        seed: Option<u64>,

        /// Start at this node of the line instead of its root
        #[arg(long, requires = "line")]
        from: Option<String>,
    },

    /// Record a review outcome for a line
    Review {
        /// Opening ID
        opening: String,

        /// Line ID
        line: String,

        /// Review quality: fail/pass/perfect
        #[arg(long, short)]
        quality: String,

        /// Mistakes made during the run
        #[arg(long, short, default_value_t = 0)]
        mistakes: u32,
    },

    /// Clear the stored review state of a line
    Forget {
        /// Opening ID
        opening: String,

        /// Line ID
        line: String,
    },

    /// Show past reviews of a line
    History {
        /// Opening ID
        opening: String,

        /// Line ID
        line: String,
    },

    /// Show training statistics
    Stats,
}

fn config_dir() -> PathBuf {
    let dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chessgym");

    std::fs::create_dir_all(&dir).ok();
    dir
}

fn get_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("CHESSGYM_DB") {
        return PathBuf::from(path);
    }
    config_dir().join(DEFAULT_DB_NAME)
}

fn get_repertoire_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("CHESSGYM_REPERTOIRE") {
        return PathBuf::from(path);
    }
    config_dir().join(DEFAULT_REPERTOIRE_NAME)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn open_db(path: &Path) -> Result<Database, Box<dyn std::error::Error>> {
    let db = Database::open(path)?;
    db.init()?;
    Ok(db)
}

// Training keeps going without persistence when the database is unusable
fn open_store(path: &Path) -> Box<dyn ReviewStore> {
    match open_db(path) {
        Ok(db) => Box::new(db),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "review database unavailable; progress will not be saved");
            Box::new(MemoryStore::new())
        }
    }
}

fn load_repertoire(path: &Path, engine: &ShakmatyEngine) -> Result<Repertoire, Box<dyn std::error::Error>> {
    Repertoire::load(path, engine)
        .map_err(|e| format!("cannot load repertoire {}: {}", path.display(), e).into())
}

fn find_opening<'r>(repertoire: &'r Repertoire, id: &str) -> Result<&'r RepertoireGraph, GymError> {
    repertoire
        .opening(id)
        .ok_or_else(|| GymError::UnknownOpening(id.to_string()))
}

/// Lines that can start a session: a drill side and at least one valid node.
fn trainable_lines<'g>(graph: &'g RepertoireGraph, store: &dyn ReviewStore) -> Vec<Candidate<'g>> {
    graph
        .lines()
        .iter()
        .filter(|tree| tree.line.side().is_some() && !tree.roots.is_empty())
        .map(|tree| Candidate {
            line: &tree.line,
            record: scheduler::load_or_default(store, &line_key(&graph.opening.id, &tree.line.id)),
        })
        .collect()
}

fn find_node(graph: &RepertoireGraph, line_id: &str, node_id: &str) -> Result<NodeRef, Box<dyn std::error::Error>> {
    let line = graph.line_position(line_id).ok_or_else(|| GymError::UnknownLine {
        opening_id: graph.opening.id.clone(),
        line_id: line_id.to_string(),
    })?;
    let node = graph
        .line(line)
        .nodes
        .iter()
        .position(|n| n.id() == node_id)
        .ok_or_else(|| format!("no node '{}' in line '{}'", node_id, line_id))?;
    Ok(NodeRef { line, node })
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let engine = ShakmatyEngine::new();
    let db_path = get_db_path();
    let repertoire_path = get_repertoire_path(cli.repertoire.clone());
    let today = scheduler::local_today();

    match cli.command {
        Commands::Init => {
            open_db(&db_path)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("Database initialized at: {}", db_path.display());
                println!("Repertoire expected at: {}", repertoire_path.display());
            }
        }

        Commands::Openings { all } => {
            let repertoire = load_repertoire(&repertoire_path, &engine)?;
            let listed: Vec<&RepertoireGraph> = if all {
                repertoire.openings().collect()
            } else {
                repertoire.published().collect()
            };
            let openings: Vec<serde_json::Value> = listed
                .iter()
                .map(|g| {
                    serde_json::json!({
                        "id": g.opening.id,
                        "name": g.opening.display_name(),
                        "lines": g.lines().len(),
                        "nodes": g.node_count(),
                        "positions": g.transpositions().len(),
                        "published": g.opening.published,
                        "allow_transpositions": g.opening.allow_transpositions
                    })
                })
                .collect();

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&openings))?);
            } else if openings.is_empty() {
                println!("No openings found.");
            } else {
                println!(
                    "{:<20} {:<36} {:>5} {:>5} {:>9}",
                    "ID", "NAME", "LINES", "NODES", "POSITIONS"
                );
                println!("{}", "-".repeat(79));
                for g in listed {
                    println!(
                        "{:<20} {:<36} {:>5} {:>5} {:>9}",
                        truncate(&g.opening.id, 20),
                        truncate(g.opening.display_name(), 36),
                        g.lines().len(),
                        g.node_count(),
                        g.transpositions().len()
                    );
                }
            }
        }

        Commands::Check => {
            let repertoire = load_repertoire(&repertoire_path, &engine)?;
            let problems: Vec<String> = repertoire.diagnostics().map(|d| d.to_string()).collect();
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&problems))?);
            } else if problems.is_empty() {
                println!("Repertoire OK: every node replays cleanly.");
            } else {
                println!("{} record(s) excluded:", problems.len());
                for p in &problems {
                    println!("  {}", p);
                }
            }
        }

        Commands::Lines { opening, due } => {
            let repertoire = load_repertoire(&repertoire_path, &engine)?;
            let graph = find_opening(&repertoire, &opening)?;
            let store = open_store(&db_path);

            let summaries: Vec<LineSummary> = graph
                .lines()
                .iter()
                .map(|tree| {
                    let record = scheduler::load_or_default(
                        store.as_ref(),
                        &line_key(&graph.opening.id, &tree.line.id),
                    );
                    LineSummary {
                        opening_id: graph.opening.id.clone(),
                        line_id: tree.line.id.clone(),
                        name: tree.line.display_name().to_string(),
                        priority: tree.line.effective_priority(),
                        drill_side: tree.line.side(),
                        due: scheduler::is_due(&record, today),
                        due_label: scheduler::due_label(&record, today),
                        record,
                    }
                })
                .filter(|s| !due || s.due)
                .collect();

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&summaries))?);
            } else if summaries.is_empty() {
                println!("No lines found.");
            } else {
                println!(
                    "{:<16} {:<32} {:<6} {:>5} {:<10} DONE",
                    "ID", "NAME", "SIDE", "PRIO", "DUE"
                );
                println!("{}", "-".repeat(80));
                for s in summaries {
                    let side = s.drill_side.map(|d| d.as_str()).unwrap_or("?");
                    println!(
                        "{:<16} {:<32} {:<6} {:>5.1} {:<10} {}",
                        truncate(&s.line_id, 16),
                        truncate(&s.name, 32),
                        side,
                        s.priority,
                        s.due_label,
                        s.record.stats.completed
                    );
                }
            }
        }

        Commands::Next { opening, due, seed } => {
            let repertoire = load_repertoire(&repertoire_path, &engine)?;
            let graph = find_opening(&repertoire, &opening)?;
            let store = open_store(&db_path);
            let pool = trainable_lines(graph, store.as_ref());
            let mut rng = make_rng(seed);

            if let Some(pick) = selector::select_line(&pool, due, today, &mut rng) {
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "opening_id": graph.opening.id,
                            "line_id": pick.line.id,
                            "name": pick.line.display_name(),
                            "due": scheduler::is_due(&pick.record, today),
                            "record": pick.record
                        })))?
                    );
                } else {
                    println!("=== Next Line to Train ===");
                    println!();
                    println!("Line: {} ({})", pick.line.display_name(), pick.line.id);
                    println!("{}", scheduler::progress_text(&pick.record, today));
                    println!();
                    println!("Start it with:");
                    println!("  chessgym drill {} --line {}", graph.opening.id, pick.line.id);
                }
            } else if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("No trainable lines in this opening.");
            }
        }

        Commands::Drill {
            opening,
            line,
            mode,
            due,
            seed,
            from,
        } => {
            let mode = Mode::from_str(&mode).ok_or_else(|| {
                format!("Invalid mode '{}'. Use: learning, practice, or game", mode)
            })?;
            let repertoire = load_repertoire(&repertoire_path, &engine)?;
            let graph = find_opening(&repertoire, &opening)?;
            let store = open_store(&db_path);
            let mut rng = make_rng(seed);

            let line_id = match line {
                Some(id) => id,
                None => {
                    let pool = trainable_lines(graph, store.as_ref());
                    selector::select_line(&pool, due, today, &mut rng)
                        .map(|c| c.line.id.clone())
                        .ok_or_else(|| GymError::NoLines(graph.opening.id.clone()))?
                }
            };

            let mut session = Session::new(&repertoire, &opening, &engine, mode)?;
            match from {
                Some(node_id) => {
                    let at = find_node(graph, &line_id, &node_id)?;
                    session.start_from_node(at, &mut rng)?;
                }
                None => {
                    session.start_line(&line_id, &mut rng)?;
                }
            }
            drill(&mut session, store.as_ref(), &mut rng, cli.json)?;
        }

        Commands::Review {
            opening,
            line,
            quality,
            mistakes,
        } => {
            let quality =
                Quality::from_str(&quality).ok_or_else(|| GymError::InvalidQuality(quality.clone()))?;
            let repertoire = load_repertoire(&repertoire_path, &engine)?;
            let graph = find_opening(&repertoire, &opening)?;
            if graph.line_by_id(&line).is_none() {
                return Err(GymError::UnknownLine {
                    opening_id: opening,
                    line_id: line,
                }
                .into());
            }

            let db = open_db(&db_path)?;
            let key = line_key(&opening, &line);
            let record = scheduler::record_review(
                &db,
                &key,
                quality,
                &ReviewDetails {
                    mistake_count: mistakes,
                },
                today,
            );

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&record))?);
            } else {
                println!("Review recorded for {}.", key);
                println!("{}", scheduler::progress_text(&record, today));
            }
        }

        Commands::Forget { opening, line } => {
            let db = open_db(&db_path)?;
            let key = line_key(&opening, &line);
            let removed = db.delete_record(&key)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(removed))?);
            } else if removed {
                println!("Cleared review state for {}.", key);
            } else {
                println!("Nothing stored for {}.", key);
            }
        }

        Commands::History { opening, line } => {
            let db = open_db(&db_path)?;
            let history = db.get_history(&line_key(&opening, &line))?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&history))?);
            } else if history.is_empty() {
                println!("No reviews recorded yet.");
            } else {
                println!("{:<20} {:<8} MISTAKES", "WHEN", "QUALITY");
                println!("{}", "-".repeat(40));
                for entry in history {
                    println!(
                        "{:<20} {:<8} {}",
                        entry.reviewed_at.format("%Y-%m-%d %H:%M").to_string(),
                        entry.quality.as_str(),
                        entry.mistakes
                    );
                }
            }
        }

        Commands::Stats => {
            let db = open_db(&db_path)?;
            let stats = db.get_stats(today)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&stats))?);
            } else {
                println!("=== Training Statistics ===");
                println!("Tracked lines: {}", stats.tracked_lines);
                println!("Total reviews: {}", stats.total_reviews);
                println!("Due today: {}", stats.due_today);
                println!("Perfect runs: {}", stats.perfect_runs);
                println!("Average ease: {:.2}", stats.avg_ease);
            }
        }
    }

    Ok(())
}

fn describe(outcome: &MoveOutcome) -> String {
    match outcome {
        MoveOutcome::Illegal { mv } => format!("Illegal move: {}", mv),
        MoveOutcome::Correct { san, comment } => match comment.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => format!("{}: correct. {}", san, c),
            _ => format!("{}: correct.", san),
        },
        MoveOutcome::Transposed { san } => format!("{}: transposes into a known position.", san),
        MoveOutcome::Branched { san, switch } => format!(
            "{}: that is line {}, switching from {}.",
            san, switch.to_line, switch.from_line
        ),
        MoveOutcome::Mistake { mistake, attempts } => {
            format!("{} (attempt {})", mistake.message(), attempts)
        }
        MoveOutcome::Free { san } => format!("{} (out of book)", san),
    }
}

fn emit_json<T: serde::Serialize>(event: &str, payload: &T, session: &Session) -> serde_json::Result<()> {
    let output = JsonOutput::ok(serde_json::json!({
        "event": event,
        "payload": payload,
        "signals": session.signals()
    }));
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn drill(
    session: &mut Session,
    store: &dyn ReviewStore,
    rng: &mut StdRng,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let today = scheduler::local_today();
    let stdin = io::stdin();
    let mut input = stdin.lock().lines();

    if !json {
        let signals = session.signals();
        println!(
            "{} ({}) as {}. Commands: <uci move>, hint, reveal, undo, restart, moves, status, quit",
            signals.line_name.unwrap_or_default(),
            session.mode().as_str(),
            signals.learner_side.as_str()
        );
    }

    loop {
        while let reply @ ReplyOutcome::Played { .. } = session.opponent_reply(rng)? {
            if json {
                emit_json("reply", &reply, session)?;
            } else if let ReplyOutcome::Played { san, .. } = &reply {
                println!("Opponent plays {}", san);
            }
        }

        let signals = session.signals();
        if signals.completed {
            let record = session.record_completion(store, today);
            if json {
                emit_json("completed", &record, session)?;
            } else {
                println!("Line complete. Great work!");
                if let Some(record) = record {
                    println!("{}", scheduler::progress_text(&record, today));
                }
            }
            break;
        }
        if signals.out_of_book && !signals.learner_to_move {
            if !json {
                println!("Out of book. Continue the game with an engine.");
            } else {
                emit_json("out_of_book", &(), session)?;
            }
            break;
        }

        if !json {
            if signals.out_of_line {
                println!("Out of line. Type 'undo' or 'restart'.");
            }
            if let Some(prompt) = &signals.prompt {
                println!("{}", prompt);
            }
            print!("[{}] {} > ", signals.progress, signals.learner_side.as_str());
            io::stdout().flush()?;
        }

        let Some(raw) = input.next() else {
            break;
        };
        let command = raw?.trim().to_lowercase();

        match command.as_str() {
            "" => continue,
            "quit" | "q" | "exit" => {
                session.reset();
                break;
            }
            "moves" => {
                let moves = session.legal_moves()?;
                if json {
                    emit_json("moves", &moves, session)?;
                } else {
                    println!("{}", moves.join(" "));
                }
            }
            "status" | "s" => {
                let status = serde_json::json!({
                    "side": session.side(),
                    "mistakes": session.mistakes(),
                    "lapse": session.had_lapse(),
                    "plies": session.plan().map(|p| p.len()),
                    "switch": session.last_switch(),
                    "position": session.position()
                });
                if json {
                    emit_json("status", &status, session)?;
                } else {
                    println!("Position: {}", session.position());
                    println!(
                        "Mistakes: {}{}",
                        session.mistakes(),
                        if session.had_lapse() { " (lapsed)" } else { "" }
                    );
                    if let Some(switch) = session.last_switch() {
                        println!("Switched from {} to {}", switch.from_line, switch.to_line);
                    }
                }
            }
            "hint" | "h" => {
                let text = session.hint().unwrap_or_else(|| String::from("Hints are only available in practice."));
                if json {
                    emit_json("hint", &text, session)?;
                } else {
                    println!("{}", text);
                }
            }
            "reveal" => {
                let text = session.reveal().unwrap_or_else(|| String::from("Reveal is only available in practice."));
                if json {
                    emit_json("reveal", &text, session)?;
                } else {
                    println!("{}", text);
                }
            }
            "undo" | "u" => {
                let undone = session.undo();
                if json {
                    emit_json("undo", &undone, session)?;
                } else if !undone {
                    println!("Nothing to undo.");
                }
            }
            "restart" => {
                let signals = session.restart(rng)?;
                if json {
                    emit_json("restart", &signals.line_id, session)?;
                } else {
                    println!("Restarted {}.", signals.line_name.unwrap_or_default());
                }
            }
            mv => match session.play(mv, rng) {
                Ok(outcome) => {
                    if json {
                        emit_json("move", &outcome, session)?;
                    } else {
                        println!("{}", describe(&outcome));
                    }
                }
                Err(e @ (GymError::NotLearnerTurn | GymError::OutOfLine)) => {
                    if json {
                        println!("{}", serde_json::to_string(&JsonOutput::<()>::err(e.to_string()))?);
                    } else {
                        println!("{}", e);
                    }
                }
                Err(e) => return Err(e.into()),
            },
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
