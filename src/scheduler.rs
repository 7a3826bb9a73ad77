use std::cell::RefCell;
use std::collections::HashMap;

use chrono::{Days, Local, NaiveDate};
use tracing::{info, warn};

use crate::error::Result;
use crate::models::{Line, Quality, ReviewDetails, ReviewRecord, MIN_EASE};

/// Persistence for review records, keyed by `opening:line`.
pub trait ReviewStore {
    fn load(&self, key: &str) -> Result<Option<ReviewRecord>>;

    fn save(&self, key: &str, record: &ReviewRecord) -> Result<()>;

    /// Optional audit trail of individual reviews.
    fn log_review(&self, _key: &str, _quality: Quality, _details: &ReviewDetails) -> Result<()> {
        Ok(())
    }
}

/// Process-local store; also the fallback when no database is available.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RefCell<HashMap<String, ReviewRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReviewStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<ReviewRecord>> {
        Ok(self.records.borrow().get(key).cloned())
    }

    fn save(&self, key: &str, record: &ReviewRecord) -> Result<()> {
        self.records
            .borrow_mut()
            .insert(key.to_string(), record.clone());
        Ok(())
    }
}

pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// SM-2 ease adjustment for a quality score.
pub fn ease_delta(quality: Quality) -> f64 {
    let miss = (5 - quality.score()) as f64;
    0.1 - miss * (0.08 + miss * 0.02)
}

/// Applies one completed drill to a record. A lapse resets the interval but
/// keeps the repetition count. Ease has a floor and no ceiling.
pub fn apply_review(record: &mut ReviewRecord, quality: Quality, details: &ReviewDetails, today: NaiveDate) {
    record.last_practiced = Some(today);
    record.stats.completed += 1;
    record.stats.total_attempts += 1;
    record.stats.total_mistakes += details.mistake_count;

    if quality.score() < 3 {
        record.interval_days = 1;
        record.lapses += 1;
    } else {
        record.reps += 1;
        record.interval_days = match record.reps {
            1 => 1,
            2 => 3,
            _ => (record.interval_days as f64 * record.ease).round() as i64,
        };
    }

    if quality == Quality::Perfect {
        record.stats.perfect += 1;
    }

    record.ease = (record.ease + ease_delta(quality)).max(MIN_EASE);
    record.due = Some(add_days(today, record.interval_days));
}

fn add_days(day: NaiveDate, n: i64) -> NaiveDate {
    let n = n.max(0) as u64;
    day.checked_add_days(Days::new(n)).unwrap_or(NaiveDate::MAX)
}

pub fn is_due(record: &ReviewRecord, today: NaiveDate) -> bool {
    match record.due {
        None => true,
        Some(due) => due <= today,
    }
}

/// Relative chance of picking `line` next: priority shrinks with practice.
pub fn selection_weight(line: &Line, record: &ReviewRecord) -> f64 {
    let practiced = 1 + record.stats.completed + record.stats.studied;
    line.effective_priority() / practiced as f64
}

pub fn due_label(record: &ReviewRecord, today: NaiveDate) -> String {
    let Some(due) = record.due else {
        return String::from("Today");
    };
    match (due - today).num_days() {
        d if d <= 0 => String::from("Today"),
        1 => String::from("1 day"),
        d => format!("{} days", d),
    }
}

pub fn due_summary(record: &ReviewRecord, today: NaiveDate) -> String {
    format!(
        "Due: {} • Interval: {}d",
        due_label(record, today),
        record.interval_days
    )
}

pub fn progress_text(record: &ReviewRecord, today: NaiveDate) -> String {
    format!(
        "Completed: {} • Studied: {} • Perfect: {} • {} • Reps: {} • Ease: {:.2}",
        record.stats.completed,
        record.stats.studied,
        record.stats.perfect,
        due_summary(record, today),
        record.reps,
        record.ease
    )
}

/// Reads a record, substituting defaults when it is absent or unreadable.
pub fn load_or_default(store: &dyn ReviewStore, key: &str) -> ReviewRecord {
    match store.load(key) {
        Ok(Some(record)) => record,
        Ok(None) => ReviewRecord::default(),
        Err(e) => {
            warn!(key, error = %e, "review store read failed; using defaults");
            ReviewRecord::default()
        }
    }
}

/// Read-modify-write of one line's record after a completed drill. The
/// updated record is returned even if it could not be persisted.
pub fn record_review(
    store: &dyn ReviewStore,
    key: &str,
    quality: Quality,
    details: &ReviewDetails,
    today: NaiveDate,
) -> ReviewRecord {
    let mut record = load_or_default(store, key);
    apply_review(&mut record, quality, details, today);

    if let Err(e) = store.save(key, &record) {
        warn!(key, error = %e, "review store write failed; keeping record in memory");
    }
    if let Err(e) = store.log_review(key, quality, details) {
        warn!(key, error = %e, "review history write failed");
    }

    info!(
        key,
        quality = quality.as_str(),
        interval = record.interval_days,
        ease = record.ease,
        "review recorded"
    );
    record
}

/// Counts a learning-mode walkthrough without touching the schedule.
pub fn record_study(store: &dyn ReviewStore, key: &str) -> ReviewRecord {
    let mut record = load_or_default(store, key);
    record.stats.studied += 1;
    if let Err(e) = store.save(key, &record) {
        warn!(key, error = %e, "review store write failed; keeping record in memory");
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GymError;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn no_mistakes() -> ReviewDetails {
        ReviewDetails { mistake_count: 0 }
    }

    struct BrokenStore;

    impl ReviewStore for BrokenStore {
        fn load(&self, _key: &str) -> Result<Option<ReviewRecord>> {
            Err(GymError::Db(rusqlite::Error::InvalidQuery))
        }

        fn save(&self, _key: &str, _record: &ReviewRecord) -> Result<()> {
            Err(GymError::Db(rusqlite::Error::InvalidQuery))
        }
    }

    mod ease_tests {
        use super::*;

        #[test]
        fn ease_delta_per_quality() {
            assert!((ease_delta(Quality::Perfect) - 0.1).abs() < 1e-12);
            assert!((ease_delta(Quality::Pass) + 0.14).abs() < 1e-12);
            assert!((ease_delta(Quality::Fail) + 0.54).abs() < 1e-12);
        }

        #[test]
        fn ease_never_drops_below_floor() {
            let mut r = ReviewRecord::default();
            for _ in 0..10 {
                apply_review(&mut r, Quality::Fail, &no_mistakes(), day(2024, 1, 1));
                assert!(r.ease >= MIN_EASE);
            }
            assert_eq!(r.ease, MIN_EASE);
        }

        #[test]
        fn ease_has_no_ceiling() {
            let mut r = ReviewRecord::default();
            for _ in 0..30 {
                apply_review(&mut r, Quality::Perfect, &no_mistakes(), day(2024, 1, 1));
            }
            assert!((r.ease - 5.5).abs() < 1e-9);
        }
    }

    mod review_tests {
        use super::*;

        #[test]
        fn three_perfect_reviews_from_fresh() {
            let store = MemoryStore::new();
            let today = day(2024, 3, 1);

            let r1 = record_review(&store, "o1:l1", Quality::Perfect, &no_mistakes(), today);
            let r2 = record_review(&store, "o1:l1", Quality::Perfect, &no_mistakes(), today);
            let r3 = record_review(&store, "o1:l1", Quality::Perfect, &no_mistakes(), today);

            assert_eq!((r1.reps, r2.reps, r3.reps), (1, 2, 3));
            // third interval: round(3 * 2.7) = 8
            assert_eq!(
                (r1.interval_days, r2.interval_days, r3.interval_days),
                (1, 3, 8)
            );
            assert_eq!(r3.due, Some(day(2024, 3, 9)));
            assert_eq!(r3.stats.perfect, 3);
            assert_eq!(r3.stats.completed, 3);
        }

        #[test]
        fn lapse_keeps_repetitions() {
            let mut r = ReviewRecord::default();
            let today = day(2024, 3, 1);
            apply_review(&mut r, Quality::Perfect, &no_mistakes(), today);
            apply_review(&mut r, Quality::Perfect, &no_mistakes(), today);
            apply_review(&mut r, Quality::Fail, &ReviewDetails { mistake_count: 4 }, today);

            assert_eq!(r.reps, 2);
            assert_eq!(r.lapses, 1);
            assert_eq!(r.interval_days, 1);
            assert_eq!(r.due, Some(day(2024, 3, 2)));
            assert_eq!(r.stats.total_mistakes, 4);
            assert_eq!(r.stats.total_attempts, 3);
            assert_eq!(r.stats.perfect, 2);
        }

        #[test]
        fn review_after_lapse_scales_the_reset_interval() {
            let mut r = ReviewRecord::default();
            let today = day(2024, 3, 1);
            apply_review(&mut r, Quality::Perfect, &no_mistakes(), today);
            apply_review(&mut r, Quality::Perfect, &no_mistakes(), today);
            apply_review(&mut r, Quality::Fail, &no_mistakes(), today);
            // ease 2.7 - 0.54 = 2.16, interval round(1 * 2.16) = 2
            apply_review(&mut r, Quality::Pass, &no_mistakes(), today);
            assert_eq!(r.reps, 3);
            assert_eq!(r.interval_days, 2);
            assert!((r.ease - 2.02).abs() < 1e-9);
        }

        #[test]
        fn pass_does_not_count_as_perfect() {
            let mut r = ReviewRecord::default();
            apply_review(&mut r, Quality::Pass, &ReviewDetails { mistake_count: 2 }, day(2024, 1, 1));
            assert_eq!(r.stats.perfect, 0);
            assert_eq!(r.reps, 1);
            assert_eq!(r.last_practiced, Some(day(2024, 1, 1)));
        }

        #[test]
        fn due_date_crosses_month_boundaries() {
            let mut r = ReviewRecord::default();
            apply_review(&mut r, Quality::Perfect, &no_mistakes(), day(2024, 2, 28));
            apply_review(&mut r, Quality::Perfect, &no_mistakes(), day(2024, 2, 28));
            assert_eq!(r.due, Some(day(2024, 3, 2)));
        }

        #[test]
        fn broken_store_falls_back_to_defaults() {
            let r = record_review(&BrokenStore, "o1:l1", Quality::Perfect, &no_mistakes(), day(2024, 1, 1));
            assert_eq!(r.reps, 1);
            assert_eq!(r.interval_days, 1);
        }

        #[test]
        fn record_study_only_bumps_studied() {
            let store = MemoryStore::new();
            let r = record_study(&store, "o1:l1");
            assert_eq!(r.stats.studied, 1);
            assert_eq!(r.stats.completed, 0);
            assert!(r.due.is_none());
            assert_eq!(load_or_default(&store, "o1:l1").stats.studied, 1);
        }
    }

    mod due_tests {
        use super::*;

        #[test]
        fn no_due_date_is_due() {
            assert!(is_due(&ReviewRecord::default(), day(2024, 1, 1)));
        }

        #[test]
        fn due_today_is_due_tomorrow_is_not() {
            let today = day(2024, 6, 15);
            let mut r = ReviewRecord::default();
            r.due = Some(today);
            assert!(is_due(&r, today));
            r.due = Some(day(2024, 6, 16));
            assert!(!is_due(&r, today));
            r.due = Some(day(2024, 6, 1));
            assert!(is_due(&r, today));
        }

        #[test]
        fn due_labels() {
            let today = day(2024, 6, 15);
            let mut r = ReviewRecord::default();
            assert_eq!(due_label(&r, today), "Today");
            r.due = Some(day(2024, 6, 10));
            assert_eq!(due_label(&r, today), "Today");
            r.due = Some(day(2024, 6, 16));
            assert_eq!(due_label(&r, today), "1 day");
            r.due = Some(day(2024, 6, 22));
            assert_eq!(due_label(&r, today), "7 days");
        }

        #[test]
        fn progress_text_format() {
            let mut r = ReviewRecord::default();
            r.stats.completed = 2;
            r.stats.perfect = 1;
            r.reps = 2;
            r.interval_days = 3;
            let text = progress_text(&r, day(2024, 6, 15));
            assert_eq!(
                text,
                "Completed: 2 • Studied: 0 • Perfect: 1 • Due: Today • Interval: 3d • Reps: 2 • Ease: 2.50"
            );
        }
    }

    mod weight_tests {
        use super::*;

        fn line_with_priority(priority: f64) -> Line {
            Line {
                id: "l1".to_string(),
                opening_id: "o1".to_string(),
                name: String::new(),
                priority,
                drill_side: Some("white".to_string()),
                start_position: None,
            }
        }

        #[test]
        fn weight_is_exact() {
            let mut r = ReviewRecord::default();
            r.stats.completed = 3;
            assert_eq!(selection_weight(&line_with_priority(2.0), &r), 0.5);
        }

        #[test]
        fn studied_counts_like_completed() {
            let mut r = ReviewRecord::default();
            r.stats.completed = 1;
            r.stats.studied = 2;
            assert_eq!(selection_weight(&line_with_priority(1.0), &r), 0.25);
        }

        #[test]
        fn fresh_line_weight_is_priority() {
            assert_eq!(
                selection_weight(&line_with_priority(3.0), &ReviewRecord::default()),
                3.0
            );
        }
    }
}
