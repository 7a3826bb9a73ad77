use rand::Rng;

use crate::models::{Line, ReviewRecord};
use crate::scheduler;

/// Source of uniform randomness for leaf and line choice. Any `rand::Rng`
/// qualifies; tests can script exact draws.
pub trait RandomSource {
    /// Uniform value in `[0, 1)`.
    fn next_unit(&mut self) -> f64;

    /// Uniform index in `0..n`. `n` must be non-zero.
    fn next_index(&mut self, n: usize) -> usize {
        let idx = (self.next_unit() * n as f64) as usize;
        idx.min(n - 1)
    }
}

impl<R: Rng> RandomSource for R {
    fn next_unit(&mut self) -> f64 {
        self.gen::<f64>()
    }

    fn next_index(&mut self, n: usize) -> usize {
        self.gen_range(0..n)
    }
}

/// Roulette-wheel pick: draw in `[0, total)` and subtract weights in order
/// until the remainder drops to zero or below. Non-finite or non-positive
/// weights count as 1.
pub fn weighted_pick<'a, T, F, R>(items: &'a [T], weight: F, rng: &mut R) -> Option<&'a T>
where
    F: Fn(&T) -> f64,
    R: RandomSource + ?Sized,
{
    if items.is_empty() {
        return None;
    }

    let weights: Vec<f64> = items
        .iter()
        .map(|item| {
            let w = weight(item);
            if w.is_finite() && w > 0.0 {
                w
            } else {
                1.0
            }
        })
        .collect();

    let total: f64 = weights.iter().sum();
    let mut remaining = rng.next_unit() * total;

    for (i, w) in weights.iter().enumerate() {
        remaining -= w;
        if remaining <= 0.0 {
            return Some(&items[i]);
        }
    }

    // Rounding can leave a sliver above zero
    items.first()
}

/// A line offered to the selector with its review record.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub line: &'a Line,
    pub record: ReviewRecord,
}

/// Picks the next line to train. With `due_only` the pool is narrowed to due
/// lines, falling back to the whole pool when none are due.
pub fn select_line<'a, 'c, R>(
    pool: &'c [Candidate<'a>],
    due_only: bool,
    today: chrono::NaiveDate,
    rng: &mut R,
) -> Option<&'c Candidate<'a>>
where
    R: RandomSource + ?Sized,
{
    let filtered: Vec<&Candidate<'a>> = if due_only {
        let due: Vec<&Candidate<'a>> = pool
            .iter()
            .filter(|c| scheduler::is_due(&c.record, today))
            .collect();
        if due.is_empty() {
            pool.iter().collect()
        } else {
            due
        }
    } else {
        pool.iter().collect()
    };

    weighted_pick(
        &filtered,
        |c| scheduler::selection_weight(c.line, &c.record),
        rng,
    )
    .copied()
}
