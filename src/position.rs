use std::fmt;

use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Position};

use crate::error::{GymError, Result};
use crate::models::Side;

#[cfg(test)]
pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Board placement, side to move, castling rights and en-passant square of a
/// FEN. Move counters are dropped so transpositions compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey(String);

impl PositionKey {
    pub fn from_fen(fen: &str) -> Self {
        let trimmed = fen.trim();
        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        if parts.len() < 4 {
            return Self(trimmed.to_string());
        }
        Self(parts[..4].join(" "))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn side_to_move(&self) -> Option<Side> {
        match self.0.split_whitespace().nth(1) {
            Some("w") => Some(Side::White),
            Some("b") => Some(Side::Black),
            _ => None,
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    pub fen: String,
    pub uci: String,
    pub san: String,
    pub is_capture: bool,
}

/// The chess rules collaborator. Positions travel as FEN strings so callers
/// never hold engine-specific board state.
pub trait PositionEngine {
    /// Parses a position and returns it in canonical FEN form. `"start"` and
    /// the empty string name the initial position.
    fn load(&self, fen: &str) -> Result<String>;

    /// Plays a coordinate-notation move. Illegal or unparsable moves are
    /// reported as `GymError::IllegalMove` and leave nothing changed.
    fn apply_move(&self, fen: &str, mv: &str) -> Result<AppliedMove>;

    fn legal_moves(&self, fen: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ShakmatyEngine;

impl ShakmatyEngine {
    pub fn new() -> Self {
        Self
    }

    fn position(fen: &str) -> Result<Chess> {
        let trimmed = fen.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("start") {
            return Ok(Chess::default());
        }

        let parsed: Fen = trimmed.parse().map_err(|e| GymError::InvalidPosition {
            fen: fen.to_string(),
            reason: format!("{}", e),
        })?;

        parsed
            .into_position(CastlingMode::Standard)
            .map_err(|e| GymError::InvalidPosition {
                fen: fen.to_string(),
                reason: format!("{}", e),
            })
    }

    fn fen_of(pos: &Chess) -> String {
        Fen::from_position(pos, EnPassantMode::Legal).to_string()
    }
}

impl PositionEngine for ShakmatyEngine {
    fn load(&self, fen: &str) -> Result<String> {
        let pos = Self::position(fen)?;
        Ok(Self::fen_of(&pos))
    }

    fn apply_move(&self, fen: &str, mv: &str) -> Result<AppliedMove> {
        let pos = Self::position(fen)?;
        let illegal = || GymError::IllegalMove {
            mv: mv.to_string(),
            fen: fen.to_string(),
        };

        let uci: UciMove = mv.trim().parse().map_err(|_| illegal())?;
        let m = uci.to_move(&pos).map_err(|_| illegal())?;

        let san = San::from_move(&pos, m.clone()).to_string();
        let uci_text = m.to_uci(CastlingMode::Standard).to_string();
        let is_capture = m.is_capture();

        let next = pos.play(m).map_err(|_| illegal())?;

        Ok(AppliedMove {
            fen: Self::fen_of(&next),
            uci: uci_text,
            san,
            is_capture,
        })
    }

    fn legal_moves(&self, fen: &str) -> Result<Vec<String>> {
        let pos = Self::position(fen)?;
        Ok(pos
            .legal_moves()
            .iter()
            .map(|m| m.to_uci(CastlingMode::Standard).to_string())
            .collect())
    }
}
