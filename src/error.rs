use thiserror::Error;

#[derive(Debug, Error)]
pub enum GymError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid position '{fen}': {reason}")]
    InvalidPosition { fen: String, reason: String },

    #[error("illegal move '{mv}' in position '{fen}'")]
    IllegalMove { mv: String, fen: String },

    #[error("unknown opening '{0}'")]
    UnknownOpening(String),

    #[error("unknown line '{line_id}' in opening '{opening_id}'")]
    UnknownLine { opening_id: String, line_id: String },

    #[error("line '{line_id}' has no drill side configured")]
    MissingDrillSide { line_id: String },

    #[error("no trainable path in line '{line_id}'")]
    NoPlan { line_id: String },

    #[error("no lines available in opening '{0}'")]
    NoLines(String),

    #[error("it is not the learner's turn")]
    NotLearnerTurn,

    #[error("the session has already finished")]
    SessionFinished,

    #[error("no line is being trained")]
    NoActiveSession,

    #[error("the position has left the line; undo or restart")]
    OutOfLine,

    #[error("invalid quality '{0}': use fail, pass or perfect")]
    InvalidQuality(String),
}

pub type Result<T> = std::result::Result<T, GymError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_drill_side_names_the_line() {
        let err = GymError::MissingDrillSide {
            line_id: "najdorf-6bg5".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "line 'najdorf-6bg5' has no drill side configured"
        );
    }

    #[test]
    fn rusqlite_errors_convert() {
        let err: GymError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, GymError::Db(_)));
    }
}
