pub mod types;

pub use types::{
    agreement_score, clamp_unit, close_returns, Bar, Direction, PredictionRecord,
    ValidationScores,
};
