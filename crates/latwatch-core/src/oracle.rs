//! Score oracle contract.
//!
//! The pipeline only ever talks to the scoring engine through this trait:
//! insert a window under a fresh index, read back the ensemble score for that
//! index, forget the oldest index once capacity is reached, and rebuild the
//! whole ensemble on a full reset.

use crate::error::OracleError;
use crate::shingle::Window;

pub trait ScoreOracle: Send {
    /// Admit `window` under `index` into every ensemble member.
    fn insert(&mut self, window: &Window, index: u64) -> Result<(), OracleError>;

    /// Per-member anomaly score (CoDisp) for a live index.
    fn member_scores(&self, index: u64) -> Result<Vec<f64>, OracleError>;

    /// Arithmetic mean of [`ScoreOracle::member_scores`].
    fn score(&self, index: u64) -> Result<f64, OracleError> {
        let scores = self.member_scores(index)?;
        if scores.is_empty() {
            return Err(OracleError::EmptyEnsemble);
        }
        Ok(scores.iter().sum::<f64>() / scores.len() as f64)
    }

    /// Drop `index` from every member. Returns `false` when it was not live;
    /// that case is never an error.
    fn forget(&mut self, index: u64) -> bool;

    fn contains(&self, index: u64) -> bool;

    /// Number of indices currently held
    fn live_count(&self) -> usize;

    /// A fresh, empty ensemble with the same configuration.
    fn rebuild(&self) -> Result<Self, OracleError>
    where
        Self: Sized;
}
