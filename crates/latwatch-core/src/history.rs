//! Bounded records of recent samples and scores for reporting.
//!
//! Independent of the oracle: these are plain rings the presentation layer
//! copies out of.

use serde::Serialize;
use std::collections::VecDeque;

/// One scored window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreRecord {
    pub index: u64,
    pub score: f64,
    /// Newest sample value of the scored window
    pub latest_value: f64,
    pub is_anomaly: bool,
}

/// Most recent `capacity` score records, oldest first
#[derive(Debug, Clone)]
pub struct ScoreHistory {
    records: VecDeque<ScoreRecord>,
    capacity: usize,
}

impl ScoreHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: ScoreRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&ScoreRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoreRecord> {
        self.records.iter()
    }

    /// Re-flag the retained records against an arbitrary threshold.
    pub fn anomalies(&self, threshold: f64) -> Vec<ScoreRecord> {
        self.records
            .iter()
            .filter(|r| r.score > threshold)
            .copied()
            .collect()
    }

    pub fn to_vec(&self) -> Vec<ScoreRecord> {
        self.records.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Most recent raw sample values, for plotting alongside scores
#[derive(Debug, Clone)]
pub struct SampleHistory {
    values: VecDeque<f64>,
    capacity: usize,
}

impl SampleHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }
}
