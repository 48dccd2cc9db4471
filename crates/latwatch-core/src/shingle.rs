//! Stride-1 sliding windows ("shingles") over a scalar stream.

use serde::Serialize;
use std::collections::VecDeque;

/// An owned snapshot of the most recent `shingle_size` values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Window {
    values: Vec<f64>,
}

impl Window {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Newest value in the window
    pub fn latest(&self) -> Option<f64> {
        self.values.last().copied()
    }
}

/// Fixed-capacity ring of recent values that emits one window per push once
/// warm.
#[derive(Debug, Clone)]
pub struct ShingleBuffer {
    buffer: VecDeque<f64>,
    shingle_size: usize,
}

impl ShingleBuffer {
    pub fn new(shingle_size: usize) -> Self {
        let shingle_size = shingle_size.max(1);
        Self {
            buffer: VecDeque::with_capacity(shingle_size),
            shingle_size,
        }
    }

    /// Append a value; returns a window iff the buffer is full afterwards.
    pub fn push(&mut self, value: f64) -> Option<Window> {
        if self.buffer.len() == self.shingle_size {
            self.buffer.pop_front();
        }
        self.buffer.push_back(value);

        if self.buffer.len() < self.shingle_size {
            return None;
        }
        Some(Window::new(self.buffer.iter().copied().collect()))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_warm(&self) -> bool {
        self.buffer.len() == self.shingle_size
    }

    pub fn shingle_size(&self) -> usize {
        self.shingle_size
    }

    /// Pending values, oldest first
    pub fn contents(&self) -> Vec<f64> {
        self.buffer.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
