//! Reproducible synthetic latency series.
//!
//! Used by `latwatch` when no backend is available and by `latwatch-sim` for
//! offline scoring runs. Every generator is deterministic for a given seed.

use crate::error::SourceError;
use crate::source::{Sample, SampleBatch, SampleSource};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal, Normal};
use std::f64::consts::PI;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Shape of the generated series
#[derive(Debug, Clone, PartialEq)]
pub enum Generator {
    /// Sine wave with a flat segment injected over `plateau`
    SinePlateau {
        amplitude: f64,
        center: f64,
        period: f64,
        phase: f64,
        plateau: Range<u64>,
        plateau_value: f64,
    },
    /// Gaussian noise with fixed spikes at given steps
    NoisySpikes {
        mean: f64,
        std_dev: f64,
        spikes: Vec<(u64, f64)>,
    },
    /// Log-normal latency with occasional multiplicative spikes
    LatencyNoise {
        base_ms: f64,
        sigma: f64,
        spike_probability: f64,
        spike_multiplier: f64,
    },
}

/// Named presets for the generators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    SinePlateau,
    NoisySpikes,
    LatencyNoise,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 3] = [Self::SinePlateau, Self::NoisySpikes, Self::LatencyNoise];

    pub fn name(self) -> &'static str {
        match self {
            Self::SinePlateau => "sine-plateau",
            Self::NoisySpikes => "noisy-spikes",
            Self::LatencyNoise => "latency-noise",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::SinePlateau => "sine wave (A=50, center=100, period=100) with a plateau at 80 over steps 235..255",
            Self::NoisySpikes => "N(50, 5) noise with spikes at steps 20, 55 and 85",
            Self::LatencyNoise => "log-normal gateway latency around 120ms with rare 8x spikes",
        }
    }

    /// Series length the preset was designed around
    pub fn default_len(self) -> usize {
        match self {
            Self::SinePlateau => 730,
            Self::NoisySpikes => 100,
            Self::LatencyNoise => 1000,
        }
    }

    pub fn generator(self) -> Generator {
        match self {
            Self::SinePlateau => Generator::SinePlateau {
                amplitude: 50.0,
                center: 100.0,
                period: 100.0,
                phase: 30.0,
                plateau: 235..255,
                plateau_value: 80.0,
            },
            Self::NoisySpikes => Generator::NoisySpikes {
                mean: 50.0,
                std_dev: 5.0,
                spikes: vec![(20, 70.0), (55, 30.0), (85, 75.0)],
            },
            Self::LatencyNoise => Generator::LatencyNoise {
                base_ms: 120.0,
                sigma: 0.15,
                spike_probability: 0.01,
                spike_multiplier: 8.0,
            },
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScenarioKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|k| k.name()).collect();
                format!("unknown scenario {s}, expected one of {}", names.join(", "))
            })
    }
}

/// Step-indexed series generator
pub struct SyntheticSeries {
    generator: Generator,
    rng: StdRng,
    step: u64,
}

impl SyntheticSeries {
    pub fn new(generator: Generator, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };
        Self {
            generator,
            rng,
            step: 0,
        }
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn next_value(&mut self) -> f64 {
        let t = self.step;
        self.step += 1;

        match &self.generator {
            Generator::SinePlateau {
                amplitude,
                center,
                period,
                phase,
                plateau,
                plateau_value,
            } => {
                if plateau.contains(&t) {
                    *plateau_value
                } else {
                    let omega = 2.0 * PI / period;
                    amplitude * (omega * t as f64 - phase * omega).sin() + center
                }
            }
            Generator::NoisySpikes {
                mean,
                std_dev,
                spikes,
            } => {
                let noise = Normal::new(*mean, *std_dev)
                    .map(|d| d.sample(&mut self.rng))
                    .unwrap_or(*mean);
                spikes
                    .iter()
                    .find(|(at, _)| *at == t)
                    .map_or(noise, |(_, v)| *v)
            }
            Generator::LatencyNoise {
                base_ms,
                sigma,
                spike_probability,
                spike_multiplier,
            } => {
                let latency = LogNormal::new(base_ms.ln(), *sigma)
                    .map(|d| d.sample(&mut self.rng))
                    .unwrap_or(*base_ms);
                if self.rng.random_bool(spike_probability.clamp(0.0, 1.0)) {
                    latency * spike_multiplier
                } else {
                    latency
                }
            }
        }
    }

    pub fn take(&mut self, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.next_value()).collect()
    }
}

/// A [`SampleSource`] backed by a [`SyntheticSeries`]
pub struct SyntheticSource {
    series: SyntheticSeries,
    kind: Option<ScenarioKind>,
    samples_per_poll: usize,
}

impl SyntheticSource {
    pub fn new(series: SyntheticSeries, samples_per_poll: usize) -> Self {
        Self {
            series,
            kind: None,
            samples_per_poll: samples_per_poll.max(1),
        }
    }

    pub fn from_scenario(kind: ScenarioKind, seed: Option<u64>, samples_per_poll: usize) -> Self {
        let mut source = Self::new(SyntheticSeries::new(kind.generator(), seed), samples_per_poll);
        source.kind = Some(kind);
        source
    }
}

#[async_trait]
impl SampleSource for SyntheticSource {
    async fn poll(&mut self) -> Result<SampleBatch, SourceError> {
        Ok((0..self.samples_per_poll)
            .map(|_| Sample::now(self.series.next_value()))
            .collect())
    }

    fn describe(&self) -> String {
        match self.kind {
            Some(kind) => format!("synthetic {} ({} per poll)", kind, self.samples_per_poll),
            None => format!("synthetic ({} per poll)", self.samples_per_poll),
        }
    }
}
