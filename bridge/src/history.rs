//! Bounded in-memory log of decoded readings.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decoder::SensorReading;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedReading {
    pub timestamp: DateTime<Utc>,
    pub tag_uid: Option<String>,
    #[serde(flatten)]
    pub reading: SensorReading,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub min: f32,
    pub max: f32,
    pub avg: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Statistics {
    pub count: usize,
    pub temperature: Summary,
    pub ph: Summary,
    pub glucose: Summary,
}

/// Keeps the newest `capacity` readings; older ones are dropped.
#[derive(Debug, Clone)]
pub struct ReadingHistory {
    readings: VecDeque<TimestampedReading>,
    capacity: usize,
}

impl Default for ReadingHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ReadingHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: TimestampedReading) {
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(entry);
    }

    pub fn record(&mut self, reading: SensorReading, tag_uid: Option<String>) {
        self.push(TimestampedReading {
            timestamp: Utc::now(),
            tag_uid,
            reading,
        });
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn all(&self) -> Vec<TimestampedReading> {
        self.readings.iter().cloned().collect()
    }

    /// The last `count` readings, oldest first.
    pub fn recent(&self, count: usize) -> Vec<TimestampedReading> {
        let skip = self.readings.len().saturating_sub(count);
        self.readings.iter().skip(skip).cloned().collect()
    }

    /// Readings taken at or after `timestamp`, oldest first.
    pub fn since(&self, timestamp: DateTime<Utc>) -> Vec<TimestampedReading> {
        self.readings
            .iter()
            .filter(|entry| entry.timestamp >= timestamp)
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }

    pub fn latest(&self) -> Option<&TimestampedReading> {
        self.readings.back()
    }

    pub fn statistics(&self) -> Option<Statistics> {
        let readings = || self.readings.iter().map(|entry| entry.reading);
        Some(Statistics {
            count: self.readings.len(),
            temperature: summarize(readings().map(|r| r.temperature_celsius))?,
            ph: summarize(readings().map(|r| r.ph))?,
            glucose: summarize(readings().map(|r| r.glucose_mgdl))?,
        })
    }
}

fn summarize(values: impl Iterator<Item = f32>) -> Option<Summary> {
    let mut count = 0usize;
    let mut sum = 0.0f64;
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for value in values {
        count += 1;
        sum += f64::from(value);
        min = min.min(value);
        max = max.max(value);
    }
    (count > 0).then(|| Summary {
        min,
        max,
        avg: (sum / count as f64) as f32,
    })
}
