//! Shared power readings
//!
//! Producers append readings from their own thread or task; the forecast
//! worker only ever takes a snapshot of the tail through [`ReadingSource`].

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use wattcast_common::{Result, WattcastError};

/// Timestamp format shared by reading input and forecast output
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single power reading
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Local>,
    pub value: f64,
}

impl Reading {
    pub fn new(timestamp: DateTime<Local>, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// A reading stamped with the current time
    pub fn now(value: f64) -> Self {
        Self::new(Local::now(), value)
    }

    /// Parse `value` or `YYYY-MM-DD HH:MM:SS,value`
    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.trim();

        let (timestamp, value) = match line.split_once(',') {
            Some((ts, value)) => (Some(parse_timestamp(ts.trim())?), value.trim()),
            None => (None, line),
        };

        let value: f64 = value
            .parse()
            .map_err(|_| WattcastError::parse(format!("invalid reading value {:?}", value)))?;
        if !value.is_finite() {
            return Err(WattcastError::parse(format!("non-finite reading value {}", value)));
        }

        Ok(match timestamp {
            Some(ts) => Self::new(ts, value),
            None => Self::now(value),
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map_err(|e| WattcastError::parse(format!("invalid timestamp {:?}: {}", s, e)))?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| WattcastError::parse(format!("timestamp {:?} does not exist locally", s)))
}

/// Thread-safe read access to an ordered reading sequence
pub trait ReadingSource: Send + Sync {
    /// Number of readings currently held
    fn len(&self) -> usize;

    /// Clone of the most recent `n` readings, oldest first; fewer if not enough exist
    fn snapshot_last(&self, n: usize) -> Vec<Reading>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded, append-only reading buffer shared between producers and the worker
///
/// Clones share the same storage.
#[derive(Debug, Clone)]
pub struct ReadingBuffer {
    inner: Arc<RwLock<VecDeque<Reading>>>,
    capacity: usize,
}

impl ReadingBuffer {
    /// Create a buffer retaining at most `capacity` readings
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append a reading, evicting the oldest once full
    pub fn push(&self, reading: Reading) {
        let mut readings = self.inner.write();
        if readings.len() >= self.capacity {
            readings.pop_front();
        }
        readings.push_back(reading);
    }

    /// Append many readings under one lock
    pub fn extend<I: IntoIterator<Item = Reading>>(&self, items: I) {
        let mut readings = self.inner.write();
        for reading in items {
            if readings.len() >= self.capacity {
                readings.pop_front();
            }
            readings.push_back(reading);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent reading, if any
    pub fn latest(&self) -> Option<Reading> {
        self.inner.read().back().cloned()
    }
}

impl ReadingSource for ReadingBuffer {
    fn len(&self) -> usize {
        self.inner.read().len()
    }

    fn snapshot_last(&self, n: usize) -> Vec<Reading> {
        let readings = self.inner.read();
        let skip = readings.len().saturating_sub(n);
        readings.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn buffer_with(values: &[f64], capacity: usize) -> ReadingBuffer {
        let buffer = ReadingBuffer::new(capacity);
        buffer.extend(values.iter().map(|&v| Reading::now(v)));
        buffer
    }

    #[test]
    fn test_snapshot_last() {
        let buffer = buffer_with(&[1.0, 2.0, 3.0, 4.0], 10);

        let tail: Vec<f64> = buffer.snapshot_last(2).iter().map(|r| r.value).collect();
        assert_eq!(tail, vec![3.0, 4.0]);

        // asking for more than exists returns everything
        assert_eq!(buffer.snapshot_last(10).len(), 4);
        assert!(buffer.snapshot_last(0).is_empty());
    }

    #[test]
    fn test_capacity_eviction() {
        let buffer = buffer_with(&[1.0, 2.0, 3.0], 2);

        assert_eq!(buffer.capacity(), 2);
        assert_eq!(buffer.len(), 2);
        let values: Vec<f64> = buffer.snapshot_last(5).iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2.0, 3.0]);
        assert_eq!(buffer.latest().map(|r| r.value), Some(3.0));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let buffer = buffer_with(&[1.0, 2.0], 0);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.latest().map(|r| r.value), Some(2.0));
    }

    #[test]
    fn test_clones_share_storage() {
        let producer = ReadingBuffer::new(8);
        let consumer = producer.clone();

        producer.push(Reading::now(5.0));

        assert_eq!(consumer.len(), 1);
        assert!(!consumer.is_empty());
    }

    #[test]
    fn test_concurrent_appends() {
        let buffer = ReadingBuffer::new(1000);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        buffer.push(Reading::now((t * 100 + i) as f64));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buffer.len(), 400);
    }

    #[test]
    fn test_parse_line_value_only() {
        let reading = Reading::parse_line("  512.5 ").unwrap();
        assert_eq!(reading.value, 512.5);
    }

    #[test]
    fn test_parse_line_with_timestamp() {
        let reading = Reading::parse_line("2024-06-21 12:30:05, 118").unwrap();

        assert_eq!(reading.value, 118.0);
        assert_eq!(reading.timestamp.year(), 2024);
        assert_eq!(reading.timestamp.hour(), 12);
        assert_eq!(reading.timestamp.second(), 5);
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        assert!(Reading::parse_line("watts").is_err());
        assert!(Reading::parse_line("NaN").is_err());
        assert!(Reading::parse_line("2024-13-40 00:00:00,1").is_err());
    }
}
