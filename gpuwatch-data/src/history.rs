//! Bounded trend series backing the dashboard charts.

use crate::error::HistoryError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, fmt::Debug, hash::Hash};

/// One labelled sample of a trend series.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, derive_more::Constructor)]
pub struct HistoryPoint {
    pub label: String,
    pub value: f64,
}

/// Dashboard trend series.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    derive_more::Display,
)]
pub enum SeriesId {
    #[display("compute-price")]
    ComputePrice,
    #[display("token-price")]
    TokenPrice,
    #[display("grid-load")]
    GridLoad,
}

impl SeriesId {
    pub const ALL: [SeriesId; 3] = [
        SeriesId::ComputePrice,
        SeriesId::TokenPrice,
        SeriesId::GridLoad,
    ];
}

/// Ring buffer holding the `capacity` most recent points.
#[derive(Debug, Clone, PartialEq)]
pub struct PointBuffer {
    points: VecDeque<HistoryPoint>,
    capacity: usize,
}

impl PointBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, point: HistoryPoint) {
        if self.capacity == 0 {
            return;
        }
        if self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.back()
    }

    /// Owned copy, oldest first.
    pub fn to_vec(&self) -> Vec<HistoryPoint> {
        self.points.iter().cloned().collect()
    }
}

/// Fixed set of independent [`PointBuffer`]s sharing one capacity.
///
/// Series are registered at construction; pushing to any other key is a
/// programming error and is reported as [`HistoryError::UnknownSeries`].
#[derive(Debug, Clone)]
pub struct HistoryRing<K> {
    series: IndexMap<K, PointBuffer>,
    capacity: usize,
}

impl<K> HistoryRing<K>
where
    K: Clone + Eq + Hash + Debug,
{
    pub fn new<I>(series: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = K>,
    {
        Self {
            series: series
                .into_iter()
                .map(|key| (key, PointBuffer::new(capacity)))
                .collect(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn series_ids(&self) -> impl Iterator<Item = &K> {
        self.series.keys()
    }

    pub fn push(&mut self, id: &K, point: HistoryPoint) -> Result<(), HistoryError> {
        let buffer = self
            .series
            .get_mut(id)
            .ok_or_else(|| HistoryError::UnknownSeries(format!("{id:?}")))?;
        buffer.push(point);
        Ok(())
    }

    /// Owned copy of one series, oldest first.
    pub fn snapshot(&self, id: &K) -> Result<Vec<HistoryPoint>, HistoryError> {
        self.series
            .get(id)
            .map(PointBuffer::to_vec)
            .ok_or_else(|| HistoryError::UnknownSeries(format!("{id:?}")))
    }

    /// Owned copy of every series in registration order.
    pub fn snapshot_all(&self) -> IndexMap<K, Vec<HistoryPoint>> {
        self.series
            .iter()
            .map(|(id, buffer)| (id.clone(), buffer.to_vec()))
            .collect()
    }

    pub fn latest(&self, id: &K) -> Option<&HistoryPoint> {
        self.series.get(id).and_then(PointBuffer::latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(value: f64) -> HistoryPoint {
        HistoryPoint::new(format!("t{value}"), value)
    }

    #[test]
    fn test_point_buffer_ring_behaviour() {
        let capacity = 20;
        let mut buffer = PointBuffer::new(capacity);

        for i in 0..=capacity {
            buffer.push(point(i as f64));
        }

        assert_eq!(buffer.len(), capacity);
        assert_eq!(buffer.to_vec()[0], point(1.0));
        assert_eq!(buffer.latest(), Some(&point(capacity as f64)));
    }

    #[test]
    fn test_history_ring_series_are_independent() {
        let mut ring = HistoryRing::new(SeriesId::ALL, 3);

        for i in 0..5 {
            ring.push(&SeriesId::ComputePrice, point(i as f64)).unwrap();
        }
        ring.push(&SeriesId::GridLoad, point(9.0)).unwrap();

        let compute = ring.snapshot(&SeriesId::ComputePrice).unwrap();
        let values: Vec<_> = compute.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert_eq!(ring.snapshot(&SeriesId::GridLoad).unwrap(), vec![point(9.0)]);
        assert!(ring.snapshot(&SeriesId::TokenPrice).unwrap().is_empty());
    }

    #[test]
    fn test_history_ring_unknown_series_fails() {
        let mut ring = HistoryRing::new([SeriesId::ComputePrice], 5);

        let actual = ring.push(&SeriesId::GridLoad, point(1.0));
        assert_eq!(
            actual,
            Err(HistoryError::UnknownSeries("GridLoad".to_string()))
        );
        assert!(ring.snapshot(&SeriesId::TokenPrice).is_err());
    }

    #[test]
    fn test_history_snapshot_is_detached() {
        let mut ring = HistoryRing::new(["a"], 2);
        ring.push(&"a", point(1.0)).unwrap();

        let snapshot = ring.snapshot_all();
        ring.push(&"a", point(2.0)).unwrap();
        ring.push(&"a", point(3.0)).unwrap();

        assert_eq!(snapshot["a"], vec![point(1.0)]);
        assert_eq!(ring.snapshot(&"a").unwrap(), vec![point(2.0), point(3.0)]);
    }
}
