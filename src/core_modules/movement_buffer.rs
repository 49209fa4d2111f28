// THEORY:
// While a grasped object is carried, the pick-and-place layer records where it
// was recently. When the object is finally set down, the trajectory is read
// backwards to find where the lowering motion began. The buffer is bounded two
// ways: samples older than `window` seconds (relative to the newest sample)
// fall off the front, and a hard `capacity` cap protects against very high
// update rates.

use glam::DVec3;
use std::collections::VecDeque;

/// A timestamped location of the grasped object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementSample {
    pub time: f64,
    pub location: DVec3,
}

#[derive(Debug, Clone)]
pub struct MovementBuffer {
    samples: VecDeque<MovementSample>,
    window: f64,
    capacity: usize,
}

impl MovementBuffer {
    pub fn new(window: f64, capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            window,
            capacity: capacity.max(1),
        }
    }

    /// Appends a sample and evicts whatever falls outside the window.
    pub fn push(&mut self, time: f64, location: DVec3) {
        self.samples.push_back(MovementSample { time, location });
        while let Some(front) = self.samples.front() {
            if time - front.time > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn oldest(&self) -> Option<&MovementSample> {
        self.samples.front()
    }

    pub fn newest(&self) -> Option<&MovementSample> {
        self.samples.back()
    }

    /// Iterates oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MovementSample> {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_samples_fall_out_of_the_window() {
        let mut buffer = MovementBuffer::new(1.0, 100);
        for i in 0..=30 {
            buffer.push(i as f64 * 0.1, DVec3::new(0.0, 0.0, i as f64));
        }
        let oldest = buffer.oldest().unwrap();
        let newest = buffer.newest().unwrap();
        assert!(newest.time - oldest.time <= 1.0);
        assert_eq!(newest.location.z, 30.0);
        assert!(buffer.len() <= 11);
    }

    #[test]
    fn capacity_caps_the_sample_count() {
        let mut buffer = MovementBuffer::new(100.0, 4);
        for i in 0..10 {
            buffer.push(i as f64, DVec3::ZERO);
        }
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.oldest().unwrap().time, 6.0);
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.newest().is_none());
    }
}
