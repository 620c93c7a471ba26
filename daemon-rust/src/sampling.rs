//! sampling.rs — capture sessions over the live reading stream
//!
//! Recording a point means standing still at a spot while the probe keeps
//! polling, then committing the average of everything seen. The session is a
//! pure fold over accepted readings; nothing here touches the serial side.

use soil_types::{Channel, GeoPoint, RecordedPoint, SensorReading};

/// Accumulates readings between `begin` and `commit`.
#[derive(Debug, Clone, Default)]
pub struct CaptureSession {
    count: u32,
    sums: SensorReading,
}

impl CaptureSession {
    pub fn begin() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Fold one accepted reading into the session.
    pub fn observe(mut self, reading: &SensorReading) -> Self {
        for ch in Channel::ALL {
            self.sums.set(ch, self.sums.value(ch) + reading.value(ch));
        }
        self.count += 1;
        self
    }

    /// Per-channel means, or None if nothing was observed.
    pub fn mean(&self) -> Option<SensorReading> {
        if self.count == 0 {
            return None;
        }
        let mut mean = SensorReading::default();
        for ch in Channel::ALL {
            mean.set(ch, self.sums.value(ch) / f64::from(self.count));
        }
        Some(mean)
    }

    /// Finalize the session at a position. Empty sessions commit nothing.
    pub fn commit(self, point: GeoPoint, timestamp_ms: i64) -> Option<RecordedPoint> {
        let mean = self.mean()?;
        let values = Channel::ALL
            .iter()
            .map(|&ch| (ch, mean.value(ch)))
            .collect();
        Some(RecordedPoint {
            point,
            values,
            timestamp_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(ph: f64, nitrogen: f64) -> SensorReading {
        SensorReading {
            ph,
            nitrogen,
            ..Default::default()
        }
    }

    #[test]
    fn empty_session_commits_nothing() {
        let session = CaptureSession::begin();
        assert_eq!(session.count(), 0);
        assert!(session.commit(GeoPoint::new(0.0, 0.0), 0).is_none());
    }

    #[test]
    fn mean_is_per_channel() {
        let session = CaptureSession::begin()
            .observe(&reading(6.0, 40.0))
            .observe(&reading(7.0, 50.0))
            .observe(&reading(8.0, 60.0));
        let mean = session.mean().unwrap();
        assert!((mean.ph - 7.0).abs() < 1e-9);
        assert!((mean.nitrogen - 50.0).abs() < 1e-9);
        assert_eq!(mean.humidity, 0.0);
    }

    #[test]
    fn commit_carries_position_and_all_channels() {
        let point = GeoPoint::new(-26.1955, -52.6717);
        let recorded = CaptureSession::begin()
            .observe(&reading(6.8, 42.0))
            .commit(point, 12345)
            .unwrap();
        assert_eq!(recorded.point, point);
        assert_eq!(recorded.timestamp_ms, 12345);
        assert_eq!(recorded.values.len(), Channel::ALL.len());
        assert!((recorded.values[&Channel::Ph] - 6.8).abs() < 1e-9);
    }

    #[test]
    fn begin_resets_prior_state() {
        let _long = CaptureSession::begin().observe(&reading(9.9, 99.0));
        let fresh = CaptureSession::begin();
        assert_eq!(fresh.count(), 0);
    }
}
