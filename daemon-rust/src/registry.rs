//! registry.rs — active poller bookkeeping
//!
//! One serial device, one stream: reconfiguring a probe or receiver must
//! fully stop the previous worker before the replacement opens the port,
//! otherwise two shells fight over the same tty.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::modbus::{ModbusSensorPoller, SensorConfig};
use crate::nmea::{GnssConfig, NmeaLocationProvider};

use soil_types::CalibrationTable;

#[derive(Default)]
pub struct PollerRegistry {
    sensor: Mutex<Option<Arc<ModbusSensorPoller>>>,
    gnss: Mutex<Option<Arc<NmeaLocationProvider>>>,
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the sensor poller: stop whatever is running, then start a
    /// worker for the new configuration.
    pub async fn start_sensor(
        &self,
        cfg: SensorConfig,
        calibration: CalibrationTable,
    ) -> Arc<ModbusSensorPoller> {
        let mut slot = self.sensor.lock().await;
        if let Some(old) = slot.take() {
            tracing::info!(device = %old.device(), "stopping previous sensor poller");
            old.stop().await;
        }
        let poller = Arc::new(ModbusSensorPoller::new(cfg, calibration));
        poller.start().await;
        *slot = Some(Arc::clone(&poller));
        poller
    }

    pub async fn start_gnss(&self, cfg: GnssConfig) -> Arc<NmeaLocationProvider> {
        let mut slot = self.gnss.lock().await;
        if let Some(old) = slot.take() {
            old.stop().await;
        }
        let provider = Arc::new(NmeaLocationProvider::new(cfg));
        provider.start().await;
        *slot = Some(Arc::clone(&provider));
        provider
    }

    pub async fn sensor(&self) -> Option<Arc<ModbusSensorPoller>> {
        self.sensor.lock().await.clone()
    }

    pub async fn gnss(&self) -> Option<Arc<NmeaLocationProvider>> {
        self.gnss.lock().await.clone()
    }

    /// Stop everything. Used on shutdown and before wholesale reconfiguration.
    pub async fn stop_all(&self) {
        if let Some(poller) = self.sensor.lock().await.take() {
            poller.stop().await;
        }
        if let Some(provider) = self.gnss.lock().await.take() {
            provider.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::PollerState;
    use std::time::Duration;

    fn sensor_cfg(device: &str) -> SensorConfig {
        SensorConfig {
            device: device.to_string(),
            baud: 9600,
            poll_period: Duration::from_millis(100),
            use_root_shell: false,
        }
    }

    #[tokio::test]
    async fn replacing_the_sensor_poller_stops_the_old_one() {
        let registry = PollerRegistry::new();
        let first = registry
            .start_sensor(sensor_cfg("/dev/null"), CalibrationTable::default())
            .await;
        let mut first_state = first.state();

        let second = registry
            .start_sensor(sensor_cfg("/dev/null"), CalibrationTable::default())
            .await;
        assert_eq!(*first_state.borrow_and_update(), PollerState::Idle);
        assert!(!Arc::ptr_eq(&first, &second));

        registry.stop_all().await;
        assert!(registry.sensor().await.is_none());
    }

    #[tokio::test]
    async fn stop_all_is_idempotent() {
        let registry = PollerRegistry::new();
        registry.stop_all().await;
        registry.stop_all().await;
    }
}
