//! modbus.rs — soil probe frame decoding and the polling worker
//!
//! The 8-in-1 probe speaks Modbus RTU: one fixed read-holding-registers
//! request returns 8 big-endian u16 registers in a 21-byte frame. The shell
//! side of the transport renders each frame as a hex line; this module
//! validates header and CRC, scales the registers into engineering units,
//! applies the calibration table, and publishes the reading on a watch slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;

use soil_types::{CalibrationTable, Channel, SensorReading};

use crate::serial::{LinkGuard, SerialChannel, ShellScript, RESPONSE_LEN};

/// Fixed request: slave 1, function 3, start 0, count 8, CRC 0x0C44 (LE).
pub const REQUEST: [u8; 8] = [0x01, 0x03, 0x00, 0x00, 0x00, 0x08, 0x44, 0x0C];

/// Response header: slave 1, function 3, 16 payload bytes.
const HEADER: [u8; 3] = [0x01, 0x03, 0x10];

/// Base reconnect delay; doubles per consecutive failure.
const BACKOFF_BASE: Duration = Duration::from_millis(300);
const BACKOFF_CAP: Duration = Duration::from_secs(5);
const BACKOFF_MAX_ATTEMPT: u32 = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {got} bytes, need {RESPONSE_LEN}")]
    TooShort { got: usize },
    #[error("unexpected header {0:02x?}")]
    BadHeader([u8; 3]),
    #[error("crc mismatch: computed {computed:#06x}, frame carries {carried:#06x}")]
    CrcMismatch { computed: u16, carried: u16 },
}

/// CRC-16/Modbus: polynomial 0xA001 (reflected), initial value 0xFFFF.
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Tokenize one `od -An -tx1` output line into bytes. Non-hex tokens poison
/// the whole line; an empty line yields an empty vec.
pub fn parse_hex_line(line: &str) -> Option<Vec<u8>> {
    line.split_whitespace()
        .map(|tok| u8::from_str_radix(tok, 16).ok())
        .collect()
}

/// Validate a raw frame and decode its registers into a calibrated reading.
///
/// Register order matches [`Channel::ALL`]. Raw N/P/K registers are
/// multiplied by the configured soil density before calibration; every
/// channel is then divided by its wire scale and run through its affine
/// calibration entry.
pub fn decode_frame(bytes: &[u8], cal: &CalibrationTable) -> Result<SensorReading, FrameError> {
    if bytes.len() < RESPONSE_LEN {
        return Err(FrameError::TooShort { got: bytes.len() });
    }
    let frame = &bytes[..RESPONSE_LEN];
    if frame[..3] != HEADER {
        return Err(FrameError::BadHeader([frame[0], frame[1], frame[2]]));
    }
    let computed = crc16_modbus(&frame[..RESPONSE_LEN - 2]);
    let carried = u16::from(frame[RESPONSE_LEN - 2]) | (u16::from(frame[RESPONSE_LEN - 1]) << 8);
    if computed != carried {
        return Err(FrameError::CrcMismatch { computed, carried });
    }

    let mut reading = SensorReading::default();
    for (i, &channel) in Channel::ALL.iter().enumerate() {
        let hi = frame[3 + 2 * i];
        let lo = frame[4 + 2 * i];
        let mut raw = f64::from(u16::from_be_bytes([hi, lo]));
        if channel.is_npk() {
            raw *= cal.soil_density;
        }
        let value = cal.entry(channel).apply(raw / channel.scale());
        reading.set(channel, value);
    }
    Ok(reading)
}

// ── Poller ────────────────────────────────────────────────────────────────────

/// Lifecycle of the polling worker, published for status consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Connecting,
    Streaming,
    Backoff,
}

#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub device: String,
    pub baud: u32,
    pub poll_period: Duration,
    pub use_root_shell: bool,
}

/// Background worker that keeps a probe stream open, decodes frames, and
/// publishes the latest reading. Reconnects with exponential backoff;
/// `stop` is idempotent and tears the shell down to unblock the reader.
pub struct ModbusSensorPoller {
    cfg: SensorConfig,
    calibration: Arc<CalibrationTable>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    link: Arc<Mutex<Option<LinkGuard>>>,
    reading_tx: watch::Sender<Option<SensorReading>>,
    state_tx: watch::Sender<PollerState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ModbusSensorPoller {
    pub fn new(cfg: SensorConfig, calibration: CalibrationTable) -> Self {
        let (reading_tx, _) = watch::channel(None);
        let (state_tx, _) = watch::channel(PollerState::Idle);
        Self {
            cfg,
            calibration: Arc::new(calibration),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            link: Arc::new(Mutex::new(None)),
            reading_tx,
            state_tx,
            task: Mutex::new(None),
        }
    }

    /// Latest decoded reading; `None` until the first good frame.
    pub fn subscribe(&self) -> watch::Receiver<Option<SensorReading>> {
        self.reading_tx.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<PollerState> {
        self.state_tx.subscribe()
    }

    pub fn device(&self) -> &str {
        &self.cfg.device
    }

    /// Spawn the worker. A second call while running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        *self.task.lock().await = Some(handle);
    }

    /// Stop the worker and wait for it to wind down. Safe to call twice.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        if let Some(mut guard) = self.link.lock().await.take() {
            guard.terminate().await;
        }
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        self.state_tx.send_replace(PollerState::Idle);
    }

    fn channel(&self) -> SerialChannel {
        if self.cfg.use_root_shell {
            SerialChannel::RootShell {
                device: self.cfg.device.clone(),
                baud: self.cfg.baud,
                script: ShellScript::SensorPoll {
                    period_ms: self.cfg.poll_period.as_millis() as u64,
                },
            }
        } else {
            SerialChannel::RawDevice {
                device: self.cfg.device.clone(),
            }
        }
    }

    async fn run(self: Arc<Self>) {
        let mut attempt: u32 = 0;
        while self.running.load(Ordering::SeqCst) {
            self.state_tx.send_replace(PollerState::Connecting);
            match self.channel().open().await {
                Ok((reader, guard)) => {
                    *self.link.lock().await = Some(guard);
                    let healthy = self.stream(reader).await;
                    if let Some(mut guard) = self.link.lock().await.take() {
                        guard.terminate().await;
                    }
                    if healthy {
                        attempt = 0;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, device = %self.cfg.device, "sensor stream open failed");
                }
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.state_tx.send_replace(PollerState::Backoff);
            let delay = backoff_delay(attempt);
            attempt = (attempt + 1).min(BACKOFF_MAX_ATTEMPT);
            tracing::debug!(?delay, attempt, "sensor stream lost, backing off");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.notified() => {}
            }
        }
        self.state_tx.send_replace(PollerState::Idle);
    }

    /// Read hex lines until EOF, error or shutdown. Returns true when at
    /// least one frame decoded, which resets the backoff ladder.
    async fn stream(&self, reader: Box<dyn tokio::io::AsyncRead + Send + Unpin>) -> bool {
        self.state_tx.send_replace(PollerState::Streaming);
        let mut lines = BufReader::new(reader).lines();
        let mut decoded_any = false;
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = self.shutdown.notified() => return decoded_any,
            };
            match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let Some(bytes) = parse_hex_line(&line) else {
                        tracing::warn!(line = %line.trim(), "discarding non-hex sensor line");
                        continue;
                    };
                    match decode_frame(&bytes, &self.calibration) {
                        Ok(reading) => {
                            decoded_any = true;
                            tracing::trace!(?reading, "sensor frame decoded");
                            // send_replace: the slot must hold the latest
                            // reading even while nobody is subscribed.
                            self.reading_tx.send_replace(Some(reading));
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "discarding bad sensor frame");
                        }
                    }
                }
                Ok(None) => {
                    tracing::debug!("sensor stream closed");
                    return decoded_any;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "sensor stream read error");
                    return decoded_any;
                }
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let delay = BACKOFF_BASE * 2u32.pow(attempt.min(BACKOFF_MAX_ATTEMPT));
    delay.min(BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use soil_types::CalibrationEntry;

    // Registers: hum 523, temp 250, ec 1200, ph 68, n 42, p 17, k 88, sal 350.
    const FRAME: [u8; 21] = [
        0x01, 0x03, 0x10, 0x02, 0x0b, 0x00, 0xfa, 0x04, 0xb0, 0x00, 0x44, 0x00, 0x2a, 0x00, 0x11,
        0x00, 0x58, 0x01, 0x5e, 0xa4, 0xb0,
    ];

    #[test]
    fn request_crc_matches_constant() {
        let crc = crc16_modbus(&REQUEST[..6]);
        assert_eq!(crc, 0x0C44);
        assert_eq!(REQUEST[6], (crc & 0xFF) as u8);
        assert_eq!(REQUEST[7], (crc >> 8) as u8);
    }

    #[test]
    fn decodes_and_scales_a_valid_frame() {
        let r = decode_frame(&FRAME, &CalibrationTable::default()).unwrap();
        assert_eq!(r.humidity, 52.3);
        assert_eq!(r.temperature, 25.0);
        assert_eq!(r.conductivity, 1200.0);
        assert_eq!(r.ph, 6.8);
        assert_eq!(r.nitrogen, 42.0);
        assert_eq!(r.phosphorus, 17.0);
        assert_eq!(r.potassium, 88.0);
        assert_eq!(r.salinity, 350.0);
    }

    #[test]
    fn soil_density_scales_npk_only() {
        let mut cal = CalibrationTable::default();
        cal.soil_density = 2.0;
        let r = decode_frame(&FRAME, &cal).unwrap();
        assert_eq!(r.nitrogen, 84.0);
        assert_eq!(r.phosphorus, 34.0);
        assert_eq!(r.potassium, 176.0);
        assert_eq!(r.humidity, 52.3);
        assert_eq!(r.conductivity, 1200.0);
    }

    #[test]
    fn calibration_applies_after_wire_scaling() {
        let mut cal = CalibrationTable::default();
        cal.entries
            .insert(Channel::Ph, CalibrationEntry { a: 1.1, b: -0.2 });
        cal.entries
            .insert(Channel::Temperature, CalibrationEntry { a: 2.0, b: 1.0 });
        let r = decode_frame(&FRAME, &cal).unwrap();
        assert!((r.ph - (1.1 * 6.8 - 0.2)).abs() < 1e-9);
        // Register 250 → 25.0 °C on the wire, 51.0 calibrated.
        assert!((r.temperature - 51.0).abs() < 1e-9);
    }

    #[test]
    fn short_frame_is_rejected() {
        let err = decode_frame(&FRAME[..20], &CalibrationTable::default()).unwrap_err();
        assert_eq!(err, FrameError::TooShort { got: 20 });
    }

    #[test]
    fn bad_header_is_rejected() {
        let mut frame = FRAME;
        frame[0] = 0x02;
        let err = decode_frame(&frame, &CalibrationTable::default()).unwrap_err();
        assert_eq!(err, FrameError::BadHeader([0x02, 0x03, 0x10]));
    }

    #[test]
    fn corrupt_payload_fails_crc() {
        let mut frame = FRAME;
        frame[5] ^= 0x01;
        match decode_frame(&frame, &CalibrationTable::default()) {
            Err(FrameError::CrcMismatch { computed, carried }) => {
                assert_ne!(computed, carried);
                assert_eq!(carried, 0xB0A4);
            }
            other => panic!("expected crc mismatch, got {other:?}"),
        }
    }

    #[test]
    fn trailing_bytes_beyond_frame_are_ignored() {
        let mut long = FRAME.to_vec();
        long.extend_from_slice(&[0xde, 0xad]);
        assert!(decode_frame(&long, &CalibrationTable::default()).is_ok());
    }

    #[test]
    fn hex_line_tokenizer_handles_od_output() {
        let line = " 01 03 10 02 0b";
        assert_eq!(
            parse_hex_line(line),
            Some(vec![0x01, 0x03, 0x10, 0x02, 0x0b])
        );
        assert_eq!(parse_hex_line("01 zz"), None);
        assert_eq!(parse_hex_line(""), Some(vec![]));
    }

    #[tokio::test]
    async fn latest_reading_is_kept_without_subscribers() {
        let poller = ModbusSensorPoller::new(
            SensorConfig {
                device: "/dev/null".to_string(),
                baud: 9600,
                poll_period: Duration::from_millis(100),
                use_root_shell: false,
            },
            CalibrationTable::default(),
        );
        let line = FRAME
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ")
            + "\n";
        let reader: Box<dyn tokio::io::AsyncRead + Send + Unpin> =
            Box::new(std::io::Cursor::new(line.into_bytes()));
        // No receiver exists while the frame is decoded.
        assert!(poller.stream(reader).await);
        let reading = (*poller.subscribe().borrow()).expect("slot holds the last reading");
        assert_eq!(reading.humidity, 52.3);
        // State transitions land in the slot too, subscribers or not.
        assert_eq!(*poller.state().borrow(), PollerState::Streaming);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(300));
        assert_eq!(backoff_delay(1), Duration::from_millis(600));
        assert_eq!(backoff_delay(4), Duration::from_millis(4800));
        assert_eq!(backoff_delay(10), Duration::from_millis(4800));
    }
}
