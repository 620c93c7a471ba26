//! nmea.rs — NMEA-0183 sentence decoding and the GNSS location provider
//!
//! External receivers stream sentences over serial; only RMC and GGA carry
//! what the daemon needs. Bytes arrive with garbage interleaved (boot noise,
//! partial lines after reconnect), so decoding is a byte state machine: keep
//! printable ASCII, extract on CR, drop LF, and pull the last well-formed
//! sentence out of whatever accumulated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;

use soil_types::GeoFix;

use crate::serial::{LinkGuard, SerialChannel, ShellScript};

/// Knots to meters per second.
const KNOT_MPS: f64 = 0.514444;

/// RMC carries no DOP, so accuracy is a fixed placeholder.
const RMC_ACCURACY_M: f64 = 3.0;

/// Fixed delay between reconnect attempts on the GNSS stream.
const RETRY_DELAY: Duration = Duration::from_millis(300);

/// Accumulator bound; a stream that never sends CR is garbage.
const MAX_PENDING: usize = 2048;

/// XOR of all bytes between `$` and `*`.
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Pull the last well-formed RMC/GGA sentence out of an accumulated line.
///
/// Returns the sentence body (between `$` and `*`) after verifying the two
/// hex digits that follow the `*`. Leading garbage and earlier sentences on
/// the same line are discarded.
pub fn extract_sentence(line: &str) -> Option<&str> {
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate().rev() {
        if b != b'$' {
            continue;
        }
        let rest = &line[i + 1..];
        let Some(star) = rest.find('*') else { continue };
        let body = &rest[..star];
        if !matches!(body.get(2..5), Some("RMC" | "GGA")) {
            continue;
        }
        let hex = rest.get(star + 1..star + 3)?;
        let Ok(carried) = u8::from_str_radix(hex, 16) else {
            continue;
        };
        if checksum(body) == carried {
            return Some(body);
        }
        tracing::debug!(sentence = body, "nmea checksum mismatch");
    }
    None
}

/// `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere to signed decimal degrees.
fn parse_coord(value: &str, hemisphere: &str, deg_len: usize) -> Option<f64> {
    if value.len() <= deg_len {
        return None;
    }
    let deg: f64 = value[..deg_len].parse().ok()?;
    let min: f64 = value[deg_len..].parse().ok()?;
    let mut out = deg + min / 60.0;
    if matches!(hemisphere, "S" | "W") {
        out = -out;
    }
    Some(out)
}

fn parse_lat_lon(fields: &[&str], lat_at: usize) -> Option<(f64, f64)> {
    let lat = parse_coord(fields[lat_at], fields[lat_at + 1], 2)?;
    let lon = parse_coord(fields[lat_at + 2], fields[lat_at + 3], 3)?;
    Some((lat, lon))
}

/// Decode an RMC body ("GPRMC,..."). Void fixes (status != 'A') yield None.
pub fn parse_rmc(body: &str, monotonic_ms: u64) -> Option<GeoFix> {
    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 12 || fields[2] != "A" {
        return None;
    }
    let (lat, lon) = parse_lat_lon(&fields, 3)?;
    let speed_mps = fields[7].parse::<f64>().ok().map(|kn| kn * KNOT_MPS);
    let bearing_deg = fields[8].parse::<f64>().ok();
    Some(GeoFix {
        lat,
        lon,
        altitude_m: None,
        accuracy_m: RMC_ACCURACY_M,
        speed_mps,
        bearing_deg,
        fix_quality: 1,
        monotonic_ms,
    })
}

/// Decode a GGA body ("GPGGA,..."). The configured quality floor is the
/// caller's to apply; quality 0 (no fix) only falls out because the default
/// floor is 1.
pub fn parse_gga(body: &str, monotonic_ms: u64) -> Option<GeoFix> {
    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 15 {
        return None;
    }
    let fix_quality: u8 = fields[6].parse().ok()?;
    let (lat, lon) = parse_lat_lon(&fields, 2)?;
    let accuracy_m = fields[8].parse::<f64>().unwrap_or(0.0);
    let altitude_m = fields[9].parse::<f64>().ok();
    Some(GeoFix {
        lat,
        lon,
        altitude_m,
        accuracy_m,
        speed_mps: None,
        bearing_deg: None,
        fix_quality,
        monotonic_ms,
    })
}

// ── Decoder ───────────────────────────────────────────────────────────────────

/// Synchronous byte state machine: feed raw serial bytes, get fixes out.
#[derive(Debug)]
pub struct NmeaDecoder {
    pending: String,
    min_fix_quality: u8,
}

impl NmeaDecoder {
    pub fn new(min_fix_quality: u8) -> Self {
        Self {
            pending: String::new(),
            min_fix_quality,
        }
    }

    /// Feed a chunk of bytes; returns the fixes decoded from any lines
    /// completed by this chunk, in arrival order.
    pub fn push_bytes(&mut self, bytes: &[u8], monotonic_ms: u64) -> Vec<GeoFix> {
        let mut fixes = Vec::new();
        for &b in bytes {
            match b {
                b'\r' => {
                    let line = std::mem::take(&mut self.pending);
                    if let Some(fix) = self.decode_line(&line, monotonic_ms) {
                        fixes.push(fix);
                    }
                }
                b'\n' => {}
                0x20..=0x7E | b'\t' => {
                    if self.pending.len() >= MAX_PENDING {
                        self.pending.clear();
                    }
                    self.pending.push(b as char);
                }
                _ => {} // binary noise between sentences
            }
        }
        fixes
    }

    fn decode_line(&self, line: &str, monotonic_ms: u64) -> Option<GeoFix> {
        let body = extract_sentence(line)?;
        match &body[2..5] {
            "RMC" => parse_rmc(body, monotonic_ms),
            "GGA" => {
                let fix = parse_gga(body, monotonic_ms)?;
                if fix.fix_quality < self.min_fix_quality {
                    tracing::trace!(
                        quality = fix.fix_quality,
                        floor = self.min_fix_quality,
                        "dropping low-quality gga fix"
                    );
                    return None;
                }
                Some(fix)
            }
            _ => None,
        }
    }
}

// ── Provider ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GnssConfig {
    pub device: String,
    pub baud: u32,
    pub min_fix_quality: u8,
    pub use_root_shell: bool,
}

/// Background worker that keeps the GNSS stream open and publishes the most
/// recent accepted fix. Reconnects after a fixed delay; there is no request
/// cycle to pace, the receiver pushes on its own.
pub struct NmeaLocationProvider {
    cfg: GnssConfig,
    started_at: Instant,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    link: Arc<Mutex<Option<LinkGuard>>>,
    fix_tx: watch::Sender<Option<GeoFix>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NmeaLocationProvider {
    pub fn new(cfg: GnssConfig) -> Self {
        let (fix_tx, _) = watch::channel(None);
        Self {
            cfg,
            started_at: Instant::now(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            link: Arc::new(Mutex::new(None)),
            fix_tx,
            task: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<GeoFix>> {
        self.fix_tx.subscribe()
    }

    /// Most recent accepted fix, if any arrived since start.
    pub fn last_known_fix(&self) -> Option<GeoFix> {
        *self.fix_tx.subscribe().borrow()
    }

    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        *self.task.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        if let Some(mut guard) = self.link.lock().await.take() {
            guard.terminate().await;
        }
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
    }

    fn channel(&self) -> SerialChannel {
        if self.cfg.use_root_shell {
            SerialChannel::RootShell {
                device: self.cfg.device.clone(),
                baud: self.cfg.baud,
                script: ShellScript::RawStream,
            }
        } else {
            SerialChannel::RawDevice {
                device: self.cfg.device.clone(),
            }
        }
    }

    async fn run(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            match self.channel().open().await {
                Ok((reader, guard)) => {
                    *self.link.lock().await = Some(guard);
                    self.stream(reader).await;
                    if let Some(mut guard) = self.link.lock().await.take() {
                        guard.terminate().await;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, device = %self.cfg.device, "gnss stream open failed");
                }
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(RETRY_DELAY) => {}
                _ = self.shutdown.notified() => {}
            }
        }
    }

    async fn stream(&self, mut reader: Box<dyn tokio::io::AsyncRead + Send + Unpin>) {
        let mut decoder = NmeaDecoder::new(self.cfg.min_fix_quality);
        let mut buf = [0u8; 512];
        loop {
            let read = tokio::select! {
                read = reader.read(&mut buf) => read,
                _ = self.shutdown.notified() => return,
            };
            match read {
                Ok(0) => {
                    tracing::debug!("gnss stream closed");
                    return;
                }
                Ok(n) => {
                    let now_ms = self.started_at.elapsed().as_millis() as u64;
                    for fix in decoder.push_bytes(&buf[..n], now_ms) {
                        tracing::trace!(lat = fix.lat, lon = fix.lon, "gnss fix");
                        // send_replace: the slot must hold the latest fix
                        // even while nobody is subscribed.
                        self.fix_tx.send_replace(Some(fix));
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "gnss stream read error");
                    return;
                }
            }
        }
    }
}
