mod config;
mod export;
mod modbus;
mod nmea;
mod registry;
mod sampling;
mod serial;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, warn};

use field_heatmap::{default_ramp, samples_inside_polygon, HeatmapRenderer, Raster, Viewport};
use soil_types::{Channel, GeoFix, GeoPoint, RecordedPoint, SensorReading};

use nmea::NmeaLocationProvider;
use registry::PollerRegistry;
use sampling::CaptureSession;

#[derive(Parser, Debug)]
#[command(name = "fieldsense-daemon", about = "Soil probe and GNSS field daemon")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = config::DEFAULT_PATH)]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the probe and GNSS receiver (the default)
    Run(RunArgs),
    /// Render a heatmap overlay from recorded points
    Render(RenderArgs),
    /// Export recorded points as CSV
    Export(ExportArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Override the soil probe device node
    #[arg(long)]
    sensor_device: Option<String>,

    /// Override the GNSS receiver device node
    #[arg(long)]
    gnss_device: Option<String>,

    /// Read device nodes directly instead of through the privileged shell
    #[arg(long)]
    no_root_shell: bool,

    /// Seconds between status log lines (0 disables)
    #[arg(long, default_value_t = 5)]
    status_period_s: u64,

    /// Where SIGUSR1-captured points accumulate
    #[arg(long, default_value = "points.json")]
    points_file: PathBuf,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            sensor_device: None,
            gnss_device: None,
            no_root_shell: false,
            status_period_s: 5,
            points_file: PathBuf::from("points.json"),
        }
    }
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// JSON file of recorded points
    #[arg(long)]
    points: PathBuf,

    /// JSON file with the plot polygon vertices
    #[arg(long)]
    polygon: PathBuf,

    /// Probe channel to interpolate
    #[arg(long, default_value = "ph")]
    channel: String,

    #[arg(long, default_value_t = 800)]
    width: u32,

    #[arg(long, default_value_t = 800)]
    height: u32,

    #[arg(long, default_value_t = 17.0)]
    zoom: f64,

    /// Overlay output (PAM, RGB_ALPHA)
    #[arg(long, default_value = "heatmap.pam")]
    out: PathBuf,

    /// Legend output; omit to skip
    #[arg(long)]
    legend_out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// JSON file of recorded points
    #[arg(long)]
    points: PathBuf,

    /// Job name, first CSV column and part of the file name
    #[arg(long)]
    name: String,

    #[arg(long, default_value = "")]
    crop: String,
}

// ─── Status Task ──────────────────────────────────────────────────────────────

async fn run_status_task(
    mut readings: watch::Receiver<Option<SensorReading>>,
    mut fixes: watch::Receiver<Option<GeoFix>>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let reading = *readings.borrow_and_update();
        let fix = *fixes.borrow_and_update();
        match reading {
            Some(r) => info!(
                humidity = %r.display(Channel::Humidity),
                temperature = %r.display(Channel::Temperature),
                ph = %r.display(Channel::Ph),
                conductivity = %r.display(Channel::Conductivity),
                "probe"
            ),
            None => info!("probe: no reading yet"),
        }
        match fix {
            Some(f) => info!(
                lat = f.lat,
                lon = f.lon,
                quality = f.fix_quality,
                accuracy_m = f.accuracy_m,
                "gnss"
            ),
            None => info!("gnss: no fix yet"),
        }
    }
}

// ─── Capture Task ─────────────────────────────────────────────────────────────

/// SIGUSR1 toggles a capture session: first signal begins one, the second
/// commits the per-channel means at the current GNSS position and appends
/// the point to the points file. Readings fold in while the session is open.
async fn run_capture_task(
    mut readings: watch::Receiver<Option<SensorReading>>,
    gnss: Arc<NmeaLocationProvider>,
    points_file: PathBuf,
) -> anyhow::Result<()> {
    let mut usr1 = signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;
    let mut session: Option<CaptureSession> = None;
    loop {
        tokio::select! {
            _ = usr1.recv() => {
                match session.take() {
                    None => {
                        info!("capture session started");
                        session = Some(CaptureSession::begin());
                    }
                    Some(done) => {
                        let count = done.count();
                        let Some(fix) = gnss.last_known_fix() else {
                            warn!(count, "no GNSS fix, discarding capture session");
                            continue;
                        };
                        let timestamp_ms = chrono::Utc::now().timestamp_millis();
                        match done.commit(fix.point(), timestamp_ms) {
                            Some(point) => {
                                append_point(&points_file, point).await?;
                                info!(count, lat = fix.lat, lon = fix.lon, "capture committed");
                            }
                            None => warn!("empty capture session, nothing committed"),
                        }
                    }
                }
            }
            changed = readings.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let reading = *readings.borrow_and_update();
                if let (Some(open), Some(reading)) = (session.as_mut(), reading) {
                    *open = std::mem::take(open).observe(&reading);
                }
            }
        }
    }
}

async fn append_point(path: &Path, point: RecordedPoint) -> anyhow::Result<()> {
    let mut points = match tokio::fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str::<Vec<RecordedPoint>>(&raw)
            .with_context(|| format!("parsing {}", path.display()))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    points.push(point);
    let raw = serde_json::to_string_pretty(&points)?;
    tokio::fs::write(path, raw)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

// ─── Subcommands ──────────────────────────────────────────────────────────────

async fn run_daemon(mut cfg: config::FullConfig, args: RunArgs) -> anyhow::Result<()> {
    if let Some(device) = args.sensor_device {
        cfg.sensor.device = device;
    }
    if let Some(device) = args.gnss_device {
        cfg.gnss.device = device;
    }
    if args.no_root_shell {
        cfg.sensor.use_root_shell = false;
        cfg.gnss.use_root_shell = false;
    }

    let registry = Arc::new(PollerRegistry::new());
    let sensor = registry
        .start_sensor(cfg.sensor.to_config(), cfg.sensor.calibration.clone())
        .await;
    let gnss = registry.start_gnss(cfg.gnss.to_config()).await;
    info!(
        sensor_device = %cfg.sensor.device,
        gnss_device = %cfg.gnss.device,
        "pollers started"
    );

    if args.status_period_s > 0 {
        tokio::spawn(run_status_task(
            sensor.subscribe(),
            gnss.subscribe(),
            Duration::from_secs(args.status_period_s),
        ));
    }
    let capture_readings = sensor.subscribe();
    let capture_gnss = Arc::clone(&gnss);
    tokio::spawn(async move {
        if let Err(err) = run_capture_task(capture_readings, capture_gnss, args.points_file).await {
            warn!(error = %err, "capture task stopped");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    registry.stop_all().await;
    info!("shutdown complete");
    Ok(())
}

async fn run_render(cfg: config::FullConfig, args: RenderArgs) -> anyhow::Result<()> {
    let channel = channel_from_key(&args.channel)
        .with_context(|| format!("unknown channel {:?}", args.channel))?;
    let points = load_points(&args.points).await?;
    let polygon: Vec<GeoPoint> = read_json(&args.polygon).await?;

    let samples = samples_inside_polygon(&points, channel, &polygon);
    info!(
        total = points.len(),
        inside = samples.len(),
        channel = channel.key(),
        "building interpolator"
    );

    let center = polygon_center(&polygon);
    let viewport = Viewport {
        width_px: args.width,
        height_px: args.height,
        zoom: args.zoom,
        center,
    };
    let variogram = cfg.heatmap.variogram;
    let grid = cfg.heatmap.grid_size_px;
    let title = cfg.heatmap.legend_title.clone();
    // The S²·n kriging loop is CPU-bound; keep it off the async workers.
    let (raster, legend) = tokio::task::spawn_blocking(move || {
        let mut renderer =
            HeatmapRenderer::new(polygon, samples, variogram, grid, title, default_ramp);
        let frame = renderer.render(&viewport)?;
        Ok::<_, field_heatmap::HeatmapError>((frame.raster.clone(), frame.legend.clone()))
    })
    .await??;

    write_pam(&args.out, &raster).await?;
    info!(path = %args.out.display(), "overlay written");
    if let Some(legend_out) = &args.legend_out {
        write_pam(legend_out, &legend).await?;
        info!(path = %legend_out.display(), "legend written");
    }
    Ok(())
}

async fn run_export(cfg: config::FullConfig, args: ExportArgs) -> anyhow::Result<()> {
    let points = load_points(&args.points).await?;
    let path =
        export::export_points_csv(&cfg.export.dir, &args.name, &args.crop, &points).await?;
    info!(path = %path.display(), "export written");
    Ok(())
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn channel_from_key(key: &str) -> Option<Channel> {
    Channel::ALL.into_iter().find(|ch| ch.key() == key)
}

fn polygon_center(polygon: &[GeoPoint]) -> GeoPoint {
    let n = polygon.len().max(1) as f64;
    GeoPoint::new(
        polygon.iter().map(|p| p.lat).sum::<f64>() / n,
        polygon.iter().map(|p| p.lon).sum::<f64>() / n,
    )
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn load_points(path: &Path) -> anyhow::Result<Vec<RecordedPoint>> {
    read_json(path).await
}

/// Netpbm PAM, RGB_ALPHA. Any netpbm-aware viewer opens the result without
/// an image dependency on our side.
async fn write_pam(path: &Path, raster: &Raster) -> anyhow::Result<()> {
    let mut out = format!(
        "P7\nWIDTH {}\nHEIGHT {}\nDEPTH 4\nMAXVAL 255\nTUPLTYPE RGB_ALPHA\nENDHDR\n",
        raster.width, raster.height
    )
    .into_bytes();
    out.extend_from_slice(&raster.data);
    tokio::fs::write(path, out)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsense_daemon=info".into()),
        )
        .init();

    let args = Args::parse();
    info!("🌱 FieldSense daemon starting...");

    let cfg = config::load(&args.config)?;
    match args.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(run) => run_daemon(cfg, run).await,
        Command::Render(render) => run_render(cfg, render).await,
        Command::Export(export) => run_export(cfg, export).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_keys_resolve() {
        assert_eq!(channel_from_key("ph"), Some(Channel::Ph));
        assert_eq!(channel_from_key("salinity"), Some(Channel::Salinity));
        assert_eq!(channel_from_key("bogus"), None);
    }

    #[test]
    fn polygon_center_is_the_vertex_mean() {
        let c = polygon_center(&[
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(2.0, 0.0),
            GeoPoint::new(2.0, 4.0),
            GeoPoint::new(0.0, 4.0),
        ]);
        assert_eq!((c.lat, c.lon), (1.0, 2.0));
    }

    #[tokio::test]
    async fn pam_header_matches_raster_dimensions() {
        let raster = Raster::new(3, 2);
        let path = std::env::temp_dir().join("fieldsense-pam-test.pam");
        write_pam(&path, &raster).await.unwrap();
        let bytes = tokio::fs::read(&path).await.unwrap();
        let header = b"P7\nWIDTH 3\nHEIGHT 2\nDEPTH 4\nMAXVAL 255\nTUPLTYPE RGB_ALPHA\nENDHDR\n";
        assert!(bytes.starts_with(header));
        assert_eq!(bytes.len(), header.len() + 3 * 2 * 4);
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn append_point_creates_and_extends_the_file() {
        let path = std::env::temp_dir().join("fieldsense-points-test.json");
        let _ = tokio::fs::remove_file(&path).await;
        let point = RecordedPoint {
            point: GeoPoint::new(-26.0, -52.0),
            values: Default::default(),
            timestamp_ms: 1,
        };
        append_point(&path, point.clone()).await.unwrap();
        append_point(&path, point).await.unwrap();
        let points = load_points(&path).await.unwrap();
        assert_eq!(points.len(), 2);
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
