//! serial.rs — serial transport over a privileged shell or a raw device node
//!
//! On the rooted tablets the daemon cannot touch `/dev/ttyS*` directly, so
//! the stream is opened through `su -c` with a small shell script that sets
//! the line discipline via `stty` and then emits bytes on stdout. For bench
//! setups with an already-configured device node, `RawDevice` reads the file
//! directly and skips the shell entirely.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

/// How long each stage of the TERM → KILL escalation waits before moving on.
const TERM_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("failed to spawn privileged shell: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("privileged shell has no stdout pipe")]
    NoStdout,
    #[error("failed to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },
}

/// What the privileged shell should do once the port is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellScript {
    /// Request/response poll cycle: write the fixed request, capture a
    /// fixed-size response as one hex line, sleep, repeat.
    SensorPoll { period_ms: u64 },
    /// Stream the port verbatim (NMEA feeds).
    RawStream,
}

/// A way of opening a byte stream from a serial port.
#[derive(Debug, Clone)]
pub enum SerialChannel {
    /// `su -c <script>`: configure the port with stty, then run the script.
    RootShell {
        device: String,
        baud: u32,
        script: ShellScript,
    },
    /// Read the device node as a plain file. Assumes the line discipline is
    /// already configured.
    RawDevice { device: String },
}

/// Handle on an opened channel's child process, if any. Held separately from
/// the reader so a stop request from another task can tear the stream down
/// and unblock a pending read.
pub struct LinkGuard {
    child: Option<Child>,
}

impl SerialChannel {
    /// Open the channel, returning the byte stream and its guard.
    pub async fn open(&self) -> Result<(Box<dyn AsyncRead + Send + Unpin>, LinkGuard), SerialError> {
        match self {
            SerialChannel::RootShell {
                device,
                baud,
                script,
            } => {
                let script = build_script(device, *baud, *script);
                tracing::debug!(%device, baud, "opening root-shell serial stream");
                let mut child = Command::new("su")
                    .arg("-c")
                    .arg(&script)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(SerialError::Spawn)?;
                let stdout = child.stdout.take().ok_or(SerialError::NoStdout)?;
                Ok((Box::new(stdout), LinkGuard { child: Some(child) }))
            }
            SerialChannel::RawDevice { device } => {
                tracing::debug!(%device, "opening raw serial device");
                let file = File::open(device).await.map_err(|source| SerialError::Open {
                    device: device.clone(),
                    source,
                })?;
                Ok((Box::new(file), LinkGuard { child: None }))
            }
        }
    }
}

impl LinkGuard {
    /// Tear the stream down: SIGTERM first so the shell's children exit
    /// cleanly, then SIGKILL if it lingers past the grace period.
    pub async fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Some(pid) = child.id() {
            let _ = Command::new("kill")
                .arg("-TERM")
                .arg(pid.to_string())
                .status()
                .await;
            if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
                return;
            }
            tracing::debug!(pid, "shell ignored SIGTERM, escalating");
        }
        let _ = child.start_kill();
        let _ = tokio::time::timeout(TERM_GRACE, child.wait()).await;
    }
}

/// Hex-escaped Modbus request written by the poll script each cycle. The
/// trailing two bytes are the CRC-16 of the first six.
const REQUEST_PRINTF: &str = r"\x01\x03\x00\x00\x00\x08\x44\x0C";

/// Response frame size the poll script captures per cycle.
pub const RESPONSE_LEN: usize = 21;

fn build_script(device: &str, baud: u32, script: ShellScript) -> String {
    match script {
        ShellScript::SensorPoll { period_ms } => {
            // `od -An -tx1` renders the 21 response bytes as one whitespace-
            // separated hex line per cycle, which the decoder tokenizes.
            let secs = period_ms as f64 / 1000.0;
            format!(
                "stty -F {device} {baud} cs8 -cstopb -parenb raw -echo; \
                 while true; do \
                 printf '{REQUEST_PRINTF}' > {device}; \
                 dd if={device} bs=1 count={RESPONSE_LEN} 2>/dev/null | od -An -tx1 | tr -d '\\n'; \
                 echo; \
                 sleep {secs}; \
                 done"
            )
        }
        ShellScript::RawStream => {
            format!("stty -F {device} {baud} cs8 -cstopb -parenb raw -echo; exec cat {device}")
        }
    }
}
