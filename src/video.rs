use std::fs;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Sender;
use log::{debug, warn};
use serde_json::{json, Value};

#[cfg(unix)]
use rand::{distributions::Alphanumeric, Rng};
#[cfg(unix)]
use std::io::{BufRead, BufReader, Write};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

#[cfg(unix)]
use parking_lot::Mutex;

use crate::catalog::ClipId;
use crate::media::VideoSource;
use crate::transport::{PlayerEvent, PlayerEventKind, Transport, TransportFactory};

const IPC_CONNECT_RETRIES: usize = 50;
const IPC_CONNECT_DELAY: Duration = Duration::from_millis(40);
const PROGRESS_STEP_SECS: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct MpvConfig {
    pub mpv_path: String,
    pub extra_args: Vec<String>,
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            mpv_path: "mpv".into(),
            extra_args: Vec::new(),
        }
    }
}

/// Opens one mpv-backed transport per mounted clip.
pub struct MpvFactory {
    config: Arc<MpvConfig>,
    events: Sender<PlayerEvent>,
}

impl MpvFactory {
    pub fn new(config: MpvConfig, events: Sender<PlayerEvent>) -> Self {
        Self {
            config: Arc::new(config),
            events,
        }
    }
}

impl TransportFactory for MpvFactory {
    fn open(&self, id: &ClipId, source: &VideoSource) -> Result<Box<dyn Transport>> {
        if source.playback_url.trim().is_empty() {
            return Err(anyhow!("video URL missing"));
        }
        Ok(Box::new(MpvTransport {
            clip: id.clone(),
            source: source.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            start_at: 0.0,
            process: None,
        }))
    }
}

/// mpv is only started on the first play; until then pause and seek just
/// record where playback should begin.
pub struct MpvTransport {
    clip: ClipId,
    source: VideoSource,
    config: Arc<MpvConfig>,
    events: Sender<PlayerEvent>,
    start_at: f64,
    process: Option<MpvProcess>,
}

impl MpvTransport {
    fn running(&mut self) -> Option<&mut MpvProcess> {
        let exited = match self.process.as_mut() {
            Some(process) => !process.is_alive(),
            None => return None,
        };
        if exited {
            debug!("mpv for clip {} exited", self.clip);
            self.process = None;
        }
        self.process.as_mut()
    }
}

impl Transport for MpvTransport {
    fn play(&mut self) -> Result<()> {
        if let Some(process) = self.running() {
            return process.command(json!(["set_property", "pause", false]));
        }
        let process = MpvProcess::spawn(
            &self.config,
            &self.clip,
            &self.source,
            self.start_at,
            self.events.clone(),
        )?;
        self.process = Some(process);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        match self.running() {
            Some(process) => process.command(json!(["set_property", "pause", true])),
            None => Ok(()),
        }
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        let start_at = seconds.max(0.0);
        self.start_at = start_at;
        match self.running() {
            Some(process) => process.command(json!(["seek", start_at, "absolute"])),
            None => Ok(()),
        }
    }
}

struct MpvProcess {
    child: Child,
    #[cfg(unix)]
    link: Arc<Mutex<IpcLink>>,
    ipc_path: String,
    reader: Option<thread::JoinHandle<()>>,
}

/// Write side of the IPC socket. Commands issued before mpv accepts the
/// connection are queued and flushed in order once it does.
#[cfg(unix)]
#[derive(Default)]
struct IpcLink {
    stream: Option<UnixStream>,
    queued: Vec<Value>,
    closed: bool,
}

#[cfg(unix)]
impl IpcLink {
    fn send(&mut self, command: Value) -> Result<()> {
        match self.stream.as_mut() {
            Some(stream) => write_command(stream, &command),
            None => {
                self.queued.push(command);
                Ok(())
            }
        }
    }
}

impl MpvProcess {
    #[cfg(unix)]
    fn spawn(
        config: &MpvConfig,
        clip: &ClipId,
        source: &VideoSource,
        start_at: f64,
        events: Sender<PlayerEvent>,
    ) -> Result<Self> {
        let ipc_path = unique_ipc_path();
        remove_ipc_path(&ipc_path);

        let mut args = vec![
            source.playback_url.clone(),
            "--force-window=yes".to_string(),
            "--keep-open=yes".to_string(),
            "--idle=no".to_string(),
            "--really-quiet".to_string(),
            "--terminal=no".to_string(),
            "--input-terminal=no".to_string(),
            "--ytdl=no".to_string(),
            format!("--input-ipc-server={ipc_path}"),
        ];
        if start_at > 0.0 {
            args.push(format!("--start={start_at:.3}"));
        }
        if !source.label.is_empty() {
            args.push(format!("--force-media-title={} [{}]", clip, source.label));
        }
        args.extend(config.extra_args.iter().cloned());
        debug!("spawning mpv for clip {clip}: {args:?}");

        let child = Command::new(&config.mpv_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("launch {} to play {}", config.mpv_path, source.playback_url))?;

        let link = Arc::new(Mutex::new(IpcLink {
            queued: vec![
                json!(["observe_property", 1, "time-pos"]),
                json!(["observe_property", 2, "eof-reached"]),
            ],
            ..IpcLink::default()
        }));
        let mut process = Self {
            child,
            link: link.clone(),
            ipc_path: ipc_path.clone(),
            reader: None,
        };

        // Connecting waits for mpv to create its socket; keep that off the
        // caller's thread.
        let clip = clip.clone();
        let reader = thread::Builder::new()
            .name(format!("mpv-ipc-{clip}"))
            .spawn(move || run_ipc(&ipc_path, &link, clip, events))
            .context("start mpv IPC thread")?;
        process.reader = Some(reader);
        Ok(process)
    }

    #[cfg(not(unix))]
    fn spawn(
        _config: &MpvConfig,
        _clip: &ClipId,
        _source: &VideoSource,
        _start_at: f64,
        _events: Sender<PlayerEvent>,
    ) -> Result<Self> {
        Err(anyhow!("Video playback is not supported on this platform."))
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    #[cfg(unix)]
    fn command(&self, command: Value) -> Result<()> {
        self.link.lock().send(command)
    }

    #[cfg(not(unix))]
    fn command(&self, _command: Value) -> Result<()> {
        Err(anyhow!("Video controls are not supported on this platform."))
    }
}

impl Drop for MpvProcess {
    fn drop(&mut self) {
        let _ = self.command(json!(["quit"]));
        #[cfg(unix)]
        {
            let mut link = self.link.lock();
            link.closed = true;
            link.queued.clear();
            if let Some(stream) = link.stream.as_ref() {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        remove_ipc_path(&self.ipc_path);
    }
}

#[cfg(unix)]
fn write_command(stream: &mut UnixStream, command: &Value) -> Result<()> {
    let payload = json!({ "command": command });
    let serialized = serde_json::to_string(&payload).context("serialize mpv command")?;
    stream
        .write_all(serialized.as_bytes())
        .context("write mpv IPC command")?;
    stream
        .write_all(b"\n")
        .context("write mpv IPC command terminator")?;
    Ok(())
}

#[cfg(unix)]
fn run_ipc(path: &str, link: &Mutex<IpcLink>, clip: ClipId, events: Sender<PlayerEvent>) {
    match connect_ipc(path, link) {
        Ok(stream) => read_events(stream, clip, events),
        Err(err) => {
            if link.lock().closed {
                return;
            }
            warn!("mpv for clip {clip}: {err:#}");
            let _ = events.send(PlayerEvent {
                clip,
                kind: PlayerEventKind::Failed(format!("{err:#}")),
            });
        }
    }
}

/// Waits for mpv's socket, flushes queued commands and returns the read
/// half. Gives up early once the link is closed.
#[cfg(unix)]
fn connect_ipc(path: &str, link: &Mutex<IpcLink>) -> Result<UnixStream> {
    let mut last_err = None;
    for _ in 0..IPC_CONNECT_RETRIES {
        if link.lock().closed {
            return Err(anyhow!("mpv closed before accepting commands"));
        }
        match UnixStream::connect(path) {
            Ok(mut stream) => {
                let reader = stream
                    .try_clone()
                    .context("clone mpv IPC stream for reading")?;
                let mut link = link.lock();
                if link.closed {
                    return Err(anyhow!("mpv closed before accepting commands"));
                }
                for command in std::mem::take(&mut link.queued) {
                    write_command(&mut stream, &command)?;
                }
                link.stream = Some(stream);
                return Ok(reader);
            }
            Err(err) => last_err = Some(err),
        }
        thread::sleep(IPC_CONNECT_DELAY);
    }
    match last_err {
        Some(err) => Err(anyhow!(err)).context(format!("connect to mpv IPC socket {path}")),
        None => Err(anyhow!("connect to mpv IPC socket {path}")),
    }
}

#[cfg(unix)]
fn read_events(stream: UnixStream, clip: ClipId, events: Sender<PlayerEvent>) {
    let reader = BufReader::new(stream);
    let mut last_progress: Option<f64> = None;
    for line in reader.lines().map_while(Result::ok) {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            debug!("unparsed mpv message: {line}");
            continue;
        };
        let Some(kind) = parse_event(&message) else {
            continue;
        };
        if let PlayerEventKind::Progress(seconds) = kind {
            if last_progress.is_some_and(|last| (seconds - last).abs() < PROGRESS_STEP_SECS) {
                continue;
            }
            last_progress = Some(seconds);
        }
        let event = PlayerEvent {
            clip: clip.clone(),
            kind,
        };
        if events.send(event).is_err() {
            break;
        }
    }
    debug!("mpv event reader for clip {clip} finished");
}

/// Maps one mpv IPC message to a player signal.
fn parse_event(message: &Value) -> Option<PlayerEventKind> {
    match message.get("event")?.as_str()? {
        "property-change" => match message.get("name")?.as_str()? {
            "time-pos" => message
                .get("data")?
                .as_f64()
                .map(PlayerEventKind::Progress),
            "eof-reached" if message.get("data")?.as_bool()? => Some(PlayerEventKind::Ended),
            _ => None,
        },
        "end-file" if message.get("reason").and_then(Value::as_str) == Some("error") => {
            let reason = message
                .get("file_error")
                .and_then(Value::as_str)
                .unwrap_or("playback error");
            warn!("mpv reported an error: {reason}");
            Some(PlayerEventKind::Failed(reason.to_string()))
        }
        _ => None,
    }
}

#[cfg(unix)]
fn unique_ipc_path() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    let mut path = std::env::temp_dir();
    path.push(format!("clip-feed-mpv-{}-{suffix}.sock", std::process::id()));
    path.to_string_lossy().to_string()
}

fn remove_ipc_path(path: &str) {
    if path.is_empty() {
        return;
    }
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            debug!("failed to remove mpv ipc path {path}: {err}");
        }
    }
}
