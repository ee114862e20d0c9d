//! Player backed by an external viewer process
//!
//! Each `prepare` spawns the configured program (ffplay by default) for the
//! current source. Progress is inferred from its stderr: the line announcing
//! the input means the stream is ready, the exit status tells ended from
//! failed. Pause and resume stop and continue the process.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::player::{PipelineState, Player, PlayerErrorCode, PlayerEvent, PlayerEventSink, PlayerFactory};
use crate::error::{AppError, Result};

/// Default viewer program
pub const DEFAULT_PLAYER_PROGRAM: &str = "ffplay";

const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How to launch the viewer
#[derive(Debug, Clone)]
pub struct ProcessPlayerConfig {
    pub program: String,
    /// Arguments placed before the volume flag and the URI
    pub args: Vec<String>,
}

impl Default for ProcessPlayerConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PLAYER_PROGRAM.to_string(),
            args: ["-hide_banner", "-rtsp_transport", "tcp", "-fflags", "nobuffer"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ProcessPlayerConfig {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    fn command_args(&self, uri: &str, volume: f32) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("-volume".to_string());
        args.push(((volume.clamp(0.0, 1.0) * 100.0).round() as u32).to_string());
        args.push(uri.to_string());
        args
    }
}

/// Creates [`ProcessPlayer`]s
pub struct ProcessPlayerFactory {
    config: Arc<ProcessPlayerConfig>,
}

impl ProcessPlayerFactory {
    pub fn new(config: ProcessPlayerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl PlayerFactory for ProcessPlayerFactory {
    fn name(&self) -> &'static str {
        "process"
    }

    fn create(&self, sink: PlayerEventSink) -> Result<Box<dyn Player>> {
        if self.config.program.trim().is_empty() {
            return Err(AppError::Config("player program is empty".to_string()));
        }
        Ok(Box::new(ProcessPlayer::new(self.config.clone(), sink)))
    }
}

/// Flags shared with the monitor task of the running child
#[derive(Default)]
struct Flags {
    ready: AtomicBool,
    play_when_ready: AtomicBool,
    playing: AtomicBool,
}

struct RunningChild {
    pid: Option<u32>,
    cancel: CancellationToken,
    suspended: bool,
}

pub struct ProcessPlayer {
    config: Arc<ProcessPlayerConfig>,
    sink: PlayerEventSink,
    source: Option<String>,
    volume: f32,
    flags: Arc<Flags>,
    child: Option<RunningChild>,
}

impl ProcessPlayer {
    pub fn new(config: Arc<ProcessPlayerConfig>, sink: PlayerEventSink) -> Self {
        Self {
            config,
            sink,
            source: None,
            volume: 1.0,
            flags: Arc::new(Flags::default()),
            child: None,
        }
    }

    fn signal(&self, signal: Signal) {
        let Some(pid) = self.child.as_ref().and_then(|c| c.pid) else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(pid as i32), signal) {
            warn!(pid, "Failed to send {:?} to player: {}", signal, e);
        }
    }

    fn spawn(&mut self, uri: &str) {
        // Events of this run keep its session, however late they arrive
        let sink = self.sink.bound_to_current();
        let args = self.config.command_args(uri, self.volume);
        info!("Starting player: {} {}", self.config.program, args.join(" "));

        let spawned = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", self.config.program, e);
                sink.emit(PlayerEvent::Error {
                    code: PlayerErrorCode::Other,
                    message: Some(format!("Failed to start {}: {}", self.config.program, e)),
                });
                return;
            }
        };

        let pid = child.id();
        let stderr = child.stderr.take();
        let cancel = CancellationToken::new();
        sink.emit(PlayerEvent::StateChanged(PipelineState::Buffering));

        tokio::spawn(monitor(
            child,
            stderr,
            cancel.clone(),
            self.flags.clone(),
            sink,
        ));

        debug!(pid = ?pid, "Player started");
        self.child = Some(RunningChild {
            pid,
            cancel,
            suspended: false,
        });
    }
}

impl Player for ProcessPlayer {
    fn set_source(&mut self, uri: &str) {
        self.source = Some(uri.to_string());
    }

    fn prepare(&mut self) {
        self.stop();
        match self.source.clone() {
            Some(uri) => self.spawn(&uri),
            None => warn!("prepare() without a source"),
        }
    }

    fn play(&mut self) {
        self.flags.play_when_ready.store(true, Ordering::Release);
        if self.child.as_ref().is_some_and(|c| c.suspended) {
            self.signal(Signal::SIGCONT);
            if let Some(child) = self.child.as_mut() {
                child.suspended = false;
            }
        }
        if self.flags.ready.load(Ordering::Acquire)
            && !self.flags.playing.swap(true, Ordering::AcqRel)
        {
            self.sink.emit(PlayerEvent::IsPlayingChanged(true));
        }
    }

    fn pause(&mut self) {
        self.flags.play_when_ready.store(false, Ordering::Release);
        if self.child.as_ref().is_some_and(|c| !c.suspended) {
            self.signal(Signal::SIGSTOP);
            if let Some(child) = self.child.as_mut() {
                child.suspended = true;
            }
        }
        if self.flags.playing.swap(false, Ordering::AcqRel) {
            self.sink.emit(PlayerEvent::IsPlayingChanged(false));
        }
    }

    fn stop(&mut self) {
        if let Some(child) = self.child.take() {
            child.cancel.cancel();
        }
        self.flags.ready.store(false, Ordering::Release);
        self.flags.playing.store(false, Ordering::Release);
        // The next run gets fresh flags; the old monitor keeps its own copy
        self.flags = Arc::new(Flags {
            play_when_ready: AtomicBool::new(self.flags.play_when_ready.load(Ordering::Acquire)),
            ..Flags::default()
        });
    }

    fn release(&mut self) {
        self.stop();
        self.source = None;
    }

    fn set_volume(&mut self, volume: f32) {
        debug!(volume, "Volume takes effect on the next prepare");
        self.volume = volume;
    }

    fn is_playing(&self) -> bool {
        self.flags.playing.load(Ordering::Acquire)
    }
}

enum Outcome {
    Cancelled,
    Exited(std::io::Result<ExitStatus>),
}

/// Follows one child until it exits or the player cancels it
async fn monitor(
    mut child: Child,
    stderr: Option<ChildStderr>,
    cancel: CancellationToken,
    flags: Arc<Flags>,
    sink: PlayerEventSink,
) {
    let mut lines = stderr.map(|s| BufReader::new(s).lines());
    let mut last_line: Option<String> = None;

    let outcome = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break Outcome::Cancelled,
            line = next_line(&mut lines) => match line {
                Some(line) => {
                    debug!(target: "player", "{}", line);
                    if is_ready_line(&line) && !flags.ready.swap(true, Ordering::AcqRel) {
                        // is_playing() must already hold when Ready arrives
                        let started = flags.play_when_ready.load(Ordering::Acquire)
                            && !flags.playing.swap(true, Ordering::AcqRel);
                        sink.emit(PlayerEvent::StateChanged(PipelineState::Ready));
                        if started {
                            sink.emit(PlayerEvent::IsPlayingChanged(true));
                        }
                    }
                    if !line.trim().is_empty() {
                        last_line = Some(line);
                    }
                }
                None => lines = None,
            },
            status = child.wait() => break Outcome::Exited(status),
        }
    };

    match outcome {
        Outcome::Cancelled => {
            if let Err(e) = child.kill().await {
                debug!("Player already gone: {}", e);
            }
        }
        Outcome::Exited(status) => {
            // Diagnostics written right before exit may still be buffered
            if let Some(reader) = lines.as_mut() {
                let drain = async {
                    while let Ok(Some(line)) = reader.next_line().await {
                        if !line.trim().is_empty() {
                            last_line = Some(line);
                        }
                    }
                };
                let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, drain).await;
            }
            if cancel.is_cancelled() {
                debug!("Player stopped while exiting");
                return;
            }

            flags.ready.store(false, Ordering::Release);
            if flags.playing.swap(false, Ordering::AcqRel) {
                sink.emit(PlayerEvent::IsPlayingChanged(false));
            }
            match status {
                Ok(status) if status.success() => {
                    info!("Player exited, stream ended");
                    sink.emit(PlayerEvent::StateChanged(PipelineState::Ended));
                }
                Ok(status) => {
                    let code = last_line
                        .as_deref()
                        .map(classify_error)
                        .unwrap_or(PlayerErrorCode::Other);
                    debug!(%status, "Player failed");
                    sink.emit(PlayerEvent::Error {
                        code,
                        message: last_line.or_else(|| Some(format!("player {}", status))),
                    });
                }
                Err(e) => {
                    sink.emit(PlayerEvent::Error {
                        code: PlayerErrorCode::Other,
                        message: Some(e.to_string()),
                    });
                }
            }
        }
    }
}

/// Next stderr line. Pends forever once stderr is closed, so the exit
/// branch decides.
async fn next_line(
    lines: &mut Option<tokio::io::Lines<BufReader<ChildStderr>>>,
) -> Option<String> {
    match lines {
        Some(reader) => reader.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

fn is_ready_line(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("Input #") || line.starts_with("Stream #")
}

/// Map the last diagnostic line of a failed run to an error class
pub fn classify_error(line: &str) -> PlayerErrorCode {
    let line = line.to_ascii_lowercase();
    if line.contains("timed out") || line.contains("timeout") {
        PlayerErrorCode::Timeout
    } else if line.contains("connection refused")
        || line.contains("unreachable")
        || line.contains("no route to host")
        || line.contains("name or service not known")
        || line.contains("connection reset")
    {
        PlayerErrorCode::NetworkConnectionFailed
    } else if line.contains("invalid data")
        || line.contains("unsupported")
        || line.contains("could not find codec")
    {
        PlayerErrorCode::UnsupportedContainer
    } else {
        PlayerErrorCode::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryBackend, SettingsStore};
    use crate::events::EventBus;
    use crate::playback::player::SessionEvent;
    use crate::playback::{PlaybackState, PlaybackSupervisor};
    use std::sync::atomic::AtomicU64;
    use tokio::sync::mpsc;

    fn sink() -> (PlayerEventSink, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PlayerEventSink::new(tx, Arc::new(AtomicU64::new(0))), rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> PlayerEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no player event")
            .expect("sink closed")
            .event
    }

    fn shell(script: &str) -> ProcessPlayerConfig {
        ProcessPlayerConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "player".to_string()],
        }
    }

    #[test]
    fn test_classify_error() {
        assert_eq!(
            classify_error("rtsp://cam/live: Connection timed out"),
            PlayerErrorCode::Timeout
        );
        assert_eq!(
            classify_error("rtsp://cam/live: Connection refused"),
            PlayerErrorCode::NetworkConnectionFailed
        );
        assert_eq!(
            classify_error("rtsp://cam/live: Invalid data found when processing input"),
            PlayerErrorCode::UnsupportedContainer
        );
        assert_eq!(classify_error("something odd"), PlayerErrorCode::Other);
    }

    #[test]
    fn test_command_args() {
        let config = ProcessPlayerConfig::default();
        let args = config.command_args("rtsp://cam/live", 0.0);
        assert_eq!(args[0], "-hide_banner");
        assert_eq!(&args[args.len() - 3..], ["-volume", "0", "rtsp://cam/live"]);

        let args = config.command_args("rtsp://cam/live", 1.0);
        assert_eq!(args[args.len() - 2], "100");
    }

    #[test]
    fn test_empty_program_is_rejected() {
        let (sink, _rx) = sink();
        let factory = ProcessPlayerFactory::new(ProcessPlayerConfig::with_program(" "));
        assert!(matches!(factory.create(sink), Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_ready_then_ended() {
        let (sink, mut rx) = sink();
        let mut player = ProcessPlayer::new(
            Arc::new(shell("echo \"Input #0, rtsp, from '$3':\" >&2; sleep 0.2")),
            sink,
        );
        player.set_source("rtsp://cam/live");
        player.play();
        player.prepare();

        assert_eq!(
            next_event(&mut rx).await,
            PlayerEvent::StateChanged(PipelineState::Buffering)
        );
        assert_eq!(
            next_event(&mut rx).await,
            PlayerEvent::StateChanged(PipelineState::Ready)
        );
        assert_eq!(next_event(&mut rx).await, PlayerEvent::IsPlayingChanged(true));
        assert_eq!(next_event(&mut rx).await, PlayerEvent::IsPlayingChanged(false));
        assert_eq!(
            next_event(&mut rx).await,
            PlayerEvent::StateChanged(PipelineState::Ended)
        );
    }

    #[tokio::test]
    async fn test_playing_is_set_before_ready_arrives() {
        let (sink, mut rx) = sink();
        let mut player = ProcessPlayer::new(
            Arc::new(shell("echo \"Input #0, rtsp, from '$3':\" >&2; exec sleep 30")),
            sink,
        );
        player.set_source("rtsp://cam/live");
        player.play();
        player.prepare();

        assert_eq!(
            next_event(&mut rx).await,
            PlayerEvent::StateChanged(PipelineState::Buffering)
        );
        assert_eq!(
            next_event(&mut rx).await,
            PlayerEvent::StateChanged(PipelineState::Ready)
        );
        assert!(player.is_playing());
        player.stop();
    }

    #[tokio::test]
    async fn test_late_failure_of_previous_source_is_ignored() {
        // The dead source exits at once, but a leftover child keeps stderr
        // open, so its failure is reported only after the switch
        let script = r#"case "$3" in
            rtsp://dead*) sleep 1 & echo "$3: Connection refused" >&2; exit 1 ;;
            *) echo "Input #0, rtsp, from '$3':" >&2; exec sleep 30 ;;
        esac"#;
        let settings = SettingsStore::with_backend(Arc::new(MemoryBackend::new()))
            .await
            .unwrap();
        let supervisor = PlaybackSupervisor::spawn(
            Arc::new(ProcessPlayerFactory::new(shell(script))),
            settings,
            Arc::new(EventBus::new()),
        );

        supervisor.select_camera("rtsp://dead/live").await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        supervisor.select_camera("rtsp://good/live").await.unwrap();

        let mut ui_rx = supervisor.subscribe_ui();
        tokio::time::timeout(
            Duration::from_secs(10),
            ui_rx.wait_for(|ui| ui.playback == PlaybackState::Playing),
        )
        .await
        .expect("good source never played")
        .unwrap();

        // Outlast the dead run's stderr drain
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let ui = supervisor.ui();
        assert_eq!(ui.playback, PlaybackState::Playing);
        assert_eq!(ui.uri.as_deref(), Some("rtsp://good/live"));
        assert_eq!(ui.error, None);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_is_classified() {
        let (sink, mut rx) = sink();
        let mut player = ProcessPlayer::new(
            Arc::new(shell("echo \"$3: Connection refused\" >&2; exit 1")),
            sink,
        );
        player.set_source("rtsp://cam/live");
        player.prepare();

        assert_eq!(
            next_event(&mut rx).await,
            PlayerEvent::StateChanged(PipelineState::Buffering)
        );
        match next_event(&mut rx).await {
            PlayerEvent::Error { code, message } => {
                assert_eq!(code, PlayerErrorCode::NetworkConnectionFailed);
                assert!(message.unwrap().contains("Connection refused"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_is_silent() {
        let (sink, mut rx) = sink();
        let mut player = ProcessPlayer::new(Arc::new(shell("sleep 30")), sink);
        player.set_source("rtsp://cam/live");
        player.prepare();
        assert_eq!(
            next_event(&mut rx).await,
            PlayerEvent::StateChanged(PipelineState::Buffering)
        );

        player.stop();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
        assert!(!player.is_playing());
    }

    #[tokio::test]
    async fn test_missing_program_reports_error() {
        let (sink, mut rx) = sink();
        let mut player = ProcessPlayer::new(
            Arc::new(ProcessPlayerConfig::with_program("/nonexistent/cam-viewer-player")),
            sink,
        );
        player.set_source("rtsp://cam/live");
        player.prepare();

        assert!(matches!(
            next_event(&mut rx).await,
            PlayerEvent::Error {
                code: PlayerErrorCode::Other,
                ..
            }
        ));
    }
}
