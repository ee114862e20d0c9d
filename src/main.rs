use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cam_viewer::config::{BrightnessMode, SettingsStore, RECONNECT_DELAY_MAX_MS, RECONNECT_DELAY_MIN_MS};
use cam_viewer::display::{DisplayBackend, LogDisplay, SysfsBacklight, BACKLIGHT_CLASS_DIR};
use cam_viewer::events::EventBus;
use cam_viewer::playback::{
    PlaybackState, PlaybackSupervisor, ProcessPlayerConfig, ProcessPlayerFactory, UiState,
};
use cam_viewer::state::AppState;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// cam-viewer command line arguments
#[derive(Parser, Debug)]
#[command(name = "cam-viewer")]
#[command(version, about = "A resilient RTSP camera viewer", long_about = None)]
struct CliArgs {
    /// Data directory path (default: /etc/cam-viewer)
    #[arg(short = 'd', long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(
        short = 'l',
        long,
        value_name = "LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play the current camera and read single-key intents from stdin (default)
    Run(RunArgs),
    /// Manage the camera list
    #[command(subcommand)]
    Camera(CameraCommand),
    /// Show or change settings
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Viewer program used for playback
    #[arg(long, value_name = "PROGRAM")]
    player: Option<String>,

    /// Replace the default viewer arguments (repeatable)
    #[arg(long = "player-arg", value_name = "ARG", allow_hyphen_values = true)]
    player_args: Vec<String>,

    /// Backlight device directory (default: first device in /sys/class/backlight)
    #[arg(long, value_name = "DIR", conflicts_with = "no_backlight")]
    backlight: Option<PathBuf>,

    /// Do not touch the backlight, only log display changes
    #[arg(long)]
    no_backlight: bool,
}

#[derive(Subcommand, Debug)]
enum CameraCommand {
    /// List cameras, marking the current one
    List,
    /// Add a camera
    Add {
        /// Stream URL (rtsp://...)
        url: String,
        /// Display name (default: "Camera N")
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Remove a camera by id
    Remove { id: String },
    /// Make the camera at INDEX current
    Select { index: usize },
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    /// Print all settings as JSON
    Show,
    /// Change one or more settings
    Set(SetArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BrightnessArg {
    Auto,
    Minimum,
    Custom,
}

impl From<BrightnessArg> for BrightnessMode {
    fn from(arg: BrightnessArg) -> Self {
        match arg {
            BrightnessArg::Auto => BrightnessMode::Auto,
            BrightnessArg::Minimum => BrightnessMode::Minimum,
            BrightnessArg::Custom => BrightnessMode::Custom,
        }
    }
}

#[derive(Args, Debug)]
struct SetArgs {
    #[arg(long)]
    muted: Option<bool>,

    #[arg(long)]
    allow_screen_off: Option<bool>,

    #[arg(long, value_name = "MODE")]
    brightness: Option<BrightnessArg>,

    /// Brightness used by --brightness custom (0.0 - 1.0)
    #[arg(long, value_name = "LEVEL")]
    custom_brightness: Option<f32>,

    #[arg(long)]
    auto_reconnect: Option<bool>,

    #[arg(
        long,
        value_name = "MS",
        value_parser = clap::value_parser!(u32)
            .range(i64::from(RECONNECT_DELAY_MIN_MS)..=i64::from(RECONNECT_DELAY_MAX_MS))
    )]
    reconnect_delay_ms: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    // Determine data directory (CLI arg takes precedence)
    let data_dir = args.data_dir.unwrap_or_else(get_data_dir);
    tokio::fs::create_dir_all(&data_dir)
        .await
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let db_path = data_dir.join("cam-viewer.db");

    match args.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(run_args) => run(run_args, data_dir, &db_path).await,
        Command::Camera(cmd) => camera_command(cmd, &db_path).await,
        Command::Settings(cmd) => settings_command(cmd, &db_path).await,
    }
}

async fn run(args: RunArgs, data_dir: PathBuf, db_path: &Path) -> anyhow::Result<()> {
    tracing::info!("Starting cam-viewer v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Data directory: {}", data_dir.display());

    let events = Arc::new(EventBus::new());
    let settings = SettingsStore::open(db_path)
        .await?
        .with_event_bus(events.clone());

    let mut player_config = match args.player {
        Some(program) => ProcessPlayerConfig::with_program(program),
        None => ProcessPlayerConfig::default(),
    };
    if !args.player_args.is_empty() {
        player_config.args = args.player_args;
    }
    tracing::info!("Viewer program: {}", player_config.program);

    let display = open_display(args.backlight, args.no_backlight).await;
    let state = AppState::new(
        settings,
        Arc::new(ProcessPlayerFactory::new(player_config)),
        display,
        events,
        data_dir,
    );

    let mut ui_rx = state.supervisor.subscribe_ui();
    let render = tokio::spawn(async move {
        loop {
            let ui = ui_rx.borrow_and_update().clone();
            render_ui(&ui);
            if ui_rx.changed().await.is_err() {
                break;
            }
        }
    });

    println!("keys: n next, p previous, space pause/resume, m mute, r reconnect,");
    println!("      s stop, g start, c controls, x clear error, q quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        // Keep playing until Ctrl-C
                        stdin_open = false;
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read stdin: {}", e);
                        break;
                    }
                };
                let Some(key) = line.chars().next() else {
                    continue;
                };
                if key == 'q' {
                    break;
                }
                if let Err(e) = dispatch_key(&state.supervisor, key).await {
                    tracing::warn!("Intent failed: {}", e);
                }
            }
        }
    }

    state.shutdown().await;
    render.abort();
    tracing::info!("Viewer shutdown complete");
    Ok(())
}

async fn dispatch_key(supervisor: &PlaybackSupervisor, key: char) -> cam_viewer::Result<()> {
    match key {
        'n' => supervisor.next_camera().await?,
        'p' => supervisor.previous_camera().await?,
        ' ' => {
            if supervisor.ui().playback == PlaybackState::Paused {
                supervisor.resume().await?
            } else {
                supervisor.pause().await?
            }
        }
        'm' => supervisor.toggle_mute().await?,
        'r' => supervisor.reconnect().await?,
        's' => supervisor.stop_playback().await?,
        'g' => supervisor.start_playback().await?,
        'c' => supervisor.toggle_controls().await?,
        'x' => supervisor.clear_error().await?,
        other => {
            println!("unknown key {:?}", other);
            return Ok(());
        }
    };
    Ok(())
}

fn render_ui(ui: &UiState) {
    let uri = ui.uri.as_deref().unwrap_or("-");
    let muted = if ui.is_muted { " [muted]" } else { "" };
    let controls = if ui.controls_visible { "" } else { " [controls hidden]" };
    match &ui.error {
        Some(error) => println!("{} {}{}{} error: {}", ui.playback, uri, muted, controls, error),
        None => println!("{} {}{}{}", ui.playback, uri, muted, controls),
    }
}

async fn open_display(dir: Option<PathBuf>, disabled: bool) -> Arc<dyn DisplayBackend> {
    if disabled {
        return Arc::new(LogDisplay);
    }
    let backlight = match dir {
        Some(dir) => SysfsBacklight::open(dir).await,
        None => SysfsBacklight::detect(BACKLIGHT_CLASS_DIR).await,
    };
    match backlight {
        Ok(backlight) => Arc::new(backlight),
        Err(e) => {
            tracing::warn!("Backlight unavailable, display changes are only logged: {}", e);
            Arc::new(LogDisplay)
        }
    }
}

async fn camera_command(cmd: CameraCommand, db_path: &Path) -> anyhow::Result<()> {
    let settings = SettingsStore::open(db_path).await?;
    match cmd {
        CameraCommand::List => {
            let current = settings.get();
            let registry = current.registry();
            if registry.is_empty() {
                println!("no cameras configured");
            }
            for (index, camera) in registry.cameras().iter().enumerate() {
                let marker = if registry.current_index() == Some(index) {
                    '*'
                } else {
                    ' '
                };
                println!(
                    "{} {:>2}  {:<20} {:<6} {}  ({})",
                    marker,
                    index,
                    camera.name,
                    format!("{:?}", camera.display_mode).to_lowercase(),
                    camera.url,
                    camera.id
                );
            }
        }
        CameraCommand::Add { url, name } => {
            let (camera, ack) = settings.add_camera(name.as_deref(), &url)?;
            ack.wait().await?;
            println!("added {} ({})", camera.name, camera.id);
        }
        CameraCommand::Remove { id } => {
            let (camera, ack) = settings.remove_camera(&id)?;
            ack.wait().await?;
            println!("removed {} ({})", camera.name, camera.id);
        }
        CameraCommand::Select { index } => {
            settings.select_camera_index(index)?.wait().await?;
            if let Some(camera) = settings.get().registry().current() {
                println!("selected {} ({})", camera.name, camera.url);
            }
        }
    }
    Ok(())
}

async fn settings_command(cmd: SettingsCommand, db_path: &Path) -> anyhow::Result<()> {
    let settings = SettingsStore::open(db_path).await?;
    match cmd {
        SettingsCommand::Show => {
            println!("{}", serde_json::to_string_pretty(&*settings.get())?);
        }
        SettingsCommand::Set(set) => {
            let mut acks = Vec::new();
            if let Some(muted) = set.muted {
                acks.push(settings.set_muted(muted));
            }
            if let Some(allow) = set.allow_screen_off {
                acks.push(settings.set_allow_screen_off(allow));
            }
            if set.brightness.is_some() || set.custom_brightness.is_some() {
                let mode = set
                    .brightness
                    .map(BrightnessMode::from)
                    .unwrap_or(settings.get().brightness_mode);
                acks.push(settings.set_brightness(mode, set.custom_brightness));
            }
            if let Some(enabled) = set.auto_reconnect {
                acks.push(settings.set_auto_reconnect(enabled));
            }
            if let Some(delay) = set.reconnect_delay_ms {
                acks.push(settings.set_reconnect_delay_ms(delay));
            }
            if acks.is_empty() {
                anyhow::bail!("nothing to change, see `cam-viewer settings set --help`");
            }
            for ack in acks {
                ack.wait().await?;
            }
            println!("{}", serde_json::to_string_pretty(&*settings.get())?);
        }
    }
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "cam_viewer=error",
        LogLevel::Warn => "cam_viewer=warn",
        LogLevel::Info => "cam_viewer=info",
        LogLevel::Verbose => "cam_viewer=debug,sqlx=warn",
        LogLevel::Debug => "cam_viewer=debug,sqlx=info",
        LogLevel::Trace => "cam_viewer=trace,sqlx=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    // stdout carries the viewer's own output
    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    // Check environment variable first
    if let Ok(path) = std::env::var("CAM_VIEWER_DATA_DIR") {
        return PathBuf::from(path);
    }

    PathBuf::from("/etc/cam-viewer")
}
