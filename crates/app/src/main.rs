use std::{cell::Cell, fs::File, io::BufWriter, path::PathBuf, rc::Rc};

use aurora_core::{
    sim::{SimHost, SimTrack},
    AnimationLoop, AppConfig, AudioGraph, FixedRateFrames, MediaFile, MediaKind, PixelCanvas,
    PlaybackManager, RenderPipeline, SessionState,
};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> aurora_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate(args) => run_simulate(args),
        Commands::Config { config } => print_config(config.as_ref()),
    }
}

fn load_config(path: Option<&PathBuf>) -> aurora_core::Result<AppConfig> {
    match path {
        Some(path) => {
            debug!(?path, "loading configuration");
            AppConfig::load(path)
        }
        None => Ok(AppConfig::default()),
    }
}

fn print_config(path: Option<&PathBuf>) -> aurora_core::Result<()> {
    let config = load_config(path)?;
    println!("{}", config.to_json_pretty()?);
    Ok(())
}

fn run_simulate(args: SimulateArgs) -> aurora_core::Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(mode) = &args.mode {
        config.visual.mode = mode.parse()?;
    }
    if let Some(theme) = &args.theme {
        config.visual.theme = theme.parse()?;
    }
    if let Some(sensitivity) = args.sensitivity {
        config.visual.set_sensitivity(sensitivity);
    }
    if let Some(bars) = args.bars {
        config.visual.set_bar_count(bars);
    }

    let locator = args.file.display().to_string();
    let name = args
        .file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| locator.clone());
    let file = MediaFile::new(name, "", locator.clone());
    info!(
        file = %locator,
        kind = ?file.kind(),
        mode = ?config.visual.mode,
        theme = ?config.visual.theme,
        "starting simulation"
    );

    let host = SimHost::new();
    host.register_track(locator, SimTrack::new(args.duration, args.bpm));

    let graph = AudioGraph::new(host.context_factory(), config.audio.fft_size);
    let mut manager = PlaybackManager::new(host.clone(), graph, config.audio.clone());
    if file.kind() == MediaKind::Video {
        manager.set_video_element(Some(host.add_video_surface()));
    }

    let ended = Rc::new(Cell::new(false));
    let ended_flag = Rc::clone(&ended);
    manager.set_on_ended(move || {
        info!("track finished");
        ended_flag.set(true);
    });
    manager.load_file(file, |duration| info!(duration, "track ready"))?;
    if args.loop_a.is_some() || args.loop_b.is_some() {
        manager.set_loop_points(args.loop_a, args.loop_b);
        manager.set_ab_loop_enabled(true);
    }

    let mut pipeline = RenderPipeline::new(config.visual.clone());
    pipeline.notify_resize(args.width as f32, args.height as f32, 1.0);
    pipeline.set_beat_callback(|strength| debug!(strength, "beat"));
    let mut canvas = PixelCanvas::new(args.width, args.height);

    let frame_limit = (args.seconds.max(0.0) * args.fps).ceil() as u64;
    let mut frames = FixedRateFrames::new(args.fps, Some(frame_limit));
    let mut animation = AnimationLoop::new();
    let mut last_timestamp = 0.0;
    let mut peak_fps = 0.0f32;
    pipeline.start(last_timestamp);

    let ran = animation.run(&mut frames, |timestamp, handle| {
        host.advance(timestamp - last_timestamp);
        last_timestamp = timestamp;

        manager.poll();
        if manager.state() == SessionState::Ready {
            if let Err(err) = manager.play() {
                warn!(%err, "could not start playback");
            }
        }

        if let Some(report) = pipeline.frame(timestamp, manager.analyser(), &mut canvas) {
            peak_fps = peak_fps.max(report.fps);
        }
        if ended.get() && !manager.loop_state().enabled {
            handle.stop();
        }
        Ok(())
    })?;

    let position = manager.current_time();
    info!(
        title = manager.title().unwrap_or("-"),
        frames = ran,
        beats = pipeline.beat_count(),
        position,
        fps = peak_fps,
        "simulation finished"
    );

    if let Some(output) = &args.output {
        let mut writer = BufWriter::new(File::create(output)?);
        canvas.write_ppm(&mut writer)?;
        info!(?output, "wrote last frame");
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive media visualiser", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a file through the simulated host and render it headlessly.
    Simulate(SimulateArgs),
    /// Print the effective configuration as JSON.
    Config {
        /// Optional JSON configuration to merge over the defaults.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Media file to load; only its name and extension are used.
    file: PathBuf,
    /// Length of the synthetic programme in seconds.
    #[arg(long, default_value_t = 30.0)]
    duration: f64,
    /// Tempo of the synthetic programme.
    #[arg(long, default_value_t = 120.0)]
    bpm: f64,
    /// How long to run the render loop, in seconds.
    #[arg(long, default_value_t = 10.0)]
    seconds: f64,
    #[arg(long, default_value_t = 60.0)]
    fps: f64,
    /// bars, circle or wave.
    #[arg(long)]
    mode: Option<String>,
    /// dark or neon.
    #[arg(long)]
    theme: Option<String>,
    #[arg(long)]
    sensitivity: Option<f32>,
    #[arg(long)]
    bars: Option<usize>,
    #[arg(long, default_value_t = 960)]
    width: u32,
    #[arg(long, default_value_t = 540)]
    height: u32,
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Write the final frame as a binary PPM image.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Loop start in seconds.
    #[arg(long)]
    loop_a: Option<f64>,
    /// Loop end in seconds.
    #[arg(long)]
    loop_b: Option<f64>,
}
