//! Atelier - Headless AR host
//!
//! Runs the AR session orchestrator against the simulated platform for a
//! chosen browser preset and prints what happened.

mod config;
mod fetch;

use anyhow::{Context, Result};
use atelier_core::sim::{presets, SimulatedFrame, SimulatedViewerHost, SimulatedXr};
use atelier_core::{
    ArEvent, ArSessionManager, AssetLoader, Environment, ModelCatalog, RecordingRenderer, SessionState,
    TickOutcome,
};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "atelier")]
#[command(about = "Headless Atelier AR session runner")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "atelier.toml")]
    config: PathBuf,

    /// Browser to simulate
    #[arg(short, long, value_enum, default_value = "android-chrome")]
    preset: Preset,

    /// Model URL or path (overrides the configuration)
    #[arg(short, long)]
    model: Option<String>,

    /// Frames to simulate (overrides the configuration)
    #[arg(short, long)]
    frames: Option<u32>,

    /// Place an object once a surface is found (native mode)
    #[arg(long)]
    place: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write a default configuration file and exit
    #[arg(long)]
    init_config: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Preset {
    IosSafari,
    IosChrome,
    AndroidChrome,
    DesktopChrome,
    DesktopSafari,
    Quest,
}

impl Preset {
    fn environment(self) -> Environment {
        let (user_agent, xr) = match self {
            Self::IosSafari => (presets::IOS_SAFARI, false),
            Self::IosChrome => (presets::IOS_CHROME, false),
            Self::AndroidChrome => (presets::ANDROID_CHROME, true),
            Self::DesktopChrome => (presets::DESKTOP_CHROME, false),
            Self::DesktopSafari => (presets::DESKTOP_SAFARI, false),
            Self::Quest => (presets::QUEST_BROWSER, true),
        };
        let env = presets::environment(user_agent);
        if xr {
            env.with_xr(Arc::new(SimulatedXr::new()))
        } else {
            env
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Atelier v{}", env!("CARGO_PKG_VERSION"));

    if args.init_config {
        config::save_default_config(&args.config)?;
        return Ok(());
    }

    let mut config = config::load_config(&args.config)?;
    if let Some(model) = args.model {
        config.ar.session.model_url = Some(model);
    }
    if let Some(frames) = args.frames {
        config.host.frames = frames;
    }

    let catalog = match &config.host.catalog {
        Some(path) => ModelCatalog::from_file(path)
            .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => ModelCatalog::default(),
    };
    info!(
        preset = ?args.preset,
        model = ?config.ar.session.model_url,
        models = catalog.len(),
        "Configuration loaded"
    );

    let fetcher = Arc::new(fetch::HostFetcher::new()?);
    let loader = AssetLoader::with_gltf(fetcher, config.ar.loader.clone());
    let viewer_host = Arc::new(SimulatedViewerHost::new());

    let mut manager = ArSessionManager::new(
        config.ar.clone(),
        args.preset.environment(),
        loader,
        RecordingRenderer::default(),
    )
    .with_viewer_host(viewer_host.clone())
    .with_catalog(catalog);
    let mut events = manager.subscribe();

    let state = manager.initialize().await;
    if let Some(caps) = manager.capabilities() {
        println!("Capabilities:");
        println!("  Platform: {:?}", caps.platform);
        println!("  Mobile: {}", caps.is_mobile);
        println!("  Native session: {}", caps.native_session_supported);
        println!("  Quick Look: {}", caps.quick_look_supported);
        println!("  Scene Viewer: {}", caps.scene_viewer_supported);
        println!("  Recommended mode: {}", caps.recommended_mode);
    }
    if state == SessionState::Unsupported {
        println!("AR is not supported on this device");
        return Ok(());
    }

    // Each failed start steps the mode down; fallback always starts
    let mut started = false;
    for _ in 0..3 {
        match manager.start_session().await {
            Ok(()) => {
                started = true;
                break;
            }
            Err(e) => warn!(error = %e, state = %manager.state(), "Session start failed"),
        }
        if !matches!(manager.state(), SessionState::Ready(_)) {
            break;
        }
    }
    if !started {
        println!("No session could be started (state: {})", manager.state());
        return Ok(());
    }

    let mut now = 0.0;
    let mut rendered = 0u32;
    for i in 0..config.host.frames {
        now += config.host.frame_interval_ms;
        // Scan the room for the first third, then look at the floor
        let frame = if i < config.host.frames / 3 {
            SimulatedFrame::looking_ahead(now)
        } else {
            SimulatedFrame::looking_down(now)
        };

        match manager.tick(now, Some(&frame)) {
            TickOutcome::Rendered => rendered += 1,
            TickOutcome::Skipped => {}
            TickOutcome::Stopped => break,
        }

        if args.place && manager.placement().get_object_count() == 0 && manager.surface().last_hit().is_some() {
            match manager.place_at_reticle().await {
                Ok(Some(id)) => info!(object = %id, "Placed object"),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Placement failed"),
            }
        }
    }

    println!();
    println!("Session ({})", manager.state());
    println!("  Frames rendered: {}", rendered);
    println!("  Placed objects: {}", manager.placement().get_object_count());
    for object in manager.placement().objects() {
        println!(
            "    - {} ({}) at {:.2?}{}",
            object.model_name,
            object.id,
            object.transform.translation,
            if object.is_anchored() { ", anchored" } else { "" }
        );
    }
    if let Some(link) = manager.handoff() {
        println!("  Phone hand-off: {}", link.url);
    }
    if let Some(config) = viewer_host.last_config() {
        println!("  Viewer attributes:");
        for (name, value) in config.to_attributes() {
            println!("    {}=\"{}\"", name, value);
        }
        if let Some(attribution) = &config.attribution {
            println!("    {}", attribution);
        }
    }
    if rendered > 0 {
        let stats = manager.performance().stats();
        println!("  Performance:");
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    manager.end_session().await;

    println!();
    println!("Events:");
    while let Ok(event) = events.try_recv() {
        match event {
            ArEvent::StateChanged { from, to } => println!("  state {} -> {}", from, to),
            ArEvent::Error(error) => println!("  error {}", error),
            other => println!("  {:?}", other),
        }
    }
    for notice in manager.notices().notices() {
        println!("Notice ({:?}): {}", notice.kind, notice.text());
    }

    Ok(())
}
