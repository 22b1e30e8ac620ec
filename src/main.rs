use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::{panic, process};

use anyhow::Context;
use clap::{Arg, Command, value_parser};
use log::{error, info};
use mediabridge::capture::{LoopbackDevices, LoopbackSessionFactory};
use mediabridge::config::{BridgeConfig, app_name, app_version};
use mediabridge::utils::sos::SignalOfStop;
use mediabridge::workers::{CaptureEngine, ModuleEvent, ModuleRegistry, StateCallback};
use tracing_subscriber::EnvFilter;

fn yes_no(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("yes/no")
        .help(help)
        .required(false)
        .default_missing_value("yes")
        .ignore_case(true)
        .num_args(0..=1)
}

fn parse_yes_no(value: Option<&String>) -> Option<bool> {
    value.map(|val| val.to_lowercase() == "yes")
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = Command::new(app_name())
        .version(app_version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_name("PIXELS")
                .help("Preview width.")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_name("PIXELS")
                .help("Preview height.")
                .value_parser(value_parser!(u32)),
        )
        .arg(yes_no("audio", "Capture an audio stream next to video (yes/no)."))
        .arg(yes_no("mrc", "Attach mixed-reality-capture effects (yes/no)."))
        .arg(
            Arg::new("duration")
                .short('d')
                .long("duration")
                .value_name("SECONDS")
                .help("Stop after this many seconds instead of waiting for Ctrl-C.")
                .value_parser(value_parser!(u64)),
        )
        .get_matches();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(width) = matches.get_one::<u32>("width") {
        config.preview.width = *width;
    }
    if let Some(height) = matches.get_one::<u32>("height") {
        config.preview.height = *height;
    }
    if let Some(audio) = parse_yes_no(matches.get_one::<String>("audio")) {
        config.preview.enable_audio = audio;
    }
    if let Some(mrc) = parse_yes_no(matches.get_one::<String>("mrc")) {
        config.preview.enable_mrc = mrc;
    }
    let duration = matches.get_one::<u64>("duration").map(|secs| Duration::from_secs(*secs));

    // kill the process as soon as a background thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    let sos = SignalOfStop::new();
    {
        let sos = sos.clone();
        ctrlc::set_handler(move || sos.cancel()).context("Error setting Ctrl-C handler")?;
    }

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(run(config, sos, duration))
}

async fn run(config: BridgeConfig, sos: SignalOfStop, duration: Option<Duration>) -> anyhow::Result<()> {
    let callback: StateCallback = Arc::new(|event: ModuleEvent| {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));
        match event {
            ModuleEvent::Failed { .. } => error!("Module event: {}", payload),
            _ => info!("Module event: {}", payload),
        }
    });

    let sessions = Arc::new(LoopbackSessionFactory::new(
        config.loopback.frame_interval(),
        config.loopback.sample_size,
    ));
    let engine = Arc::new(CaptureEngine::create(
        Arc::new(LoopbackDevices::new()),
        sessions,
        config.effects,
        callback,
    )?);

    let registry = ModuleRegistry::global();
    let handle = registry.insert(engine.clone());

    let preview = config.preview;
    engine
        .start_preview(preview.width, preview.height, preview.enable_audio, preview.enable_mrc)?
        .wait()
        .await
        .context("starting preview")?;

    let stop = {
        let sos = sos.clone();
        tokio::task::spawn_blocking(move || match duration {
            Some(duration) => sos.wait_cancellation_timeout(duration),
            None => {
                sos.wait_cancellation();
                true
            }
        })
    };
    tokio::pin!(stop);

    let log_health = config.health_interval_secs > 0;
    let mut ticker = tokio::time::interval(Duration::from_secs(config.health_interval_secs.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            stopped = &mut stop => {
                match stopped {
                    Ok(true) => info!("Stop requested"),
                    Ok(false) => info!("Duration elapsed"),
                    Err(e) => error!("Stop watcher failed: {}", e),
                }
                break;
            }
            _ = ticker.tick(), if log_health => {
                for sink in engine.active_sinks().await {
                    info!("Stream {} {}", sink.identifier(), sink.health().summary());
                }
                let video = engine.video_buffer();
                if let Some(latest) = video.latest() {
                    info!("Latest video sample #{} at {}", latest.sequence, latest.sample.pts);
                }
            }
        }
    }

    engine.stop_preview()?.wait().await.context("stopping preview")?;
    registry.release(handle).await?;
    Ok(())
}
