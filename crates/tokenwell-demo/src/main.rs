//! Tokenwell demo host.
//!
//! Runs a fixed-rate frame loop that drives an injector's clock, provides a
//! token after a configurable number of frames, and prints the registry
//! snapshot as JSON once every requirement has settled.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokenwell::{ConsumerContext, Injector, InjectorSettings, Inspector, Token, TokenSource};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tokenwell-demo")]
#[command(about = "Frame-loop host for the tokenwell registry")]
struct Args {
    /// Seconds the renderer waits for display settings (defaults to the
    /// injector's configured wait)
    #[arg(short, long)]
    wait_secs: Option<u64>,

    /// Frame on which display settings are provided (0 = never)
    #[arg(short, long, default_value = "30")]
    provide_after_frames: u64,

    /// Frame period in milliseconds
    #[arg(long, default_value = "16")]
    frame_ms: u64,

    /// Injector settings file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct DisplaySettings {
    width: u32,
    height: u32,
    vsync: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct FrameCounter(u64);

fn describe_mode(mode: &DisplaySettings) -> String {
    format!("{}x{} (vsync {})", mode.width, mode.height, mode.vsync)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let settings = match &args.config {
        Some(path) => InjectorSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => InjectorSettings::default(),
    };
    let injector = Injector::builder().settings(&settings).build();
    let max_wait = args
        .wait_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| injector.default_require_wait());
    let frame = Duration::from_millis(args.frame_ms.max(1));

    info!(
        "Starting frame loop: {:?} per frame, renderer waits up to {:?}",
        frame, max_wait
    );

    let _inspector = Inspector::attach(injector.registry(), || debug!("Registry changed"))?;

    let mut renderer = ConsumerContext::new(injector.clone(), "renderer");
    renderer
        .inject::<DisplaySettings, _>(
            |mode| info!("Renderer configured for {}", describe_mode(&mode)),
            max_wait,
        )?
        .inject_optional::<FrameCounter, _>(|counter| debug!("Renderer saw frame {}", counter.0))?;

    let mut display_source = None;
    let mut counter_source: Option<TokenSource<FrameCounter>> = None;
    let mut frames = tokio::time::interval(frame);
    let mut frame_number = 0u64;

    let reports = {
        let mut settle = std::pin::pin!(renderer.settle());
        loop {
            tokio::select! {
                reports = &mut settle => break reports,
                _ = frames.tick() => {
                    frame_number += 1;
                    if frame_number == args.provide_after_frames {
                        let display = DisplaySettings { width: 1920, height: 1080, vsync: true };
                        display_source = Some(TokenSource::provide(&injector, Token::new(display))?);
                    }
                    // Withdraw the previous frame's counter before providing the next.
                    drop(counter_source.take());
                    counter_source =
                        Some(TokenSource::provide(&injector, Token::new(FrameCounter(frame_number)))?);
                    injector.clock().advance(frame);
                }
            }
        }
    };

    for report in &reports {
        match &report.outcome {
            Ok(resolution) if resolution.is_satisfied() => {
                info!("{} satisfied after {:?}", report.token_type, resolution.waited)
            }
            Ok(resolution) => warn!("{} timed out after {:?}", report.token_type, resolution.waited),
            Err(e) => warn!("{} failed: {}", report.token_type, e),
        }
    }
    info!("Settled after {} frames", frame_number);

    // Snapshot for the caller (intentional stdout)
    let snapshot = injector.registry().snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    drop(counter_source);
    drop(display_source);
    renderer.dispose();
    injector.dispose();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_mode() {
        let mode = DisplaySettings {
            width: 1280,
            height: 720,
            vsync: false,
        };
        assert_eq!(describe_mode(&mode), "1280x720 (vsync false)");
    }
}
