use anyhow::{bail, Context, Result};
use std::fs;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use talava_avatar::animation::LowerBodyClip;
use talava_avatar::config::Config;
use talava_avatar::pose::Landmark;
use talava_avatar::retarget::{RetargetEngine, RetargetOptions};
use talava_avatar::vmc::VmcClient;

const CONFIG_PATH: &str = "config.toml";
const STATS_INTERVAL_SECS: f32 = 5.0;

/// JSON Lines: 1 行 = 1 フレーム（ランドマーク 33 個の配列）
/// 空行は無視、壊れた行は警告して飛ばす
fn parse_recording(content: &str) -> Vec<Vec<Landmark>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(i, line)| match serde_json::from_str::<Vec<Landmark>>(line) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("line {}: {}", i + 1, e);
                None
            }
        })
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "talava_avatar=info".into()),
        )
        .init();

    let config = Config::load_or_default(CONFIG_PATH);
    // Usage: talava-avatar [recording.jsonl]
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.replay.path.clone());

    info!("Talava Avatar ({})", env!("GIT_VERSION"));
    info!("VMC target: {}", config.vmc.addr);
    info!("Replay: {} @ {} fps{}", path, config.replay.fps, if config.replay.looped { " (loop)" } else { "" });
    info!("Lower body: {}", if config.retarget.lower_body { "tracked" } else { "clip" });

    let content = fs::read_to_string(&path).with_context(|| format!("failed to read {}", path))?;
    let frames = parse_recording(&content);
    if frames.is_empty() {
        bail!("no frames in {}", path);
    }
    info!("{} frames loaded", frames.len());

    let mut engine = RetargetEngine::from_config(&config)?;
    if let Some(clip_path) = &config.replay.lower_body_clip {
        let clip = LowerBodyClip::load(clip_path, engine.skeleton())
            .with_context(|| format!("failed to load clip {}", clip_path))?;
        info!("Lower body clip: {} ({} frames)", clip_path, clip.len());
        engine = engine.with_lower_body_clip(clip);
    }

    let options = RetargetOptions::from_config(&config.retarget);
    let client = VmcClient::new(&config.vmc.addr)?;
    let frame_duration = Duration::from_secs_f32(1.0 / config.replay.fps.max(1.0));

    let mut sent = 0u32;
    let mut skipped = 0u32;
    let mut stats_start = Instant::now();

    loop {
        for (i, raw) in frames.iter().enumerate() {
            let frame_start = Instant::now();

            match engine.process(raw, &options) {
                Ok(span) => debug!("frame {}: shoulder span {:?}", i, span),
                Err(e) => {
                    debug!("frame {} skipped: {}", i, e);
                    skipped += 1;
                    continue;
                }
            }
            client.send_skeleton(engine.skeleton())?;
            sent += 1;

            let elapsed = stats_start.elapsed().as_secs_f32();
            if elapsed >= STATS_INTERVAL_SECS {
                info!("FPS: {:.1} (skipped: {})", sent as f32 / elapsed, skipped);
                sent = 0;
                skipped = 0;
                stats_start = Instant::now();
            }

            if let Some(rest) = frame_duration.checked_sub(frame_start.elapsed()) {
                thread::sleep(rest);
            }
        }

        if !config.replay.looped {
            break;
        }
    }

    info!("Replay finished");
    Ok(())
}
