use anyhow::{bail, Context, Result};
use std::io::{self, Write};
use std::sync::Arc;

use depth_tracker::calibration::SharedCalibration;
use depth_tracker::capture::{CaptureSource, Recorder, ReplaySource, SyntheticSource};
use depth_tracker::config::{Config, SourceKind};
use depth_tracker::tracker::{Bone, BoneProvider, StartOutcome};
use depth_tracker::vmt::VmtSink;

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("depth-tracker {}", env!("GIT_VERSION"));

    let config = Config::load_or_default(CONFIG_PATH);

    match config.source.kind {
        SourceKind::Synthetic => start(SyntheticSource::new(config.source.frame_rate), &config),
        SourceKind::Replay => {
            let path = &config.source.replay_path;
            let source = ReplaySource::from_file(path, config.source.looping)
                .with_context(|| format!("Failed to load recording: {}", path))?;
            start(source, &config)
        }
    }
}

fn start<S: CaptureSource + 'static>(source: S, config: &Config) -> Result<()> {
    match &config.source.record_path {
        Some(path) => {
            log::info!("Recording body frames to {}", path);
            run(Recorder::new(source, path, config.source.frame_rate), config)
        }
        None => run(source, config),
    }
}

fn run<S: CaptureSource + 'static>(source: S, config: &Config) -> Result<()> {
    let sink = VmtSink::connect(&config.vmt.addr, config.vmt.enable)?;
    let calibration = SharedCalibration::default();

    let mut provider = BoneProvider::new(
        source,
        sink,
        Arc::new(calibration.clone()),
        config.loop_settings(),
    )
    .with_bind_poll(config.device.bind_poll());
    provider.configure(config.device.device_config());

    let outcome = provider.start()?;
    if outcome != StartOutcome::Started {
        bail!("Tracking did not start: {:?}", outcome);
    }
    for bone in Bone::ALL {
        provider.bind(bone, config.bones.handle(bone));
    }

    println!("=== Depth Tracker ===");
    println!("送信先: {}", config.vmt.addr);
    println!();
    println!("コマンド:");
    println!("  o x y z       - 並進オフセット (例: o 0 0.1 0)");
    println!("  r w x y z     - 回転オフセット (例: r 1 0 0 0)");
    println!("  s v           - スムージング値 / 自動時はリセット閾値");
    println!("  a             - 自動スムージング切替");
    println!("  e             - 胸・肘・膝トラッカー切替");
    println!("  p             - 現在の値を表示");
    println!("  q             - 終了");
    println!();

    let result = console(&calibration, || provider.is_online());
    provider.stop();
    result
}

fn console(calibration: &SharedCalibration, is_online: impl Fn() -> bool) -> Result<()> {
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();

        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "o" if parts.len() == 4 => match parse_floats(&parts[1..]) {
                Some(v) => {
                    calibration.set_offset([v[0], v[1], v[2]]);
                    println!("オフセット: {:?}", [v[0], v[1], v[2]]);
                }
                None => println!("数値を指定してください"),
            },
            "r" if parts.len() == 5 => match parse_floats(&parts[1..]) {
                Some(v) => {
                    calibration.set_rotation_offset([v[0], v[1], v[2], v[3]]);
                    println!("回転: {:?}", [v[0], v[1], v[2], v[3]]);
                }
                None => println!("数値を指定してください"),
            },
            "s" if parts.len() == 2 => match parse_floats(&parts[1..]) {
                Some(v) => {
                    calibration.set_smoothing(v[0]);
                    println!("スムージング: {}", v[0]);
                }
                None => println!("数値を指定してください"),
            },
            "a" => {
                let enabled = !calibration.state().auto_smooth;
                calibration.set_auto_smooth(enabled);
                println!("自動スムージング: {}", if enabled { "ON" } else { "OFF" });
            }
            "e" => {
                let enabled = !calibration.state().extended_trackers;
                calibration.set_extended_trackers(enabled);
                println!("拡張トラッカー: {}", if enabled { "ON" } else { "OFF" });
            }
            "p" => {
                let state = calibration.state();
                println!("現在の値:");
                println!("  オフセット: {:?}", state.offset);
                println!("  回転: {:?}", state.rotation_offset);
                println!("  スムージング: {} (自動: {})", state.smoothing, state.auto_smooth);
                println!("  拡張トラッカー: {}", state.extended_trackers);
                println!("  トラッキング: {}", if is_online() { "稼働中" } else { "待機中" });
            }
            "q" => {
                println!("終了します");
                break;
            }
            _ => {
                println!("不明なコマンド: {}", parts[0]);
            }
        }
    }

    Ok(())
}

fn parse_floats(args: &[&str]) -> Option<Vec<f32>> {
    args.iter().map(|s| s.parse().ok()).collect()
}
