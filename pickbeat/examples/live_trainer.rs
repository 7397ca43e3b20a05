//! Live rhythm training against the default input device
//!
//! Run: cargo run --example live_trainer -- [tempo] [seconds] [--monitor]
//!
//! Set `PICKBEAT_CONFIG` to a JSON file to override the defaults.

use std::time::Duration;

use anyhow::Context;
use pickbeat::audio::DeviceRegistry;
use pickbeat::state::TrainerConfig;
use pickbeat::utils::logging::init_logging;
use pickbeat::RhythmTrainer;

fn load_config() -> anyhow::Result<TrainerConfig> {
    match std::env::var("PICKBEAT_CONFIG") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            Ok(TrainerConfig::from_json(&json)?)
        }
        Err(_) => Ok(TrainerConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let mut config = load_config()?;
    let mut positional = Vec::new();
    for arg in std::env::args().skip(1) {
        if arg == "--monitor" {
            config.audio.monitoring = true;
        } else {
            positional.push(arg);
        }
    }
    if let Some(tempo) = positional.first() {
        config.rhythm.tempo_bpm = tempo.parse().context("tempo must be a number")?;
    }
    let seconds: u64 = match positional.get(1) {
        Some(s) => s.parse().context("duration must be whole seconds")?,
        None => 15,
    };

    println!("=== Input devices ===");
    for device in DeviceRegistry::system().list_input_devices()? {
        let marker = if device.is_default_input { "*" } else { " " };
        println!("{marker} {} {} ({} ch)", device.id, device.name, device.max_input_channels);
    }
    println!();

    let trainer = RhythmTrainer::from_config(config.sanitized()?);
    let mut hits = trainer.subscribe_hits();
    trainer.start()?;
    println!(
        "Play along at {:.0} BPM for {seconds}s (monitoring: {})\n",
        trainer.tempo(),
        trainer.controller().state().is_monitoring()
    );

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(hit) = hits.recv() => {
                let verdict = if hit.is_accurate { "ok " } else { "off" };
                println!(
                    "[{verdict}] beat {:>4}  deviation {:.3}  level {:.2}",
                    hit.beat, hit.deviation, hit.rms
                );
            }
        }
    }

    trainer.stop()?;
    let stats = trainer.stats();
    println!(
        "\n{}/{} accurate ({:.0}%), mean deviation {:.3}",
        stats.accurate_hits,
        stats.total_hits,
        stats.accuracy * 100.0,
        stats.mean_deviation
    );
    println!("{:?}", trainer.controller().diagnostics());
    Ok(())
}
