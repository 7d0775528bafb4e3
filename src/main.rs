use anyhow::Context;
use env_logger::Builder;
use log::{LevelFilter, error, info};
use std::path::Path;
use std::process::ExitCode;

use swarm_radio_simulator::common::scene::load_scene;
use swarm_radio_simulator::control::MediumConfig;
use swarm_radio_simulator::scenario::Simulation;

fn run(scene_path: &str) -> anyhow::Result<()> {
    let scene = load_scene(scene_path).with_context(|| format!("Failed to load scene {scene_path}"))?;

    let config_path = MediumConfig::config_path_from_scene(scene_path);
    let config = if config_path.exists() {
        info!("Using medium config {}", config_path.display());
        MediumConfig::load(&config_path)?
    } else {
        info!("No config.toml next to the scene, using defaults");
        MediumConfig::default()
    };

    let mut simulation = Simulation::from_scene(&scene, config);
    let report = simulation.run();

    for line in simulation.console().lines() {
        info!("{line}");
    }
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize simulation report")?;
    println!("{json}");
    Ok(())
}

fn main() -> ExitCode {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("swarm_radio_simulator"), LevelFilter::Debug)
        .init();

    let Some(scene_path) = std::env::args().nth(1) else {
        error!("Usage: swarm-radio-simulator <scene.json>");
        return ExitCode::from(2);
    };
    if !Path::new(&scene_path).exists() {
        error!("Scene file not found: {scene_path}");
        return ExitCode::from(2);
    }

    info!("Starting up");
    match run(&scene_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
