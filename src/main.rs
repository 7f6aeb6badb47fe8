//! Headless pipeline driver.
//!
//! Runs the chunk pipeline without a GPU: loads a region, walks the player
//! across it, and prints frame statistics. Useful for soak-testing the
//! pipeline and as a minimal embedding example.

use anyhow::{bail, Context, Result};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use stratum::prelude::*;

struct Options {
    config: EngineConfig,
    world_path: PathBuf,
    seed: i32,
    ticks: usize,
}

fn parse_args() -> Result<Options> {
    let mut options = Options {
        config: EngineConfig::default(),
        world_path: PathBuf::from("worlds/soak"),
        seed: 0,
        ticks: 600,
    };

    let mut args = std::env::args().skip(1);
    while let Some(flag) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .with_context(|| format!("{name} expects a value"))
        };
        match flag.as_str() {
            "--radius" => options.config.chunk_radius = value("--radius")?.parse()?,
            "--samples" => options.config.msaa_samples = value("--samples")?.parse()?,
            "--fxaa" => options.config.fxaa = true,
            "--seed" => options.seed = value("--seed")?.parse()?,
            "--world" => options.world_path = PathBuf::from(value("--world")?),
            "--ticks" => options.ticks = value("--ticks")?.parse()?,
            "--help" => {
                println!(
                    "usage: stratum [--radius N] [--samples N] [--fxaa] \
                     [--seed N] [--world PATH] [--ticks N]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown flag {other}"),
        }
    }
    options.config.validate()?;
    Ok(options)
}

fn main() -> Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("failed to initialize logger")?;

    let options = parse_args()?;
    let mut world = World::init(options.config.clone(), options.seed, &options.world_path)
        .context("failed to initialize world")?;

    let view_direction = Vec3::new(0.0, -0.2, -1.0);
    let mut position = Vec3::new(8.0, 200.0, 8.0);

    for tick in 0..options.ticks {
        // Drift forward about one chunk every 40 ticks, with a slow
        // day/night swing on the sky-light factor.
        position.z -= 0.4;
        let phase = (tick as f32 * 0.01).sin();
        world.set_sky_light_level((11.0 + 4.0 * phase) as u8);
        let commands = world.tick(position, view_direction);
        if tick % 60 == 0 {
            let opaque_count = commands.opaque.len();
            let transparent_count = commands.transparent.len();
            let stats = world.stats();
            info!(
                "tick {tick}: {} opaque + {} transparent draws, {} faces, \
                 {} chunks resident, {} buckets used",
                opaque_count,
                transparent_count,
                stats.faces_drawn,
                stats.resident_chunks,
                stats.buckets_used
            );
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    world.save_all();
    let stats = world.stats();
    info!(
        "done: {} chunks resident, {} KiB of vertex data",
        stats.resident_chunks,
        stats.vertex_bytes_used / 1024
    );
    world.shutdown();
    Ok(())
}
