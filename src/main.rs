// src/main.rs
//
// Offline renderer: plays a definition file through the engine, optionally
// swaps in an edited file part way through, and reports output levels.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use log::{info, warn};

use wavelive::{EngineConfig, EngineEvent, FadeCurve, create_bridge};

const BLOCK_FRAMES: usize = 256;

#[derive(Parser)]
#[command(name = "wavelive-engine", version, about = "Render a live-coding definition file offline")]
struct Args {
    /// Definition file to play from the start
    input: PathBuf,

    /// Edited definition file to submit part way through
    #[arg(long)]
    edit: Option<PathBuf>,

    /// Time at which the edit is submitted, in seconds
    #[arg(long, default_value_t = 1.0, requires = "edit")]
    edit_at: f64,

    /// Length of the render, in seconds
    #[arg(short, long, default_value_t = 2.0)]
    seconds: f64,

    #[arg(long, default_value_t = 44_100.0)]
    sample_rate: f64,

    /// Crossfade applied to changed voices, in milliseconds
    #[arg(long, default_value_t = 50.0)]
    crossfade_ms: f64,

    #[arg(long, value_enum, default_value_t = FadeCurve::EqualPower)]
    curve: FadeCurve,

    /// Write the rendered samples as raw little-endian f32 to this file
    #[arg(short, long)]
    out: Option<PathBuf>,
}

/// Running level statistics over the rendered output.
#[derive(Default)]
struct Levels {
    peak: f32,
    sum_squares: f64,
    frames: u64,
    max_step: f32,
    last: f32,
}

impl Levels {
    fn add(&mut self, block: &[f32]) {
        for &sample in block {
            self.peak = self.peak.max(sample.abs());
            self.sum_squares += f64::from(sample) * f64::from(sample);
            if self.frames > 0 {
                self.max_step = self.max_step.max((sample - self.last).abs());
            }
            self.last = sample;
            self.frames += 1;
        }
    }

    fn rms(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            (self.sum_squares / self.frames as f64).sqrt()
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    if !(args.seconds.is_finite() && args.seconds >= 0.0) {
        bail!("--seconds must be a non-negative number");
    }

    let config = EngineConfig {
        sample_rate: args.sample_rate,
        crossfade_ms: args.crossfade_ms,
        curve: args.curve,
        ..Default::default()
    };
    let (mut session, mut engine) = create_bridge(&config).context("invalid engine configuration")?;

    let source = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    session
        .submit_definitions(&source)
        .with_context(|| format!("{} was rejected", args.input.display()))?;

    let mut edit = match &args.edit {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let at = (args.edit_at.max(0.0) * args.sample_rate).round() as u64;
            Some((at, path, text))
        }
        None => None,
    };

    let mut out = match &args.out {
        Some(path) => Some(BufWriter::new(
            fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => None,
    };

    let total = (args.seconds * args.sample_rate).round() as u64;
    let mut levels = Levels::default();
    let mut block = [0.0f32; BLOCK_FRAMES];
    let mut rendered = 0u64;

    while rendered < total {
        if let Some((at, path, text)) = &edit
            && rendered >= *at
        {
            if let Err(e) = session.submit_definitions(text) {
                warn!("edit {} was rejected: {e}", path.display());
            }
            edit = None;
        }

        let mut frames = (total - rendered).min(BLOCK_FRAMES as u64) as usize;
        if let Some((at, _, _)) = &edit {
            // Land the edit exactly on its frame.
            frames = frames.min((*at - rendered) as usize).max(1);
        }

        let chunk = &mut block[..frames];
        engine.render_mono(chunk);
        levels.add(chunk);
        if let Some(out) = out.as_mut() {
            for sample in chunk.iter() {
                out.write_all(&sample.to_le_bytes())?;
            }
        }
        rendered += frames as u64;

        for event in session.poll_events() {
            if let EngineEvent::PatchApplied { generation, voices } = event {
                info!("generation {generation} applied before frame {rendered}: {voices} voice(s)");
            }
        }
    }

    if let Some(mut out) = out {
        out.flush()?;
    }

    let readback = session.readback();
    println!("frames:      {}", readback.frames_rendered);
    println!("voices:      {}", readback.active_voices);
    println!("peak:        {:.6}", levels.peak);
    println!("rms:         {:.6}", levels.rms());
    println!("max step:    {:.6}", levels.max_step);
    if readback.dropped_events > 0 {
        warn!("{} engine events were dropped", readback.dropped_events);
    }

    Ok(())
}
