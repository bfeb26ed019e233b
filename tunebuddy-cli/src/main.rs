//! Command-line front end: analyse a recording against a reference score and
//! print the mistakes.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Level, info};
use tunebuddy_core::align::MistakeSummary;
use tunebuddy_core::{Alignment, Note, Score, SessionConfig, analyze};

#[derive(Parser)]
#[command(name = "tunebuddy")]
#[command(about = "Compare a played melody with its score", long_about = None)]
struct Cli {
    /// Log per-frame and per-window detail
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Session configuration (JSON); missing fields keep their defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse a WAV recording
    Analyze {
        /// Recording to analyse (mono or multichannel, any bit depth)
        audio: PathBuf,

        /// Reference score (JSON); without one only detected notes are shown
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// Play the reference at this tempo instead of its own
        #[arg(short, long)]
        tempo: Option<f64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Also print the full alignment path
        #[arg(long)]
        pairs: bool,

        /// Write the JSON report to a file as well
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the default session configuration as JSON
    DefaultConfig,

    /// Analyse the default input device live
    #[cfg(feature = "capture")]
    Listen {
        /// Reference score (JSON)
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// Seconds to listen for
        #[arg(short, long, default_value = "10")]
        seconds: f64,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Everything a run produced, as written out with `--json`.
#[derive(Serialize)]
struct Report {
    notes: Vec<Arc<Note>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<MistakeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alignment: Option<Alignment>,
}

impl Report {
    fn print_text(&self, pairs: bool) {
        println!("DETECTED NOTES\n---");
        for note in &self.notes {
            println!("{note}");
        }
        if let (Some(alignment), Some(summary)) = (&self.alignment, &self.summary) {
            if pairs {
                println!("\n{}", alignment.display_pairs());
            }
            println!("\n{alignment}");
            println!("\n{summary}");
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => load_json::<SessionConfig>(path)?,
        None => SessionConfig::default(),
    };

    match cli.command {
        Commands::Analyze {
            audio,
            reference,
            tempo,
            json,
            pairs,
            output,
        } => {
            let (samples, sample_rate) = load_wav(&audio)?;
            let mut config = config;
            if sample_rate != config.pitch.sample_rate {
                info!(
                    configured = config.pitch.sample_rate,
                    recording = sample_rate,
                    "using the recording's sample rate"
                );
                config.pitch.sample_rate = sample_rate;
            }

            let analysis = analyze(&samples, &config)?;
            let notes = analysis.notes.notes();

            let alignment = match reference {
                Some(path) => {
                    let mut score = load_json::<Score>(&path)?;
                    if let Some(bpm) = tempo {
                        score.change_tempo(bpm)?;
                    }
                    Some(analysis.align(&score.reference_notes(), &config.aligner)?)
                }
                None => None,
            };

            let report = Report {
                notes,
                summary: alignment.as_ref().map(Alignment::summary),
                alignment,
            };
            if let Some(path) = output {
                save_json(&report, &path)?;
                info!(path = %path.display(), "report written");
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report.print_text(pairs);
            }
        }

        Commands::DefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&SessionConfig::default())?);
        }

        #[cfg(feature = "capture")]
        Commands::Listen {
            reference,
            seconds,
            json,
        } => listen::run(config, reference, seconds, json)?,
    }

    Ok(())
}

/// Reads a WAV file as mono `f32` samples, averaging channels.
fn load_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("cannot open recording {}", path.display()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_val))
                .collect::<Result<_, _>>()?
        }
    };

    let channels = usize::from(spec.channels);
    if channels == 0 {
        bail!("{} has no channels", path.display());
    }
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    info!(
        path = %path.display(),
        sample_rate = spec.sample_rate,
        channels,
        "recording loaded"
    );
    Ok((mono, spec.sample_rate))
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mut file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut data = String::new();
    file.read_to_string(&mut data)?;
    serde_json::from_str(&data).with_context(|| format!("cannot parse {}", path.display()))
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let json_string = serde_json::to_string_pretty(value)?;
    let mut file = File::create(path)?;
    file.write_all(json_string.as_bytes())?;
    Ok(())
}

#[cfg(feature = "capture")]
mod listen {
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    use anyhow::Result;
    use cpal::traits::StreamTrait;
    use crossbeam_channel::select;
    use tracing::{info, warn};
    use tunebuddy_core::audio::start_audio_capture;
    use tunebuddy_core::{PipelineEvent, Score, Session, SessionConfig};

    use super::{Report, load_json};

    /// Runs a live session for `seconds`, printing notes as they close.
    pub fn run(config: SessionConfig, reference: Option<PathBuf>, seconds: f64, json: bool) -> Result<()> {
        let (mut session, events) = Session::new(config)?;
        if let Some(path) = &reference {
            session.load_score(&load_json::<Score>(path)?);
        }

        session.start(0.0)?;
        let (stream, _) = start_audio_capture(config.pitch.sample_rate, 0.0, session.capture_sink())?;
        info!(seconds, "listening");

        let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            select! {
                recv(events) -> event => match event {
                    Ok(PipelineEvent::NoteDetected { start_time }) => {
                        if let Some(note) = session.notes().read_nearest(start_time) {
                            println!("{note}");
                        }
                    }
                    Ok(_) => {}
                    Err(_) => break,
                },
                default(left) => break,
            }
        }

        if let Err(e) = stream.pause() {
            warn!(error = %e, "could not pause the input stream");
        }
        drop(stream);
        let stats = session.stop();
        info!(
            pitches = stats.pitch.processed,
            skipped = stats.pitch.skipped,
            "stopped listening"
        );

        let alignment = match reference {
            Some(_) => Some(session.align()?.as_ref().clone()),
            None => None,
        };
        let report = Report {
            notes: session.notes().notes(),
            summary: alignment.as_ref().map(|a| a.summary()),
            alignment,
        };
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            report.print_text(false);
        }
        Ok(())
    }
}
