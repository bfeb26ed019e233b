//! # Session Module
//!
//! Wires the pipeline stages together, live and offline.
//!
//! ## Features
//! - Live sessions: a capture callback feeds samples in while a pitch worker
//!   and a note worker run behind it, each on its own thread
//! - Restartable: every start clears the previous run's buffers first
//! - Progress notifications over a `crossbeam_channel`
//! - Offline analysis of a whole recording with [`analyze`]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use tracing::info;

use crate::align::{Aligner, Alignment};
use crate::buffer::{FrameQueue, SampleBuffer};
use crate::config::{AlignerConfig, SessionConfig};
use crate::error::Result;
use crate::note::{Note, NoteSegmenter, NoteStore, OnsetTracker};
use crate::pitch::{Pitch, PitchEstimator, PitchStream};
use crate::score::Score;
use crate::worker::{Stage, Tick, Worker, WorkerStats};

/// Progress notifications for whoever renders the session.
///
/// Events carry times, not data: the receiver reads the stores at that
/// time.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    PitchDetected { time: f64 },
    NoteDetected { start_time: f64 },
    AlignmentReady(Arc<Alignment>),
}

/// Frame counters of both workers after a stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub pitch: WorkerStats,
    pub note: WorkerStats,
}

struct PitchStage {
    estimator: PitchEstimator,
    audio: Arc<FrameQueue<f32>>,
    pitches: Arc<PitchStream>,
    pitch_queue: Arc<FrameQueue<Pitch>>,
    events: Sender<PipelineEvent>,
}

impl Stage for PitchStage {
    fn tick(&mut self) -> Tick {
        let frames = self.estimator.frames();
        let Some(frame) = self.audio.pop(frames.frame_size, frames.hop_size) else {
            return Tick::Idle;
        };
        match self.estimator.detect_pitch(&frame.data, frame.start_time) {
            Ok(pitch) => {
                let time = pitch.time;
                self.pitches.write([pitch.clone()], Some(time));
                self.pitch_queue.push([pitch]);
                let _ = self.events.send(PipelineEvent::PitchDetected { time });
                Tick::Processed
            }
            Err(e) => Tick::Skipped(e),
        }
    }
}

struct NoteStage {
    segmenter: NoteSegmenter,
    tracker: OnsetTracker,
    pitch_queue: Arc<FrameQueue<Pitch>>,
    notes: Arc<NoteStore>,
    events: Sender<PipelineEvent>,
}

impl NoteStage {
    fn publish(&self, note: Note) {
        let start_time = note.start_time;
        self.notes.write(note);
        let _ = self.events.send(PipelineEvent::NoteDetected { start_time });
    }
}

impl Stage for NoteStage {
    fn tick(&mut self) -> Tick {
        let window = self.segmenter.config().window;
        let Some(frame) = self.pitch_queue.pop(window.frame_size, window.hop_size) else {
            return Tick::Idle;
        };
        let summary = match self.segmenter.summarize(&frame.data) {
            Ok(summary) => summary,
            Err(e) => return Tick::Skipped(e),
        };
        if let Some(note) = self.tracker.push(&summary) {
            self.publish(note);
        }
        Tick::Processed
    }

    /// Closes the note still sounding when the session stops.
    fn finish(&mut self) {
        if let Some(note) = self.tracker.finish() {
            self.publish(note);
        }
    }
}

/// One recording's worth of buffers plus the workers filling them.
pub struct Session {
    config: SessionConfig,
    samples: Arc<SampleBuffer>,
    audio_queue: Arc<FrameQueue<f32>>,
    pitches: Arc<PitchStream>,
    pitch_queue: Arc<FrameQueue<Pitch>>,
    notes: Arc<NoteStore>,
    reference: Mutex<Arc<NoteStore>>,
    events: Sender<PipelineEvent>,
    pitch_worker: Option<Worker>,
    note_worker: Option<Worker>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("running", &self.is_running())
            .field("pitches", &self.pitches)
            .field("notes", &self.notes)
            .finish()
    }
}

impl Session {
    /// A stopped session plus the receiving end of its events.
    pub fn new(config: SessionConfig) -> Result<(Self, Receiver<PipelineEvent>)> {
        let (events, receiver) = crossbeam_channel::unbounded();
        Ok((Self::with_events(config, events)?, receiver))
    }

    /// A stopped session reporting to an existing channel.
    pub fn with_events(config: SessionConfig, events: Sender<PipelineEvent>) -> Result<Self> {
        config.validate()?;
        let sample_rate = config.pitch.sample_rate;
        Ok(Self {
            samples: Arc::new(SampleBuffer::new(sample_rate)),
            audio_queue: Arc::new(FrameQueue::new(f64::from(sample_rate))),
            pitches: Arc::new(PitchStream::new(sample_rate, config.audio_frames.hop_size)),
            pitch_queue: Arc::new(FrameQueue::new(config.pitch_rate())),
            notes: Arc::new(NoteStore::new()),
            reference: Mutex::new(Arc::new(NoteStore::new())),
            events,
            pitch_worker: None,
            note_worker: None,
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Starts a fresh run whose first sample is at `start_time`.
    ///
    /// A running session is stopped first, and every buffer of the
    /// performance is cleared, so nothing from an earlier run leaks into
    /// this one. The reference is kept.
    ///
    /// # Arguments
    /// * `start_time` - Time of the first sample written after this call,
    ///   in seconds
    ///
    /// # Returns
    /// * `Ok(())` - Both workers are running
    /// * `Err(e)` - A worker thread could not be started
    pub fn start(&mut self, start_time: f64) -> Result<()> {
        self.stop();

        self.samples.clear();
        self.pitches.clear();
        self.notes.clear();
        self.audio_queue.reset(start_time);
        self.pitch_queue.reset(start_time);

        let pitch_stage = PitchStage {
            estimator: PitchEstimator::new(&self.config)?,
            audio: Arc::clone(&self.audio_queue),
            pitches: Arc::clone(&self.pitches),
            pitch_queue: Arc::clone(&self.pitch_queue),
            events: self.events.clone(),
        };
        let segmenter = NoteSegmenter::new(self.config.segmenter)?;
        let note_stage = NoteStage {
            tracker: OnsetTracker::new(self.config.segmenter, true),
            segmenter,
            pitch_queue: Arc::clone(&self.pitch_queue),
            notes: Arc::clone(&self.notes),
            events: self.events.clone(),
        };

        self.pitch_worker = Some(Worker::spawn("pitch-worker", pitch_stage)?);
        match Worker::spawn("note-worker", note_stage) {
            Ok(worker) => self.note_worker = Some(worker),
            Err(e) => {
                self.stop();
                return Err(e);
            }
        }
        info!(start_time, "session started");
        Ok(())
    }

    /// Stops both workers, pitch first so the note worker sees its last
    /// output. Safe to call on a stopped session.
    pub fn stop(&mut self) -> SessionStats {
        let stats = SessionStats {
            pitch: self.pitch_worker.take().map(Worker::stop).unwrap_or_default(),
            note: self.note_worker.take().map(Worker::stop).unwrap_or_default(),
        };
        if stats != SessionStats::default() {
            info!(
                pitches = stats.pitch.processed,
                notes_windows = stats.note.processed,
                "session stopped"
            );
        }
        stats
    }

    pub fn is_running(&self) -> bool {
        self.pitch_worker.is_some() || self.note_worker.is_some()
    }

    /// Capture entry point: stores `samples` recorded at `at_time` and
    /// queues them for pitch detection.
    pub fn write_samples(&self, samples: &[f32], at_time: f64) {
        write_to(&self.samples, &self.audio_queue, samples, at_time);
    }

    /// A `'static` callback equivalent to [`write_samples`](Self::write_samples),
    /// for handing to an audio thread.
    pub fn capture_sink(&self) -> impl FnMut(&[f32], f64) + Send + 'static {
        let samples = Arc::clone(&self.samples);
        let audio_queue = Arc::clone(&self.audio_queue);
        move |data: &[f32], at_time: f64| write_to(&samples, &audio_queue, data, at_time)
    }

    /// Replaces the reference with a fully built store.
    pub fn load_reference(&self, reference: NoteStore) {
        *self.lock_reference() = Arc::new(reference);
    }

    /// Replaces the reference with the notes of `score`.
    pub fn load_score(&self, score: &Score) {
        self.load_reference(score.reference_notes());
    }

    /// Aligns a snapshot of the performance so far against the reference
    /// and publishes the result.
    pub fn align(&self) -> Result<Arc<Alignment>> {
        let reference = self.reference();
        let alignment = Arc::new(Aligner::new(self.config.aligner)?.align(&self.notes, &reference)?);
        let _ = self
            .events
            .send(PipelineEvent::AlignmentReady(Arc::clone(&alignment)));
        Ok(alignment)
    }

    pub fn samples(&self) -> &SampleBuffer {
        &self.samples
    }

    pub fn pitches(&self) -> &PitchStream {
        &self.pitches
    }

    /// Notes detected in the performance.
    pub fn notes(&self) -> &NoteStore {
        &self.notes
    }

    pub fn reference(&self) -> Arc<NoteStore> {
        Arc::clone(&self.lock_reference())
    }

    fn lock_reference(&self) -> MutexGuard<'_, Arc<NoteStore>> {
        self.reference.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_to(buffer: &SampleBuffer, queue: &FrameQueue<f32>, samples: &[f32], at_time: f64) {
    buffer.write(samples, at_time);
    queue.push(samples.iter().copied());
}

/// Result of analysing a complete recording.
#[derive(Debug)]
pub struct OfflineAnalysis {
    /// One pitch per audio hop.
    pub pitches: Vec<Pitch>,
    pub notes: NoteStore,
}

impl OfflineAnalysis {
    pub fn align(&self, reference: &NoteStore, config: &AlignerConfig) -> Result<Alignment> {
        Aligner::new(*config)?.align(&self.notes, reference)
    }
}

/// Batch pitch detection followed by offline segmentation. Any failure
/// aborts the run.
///
/// # Arguments
/// * `samples` - The whole recording, mono, at `config.pitch.sample_rate`
/// * `config` - Session configuration; validated before any work is done
///
/// # Returns
/// * `Ok(analysis)` - One pitch per hop and the segmented notes
/// * `Err(e)` - An invalid configuration, a bad frame or a degenerate
///   window
pub fn analyze(samples: &[f32], config: &SessionConfig) -> Result<OfflineAnalysis> {
    config.validate()?;
    let pitches = PitchEstimator::new(config)?.detect_pitches(samples)?;
    let notes = NoteSegmenter::new(config.segmenter)?.detect_notes(&pitches)?;
    info!(
        seconds = samples.len() as f64 / f64::from(config.pitch.sample_rate),
        pitches = pitches.len(),
        notes = notes.len(),
        "offline analysis done"
    );
    Ok(OfflineAnalysis { pitches, notes })
}
