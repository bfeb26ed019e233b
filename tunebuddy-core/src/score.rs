//! # Score Module
//!
//! Timed note-on/note-off events of a reference piece, as handed over by
//! whatever parsed the MIDI or MusicXML file, and their conversion into the
//! reference [`NoteStore`] the aligner compares against.
//!
//! ## Features
//! - On/off pairing per `(channel, key)`, with velocity-0 note-ons as offs
//! - Tempo changes and length stretching that regenerate the reference
//! - JSON (de)serialization for score files handed over by other tools

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::note::{Note, NoteStore};

/// Tempo assumed when a score does not state one.
pub const DEFAULT_BPM: f64 = 100.0;

/// One timed score event. Times are seconds from the start of the piece.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScoreEvent {
    NoteOn {
        time: f64,
        channel: u8,
        key: u8,
        velocity: u8,
    },
    NoteOff {
        time: f64,
        channel: u8,
        key: u8,
    },
}

impl ScoreEvent {
    pub fn time(&self) -> f64 {
        match *self {
            ScoreEvent::NoteOn { time, .. } | ScoreEvent::NoteOff { time, .. } => time,
        }
    }

    fn scaled(self, factor: f64) -> Self {
        match self {
            ScoreEvent::NoteOn {
                time,
                channel,
                key,
                velocity,
            } => ScoreEvent::NoteOn {
                time: time * factor,
                channel,
                key,
                velocity,
            },
            ScoreEvent::NoteOff { time, channel, key } => ScoreEvent::NoteOff {
                time: time * factor,
                channel,
                key,
            },
        }
    }
}

#[derive(Deserialize)]
struct ScoreFile {
    events: Vec<ScoreEvent>,
    #[serde(default = "default_bpm")]
    bpm: f64,
}

fn default_bpm() -> f64 {
    DEFAULT_BPM
}

impl TryFrom<ScoreFile> for Score {
    type Error = Error;

    fn try_from(file: ScoreFile) -> Result<Self> {
        Score::new(file.events, file.bpm)
    }
}

/// A reference piece: its events in time order, its tempo and its length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScoreFile")]
pub struct Score {
    events: Vec<ScoreEvent>,
    bpm: f64,
    /// Time of the last event, in seconds.
    length: f64,
}

impl Score {
    /// Sorts `events` by time (stable, so simultaneous events keep their
    /// order) and measures the piece.
    pub fn new(mut events: Vec<ScoreEvent>, bpm: f64) -> Result<Self> {
        check_positive(bpm)?;
        events.sort_by(|a, b| a.time().total_cmp(&b.time()));
        let length = events.last().map_or(0.0, ScoreEvent::time);
        Ok(Self {
            events,
            bpm,
            length,
        })
    }

    pub fn events(&self) -> &[ScoreEvent] {
        &self.events
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    /// Pairs note-ons with note-offs into reference notes.
    ///
    /// Ids follow the order in which notes end; the volume is the note-on
    /// velocity. Offs without a matching on are ignored, and notes still
    /// sounding at the end of the score are dropped.
    pub fn reference_notes(&self) -> NoteStore {
        let store = NoteStore::new();
        let mut sounding: HashMap<(u8, u8), (f64, u8)> = HashMap::new();
        let mut next_id = 0;

        for event in &self.events {
            let (time, channel, key, velocity) = match *event {
                ScoreEvent::NoteOn {
                    time,
                    channel,
                    key,
                    velocity,
                } => (time, channel, key, velocity),
                ScoreEvent::NoteOff { time, channel, key } => (time, channel, key, 0),
            };
            if velocity > 0 {
                sounding.insert((channel, key), (time, velocity));
                continue;
            }
            let Some((start, velocity)) = sounding.remove(&(channel, key)) else {
                continue;
            };
            let note = Note::new(next_id, start, time, &[f64::from(key)]).with_volume(f64::from(velocity));
            store.write(note);
            next_id += 1;
        }
        debug!(notes = store.len(), dropped = sounding.len(), "reference notes built");
        store
    }

    /// Stretches every event to a new tempo.
    pub fn change_tempo(&mut self, bpm: f64) -> Result<()> {
        check_positive(bpm)?;
        self.resize(self.length * self.bpm / bpm)?;
        self.bpm = bpm;
        Ok(())
    }

    /// Stretches or compresses every event so the piece lasts `length`
    /// seconds. The tempo scales inversely.
    pub fn resize(&mut self, length: f64) -> Result<()> {
        check_positive(length)?;
        if self.length <= 0.0 || length == self.length {
            return Ok(());
        }
        let factor = length / self.length;
        for event in &mut self.events {
            *event = event.scaled(factor);
        }
        self.bpm /= factor;
        self.length = length;
        Ok(())
    }
}

fn check_positive(value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidTempo(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn on(time: f64, key: u8) -> ScoreEvent {
        ScoreEvent::NoteOn {
            time,
            channel: 0,
            key,
            velocity: 80,
        }
    }

    fn off(time: f64, key: u8) -> ScoreEvent {
        ScoreEvent::NoteOff {
            time,
            channel: 0,
            key,
        }
    }

    fn scale() -> Score {
        Score::new(
            vec![on(0.0, 60), off(0.5, 60), on(0.5, 62), off(1.0, 62), on(1.0, 64), off(2.0, 64)],
            120.0,
        )
        .unwrap()
    }

    #[test]
    fn pairs_on_and_off_events() {
        let notes = scale().reference_notes().notes();
        let keys: Vec<f64> = notes.iter().map(|n| n.midi()).collect();
        assert_eq!(keys, vec![60.0, 62.0, 64.0]);
        assert_eq!((notes[2].start_time, notes[2].end_time), (1.0, 2.0));
        assert_eq!(notes[0].volume, Some(80.0));
    }

    #[test]
    fn zero_velocity_note_on_ends_a_note() {
        let events = vec![
            off(0.0, 67),
            on(0.0, 60),
            ScoreEvent::NoteOn {
                time: 1.0,
                channel: 0,
                key: 60,
                velocity: 0,
            },
            on(1.0, 72),
        ];
        let notes = Score::new(events, DEFAULT_BPM).unwrap().reference_notes().notes();
        // The stray off is ignored and the unfinished 72 is dropped.
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].end_time, 1.0);
    }

    #[test]
    fn events_are_sorted_on_construction() {
        let score = Score::new(vec![off(1.0, 60), on(0.0, 60)], DEFAULT_BPM).unwrap();
        assert_eq!(score.events()[0].time(), 0.0);
        assert_eq!(score.length(), 1.0);
    }

    #[test]
    fn halving_the_tempo_doubles_every_time() {
        let mut score = scale();
        score.change_tempo(60.0).unwrap();
        assert_relative_eq!(score.length(), 4.0);
        assert_eq!(score.bpm(), 60.0);
        let notes = score.reference_notes().notes();
        assert_relative_eq!(notes[1].start_time, 1.0);
        assert_relative_eq!(notes[2].end_time, 4.0);
    }

    #[test]
    fn resize_scales_tempo_inversely() {
        let mut score = scale();
        score.resize(1.0).unwrap();
        assert_relative_eq!(score.bpm(), 240.0);
        assert_relative_eq!(score.events()[1].time(), 0.25);
    }

    #[test]
    fn rejects_non_positive_tempo() {
        let mut score = scale();
        assert!(matches!(score.change_tempo(0.0), Err(Error::InvalidTempo(_))));
        assert!(matches!(score.resize(-1.0), Err(Error::InvalidTempo(_))));
        assert!(Score::new(Vec::new(), f64::NAN).is_err());
        assert_eq!(score, scale());
    }

    #[test]
    fn loads_from_json() {
        let json = r#"{
            "events": [
                {"type": "note_off", "time": 0.5, "channel": 0, "key": 60},
                {"type": "note_on", "time": 0.0, "channel": 0, "key": 60, "velocity": 90}
            ]
        }"#;
        let score: Score = serde_json::from_str(json).unwrap();
        assert_eq!(score.bpm(), DEFAULT_BPM);
        assert_eq!(score.reference_notes().len(), 1);

        let bad = r#"{"events": [], "bpm": -3}"#;
        assert!(serde_json::from_str::<Score>(bad).is_err());
    }
}
