//! # Musical Tuning Module
//!
//! Conversions between frequency, MIDI note numbers and note names, all
//! relative to a configurable A4 reference (the `tuning` of a
//! [`PitchConfig`](crate::config::PitchConfig)).
//!
//! MIDI numbers are kept fractional throughout the pipeline: 69.0 is A4
//! exactly, 69.5 is a quarter tone sharp.

use once_cell::sync::Lazy;

/// MIDI number of the tuning reference (A4).
pub const A4_MIDI: f64 = 69.0;

/// Statically computed names for the 128 MIDI notes ("C-1" to "G9").
static NOTE_NAMES: Lazy<Vec<String>> = Lazy::new(|| {
    const PITCH_CLASSES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    (0..128)
        .map(|midi: i32| {
            // MIDI 60 is C4, so octaves start at -1.
            let octave = midi / 12 - 1;
            format!("{}{}", PITCH_CLASSES[(midi % 12) as usize], octave)
        })
        .collect()
});

/// Converts a frequency in Hz to a (fractional) MIDI number.
///
/// Returns `None` for non-positive or non-finite frequencies, which have no
/// pitch.
pub fn freq_to_midi(freq: f64, tuning: f64) -> Option<f64> {
    if !(freq.is_finite() && freq > 0.0) {
        return None;
    }
    Some(A4_MIDI + 12.0 * (freq / tuning).log2())
}

/// Converts a (fractional) MIDI number to a frequency in Hz.
pub fn midi_to_freq(midi: f64, tuning: f64) -> f64 {
    tuning * 2.0_f64.powf((midi - A4_MIDI) / 12.0)
}

/// Name of the nearest MIDI note, e.g. `"A4"` for 69.2.
///
/// Out-of-range or non-finite values get `"?"`.
pub fn note_name(midi: f64) -> &'static str {
    if !midi.is_finite() {
        return "?";
    }
    let rounded = midi.round();
    if !(0.0..128.0).contains(&rounded) {
        return "?";
    }
    NOTE_NAMES[rounded as usize].as_str()
}

/// Calculates the deviation from a target frequency in cents.
///
/// 100 cents = 1 semitone; positive values are sharp, negative flat.
pub fn cents_deviation(freq: f64, target_freq: f64) -> f64 {
    1200.0 * (freq / target_freq).log2()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn a4_round_trips() {
        assert_relative_eq!(freq_to_midi(440.0, 440.0).unwrap(), 69.0);
        assert_relative_eq!(midi_to_freq(69.0, 440.0), 440.0);
        assert_relative_eq!(freq_to_midi(880.0, 440.0).unwrap(), 81.0);
        assert_relative_eq!(midi_to_freq(60.0, 440.0), 261.6255653, epsilon = 1e-6);
    }

    #[test]
    fn alternate_tuning_shifts_midi() {
        // A4 at 442 Hz reads as exactly 69 under 442 tuning, sharp under 440.
        assert_relative_eq!(freq_to_midi(442.0, 442.0).unwrap(), 69.0);
        assert!(freq_to_midi(442.0, 440.0).unwrap() > 69.0);
    }

    #[test]
    fn no_pitch_for_non_positive_frequency() {
        assert!(freq_to_midi(0.0, 440.0).is_none());
        assert!(freq_to_midi(-3.0, 440.0).is_none());
        assert!(freq_to_midi(f64::NAN, 440.0).is_none());
    }

    #[test]
    fn names_nearest_note() {
        assert_eq!(note_name(60.0), "C4");
        assert_eq!(note_name(69.4), "A4");
        assert_eq!(note_name(61.6), "D4");
        assert_eq!(note_name(0.0), "C-1");
        assert_eq!(note_name(-1.0), "?");
        assert_eq!(note_name(200.0), "?");
    }

    #[test]
    fn cents_of_a_semitone() {
        let semitone_up = midi_to_freq(70.0, 440.0);
        assert_relative_eq!(cents_deviation(semitone_up, 440.0), 100.0, epsilon = 1e-9);
    }
}
