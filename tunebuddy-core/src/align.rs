//! # Alignment Module
//!
//! Weighted edit-distance alignment of a performed note sequence against a
//! reference one, and the mistake report that falls out of the traceback.
//!
//! ## Features
//! - Configurable insertion, deletion and substitution costs
//! - Tolerance under which a substitution counts as a match
//! - Strict or lenient (any ranked estimate) pitch distance
//! - Deterministic tie-breaking: deletion, then substitution, then insertion

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::{AlignerConfig, DistancePolicy};
use crate::error::{Error, Result};
use crate::note::{Note, NoteId, NoteStore};
use crate::tuning::note_name;

/// The three kinds of performance mistake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MistakeKind {
    /// A performed note with no reference counterpart.
    Insertion,
    /// A reference note that was never played.
    Deletion,
    /// A reference note played at the wrong pitch.
    Substitution,
}

impl fmt::Display for MistakeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MistakeKind::Insertion => "insertion",
            MistakeKind::Deletion => "deletion",
            MistakeKind::Substitution => "substitution",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mistake {
    pub kind: MistakeKind,
    /// `None` for a deletion.
    pub performed: Option<Arc<Note>>,
    /// `None` for an insertion.
    pub reference: Option<Arc<Note>>,
}

/// One step of the alignment path. A side is `None` where the other side
/// was inserted or deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignedPair {
    pub performed: Option<Arc<Note>>,
    pub reference: Option<Arc<Note>>,
}

/// Mistake counts per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MistakeSummary {
    pub total: usize,
    pub insertions: usize,
    pub deletions: usize,
    pub substitutions: usize,
}

impl fmt::Display for MistakeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MISTAKE SUMMARY")?;
        writeln!(f, "---")?;
        writeln!(f, "Total mistakes: {}", self.total)?;
        writeln!(f, "Insertions: {}", self.insertions)?;
        writeln!(f, "Deletions: {}", self.deletions)?;
        write!(f, "Substitutions: {}", self.substitutions)
    }
}

/// Result of one alignment run. Immutable; the id sets are built once so
/// renderers can look notes up without walking the mistake list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alignment {
    pairs: Vec<AlignedPair>,
    mistakes: Vec<Mistake>,
    /// Ids of inserted performed notes.
    insertions: BTreeSet<NoteId>,
    /// Ids of deleted reference notes.
    deletions: BTreeSet<NoteId>,
    /// `(performed, reference)` id pairs of substitutions.
    substitutions: BTreeSet<(NoteId, NoteId)>,
}

impl Alignment {
    /// Builds the id sets from `mistakes`. Both lists are in time order.
    pub fn new(pairs: Vec<AlignedPair>, mistakes: Vec<Mistake>) -> Self {
        let mut insertions = BTreeSet::new();
        let mut deletions = BTreeSet::new();
        let mut substitutions = BTreeSet::new();
        for mistake in &mistakes {
            let performed = mistake.performed.as_ref().map(|n| n.id);
            let reference = mistake.reference.as_ref().map(|n| n.id);
            match (mistake.kind, performed, reference) {
                (MistakeKind::Insertion, Some(p), _) => {
                    insertions.insert(p);
                }
                (MistakeKind::Deletion, _, Some(r)) => {
                    deletions.insert(r);
                }
                (MistakeKind::Substitution, Some(p), Some(r)) => {
                    substitutions.insert((p, r));
                }
                _ => {}
            }
        }
        Self {
            pairs,
            mistakes,
            insertions,
            deletions,
            substitutions,
        }
    }

    pub fn pairs(&self) -> &[AlignedPair] {
        &self.pairs
    }

    pub fn mistakes(&self) -> &[Mistake] {
        &self.mistakes
    }

    pub fn insertions(&self) -> &BTreeSet<NoteId> {
        &self.insertions
    }

    pub fn deletions(&self) -> &BTreeSet<NoteId> {
        &self.deletions
    }

    pub fn substitutions(&self) -> &BTreeSet<(NoteId, NoteId)> {
        &self.substitutions
    }

    pub fn is_inserted(&self, performed: NoteId) -> bool {
        self.insertions.contains(&performed)
    }

    pub fn is_deleted(&self, reference: NoteId) -> bool {
        self.deletions.contains(&reference)
    }

    pub fn is_substituted(&self, performed: NoteId, reference: NoteId) -> bool {
        self.substitutions.contains(&(performed, reference))
    }

    pub fn summary(&self) -> MistakeSummary {
        let count = |kind| self.mistakes.iter().filter(|m| m.kind == kind).count();
        MistakeSummary {
            total: self.mistakes.len(),
            insertions: count(MistakeKind::Insertion),
            deletions: count(MistakeKind::Deletion),
            substitutions: count(MistakeKind::Substitution),
        }
    }

    /// A printable view of the whole path, not just the mistakes.
    pub fn display_pairs(&self) -> PairsDisplay<'_> {
        PairsDisplay(self)
    }
}

fn describe(note: Option<&Arc<Note>>) -> String {
    match note {
        Some(note) => format!(
            "{:.3}s, {} {:.2}",
            note.start_time,
            note_name(note.midi()),
            note.midi()
        ),
        None => "None".to_string(),
    }
}

impl fmt::Display for Mistake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error={} | performed=({}) | reference=({})",
            self.kind,
            describe(self.performed.as_ref()),
            describe(self.reference.as_ref())
        )
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MISTAKES")?;
        write!(f, "---")?;
        for mistake in &self.mistakes {
            write!(f, "\n{mistake}")?;
        }
        Ok(())
    }
}

/// See [`Alignment::display_pairs`].
pub struct PairsDisplay<'a>(&'a Alignment);

impl fmt::Display for PairsDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ALIGNMENT")?;
        write!(f, "---")?;
        for pair in &self.0.pairs {
            match (&pair.performed, &pair.reference) {
                (None, Some(reference)) => write!(f, "\ndeletion! reference={:.2}", reference.midi())?,
                (Some(performed), None) => write!(f, "\ninsertion! performed={:.2}", performed.midi())?,
                (Some(performed), Some(reference)) => write!(
                    f,
                    "\nperformed={:.2}, reference={:.2}",
                    performed.midi(),
                    reference.midi()
                )?,
                (None, None) => {}
            }
        }
        Ok(())
    }
}

/// Transition that produced a DP cell's cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Deletion,
    Substitution,
    Insertion,
}

/// Levenshtein aligner over notes.
#[derive(Debug, Clone)]
pub struct Aligner {
    config: AlignerConfig,
}

impl Aligner {
    pub fn new(config: AlignerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AlignerConfig {
        &self.config
    }

    /// Pitch distance in semitones under the configured policy.
    pub fn distance(&self, performed: &Note, reference: &Note) -> f64 {
        let target = reference.midi();
        match self.config.policy {
            DistancePolicy::Strict => (performed.midi() - target).abs(),
            DistancePolicy::Lenient => performed
                .pitches()
                .iter()
                .map(|midi| (midi - target).abs())
                .fold(f64::INFINITY, f64::min),
        }
    }

    /// Aligns snapshots of two stores. Rests in the performance are left
    /// out; the reference is taken as is.
    pub fn align(&self, performed: &NoteStore, reference: &NoteStore) -> Result<Alignment> {
        self.align_notes(&performed.voiced_notes(), &reference.notes())
    }

    /// Aligns two note sequences, both in time order.
    ///
    /// # Arguments
    /// * `performed` - Notes as played, rests already removed
    /// * `reference` - Notes as written
    ///
    /// # Returns
    /// * `Ok(alignment)` - The cheapest edit path and the mistakes on it
    /// * `Err(Error::Traceback)` - The cost table has no consistent path back
    ///   to the origin
    pub fn align_notes(&self, performed: &[Arc<Note>], reference: &[Arc<Note>]) -> Result<Alignment> {
        let AlignerConfig {
            insertion,
            deletion,
            substitution,
            tolerance,
            ..
        } = self.config;
        let (n, m) = (reference.len(), performed.len());
        let cols = m + 1;
        let mut cost = vec![0.0f64; (n + 1) * cols];
        let mut steps = vec![Step::Deletion; (n + 1) * cols];

        for j in 1..=m {
            cost[j] = cost[j - 1] + insertion;
            steps[j] = Step::Insertion;
        }
        for i in 1..=n {
            cost[i * cols] = cost[(i - 1) * cols] + deletion;
        }

        for i in 1..=n {
            for j in 1..=m {
                let matched = self.distance(&performed[j - 1], &reference[i - 1]) < tolerance;
                let top = cost[(i - 1) * cols + j] + deletion;
                let diag = cost[(i - 1) * cols + j - 1] + if matched { 0.0 } else { substitution };
                let left = cost[i * cols + j - 1] + insertion;

                let (best, step) = if top <= diag && top <= left {
                    (top, Step::Deletion)
                } else if diag <= left {
                    (diag, Step::Substitution)
                } else {
                    (left, Step::Insertion)
                };
                cost[i * cols + j] = best;
                steps[i * cols + j] = step;
            }
        }

        let mut pairs = Vec::with_capacity(n.max(m));
        let mut mistakes = Vec::new();
        let (mut i, mut j) = (n, m);
        while i > 0 || j > 0 {
            match steps[i * cols + j] {
                Step::Deletion if i > 0 => {
                    let reference = Some(Arc::clone(&reference[i - 1]));
                    mistakes.push(Mistake {
                        kind: MistakeKind::Deletion,
                        performed: None,
                        reference: reference.clone(),
                    });
                    pairs.push(AlignedPair {
                        performed: None,
                        reference,
                    });
                    i -= 1;
                }
                Step::Substitution if i > 0 && j > 0 => {
                    let (p, r) = (&performed[j - 1], &reference[i - 1]);
                    if self.distance(p, r) >= tolerance {
                        mistakes.push(Mistake {
                            kind: MistakeKind::Substitution,
                            performed: Some(Arc::clone(p)),
                            reference: Some(Arc::clone(r)),
                        });
                    }
                    pairs.push(AlignedPair {
                        performed: Some(Arc::clone(p)),
                        reference: Some(Arc::clone(r)),
                    });
                    i -= 1;
                    j -= 1;
                }
                Step::Insertion if j > 0 => {
                    let performed = Some(Arc::clone(&performed[j - 1]));
                    mistakes.push(Mistake {
                        kind: MistakeKind::Insertion,
                        performed: performed.clone(),
                        reference: None,
                    });
                    pairs.push(AlignedPair {
                        performed,
                        reference: None,
                    });
                    j -= 1;
                }
                _ => return Err(Error::Traceback { row: i, col: j }),
            }
        }
        pairs.reverse();
        mistakes.reverse();

        let alignment = Alignment::new(pairs, mistakes);
        let summary = alignment.summary();
        info!(
            reference = n,
            performed = m,
            cost = cost[n * cols + m],
            insertions = summary.insertions,
            deletions = summary.deletions,
            substitutions = summary.substitutions,
            "alignment done"
        );
        Ok(alignment)
    }
}
