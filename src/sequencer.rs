/// Trial sequencer: a bounded cursor over the stimulus list
///
/// The experimenter steps the cursor with four commands. "Increment"
/// commands move the cursor towards the start of the list and "decrement"
/// commands towards the end, mirroring the arrow layout of the rating
/// screen. The cursor is clamped to the list after every step.

use chrono::Local;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::constants::steps::{BIG_STEP, SMALL_STEP};
use crate::recorder::{RatingFields, RecorderError, TrialRecord, TrialSink};
use crate::stimulus::{Stimulus, StimulusList};

#[derive(Error, Debug)]
pub enum SequencerError {
    #[error("No stimuli loaded")]
    NotActive,

    #[error("Invalid step command: {0:?}")]
    InvalidCommand(String),

    #[error(transparent)]
    Record(#[from] RecorderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magnitude {
    Big,
    Small,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCommand {
    BigIncrement,
    SmallIncrement,
    BigDecrement,
    SmallDecrement,
}

impl StepCommand {
    pub fn new(direction: Direction, magnitude: Magnitude) -> Self {
        match (direction, magnitude) {
            (Direction::Increment, Magnitude::Big) => StepCommand::BigIncrement,
            (Direction::Increment, Magnitude::Small) => StepCommand::SmallIncrement,
            (Direction::Decrement, Magnitude::Big) => StepCommand::BigDecrement,
            (Direction::Decrement, Magnitude::Small) => StepCommand::SmallDecrement,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            StepCommand::BigIncrement | StepCommand::SmallIncrement => Direction::Increment,
            StepCommand::BigDecrement | StepCommand::SmallDecrement => Direction::Decrement,
        }
    }

    pub fn magnitude(&self) -> Magnitude {
        match self {
            StepCommand::BigIncrement | StepCommand::BigDecrement => Magnitude::Big,
            StepCommand::SmallIncrement | StepCommand::SmallDecrement => Magnitude::Small,
        }
    }

    /// Signed cursor change before clamping
    pub fn delta(&self) -> isize {
        let size = match self.magnitude() {
            Magnitude::Big => BIG_STEP,
            Magnitude::Small => SMALL_STEP,
        } as isize;
        match self.direction() {
            Direction::Increment => -size,
            Direction::Decrement => size,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            StepCommand::BigIncrement => "bigup",
            StepCommand::SmallIncrement => "smallup",
            StepCommand::BigDecrement => "bigdown",
            StepCommand::SmallDecrement => "smalldown",
        }
    }
}

impl fmt::Display for StepCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for StepCommand {
    type Err = SequencerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bigup" => Ok(StepCommand::BigIncrement),
            "smallup" => Ok(StepCommand::SmallIncrement),
            "bigdown" => Ok(StepCommand::BigDecrement),
            "smalldown" => Ok(StepCommand::SmallDecrement),
            other => Err(SequencerError::InvalidCommand(other.to_string())),
        }
    }
}

/// Chooses the cursor position when a non-empty list is loaded
pub trait StartPicker {
    /// `len` is always > 0; the result must be < `len`
    fn pick(&mut self, len: usize) -> usize;
}

/// Uniform start over `[0, len - 1)`, i.e. never the last stimulus.
/// A single-stimulus list starts at 0.
pub struct RandomStart<R>(pub R);

impl<R: Rng> StartPicker for RandomStart<R> {
    fn pick(&mut self, len: usize) -> usize {
        if len <= 1 {
            0
        } else {
            self.0.random_range(0..len - 1)
        }
    }
}

/// Always start at the given index (clamped to the list)
pub struct FixedStart(pub usize);

impl StartPicker for FixedStart {
    fn pick(&mut self, len: usize) -> usize {
        self.0.min(len.saturating_sub(1))
    }
}

/// Snapshot of the sequencer for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerState {
    /// `None` while inactive
    pub cursor: Option<usize>,
    pub length: usize,
    pub completed_count: usize,
}

pub struct TrialSequencer<P: StartPicker> {
    stimuli: StimulusList,
    /// Some(i) with i < stimuli.len() exactly when the list is non-empty
    cursor: Option<usize>,
    completed_count: usize,
    picker: P,
}

impl<P: StartPicker> TrialSequencer<P> {
    /// New, inactive sequencer
    pub fn new(picker: P) -> Self {
        TrialSequencer {
            stimuli: StimulusList::default(),
            cursor: None,
            completed_count: 0,
            picker,
        }
    }

    /// Replace the stimulus list. A non-empty list activates the sequencer
    /// at a freshly picked start position; completed trials are kept.
    pub fn load(&mut self, stimuli: StimulusList) {
        self.cursor = if stimuli.is_empty() {
            None
        } else {
            let start = self.picker.pick(stimuli.len()).min(stimuli.len() - 1);
            Some(start)
        };
        self.stimuli = stimuli;

        match self.cursor {
            Some(start) => log::info!(
                "Starting at stimulus #{} of {} ({})",
                start,
                self.stimuli.len(),
                self.stimuli.get(start).map_or("?", |s| s.name.as_str())
            ),
            None => log::warn!("No stimuli loaded, sequencer inactive"),
        }
    }

    /// Drop the stimulus list and become inactive
    pub fn unload(&mut self) {
        self.load(StimulusList::default());
    }

    pub fn is_active(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn len(&self) -> usize {
        self.stimuli.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stimuli.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn completed_count(&self) -> usize {
        self.completed_count
    }

    pub fn stimuli(&self) -> &StimulusList {
        &self.stimuli
    }

    pub fn state(&self) -> SequencerState {
        SequencerState {
            cursor: self.cursor,
            length: self.stimuli.len(),
            completed_count: self.completed_count,
        }
    }

    /// Move the cursor and clamp it to the list; returns the new cursor
    pub fn step(&mut self, command: StepCommand) -> Result<usize, SequencerError> {
        let cursor = self.cursor.ok_or(SequencerError::NotActive)?;
        let last = self.stimuli.len() - 1;

        let moved = cursor as isize + command.delta();
        let next = moved.clamp(0, last as isize) as usize;
        self.cursor = Some(next);

        log::debug!("{}: cursor {} -> {}", command, cursor, next);
        Ok(next)
    }

    pub fn current_stimulus(&self) -> Result<&Stimulus, SequencerError> {
        self.cursor
            .and_then(|cursor| self.stimuli.get(cursor))
            .ok_or(SequencerError::NotActive)
    }

    /// Stimulus to present again; the cursor does not move
    pub fn repeat(&self) -> Result<&Stimulus, SequencerError> {
        self.current_stimulus()
    }

    /// Record a rating for the current stimulus. `completed_count` only
    /// advances once the record has been written.
    pub fn submit<W: TrialSink + ?Sized>(
        &mut self,
        rating_fields: RatingFields,
        recorder: &mut W,
    ) -> Result<TrialRecord, SequencerError> {
        let position = self.cursor.ok_or(SequencerError::NotActive)?;
        let stimulus = self.current_stimulus()?;

        let record = TrialRecord {
            sequence_index: self.completed_count,
            position,
            stimulus_name: stimulus.name.clone(),
            rating_fields,
            timestamp: Local::now(),
        };

        recorder.record(&record)?;
        self.completed_count += 1;
        Ok(record)
    }
}
