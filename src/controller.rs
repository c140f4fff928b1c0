/// Command dispatch between a presentation surface and the trial core
///
/// A surface turns operator input into `Command`s and renders the returned
/// `Outcome`s. The controller presents a stimulus after every cursor move
/// and repeat, and refuses a submit until the current position has been
/// presented at least once.

use thiserror::Error;

use crate::audio::Playback;
use crate::recorder::{RatingFields, TrialRecord, TrialSink};
use crate::sequencer::{SequencerError, SequencerState, StartPicker, StepCommand, TrialSequencer};
use crate::stimulus::{Stimulus, StimulusList};

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Sequencer(#[from] SequencerError),

    #[error("Playback failed: {0:#}")]
    Playback(anyhow::Error),

    #[error("Play the stimulus before submitting a rating")]
    NotPresented,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Step(StepCommand),
    /// Present the current stimulus again ("Start" right after a submit)
    Repeat,
    Submit(RatingFields),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Presented { position: usize, stimulus: Stimulus },
    Recorded { record: TrialRecord, completed: usize },
}

pub struct TrialController<P, W, A>
where
    P: StartPicker,
    W: TrialSink,
    A: Playback,
{
    sequencer: TrialSequencer<P>,
    recorder: W,
    player: A,
    level_db: f64,
    require_playback: bool,
    /// Current position presented since activation or the last submit
    presented: bool,
}

impl<P, W, A> TrialController<P, W, A>
where
    P: StartPicker,
    W: TrialSink,
    A: Playback,
{
    pub fn new(sequencer: TrialSequencer<P>, recorder: W, player: A, level_db: f64) -> Self {
        TrialController {
            sequencer,
            recorder,
            player,
            level_db,
            require_playback: true,
            presented: false,
        }
    }

    pub fn with_submit_gate(mut self, require_playback: bool) -> Self {
        self.require_playback = require_playback;
        self
    }

    pub fn dispatch(&mut self, command: Command) -> Result<Outcome, ControllerError> {
        match command {
            Command::Step(step) => {
                self.sequencer.step(step)?;
                self.present()
            }
            Command::Repeat => self.present(),
            Command::Submit(rating_fields) => self.submit(rating_fields),
        }
    }

    fn present(&mut self) -> Result<Outcome, ControllerError> {
        let position = self.sequencer.cursor().ok_or(SequencerError::NotActive)?;
        let stimulus = self.sequencer.current_stimulus()?.clone();

        // A position counts as presented only once playback has started
        self.presented = false;
        self.player
            .play(&stimulus, self.level_db)
            .map_err(ControllerError::Playback)?;
        self.presented = true;

        Ok(Outcome::Presented { position, stimulus })
    }

    fn submit(&mut self, rating_fields: RatingFields) -> Result<Outcome, ControllerError> {
        if !self.sequencer.is_active() {
            return Err(SequencerError::NotActive.into());
        }
        if self.require_playback && !self.presented {
            return Err(ControllerError::NotPresented);
        }

        let record = self.sequencer.submit(rating_fields, &mut self.recorder)?;
        self.presented = false;

        Ok(Outcome::Recorded {
            record,
            completed: self.sequencer.completed_count(),
        })
    }

    /// Swap in a new stimulus list; the next presentation starts a new trial
    pub fn load_stimuli(&mut self, stimuli: StimulusList) {
        self.sequencer.load(stimuli);
        self.presented = false;
    }

    pub fn unload_stimuli(&mut self) {
        self.sequencer.unload();
        self.presented = false;
    }

    pub fn set_level_db(&mut self, level_db: f64) {
        self.level_db = level_db;
    }

    pub fn level_db(&self) -> f64 {
        self.level_db
    }

    pub fn set_recorder(&mut self, recorder: W) {
        self.recorder = recorder;
    }

    pub fn set_player(&mut self, player: A) {
        self.player = player;
    }

    pub fn player(&self) -> &A {
        &self.player
    }

    pub fn recorder(&self) -> &W {
        &self.recorder
    }

    pub fn can_submit(&self) -> bool {
        self.sequencer.is_active() && (self.presented || !self.require_playback)
    }

    /// Label for the repeat control: "Start" until the current trial has
    /// been presented, "Repeat" afterwards
    pub fn repeat_label(&self) -> &'static str {
        if self.presented {
            "Repeat"
        } else {
            "Start"
        }
    }

    pub fn state(&self) -> SequencerState {
        self.sequencer.state()
    }

    pub fn sequencer(&self) -> &TrialSequencer<P> {
        &self.sequencer
    }
}
