/// Sound level calibration
///
/// The operator plays a calibration stimulus at the session's raw level,
/// reads the sound level meter and enters the reading. The reading is saved
/// as `slm_reading`, which together with `raw_level` maps presentation
/// levels to playback gain.

use thiserror::Error;

use crate::audio::Playback;
use crate::config::{Config, SessionParameters};
use crate::stimulus::Stimulus;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Play the calibration stimulus before entering the meter reading")]
    NotPlayed,

    #[error("Meter reading must be a finite number, got {0}")]
    InvalidReading(f64),

    #[error("Playback failed: {0:#}")]
    Playback(anyhow::Error),

    #[error("Failed to save calibration: {0:#}")]
    Save(anyhow::Error),
}

pub struct Calibration {
    stimulus: Stimulus,
    raw_level: f64,
    played: bool,
}

impl Calibration {
    pub fn new(stimulus: Stimulus, raw_level: f64) -> Self {
        Calibration {
            stimulus,
            raw_level,
            played: false,
        }
    }

    pub fn stimulus(&self) -> &Stimulus {
        &self.stimulus
    }

    pub fn raw_level(&self) -> f64 {
        self.raw_level
    }

    pub fn is_played(&self) -> bool {
        self.played
    }

    /// Play the calibration stimulus at the raw level; may be repeated
    pub fn play<A: Playback + ?Sized>(&mut self, player: &mut A) -> Result<(), CalibrationError> {
        player
            .play(&self.stimulus, self.raw_level)
            .map_err(CalibrationError::Playback)?;
        self.played = true;
        log::info!(
            "Calibration stimulus {} played at {:.1} dB",
            self.stimulus.name,
            self.raw_level
        );
        Ok(())
    }

    /// Save `reading` (dB SPL) as the session's meter reading for the raw
    /// level that was played
    pub fn submit(
        &self,
        reading: f64,
        config: &mut Config,
    ) -> Result<SessionParameters, CalibrationError> {
        if !self.played {
            return Err(CalibrationError::NotPlayed);
        }
        if !reading.is_finite() {
            return Err(CalibrationError::InvalidReading(reading));
        }

        let mut params = config.session_parameters();
        params.raw_level = self.raw_level;
        params.slm_reading = reading;
        config
            .confirm_session(&params)
            .map_err(CalibrationError::Save)?;

        log::info!(
            "Calibration saved: {:.1} dB raw reads {:.1} dB SPL",
            self.raw_level,
            reading
        );
        Ok(params)
    }
}
