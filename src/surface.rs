/// Terminal presentation surface input
///
/// Maps one line of operator input to a controller command or a surface
/// action. Arrow controls are single letters: upper case for big steps,
/// lower case for small ones.

use std::fmt;

use crate::controller::Command;
use crate::recorder::{is_reserved_column, RatingFields};
use crate::sequencer::StepCommand;
use crate::store::Value;

/// Rating key used for the first, unnamed value of a submit
pub const RATING_KEY: &str = "rating";

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Command(Command),
    ShowSession,
    /// Re-read session parameters from disk
    Reload,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    Empty,
    MissingRating,
    BadField(String),
    /// Extra field named like a fixed log column or the rating itself
    ReservedKey(String),
    Unknown(String),
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::Empty => write!(f, "No input"),
            InputError::MissingRating => write!(f, "Submit needs a rating, e.g. 's 7'"),
            InputError::BadField(field) => {
                write!(f, "Expected key=value after the rating, got {:?}", field)
            }
            InputError::ReservedKey(key) => {
                write!(f, "'{}' is already a column of the trial log, pick another name", key)
            }
            InputError::Unknown(input) => write!(f, "Unknown input {:?} (h for help)", input),
        }
    }
}

impl std::error::Error for InputError {}

pub const HELP: &str = "\
  U  big step up        u  small step up
  D  big step down      d  small step down
  r  start / repeat     s <rating> [key=value ...]  submit
  p  show session       l  reload session from disk
  h  help               q  quit";

/// Input while calibrating
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationInput {
    Play,
    /// Sound level meter reading in dB SPL
    Reading(f64),
    Quit,
}

pub const CALIBRATION_HELP: &str = "\
  Enter / p  play the calibration stimulus
  <number>   save the sound level meter reading (dB SPL)
  q          cancel";

pub fn parse_calibration_input(line: &str) -> Result<CalibrationInput, InputError> {
    match line.trim() {
        "" | "p" | "play" => Ok(CalibrationInput::Play),
        "q" | "quit" => Ok(CalibrationInput::Quit),
        text => text
            .parse::<f64>()
            .ok()
            .filter(|db| db.is_finite())
            .map(CalibrationInput::Reading)
            .ok_or_else(|| InputError::Unknown(text.to_string())),
    }
}

pub fn parse_input(line: &str) -> Result<Input, InputError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err(InputError::Empty);
    };

    let input = match head {
        "U" => Input::Command(Command::Step(StepCommand::BigIncrement)),
        "u" => Input::Command(Command::Step(StepCommand::SmallIncrement)),
        "D" => Input::Command(Command::Step(StepCommand::BigDecrement)),
        "d" => Input::Command(Command::Step(StepCommand::SmallDecrement)),
        "r" | "repeat" | "start" => Input::Command(Command::Repeat),
        "s" | "submit" => Input::Command(Command::Submit(parse_rating(words)?)),
        "p" => Input::ShowSession,
        "l" => Input::Reload,
        "h" | "?" | "help" => Input::Help,
        "q" | "quit" => Input::Quit,
        token => match token.parse::<StepCommand>() {
            Ok(step) => Input::Command(Command::Step(step)),
            Err(_) => return Err(InputError::Unknown(line.trim().to_string())),
        },
    };
    Ok(input)
}

fn parse_rating<'a>(mut words: impl Iterator<Item = &'a str>) -> Result<RatingFields, InputError> {
    let rating = words.next().ok_or(InputError::MissingRating)?;

    let mut fields = RatingFields::new();
    fields.insert(RATING_KEY.to_string(), parse_value(rating));

    for word in words {
        let (key, value) = word
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| InputError::BadField(word.to_string()))?;
        if key == RATING_KEY || is_reserved_column(key) {
            return Err(InputError::ReservedKey(key.to_string()));
        }
        fields.insert(key.to_string(), parse_value(value));
    }
    Ok(fields)
}

/// Integer if possible, then float, otherwise text
fn parse_value(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        Value::Int(i)
    } else if let Ok(x) = text.parse::<f64>() {
        Value::Float(x)
    } else {
        Value::Str(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrow_keys() {
        assert_eq!(
            parse_input("U").unwrap(),
            Input::Command(Command::Step(StepCommand::BigIncrement))
        );
        assert_eq!(
            parse_input(" d ").unwrap(),
            Input::Command(Command::Step(StepCommand::SmallDecrement))
        );
        assert_eq!(
            parse_input("bigdown").unwrap(),
            Input::Command(Command::Step(StepCommand::BigDecrement))
        );
    }

    #[test]
    fn test_submit_with_extra_fields() {
        let input = parse_input("s 7 effort=2.5 note=clear").unwrap();
        let Input::Command(Command::Submit(fields)) = input else {
            panic!("Expected submit, got {:?}", input);
        };
        assert_eq!(fields.get("rating"), Some(&Value::Int(7)));
        assert_eq!(fields.get("effort"), Some(&Value::Float(2.5)));
        assert_eq!(fields.get("note"), Some(&Value::Str("clear".to_string())));
    }

    #[test]
    fn test_submit_errors() {
        assert_eq!(parse_input("s"), Err(InputError::MissingRating));
        assert_eq!(
            parse_input("s 4 loud"),
            Err(InputError::BadField("loud".to_string()))
        );
        assert_eq!(
            parse_input("s 4 =3"),
            Err(InputError::BadField("=3".to_string()))
        );
    }

    #[test]
    fn test_submit_rejects_fixed_column_names() {
        assert_eq!(
            parse_input("s 5 stimulus=other trial=9"),
            Err(InputError::ReservedKey("stimulus".to_string()))
        );
        assert_eq!(
            parse_input("s 5 condition=x"),
            Err(InputError::ReservedKey("condition".to_string()))
        );
        assert_eq!(
            parse_input("s 5 rating=6"),
            Err(InputError::ReservedKey("rating".to_string()))
        );
    }

    #[test]
    fn test_calibration_inputs() {
        assert_eq!(parse_calibration_input(""), Ok(CalibrationInput::Play));
        assert_eq!(parse_calibration_input(" p "), Ok(CalibrationInput::Play));
        assert_eq!(
            parse_calibration_input("71.5"),
            Ok(CalibrationInput::Reading(71.5))
        );
        assert_eq!(parse_calibration_input("q"), Ok(CalibrationInput::Quit));
        assert_eq!(
            parse_calibration_input("loud"),
            Err(InputError::Unknown("loud".to_string()))
        );
        assert!(parse_calibration_input("NaN").is_err());
    }

    #[test]
    fn test_other_inputs() {
        assert_eq!(parse_input("q").unwrap(), Input::Quit);
        assert_eq!(parse_input("l").unwrap(), Input::Reload);
        assert_eq!(parse_input("   "), Err(InputError::Empty));
        assert_eq!(
            parse_input("x"),
            Err(InputError::Unknown("x".to_string()))
        );
    }
}
