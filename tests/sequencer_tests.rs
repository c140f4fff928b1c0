// Behaviour of the trial sequencer as seen by a presentation surface:
// stepping, clamping, repeat and submit bookkeeping

use adaptive_rating::recorder::{RatingFields, RecorderError, TrialRecord, TrialSink};
use adaptive_rating::sequencer::{
    Direction, FixedStart, Magnitude, RandomStart, SequencerError, StepCommand, TrialSequencer,
};
use adaptive_rating::stimulus::StimulusList;
use adaptive_rating::store::Value;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use std::path::PathBuf;

const ALL_COMMANDS: [StepCommand; 4] = [
    StepCommand::BigIncrement,
    StepCommand::SmallIncrement,
    StepCommand::BigDecrement,
    StepCommand::SmallDecrement,
];

fn stimuli(len: usize) -> StimulusList {
    StimulusList::from_paths((0..len).map(|i| PathBuf::from(format!("/stim/level_{:02}.wav", i))))
}

fn sequencer_at(len: usize, start: usize) -> TrialSequencer<FixedStart> {
    let mut seq = TrialSequencer::new(FixedStart(start));
    seq.load(stimuli(len));
    assert_eq!(seq.cursor(), Some(start));
    seq
}

fn rating(score: i64) -> RatingFields {
    RatingFields::from([("rating".to_string(), Value::Int(score))])
}

#[derive(Default)]
struct MemorySink {
    records: Vec<TrialRecord>,
}

impl TrialSink for MemorySink {
    fn record(&mut self, record: &TrialRecord) -> Result<(), RecorderError> {
        self.records.push(record.clone());
        Ok(())
    }
}

struct FailingSink;

impl TrialSink for FailingSink {
    fn record(&mut self, _record: &TrialRecord) -> Result<(), RecorderError> {
        Err(RecorderError::WriteFailure {
            path: PathBuf::from("/full/disk.csv"),
            source: io::Error::new(io::ErrorKind::Other, "No space left on device"),
        })
    }
}

#[test]
fn test_scenario_small_small_big() {
    let mut seq = sequencer_at(10, 5);

    assert_eq!(seq.step(StepCommand::SmallIncrement).unwrap(), 4);
    assert_eq!(seq.step(StepCommand::SmallIncrement).unwrap(), 3);
    assert_eq!(seq.step(StepCommand::BigDecrement).unwrap(), 7);

    assert_eq!(seq.current_stimulus().unwrap().name, "level_07.wav");
}

#[test]
fn test_scenario_big_increment_clamps_at_zero() {
    let mut seq = sequencer_at(3, 1);
    assert_eq!(seq.step(StepCommand::BigIncrement).unwrap(), 0);
}

#[test]
fn test_increment_moves_towards_start_and_decrement_towards_end() {
    let mut seq = sequencer_at(20, 10);

    let up = StepCommand::new(Direction::Increment, Magnitude::Small);
    let down = StepCommand::new(Direction::Decrement, Magnitude::Small);
    assert_eq!(seq.step(up).unwrap(), 9);
    assert_eq!(seq.step(down).unwrap(), 10);

    let big_up = StepCommand::new(Direction::Increment, Magnitude::Big);
    let big_down = StepCommand::new(Direction::Decrement, Magnitude::Big);
    assert_eq!(seq.step(big_up).unwrap(), 6);
    assert_eq!(seq.step(big_down).unwrap(), 10);
}

#[test]
fn test_clamping_is_idempotent_at_both_bounds() {
    let mut seq = sequencer_at(7, 3);

    for _ in 0..5 {
        assert_eq!(seq.step(StepCommand::BigIncrement).unwrap(), 0);
    }
    for _ in 0..5 {
        seq.step(StepCommand::BigDecrement).unwrap();
    }
    assert_eq!(seq.cursor(), Some(6));
    assert_eq!(seq.step(StepCommand::SmallDecrement).unwrap(), 6);
}

#[test]
fn test_cursor_stays_in_bounds_for_random_walks() {
    let mut rng = StdRng::seed_from_u64(7);

    for len in 1..=12 {
        let mut seq = TrialSequencer::new(RandomStart(StdRng::seed_from_u64(len as u64)));
        seq.load(stimuli(len));

        for _ in 0..200 {
            let command = ALL_COMMANDS[rng.random_range(0..ALL_COMMANDS.len())];
            let before = seq.cursor().unwrap() as isize;
            let after = seq.step(command).unwrap();

            assert!(after < len, "cursor {} escaped list of {}", after, len);
            let expected = (before + command.delta()).clamp(0, len as isize - 1) as usize;
            assert_eq!(after, expected);
        }
    }
}

#[test]
fn test_random_start_excludes_last_index() {
    for seed in 0..50 {
        let mut seq = TrialSequencer::new(RandomStart(StdRng::seed_from_u64(seed)));
        seq.load(stimuli(5));
        let start = seq.cursor().unwrap();
        assert!(start < 4, "seed {} started at {}", seed, start);
    }
}

#[test]
fn test_same_seed_same_start() {
    let mut a = TrialSequencer::new(RandomStart(StdRng::seed_from_u64(99)));
    let mut b = TrialSequencer::new(RandomStart(StdRng::seed_from_u64(99)));
    a.load(stimuli(40));
    b.load(stimuli(40));
    assert_eq!(a.cursor(), b.cursor());
}

#[test]
fn test_repeat_changes_nothing() {
    let mut seq = sequencer_at(10, 2);
    let mut sink = MemorySink::default();
    seq.submit(rating(4), &mut sink).unwrap();

    let before = seq.state();
    let stimulus = seq.repeat().unwrap().clone();
    seq.repeat().unwrap();

    assert_eq!(seq.state(), before);
    assert_eq!(stimulus.name, "level_02.wav");
}

#[test]
fn test_submit_counts_and_records_current_stimulus() {
    let mut seq = sequencer_at(10, 5);
    let mut sink = MemorySink::default();

    seq.step(StepCommand::BigIncrement).unwrap();
    let record = seq.submit(rating(8), &mut sink).unwrap();

    assert_eq!(seq.completed_count(), 1);
    assert_eq!(record.sequence_index, 0);
    assert_eq!(record.position, 1);
    assert_eq!(record.stimulus_name, "level_01.wav");
    assert_eq!(record.rating_fields.get("rating"), Some(&Value::Int(8)));

    seq.step(StepCommand::SmallDecrement).unwrap();
    let record = seq.submit(rating(6), &mut sink).unwrap();
    assert_eq!(record.sequence_index, 1);
    assert_eq!(seq.completed_count(), 2);
    assert_eq!(sink.records.len(), 2);
    assert_eq!(sink.records[1].stimulus_name, "level_02.wav");
}

#[test]
fn test_failed_write_is_not_counted() {
    let mut seq = sequencer_at(10, 5);

    let result = seq.submit(rating(3), &mut FailingSink);
    assert!(matches!(result, Err(SequencerError::Record(_))));
    assert_eq!(seq.completed_count(), 0);

    let mut sink = MemorySink::default();
    let record = seq.submit(rating(3), &mut sink).unwrap();
    assert_eq!(record.sequence_index, 0);
    assert_eq!(seq.completed_count(), 1);
}

#[test]
fn test_inactive_sequencer_rejects_everything() {
    let mut seq = TrialSequencer::new(FixedStart(0));
    seq.load(StimulusList::default());

    assert!(!seq.is_active());
    assert_eq!(seq.state().length, 0);
    assert!(matches!(seq.step(StepCommand::BigDecrement), Err(SequencerError::NotActive)));
    assert!(matches!(seq.current_stimulus(), Err(SequencerError::NotActive)));
    assert!(matches!(
        seq.submit(rating(1), &mut MemorySink::default()),
        Err(SequencerError::NotActive)
    ));
}

#[test]
fn test_reload_rerandomizes_and_keeps_count() {
    let mut seq = sequencer_at(10, 8);
    let mut sink = MemorySink::default();
    seq.submit(rating(1), &mut sink).unwrap();

    seq.load(stimuli(3));
    assert_eq!(seq.cursor(), Some(2));
    assert_eq!(seq.len(), 3);
    assert_eq!(seq.completed_count(), 1);

    seq.unload();
    assert!(!seq.is_active());
    assert_eq!(seq.completed_count(), 1);
}
