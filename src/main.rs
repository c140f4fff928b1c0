use adaptive_rating::audio::{CpalPlayback, Playback};
use adaptive_rating::calibration::Calibration;
use adaptive_rating::config::{AppSettings, Config, SessionParameters};
use adaptive_rating::controller::{Command, ControllerError, Outcome, TrialController};
use adaptive_rating::recorder::{CsvRecorder, TrialSink};
use adaptive_rating::sequencer::{
    FixedStart, RandomStart, SequencerError, StartPicker, TrialSequencer,
};
use adaptive_rating::stimulus::{Stimulus, StimulusError, StimulusList};
use adaptive_rating::store::KeyValueStore;
use adaptive_rating::surface::{self, CalibrationInput, Input, InputError};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "adaptive-rating")]
#[command(about = "Adaptive rating tool for psychoacoustic listening experiments", long_about = None)]
struct Cli {
    /// Directory holding settings.yaml, session.yaml and the data folder (default: ~/.adaptive-rating)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Seed for the random start position
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Start at this stimulus index instead of a random one
    #[arg(long, global = true)]
    start: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interactive rating session (default)
    Run,
    /// Show or edit session parameters
    Session {
        #[command(subcommand)]
        action: StoreAction,
    },
    /// Show or edit application settings
    Settings {
        #[command(subcommand)]
        action: StoreAction,
    },
    /// List the stimuli in the session's audio file directory
    Stimuli,
    /// Play a calibration stimulus at the raw level and save the sound level meter reading
    Calibrate {
        /// Calibration stimulus (default: first stimulus of the session)
        file: Option<PathBuf>,

        /// Raw level in dB to calibrate at (default: session raw_level)
        #[arg(long, allow_hyphen_values = true)]
        raw_level: Option<f64>,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// Print every value
    Show,
    /// Set one value and save
    Set {
        key: String,
        value: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::default_config_dir()?,
    };
    let (mut config, warnings) = Config::load(config_dir);

    init_logging(&config.app_settings().log_level);
    for warning in &warnings {
        eprintln!("⚠️  {}", warning);
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => match (cli.start, cli.seed) {
            (Some(start), _) => run_app(config, FixedStart(start)),
            (None, Some(seed)) => run_app(config, RandomStart(StdRng::seed_from_u64(seed))),
            (None, None) => run_app(config, RandomStart(rand::rng())),
        },
        Commands::Session { action } => session_command(&mut config, action),
        Commands::Settings { action } => settings_command(&mut config, action),
        Commands::Stimuli => stimuli_command(&config),
        Commands::Calibrate { file, raw_level } => calibrate_command(&mut config, file, raw_level),
    }
}

fn init_logging(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn print_store(store: &KeyValueStore) {
    println!("{}:", store.path().display());
    for (key, value) in store.entries() {
        println!("  {:<32} {}", key, value);
    }
}

fn session_command(config: &mut Config, action: StoreAction) -> Result<()> {
    match action {
        StoreAction::Show => print_store(&config.session),
        StoreAction::Set { key, value } => {
            config.session.set_from_str(&key, &value)?;
            let params = config.session_parameters();
            config.confirm_session(&params)?;
            println!("✓ {} = {}", key, value);
        }
    }
    Ok(())
}

fn settings_command(config: &mut Config, action: StoreAction) -> Result<()> {
    match action {
        StoreAction::Show => print_store(&config.settings),
        StoreAction::Set { key, value } => {
            // Settings save themselves on change
            config.settings.set_from_str(&key, &value)?;
            println!("✓ {} = {}", key, value);
        }
    }
    Ok(())
}

fn stimuli_command(config: &Config) -> Result<()> {
    let list = load_stimuli(&config.session_parameters(), &config.app_settings())?;
    for (i, stimulus) in list.iter().enumerate() {
        println!("  {:4}  {}", i, stimulus.name);
    }
    println!("{} stimuli", list.len());
    Ok(())
}

fn calibrate_command(
    config: &mut Config,
    file: Option<PathBuf>,
    raw_level: Option<f64>,
) -> Result<()> {
    let params = config.session_parameters();
    let stimulus = match file {
        Some(path) => Stimulus::from_path(path),
        None => load_stimuli(&params, &config.app_settings())?
            .get(0)
            .cloned()
            .context("No calibration stimulus")?,
    };

    let mut player = CpalPlayback::new(params.audio_device_id, params.speaker_number)
        .context("Failed to initialize audio output")?;
    let mut calibration = Calibration::new(stimulus, raw_level.unwrap_or(params.raw_level));

    println!(
        "Calibration: {} at raw level {:.1} dB",
        calibration.stimulus().name,
        calibration.raw_level()
    );
    println!("{}", surface::CALIBRATION_HELP);
    calibration_prompt(&calibration)?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read input")?;

        match surface::parse_calibration_input(&line) {
            Ok(CalibrationInput::Play) => match calibration.play(&mut player) {
                Ok(()) => println!("▶️  {}", calibration.stimulus().name),
                Err(e) => eprintln!("✗ {}", e),
            },
            Ok(CalibrationInput::Reading(reading)) => match calibration.submit(reading, config) {
                Ok(saved) => {
                    println!(
                        "✓ slm_reading = {:.1} dB at raw_level {:.1} dB",
                        saved.slm_reading, saved.raw_level
                    );
                    return Ok(());
                }
                Err(e) => eprintln!("⚠️  {}", e),
            },
            Ok(CalibrationInput::Quit) => {
                println!("Calibration cancelled");
                return Ok(());
            }
            Err(e) => eprintln!("{}", e),
        }

        calibration_prompt(&calibration)?;
    }
    Ok(())
}

fn calibration_prompt(calibration: &Calibration) -> Result<()> {
    if calibration.is_played() {
        print!("[SLM reading (dB)] > ");
    } else {
        print!("[Enter to play] > ");
    }
    io::stdout().flush().context("Failed to flush stdout")
}

fn load_stimuli(
    params: &SessionParameters,
    settings: &AppSettings,
) -> Result<StimulusList, StimulusError> {
    let dir = params
        .stimulus_dir()
        .ok_or_else(|| StimulusError::InvalidPath {
            path: PathBuf::new(),
            reason: "no audio file directory selected".to_string(),
        })?;
    StimulusList::load(&dir, &settings.audio_extension)
}

fn warn_no_stimuli(err: &StimulusError) {
    log::warn!("{}", err);
    eprintln!("⚠️  {}", err);
    eprintln!("   Please select a valid audio file directory:");
    eprintln!("     adaptive-rating session set audio_files_path <DIR>");
    eprintln!("   then press l to reload the session.");
}

fn run_app<P: StartPicker>(mut config: Config, picker: P) -> Result<()> {
    println!("Adaptive Rating Tool");

    let settings = config.app_settings();
    let mut params = config.session_parameters();
    if let Err(e) = params.validate() {
        eprintln!("⚠️  Session parameters: {:#}", e);
    }

    let data_dir = settings.data_dir(&config.config_dir);
    let recorder =
        CsvRecorder::for_session(&data_dir, &params).context("Failed to open trial log")?;
    println!("Trial log: {}", recorder.path().display());

    let player = open_player(&params);

    let mut sequencer = TrialSequencer::new(picker);
    match load_stimuli(&params, &settings) {
        Ok(list) => sequencer.load(list),
        Err(e) => warn_no_stimuli(&e),
    }

    let mut controller =
        TrialController::new(sequencer, recorder, player, params.calibrated_level_db())
            .with_submit_gate(settings.require_playback_before_submit);

    println!(
        "Subject {} | Condition {} | {:.1} dB",
        params.subject, params.condition, params.presentation_level
    );
    println!("{}", surface::HELP);
    println!();
    prompt(&controller)?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read input")?;

        match surface::parse_input(&line) {
            Ok(Input::Quit) => break,
            Ok(Input::Help) => println!("{}", surface::HELP),
            Ok(Input::ShowSession) => match params.to_yaml() {
                Ok(yaml) => print!("{}", yaml),
                Err(e) => eprintln!("✗ {:#}", e),
            },
            Ok(Input::Reload) => {
                reload_session(&mut config, &settings, &mut params, &mut controller)
            }
            Ok(Input::Command(command)) => handle_command(&mut controller, command)?,
            Err(InputError::Empty) => {}
            Err(e) => eprintln!("{}", e),
        }

        prompt(&controller)?;
    }

    println!();
    println!("Trials Completed: {}", controller.state().completed_count);
    Ok(())
}

/// Output for `params`; a failure is reported and leaves the session silent
/// until a reload finds a working device
fn open_player(params: &SessionParameters) -> Option<CpalPlayback> {
    match CpalPlayback::new(params.audio_device_id, params.speaker_number) {
        Ok(player) => Some(player),
        Err(e) => {
            log::warn!("Audio output unavailable: {:#}", e);
            eprintln!("⚠️  Audio output unavailable: {:#}", e);
            eprintln!("   Fix audio_device_id / speaker_number, then press l to reload.");
            None
        }
    }
}

fn prompt<P, W, A>(controller: &TrialController<P, W, A>) -> Result<()>
where
    P: StartPicker,
    W: TrialSink,
    A: Playback,
{
    let state = controller.state();
    let position = state
        .cursor
        .map_or_else(|| "-".to_string(), |c| c.to_string());
    print!(
        "[{} | #{} of {} | done {}] > ",
        controller.repeat_label(),
        position,
        state.length,
        state.completed_count
    );
    io::stdout().flush().context("Failed to flush stdout")
}

fn handle_command<P, W, A>(controller: &mut TrialController<P, W, A>, command: Command) -> Result<()>
where
    P: StartPicker,
    W: TrialSink,
    A: Playback,
{
    // The surface keeps the arrow controls disabled while nothing is loaded
    if !controller.sequencer().is_active() {
        eprintln!("⚠️  No stimuli loaded (press l after selecting a directory)");
        return Ok(());
    }

    match controller.dispatch(command) {
        Ok(Outcome::Presented { position, stimulus }) => {
            println!("▶️  #{} {}", position, stimulus.name);
        }
        Ok(Outcome::Recorded { record, completed }) => {
            println!(
                "✓ Saved {} | Trials Completed: {}",
                record.stimulus_name, completed
            );
        }
        Err(ControllerError::NotPresented) => {
            eprintln!("⚠️  Press r to play the stimulus before submitting");
        }
        Err(ControllerError::Playback(e)) => {
            eprintln!("✗ Playback failed: {:#}", e);
        }
        Err(ControllerError::Sequencer(SequencerError::Record(e))) => {
            eprintln!("✗ {} (trial not counted)", e);
        }
        Err(e @ ControllerError::Sequencer(_)) => {
            return Err(e).context("Presentation surface issued an invalid command");
        }
    }
    Ok(())
}

fn reload_session<P: StartPicker>(
    config: &mut Config,
    settings: &AppSettings,
    params: &mut SessionParameters,
    controller: &mut TrialController<P, CsvRecorder, Option<CpalPlayback>>,
) {
    for warning in config.revert_session() {
        eprintln!("⚠️  {}", warning);
    }

    let new = config.session_parameters();
    if let Err(e) = new.validate() {
        eprintln!("⚠️  Session parameters: {:#}", e);
    }

    controller.set_level_db(new.calibrated_level_db());

    if new.subject != params.subject
        || new.condition != params.condition
        || new.presentation_level != params.presentation_level
    {
        match CsvRecorder::for_session(&settings.data_dir(&config.config_dir), &new) {
            Ok(recorder) => {
                println!("Trial log: {}", recorder.path().display());
                controller.set_recorder(recorder);
            }
            Err(e) => eprintln!("⚠️  {}", e),
        }
    }

    if new.audio_device_id != params.audio_device_id
        || new.speaker_number != params.speaker_number
        || controller.player().is_none()
    {
        match CpalPlayback::new(new.audio_device_id, new.speaker_number) {
            Ok(player) => controller.set_player(Some(player)),
            Err(e) if controller.player().is_some() => {
                eprintln!("⚠️  Keeping previous audio output: {:#}", e)
            }
            Err(e) => eprintln!("⚠️  Audio output unavailable: {:#}", e),
        }
    }

    if new.audio_files_path != params.audio_files_path || !controller.sequencer().is_active() {
        match load_stimuli(&new, settings) {
            Ok(list) => controller.load_stimuli(list),
            Err(e) => {
                warn_no_stimuli(&e);
                controller.unload_stimuli();
            }
        }
    }

    *params = new;
    println!("✓ Session reloaded");
}
