/// Application-wide constants for stepping, file layout and playback

pub mod steps {
    /// Cursor positions moved by a big step command
    pub const BIG_STEP: usize = 4;

    /// Cursor positions moved by a small step command
    pub const SMALL_STEP: usize = 1;
}

pub mod files {
    /// Directory under the user's home that holds settings, session and data
    pub const CONFIG_DIR_NAME: &str = ".adaptive-rating";

    pub const SETTINGS_FILE: &str = "settings.yaml";

    pub const SESSION_FILE: &str = "session.yaml";

    /// Default trial log directory, relative to the config directory
    pub const DATA_DIR_NAME: &str = "data";

    /// Extension used when the settings do not name one
    pub const DEFAULT_AUDIO_EXTENSION: &str = "wav";
}

pub mod playback {
    /// Sentinel device id meaning "use the host's default output device"
    pub const DEFAULT_DEVICE_ID: i64 = -1;

    /// Speaker number meaning "send the signal to every output channel"
    pub const ALL_SPEAKERS: i64 = 0;
}
