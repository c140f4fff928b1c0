/// Stimulus list loading
///
/// Scans a directory for audio files with a given extension and produces
/// the ordered list the trial sequencer walks through. Order is by file
/// name so that it is stable across sessions and platforms.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StimulusError {
    #[error("Invalid stimulus directory {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("No .{extension} files found in {}", path.display())]
    EmptyDirectory { path: PathBuf, extension: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stimulus {
    pub path: PathBuf,
    /// File name, used in logs and the trial record
    pub name: String,
}

impl Stimulus {
    pub fn from_path(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Stimulus { path, name }
    }
}

/// Ordered stimuli; fixed once loaded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StimulusList {
    stimuli: Vec<Stimulus>,
}

impl StimulusList {
    /// Enumerate `*.extension` files directly inside `dir`
    pub fn load(dir: &Path, extension: &str) -> Result<Self, StimulusError> {
        let extension = extension.trim_start_matches('.');

        if !dir.is_dir() {
            return Err(StimulusError::InvalidPath {
                path: dir.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let entries = fs::read_dir(dir).map_err(|e| StimulusError::InvalidPath {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_extension(path, extension))
            .collect();

        if paths.is_empty() {
            return Err(StimulusError::EmptyDirectory {
                path: dir.to_path_buf(),
                extension: extension.to_string(),
            });
        }

        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        log::info!("Loaded {} stimuli from {}", paths.len(), dir.display());

        Ok(Self::from_paths(paths))
    }

    pub fn from_paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        StimulusList {
            stimuli: paths.into_iter().map(Stimulus::from_path).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.stimuli.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stimuli.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Stimulus> {
        self.stimuli.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stimulus> {
        self.stimuli.iter()
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_match_is_case_insensitive() {
        assert!(has_extension(Path::new("a/b/tone.WAV"), "wav"));
        assert!(has_extension(Path::new("tone.wav"), "wav"));
        assert!(!has_extension(Path::new("tone.wav.txt"), "wav"));
        assert!(!has_extension(Path::new("wav"), "wav"));
    }

    #[test]
    fn test_from_paths_names() {
        let list = StimulusList::from_paths(vec![
            PathBuf::from("/stim/01_snr-10.wav"),
            PathBuf::from("/stim/02_snr-8.wav"),
        ]);
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(1).unwrap().name, "02_snr-8.wav");
        assert!(list.get(2).is_none());
    }
}
