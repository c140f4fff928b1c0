/// Trial log
///
/// One CSV row per submitted trial. The header is written when the log is
/// created; rating columns the header does not know yet are appended to it,
/// rows already in the file are never touched. Reopening a log continues
/// its trial numbering.

use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::SessionParameters;
use crate::store::Value;

/// Columns written before the session metadata columns
const LEADING_COLUMNS: [&str; 2] = ["trial", "timestamp"];

/// Columns written after the session metadata columns
const TRAILING_COLUMNS: [&str; 2] = ["position", "stimulus"];

/// Metadata columns of a session log, see `CsvRecorder::for_session`
pub const SESSION_METADATA_COLUMNS: [&str; 3] = ["subject", "condition", "presentation_level"];

/// True for names a session log already uses for its fixed columns
pub fn is_reserved_column(name: &str) -> bool {
    LEADING_COLUMNS
        .iter()
        .chain(&TRAILING_COLUMNS)
        .chain(&SESSION_METADATA_COLUMNS)
        .any(|column| *column == name)
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Failed to write trial log {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Rating field '{0}' clashes with a fixed log column")]
    ReservedColumn(String),
}

pub type RatingFields = BTreeMap<String, Value>;

/// One submitted trial
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRecord {
    /// 0-based index of this trial within the session
    pub sequence_index: usize,
    /// Cursor position of the rated stimulus
    pub position: usize,
    pub stimulus_name: String,
    pub rating_fields: RatingFields,
    pub timestamp: DateTime<Local>,
}

/// Durable destination for trial records
pub trait TrialSink {
    fn record(&mut self, record: &TrialRecord) -> Result<(), RecorderError>;
}

pub struct CsvRecorder {
    path: PathBuf,
    /// Session columns (name, value) repeated on every row
    metadata: Vec<(String, String)>,
    /// Rating columns currently in the header, in header order
    rating_columns: Vec<String>,
    /// Value of the `trial` column for the next row; continues an existing log
    next_trial: usize,
}

impl CsvRecorder {
    /// Open (or prepare to create) the log at `path`
    pub fn open(
        path: impl Into<PathBuf>,
        metadata: Vec<(String, String)>,
    ) -> Result<Self, RecorderError> {
        let path = path.into();
        let fixed = LEADING_COLUMNS.len() + metadata.len() + TRAILING_COLUMNS.len();

        let (rating_columns, rows) = match read_log(&path) {
            Ok(Some((header, rows))) => (header.into_iter().skip(fixed).collect(), rows),
            Ok(None) => (Vec::new(), 0),
            Err(source) => return Err(RecorderError::WriteFailure { path, source }),
        };
        if rows > 0 {
            log::info!("Continuing trial log {} after {} trial(s)", path.display(), rows);
        }

        Ok(CsvRecorder {
            path,
            metadata,
            rating_columns,
            next_trial: rows + 1,
        })
    }

    /// Log for today's session of `params`, inside `data_dir`
    pub fn for_session(data_dir: &Path, params: &SessionParameters) -> Result<Self, RecorderError> {
        let file_name = format!(
            "{}_{}_{}.csv",
            sanitize(&params.subject),
            sanitize(&params.condition),
            Local::now().format("%Y-%m-%d")
        );
        let values = [
            params.subject.clone(),
            params.condition.clone(),
            params.presentation_level.to_string(),
        ];
        let metadata = SESSION_METADATA_COLUMNS
            .iter()
            .map(|name| name.to_string())
            .zip(values)
            .collect();
        Self::open(data_dir.join(file_name), metadata)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `trial` value the next recorded row will get
    pub fn next_trial(&self) -> usize {
        self.next_trial
    }

    fn is_fixed_column(&self, name: &str) -> bool {
        LEADING_COLUMNS.contains(&name)
            || TRAILING_COLUMNS.contains(&name)
            || self.metadata.iter().any(|(column, _)| column == name)
    }

    fn header(&self) -> Vec<String> {
        LEADING_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.metadata.iter().map(|(name, _)| name.clone()))
            .chain(TRAILING_COLUMNS.iter().map(|c| c.to_string()))
            .chain(self.rating_columns.iter().cloned())
            .collect()
    }

    fn row(&self, record: &TrialRecord) -> Vec<String> {
        let mut row = vec![
            self.next_trial.to_string(),
            record.timestamp.to_rfc3339(),
        ];
        row.extend(self.metadata.iter().map(|(_, value)| value.clone()));
        row.push(record.position.to_string());
        row.push(record.stimulus_name.clone());
        row.extend(self.rating_columns.iter().map(|column| {
            record
                .rating_fields
                .get(column)
                .map(|v| v.to_string())
                .unwrap_or_default()
        }));
        row
    }

    fn write_record(&mut self, record: &TrialRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let is_new = fs::metadata(&self.path).map_or(true, |m| m.len() == 0);

        let new_columns: Vec<String> = record
            .rating_fields
            .keys()
            .filter(|key| !self.rating_columns.contains(key))
            .cloned()
            .collect();

        if is_new || !new_columns.is_empty() {
            let known_columns = self.rating_columns.len();
            self.rating_columns.extend(new_columns);
            let written = if is_new {
                self.create_with_header()
            } else {
                self.rewrite_header()
            };
            if let Err(e) = written {
                // Header on disk is unchanged
                self.rating_columns.truncate(known_columns);
                return Err(e);
            }
        }

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", csv_line(&self.row(record)))?;
        file.sync_data()
    }

    fn create_with_header(&self) -> io::Result<()> {
        let mut file = fs::File::create(&self.path)?;
        writeln!(file, "{}", csv_line(&self.header()))?;
        file.sync_data()?;
        log::info!("Created trial log {}", self.path.display());
        Ok(())
    }

    /// Replace the first line of the log with the current header
    fn rewrite_header(&self) -> io::Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let body = contents.split_once('\n').map_or("", |(_, rest)| rest);

        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            writeln!(file, "{}", csv_line(&self.header()))?;
            file.write_all(body.as_bytes())?;
            file.sync_data()?;
        }
        fs::rename(&tmp, &self.path)?;
        log::info!("Trial log header extended: {:?}", self.rating_columns);
        Ok(())
    }
}

impl TrialSink for CsvRecorder {
    fn record(&mut self, record: &TrialRecord) -> Result<(), RecorderError> {
        if let Some(key) = record
            .rating_fields
            .keys()
            .find(|key| self.is_fixed_column(key))
        {
            return Err(RecorderError::ReservedColumn(key.clone()));
        }

        self.write_record(record)
            .map_err(|source| RecorderError::WriteFailure {
                path: self.path.clone(),
                source,
            })?;
        log::info!(
            "Recorded trial {} ({}) to {}",
            self.next_trial,
            record.stimulus_name,
            self.path.display()
        );
        self.next_trial += 1;
        Ok(())
    }
}

/// Header and number of data rows of an existing log
fn read_log(path: &Path) -> io::Result<Option<(Vec<String>, usize)>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let (first, body) = contents.split_once('\n').unwrap_or((contents.as_str(), ""));
    if first.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some((split_csv_line(first.trim_end_matches('\r')), count_records(body))))
}

/// Count CSV records, ignoring line breaks inside quoted fields
fn count_records(body: &str) -> usize {
    let mut in_quotes = false;
    let mut records = 0;
    let mut line_has_content = false;
    for c in body.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                line_has_content = true;
            }
            '\n' if !in_quotes => {
                if line_has_content {
                    records += 1;
                }
                line_has_content = false;
            }
            '\r' => {}
            _ => line_has_content = true,
        }
    }
    if line_has_content {
        records += 1;
    }
    records
}

fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",")
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_split_handles_quotes() {
        let fields = split_csv_line("trial,\"a,b\",\"x \"\"y\"\"\",");
        assert_eq!(fields, vec!["trial", "a,b", "x \"y\"", ""]);
    }

    #[test]
    fn test_count_records_skips_quoted_newlines() {
        assert_eq!(count_records(""), 0);
        assert_eq!(count_records("1,a\n2,b\n"), 2);
        assert_eq!(count_records("1,\"two\nlines\"\n2,b"), 2);
        assert_eq!(count_records("1,a\n\n"), 1);
    }

    #[test]
    fn test_reserved_columns() {
        assert!(is_reserved_column("trial"));
        assert!(is_reserved_column("stimulus"));
        assert!(is_reserved_column("presentation_level"));
        assert!(!is_reserved_column("rating"));
        assert!(!is_reserved_column("effort"));
    }

    #[test]
    fn test_failed_header_write_forgets_new_columns() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, "file in the way").unwrap();

        let mut recorder = CsvRecorder::open(blocked.join("log.csv"), Vec::new()).unwrap();
        let record = TrialRecord {
            sequence_index: 0,
            position: 0,
            stimulus_name: "a.wav".to_string(),
            rating_fields: RatingFields::from([("effort".to_string(), Value::Int(1))]),
            timestamp: Local::now(),
        };
        assert!(recorder.record(&record).is_err());
        assert!(recorder.rating_columns.is_empty());
        assert_eq!(recorder.next_trial(), 1);

        fs::remove_file(&blocked).unwrap();
        let record = TrialRecord {
            rating_fields: RatingFields::from([("rating".to_string(), Value::Int(4))]),
            ..record
        };
        recorder.record(&record).unwrap();

        let contents = fs::read_to_string(blocked.join("log.csv")).unwrap();
        assert_eq!(
            contents.lines().next(),
            Some("trial,timestamp,position,stimulus,rating")
        );
        assert_eq!(recorder.next_trial(), 2);
    }

    #[test]
    fn test_sanitize_file_name_parts() {
        assert_eq!(sanitize("S 01/left"), "S_01_left");
        assert_eq!(sanitize("  "), "unknown");
        assert_eq!(sanitize("quiet-2"), "quiet-2");
    }
}
