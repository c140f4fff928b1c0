/// Typed key-value persistence backed by a YAML file
///
/// A store is described by a fixed schema of fields, each with a declared
/// type and a default. Loading never aborts on a single bad value: values
/// that cannot be coerced to their declared type are reported and replaced
/// by the field default.

use serde_yaml::{Mapping, Value as Yaml};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("'{key}' should be {expected}, found {found}")]
    SchemaMismatch {
        key: String,
        expected: ValueKind,
        found: String,
    },

    #[error("Unknown key: {0}")]
    UnknownKey(String),

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Str,
    Int,
    Float,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Str => "string",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Str(String),
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Str(_) => ValueKind::Str,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Parse operator-entered text as a value of `kind`
    pub fn parse(text: &str, kind: ValueKind) -> Option<Value> {
        coerce(&Yaml::String(text.to_string()), kind)
    }

    /// Convert this value to `kind`, if a lossless reading exists
    pub fn coerce_to(&self, kind: ValueKind) -> Option<Value> {
        coerce(&self.to_yaml(), kind)
    }

    fn to_yaml(&self) -> Yaml {
        match self {
            Value::Bool(b) => Yaml::Bool(*b),
            Value::Str(s) => Yaml::String(s.clone()),
            Value::Int(i) => Yaml::Number((*i).into()),
            Value::Float(x) => Yaml::Number((*x).into()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Read a raw YAML scalar as `kind`. Int widens to float, numeric and
/// boolean strings are parsed, any scalar reads as a string.
fn coerce(raw: &Yaml, kind: ValueKind) -> Option<Value> {
    match (kind, raw) {
        (ValueKind::Bool, Yaml::Bool(b)) => Some(Value::Bool(*b)),
        (ValueKind::Bool, Yaml::String(s)) => parse_bool(s).map(Value::Bool),

        (ValueKind::Int, Yaml::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|x| x.fract() == 0.0 && x.is_finite()).map(|x| x as i64))
            .map(Value::Int),
        (ValueKind::Int, Yaml::String(s)) => s.trim().parse().ok().map(Value::Int),

        (ValueKind::Float, Yaml::Number(n)) => n.as_f64().map(Value::Float),
        (ValueKind::Float, Yaml::String(s)) => s.trim().parse().ok().map(Value::Float),

        (ValueKind::Str, Yaml::String(s)) => Some(Value::Str(s.clone())),
        (ValueKind::Str, Yaml::Number(n)) => Some(Value::Str(n.to_string())),
        (ValueKind::Str, Yaml::Bool(b)) => Some(Value::Str(b.to_string())),

        _ => None,
    }
}

/// Schema default; `const`-constructible so schemas can be statics
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldDefault {
    Bool(bool),
    Str(&'static str),
    Int(i64),
    Float(f64),
}

impl FieldDefault {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldDefault::Bool(_) => ValueKind::Bool,
            FieldDefault::Str(_) => ValueKind::Str,
            FieldDefault::Int(_) => ValueKind::Int,
            FieldDefault::Float(_) => ValueKind::Float,
        }
    }

    pub fn value(&self) -> Value {
        match self {
            FieldDefault::Bool(b) => Value::Bool(*b),
            FieldDefault::Str(s) => Value::Str(s.to_string()),
            FieldDefault::Int(i) => Value::Int(*i),
            FieldDefault::Float(x) => Value::Float(*x),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: &'static str,
    pub default: FieldDefault,
}

impl FieldSpec {
    pub const fn new(key: &'static str, default: FieldDefault) -> Self {
        FieldSpec { key, default }
    }

    pub fn kind(&self) -> ValueKind {
        self.default.kind()
    }
}

/// Outcome of a load that did not fail outright
#[derive(Debug, Default)]
pub struct LoadReport {
    /// True when no file existed and every field holds its default
    pub from_defaults: bool,
    /// Values that could not be coerced and were replaced by defaults
    pub mismatches: Vec<StoreError>,
    /// Keys present in the file but absent from the schema
    pub unknown_keys: Vec<String>,
}

/// Passed to change hooks after a value has been updated
pub struct ChangeEvent<'a> {
    pub key: &'static str,
    pub value: &'a Value,
    pub store: &'a KeyValueStore,
}

pub type ChangeHook = Box<dyn FnMut(&ChangeEvent<'_>) -> Result<(), StoreError>>;

pub struct KeyValueStore {
    schema: &'static [FieldSpec],
    path: PathBuf,
    values: BTreeMap<&'static str, Value>,
    hooks: Vec<ChangeHook>,
}

impl KeyValueStore {
    /// Create a store holding schema defaults; nothing is read yet
    pub fn new(schema: &'static [FieldSpec], path: impl Into<PathBuf>) -> Self {
        let mut store = KeyValueStore {
            schema,
            path: path.into(),
            values: BTreeMap::new(),
            hooks: Vec::new(),
        };
        store.reset_to_defaults();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &'static [FieldSpec] {
        self.schema
    }

    pub fn reset_to_defaults(&mut self) {
        self.values = self
            .schema
            .iter()
            .map(|field| (field.key, field.default.value()))
            .collect();
    }

    /// Replace all values with the persisted ones, falling back to defaults
    /// for missing or malformed entries. A missing file is not an error.
    pub fn load(&mut self) -> Result<LoadReport, StoreError> {
        self.reset_to_defaults();

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("No file at {}, using defaults", self.path.display());
                return Ok(LoadReport {
                    from_defaults: true,
                    ..LoadReport::default()
                });
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut report = LoadReport::default();

        // An empty file deserializes as null
        let mapping: Mapping = match serde_yaml::from_str::<Option<Mapping>>(&contents) {
            Ok(mapping) => mapping.unwrap_or_default(),
            Err(source) => {
                return Err(StoreError::Parse {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        for (raw_key, raw_value) in &mapping {
            let Some(key) = raw_key.as_str() else {
                report.unknown_keys.push(format!("{:?}", raw_key));
                continue;
            };
            let Some(field) = self.field(key) else {
                log::warn!("Ignoring unknown key '{}' in {}", key, self.path.display());
                report.unknown_keys.push(key.to_string());
                continue;
            };

            match coerce(raw_value, field.kind()) {
                Some(value) => {
                    self.values.insert(field.key, value);
                }
                None => {
                    let err = StoreError::SchemaMismatch {
                        key: field.key.to_string(),
                        expected: field.kind(),
                        found: describe(raw_value),
                    };
                    log::warn!("{} (using default {})", err, field.default.value());
                    report.mismatches.push(err);
                }
            }
        }

        log::info!("Loaded {}", self.path.display());
        Ok(report)
    }

    /// Overwrite the backing file with every schema field
    pub fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut mapping = Mapping::new();
        for field in self.schema {
            if let Some(value) = self.values.get(field.key) {
                mapping.insert(Yaml::String(field.key.to_string()), value.to_yaml());
            }
        }

        let yaml = serde_yaml::to_string(&mapping).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;

        fs::write(&self.path, yaml).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;

        log::debug!("Saved {}", self.path.display());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_float)
    }

    /// Values in schema order
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &Value)> + '_ {
        self.schema
            .iter()
            .filter_map(move |field| self.values.get(field.key).map(|v| (field.key, v)))
    }

    /// Update one field and run the change hooks if the value changed.
    /// The value is coerced to the field's declared type first.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        let field = *self
            .field(key)
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))?;

        let value = value
            .coerce_to(field.kind())
            .ok_or_else(|| StoreError::SchemaMismatch {
                key: field.key.to_string(),
                expected: field.kind(),
                found: format!("{} ({})", value, value.kind()),
            })?;

        if self.values.get(field.key) == Some(&value) {
            return Ok(());
        }
        self.values.insert(field.key, value);
        self.notify(field.key)
    }

    /// Parse operator text for `key` and set it
    pub fn set_from_str(&mut self, key: &str, text: &str) -> Result<(), StoreError> {
        let field = *self
            .field(key)
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))?;
        let value = Value::parse(text, field.kind()).ok_or_else(|| StoreError::SchemaMismatch {
            key: field.key.to_string(),
            expected: field.kind(),
            found: format!("{:?}", text),
        })?;
        self.set(key, value)
    }

    /// Register a callback run after every effective `set`
    pub fn on_change(&mut self, hook: ChangeHook) {
        self.hooks.push(hook);
    }

    /// Save the whole store whenever a value changes
    pub fn persist_on_change(&mut self) {
        self.on_change(Box::new(|event: &ChangeEvent<'_>| event.store.save()));
    }

    fn field(&self, key: &str) -> Option<&'static FieldSpec> {
        self.schema.iter().find(|field| field.key == key)
    }

    fn notify(&mut self, key: &'static str) -> Result<(), StoreError> {
        // Hooks borrow the store immutably, so they are detached while running
        let mut hooks = std::mem::take(&mut self.hooks);
        let mut result = Ok(());
        if let Some(value) = self.values.get(key) {
            let event = ChangeEvent {
                key,
                value,
                store: &*self,
            };
            for hook in hooks.iter_mut() {
                if let Err(e) = hook(&event) {
                    result = Err(e);
                    break;
                }
            }
        }
        self.hooks = hooks;
        result
    }
}

fn describe(raw: &Yaml) -> String {
    match raw {
        Yaml::Null => "null".to_string(),
        Yaml::Bool(b) => b.to_string(),
        Yaml::Number(n) => n.to_string(),
        Yaml::String(s) => format!("{:?}", s),
        Yaml::Sequence(_) => "a list".to_string(),
        Yaml::Mapping(_) => "a mapping".to_string(),
        Yaml::Tagged(_) => "a tagged value".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    static SCHEMA: &[FieldSpec] = &[
        FieldSpec::new("name", FieldDefault::Str("anon")),
        FieldSpec::new("count", FieldDefault::Int(3)),
        FieldSpec::new("gain", FieldDefault::Float(0.5)),
        FieldSpec::new("enabled", FieldDefault::Bool(true)),
    ];

    #[test]
    fn test_coerce_widens_int_to_float() {
        assert_eq!(Value::Int(2).coerce_to(ValueKind::Float), Some(Value::Float(2.0)));
    }

    #[test]
    fn test_coerce_rejects_fractional_int() {
        assert_eq!(Value::Float(2.5).coerce_to(ValueKind::Int), None);
        assert_eq!(Value::Float(2.0).coerce_to(ValueKind::Int), Some(Value::Int(2)));
    }

    #[test]
    fn test_parse_text_values() {
        assert_eq!(Value::parse(" 42 ", ValueKind::Int), Some(Value::Int(42)));
        assert_eq!(Value::parse("yes", ValueKind::Bool), Some(Value::Bool(true)));
        assert_eq!(Value::parse("-3.5", ValueKind::Float), Some(Value::Float(-3.5)));
        assert_eq!(Value::parse("loud", ValueKind::Float), None);
    }

    #[test]
    fn test_new_store_holds_defaults() {
        let store = KeyValueStore::new(SCHEMA, "unused.yaml");
        assert_eq!(store.get_str("name"), Some("anon"));
        assert_eq!(store.get_int("count"), Some(3));
        assert_eq!(store.get_bool("enabled"), Some(true));
        let keys: Vec<_> = store.entries().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["name", "count", "gain", "enabled"]);
    }

    #[test]
    fn test_set_unknown_key() {
        let mut store = KeyValueStore::new(SCHEMA, "unused.yaml");
        assert!(matches!(
            store.set("volume", Value::Int(1)),
            Err(StoreError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_set_wrong_type_keeps_old_value() {
        let mut store = KeyValueStore::new(SCHEMA, "unused.yaml");
        let result = store.set("count", Value::Str("many".to_string()));
        assert!(matches!(result, Err(StoreError::SchemaMismatch { .. })));
        assert_eq!(store.get_int("count"), Some(3));
    }

    #[test]
    fn test_hooks_fire_only_on_change() {
        let mut store = KeyValueStore::new(SCHEMA, "unused.yaml");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        store.on_change(Box::new(move |event: &ChangeEvent<'_>| {
            sink.borrow_mut().push((event.key, event.value.clone()));
            Ok(())
        }));

        store.set("count", Value::Int(3)).unwrap();
        store.set("count", Value::Int(7)).unwrap();
        store.set_from_str("enabled", "false").unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![("count", Value::Int(7)), ("enabled", Value::Bool(false))]
        );
    }
}
