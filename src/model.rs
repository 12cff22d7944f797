use crate::errors::{ModuleError, OptionError};
use crate::lists;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Typed value held by a module option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
}

impl OptionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            OptionValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Str(s) => f.write_str(s),
            OptionValue::Int(n) => write!(f, "{n}"),
            OptionValue::Bool(b) => write!(f, "{b}"),
            OptionValue::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

/// Extra validation applied to every entry of a list option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListCheck {
    Any,
    HttpUrl,
}

/// Declared kind of an option; drives how `set` parses the raw console text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Text,
    Integer,
    Flag,
    /// Comma list or path to a newline separated file.
    List(ListCheck),
    /// Port list, stored in compressed `22,80-90` form.
    Ports,
    /// Comma list of non-negative integers, may be empty.
    Numbers,
    /// Regular expression, may be empty.
    Pattern,
    /// Read-only.
    Fixed,
}

impl OptionKind {
    /// Short syntax hint shown in module help.
    pub fn syntax(self) -> &'static str {
        match self {
            OptionKind::Text => "<string>",
            OptionKind::Integer => "<int>",
            OptionKind::Flag => "true|false",
            OptionKind::List(_) => "<a,b,c|file>",
            OptionKind::Ports => "<22,80,8000-8100>",
            OptionKind::Numbers => "<n,n,...>",
            OptionKind::Pattern => "<regexp>",
            OptionKind::Fixed => "(read-only)",
        }
    }

    pub fn coerce(self, name: &str, raw: &str) -> Result<OptionValue, OptionError> {
        let raw = raw.trim();
        match self {
            OptionKind::Text => Ok(OptionValue::Str(raw.to_string())),
            OptionKind::Integer => raw
                .parse::<i64>()
                .map(OptionValue::Int)
                .map_err(|_| OptionError::invalid(name, format!("Invalid integer value: {raw}"))),
            OptionKind::Flag => match raw.to_ascii_lowercase().as_str() {
                "true" => Ok(OptionValue::Bool(true)),
                "false" => Ok(OptionValue::Bool(false)),
                _ => Err(OptionError::invalid(name, "Value must be 'true' or 'false'")),
            },
            OptionKind::List(check) => {
                let entries = lists::parse_list(raw).map_err(|e| {
                    OptionError::invalid(name, format!("Error reading file {raw}: {e}"))
                })?;
                if entries.is_empty() {
                    return Err(OptionError::invalid(name, "No entries found"));
                }
                if check == ListCheck::HttpUrl {
                    if let Some(bad) = entries
                        .iter()
                        .find(|e| !e.starts_with("http://") && !e.starts_with("https://"))
                    {
                        return Err(OptionError::invalid(
                            name,
                            format!("Error: url must start with http:// or https:// ({bad})"),
                        ));
                    }
                }
                Ok(OptionValue::List(entries))
            }
            OptionKind::Ports => {
                let ports = lists::parse_ports(raw);
                if ports.is_empty() {
                    return Err(OptionError::invalid(name, format!("Invalid port list: {raw}")));
                }
                Ok(OptionValue::Str(lists::compress_ports(&ports)))
            }
            OptionKind::Numbers => match lists::parse_numbers(raw) {
                Some(nums) => Ok(OptionValue::Str(
                    nums.iter().map(u64::to_string).collect::<Vec<_>>().join(","),
                )),
                None => Err(OptionError::invalid(
                    name,
                    format!("Expected comma separated numbers: {raw}"),
                )),
            },
            OptionKind::Pattern => match regex::Regex::new(raw) {
                Ok(_) => Ok(OptionValue::Str(raw.to_string())),
                Err(e) => Err(OptionError::invalid(name, format!("Invalid regexp: {e}"))),
            },
            OptionKind::Fixed => Err(OptionError::ReadOnly {
                name: name.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModuleOption {
    pub name: &'static str,
    pub kind: OptionKind,
    pub value: OptionValue,
    pub required: bool,
    pub description: &'static str,
}

impl ModuleOption {
    /// Whether the option carries a usable value for a required check.
    pub fn is_set(&self) -> bool {
        match &self.value {
            OptionValue::Str(s) => !s.is_empty(),
            OptionValue::List(items) => !items.is_empty(),
            OptionValue::Int(_) | OptionValue::Bool(_) => true,
        }
    }
}

/// Snapshot of one option as shown by `options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionRecord {
    pub name: String,
    pub value: String,
    pub required: bool,
    pub description: String,
}

/// A module's options in registration order.
#[derive(Debug, Clone, Default)]
pub struct OptionSet {
    options: Vec<ModuleOption>,
}

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(
        mut self,
        name: &'static str,
        kind: OptionKind,
        value: OptionValue,
        required: bool,
        description: &'static str,
    ) -> Self {
        debug_assert!(self.position(name).is_none(), "duplicate option {name}");
        self.options.push(ModuleOption {
            name,
            kind,
            value,
            required,
            description,
        });
        self
    }

    pub fn add_text(self, name: &'static str, default: &str, required: bool, description: &'static str) -> Self {
        self.add(name, OptionKind::Text, OptionValue::Str(default.to_string()), required, description)
    }

    pub fn add_int(self, name: &'static str, default: i64, required: bool, description: &'static str) -> Self {
        self.add(name, OptionKind::Integer, OptionValue::Int(default), required, description)
    }

    pub fn add_flag(self, name: &'static str, default: bool, description: &'static str) -> Self {
        self.add(name, OptionKind::Flag, OptionValue::Bool(default), false, description)
    }

    pub fn add_list(
        self,
        name: &'static str,
        check: ListCheck,
        required: bool,
        description: &'static str,
    ) -> Self {
        self.add(name, OptionKind::List(check), OptionValue::List(Vec::new()), required, description)
    }

    pub fn add_ports(self, name: &'static str, required: bool, description: &'static str) -> Self {
        self.add(name, OptionKind::Ports, OptionValue::Str(String::new()), required, description)
    }

    pub fn add_numbers(self, name: &'static str, default: &str, description: &'static str) -> Self {
        self.add(name, OptionKind::Numbers, OptionValue::Str(default.to_string()), false, description)
    }

    pub fn add_pattern(self, name: &'static str, description: &'static str) -> Self {
        self.add(name, OptionKind::Pattern, OptionValue::Str(String::new()), false, description)
    }

    pub fn add_fixed(self, name: &'static str, value: OptionValue, description: &'static str) -> Self {
        self.add(name, OptionKind::Fixed, value, false, description)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.options
            .iter()
            .position(|o| o.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn get(&self, name: &str) -> Option<&ModuleOption> {
        self.position(name).map(|i| &self.options[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleOption> {
        self.options.iter()
    }

    /// Parse `raw` for option `name` and store it.
    ///
    /// Returns the canonical `(NAME, value)` pair. On error nothing is changed.
    pub fn set(&mut self, name: &str, raw: &str) -> Result<(String, String), OptionError> {
        let upper = name.trim().to_ascii_uppercase();
        let Some(idx) = self.position(&upper) else {
            return Err(OptionError::NotFound { name: upper });
        };
        let option = &mut self.options[idx];
        let value = option.kind.coerce(option.name, raw)?;
        option.value = value;
        Ok((option.name.to_string(), option.value.to_string()))
    }

    pub fn records(&self) -> Vec<OptionRecord> {
        self.options
            .iter()
            .map(|o| OptionRecord {
                name: o.name.to_string(),
                value: o.value.to_string(),
                required: o.required,
                description: o.description.to_string(),
            })
            .collect()
    }

    /// First required option without a value, in registration order.
    pub fn first_missing(&self) -> Option<&'static str> {
        self.options
            .iter()
            .find(|o| o.required && !o.is_set())
            .map(|o| o.name)
    }

    pub fn text(&self, name: &str) -> String {
        self.get(name)
            .and_then(|o| o.value.as_str())
            .map(str::to_string)
            .unwrap_or_default()
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|o| o.value.as_int())
    }

    pub fn flag(&self, name: &str) -> bool {
        self.get(name).and_then(|o| o.value.as_bool()).unwrap_or(false)
    }

    pub fn list(&self, name: &str) -> Vec<String> {
        self.get(name)
            .and_then(|o| o.value.as_list())
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }
}

/// Tabular module output. `header` is empty for plain lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Result items behind the rows; a single item may render as several rows.
    #[serde(skip)]
    pub items: usize,
}

impl ResultTable {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self {
            header: Vec::new(),
            items: rows.len(),
            rows,
        }
    }

    pub fn with_header<S: Into<String>>(header: impl IntoIterator<Item = S>, rows: Vec<Vec<String>>) -> Self {
        Self {
            header: header.into_iter().map(Into::into).collect(),
            items: rows.len(),
            rows,
        }
    }

    /// One single-cell row per item.
    pub fn from_items(items: impl IntoIterator<Item = String>) -> Self {
        Self::new(items.into_iter().map(|i| vec![i]).collect())
    }

    pub fn with_items(mut self, items: usize) -> Self {
        self.items = items;
        self
    }

    pub fn error(err: impl fmt::Display) -> Self {
        Self::new(vec![vec![format!("Error: {err}")]]).with_items(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// What a module run produces: the rendered table plus, for some modules,
/// structured records used by `save`.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub table: ResultTable,
    pub records: Option<serde_json::Value>,
}

impl RunOutput {
    pub fn table(table: ResultTable) -> Self {
        Self {
            table,
            records: None,
        }
    }

    pub fn with_records<T: Serialize + ?Sized>(mut self, records: &T) -> Result<Self, ModuleError> {
        self.records = Some(serde_json::to_value(records)?);
        Ok(self)
    }
}

/// Settings for one console session, resolved from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub data_dir: PathBuf,
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    pub log_level: String,
    pub log_to_file: bool,
    /// Commands to run instead of reading stdin.
    pub script: Vec<String>,
    pub color: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> OptionSet {
        OptionSet::new()
            .add_text("DOMAIN", "", true, "Target domain")
            .add_list("WORDLIST", ListCheck::Any, true, "Words")
            .add_int("THREADS", 20, false, "Workers")
            .add_flag("SUFFIXES", false, "Numeric suffixes")
            .add_ports("PORTS", false, "Ports")
            .add_fixed("SOURCE", OptionValue::Str("builtin".into()), "Fixed")
    }

    #[test]
    fn flag_round_trips_canonical_text() {
        let mut opts = sample();
        assert_eq!(
            opts.set("suffixes", "TRUE").unwrap(),
            ("SUFFIXES".to_string(), "true".to_string())
        );
        let rec = opts.records().into_iter().find(|r| r.name == "SUFFIXES").unwrap();
        assert_eq!(rec.value, "true");

        opts.set("SUFFIXES", "false").unwrap();
        assert!(!opts.flag("SUFFIXES"));
    }

    #[test]
    fn list_from_file_matches_literal_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "www\nmail\n").unwrap();

        let mut a = sample();
        let mut b = sample();
        a.set("WORDLIST", "www,mail").unwrap();
        b.set("WORDLIST", file.path().to_str().unwrap()).unwrap();

        assert_eq!(a.list("WORDLIST"), b.list("WORDLIST"));
        assert_eq!(a.records()[1].value, "www, mail");
    }

    #[test]
    fn invalid_values_leave_state_unchanged() {
        let mut opts = sample();
        let err = opts.set("THREADS", "many").unwrap_err();
        assert_eq!(err.name(), "THREADS");
        assert_eq!(opts.int("THREADS"), Some(20));

        assert!(matches!(opts.set("NOPE", "1"), Err(OptionError::NotFound { .. })));
        let err = opts.set("SOURCE", "x").unwrap_err();
        assert_eq!(err.to_string(), "cannot change this value");
        assert_eq!(opts.text("SOURCE"), "builtin");
    }

    #[test]
    fn ports_are_stored_compressed() {
        let mut opts = sample();
        let (_, shown) = opts.set("PORTS", "443,80,81,82").unwrap();
        assert_eq!(shown, "80-82,443");
    }

    #[test]
    fn first_missing_follows_registration_order() {
        let mut opts = sample();
        assert_eq!(opts.first_missing(), Some("DOMAIN"));
        opts.set("DOMAIN", "example.com").unwrap();
        assert_eq!(opts.first_missing(), Some("WORDLIST"));
        opts.set("WORDLIST", "a").unwrap();
        assert_eq!(opts.first_missing(), None);
    }
}
