use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use expander::{DataMode, RuntimeValue, TranslateOptions};

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG: &str = "mpl.toml";

/// Contents of `mpl.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Put each command's data right after it instead of in one data section.
    pub inline_data: bool,

    /// Echo evaluated commands as `/*EVALUATED:...*/` comments.
    pub comment_cmds: bool,

    /// Variables visible to the snippets of the document.
    pub bindings: BTreeMap<String, toml::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            inline_data: false,
            comment_cmds: true,
            bindings: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Config, String> {
        toml::from_str(text).map_err(|e| format!("TOML parse error: {}", e))
    }

    /// Load `explicit`, or `mpl.toml` from the working directory if it exists.
    pub fn discover(explicit: Option<&Path>) -> Result<Config, String> {
        let path = match explicit {
            Some(path) => path,
            None if Path::new(DEFAULT_CONFIG).is_file() => Path::new(DEFAULT_CONFIG),
            None => return Ok(Config::default()),
        };
        debug!(path = %path.display(), "loading configuration");
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
        Config::from_toml(&text).map_err(|e| format!("{}: {}", path.display(), e))
    }

    /// Add a `name=value` definition from the command line.
    pub fn define(&mut self, definition: &str) -> Result<(), String> {
        let (name, value) = definition
            .split_once('=')
            .ok_or_else(|| format!("expected name=value, got '{}'", definition))?;
        self.bindings
            .insert(name.trim().to_string(), parse_define_value(value.trim()));
        Ok(())
    }

    pub fn options(&self) -> TranslateOptions {
        TranslateOptions {
            data_mode: if self.inline_data {
                DataMode::Inline
            } else {
                DataMode::Consolidated
            },
            comment_cmds: self.comment_cmds,
        }
    }

    pub fn runtime_bindings(&self) -> impl Iterator<Item = (&str, RuntimeValue)> {
        self.bindings
            .iter()
            .map(|(name, value)| (name.as_str(), toml_to_runtime(value)))
    }
}

/// Values are read as TOML (`3`, `[1, 2]`, `"a"`); anything else is a plain string.
fn parse_define_value(text: &str) -> toml::Value {
    #[derive(Deserialize)]
    struct Wrapper {
        value: toml::Value,
    }
    match toml::from_str::<Wrapper>(&format!("value = {}", text)) {
        Ok(wrapper) => wrapper.value,
        Err(_) => toml::Value::String(text.to_string()),
    }
}

pub fn toml_to_runtime(value: &toml::Value) -> RuntimeValue {
    match value {
        toml::Value::Integer(n) => RuntimeValue::Integer(*n),
        toml::Value::Float(f) => RuntimeValue::Float(*f),
        toml::Value::Boolean(b) => RuntimeValue::Boolean(*b),
        toml::Value::String(s) => RuntimeValue::String(s.clone()),
        toml::Value::Array(items) => RuntimeValue::List(items.iter().map(toml_to_runtime).collect()),
        toml::Value::Table(table) => RuntimeValue::Dict(
            table
                .iter()
                .map(|(k, v)| (RuntimeValue::String(k.clone()), toml_to_runtime(v)))
                .collect(),
        ),
        toml::Value::Datetime(dt) => RuntimeValue::String(dt.to_string()),
    }
}

/// Solved variable values from a TOML table of `name = number` entries.
///
/// A missing or malformed file yields an empty table and a warning.
pub fn load_values(path: &Path) -> BTreeMap<String, f64> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read solution values");
            return BTreeMap::new();
        }
    };
    let table: toml::Table = match toml::from_str(&text) {
        Ok(table) => table,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed solution values");
            return BTreeMap::new();
        }
    };
    let mut values = BTreeMap::new();
    for (name, value) in table {
        match value {
            toml::Value::Integer(n) => {
                values.insert(name, n as f64);
            }
            toml::Value::Float(f) => {
                values.insert(name, f);
            }
            other => warn!(variable = %name, value = %other, "ignoring non-numeric value"),
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_file_parsing() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(
            config.options(),
            TranslateOptions {
                data_mode: DataMode::Consolidated,
                comment_cmds: true,
            }
        );
    }

    #[test]
    fn bindings_table() {
        let config = Config::from_toml("inline_data = true\n[bindings]\nn = 3\nW = [5, 7]\n").unwrap();
        assert!(config.inline_data);
        let bindings: BTreeMap<&str, RuntimeValue> = config.runtime_bindings().collect();
        assert_eq!(bindings["n"], RuntimeValue::Integer(3));
        assert_eq!(bindings["W"], RuntimeValue::List(vec![5i64.into(), 7i64.into()]));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_toml("inline = true").is_err());
    }

    #[test]
    fn command_line_definitions() {
        let mut config = Config::default();
        config.define("n=4").unwrap();
        config.define("name = plain text").unwrap();
        config.define("xs=[1, 2]").unwrap();
        assert!(config.define("novalue").is_err());
        assert_eq!(config.bindings["n"], toml::Value::Integer(4));
        assert_eq!(config.bindings["name"], toml::Value::String("plain text".into()));
        assert!(matches!(config.bindings["xs"], toml::Value::Array(_)));
    }

    #[test]
    fn solution_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.toml");
        std::fs::write(&path, "Z = 2\n\"x[1,2]\" = 0.5\nlabel = \"a\"\n").unwrap();
        let values = load_values(&path);
        assert_eq!(values.len(), 2);
        assert_eq!(values["Z"], 2.0);
        assert_eq!(values["x[1,2]"], 0.5);

        assert!(load_values(&dir.path().join("absent.toml")).is_empty());
    }
}
