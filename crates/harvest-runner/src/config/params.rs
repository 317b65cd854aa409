use crate::{Error, Result};
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Prefix that routes a placeholder to the process environment.
const ENV_PREFIX: &str = "env.";

/// Runtime parameters passed to a config (`-P key=value`).
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: HashMap<String, String>,
}

impl Params {
    /// Create empty params.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter value.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Get a parameter value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse from CLI args like "key=value".
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut params = Self::new();
        for arg in args {
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                Error::Config(format!("invalid param '{}', expected key=value", arg))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::Config(format!("invalid param '{}', empty key", arg)));
            }
            params.values.insert(key.to_string(), value.to_string());
        }
        Ok(params)
    }
}

/// Parameter declaration in the `params:` block of a config.
#[derive(Debug, Clone, Deserialize)]
pub struct ParamDef {
    /// Whether this parameter must be supplied when it has no default.
    #[serde(default)]
    pub required: bool,

    /// Value used when the parameter is not supplied.
    pub default: Option<String>,

    /// Shown by `--check`.
    pub description: Option<String>,
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.]*)\}").expect("placeholder pattern is valid")
    })
}

/// Look up one placeholder. `Ok(None)` leaves the placeholder untouched.
fn resolve(
    name: &str,
    params: &Params,
    defs: &HashMap<String, ParamDef>,
) -> Result<Option<String>> {
    if let Some(var) = name.strip_prefix(ENV_PREFIX) {
        return std::env::var(var).map(Some).map_err(|_| {
            Error::Config(format!("environment variable {} is not set", var))
        });
    }
    if let Some(v) = params.get(name) {
        return Ok(Some(v.to_string()));
    }
    let Some(def) = defs.get(name) else {
        return Ok(None);
    };
    match (&def.default, def.required) {
        (Some(default), _) => Ok(Some(default.clone())),
        (None, true) => Err(Error::Config(format!(
            "missing required parameter: {}",
            name
        ))),
        (None, false) => Ok(Some(String::new())),
    }
}

/// Substitute `${name}` and `${env.NAME}` placeholders in a string.
///
/// Undeclared, unsupplied names are left as written.
pub fn substitute(
    template: &str,
    params: &Params,
    defs: &HashMap<String, ParamDef>,
) -> Result<String> {
    let mut failure = None;
    let out = placeholder().replace_all(template, |caps: &Captures| {
        match resolve(&caps[1], params, defs) {
            Ok(Some(v)) => v,
            Ok(None) => caps[0].to_string(),
            Err(e) => {
                failure.get_or_insert(e);
                String::new()
            }
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(out.into_owned()),
    }
}

/// Recursively substitute params in a YAML tree.
///
/// A string that is exactly one placeholder is re-read as a YAML scalar after
/// substitution, so `start_page: ${start}` becomes a number.
pub fn substitute_value(
    value: &mut Value,
    params: &Params,
    defs: &HashMap<String, ParamDef>,
) -> Result<()> {
    match value {
        Value::String(s) => {
            let whole = placeholder()
                .find(s)
                .is_some_and(|m| m.start() == 0 && m.end() == s.len());
            let replaced = substitute(s, params, defs)?;
            if whole && replaced != *s {
                *value = retype(replaced);
            } else {
                *s = replaced;
            }
        }
        Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_value(v, params, defs)?;
            }
        }
        Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                substitute_value(v, params, defs)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn retype(scalar: String) -> Value {
    if scalar.is_empty() {
        return Value::Null;
    }
    match serde_yaml::from_str::<Value>(&scalar) {
        Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
        _ => Value::String(scalar),
    }
}
