//! cf-params: parameter set shared by every pipeline stage.
//!
//! A parameter set is an ordered list of `(name, raw value)` pairs plus a
//! consumed flag per entry. Stages read typed values through the accessors on
//! [`ParameterSet`], which marks the entries they touch; whatever is left
//! unread afterwards is reported by [`ParameterSet::unused`].

pub mod set;
pub mod validate;

pub use set::{Parameter, ParameterSet};
pub use validate::{ParamLimits, validate_entry};

pub type ParamResult<T> = Result<T, ParamError>;

#[derive(thiserror::Error, Debug)]
pub enum ParamError {
    #[error("Missing parameter '{name}' in {source_tag}")]
    Missing { name: String, source_tag: String },

    #[error("Malformed parameter '{name}' = '{value}': expected {expected}")]
    Malformed {
        name: String,
        value: String,
        expected: &'static str,
    },

    #[error("Parameter {what} too long: '{text}' has {len} characters (max {max})")]
    TooLong {
        what: &'static str,
        text: String,
        len: usize,
        max: usize,
    },

    #[error("Duplicate parameter '{name}' in {source_tag}")]
    Duplicate { name: String, source_tag: String },

    #[error("Syntax error in {source_tag} line {line}: '{content}'")]
    Syntax {
        source_tag: String,
        line: usize,
        content: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse `name = value` lines. `#` starts a comment; blank lines are skipped.
pub fn parse_ini(source_tag: &str, text: &str) -> ParamResult<ParameterSet> {
    let mut set = ParameterSet::new(source_tag);
    for (i, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once('=') else {
            return Err(ParamError::Syntax {
                source_tag: source_tag.to_string(),
                line: i + 1,
                content: raw.to_string(),
            });
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(ParamError::Syntax {
                source_tag: source_tag.to_string(),
                line: i + 1,
                content: raw.to_string(),
            });
        }
        set.insert(name, value.trim())?;
    }
    Ok(set)
}

pub fn load_ini(path: &std::path::Path) -> ParamResult<ParameterSet> {
    let content = std::fs::read_to_string(path)?;
    parse_ini(&path.display().to_string(), &content)
}

pub fn parse_yaml(source_tag: &str, text: &str) -> ParamResult<ParameterSet> {
    let mapping: serde_yaml::Mapping = serde_yaml::from_str(text)?;
    let mut set = ParameterSet::new(source_tag);
    for (key, value) in mapping {
        let name = yaml_scalar(&key).ok_or_else(|| ParamError::Malformed {
            name: format!("{key:?}"),
            value: String::new(),
            expected: "a scalar key",
        })?;
        let raw = match &value {
            serde_yaml::Value::Sequence(items) => items
                .iter()
                .map(|v| yaml_scalar(v).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(","),
            other => yaml_scalar(other).ok_or_else(|| ParamError::Malformed {
                name: name.clone(),
                value: format!("{other:?}"),
                expected: "a scalar or a list of scalars",
            })?,
        };
        set.insert(&name, &raw)?;
    }
    Ok(set)
}

pub fn load_yaml(path: &std::path::Path) -> ParamResult<ParameterSet> {
    let content = std::fs::read_to_string(path)?;
    parse_yaml(&path.display().to_string(), &content)
}

pub fn parse_json(source_tag: &str, text: &str) -> ParamResult<ParameterSet> {
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
    let mut set = ParameterSet::new(source_tag);
    for (name, value) in map {
        let raw = match &value {
            serde_json::Value::Array(items) => items
                .iter()
                .map(|v| json_scalar(v).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(","),
            other => json_scalar(other).ok_or_else(|| ParamError::Malformed {
                name: name.clone(),
                value: other.to_string(),
                expected: "a scalar or a list of scalars",
            })?,
        };
        set.insert(&name, &raw)?;
    }
    Ok(set)
}

pub fn load_json(path: &std::path::Path) -> ParamResult<ParameterSet> {
    let content = std::fs::read_to_string(path)?;
    parse_json(&path.display().to_string(), &content)
}

/// Pick a loader from the file extension; anything unknown is read as `.ini`.
pub fn load_any(path: &std::path::Path) -> ParamResult<ParameterSet> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => load_yaml(path),
        Some("json") => load_json(path),
        _ => load_ini(path),
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(if *b { "yes" } else { "no" }.to_string()),
        _ => None,
    }
}

fn json_scalar(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(if *b { "yes" } else { "no" }.to_string()),
        _ => None,
    }
}
