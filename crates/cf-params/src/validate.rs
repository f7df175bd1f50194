//! Entry-level validation.

use crate::{ParamError, ParamResult};

/// Length bounds for names and raw values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamLimits {
    pub max_name_len: usize,
    pub max_value_len: usize,
}

impl Default for ParamLimits {
    fn default() -> Self {
        Self {
            max_name_len: 40,
            max_value_len: 40,
        }
    }
}

pub fn validate_entry(name: &str, value: &str, limits: &ParamLimits) -> ParamResult<()> {
    let name_len = name.chars().count();
    if name_len > limits.max_name_len {
        return Err(ParamError::TooLong {
            what: "name",
            text: name.to_string(),
            len: name_len,
            max: limits.max_name_len,
        });
    }
    let value_len = value.chars().count();
    if value_len > limits.max_value_len {
        return Err(ParamError::TooLong {
            what: "value",
            text: value.to_string(),
            len: value_len,
            max: limits.max_value_len,
        });
    }
    if name.chars().any(|c| c.is_whitespace() || c == '=') {
        return Err(ParamError::Malformed {
            name: name.to_string(),
            value: value.to_string(),
            expected: "a name without whitespace or '='",
        });
    }
    Ok(())
}
