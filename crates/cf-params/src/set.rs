//! The ordered parameter list and its typed readers.

use serde::Serialize;

use crate::validate::{ParamLimits, validate_entry};
use crate::{ParamError, ParamResult};

/// One `(name, raw value)` entry plus whether any stage has read it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
    pub consumed: bool,
}

/// Ordered parameter list with a source tag for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterSet {
    source_tag: String,
    entries: Vec<Parameter>,
    #[serde(skip)]
    limits: ParamLimits,
}

impl ParameterSet {
    pub fn new(source_tag: impl Into<String>) -> Self {
        Self::with_limits(source_tag, ParamLimits::default())
    }

    pub fn with_limits(source_tag: impl Into<String>, limits: ParamLimits) -> Self {
        Self {
            source_tag: source_tag.into(),
            entries: Vec::new(),
            limits,
        }
    }

    /// Build from in-memory pairs, e.g. in tests or from a caller that
    /// already parsed its own input format.
    pub fn from_pairs<I, K, V>(source_tag: &str, pairs: I) -> ParamResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut set = Self::new(source_tag);
        for (k, v) in pairs {
            set.insert(k.as_ref(), v.as_ref())?;
        }
        Ok(set)
    }

    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.entries.iter()
    }

    /// Append a new entry. Names must be unique.
    pub fn insert(&mut self, name: &str, value: &str) -> ParamResult<()> {
        validate_entry(name, value, &self.limits)?;
        if self.position(name).is_some() {
            return Err(ParamError::Duplicate {
                name: name.to_string(),
                source_tag: self.source_tag.clone(),
            });
        }
        self.entries.push(Parameter {
            name: name.to_string(),
            value: value.to_string(),
            consumed: false,
        });
        Ok(())
    }

    /// Insert or overwrite an entry, resetting its consumed flag.
    pub fn set(&mut self, name: &str, value: &str) -> ParamResult<()> {
        validate_entry(name, value, &self.limits)?;
        match self.position(name) {
            Some(i) => {
                self.entries[i].value = value.to_string();
                self.entries[i].consumed = false;
            }
            None => self.entries.push(Parameter {
                name: name.to_string(),
                value: value.to_string(),
                consumed: false,
            }),
        }
        Ok(())
    }

    /// Raw value lookup that does not mark the entry as read.
    pub fn peek(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Raw value lookup that marks the entry as read.
    pub fn take(&mut self, name: &str) -> Option<&str> {
        let i = self.position(name)?;
        self.entries[i].consumed = true;
        Some(self.entries[i].value.as_str())
    }

    pub fn read_f64(&mut self, name: &str) -> ParamResult<Option<f64>> {
        match self.take(name) {
            None => Ok(None),
            Some(raw) => parse_f64(name, raw).map(Some),
        }
    }

    pub fn f64_or(&mut self, name: &str, default: f64) -> ParamResult<f64> {
        Ok(self.read_f64(name)?.unwrap_or(default))
    }

    pub fn require_f64(&mut self, name: &str) -> ParamResult<f64> {
        let source_tag = self.source_tag.clone();
        self.read_f64(name)?.ok_or_else(|| ParamError::Missing {
            name: name.to_string(),
            source_tag,
        })
    }

    pub fn usize_or(&mut self, name: &str, default: usize) -> ParamResult<usize> {
        match self.take(name) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| ParamError::Malformed {
                name: name.to_string(),
                value: raw.to_string(),
                expected: "a non-negative integer",
            }),
        }
    }

    /// Boolean flag: accepts yes/no, y/n, true/false, 1/0 (case-insensitive).
    pub fn flag_or(&mut self, name: &str, default: bool) -> ParamResult<bool> {
        match self.take(name) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "yes" | "y" | "true" | "1" => Ok(true),
                "no" | "n" | "false" | "0" => Ok(false),
                _ => Err(ParamError::Malformed {
                    name: name.to_string(),
                    value: raw.to_string(),
                    expected: "yes or no",
                }),
            },
        }
    }

    pub fn string_or(&mut self, name: &str, default: &str) -> String {
        self.take(name)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| default.to_string())
    }

    /// One of a fixed set of words.
    pub fn choice_or(
        &mut self,
        name: &str,
        choices: &[&'static str],
        default: &'static str,
    ) -> ParamResult<&'static str> {
        match self.take(name) {
            None => Ok(default),
            Some(raw) => {
                let raw = raw.trim();
                choices
                    .iter()
                    .copied()
                    .find(|c| c.eq_ignore_ascii_case(raw))
                    .ok_or_else(|| ParamError::Malformed {
                        name: name.to_string(),
                        value: raw.to_string(),
                        expected: "one of the documented choices",
                    })
            }
        }
    }

    /// Comma- or whitespace-separated words; empty when absent.
    pub fn words(&mut self, name: &str) -> Vec<String> {
        self.take(name)
            .map(|raw| {
                raw.split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|w| !w.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn f64_list(&mut self, name: &str) -> ParamResult<Vec<f64>> {
        let words = self.words(name);
        words.iter().map(|w| parse_f64(name, w)).collect()
    }

    /// Entries no stage has read.
    pub fn unused(&self) -> Vec<&Parameter> {
        self.entries.iter().filter(|p| !p.consumed).collect()
    }

    pub fn reset_consumed(&mut self) {
        for p in &mut self.entries {
            p.consumed = false;
        }
    }

    /// Render back to `name = value` lines.
    pub fn to_ini(&self) -> String {
        let mut out = String::new();
        for p in &self.entries {
            out.push_str(&p.name);
            out.push_str(" = ");
            out.push_str(&p.value);
            out.push('\n');
        }
        out
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|p| p.name == name)
    }
}

fn parse_f64(name: &str, raw: &str) -> ParamResult<f64> {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParamError::Malformed {
            name: name.to_string(),
            value: raw.to_string(),
            expected: "a finite number",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParameterSet {
        ParameterSet::from_pairs(
            "test",
            [
                ("h", "0.7"),
                ("output", "tCl, pCl,mPk"),
                ("lensing", "yes"),
                ("typo_param", "1"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn reading_marks_consumed() {
        let mut p = sample();
        assert_eq!(p.f64_or("h", 0.5).unwrap(), 0.7);
        assert_eq!(p.words("output"), vec!["tCl", "pCl", "mPk"]);
        assert!(p.flag_or("lensing", false).unwrap());
        let unused: Vec<&str> = p.unused().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(unused, vec!["typo_param"]);
    }

    #[test]
    fn peek_does_not_consume() {
        let p = sample();
        assert_eq!(p.peek("h"), Some("0.7"));
        assert_eq!(p.unused().len(), 4);
    }

    #[test]
    fn defaults_apply_when_absent() {
        let mut p = sample();
        assert_eq!(p.f64_or("omega_b", 0.022).unwrap(), 0.022);
        assert_eq!(p.usize_or("k_per_decade", 20).unwrap(), 20);
        assert!(p.require_f64("A_s").is_err());
    }

    #[test]
    fn malformed_number_is_reported_with_name() {
        let mut p = ParameterSet::from_pairs("test", [("h", "fast")]).unwrap();
        let err = p.f64_or("h", 0.7).unwrap_err();
        assert!(err.to_string().contains("'h'"));
    }

    #[test]
    fn duplicates_rejected_but_set_overwrites() {
        let mut p = sample();
        assert!(matches!(
            p.insert("h", "0.6"),
            Err(ParamError::Duplicate { .. })
        ));
        p.set("h", "0.6").unwrap();
        assert_eq!(p.f64_or("h", 0.0).unwrap(), 0.6);
    }

    #[test]
    fn choice_is_case_insensitive() {
        let mut p = ParameterSet::from_pairs("test", [("non_linear", "HaloFit")]).unwrap();
        let c = p
            .choice_or("non_linear", &["none", "halofit", "hmcode"], "none")
            .unwrap();
        assert_eq!(c, "halofit");
    }
}
