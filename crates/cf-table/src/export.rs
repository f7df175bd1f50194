//! Title/row export helpers.
//!
//! A stage produces its titles and its data rows separately; the pairing
//! contract is that both come from the same enabled-feature configuration,
//! so `titles.len() == row.len()`.

use std::io::{self, Write};

/// Output convention for exported titles and values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Native layout and units.
    #[default]
    Class,
    /// Compatibility layout for CAMB-style consumers.
    Camb,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "class" => Some(OutputFormat::Class),
            "camb" => Some(OutputFormat::Camb),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Class => "class",
            OutputFormat::Camb => "camb",
        }
    }
}

/// Ordered titles for one export call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleList {
    titles: Vec<String>,
}

impl TitleList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, title: impl Into<String>) -> &mut Self {
        self.titles.push(title.into());
        self
    }

    pub fn push_if(&mut self, enabled: bool, title: impl Into<String>) -> &mut Self {
        if enabled {
            self.titles.push(title.into());
        }
        self
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.titles
    }
}

/// Write a whitespace-separated text table.
///
/// `header` lines are emitted as `# ` comments, then one numbered title line
/// (`1:z  2:proper time [Gyr] ...`), then one line per row.
pub fn write_dat<W, I>(out: &mut W, header: &[String], titles: &[String], rows: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = Vec<f64>>,
{
    for line in header {
        writeln!(out, "# {line}")?;
    }
    write!(out, "#")?;
    for (i, title) in titles.iter().enumerate() {
        write!(out, " {:>24}", format!("{}:{}", i + 1, title))?;
    }
    writeln!(out)?;
    for (r, row) in rows.into_iter().enumerate() {
        if row.len() != titles.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "row {r} has {} values for {} titles",
                    row.len(),
                    titles.len()
                ),
            ));
        }
        write!(out, " ")?;
        for v in row {
            write!(out, " {v:>24.16e}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parse() {
        assert_eq!(OutputFormat::parse("CAMB"), Some(OutputFormat::Camb));
        assert_eq!(OutputFormat::parse("class"), Some(OutputFormat::Class));
        assert_eq!(OutputFormat::parse("cosmomc"), None);
    }

    #[test]
    fn title_list_respects_flags() {
        let mut t = TitleList::new();
        t.push("z").push_if(false, "rho_ncdm").push("H");
        assert_eq!(t.into_vec(), vec!["z".to_string(), "H".to_string()]);
    }

    #[test]
    fn dat_writer_numbers_titles() {
        let mut buf = Vec::new();
        write_dat(
            &mut buf,
            &["background".to_string()],
            &["z".to_string(), "H".to_string()],
            vec![vec![0.0, 1.5], vec![1.0, 2.5]],
        )
        .unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# background");
        assert!(lines[1].contains("1:z") && lines[1].contains("2:H"));
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2].split_whitespace().count(), 2);
    }

    #[test]
    fn dat_writer_rejects_ragged_rows() {
        let mut buf = Vec::new();
        let err = write_dat(&mut buf, &[], &["z".to_string()], vec![vec![1.0, 2.0]]);
        assert!(err.is_err());
    }
}
