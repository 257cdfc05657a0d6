//! Reading raw rows from a file or stdin.
//!
//! Rows arrive already decoded as JSON, either as one array or as one object
//! per line.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use logscope::RawRow;
use tracing::debug;

/// Reads all rows from `path`, or from stdin when `path` is `-`.
pub fn read_rows(path: &Path) -> Result<Vec<RawRow>> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read rows from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    let rows = parse_rows(&text)?;
    debug!(rows = rows.len(), source = %path.display(), "read input rows");
    Ok(rows)
}

/// Parses a JSON array of rows or JSON lines.
pub fn parse_rows(text: &str) -> Result<Vec<RawRow>> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("input is not a JSON array of rows");
    }

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("line {} is not a JSON row", i + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_array() {
        let rows = parse_rows(r#"[{"timestamp": "2024-03-01T14:00:00Z", "message": "a"}, {"message": "b"}]"#)
            .expect("parse");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].message.as_deref(), Some("b"));
    }

    #[test]
    fn test_parses_json_lines_skipping_blanks() {
        let text = "{\"message\": \"a\"}\n\n{\"msg\": \"b\", \"level\": \"ERROR\"}\n";
        let rows = parse_rows(text).expect("parse");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].message.as_deref(), Some("b"));
        assert_eq!(rows[1].log_level.as_deref(), Some("ERROR"));
    }

    #[test]
    fn test_empty_input_has_no_rows() {
        assert!(parse_rows("  \n").expect("parse").is_empty());
    }

    #[test]
    fn test_bad_line_names_line_number() {
        let err = parse_rows("{\"message\": \"a\"}\nnot json\n").expect_err("should fail");
        assert!(err.to_string().contains("line 2"));
    }
}
