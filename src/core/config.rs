/// Configuration management for .env files
///
/// Handles reading and writing the panel/node `.env` while keeping the
/// original line order and comments intact.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Raw(String),
    Entry { key: String, raw: String },
}

pub struct EnvFile {
    env_file: PathBuf,
    lines: Vec<Line>,
    values: HashMap<String, String>,
    dirty: HashMap<String, bool>,
}

impl EnvFile {
    /// Load configuration from .env file
    pub fn load<P: AsRef<Path>>(env_file: P) -> Result<Self> {
        let env_file = env_file.as_ref().to_path_buf();

        if !env_file.exists() {
            return Err(anyhow!(".env file not found at {}", env_file.display()));
        }

        let content = fs::read_to_string(&env_file)
            .with_context(|| format!("Failed to read {}", env_file.display()))?;

        let mut env = Self::parse_str(&content);
        env.env_file = env_file;
        Ok(env)
    }

    /// Create an empty file handle that will be written on `save`
    pub fn new_at<P: AsRef<Path>>(env_file: P) -> Self {
        let mut env = Self::parse_str("");
        env.env_file = env_file.as_ref().to_path_buf();
        env
    }

    /// Parse `.env` content. Later duplicates win, like `docker compose` does.
    pub fn parse_str(content: &str) -> Self {
        let mut lines = Vec::new();
        let mut values = HashMap::new();

        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                lines.push(Line::Raw(line.to_string()));
                continue;
            }

            let assignment = trimmed.strip_prefix("export ").unwrap_or(trimmed);
            match assignment.split_once('=') {
                Some((key, value)) => {
                    let key = key.trim().to_string();
                    values.insert(key.clone(), unquote(value.trim()));
                    lines.push(Line::Entry {
                        key,
                        raw: line.to_string(),
                    });
                }
                None => lines.push(Line::Raw(line.to_string())),
            }
        }

        Self {
            env_file: PathBuf::new(),
            lines,
            values,
            dirty: HashMap::new(),
        }
    }

    /// Get a configuration value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    /// Get a non-empty configuration value
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    /// Set a configuration value. Unknown keys are appended on save.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();

        if !self.lines.iter().any(|l| matches!(l, Line::Entry { key: k, .. } if *k == key)) {
            self.lines.push(Line::Entry {
                key: key.clone(),
                raw: String::new(),
            });
        }
        self.values.insert(key.clone(), value);
        self.dirty.insert(key, true);
    }

    /// Remove a key and every line assigning it
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.lines
            .retain(|l| !matches!(l, Line::Entry { key: k, .. } if k == key));
        self.dirty.remove(key);
        self.values.remove(key)
    }

    /// Render the file. Untouched lines are emitted verbatim.
    pub fn render(&self) -> String {
        let mut out = Vec::with_capacity(self.lines.len());
        let mut emitted: HashMap<&str, bool> = HashMap::new();

        for line in &self.lines {
            match line {
                Line::Raw(raw) => out.push(raw.clone()),
                Line::Entry { key, raw } => {
                    if self.dirty.contains_key(key) {
                        // A rewritten key collapses its duplicates to one line
                        if emitted.insert(key.as_str(), true).is_none() {
                            let value = self.values.get(key).map(String::as_str).unwrap_or("");
                            out.push(format!("{}={}", key, quote_if_needed(value)));
                        }
                    } else {
                        out.push(raw.clone());
                    }
                }
            }
        }

        let mut rendered = out.join("\n");
        rendered.push('\n');
        rendered
    }

    /// Save configuration to .env file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.env_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        fs::write(&self.env_file, self.render())
            .with_context(|| format!("Failed to write {}", self.env_file.display()))?;

        Ok(())
    }
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == b'"' && last == b'"' {
            return unescape(&value[1..value.len() - 1]);
        }
        if first == b'\'' && last == b'\'' {
            return value[1..value.len() - 1].to_string();
        }
    }

    // Strip trailing inline comments on unquoted values
    match value.find(" #") {
        Some(idx) => value[..idx].trim_end().to_string(),
        None => value.to_string(),
    }
}

/// Undo the `\"` and `\\` escapes of a double-quoted value; other escapes stay literal
fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next @ ('"' | '\\')) => out.push(next),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn quote_if_needed(value: &str) -> String {
    let needs_quotes = value.contains(char::is_whitespace)
        || value.contains(['#', '"', '\'', '\\']);
    if needs_quotes {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_and_get() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# Database").unwrap();
        writeln!(file, "SQLALCHEMY_DATABASE_URL=\"mysql+asyncmy://panel:pw@127.0.0.1:3306/panel\"").unwrap();
        writeln!(file, "UVICORN_PORT=8000 # web port").unwrap();
        writeln!(file, "export XRAY_JSON='/var/lib/proxy-panel/xray_config.json'").unwrap();

        let env = EnvFile::load(file.path()).unwrap();

        assert_eq!(
            env.get("SQLALCHEMY_DATABASE_URL"),
            Some("mysql+asyncmy://panel:pw@127.0.0.1:3306/panel")
        );
        assert_eq!(env.get("UVICORN_PORT"), Some("8000"));
        assert_eq!(env.get("XRAY_JSON"), Some("/var/lib/proxy-panel/xray_config.json"));
        assert_eq!(env.get("MISSING"), None);
    }

    #[test]
    fn test_render_preserves_untouched_lines() {
        let mut env = EnvFile::parse_str("# header\nA=1\n\n# keep\nB='two words'\nC=3\n");
        env.set("C", "33");
        env.set("NEW_KEY", "new value");

        assert_eq!(
            env.render(),
            "# header\nA=1\n\n# keep\nB='two words'\nC=33\nNEW_KEY=\"new value\"\n"
        );
    }

    #[test]
    fn test_duplicates_collapse_on_set() {
        let mut env = EnvFile::parse_str("A=1\nA=2\n");
        assert_eq!(env.get("A"), Some("2"));

        env.set("A", "3");
        assert_eq!(env.render(), "A=3\n");
    }

    #[test]
    fn test_remove() {
        let mut env = EnvFile::parse_str("A=1\nB=2\n");
        assert_eq!(env.remove("A"), Some("1".to_string()));
        assert_eq!(env.render(), "B=2\n");
        assert_eq!(env.get("A"), None);
    }

    #[test]
    fn test_save_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app").join(".env");

        let mut env = EnvFile::new_at(&path);
        env.set("SERVICE_PORT", "62050");
        env.save().unwrap();

        let reloaded = EnvFile::load(&path).unwrap();
        assert_eq!(reloaded.get("SERVICE_PORT"), Some("62050"));
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(EnvFile::load("/nonexistent/.env").is_err());
    }

    #[test]
    fn test_quoted_values_survive_rewrite() {
        let mut env = EnvFile::parse_str("A=1\n");
        env.set("CAPTION", r#"say "hi" now"#);
        env.set("WIN_PATH", r"C:\data");
        env.set("QUOTED", r#""x""#);

        let rendered = env.render();
        assert!(rendered.contains(r#"CAPTION="say \"hi\" now""#));

        let reparsed = EnvFile::parse_str(&rendered);
        assert_eq!(reparsed.get("CAPTION"), Some(r#"say "hi" now"#));
        assert_eq!(reparsed.get("WIN_PATH"), Some(r"C:\data"));
        assert_eq!(reparsed.get("QUOTED"), Some(r#""x""#));
        assert_eq!(reparsed.get("A"), Some("1"));
    }

    #[test]
    fn test_unknown_escapes_stay_literal() {
        let env = EnvFile::parse_str("A=\"line\\nbreak\"\n");
        assert_eq!(env.get("A"), Some("line\\nbreak"));
    }

}
