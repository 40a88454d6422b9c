//! `KEY=VALUE` backing store for bootstrap secrets. Reads go through
//! `dotenvy`'s parser; writes replace or append a single line and leave the
//! rest of the file untouched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvFileError {
    #[error("env file {path} unreadable: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("env file {path} unparsable: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("env file {path} unwritable: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Bulk read and single-key write, the only two operations the secret
/// registry needs from its backing store.
pub trait EnvStore: Send + Sync {
    fn load(&self) -> Result<Vec<(String, String)>, EnvFileError>;
    fn set_key(&self, key: &str, value: &str) -> Result<(), EnvFileError>;
    fn describe(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct DotenvFile {
    path: PathBuf,
}

impl DotenvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EnvStore for DotenvFile {
    /// A missing file reads as empty.
    fn load(&self) -> Result<Vec<(String, String)>, EnvFileError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let parse_error = |e: dotenvy::Error| EnvFileError::Parse {
            path: self.path.clone(),
            message: format!("{e}"),
        };
        dotenvy::from_path_iter(&self.path)
            .map_err(parse_error)?
            .map(|item| item.map_err(parse_error))
            .collect()
    }

    fn set_key(&self, key: &str, value: &str) -> Result<(), EnvFileError> {
        let existing = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(EnvFileError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let entry = format!("{key}={}", quote(value));
        let mut replaced = false;
        let mut lines: Vec<String> = existing
            .lines()
            .map(|line| {
                if line_key(line) == Some(key) {
                    replaced = true;
                    entry.clone()
                } else {
                    line.to_owned()
                }
            })
            .collect();
        if !replaced {
            lines.push(entry);
        }

        let mut content = lines.join("\n");
        content.push('\n');
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| EnvFileError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        fs::write(&self.path, content).map_err(|source| EnvFileError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn line_key(line: &str) -> Option<&str> {
    let line = line.trim_start();
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, _) = line.split_once('=')?;
    Some(key.trim())
}

/// Single quotes keep the value literal. Values that contain one fall back to
/// double quotes with the escapes the parser understands.
fn quote(value: &str) -> String {
    if !value.contains('\'') && !value.contains('\n') {
        return format!("'{value}'");
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '\\' | '"' | '$' => {
                quoted.push('\\');
                quoted.push(ch);
            }
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('"');
    quoted
}
