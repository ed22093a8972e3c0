//! Desired properties from files and `--set` assignments

use hmckit::Properties;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PropsError {
    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid TOML: {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{} is not valid JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} must contain a table of properties", .path.display())]
    NotATable { path: PathBuf },

    #[error("invalid assignment {0:?}: expected KEY=VALUE")]
    Assignment(String),
}

/// Load desired properties. `.toml` files are read as TOML, anything else
/// as JSON.
pub fn load(path: &Path) -> Result<Properties, PropsError> {
    let content = fs::read_to_string(path).map_err(|source| PropsError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let value: Value = if path.extension().is_some_and(|ext| ext == "toml") {
        let table: toml::Table = toml::from_str(&content).map_err(|source| PropsError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::to_value(table).map_err(|source| PropsError::Json {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        serde_json::from_str(&content).map_err(|source| PropsError::Json {
            path: path.to_path_buf(),
            source,
        })?
    };

    match value {
        Value::Object(props) => Ok(props),
        _ => Err(PropsError::NotATable {
            path: path.to_path_buf(),
        }),
    }
}

/// Apply `KEY=VALUE` assignments on top of `props`.
pub fn apply_assignments(props: &mut Properties, assignments: &[String]) -> Result<(), PropsError> {
    for assignment in assignments {
        let Some((key, raw)) = assignment.split_once('=') else {
            return Err(PropsError::Assignment(assignment.clone()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(PropsError::Assignment(assignment.clone()));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        props.insert(key.to_string(), value);
    }
    Ok(())
}
