//! Locating the `codeml` binary. The first non-blank candidate wins:
//! configuration, `CODEML_BIN`, `bin/` under the base directory, then PATH.

use serde::Serialize;
use std::path::{Path, PathBuf};

pub const CODEML_ENV_VAR: &str = "CODEML_BIN";
pub const CODEML_DEFAULT_BIN: &str = "codeml";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutableSource {
    Configured,
    Environment,
    Bundled,
    PathLookup,
}

impl ExecutableSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Environment => "environment",
            Self::Bundled => "bundled",
            Self::PathLookup => "PATH lookup",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedExecutable {
    pub program: String,
    pub source: ExecutableSource,
}

impl ResolvedExecutable {
    pub fn label(&self) -> String {
        format!("{} ({})", self.program, self.source.as_str())
    }
}

/// `bin/codeml.exe` or `bin/codeml` below `base_dir`, when present.
pub fn bundled_codeml(base_dir: &Path) -> Option<PathBuf> {
    ["codeml.exe", "codeml"]
        .iter()
        .map(|name| base_dir.join("bin").join(name))
        .find(|p| p.is_file())
}

fn trimmed_path(value: &str) -> Option<String> {
    Some(value.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn resolve_from(
    configured: Option<&str>,
    env_value: Option<&str>,
    base_dir: &Path,
) -> ResolvedExecutable {
    let candidates = [
        (configured.and_then(trimmed_path), ExecutableSource::Configured),
        (env_value.and_then(trimmed_path), ExecutableSource::Environment),
        (
            bundled_codeml(base_dir).map(|p| p.display().to_string()),
            ExecutableSource::Bundled,
        ),
    ];
    candidates
        .into_iter()
        .find_map(|(program, source)| program.map(|program| ResolvedExecutable { program, source }))
        .unwrap_or_else(|| ResolvedExecutable {
            program: CODEML_DEFAULT_BIN.to_string(),
            source: ExecutableSource::PathLookup,
        })
}

pub fn resolve_codeml(configured: Option<&str>, base_dir: &Path) -> ResolvedExecutable {
    let env_value = std::env::var(CODEML_ENV_VAR).ok();
    resolve_from(configured, env_value.as_deref(), base_dir)
}
