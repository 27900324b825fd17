//! Data directory resolution.

use directories::ProjectDirs;
use std::path::PathBuf;

use crate::{Cli, ServerError};

pub const SETTINGS_FILE: &str = "settings.json";
pub const TRACE_DB_FILE: &str = "trace.sqlite";

pub fn get_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "Anchorwatch", "anchorwatch")
}

/// `--data-dir` if given, otherwise the platform data directory
pub fn data_dir(args: &Cli) -> Result<PathBuf, ServerError> {
    if let Some(dir) = &args.data_dir {
        return Ok(dir.clone());
    }
    get_project_dirs()
        .map(|dirs| dirs.data_dir().to_owned())
        .ok_or(ServerError::NoDataDir)
}
