//! Current project records and the paths derived from them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const OUTPUT_DB_FILE: &str = "swatplus_output.sqlite";

/// A project as remembered in the recent list and shown in the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    pub project_db: Option<String>,
    pub datasets_db: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub is_lte: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionSupport {
    pub supported: bool,
    pub updatable: bool,
    pub error: String,
}

/// Decides whether a project created with `project_version` can be opened
/// by an editor at `app_version`.
pub fn version_support(app_version: Option<&str>, project_version: &str) -> VersionSupport {
    let mut support = VersionSupport::default();
    let Some(app_version) = app_version else {
        support.error = "Software version is not set.".to_string();
        return support;
    };
    if app_version == project_version {
        support.supported = true;
        return support;
    }

    match (major_version(app_version), major_version(project_version)) {
        (Some(software), Some(project)) if software > project => {
            support.updatable = true;
            support.error = format!(
                "Your project was made using an earlier version of SWAT+ Editor. \
                 Your project is version {} and the editor is version {}.",
                project_version, app_version
            );
        }
        (Some(software), Some(project)) if software < project => {
            support.supported = true;
            support.error = format!(
                "Your project was made using a version of SWAT+ Editor that is greater than the \
                 current version. Your project is version {} and the editor is version {}. \
                 You may encounter errors if the model has changed. Proceed at your own risk.",
                project_version, app_version
            );
        }
        _ => support.supported = true,
    }
    support
}

// "3.0.12" -> 3.0, "10.2" -> 10, "" -> 0
fn major_version(version: &str) -> Option<f64> {
    let prefix: String = version.chars().take(3).collect();
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return Some(0.0);
    }
    prefix.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectPaths {
    pub project_dir: PathBuf,
    pub txtinout: PathBuf,
    pub scenarios: PathBuf,
    pub results: PathBuf,
    pub output_db: PathBuf,
}

/// Paths around a project database. Missing scenario folders fall back to
/// the project directory.
pub fn project_paths(project_db: &Path) -> ProjectPaths {
    let project_dir = project_db
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let scenarios = existing_or(project_dir.join("Scenarios"), &project_dir);
    let txtinout = existing_or(
        project_dir.join("Scenarios").join("Default").join("TxtInOut"),
        &project_dir,
    );
    let results = results_path(&txtinout);
    let output_db = results.join(OUTPUT_DB_FILE);
    ProjectPaths {
        project_dir,
        txtinout,
        scenarios,
        results,
        output_db,
    }
}

/// `<input>/../Results` when it exists, otherwise the input directory.
pub fn results_path(input_dir: &Path) -> PathBuf {
    let candidate = input_dir
        .parent()
        .map(|parent| parent.join("Results"))
        .unwrap_or_else(|| input_dir.join("Results"));
    existing_or(candidate, input_dir)
}

fn existing_or(path: PathBuf, fallback: &Path) -> PathBuf {
    if path.exists() {
        path
    } else {
        fallback.to_path_buf()
    }
}
