//! Third-party tools the editor can hand a project to.
//!
//! Problems launching a tool are returned as a message for the user, not
//! as errors.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::config::AppSettings;
use crate::paths::Platform;

pub const DEFAULT_TOOLBOX_PATH: &str = "C:/SWAT/SWATPlus/SWAT+ Toolbox/SWAT+ Toolbox.exe";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalTool {
    Toolbox,
    Iahris,
}

impl ExternalTool {
    pub fn label(&self) -> &'static str {
        match self {
            ExternalTool::Toolbox => "SWAT+ Toolbox",
            ExternalTool::Iahris => "IAHRIS",
        }
    }
}

pub fn tool_path(tool: ExternalTool, settings: &AppSettings, platform: Platform) -> Option<PathBuf> {
    match tool {
        ExternalTool::Toolbox => settings
            .toolbox_path
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| (platform == Platform::Windows).then(|| PathBuf::from(DEFAULT_TOOLBOX_PATH))),
        ExternalTool::Iahris => settings.iahris_path.as_ref().map(PathBuf::from),
    }
}

/// Starts `tool` with the project database as its only argument.
///
/// Returns `None` once the tool is running, or a message saying why it
/// could not be started. The tool is not tracked and may outlive the shell.
pub fn launch_tool(
    tool: ExternalTool,
    settings: &AppSettings,
    platform: Platform,
    project_db: &str,
) -> Option<String> {
    if platform != Platform::Windows {
        return Some(format!(
            "{} is currently only available on Windows.",
            tool.label()
        ));
    }
    let path = tool_path(tool, settings, platform).unwrap_or_default();
    if path.as_os_str().is_empty() || !path.exists() {
        return Some(format!(
            "Could not find {} at \"{}\"",
            tool.label(),
            path.display()
        ));
    }
    let spawned = Command::new(&path)
        .arg(project_db)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match spawned {
        Ok(child) => {
            tracing::info!(tool = tool.label(), pid = child.id(), "launched external tool");
            None
        }
        Err(err) => Some(format!("Could not start {}: {}", tool.label(), err)),
    }
}
