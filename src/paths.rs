//! Resolution of executables and resource directories.
//!
//! Where a script lives depends on how the editor was started: from the
//! source tree, from a package carrying an interpreter, or from a package
//! with compiled API binaries.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::config::AppSettings;

/// Long-lived REST API script.
pub const REST_API_SCRIPT: &str = "swatplus_rest_api";
/// One-shot API script used by `--cmd-only`.
pub const RUN_API_SCRIPT: &str = "swatplus_api";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
}

impl Platform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => Platform::Windows,
            "macos" => Platform::MacOs,
            _ => Platform::Linux,
        }
    }

    /// Name reported to the UI, matching the values the frontend expects.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "win32",
            Platform::Linux => "linux",
            Platform::MacOs => "darwin",
        }
    }

    fn exe_suffix(&self) -> &'static str {
        match self {
            Platform::Windows => "",
            Platform::Linux => "_linux",
            Platform::MacOs => "_mac",
        }
    }

    fn lib_dir(&self) -> &'static str {
        match self {
            Platform::Windows => "win",
            Platform::Linux => "linux",
            Platform::MacOs => "mac",
        }
    }
}

/// How API scripts are laid out on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchLayout {
    /// Running from a checkout; scripts are `.py` files under `src/api`.
    Development { source_root: PathBuf },
    /// Packaged with `.py` scripts run through an interpreter.
    EmbeddedInterpreter { app_root: PathBuf },
    /// Packaged with compiled API binaries.
    CompiledBinary { app_root: PathBuf },
}

/// A resolved program and its final argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    layout: LaunchLayout,
    app_root: PathBuf,
    platform: Platform,
    interpreter: Vec<String>,
    swatplus_revision: String,
}

impl PathResolver {
    /// Picks the layout from the dev flag and settings. Compiled binaries
    /// are the default when neither applies.
    ///
    /// `python_override` names the interpreter executable as-is; it is never
    /// split. Extra interpreter flags come in through `python_args`.
    pub fn new(
        dev_mode: bool,
        app_root: PathBuf,
        settings: &AppSettings,
        python_override: Option<&str>,
        python_args: &[String],
        platform: Platform,
    ) -> Result<Self> {
        let layout = if dev_mode {
            LaunchLayout::Development {
                source_root: app_root.clone(),
            }
        } else if settings.python {
            LaunchLayout::EmbeddedInterpreter {
                app_root: app_root.clone(),
            }
        } else {
            LaunchLayout::CompiledBinary {
                app_root: app_root.clone(),
            }
        };
        let python = python_override.unwrap_or(&settings.python_path);
        if python.trim().is_empty() && !matches!(layout, LaunchLayout::CompiledBinary { .. }) {
            return Err(anyhow!("interpreter path is empty"));
        }
        let mut interpreter = vec![python.to_string()];
        interpreter.extend(python_args.iter().cloned());
        Ok(Self {
            layout,
            app_root,
            platform,
            interpreter,
            swatplus_revision: settings.swatplus.clone(),
        })
    }

    pub fn layout(&self) -> &LaunchLayout {
        &self.layout
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn static_dir(&self) -> PathBuf {
        self.app_root.join("static")
    }

    pub fn script_path(&self, script_name: &str) -> PathBuf {
        match &self.layout {
            LaunchLayout::Development { source_root } => source_root
                .join("src")
                .join("api")
                .join(format!("{}.py", script_name)),
            LaunchLayout::EmbeddedInterpreter { app_root } => app_root
                .join("static")
                .join("api")
                .join(format!("{}.py", script_name)),
            LaunchLayout::CompiledBinary { app_root } => {
                let dist = app_root.join("static").join("api_dist");
                if self.platform == Platform::MacOs {
                    dist.join(script_name).join(script_name)
                } else {
                    dist.join(script_name)
                }
            }
        }
    }

    fn needs_interpreter(&self) -> bool {
        !matches!(self.layout, LaunchLayout::CompiledBinary { .. })
    }

    /// Builds the command line for an API script. With an interpreter the
    /// script path is prepended to the arguments before anything is spawned.
    pub fn resolve_script(&self, script_name: &str, args: Vec<String>) -> Launch {
        let script = self.script_path(script_name).display().to_string();
        if !self.needs_interpreter() {
            return Launch {
                program: script,
                args,
            };
        }
        let mut parts = self.interpreter.clone();
        let program = parts.remove(0);
        parts.push(script);
        parts.extend(args);
        Launch {
            program,
            args: parts,
        }
    }

    pub fn swat_exe(&self, debug: bool) -> PathBuf {
        let build = if debug { "debug" } else { "rel" };
        self.static_dir().join("swat_exe").join(format!(
            "rev{}_64{}{}",
            self.swatplus_revision,
            build,
            self.platform.exe_suffix()
        ))
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.static_dir().join("lib").join(self.platform.lib_dir())
    }

    /// Environment the simulation executable needs on this platform.
    pub fn swat_env(&self) -> Vec<(String, String)> {
        if self.platform == Platform::MacOs {
            vec![(
                "DYLD_FALLBACK_LIBRARY_PATH".to_string(),
                self.lib_dir().display().to_string(),
            )]
        } else {
            Vec::new()
        }
    }
}

/// Joins path fragments left to right; empty input yields an empty path.
pub fn join_paths(parts: &[String]) -> PathBuf {
    let mut iter = parts.iter();
    let Some(first) = iter.next() else {
        return PathBuf::new();
    };
    iter.fold(PathBuf::from(first), |acc, part| acc.join(part))
}

pub fn directory_name(path: &str) -> Option<PathBuf> {
    if path.is_empty() {
        return None;
    }
    Some(
        Path::new(path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    )
}

pub fn path_exists(path: &str) -> bool {
    !path.is_empty() && Path::new(path).exists()
}
