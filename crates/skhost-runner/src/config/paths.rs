use std::env;
use std::path::PathBuf;

/// Per-user directories for skhost
///
/// On Unix-like systems these follow the XDG base directory layout:
/// - Config: `$XDG_CONFIG_HOME/{name}` (default `~/.config/{name}`)
/// - Data: `$XDG_DATA_HOME/{name}` (default `~/.local/share/{name}`)
///
/// On Windows both live under `%APPDATA%\{name}`.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    name: String,
}

impl ProjectPaths {
    /// Returns `None` when no home directory can be determined
    pub fn new(name: &str) -> Option<Self> {
        home_dir()?;
        Some(Self {
            name: name.to_string(),
        })
    }

    pub fn config_dir(&self) -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            self.appdata_dir()
        }

        #[cfg(not(target_os = "windows"))]
        {
            xdg_dir("XDG_CONFIG_HOME", &[".config"]).join(&self.name)
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            self.appdata_dir()
        }

        #[cfg(not(target_os = "windows"))]
        {
            xdg_dir("XDG_DATA_HOME", &[".local", "share"]).join(&self.name)
        }
    }

    #[cfg(target_os = "windows")]
    fn appdata_dir(&self) -> PathBuf {
        env::var("APPDATA")
            .map(|dir| PathBuf::from(dir).join(&self.name))
            .unwrap_or_else(|_| PathBuf::from(format!(".{}", self.name)))
    }
}

fn home_dir() -> Option<PathBuf> {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .ok()
        .map(PathBuf::from)
}

/// `$var`, else `~/<fallback>`, else `<fallback>` relative to the working directory
#[cfg(not(target_os = "windows"))]
fn xdg_dir(var: &str, fallback: &[&str]) -> PathBuf {
    let relative: PathBuf = fallback.iter().collect();
    env::var(var)
        .ok()
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| home_dir().map(|home| home.join(&relative)))
        .unwrap_or(relative)
}
