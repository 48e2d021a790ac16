// src/infra/paths.rs — On-disk state locations
//
// All paths respect the DEALGENIE_HOME environment variable for isolation.
// When unset, state lives under ~/.dealgenie/.

use std::path::PathBuf;

/// Returns the DEALGENIE_HOME override, if set.
fn dealgenie_home() -> Option<PathBuf> {
    std::env::var_os("DEALGENIE_HOME").map(PathBuf::from)
}

/// State directory: $DEALGENIE_HOME/ or ~/.dealgenie/
pub fn state_dir() -> PathBuf {
    if let Some(home) = dealgenie_home() {
        return home;
    }
    dirs_home().join(".dealgenie")
}

/// Home directory
pub fn dirs_home() -> PathBuf {
    directories::BaseDirs::new()
        .expect("Could not determine home directory")
        .home_dir()
        .to_path_buf()
}

/// Config file path
pub fn config_file() -> PathBuf {
    state_dir().join("config.toml")
}

/// Guest quota record path
pub fn quota_path() -> PathBuf {
    state_dir().join("quota.json")
}
