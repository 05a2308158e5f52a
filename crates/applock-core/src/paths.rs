use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "dev";
pub const APP_ORG: &str = "applock";
pub const APP_NAME: &str = "applock";

pub const SETTINGS_FILE: &str = "settings.json";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn settings_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join(SETTINGS_FILE))
}

pub fn status_socket_path() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var("APPLOCK_STATUS_SOCKET") {
        return Ok(PathBuf::from(override_path));
    }
    Ok(data_dir()?.join("applock-status.sock"))
}
