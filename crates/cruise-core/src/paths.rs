use cruise_types::ProxyError;
use std::fs;
use std::path::PathBuf;

const DATA_DIR: &str = ".cruise";
const USAGE_DB_FILE: &str = "usage.db";

/// Get data directory path.
///
/// Priority:
/// 1. `CRUISE_DATA_DIR` environment variable (for container deployments)
/// 2. `~/.cruise` (default for desktop usage)
pub fn get_data_dir() -> Result<PathBuf, ProxyError> {
    let data_dir = if let Ok(custom_dir) = std::env::var("CRUISE_DATA_DIR") {
        PathBuf::from(custom_dir)
    } else {
        let home = dirs::home_dir().ok_or_else(|| ProxyError::Config {
            message: "Failed to get user home directory".to_string(),
        })?;
        home.join(DATA_DIR)
    };

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir).map_err(|e| ProxyError::Config {
            message: format!("Failed to create data directory: {e}"),
        })?;
    }

    Ok(data_dir)
}

/// Default path of the usage database.
pub fn get_usage_db_path() -> Result<PathBuf, ProxyError> {
    Ok(get_data_dir()?.join(USAGE_DB_FILE))
}
