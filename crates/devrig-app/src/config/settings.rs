//! Settings parser for .devrig/config.toml

use super::types::Settings;
use devrig_core::prelude::*;
use std::path::Path;

const CONFIG_FILENAME: &str = "config.toml";
const DEVRIG_DIR: &str = ".devrig";

/// Load settings from `<project>/.devrig/config.toml`, defaulting on any problem
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = project_path.join(DEVRIG_DIR).join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Create `.devrig/config.toml` with commented defaults if it does not exist
pub fn init_config_dir(project_path: &Path) -> Result<()> {
    let devrig_dir = project_path.join(DEVRIG_DIR);

    if !devrig_dir.exists() {
        std::fs::create_dir_all(&devrig_dir)
            .map_err(|e| Error::config(format!("Failed to create .devrig dir: {}", e)))?;
    }

    let config_path = devrig_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        let default_content = r#"# devrig configuration

[session]
heartbeat_interval_ms = 5000
heartbeat_expiry_ms = 21000   # sessions silent for longer are inactive
# registry_dir = "/tmp/devrig-sessions"

[driver]
startup_timeout_ms = 15000    # DEVRIG_DRIVER_STARTUP_TIMEOUT overrides
startup_poll_ms = 100
reinstall_driver = true
driver_artifacts = []         # helper APKs installed on fresh Android sessions
# host_port = 7001
settle_poll_ms = 200

[hub]
# url = "https://hub.example.com/wd/hub"
capabilities_file = ".devrig/hub_capabilities.json"

[selector]
android_version = 30
ios_version = 16
"#;
        std::fs::write(&config_path, default_content)
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Created default config at {:?}", config_path);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_defaults() {
        let temp = tempdir().unwrap();
        let settings = load_settings(temp.path());

        assert_eq!(settings.session.heartbeat_interval_ms, 5000);
        assert_eq!(settings.session.heartbeat_expiry_ms, 21000);
        assert_eq!(settings.driver.startup_timeout_ms, 15000);
        assert!(settings.driver.reinstall_driver);
        assert_eq!(settings.selector.android_version, 30);
        assert_eq!(settings.selector.ios_version, 16);
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let devrig_dir = temp.path().join(".devrig");
        std::fs::create_dir_all(&devrig_dir).unwrap();

        let config = r#"
[session]
heartbeat_expiry_ms = 60000

[driver]
reinstall_driver = false
host_port = 7010
"#;
        std::fs::write(devrig_dir.join("config.toml"), config).unwrap();

        let settings = load_settings(temp.path());

        assert_eq!(settings.session.heartbeat_expiry_ms, 60000);
        assert_eq!(settings.session.heartbeat_interval_ms, 5000);
        assert!(!settings.driver.reinstall_driver);
        assert_eq!(settings.driver.host_port, Some(7010));
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        let devrig_dir = temp.path().join(".devrig");
        std::fs::create_dir_all(&devrig_dir).unwrap();
        std::fs::write(devrig_dir.join("config.toml"), "[session\nbroken").unwrap();

        let settings = load_settings(temp.path());
        assert_eq!(settings.session.heartbeat_interval_ms, 5000);
    }

    #[test]
    fn test_init_config_dir_writes_loadable_defaults() {
        let temp = tempdir().unwrap();
        init_config_dir(temp.path()).unwrap();

        let path = temp.path().join(".devrig").join("config.toml");
        assert!(path.exists());

        let settings = load_settings(temp.path());
        assert_eq!(settings.selector.android_version, 30);
        assert!(settings.driver.driver_artifacts.is_empty());
    }

    #[test]
    fn test_init_config_dir_keeps_existing_file() {
        let temp = tempdir().unwrap();
        let devrig_dir = temp.path().join(".devrig");
        std::fs::create_dir_all(&devrig_dir).unwrap();
        std::fs::write(devrig_dir.join("config.toml"), "[selector]\nios_version = 17\n").unwrap();

        init_config_dir(temp.path()).unwrap();

        assert_eq!(load_settings(temp.path()).selector.ios_version, 17);
    }

    #[test]
    #[serial]
    fn test_startup_timeout_env_override() {
        std::env::set_var(devrig_driver::adapter::ENV_STARTUP_TIMEOUT, "3000");
        let options = Settings::default().driver.to_options();
        std::env::remove_var(devrig_driver::adapter::ENV_STARTUP_TIMEOUT);

        assert_eq!(options.startup_timeout, Duration::from_millis(3000));
    }
}
