//! Configuration loading tests
//!
//! Environment variables are process-global, so every test that touches
//! `CRS_*` runs under `#[serial]`.

use crs_devices::bits::{BitsBox, BitsMode};
use crs_devices::config::CrsConfig;
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

const SAMPLE: &str = r#"
[application]
log_level = "debug"

[colorcal]
port = "/dev/ttyACM7"
max_attempts = 4
zero_tolerance = 2.5

[optical]
port = "/dev/ttyUSB1"

[bits]
mode = "mono++"
gamma = [1.0, 2.0, 2.1, 2.2]
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn clear_env() {
    for key in ["CRS_COLORCAL__PORT", "CRS_COLORCAL__MAX_ATTEMPTS", "CRS_APPLICATION__LOG_LEVEL"] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_file_overrides_defaults() {
    clear_env();
    let file = write_config(SAMPLE);

    let config = CrsConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.colorcal.port, "/dev/ttyACM7");
    assert_eq!(config.colorcal.max_attempts, 4);
    assert_eq!(config.colorcal.zero_tolerance, 2.5);
    // Untouched keys keep their defaults.
    assert_eq!(config.colorcal.baud_rate, 115_200);
    assert_eq!(config.colorcal.zero_calibration_build, 877);
    assert_eq!(config.optical.port, "/dev/ttyUSB1");
    assert_eq!(config.optical.timeout_ms, 10_000);

    let bits = BitsBox::from_config(&config.bits).unwrap();
    assert_eq!(bits.mode(), BitsMode::MonoPlusPlus);
    assert_eq!(bits.gamma(), [2.0, 2.1, 2.2]);
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();

    let config = CrsConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, CrsConfig::default());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    let file = write_config(SAMPLE);
    std::env::set_var("CRS_COLORCAL__PORT", "/dev/ttyACM9");
    std::env::set_var("CRS_COLORCAL__MAX_ATTEMPTS", "6");

    let config = CrsConfig::load_from(file.path());
    clear_env();
    let config = config.unwrap();

    assert_eq!(config.colorcal.port, "/dev/ttyACM9");
    assert_eq!(config.colorcal.max_attempts, 6);
    assert_eq!(config.colorcal.zero_tolerance, 2.5);
}

#[test]
#[serial]
fn test_invalid_value_is_reported() {
    clear_env();
    let file = write_config("[colorcal]\nmax_attempts = \"many\"\n");
    assert!(CrsConfig::load_from(file.path()).is_err());

    let file = write_config("[application]\nlog_level = \"chatty\"\n");
    let config = CrsConfig::load_from(file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_toml_template_round_trip() {
    let config = CrsConfig::default();
    let text = config.to_toml().unwrap();
    assert!(text.contains("[colorcal]"));

    let parsed: CrsConfig = toml::from_str(&text).unwrap();
    assert_eq!(parsed, config);
}
