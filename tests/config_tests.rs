// Config loading and validation tests

use sysoverlay::config::AppConfig;
use sysoverlay::device::DeviceClass;

const VALID_CONFIG: &str = r#"
[device]
class = "tv"

[polling]
interval_ms = 1000
min_interval_ms = 500
max_interval_ms = 10000
adaptive = true
warmup_secs = 30
check_interval_secs = 10
error_backoff_secs = 30

[cpu]
settle_delay_ms = 100
high_load_threshold = 80.0
high_load_cycles = 3

[cache]
static_info_ttl_ms = 30000
gpu_metrics_ttl_ms = 2000
ram_ttl_ms = 500

[processes]
top_n = 5
min_memory_mb = 10

[processes.labels]
"com.android.chrome" = "Chrome"

[reader]
native_fast_path = false
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.device.class, DeviceClass::Tv);
    assert_eq!(config.polling.interval_ms, 1000);
    assert_eq!(config.polling.check_interval().as_secs(), 10);
    assert_eq!(config.cpu.high_load_cycles, 3);
    assert_eq!(config.processes.top_n, 5);
    assert_eq!(
        config.processes.labels.get("com.android.chrome").map(String::as_str),
        Some("Chrome")
    );
    assert!(!config.reader.native_fast_path);
}

#[test]
fn test_config_defaults_when_sections_omitted() {
    let config = AppConfig::load_from_str("").expect("empty config is valid");
    assert_eq!(config.device.class, DeviceClass::Mobile);
    assert_eq!(config.polling.min_interval_ms, 500);
    assert_eq!(config.polling.max_interval_ms, 10_000);
    assert_eq!(config.polling.warmup().as_secs(), 30);
    assert_eq!(config.cache.gpu_availability_ttl_ms, 60_000);
    assert_eq!(config.cache.gpu_power_saving_ttl_ms, 5_000);
    assert_eq!(config.cache.ram_power_saving_ttl_ms, 2_000);
    assert_eq!(config.cache.process_ttl_ms, 1_000);
    assert_eq!(config.processes.max_tracked_baselines, 4096);
    assert!(config.reader.native_fast_path);
}

#[test]
fn test_config_validation_rejects_min_interval_zero() {
    let bad = VALID_CONFIG.replace("min_interval_ms = 500", "min_interval_ms = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("polling.min_interval_ms"));
}

#[test]
fn test_config_validation_rejects_min_above_max() {
    let bad = VALID_CONFIG.replace("max_interval_ms = 10000", "max_interval_ms = 400");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("polling.max_interval_ms"));
}

#[test]
fn test_config_validation_rejects_check_interval_zero() {
    let bad = VALID_CONFIG.replace("check_interval_secs = 10", "check_interval_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("polling.check_interval_secs"));
}

#[test]
fn test_config_validation_rejects_zero_ttl() {
    let bad = VALID_CONFIG.replace("ram_ttl_ms = 500", "ram_ttl_ms = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("cache.ram_ttl_ms"));
}

#[test]
fn test_config_validation_rejects_top_n_zero() {
    let bad = VALID_CONFIG.replace("top_n = 5", "top_n = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("processes.top_n"));
}

#[test]
fn test_config_validation_rejects_threshold_out_of_range() {
    let bad = VALID_CONFIG.replace("high_load_threshold = 80.0", "high_load_threshold = 150.0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("cpu.high_load_threshold"));
}

#[test]
fn test_config_validation_rejects_unknown_device_class() {
    let bad = VALID_CONFIG.replace("class = \"tv\"", "class = \"toaster\"");
    assert!(AppConfig::load_from_str(&bad).is_err());
}

#[test]
fn test_config_validation_rejects_invalid_toml() {
    let err = AppConfig::load_from_str("not valid toml [[[").unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_config_load_from_file_via_env() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();
    unsafe { std::env::set_var("CONFIG_FILE", path.to_str().unwrap()) };
    let result = AppConfig::load();
    unsafe { std::env::remove_var("CONFIG_FILE") };
    let config = result.expect("load from CONFIG_FILE");
    assert_eq!(config.device.class, DeviceClass::Tv);
    assert!(!config.reader.native_fast_path);
}
