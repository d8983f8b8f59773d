#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;

use sensorwatch_config::{Config, ConfigError, Feed, load_config_from, save_config};

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut cfg = Config::default();
    cfg.server.url = Some("http://192.168.1.20:8000".into());
    cfg.monitor.max_reconnect_attempts = 3;
    cfg.feeds.push(Feed {
        device: "tablet".into(),
        sensors: vec!["gyroscope".into()],
    });

    save_config(&cfg, &path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("[[feeds]]"), "{text}");
    assert!(text.contains("max_reconnect_attempts = 3"), "{text}");

    let loaded = load_config_from(&path).unwrap();
    assert_eq!(loaded, cfg);
}

#[test]
fn malformed_file_is_a_figment_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[monitor]\npoll_interval_ms = \"soon\"\n").unwrap();

    let err = load_config_from(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Figment(_)), "{err}");
}

#[test]
fn feed_without_sensors_learns_them() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[server]\nurl = \"http://127.0.0.1:8000\"\n\n[[feeds]]\ndevice = \"phone\"\n",
    )
    .unwrap();

    let monitor = load_config_from(&path).unwrap().to_monitor_config().unwrap();
    assert_eq!(monitor.feeds.len(), 1);
    assert!(monitor.feeds[0].sensors.is_empty());
}
