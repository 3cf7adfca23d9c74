use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use msdk_remote::config::{DEFAULT_CONTROL_PORT, DEFAULT_QUERY_PORT, DEFAULT_VIDEO_PORT};
use msdk_remote::{ClientConfig, READ_CHUNK_SIZE};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MSDK_CONFIG",
        "MSDK_HOST",
        "MSDK_VIDEO_PORT",
        "MSDK_CONTROL_PORT",
        "MSDK_QUERY_PORT",
        "MSDK_CONNECT_TIMEOUT_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ClientConfig::load().expect("load config");
    assert_eq!(cfg, ClientConfig::default());
    assert_eq!(cfg.host, "127.0.0.1");
    assert_eq!(cfg.video_port, DEFAULT_VIDEO_PORT);
    assert_eq!(cfg.control_port, DEFAULT_CONTROL_PORT);
    assert_eq!(cfg.query_port, DEFAULT_QUERY_PORT);
    assert_eq!(cfg.read_chunk_size, READ_CHUNK_SIZE);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "host": "192.168.1.40",
        "ports": {
            "video": 19999,
            "control": 19998,
            "query": 19997
        },
        "connect_timeout_ms": 1500,
        "read_chunk_size": 65536
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("MSDK_CONFIG", file.path());
    std::env::set_var("MSDK_HOST", "10.0.0.6");
    std::env::set_var("MSDK_QUERY_PORT", "7000");

    let cfg = ClientConfig::load().expect("load config");

    assert_eq!(cfg.host, "10.0.0.6");
    assert_eq!(cfg.video_port, 19999);
    assert_eq!(cfg.control_port, 19998);
    assert_eq!(cfg.query_port, 7000);
    assert_eq!(cfg.connect_timeout, Duration::from_millis(1500));
    assert_eq!(cfg.read_chunk_size, 65536);

    clear_env();
}

#[test]
fn rejects_bad_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MSDK_VIDEO_PORT", "not-a-port");
    let err = ClientConfig::load().unwrap_err();
    assert!(err.to_string().contains("MSDK_VIDEO_PORT"));
    clear_env();

    std::env::set_var("MSDK_CONNECT_TIMEOUT_MS", "0");
    let err = ClientConfig::load().unwrap_err();
    assert!(err.to_string().contains("timeout"));
    clear_env();

    std::env::set_var("MSDK_CONTROL_PORT", "9999");
    let err = ClientConfig::load().unwrap_err();
    assert!(err.to_string().contains("must differ"));

    clear_env();
}

#[test]
fn rejects_missing_or_malformed_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MSDK_CONFIG", "/nonexistent/msdk.json");
    let err = ClientConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"host": "10.0.0.6", "port": 1}"#)
        .expect("write config");
    std::env::set_var("MSDK_CONFIG", file.path());
    let err = ClientConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
