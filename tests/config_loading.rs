use std::io::Write;

use anima_core::config::AppConfig;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
node_timeout_secs = 20
max_node_visits = 50

[react]
max_iterations = 6
failure_threshold = 2
completion_marker = "DONE"

[escalation]
timeout_secs = 600
model_role = "oracle"

[desires]
max_retries = 2
db_path = "/tmp/anima-test/desires.db"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.node_timeout_secs, 20);
    assert_eq!(config.engine.max_node_visits, 50);
    assert_eq!(config.react.max_iterations, 6);
    assert_eq!(config.react.failure_threshold, 2);
    assert_eq!(config.react.completion_marker, "DONE");
    assert_eq!(config.escalation.timeout_secs, 600);
    assert_eq!(config.escalation.model_role, "oracle");
    assert_eq!(config.desires.max_retries, 2);
    assert_eq!(config.desires.db_path, "/tmp/anima-test/desires.db");
}

#[test]
fn test_partial_config_fills_defaults() {
    let toml_content = r#"
[react]
max_iterations = 4
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.react.max_iterations, 4);
    // Everything else falls back to defaults.
    assert_eq!(config.react.failure_threshold, 3);
    assert_eq!(config.engine.node_timeout_secs, 30);
    assert_eq!(config.desires.max_retries, 3);
}

#[test]
fn test_invalid_config_is_rejected() {
    let toml_content = r#"
[react]
max_iterations = 0
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    assert!(AppConfig::load(tmp.path()).is_err());
}
