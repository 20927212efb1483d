// tests/integration/config_loading.rs

use std::io::Write;

use tempfile::NamedTempFile;
use warden::config::load_and_validate;
use warden::errors::WardenError;
use warden::host::{ConfigResolver, JobResolver};
use warden_test_utils::builders::ConfigFileBuilder;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn loads_a_complete_file() {
    let file = write_config(
        r#"
[service]
installed_version = "1.0.0"

[daemon]
cmd = ["bin/server"]
payload_env = "WARDEN_PAYLOAD"

[update]
download_uri = "file:///srv/app-{version}.pkg"
file_name = "app-{version}.pkg"
title = "app"
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.service.installed_version, "1.0.0");
    assert_eq!(cfg.update_title(), "app");
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_and_validate("/nonexistent/Warden.toml").unwrap_err();
    assert!(matches!(err, WardenError::IoError(_)));
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let file = write_config("[daemon\ncmd = ");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, WardenError::TomlError(_)));
}

#[test]
fn missing_version_placeholder_is_a_config_error() {
    let file = write_config(
        r#"
[daemon]
cmd = ["bin/server"]

[update]
download_uri = "file:///srv/app.pkg"
file_name = "app.pkg"
"#,
    );

    let err = load_and_validate(file.path()).unwrap_err();
    match err {
        WardenError::ConfigError(msg) => assert!(msg.contains("{version}")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn config_resolver_maps_payloads() {
    let cfg = ConfigFileBuilder::new(&["bin/server", "--port", "8080"])
        .payload_env("WARDEN_PAYLOAD")
        .update("file:///srv/app-{version}.pkg", "app-{version}.pkg")
        .build();
    let resolver = ConfigResolver::new(cfg);

    let spec = resolver.resolve_daemon_spec(Some("warden://run?x=1")).unwrap();
    assert_eq!(
        spec.env().get("WARDEN_PAYLOAD").map(String::as_str),
        Some("warden://run?x=1")
    );
    assert_ne!(spec, resolver.resolve_daemon_spec(Some("warden://run?x=2")).unwrap());
    assert_eq!(spec, resolver.resolve_daemon_spec(Some("warden://run?x=1")).unwrap());

    assert_eq!(
        resolver.resolve_version(Some("warden://run?version=2.0")),
        Some("2.0".to_string())
    );
    assert_eq!(resolver.resolve_version(None), None);
    assert_eq!(resolver.update_file_name("2.0").as_deref(), Some("app-2.0.pkg"));
    assert_eq!(
        resolver.update_download_uri("2.0").as_deref(),
        Some("file:///srv/app-2.0.pkg")
    );
}
