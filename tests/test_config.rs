use citadel::config::{ListenerConfig, ListenerSpec};
use citadel::dispatch::DispatchTable;
use std::time::Duration;

#[test]
fn test_spec_from_yaml() {
    let yaml = r#"
name: edge
acceptors: 8
bind_addr: "0.0.0.0:8443"
idle_timeout_ms: 10000
limits:
  max_header_bytes: 8192
"#;
    let spec = ListenerSpec::from_yaml(yaml).unwrap();

    assert_eq!(spec.name, "edge");
    assert_eq!(spec.acceptors, 8);
    assert_eq!(spec.bind_addr, "0.0.0.0:8443");
    assert_eq!(spec.idle_timeout_ms, 10_000);
    assert_eq!(spec.limits.max_header_bytes, 8192);
    // Unspecified limits keep their defaults.
    assert_eq!(spec.limits.max_body_bytes, 1024 * 1024);
}

#[test]
fn test_spec_defaults() {
    let yaml = r#"
name: minimal
bind_addr: "127.0.0.1:0"
"#;
    let spec = ListenerSpec::from_yaml(yaml).unwrap();

    assert_eq!(spec.acceptors, 4);
    assert_eq!(spec.idle_timeout_ms, 30_000);
    assert_eq!(spec.limits.max_frame_bytes, 1024 * 1024);
}

#[test]
fn test_missing_name_is_an_error() {
    assert!(ListenerSpec::from_yaml("bind_addr: \"127.0.0.1:0\"").is_err());
}

#[test]
fn test_config_from_spec() {
    let yaml = r#"
name: web
acceptors: 0
bind_addr: "127.0.0.1:0"
idle_timeout_ms: 5000
"#;
    let spec = ListenerSpec::from_yaml(yaml).unwrap();
    let cfg = ListenerConfig::from_spec(&spec, DispatchTable::default());

    assert_eq!(cfg.name, "web");
    // At least one acceptor always runs.
    assert_eq!(cfg.acceptors, 1);
    assert_eq!(cfg.transport.bind_addr, "127.0.0.1:0");
    assert_eq!(cfg.protocol.idle_timeout, Duration::from_millis(5000));
}
