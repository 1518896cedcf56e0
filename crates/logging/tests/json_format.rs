// crates/logging/tests/json_format.rs
use logging::{LogFormat, SubscriberConfig, subscriber};
use serde_json::Value;
use std::fs::{self, File};
use tempfile::tempdir;
use tracing::info;

#[test]
fn json_formatting_works() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.json");
    let cfg = SubscriberConfig::builder()
        .format(LogFormat::Json)
        .stderr(false)
        .log_file(Some(File::create(&path).unwrap()))
        .build();
    let subscriber = subscriber(cfg).unwrap();
    tracing::subscriber::with_default(subscriber, || {
        info!(target: "test", conn = 1, "hello");
    });
    let contents = fs::read_to_string(path).unwrap();
    let v: Value = serde_json::from_str(&contents).unwrap();
    assert_eq!(v["fields"]["message"], "hello");
    assert_eq!(v["fields"]["conn"], 1);
    assert_eq!(v["target"], "test");
    assert_eq!(v["pid"], std::process::id());
}
