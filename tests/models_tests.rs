// Model serialization tests (JSON camelCase, null speeds)

mod common;

use common::minimal_sample;
use netmon::models::*;

#[test]
fn test_sample_serialization_camel_case() {
    let mut sample = minimal_sample(1_700_000_000_000);
    sample.download_mbps = Some(94.25);
    sample.upload_mbps = Some(18.5);
    sample.latency_ms = Some(11.0);
    sample.ad_traffic_percent = 20.0;
    sample.per_interface.insert(
        "eth0".into(),
        ClassificationCounters {
            bytes_sent: 10,
            bytes_received: 1000,
            ad_bytes_received: 200,
        },
    );
    let json = serde_json::to_string(&sample).unwrap();
    assert!(json.contains("\"downloadMbps\":94.25"));
    assert!(json.contains("\"adTrafficPercent\":20.0"));
    assert!(json.contains("\"perInterface\""));
    assert!(json.contains("\"adBytesReceived\":200"));
    assert!(!json.contains("measurementError"));
    let back: Sample = serde_json::from_str(&json).unwrap();
    assert_eq!(back, sample);
}

#[test]
fn test_failed_measurement_serializes_null_speeds() {
    let mut sample = minimal_sample(1);
    sample.measurement_error = Some("measurement timed out after 120s".into());
    let value: serde_json::Value = serde_json::to_value(&sample).unwrap();
    assert!(value["downloadMbps"].is_null());
    assert!(value["uploadMbps"].is_null());
    assert!(value["latencyMs"].is_null());
    assert_eq!(
        value["measurementError"].as_str(),
        Some("measurement timed out after 120s")
    );
    assert!(sample.speed().is_none());
}

#[test]
fn test_sample_without_optional_fields_deserializes() {
    let json = r#"{"timestamp":5,"downloadMbps":null,"uploadMbps":null,"latencyMs":null,
        "adTrafficPercent":0.0,"perInterface":{}}"#;
    let sample: Sample = serde_json::from_str(json).unwrap();
    assert!(sample.os_counters.is_empty());
    assert!(sample.measurement_error.is_none());
}

#[test]
fn test_direction_serializes_lowercase() {
    assert_eq!(
        serde_json::to_string(&Direction::Inbound).unwrap(),
        "\"inbound\""
    );
    assert_eq!(
        serde_json::to_string(&Direction::Outbound).unwrap(),
        "\"outbound\""
    );
}

#[test]
fn test_interface_info_serialization() {
    let info = InterfaceInfo {
        name: "eth0".into(),
        mac_address: "00:11:22:33:44:55".into(),
        addrs: vec!["192.168.1.10".parse().unwrap()],
        speed: 1_000_000_000,
        is_up: true,
    };
    let json = serde_json::to_string(&info).unwrap();
    assert!(json.contains("\"macAddress\""));
    assert!(json.contains("\"isUp\":true"));
    assert!(json.contains("\"192.168.1.10\""));
}
