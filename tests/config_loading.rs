//! Loading shaping configuration from disk and applying it to a manager.

use std::io::Write;

use router_qos::{
    DropReason, Packet, ProcessResult, ShapingAlgorithm, ShapingConfig, ShapingError,
    TrafficShapingManager,
};
use tempfile::NamedTempFile;

const SAMPLE: &str = r#"
defaults:
  num_classes: 4
  capacity: 2000
  refill_rate: 500
logging:
  level: info
  format: json
interfaces:
  eth0:
    algorithm: hybrid
    options:
      capacity: 3000
      rate: 1500
      weight_1: 2
  eth1:
    algorithm: wfq
    options:
      weight_3: 4
  wan0:
    algorithm: token_bucket
    options:
      capacity: 64000
      burst_size: 1500
    enabled: false
"#;

fn write_temp(content: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_yaml_file() {
    let file = write_temp(SAMPLE, ".yaml");
    let config = ShapingConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.defaults.num_classes, 4);
    assert_eq!(config.defaults.capacity, 2000);
    assert_eq!(config.interfaces.len(), 3);
    assert_eq!(config.interfaces["eth1"].algorithm, ShapingAlgorithm::WeightedFairQueue);
    assert_eq!(config.interfaces["wan0"].options["burst_size"], "1500");
    assert!(!config.interfaces["wan0"].enabled);
}

#[test]
fn test_manager_from_config() {
    let file = write_temp(SAMPLE, ".yaml");
    let config = ShapingConfig::load_from_file(file.path()).unwrap();
    let manager = TrafficShapingManager::from_config(&config).unwrap();

    assert_eq!(manager.interfaces(), vec!["eth0", "eth1", "wan0"]);

    let eth0 = manager.statistics_for("eth0").unwrap();
    assert!(eth0.enabled);
    assert_eq!(eth0.limiter.capacity, 3000);
    assert_eq!(eth0.limiter.refill_rate, 1500);
    assert_eq!(eth0.scheduler.num_classes, 4);
    assert_eq!(eth0.scheduler.class(1).unwrap().weight, 2);

    // wfq leaves the bucket at the configured defaults
    let eth1 = manager.statistics_for("eth1").unwrap();
    assert_eq!(eth1.limiter.capacity, 2000);
    assert_eq!(eth1.limiter.refill_rate, 500);
    assert_eq!(eth1.scheduler.class(3).unwrap().weight, 4);

    let wan0 = manager.statistics_for("wan0").unwrap();
    assert!(!wan0.enabled);
    assert_eq!(wan0.limiter.capacity, 64000);
    assert_eq!(wan0.limiter.burst_size, Some(1500));

    let packet = Packet::new(1, 100);
    assert_eq!(
        manager.process_packet("wan0", packet.clone()),
        ProcessResult::PassedThrough(packet)
    );
    assert_eq!(
        manager.process_packet("eth0", Packet::new(2, 4000)),
        ProcessResult::Dropped(DropReason::RateLimited)
    );
}

#[test]
fn test_invalid_interface_rejects_whole_config() {
    let yaml = r#"
interfaces:
  eth0:
    options:
      capacity: 5000
  eth1:
    options:
      weight_9: 2
"#;
    let file = write_temp(yaml, ".yaml");
    let err = ShapingConfig::load_from_file(file.path()).unwrap_err();
    assert!(err.is_configuration_error());
    assert!(err.to_string().contains("eth1"));

    let config = ShapingConfig::from_yaml_str(yaml).unwrap();
    let manager = TrafficShapingManager::default();
    assert!(manager.apply_config(&config).is_err());
    assert_eq!(manager.interface_count(), 0);
}

#[test]
fn test_unparsable_yaml() {
    let file = write_temp("defaults: [not, a, map", ".yaml");
    assert!(matches!(
        ShapingConfig::load_from_file(file.path()),
        Err(ShapingError::Yaml { .. })
    ));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ShapingConfig::load_from_file(dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, ShapingError::Io { .. }));
    assert!(!err.is_configuration_error());
}

#[test]
fn test_classifier_section_routes_packets() {
    let yaml = r#"
defaults:
  num_classes: 4
interfaces:
  wan0:
    algorithm: wfq
    classifier:
      type: rules
      rules:
        - name: voice
          criteria: { dscp_range: { min: 46, max: 46 } }
          class_id: 3
      fallback: dscp
  eth0:
    algorithm: wfq
"#;
    let file = write_temp(yaml, ".yaml");
    let config = ShapingConfig::load_from_file(file.path()).unwrap();
    let manager = TrafficShapingManager::from_config(&config).unwrap();

    manager.process_packet("wan0", Packet::new(1, 200).with_dscp(46));
    manager.process_packet("wan0", Packet::new(2, 200).with_dscp(16));
    manager.process_packet("eth0", Packet::new(3, 200).with_dscp(46).with_priority(1));

    let wan0 = manager.statistics_for("wan0").unwrap();
    assert_eq!(wan0.scheduler.class(3).unwrap().queue_len, 1);
    assert_eq!(wan0.scheduler.class(2).unwrap().queue_len, 1);

    // no classifier section: priority hint
    let eth0 = manager.statistics_for("eth0").unwrap();
    assert_eq!(eth0.scheduler.class(1).unwrap().queue_len, 1);
}

#[test]
fn test_classifier_rule_outside_class_range_rejected() {
    let yaml = r#"
defaults:
  num_classes: 4
interfaces:
  wan0:
    classifier:
      type: rules
      rules:
        - name: voice
          criteria: { dscp_range: { min: 46, max: 46 } }
          class_id: 7
"#;
    let file = write_temp(yaml, ".yaml");
    let err = ShapingConfig::load_from_file(file.path()).unwrap_err();
    assert!(err.is_configuration_error());
    assert!(err.to_string().contains("wan0"));
}

#[test]
fn test_load_json_file() {
    let json = r#"{
        "defaults": { "max_queue_depth": 16 },
        "interfaces": {
            "eth0": { "algorithm": "token_bucket", "options": { "rate": 9000, "capacity": "12000" } }
        }
    }"#;
    let file = write_temp(json, ".json");
    let config = ShapingConfig::load_from_json(file.path()).unwrap();

    assert_eq!(config.defaults.max_queue_depth, 16);
    assert_eq!(config.interfaces["eth0"].options["rate"], "9000");
    assert_eq!(config.interfaces["eth0"].options["capacity"], "12000");
}

#[test]
fn test_reapplying_config_reconfigures_in_place() {
    let config = ShapingConfig::from_yaml_str(SAMPLE).unwrap();
    let manager = TrafficShapingManager::from_config(&config).unwrap();
    manager.process_packet("eth0", Packet::new(1, 500));

    manager.apply_config(&config).unwrap();

    let global = manager.global_statistics();
    assert_eq!(global.interfaces_added, 3);
    assert_eq!(manager.statistics_for("eth0").unwrap().scheduler.total_queued, 1);
}

// The only test in this binary that touches the process environment; the
// variables it sets are valid, so concurrent loads elsewhere still succeed.
#[test]
fn test_environment_overrides() {
    let file = write_temp(SAMPLE, ".yaml");

    std::env::set_var("ROUTER_QOS_MAX_QUEUE_DEPTH", "64");
    std::env::set_var("ROUTER_QOS_LOG_LEVEL", "warn");
    let config = ShapingConfig::load_from_file(file.path());
    std::env::remove_var("ROUTER_QOS_MAX_QUEUE_DEPTH");
    std::env::remove_var("ROUTER_QOS_LOG_LEVEL");

    let config = config.unwrap();
    assert_eq!(config.defaults.max_queue_depth, 64);
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.defaults.num_classes, 4);
}
