use super::*;
use crate::error::ErrorCode;
use crate::session::{StopIndex, Window};
use std::time::Duration;

const MINIMAL: &str = r#"
num_processors: 4
num_sessions_at_once: 2
available_memory: 8
cluster_system: None
output_directory: /tmp/qap/out
working_directory: /tmp/qap/work
"#;

#[test]
fn test_minimal_config_gets_defaults() {
    let config = RunConfig::from_yaml_str(MINIMAL).unwrap();
    assert_eq!(config.num_processors, 4);
    assert_eq!(config.num_sessions_at_once, 2);
    assert_eq!(config.cluster_system, ClusterSystem::None);
    assert_eq!(config.run_name, "qap_run");
    assert_eq!(config.default_window, Window::default());
    assert_eq!(config.flags, OutputFlags::default());
    assert_eq!(config.cluster, ClusterPolicy::default());
    assert_eq!(config.memory_ceiling_mb(), 8192);
    assert!(config.unit_timeout.is_none());
}

#[test]
fn test_full_config_is_honoured() {
    let yaml = format!(
        "{}{}",
        MINIMAL.replace("cluster_system: None", "cluster_system: slurm"),
        r#"
template_head_for_anat: /tpl/head.nii.gz
exclude_zeros: true
start_idx: 4
stop_idx: 120
write_report: true
write_graph: true
write_all_outputs: true
run_name: nightly
scorer_command: " qap-score "
unit_timeout: 30m
cluster_retries: 5
cluster_poll_interval: 10s
"#
    );
    let config = RunConfig::from_yaml_str(&yaml).unwrap();
    assert_eq!(config.cluster_system, ClusterSystem::Slurm);
    assert_eq!(config.default_window, Window::new(4, StopIndex::At(120)));
    assert!(config.flags.exclude_zeros);
    assert!(config.flags.write_report && config.flags.write_graph);
    assert!(config.flags.write_all_outputs);
    assert_eq!(config.run_name, "nightly");
    assert_eq!(config.scorer_command.as_deref(), Some("qap-score"));
    assert_eq!(config.unit_timeout, Some(Duration::from_secs(1800)));
    assert_eq!(config.cluster.retries, 5);
    assert_eq!(config.cluster.poll_interval, Duration::from_secs(10));
    assert_eq!(config.cluster.retry_delay, Duration::from_secs(2));
    assert_eq!(
        config.intermediate_root(),
        std::path::PathBuf::from("/tmp/qap/work/nightly")
    );
}

#[test]
fn test_stop_idx_end_keyword() {
    let yaml = format!("{}stop_idx: End\n", MINIMAL);
    let config = RunConfig::from_yaml_str(&yaml).unwrap();
    assert_eq!(config.default_window.stop, StopIndex::End);
}

#[test]
fn test_missing_required_key() {
    let yaml = MINIMAL.replace("num_processors: 4\n", "");
    let err = RunConfig::from_yaml_str(&yaml).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(err.code(), ErrorCode::CONFIG_MISSING_REQUIRED);
    assert!(err.user_message().contains("num_processors"));
}

#[test]
fn test_zero_sessions_rejected() {
    let yaml = MINIMAL.replace("num_sessions_at_once: 2", "num_sessions_at_once: 0");
    let err = RunConfig::from_yaml_str(&yaml).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_VALUE);
}

#[test]
fn test_non_positive_memory_rejected() {
    let yaml = MINIMAL.replace("available_memory: 8", "available_memory: 0");
    assert!(RunConfig::from_yaml_str(&yaml).is_err());
    let yaml = MINIMAL.replace("available_memory: 8", "available_memory: -2.5");
    assert!(RunConfig::from_yaml_str(&yaml).is_err());
}

#[test]
fn test_unknown_cluster_system_rejected() {
    let yaml = MINIMAL.replace("cluster_system: None", "cluster_system: LSF");
    let err = RunConfig::from_yaml_str(&yaml).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_VALUE);
}

#[test]
fn test_inverted_default_window_rejected() {
    let yaml = format!("{}start_idx: 10\nstop_idx: 5\n", MINIMAL);
    assert!(RunConfig::from_yaml_str(&yaml).is_err());
}

#[test]
fn test_unknown_keys_are_ignored() {
    let yaml = format!("{}pipeline_flavour: legacy\n", MINIMAL);
    assert!(RunConfig::from_yaml_str(&yaml).is_ok());
}

#[test]
fn test_invalid_yaml() {
    let err = RunConfig::from_yaml_str("num_processors: [").unwrap_err();
    assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_YAML);
}

#[test]
fn test_cluster_system_parsing_is_case_insensitive() {
    assert_eq!("sge".parse::<ClusterSystem>().unwrap(), ClusterSystem::Sge);
    assert_eq!("Pbs".parse::<ClusterSystem>().unwrap(), ClusterSystem::Pbs);
    assert_eq!("NONE".parse::<ClusterSystem>().unwrap(), ClusterSystem::None);
    assert!(ClusterSystem::None.is_local());
    assert!(!ClusterSystem::Slurm.is_local());
}

#[test]
fn test_config_round_trips_through_json() {
    let config = RunConfig::from_yaml_str(MINIMAL).unwrap();
    let json = serde_json::to_string(&config).unwrap();
    let back: RunConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(config, back);
}

#[tokio::test]
async fn test_load_run_config_missing_file() {
    let err = load_run_config(std::path::Path::new("/nonexistent/qap.yml"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CONFIG_NOT_FOUND);
}

#[tokio::test]
async fn test_load_run_config_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yml");
    std::fs::write(&path, MINIMAL).unwrap();
    let config = load_run_config(&path).await.unwrap();
    assert_eq!(config.num_processors, 4);
}
