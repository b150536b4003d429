use dolt_cluster::config::{ClusterConfig, RemoteConfig};
use std::io::Write;
use std::time::Duration;

fn remote(name: &str, url: &str) -> RemoteConfig {
    RemoteConfig {
        name: name.to_string(),
        url: url.to_string(),
    }
}

#[test]
fn test_defaults_are_valid() {
    let config = ClusterConfig::default();
    config.validate().unwrap();
    assert_eq!(config.bootstrap_role, "primary");
    assert_eq!(config.bootstrap_epoch, 0);
    assert_eq!(config.rpc_timeout, Duration::from_secs(15));
    assert_eq!(config.graceful_transition_timeout, Duration::from_secs(10));
}

#[test]
fn test_loads_from_a_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cluster.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(
        file,
        r#"
bootstrap_role = "standby"
bootstrap_epoch = 3
listen_addr = "127.0.0.1:50052"
rpc_timeout = "15s"
graceful_transition_timeout = "8s"

[[standby_remotes]]
name = "peer1"
url = "https://peer1.example.com:50051"
"#
    )
    .unwrap();

    let config = ClusterConfig::from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(config.bootstrap_role, "standby");
    assert_eq!(config.bootstrap_epoch, 3);
    assert_eq!(config.listen_addr, "127.0.0.1:50052");
    assert_eq!(config.graceful_transition_timeout, Duration::from_secs(8));
    assert_eq!(config.standby_remotes.len(), 1);
    assert_eq!(config.standby_remotes[0].name, "peer1");
}

#[test]
fn test_broken_config_bootstrap_role_is_rejected() {
    let config = ClusterConfig {
        bootstrap_role: "detected_broken_config".to_string(),
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_unknown_bootstrap_role_is_rejected() {
    let config = ClusterConfig {
        bootstrap_role: "leader".to_string(),
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_remote_urls_must_have_a_host() {
    let config = ClusterConfig {
        standby_remotes: vec![remote("b", "not a url")],
        ..Default::default()
    };
    assert!(config.validate().is_err());

    let config = ClusterConfig {
        standby_remotes: vec![remote("b", "https://standby:50051")],
        ..Default::default()
    };
    config.validate().unwrap();
}

#[test]
fn test_remote_names_must_be_unique_and_nonempty() {
    let config = ClusterConfig {
        standby_remotes: vec![
            remote("b", "https://b1.example.com"),
            remote("b", "https://b2.example.com"),
        ],
        ..Default::default()
    };
    assert!(config.validate().is_err());

    let config = ClusterConfig {
        standby_remotes: vec![remote("", "https://b1.example.com")],
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_listen_addr_is_rejected() {
    let config = ClusterConfig {
        listen_addr: "not-an-addr".to_string(),
        ..Default::default()
    };
    assert!(config.validate().is_err());
}
