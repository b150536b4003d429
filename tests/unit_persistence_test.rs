use dolt_cluster::core::ClusterError;
use dolt_cluster::core::persistence::{RoleStateFile, resolve_bootstrap};
use dolt_cluster::core::role::Role;

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let file = RoleStateFile::new(dir.path().join("cluster_role.json"));

    file.save(Role::Standby, 12).unwrap();
    assert_eq!(file.load().unwrap(), Some((Role::Standby, 12)));

    // Overwrites are atomic and the last write wins.
    file.save(Role::Primary, 13).unwrap();
    assert_eq!(file.load().unwrap(), Some((Role::Primary, 13)));
}

#[test]
fn test_missing_file_loads_as_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let file = RoleStateFile::new(dir.path().join("cluster_role.json"));
    assert_eq!(file.load().unwrap(), None);
}

#[test]
fn test_corrupt_file_is_a_fatal_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cluster_role.json");
    std::fs::write(&path, "{not json").unwrap();

    let err = RoleStateFile::new(path).load().unwrap_err();
    assert!(matches!(err, ClusterError::Config(_)));
}

#[test]
fn test_unknown_persisted_role_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cluster_role.json");
    std::fs::write(
        &path,
        r#"{"dolt_cluster_role":"coordinator","dolt_cluster_role_epoch":1}"#,
    )
    .unwrap();

    assert!(RoleStateFile::new(path).load().is_err());
}

#[test]
fn test_detected_broken_config_round_trips_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let file = RoleStateFile::new(dir.path().join("cluster_role.json"));
    file.save(Role::DetectedBrokenConfig, 4).unwrap();

    let persisted = file.load().unwrap();
    assert_eq!(persisted, Some((Role::DetectedBrokenConfig, 4)));
    // Loaded broken state is legal at bootstrap.
    let resolved = resolve_bootstrap(persisted, "primary", 0).unwrap();
    assert_eq!(resolved, (Role::DetectedBrokenConfig, 4));
}

#[test]
fn test_bootstrap_prefers_persisted_state() {
    let resolved = resolve_bootstrap(Some((Role::Standby, 9)), "primary", 2).unwrap();
    assert_eq!(resolved, (Role::Standby, 9));
}

#[test]
fn test_bootstrap_falls_back_to_config() {
    let resolved = resolve_bootstrap(None, "standby", 3).unwrap();
    assert_eq!(resolved, (Role::Standby, 3));
    let resolved = resolve_bootstrap(None, "primary", 0).unwrap();
    assert_eq!(resolved, (Role::Primary, 0));
}

#[test]
fn test_bootstrap_refuses_broken_config_from_config() {
    let err = resolve_bootstrap(None, "detected_broken_config", 0).unwrap_err();
    assert!(matches!(err, ClusterError::Config(_)));
    assert!(resolve_bootstrap(None, "chief", 0).is_err());
}
