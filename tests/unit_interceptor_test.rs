use dolt_cluster::core::ClusterError;
use dolt_cluster::core::interceptor::{
    ClientInterceptor, ServerInterceptor, client_demotion, server_demotion,
};
use dolt_cluster::core::role::Role;
use parking_lot::Mutex;
use std::sync::Arc;

type Forced = Arc<Mutex<Vec<(Role, u64)>>>;

fn recording(forced: &Forced) -> Arc<dyn Fn(Role, u64) + Send + Sync> {
    let forced = forced.clone();
    Arc::new(move |role, epoch| forced.lock().push((role, epoch)))
}

#[test]
fn test_client_demotion_dual_primary_same_epoch() {
    let demotion = client_demotion((Role::Primary, 5), (Role::Primary, 5));
    assert_eq!(demotion, Some((Role::DetectedBrokenConfig, 5)));
}

#[test]
fn test_client_demotion_peer_primary_at_higher_epoch() {
    let demotion = client_demotion((Role::Primary, 3), (Role::Primary, 7));
    assert_eq!(demotion, Some((Role::Standby, 7)));
}

#[test]
fn test_client_adopts_higher_epoch_primary_regardless_of_local_role() {
    // Responses race: another peer may already have demoted us by the time
    // this reply lands. A higher-epoch primary still wins.
    let demotion = client_demotion((Role::Standby, 3), (Role::Primary, 7));
    assert_eq!(demotion, Some((Role::Standby, 7)));
    let demotion = client_demotion((Role::DetectedBrokenConfig, 3), (Role::Primary, 7));
    assert_eq!(demotion, Some((Role::Standby, 7)));
    // An equal-epoch primary peer is the normal shape for a standby.
    assert_eq!(client_demotion((Role::Standby, 5), (Role::Primary, 5)), None);
}

#[test]
fn test_client_inherits_detected_broken_config() {
    let demotion = client_demotion((Role::Primary, 5), (Role::DetectedBrokenConfig, 5));
    assert_eq!(demotion, Some((Role::DetectedBrokenConfig, 5)));
    let demotion = client_demotion((Role::Primary, 5), (Role::DetectedBrokenConfig, 9));
    assert_eq!(demotion, Some((Role::DetectedBrokenConfig, 9)));
    // A stale broken peer does not poison us.
    let demotion = client_demotion((Role::Primary, 5), (Role::DetectedBrokenConfig, 4));
    assert_eq!(demotion, None);
}

#[test]
fn test_client_no_demotion_from_a_standby_peer() {
    assert_eq!(client_demotion((Role::Primary, 5), (Role::Standby, 9)), None);
    assert_eq!(client_demotion((Role::Primary, 5), (Role::Standby, 5)), None);
}

#[test]
fn test_server_demotion_dual_primary_same_epoch() {
    let demotion = server_demotion((Role::Primary, 5), (Role::Primary, 5));
    assert_eq!(demotion, Some((Role::DetectedBrokenConfig, 5)));
}

#[test]
fn test_server_demotion_peer_primary_at_higher_epoch() {
    let demotion = server_demotion((Role::Primary, 3), (Role::Primary, 7));
    assert_eq!(demotion, Some((Role::Standby, 7)));
    // Applies from detected_broken_config too: a rightful primary emerged.
    let demotion = server_demotion((Role::DetectedBrokenConfig, 3), (Role::Primary, 7));
    assert_eq!(demotion, Some((Role::Standby, 7)));
}

#[test]
fn test_server_no_demotion_while_standby() {
    assert_eq!(server_demotion((Role::Standby, 3), (Role::Primary, 7)), None);
    assert_eq!(server_demotion((Role::Standby, 5), (Role::Primary, 5)), None);
}

#[test]
fn test_begin_call_requires_primary() {
    let interceptor = ClientInterceptor::new(Role::Standby, 4);
    let err = interceptor.begin_call().unwrap_err();
    assert!(matches!(err, ClusterError::FailedPrecondition(_)));

    interceptor.set_role_and_epoch(Role::Primary, 4);
    assert_eq!(interceptor.begin_call().unwrap(), (Role::Primary, 4));
}

#[test]
fn test_observe_response_forces_demotion_through_callback() {
    let interceptor = ClientInterceptor::new(Role::Primary, 5);
    let forced: Forced = Arc::new(Mutex::new(Vec::new()));
    interceptor.install_force_role(recording(&forced));

    interceptor.observe_response(Some((Role::Primary, 5)), false);
    assert_eq!(forced.lock().as_slice(), &[(Role::DetectedBrokenConfig, 5)]);
}

#[test]
fn test_observe_response_ignores_transport_errors() {
    let interceptor = ClientInterceptor::new(Role::Primary, 5);
    let forced: Forced = Arc::new(Mutex::new(Vec::new()));
    interceptor.install_force_role(recording(&forced));

    interceptor.observe_response(None, true);
    interceptor.observe_response(Some((Role::Primary, 9)), true);
    assert!(forced.lock().is_empty());
}

#[test]
fn test_observe_response_without_headers_changes_nothing() {
    let interceptor = ClientInterceptor::new(Role::Primary, 5);
    let forced: Forced = Arc::new(Mutex::new(Vec::new()));
    interceptor.install_force_role(recording(&forced));

    interceptor.observe_response(None, false);
    assert!(forced.lock().is_empty());
    assert_eq!(interceptor.role_and_epoch(), (Role::Primary, 5));
}

#[test]
fn test_server_interceptor_gates_inbound_by_role() {
    let interceptor = ServerInterceptor::new(Role::Standby, 1);
    assert!(!interceptor.refuses_inbound());

    interceptor.set_role_and_epoch(Role::Primary, 1);
    assert!(interceptor.refuses_inbound());

    interceptor.set_role_and_epoch(Role::DetectedBrokenConfig, 1);
    assert!(interceptor.refuses_inbound());
}

#[test]
fn test_server_observe_request_forces_demotion() {
    let interceptor = ServerInterceptor::new(Role::Primary, 5);
    let forced: Forced = Arc::new(Mutex::new(Vec::new()));
    interceptor.install_force_role(recording(&forced));

    interceptor.observe_request((Role::Primary, 8));
    assert_eq!(forced.lock().as_slice(), &[(Role::Standby, 8)]);
}

#[test]
fn test_server_observe_request_from_standby_peer_is_inert() {
    let interceptor = ServerInterceptor::new(Role::Standby, 5);
    let forced: Forced = Arc::new(Mutex::new(Vec::new()));
    interceptor.install_force_role(recording(&forced));

    interceptor.observe_request((Role::Standby, 9));
    interceptor.observe_request((Role::DetectedBrokenConfig, 9));
    assert!(forced.lock().is_empty());
}
