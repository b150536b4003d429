use dolt_cluster::core::ClusterError;
use dolt_cluster::core::role::{
    Role, TransitionCheck, check_transition, parse_role_headers,
};
use proptest::prelude::*;

#[test]
fn test_role_parse_and_display_round_trip() {
    for (text, role) in [
        ("primary", Role::Primary),
        ("standby", Role::Standby),
        ("detected_broken_config", Role::DetectedBrokenConfig),
    ] {
        assert_eq!(Role::parse(text).unwrap(), role);
        assert_eq!(role.to_string(), text);
    }
    assert!(Role::parse("leader").is_err());
    assert!(Role::parse("").is_err());
}

#[test]
fn test_epoch_regression_is_refused() {
    let err = check_transition(Role::Primary, 5, Role::Standby, 3, false).unwrap_err();
    assert!(matches!(err, ClusterError::TransitionRefused(_)));
}

#[test]
fn test_same_epoch_same_role_is_a_noop() {
    let check = check_transition(Role::Primary, 5, Role::Primary, 5, false).unwrap();
    assert_eq!(check, TransitionCheck::NoOp);
    let check = check_transition(Role::Standby, 0, Role::Standby, 0, true).unwrap();
    assert_eq!(check, TransitionCheck::NoOp);
}

#[test]
fn test_same_epoch_nongraceful_demotion_is_allowed() {
    let check = check_transition(Role::Primary, 5, Role::Standby, 5, false).unwrap();
    assert_eq!(check, TransitionCheck::Proceed);
    let check =
        check_transition(Role::Primary, 5, Role::DetectedBrokenConfig, 5, false).unwrap();
    assert_eq!(check, TransitionCheck::Proceed);
}

#[test]
fn test_same_epoch_graceful_demotion_is_refused() {
    let err = check_transition(Role::Primary, 5, Role::Standby, 5, true).unwrap_err();
    assert!(matches!(err, ClusterError::TransitionRefused(_)));
}

#[test]
fn test_same_epoch_promotion_is_refused() {
    let err = check_transition(Role::Standby, 5, Role::Primary, 5, false).unwrap_err();
    assert!(matches!(err, ClusterError::TransitionRefused(_)));
}

#[test]
fn test_higher_epoch_proceeds() {
    let check = check_transition(Role::Standby, 5, Role::Primary, 6, false).unwrap();
    assert_eq!(check, TransitionCheck::Proceed);
    let check = check_transition(Role::Primary, 5, Role::Standby, 6, true).unwrap();
    assert_eq!(check, TransitionCheck::Proceed);
}

#[test]
fn test_parse_role_headers_both_absent_is_not_a_peer() {
    assert_eq!(parse_role_headers(None, None).unwrap(), None);
}

#[test]
fn test_parse_role_headers_both_present() {
    let parsed = parse_role_headers(Some("primary"), Some("12")).unwrap();
    assert_eq!(parsed, Some((Role::Primary, 12)));
}

#[test]
fn test_parse_role_headers_rejects_partial_and_malformed() {
    assert!(parse_role_headers(Some("primary"), None).is_err());
    assert!(parse_role_headers(None, Some("3")).is_err());
    assert!(parse_role_headers(Some("chief"), Some("3")).is_err());
    assert!(parse_role_headers(Some("primary"), Some("-1")).is_err());
    assert!(parse_role_headers(Some("primary"), Some("twelve")).is_err());
}

fn any_role() -> impl Strategy<Value = Role> {
    prop_oneof![
        Just(Role::Primary),
        Just(Role::Standby),
        Just(Role::DetectedBrokenConfig),
    ]
}

proptest! {
    /// Every accepted transition moves the epoch monotonically.
    #[test]
    fn prop_accepted_transitions_never_regress_the_epoch(
        current_role in any_role(),
        new_role in any_role(),
        current_epoch in 0u64..1_000,
        new_epoch in 0u64..1_000,
        graceful in any::<bool>(),
    ) {
        if check_transition(current_role, current_epoch, new_role, new_epoch, graceful).is_ok() {
            prop_assert!(new_epoch >= current_epoch);
        }
    }

    /// Repeating a transition of the current state is always a silent no-op.
    #[test]
    fn prop_identity_transition_is_noop(
        role in any_role(),
        epoch in 0u64..1_000,
        graceful in any::<bool>(),
    ) {
        let check = check_transition(role, epoch, role, epoch, graceful).unwrap();
        prop_assert_eq!(check, TransitionCheck::NoOp);
    }
}
