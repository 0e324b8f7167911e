//! Preference engine tests.
//!
//! Scenarios drive the engine through its public surface and use
//! `advance_clock` plus `drain` for deterministic timer behavior.

mod common;

use common::{ip, mac, test_engine};
use vrouterd::core::time::Tick;
use vrouterd::preference::value::{
    InterfaceId, MacAddress, PathId, PeerId, PreferenceValue, RouteKey, VrfId, HIGH, LOW,
};

const VRF: VrfId = VrfId(1);
const INTF: InterfaceId = InterfaceId(1);

// ============================================================================
// Promotion and confirmation
// ============================================================================

#[tokio::test]
async fn fresh_path_starts_low_waiting() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let path = engine.install_local_path(route, INTF, mac("00:00:00:01:01:01"), false, 0, None);

    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.sequence, 0);
    assert_eq!(value.preference, LOW);
    assert!(value.wait_for_traffic);
    engine.shutdown().await;
}

#[tokio::test]
async fn traffic_promotes_matching_path() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let m = mac("00:00:00:01:01:01");
    let path = engine.install_local_path(route, INTF, m, false, 0, None);

    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.drain().await;

    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.sequence, 1);
    assert_eq!(value.preference, HIGH);
    assert!(!value.wait_for_traffic);

    // Repeated confirmation is idempotent.
    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.drain().await;
    assert_eq!(engine.path_preference(&path).unwrap().sequence, 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn traffic_with_wrong_mac_is_ignored() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let path =
        engine.install_local_path(route, INTF, mac("00:00:00:01:01:01"), false, 0, None);

    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, mac("00:00:00:ff:ff:ff"));
    engine.drain().await;

    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.preference, LOW);
    assert!(value.wait_for_traffic);
    engine.shutdown().await;
}

#[tokio::test]
async fn traffic_for_unknown_route_is_a_noop() {
    let engine = test_engine();
    engine.notify_traffic_seen(ip("9.9.9.9"), 32, INTF, VRF, MacAddress::ZERO);
    engine.drain().await;
    assert_eq!(engine.path_count(), 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn sibling_paths_do_not_interfere() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let mac_a = mac("00:00:00:01:01:01");
    let mac_b = mac("00:00:00:02:02:02");
    let path_a = engine.install_local_path(route, InterfaceId(1), mac_a, false, 0, None);
    let path_b = engine.install_local_path(route, InterfaceId(2), mac_b, false, 0, None);

    engine.notify_traffic_seen(ip("1.1.1.10"), 32, InterfaceId(2), VRF, mac_b);
    engine.drain().await;

    assert_eq!(engine.path_preference(&path_b).unwrap().preference, HIGH);
    let untouched = engine.path_preference(&path_a).unwrap();
    assert_eq!(untouched.preference, LOW);
    assert_eq!(untouched.sequence, 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn ipv6_traffic_is_supported() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("fd10::2"));
    let m = mac("00:00:00:01:01:01");
    let path = engine.install_local_path(route, INTF, m, false, 0, None);

    engine.notify_traffic_seen(ip("fd10::2"), 128, INTF, VRF, m);
    engine.drain().await;
    assert_eq!(engine.path_preference(&path).unwrap().preference, HIGH);
    engine.shutdown().await;
}

// ============================================================================
// Remote competitors and flap damping
// ============================================================================

#[tokio::test]
async fn remote_competitor_demotes_active_path() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let m = mac("00:00:00:01:01:01");
    let path = engine.install_local_path(route, INTF, m, false, 0, None);

    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.drain().await;

    engine
        .notify_remote_path(route, "peer-a", Some(PreferenceValue::remote(5, HIGH)))
        .unwrap();
    engine.drain().await;

    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.sequence, 2);
    assert_eq!(value.preference, LOW);
    assert!(value.wait_for_traffic);
    engine.shutdown().await;
}

#[tokio::test]
async fn weaker_remote_competitor_is_ignored() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let m = mac("00:00:00:01:01:01");
    let path = engine.install_local_path(route, INTF, m, false, 0, None);

    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.drain().await;

    engine
        .notify_remote_path(route, "peer-a", Some(PreferenceValue::remote(5, LOW)))
        .unwrap();
    engine.drain().await;
    assert_eq!(engine.path_preference(&path).unwrap().preference, HIGH);
    engine.shutdown().await;
}

#[tokio::test]
async fn remote_withdrawal_never_demotes() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let m = mac("00:00:00:01:01:01");
    let path = engine.install_local_path(route, INTF, m, false, 0, None);

    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.drain().await;
    engine.notify_remote_path(route, "peer-a", None).unwrap();
    engine.drain().await;

    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.preference, HIGH);
    assert_eq!(value.sequence, 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn remote_assertions_are_readable_until_cleared() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let m = mac("00:00:00:01:01:01");
    let path = engine.install_local_path(route, INTF, m, false, 0, None);

    engine
        .notify_remote_path(route, "peer-a", Some(PreferenceValue::remote(5, HIGH)))
        .unwrap();
    engine.drain().await;
    assert_eq!(
        engine.remote_preferences(&route),
        vec![("peer-a".to_string(), PreferenceValue::remote(5, HIGH))]
    );

    // Withdrawal clears the stored value.
    engine.notify_remote_path(route, "peer-a", None).unwrap();
    engine.drain().await;
    assert!(engine.remote_preferences(&route).is_empty());

    // Routes the agent does not originate are not tracked.
    let foreign = RouteKey::host(VRF, ip("9.9.9.9"));
    engine
        .notify_remote_path(foreign, "peer-a", Some(PreferenceValue::remote(5, HIGH)))
        .unwrap();
    engine.drain().await;
    assert!(engine.remote_preferences(&foreign).is_empty());

    // Withdrawing the last local path drops the route's assertions too.
    engine
        .notify_remote_path(route, "peer-a", Some(PreferenceValue::remote(6, HIGH)))
        .unwrap();
    engine.drain().await;
    engine.withdraw_local_path(&path);
    assert!(engine.remote_preferences(&route).is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn flap_storm_suppresses_confirmation_until_timer_fires() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let m = mac("00:00:00:01:01:01");
    let path = engine.install_local_path(route, INTF, m, false, 0, None);

    // Four promote/demote rounds reach the flap cap. The engine clock stays
    // at zero, so deadlines land at 100, 200, 400 and 800ms.
    for _ in 0..4 {
        engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
        engine.drain().await;
        engine
            .notify_remote_path(route, "peer-a", Some(PreferenceValue::remote(5, HIGH)))
            .unwrap();
        engine.drain().await;
    }
    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.preference, LOW);
    assert_eq!(value.sequence, 8);

    // Traffic during suppression does not promote.
    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.drain().await;
    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.preference, LOW);
    assert_eq!(value.sequence, 8);

    // Firing the hold-down window clears suppression; traffic promotes
    // again.
    engine.advance_clock(Tick::new(800));
    engine.drain().await;
    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.drain().await;
    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.preference, HIGH);
    assert_eq!(value.sequence, 9);
    engine.shutdown().await;
}

#[tokio::test]
async fn single_flap_recovers_after_one_window() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let m = mac("00:00:00:01:01:01");
    let path = engine.install_local_path(route, INTF, m, false, 0, None);

    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.drain().await;
    engine
        .notify_remote_path(route, "peer-a", Some(PreferenceValue::remote(5, HIGH)))
        .unwrap();
    engine.drain().await;

    // One flap never suppresses: confirmation works immediately.
    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.drain().await;
    assert_eq!(engine.path_preference(&path).unwrap().preference, HIGH);

    // The armed window expires idle without disturbing the path.
    engine.advance_clock(Tick::new(100));
    engine.drain().await;
    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.preference, HIGH);
    assert_eq!(value.sequence, 3);
    engine.shutdown().await;
}

// ============================================================================
// ECMP and static preference
// ============================================================================

#[tokio::test]
async fn ecmp_path_is_high_from_creation() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let m = mac("00:00:00:01:01:01");
    let path = engine.install_local_path(route, INTF, m, true, 0, None);

    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.preference, HIGH);
    assert!(value.ecmp);
    assert!(!value.wait_for_traffic);
    assert_eq!(value.sequence, 0);

    // Neither traffic nor competitors perturb an ECMP path.
    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine
        .notify_remote_path(route, "peer-a", Some(PreferenceValue::remote(5, HIGH)))
        .unwrap();
    engine.drain().await;
    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.preference, HIGH);
    assert_eq!(value.sequence, 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn ecmp_toggle_preserves_sequence() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let m = mac("00:00:00:01:01:01");
    let path = engine.install_local_path(route, INTF, m, false, 0, None);

    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.drain().await;

    engine.set_ecmp(path.clone(), true).unwrap();
    engine.drain().await;
    let value = engine.path_preference(&path).unwrap();
    assert!(value.ecmp);
    assert_eq!(value.preference, HIGH);
    assert_eq!(value.sequence, 1);

    // Disabling falls back to the confirmed state.
    engine.set_ecmp(path.clone(), false).unwrap();
    engine.drain().await;
    let value = engine.path_preference(&path).unwrap();
    assert!(!value.ecmp);
    assert_eq!(value.preference, HIGH);
    assert!(!value.wait_for_traffic);
    assert_eq!(value.sequence, 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn static_preference_overrides_and_clears() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let m = mac("00:00:00:01:01:01");
    let path = engine.install_local_path(route, INTF, m, false, 200, None);

    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.preference, HIGH);
    assert!(value.static_preference);
    assert!(!value.wait_for_traffic);

    // Competitors cannot demote an overridden path.
    engine
        .notify_remote_path(route, "peer-a", Some(PreferenceValue::remote(5, HIGH)))
        .unwrap();
    engine.drain().await;
    assert_eq!(engine.path_preference(&path).unwrap().preference, HIGH);

    // Arbitrary values pass through verbatim.
    engine.set_static_preference(path.clone(), 50).unwrap();
    engine.drain().await;
    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.preference, 50);
    assert!(value.wait_for_traffic);

    // Zero clears, restoring the dynamic default.
    engine.set_static_preference(path.clone(), 0).unwrap();
    engine.drain().await;
    let value = engine.path_preference(&path).unwrap();
    assert!(!value.static_preference);
    assert_eq!(value.preference, LOW);
    assert!(value.wait_for_traffic);
    engine.shutdown().await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn reinstall_resets_sequence() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let m = mac("00:00:00:01:01:01");
    let path = engine.install_local_path(route, INTF, m, false, 0, None);

    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.drain().await;
    assert_eq!(engine.path_preference(&path).unwrap().sequence, 1);

    engine.withdraw_local_path(&path);
    assert!(engine.path_preference(&path).is_none());

    let path = engine.install_local_path(route, INTF, m, false, 0, None);
    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.sequence, 0);
    assert!(value.wait_for_traffic);
    engine.shutdown().await;
}

#[tokio::test]
async fn event_racing_withdrawal_is_dropped_silently() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let m = mac("00:00:00:01:01:01");
    let path = engine.install_local_path(route, INTF, m, false, 0, None);

    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.withdraw_local_path(&path);
    engine.drain().await;
    assert_eq!(engine.path_count(), 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn traffic_posted_before_reinstall_does_not_promote_the_new_path() {
    let engine = test_engine();
    let route = RouteKey::host(VRF, ip("1.1.1.10"));
    let m = mac("00:00:00:01:01:01");
    let path = engine.install_local_path(route, INTF, m, false, 0, None);

    // Evidence observed against the first incarnation must not carry over
    // the withdraw+reinstall, regardless of when the worker applies it.
    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.withdraw_local_path(&path);
    let path = engine.install_local_path(route, INTF, m, false, 0, None);
    engine.drain().await;

    let value = engine.path_preference(&path).unwrap();
    assert_eq!(value.sequence, 0);
    assert_eq!(value.preference, LOW);
    assert!(value.wait_for_traffic);
    engine.shutdown().await;
}

#[tokio::test]
async fn unrelated_routes_have_independent_state() {
    let engine = test_engine();
    let m = mac("00:00:00:01:01:01");
    let mut paths = Vec::new();
    for i in 0..16u32 {
        let route = RouteKey::host(VRF, ip(&format!("10.0.0.{}", i + 1)));
        paths.push(engine.install_local_path(route, INTF, m, false, 0, None));
    }
    for i in 0..16u32 {
        engine.notify_traffic_seen(ip(&format!("10.0.0.{}", i + 1)), 32, INTF, VRF, m);
    }
    engine.drain().await;
    for path in &paths {
        assert_eq!(engine.path_preference(path).unwrap().preference, HIGH);
    }
    engine.shutdown().await;
}

// ============================================================================
// Dependency propagation
// ============================================================================

#[tokio::test]
async fn governed_path_mirrors_governor_transitions() {
    use vrouterd::preference::dependency::GoverningAddress;

    let engine = test_engine();
    let m = mac("00:00:00:01:01:01");
    let primary = RouteKey::host(VRF, ip("1.1.1.10"));
    let governor = GoverningAddress::new(VRF, ip("1.1.1.10"));
    engine.install_local_path(primary, INTF, m, false, 0, None);

    let subnet = RouteKey::inet(VRF, ip("24.1.1.0"), 24);
    let dependent =
        engine.install_local_path(subnet, INTF, MacAddress::ZERO, false, 0, Some(governor));

    // Bound at install: mirrors the governor's LowWaiting value.
    let value = engine.path_preference(&dependent).unwrap();
    assert_eq!(value.preference, LOW);
    assert_eq!(value.dependent_address, Some(ip("1.1.1.10")));

    // Governor promotion fans out; the dependent's own sequence is
    // untouched.
    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.drain().await;
    let value = engine.path_preference(&dependent).unwrap();
    assert_eq!(value.preference, HIGH);
    assert!(!value.wait_for_traffic);
    assert_eq!(value.sequence, 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn bind_after_promotion_snapshots_sequence_verbatim() {
    use vrouterd::preference::dependency::GoverningAddress;

    let engine = test_engine();
    let m = mac("00:00:00:01:01:01");
    let primary = RouteKey::host(VRF, ip("1.1.1.10"));
    let governor = GoverningAddress::new(VRF, ip("1.1.1.10"));
    let primary_path = engine.install_local_path(primary, INTF, m, false, 0, None);

    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.drain().await;
    assert_eq!(engine.path_preference(&primary_path).unwrap().sequence, 1);

    let subnet = RouteKey::inet(VRF, ip("24.1.1.0"), 24);
    let dependent =
        engine.install_local_path(subnet, INTF, MacAddress::ZERO, false, 0, Some(governor));
    let value = engine.path_preference(&dependent).unwrap();
    assert_eq!(value.sequence, 1);
    assert_eq!(value.preference, HIGH);
    engine.shutdown().await;
}

#[tokio::test]
async fn governor_withdrawal_resets_dependents() {
    use vrouterd::preference::dependency::GoverningAddress;

    let engine = test_engine();
    let m = mac("00:00:00:01:01:01");
    let primary = RouteKey::host(VRF, ip("1.1.1.10"));
    let governor = GoverningAddress::new(VRF, ip("1.1.1.10"));
    let primary_path = engine.install_local_path(primary, INTF, m, false, 0, None);
    let subnet = RouteKey::inet(VRF, ip("24.1.1.0"), 24);
    let dependent =
        engine.install_local_path(subnet, INTF, MacAddress::ZERO, false, 0, Some(governor));

    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, m);
    engine.drain().await;
    assert_eq!(engine.path_preference(&dependent).unwrap().preference, HIGH);

    engine.withdraw_local_path(&primary_path);
    let value = engine.path_preference(&dependent).unwrap();
    assert_eq!(value.preference, LOW);
    assert!(value.wait_for_traffic);
    engine.shutdown().await;
}

#[tokio::test]
async fn rebind_snapshots_new_governor_immediately() {
    use vrouterd::preference::dependency::GoverningAddress;

    let engine = test_engine();
    let mac_a = mac("00:00:00:01:01:01");
    let mac_b = mac("00:00:00:02:02:02");
    let a = RouteKey::host(VRF, ip("1.1.1.10"));
    let b = RouteKey::host(VRF, ip("1.1.1.11"));
    engine.install_local_path(a, INTF, mac_a, false, 0, None);
    engine.install_local_path(b, INTF, mac_b, false, 0, None);

    let subnet = RouteKey::inet(VRF, ip("24.1.1.0"), 24);
    let dependent = engine.install_local_path(
        subnet,
        INTF,
        MacAddress::ZERO,
        false,
        0,
        Some(GoverningAddress::new(VRF, ip("1.1.1.10"))),
    );

    // Promote only the second address, then retarget the dependent at it.
    engine.notify_traffic_seen(ip("1.1.1.11"), 32, INTF, VRF, mac_b);
    engine.drain().await;
    engine
        .rebind(&dependent, Some(GoverningAddress::new(VRF, ip("1.1.1.11"))))
        .unwrap();

    let value = engine.path_preference(&dependent).unwrap();
    assert_eq!(value.preference, HIGH);
    assert_eq!(value.sequence, 1);
    assert_eq!(value.dependent_address, Some(ip("1.1.1.11")));

    // The old governor no longer reaches it.
    engine.notify_traffic_seen(ip("1.1.1.10"), 32, INTF, VRF, mac_a);
    engine.drain().await;
    assert_eq!(
        engine.path_preference(&dependent).unwrap().sequence,
        1,
        "stale governor must not touch the rebound path"
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn rebind_unknown_path_is_an_error() {
    use vrouterd::core::error::AgentError;
    use vrouterd::preference::dependency::GoverningAddress;

    let engine = test_engine();
    let subnet = RouteKey::inet(VRF, ip("24.1.1.0"), 24);
    let ghost = PathId::new(subnet, PeerId::Interface(INTF));
    let result = engine.rebind(&ghost, Some(GoverningAddress::new(VRF, ip("1.1.1.10"))));
    assert!(matches!(result, Err(AgentError::UnknownPath { .. })));
    engine.shutdown().await;
}
