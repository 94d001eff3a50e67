//! End-to-end exercises of the token lifecycle: candidacy, scope-checked
//! activation, resource binding, confirmation-gated revocation, and the
//! probe/peer/SIM state the tokens gate.

use std::sync::Arc;
use std::time::Duration;

use probegate::errors::AppError;
use probegate::models::peer::PeerKey;
use probegate::models::probe::ProbeStatus;
use probegate::models::token::{BoundResource, TokenStatus};
use probegate::store::sims::SimRequest;
use probegate::store::{ActivationFields, Store, StoreOptions};

fn store() -> Store {
    Store::new(StoreOptions::default())
}

fn fields(ip: Option<&str>, name: Option<&str>) -> ActivationFields {
    ActivationFields {
        ip: ip.map(String::from),
        name: name.map(String::from),
    }
}

fn sim_req(imsi: Option<&str>, provide: bool, request: bool) -> SimRequest {
    SimRequest {
        imsi: imsi.map(String::from),
        iccid: None,
        public: false,
        provide,
        request,
    }
}

// ── Activation ───────────────────────────────────────────────

#[test]
fn activate_ip_scope_binds_peer_entry() {
    let s = store();
    let cand = s.create_candidate(1, None).unwrap();

    let record = s
        .activate_token(&cand.value, 1, &fields(Some("10.0.0.5"), None))
        .unwrap();

    assert_eq!(record.status, TokenStatus::Active);
    assert_eq!(
        record.bound,
        Some(BoundResource::Peer {
            ip: "10.0.0.5".parse().unwrap()
        })
    );

    let entry = s
        .peers
        .get(&PeerKey::Token(cand.value.clone()))
        .expect("peer-allow entry exists after activation");
    assert_eq!(entry.ip, "10.0.0.5".parse::<std::net::IpAddr>().unwrap());
    assert!(entry.allow_registration);
}

#[test]
fn activate_name_scope_binds_probe() {
    let s = store();
    let cand = s.create_candidate(2, None).unwrap();

    let record = s
        .activate_token(&cand.value, 2, &fields(None, Some("vienna-1")))
        .unwrap();

    let id = record.bound.as_ref().and_then(|b| b.probe_id()).unwrap();
    let probe = s.probes.get(id).unwrap();
    assert_eq!(probe.name.as_deref(), Some("vienna-1"));
    assert_eq!(probe.token_value.as_deref(), Some(cand.value.as_str()));
}

#[test]
fn activate_both_scopes_binds_both() {
    let s = store();
    let cand = s.create_candidate(3, None).unwrap();

    let record = s
        .activate_token(&cand.value, 3, &fields(Some("10.0.0.9"), Some("graz-1")))
        .unwrap();

    match record.bound {
        Some(BoundResource::PeerAndProbe { ip, id }) => {
            assert_eq!(ip, "10.0.0.9".parse::<std::net::IpAddr>().unwrap());
            assert!(s.probes.get(id).is_some());
        }
        other => panic!("expected PeerAndProbe binding, got {other:?}"),
    }
}

#[test]
fn activate_missing_required_field_fails() {
    let s = store();
    // scope 3 requires both ip and name; supplying only ip is rejected
    let cand = s.create_candidate(3, None).unwrap();
    let err = s
        .activate_token(&cand.value, 3, &fields(Some("10.0.0.5"), None))
        .unwrap_err();
    assert!(matches!(err, AppError::MissingField("name")));

    // nothing was committed
    let record = s.tokens.lookup(&cand.value).unwrap();
    assert_eq!(record.status, TokenStatus::Candidate);
    assert!(record.bound.is_none());
    assert!(s.peers.get(&PeerKey::Token(cand.value)).is_none());
}

#[test]
fn activate_unexpected_field_fails_regardless_of_order() {
    let s = store();

    let cand = s.create_candidate(1, None).unwrap();
    let err = s
        .activate_token(&cand.value, 1, &fields(Some("10.0.0.5"), Some("x")))
        .unwrap_err();
    assert!(matches!(err, AppError::UnexpectedField("name")));

    let cand = s.create_candidate(2, None).unwrap();
    let err = s
        .activate_token(&cand.value, 2, &fields(Some("10.0.0.5"), Some("x")))
        .unwrap_err();
    assert!(matches!(err, AppError::UnexpectedField("ip")));
}

#[test]
fn activate_rejects_bad_ip_and_unknown_token() {
    let s = store();
    let cand = s.create_candidate(1, None).unwrap();
    assert!(matches!(
        s.activate_token(&cand.value, 1, &fields(Some("not-an-ip"), None)),
        Err(AppError::InvalidValue(_))
    ));
    assert!(matches!(
        s.activate_token("bm9wZQ==", 1, &fields(Some("10.0.0.5"), None)),
        Err(AppError::NotFound)
    ));
}

#[test]
fn activate_scope_mismatch_is_rejected() {
    let s = store();
    let cand = s.create_candidate(1, None).unwrap();
    assert!(matches!(
        s.activate_token(&cand.value, 2, &fields(None, Some("x"))),
        Err(AppError::InvalidScope(2))
    ));
}

#[test]
fn activate_twice_fails_already_active() {
    let s = store();
    let cand = s.create_candidate(1, None).unwrap();
    s.activate_token(&cand.value, 1, &fields(Some("10.0.0.5"), None))
        .unwrap();
    assert!(matches!(
        s.activate_token(&cand.value, 1, &fields(Some("10.0.0.5"), None)),
        Err(AppError::AlreadyActive)
    ));
}

#[test]
fn concurrent_activation_succeeds_exactly_once() {
    let s = Arc::new(store());
    let cand = s.create_candidate(1, None).unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let s = Arc::clone(&s);
        let value = cand.value.clone();
        handles.push(std::thread::spawn(move || {
            let ip = format!("10.0.1.{i}");
            s.activate_token(&value, 1, &fields(Some(&ip), None)).is_ok()
        }));
    }

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|&ok| ok)
        .count();
    assert_eq!(successes, 1);

    let record = s.tokens.lookup(&cand.value).unwrap();
    assert_eq!(record.status, TokenStatus::Active);
    // exactly one binding survived
    assert!(record.bound.is_some());
}

#[test]
fn duplicate_ip_across_tokens_is_a_conflict() {
    let s = store();
    let a = s.create_candidate(1, None).unwrap();
    let b = s.create_candidate(1, None).unwrap();

    s.activate_token(&a.value, 1, &fields(Some("10.0.0.5"), None))
        .unwrap();
    assert!(matches!(
        s.activate_token(&b.value, 1, &fields(Some("10.0.0.5"), None)),
        Err(AppError::Conflict(_))
    ));
    // the loser stays a candidate
    assert_eq!(
        s.tokens.lookup(&b.value).unwrap().status,
        TokenStatus::Candidate
    );
}

#[test]
fn duplicate_probe_name_is_a_conflict() {
    let s = store();
    let a = s.create_candidate(2, None).unwrap();
    let b = s.create_candidate(2, None).unwrap();

    s.activate_token(&a.value, 2, &fields(None, Some("lab")))
        .unwrap();
    assert!(matches!(
        s.activate_token(&b.value, 2, &fields(None, Some("lab"))),
        Err(AppError::Conflict(_))
    ));
}

#[test]
fn invalid_scope_rejected_before_any_state_exists() {
    let s = store();
    assert!(matches!(
        s.create_candidate(0, None),
        Err(AppError::InvalidScope(0))
    ));
    assert!(matches!(
        s.create_candidate(0x100, None),
        Err(AppError::InvalidScope(_))
    ));
}

// ── Revocation ───────────────────────────────────────────────

#[test]
fn revoke_requires_matching_confirmation() {
    let s = store();
    let cand = s.create_candidate(1, None).unwrap();
    s.activate_token(&cand.value, 1, &fields(Some("10.0.0.5"), None))
        .unwrap();

    // no challenge issued yet
    assert!(matches!(
        s.revoke_token(&cand.value, "whatever"),
        Err(AppError::ConfirmationMismatch)
    ));

    let phrase = s.revocation_challenge(&cand.value).unwrap();
    assert!(matches!(
        s.revoke_token(&cand.value, "wrong"),
        Err(AppError::ConfirmationMismatch)
    ));

    // status untouched by failed attempts
    assert_eq!(
        s.tokens.lookup(&cand.value).unwrap().status,
        TokenStatus::Active
    );

    s.revoke_token(&cand.value, &phrase).unwrap();
    assert_eq!(
        s.tokens.lookup(&cand.value).unwrap().status,
        TokenStatus::Revoked
    );
}

#[test]
fn revoke_cascades_to_peer_entry() {
    let s = store();
    let cand = s.create_candidate(1, None).unwrap();
    s.activate_token(&cand.value, 1, &fields(Some("10.0.0.5"), None))
        .unwrap();
    assert!(s.peers.get(&PeerKey::Token(cand.value.clone())).is_some());

    let phrase = s.revocation_challenge(&cand.value).unwrap();
    s.revoke_token(&cand.value, &phrase).unwrap();

    let record = s.tokens.lookup(&cand.value).unwrap();
    assert_eq!(record.status, TokenStatus::Revoked);
    assert!(record.bound.is_none());
    assert!(s.peers.get(&PeerKey::Token(cand.value)).is_none());
}

#[test]
fn revoke_cascades_to_bound_probe() {
    let s = store();
    let cand = s.create_candidate(2, None).unwrap();
    let record = s
        .activate_token(&cand.value, 2, &fields(None, Some("lab-2")))
        .unwrap();
    let probe_id = record.bound.as_ref().and_then(|b| b.probe_id()).unwrap();

    let phrase = s.revocation_challenge(&cand.value).unwrap();
    s.revoke_token(&cand.value, &phrase).unwrap();

    assert_eq!(s.probes.get(probe_id).unwrap().status, ProbeStatus::Deactivated);
}

#[test]
fn revoke_is_idempotent_on_revoked_tokens() {
    let s = store();
    let cand = s.create_candidate(1, None).unwrap();
    s.activate_token(&cand.value, 1, &fields(Some("10.0.0.5"), None))
        .unwrap();
    let phrase = s.revocation_challenge(&cand.value).unwrap();
    s.revoke_token(&cand.value, &phrase).unwrap();

    // no challenge needed the second time; it is a no-op ack
    s.revoke_token(&cand.value, "anything").unwrap();
    s.revoke_token(&cand.value, "").unwrap();
}

#[test]
fn revoked_token_never_reactivates() {
    let s = store();
    let cand = s.create_candidate(1, None).unwrap();
    let phrase = s.revocation_challenge(&cand.value).unwrap();
    s.revoke_token(&cand.value, &phrase).unwrap();

    assert!(matches!(
        s.activate_token(&cand.value, 1, &fields(Some("10.0.0.5"), None)),
        Err(AppError::AlreadyRevoked)
    ));
}

#[test]
fn expired_confirmation_is_rejected() {
    let s = Store::new(StoreOptions {
        confirm_ttl: Duration::from_millis(1),
        ..StoreOptions::default()
    });
    let cand = s.create_candidate(1, None).unwrap();
    s.activate_token(&cand.value, 1, &fields(Some("10.0.0.5"), None))
        .unwrap();

    let phrase = s.revocation_challenge(&cand.value).unwrap();
    std::thread::sleep(Duration::from_millis(10));
    assert!(matches!(
        s.revoke_token(&cand.value, &phrase),
        Err(AppError::ConfirmationExpired)
    ));
    assert_eq!(
        s.tokens.lookup(&cand.value).unwrap().status,
        TokenStatus::Active
    );
}

// ── Probe registry ───────────────────────────────────────────

#[test]
fn duplicate_mac_is_rejected_case_insensitively() {
    let s = store();
    s.register_probe("aa:bb:cc:00:11:22").unwrap();
    assert!(matches!(
        s.register_probe("AA:BB:CC:00:11:22"),
        Err(AppError::DuplicateMac(_))
    ));
}

#[test]
fn execute_gate_rejects_deactivated_probe() {
    let s = store();
    let probe = s.register_probe("aa:bb:cc:00:11:22").unwrap();

    // never activated
    assert!(matches!(
        s.ensure_probe_active(probe.id),
        Err(AppError::ProbeNotActive)
    ));

    s.probes.activate(probe.id).unwrap();
    s.ensure_probe_active(probe.id).unwrap();

    s.probes.deactivate(probe.id).unwrap();
    assert!(matches!(
        s.ensure_probe_active(probe.id),
        Err(AppError::ProbeNotActive)
    ));
}

#[test]
fn device_registered_candidate_carries_mac_into_binding() {
    let s = store();
    let probe = s.register_probe("aa:bb:cc:00:11:22").unwrap();

    let value = probegate::store::tokens::generate_value();
    s.register_candidate(&value, 2, "AA:BB:CC:00:11:22").unwrap();

    let record = s
        .activate_token(&value, 2, &fields(None, Some("lab-3")))
        .unwrap();
    // binding attached to the probe already registered under that mac
    assert_eq!(
        record.bound.as_ref().and_then(|b| b.probe_id()),
        Some(probe.id)
    );
    assert_eq!(s.probes.get(probe.id).unwrap().name.as_deref(), Some("lab-3"));
}

#[test]
fn candidate_pruning_keeps_newest() {
    let s = Store::new(StoreOptions {
        max_candidates: 2,
        ..StoreOptions::default()
    });

    let first = probegate::store::tokens::generate_value();
    s.register_candidate(&first, 2, "aa:bb:cc:00:11:01").unwrap();
    std::thread::sleep(Duration::from_millis(5));
    let second = probegate::store::tokens::generate_value();
    s.register_candidate(&second, 2, "aa:bb:cc:00:11:02").unwrap();
    std::thread::sleep(Duration::from_millis(5));
    let third = probegate::store::tokens::generate_value();
    s.register_candidate(&third, 2, "aa:bb:cc:00:11:03").unwrap();

    assert!(s.tokens.lookup(&first).is_none());
    assert!(s.tokens.lookup(&second).is_some());
    assert!(s.tokens.lookup(&third).is_some());
}

// ── Peer admission ───────────────────────────────────────────

#[test]
fn manual_peer_allow_and_disallow() {
    let s = store();
    s.allow_peer("aa:bb:cc:00:11:22", "10.0.2.1".parse().unwrap(), false)
        .unwrap();

    // replace needs the explicit flag
    assert!(matches!(
        s.allow_peer("aa:bb:cc:00:11:22", "10.0.2.2".parse().unwrap(), false),
        Err(AppError::Conflict(_))
    ));
    s.allow_peer("aa:bb:cc:00:11:22", "10.0.2.2".parse().unwrap(), true)
        .unwrap();

    assert!(s.disallow_peer("aa:bb:cc:00:11:22").unwrap());
    assert!(!s.disallow_peer("aa:bb:cc:00:11:22").unwrap());
}

#[test]
fn allow_via_token_requires_active_wireguard_scope() {
    let s = store();

    let cand = s.create_candidate(2, None).unwrap();
    s.activate_token(&cand.value, 2, &fields(None, Some("p1")))
        .unwrap();
    // probe-scoped token cannot admit peers
    assert!(matches!(
        s.allow_peer_via_token(&cand.value, "10.0.3.1".parse().unwrap(), false),
        Err(AppError::Forbidden)
    ));

    let wg = s.create_candidate(1, None).unwrap();
    // candidate (not yet active) cannot admit peers either
    assert!(matches!(
        s.allow_peer_via_token(&wg.value, "10.0.3.1".parse().unwrap(), false),
        Err(AppError::TokenNotActive)
    ));

    s.activate_token(&wg.value, 1, &fields(Some("10.0.3.1"), None))
        .unwrap();
    // re-allow with a new ip, explicitly replacing
    s.allow_peer_via_token(&wg.value, "10.0.3.2".parse().unwrap(), true)
        .unwrap();
    let record = s.tokens.lookup(&wg.value).unwrap();
    assert_eq!(
        record.bound.as_ref().and_then(|b| b.peer_ip()),
        Some("10.0.3.2".parse().unwrap())
    );
}

#[test]
fn one_shot_wireguard_registration() {
    let s = store();
    let cand = s.create_candidate(1, None).unwrap();
    s.activate_token(&cand.value, 1, &fields(Some("10.0.4.1"), None))
        .unwrap();
    let token = s.tokens.lookup(&cand.value).unwrap();

    let publickey = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";
    let ip = s
        .register_peer(&token, publickey, "aa:bb:cc:00:11:44")
        .unwrap();
    assert_eq!(ip, "10.0.4.1".parse::<std::net::IpAddr>().unwrap());

    // the flag is consumed; a second registration is rejected
    assert!(matches!(
        s.register_peer(&token, publickey, "aa:bb:cc:00:11:44"),
        Err(AppError::Forbidden)
    ));

    // the token picked up the mac it registered with
    assert_eq!(
        s.tokens.lookup(&cand.value).unwrap().mac.as_deref(),
        Some("aa:bb:cc:00:11:44")
    );
}

// ── Tunnel tokens & SIM allowances ───────────────────────────

#[test]
fn sim_allow_requires_active_token() {
    let s = store();
    let token = s.create_tunnel_token(2, false).unwrap();

    s.allow_sim(token.id, &sim_req(Some("232010000000001"), true, false))
        .unwrap();

    s.revoke_tunnel_token(token.id).unwrap();
    assert!(matches!(
        s.allow_sim(token.id, &sim_req(Some("232010000000002"), true, false)),
        Err(AppError::TokenNotActive)
    ));
    assert!(matches!(
        s.allow_sim(9999, &sim_req(Some("232010000000003"), true, false)),
        Err(AppError::TokenNotActive)
    ));
}

#[test]
fn sim_allow_requires_identifier_and_scope() {
    let s = store();
    let token = s.create_tunnel_token(2, false).unwrap();

    assert!(matches!(
        s.allow_sim(token.id, &sim_req(None, true, false)),
        Err(AppError::MissingIdentifier)
    ));
    // provider-scoped token cannot request
    assert!(matches!(
        s.allow_sim(token.id, &sim_req(Some("232010000000001"), false, true)),
        Err(AppError::InvalidScope(_))
    ));

    // admin bypasses the scope check
    let admin = s.create_tunnel_token(0, true).unwrap();
    s.allow_sim(admin.id, &sim_req(Some("232010000000009"), true, true))
        .unwrap();
}

#[test]
fn tunnel_revocation_drops_sim_allowances() {
    let s = store();
    let a = s.create_tunnel_token(2, false).unwrap();
    let b = s.create_tunnel_token(2, false).unwrap();
    s.allow_sim(a.id, &sim_req(Some("232010000000001"), true, false))
        .unwrap();
    s.allow_sim(b.id, &sim_req(Some("232010000000002"), true, false))
        .unwrap();

    s.revoke_tunnel_token(a.id).unwrap();
    assert!(s.sims.list_for_token(a.id).is_empty());
    assert_eq!(s.sims.list_for_token(b.id).len(), 1);

    assert!(matches!(
        s.revoke_tunnel_token(9999),
        Err(AppError::NotFound)
    ));
}

#[test]
fn tunnel_token_requires_scope_unless_admin() {
    let s = store();
    assert!(matches!(
        s.create_tunnel_token(0, false),
        Err(AppError::InvalidScope(0))
    ));
    assert!(s.create_tunnel_token(0, true).is_ok());
}

// ── Bearer checks ────────────────────────────────────────────

#[test]
fn bearer_check_enforces_status_and_scope() {
    let s = store();
    let cand = s.create_candidate(1, None).unwrap();

    use probegate::models::scope::Scope;

    // candidates are not usable before activation
    assert!(matches!(
        s.check_bearer(&cand.value, Scope::from_bits(0)),
        Err(AppError::Forbidden)
    ));

    s.activate_token(&cand.value, 1, &fields(Some("10.0.5.1"), None))
        .unwrap();
    s.check_bearer(&cand.value, Scope::WIREGUARD).unwrap();
    assert!(matches!(
        s.check_bearer(&cand.value, Scope::PROBE),
        Err(AppError::Forbidden)
    ));

    let phrase = s.revocation_challenge(&cand.value).unwrap();
    s.revoke_token(&cand.value, &phrase).unwrap();
    assert!(matches!(
        s.check_bearer(&cand.value, Scope::from_bits(0)),
        Err(AppError::Forbidden)
    ));
}
