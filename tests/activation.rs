//! Domain activation tests: the quota invariant (including under concurrent
//! racing activations), idempotence, and status gating.

mod common;
use common::*;

use keygate::activation::Activation;
use keygate::db::queries;
use keygate::error::Denial;
use keygate::models::License;
use keygate::util::RequestInfo;

fn req() -> RequestInfo {
    RequestInfo::default()
}

/// License with a pinned key, bound to a fresh product with the given quota.
fn license_with_key(env: &TestEnv, key: &str, max_domains: i64) -> License {
    let conn = env.state.db.get().unwrap();
    let user = create_test_user(&conn, &format!("{}@example.com", key.to_lowercase()));
    let product = create_test_product(&conn, "Widget", None, max_domains);
    let license = create_test_license(&conn, &user, &product, "86ab1234cdef9876", None);
    set_license_key(&conn, &license.id, key);
    queries::get_license_by_key(&conn, key).unwrap().unwrap()
}

fn domains_of(env: &TestEnv, license: &License) -> Vec<String> {
    let conn = env.state.db.get().unwrap();
    queries::list_domains_for_license(&conn, &license.id)
        .unwrap()
        .into_iter()
        .map(|d| d.domain)
        .collect()
}

#[test]
fn test_activation_binds_domain() {
    let env = test_env();
    let license = license_with_key(&env, "ABC-123-ACTIVE", 3);

    let result = env
        .state
        .activation
        .activate("ABC-123-ACTIVE", "example.com", &req())
        .unwrap();

    match result {
        Activation::Activated {
            domain,
            domains_in_use,
            max_domains,
        } => {
            assert_eq!(domain, "example.com");
            assert_eq!(domains_in_use, 1);
            assert_eq!(max_domains, 3);
        }
        other => panic!("expected activation, got {:?}", other),
    }
    assert_eq!(domains_of(&env, &license), vec!["example.com"]);
}

#[test]
fn test_activation_over_quota_is_rejected_without_mutation() {
    let env = test_env();
    let license = license_with_key(&env, "ABC-123-ACTIVE", 1);

    let result = env
        .state
        .activation
        .activate("ABC-123-ACTIVE", "example.com", &req())
        .unwrap();
    assert!(matches!(result, Activation::Activated { .. }));

    let result = env
        .state
        .activation
        .activate("ABC-123-ACTIVE", "other.com", &req())
        .unwrap();
    assert!(matches!(
        result,
        Activation::Denied(Denial::QuotaExceeded)
    ));
    assert_eq!(domains_of(&env, &license), vec!["example.com"]);
}

#[test]
fn test_reactivating_same_domain_is_idempotent() {
    let env = test_env();
    let license = license_with_key(&env, "ABC-123-ACTIVE", 1);

    env.state
        .activation
        .activate("ABC-123-ACTIVE", "example.com", &req())
        .unwrap();
    let result = env
        .state
        .activation
        .activate("ABC-123-ACTIVE", "example.com", &req())
        .unwrap();

    match result {
        Activation::AlreadyActive { domains_in_use, .. } => assert_eq!(domains_in_use, 1),
        other => panic!("expected idempotent success, got {:?}", other),
    }
    assert_eq!(domains_of(&env, &license).len(), 1);
}

#[test]
fn test_domains_are_case_normalized() {
    let env = test_env();
    let license = license_with_key(&env, "ABC-123-ACTIVE", 2);

    env.state
        .activation
        .activate("ABC-123-ACTIVE", "Example.COM", &req())
        .unwrap();
    let result = env
        .state
        .activation
        .activate("ABC-123-ACTIVE", "  example.com.  ", &req())
        .unwrap();

    assert!(matches!(result, Activation::AlreadyActive { .. }));
    assert_eq!(domains_of(&env, &license), vec!["example.com"]);
}

#[test]
fn test_invalid_hostname_is_rejected_before_lookup() {
    let env = test_env();
    license_with_key(&env, "ABC-123-ACTIVE", 2);

    for bad in ["http://example.com", "exa mple.com", "", "-x.example.com"] {
        let result = env
            .state
            .activation
            .activate("ABC-123-ACTIVE", bad, &req())
            .unwrap();
        assert!(
            matches!(result, Activation::Denied(Denial::InvalidFormat(_))),
            "{:?} should be rejected",
            bad
        );
    }
}

#[test]
fn test_unknown_key_is_not_found() {
    let env = test_env();
    let result = env
        .state
        .activation
        .activate("NO-SUCH-KEY", "example.com", &req())
        .unwrap();
    assert!(matches!(result, Activation::Denied(Denial::NotFound)));
}

#[test]
fn test_non_active_statuses_block_activation_distinguishably() {
    let env = test_env();
    let license = license_with_key(&env, "ABC-123-ACTIVE", 2);

    {
        let conn = env.state.db.get().unwrap();
        set_license_status(&conn, &license.id, "suspended");
    }
    let result = env
        .state
        .activation
        .activate("ABC-123-ACTIVE", "example.com", &req())
        .unwrap();
    assert!(matches!(
        result,
        Activation::Denied(Denial::LicenseSuspended)
    ));

    {
        let conn = env.state.db.get().unwrap();
        set_license_status(&conn, &license.id, "inactive");
    }
    let result = env
        .state
        .activation
        .activate("ABC-123-ACTIVE", "example.com", &req())
        .unwrap();
    assert!(matches!(
        result,
        Activation::Denied(Denial::LicenseInactive)
    ));

    assert!(domains_of(&env, &license).is_empty());
}

#[test]
fn test_lazily_expired_license_blocks_activation() {
    let env = test_env();
    let license = {
        let conn = env.state.db.get().unwrap();
        let user = create_test_user(&conn, "buyer@example.com");
        let product = create_test_product(&conn, "Widget", None, 2);
        let license = create_test_license(
            &conn,
            &user,
            &product,
            "86ab1234cdef9876",
            Some(past_timestamp(1)),
        );
        set_license_key(&conn, &license.id, "ABC-123-EXPIRED");
        license
    };
    // Stored status is still active; the timestamp alone must block
    assert_eq!(license.status.as_ref(), "active");

    let result = env
        .state
        .activation
        .activate("ABC-123-EXPIRED", "example.com", &req())
        .unwrap();
    assert!(matches!(
        result,
        Activation::Denied(Denial::LicenseExpired)
    ));
}

#[test]
fn test_concurrent_activations_never_exceed_quota() {
    const QUOTA: i64 = 3;
    const RACERS: usize = 8;

    let env = test_env();
    let license = license_with_key(&env, "ABC-123-RACE", QUOTA);

    let handles: Vec<_> = (0..RACERS)
        .map(|i| {
            let activation = env.state.activation.clone();
            std::thread::spawn(move || {
                activation
                    .activate("ABC-123-RACE", &format!("host{}.example.com", i), &req())
                    .unwrap()
            })
        })
        .collect();

    let results: Vec<Activation> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let won = results
        .iter()
        .filter(|r| matches!(r, Activation::Activated { .. }))
        .count();
    let quota_exceeded = results
        .iter()
        .filter(|r| matches!(r, Activation::Denied(Denial::QuotaExceeded)))
        .count();

    assert_eq!(won, QUOTA as usize);
    assert_eq!(quota_exceeded, RACERS - QUOTA as usize);
    assert_eq!(domains_of(&env, &license).len(), QUOTA as usize);
}

#[test]
fn test_deactivation_frees_a_quota_slot() {
    let env = test_env();
    let license = license_with_key(&env, "ABC-123-ACTIVE", 1);

    env.state
        .activation
        .activate("ABC-123-ACTIVE", "example.com", &req())
        .unwrap();
    let removed = env
        .state
        .activation
        .deactivate("ABC-123-ACTIVE", "example.com", &req())
        .unwrap()
        .unwrap();
    assert!(removed);

    let result = env
        .state
        .activation
        .activate("ABC-123-ACTIVE", "other.com", &req())
        .unwrap();
    assert!(matches!(result, Activation::Activated { .. }));
    assert_eq!(domains_of(&env, &license), vec!["other.com"]);
}

#[test]
fn test_list_domains_preserves_activation_order() {
    let env = test_env();
    license_with_key(&env, "ABC-123-ACTIVE", 5);

    for domain in ["c.example.com", "a.example.com", "b.example.com"] {
        env.state
            .activation
            .activate("ABC-123-ACTIVE", domain, &req())
            .unwrap();
    }

    let (domains, max_domains) = env
        .state
        .activation
        .list_domains("ABC-123-ACTIVE")
        .unwrap()
        .unwrap();
    assert_eq!(max_domains, 5);
    let names: Vec<_> = domains.into_iter().map(|d| d.domain).collect();
    assert_eq!(names, vec!["c.example.com", "a.example.com", "b.example.com"]);
}
