//! Auto-registration tests: idempotence, product resolution, and the
//! all-or-nothing license + invoice + stock unit of work.

use axum::http::StatusCode;

mod common;
use common::*;

use keygate::db::queries;
use keygate::error::{AppError, Denial};
use keygate::models::{CreateProduct, LicenseStatus};
use keygate::registration::Registration;
use keygate::util::RequestInfo;

fn req() -> RequestInfo {
    RequestInfo::default()
}

#[tokio::test]
async fn test_registration_creates_license_invoice_and_decrements_stock() {
    let (base, _hits) = spawn_marketplace(StatusCode::OK, sale_body("42")).await;
    let env = build_env(EnvOptions {
        marketplace_base: base,
        ..Default::default()
    });

    let (user_id, product_id);
    {
        let conn = env.state.db.get().unwrap();
        let user = create_test_user(&conn, "buyer@example.com");
        user_id = user.id;
        let product = queries::create_product(
            &conn,
            &CreateProduct {
                name: "Widget".into(),
                marketplace_item_id: Some("42".into()),
                license_days: Some(365),
                support_days: Some(180),
                max_domains: 2,
                stock: Some(5),
                price_cents: 4900,
            },
        )
        .unwrap();
        product_id = product.id;
    }

    let result = env
        .state
        .registrar
        .auto_register("97AB-1234-CDEF-9876", None, &user_id, &req())
        .await
        .unwrap();

    let license = match result {
        Registration::Created { license, invoice } => {
            assert_eq!(invoice.amount_cents, 4900);
            assert_eq!(invoice.license_id, license.id);
            license
        }
        other => panic!("expected creation, got {:?}", other),
    };

    assert_eq!(license.status, LicenseStatus::Active);
    assert_eq!(license.user_id, user_id);
    assert_eq!(license.product_id, product_id);
    assert_eq!(license.max_domains, 2);
    assert_eq!(license.purchase_code, "97ab1234cdef9876");
    // Marketplace-reported support window wins over product defaults
    assert_eq!(license.support_expires_at, Some(1938038400));
    assert!(license.license_key.starts_with("KG-"));

    let conn = env.state.db.get().unwrap();
    assert!(license.license_expires_at.unwrap() >= license.created_at);
    assert_eq!(
        queries::get_product_by_id(&conn, &product_id)
            .unwrap()
            .unwrap()
            .stock,
        Some(4)
    );
}

#[tokio::test]
async fn test_registration_is_idempotent_per_code_and_account() {
    let (base, _hits) = spawn_marketplace(StatusCode::OK, sale_body("42")).await;
    let env = build_env(EnvOptions {
        marketplace_base: base,
        ..Default::default()
    });

    let user_id;
    {
        let conn = env.state.db.get().unwrap();
        let user = create_test_user(&conn, "buyer@example.com");
        user_id = user.id;
        create_test_product(&conn, "Widget", Some("42"), 2);
    }

    let first = env
        .state
        .registrar
        .auto_register("97ab1234cdef9876", None, &user_id, &req())
        .await
        .unwrap();
    let first_id = match first {
        Registration::Created { license, .. } => license.id,
        other => panic!("expected creation, got {:?}", other),
    };

    let second = env
        .state
        .registrar
        .auto_register("97ab1234cdef9876", None, &user_id, &req())
        .await
        .unwrap();
    let second_id = match second {
        Registration::Existing(license) => license.id,
        other => panic!("expected existing license, got {:?}", other),
    };

    assert_eq!(first_id, second_id);

    // Exactly one invoice despite the repeated call
    let conn = env.state.db.get().unwrap();
    assert_eq!(
        queries::count_invoices_for_license(&conn, &first_id).unwrap(),
        1
    );
}

#[tokio::test]
async fn test_registration_without_product_mapping_is_denied() {
    let (base, _hits) = spawn_marketplace(StatusCode::OK, sale_body("42")).await;
    let env = build_env(EnvOptions {
        marketplace_base: base,
        ..Default::default()
    });

    let user_id;
    {
        let conn = env.state.db.get().unwrap();
        let user = create_test_user(&conn, "buyer@example.com");
        user_id = user.id;
        // No product knows item 42
        create_test_product(&conn, "Widget", Some("7"), 2);
    }

    let result = env
        .state
        .registrar
        .auto_register("97ab1234cdef9876", None, &user_id, &req())
        .await
        .unwrap();
    assert!(matches!(
        result,
        Registration::Denied(Denial::ProductNotFound)
    ));
}

#[tokio::test]
async fn test_out_of_stock_rolls_back_license_and_invoice() {
    let (base, _hits) = spawn_marketplace(StatusCode::OK, sale_body("42")).await;
    let env = build_env(EnvOptions {
        marketplace_base: base,
        ..Default::default()
    });

    let user_id;
    {
        let conn = env.state.db.get().unwrap();
        let user = create_test_user(&conn, "buyer@example.com");
        user_id = user.id;
        queries::create_product(
            &conn,
            &CreateProduct {
                name: "Widget".into(),
                marketplace_item_id: Some("42".into()),
                license_days: None,
                support_days: None,
                max_domains: 1,
                stock: Some(0),
                price_cents: 4900,
            },
        )
        .unwrap();
    }

    let result = env
        .state
        .registrar
        .auto_register("97ab1234cdef9876", None, &user_id, &req())
        .await
        .unwrap();
    assert!(matches!(result, Registration::Denied(Denial::OutOfStock)));

    // The whole unit of work rolled back: no orphaned license or invoice
    let conn = env.state.db.get().unwrap();
    let licenses: i64 = conn
        .query_row("SELECT COUNT(*) FROM licenses", [], |r| r.get(0))
        .unwrap();
    let invoices: i64 = conn
        .query_row("SELECT COUNT(*) FROM invoices", [], |r| r.get(0))
        .unwrap();
    assert_eq!(licenses, 0);
    assert_eq!(invoices, 0);
}

#[tokio::test]
async fn test_code_registered_to_another_account_is_a_conflict() {
    let env = test_env();

    let other_user_id;
    {
        let conn = env.state.db.get().unwrap();
        let owner = create_test_user(&conn, "owner@example.com");
        let other = create_test_user(&conn, "other@example.com");
        other_user_id = other.id;
        let product = create_test_product(&conn, "Widget", Some("42"), 2);
        create_test_license(&conn, &owner, &product, "97ab1234cdef9876", None);
    }

    let result = env
        .state
        .registrar
        .auto_register("97ab1234cdef9876", None, &other_user_id, &req())
        .await
        .unwrap();
    assert!(matches!(result, Registration::Denied(Denial::Conflict(_))));
}

#[tokio::test]
async fn test_registered_pair_with_different_product_surfaces_conflict() {
    let env = test_env();

    let (user_id, other_product_id);
    {
        let conn = env.state.db.get().unwrap();
        let user = create_test_user(&conn, "buyer@example.com");
        user_id = user.id.clone();
        let product = create_test_product(&conn, "Widget", Some("42"), 2);
        let other = create_test_product(&conn, "Gadget", Some("43"), 2);
        other_product_id = other.id;
        create_test_license(&conn, &user, &product, "97ab1234cdef9876", None);
    }

    let result = env
        .state
        .registrar
        .auto_register(
            "97ab1234cdef9876",
            Some(&other_product_id),
            &user_id,
            &req(),
        )
        .await
        .unwrap();
    assert!(matches!(result, Registration::Denied(Denial::Conflict(_))));
}

#[tokio::test]
async fn test_verification_failures_propagate_unchanged() {
    let (base, _hits) = spawn_marketplace(StatusCode::NOT_FOUND, serde_json::json!({})).await;
    let env = build_env(EnvOptions {
        marketplace_base: base,
        ..Default::default()
    });

    let user_id;
    {
        let conn = env.state.db.get().unwrap();
        user_id = create_test_user(&conn, "buyer@example.com").id;
    }

    let result = env
        .state
        .registrar
        .auto_register("97ab1234cdef9876", None, &user_id, &req())
        .await
        .unwrap();
    assert!(matches!(result, Registration::Denied(Denial::NotFound)));

    let result = env
        .state
        .registrar
        .auto_register("not ok!", None, &user_id, &req())
        .await
        .unwrap();
    assert!(matches!(
        result,
        Registration::Denied(Denial::InvalidFormat(_))
    ));
}

#[tokio::test]
async fn test_unverifiable_marketplace_propagates_as_unverifiable() {
    let base = spawn_black_hole().await;
    let env = build_env(EnvOptions {
        marketplace_base: base,
        marketplace_timeout: std::time::Duration::from_millis(300),
        ..Default::default()
    });

    let user_id;
    {
        let conn = env.state.db.get().unwrap();
        user_id = create_test_user(&conn, "buyer@example.com").id;
    }

    let result = env
        .state
        .registrar
        .auto_register("97ab1234cdef9876", None, &user_id, &req())
        .await
        .unwrap();
    assert!(matches!(
        result,
        Registration::Denied(Denial::Unverifiable(_))
    ));
}

#[tokio::test]
async fn test_unknown_account_is_an_error_not_a_denial() {
    let env = test_env();

    let result = env
        .state
        .registrar
        .auto_register("97ab1234cdef9876", None, "no-such-user", &req())
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}
