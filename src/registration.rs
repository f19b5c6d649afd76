//! Auto-registration: turning a verified-but-unregistered purchase code into
//! a local license for a specific account.
//!
//! License creation, the initial invoice, and the stock decrement happen in
//! one transaction — a license without its invoice must never survive a
//! partial failure.

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};

use crate::db::{DbPool, queries};
use crate::error::{Denial, Result};
use crate::marketplace::RemoteSale;
use crate::models::{CreateLicense, Invoice, InvoiceStatus, License};
use crate::normalize::normalize_purchase_code;
use crate::notify::Notifier;
use crate::util::{LicenseTerms, RequestInfo};
use crate::verifier::{Verification, Verifier};

#[derive(Debug)]
pub enum Registration {
    Created { license: License, invoice: Invoice },
    /// The (code, account) pair is already registered; returned as-is.
    Existing(Box<License>),
    Denied(Denial),
}

#[derive(Clone)]
pub struct Registrar {
    db: DbPool,
    verifier: Verifier,
    notifier: Notifier,
}

impl Registrar {
    /// Attempts are recorded by the verifier this orchestrator drives, so no
    /// separate audit handle is needed here.
    pub fn new(db: DbPool, verifier: Verifier, notifier: Notifier) -> Self {
        Self {
            db,
            verifier,
            notifier,
        }
    }

    /// Register a purchase code for an account.
    ///
    /// Idempotent: an already-registered (code, account) pair returns the
    /// existing license. Verification failures propagate unchanged so the
    /// caller can tell `Invalid` from `Unverifiable`.
    pub async fn auto_register(
        &self,
        raw_code: &str,
        product_id: Option<&str>,
        user_id: &str,
        request: &RequestInfo,
    ) -> Result<Registration> {
        let code = match normalize_purchase_code(raw_code) {
            Ok(code) => code,
            Err(denial) => return Ok(Registration::Denied(denial)),
        };

        {
            let conn = self.db.get()?;
            if queries::get_user_by_id(&conn, user_id)?.is_none() {
                return Err(crate::error::AppError::NotFound("Account not found".into()));
            }

            // Idempotence check before spending any verification work
            if let Some(existing) =
                queries::get_license_for_account(&conn, code.canonical(), user_id)?
            {
                if let Some(product_id) = product_id
                    && existing.product_id != product_id
                {
                    return Ok(Registration::Denied(Denial::Conflict(format!(
                        "purchase code already registered against product {}",
                        existing.product_id
                    ))));
                }
                return Ok(Registration::Existing(Box::new(existing)));
            }
        }

        // Account context deliberately not passed down: materialization is
        // this orchestrator's job, inside its own transaction
        let verification = self
            .verifier
            .verify(&code, product_id, None, request)
            .await?;

        match verification {
            Verification::Local(license) => {
                if license.user_id == user_id {
                    Ok(Registration::Existing(license))
                } else {
                    Ok(Registration::Denied(Denial::Conflict(
                        "purchase code is registered to another account".into(),
                    )))
                }
            }
            Verification::Remote(sale) => {
                let mut conn = self.db.get()?;
                let registration = materialize_remote_sale(
                    &mut conn,
                    code.canonical(),
                    &sale,
                    product_id,
                    user_id,
                )?;
                if let Registration::Created { ref license, .. } = registration {
                    self.notifier.license_created(license);
                }
                Ok(registration)
            }
            Verification::Invalid => Ok(Registration::Denied(Denial::NotFound)),
            Verification::WrongProduct => Ok(Registration::Denied(Denial::WrongProduct)),
            Verification::TooManyAttempts => Ok(Registration::Denied(Denial::TooManyAttempts)),
            Verification::Unverifiable(detail) => {
                Ok(Registration::Denied(Denial::Unverifiable(detail)))
            }
        }
    }
}

/// Create the license, its initial invoice, and the stock decrement as one
/// unit of work. Runs inside an immediate transaction so a concurrent
/// registration of the same pair serializes against the idempotence check.
pub fn materialize_remote_sale(
    conn: &mut Connection,
    canonical_code: &str,
    sale: &RemoteSale,
    product_id: Option<&str>,
    user_id: &str,
) -> Result<Registration> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(existing) = queries::get_license_for_account(&tx, canonical_code, user_id)? {
        tx.commit()?;
        if let Some(product_id) = product_id
            && existing.product_id != product_id
        {
            return Ok(Registration::Denied(Denial::Conflict(format!(
                "purchase code already registered against product {}",
                existing.product_id
            ))));
        }
        return Ok(Registration::Existing(Box::new(existing)));
    }

    let product = match product_id {
        Some(product_id) => queries::get_product_by_id(&tx, product_id)?,
        None => queries::get_product_by_item_id(&tx, &sale.item.id)?,
    };
    let Some(product) = product else {
        tx.commit()?;
        return Ok(Registration::Denied(Denial::ProductNotFound));
    };
    if let Some(ref item_id) = product.marketplace_item_id
        && *item_id != sale.item.id
    {
        tx.commit()?;
        return Ok(Registration::Denied(Denial::WrongProduct));
    }

    let now = Utc::now().timestamp();
    let terms = LicenseTerms::from_product(&product, now);
    // The marketplace's support window wins over product defaults when present
    let support_expires_at = sale.supported_until_ts().or(terms.support_expires_at);

    let license = queries::create_license(
        &tx,
        &CreateLicense {
            purchase_code: canonical_code.to_string(),
            user_id: user_id.to_string(),
            product_id: product.id.clone(),
            license_expires_at: terms.license_expires_at,
            support_expires_at,
            max_domains: product.max_domains,
        },
    )?;

    let amount_cents = sale.amount_cents.unwrap_or(product.price_cents);
    let invoice = queries::create_invoice(&tx, &license, amount_cents, InvoiceStatus::Paid)?;

    if !queries::decrement_stock(&tx, &product.id)? {
        tx.rollback()?;
        return Ok(Registration::Denied(Denial::OutOfStock));
    }

    tx.commit()?;

    Ok(Registration::Created { license, invoice })
}
