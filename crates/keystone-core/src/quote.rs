//! # Quotes
//!
//! Priced offers to a customer or prospect, valid until a fixed date.
//!
//! ## Quote Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  DRAFT ──► SENT ──► VIEWED ──┬──► ACCEPTED ──► CONVERTED (via order)    │
//! │              │               ├──► REJECTED                              │
//! │              └──► EXPIRED ◄──┘                                          │
//! │                                                                         │
//! │  PENDING (customer request) ──► SENT | ACCEPTED | REJECTED | EXPIRED    │
//! │                                                                         │
//! │  Past valid_until, ACCEPTED is unreachable whatever the stored status.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, InvariantViolation, ValidationError};
use crate::line_item::{build_lines, LineItem, LineItemInput, Totals};
use crate::money::TaxRate;
use crate::types::{ContactSnapshot, DocumentKind, LedgerSettings};
use crate::validation::{validate_email, validate_reason, validate_text};

// =============================================================================
// Quote Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Viewed,
    /// Submitted by a customer, awaiting the business.
    Pending,
    Accepted,
    Rejected,
    Expired,
    Converted,
}

impl QuoteStatus {
    /// The transition table. CONVERTED is only entered through conversion.
    pub fn allowed_transitions(self) -> &'static [QuoteStatus] {
        use QuoteStatus::*;
        match self {
            Draft => &[Sent],
            Pending => &[Sent, Accepted, Rejected, Expired],
            Sent => &[Viewed, Expired],
            Viewed => &[Accepted, Rejected, Expired],
            Accepted => &[Converted],
            Rejected | Expired | Converted => &[],
        }
    }

    /// Lines may still change.
    pub fn is_editable(self) -> bool {
        matches!(
            self,
            QuoteStatus::Draft | QuoteStatus::Pending | QuoteStatus::Sent | QuoteStatus::Viewed
        )
    }

    /// Swept to EXPIRED once past validity.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            QuoteStatus::Pending | QuoteStatus::Sent | QuoteStatus::Viewed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuoteStatus::Draft => "DRAFT",
            QuoteStatus::Sent => "SENT",
            QuoteStatus::Viewed => "VIEWED",
            QuoteStatus::Pending => "PENDING",
            QuoteStatus::Accepted => "ACCEPTED",
            QuoteStatus::Rejected => "REJECTED",
            QuoteStatus::Expired => "EXPIRED",
            QuoteStatus::Converted => "CONVERTED",
        }
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Quote
// =============================================================================

/// Input for a new quote.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewQuote {
    /// Existing customer account, if any.
    pub customer_id: Option<String>,
    /// Prospect details when there is no customer account.
    pub contact: Option<ContactSnapshot>,
    pub lines: Vec<LineItemInput>,
    #[ts(as = "String")]
    pub valid_until: NaiveDate,
    /// Customer-submitted requests start PENDING instead of DRAFT.
    #[serde(default)]
    pub requested_by_customer: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: String,
    /// Human-readable number (e.g., "QUO-2026-00007")
    pub quote_number: String,
    pub customer_id: Option<String>,
    pub contact: Option<ContactSnapshot>,
    pub lines: Vec<LineItem>,
    pub vat_rate: TaxRate,
    pub totals: Totals,
    #[ts(as = "String")]
    pub valid_until: NaiveDate,
    pub status: QuoteStatus,
    /// Set once, on conversion.
    pub order_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Quote {
    pub fn create(
        id: String,
        quote_number: String,
        input: NewQuote,
        settings: &LedgerSettings,
        now: DateTime<Utc>,
    ) -> CoreResult<Quote> {
        match (&input.customer_id, &input.contact) {
            (Some(customer_id), _) if !customer_id.trim().is_empty() => {}
            (_, Some(contact)) => {
                validate_text("contact name", &contact.name, 200)?;
                validate_email(&contact.email)?;
            }
            _ => return Err(ValidationError::required("customer or contact").into()),
        }

        if input.valid_until < now.date_naive() {
            return Err(ValidationError::InvalidFormat {
                field: "valid_until".to_string(),
                reason: "must not be in the past".to_string(),
            }
            .into());
        }

        let lines = build_lines(input.lines)?;
        let totals = Totals::undiscounted(&lines, settings.vat_rate);
        let status = if input.requested_by_customer {
            QuoteStatus::Pending
        } else {
            QuoteStatus::Draft
        };

        Ok(Quote {
            id,
            quote_number,
            customer_id: input.customer_id.filter(|c| !c.trim().is_empty()),
            contact: input.contact,
            lines,
            vat_rate: settings.vat_rate,
            totals,
            valid_until: input.valid_until,
            status,
            order_id: None,
            rejection_reason: None,
            notes: input.notes.filter(|n| !n.trim().is_empty()),
            created_at: now,
            updated_at: now,
            version: 1,
        })
    }

    /// Past validity. The `valid_until` date itself is still valid.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        today > self.valid_until
    }

    /// Moves the quote to `to`.
    ///
    /// ## Errors
    /// - `QuoteExpired` when accepting past `valid_until`
    /// - `MissingReason` for REJECTED; use [`Quote::reject`]
    /// - `InvalidTransition` for anything outside the table, and for CONVERTED
    pub fn transition(&mut self, to: QuoteStatus, now: DateTime<Utc>) -> CoreResult<()> {
        if to == QuoteStatus::Accepted && self.is_expired(now.date_naive()) {
            return Err(self.expired_error());
        }
        if to == QuoteStatus::Converted || !self.status.allowed_transitions().contains(&to) {
            return Err(self.invalid_transition(to));
        }
        if to == QuoteStatus::Rejected {
            return Err(CoreError::missing_reason("quote rejection"));
        }

        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Rejects the quote with a reason.
    pub fn reject(&mut self, reason: &str, now: DateTime<Utc>) -> CoreResult<()> {
        if !self
            .status
            .allowed_transitions()
            .contains(&QuoteStatus::Rejected)
        {
            return Err(self.invalid_transition(QuoteStatus::Rejected));
        }
        let reason = validate_reason(Some(reason), "quote rejection")?;

        self.status = QuoteStatus::Rejected;
        self.rejection_reason = Some(reason);
        self.updated_at = now;
        Ok(())
    }

    /// Replaces every line and recomputes totals.
    pub fn replace_lines(&mut self, inputs: Vec<LineItemInput>, now: DateTime<Utc>) -> CoreResult<()> {
        if !self.status.is_editable() {
            return Err(CoreError::DocumentLocked {
                document: DocumentKind::Quote,
                number: self.quote_number.clone(),
                status: self.status.to_string(),
            });
        }

        let lines = build_lines(inputs)?;
        self.totals = Totals::undiscounted(&lines, self.vat_rate);
        self.lines = lines;
        self.updated_at = now;
        Ok(())
    }

    /// Expires an open quote past its validity. Returns whether it changed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_open() && self.is_expired(now.date_naive()) {
            self.status = QuoteStatus::Expired;
            self.updated_at = now;
            return true;
        }
        false
    }

    /// Checks that the quote can become an order.
    ///
    /// ## Order of Checks
    /// 1. Already converted
    /// 2. Expired
    /// 3. Status is PENDING or ACCEPTED
    /// 4. A customer account is attached
    pub fn ensure_convertible(&self, today: NaiveDate) -> CoreResult<&str> {
        if let Some(order_id) = &self.order_id {
            return Err(CoreError::AlreadyConverted {
                number: self.quote_number.clone(),
                order_id: order_id.clone(),
            });
        }
        if self.is_expired(today) {
            return Err(self.expired_error());
        }
        if !matches!(self.status, QuoteStatus::Pending | QuoteStatus::Accepted) {
            return Err(self.invalid_transition(QuoteStatus::Converted));
        }
        self.customer_id
            .as_deref()
            .ok_or_else(|| ValidationError::required("customer_id").into())
    }

    pub(crate) fn mark_converted(&mut self, order_id: &str, now: DateTime<Utc>) {
        self.status = QuoteStatus::Converted;
        self.order_id = Some(order_id.to_string());
        self.updated_at = now;
    }

    pub fn verify_totals(&self) -> Result<(), InvariantViolation> {
        let recomputed = Totals::undiscounted(&self.lines, self.vat_rate);
        self.totals
            .verify(&recomputed, DocumentKind::Quote, &self.quote_number)
    }

    fn expired_error(&self) -> CoreError {
        CoreError::QuoteExpired {
            number: self.quote_number.clone(),
            valid_until: self.valid_until,
        }
    }

    fn invalid_transition(&self, to: QuoteStatus) -> CoreError {
        CoreError::InvalidTransition {
            document: DocumentKind::Quote,
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn quote(requested: bool) -> Quote {
        let input = NewQuote {
            customer_id: Some("cust-1".to_string()),
            contact: None,
            lines: vec![LineItemInput::custom("Install", 2, Money::from_cents(50_000))],
            valid_until: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            requested_by_customer: requested,
            notes: None,
        };
        Quote::create(
            "q-1".to_string(),
            "QUO-2026-00001".to_string(),
            input,
            &LedgerSettings::default(),
            now(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_requires_party() {
        let input = NewQuote {
            customer_id: None,
            contact: None,
            lines: vec![LineItemInput::custom("Install", 1, Money::from_cents(100))],
            valid_until: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            requested_by_customer: false,
            notes: None,
        };
        let settings = LedgerSettings::default();
        assert!(Quote::create("q".into(), "QUO-2026-00002".into(), input.clone(), &settings, now()).is_err());

        let with_contact = NewQuote {
            contact: Some(ContactSnapshot {
                name: "Jo Prospect".to_string(),
                email: "jo@prospect.test".to_string(),
                phone: None,
                company: None,
            }),
            ..input
        };
        let quote = Quote::create("q".into(), "QUO-2026-00002".into(), with_contact, &settings, now()).unwrap();
        assert_eq!(quote.status, QuoteStatus::Draft);
        assert_eq!(quote.totals.total.cents(), 115);
    }

    #[test]
    fn test_forward_path() {
        let mut q = quote(false);
        q.transition(QuoteStatus::Sent, now()).unwrap();
        q.transition(QuoteStatus::Viewed, now()).unwrap();
        q.transition(QuoteStatus::Accepted, now()).unwrap();
        assert!(q.transition(QuoteStatus::Converted, now()).is_err());
        assert!(matches!(
            q.replace_lines(vec![LineItemInput::custom("x", 1, Money::zero())], now()),
            Err(CoreError::DocumentLocked { .. })
        ));
    }

    #[test]
    fn test_draft_cannot_be_accepted() {
        let mut q = quote(false);
        assert!(matches!(
            q.transition(QuoteStatus::Accepted, now()),
            Err(CoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_accept_after_validity_fails() {
        let mut q = quote(true);
        let valid_day = now() + Duration::days(30); // 2026-03-31
        let day_after = now() + Duration::days(31);

        let mut on_last_day = q.clone();
        assert!(on_last_day.transition(QuoteStatus::Accepted, valid_day).is_ok());

        assert!(matches!(
            q.transition(QuoteStatus::Accepted, day_after),
            Err(CoreError::QuoteExpired { .. })
        ));
    }

    #[test]
    fn test_reject_requires_reason() {
        let mut q = quote(true);
        assert!(matches!(
            q.transition(QuoteStatus::Rejected, now()),
            Err(CoreError::MissingReason { .. })
        ));
        assert!(matches!(q.reject("", now()), Err(CoreError::MissingReason { .. })));

        q.reject("Budget cut", now()).unwrap();
        assert_eq!(q.status, QuoteStatus::Rejected);
        assert_eq!(q.rejection_reason.as_deref(), Some("Budget cut"));
        assert!(q.reject("again", now()).is_err());
    }

    #[test]
    fn test_expire_sweep_is_idempotent() {
        let mut q = quote(false);
        q.transition(QuoteStatus::Sent, now()).unwrap();

        let later = now() + Duration::days(45);
        assert!(q.expire_if_due(later));
        assert_eq!(q.status, QuoteStatus::Expired);
        assert!(!q.expire_if_due(later));

        let mut draft = quote(false);
        assert!(!draft.expire_if_due(later));
        assert_eq!(draft.status, QuoteStatus::Draft);
    }

    #[test]
    fn test_convertible_checks() {
        let q = quote(false);
        assert!(matches!(
            q.ensure_convertible(now().date_naive()),
            Err(CoreError::InvalidTransition { .. })
        ));

        let mut pending = quote(true);
        assert_eq!(pending.ensure_convertible(now().date_naive()).unwrap(), "cust-1");

        pending.mark_converted("ord-9", now());
        assert!(matches!(
            pending.ensure_convertible(now().date_naive()),
            Err(CoreError::AlreadyConverted { .. })
        ));
    }
}
