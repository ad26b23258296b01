//! Eligibility predicates over a snapshot and transient session flags.
//!
//! Stateless; recompute on every query. The per-account cap check is an
//! equality test, so a deposit above the cap would still read as investable.

use crate::snapshot::{SalePhase, SaleSnapshot};

/// Transient flags the predicates depend on besides the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EligibilityContext {
    pub loading: bool,
    pub has_account: bool,
}

/// `Some(cap reached)` when the account may take part in the current phase
/// (public and not whitelisted, or private and whitelisted), else `None`.
fn phase_cap_reached(snap: &SaleSnapshot) -> Option<bool> {
    match (snap.phase, snap.is_whitelisted) {
        (SalePhase::Public, false) => Some(snap.deposited == snap.max_per_account_public),
        (SalePhase::Private, true) => Some(snap.deposited == snap.max_per_account_private),
        _ => None,
    }
}

pub fn can_claim(snap: &SaleSnapshot, ctx: EligibilityContext) -> bool {
    !ctx.loading && snap.is_claim_period && !snap.deposited.is_zero()
}

pub fn can_invest(snap: &SaleSnapshot, ctx: EligibilityContext) -> bool {
    !ctx.loading
        && !snap.is_claim_period
        && !snap.is_closed
        && phase_cap_reached(snap) == Some(false)
}

/// The account has filled its own per-account cap (not the sale-wide cap).
pub fn is_sold_out(snap: &SaleSnapshot, ctx: EligibilityContext) -> bool {
    !ctx.loading
        && ctx.has_account
        && !snap.deposited.is_zero()
        && phase_cap_reached(snap) == Some(true)
}

/// All three predicates at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Eligibility {
    pub can_invest: bool,
    pub can_claim: bool,
    pub is_sold_out: bool,
}

impl Eligibility {
    pub fn evaluate(snap: &SaleSnapshot, ctx: EligibilityContext) -> Self {
        Self {
            can_invest: can_invest(snap, ctx),
            can_claim: can_claim(snap, ctx),
            is_sold_out: is_sold_out(snap, ctx),
        }
    }
}
