//! Investment form: the linked payment/sale amounts.
//!
//! Two-tier input handling:
//! - live edit: recompute the sale amount for every valid positive input, no clamping;
//!   invalid or non-positive text is kept as typed and the derived amount is left alone;
//! - finalize: empty/negative/invalid text resets both amounts, anything implying more
//!   than the phase cap is clamped to the cap and its priced equivalent.

use serde::Serialize;
use thiserror::Error;

use crate::snapshot::SaleSnapshot;
use crate::units::Decimal;

/// Payment amount and the sale-token amount it buys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AmountPair {
    pub pay_amount: Decimal,
    pub sale_amount: Decimal,
}

impl AmountPair {
    /// Pair for `sale_amount` sale tokens at the snapshot price.
    pub fn for_sale_amount(sale_amount: Decimal, snap: &SaleSnapshot) -> Self {
        Self {
            pay_amount: sale_amount.mul(&snap.price_in_quote),
            sale_amount,
        }
    }
}

/// Form state: raw payment text plus the derived pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AmountForm {
    input: String,
    pair: AmountPair,
}

/// `pay / price`; zero while the price is unknown.
fn sale_for(pay: &Decimal, snap: &SaleSnapshot) -> Decimal {
    pay.checked_div(&snap.price_in_quote).unwrap_or_default()
}

impl AmountForm {
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn pair(&self) -> &AmountPair {
        &self.pair
    }

    pub fn reset(&mut self) {
        self.set_pair(AmountPair::default());
    }

    pub fn set_pair(&mut self, pair: AmountPair) {
        self.input = pair.pay_amount.to_string();
        self.pair = pair;
    }

    pub fn live_edit(&mut self, text: &str, snap: &SaleSnapshot) {
        self.input = text.to_string();
        match text.parse::<Decimal>() {
            Ok(pay) if !pay.is_zero() => {
                self.pair = AmountPair {
                    sale_amount: sale_for(&pay, snap),
                    pay_amount: pay,
                };
            }
            _ => {}
        }
    }

    pub fn finalize(&mut self, text: &str, snap: &SaleSnapshot) {
        let pay = match text.parse::<Decimal>() {
            Ok(pay) => pay,
            Err(_) => return self.reset(),
        };
        let cap = snap.phase_cap();
        let max_pay = cap.mul(&snap.price_in_quote);
        if pay > max_pay {
            self.set_pair(AmountPair::for_sale_amount(cap.clone(), snap));
        } else {
            self.set_pair(AmountPair {
                sale_amount: sale_for(&pay, snap),
                pay_amount: pay,
            });
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DepositError {
    #[error("could not read the investment amount `{0}`")]
    InvalidAmount(String),
    #[error("cannot invest zero")]
    ZeroAmount,
    #[error("balance {balance} is less than {amount}")]
    InsufficientBalance { amount: Decimal, balance: Decimal },
    #[error("{amount} is above the maximum of {max}")]
    AboveMaximum { amount: Decimal, max: Decimal },
}

/// Checks a payment amount before it is turned into a purchase.
pub fn validate_purchase(
    input: &str,
    balance: &Decimal,
    snap: &SaleSnapshot,
) -> Result<Decimal, DepositError> {
    let amount: Decimal = input
        .parse()
        .map_err(|_| DepositError::InvalidAmount(input.to_string()))?;
    if amount.is_zero() {
        return Err(DepositError::ZeroAmount);
    }
    if &amount > balance {
        return Err(DepositError::InsufficientBalance {
            amount,
            balance: balance.clone(),
        });
    }
    let max = snap.phase_cap().mul(&snap.price_in_quote);
    if amount > max {
        return Err(DepositError::AboveMaximum { amount, max });
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SalePhase;
    use ethers::types::Address;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn private_snap() -> SaleSnapshot {
        let mut s = SaleSnapshot::unset(Address::zero());
        s.phase = SalePhase::Private;
        s.is_whitelisted = true;
        s.is_closed = false;
        s.price_in_quote = d("2000");
        s.max_per_account_private = d("500");
        s.max_per_account_public = d("50");
        s
    }

    #[test]
    fn finalize_at_cap_keeps_amount() {
        let snap = private_snap();
        let mut form = AmountForm::default();
        form.finalize("1000000", &snap);
        assert_eq!(form.pair().sale_amount, d("500"));
        assert_eq!(form.pair().pay_amount, d("1000000"));
    }

    #[test]
    fn finalize_above_cap_clamps() {
        let snap = private_snap();
        let mut form = AmountForm::default();
        form.finalize("5000000", &snap);
        assert_eq!(form.pair().sale_amount, d("500"));
        assert_eq!(form.pair().pay_amount, d("1000000"));
        assert_eq!(form.input(), "1000000");
    }

    #[test]
    fn finalize_uses_public_cap_in_public_phase() {
        let mut snap = private_snap();
        snap.phase = SalePhase::Public;
        let mut form = AmountForm::default();
        form.finalize("150000", &snap);
        assert_eq!(form.pair().sale_amount, d("50"));
        assert_eq!(form.pair().pay_amount, d("100000"));
    }

    #[test]
    fn finalize_resets_on_empty_negative_or_garbage() {
        let snap = private_snap();
        for text in ["", "-10", "abc"] {
            let mut form = AmountForm::default();
            form.live_edit("4000", &snap);
            form.finalize(text, &snap);
            assert_eq!(form.pair(), &AmountPair::default(), "input {text:?}");
            assert_eq!(form.input(), "0");
        }
    }

    #[test]
    fn live_edit_recomputes_without_clamping() {
        let snap = private_snap();
        let mut form = AmountForm::default();
        form.live_edit("9000000", &snap);
        assert_eq!(form.pair().sale_amount, d("4500"));
        assert_eq!(form.pair().pay_amount, d("9000000"));
    }

    #[test]
    fn live_edit_keeps_partial_text() {
        let snap = private_snap();
        let mut form = AmountForm::default();
        form.live_edit("3000", &snap);
        form.live_edit("3000.", &snap);
        assert_eq!(form.pair().sale_amount, d("1.5"));
        form.live_edit("", &snap);
        assert_eq!(form.input(), "");
        assert_eq!(form.pair().sale_amount, d("1.5"));
        form.live_edit("0", &snap);
        assert_eq!(form.pair().pay_amount, d("3000"));
    }

    #[test]
    fn unknown_price_yields_zero_sale_amount() {
        let snap = SaleSnapshot::unset(Address::zero());
        let mut form = AmountForm::default();
        form.live_edit("10", &snap);
        assert!(form.pair().sale_amount.is_zero());
    }

    #[test]
    fn purchase_validation_order() {
        let snap = private_snap();
        let balance = d("2000000");
        assert_eq!(
            validate_purchase("x", &balance, &snap),
            Err(DepositError::InvalidAmount("x".into()))
        );
        assert_eq!(validate_purchase("0", &balance, &snap), Err(DepositError::ZeroAmount));
        assert!(matches!(
            validate_purchase("3000000", &balance, &snap),
            Err(DepositError::InsufficientBalance { .. })
        ));
        assert!(matches!(
            validate_purchase("1500000", &balance, &snap),
            Err(DepositError::AboveMaximum { .. })
        ));
        assert_eq!(validate_purchase("1000000", &balance, &snap), Ok(d("1000000")));
    }
}
