//! Session context shared by the aggregator, the predicates and the polling loop.
//!
//! Holds the only mutable state of a desk session:
//! - current snapshot, guarded by a monotonic refresh sequence (late results never
//!   overwrite newer ones);
//! - amount form with its one-time pre-fill;
//! - loading flag, loop state, payment balance, allowance flag;
//! - transaction log (most recent first, append only);
//! - event side channel (`tokio::sync::broadcast`).

use std::sync::atomic::{AtomicU64, Ordering};

use ethers::types::{Address, TxHash};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::amounts::{AmountForm, AmountPair};
use crate::eligibility::{self, Eligibility, EligibilityContext};
use crate::snapshot::SaleSnapshot;
use crate::units::Decimal;

const EVENT_BUFFER: usize = 64;

/// Polling loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    Idle,
    Refreshing,
    AwaitingConfirmation,
}

/// Submitted transaction as shown in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub hash: TxHash,
    pub label: String,
}

/// Side-channel notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SnapshotApplied { seq: u64 },
    RefreshFailed { error: String },
    AllowanceChecked { approved: bool },
    TransactionSubmitted { record: TransactionRecord },
    TransactionConfirmed { hash: TxHash, block: u64 },
    TransactionFailed { label: String, error: String },
}

struct State {
    account: Option<Address>,
    snapshot: SaleSnapshot,
    applied_seq: u64,
    form: AmountForm,
    amount_initialized: bool,
    loading: bool,
    loop_state: LoopState,
    payment_balance: Decimal,
    approved: bool,
    transactions: Vec<TransactionRecord>,
}

pub struct Session {
    sale: Address,
    state: RwLock<State>,
    issued_seq: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn new(sale: Address) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            sale,
            state: RwLock::new(State {
                account: None,
                snapshot: SaleSnapshot::unset(sale),
                applied_seq: 0,
                form: AmountForm::default(),
                amount_initialized: false,
                loading: true,
                loop_state: LoopState::Idle,
                payment_balance: Decimal::zero(),
                approved: false,
                transactions: Vec::new(),
            }),
            issued_seq: AtomicU64::new(0),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, ev: SessionEvent) {
        // no receivers is fine
        let _ = self.events.send(ev);
    }

    // ---------- queries ----------

    pub fn snapshot(&self) -> SaleSnapshot {
        self.state.read().snapshot.clone()
    }

    pub fn amount_pair(&self) -> AmountPair {
        self.state.read().form.pair().clone()
    }

    pub fn amount_input(&self) -> String {
        self.state.read().form.input().to_string()
    }

    pub fn account(&self) -> Option<Address> {
        self.state.read().account
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }

    pub fn loop_state(&self) -> LoopState {
        self.state.read().loop_state
    }

    pub fn payment_balance(&self) -> Decimal {
        self.state.read().payment_balance.clone()
    }

    pub fn is_approved(&self) -> bool {
        self.state.read().approved
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.state.read().transactions.clone()
    }

    fn context(state: &State) -> EligibilityContext {
        EligibilityContext {
            loading: state.loading,
            has_account: state.account.is_some(),
        }
    }

    pub fn can_invest(&self) -> bool {
        let st = self.state.read();
        eligibility::can_invest(&st.snapshot, Self::context(&st))
    }

    pub fn can_claim(&self) -> bool {
        let st = self.state.read();
        eligibility::can_claim(&st.snapshot, Self::context(&st))
    }

    pub fn is_sold_out(&self) -> bool {
        let st = self.state.read();
        eligibility::is_sold_out(&st.snapshot, Self::context(&st))
    }

    pub fn eligibility(&self) -> Eligibility {
        let st = self.state.read();
        Eligibility::evaluate(&st.snapshot, Self::context(&st))
    }

    // ---------- input handlers ----------

    pub fn on_payment_amount_live_edit(&self, text: &str) {
        let mut st = self.state.write();
        let State { form, snapshot, .. } = &mut *st;
        form.live_edit(text, snapshot);
    }

    pub fn on_payment_amount_finalize(&self, text: &str) {
        let mut st = self.state.write();
        let State { form, snapshot, .. } = &mut *st;
        form.finalize(text, snapshot);
    }

    // ---------- mutation (desk internals) ----------

    pub(crate) fn set_loading(&self, loading: bool) {
        self.state.write().loading = loading;
    }

    pub(crate) fn set_loop_state(&self, next: LoopState) {
        let mut st = self.state.write();
        debug!(from = ?st.loop_state, to = ?next, "loop state");
        st.loop_state = next;
    }

    /// Moves `from` → `to` only if the loop is currently in `from`.
    pub(crate) fn transition(&self, from: LoopState, to: LoopState) -> bool {
        let mut st = self.state.write();
        if st.loop_state != from {
            return false;
        }
        st.loop_state = to;
        true
    }

    /// Switches the session to `account`; a different account drops the snapshot.
    pub(crate) fn set_account(&self, account: Option<Address>) {
        let mut st = self.state.write();
        if st.account != account {
            st.snapshot = SaleSnapshot::unset(self.sale);
            st.payment_balance = Decimal::zero();
            st.approved = false;
        }
        st.account = account;
    }

    /// Sequence number for a refresh about to start.
    pub(crate) fn begin_refresh(&self) -> u64 {
        self.issued_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publishes `snapshot` if `seq` is newer than the applied one. The form is
    /// pre-filled with the phase cap the first time a snapshot makes the account eligible.
    pub(crate) fn apply_snapshot(&self, seq: u64, snapshot: SaleSnapshot) -> bool {
        let mut st = self.state.write();
        if seq <= st.applied_seq {
            debug!(seq, applied = st.applied_seq, "stale snapshot discarded");
            return false;
        }
        if !st.amount_initialized {
            let prefill = if snapshot.is_private_phase() && snapshot.is_whitelisted {
                Some(snapshot.max_per_account_private.clone())
            } else if snapshot.is_public_phase() && !snapshot.is_whitelisted && !snapshot.is_closed
            {
                Some(snapshot.max_per_account_public.clone())
            } else {
                None
            };
            if let Some(cap) = prefill {
                st.amount_initialized = true;
                st.form
                    .set_pair(AmountPair::for_sale_amount(cap, &snapshot));
            }
        }
        st.snapshot = snapshot;
        st.applied_seq = seq;
        drop(st);
        self.emit(SessionEvent::SnapshotApplied { seq });
        true
    }

    pub(crate) fn set_payment_balance(&self, balance: Decimal) {
        self.state.write().payment_balance = balance;
    }

    pub(crate) fn set_approved(&self, approved: bool) {
        self.state.write().approved = approved;
        self.emit(SessionEvent::AllowanceChecked { approved });
    }

    pub(crate) fn record_transaction(&self, record: TransactionRecord) {
        self.state.write().transactions.insert(0, record.clone());
        self.emit(SessionEvent::TransactionSubmitted { record });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SalePhase;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn private_whitelisted(cap: &str) -> SaleSnapshot {
        let mut s = SaleSnapshot::unset(Address::zero());
        s.phase = SalePhase::Private;
        s.is_whitelisted = true;
        s.is_closed = false;
        s.price_in_quote = d("0.5");
        s.max_per_account_private = d(cap);
        s
    }

    #[test]
    fn first_snapshot_prefills_once() {
        let session = Session::new(Address::zero());
        let seq = session.begin_refresh();
        assert!(session.apply_snapshot(seq, private_whitelisted("300")));
        assert_eq!(
            session.amount_pair(),
            AmountPair {
                pay_amount: d("150"),
                sale_amount: d("300")
            }
        );

        let seq = session.begin_refresh();
        assert!(session.apply_snapshot(seq, private_whitelisted("900")));
        assert_eq!(session.amount_pair().sale_amount, d("300"));
        assert_eq!(session.snapshot().max_per_account_private, d("900"));
    }

    #[test]
    fn public_buyer_prefills_public_cap() {
        let session = Session::new(Address::zero());
        let mut s = private_whitelisted("300");
        s.phase = SalePhase::Public;
        s.is_whitelisted = false;
        s.max_per_account_public = d("40");
        let seq = session.begin_refresh();
        session.apply_snapshot(seq, s);
        assert_eq!(session.amount_pair().sale_amount, d("40"));
        assert_eq!(session.amount_input(), "20");
    }

    #[test]
    fn ineligible_snapshot_defers_prefill() {
        let session = Session::new(Address::zero());
        let mut s = private_whitelisted("300");
        s.is_whitelisted = false;
        let seq = session.begin_refresh();
        session.apply_snapshot(seq, s);
        assert_eq!(session.amount_pair(), AmountPair::default());

        // whitelisted later: pre-filled then, and only then
        let seq = session.begin_refresh();
        session.apply_snapshot(seq, private_whitelisted("300"));
        assert_eq!(session.amount_pair().sale_amount, d("300"));

        let seq = session.begin_refresh();
        session.apply_snapshot(seq, private_whitelisted("500"));
        assert_eq!(session.amount_pair().sale_amount, d("300"));
    }

    #[test]
    fn closed_public_sale_prefills_once_it_opens() {
        let session = Session::new(Address::zero());
        let mut s = private_whitelisted("300");
        s.phase = SalePhase::Public;
        s.is_whitelisted = false;
        s.max_per_account_public = d("40");
        s.is_closed = true;
        let seq = session.begin_refresh();
        session.apply_snapshot(seq, s.clone());
        assert_eq!(session.amount_pair(), AmountPair::default());

        s.is_closed = false;
        let seq = session.begin_refresh();
        session.apply_snapshot(seq, s);
        assert_eq!(session.amount_pair().sale_amount, d("40"));
        assert_eq!(session.amount_input(), "20");
    }

    #[test]
    fn late_refresh_cannot_overwrite_newer_snapshot() {
        let session = Session::new(Address::zero());
        let first = session.begin_refresh();
        let second = session.begin_refresh();
        assert!(session.apply_snapshot(second, private_whitelisted("700")));
        assert!(!session.apply_snapshot(first, private_whitelisted("100")));
        assert_eq!(session.snapshot().max_per_account_private, d("700"));
    }

    #[test]
    fn transactions_are_most_recent_first() {
        let session = Session::new(Address::zero());
        let mut events = session.subscribe();
        for i in 1..=3u64 {
            session.record_transaction(TransactionRecord {
                hash: TxHash::from_low_u64_be(i),
                label: format!("tx {i}"),
            });
        }
        let labels: Vec<_> = session.transactions().into_iter().map(|t| t.label).collect();
        assert_eq!(labels, ["tx 3", "tx 2", "tx 1"]);
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::TransactionSubmitted { .. })
        ));
    }

    #[test]
    fn switching_account_drops_snapshot() {
        let session = Session::new(Address::zero());
        session.set_account(Some(Address::repeat_byte(1)));
        let seq = session.begin_refresh();
        session.apply_snapshot(seq, private_whitelisted("300"));
        session.set_account(Some(Address::repeat_byte(1)));
        assert!(!session.snapshot().max_per_account_private.is_zero());
        session.set_account(Some(Address::repeat_byte(2)));
        assert!(session.snapshot().max_per_account_private.is_zero());
    }

    #[test]
    fn predicates_follow_loading_flag() {
        let session = Session::new(Address::zero());
        session.set_account(Some(Address::repeat_byte(1)));
        let seq = session.begin_refresh();
        session.apply_snapshot(seq, private_whitelisted("300"));
        assert!(session.is_loading());
        assert!(!session.can_invest());
        session.set_loading(false);
        assert!(session.can_invest());
        assert!(!session.is_sold_out());
        assert!(!session.can_claim());
    }

    #[test]
    fn loop_transition_is_conditional() {
        let session = Session::new(Address::zero());
        assert!(session.transition(LoopState::Idle, LoopState::Refreshing));
        assert!(!session.transition(LoopState::Idle, LoopState::Refreshing));
        session.set_loop_state(LoopState::AwaitingConfirmation);
        assert!(!session.transition(LoopState::Refreshing, LoopState::Idle));
        assert_eq!(session.loop_state(), LoopState::AwaitingConfirmation);
    }
}
