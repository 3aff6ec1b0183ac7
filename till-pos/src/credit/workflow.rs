//! The per-terminal card authorization workflow.
//!
//! One [`CardWorkflow`] lives on each terminal. It serializes card
//! activity on that lane (`in_progress` is the single-flight guard),
//! decides between preauth and straight authorization, talks to the
//! backend with a hard connect timeout, and finalizes exactly once into
//! tender payments plus a batch record.

use std::time::Duration;

use common::money::Money;
use common::time_info::TimeInfo;
use tokio::time::timeout;
use tracing::{info, warn};

use super::backend::{AuthBackend, AuthOutcome, AuthRequest, BackendAction};
use super::batch::AuthRecord;
use super::{CardType, Credit, CreditStatus, VERB_NO_CARD_INFO};
use crate::checks::payment::{Payment, TenderType};
use crate::error::{PosError, PosResult};
use crate::settings::Settings;

/// Workflow actions, in the order the UI presents them.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum AuthAction {
    #[default]
    None,
    /// Deciding between preauth and full auth.
    Pick,
    PreAuth,
    Complete,
    Authorize,
    Advice,
    Void,
    Refund,
    RefundCorrect,
}

impl AuthAction {
    fn backend_action(self) -> Option<BackendAction> {
        match self {
            Self::None | Self::Pick => None,
            Self::PreAuth => Some(BackendAction::PreAuth),
            Self::Complete => Some(BackendAction::Complete),
            Self::Authorize => Some(BackendAction::Authorize),
            Self::Advice => Some(BackendAction::Advice),
            Self::Void => Some(BackendAction::Void),
            Self::Refund => Some(BackendAction::Refund),
            Self::RefundCorrect => Some(BackendAction::RefundCorrect),
        }
    }
}

/// Card state pending on one terminal.
#[derive(Default)]
pub struct CardWorkflow {
    pub credit: Option<Credit>,
    pub action: AuthAction,
    /// The single-flight guard; a second transaction cannot start while
    /// one is on the wire.
    pub in_progress: bool,
    pub auth_amount: Money,
    /// Status line for the card dialog.
    pub auth_message: Option<String>,
    /// Voice-auth code being keyed in, if any.
    pub auth_voice: Option<String>,
    /// Subcheck number awaiting this card's tender.
    pub pending_subcheck: Option<u32>,
    /// Set after a "no card information" failure; the dialog offers a
    /// connection reset (`ccqterminate`).
    pub offer_reset: bool,
}

impl CardWorkflow {
    pub fn is_idle(&self) -> bool {
        self.credit.is_none() && !self.in_progress
    }

    /// Accepts a swipe and, when auto-authorize is on and the card looks
    /// good, picks the opening action per store policy: debit lanes,
    /// stores without preauth, and subchecks that already carry a tip go
    /// straight to a full authorization; everything else preauths.
    pub fn begin(
        &mut self,
        credit: Credit,
        amount: Money,
        subcheck: u32,
        tip_already_present: bool,
        settings: &Settings,
        now: TimeInfo,
    ) -> PosResult<()> {
        if self.in_progress {
            return Err(PosError::State("card transaction already running"));
        }
        self.auth_amount = amount;
        self.pending_subcheck = Some(subcheck);
        self.offer_reset = false;

        let auto = settings.auto_authorize
            && credit.card_is_valid()
            && !credit.is_expired(now)
            && credit.untouched();
        self.action = if !auto {
            AuthAction::Pick
        } else if credit.card_type == CardType::Debit
            || !settings.allow_cc_preauth
            || tip_already_present
        {
            AuthAction::Authorize
        } else {
            AuthAction::PreAuth
        };
        self.credit = Some(credit);
        Ok(())
    }

    /// Operator picked preauth or full auth from the dialog.
    pub fn pick(&mut self, preauth: bool) -> PosResult<()> {
        if self.action != AuthAction::Pick {
            return Err(PosError::State("no pick pending"));
        }
        self.action = if preauth {
            AuthAction::PreAuth
        } else {
            AuthAction::Authorize
        };
        Ok(())
    }

    /// Adds a tip. On a preauthorized card with auto-complete policy the
    /// workflow advances to completion.
    pub fn add_tip(
        &mut self,
        tip: Money,
        settings: &Settings,
    ) -> PosResult<()> {
        let credit = self
            .credit
            .as_mut()
            .ok_or(PosError::State("no card pending"))?;
        credit.tip = tip;
        if credit.status == CreditStatus::PreAuthed && settings.auto_authorize
        {
            self.action = AuthAction::Complete;
        }
        Ok(())
    }

    /// Runs the pending action against the backend. Non-blocking toward
    /// the UI: the caller runs this on the terminal's own task while the
    /// dialog shows `auth_message` and refuses input.
    pub async fn run(
        &mut self,
        backend: &dyn AuthBackend,
        settings: &Settings,
        now: TimeInfo,
    ) -> PosResult<()> {
        if self.in_progress {
            return Err(PosError::State("card transaction already running"));
        }
        let action = self.action;
        let backend_action = action
            .backend_action()
            .ok_or(PosError::State("no action to run"))?;
        let credit = self
            .credit
            .as_mut()
            .ok_or(PosError::State("no card pending"))?;

        // Completion charges cost plus tip; everything else charges the
        // amount the action was opened with.
        let amount = match action {
            AuthAction::Complete | AuthAction::Authorize =>
                self.auth_amount + credit.tip,
            _ => self.auth_amount,
        };

        let request = AuthRequest {
            action: backend_action,
            amount,
            pan: credit.pan_for_request().to_owned(),
            expiry: credit.expiry.clone(),
            termid: credit.termid.clone(),
            batch_id: credit.batch_id,
        };

        self.in_progress = true;
        self.auth_message = Some(format!(
            "Processing {}...",
            backend_action.wire_name()
        ));
        let deadline = Duration::from_secs(settings.cc_connect_timeout);
        let result = timeout(deadline, backend.request(request)).await;
        self.in_progress = false;
        self.auth_message = None;

        let outcome = match result {
            Err(_elapsed) => {
                warn!("card backend timed out after {deadline:?}");
                credit.record_failure(VERB_NO_CARD_INFO, false);
                self.offer_reset = true;
                return Err(PosError::auth(VERB_NO_CARD_INFO));
            }
            Ok(Err(e)) => {
                credit.record_failure(e.to_string(), false);
                return Err(e);
            }
            Ok(Ok(outcome)) => outcome,
        };

        match outcome {
            AuthOutcome::Approved {
                approval_code,
                avs: _,
                batch_id,
            } => {
                match action {
                    AuthAction::PreAuth => credit.record_preauth(
                        amount,
                        approval_code,
                        batch_id,
                        now,
                    )?,
                    AuthAction::Complete => credit.record_auth(
                        amount,
                        approval_code,
                        batch_id,
                        now,
                        true,
                    )?,
                    AuthAction::Authorize | AuthAction::Advice => credit
                        .record_auth(
                            amount,
                            approval_code,
                            batch_id,
                            now,
                            false,
                        )?,
                    AuthAction::Void => credit.record_void()?,
                    AuthAction::Refund | AuthAction::RefundCorrect => {
                        credit.amount = amount;
                        credit.approval_code = Some(approval_code);
                        credit.status =
                            if action == AuthAction::Refund {
                                CreditStatus::Refunded
                            } else {
                                CreditStatus::RefundCancelled
                            };
                    }
                    AuthAction::None | AuthAction::Pick => unreachable!(),
                }
                info!("card {} {action:?} approved", credit.pan_masked);
                self.action = AuthAction::None;
                Ok(())
            }
            AuthOutcome::Declined { verb } => {
                credit.record_failure(verb.clone(), true);
                Err(PosError::auth(verb))
            }
            AuthOutcome::Error { verb } => {
                credit.record_failure(verb.clone(), false);
                if verb.contains("No Card Information") {
                    self.offer_reset = true;
                }
                Err(PosError::auth(verb))
            }
        }
    }

    /// Opens a same-day void of an authorized card. Manager only.
    pub fn begin_void(&mut self, is_manager: bool) -> PosResult<()> {
        if !is_manager {
            return Err(PosError::Permission { role: "manager" });
        }
        let credit = self
            .credit
            .as_ref()
            .ok_or(PosError::State("no card pending"))?;
        if !credit.status.is_authorized() {
            return Err(PosError::State("only authorized cards void"));
        }
        self.action = AuthAction::Void;
        Ok(())
    }

    /// Opens a refund: a fresh credit for a negative amount. Manager
    /// only. `RefundCorrect` undoes a refund that hasn't batched.
    pub fn begin_refund(
        &mut self,
        credit: Credit,
        amount: Money,
        is_manager: bool,
        correcting: bool,
    ) -> PosResult<()> {
        if !is_manager {
            return Err(PosError::Permission { role: "manager" });
        }
        if self.in_progress {
            return Err(PosError::State("card transaction already running"));
        }
        self.auth_amount = -amount;
        self.credit = Some(credit);
        self.action = if correcting {
            AuthAction::RefundCorrect
        } else {
            AuthAction::Refund
        };
        Ok(())
    }

    /// Whether store policy prints a slip for the action just
    /// completed.
    pub fn receipt_wanted(
        action: AuthAction,
        settings: &Settings,
    ) -> bool {
        match action {
            AuthAction::Void => settings.void_receipt,
            AuthAction::Authorize
            | AuthAction::Complete
            | AuthAction::Advice => settings.finalauth_receipt,
            _ => false,
        }
    }

    /// Records a voice authorization keyed in by the operator.
    pub fn voice_auth(&mut self, code: String, now: TimeInfo) -> PosResult<()> {
        let credit = self
            .credit
            .as_mut()
            .ok_or(PosError::State("no card pending"))?;
        credit.record_voice_auth(code.clone(), now);
        self.auth_voice = Some(code);
        Ok(())
    }

    /// Finalizes the credit into tenders: the charged tip enters first,
    /// then the card tender for the full authorized amount. Returns the
    /// payments (in entry order) and the record for the day batch list.
    pub fn finalize(
        &mut self,
        settings: &Settings,
    ) -> PosResult<(Vec<Payment>, AuthRecord)> {
        let mut credit = self
            .credit
            .take()
            .ok_or(PosError::State("no card pending"))?;
        if let Err(e) = credit.finalize(settings.use_entire_cc_num) {
            // Leave the workflow holding the credit on failure.
            self.credit = Some(credit);
            return Err(e);
        }

        let mut payments = Vec::new();
        if !credit.tip.is_zero() {
            payments.push(Payment::new(TenderType::ChargedTip, credit.tip));
        }
        let tender = match credit.card_type {
            CardType::Credit => TenderType::CreditCard,
            CardType::Debit => TenderType::DebitCard,
        };
        let record = AuthRecord::from_credit(&credit);
        payments.push(Payment::new(tender, credit.amount).with_credit(credit));

        self.action = AuthAction::None;
        self.pending_subcheck = None;
        self.auth_amount = Money::ZERO;
        self.auth_voice = None;
        Ok((payments, record))
    }
}
