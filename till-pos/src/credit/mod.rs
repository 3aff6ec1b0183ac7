//! Credit / debit card records.
//!
//! A [`Credit`] is the auditable state of one card attempt, from swipe or
//! manual entry through authorization to settlement (or any of the
//! failure exits). Authorization timestamps are set exactly once; after
//! [`Credit::finalize`] the PAN is masked unless the store keeps entire
//! card numbers, and the record never changes again except through the
//! void / refund paths.

use common::datafile::{DataFileError, InputDataFile, OutputDataFile};
use common::money::Money;
use common::time_info::TimeInfo;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

use crate::error::{PosError, PosResult};

/// The authorization workflow.
pub mod workflow;
/// The authorization backend contract.
pub mod backend;
/// Day batches and end-of-day settlement records.
pub mod batch;

/// The card-not-present / timeout verb, preserved verbatim on receipts.
pub const VERB_NO_CARD_INFO: &str = "No Card Information Entered";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CardType {
    Credit,
    Debit,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CreditStatus {
    /// Track data captured, nothing sent yet.
    Swiped,
    /// Operator obtained a voice authorization by phone.
    Voiced,
    /// Funds held, final amount still open for tip.
    PreAuthed,
    /// Fully authorized for the final amount.
    Authorized,
    /// Preauth completed with its final amount.
    Completed,
    /// Authorization reversed same-day.
    Voided,
    Refunded,
    /// A refund undone before it batched.
    RefundCancelled,
    Declined,
    Errored,
}

impl CreditStatus {
    pub fn to_code(self) -> u8 {
        match self {
            Self::Swiped => 0,
            Self::Voiced => 1,
            Self::PreAuthed => 2,
            Self::Authorized => 3,
            Self::Completed => 4,
            Self::Voided => 5,
            Self::Refunded => 6,
            Self::RefundCancelled => 7,
            Self::Declined => 8,
            Self::Errored => 9,
        }
    }

    pub fn from_code(code: u8) -> PosResult<Self> {
        [
            Self::Swiped,
            Self::Voiced,
            Self::PreAuthed,
            Self::Authorized,
            Self::Completed,
            Self::Voided,
            Self::Refunded,
            Self::RefundCancelled,
            Self::Declined,
            Self::Errored,
        ]
        .into_iter()
        .find(|s| s.to_code() == code)
        .ok_or_else(|| {
            PosError::protocol(format!("unknown credit status code {code}"))
        })
    }

    /// Whether an authorization is on the books for this status.
    pub fn is_authorized(self) -> bool {
        matches!(self, Self::PreAuthed | Self::Authorized | Self::Completed)
    }
}

fn empty_pan() -> Secret<String> {
    Secret::new(String::new())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Credit {
    pub card_type: CardType,
    /// Full PAN until finalize masks it. Never serialized to JSON.
    #[serde(skip, default = "empty_pan")]
    pan: Secret<String>,
    /// Masked form, safe for display and persistence.
    pub pan_masked: String,
    /// `MMYY`.
    pub expiry: String,
    pub holder: String,
    pub amount: Money,
    pub tip: Money,
    pub approval_code: Option<String>,
    pub voice_auth_code: Option<String>,
    pub batch_id: Option<i64>,
    /// Terminal id the backend knows this lane as.
    pub termid: String,
    pub status: CreditStatus,
    pub preauth_time: Option<TimeInfo>,
    pub auth_time: Option<TimeInfo>,
    /// Verbs of prior failed attempts, oldest first.
    pub error_chain: Vec<String>,
    finalized: bool,
}

impl Credit {
    /// Parses magnetic track data of the form
    /// `%B<PAN>^<HOLDER>^<YYMM>...?`.
    pub fn parse_swipe(track: &str, termid: &str) -> PosResult<Self> {
        let track = track.trim();
        let body = track
            .strip_prefix("%B")
            .or_else(|| track.strip_prefix("B"))
            .ok_or_else(|| PosError::protocol("unrecognized track format"))?;
        let mut fields = body.trim_end_matches('?').split('^');
        let pan: String = fields
            .next()
            .unwrap_or_default()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        let holder = fields.next().unwrap_or_default().trim().to_owned();
        let rest = fields.next().unwrap_or_default();
        if pan.len() < 12 || rest.len() < 4 || !rest.is_ascii() {
            return Err(PosError::protocol("track data too short"));
        }
        // Track 1 carries YYMM; receipts and requests use MMYY.
        let expiry = format!("{}{}", &rest[2..4], &rest[0..2]);
        Ok(Self::manual(&pan, &expiry, &holder, termid))
    }

    /// A hand-keyed card.
    pub fn manual(
        pan: &str,
        expiry: &str,
        holder: &str,
        termid: &str,
    ) -> Self {
        let pan_masked = mask_pan(pan);
        Self {
            card_type: CardType::Credit,
            pan: Secret::new(pan.to_owned()),
            pan_masked,
            expiry: expiry.to_owned(),
            holder: holder.to_owned(),
            amount: Money::ZERO,
            tip: Money::ZERO,
            approval_code: None,
            voice_auth_code: None,
            batch_id: None,
            termid: termid.to_owned(),
            status: CreditStatus::Swiped,
            preauth_time: None,
            auth_time: None,
            error_chain: Vec::new(),
            finalized: false,
        }
    }

    /// The PAN as sent to the backend. After masking this is the masked
    /// form; requests are only made before finalize.
    pub fn pan_for_request(&self) -> &str {
        self.pan.expose_secret()
    }

    /// Basic plausibility: all digits, plausible length, expiry parses.
    pub fn card_is_valid(&self) -> bool {
        let pan = self.pan.expose_secret();
        let digits = pan.len() >= 12
            && pan.len() <= 19
            && pan.chars().all(|c| c.is_ascii_digit());
        digits && self.expiry_month().is_some()
    }

    fn expiry_month(&self) -> Option<(u32, u32)> {
        if self.expiry.len() != 4 {
            return None;
        }
        let month: u32 = self.expiry[0..2].parse().ok()?;
        let year: u32 = self.expiry[2..4].parse().ok()?;
        (1..=12).contains(&month).then_some((month, 2000 + year))
    }

    pub fn is_expired(&self, now: TimeInfo) -> bool {
        match self.expiry_month() {
            // Valid through the last day of the expiry month.
            Some((month, year)) => {
                (now.year() as u32, now.month()) > (year, month)
            }
            None => true,
        }
    }

    /// Whether any authorization has touched this record yet.
    pub fn untouched(&self) -> bool {
        matches!(self.status, CreditStatus::Swiped)
            && self.error_chain.is_empty()
    }

    pub fn total(&self) -> Money {
        self.amount
    }

    // --- Authorization results --- //

    /// Records a successful preauthorization. The preauth timestamp is
    /// set exactly once.
    pub fn record_preauth(
        &mut self,
        amount: Money,
        approval: String,
        batch: Option<i64>,
        now: TimeInfo,
    ) -> PosResult<()> {
        if self.preauth_time.is_some() {
            return Err(PosError::State("card already preauthorized"));
        }
        self.amount = amount;
        self.approval_code = Some(approval);
        self.batch_id = batch.or(self.batch_id);
        self.preauth_time = Some(now);
        self.status = CreditStatus::PreAuthed;
        Ok(())
    }

    /// Records a full authorization or a preauth completion. The auth
    /// timestamp is set exactly once.
    pub fn record_auth(
        &mut self,
        amount: Money,
        approval: String,
        batch: Option<i64>,
        now: TimeInfo,
        completing_preauth: bool,
    ) -> PosResult<()> {
        if self.auth_time.is_some() {
            return Err(PosError::State("card already authorized"));
        }
        self.amount = amount;
        self.approval_code = Some(approval);
        self.batch_id = batch.or(self.batch_id);
        self.auth_time = Some(now);
        self.status = if completing_preauth {
            CreditStatus::Completed
        } else {
            CreditStatus::Authorized
        };
        Ok(())
    }

    /// Records a voice authorization obtained by phone.
    pub fn record_voice_auth(&mut self, code: String, now: TimeInfo) {
        self.voice_auth_code = Some(code);
        if self.auth_time.is_none() {
            self.auth_time = Some(now);
        }
        self.status = CreditStatus::Voiced;
    }

    /// Appends a failed attempt. The verb stays verbatim for receipts.
    pub fn record_failure(&mut self, verb: impl Into<String>, denied: bool) {
        self.error_chain.push(verb.into());
        self.status = if denied {
            CreditStatus::Declined
        } else {
            CreditStatus::Errored
        };
    }

    pub fn record_void(&mut self) -> PosResult<()> {
        if !self.status.is_authorized() {
            return Err(PosError::State("only authorized cards can be voided"));
        }
        self.status = CreditStatus::Voided;
        Ok(())
    }

    /// Finalizes the record: called exactly once, after which the PAN is
    /// masked (unless the store keeps entire numbers).
    pub fn finalize(&mut self, keep_entire_pan: bool) -> PosResult<()> {
        if self.finalized {
            return Err(PosError::State("credit already finalized"));
        }
        if !self.status.is_authorized()
            && !matches!(self.status, CreditStatus::Voiced)
        {
            return Err(PosError::State("credit is not authorized"));
        }
        self.finalized = true;
        if !keep_entire_pan {
            self.pan = Secret::new(self.pan_masked.clone());
        }
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    // --- File I/O --- //

    pub fn write(&self, out: &mut OutputDataFile) -> Result<(), DataFileError> {
        out.put_u8(match self.card_type {
            CardType::Credit => 0,
            CardType::Debit => 1,
        })?;
        // Only the masked form is ever persisted.
        out.put_str(&self.pan_masked)?;
        out.put_str(&self.expiry)?;
        out.put_str(&self.holder)?;
        out.put_i64(self.amount.cents())?;
        out.put_i64(self.tip.cents())?;
        out.put_str(self.approval_code.as_deref().unwrap_or(""))?;
        out.put_str(self.voice_auth_code.as_deref().unwrap_or(""))?;
        out.put_i64(self.batch_id.unwrap_or(-1))?;
        out.put_str(&self.termid)?;
        out.put_u8(self.status.to_code())?;
        out.put_str(
            &self
                .preauth_time
                .map(|t| t.dir_stamp())
                .unwrap_or_default(),
        )?;
        out.put_str(
            &self.auth_time.map(|t| t.dir_stamp()).unwrap_or_default(),
        )?;
        out.put_u32(self.error_chain.len() as u32)?;
        for verb in &self.error_chain {
            out.put_str(verb)?;
        }
        out.put_bool(self.finalized)
    }

    pub fn read(input: &mut InputDataFile) -> PosResult<Self> {
        let card_type = match input.get_u8()? {
            0 => CardType::Credit,
            1 => CardType::Debit,
            code => {
                return Err(PosError::protocol(format!(
                    "unknown card type code {code}"
                )))
            }
        };
        let pan_masked = input.get_str()?;
        let expiry = input.get_str()?;
        let holder = input.get_str()?;
        let amount = Money::from_cents(input.get_i64()?);
        let tip = Money::from_cents(input.get_i64()?);
        let approval = input.get_str()?;
        let voice = input.get_str()?;
        let batch = input.get_i64()?;
        let termid = input.get_str()?;
        let status = CreditStatus::from_code(input.get_u8()?)?;
        let preauth_stamp = input.get_str()?;
        let auth_stamp = input.get_str()?;
        let errors = input.get_u32()?;
        let mut error_chain = Vec::with_capacity(errors as usize);
        for _ in 0..errors {
            error_chain.push(input.get_str()?);
        }
        let finalized = input.get_bool()?;
        Ok(Self {
            card_type,
            pan: Secret::new(pan_masked.clone()),
            pan_masked,
            expiry,
            holder,
            amount,
            tip,
            approval_code: (!approval.is_empty()).then_some(approval),
            voice_auth_code: (!voice.is_empty()).then_some(voice),
            batch_id: (batch >= 0).then_some(batch),
            termid,
            status,
            preauth_time: TimeInfo::parse_dir_stamp(&preauth_stamp),
            auth_time: TimeInfo::parse_dir_stamp(&auth_stamp),
            error_chain,
            finalized,
        })
    }
}

impl PartialEq for Credit {
    fn eq(&self, other: &Self) -> bool {
        self.pan.expose_secret() == other.pan.expose_secret()
            && self.card_type == other.card_type
            && self.pan_masked == other.pan_masked
            && self.expiry == other.expiry
            && self.holder == other.holder
            && self.amount == other.amount
            && self.tip == other.tip
            && self.approval_code == other.approval_code
            && self.voice_auth_code == other.voice_auth_code
            && self.batch_id == other.batch_id
            && self.termid == other.termid
            && self.status == other.status
            && self.preauth_time == other.preauth_time
            && self.auth_time == other.auth_time
            && self.error_chain == other.error_chain
            && self.finalized == other.finalized
    }
}

impl Clone for Credit {
    fn clone(&self) -> Self {
        Self {
            pan: Secret::new(self.pan.expose_secret().clone()),
            card_type: self.card_type,
            pan_masked: self.pan_masked.clone(),
            expiry: self.expiry.clone(),
            holder: self.holder.clone(),
            amount: self.amount,
            tip: self.tip,
            approval_code: self.approval_code.clone(),
            voice_auth_code: self.voice_auth_code.clone(),
            batch_id: self.batch_id,
            termid: self.termid.clone(),
            status: self.status,
            preauth_time: self.preauth_time,
            auth_time: self.auth_time,
            error_chain: self.error_chain.clone(),
            finalized: self.finalized,
        }
    }
}

/// `4111111111111111` → `************1111`.
pub fn mask_pan(pan: &str) -> String {
    let digits = pan.len();
    if digits <= 4 {
        return pan.to_owned();
    }
    let mut masked = "*".repeat(digits - 4);
    masked.push_str(&pan[digits - 4..]);
    masked
}

#[cfg(test)]
mod test {
    use super::*;

    fn now() -> TimeInfo {
        TimeInfo::from_ymd_hms(2026, 3, 14, 19, 0, 0).unwrap()
    }

    #[test]
    fn swipe_parses_track_one() {
        let credit = Credit::parse_swipe(
            "%B4111111111111111^DOE/JANE^29051010000000?",
            "term1",
        )
        .unwrap();
        assert_eq!(credit.pan_for_request(), "4111111111111111");
        assert_eq!(credit.holder, "DOE/JANE");
        assert_eq!(credit.expiry, "0529");
        assert!(credit.card_is_valid());
        assert!(!credit.is_expired(now()));
        assert_eq!(credit.pan_masked, "************1111");
    }

    #[test]
    fn bad_track_is_protocol_error() {
        assert!(matches!(
            Credit::parse_swipe("hello", "term1"),
            Err(PosError::Protocol(_))
        ));
        assert!(matches!(
            Credit::parse_swipe("%B41^X^2", "term1"),
            Err(PosError::Protocol(_))
        ));
    }

    #[test]
    fn auth_time_set_exactly_once() {
        let mut credit =
            Credit::manual("4111111111111111", "0529", "DOE/JANE", "term1");
        credit
            .record_auth(
                Money::from_cents(1200),
                "APPR01".into(),
                Some(7),
                now(),
                false,
            )
            .unwrap();
        assert_eq!(credit.auth_time, Some(now()));

        let again = credit.record_auth(
            Money::from_cents(1200),
            "APPR02".into(),
            None,
            now().add_minutes(5),
            false,
        );
        assert!(matches!(again, Err(PosError::State(_))));
        assert_eq!(credit.auth_time, Some(now()));
    }

    #[test]
    fn finalize_masks_pan_once() {
        let mut credit =
            Credit::manual("4111111111111111", "0529", "DOE/JANE", "term1");
        credit
            .record_auth(
                Money::from_cents(1000),
                "OK".into(),
                None,
                now(),
                false,
            )
            .unwrap();
        credit.finalize(false).unwrap();
        assert_eq!(credit.pan_for_request(), "************1111");
        assert!(matches!(
            credit.finalize(false),
            Err(PosError::State(_))
        ));
    }

    #[test]
    fn failures_accumulate_verbatim() {
        let mut credit =
            Credit::manual("4111111111111111", "0529", "DOE/JANE", "term1");
        credit.record_failure("CALL CENTER", false);
        credit.record_failure(VERB_NO_CARD_INFO, false);
        assert_eq!(credit.status, CreditStatus::Errored);
        assert_eq!(
            credit.error_chain,
            vec!["CALL CENTER".to_owned(), VERB_NO_CARD_INFO.to_owned()],
        );
        assert!(!credit.untouched());
    }

    #[test]
    fn expired_cards_detected() {
        let mut credit =
            Credit::manual("4111111111111111", "0125", "DOE/JANE", "term1");
        assert!(credit.is_expired(now()));
        credit.expiry = "0326".into();
        assert!(!credit.is_expired(now()));
        credit.expiry = "junk".into();
        assert!(credit.is_expired(now()));
    }

    #[test]
    fn file_roundtrip_persists_masked_pan_only() {
        let mut credit =
            Credit::manual("4111111111111111", "0529", "DOE/JANE", "term2");
        credit
            .record_preauth(
                Money::from_cents(1000),
                "PRE1".into(),
                Some(3),
                now(),
            )
            .unwrap();
        credit.tip = Money::from_cents(200);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credit.dat");
        let mut out = OutputDataFile::create(&path, 1).unwrap();
        credit.write(&mut out).unwrap();
        out.commit().unwrap();

        let mut input = InputDataFile::open(&path, 1, 1).unwrap();
        let loaded = Credit::read(&mut input).unwrap();
        assert_eq!(loaded.pan_masked, credit.pan_masked);
        assert_eq!(loaded.pan_for_request(), credit.pan_masked);
        assert_eq!(loaded.amount, credit.amount);
        assert_eq!(loaded.tip, credit.tip);
        assert_eq!(loaded.status, credit.status);
        assert_eq!(loaded.preauth_time, credit.preauth_time);
        assert_eq!(loaded.batch_id, Some(3));
    }
}
