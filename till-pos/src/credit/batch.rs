//! Day batch records and end-of-day settlement.
//!
//! Every finalized authorization lands in the day's [`DayBatches`]. At
//! end of day the settlement loop walks each distinct `(termid, batch)`
//! pair, runs the backend's settle request, and collects results plus
//! the void / refund / exception databases that ship with the archive.

use common::datafile::{DataFileError, InputDataFile, OutputDataFile};
use common::money::Money;
use common::time_info::TimeInfo;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::backend::{AuthBackend, AuthOutcome, AuthRequest, BackendAction};
use super::{Credit, CreditStatus};
use crate::error::PosResult;

pub const BATCH_DB_VERSION: u32 = 1;

/// One finalized authorization, as the batch list sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthRecord {
    pub termid: String,
    pub batch_id: Option<i64>,
    pub pan_masked: String,
    pub amount: Money,
    pub tip: Money,
    pub approval_code: String,
    pub auth_time: Option<TimeInfo>,
}

impl AuthRecord {
    pub fn from_credit(credit: &Credit) -> Self {
        Self {
            termid: credit.termid.clone(),
            batch_id: credit.batch_id,
            pan_masked: credit.pan_masked.clone(),
            amount: credit.amount,
            tip: credit.tip,
            approval_code: credit
                .approval_code
                .clone()
                .or(credit.voice_auth_code.clone())
                .unwrap_or_default(),
            auth_time: credit.auth_time,
        }
    }

    fn write(&self, out: &mut OutputDataFile) -> Result<(), DataFileError> {
        out.put_str(&self.termid)?;
        out.put_i64(self.batch_id.unwrap_or(-1))?;
        out.put_str(&self.pan_masked)?;
        out.put_i64(self.amount.cents())?;
        out.put_i64(self.tip.cents())?;
        out.put_str(&self.approval_code)?;
        out.put_str(
            &self.auth_time.map(|t| t.dir_stamp()).unwrap_or_default(),
        )
    }

    fn read(input: &mut InputDataFile) -> PosResult<Self> {
        let termid = input.get_str()?;
        let batch_id = input.get_i64()?;
        Ok(Self {
            termid,
            batch_id: (batch_id >= 0).then_some(batch_id),
            pan_masked: input.get_str()?,
            amount: Money::from_cents(input.get_i64()?),
            tip: Money::from_cents(input.get_i64()?),
            approval_code: input.get_str()?,
            auth_time: TimeInfo::parse_dir_stamp(&input.get_str()?),
        })
    }
}

/// Outcome of settling one `(termid, batch)` pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettleResult {
    pub termid: String,
    pub batch_id: i64,
    pub auth_count: u32,
    pub total: Money,
    /// `None` means settled clean; otherwise the backend's verb.
    pub failure: Option<String>,
}

/// The live day's credit-card state, reset by end of day.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DayBatches {
    pub auths: Vec<AuthRecord>,
    pub voids: Vec<Credit>,
    pub refunds: Vec<Credit>,
    pub exceptions: Vec<Credit>,
    pub settle_results: Vec<SettleResult>,
    /// Store-and-forward transactions cleared at the last end of day.
    pub saf_cleared: u32,
}

impl DayBatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_auth(&mut self, record: AuthRecord) {
        self.auths.push(record);
    }

    /// Files a void / refund / failed credit into the matching database.
    pub fn record_credit_outcome(&mut self, credit: Credit) {
        match credit.status {
            CreditStatus::Voided => self.voids.push(credit),
            CreditStatus::Refunded | CreditStatus::RefundCancelled => {
                self.refunds.push(credit)
            }
            CreditStatus::Declined | CreditStatus::Errored => {
                self.exceptions.push(credit)
            }
            _ => {}
        }
    }

    /// Distinct `(termid, batch)` pairs recorded during the day, in
    /// first-seen order.
    pub fn distinct_batches(&self) -> Vec<(String, i64)> {
        let mut pairs: Vec<(String, i64)> = Vec::new();
        for auth in &self.auths {
            let Some(batch_id) = auth.batch_id else { continue };
            let pair = (auth.termid.clone(), batch_id);
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
        pairs
    }

    /// Clears the store-and-forward queue, then settles every recorded
    /// batch. Results accumulate in `settle_results`; a failed batch
    /// does not stop the loop.
    pub async fn settle_day(
        &mut self,
        backend: &dyn AuthBackend,
    ) -> PosResult<()> {
        // SAF clearing precedes settlement so offline transactions are
        // on the books before their batches close.
        let saf = backend
            .request(AuthRequest {
                action: BackendAction::SafClear,
                amount: Money::ZERO,
                pan: String::new(),
                expiry: String::new(),
                termid: String::new(),
                batch_id: None,
            })
            .await;
        match saf {
            Ok(AuthOutcome::Approved { approval_code, .. }) => {
                self.saf_cleared =
                    approval_code.parse().unwrap_or(0);
                info!("SAF cleared {} transactions", self.saf_cleared);
            }
            Ok(AuthOutcome::Declined { verb })
            | Ok(AuthOutcome::Error { verb }) => {
                warn!("SAF clear failed: {verb}");
            }
            Err(e) => warn!("SAF clear failed: {e:#}"),
        }

        for (termid, batch_id) in self.distinct_batches() {
            let members: Vec<&AuthRecord> = self
                .auths
                .iter()
                .filter(|a| {
                    a.termid == termid && a.batch_id == Some(batch_id)
                })
                .collect();
            let total: Money = members.iter().map(|a| a.amount).sum();
            let auth_count = members.len() as u32;

            let outcome = backend
                .request(AuthRequest {
                    action: BackendAction::Settle,
                    amount: total,
                    pan: String::new(),
                    expiry: String::new(),
                    termid: termid.clone(),
                    batch_id: Some(batch_id),
                })
                .await;

            let failure = match outcome {
                Ok(AuthOutcome::Approved { .. }) => None,
                Ok(AuthOutcome::Declined { verb })
                | Ok(AuthOutcome::Error { verb }) => Some(verb),
                Err(e) => Some(e.to_string()),
            };
            if let Some(verb) = &failure {
                warn!("batch {termid}/{batch_id} failed to settle: {verb}");
            } else {
                info!("batch {termid}/{batch_id} settled: {total}");
            }
            self.settle_results.push(SettleResult {
                termid,
                batch_id,
                auth_count,
                total,
                failure,
            });
        }
        Ok(())
    }

    pub fn all_settled(&self) -> bool {
        !self.settle_results.is_empty()
            && self.settle_results.iter().all(|r| r.failure.is_none())
    }

    // --- Archive I/O --- //

    pub fn write(&self, out: &mut OutputDataFile) -> Result<(), DataFileError> {
        out.put_u32(self.auths.len() as u32)?;
        for auth in &self.auths {
            auth.write(out)?;
        }
        for list in [&self.voids, &self.refunds, &self.exceptions] {
            out.put_u32(list.len() as u32)?;
            for credit in list {
                credit.write(out)?;
            }
        }
        out.put_u32(self.settle_results.len() as u32)?;
        for result in &self.settle_results {
            out.put_str(&result.termid)?;
            out.put_i64(result.batch_id)?;
            out.put_u32(result.auth_count)?;
            out.put_i64(result.total.cents())?;
            out.put_str(result.failure.as_deref().unwrap_or(""))?;
        }
        out.put_u32(self.saf_cleared)
    }

    pub fn read(input: &mut InputDataFile) -> PosResult<Self> {
        let mut batches = Self::new();
        let auth_count = input.get_u32()?;
        for _ in 0..auth_count {
            batches.auths.push(AuthRecord::read(input)?);
        }
        for list in [
            &mut batches.voids,
            &mut batches.refunds,
            &mut batches.exceptions,
        ] {
            let count = input.get_u32()?;
            for _ in 0..count {
                list.push(Credit::read(input)?);
            }
        }
        let result_count = input.get_u32()?;
        for _ in 0..result_count {
            let termid = input.get_str()?;
            let batch_id = input.get_i64()?;
            let auth_count = input.get_u32()?;
            let total = Money::from_cents(input.get_i64()?);
            let failure = input.get_str()?;
            batches.settle_results.push(SettleResult {
                termid,
                batch_id,
                auth_count,
                total,
                failure: (!failure.is_empty()).then_some(failure),
            });
        }
        batches.saf_cleared = input.get_u32()?;
        Ok(batches)
    }
}

#[cfg(test)]
mod test {
    use super::super::backend::testing::{Scripted, ScriptedBackend};
    use super::*;

    fn record(termid: &str, batch: i64, cents: i64) -> AuthRecord {
        AuthRecord {
            termid: termid.into(),
            batch_id: Some(batch),
            pan_masked: "************1111".into(),
            amount: Money::from_cents(cents),
            tip: Money::ZERO,
            approval_code: "AP".into(),
            auth_time: None,
        }
    }

    #[test]
    fn distinct_batches_first_seen_order() {
        let mut batches = DayBatches::new();
        batches.record_auth(record("t1", 5, 100));
        batches.record_auth(record("t2", 5, 200));
        batches.record_auth(record("t1", 5, 300));
        batches.record_auth(record("t1", 6, 400));
        assert_eq!(
            batches.distinct_batches(),
            vec![
                ("t1".to_owned(), 5),
                ("t2".to_owned(), 5),
                ("t1".to_owned(), 6),
            ],
        );
    }

    #[tokio::test]
    async fn settle_day_covers_every_batch() {
        let mut batches = DayBatches::new();
        batches.record_auth(record("t1", 5, 100));
        batches.record_auth(record("t1", 5, 250));
        batches.record_auth(record("t2", 9, 400));

        // First response answers the SAF clear, then one per batch.
        let backend = ScriptedBackend::new(vec![
            Scripted::Respond(AuthOutcome::Approved {
                approval_code: "3".into(),
                avs: None,
                batch_id: None,
            }),
            Scripted::Respond(AuthOutcome::Approved {
                approval_code: "OK".into(),
                avs: None,
                batch_id: None,
            }),
            Scripted::Respond(AuthOutcome::Error {
                verb: "BATCH OUT OF BALANCE".into(),
            }),
        ]);

        batches.settle_day(&backend).await.unwrap();
        assert_eq!(batches.saf_cleared, 3);
        assert_eq!(batches.settle_results.len(), 2);
        assert_eq!(batches.settle_results[0].total.cents(), 350);
        assert_eq!(batches.settle_results[0].auth_count, 2);
        assert!(batches.settle_results[0].failure.is_none());
        assert_eq!(
            batches.settle_results[1].failure.as_deref(),
            Some("BATCH OUT OF BALANCE"),
        );
        assert!(!batches.all_settled());

        // The settle requests carried the right lanes and batches.
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].termid, "t1");
        assert_eq!(requests[1].batch_id, Some(5));
        assert_eq!(requests[2].termid, "t2");
        assert_eq!(requests[2].batch_id, Some(9));
    }

    #[test]
    fn archive_roundtrip() {
        let mut batches = DayBatches::new();
        batches.record_auth(record("t1", 5, 100));
        batches.settle_results.push(SettleResult {
            termid: "t1".into(),
            batch_id: 5,
            auth_count: 1,
            total: Money::from_cents(100),
            failure: None,
        });
        batches.saf_cleared = 2;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cc_batches.dat");
        let mut out =
            OutputDataFile::create(&path, BATCH_DB_VERSION).unwrap();
        batches.write(&mut out).unwrap();
        out.commit().unwrap();

        let mut input =
            InputDataFile::open(&path, BATCH_DB_VERSION, BATCH_DB_VERSION)
                .unwrap();
        let loaded = DayBatches::read(&mut input).unwrap();
        assert_eq!(loaded.auths, batches.auths);
        assert_eq!(loaded.settle_results, batches.settle_results);
        assert_eq!(loaded.saf_cleared, 2);
    }
}
