//! The authorization backend contract.
//!
//! The kernel only relies on a request carrying `{action, amount, PAN,
//! expiry, termid}` and a response carrying approved / declined / error
//! plus an approval code, AVS, and batch id. The two deployed backends
//! speak different wire dialects; both are opaque here.

use async_trait::async_trait;
use common::money::Money;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{PosError, PosResult};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BackendAction {
    PreAuth,
    Complete,
    Authorize,
    Advice,
    Void,
    Refund,
    RefundCorrect,
    /// Settle one recorded batch.
    Settle,
    /// Clear the store-and-forward queue.
    SafClear,
}

impl BackendAction {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::PreAuth => "preauth",
            Self::Complete => "complete",
            Self::Authorize => "auth",
            Self::Advice => "advice",
            Self::Void => "void",
            Self::Refund => "refund",
            Self::RefundCorrect => "refundcorrect",
            Self::Settle => "settle",
            Self::SafClear => "safclear",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthRequest {
    pub action: BackendAction,
    pub amount: Money,
    pub pan: String,
    pub expiry: String,
    pub termid: String,
    /// Batch being settled, for [`BackendAction::Settle`].
    pub batch_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    Approved {
        approval_code: String,
        avs: Option<String>,
        batch_id: Option<i64>,
    },
    /// The verb is displayed and printed verbatim.
    Declined { verb: String },
    Error { verb: String },
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn request(&self, request: AuthRequest) -> PosResult<AuthOutcome>;
}

/// Parses the response line shared by both dialects:
/// `approved,<code>,<avs>,<batch>` / `denied,<verb>` / `error,<verb>`.
fn parse_response_line(line: &str) -> PosResult<AuthOutcome> {
    let mut fields = line.trim().splitn(4, ',');
    let status = fields.next().unwrap_or_default();
    match status {
        "approved" => {
            let approval_code = fields
                .next()
                .filter(|code| !code.is_empty())
                .ok_or_else(|| {
                    PosError::protocol("approval without a code")
                })?
                .to_owned();
            let avs = fields
                .next()
                .filter(|avs| !avs.is_empty())
                .map(str::to_owned);
            let batch_id = match fields.next() {
                None | Some("") => None,
                Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
                    PosError::protocol(format!("bad batch id '{raw}'"))
                })?),
            };
            Ok(AuthOutcome::Approved {
                approval_code,
                avs,
                batch_id,
            })
        }
        "denied" => Ok(AuthOutcome::Declined {
            verb: fields.collect::<Vec<_>>().join(","),
        }),
        "error" => Ok(AuthOutcome::Error {
            verb: fields.collect::<Vec<_>>().join(","),
        }),
        other => Err(PosError::protocol(format!(
            "unknown backend status '{other}'"
        ))),
    }
}

/// The single-lane dialect: one TCP connection per request, CSV lines.
pub struct MainStreetClient {
    pub addr: String,
}

#[async_trait]
impl AuthBackend for MainStreetClient {
    async fn request(&self, request: AuthRequest) -> PosResult<AuthOutcome> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        let line = format!(
            "{},{},{},{},{}\n",
            request.action.wire_name(),
            request.amount.cents(),
            request.pan,
            request.expiry,
            request.batch_id.unwrap_or(-1),
        );
        write_half.write_all(line.as_bytes()).await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut response = String::new();
        reader.read_line(&mut response).await?;
        parse_response_line(&response)
    }
}

/// The multi-terminal dialect: the lane id rides in every request line
/// so several terminals can share one gateway connection point.
pub struct CreditCheqClient {
    pub addr: String,
}

#[async_trait]
impl AuthBackend for CreditCheqClient {
    async fn request(&self, request: AuthRequest) -> PosResult<AuthOutcome> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        let line = format!(
            "{}|{},{},{},{},{}\n",
            request.termid,
            request.action.wire_name(),
            request.amount.cents(),
            request.pan,
            request.expiry,
            request.batch_id.unwrap_or(-1),
        );
        write_half.write_all(line.as_bytes()).await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut response = String::new();
        reader.read_line(&mut response).await?;

        // Responses echo the lane: `<termid>|<response>`.
        let body = match response.split_once('|') {
            Some((echoed, body)) if echoed == request.termid => body,
            Some((echoed, _)) => {
                return Err(PosError::protocol(format!(
                    "response for lane '{echoed}', expected '{}'",
                    request.termid,
                )))
            }
            None => response.as_str(),
        };
        parse_response_line(body)
    }
}

#[cfg(test)]
pub mod testing {
    //! A scriptable in-process backend for workflow tests.

    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    pub enum Scripted {
        Respond(AuthOutcome),
        /// Sleep longer than any client timeout.
        Hang,
        Fail(String),
    }

    pub struct ScriptedBackend {
        script: Mutex<Vec<Scripted>>,
        pub requests: Mutex<Vec<AuthRequest>>,
    }

    impl ScriptedBackend {
        /// Responses are handed out in order; the last repeats.
        pub fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: Mutex::new(script),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn approving(code: &str) -> Self {
            Self::new(vec![Scripted::Respond(AuthOutcome::Approved {
                approval_code: code.to_owned(),
                avs: None,
                batch_id: Some(1),
            })])
        }
    }

    #[async_trait]
    impl AuthBackend for ScriptedBackend {
        async fn request(
            &self,
            request: AuthRequest,
        ) -> PosResult<AuthOutcome> {
            self.requests.lock().unwrap().push(request);
            let step = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.remove(0)
                } else {
                    match script.first() {
                        Some(Scripted::Respond(outcome)) => {
                            Scripted::Respond(outcome.clone())
                        }
                        Some(Scripted::Hang) => Scripted::Hang,
                        Some(Scripted::Fail(verb)) => {
                            Scripted::Fail(verb.clone())
                        }
                        None => Scripted::Fail("script exhausted".into()),
                    }
                }
            };
            match step {
                Scripted::Respond(outcome) => Ok(outcome),
                Scripted::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(PosError::auth("unreachable"))
                }
                Scripted::Fail(verb) => Err(PosError::auth(verb)),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_approval() {
        let outcome =
            parse_response_line("approved,AP1234,Y,42\n").unwrap();
        assert_eq!(
            outcome,
            AuthOutcome::Approved {
                approval_code: "AP1234".into(),
                avs: Some("Y".into()),
                batch_id: Some(42),
            },
        );
    }

    #[test]
    fn parses_decline_verb_verbatim() {
        let outcome = parse_response_line("denied,CALL CENTER\n").unwrap();
        assert_eq!(
            outcome,
            AuthOutcome::Declined {
                verb: "CALL CENTER".into()
            },
        );
    }

    #[test]
    fn unknown_status_is_protocol_error() {
        assert!(matches!(
            parse_response_line("shrug,whatever"),
            Err(PosError::Protocol(_))
        ));
        assert!(matches!(
            parse_response_line("approved,"),
            Err(PosError::Protocol(_))
        ));
        assert!(matches!(
            parse_response_line("approved,AP,Y,notanumber"),
            Err(PosError::Protocol(_))
        ));
    }
}
