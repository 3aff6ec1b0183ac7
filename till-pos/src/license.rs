//! The license server response contract.
//!
//! The wire call is an HTTP POST of `hwid=<digest>&vtbuild=<n>&
//! protocol=2`; the response body decrypts to a comma-separated tuple.
//! Transport and cipher are injected; the kernel owns only the typed
//! request form and the strict response parse. Protocol v2 has changed
//! schema on the wire silently before, so unknown or missing tokens are
//! protocol errors, never defaulted.

use serde::{Deserialize, Serialize};

use crate::error::{PosError, PosResult};

pub const LICENSE_PROTOCOL: u32 = 2;

/// The POST form body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LicenseRequest {
    /// Hardware-identity digest.
    pub hwid: String,
    pub build: u32,
}

impl LicenseRequest {
    pub fn form_body(&self) -> String {
        format!(
            "hwid={}&vtbuild={}&protocol={LICENSE_PROTOCOL}",
            self.hwid, self.build,
        )
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LicenseType {
    Demo,
    Paid,
    Expired,
}

/// The decrypted
/// `license_type,license_paid,license_days,terminals,printers` tuple.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseGrant {
    pub license_type: LicenseType,
    pub paid: bool,
    /// Days remaining; negative never appears in a valid grant.
    pub days: u32,
    pub terminals: u32,
    pub printers: u32,
}

impl LicenseGrant {
    /// Parses the decrypted tuple. Every token must be present and
    /// well-formed.
    pub fn parse(decrypted: &str) -> PosResult<Self> {
        let fields: Vec<&str> = decrypted.trim().split(',').collect();
        if fields.len() != 5 {
            return Err(PosError::protocol(format!(
                "license tuple has {} fields, expected 5",
                fields.len(),
            )));
        }
        let license_type = match fields[0] {
            "demo" => LicenseType::Demo,
            "paid" => LicenseType::Paid,
            "expired" => LicenseType::Expired,
            other => {
                return Err(PosError::protocol(format!(
                    "unknown license type token '{other}'"
                )))
            }
        };
        let paid = match fields[1] {
            "0" => false,
            "1" => true,
            other => {
                return Err(PosError::protocol(format!(
                    "bad license_paid token '{other}'"
                )))
            }
        };
        let number = |name: &str, raw: &str| -> PosResult<u32> {
            raw.parse().map_err(|_| {
                PosError::protocol(format!("bad {name} token '{raw}'"))
            })
        };
        Ok(Self {
            license_type,
            paid,
            days: number("license_days", fields[2])?,
            terminals: number("terminals", fields[3])?,
            printers: number("printers", fields[4])?,
        })
    }

    pub fn allows(&self, terminals: usize, printers: usize) -> bool {
        !matches!(self.license_type, LicenseType::Expired)
            && terminals <= self.terminals as usize
            && printers <= self.printers as usize
    }
}

/// Transport + cipher boundary; the production impl POSTs to the
/// license host and runs the store cipher, tests hand back canned
/// tuples.
pub trait LicenseTransport: Send + Sync {
    /// POSTs `request` and returns the *decrypted* response body.
    fn exchange(&self, request: &LicenseRequest) -> PosResult<String>;
}

/// One full verification round trip.
pub fn verify(
    transport: &dyn LicenseTransport,
    request: &LicenseRequest,
) -> PosResult<LicenseGrant> {
    let decrypted = transport.exchange(request)?;
    LicenseGrant::parse(&decrypted)
}
