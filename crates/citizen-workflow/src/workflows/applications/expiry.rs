use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::{ReferenceNumber, ServiceId};

/// Lookahead window, in days, for surfacing a renewal action.
pub const RENEWAL_WINDOW_DAYS: i64 = 90;

/// A sanctioned application whose eligibility rests on a credential that expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringEligibility {
    pub service_id: ServiceId,
    pub reference_number: ReferenceNumber,
    pub expiration_date: NaiveDate,
}

impl ExpiringEligibility {
    pub fn days_remaining(&self, as_of: NaiveDate) -> i64 {
        (self.expiration_date - as_of).num_days()
    }
}

/// Whether the credential expires within the renewal window (today inclusive).
///
/// Already expired credentials are not "expiring soon".
pub fn is_expiring_soon(entry: &ExpiringEligibility, as_of: NaiveDate) -> bool {
    (0..=RENEWAL_WINDOW_DAYS).contains(&entry.days_remaining(as_of))
}
