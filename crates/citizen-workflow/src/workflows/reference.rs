//! Reference numbers scoped by district, service and financial year.
//!
//! Each issued number pairs a numeric code (kind digit, service, district, financial year,
//! salt, counter) with a human-readable form. Uniqueness rests on the counter store's
//! atomic increment; a store that cannot increment atomically is a configuration error.

use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Financial year running April of `start_year` to March of the following year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FinancialYear {
    start_year: i32,
}

impl FinancialYear {
    pub const fn starting(start_year: i32) -> Self {
        Self { start_year }
    }

    pub fn containing(date: NaiveDate) -> Self {
        let start_year = if date.month() >= 4 {
            date.year()
        } else {
            date.year() - 1
        };
        Self { start_year }
    }

    pub const fn start_year(self) -> i32 {
        self.start_year
    }

    /// `YYYY-YY`, e.g. `2024-25`.
    pub fn label(self) -> String {
        format!(
            "{}-{:02}",
            self.start_year,
            (self.start_year + 1).rem_euclid(100)
        )
    }

    /// Last two digits of the label, i.e. of the closing year.
    pub fn short_code(self) -> u32 {
        (self.start_year + 1).rem_euclid(100) as u32
    }
}

impl fmt::Display for FinancialYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// What a reference number identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReferenceKind {
    Application,
    Amendment,
}

impl ReferenceKind {
    pub const fn label(self) -> &'static str {
        match self {
            ReferenceKind::Application => "Application",
            ReferenceKind::Amendment => "Amendment",
        }
    }

    const fn discriminator(self) -> u8 {
        match self {
            ReferenceKind::Application => 1,
            ReferenceKind::Amendment => 2,
        }
    }
}

/// Scope of one monotonically increasing counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CounterKey {
    pub district_id: u32,
    pub service_id: u32,
    pub financial_year: FinancialYear,
    pub kind: ReferenceKind,
}

impl CounterKey {
    /// Stable textual form for stores keyed by string.
    pub fn storage_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.kind.label(),
            self.district_id,
            self.service_id,
            self.financial_year.label()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    #[error("counter store has no atomic increment primitive")]
    Unsupported,
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence primitive backing reference numbers.
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter for `key` and return the new value (first call: 1).
    fn increment(&self, key: &CounterKey) -> Result<u64, CounterError>;
}

/// Source of the three-digit salt embedded in numeric references.
pub trait SaltSource: Send + Sync {
    /// A value in `0..1000`.
    fn salt(&self) -> u16;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSalt;

impl SaltSource for ThreadRngSalt {
    fn salt(&self) -> u16 {
        rand::thread_rng().gen_range(0..1000)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("{field} {value} does not fit the two-digit reference slot")]
    CodeOutOfRange { field: &'static str, value: u32 },
    #[error("reference counters must be incremented atomically; configure a store that supports it")]
    NonAtomicCounter,
    #[error("counter store unavailable: {0}")]
    Counter(String),
}

impl From<CounterError> for ReferenceError {
    fn from(value: CounterError) -> Self {
        match value {
            CounterError::Unsupported => ReferenceError::NonAtomicCounter,
            CounterError::Unavailable(reason) => ReferenceError::Counter(reason),
        }
    }
}

/// Inputs naming the scope a reference is issued in.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceScope<'a> {
    pub district_id: u32,
    pub district_code: &'a str,
    pub service_id: u32,
    pub service_code: &'a str,
    pub financial_year: FinancialYear,
    pub kind: ReferenceKind,
}

/// A freshly issued identifier in both encodings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedReference {
    pub numeric: String,
    pub display: String,
    pub counter: u64,
    pub financial_year: FinancialYear,
    pub kind: ReferenceKind,
}

pub struct ReferenceNumberGenerator<C: ?Sized> {
    counters: Arc<C>,
    portal_prefix: String,
    salt: Box<dyn SaltSource>,
}

impl<C: ?Sized> fmt::Debug for ReferenceNumberGenerator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceNumberGenerator")
            .field("portal_prefix", &self.portal_prefix)
            .finish_non_exhaustive()
    }
}

impl<C> ReferenceNumberGenerator<C>
where
    C: CounterStore + ?Sized,
{
    pub fn new(counters: Arc<C>, portal_prefix: impl Into<String>) -> Self {
        Self::with_salt(counters, portal_prefix, Box::new(ThreadRngSalt))
    }

    pub fn with_salt(
        counters: Arc<C>,
        portal_prefix: impl Into<String>,
        salt: Box<dyn SaltSource>,
    ) -> Self {
        Self {
            counters,
            portal_prefix: portal_prefix.into(),
            salt,
        }
    }

    /// Increment the scoped counter and render both encodings.
    pub fn next(&self, scope: ReferenceScope<'_>) -> Result<IssuedReference, ReferenceError> {
        check_two_digits("service id", scope.service_id)?;
        check_two_digits("district id", scope.district_id)?;

        let key = CounterKey {
            district_id: scope.district_id,
            service_id: scope.service_id,
            financial_year: scope.financial_year,
            kind: scope.kind,
        };
        let counter = self.counters.increment(&key)?;
        let salt = self.salt.salt() % 1000;

        let numeric = format!(
            "{}{:02}{:02}{:02}{:03}{:06}",
            scope.kind.discriminator(),
            scope.service_id,
            scope.district_id,
            scope.financial_year.short_code(),
            salt,
            counter
        );

        let mut display = format!("{}/", self.portal_prefix);
        if scope.kind == ReferenceKind::Amendment {
            display.push_str("AMD/");
        }
        display.push_str(&format!(
            "{}/{}/{}/{:06}",
            scope.service_code,
            scope.district_code,
            scope.financial_year.label(),
            counter
        ));

        debug!(key = %key.storage_key(), counter, "issued reference number");

        Ok(IssuedReference {
            numeric,
            display,
            counter,
            financial_year: scope.financial_year,
            kind: scope.kind,
        })
    }
}

fn check_two_digits(field: &'static str, value: u32) -> Result<(), ReferenceError> {
    if value > 99 {
        return Err(ReferenceError::CodeOutOfRange { field, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryCounters {
        values: Mutex<HashMap<CounterKey, u64>>,
    }

    impl CounterStore for MemoryCounters {
        fn increment(&self, key: &CounterKey) -> Result<u64, CounterError> {
            let mut guard = self.values.lock().expect("counter mutex poisoned");
            let value = guard.entry(*key).or_insert(0);
            *value += 1;
            Ok(*value)
        }
    }

    struct ReadThenWriteCounters;

    impl CounterStore for ReadThenWriteCounters {
        fn increment(&self, _key: &CounterKey) -> Result<u64, CounterError> {
            Err(CounterError::Unsupported)
        }
    }

    struct FixedSalt(u16);

    impl SaltSource for FixedSalt {
        fn salt(&self) -> u16 {
            self.0
        }
    }

    fn scope(kind: ReferenceKind) -> ReferenceScope<'static> {
        ReferenceScope {
            district_id: 5,
            district_code: "SGR",
            service_id: 3,
            service_code: "PMS",
            financial_year: FinancialYear::starting(2024),
            kind,
        }
    }

    #[test]
    fn financial_year_starts_in_april() {
        let march = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();
        let april = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        assert_eq!(FinancialYear::containing(march).label(), "2024-25");
        assert_eq!(FinancialYear::containing(april).label(), "2025-26");
        assert_eq!(FinancialYear::starting(1999).label(), "1999-00");
        assert_eq!(FinancialYear::starting(2024).short_code(), 25);
    }

    #[test]
    fn renders_numeric_and_display_forms() {
        let generator = ReferenceNumberGenerator::with_salt(
            Arc::new(MemoryCounters::default()),
            "JK",
            Box::new(FixedSalt(42)),
        );

        let issued = generator
            .next(scope(ReferenceKind::Application))
            .expect("reference issues");
        assert_eq!(issued.numeric, "10305250420000001");
        assert_eq!(issued.display, "JK/PMS/SGR/2024-25/000001");

        let amendment = generator
            .next(scope(ReferenceKind::Amendment))
            .expect("amendment issues");
        assert_eq!(amendment.counter, 1, "amendments count separately");
        assert_eq!(amendment.numeric, "20305250420000001");
        assert_eq!(amendment.display, "JK/AMD/PMS/SGR/2024-25/000001");
    }

    #[test]
    fn counters_are_distinct_across_ten_thousand_calls() {
        let generator = ReferenceNumberGenerator::new(Arc::new(MemoryCounters::default()), "JK");
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let issued = generator
                .next(scope(ReferenceKind::Application))
                .expect("reference issues");
            assert!(seen.insert(issued.counter), "duplicate counter {}", issued.counter);
        }
        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn non_atomic_store_is_a_configuration_error() {
        let generator = ReferenceNumberGenerator::new(Arc::new(ReadThenWriteCounters), "JK");
        assert!(matches!(
            generator.next(scope(ReferenceKind::Application)),
            Err(ReferenceError::NonAtomicCounter)
        ));
    }

    #[test]
    fn rejects_codes_wider_than_two_digits() {
        let generator = ReferenceNumberGenerator::new(Arc::new(MemoryCounters::default()), "JK");
        let mut wide = scope(ReferenceKind::Application);
        wide.district_id = 120;
        assert!(matches!(
            generator.next(wide),
            Err(ReferenceError::CodeOutOfRange {
                field: "district id",
                value: 120
            })
        ));
    }
}
