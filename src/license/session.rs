//! Caller-owned session state: authorisation flag and daily usage counter.
//!
//! The scanner reads this as a precondition; it never mutates it. Callers
//! record a use after each successful scan.
//!
//! Only the usage counter is persisted. Authorisation lives for the
//! process (or API token) that verified the key, so a restored session
//! always starts locked and has to verify again.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::types::ScanError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(skip)]
    pub authorized: bool,
    #[serde(skip)]
    pub dev_mode: bool,
    pub uses_today: u32,
    pub day_stamp: NaiveDate,
    /// 0 means unlimited.
    pub max_uses_per_day: u32,
}

impl fmt::Display for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.authorized { "unlocked" } else { "locked" };
        if self.is_unlimited() {
            write!(f, "{state} | today: {} (unlimited)", self.uses_today)
        } else {
            write!(
                f,
                "{state} | today: {} / {}",
                self.uses_today, self.max_uses_per_day
            )
        }
    }
}

impl SessionContext {
    /// Locked session stamped with today's local date.
    pub fn new(max_uses_per_day: u32) -> Self {
        Self::new_on(max_uses_per_day, Local::now().date_naive())
    }

    pub fn new_on(max_uses_per_day: u32, today: NaiveDate) -> Self {
        Self {
            authorized: false,
            dev_mode: false,
            uses_today: 0,
            day_stamp: today,
            max_uses_per_day,
        }
    }

    pub fn authorize(&mut self, dev_mode: bool) {
        self.authorized = true;
        self.dev_mode = dev_mode;
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_uses_per_day == 0
    }

    /// Reset the counter when `today` differs from the stamp.
    /// Returns true if a reset happened.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if self.day_stamp == today {
            return false;
        }
        info!(previous = %self.day_stamp, today = %today, used = self.uses_today, "New day, usage counter reset");
        self.day_stamp = today;
        self.uses_today = 0;
        true
    }

    /// Roll over using the local clock.
    pub fn roll_day_now(&mut self) -> bool {
        self.roll_day(Local::now().date_naive())
    }

    /// Uses left today. `None` when unlimited.
    pub fn remaining(&self) -> Option<u32> {
        if self.is_unlimited() {
            None
        } else {
            Some(self.max_uses_per_day.saturating_sub(self.uses_today))
        }
    }

    pub fn check_quota(&self) -> Result<(), ScanError> {
        if self.remaining() == Some(0) {
            return Err(ScanError::QuotaExceeded {
                used: self.uses_today,
                limit: self.max_uses_per_day,
            });
        }
        Ok(())
    }

    /// The gate a scan must pass: unlocked and under quota.
    pub fn ensure_may_proceed(&self) -> Result<(), ScanError> {
        if !self.authorized {
            return Err(ScanError::Unauthorized(
                "Enter your license key to continue.".to_string(),
            ));
        }
        self.check_quota()
    }

    pub fn may_proceed(&self) -> bool {
        self.ensure_may_proceed().is_ok()
    }

    pub fn record_use(&mut self) {
        self.uses_today = self.uses_today.saturating_add(1);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
