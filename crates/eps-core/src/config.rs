//! Core runtime configuration.
//!
//! Reference periods drive every scheduling decision the record makes, so
//! they are resolved once at process startup and passed into core services
//! rather than read from the environment during message handling.

use std::path::Path;

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{EpsError, EpsResult};

/// Days before a nominated download date at which the next issue of a
/// repeat dispense prescription becomes available for download.
pub const NOMINATED_DOWNLOAD_LEAD_DAYS: u32 = 7;

/// A calendar period expressed as a count of days, months or years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub count: u32,
    pub unit: PeriodUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    Days,
    Months,
    Years,
}

impl Period {
    pub const fn days(count: u32) -> Self {
        Period {
            count,
            unit: PeriodUnit::Days,
        }
    }

    pub const fn months(count: u32) -> Self {
        Period {
            count,
            unit: PeriodUnit::Months,
        }
    }

    /// Add this period to a date. Month and year arithmetic clamps to the
    /// end of the month, matching how calendar offsets behave elsewhere in
    /// the service.
    pub fn add_to(&self, date: NaiveDate) -> EpsResult<NaiveDate> {
        let result = match self.unit {
            PeriodUnit::Days => date.checked_add_days(Days::new(u64::from(self.count))),
            PeriodUnit::Months => date.checked_add_months(Months::new(self.count)),
            PeriodUnit::Years => date.checked_add_months(Months::new(self.count * 12)),
        };
        result.ok_or_else(|| EpsError::InvalidDate(format!("{} plus {:?}", date, self)))
    }
}

/// The reference periods applied when scheduling a prescription's next
/// activity. Each field corresponds to one lifecycle rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePeriods {
    /// How long a single issue remains dispensable after its start date.
    pub prescription_expiry_period: Period,
    /// How long a repeat dispense issue beyond the first remains dispensable.
    pub repeat_dispense_expiry_period: Period,
    /// How long a partially dispensed issue may remain with the dispenser
    /// after its last dispense event.
    pub with_dispenser_active_expiry_period: Period,
    /// Retention after an issue expires.
    pub expired_delete_period: Period,
    /// Retention after an issue is cancelled.
    pub cancelled_delete_period: Period,
    /// Delay after completion before a dispensed issue is actioned again.
    pub notification_delay_period: Period,
    /// Retention after a claim is received.
    pub claimed_delete_period: Period,
    /// Retention after an issue completes as not dispensed.
    pub not_dispensed_delete_period: Period,
}

impl Default for ReferencePeriods {
    fn default() -> Self {
        ReferencePeriods {
            prescription_expiry_period: Period::months(6),
            repeat_dispense_expiry_period: Period::months(12),
            with_dispenser_active_expiry_period: Period::days(180),
            expired_delete_period: Period::days(90),
            cancelled_delete_period: Period::days(90),
            notification_delay_period: Period::days(3),
            claimed_delete_period: Period::days(90),
            not_dispensed_delete_period: Period::days(90),
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    periods: ReferencePeriods,
    /// Whether the next issue's download date is derived from the original
    /// prescribing date rather than the latest dispense date.
    #[serde(default)]
    nominated_download_date_enabled: bool,
    #[serde(default = "default_lead_days")]
    nominated_download_lead_days: u32,
}

fn default_lead_days() -> u32 {
    NOMINATED_DOWNLOAD_LEAD_DAYS
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            periods: ReferencePeriods::default(),
            nominated_download_date_enabled: false,
            nominated_download_lead_days: NOMINATED_DOWNLOAD_LEAD_DAYS,
        }
    }
}

impl CoreConfig {
    pub fn new(
        periods: ReferencePeriods,
        nominated_download_date_enabled: bool,
        nominated_download_lead_days: u32,
    ) -> EpsResult<Self> {
        if nominated_download_lead_days == 0 {
            return Err(EpsError::InvalidInput(
                "nominated_download_lead_days cannot be zero".into(),
            ));
        }
        Ok(CoreConfig {
            periods,
            nominated_download_date_enabled,
            nominated_download_lead_days,
        })
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> EpsResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(EpsError::ConfigRead)?;
        serde_yaml::from_str(&raw).map_err(EpsError::YamlDeserialization)
    }

    pub fn periods(&self) -> &ReferencePeriods {
        &self.periods
    }

    pub fn nominated_download_date_enabled(&self) -> bool {
        self.nominated_download_date_enabled
    }

    pub fn nominated_download_lead_days(&self) -> u32 {
        self.nominated_download_lead_days
    }
}
