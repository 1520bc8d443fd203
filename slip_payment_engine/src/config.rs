//! Engine configuration.
//!
//! All the knobs that influence matching and allocation are collected into a [`ReconciliationPolicy`], which is built
//! once at start-up (usually via [`EngineConfig::from_env_or_default`]) and handed to the API explicitly.
//!
//! | Variable                     | Default                     |
//! |------------------------------|-----------------------------|
//! | `SPE_DATABASE_URL`           | `sqlite://data/slips.db`    |
//! | `SPE_MAX_CONNECTIONS`        | 25                          |
//! | `SPE_DUPLICATE_WINDOW_HOURS` | 24                          |
//! | `SPE_CLOSE_MATCH_PERCENT`    | 5                           |
//! | `SPE_CLOSE_MATCH_FLOOR`      | 20.00 (baht)                |
//! | `SPE_PAWN_TERM_DAYS`         | 30                          |
//! | `SPE_PAWN_MAX_EXTENSIONS`    | 12                          |
//! | `SPE_REVIEW_UNREFERENCED`    | true                        |
//! | `SPE_EVENT_BUFFER_SIZE`      | 25                          |
//! | `SPE_REMATCH_INTERVAL_SECS`  | 300                         |
use std::{env, fmt::Display, str::FromStr, time::Duration as StdDuration};

use chrono::Duration;
use log::*;
use spe_common::{helpers::parse_boolean_flag, Satang};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/slips.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 25;
const DEFAULT_DUPLICATE_WINDOW_HOURS: i64 = 24;
const DEFAULT_CLOSE_MATCH_PERCENT: i64 = 5;
const DEFAULT_CLOSE_MATCH_FLOOR: Satang = Satang::from_baht(20);
const DEFAULT_PAWN_TERM_DAYS: i64 = 30;
const DEFAULT_PAWN_MAX_EXTENSIONS: i64 = 12;
const DEFAULT_EVENT_BUFFER_SIZE: usize = 25;
const DEFAULT_REMATCH_INTERVAL_SECS: u64 = 300;

/// Amount-tolerance rules used by the candidate finder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchingRules {
    /// Close matches are accepted within this percentage of the payment amount...
    pub close_match_percent: i64,
    /// ...or within this absolute amount, whichever is larger.
    pub close_match_floor: Satang,
}

impl Default for MatchingRules {
    fn default() -> Self {
        Self { close_match_percent: DEFAULT_CLOSE_MATCH_PERCENT, close_match_floor: DEFAULT_CLOSE_MATCH_FLOOR }
    }
}

impl MatchingRules {
    pub fn tolerance_for(&self, amount: Satang) -> Satang {
        amount.percent(self.close_match_percent).max(self.close_match_floor)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PawnTerms {
    /// Length of one interest term. Paying interest extends the due date by this many days.
    pub term_days: i64,
    /// Interest payments beyond this many extensions move the loan to `extension_limit_reached`.
    pub max_extensions: i64,
}

impl Default for PawnTerms {
    fn default() -> Self {
        Self { term_days: DEFAULT_PAWN_TERM_DAYS, max_extensions: DEFAULT_PAWN_MAX_EXTENSIONS }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconciliationPolicy {
    pub rules: MatchingRules,
    pub pawn_terms: PawnTerms,
    /// A second slip with the same reference inside this window is a duplicate.
    pub duplicate_window: Duration,
    /// When true, payments without a transfer reference are matched but parked for staff approval.
    pub review_unreferenced_payments: bool,
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self {
            rules: MatchingRules::default(),
            pawn_terms: PawnTerms::default(),
            duplicate_window: Duration::hours(DEFAULT_DUPLICATE_WINDOW_HOURS),
            review_unreferenced_payments: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub policy: ReconciliationPolicy,
    /// Channel capacity for each event hook
    pub event_buffer_size: usize,
    pub rematch_interval: StdDuration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            policy: ReconciliationPolicy::default(),
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
            rematch_interval: StdDuration::from_secs(DEFAULT_REMATCH_INTERVAL_SECS),
        }
    }
}

impl EngineConfig {
    /// Reads the configuration from `SPE_*` environment variables. Missing values fall back to their defaults; invalid
    /// values are logged and also fall back.
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where F: Fn(&str) -> Option<String> {
        let database_url = lookup("SPE_DATABASE_URL").unwrap_or_else(|| {
            info!("🪛️ SPE_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let max_connections = parse_or_default(&lookup, "SPE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS);
        let window_hours = parse_or_default(&lookup, "SPE_DUPLICATE_WINDOW_HOURS", DEFAULT_DUPLICATE_WINDOW_HOURS);
        let close_match_percent = parse_or_default(&lookup, "SPE_CLOSE_MATCH_PERCENT", DEFAULT_CLOSE_MATCH_PERCENT);
        let close_match_floor = parse_or_default(&lookup, "SPE_CLOSE_MATCH_FLOOR", DEFAULT_CLOSE_MATCH_FLOOR);
        let term_days = parse_or_default(&lookup, "SPE_PAWN_TERM_DAYS", DEFAULT_PAWN_TERM_DAYS);
        let max_extensions = parse_or_default(&lookup, "SPE_PAWN_MAX_EXTENSIONS", DEFAULT_PAWN_MAX_EXTENSIONS);
        let review_unreferenced_payments = parse_boolean_flag(lookup("SPE_REVIEW_UNREFERENCED"), true);
        let event_buffer_size = parse_or_default(&lookup, "SPE_EVENT_BUFFER_SIZE", DEFAULT_EVENT_BUFFER_SIZE);
        let rematch_secs = parse_or_default(&lookup, "SPE_REMATCH_INTERVAL_SECS", DEFAULT_REMATCH_INTERVAL_SECS);

        let defaults = ReconciliationPolicy::default();
        let duplicate_window = if window_hours > 0 {
            Duration::hours(window_hours)
        } else {
            warn!("🪛️ SPE_DUPLICATE_WINDOW_HOURS must be positive. Using {DEFAULT_DUPLICATE_WINDOW_HOURS} hrs.");
            defaults.duplicate_window
        };
        let term_days = if term_days > 0 {
            term_days
        } else {
            warn!("🪛️ SPE_PAWN_TERM_DAYS must be positive. Using {DEFAULT_PAWN_TERM_DAYS} days.");
            DEFAULT_PAWN_TERM_DAYS
        };
        if !review_unreferenced_payments {
            warn!(
                "🪛️ Review of unreferenced payments is disabled. Slips without a reference will be allocated \
                 automatically and cannot be checked for duplicates."
            );
        }
        let policy = ReconciliationPolicy {
            rules: MatchingRules { close_match_percent, close_match_floor },
            pawn_terms: PawnTerms { term_days, max_extensions },
            duplicate_window,
            review_unreferenced_payments,
        };
        Self {
            database_url,
            max_connections,
            policy,
            event_buffer_size: event_buffer_size.max(1),
            rematch_interval: StdDuration::from_secs(rematch_secs),
        }
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        None => {
            debug!("🪛️ {key} is not set. Using the default value of {default}.");
            default
        },
        Some(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            warn!("🪛️ Invalid configuration value for {key} ({s}). {e} Using the default, {default}, instead.");
            default
        }),
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> EngineConfig {
        let vars = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<HashMap<_, _>>();
        EngineConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.policy, ReconciliationPolicy::default());
        assert_eq!(config.policy.duplicate_window, Duration::hours(24));
        assert_eq!(config.policy.rules.close_match_floor, Satang::from_baht(20));
        assert!(config.policy.review_unreferenced_payments);
        assert_eq!(config.rematch_interval, StdDuration::from_secs(300));
    }

    #[test]
    fn overrides() {
        let config = config_from(&[
            ("SPE_DATABASE_URL", "sqlite://tmp/x.db"),
            ("SPE_DUPLICATE_WINDOW_HOURS", "48"),
            ("SPE_CLOSE_MATCH_PERCENT", "3"),
            ("SPE_CLOSE_MATCH_FLOOR", "50.50"),
            ("SPE_PAWN_MAX_EXTENSIONS", "2"),
            ("SPE_REVIEW_UNREFERENCED", "false"),
        ]);
        assert_eq!(config.database_url, "sqlite://tmp/x.db");
        assert_eq!(config.policy.duplicate_window, Duration::hours(48));
        assert_eq!(config.policy.rules.close_match_percent, 3);
        assert_eq!(config.policy.rules.close_match_floor, Satang::from(5050));
        assert_eq!(config.policy.pawn_terms.max_extensions, 2);
        assert!(!config.policy.review_unreferenced_payments);
    }

    #[test]
    fn bad_values_fall_back() {
        let config = config_from(&[
            ("SPE_MAX_CONNECTIONS", "lots"),
            ("SPE_DUPLICATE_WINDOW_HOURS", "-1"),
            ("SPE_PAWN_TERM_DAYS", "0"),
            ("SPE_CLOSE_MATCH_FLOOR", "20.001"),
        ]);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.policy.duplicate_window, Duration::hours(24));
        assert_eq!(config.policy.pawn_terms.term_days, 30);
        assert_eq!(config.policy.rules.close_match_floor, Satang::from_baht(20));
    }

    #[test]
    fn tolerance_is_larger_of_percent_and_floor() {
        let rules = MatchingRules::default();
        assert_eq!(rules.tolerance_for(Satang::from_baht(100)), Satang::from_baht(20));
        assert_eq!(rules.tolerance_for(Satang::from_baht(1000)), Satang::from_baht(50));
    }
}
