pub mod apply;
pub mod cronjob;
pub mod policy;

/// Field manager and `managed-by` label value.
pub(crate) const MANAGER_NAME: &str = "aare-scraper";

/// Failed runs are not retried; the next tick is the next attempt.
pub(crate) const BACKOFF_LIMIT: i32 = 0;
pub(crate) const RESTART_POLICY: &str = "Never";
