use std::time::Duration;

/// Policy knobs for the payment pipeline.
///
/// Every value here is operational policy, not contract: deployments tune
/// them without touching pipeline logic. `Default` carries the values the
/// production system runs with.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum age of a recovery attempt before the scheduler retries it.
    pub recovery_threshold: Duration,
    /// Attempts per (application, intent) before giving up.
    pub recovery_max_attempts: u32,
    /// Upper bound on rows examined per recovery scan.
    pub recovery_batch_size: usize,
    /// Terminal recovery rows older than this are purged.
    pub recovery_retention: Duration,

    /// Concurrent permit-generation workers.
    pub worker_count: usize,
    /// Maximum pending jobs before `enqueue` rejects.
    pub queue_capacity: usize,
    /// Transient issuance failures retried per job.
    pub issuance_max_retries: u32,
    /// Timeout for a single issuance-backend call.
    pub issuance_timeout: Duration,
    /// Timeout for a single gateway status re-query.
    pub gateway_timeout: Duration,
    /// In-flight applications not updated for this long count as stuck.
    pub stuck_threshold: Duration,

    /// How far ahead the voucher scan looks for expiring vouchers.
    pub voucher_horizon: Duration,
    /// Days before `permit_expires_at` at which expiry warnings fire.
    pub permit_expiry_offsets_days: Vec<u16>,

    /// Interval between queue metrics samples.
    pub metrics_interval: Duration,

    /// Lifetime of a payment-state token.
    pub token_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recovery_threshold: Duration::from_secs(30 * 60),
            recovery_max_attempts: 3,
            recovery_batch_size: 100,
            recovery_retention: Duration::from_secs(7 * 24 * 3600),
            worker_count: 4,
            queue_capacity: 256,
            issuance_max_retries: 2,
            issuance_timeout: Duration::from_secs(30),
            gateway_timeout: Duration::from_secs(10),
            stuck_threshold: Duration::from_secs(3600),
            voucher_horizon: Duration::from_secs(24 * 3600),
            permit_expiry_offsets_days: vec![7, 3, 1],
            metrics_interval: Duration::from_secs(60),
            token_ttl: Duration::from_secs(15 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.recovery_threshold, Duration::from_secs(1800));
        assert_eq!(config.recovery_max_attempts, 3);
        assert_eq!(config.recovery_batch_size, 100);
        assert_eq!(config.permit_expiry_offsets_days, vec![7, 3, 1]);
    }
}
