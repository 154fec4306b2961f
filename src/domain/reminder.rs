use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of exactly-once notifications produced by the scanners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderType {
    /// Cash voucher approaching its hard expiration.
    VoucherExpiring,
    /// Permit expiry warning at a fixed day offset.
    PermitExpiry { days_before: u16 },
}

impl ReminderType {
    /// Stable key fragment used by stores to enforce the uniqueness
    /// constraint on (application_id, reminder_type).
    pub fn key(&self) -> String {
        match self {
            Self::VoucherExpiring => "voucher_expiring".to_string(),
            Self::PermitExpiry { days_before } => format!("permit_expiry_{days_before}d"),
        }
    }
}

/// Created once per (application, reminder type), never updated. The
/// uniqueness constraint is what makes repeated scans safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderRecord {
    pub application_id: i64,
    pub reminder_type: ReminderType,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reminder_type_keys_are_distinct() {
        let keys = [
            ReminderType::VoucherExpiring.key(),
            ReminderType::PermitExpiry { days_before: 7 }.key(),
            ReminderType::PermitExpiry { days_before: 3 }.key(),
            ReminderType::PermitExpiry { days_before: 1 }.key(),
        ];
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
    }
}
