//! Per-instance state and health reporting.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use graphsync_core::InstanceId;
use graphsync_reconciler::TickReport;

/// Execution state of one instance slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Running,
    Backoff,
    Disabled,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Backoff => "backoff",
            Self::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Why an instance is disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisableReason {
    /// Stopped by an operator; `start_instance` re-enables it.
    Operator,
    /// The provider cannot run on this framework; never re-enabled.
    Incompatible(String),
}

/// Operator-facing view of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHealth {
    pub instance: InstanceId,
    pub provider: String,
    pub state: SlotState,
    pub disabled: Option<DisableReason>,
    /// Kept until the next success.
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    /// Delay before the next scheduled tick.
    pub current_delay: Duration,
    pub total_ticks: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
}

impl InstanceHealth {
    pub fn new(instance: InstanceId, provider: impl Into<String>, delay: Duration) -> Self {
        Self {
            instance,
            provider: provider.into(),
            state: SlotState::Idle,
            disabled: None,
            last_error: None,
            consecutive_failures: 0,
            current_delay: delay,
            total_ticks: 0,
            last_success: None,
            last_report: None,
        }
    }

    /// Failing or disabled.
    pub fn is_degraded(&self) -> bool {
        self.consecutive_failures > 0 || self.state == SlotState::Disabled
    }
}
