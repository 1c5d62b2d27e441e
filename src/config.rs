//! Configuration types for management agents.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mad::{QKEY_SMA, QPN_SMA};
use crate::retry::{DEFAULT_MAX_TIMEOUT, DEFAULT_MIN_TIMEOUT};
use crate::type_alias::*;

/// Agent configuration.
///
/// Controls queue sizing, the retransmission policy and a few behaviours
/// that are integration decisions rather than protocol rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Completion queue depth.
    /// Default: 8
    pub num_cqes: usize,
    /// Send queue depth.
    /// Default: 4
    pub num_send_wqes: usize,
    /// Receive queue depth.
    /// Default: 2
    pub num_recv_wqes: usize,
    /// Initial retransmission timeout.
    /// Default: 250ms
    pub min_timeout: Duration,
    /// Retransmission timeout ceiling. A request whose backed-off timeout
    /// exceeds this value is abandoned.
    /// Default: 10s
    pub max_timeout: Duration,
    /// Destination QPN for requests issued without an address.
    /// Default: `QPN_SMA`
    pub sm_qpn: Qpn,
    /// Destination Q_Key for requests issued without an address.
    /// Default: `QKEY_SMA`
    pub sm_qkey: QKey,
    /// Answer MADs without a matching handler with an unsupported-attribute trap.
    /// Default: true
    pub trap_unsupported: bool,
    /// Record abandoned TIDs so that they can be collected with
    /// [`Agent::take_abandoned()`](crate::Agent::take_abandoned).
    /// Default: false
    pub report_abandoned: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            num_cqes: 8,
            num_send_wqes: 4,
            num_recv_wqes: 2,
            min_timeout: DEFAULT_MIN_TIMEOUT,
            max_timeout: DEFAULT_MAX_TIMEOUT,
            sm_qpn: QPN_SMA,
            sm_qkey: QKEY_SMA,
            trap_unsupported: true,
            report_abandoned: false,
        }
    }
}

impl AgentConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the completion queue depth.
    pub fn with_num_cqes(mut self, num_cqes: usize) -> Self {
        self.num_cqes = num_cqes;
        self
    }

    /// Set the send queue depth.
    pub fn with_num_send_wqes(mut self, num_send_wqes: usize) -> Self {
        self.num_send_wqes = num_send_wqes;
        self
    }

    /// Set the receive queue depth.
    pub fn with_num_recv_wqes(mut self, num_recv_wqes: usize) -> Self {
        self.num_recv_wqes = num_recv_wqes;
        self
    }

    /// Set the retransmission timeout bounds.
    ///
    /// A zero bound selects the default one. See [`RetryTimer::new()`](crate::RetryTimer::new)
    /// for how the bounds are sanitized.
    pub fn with_timeouts(mut self, min_timeout: Duration, max_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self.max_timeout = max_timeout;
        self
    }

    /// Set the default destination used for requests issued without an address.
    pub fn with_sm_qp(mut self, sm_qpn: Qpn, sm_qkey: QKey) -> Self {
        self.sm_qpn = sm_qpn;
        self.sm_qkey = sm_qkey;
        self
    }

    /// Enable or disable trap replies to unsupported MADs.
    pub fn with_trap_unsupported(mut self, trap_unsupported: bool) -> Self {
        self.trap_unsupported = trap_unsupported;
        self
    }

    /// Enable or disable recording of abandoned TIDs.
    pub fn with_report_abandoned(mut self, report_abandoned: bool) -> Self {
        self.report_abandoned = report_abandoned;
        self
    }
}
