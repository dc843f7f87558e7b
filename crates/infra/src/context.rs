use chrono::{DateTime, Utc};

use stockbook_core::UserId;

/// Who performs a write and when.
///
/// Passed explicitly to every mutating call; the core keeps no session state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WriteContext {
    pub acting_user: Option<UserId>,
    pub at: DateTime<Utc>,
}

impl WriteContext {
    pub fn new(acting_user: Option<UserId>, at: DateTime<Utc>) -> Self {
        Self { acting_user, at }
    }

    /// Context stamped with the current wall-clock time.
    pub fn now(acting_user: impl Into<Option<UserId>>) -> Self {
        Self::new(acting_user.into(), Utc::now())
    }
}
