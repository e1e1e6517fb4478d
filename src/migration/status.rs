//! Migration status tracking

/// Registered migrations split around the driver's watermark
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Sorted ids up to and including the watermark
    pub applied: Vec<String>,

    /// Sorted ids after the watermark
    pub pending: Vec<String>,

    /// Most recently persisted id, as reported by the driver
    pub watermark: Option<String>,

    /// Total number of registered migrations
    pub total: usize,

    /// Number of applied migrations
    pub applied_count: usize,

    /// Number of pending migrations
    pub pending_count: usize,
}

impl MigrationStatus {
    /// Split `sorted` around `watermark`
    ///
    /// A watermark that is not registered leaves nothing known to be
    /// applied and nothing pending (see [`is_watermark_unknown`](Self::is_watermark_unknown)).
    #[must_use]
    pub fn from_sorted(mut sorted: Vec<String>, watermark: Option<String>) -> Self {
        let (applied, pending) = match &watermark {
            None => (Vec::new(), sorted),
            Some(last) => match sorted.iter().position(|id| id == last) {
                Some(pos) => {
                    let pending = sorted.split_off(pos + 1);
                    (sorted, pending)
                }
                None => (Vec::new(), Vec::new()),
            },
        };

        let applied_count = applied.len();
        let pending_count = pending.len();

        Self {
            applied,
            pending,
            watermark,
            total: applied_count + pending_count,
            applied_count,
            pending_count,
        }
    }

    /// Check if all migrations are applied
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending_count == 0 && !self.is_watermark_unknown()
    }

    /// The driver reports a watermark that matches no registered migration
    #[must_use]
    pub fn is_watermark_unknown(&self) -> bool {
        self.watermark.is_some() && self.applied.is_empty()
    }

    #[must_use]
    pub fn latest_applied(&self) -> Option<&str> {
        self.applied.last().map(String::as_str)
    }

    #[must_use]
    pub fn next_pending(&self) -> Option<&str> {
        self.pending.first().map(String::as_str)
    }
}
