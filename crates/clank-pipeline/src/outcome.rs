use uuid::Uuid;

/// Why a job finished without doing any work. Skips are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    BreakerOpen,
    FeedbackNotFound,
    AlreadyProcessed,
    PartialNotFound,
    ProductNotFound,
    ProductDeleted,
    OrganizationNotFound,
    OrganizationDeleted,
    QuotaExhausted,
    NoContent,
    EmptyDescription,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::BreakerOpen => "breaker open",
            SkipReason::FeedbackNotFound => "feedback not found",
            SkipReason::AlreadyProcessed => "feedback already processed",
            SkipReason::PartialNotFound => "partial not found",
            SkipReason::ProductNotFound => "product not found",
            SkipReason::ProductDeleted => "product deleted",
            SkipReason::OrganizationNotFound => "organization not found",
            SkipReason::OrganizationDeleted => "organization deleted",
            SkipReason::QuotaExhausted => "usage quota exhausted",
            SkipReason::NoContent => "no processable content",
            SkipReason::EmptyDescription => "empty description",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Skipped(SkipReason),
    Processed {
        issues: usize,
        suggestions: usize,
        tokens: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOutcome {
    Skipped(SkipReason),
    /// The partial became a new cluster.
    Created { cluster_id: Uuid, tokens: i64 },
    /// The partial was folded into an existing cluster.
    Merged { cluster_id: Uuid, tokens: i64 },
    /// Its feedback was already linked to the chosen cluster; the partial was
    /// deleted without counting it again.
    Discarded,
}

/// What a recovery walk did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalkSummary {
    pub visited: usize,
    pub enqueued: usize,
}

/// Result of running any [`Job`](crate::Job).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Process(ProcessOutcome),
    Aggregate(AggregateOutcome),
    Walk(WalkSummary),
}
