//! [`FlowStatus`] — the terminal disposition of a flow run.

/// Terminal state of a [`crate::Flow`] run.
///
/// `FlowStatus` is a sum of three disjoint states, never a bitmask: a run is
/// exactly one of these when it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStatus {
    /// Every extractor was drained; every record traversed normally or was
    /// `continue`-skipped.
    Clean,
    /// The flow was broken from inside: a node emitted a break directive,
    /// or a break-targeted interrupter reached this flow.
    Dirty,
    /// A node raised an unrecoverable error during traversal.
    Exception,
}

impl FlowStatus {
    pub fn is_clean(self) -> bool {
        matches!(self, Self::Clean)
    }

    pub fn is_dirty(self) -> bool {
        matches!(self, Self::Dirty)
    }

    pub fn is_exception(self) -> bool {
        matches!(self, Self::Exception)
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Clean => "clean",
            Self::Dirty => "dirty",
            Self::Exception => "exception",
        };
        f.write_str(s)
    }
}
