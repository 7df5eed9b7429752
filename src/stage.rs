use std::fmt;

/// Position of a single invocation in the linear pipeline.
///
/// Invocations only ever move forward through these; there are no retries or
/// backward transitions inside the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Idle,
    Fetching,
    Decoding,
    Invoking,
    Thresholding,
    Persisting,
    Succeeded,
    Failed,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Decoding => "decoding",
            Self::Invoking => "invoking",
            Self::Thresholding => "thresholding",
            Self::Persisting => "persisting",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
