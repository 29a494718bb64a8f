use crate::model::UnitId;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Bad block size, unknown or repeated unit id. Never worth retrying.
    InvalidRequest(String),
    /// Fewer units are free than the block needs.
    InsufficientInventory { requested: usize, available: usize },
    /// The commit lost a race for this unit. Retry from a fresh snapshot.
    Conflict(UnitId),
    StoreUnavailable(String),
}

impl EngineError {
    /// Stable label for metrics and callers.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::InsufficientInventory { .. } => "insufficient_inventory",
            EngineError::Conflict(_) => "conflict",
            EngineError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::InsufficientInventory {
                requested,
                available,
            } => write!(
                f,
                "cannot allocate {requested} units: only {available} available"
            ),
            EngineError::Conflict(id) => {
                write!(f, "conflict: unit {id} was taken by a concurrent request")
            }
            EngineError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::StoreUnavailable(e.to_string())
    }
}
