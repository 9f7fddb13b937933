#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Cannot read source '{source_ref}': {reason}")]
    Input { source_ref: String, reason: String },

    #[error("Task store I/O failed at {path}: {reason}")]
    StoreIo { path: String, reason: String },

    #[error("Task store {path} is locked ({holder}); gave up after {waited_ms} ms")]
    StoreLocked {
        path: String,
        waited_ms: u64,
        holder: String,
    },

    #[error("Implicit detection unavailable: {0}")]
    Detector(String),

    #[error("Feedback store I/O failed at {path}: {reason}")]
    FeedbackIo { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AppError {
    /// Store, lock and config failures abort a run; the rest are local.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            Self::StoreIo { .. } | Self::StoreLocked { .. } | Self::InvalidConfig(_)
        )
    }
}
