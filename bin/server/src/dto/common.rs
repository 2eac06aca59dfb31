use serde::{Deserialize, Serialize};

/// Common result structure for operations
#[derive(Debug, Serialize, Deserialize)]
pub struct Result {
    pub message: String,
    pub success: bool,
}
