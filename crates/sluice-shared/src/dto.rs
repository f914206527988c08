//! Data Transfer Objects - request/response types for the demo API.

use serde::{Deserialize, Serialize};

/// Request to create a widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWidgetRequest {
    pub name: String,
}

/// A widget as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetResponse {
    pub id: u64,
    pub name: String,
}
