//! Identifier generation.

use uuid::Uuid;

/// Generate a fresh task identifier.
#[must_use]
pub fn generate_task_id() -> String {
    Uuid::new_v4().to_string()
}
