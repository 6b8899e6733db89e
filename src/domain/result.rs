//! Result type alias for Lineage

use super::errors::LineageError;

/// Result type alias for Lineage operations
///
/// # Examples
///
/// ```
/// use lineage::domain::result::Result;
/// use lineage::domain::errors::LineageError;
///
/// fn example_function() -> Result<String> {
///     Ok("success".to_string())
/// }
///
/// fn failing_function() -> Result<()> {
///     Err(LineageError::Validation("Invalid input".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, LineageError>;
