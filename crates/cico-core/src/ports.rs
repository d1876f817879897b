use async_trait::async_trait;

use crate::{
    messaging::types::Media,
    records::{AttendanceRecord, StudentProfile},
    Result,
};

/// Record limit used for "all time" bulk exports.
pub const ALL_RECORDS: u32 = 9999;

/// Attendance portal port.
///
/// Implementations return `Error::AuthExpired` when the portal rejects the token, so callers
/// can ask the user to `/login` again instead of reporting an empty history.
#[async_trait]
pub trait AttendancePort: Send + Sync {
    /// Exchange credentials for an access token.
    async fn login(&self, email: &str, password: &str) -> Result<String>;

    /// Newest-first history, at most `limit` entries.
    async fn attendance(&self, token: &str, limit: u32) -> Result<Vec<AttendanceRecord>>;

    async fn profile(&self, token: &str) -> Result<StudentProfile>;
}

/// Image processing port.
///
/// Never fails toward the caller: on any internal error it hands back the original
/// reference as `Media::Url`.
#[async_trait]
pub trait ImageProcessor: Send + Sync {
    async fn process(&self, image_ref: &str, stretch: bool) -> Media;
}
