//! Attendance portal data model.
//!
//! The portal is loose about types (numbers vs strings, `""` vs `null`), so every
//! optional field is normalized at deserialization time: empty strings and zero
//! durations become `None`.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// One check-in/check-out entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    #[serde(rename = "checkInDate", default, deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub check_in_time: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub check_out_time: Option<String>,
    #[serde(
        rename = "workingHour",
        default,
        deserialize_with = "lenient_opt_seconds"
    )]
    pub working_seconds: Option<u64>,
    #[serde(rename = "workReport", default, deserialize_with = "lenient_opt_string")]
    pub work_report: Option<String>,
    #[serde(rename = "checkInImage", default, deserialize_with = "lenient_opt_string")]
    pub check_in_image: Option<String>,
    #[serde(rename = "checkOutImage", default, deserialize_with = "lenient_opt_string")]
    pub check_out_image: Option<String>,
}

/// The logged-in student's profile card.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub full_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub dob: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub mobile: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub current_course: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub apply_for_course: Option<String>,
    #[serde(default)]
    pub course_response: Option<CourseInfo>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub join_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub active: bool,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub profile_pic: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInfo {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub course_fees: Option<String>,
}

impl StudentProfile {
    pub fn course_fees(&self) -> Option<&str> {
        self.course_response
            .as_ref()
            .and_then(|c| c.course_fees.as_deref())
    }
}

fn value_to_string(v: Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_opt_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_string(Value::deserialize(d)?))
}

fn lenient_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_string(Value::deserialize(d)?).unwrap_or_default())
}

fn lenient_bool<'de, D>(d: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        Value::String(s) => matches!(s.trim(), "true" | "1"),
        _ => false,
    })
}

fn lenient_opt_seconds<'de, D>(d: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f > 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f > 0.0).map(|f| f as u64),
        _ => None,
    };
    Ok(secs.filter(|s| *s > 0))
}
