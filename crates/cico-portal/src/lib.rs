//! Attendance portal adapter (HTTP).
//!
//! Implements the `cico-core` `AttendancePort` over the portal's student endpoints.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use cico_core::{
    errors::Error,
    ports::AttendancePort,
    records::{AttendanceRecord, StudentProfile},
    Result,
};

const LOGIN_PATH: &str = "/student/studentLoginApi-web";
const HISTORY_PATH: &str = "/student/getStudentCheckInCheckOutHistory";
const PROFILE_PATH: &str = "/student/v1/getCurrentStudent";

#[derive(Clone, Debug)]
pub struct PortalClient {
    base_url: String,
    http: reqwest::Client,
}

impl PortalClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("portal http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json(&self, path: &str, token: &str, query: &[(&str, String)]) -> Result<Value> {
        let resp = self
            .http
            .get(self.url(path))
            .header(reqwest::header::AUTHORIZATION, token)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Portal(format!("request error: {e}")))?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::AuthExpired);
        }
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        resp.json()
            .await
            .map_err(|e| Error::Portal(format!("json error: {e}")))
    }
}

async fn status_error(resp: reqwest::Response) -> Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Error::Portal(format!(
        "{status} {}",
        body.chars().take(200).collect::<String>()
    ))
}

/// Size of the history window requested for a given record limit.
pub fn history_window_days(limit: u32) -> u64 {
    if limit > 365 {
        3650
    } else if limit > 30 {
        365
    } else {
        30
    }
}

fn history_range(limit: u32, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = today
        .checked_sub_days(Days::new(history_window_days(limit)))
        .unwrap_or(NaiveDate::MIN);
    (start, today)
}

fn parse_login(v: &Value) -> Result<String> {
    let token = v
        .get("data")
        .and_then(|d| d.get("AccessToken"))
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty());

    match (v.get("success").and_then(|s| s.as_bool()), token) {
        (Some(true), Some(token)) => Ok(token.to_string()),
        _ => {
            let msg = v
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Invalid response");
            Err(Error::Portal(format!("login failed: {msg}")))
        }
    }
}

fn parse_attendance(v: &Value) -> Vec<AttendanceRecord> {
    let Some(items) = v
        .get("response")
        .and_then(|r| r.get("attendance"))
        .and_then(|a| a.as_array())
    else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(rec) => Some(rec),
            Err(e) => {
                warn!(error = %e, "skipping malformed attendance entry");
                None
            }
        })
        .collect()
}

#[async_trait]
impl AttendancePort for PortalClient {
    async fn login(&self, email: &str, password: &str) -> Result<String> {
        debug!("portal login");
        let resp = self
            .http
            .post(self.url(LOGIN_PATH))
            .query(&[("email", email), ("password", password)])
            .send()
            .await
            // The request URL carries the credentials.
            .map_err(|e| Error::Portal(format!("request error: {}", e.without_url())))?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::InvalidCredentials);
        }
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| Error::Portal(format!("json error: {e}")))?;
        parse_login(&v)
    }

    async fn attendance(&self, token: &str, limit: u32) -> Result<Vec<AttendanceRecord>> {
        let (start, end) = history_range(limit, Local::now().date_naive());
        debug!(%start, %end, limit, "fetching attendance");

        let query = [
            ("startDate", start.format("%Y-%m-%d").to_string()),
            ("endDate", end.format("%Y-%m-%d").to_string()),
            ("limit", limit.to_string()),
            ("offset", "0".to_string()),
            ("type", "All".to_string()),
        ];
        let v = self.get_json(HISTORY_PATH, token, &query).await?;
        Ok(parse_attendance(&v))
    }

    async fn profile(&self, token: &str) -> Result<StudentProfile> {
        let v = self.get_json(PROFILE_PATH, token, &[]).await?;
        if v.is_null() {
            return Err(Error::Portal("empty profile response".to_string()));
        }
        Ok(serde_json::from_value(v)?)
    }
}
