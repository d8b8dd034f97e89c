use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use serde::Deserialize;
use serde_json::json;

use crate::models::{Lesson, LessonCode};
use crate::source::{ClassId, FetchError, LessonSource};

/// JSON-RPC error code WebUntis returns once the session cookie expired.
const NOT_AUTHENTICATED: i64 = -8520;

/// Minimal WebUntis JSON-RPC client: authenticate, resolve the school's time
/// grid once, then fetch class timetables day by day. Session state lives in
/// the cookie jar, so an expired session is healed by authenticating again.
pub struct UntisClient {
    http: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
    /// Period labels ("1", "2", ...) keyed by start time, from the time grid.
    period_names: BTreeMap<NaiveTime, String>,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct NamedElement {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct Period {
    date: u32,
    #[serde(rename = "startTime")]
    start_time: u32,
    #[serde(rename = "endTime")]
    end_time: u32,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    te: Vec<NamedElement>,
    #[serde(default)]
    su: Vec<NamedElement>,
    #[serde(default)]
    ro: Vec<NamedElement>,
}

#[derive(Deserialize)]
struct TimegridDay {
    #[serde(rename = "timeUnits", default)]
    time_units: Vec<TimeUnit>,
}

#[derive(Deserialize)]
struct TimeUnit {
    name: String,
    #[serde(rename = "startTime")]
    start_time: u32,
}

impl UntisClient {
    /// Connects to `https://{server}/WebUntis/jsonrpc.do` for the given
    /// school, authenticates, and loads the time grid used for period labels.
    pub async fn login(
        server: &str,
        school: &str,
        username: &str,
        password: &str,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .context("failed to build HTTP client")?;
        let mut client = Self {
            http,
            endpoint: format!("https://{server}/WebUntis/jsonrpc.do?school={school}"),
            username: username.to_string(),
            password: password.to_string(),
            period_names: BTreeMap::new(),
        };

        client
            .authenticate()
            .await
            .context("WebUntis authentication failed")?;
        client.period_names = client
            .fetch_timegrid()
            .await
            .context("failed to load the school's time grid")?;
        Ok(client)
    }

    async fn authenticate(&self) -> Result<(), FetchError> {
        self.rpc(
            "authenticate",
            json!({
                "user": self.username,
                "password": self.password,
                "client": "czujka-untis",
            }),
        )
        .await?;
        Ok(())
    }

    async fn fetch_timegrid(&self) -> Result<BTreeMap<NaiveTime, String>, FetchError> {
        let result = self.rpc("getTimegridUnits", json!({})).await?;
        let days: Vec<TimegridDay> = serde_json::from_value(result)
            .map_err(|err| FetchError::Payload(format!("bad time grid: {err}")))?;

        let mut names = BTreeMap::new();
        for day in days {
            for unit in day.time_units {
                if let Some(start) = parse_time(unit.start_time) {
                    names.entry(start).or_insert(unit.name);
                }
            }
        }
        Ok(names)
    }

    async fn rpc(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, FetchError> {
        let request = json!({
            "id": "czujka-untis",
            "method": method,
            "params": params,
            "jsonrpc": "2.0",
        });

        let response: RpcResponse = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(FetchError::Service {
                code: error.code,
                message: error.message,
            });
        }
        response
            .result
            .ok_or_else(|| FetchError::Payload(format!("{method} returned neither result nor error")))
    }

    async fn fetch_timetable_raw(
        &self,
        date: NaiveDate,
        class_id: ClassId,
    ) -> Result<serde_json::Value, FetchError> {
        let day = format_date(date);
        self.rpc(
            "getTimetable",
            json!({
                "options": {
                    "element": { "id": class_id, "type": 1 },
                    "startDate": day,
                    "endDate": day,
                    "showLsText": true,
                    "klasseFields": ["name"],
                    "teacherFields": ["name"],
                    "subjectFields": ["name"],
                    "roomFields": ["name"],
                }
            }),
        )
        .await
    }
}

#[async_trait]
impl LessonSource for UntisClient {
    async fn fetch_lessons(
        &self,
        date: NaiveDate,
        class_id: ClassId,
    ) -> Result<Vec<Lesson>, FetchError> {
        let result = match self.fetch_timetable_raw(date, class_id).await {
            Err(FetchError::Service { code, .. }) if code == NOT_AUTHENTICATED => {
                tracing::info!("WebUntis session expired, logging in again");
                self.authenticate().await?;
                self.fetch_timetable_raw(date, class_id).await?
            }
            other => other?,
        };

        let periods: Vec<Period> = serde_json::from_value(result)
            .map_err(|err| FetchError::Payload(format!("bad timetable: {err}")))?;
        periods
            .into_iter()
            .map(|period| lesson_from_period(period, &self.period_names))
            .collect()
    }
}

fn format_date(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

fn parse_date(raw: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt((raw / 10_000) as i32, raw / 100 % 100, raw % 100)
}

/// Times come as `hmm`/`hhmm` integers, e.g. `800` for 08:00.
fn parse_time(raw: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(raw / 100, raw % 100, 0)
}

fn lesson_from_period(
    period: Period,
    period_names: &BTreeMap<NaiveTime, String>,
) -> Result<Lesson, FetchError> {
    let date = parse_date(period.date)
        .ok_or_else(|| FetchError::Payload(format!("bad period date {}", period.date)))?;
    let start_time = parse_time(period.start_time)
        .ok_or_else(|| FetchError::Payload(format!("bad start time {}", period.start_time)))?;
    let end_time = parse_time(period.end_time)
        .ok_or_else(|| FetchError::Payload(format!("bad end time {}", period.end_time)))?;

    let code = match period.code.as_deref() {
        Some("cancelled") => LessonCode::Cancelled,
        Some("irregular") => LessonCode::Irregular,
        _ => LessonCode::Regular,
    };

    let display_name = period_names
        .get(&start_time)
        .cloned()
        .unwrap_or_else(|| format!("{:02}:{:02}", start_time.hour(), start_time.minute()));

    let names = |elements: Vec<NamedElement>| {
        elements
            .into_iter()
            .map(|element| element.name)
            .filter(|name| !name.is_empty())
            .collect()
    };

    Ok(Lesson {
        date,
        start_time,
        end_time,
        code,
        subjects: names(period.su),
        teachers: names(period.te),
        rooms: names(period.ro),
        display_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_and_time_integers_round_trip() {
        let date = NaiveDate::from_ymd_opt(2022, 1, 17).unwrap();
        assert_eq!(format_date(date), 20220117);
        assert_eq!(parse_date(20220117), Some(date));
        assert_eq!(parse_time(800), NaiveTime::from_hms_opt(8, 0, 0));
        assert_eq!(parse_time(1345), NaiveTime::from_hms_opt(13, 45, 0));
        assert_eq!(parse_time(2500), None);
    }

    #[test]
    fn period_maps_onto_a_lesson() {
        let raw = serde_json::json!({
            "id": 7,
            "date": 20220117,
            "startTime": 800,
            "endTime": 845,
            "code": "cancelled",
            "te": [{"id": 1, "name": "Smith"}],
            "su": [{"id": 2, "name": "Maths"}],
            "ro": [{"id": 3, "name": "R101"}],
        });
        let period: Period = serde_json::from_value(raw).unwrap();
        let mut grid = BTreeMap::new();
        grid.insert(NaiveTime::from_hms_opt(8, 0, 0).unwrap(), "1".to_string());

        let lesson = lesson_from_period(period, &grid).unwrap();
        assert_eq!(lesson.code, LessonCode::Cancelled);
        assert_eq!(lesson.display_name, "1");
        assert!(lesson.teachers.contains("Smith"));
        assert!(lesson.subjects.contains("Maths"));
        assert!(lesson.rooms.contains("R101"));
    }

    #[test]
    fn missing_code_means_regular() {
        let raw = serde_json::json!({
            "date": 20220117,
            "startTime": 1000,
            "endTime": 1045,
        });
        let period: Period = serde_json::from_value(raw).unwrap();
        let lesson = lesson_from_period(period, &BTreeMap::new()).unwrap();
        assert_eq!(lesson.code, LessonCode::Regular);
        // No grid entry: fall back to the start time as the label.
        assert_eq!(lesson.display_name, "10:00");
    }
}
