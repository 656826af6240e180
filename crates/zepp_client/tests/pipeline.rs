use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::Mutex;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zepp_client::config::{Config, Credentials, Endpoints};
use zepp_client::pipeline::run_at;
use zepp_client::{EventSource, FieldValue, Point, PointWriter, ZeppError};

#[derive(Default)]
struct RecordingWriter {
    batches: Mutex<Vec<Vec<Point>>>,
}

impl RecordingWriter {
    fn points(&self) -> Vec<Point> {
        self.batches.lock().unwrap().concat()
    }
}

#[async_trait]
impl PointWriter for RecordingWriter {
    async fn write(
        &self,
        points: &[Point],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.batches.lock().unwrap().push(points.to_vec());
        Ok(())
    }
}

struct FailingWriter;

#[async_trait]
impl PointWriter for FailingWriter {
    async fn write(
        &self,
        _points: &[Point],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("store unavailable".into())
    }
}

fn token_config(server: &MockServer) -> Config {
    let creds = Credentials {
        app_token: Some(SecretString::new("tok".into())),
        user_id: Some("1234".into()),
        ..Credentials::default()
    };
    Config::new(creds, Endpoints::single(&server.uri()))
}

fn noon_on_second() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap()
}

fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, h, m, 0).unwrap()
}

/// A night and two activities the way the band summarises a day.
fn vendor_summary() -> Value {
    json!({
        "v": 6,
        "slp": {
            "st": 1704067200, "ed": 1704076200, "dp": 60, "lt": 90, "wk": 1,
            "stage": [
                {"start": 0, "stop": 90, "mode": 4},
                {"start": 90, "stop": 150, "mode": 5},
                {"start": 150, "stop": 151, "mode": 7}
            ]
        },
        "stp": {
            "ttl": 1234, "dis": 900, "cal": 45, "wk": 20, "rn": 3,
            "stage": [
                {"start": 480, "stop": 500, "mode": 1, "dis": 700, "cal": 30, "step": 1000},
                {"start": 600, "stop": 610, "mode": 4, "dis": 200, "cal": 15, "step": 234}
            ]
        },
        "goal": 8000,
        "tz": "0",
        "sn": "ABCDEF123",
        "sync": 1704150000
    })
}

fn encode(summary: &Value) -> String {
    STANDARD.encode(summary.to_string())
}

fn band_day(date: &str, summary: &Value, heart_rate: &[u8]) -> Value {
    json!({
        "uid": "1234",
        "data_type": 0,
        "date_time": date,
        "source": 256,
        "summary": encode(summary),
        "data_hr": STANDARD.encode(heart_rate)
    })
}

async fn mount_band_data(server: &MockServer, days: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/v1/data/band_data.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": 1, "message": "success", "data": days})),
        )
        .mount(server)
        .await;
}

fn field<'a>(p: &'a Point, key: &str) -> Option<&'a FieldValue> {
    p.fields.get(key)
}

#[tokio::test]
async fn day_with_too_many_readings_is_skipped_and_sibling_is_written() {
    let server = MockServer::start().await;
    mount_band_data(
        &server,
        vec![
            band_day("2024-01-01", &vendor_summary(), &[70, 72, 255, 71]),
            band_day("2024-01-02", &json!({"goal": 8000}), &[60; 1441]),
        ],
    )
    .await;

    let writer = RecordingWriter::default();
    let report = run_at(&token_config(&server), &writer, noon_on_second())
        .await
        .expect("run");

    assert_eq!(report.days_fetched, 2);
    assert_eq!(report.days_decoded, 1);
    assert_eq!(report.failed_days, vec![NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()]);
    // 2 activities, 2 sleep stages, 3 heart-rate readings, totals, sleep
    // summary, goal and sync
    assert_eq!(report.points_written, 11);

    let batches = writer.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert!(batch.iter().all(|p| p.measurement == "zepp"));

    let stages: Vec<_> = batch.iter().filter_map(|p| field(p, "sleep_stage")).collect();
    assert_eq!(
        stages,
        vec![&FieldValue::Str("light".into()), &FieldValue::Str("deep".into())]
    );

    let heart: Vec<_> = batch
        .iter()
        .filter_map(|p| field(p, "heart_rate").map(|v| (p.timestamp, v.clone())))
        .collect();
    assert_eq!(
        heart,
        vec![
            (at(1, 0, 1), FieldValue::Int(70)),
            (at(1, 0, 2), FieldValue::Int(72)),
            (at(1, 0, 4), FieldValue::Int(71)),
        ]
    );
}

#[tokio::test]
async fn day_with_unknown_sleep_mode_is_skipped() {
    let server = MockServer::start().await;
    let bad = json!({"slp": {"st": 0, "ed": 0, "dp": 0, "lt": 0, "stage": [
        {"start": 0, "stop": 60, "mode": 6}
    ]}});
    mount_band_data(
        &server,
        vec![
            band_day("2024-01-01", &bad, &[]),
            band_day("2024-01-02", &json!({"goal": 9000}), &[]),
        ],
    )
    .await;

    let writer = RecordingWriter::default();
    let report = run_at(&token_config(&server), &writer, noon_on_second())
        .await
        .expect("run");

    assert_eq!(report.failed_days, vec![NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()]);
    assert_eq!(report.points_written, 1);
    let points = writer.points();
    assert_eq!(field(&points[0], "step_goal"), Some(&FieldValue::Int(9000)));
}

#[tokio::test]
async fn day_counters_are_written_at_end_of_day() {
    let server = MockServer::start().await;
    mount_band_data(&server, vec![band_day("2024-01-01", &vendor_summary(), &[])]).await;

    let writer = RecordingWriter::default();
    run_at(&token_config(&server), &writer, noon_on_second())
        .await
        .expect("run");

    let points = writer.points();
    let end_of_day = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap();
    let counter = |key: &str| {
        points
            .iter()
            .find(|p| p.fields.contains_key(key))
            .unwrap_or_else(|| panic!("no {key} point"))
    };

    let totals = counter("total_steps");
    assert_eq!(totals.timestamp, end_of_day);
    assert_eq!(totals.tags["activity_type"], "steps");
    assert_eq!(field(totals, "total_steps"), Some(&FieldValue::Int(1234)));
    assert_eq!(field(totals, "recorded_activities"), Some(&FieldValue::Int(2)));

    assert_eq!(field(counter("step_goal"), "step_goal"), Some(&FieldValue::Int(8000)));
    assert_eq!(
        field(counter("last_sync"), "last_sync"),
        Some(&FieldValue::Int(1704150000))
    );

    let night = counter("total_sleep_min");
    assert_eq!(night.timestamp, end_of_day);
    assert_eq!(field(night, "total_sleep_min"), Some(&FieldValue::Int(150)));
    assert_eq!(field(night, "deep_sleep_min"), Some(&FieldValue::Int(60)));
    assert_eq!(
        field(night, "slept_from"),
        Some(&FieldValue::Str("2024-01-01T00:00:00Z".into()))
    );
    assert_eq!(
        field(night, "slept_to"),
        Some(&FieldValue::Str("2024-01-01T02:30:00Z".into()))
    );

    let running = points
        .iter()
        .find(|p| p.tags.get("activity_type").map(String::as_str) == Some("running"))
        .expect("running bucket");
    assert_eq!(running.timestamp, at(1, 10, 0));
    assert_eq!(field(running, "activity_duration_m"), Some(&FieldValue::Int(10)));
}

#[tokio::test]
async fn serial_tag_follows_latest_summary_that_names_one() {
    let server = MockServer::start().await;
    mount_band_data(
        &server,
        vec![
            band_day("2024-01-01", &json!({"goal": 8000}), &[]),
            band_day("2024-01-02", &json!({"goal": 9000, "sn": "BAND42"}), &[]),
        ],
    )
    .await;

    let writer = RecordingWriter::default();
    run_at(&token_config(&server), &writer, noon_on_second())
        .await
        .expect("run");

    let batches = writer.batches.lock().unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0][0].tags["serial_num"], "unknown");
    assert_eq!(batches[1][0].tags["serial_num"], "BAND42");
}

#[tokio::test]
async fn records_after_now_are_not_written() {
    let server = MockServer::start().await;
    let hourly: Vec<Value> = (0..24u32)
        .map(|h| json!({"start": h * 60, "stop": h * 60 + 10, "mode": 1, "dis": 10, "cal": 1, "step": 10}))
        .collect();
    let today = json!({"stp": {"ttl": 240, "dis": 240, "cal": 24, "stage": hourly}});
    mount_band_data(&server, vec![band_day("2024-01-02", &today, &[65; 1440])]).await;

    let writer = RecordingWriter::default();
    let now = noon_on_second();
    run_at(&token_config(&server), &writer, now)
        .await
        .expect("run");

    let points = writer.points();
    assert!(points.iter().all(|p| p.timestamp <= now));
    // buckets at 00:00 through 12:00 inclusive
    let buckets = points.iter().filter(|p| p.fields.contains_key("steps")).count();
    assert_eq!(buckets, 13);
    // readings at 00:01 through 12:00
    let readings = points.iter().filter(|p| p.fields.contains_key("heart_rate")).count();
    assert_eq!(readings, 720);
    let totals = points
        .iter()
        .find(|p| p.fields.contains_key("total_steps"))
        .expect("totals");
    assert_eq!(totals.timestamp, now);
}

#[tokio::test]
async fn events_are_written_after_days_and_missing_sources_are_skipped() {
    let server = MockServer::start().await;
    mount_band_data(&server, vec![band_day("2024-01-02", &json!({"sn": "BAND42"}), &[])]).await;
    Mock::given(method("GET"))
        .and(path("/users/1234/events"))
        .and(query_param("eventType", "all_day_stress"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [
            {
                "timestamp": 1704153600000i64,
                "minStress": 10, "maxStress": 70, "avgStress": 30,
                "relaxProportion": 50, "normalProportion": 30,
                "mediumProportion": 15, "highProportion": 5,
                "data": "[{\"time\":1704157200000,\"value\":25}]"
            },
            {"timestamp": 1704240000000i64, "minStress": 1, "maxStress": 2, "avgStress": 1,
             "relaxProportion": 100, "normalProportion": 0, "mediumProportion": 0, "highProportion": 0}
        ]})))
        .mount(&server)
        .await;

    let writer = RecordingWriter::default();
    let report = run_at(&token_config(&server), &writer, noon_on_second())
        .await
        .expect("run");

    assert_eq!(
        report.skipped_event_sources,
        vec![EventSource::BloodOxygen, EventSource::Pai]
    );
    let batches = writer.batches.lock().unwrap();
    let events = batches.last().expect("event batch");
    // the second stress day lies after now
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].tags["stress"], "daily");
    assert_eq!(events[0].timestamp, at(2, 0, 0));
    assert_eq!(field(&events[1], "current_stress_level"), Some(&FieldValue::Int(25)));
    assert!(events.iter().all(|p| p.tags["serial_num"] == "BAND42"));
}

#[tokio::test]
async fn expired_session_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/data/band_data.json"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let writer = RecordingWriter::default();
    let err = run_at(&token_config(&server), &writer, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, ZeppError::SessionExpired { .. }));
    assert!(writer.batches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_credentials_abort_before_network() {
    let server = MockServer::start().await;
    let config = Config::new(Credentials::default(), Endpoints::single(&server.uri()));
    let err = run_at(&config, &RecordingWriter::default(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, ZeppError::Configuration(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn writer_failure_aborts_run() {
    let server = MockServer::start().await;
    mount_band_data(&server, vec![band_day("2024-01-01", &vendor_summary(), &[])]).await;

    let err = run_at(&token_config(&server), &FailingWriter, noon_on_second())
        .await
        .unwrap_err();
    assert!(matches!(err, ZeppError::Sink(_)));
}
