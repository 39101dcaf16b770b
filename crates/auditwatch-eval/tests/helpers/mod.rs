#![allow(dead_code)]

use std::io::Cursor;

use auditwatch_eval::{Alert, BatchSource, RunStats, Runner, WatchConfig};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde_json::{Value, json};

/// Reference instant all fixture timestamps are offsets from.
pub fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 7, 10)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

/// Upstream-style timestamp (`...Z`) `millis` after [`base`].
pub fn stamp_ms(millis: i64) -> String {
    (base() + TimeDelta::milliseconds(millis))
        .format("%Y-%m-%dT%H:%M:%S%.fZ")
        .to_string()
}

pub fn stamp(secs: i64) -> String {
    stamp_ms(secs * 1000)
}

pub fn failed_login(ip: &str, user: &str, secs: i64) -> Value {
    failed_login_ms(ip, user, secs * 1000)
}

pub fn failed_login_ms(ip: &str, user: &str, millis: i64) -> Value {
    json!({
        "event": "login_attempt",
        "username": user,
        "success": false,
        "client_ip": ip,
        "timestamp": stamp_ms(millis),
    })
}

pub fn successful_login(ip: &str, user: &str, secs: i64) -> Value {
    json!({
        "event": "login_attempt",
        "username": user,
        "success": true,
        "client_ip": ip,
        "timestamp": stamp(secs),
    })
}

pub fn read_attempt(user: &str, role: &str, allowed: bool, secs: i64) -> Value {
    json!({
        "event": "patient_read_attempt",
        "username": user,
        "role": role,
        "patient_id": "p-001",
        "record_exists": true,
        "allowed": allowed,
        "client_ip": "10.1.1.20",
        "timestamp": stamp(secs),
    })
}

/// Render events as newline-delimited JSON.
pub fn ndjson(events: &[Value]) -> String {
    events.iter().map(|e| format!("{e}\n")).collect()
}

/// Scan an in-memory log with the given configuration.
pub fn scan_with(log: &str, config: &WatchConfig) -> (Vec<Alert>, RunStats) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut source = BatchSource::from_reader(Cursor::new(log.to_string()), "fixture");
    let mut runner = Runner::from_config(config, tx);
    let stats = runner.run_batch(&mut source).unwrap();

    let mut alerts = Vec::new();
    while let Ok(alert) = rx.try_recv() {
        alerts.push(alert);
    }
    (alerts, stats)
}

pub fn scan(log: &str) -> (Vec<Alert>, RunStats) {
    scan_with(log, &WatchConfig::default())
}
