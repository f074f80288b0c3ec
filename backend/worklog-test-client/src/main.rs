// src/main.rs

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::error::Error;

const SUBJECT_HEADER: &str = "x-worklog-subject";
const MANAGER_HEADER: &str = "x-worklog-manager";

// Response types
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileOutcome {
    subject: String,
    date: String,
    written: usize,
    replaced: usize,
}

#[derive(Debug, Deserialize)]
struct MonthlyRow {
    date: String,
    minutes: i64,
    time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectReport {
    monthly: Vec<MonthlyRow>,
    cards: serde_json::Value,
    years: Vec<i32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let base_url = std::env::var("WORKLOG_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let subject = std::env::var("WORKLOG_SUBJECT").unwrap_or_else(|_| "test_client_user".to_string());
    let client = Client::new();

    // Test 1: Health check
    println!("\n🔍 Testing health check endpoint...");
    let health_response = client
        .get(format!("{}/health", base_url))
        .send()
        .await?
        .json::<HealthResponse>()
        .await?;
    println!("Health check response: {:?}", health_response);

    // Test 2: Submit a batch, twice
    let batch = json!({
        "date": "2024-03-05",
        "clockIn": "08:45",
        "clockOut": "17:30",
        "intervals": [
            { "label": "Email", "start": "09:00", "end": "12:00" },
            { "label": "Coding", "start": "13:00", "end": "15:00" }
        ]
    });

    for attempt in 1..=2 {
        println!("\n🔍 Submitting activity batch (attempt {})...", attempt);
        let outcome = client
            .post(format!("{}/api/activity", base_url))
            .header(SUBJECT_HEADER, &subject)
            .json(&batch)
            .send()
            .await?
            .json::<ReconcileOutcome>()
            .await?;
        println!(
            "Reconciled {} interval(s) for {} on {}, {} replaced",
            outcome.written, outcome.subject, outcome.date, outcome.replaced
        );
    }

    // Test 3: Invalid batch is rejected
    println!("\n🔍 Submitting an inverted interval...");
    let invalid = client
        .post(format!("{}/api/activity", base_url))
        .header(SUBJECT_HEADER, &subject)
        .json(&json!({
            "date": "2024-03-05",
            "intervals": [{ "label": "Backwards", "start": "12:00", "end": "11:00" }]
        }))
        .send()
        .await?;
    let status = invalid.status();
    println!("Invalid batch status: {} body: {}", status, invalid.text().await?);
    if status != StatusCode::UNPROCESSABLE_ENTITY {
        println!("⚠️ Expected 422 for an inverted interval");
    }

    // Test 4: Monthly report
    println!("\n🔍 Fetching monthly report...");
    let report = client
        .get(format!("{}/api/report?month=03&year=2024", base_url))
        .header(SUBJECT_HEADER, &subject)
        .send()
        .await?
        .json::<SubjectReport>()
        .await?;
    for row in &report.monthly {
        println!("  {} {} ({} min)", row.date, row.time, row.minutes);
    }
    println!("Cards: {}", report.cards);
    println!("Years: {:?}", report.years);

    // Test 5: Manager dashboard, without and with the manager flag
    println!("\n🔍 Testing manager dashboard...");
    let forbidden = client
        .get(format!("{}/api/manager/dashboard?month=3&year=2024", base_url))
        .header(SUBJECT_HEADER, &subject)
        .send()
        .await?;
    println!("Without manager flag: {}", forbidden.status());

    let dashboard = client
        .get(format!("{}/api/manager/dashboard?month=3&year=2024", base_url))
        .header(SUBJECT_HEADER, "manager_test_client")
        .header(MANAGER_HEADER, "true")
        .send()
        .await?;
    println!("With manager flag: {}", dashboard.status());
    println!("Dashboard: {}", dashboard.text().await?);

    println!("\n✅ Testing complete!");

    Ok(())
}
