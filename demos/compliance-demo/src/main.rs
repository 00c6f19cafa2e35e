//! End-to-end walkthrough: ingest a contract, merge extracted data,
//! assign an obligation, track progress, and run a reminder sweep.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use covenant_engine::CovenantEngine;
use covenant_extraction::{
    DocumentContent, ExtractionCapability, ExtractionResult, ExtractorError, MetadataCandidate,
    ObligationCandidate,
};
use covenant_lifecycle::InMemoryObjectStore;
use covenant_scheduler::{DeliveryError, NotificationSink};
use covenant_storage::memory::InMemoryCovenantStorage;
use covenant_types::{
    AccessLevel, CancellationToken, EngineConfig, FolderKind, Notification, UserId,
};
use std::sync::Arc;

/// Stands in for the external AI extraction service.
struct DemoExtractor;

#[async_trait]
impl ExtractionCapability for DemoExtractor {
    async fn extract(&self, _content: &DocumentContent) -> Result<ExtractionResult, ExtractorError> {
        Ok(ExtractionResult {
            metadata: vec![
                MetadataCandidate {
                    key: "ClientName".into(),
                    value: "City of Lyon".into(),
                    confidence: 0.93,
                    offsets: None,
                },
                MetadataCandidate {
                    key: "GoverningLaw".into(),
                    value: "France".into(),
                    confidence: 0.35,
                    offsets: None,
                },
            ],
            obligations: vec![ObligationCandidate {
                description: "Submit monthly progress report".into(),
                frequency: Some("monthly".into()),
                due_date: Some(Utc::now().date_naive() + Duration::days(3)),
                penalty_text: Some("penalty of 2% per missed report".into()),
                confidence: 0.88,
            }],
        })
    }
}

/// Prints notifications instead of emailing them.
struct ConsoleSink;

#[async_trait]
impl NotificationSink for ConsoleSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        println!(
            "  -> [{}] to {}: {}",
            notification.kind.as_str(),
            notification.recipient,
            notification.message
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let engine = CovenantEngine::new(
        Arc::new(InMemoryCovenantStorage::new()),
        Arc::new(InMemoryObjectStore::new()),
        Arc::new(DemoExtractor),
        Arc::new(ConsoleSink),
        EngineConfig::default(),
    );
    let cancel = CancellationToken::new();

    let owner = UserId::new("alice");
    let worker = UserId::new("bob");

    println!("== project and contract setup ==");
    let project = engine
        .create_project(&owner, "Metro Line B", "City of Lyon", "FR", &cancel)
        .await?;
    engine
        .grant_access(&owner, &project.id, &worker, AccessLevel::Contributor, &cancel)
        .await?;
    let contract = engine
        .create_contract(&owner, &project.id, "Tunnel works", Some(50_000_000), &cancel)
        .await?;

    println!("== file upload and extraction merge ==");
    let pdf = b"original contract bytes".to_vec();
    let (file, created) = engine
        .upload_contract_file(&owner, &contract.id, FolderKind::Original, pdf, &cancel)
        .await?;
    println!("  stored version {} (created: {created})", file.version);

    let summary = engine
        .extract_and_merge(
            &owner,
            &contract.id,
            &DocumentContent::Text("full contract text".into()),
            &cancel,
        )
        .await?;
    println!(
        "  merged: {} fields, {} obligations, low-confidence: {:?}",
        summary.added_fields, summary.added_obligations, summary.low_confidence
    );

    println!("== assignment and progress ==");
    let obligation_id = summary.touched_obligations[0].clone();
    let assignment = engine
        .create_assignment(&owner, &obligation_id, &worker, &cancel)
        .await?;
    let updated = engine
        .update_assignment_progress(&worker, &assignment.id, 0, 40, &cancel)
        .await?;
    println!(
        "  progress {}% -> status {:?}, revision {}",
        updated.percent_complete, updated.status, updated.revision
    );

    println!("== reminder sweep ==");
    let report = engine.run_reminder_sweep(Utc::now()).await?;
    println!(
        "  reminders sent: {}, risk snapshots: {}",
        report.reminders_sent, report.risk_recomputed
    );

    if let Some(risk) = engine.latest_risk(&owner, &obligation_id).await? {
        println!("== latest risk ==");
        println!("  score {:.3}; {}", risk.score, risk.basis);
    }

    println!("== audit trail (newest first) ==");
    let page = engine
        .query_audit(&owner, &project.id, 0, 8, None, None)
        .await?;
    for record in page.records {
        println!(
            "  #{} {} {} {}",
            record.sequence,
            record.action,
            record.entity_type,
            record.entity_id.unwrap_or_default()
        );
    }
    Ok(())
}
