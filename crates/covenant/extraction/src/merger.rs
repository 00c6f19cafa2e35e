use crate::capability::{
    extract_with_retry, DocumentContent, ExtractionCapability, ObligationCandidate,
};
use chrono::Utc;
use covenant_storage::{AuditAppend, CovenantStorage, MergeBatch};
use covenant_types::{
    Cancellable, ContractId, CoreError, CoreResult, EngineConfig, MetadataField, Obligation,
    ObligationId, Provenance, UserId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;

/// Outcome summary of one extract-and-merge run.
#[derive(Debug, Clone, Default)]
pub struct MergeSummary {
    pub added_fields: usize,
    pub updated_fields: usize,
    /// Candidates skipped because a Manual field owns the key.
    pub rejected_fields: usize,
    pub added_obligations: usize,
    pub updated_obligations: usize,
    /// Candidates skipped: Manual match, or AI match without a confidence
    /// improvement.
    pub skipped_obligations: usize,
    /// Keys/descriptions stored below the low-confidence threshold,
    /// surfaced for the caller.
    pub low_confidence: Vec<String>,
    /// Obligations inserted or updated; the caller recomputes risk for
    /// each of these.
    pub touched_obligations: Vec<ObligationId>,
}

/// Provenance-aware merger of extraction results into contract state.
///
/// At most one merge runs per contract at a time; a concurrent call on the
/// same contract fails fast with `Conflict`. All writes land in one atomic
/// batch together with the audit entry.
pub struct ExtractionMerger {
    storage: Arc<dyn CovenantStorage>,
    extractor: Arc<dyn ExtractionCapability>,
    config: EngineConfig,
    in_flight: Mutex<HashSet<ContractId>>,
}

impl ExtractionMerger {
    pub fn new(
        storage: Arc<dyn CovenantStorage>,
        extractor: Arc<dyn ExtractionCapability>,
        config: EngineConfig,
    ) -> Self {
        Self {
            storage,
            extractor,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run the extraction capability for `content` and merge the result
    /// into the contract's metadata and obligations.
    pub async fn extract_and_merge(
        &self,
        contract_id: &ContractId,
        content: &DocumentContent,
        actor: &UserId,
        cancel: &dyn Cancellable,
    ) -> CoreResult<MergeSummary> {
        let _claim = self.claim(contract_id)?;

        let contract = self
            .storage
            .get_contract(contract_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::NotFound(format!("contract {} not found", contract_id)))?;
        if !contract.status.accepts_writes() {
            return Err(CoreError::Validation(format!(
                "contract {} is {:?} and no longer accepts writes",
                contract_id, contract.status
            )));
        }

        // Suspension point: the external capability call.
        let extracted = extract_with_retry(
            self.extractor.as_ref(),
            content,
            self.config.extractor_max_attempts,
            self.config.extractor_backoff,
            cancel,
        )
        .await?;

        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let mut summary = MergeSummary::default();
        let mut batch = MergeBatch::default();

        self.stage_metadata(contract_id, &extracted.metadata, &mut batch, &mut summary)
            .await?;
        self.stage_obligations(contract_id, &extracted.obligations, &mut batch, &mut summary)
            .await?;

        batch.audit.push(AuditAppend {
            timestamp: Utc::now(),
            actor: Some(actor.clone()),
            project_id: Some(contract.project_id.clone()),
            action: "contract.extract_merge".to_string(),
            entity_type: "contract".to_string(),
            entity_id: Some(contract_id.to_string()),
            payload: serde_json::json!({
                "added_fields": summary.added_fields,
                "updated_fields": summary.updated_fields,
                "rejected_fields": summary.rejected_fields,
                "added_obligations": summary.added_obligations,
                "updated_obligations": summary.updated_obligations,
                "skipped_obligations": summary.skipped_obligations,
                "low_confidence": summary.low_confidence,
            }),
            ip: None,
        });

        // Last cancellation honor point; the commit below is atomic.
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        self.storage
            .apply_merge_batch(contract_id, batch)
            .await
            .map_err(CoreError::from)?;

        tracing::info!(
            contract = %contract_id,
            added_fields = summary.added_fields,
            updated_fields = summary.updated_fields,
            added_obligations = summary.added_obligations,
            updated_obligations = summary.updated_obligations,
            "extraction merge committed"
        );
        Ok(summary)
    }

    async fn stage_metadata(
        &self,
        contract_id: &ContractId,
        candidates: &[crate::capability::MetadataCandidate],
        batch: &mut MergeBatch,
        summary: &mut MergeSummary,
    ) -> CoreResult<()> {
        let existing = self
            .storage
            .list_metadata(contract_id)
            .await
            .map_err(CoreError::from)?;
        let manual_keys: HashSet<&str> = existing
            .iter()
            .filter(|field| field.provenance == Provenance::Manual)
            .map(|field| field.key.as_str())
            .collect();
        let ai_keys: HashSet<&str> = existing
            .iter()
            .filter(|field| field.provenance == Provenance::Ai)
            .map(|field| field.key.as_str())
            .collect();

        let mut staged: HashMap<String, MetadataField> = HashMap::new();
        for candidate in candidates {
            if manual_keys.contains(candidate.key.as_str()) {
                // Manual provenance is authoritative; not an error.
                summary.rejected_fields += 1;
                tracing::debug!(key = candidate.key.as_str(), "manual field shadows candidate");
                continue;
            }
            if candidate.confidence < self.config.low_confidence_threshold {
                summary.low_confidence.push(candidate.key.clone());
            }
            staged.insert(
                candidate.key.clone(),
                MetadataField {
                    contract_id: contract_id.clone(),
                    key: candidate.key.clone(),
                    value: candidate.value.clone(),
                    provenance: Provenance::Ai,
                    confidence: Some(candidate.confidence),
                    offsets: candidate.offsets,
                    updated_at: Utc::now(),
                },
            );
        }

        for (key, field) in staged {
            if ai_keys.contains(key.as_str()) {
                summary.updated_fields += 1;
            } else {
                summary.added_fields += 1;
            }
            batch.upsert_fields.push(field);
        }
        Ok(())
    }

    async fn stage_obligations(
        &self,
        contract_id: &ContractId,
        candidates: &[ObligationCandidate],
        batch: &mut MergeBatch,
        summary: &mut MergeSummary,
    ) -> CoreResult<()> {
        let existing = self
            .storage
            .list_obligations(contract_id)
            .await
            .map_err(CoreError::from)?;
        let by_description: HashMap<&str, &Obligation> = existing
            .iter()
            .map(|obligation| (obligation.description.as_str(), obligation))
            .collect();
        let mut staged_descriptions: HashSet<String> = HashSet::new();

        for candidate in candidates {
            if staged_descriptions.contains(&candidate.description) {
                summary.skipped_obligations += 1;
                continue;
            }

            match by_description.get(candidate.description.as_str()) {
                None => {
                    let now = Utc::now();
                    let obligation = Obligation {
                        id: ObligationId::generate(),
                        contract_id: contract_id.clone(),
                        description: candidate.description.clone(),
                        frequency: candidate.frequency.clone(),
                        due_date: candidate.due_date,
                        penalty_text: candidate.penalty_text.clone(),
                        provenance: Provenance::Ai,
                        confidence: Some(candidate.confidence),
                        created_at: now,
                        updated_at: now,
                    };
                    if candidate.confidence < self.config.low_confidence_threshold {
                        summary.low_confidence.push(candidate.description.clone());
                    }
                    summary.added_obligations += 1;
                    summary.touched_obligations.push(obligation.id.clone());
                    staged_descriptions.insert(candidate.description.clone());
                    batch.insert_obligations.push(obligation);
                }
                Some(stored) if stored.provenance == Provenance::Manual => {
                    summary.skipped_obligations += 1;
                }
                Some(stored) => {
                    let stored_confidence = stored.confidence.unwrap_or(0.0);
                    if candidate.confidence > stored_confidence {
                        let mut updated = (*stored).clone();
                        updated.frequency = candidate.frequency.clone();
                        updated.due_date = candidate.due_date;
                        updated.penalty_text = candidate.penalty_text.clone();
                        updated.confidence = Some(candidate.confidence);
                        updated.updated_at = Utc::now();
                        summary.updated_obligations += 1;
                        summary.touched_obligations.push(updated.id.clone());
                        staged_descriptions.insert(candidate.description.clone());
                        batch.update_obligations.push(updated);
                    } else {
                        summary.skipped_obligations += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn claim(&self, contract_id: &ContractId) -> CoreResult<MergeClaim<'_>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| CoreError::Storage("merge claim lock poisoned".to_string()))?;
        if !in_flight.insert(contract_id.clone()) {
            return Err(CoreError::Conflict(format!(
                "a merge is already running for contract {}",
                contract_id
            )));
        }
        Ok(MergeClaim {
            merger: self,
            contract_id: contract_id.clone(),
        })
    }
}

/// Releases the per-contract merge claim on drop, on every exit path.
struct MergeClaim<'a> {
    merger: &'a ExtractionMerger,
    contract_id: ContractId,
}

impl Drop for MergeClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.merger.in_flight.lock() {
            in_flight.remove(&self.contract_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ExtractionResult, ExtractorError, MetadataCandidate};
    use async_trait::async_trait;
    use covenant_storage::memory::InMemoryCovenantStorage;
    use covenant_storage::{ContractStore, GrantStore, ObligationStore};
    use covenant_types::{CancellationToken, Contract, Project};

    struct FixedExtractor {
        result: ExtractionResult,
    }

    #[async_trait]
    impl ExtractionCapability for FixedExtractor {
        async fn extract(
            &self,
            _content: &DocumentContent,
        ) -> Result<ExtractionResult, ExtractorError> {
            Ok(self.result.clone())
        }
    }

    async fn seeded(storage: &InMemoryCovenantStorage) -> ContractId {
        let project = Project::new("Rail upgrade", "Transit Co", "FR");
        let contract = Contract::new(project.id.clone(), "Signaling 2026");
        let contract_id = contract.id.clone();
        storage.insert_project(project, None).await.unwrap();
        storage.insert_contract(contract, None).await.unwrap();
        contract_id
    }

    fn merger_with(
        storage: Arc<InMemoryCovenantStorage>,
        result: ExtractionResult,
    ) -> ExtractionMerger {
        ExtractionMerger::new(
            storage,
            Arc::new(FixedExtractor { result }),
            EngineConfig::default(),
        )
    }

    fn metadata(key: &str, value: &str, confidence: f64) -> MetadataCandidate {
        MetadataCandidate {
            key: key.to_string(),
            value: value.to_string(),
            confidence,
            offsets: None,
        }
    }

    fn obligation(description: &str, confidence: f64) -> ObligationCandidate {
        ObligationCandidate {
            description: description.to_string(),
            frequency: None,
            due_date: None,
            penalty_text: None,
            confidence,
        }
    }

    #[tokio::test]
    async fn manual_fields_are_never_overwritten() {
        let storage = Arc::new(InMemoryCovenantStorage::new());
        let contract_id = seeded(&storage).await;

        storage
            .upsert_metadata(
                MetadataField {
                    contract_id: contract_id.clone(),
                    key: "ClientName".to_string(),
                    value: "Transit Co".to_string(),
                    provenance: Provenance::Manual,
                    confidence: None,
                    offsets: None,
                    updated_at: Utc::now(),
                },
                None,
            )
            .await
            .unwrap();

        let merger = merger_with(
            storage.clone(),
            ExtractionResult {
                metadata: vec![metadata("ClientName", "Wrong Name", 0.95)],
                obligations: vec![],
            },
        );

        let summary = merger
            .extract_and_merge(
                &contract_id,
                &DocumentContent::Text("doc".to_string()),
                &UserId::new("uploader"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(summary.rejected_fields, 1);
        assert_eq!(summary.added_fields, 0);

        let field = storage
            .get_metadata(&contract_id, "ClientName", Provenance::Manual)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(field.value, "Transit Co");
    }

    #[tokio::test]
    async fn ai_obligation_updates_only_on_higher_confidence() {
        let storage = Arc::new(InMemoryCovenantStorage::new());
        let contract_id = seeded(&storage).await;

        let merger = merger_with(
            storage.clone(),
            ExtractionResult {
                metadata: vec![],
                obligations: vec![obligation("Submit monthly report", 0.6)],
            },
        );
        let first = merger
            .extract_and_merge(
                &contract_id,
                &DocumentContent::Text("doc".to_string()),
                &UserId::new("uploader"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(first.added_obligations, 1);

        // Lower confidence: skip.
        let lower = merger_with(
            storage.clone(),
            ExtractionResult {
                metadata: vec![],
                obligations: vec![obligation("Submit monthly report", 0.5)],
            },
        );
        let second = lower
            .extract_and_merge(
                &contract_id,
                &DocumentContent::Text("doc".to_string()),
                &UserId::new("uploader"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(second.updated_obligations, 0);
        assert_eq!(second.skipped_obligations, 1);

        // Higher confidence: update in place, no duplicate row.
        let higher = merger_with(
            storage.clone(),
            ExtractionResult {
                metadata: vec![],
                obligations: vec![obligation("Submit monthly report", 0.9)],
            },
        );
        let third = higher
            .extract_and_merge(
                &contract_id,
                &DocumentContent::Text("doc".to_string()),
                &UserId::new("uploader"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(third.updated_obligations, 1);

        let obligations = storage.list_obligations(&contract_id).await.unwrap();
        assert_eq!(obligations.len(), 1);
        assert_eq!(obligations[0].confidence, Some(0.9));
    }

    #[tokio::test]
    async fn low_confidence_is_stored_but_flagged() {
        let storage = Arc::new(InMemoryCovenantStorage::new());
        let contract_id = seeded(&storage).await;

        let merger = merger_with(
            storage.clone(),
            ExtractionResult {
                metadata: vec![metadata("PaymentTerms", "net 30", 0.2)],
                obligations: vec![],
            },
        );
        let summary = merger
            .extract_and_merge(
                &contract_id,
                &DocumentContent::Text("doc".to_string()),
                &UserId::new("uploader"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(summary.added_fields, 1);
        assert_eq!(summary.low_confidence, vec!["PaymentTerms".to_string()]);

        let stored = storage
            .get_metadata(&contract_id, "PaymentTerms", Provenance::Ai)
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn concurrent_merges_on_one_contract_conflict() {
        let storage = Arc::new(InMemoryCovenantStorage::new());
        let contract_id = seeded(&storage).await;

        struct GatedExtractor {
            entered: tokio::sync::Notify,
            release: tokio::sync::Notify,
        }

        #[async_trait]
        impl ExtractionCapability for GatedExtractor {
            async fn extract(
                &self,
                _content: &DocumentContent,
            ) -> Result<ExtractionResult, ExtractorError> {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(ExtractionResult {
                    metadata: vec![],
                    obligations: vec![ObligationCandidate {
                        description: "Hold safety briefing".to_string(),
                        frequency: None,
                        due_date: None,
                        penalty_text: None,
                        confidence: 0.8,
                    }],
                })
            }
        }

        let extractor = Arc::new(GatedExtractor {
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let merger = Arc::new(ExtractionMerger::new(
            storage.clone(),
            extractor.clone(),
            EngineConfig::default(),
        ));

        let first = {
            let merger = merger.clone();
            let contract_id = contract_id.clone();
            tokio::spawn(async move {
                merger
                    .extract_and_merge(
                        &contract_id,
                        &DocumentContent::Text("doc".to_string()),
                        &UserId::new("uploader"),
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        // Wait until the first merge holds its claim inside the extractor.
        extractor.entered.notified().await;

        let second = merger
            .extract_and_merge(
                &contract_id,
                &DocumentContent::Text("doc".to_string()),
                &UserId::new("uploader"),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(second, Err(CoreError::Conflict(_))));

        extractor.release.notify_one();
        let first = first.await.expect("task").expect("merge");
        assert_eq!(first.added_obligations, 1);

        // Obligation count equals the single successful merge alone.
        let obligations = storage.list_obligations(&contract_id).await.unwrap();
        assert_eq!(obligations.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_before_commit_leaves_state_unchanged() {
        let storage = Arc::new(InMemoryCovenantStorage::new());
        let contract_id = seeded(&storage).await;

        struct CancellingExtractor {
            token: CancellationToken,
        }

        #[async_trait]
        impl ExtractionCapability for CancellingExtractor {
            async fn extract(
                &self,
                _content: &DocumentContent,
            ) -> Result<ExtractionResult, ExtractorError> {
                self.token.cancel();
                Ok(ExtractionResult {
                    metadata: vec![MetadataCandidate {
                        key: "ContractValue".to_string(),
                        value: "1000000".to_string(),
                        confidence: 0.9,
                        offsets: None,
                    }],
                    obligations: vec![],
                })
            }
        }

        let token = CancellationToken::new();
        let merger = ExtractionMerger::new(
            storage.clone(),
            Arc::new(CancellingExtractor {
                token: token.clone(),
            }),
            EngineConfig::default(),
        );

        let result = merger
            .extract_and_merge(
                &contract_id,
                &DocumentContent::Text("doc".to_string()),
                &UserId::new("uploader"),
                &token,
            )
            .await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert!(storage.list_metadata(&contract_id).await.unwrap().is_empty());
    }
}
