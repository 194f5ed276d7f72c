mod common;

use common::*;
use tax_itc_recon::db::ReconStore;
use tax_itc_recon::models::{ActionStatus, ExternalRecord, ImportStatus, MatchStatus};
use tax_itc_recon::ReconError;

/// 返回 (批次 id, 已匹配记录, 未匹配记录)
async fn reconciled(h: &Harness) -> (i64, ExternalRecord, ExternalRecord) {
    h.store
        .add_invoice(invoice(21, SUPPLIER_MH, "M-1", "1000", "180", "2024-05-02"));
    h.store
        .add_invoice(invoice(22, SUPPLIER_MH, "Q-500", "4000", "700", "2024-05-09"));
    h.store
        .add_invoice(invoice(23, SUPPLIER_KA, "K-1", "2000", "360", "2024-05-09"));

    let payload = document(
        vec![supplier(
            SUPPLIER_MH,
            "Reliance",
            vec![
                inv("M-1", "02-05-2024", "1000", "180"),
                inv("M-2", "09-05-2024", "4000", "720"),
            ],
        )],
        vec![],
    );
    let import = h.import(&payload).await;
    assert_eq!(import.status, ImportStatus::Completed);
    h.recon.run_reconciliation(import.id, false).await.unwrap();

    let records = h.store.records_for_import(import.id).await.unwrap();
    assert_eq!(records[0].match_status, MatchStatus::Matched);
    assert_eq!(records[1].match_status, MatchStatus::Unmatched);
    (import.id, records[0].clone(), records[1].clone())
}

#[tokio::test]
async fn accept_and_reset_leave_match_state_untouched() {
    let h = Harness::new();
    let (_, matched, _) = reconciled(&h).await;

    let accepted = h
        .actions
        .accept_mismatch(matched.id, "auditor", Some("looks fine".into()))
        .await
        .unwrap();
    assert_eq!(accepted.action_status, Some(ActionStatus::Accepted));
    assert_eq!(accepted.action_by.as_deref(), Some("auditor"));
    assert_eq!(accepted.action_notes.as_deref(), Some("looks fine"));
    assert!(accepted.action_at.is_some());
    assert_eq!(accepted.match_status, matched.match_status);
    assert_eq!(accepted.matched_invoice_id, matched.matched_invoice_id);
    assert_eq!(accepted.confidence, matched.confidence);

    let reset = h.actions.reset_action(matched.id).await.unwrap();
    assert_eq!(reset.action_status, None);
    assert_eq!(reset.action_by, None);
    assert_eq!(reset.action_notes, None);
    assert_eq!(reset.action_at, None);
    assert_eq!(reset.match_status, MatchStatus::Matched);
    assert_eq!(reset.matched_invoice_id, Some(21));
    assert_eq!(reset.confidence, matched.confidence);
    assert_eq!(reset.discrepancies, matched.discrepancies);
}

#[tokio::test]
async fn accepting_works_for_unmatched_records() {
    let h = Harness::new();
    let (_, _, unmatched) = reconciled(&h).await;

    let accepted = h.actions.accept_mismatch(unmatched.id, "auditor", None).await.unwrap();
    assert_eq!(accepted.action_status, Some(ActionStatus::Accepted));
    assert_eq!(accepted.match_status, MatchStatus::Unmatched);
}

#[tokio::test]
async fn rejecting_requires_a_reason() {
    let h = Harness::new();
    let (_, matched, _) = reconciled(&h).await;

    let err = h.actions.reject_invoice(matched.id, "auditor", "   ").await.unwrap_err();
    assert!(matches!(err, ReconError::Validation(_)));

    let rejected = h
        .actions
        .reject_invoice(matched.id, "auditor", "supplier filed twice")
        .await
        .unwrap();
    assert_eq!(rejected.action_status, Some(ActionStatus::Rejected));
    assert_eq!(rejected.action_notes.as_deref(), Some("supplier filed twice"));
    assert_eq!(rejected.match_status, MatchStatus::Matched);
}

#[tokio::test]
async fn manual_match_binds_invoice_and_refreshes_counts() {
    let h = Harness::new();
    let (import_id, _, unmatched) = reconciled(&h).await;

    let record = h
        .actions
        .manual_match(unmatched.id, 22, "auditor", Some("renumbered by supplier".into()))
        .await
        .unwrap();
    // 720 vs 700
    assert_eq!(record.match_status, MatchStatus::PartialMatch);
    assert_eq!(record.matched_invoice_id, Some(22));
    assert_eq!(record.matched_rule_id, None);
    assert_eq!(record.confidence, 100);
    assert_eq!(record.discrepancies.len(), 1);
    assert_eq!(record.action_status, Some(ActionStatus::Accepted));

    let import = h.recon.get_import(import_id).await.unwrap();
    assert_eq!(import.matched_count, 1);
    assert_eq!(import.partial_count, 1);
    assert_eq!(import.unmatched_count, 0);
}

#[tokio::test]
async fn manual_match_notes_supplier_mismatch() {
    let h = Harness::new();
    let (_, _, unmatched) = reconciled(&h).await;

    let record = h.actions.manual_match(unmatched.id, 23, "auditor", None).await.unwrap();
    assert_eq!(record.match_status, MatchStatus::PartialMatch);
    assert!(record
        .discrepancies
        .iter()
        .any(|d| d.contains("Supplier GSTIN differs")));
}

#[tokio::test]
async fn unknown_targets_are_not_found() {
    let h = Harness::new();
    let (_, matched, _) = reconciled(&h).await;

    let not_found = |r: Result<ExternalRecord, ReconError>| matches!(r, Err(ReconError::NotFound(_)));

    assert!(not_found(h.actions.accept_mismatch(9999, "auditor", None).await));
    assert!(not_found(h.actions.reject_invoice(9999, "auditor", "dup").await));
    assert!(not_found(h.actions.manual_match(9999, 21, "auditor", None).await));
    assert!(not_found(h.actions.reset_action(9999).await));
    assert!(not_found(h.actions.manual_match(matched.id, 9999, "auditor", None).await));
}

#[tokio::test]
async fn actions_show_up_in_period_summary() {
    let h = Harness::new();
    let (_, matched, unmatched) = reconciled(&h).await;

    h.actions.accept_mismatch(matched.id, "auditor", None).await.unwrap();
    h.actions
        .reject_invoice(unmatched.id, "auditor", "not our purchase")
        .await
        .unwrap();

    let summary = h.recon.get_reconciliation_summary(COMPANY, PERIOD).await.unwrap();
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.matched, 1);
    assert_eq!(summary.unmatched, 1);
}
