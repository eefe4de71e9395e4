mod common;

use common::*;
use esign_workflow::models::{Document, DocumentStatus, OrderMode, Recipient, RecipientStatus};
use esign_workflow::order::signers_in_order;
use esign_workflow::store::Store;
use esign_workflow::{DocumentId, Error};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    View(usize),
    Fill(usize),
    Sign(usize),
    Decline(usize),
    Resend(usize),
    Void,
    Advance(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..4usize).prop_map(Op::View),
        4 => (0..4usize).prop_map(Op::Fill),
        4 => (0..4usize).prop_map(Op::Sign),
        1 => (0..4usize).prop_map(Op::Decline),
        1 => (0..4usize).prop_map(Op::Resend),
        1 => Just(Op::Void),
        1 => (1..400i64).prop_map(Op::Advance),
    ]
}

fn mode() -> impl Strategy<Value = OrderMode> {
    prop_oneof![Just(OrderMode::Parallel), Just(OrderMode::Sequential)]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

async fn apply(h: &Harness, document_id: DocumentId, signers: &[esign_workflow::RecipientId], op: &Op) {
    let pick = |i: &usize| signers[*i % signers.len()];
    match op {
        Op::View(i) => {
            let _ = h.engine.view(&access(h, document_id, pick(i)), &meta());
        }
        Op::Fill(i) => {
            let a = access(h, document_id, pick(i));
            if let Ok(fields) = h.engine.fields_for_recipient(&a) {
                for f in fields {
                    let _ = h.engine.set_field_value(&a, f.id, SIGNATURE, &meta());
                }
            }
        }
        Op::Sign(i) => {
            let _ = h.engine.finish_signing(&access(h, document_id, pick(i)), &meta()).await;
        }
        Op::Decline(i) => {
            let _ = h.engine.decline(&access(h, document_id, pick(i)), "terms changed", &meta()).await;
        }
        Op::Resend(i) => {
            let _ = h.engine.resend(document_id, pick(i)).await;
        }
        Op::Void => {
            let _ = h.engine.void_document(document_id, &owner(), "withdrawn");
        }
        Op::Advance(hours) => h.clock.advance(chrono::Duration::hours(*hours)),
    }
}

fn check_invariants(document: &Document, recipients: &[Recipient]) -> Result<(), TestCaseError> {
    prop_assert!(document.signed_count <= document.total_signers);
    prop_assert!(document.is_consistent());

    let signers = signers_in_order(recipients);
    let all_signed = signers.iter().all(|r| r.status == RecipientStatus::Signed);
    prop_assert_eq!(document.status == DocumentStatus::Completed, all_signed);
    prop_assert_eq!(
        document.signed_count as usize,
        signers.iter().filter(|r| r.status == RecipientStatus::Signed).count()
    );

    if document.order_mode == OrderMode::Sequential {
        let active = signers.iter().filter(|r| r.status.is_active()).count();
        prop_assert!(active <= 1);
        if let Some(pos) = signers.iter().position(|r| r.status.is_active()) {
            prop_assert!(signers[..pos].iter().all(|r| r.status == RecipientStatus::Signed));
        }
    }
    if document.status.is_terminal() && document.status != DocumentStatus::Completed {
        prop_assert!(recipients.iter().all(|r| r.token.is_none()));
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn workflow_invariants_hold_after_every_operation(
        mode in mode(),
        orders in prop::collection::vec(0..3i32, 1..4),
        ops in prop::collection::vec(op(), 1..40),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let h = harness();
            let recipients = orders
                .iter()
                .enumerate()
                .map(|(i, o)| signer(&format!("Signer{}", i), *o))
                .collect();
            let (document, _) = prepared(&h, mode, recipients).await;
            h.engine.send_document(document.id).await.unwrap();
            let signers = h.engine.recipients(document.id).unwrap().iter().map(|r| r.id).collect::<Vec<_>>();

            let mut previous_log = h.engine.audit_log(document.id).unwrap();
            for op in &ops {
                apply(&h, document.id, &signers, op).await;

                let stored = h.engine.document(document.id).unwrap();
                let recipients = h.engine.recipients(document.id).unwrap();
                check_invariants(&stored, &recipients)?;

                let log = h.engine.audit_log(document.id).unwrap();
                prop_assert!(log.len() >= previous_log.len());
                prop_assert_eq!(&log[..previous_log.len()], &previous_log[..]);
                prop_assert!(esign_workflow::audit::verify_chain(document.id, &log).is_ok());
                previous_log = log;
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn nobody_writes_another_recipients_field(
        mode in mode(),
        n in 2..5usize,
        actor in 0..5usize,
        victim in 0..5usize,
        viewed in any::<bool>(),
    ) {
        let actor = actor % n;
        let victim = victim % n;
        prop_assume!(actor != victim);

        let rt = runtime();
        rt.block_on(async {
            let h = harness();
            let recipients = (0..n).map(|i| signer(&format!("Signer{}", i), i as i32)).collect();
            let (document, ids) = prepared(&h, mode, recipients).await;
            h.engine.send_document(document.id).await.unwrap();

            let victim_field = h
                .engine
                .store()
                .transaction(|tx| tx.fields(document.id))
                .unwrap()
                .into_iter()
                .find(|f| f.recipient_id == ids[victim])
                .unwrap();

            let a = access(&h, document.id, ids[actor]);
            if viewed {
                let _ = h.engine.view(&a, &meta());
            }
            let res = h.engine.set_field_value(&a, victim_field.id, SIGNATURE, &meta());
            prop_assert!(
                matches!(res, Err(Error::Validation(_)) | Err(Error::PreconditionFailed(_))),
                "unexpected result {:?}", res
            );

            let after = h
                .engine
                .store()
                .transaction(|tx| tx.fields(document.id))
                .unwrap()
                .into_iter()
                .find(|f| f.id == victim_field.id)
                .unwrap();
            prop_assert!(after.value.is_none());
            Ok::<(), TestCaseError>(())
        })?;
    }
}
