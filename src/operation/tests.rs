// Tests for the operation state machine

use super::*;
use crate::config::StateMachineConfig;
use crate::notify::{NoticeLevel, RecordingNotifier};
use anyhow::anyhow;
use std::sync::{Arc, Mutex};

fn machine() -> OperationStateMachine {
    OperationStateMachine::new("test-plan")
}

fn recorded(machine: &OperationStateMachine) -> Arc<Mutex<Vec<(OperationState, OperationState, OperationAction)>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    machine.subscribe(move |new, old, action| {
        sink.lock().unwrap().push((new, old, action));
    });
    events
}

#[test]
fn test_starts_idle() {
    let sm = machine();
    assert_eq!(sm.state(), OperationState::Idle);
    assert_eq!(sm.retries(), 0);
    assert_eq!(sm.button_config().label, "Save Plan");
    assert!(sm.button_config().enabled);
}

#[test]
fn test_illegal_dispatch_leaves_state_untouched() {
    for state in OperationState::ALL {
        for action in OperationAction::ALL {
            if next_state(state, action).is_some() {
                continue;
            }
            let sm = machine();
            drive_to(&sm, state);
            let events = recorded(&sm);
            let retries_before = sm.retries();

            assert!(!sm.dispatch(action), "{action} from {state} should be rejected");
            assert_eq!(sm.state(), state);
            assert_eq!(sm.retries(), retries_before);
            assert!(events.lock().unwrap().is_empty());
        }
    }
}

#[test]
fn test_try_dispatch_reports_reason() {
    let sm = machine();
    assert_eq!(
        sm.try_dispatch(OperationAction::SaveSuccess),
        Err(TransitionRejection::Illegal {
            state: OperationState::Idle,
            action: OperationAction::SaveSuccess,
        })
    );
}

#[test]
fn test_retry_cap_then_reset() {
    let sm = machine();
    assert!(sm.dispatch(OperationAction::StartSave));
    assert!(sm.dispatch(OperationAction::SaveFailure));
    assert_eq!(sm.retries(), 1);

    for expected in 2..=3 {
        assert!(sm.dispatch(OperationAction::Retry));
        assert!(sm.dispatch(OperationAction::SaveFailure));
        assert_eq!(sm.retries(), expected);
    }

    assert!(!sm.can_transition(OperationAction::Retry));
    assert_eq!(
        sm.try_dispatch(OperationAction::Retry),
        Err(TransitionRejection::RetryLimitExceeded {
            state: OperationState::SaveError,
            retries: 3,
            max_retries: 3,
        })
    );
    assert!(!sm.button_config().enabled);
    assert_eq!(sm.button_config().label, "Retry Save (3/3)");

    sm.reset();
    assert_eq!(sm.state(), OperationState::Idle);
    assert_eq!(sm.retries(), 0);
    assert!(sm.dispatch(OperationAction::StartSave));
}

#[test]
fn test_custom_retry_limit() {
    let sm = OperationStateMachine::with_config("one-shot", StateMachineConfig { max_retries: 1 });
    sm.dispatch(OperationAction::StartSave);
    sm.dispatch(OperationAction::SaveFailure);

    let info = sm.retry_info();
    assert_eq!(info.count, 1);
    assert_eq!(info.max_retries, 1);
    assert!(!info.can_retry);
    assert!(!sm.dispatch(OperationAction::Retry));
}

#[test]
fn test_listeners_fire_in_subscription_order() {
    let sm = machine();
    let order = Arc::new(Mutex::new(Vec::new()));

    for name in ["A", "B", "C"] {
        let order = Arc::clone(&order);
        sm.subscribe(move |_, _, _| order.lock().unwrap().push(name));
    }

    sm.dispatch(OperationAction::StartSave);
    sm.dispatch(OperationAction::SaveSuccess);

    assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C", "A", "B", "C"]);
}

#[test]
fn test_self_unsubscribe_receives_current_notification_only() {
    let sm = machine();
    let calls = Arc::new(Mutex::new(0));
    let handle: Arc<Mutex<Option<crate::subscribers::Subscription>>> = Arc::new(Mutex::new(None));

    let subscription = {
        let calls = Arc::clone(&calls);
        let handle = Arc::clone(&handle);
        sm.subscribe(move |_, _, _| {
            *calls.lock().unwrap() += 1;
            if let Some(subscription) = handle.lock().unwrap().as_ref() {
                subscription.unsubscribe();
            }
        })
    };
    *handle.lock().unwrap() = Some(subscription);

    let later = recorded(&sm);

    sm.dispatch(OperationAction::StartSave);
    sm.dispatch(OperationAction::SaveSuccess);

    assert_eq!(*calls.lock().unwrap(), 1);
    assert_eq!(later.lock().unwrap().len(), 2);
}

#[test]
fn test_listener_receives_new_old_action() {
    let sm = machine();
    let events = recorded(&sm);

    sm.dispatch(OperationAction::StartSave);
    sm.reset();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            (OperationState::Saving, OperationState::Idle, OperationAction::StartSave),
            (OperationState::Idle, OperationState::Saving, OperationAction::Reset),
        ]
    );
}

#[tokio::test]
async fn test_success_path_save_then_approve() {
    let sm = machine();

    assert!(sm.handle_save(|| async { Ok::<_, anyhow::Error>("saved") }).await);
    assert_eq!(sm.state(), OperationState::Saved);
    assert_eq!(sm.retries(), 0);
    assert_eq!(sm.button_config(), button_config(OperationState::Saved, 0, 3));

    assert!(sm.handle_approve(|| async { Ok::<_, anyhow::Error>(()) }).await);
    assert_eq!(sm.state(), OperationState::Approved);

    assert!(!sm.dispatch(OperationAction::StartSave));
    sm.reset();
    assert!(sm.dispatch(OperationAction::StartSave));
}

#[tokio::test]
async fn test_error_then_retry_path() {
    let sm = machine();

    assert!(sm.handle_save(|| async { Err::<(), _>(anyhow!("database unavailable")) }).await);
    assert_eq!(sm.state(), OperationState::SaveError);
    assert_eq!(sm.retries(), 1);
    assert_eq!(sm.last_error().as_deref(), Some("database unavailable"));
    assert_eq!(sm.button_config().label, "Retry Save (1/3)");

    assert!(sm.handle_retry(|| async { Ok::<_, anyhow::Error>(()) }).await);
    assert_eq!(sm.state(), OperationState::Saved);
    assert_eq!(sm.retries(), 0);
    assert_eq!(sm.last_error(), None);
}

#[tokio::test]
async fn test_refresh_failure_and_retry() {
    let sm = machine();
    sm.handle_save(|| async { Ok::<_, anyhow::Error>(()) }).await;

    assert!(sm.handle_refresh(|| async { Err::<(), _>(anyhow!("status check failed")) }).await);
    assert_eq!(sm.state(), OperationState::RefreshError);

    assert!(sm.handle_retry(|| async { Ok::<_, anyhow::Error>(()) }).await);
    assert_eq!(sm.state(), OperationState::Saved);
}

#[tokio::test]
async fn test_helper_rejects_when_start_is_illegal() {
    let sm = machine();
    let mut ran = false;

    let started = sm
        .handle_approve(|| {
            ran = true;
            async { Ok::<_, anyhow::Error>(()) }
        })
        .await;

    assert!(!started);
    assert!(!ran);
    assert_eq!(sm.state(), OperationState::Idle);
}

#[tokio::test]
async fn test_concurrent_save_is_rejected() {
    let sm = Arc::new(machine());
    let (release, wait) = tokio::sync::oneshot::channel::<()>();

    let first = {
        let sm = Arc::clone(&sm);
        tokio::spawn(async move {
            sm.handle_save(|| async move {
                wait.await.ok();
                Ok::<_, anyhow::Error>(())
            })
            .await
        })
    };

    while !sm.is_state(OperationState::Saving) {
        tokio::task::yield_now().await;
    }

    assert!(!sm.handle_save(|| async { Ok::<_, anyhow::Error>(()) }).await);

    release.send(()).unwrap();
    assert!(first.await.unwrap());
    assert_eq!(sm.state(), OperationState::Saved);
}

#[tokio::test]
async fn test_settlement_after_reset_is_discarded() {
    let sm = Arc::new(machine());
    let (release, wait) = tokio::sync::oneshot::channel::<()>();

    let stale = {
        let sm = Arc::clone(&sm);
        tokio::spawn(async move {
            sm.handle_save(|| async move {
                wait.await.ok();
                Ok::<_, anyhow::Error>(())
            })
            .await
        })
    };

    while !sm.is_state(OperationState::Saving) {
        tokio::task::yield_now().await;
    }

    sm.reset();
    assert!(sm.dispatch(OperationAction::StartSave));

    release.send(()).unwrap();
    assert!(!stale.await.unwrap());
    assert_eq!(sm.state(), OperationState::Saving);
}

#[tokio::test]
async fn test_dropped_helper_future_leaves_phase_until_reset() {
    let sm = machine();
    {
        let never = || futures::future::pending::<anyhow::Result<()>>();
        let mut save = tokio_test::task::spawn(sm.handle_save(never));
        tokio_test::assert_pending!(save.poll());
    }
    assert_eq!(sm.state(), OperationState::Saving);
    assert!(!sm.handle_save(|| async { Ok::<_, anyhow::Error>(()) }).await);

    sm.reset();
    assert!(sm.handle_save(|| async { Ok::<_, anyhow::Error>(()) }).await);
    assert_eq!(sm.state(), OperationState::Saved);
}

#[tokio::test]
async fn test_destroy_detaches_listeners_and_resets() {
    let sm = machine();
    let events = recorded(&sm);
    sm.handle_save(|| async { Err::<(), _>(anyhow!("timeout")) }).await;
    assert_eq!(sm.state(), OperationState::SaveError);
    assert_eq!(sm.retries(), 1);
    assert_eq!(events.lock().unwrap().len(), 2);

    sm.destroy();
    assert_eq!(sm.state(), OperationState::Idle);
    assert_eq!(sm.retries(), 0);
    assert!(sm.last_error().is_none());

    assert!(sm.dispatch(OperationAction::StartSave));
    assert_eq!(events.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_notifier_reports_outcomes() {
    let notifier = RecordingNotifier::new();
    let sm = machine().with_notifier(Arc::new(notifier.clone()));

    sm.handle_save(|| async { Err::<(), _>(anyhow!("timeout")) }).await;
    sm.handle_retry(|| async { Ok::<_, anyhow::Error>(()) }).await;

    let notices = notifier.notices();
    assert_eq!(notices.len(), 2);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert_eq!(notices[0].title, "Save failed");
    assert_eq!(notices[0].message, "timeout");
    assert_eq!(notices[1].level, NoticeLevel::Success);
}

#[test]
fn test_snapshot_matches_accessors() {
    let sm = machine();
    sm.dispatch(OperationAction::StartSave);
    sm.dispatch(OperationAction::SaveFailure);

    let snapshot = sm.snapshot();
    assert_eq!(snapshot.state, sm.state());
    assert_eq!(snapshot.retries, 1);
    assert_eq!(snapshot.button, sm.button_config());
}

/// Walk a fresh machine into `target` using legal transitions only
fn drive_to(sm: &OperationStateMachine, target: OperationState) {
    use OperationAction as A;
    let path: &[OperationAction] = match target {
        OperationState::Idle => &[],
        OperationState::Saving => &[A::StartSave],
        OperationState::SaveError => &[A::StartSave, A::SaveFailure],
        OperationState::Saved => &[A::StartSave, A::SaveSuccess],
        OperationState::Refreshing => &[A::StartSave, A::SaveSuccess, A::StartRefresh],
        OperationState::RefreshError => {
            &[A::StartSave, A::SaveSuccess, A::StartRefresh, A::RefreshFailure]
        }
        OperationState::Approving => &[A::StartSave, A::SaveSuccess, A::StartApprove],
        OperationState::ApproveError => {
            &[A::StartSave, A::SaveSuccess, A::StartApprove, A::ApproveFailure]
        }
        OperationState::Approved => &[A::StartSave, A::SaveSuccess, A::StartApprove, A::ApproveSuccess],
    };
    for action in path {
        assert!(sm.dispatch(*action));
    }
    assert_eq!(sm.state(), target);
}
