//! Sign-out teardown: persisted state, re-entrancy, backend failures.

mod common;

use std::time::Duration;

use common::{advance, settings, settle, Harness, EMAIL, MIN, PASSWORD};
use portal_session::identity::{Notice, Phase};
use portal_session::storage::KeyValueStore;

#[tokio::test(start_paused = true)]
async fn manual_sign_out_clears_everything() {
    let h = Harness::new(settings(8, 30, 5, true));
    h.login().await;
    assert!(h.ctrl.profile().is_some());

    h.ctrl.sign_out().await;
    assert_eq!(h.ctrl.phase(), Phase::Unauthenticated);
    assert!(h.ctrl.current_user().is_none());
    assert!(h.ctrl.profile().is_none());
    assert!(!h.ctrl.inactivity_armed());
    assert!(h.stamp().is_none());
    assert_eq!(h.identity.sign_out_calls(), 1);
    assert_eq!(h.ui.redirects(), 1);
    // Manual sign-out explains nothing.
    assert!(h.ui.notices().is_empty());

    // Nothing left to fire.
    advance(60 * MIN).await;
    assert_eq!(h.ui.redirects(), 1);
    assert!(h.ui.notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stale_cached_session_is_not_resurrected() {
    let mut h = Harness::new(settings(8, 30, 5, true));
    h.identity.set_keep_session_on_sign_out(true);
    h.login().await;
    h.ctrl.sign_out().await;
    assert!(h.stamp().is_none());
    assert!(h.identity.current_session().is_some());

    h.ctrl.initialize().await;
    settle().await;
    assert!(h.ctrl.current_user().is_none());
    assert_eq!(h.ctrl.phase(), Phase::Unauthenticated);
    assert!(h.stamp().is_none());

    // Same after a reload.
    h.reload();
    h.ctrl.initialize().await;
    settle().await;
    assert!(h.ctrl.current_user().is_none());
    assert!(h.stamp().is_none());
    assert_eq!(h.profiles.fetches(), 1);

    // A real sign-in still works.
    h.ctrl.sign_in(EMAIL, PASSWORD).await.expect("sign in");
    settle().await;
    assert_eq!(h.ctrl.phase(), Phase::Active);
    assert!(h.stamp().is_some());
}

#[tokio::test(start_paused = true)]
async fn adopting_another_session_clears_the_revoked_marker() {
    let h = Harness::new(settings(8, 30, 5, true));
    h.login().await;
    h.ctrl.sign_out().await;
    let key = h.ctrl.options().revoked_key.clone();
    assert!(h.kv.get(&key).unwrap().is_some());

    // Signed in again from another tab; no credentials typed here.
    h.identity.sign_in_as(&h.user);
    settle().await;
    assert_eq!(h.ctrl.phase(), Phase::Active);
    assert_eq!(h.kv.get(&key).unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn concurrent_sign_outs_navigate_once() {
    let h = Harness::new(settings(8, 30, 5, true));
    h.identity.set_sign_out_delay(Duration::from_millis(300));
    h.login().await;

    tokio::join!(h.ctrl.sign_out(), h.ctrl.sign_out());
    settle().await;
    assert_eq!(h.ui.redirects(), 1);
    assert_eq!(h.identity.sign_out_calls(), 1);
    assert!(h.ctrl.current_user().is_none());
}

#[tokio::test(start_paused = true)]
async fn click_during_inactivity_logout_is_absorbed() {
    let h = Harness::new(settings(8, 30, 5, true));
    h.identity.set_sign_out_delay(Duration::from_secs(2));
    h.login().await;

    advance(30 * MIN).await;
    assert_eq!(h.ctrl.phase(), Phase::TransitioningOut);
    h.ctrl.sign_out().await;
    h.ctrl.record_activity();

    advance(Duration::from_secs(2)).await;
    assert_eq!(h.ctrl.phase(), Phase::Unauthenticated);
    assert_eq!(h.ui.redirects(), 1);
    assert_eq!(h.identity.sign_out_calls(), 1);
    assert_eq!(h.ui.count(&Notice::InactivityLogout), 1);
    assert!(h.stamp().is_none());
}

#[tokio::test(start_paused = true)]
async fn backend_failure_still_clears_local_session() {
    let h = Harness::new(settings(8, 30, 5, true));
    h.identity.set_fail_sign_out(true);
    h.login().await;

    h.ctrl.sign_out().await;
    assert_eq!(h.identity.sign_out_calls(), 1);
    assert!(h.ctrl.current_user().is_none());
    assert_eq!(h.ctrl.phase(), Phase::Unauthenticated);
    assert!(h.stamp().is_none());
    assert_eq!(h.ui.redirects(), 1);
}

#[tokio::test(start_paused = true)]
async fn bad_credentials_are_returned_and_change_nothing() {
    let h = Harness::new(settings(8, 30, 5, true));
    h.ctrl.initialize().await;
    let err = h.ctrl.sign_in(EMAIL, "wrong").await.unwrap_err();
    assert_eq!(err.code_str(), "invalid_credentials");
    assert_eq!(h.ctrl.phase(), Phase::Unauthenticated);
    assert!(h.stamp().is_none());
}

#[tokio::test(start_paused = true)]
async fn snapshots_follow_the_lifecycle() {
    let h = Harness::new(settings(8, 30, 5, true));
    let rx = h.ctrl.subscribe_state();
    assert!(rx.borrow().loading);

    h.login().await;
    {
        let snap = rx.borrow();
        assert_eq!(snap.phase, Phase::Active);
        assert_eq!(snap.user.as_ref().map(|u| u.id.clone()), Some(h.user.id.clone()));
        assert_eq!(snap.profile.as_ref().map(|p| p.role.clone()), Some("agent".to_string()));
        assert!(!snap.loading);
    }

    advance(25 * MIN).await;
    assert_eq!(rx.borrow().phase, Phase::WarningShown);

    h.ctrl.sign_out().await;
    let snap = rx.borrow();
    assert_eq!(snap.phase, Phase::Unauthenticated);
    assert!(snap.user.is_none());
    assert!(snap.profile.is_none());
}
