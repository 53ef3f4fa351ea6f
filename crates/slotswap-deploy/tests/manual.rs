mod common;

use common::{Setup, ts};
use slotswap_core::{Outcome, Phase, Slot};
use slotswap_deploy::{CutoverRequest, DeployError, ErrorKind};
use slotswap_hooks::HookName;

#[tokio::test(start_paused = true)]
async fn full_cutover_flips_the_active_slot() {
    let h = Setup::default().build();
    h.init();

    let deployment = h.cutover().cutover(CutoverRequest::full(Slot::Green)).await.unwrap();

    assert_eq!(deployment.outcome, Some(Outcome::Success));
    assert!(deployment.has_entered(Phase::Cutover));
    let record = h.record();
    assert_eq!(record.active, Slot::Green);
    assert_eq!(record.traffic, ts(0, 100));
    assert_eq!(h.reloader.applied(), vec![ts(0, 100)]);
    assert_eq!(h.hook_count(HookName::PreCutover), 1);
    assert_eq!(h.hook_count(HookName::PostCutover), 1);
    h.assert_consistent();
}

#[tokio::test(start_paused = true)]
async fn partial_weights_do_not_flip() {
    let h = Setup::default().build();
    h.init();

    let request = CutoverRequest {
        target: Slot::Green,
        weights: Some((70, 30)),
    };
    let deployment = h.cutover().cutover(request).await.unwrap();

    assert!(!deployment.has_entered(Phase::Cutover));
    let record = h.record();
    assert_eq!(record.active, Slot::Blue);
    assert_eq!(record.traffic, ts(70, 30));
    assert_eq!(h.hook_count(HookName::PostTrafficShift), 1);
    assert_eq!(h.hook_count(HookName::PreCutover), 0);
    assert_eq!(h.hook_count(HookName::PostCutover), 0);
}

#[tokio::test(start_paused = true)]
async fn refused_pre_cutover_leaves_the_proxy_alone() {
    let h = Setup {
        failing_hooks: vec![HookName::PreCutover],
        ..Setup::default()
    }
    .build();
    h.init();

    let failure = h
        .cutover()
        .cutover(CutoverRequest::full(Slot::Green))
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::HookFailed);
    assert!(h.reloader.applied().is_empty());
    assert_eq!(h.record().active, Slot::Blue);
    h.assert_consistent();
}

#[tokio::test(start_paused = true)]
async fn weights_must_sum_to_one_hundred() {
    let h = Setup::default().build();
    h.init();

    let request = CutoverRequest {
        target: Slot::Green,
        weights: Some((60, 60)),
    };
    let failure = h.cutover().cutover(request).await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::InvalidSchedule);
    assert!(h.reloader.applied().is_empty());
    assert_eq!(h.record().traffic, ts(100, 0));
}

#[tokio::test(start_paused = true)]
async fn target_without_traffic_is_rejected() {
    let h = Setup::default().build();
    h.init();

    for (target, weights) in [(Slot::Blue, (0, 100)), (Slot::Green, (100, 0))] {
        let request = CutoverRequest {
            target,
            weights: Some(weights),
        };
        let failure = h.cutover().cutover(request).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::InvalidSchedule, "{target}");
    }

    assert!(h.reloader.applied().is_empty());
    assert_eq!(h.hook_count(HookName::PreCutover), 0);
    let record = h.record();
    assert_eq!(record.active, Slot::Blue);
    assert_eq!(record.traffic, ts(100, 0));
    h.assert_consistent();
}

#[tokio::test(start_paused = true)]
async fn cutover_needs_an_initialized_app() {
    let h = Setup::default().build();

    let failure = h
        .cutover()
        .cutover(CutoverRequest::full(Slot::Green))
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::NotInitialized);
}

#[tokio::test(start_paused = true)]
async fn cleanup_refuses_while_inactive_slot_has_traffic() {
    let h = Setup::default().build();
    h.init();
    let request = CutoverRequest {
        target: Slot::Green,
        weights: Some((80, 20)),
    };
    h.cutover().cutover(request).await.unwrap();

    let failure = h.cleanup().cleanup().await.unwrap_err();

    assert!(matches!(
        failure.error,
        DeployError::TrafficOnInactive {
            slot: Slot::Green,
            weight: 20
        }
    ));
    assert!(h.runtime.calls().is_empty());
    // the failure path puts everything back on the active slot
    assert_eq!(h.record().traffic, ts(100, 0));
    h.assert_consistent();
}

#[tokio::test(start_paused = true)]
async fn cleanup_stops_the_inactive_slot() {
    let h = Setup::default().build();
    h.pipeline().deploy("v2").await.unwrap();

    let deployment = h.cleanup().cleanup().await.unwrap();

    assert_eq!(deployment.target, Slot::Blue);
    assert!(deployment.has_entered(Phase::Cleanup));
    assert_eq!(h.runtime.calls(), vec!["start green v2", "stop blue"]);
    let record = h.record();
    assert_eq!(record.blue.container_group_id, None);
    assert_eq!(record.green.version.as_deref(), Some("v2"));
    h.assert_consistent();
}

#[tokio::test(start_paused = true)]
async fn cleanup_skips_a_slot_that_is_already_down() {
    let h = Setup::default().build();
    h.pipeline().deploy("v2").await.unwrap();
    h.runtime.mark_down(Slot::Blue);
    let cleanups = h.hook_count(HookName::Cleanup);

    let deployment = h.cleanup().cleanup().await.unwrap();

    assert_eq!(deployment.outcome, Some(Outcome::Success));
    assert_eq!(h.runtime.calls(), vec!["start green v2"]);
    assert_eq!(h.record().blue.container_group_id, None);
    assert_eq!(h.hook_count(HookName::Cleanup), cleanups + 1);
    h.assert_consistent();
}
