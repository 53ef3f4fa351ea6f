mod common;

use common::{APP, Setup, ts};
use slotswap_core::{Operation, Outcome, Phase, Slot};
use slotswap_deploy::{DeployError, ErrorKind};
use slotswap_hooks::HookName;

#[tokio::test(start_paused = true)]
async fn rollback_returns_traffic_to_the_previous_slot() {
    let h = Setup {
        schedule: vec![(50, 50), (0, 100)],
        ..Setup::default()
    }
    .build();
    h.pipeline().deploy("v2").await.unwrap();

    let deployment = h.rollback().rollback().await.unwrap();

    assert_eq!(deployment.operation, Operation::Rollback);
    assert_eq!(deployment.outcome, Some(Outcome::RolledBack));
    assert_eq!(deployment.target, Slot::Blue);
    assert!(deployment.has_entered(Phase::PostRollback));
    assert!(!deployment.has_entered(Phase::Cleanup));

    let record = h.record();
    assert_eq!(record.active, Slot::Blue);
    assert_eq!(record.traffic, ts(100, 0));
    // one step, straight back
    assert_eq!(h.reloader.applied().last(), Some(&ts(100, 0)));
    assert_eq!(h.reloader.applied().len(), 3);

    assert_eq!(h.hook_count(HookName::PreRollback), 1);
    assert_eq!(h.hook_count(HookName::PostRollback), 1);
    // green stays up unless cleanup was asked for
    assert_eq!(h.runtime.calls(), vec!["start green v2"]);
    h.assert_consistent();
}

#[tokio::test(start_paused = true)]
async fn forced_rollback_flips_even_when_unhealthy() {
    let h = Setup {
        options: vec![("core.FORCE", "true")],
        ..Setup::default()
    }
    .build();
    h.pipeline().deploy("v2").await.unwrap();
    h.probe.set_healthy(Slot::Blue, false);
    h.probe.set_healthy(Slot::Green, false);

    let deployment = h.rollback().rollback().await.unwrap();

    assert_eq!(deployment.outcome, Some(Outcome::RolledBack));
    assert!(deployment.warnings.iter().any(|w| w.source == "health_gate"));
    assert_eq!(h.record().active, Slot::Blue);
    assert_eq!(h.record().traffic, ts(100, 0));
    h.assert_consistent();
}

#[tokio::test(start_paused = true)]
async fn unhealthy_rollback_target_fails_without_force() {
    let h = Setup::default().build();
    h.pipeline().deploy("v2").await.unwrap();
    h.probe.set_healthy(Slot::Blue, false);

    let failure = h.rollback().rollback().await.unwrap_err();

    assert!(matches!(
        failure.error,
        DeployError::RollbackTargetUnhealthy {
            slot: Slot::Blue,
            attempts: 3
        }
    ));
    let record = h.record();
    assert_eq!(record.active, Slot::Green);
    assert_eq!(record.traffic, ts(0, 100));
    assert_eq!(h.hook_count(HookName::PostRollback), 0);
    assert_eq!(h.hook_count(HookName::Error), 1);
    h.assert_consistent();
}

#[tokio::test(start_paused = true)]
async fn rollback_needs_an_initialized_app() {
    let h = Setup::default().build();

    let failure = h.rollback().rollback().await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::NotInitialized);
    assert!(h.ctx.store.get_environments(APP).unwrap().is_none());
    assert!(!h.lock_held());
}

#[tokio::test(start_paused = true)]
async fn clean_rollback_stops_the_abandoned_slot() {
    let h = Setup {
        options: vec![("core.CLEAN", "true")],
        ..Setup::default()
    }
    .build();
    h.pipeline().deploy("v2").await.unwrap();

    let deployment = h.rollback().rollback().await.unwrap();

    assert!(deployment.has_entered(Phase::Cleanup));
    assert_eq!(h.runtime.calls(), vec!["start green v2", "stop green"]);
    let record = h.record();
    assert_eq!(record.green.container_group_id, None);
    assert_eq!(record.green.version, None);
    // once from the deploy, once from the rollback
    assert_eq!(h.hook_count(HookName::Cleanup), 2);
    h.assert_consistent();
}

#[tokio::test(start_paused = true)]
async fn refused_pre_rollback_leaves_everything_alone() {
    let h = Setup {
        failing_hooks: vec![HookName::PreRollback],
        ..Setup::default()
    }
    .build();
    h.pipeline().deploy("v2").await.unwrap();
    let probes_before = h.probe.calls(Slot::Blue);

    let failure = h.rollback().rollback().await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::HookFailed);
    assert_eq!(h.probe.calls(Slot::Blue), probes_before);
    assert_eq!(h.record().active, Slot::Green);
    h.assert_consistent();
}
