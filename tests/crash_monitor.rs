mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{SERVER, fixture, kill, settle_exit};
use mineguard_supervisor::{
    CrashMonitor,
    config::CrashMonitorSettings,
    instance::InstanceStatus,
    monitor::{CrashEvent, CrashType},
    store::Store,
};

#[tokio::test(flavor = "multi_thread")]
async fn external_kill_records_one_crash_and_restarts() {
    let fx = fixture();
    fx.add_instance("survival", SERVER, |_| {}).await;
    fx.supervisor.start_server("survival").await.unwrap();
    let pid = fx.pid("survival").await;

    kill(pid);
    settle_exit().await;

    let monitor = CrashMonitor::new(fx.supervisor.clone(), CrashMonitorSettings::default()).unwrap();
    let events = monitor.run_cycle().await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.crash_type, CrashType::ProcessDeath);
    assert_eq!(event.details.as_deref(), Some("killed by signal 9"));
    assert!(event.auto_restart_attempted);
    assert!(event.auto_restart_succeeded);

    let recorded = fx
        .store
        .crashes_since("survival", Utc::now() - ChronoDuration::minutes(1))
        .await
        .unwrap();
    assert_eq!(recorded, events);

    assert_eq!(
        fx.supervisor.status("survival").await.unwrap(),
        InstanceStatus::Running
    );
    assert_ne!(fx.pid("survival").await, pid);

    // The restarted server is alive, so the next pass records nothing.
    assert!(monitor.run_cycle().await.is_empty());
    fx.supervisor.stop_server("survival", true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn fourth_crash_in_window_is_not_restarted() {
    let fx = fixture();
    fx.add_instance("survival", SERVER, |_| {}).await;
    for minutes in [9, 6, 3] {
        fx.store
            .record_crash(CrashEvent::new(
                "survival",
                CrashType::ProcessDeath,
                None,
                Utc::now() - ChronoDuration::minutes(minutes),
            ))
            .await
            .unwrap();
    }

    fx.supervisor.start_server("survival").await.unwrap();
    kill(fx.pid("survival").await);
    settle_exit().await;

    let monitor = CrashMonitor::new(fx.supervisor.clone(), CrashMonitorSettings::default()).unwrap();
    let events = monitor.run_cycle().await;
    assert_eq!(events.len(), 1);
    assert!(!events[0].auto_restart_attempted);
    assert!(events[0].restart_attempted_at.is_none());
    assert_eq!(
        fx.supervisor.status("survival").await.unwrap(),
        InstanceStatus::Stopped
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn crashes_outside_window_do_not_count() {
    let fx = fixture();
    fx.add_instance("survival", SERVER, |_| {}).await;
    for hours in [5, 4, 3] {
        fx.store
            .record_crash(CrashEvent::new(
                "survival",
                CrashType::ProcessDeath,
                None,
                Utc::now() - ChronoDuration::hours(hours),
            ))
            .await
            .unwrap();
    }

    fx.supervisor.start_server("survival").await.unwrap();
    kill(fx.pid("survival").await);
    settle_exit().await;

    let monitor = CrashMonitor::new(fx.supervisor.clone(), CrashMonitorSettings::default()).unwrap();
    let events = monitor.run_cycle().await;
    assert!(events[0].auto_restart_attempted);
    fx.supervisor.stop_server("survival", true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn requested_stop_records_no_crash() {
    let fx = fixture();
    fx.add_instance("survival", SERVER, |_| {}).await;
    fx.supervisor.start_server("survival").await.unwrap();
    fx.supervisor.stop_server("survival", true).await.unwrap();

    let monitor = CrashMonitor::new(fx.supervisor.clone(), CrashMonitorSettings::default()).unwrap();
    assert!(monitor.run_cycle().await.is_empty());
    assert!(
        fx.store
            .crashes_since("survival", Utc::now() - ChronoDuration::hours(1))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn oom_output_is_classified_and_other_instances_unaffected() {
    let fx = fixture();
    fx.add_instance(
        "modded",
        r#"read line; echo 'java.lang.OutOfMemoryError: Java heap space' >&2; exit 1"#,
        |_| {},
    )
    .await;
    fx.add_instance("survival", SERVER, |_| {}).await;

    fx.supervisor.start_server("modded").await.unwrap();
    fx.supervisor.start_server("survival").await.unwrap();
    let survivor = fx.pid("survival").await;

    fx.supervisor.send_command("modded", "go").await.unwrap();
    settle_exit().await;

    let settings = CrashMonitorSettings {
        auto_restart: false,
        ..Default::default()
    };
    let monitor = CrashMonitor::new(fx.supervisor.clone(), settings).unwrap();
    let events = monitor.run_cycle().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].instance, "modded");
    assert_eq!(events[0].crash_type, CrashType::OutOfMemory);
    assert!(!events[0].auto_restart_attempted);

    assert_eq!(fx.pid("survival").await, survivor);
    fx.supervisor.stop_server("survival", true).await.unwrap();
}
