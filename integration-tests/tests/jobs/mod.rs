use dbferry_core::{
    config::Endpoint,
    migrate::{ErrorKind, FailurePolicy},
    tool::Tools,
};
use dbferry_daemon::job::{
    registry::{Config, Registry},
    Id, Snapshot, Status,
};
use integration_tests::Workdir;
use std::time::Duration;

const DUMP_MARKER: &str = "[1/4] Dumping from source...";
const CONVERT_MARKER: &str = "[2/4] Converting BSON to JSON...";
const LOAD_MARKER: &str = "[3/4] Importing data...";
const RESTORE_MARKER: &str = "[4/4] Restoring indexes...";

/// Directives that make the fake binary act out a two-collection dump: the
/// dump run creates the BSON units and one metadata file, each conversion
/// run creates its output file.
const PIPELINE_TOUCH: &[&str] = &[
    "--out:shop/orders.bson",
    "--out:shop/users.bson",
    "--out:shop/users.metadata.json",
    "--outFile:",
];

fn tools_for(workdir: &Workdir) -> Tools {
    let bin = workdir.bin();
    Tools {
        dump: bin.clone(),
        convert: bin.clone(),
        load: bin.clone(),
        restore: bin,
        ping: None,
    }
}

fn registry_for(workdir: &Workdir) -> Registry {
    Registry::new(Config {
        tools: tools_for(workdir),
        ..Config::default()
    })
}

fn create_shop_job(registry: &Registry) -> (Id, Status) {
    registry.create(
        Endpoint::new("db://src", "shop"),
        Endpoint::new("db://dst", "shop_copy"),
    )
}

/// Polls until the job finishes, returning every snapshot taken on the way.
async fn poll_until_terminal(registry: &Registry, id: Id, limit: Duration) -> Vec<Snapshot> {
    tokio::time::timeout(limit, async {
        let mut snapshots = Vec::new();
        loop {
            let snapshot = registry.get(id).unwrap();
            let done = snapshot.status.is_terminal();
            snapshots.push(snapshot);
            if done {
                return snapshots;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}

fn marker_position(log: &[String], marker: &str) -> Option<usize> {
    log.iter().position(|line| line.ends_with(marker))
}

#[tokio::test]
async fn migration_should_run_all_four_stages_in_order() {
    let workdir = Workdir::new().with_touch(PIPELINE_TOUCH);
    let registry = registry_for(&workdir);

    let (id, initial_status) = create_shop_job(&registry);
    assert_eq!(initial_status, Status::Pending);

    let snapshots = poll_until_terminal(&registry, id, Duration::from_secs(10)).await;
    let last = snapshots.last().unwrap();

    assert_eq!(last.status, Status::Succeeded);
    assert_eq!(last.progress, 100);
    assert!(last.error.is_none());

    let dump = marker_position(&last.log, DUMP_MARKER).unwrap();
    let convert = marker_position(&last.log, CONVERT_MARKER).unwrap();
    let load = marker_position(&last.log, LOAD_MARKER).unwrap();
    let restore = marker_position(&last.log, RESTORE_MARKER).unwrap();
    assert!(dump < convert && convert < load && load < restore);
    assert!(last.log.last().unwrap().ends_with("Sync completed successfully."));
}

#[tokio::test]
async fn progress_should_be_monotonic_and_the_log_append_only_across_polls() {
    let workdir = Workdir::new().with_touch(PIPELINE_TOUCH);
    let registry = registry_for(&workdir);
    let (id, _) = create_shop_job(&registry);

    let snapshots = poll_until_terminal(&registry, id, Duration::from_secs(10)).await;

    for pair in snapshots.windows(2) {
        assert!(pair[0].progress <= pair[1].progress);
        assert!(pair[1].log.starts_with(&pair[0].log));
    }
    assert_eq!(snapshots.last().unwrap().progress, 100);
}

#[tokio::test]
async fn migration_should_run_each_data_unit_exactly_once() {
    let workdir = Workdir::new().with_touch(PIPELINE_TOUCH);
    let registry = registry_for(&workdir);
    let (id, _) = create_shop_job(&registry);

    poll_until_terminal(&registry, id, Duration::from_secs(10)).await;

    let invocations = workdir.invocations();
    // dump, two conversions, two loads, one restore
    assert_eq!(invocations.len(), 6);
    assert!(invocations[0].iter().any(|a| a.starts_with("--out=")));
    assert!(invocations[5].iter().any(|a| a == "--nsFrom=shop.*"));

    let loads: Vec<_> = invocations
        .iter()
        .filter(|args| args.iter().any(|a| a.starts_with("--collection=")))
        .collect();
    assert_eq!(loads.len(), 2);
    for load in loads {
        assert!(load.iter().any(|a| a == "--mode=upsert"));
        assert!(load.iter().any(|a| a == "--drop"));
    }
}

#[tokio::test]
async fn concurrent_jobs_should_get_distinct_ids_and_both_finish() {
    let workdir = Workdir::new().with_touch(PIPELINE_TOUCH);
    let registry = registry_for(&workdir);

    let (first, _) = create_shop_job(&registry);
    let (second, _) = create_shop_job(&registry);
    assert_ne!(first, second);

    let first_final = poll_until_terminal(&registry, first, Duration::from_secs(10)).await;
    let second_final = poll_until_terminal(&registry, second, Duration::from_secs(10)).await;

    assert_eq!(first_final.last().unwrap().status, Status::Succeeded);
    assert_eq!(second_final.last().unwrap().status, Status::Succeeded);
    // one pipeline each, nothing ran twice
    assert_eq!(workdir.invocations().len(), 12);
}

#[tokio::test]
async fn cancellation_should_fail_the_job_promptly_and_clean_up() {
    let workdir = Workdir::new().with_sleep_ms(5_000);
    let registry = registry_for(&workdir);
    let (id, _) = create_shop_job(&registry);

    // wait for the dump stage to be underway
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = registry.get(id).unwrap();
            if marker_position(&snapshot.log, DUMP_MARKER).is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let cancelled_at = std::time::Instant::now();
    registry.cancel(id).unwrap();
    let snapshots = poll_until_terminal(&registry, id, Duration::from_secs(3)).await;
    let last = snapshots.last().unwrap();

    // well before the 5s the dump would have taken
    assert!(cancelled_at.elapsed() < Duration::from_secs(3));
    assert_eq!(last.status, Status::Failed);
    let error = last.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Cancelled);
    assert_eq!(error.message, "Cancelled by user");
    assert!(last
        .log
        .iter()
        .any(|line| line.ends_with("Cancellation requested by user.")));
    assert_eq!(last.progress, 10);

    // the scoped working area is removed on the way out
    let prefix = format!("dbferry-{}", id);
    let leftovers = std::fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn failing_load_unit_should_abort_before_the_restore_stage() {
    let workdir = Workdir::new()
        .with_touch(PIPELINE_TOUCH)
        .with_fail_if_arg("--collection=orders");
    let registry = registry_for(&workdir);
    let (id, _) = create_shop_job(&registry);

    let snapshots = poll_until_terminal(&registry, id, Duration::from_secs(10)).await;
    let last = snapshots.last().unwrap();

    assert_eq!(last.status, Status::Failed);
    let error = last.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Stage);
    assert!(error.message.contains("stage 'load' failed"));
    assert_eq!(last.progress, 60);
    assert!(marker_position(&last.log, LOAD_MARKER).is_some());
    assert!(marker_position(&last.log, RESTORE_MARKER).is_none());

    let invocations = workdir.invocations();
    // orders sorts first, so the users unit never runs
    assert!(invocations
        .iter()
        .any(|args| args.iter().any(|a| a == "--collection=orders")));
    assert!(!invocations
        .iter()
        .any(|args| args.iter().any(|a| a == "--collection=users")));
    assert!(!invocations
        .iter()
        .any(|args| args.iter().any(|a| a.starts_with("--nsFrom="))));
}

#[tokio::test]
async fn aggregate_policy_should_run_every_unit_before_failing() {
    let workdir = Workdir::new()
        .with_touch(PIPELINE_TOUCH)
        .with_fail_if_arg("--collection=orders");
    let registry = Registry::new(Config {
        tools: tools_for(&workdir),
        failure_policy: FailurePolicy::ContinueAndAggregate,
        ..Config::default()
    });
    let (id, _) = create_shop_job(&registry);

    let snapshots = poll_until_terminal(&registry, id, Duration::from_secs(10)).await;
    let last = snapshots.last().unwrap();

    assert_eq!(last.status, Status::Failed);
    let error = last.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Stage);
    assert!(error.message.contains("1 of 2"));

    let invocations = workdir.invocations();
    assert!(invocations
        .iter()
        .any(|args| args.iter().any(|a| a == "--collection=orders")));
    assert!(invocations
        .iter()
        .any(|args| args.iter().any(|a| a == "--collection=users")));
    // the restore stage still never runs
    assert!(!invocations
        .iter()
        .any(|args| args.iter().any(|a| a.starts_with("--nsFrom="))));
}

#[tokio::test]
async fn failing_preflight_should_map_to_a_connect_error() {
    let workdir = Workdir::new().with_fail_if_arg("db://src");
    let mut tools = tools_for(&workdir);
    tools.ping = Some(workdir.bin());
    let registry = Registry::new(Config {
        tools,
        ..Config::default()
    });
    let (id, _) = create_shop_job(&registry);

    let snapshots = poll_until_terminal(&registry, id, Duration::from_secs(10)).await;
    let last = snapshots.last().unwrap();

    assert_eq!(last.status, Status::Failed);
    let error = last.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Connect);
    assert!(error.message.contains("source endpoint"));
    // the pipeline never starts
    assert!(marker_position(&last.log, DUMP_MARKER).is_none());
}

#[tokio::test]
async fn successful_preflight_should_probe_both_endpoints_first() {
    let workdir = Workdir::new().with_touch(PIPELINE_TOUCH);
    let mut tools = tools_for(&workdir);
    tools.ping = Some(workdir.bin());
    let registry = Registry::new(Config {
        tools,
        ..Config::default()
    });
    let (id, _) = create_shop_job(&registry);

    let snapshots = poll_until_terminal(&registry, id, Duration::from_secs(10)).await;
    assert_eq!(snapshots.last().unwrap().status, Status::Succeeded);

    let invocations = workdir.invocations();
    assert_eq!(invocations.len(), 8);
    assert_eq!(invocations[0][0], "db://src");
    assert_eq!(invocations[1][0], "db://dst");
    assert!(invocations[2].iter().any(|a| a.starts_with("--out=")));
}
