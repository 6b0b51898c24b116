mod common;

use common::{fast_config, namespace, pod, scenario_pods, snapshot, FakeSource};
use podcache::error::Error;
use podcache::k8s::cache::{CacheEvent, CacheSynchronizer, SyncStatus, WatchChange};
use podcache::k8s::kinds::ObjectKind;
use podcache::k8s::snapshot::{render, NamespaceFilter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn ns(name: &str) -> NamespaceFilter {
    NamespaceFilter::Namespace(name.to_string())
}

/// Poll liveness without joining
async fn wait_finished(sync: &CacheSynchronizer) -> bool {
    timeout(WAIT, async {
        while !sync.is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_scenario_three_default_one_system() -> anyhow::Result<()> {
    let source = Arc::new(FakeSource::new());
    source.push_list(ObjectKind::Pod, Ok(snapshot(scenario_pods(), "14")));
    let _watch = source.push_watch(ObjectKind::Pod);

    let sync = CacheSynchronizer::start(source, &[ObjectKind::Pod], fast_config());
    assert!(sync.wait_until_ready(WAIT).await?);

    let reader = sync.reader();
    let all = reader.list(ObjectKind::Pod, &NamespaceFilter::parse("")).await?;
    assert_eq!(all.len(), 4);
    assert_eq!(reader.list(ObjectKind::Pod, &ns("default")).await?.len(), 3);
    assert!(reader.list(ObjectKind::Pod, &ns("other")).await?.is_empty());

    let lines = render(&reader.list(ObjectKind::Pod, &ns("kube-system")).await?);
    assert_eq!(lines, vec!["Pod Name: coredns, Namespace: kube-system".to_string()]);

    sync.stop();
    Ok(())
}

#[tokio::test]
async fn test_list_returns_exactly_the_listed_objects() {
    let source = Arc::new(FakeSource::new());
    source.push_list(ObjectKind::Pod, Ok(snapshot(scenario_pods(), "14")));

    let sync = CacheSynchronizer::start(source, &[ObjectKind::Pod], fast_config());
    sync.require_ready(WAIT).await.unwrap();

    let mut listed: Vec<_> = sync
        .reader()
        .list(ObjectKind::Pod, &NamespaceFilter::All)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.key())
        .collect();
    let mut expected: Vec<_> = scenario_pods().into_iter().map(|o| o.key()).collect();
    listed.sort();
    expected.sort();
    assert_eq!(listed, expected);
}

#[tokio::test]
async fn test_list_before_initial_listing_is_not_ready() {
    let source = Arc::new(FakeSource::new());
    let pending_list = source.defer_list(ObjectKind::Pod);

    let sync = CacheSynchronizer::start(source, &[ObjectKind::Pod], fast_config());
    for filter in [NamespaceFilter::All, ns("default")] {
        assert!(matches!(
            sync.reader().list(ObjectKind::Pod, &filter).await,
            Err(Error::NotReady(ObjectKind::Pod))
        ));
    }
    assert!(!sync.wait_until_ready(Duration::from_millis(20)).await.unwrap());

    pending_list.send(Ok(snapshot(vec![], "1"))).ok();
    assert!(sync.wait_until_ready(WAIT).await.unwrap());
    assert!(sync.reader().list(ObjectKind::Pod, &NamespaceFilter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_readiness_requires_every_kind() {
    let source = Arc::new(FakeSource::new());
    source.push_list(ObjectKind::Pod, Ok(snapshot(vec![pod("default", "a", "1")], "1")));
    let namespaces = source.defer_list(ObjectKind::Namespace);

    let sync = CacheSynchronizer::start(
        source,
        &[ObjectKind::Pod, ObjectKind::Namespace],
        fast_config(),
    );

    let err = sync
        .require_ready(Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(&err, Error::SyncTimeout { pending, .. } if pending == &vec![ObjectKind::Namespace]));

    namespaces
        .send(Ok(snapshot(vec![namespace("default"), namespace("kube-system")], "3")))
        .ok();
    sync.require_ready(WAIT).await.unwrap();

    // Cluster-scoped objects only show up for the all-namespaces filter
    let reader = sync.reader();
    assert_eq!(reader.list(ObjectKind::Namespace, &NamespaceFilter::All).await.unwrap().len(), 2);
    assert!(reader.list(ObjectKind::Namespace, &ns("default")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_waiters_all_observe_readiness() {
    let source = Arc::new(FakeSource::new());
    let pending_list = source.defer_list(ObjectKind::Pod);
    let sync = Arc::new(CacheSynchronizer::start(source, &[ObjectKind::Pod], fast_config()));

    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let sync = sync.clone();
            tokio::spawn(async move { sync.wait_until_ready(WAIT).await })
        })
        .collect();

    tokio::task::yield_now().await;
    pending_list.send(Ok(snapshot(scenario_pods(), "14"))).ok();

    for waiter in waiters {
        assert!(waiter.await.unwrap().unwrap());
    }
}

#[tokio::test(start_paused = true)]
async fn test_wait_times_out_without_leaking_the_waiter() {
    let source = Arc::new(FakeSource::new());
    let sync = CacheSynchronizer::start(source, &[ObjectKind::Pod], fast_config());

    let gate = sync.gate();
    assert!(!sync.wait_until_ready(Duration::from_secs(30)).await.unwrap());
    // The gate is still usable after a timed out wait
    assert_eq!(gate.pending(), vec![ObjectKind::Pod]);
    assert!(!gate.wait_timeout(Duration::from_secs(1)).await.unwrap());
}

#[tokio::test]
async fn test_initial_listing_failure_reaches_the_waiter() {
    let source = Arc::new(FakeSource::new());
    source.push_list(ObjectKind::Pod, Err(Error::Custom("forbidden".to_string())));

    let sync = CacheSynchronizer::start(source, &[ObjectKind::Pod], fast_config());
    let err = sync.wait_until_ready(WAIT).await.unwrap_err();
    assert!(matches!(err, Error::InitialList { kind: ObjectKind::Pod, ref message } if message.contains("forbidden")));

    // Not retried: the task has exited and the kind never becomes readable
    timeout(WAIT, sync.join()).await.unwrap();
    assert!(matches!(
        sync.reader().list(ObjectKind::Pod, &NamespaceFilter::All).await,
        Err(Error::NotReady(ObjectKind::Pod))
    ));
}

#[tokio::test]
async fn test_failing_kind_is_reported_while_another_is_pending() {
    let source = Arc::new(FakeSource::new());
    // Pod sorts before ReplicaSet and never answers
    let _pods = source.defer_list(ObjectKind::Pod);
    source.push_list(
        ObjectKind::ReplicaSet,
        Err(Error::Custom("replicasets is forbidden".to_string())),
    );

    let sync = CacheSynchronizer::start(
        source,
        &[ObjectKind::Pod, ObjectKind::ReplicaSet],
        fast_config(),
    );

    let started = Instant::now();
    let err = sync.require_ready(WAIT).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
    assert!(matches!(
        err,
        Error::InitialList { kind: ObjectKind::ReplicaSet, ref message } if message.contains("forbidden")
    ));
    assert_eq!(sync.gate().pending(), vec![ObjectKind::Pod]);
}

#[tokio::test]
async fn test_incremental_changes_are_applied() {
    let source = Arc::new(FakeSource::new());
    source.push_list(ObjectKind::Pod, Ok(snapshot(scenario_pods(), "14")));
    let watch = source.push_watch(ObjectKind::Pod);

    let sync = CacheSynchronizer::start(source, &[ObjectKind::Pod], fast_config());
    sync.require_ready(WAIT).await.unwrap();
    let cache = sync.cache();
    let (_id, mut events) = cache.subscription_manager.subscribe("pod:*".to_string()).await;

    watch
        .unbounded_send(Ok(WatchChange::Applied(pod("other", "batch", "15"))))
        .unwrap();
    watch
        .unbounded_send(Ok(WatchChange::Deleted(pod("default", "worker", "16"))))
        .unwrap();
    watch
        .unbounded_send(Ok(WatchChange::Bookmark("20".to_string())))
        .unwrap();

    assert!(matches!(timeout(WAIT, events.recv()).await.unwrap(), Some(CacheEvent::Applied(_))));
    assert!(matches!(timeout(WAIT, events.recv()).await.unwrap(), Some(CacheEvent::Deleted(_))));

    let reader = sync.reader();
    assert_eq!(reader.list(ObjectKind::Pod, &ns("other")).await.unwrap().len(), 1);
    assert_eq!(reader.list(ObjectKind::Pod, &ns("default")).await.unwrap().len(), 2);
    assert!(reader.get(ObjectKind::Pod, Some("default"), "worker").await.unwrap().is_none());

    let bookmarked = timeout(WAIT, async {
        while cache.resource_version(ObjectKind::Pod).await.as_deref() != Some("20") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(bookmarked.is_ok());
}

#[tokio::test]
async fn test_closed_stream_resumes_from_last_version() {
    let source = Arc::new(FakeSource::new());
    let mut watch_calls = source.record_watch_calls();
    source.push_list(ObjectKind::Pod, Ok(snapshot(vec![], "100")));
    let first = source.push_watch(ObjectKind::Pod);
    let _second = source.push_watch(ObjectKind::Pod);

    let sync = CacheSynchronizer::start(source, &[ObjectKind::Pod], fast_config());
    sync.require_ready(WAIT).await.unwrap();

    let call = timeout(WAIT, watch_calls.recv()).await.unwrap().unwrap();
    assert_eq!(call, (ObjectKind::Pod, "100".to_string()));

    first
        .unbounded_send(Ok(WatchChange::Applied(pod("default", "a", "105"))))
        .unwrap();
    drop(first);

    let call = timeout(WAIT, watch_calls.recv()).await.unwrap().unwrap();
    assert_eq!(call, (ObjectKind::Pod, "105".to_string()));

    let state = sync.cache().kind_state(ObjectKind::Pod).await.unwrap();
    assert_eq!(state.relists, 0);
}

#[tokio::test]
async fn test_broken_stream_relists_and_resubscribes() {
    let source = Arc::new(FakeSource::new());
    let mut watch_calls = source.record_watch_calls();
    source.push_list(
        ObjectKind::Pod,
        Ok(snapshot(vec![pod("default", "a", "1"), pod("default", "b", "2")], "2")),
    );
    let first = source.push_watch(ObjectKind::Pod);
    source.push_list(ObjectKind::Pod, Ok(snapshot(vec![pod("default", "b", "9")], "9")));
    let _second = source.push_watch(ObjectKind::Pod);

    let sync = CacheSynchronizer::start(source, &[ObjectKind::Pod], fast_config());
    sync.require_ready(WAIT).await.unwrap();
    let cache = sync.cache();
    let (_id, mut events) = cache.subscription_manager.subscribe("pod:*".to_string()).await;

    first
        .unbounded_send(Err(Error::Query {
            kind: ObjectKind::Pod,
            message: "watch error 410: too old resource version".to_string(),
        }))
        .unwrap();

    let relisted = timeout(WAIT, events.recv()).await.unwrap();
    assert!(matches!(relisted, Some(CacheEvent::Relisted { kind: ObjectKind::Pod, count: 1 })));

    // Resubscribed from the fresh listing's version
    assert_eq!(timeout(WAIT, watch_calls.recv()).await.unwrap().unwrap().1, "2");
    assert_eq!(timeout(WAIT, watch_calls.recv()).await.unwrap().unwrap().1, "9");

    let pods = sync.reader().list(ObjectKind::Pod, &NamespaceFilter::All).await.unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].name, "b");

    let state = cache.kind_state(ObjectKind::Pod).await.unwrap();
    assert_eq!(state.status, SyncStatus::Synced);
    assert_eq!(state.relists, 1);
}

#[tokio::test]
async fn test_abandoned_kind_turns_reads_into_query_errors() {
    let source = Arc::new(FakeSource::new());
    source.push_list(ObjectKind::Pod, Ok(snapshot(vec![pod("default", "a", "1")], "1")));
    let watch = source.push_watch(ObjectKind::Pod);
    for _ in 0..4 {
        source.push_list(ObjectKind::Pod, Err(Error::Custom("connection refused".to_string())));
    }

    let sync = CacheSynchronizer::start(source, &[ObjectKind::Pod], fast_config());
    sync.require_ready(WAIT).await.unwrap();

    watch
        .unbounded_send(Err(Error::Custom("connection reset".to_string())))
        .unwrap();

    // 1 broken stream + 3 failed re-lists exhaust max_watch_restarts = 3
    assert!(wait_finished(&sync).await);
    assert!(!sync.is_stopped());
    assert!(matches!(
        sync.reader().list(ObjectKind::Pod, &NamespaceFilter::All).await,
        Err(Error::Query { kind: ObjectKind::Pod, .. })
    ));
}

#[tokio::test]
async fn test_stop_is_prompt_and_idempotent() {
    let source = Arc::new(FakeSource::new());
    source.push_list(ObjectKind::Pod, Ok(snapshot(scenario_pods(), "14")));
    let _watch = source.push_watch(ObjectKind::Pod);
    source.push_list(ObjectKind::Namespace, Ok(snapshot(vec![namespace("default")], "2")));

    let sync = Arc::new(CacheSynchronizer::start(
        source,
        &[ObjectKind::Pod, ObjectKind::Namespace],
        fast_config(),
    ));
    sync.require_ready(WAIT).await.unwrap();

    // A pending join does not make running tasks look finished
    let joiner = {
        let sync = sync.clone();
        tokio::spawn(async move { sync.join().await })
    };
    tokio::task::yield_now().await;
    assert!(!sync.is_finished());

    assert!(sync.stop());
    assert!(!sync.stop());
    assert!(sync.is_stopped());

    timeout(Duration::from_secs(1), joiner).await.unwrap().unwrap();
    assert!(sync.is_finished());

    // The snapshot stays readable after stopping
    assert_eq!(
        sync.reader().list(ObjectKind::Pod, &NamespaceFilter::All).await.unwrap().len(),
        4
    );
}

#[tokio::test]
async fn test_stop_before_ready_releases_waiters() {
    let source = Arc::new(FakeSource::new());
    let sync = Arc::new(CacheSynchronizer::start(source, &[ObjectKind::Pod], fast_config()));

    let waiter = {
        let sync = sync.clone();
        tokio::spawn(async move { sync.wait_until_ready(WAIT).await })
    };
    tokio::task::yield_now().await;
    sync.stop();

    let outcome = timeout(WAIT, waiter).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(Error::InitialList { kind: ObjectKind::Pod, .. })));
}
