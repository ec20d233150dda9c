use super::*;
use crate::proxy_config::Index;
use kubert::index::IndexNamespacedResource;
use pretty_assertions::assert_eq;

async fn next(queue: &WorkQueue<ResourceId>) -> ResourceId {
    let id = queue.dequeue().await.unwrap();
    queue.mark_done(&id);
    id
}

#[tokio::test]
async fn changed_configs_are_queued() {
    let queue = mk_queue();
    let mut index = Index::new(queue.clone());

    index.apply(mk_proxy_config("ns-0", "svc-a", "uid-a", "1"));
    assert_eq!(next(&queue).await, mk_id("ns-0", "svc-a"));
    assert!(index.get(&mk_id("ns-0", "svc-a")).is_some());

    index.apply(mk_proxy_config("ns-0", "svc-a", "uid-a", "1"));
    assert!(queue.is_empty());

    index.apply(mk_proxy_config("ns-0", "svc-a", "uid-a", "2"));
    assert_eq!(next(&queue).await, mk_id("ns-0", "svc-a"));
}

#[tokio::test]
async fn deleted_configs_are_forgotten() {
    let queue = mk_queue();
    let mut index = Index::new(queue.clone());
    index.apply(mk_proxy_config("ns-0", "svc-a", "uid-a", "1"));
    next(&queue).await;

    IndexNamespacedResource::<ProxyConfig>::delete(
        &mut index,
        "ns-0".to_string(),
        "svc-a".to_string(),
    );
    assert!(index.get(&mk_id("ns-0", "svc-a")).is_none());
    assert!(queue.is_empty());
}

#[tokio::test]
async fn artifact_changes_queue_their_owner() {
    let queue = mk_queue();
    let mut index = Index::new(queue.clone());
    let config = mk_proxy_config("ns-0", "svc-a", "uid-a", "1");
    index.apply(config.clone());
    next(&queue).await;

    index.apply(mk_config_map("ns-0", "proxy-config-svc-a", Some(&config), "10"));
    assert_eq!(next(&queue).await, mk_id("ns-0", "svc-a"));

    // Resyncs of an unchanged artifact are suppressed.
    index.apply(mk_config_map("ns-0", "proxy-config-svc-a", Some(&config), "10"));
    assert!(queue.is_empty());

    index.apply(mk_config_map("ns-0", "proxy-config-svc-a", Some(&config), "11"));
    assert_eq!(next(&queue).await, mk_id("ns-0", "svc-a"));

    IndexNamespacedResource::<ConfigMap>::delete(
        &mut index,
        "ns-0".to_string(),
        "proxy-config-svc-a".to_string(),
    );
    assert_eq!(next(&queue).await, mk_id("ns-0", "svc-a"));
    assert_eq!(index.artifact_count(), 0);
}

#[tokio::test]
async fn foreign_and_orphaned_artifacts_are_ignored() {
    let queue = mk_queue();
    let mut index = Index::new(queue.clone());

    index.apply(mk_config_map("ns-0", "unowned", None, "1"));
    assert!(queue.is_empty());

    // The owning ProxyConfig is not known.
    let missing = mk_proxy_config("ns-0", "svc-b", "uid-b", "1");
    index.apply(mk_config_map("ns-0", "proxy-config-svc-b", Some(&missing), "1"));
    assert!(queue.is_empty());

    // A ProxyConfig with the same name in another namespace does not own it.
    index.apply(mk_proxy_config("ns-1", "svc-b", "uid-c", "1"));
    next(&queue).await;
    index.apply(mk_config_map("ns-0", "proxy-config-svc-b", Some(&missing), "2"));
    assert!(queue.is_empty());
}
