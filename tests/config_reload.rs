//! Hot reload of the settings file through the background watcher.

use std::time::Duration;

use envelope_keys::config::{ConfigStore, RequireKeys, WatchOptions};

mod common;
use common::{temp_config, write_config};

fn fast_watch() -> WatchOptions {
    WatchOptions {
        debounce: Duration::from_millis(200),
        poll_interval: Duration::from_millis(50),
    }
}

/// Poll until `check` passes or the deadline expires.
async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}

#[tokio::test]
async fn test_change_is_published_after_debounce() {
    let mut file = temp_config(r#"{"project": "p1", "encryption": {"keyring": "r1"}}"#);
    let store = ConfigStore::load(file.path()).unwrap();
    let watch = store.watch_with(fast_watch()).unwrap();
    assert!(watch.is_running());

    write_config(&mut file, r#"{"project": "p2", "encryption": {"keyring": "r1"}}"#);
    // Nothing is applied before the quiet period has passed.
    assert_eq!(store.get("project"), "p1");

    assert!(eventually(Duration::from_secs(5), || store.get("project") == "p2").await);
    assert!(store.generation() >= 2);
    assert_eq!(store.get("encryption.keyring"), "r1");

    watch.stop().await;
}

#[tokio::test]
async fn test_burst_of_writes_is_coalesced() {
    let mut file = temp_config(r#"{"project": "v0"}"#);
    let store = ConfigStore::load(file.path()).unwrap();
    let watch = store.watch_with(fast_watch()).unwrap();

    for i in 1..=5 {
        write_config(&mut file, &format!(r#"{{"project": "v{}"}}"#, i));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(eventually(Duration::from_secs(5), || store.get("project") == "v5").await);
    // The burst fits in one debounce window; allow for scheduling jitter.
    assert!(store.generation() <= 3, "generation {}", store.generation());

    watch.stop().await;
}

#[tokio::test]
async fn test_rejected_candidate_is_never_visible() {
    let mut file = temp_config(r#"{"project": "p1"}"#);
    let store = ConfigStore::load(file.path()).unwrap();
    store.add_validator(RequireKeys::new(["project"]));
    let watch = store.watch_with(fast_watch()).unwrap();

    write_config(&mut file, r#"{"unrelated": "x"}"#);
    let leaked = eventually(Duration::from_secs(1), || store.get("unrelated") == "x").await;
    assert!(!leaked);
    assert_eq!(store.get("project"), "p1");
    assert_eq!(store.generation(), 1);

    write_config(&mut file, r#"{"project": "p3"}"#);
    assert!(eventually(Duration::from_secs(5), || store.get("project") == "p3").await);

    watch.stop().await;
}

#[tokio::test]
async fn test_stopped_watch_ignores_changes() {
    let mut file = temp_config(r#"{"project": "p1"}"#);
    let store = ConfigStore::load(file.path()).unwrap();
    let watch = store.watch_with(fast_watch()).unwrap();
    watch.stop().await;

    write_config(&mut file, r#"{"project": "p2"}"#);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(store.get("project"), "p1");
    assert_eq!(store.generation(), 1);
}

#[tokio::test]
async fn test_readers_keep_their_snapshot() {
    let mut file = temp_config(r#"{"servers": [{"host": "a"}, {"host": "b"}]}"#);
    let store = ConfigStore::load(file.path()).unwrap();
    let watch = store.watch_with(fast_watch()).unwrap();
    let held = store.snapshot();

    write_config(&mut file, r#"{"servers": [{"host": "c"}]}"#);
    assert!(
        eventually(Duration::from_secs(5), || {
            store.get_all("servers.host") == vec!["c".to_string()]
        })
        .await
    );
    assert_eq!(held.get_all("servers.host"), vec!["a".to_string(), "b".to_string()]);

    watch.stop().await;
}
