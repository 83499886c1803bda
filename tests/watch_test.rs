//! Automatic reload driven by file system events.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use logroute::{ConfigEvent, LogFactory};
use tempfile::TempDir;

mod common;

const TIMEOUT: Duration = Duration::from_secs(10);
const DEBOUNCE_MS: u64 = 200;

fn config_with_targets(auto_reload: bool, names: &[&str]) -> String {
    let targets: String = names
        .iter()
        .map(|n| format!("<target type='Memory' name='{}' layout='${{message}}'/>", n))
        .collect();
    format!(
        "<nlog autoReload='{}'><targets>{}</targets><rules><logger name='*' writeTo='{}'/></rules></nlog>",
        auto_reload,
        targets,
        names.join(",")
    )
}

fn count_reloads(factory: &LogFactory, succeeded: bool) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    factory.subscribe(move |event| {
        if let ConfigEvent::Reloaded { succeeded: s, .. } = event {
            if *s == succeeded {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
    });
    count
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_change_triggers_reload_and_closes_old_targets() {
    let dir = TempDir::new().unwrap();
    let path = common::write_config(dir.path(), "nlog.config", &config_with_targets(true, &["a"]));
    let factory = common::factory(DEBOUNCE_MS);
    let first = factory.load_configuration(&path).unwrap();
    let old = common::memory(&first, "a");
    assert_eq!(factory.watched_files().len(), 1);

    common::write_config(dir.path(), "nlog.config", &config_with_targets(true, &["a", "b"]));
    assert!(common::wait_until(TIMEOUT, || common::target_count(&factory) == 2).await);
    assert!(common::wait_until(TIMEOUT, || old.is_closed()).await);
    factory.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rapid_changes_coalesce_into_one_reload() {
    let dir = TempDir::new().unwrap();
    let path = common::write_config(dir.path(), "nlog.config", &config_with_targets(true, &["a"]));
    let factory = common::factory(DEBOUNCE_MS);
    factory.load_configuration(&path).unwrap();
    let reloads = count_reloads(&factory, true);

    for i in 0..5 {
        let names: Vec<String> = (0..=i).map(|n| format!("t{}", n)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        common::write_config(dir.path(), "nlog.config", &config_with_targets(true, &names));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(common::wait_until(TIMEOUT, || reloads.load(Ordering::SeqCst) >= 1).await);
    tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS * 4)).await;
    assert_eq!(reloads.load(Ordering::SeqCst), 1);
    assert_eq!(common::target_count(&factory), 5);
    factory.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_and_recreate_reloads() {
    let dir = TempDir::new().unwrap();
    let path = common::write_config(dir.path(), "nlog.config", &config_with_targets(true, &["a"]));
    let factory = common::factory(DEBOUNCE_MS);
    factory.load_configuration(&path).unwrap();

    std::fs::remove_file(&path).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    common::write_config(dir.path(), "nlog.config", &config_with_targets(true, &["x", "y", "z"]));

    assert!(common::wait_until(TIMEOUT, || common::target_count(&factory) == 3).await);
    factory.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rename_over_file_reloads() {
    let dir = TempDir::new().unwrap();
    let path = common::write_config(dir.path(), "nlog.config", &config_with_targets(true, &["a"]));
    let factory = common::factory(DEBOUNCE_MS);
    factory.load_configuration(&path).unwrap();

    let staged = common::write_config(dir.path(), "staged.tmp", &config_with_targets(true, &["a", "b"]));
    std::fs::rename(&staged, &path).unwrap();

    assert!(common::wait_until(TIMEOUT, || common::target_count(&factory) == 2).await);
    factory.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auto_reload_off_ignores_changes() {
    let dir = TempDir::new().unwrap();
    let path = common::write_config(dir.path(), "nlog.config", &config_with_targets(false, &["a"]));
    let factory = common::factory(DEBOUNCE_MS);
    let first = factory.load_configuration(&path).unwrap();

    common::write_config(dir.path(), "nlog.config", &config_with_targets(false, &["a", "b"]));
    tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS * 5)).await;
    assert_eq!(factory.configuration().unwrap().id(), first.id());

    // explicit reload still works
    assert!(factory.reload_configuration().unwrap());
    assert_eq!(common::target_count(&factory), 2);
    factory.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_file_is_watched_until_fixed() {
    let dir = TempDir::new().unwrap();
    let path = common::write_config(
        dir.path(),
        "nlog.config",
        "<nlog autoReload='true'><targets><target type='Memory' name='a'>",
    );
    let factory = common::factory(DEBOUNCE_MS);
    let config = factory.load_configuration(&path).unwrap();
    assert_eq!(config.all_targets().len(), 0);

    common::write_config(dir.path(), "nlog.config", &config_with_targets(true, &["a", "b", "c"]));
    assert!(common::wait_until(TIMEOUT, || common::target_count(&factory) == 3).await);
    factory.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_broken_edit_keeps_previous_configuration() {
    let dir = TempDir::new().unwrap();
    let path = common::write_config(dir.path(), "nlog.config", &config_with_targets(true, &["a"]));
    let factory = common::factory(DEBOUNCE_MS);
    let first = factory.load_configuration(&path).unwrap();
    let failures = count_reloads(&factory, false);

    common::write_config(dir.path(), "nlog.config", "<nlog autoReload='true'><rules>");
    assert!(common::wait_until(TIMEOUT, || failures.load(Ordering::SeqCst) >= 1).await);
    assert_eq!(factory.configuration().unwrap().id(), first.id());
    assert!(factory
        .internal_logger()
        .captured_text()
        .contains("Automatic reload failed"));

    common::write_config(dir.path(), "nlog.config", &config_with_targets(true, &["a", "b"]));
    assert!(common::wait_until(TIMEOUT, || common::target_count(&factory) == 2).await);
    factory.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_included_file_with_own_auto_reload_triggers() {
    let dir = TempDir::new().unwrap();
    common::write_config(
        dir.path(),
        "targets.config",
        "<nlog autoReload='true'><targets><target type='Memory' name='a'/></targets></nlog>",
    );
    let root = common::write_config(
        dir.path(),
        "nlog.config",
        "<nlog><include file='targets.config'/><rules><logger name='*' writeTo='a,b'/></rules></nlog>",
    );
    let factory = common::factory(DEBOUNCE_MS);
    let config = factory.load_configuration(&root).unwrap();
    assert!(!config.auto_reload());
    assert_eq!(config.all_targets().len(), 1);

    common::write_config(
        dir.path(),
        "targets.config",
        "<nlog autoReload='true'><targets><target type='Memory' name='a'/><target type='Memory' name='b'/></targets></nlog>",
    );
    assert!(common::wait_until(TIMEOUT, || common::target_count(&factory) == 2).await);
    factory.shutdown();
}

#[test]
fn test_auto_reload_without_caller_runtime() {
    let dir = TempDir::new().unwrap();
    let path = common::write_config(dir.path(), "nlog.config", &config_with_targets(true, &["a"]));
    let factory = common::factory(DEBOUNCE_MS);
    let first = factory.load_configuration(&path).unwrap();
    let old = common::memory(&first, "a");
    assert_eq!(factory.watched_files().len(), 1);

    common::write_config(dir.path(), "nlog.config", &config_with_targets(true, &["a", "b"]));
    assert!(common::wait_until_blocking(TIMEOUT, || common::target_count(&factory) == 2));
    assert!(common::wait_until_blocking(TIMEOUT, || old.is_closed()));

    factory.shutdown();
    assert!(factory.watched_files().is_empty());
}
