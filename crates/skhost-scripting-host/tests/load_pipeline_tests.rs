// Integration tests for discovery, activation ordering and unloading
mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use common::*;
use skhost_scripting_host::{LoadSummary, NoopScope, ScriptError, ScriptLoader};
use tempfile::TempDir;

fn noop() -> Arc<NoopScope> {
    Arc::new(NoopScope)
}

#[test]
fn test_pre_load_runs_in_priority_order_across_the_batch() {
    for workers in [0, 1, 3] {
        let dir = TempDir::new().unwrap();
        let a = write_script(
            dir.path(),
            "a.sk",
            "track a1 priority 300\ntrack a2 priority 100\ntrack a3\n",
        );
        let b = write_script(
            dir.path(),
            "b.sk",
            "track b1 priority 200\ntrack b2 priority 100\n",
        );

        let mut f = fixture(workers);
        let summary = f
            .loader
            .load_scripts_blocking(&[a.clone(), b.clone()], noop())
            .unwrap();
        assert_eq!(summary, LoadSummary::new(2, 5), "workers = {}", workers);

        let log = entries(&f.log);
        // Equal priorities keep batch order
        assert_eq!(
            with_prefix(&log, "preLoad:"),
            vec!["a2", "b2", "b1", "a1", "a3"],
            "workers = {}",
            workers
        );
        // Load and postLoad follow file order, script by script
        assert_eq!(with_prefix(&log, "load:"), vec!["a1", "a2", "a3", "b1", "b2"]);
        assert_eq!(with_prefix(&log, "postLoad:"), vec!["a1", "a2", "a3", "b1", "b2"]);

        assert_eq!(f.loader.registry().structure_names(&a).unwrap(), vec!["a1", "a2", "a3"]);
        assert_eq!(f.loader.registry().structure_names(&b).unwrap(), vec!["b1", "b2"]);
    }
}

#[test]
fn test_every_pre_load_precedes_every_load() {
    let dir = TempDir::new().unwrap();
    let paths: Vec<PathBuf> = (0..4)
        .map(|i| {
            write_script(
                dir.path(),
                &format!("s{}.sk", i),
                &format!("track x{i} priority {}\ntrack y{i}\n", 10 * i),
            )
        })
        .collect();

    let mut f = fixture(2);
    f.loader.load_scripts_blocking(&paths, noop()).unwrap();

    let log = entries(&f.log);
    let last_pre = last(&log, "preLoad:").unwrap();
    let first_load = first(&log, "load:").unwrap();
    let last_load = last(&log, "load:").unwrap();
    let first_post = first(&log, "postLoad:").unwrap();
    assert!(last_pre < first_load);
    assert!(last_load < first_post);
}

#[test]
fn test_rejected_structures_are_dropped_and_skip_later_phases() {
    let dir = TempDir::new().unwrap();
    let path = write_script(
        dir.path(),
        "a.sk",
        "track keep\n\
         track refuse reject-preload\n\
         track broken fail-preload\n\
         track boom panic-preload\n\
         track lazy reject-load\n\
         track crash fail-load\n\
         track late reject-postload\n",
    );

    let mut f = fixture(0);
    let summary = f.loader.load_scripts_blocking(&[path.clone()], noop()).unwrap();
    assert_eq!(summary, LoadSummary::new(1, 1));
    assert_eq!(f.loader.registry().structure_names(&path).unwrap(), vec!["keep"]);

    let log = entries(&f.log);
    for name in ["refuse", "broken", "boom"] {
        assert!(!log.contains(&format!("load:{}", name)));
        assert!(!log.contains(&format!("postLoad:{}", name)));
    }
    for name in ["lazy", "crash"] {
        assert!(log.contains(&format!("load:{}", name)));
        assert!(!log.contains(&format!("postLoad:{}", name)));
    }
    // A structure refused after load releases what it bound
    assert!(log.contains(&"unload:late".to_string()));
    assert!(log.contains(&"postUnload:late".to_string()));

    let errors = f.reporter.messages();
    assert_eq!(errors.len(), 6);
    assert!(errors.iter().any(|e| e.contains("preLoad failed for 'boom'")));
    assert!(errors.iter().any(|e| e.contains("track boom panicked")));
    assert!(errors.iter().any(|e| e.contains("load failed for 'crash'")));
    assert!(errors.iter().any(|e| e.contains("postLoad failed for 'late'")));
}

#[test]
fn test_directory_load_records_disabled_scripts() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "a.sk", "track one\ntrack two\n");
    write_script(dir.path(), "-b.sk", "track three\n");
    write_script(dir.path(), "notes.txt", "track ignored\n");

    let mut f = fixture(2);
    let summary = f.loader.load_directory_blocking(dir.path(), noop()).unwrap();
    assert_eq!(summary, LoadSummary::new(1, 2));

    let root = fs::canonicalize(dir.path()).unwrap();
    let registry = f.loader.registry();
    assert_eq!(registry.loaded_paths(), vec![root.join("a.sk")]);
    assert_eq!(registry.disabled_paths(), vec![root.join("-b.sk")]);
    assert!(registry.is_disabled(&root.join("b.sk")));
    assert!(!entries(&f.log).iter().any(|e| e.ends_with(":three")));
}

#[test]
fn test_nested_directories_load_parents_first() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "sub/inner.sk", "track inner\n");
    write_script(dir.path(), "z.sk", "track z\n");
    write_script(dir.path(), "a.sk", "track a\n");

    let mut f = fixture(0);
    f.loader.load_directory_blocking(dir.path(), noop()).unwrap();

    assert_eq!(with_prefix(&entries(&f.log), "load:"), vec!["a", "z", "inner"]);
}

#[test]
fn test_unload_adds_disabled_marker_without_touching_files() {
    let dir = TempDir::new().unwrap();
    let a = write_script(dir.path(), "a.sk", "track one\ntrack two\n");
    let b = write_script(dir.path(), "b.sk", "track three\n");

    let mut f = fixture(0);
    f.loader.load_scripts_blocking(&[a.clone(), b.clone()], noop()).unwrap();
    clear(&f.log);

    let summary = f.loader.unload_scripts(&[a.clone()]);
    assert_eq!(summary, LoadSummary::new(1, 2));

    let registry = f.loader.registry();
    assert!(!registry.is_loaded(&a));
    assert!(registry.is_loaded(&b));
    assert!(registry.is_disabled(&a));
    assert!(a.exists());
    assert!(!a.with_file_name("-a.sk").exists());

    // Unload runs for every structure before any postUnload
    assert_eq!(
        entries(&f.log),
        vec!["unload:one", "unload:two", "postUnload:one", "postUnload:two"]
    );

    // Unknown paths are ignored
    assert_eq!(f.loader.unload_scripts(&[a.clone()]), LoadSummary::default());
}

#[test]
fn test_unload_runs_every_unload_before_any_post_unload() {
    let dir = TempDir::new().unwrap();
    let a = write_script(dir.path(), "a.sk", "track a1\ntrack a2\n");
    let b = write_script(dir.path(), "b.sk", "track b1\ntrack b2\n");

    let mut f = fixture(0);
    f.loader.load_scripts_blocking(&[a.clone(), b.clone()], noop()).unwrap();
    clear(&f.log);

    let summary = f.loader.unload_scripts(&[b.clone(), a.clone()]);
    assert_eq!(summary, LoadSummary::new(2, 4));

    let log = entries(&f.log);
    assert_eq!(
        log,
        vec![
            "unload:a1",
            "unload:a2",
            "unload:b1",
            "unload:b2",
            "postUnload:a1",
            "postUnload:a2",
            "postUnload:b1",
            "postUnload:b2",
        ]
    );
    assert!(last(&log, "unload:").unwrap() < first(&log, "postUnload:").unwrap());
    assert!(f.loader.registry().is_empty());
    assert!(f.loader.registry().is_disabled(&a));
    assert!(f.loader.registry().is_disabled(&b));
}

#[test]
fn test_unload_callbacks_may_read_the_registry() {
    let (done, finished) = mpsc::channel();
    thread::spawn(move || {
        let dir = TempDir::new().unwrap();
        let a = write_script(dir.path(), "a.sk", "track one fail-unload fail-postunload\n");
        let b = write_script(dir.path(), "b.sk", "track two\n");

        let log = new_log();
        let reporter = Arc::new(RegistryReadingReporter::default());
        let host = Arc::new(RecordingHost::default());
        let mut loader = ScriptLoader::builder(TestParser::new(log.clone()), catalog(), host)
            .reporter(reporter.clone())
            .build();
        assert!(reporter.registry.set(loader.registry().clone()).is_ok());

        loader.load_scripts_blocking(&[a.clone(), b], noop()).unwrap();
        let summary = loader.unload_scripts(&[a]);
        let seen = reporter.seen.lock().unwrap().clone();
        done.send((summary, seen, entries(&log))).unwrap();
    });

    let (summary, seen, log) = finished
        .recv_timeout(Duration::from_secs(5))
        .expect("unload deadlocked while the reporter read the registry");
    assert_eq!(summary, LoadSummary::new(1, 1));
    // Both failures were reported while only b.sk remained loaded
    assert_eq!(seen, vec![1, 1]);
    assert_eq!(with_prefix(&log, "postUnload:"), vec!["one"]);
}

#[test]
fn test_unload_resolves_deleted_file_through_its_directory() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    let a = write_script(dir.path(), "a.sk", "track one\n");
    let indirect = dir.path().join("sub").join("..").join("a.sk");

    let mut f = fixture(0);
    f.loader.load_scripts_blocking(&[indirect.clone()], noop()).unwrap();
    assert!(f.loader.registry().is_loaded(&a));

    fs::remove_file(&a).unwrap();
    let summary = f.loader.unload_scripts(&[indirect]);
    assert_eq!(summary, LoadSummary::new(1, 1));
    assert!(f.loader.registry().is_empty());
    assert!(entries(&f.log).contains(&"postUnload:one".to_string()));
}

#[test]
fn test_reload_of_deleted_file_unloads_it() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    let a = write_script(dir.path(), "a.sk", "track one\n");
    let indirect = dir.path().join("sub").join("..").join("a.sk");

    let mut f = fixture(0);
    f.loader.load_scripts_blocking(&[a.clone()], noop()).unwrap();
    fs::remove_file(&a).unwrap();

    let summary = f.loader.reload_scripts_blocking(&[indirect], noop()).unwrap();
    assert_eq!(summary, LoadSummary::default());
    assert!(!f.loader.registry().is_loaded(&a));
    assert!(f.reporter.messages().iter().any(|e| e.contains("a.sk")));
}

#[test]
fn test_rescan_forgets_markers_of_deleted_files() {
    let dir = TempDir::new().unwrap();
    let other = TempDir::new().unwrap();
    let marker = write_script(dir.path(), "-b.sk", "track three\n");
    let kept = write_script(other.path(), "-c.sk", "track four\n");

    let mut f = fixture(0);
    f.loader.load_directory_blocking(dir.path(), noop()).unwrap();
    f.loader.load_directory_blocking(other.path(), noop()).unwrap();
    let disabled = f.loader.registry().disabled_paths();
    assert_eq!(disabled.len(), 2);
    assert!(disabled.contains(&marker) && disabled.contains(&kept));

    // Markers outside the rescanned root survive even when their file is gone
    fs::remove_file(&marker).unwrap();
    fs::remove_file(&kept).unwrap();
    f.loader.load_directory_blocking(dir.path(), noop()).unwrap();
    assert_eq!(f.loader.registry().disabled_paths(), vec![kept]);
}

#[test]
fn test_load_unload_round_trip_restores_state() {
    let dir = TempDir::new().unwrap();
    let path = write_script(dir.path(), "a.sk", "track one\non joined:\n    greet\n");

    let mut f = fixture(1);
    for _ in 0..3 {
        let loaded = f.loader.load_scripts_blocking(&[path.clone()], noop()).unwrap();
        assert_eq!(loaded, LoadSummary::new(1, 2));
        assert_eq!(f.loader.router().trigger_count(), 1);
        assert_eq!(f.host.active(), 1);

        let unloaded = f.loader.unload_scripts(&[path.clone()]);
        assert_eq!(unloaded, loaded);
        assert!(f.loader.registry().is_empty());
        assert!(f.loader.registry().is_disabled(&path));
        assert_eq!(f.loader.router().trigger_count(), 0);
        assert_eq!(f.host.active(), 0);
    }

    // One register and one unregister per cycle
    assert_eq!(*f.host.calls.lock().unwrap(), 6);
}

#[test]
fn test_duplicate_scripts_are_refused_before_any_work() {
    let dir = TempDir::new().unwrap();
    let path = write_script(dir.path(), "a.sk", "track one\n");

    let mut f = fixture(0);
    let twice = f
        .loader
        .load_scripts_blocking(&[path.clone(), path.clone()], noop());
    assert!(matches!(twice, Err(ScriptError::Invariant { .. })));
    assert!(entries(&f.log).is_empty());

    f.loader.load_scripts_blocking(&[path.clone()], noop()).unwrap();
    clear(&f.log);

    let again = f.loader.load_scripts_blocking(&[path.clone()], noop());
    assert!(matches!(again, Err(ScriptError::Invariant { .. })));
    assert!(entries(&f.log).is_empty());
}

#[test]
fn test_bad_files_do_not_abort_the_batch() {
    let dir = TempDir::new().unwrap();
    let good = write_script(dir.path(), "good.sk", "track fine\nnonsense\nexplode\n");
    let mixed = write_script(dir.path(), "mixed.sk", "on joined:\n\tgreet\n    wave\n");
    let missing = dir.path().join("missing.sk");

    let mut f = fixture(2);
    let summary = f
        .loader
        .load_scripts_blocking(&[good.clone(), mixed, missing], noop())
        .unwrap();
    assert_eq!(summary, LoadSummary::new(1, 1));
    assert_eq!(f.loader.registry().structure_names(&good).unwrap(), vec!["fine"]);

    let errors = f.reporter.messages();
    assert!(errors.iter().any(|e| e.contains("missing.sk")));
    assert!(errors.iter().any(|e| e.contains("mixed.sk")));
    assert!(errors.iter().any(|e| e.contains(":2:") && e.contains("can't understand")));
    assert!(errors.iter().any(|e| e.contains("parser exploded")));
}

#[test]
fn test_resource_scope_brackets_activation() {
    let dir = TempDir::new().unwrap();
    let a = write_script(dir.path(), "a.sk", "track one\n");
    let b = write_script(dir.path(), "b.sk", "track two\n");

    let mut f = fixture(0);
    let scope = Arc::new(LoggingScope { log: f.log.clone() });
    f.loader.load_scripts_blocking(&[a, b], scope).unwrap();

    let log = entries(&f.log);
    let opens = log.iter().filter(|e| *e == "scope:open").count();
    let closes = log.iter().filter(|e| *e == "scope:close").count();
    // One bracket per construction task plus one for the phases
    assert_eq!(opens, 3);
    assert_eq!(closes, 3);

    let first_pre = first(&log, "preLoad:").unwrap();
    let last_post = last(&log, "postLoad:").unwrap();
    assert_eq!(log[first_pre - 1], "scope:open");
    assert_eq!(log[last_post + 1], "scope:close");
}

#[test]
fn test_observer_sees_batches_and_scripts() {
    let dir = TempDir::new().unwrap();
    let a = write_script(dir.path(), "a.sk", "track one\ntrack two\n");

    let mut f = fixture(0);
    f.loader.load_scripts_blocking(&[a.clone()], noop()).unwrap();
    f.loader.unload_all();

    assert_eq!(*f.observer.batches.lock().unwrap(), vec![1]);
    assert_eq!(*f.observer.loaded.lock().unwrap(), vec![(a.clone(), 2)]);
    assert_eq!(*f.observer.unloaded.lock().unwrap(), vec![a]);
}

#[test]
fn test_reload_picks_up_changes() {
    let dir = TempDir::new().unwrap();
    let a = write_script(dir.path(), "a.sk", "track one\n");

    let mut f = fixture(0);
    f.loader.load_scripts_blocking(&[a.clone()], noop()).unwrap();

    fs::write(&a, "track one\ntrack two\n").unwrap();
    let summary = f.loader.reload_scripts_blocking(&[a.clone()], noop()).unwrap();
    assert_eq!(summary, LoadSummary::new(1, 2));
    assert!(!f.loader.registry().is_disabled(&a));
}

#[test]
fn test_dropping_the_loader_unloads_everything() {
    let dir = TempDir::new().unwrap();
    let a = write_script(dir.path(), "a.sk", "track one\n");

    let f = {
        let mut f = fixture(0);
        f.loader.load_scripts_blocking(&[a], noop()).unwrap();
        f
    };
    let log = f.log.clone();
    drop(f);

    assert!(entries(&log).contains(&"postUnload:one".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_load_with_workers() {
    let dir = TempDir::new().unwrap();
    for i in 0..8 {
        write_script(
            dir.path(),
            &format!("s{}.sk", i),
            &format!("track p{i} priority {}\n", 100 - i),
        );
    }

    let mut f = fixture(3);
    let summary = f.loader.load_directory(dir.path(), noop()).await.unwrap();
    assert_eq!(summary, LoadSummary::new(8, 8));

    let expected: Vec<String> = (0..8).rev().map(|i| format!("p{}", i)).collect();
    assert_eq!(with_prefix(&entries(&f.log), "preLoad:"), expected);

    f.loader.set_worker_count(0);
    assert_eq!(f.loader.worker_count(), 0);
    let summary = f.loader.reload_directory(dir.path(), noop()).await.unwrap();
    assert_eq!(summary, LoadSummary::new(8, 8));
}
