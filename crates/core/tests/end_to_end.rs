//! Integration tests wiring discovery, the graph, fingerprinting, and the
//! cache together the way `donotnet-exec` will: the scenarios here mirror
//! the end-to-end cases a single invocation actually walks through.

use std::fs;

use donotnet_core::{cache::make_key, content_fingerprint, discover, Cache, Graph};
use tempfile::tempdir;

fn write(path: &std::path::Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn baseline_run_misses_then_repeat_run_hits() {
    let dir = tempdir().unwrap();
    let root = dir.path();

    write(&root.join("Core/Core.csproj"), "<Project></Project>");
    write(
        &root.join("Core.Tests/Core.Tests.csproj"),
        r#"<Project><ItemGroup><ProjectReference Include="..\Core\Core.csproj" /></ItemGroup></Project>"#,
    );
    write(&root.join("Core/A.cs"), "class A {}");

    let discovery = discover(root, root).unwrap();
    let graph = Graph::build(root, discovery.projects);
    let test_idx = graph.index_of("Core.Tests/Core.Tests.csproj").unwrap();
    let test_project = graph.project(test_idx);

    let content_fp = content_fingerprint(root, &[test_project.directory.clone()]).unwrap();
    let args_fp = donotnet_core::args_fingerprint("test", &[]);
    let key = make_key(&content_fp.to_hex(), &args_fp.to_hex(), &test_project.id_str());

    let cache = Cache::open(root.join(".donotnet/cache.db")).unwrap();
    assert!(cache.lookup(&key).is_none(), "baseline run must miss");

    cache.mark(&key, 1_000, true, b"Passed!".to_vec(), String::new());
    assert!(cache.lookup(&key).is_some(), "repeat run with unchanged inputs must hit");
}

#[test]
fn editing_a_source_file_invalidates_the_cache_key() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(&root.join("Core/A.cs"), "class A {}");

    let fp_before = content_fingerprint(root, &[root.join("Core")]).unwrap();

    std::thread::sleep(std::time::Duration::from_secs(1));
    let file = fs::OpenOptions::new()
        .write(true)
        .open(root.join("Core/A.cs"))
        .unwrap();
    file.set_modified(std::time::SystemTime::now()).unwrap();

    let fp_after = content_fingerprint(root, &[root.join("Core")]).unwrap();
    assert_ne!(fp_before, fp_after, "touching a source file must change the fingerprint");
}

#[test]
fn failed_run_is_recoverable_via_failed_entries() {
    let dir = tempdir().unwrap();
    let cache = Cache::open(dir.path().join("cache.db")).unwrap();
    let args_fp = "argshash";

    let key = make_key("content1", args_fp, "Core.Tests/Core.Tests.csproj");
    cache.mark(&key, 1, false, b"Failure output".to_vec(), String::new());

    let failed = cache.failed_entries(args_fp);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].project_id, "Core.Tests/Core.Tests.csproj");

    // Re-running successfully clears it from the failed set (a fresh cache
    // key under the same project/args, since content changed).
    let key2 = make_key("content2", args_fp, "Core.Tests/Core.Tests.csproj");
    cache.mark(&key2, 2, true, vec![], String::new());
    let failed_after = cache.failed_entries(args_fp);
    assert!(failed_after.is_empty());
}

#[test]
fn affected_set_excludes_unrelated_projects() {
    let dir = tempdir().unwrap();
    let root = dir.path();

    write(&root.join("Core/Core.csproj"), "<Project></Project>");
    write(&root.join("Unrelated/Unrelated.csproj"), "<Project></Project>");
    write(
        &root.join("Core.Tests/Core.Tests.csproj"),
        r#"<Project><ItemGroup><ProjectReference Include="..\Core\Core.csproj" /></ItemGroup></Project>"#,
    );

    let discovery = discover(root, root).unwrap();
    let graph = Graph::build(root, discovery.projects);
    let core_idx = graph.index_of("Core/Core.csproj").unwrap();
    let unrelated_idx = graph.index_of("Unrelated/Unrelated.csproj").unwrap();

    let affected = graph.affected(&[core_idx]);
    assert!(!affected.contains(&unrelated_idx));
}

#[test]
fn cache_entries_older_than_ttl_are_evicted_on_sweep() {
    let dir = tempdir().unwrap();
    let cache = Cache::open(dir.path().join("cache.db")).unwrap();
    let now = 10_000_000u64;
    cache.mark("recent", now - 10, true, vec![], String::new());
    cache.mark("ancient", now - (90 * 86400), true, vec![], String::new());

    let evicted = cache.delete_older_than(now, 30 * 86400);
    assert_eq!(evicted, 1);
    assert!(cache.lookup("recent").is_some());
    assert!(cache.lookup("ancient").is_none());
}
