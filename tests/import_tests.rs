//! Import allow-list, module search paths and the per-sandbox module cache.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use scriptbox_core::config::SandboxConfig;
use scriptbox_exec::{Identity, InMemoryHost, Sandbox};
use scriptbox_lang::{ExcKind, ImportResolver, Interpreter, CaptureSink, DEFAULT_GUARDS};
use serde_json::json;

fn sandbox_with_modules(dir: &Path, allowed: &str) -> Sandbox {
    let config = SandboxConfig {
        allowed_import_modules: allowed.into(),
        additional_modules_paths: format!(" {} , ", dir.display()),
        ..SandboxConfig::default()
    };
    Sandbox::new(config, Arc::new(InMemoryHost::new())).unwrap()
}

#[test]
fn default_modules_are_importable() {
    let mut sb = Sandbox::new(SandboxConfig::default(), Arc::new(InMemoryHost::new())).unwrap();
    let script = r#"
import statistics
import json
from datetime import date, timedelta
d = date(2024, 1, 31) + timedelta(days=1)
result = table.Table({"when": [d], "avg": [statistics.mean([1, 2, 3])], "js": [json.dumps({"a": 1})]})
"#;
    let result = sb.execute(script, &Identity::anonymous()).unwrap();
    assert_eq!(result.table.rows[0]["when"], json!("2024-02-01"));
    assert_eq!(result.table.rows[0]["avg"], json!(2));
    assert_eq!(result.table.rows[0]["js"], json!("{\"a\": 1}"));
}

#[test]
fn script_modules_load_from_search_paths() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("helpers.py"),
        "print('loading helpers')\n\ndef double(x):\n    return x * 2\n\nFACTOR = 3\n",
    )
    .unwrap();
    let mut sb = sandbox_with_modules(dir.path(), "helpers");
    let script = "import helpers\nfrom helpers import FACTOR\nprint(helpers.double(FACTOR))\n";
    let result = sb.execute(script, &Identity::anonymous()).unwrap();
    // Output produced while a module loads is not captured.
    assert_eq!(result.log, vec!["6"]);
}

#[test]
fn dotted_modules_resolve_to_nested_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("reports")).unwrap();
    fs::write(dir.path().join("reports/fmt.py"), "def pct(x):\n    return str(round(x * 100)) + '%'\n").unwrap();
    let mut sb = sandbox_with_modules(dir.path(), "reports.fmt");
    let result = sb
        .execute("import reports.fmt as fmt\nprint(fmt.pct(0.25))\n", &Identity::anonymous())
        .unwrap();
    assert_eq!(result.log, vec!["25%"]);
}

#[test]
fn module_state_is_cached_for_the_sandbox_lifetime() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("counter.py"), "calls = []\n").unwrap();
    let mut sb = sandbox_with_modules(dir.path(), "counter");
    let script = "import counter\ncounter.calls.append(1)\nprint(len(counter.calls))\n";
    assert_eq!(sb.execute(script, &Identity::anonymous()).unwrap().log, vec!["1"]);
    assert_eq!(sb.execute(script, &Identity::anonymous()).unwrap().log, vec!["2"]);

    let first = sb.imports().cached("counter").unwrap();
    sb.execute(script, &Identity::anonymous()).unwrap();
    let second = sb.imports().cached("counter").unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // A fresh sandbox starts from a fresh cache.
    let mut other = sandbox_with_modules(dir.path(), "counter");
    assert_eq!(other.execute(script, &Identity::anonymous()).unwrap().log, vec!["1"]);
}

#[test]
fn resolving_twice_returns_the_same_handle() {
    let resolver = ImportResolver::new(vec!["math".into(), "json".into()], Vec::new());
    let mut sink = CaptureSink::new();
    let mut interp = Interpreter::new(&DEFAULT_GUARDS, &resolver, &mut sink);
    let a = resolver.resolve("math", &mut interp).unwrap();
    let b = resolver.resolve("math", &mut interp).unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let denied = resolver.resolve("statistics", &mut interp).unwrap_err();
    assert_eq!(denied.kind, ExcKind::ImportDenied);
    assert!(denied.message.contains("'statistics'"));
}

#[test]
fn allowed_but_missing_modules_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let mut sb = sandbox_with_modules(dir.path(), "ghost");
    let error = sb.run("import ghost\n", &Identity::anonymous()).1.unwrap();
    assert!(error.starts_with("ModuleNotFoundError: No module named 'ghost'"), "{error}");
}

#[test]
fn circular_imports_fail_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("ping.py"), "import pong\n").unwrap();
    fs::write(dir.path().join("pong.py"), "import ping\n").unwrap();
    let mut sb = sandbox_with_modules(dir.path(), "ping, pong");
    let error = sb.run("import ping\n", &Identity::anonymous()).1.unwrap();
    assert!(error.starts_with("ImportError"), "{error}");
    assert!(error.ends_with("caused by line 1: import ping"), "{error}");
}

#[test]
fn module_sources_pass_the_same_restrictions() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("sneaky.py"), "data = open('/etc/passwd')\n").unwrap();
    let mut sb = sandbox_with_modules(dir.path(), "sneaky");
    let error = sb.run("import sneaky\n", &Identity::anonymous()).1.unwrap();
    assert!(error.starts_with("SyntaxError"), "{error}");
    assert!(error.contains("sneaky"), "{error}");
}

#[test]
fn modules_outside_the_allow_list_stay_hidden_even_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("present.py"), "x = 1\n").unwrap();
    let mut sb = sandbox_with_modules(dir.path(), "");
    let error = sb.run("import present\n", &Identity::anonymous()).1.unwrap();
    assert!(error.starts_with("ImportDenied"), "{error}");
}
