//! Scripts must not reach anything outside the capability surface.

use std::sync::Arc;

use scriptbox_core::config::SandboxConfig;
use scriptbox_exec::{Identity, InMemoryHost, Sandbox};
use scriptbox_lang::builtins;

fn run_err(script: &str) -> String {
    let mut sb = Sandbox::new(SandboxConfig::default(), Arc::new(InMemoryHost::new())).unwrap();
    let (result, error) = sb.run(script, &Identity::anonymous());
    assert!(result.is_none(), "script unexpectedly succeeded: {script}");
    error.unwrap()
}

#[test]
fn dangerous_primitives_fail_at_compile_time() {
    for script in [
        "f = open('/etc/passwd')\n",
        "eval('1 + 1')\n",
        "exec('import os')\n",
        "code = compile('1', 'x', 'eval')\n",
        "g = globals()\n",
        "v = vars()\n",
        "x = input()\n",
        "breakpoint()\n",
    ] {
        let error = run_err(script);
        assert!(error.starts_with("SyntaxError"), "{script} -> {error}");
    }
}

#[test]
fn private_names_fail_at_compile_time() {
    for script in [
        "x = __import__('os')\n",
        "_hidden = 1\n",
        "n = (1).__class__\n",
        "s = ''.__class__.__mro__\n",
        "def f(_x):\n    return _x\n",
        "import math as _m\n",
    ] {
        let error = run_err(script);
        assert!(error.starts_with("SyntaxError"), "{script} -> {error}");
    }
}

#[test]
fn unsupported_statements_are_rejected() {
    for script in [
        "class A:\n    pass\n",
        "try:\n    x = 1\nexcept Exception:\n    pass\n",
        "with x as y:\n    pass\n",
        "def g():\n    yield 1\n",
        "x = 1\ndel x\n",
        "global y\n",
    ] {
        let error = run_err(script);
        assert!(error.starts_with("SyntaxError"), "{script} -> {error}");
    }
}

#[test]
fn dynamic_private_attribute_access_is_denied_by_the_guard() {
    let error = run_err("name = '__' + 'class__'\nx = getattr(1, name)\n");
    assert!(error.starts_with("AttributeError"), "{error}");
    assert!(error.ends_with("caused by line 2: x = getattr(1, name)"), "{error}");

    let error = run_err("setattr(math, '_private', 1)\n");
    assert!(error.starts_with("AttributeError"), "{error}");
}

#[test]
fn modules_cannot_be_rebound_or_escaped() {
    let error = run_err("math.pi = 3\n");
    assert!(error.starts_with("AttributeError"), "{error}");

    let error = run_err("import os\n");
    assert_eq!(
        error,
        "ImportDenied: 'os' is not configured as a supported import module\ncaused by line 1: import os"
    );

    for module in ["subprocess", "socket", "sys", "builtins", "io"] {
        let error = run_err(&format!("import {module}\n"));
        assert!(error.starts_with("ImportDenied"), "{error}");
        let error = run_err(&format!("from {module} import anything\n"));
        assert!(error.starts_with("ImportDenied"), "{error}");
    }
}

#[test]
fn builtin_surface_is_the_fixed_list() {
    let mut names: Vec<&str> = builtins::names().collect();
    names.sort();
    let mut expected = vec![
        "sorted", "reversed", "map", "any", "all", "filter", "len", "next", "enumerate", "sum",
        "abs", "min", "max", "round", "divmod", "str", "int", "float", "tuple", "set", "list",
        "dict", "bool", "zip", "type", "range", "isinstance", "print", "getattr", "setattr",
        "hasattr",
    ];
    expected.sort();
    assert_eq!(names, expected);
}

#[test]
fn unknown_names_are_name_errors() {
    let error = run_err("f = file('x')\n");
    assert!(error.starts_with("NameError"), "{error}");
    let error = run_err("x = repr(1)\n");
    assert!(error.starts_with("NameError"), "{error}");
}

#[test]
fn print_cannot_be_redirected() {
    let error = run_err("print('x', file=None)\n");
    assert!(error.starts_with("TypeError"), "{error}");
}
