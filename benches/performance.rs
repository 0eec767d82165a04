use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use scriptbox_core::config::SandboxConfig;
use scriptbox_core::schema::{ColumnDescriptor, ColumnType};
use scriptbox_core::serialize::{from_wire, to_wire};
use scriptbox_core::wire::{Record, WireTable};
use scriptbox_exec::{Identity, InMemoryHost, Sandbox};
use serde_json::json;

fn make_wire(rows: usize) -> WireTable {
    let columns = vec![
        ColumnDescriptor::new("group", ColumnType::String),
        ColumnDescriptor::new("order", ColumnType::Integer),
        ColumnDescriptor::new("value", ColumnType::Float),
        ColumnDescriptor::new("ts", ColumnType::Datetime),
    ];
    let rows = (0..rows)
        .map(|i| {
            let mut r = Record::new();
            r.insert("group".into(), json!(format!("group-{}", i % 4)));
            r.insert("order".into(), json!(i));
            r.insert("value".into(), json!((i % 10) as f64 + 0.5));
            r.insert("ts".into(), json!(format!("2024-01-{:02}T12:00:00", i % 28 + 1)));
            r
        })
        .collect();
    WireTable::new(columns, rows)
}

fn bench_serializer(c: &mut Criterion) {
    let wire = make_wire(1024);
    let table = from_wire(&wire).unwrap();
    c.bench_function("from_wire_1k", |b| {
        b.iter(|| {
            let _ = from_wire(&wire).unwrap();
        })
    });
    c.bench_function("to_wire_1k", |b| {
        b.iter(|| {
            let _ = to_wire(&table);
        })
    });
}

fn bench_sandbox_run(c: &mut Criterion) {
    let mut sandbox = Sandbox::new(SandboxConfig::default(), Arc::new(InMemoryHost::new())).unwrap();
    let input = make_wire(256);
    let script = "result = result.group_by('group', {'value': 'sum'}).sort_values('group')\n";
    let user = Identity::anonymous();
    c.bench_function("sandbox_group_by_256", |b| {
        b.iter(|| {
            let _ = sandbox.execute_with_input(script, &user, Some(&input)).unwrap();
        })
    });
}

criterion_group!(benches, bench_serializer, bench_sandbox_run);
criterion_main!(benches);
