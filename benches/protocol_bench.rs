//! benchmarks for the wire codec and the cached table lookup paths

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tablecache::protocol::codec;
use tablecache::{CachedTable, ColumnValue, Record, RecordRow, Row};

fn sample_records(count: usize) -> Vec<Record> {
    let mut rng = SmallRng::seed_from_u64(17);
    (0..count)
        .map(|i| {
            vec![
                ColumnValue::Int(i as i64),
                ColumnValue::Text(format!("name-{}", i)),
                ColumnValue::Int(rng.gen_range(0..100)),
            ]
        })
        .collect()
}

fn bench_codec(c: &mut Criterion) {
    let records = sample_records(1_000);

    c.bench_function("encode 1k records", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(64 * 1024);
            for record in &records {
                codec::write_record(&mut buf, record).unwrap();
            }
            black_box(buf)
        })
    });

    let mut encoded = Vec::new();
    for record in &records {
        codec::write_record(&mut encoded, record).unwrap();
    }
    c.bench_function("decode 1k records", |b| {
        b.iter(|| {
            let mut slice: &[u8] = &encoded;
            for _ in 0..records.len() {
                black_box(codec::read_record(&mut slice).unwrap());
            }
        })
    });
}

fn bench_lookups(c: &mut Criterion) {
    let rows: Vec<RecordRow> = sample_records(10_000)
        .into_iter()
        .map(|record| RecordRow::from_record(record).unwrap())
        .collect();
    let source_rows = rows.clone();
    let table = CachedTable::new(1, move || Ok(source_rows.clone()));

    // first lookups build the by-key, unique and indexed maps
    table.get(&ColumnValue::Int(0)).unwrap();
    table
        .unique_row(1, &ColumnValue::Text("name-0".to_string()))
        .unwrap();
    table.indexed_rows(2, &ColumnValue::Int(0)).unwrap();

    c.bench_function("unique_row over 10k rows", |b| {
        let probe = ColumnValue::Text("name-9000".to_string());
        b.iter(|| black_box(table.unique_row(1, &probe).unwrap()))
    });

    c.bench_function("indexed_rows over 10k rows", |b| {
        let probe = ColumnValue::Int(42);
        b.iter(|| black_box(table.indexed_rows(2, &probe).unwrap()))
    });

    c.bench_function("invalidate and rebuild key map", |b| {
        b.iter(|| {
            table.invalidate();
            black_box(table.get(&ColumnValue::Int(500)).unwrap())
        })
    });
}

criterion_group!(benches, bench_codec, bench_lookups);
criterion_main!(benches);
