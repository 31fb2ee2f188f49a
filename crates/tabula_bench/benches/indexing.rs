//! Index operation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tabula_bench::preloaded_person_index;
use tabula_core::{ForeignIndex, TransactionParticipant, UniqueIndex};
use tabula_testkit::fixtures::{Person, Team};

/// Benchmark unique index add/commit cycles.
fn bench_unique_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("unique_add");

    group.bench_function("add_commit", |b| {
        let index = UniqueIndex::new("person_pk")
            .has_index(|row: &Person| row.id())
            .build();
        let mut next_id = 0i64;
        b.iter(|| {
            let person = Person::new(next_id, "bench@example.com", None);
            next_id += 1;
            index.add(black_box(&person)).unwrap();
            index.commit();
        });
    });

    group.finish();
}

/// Benchmark point lookups at several index sizes.
fn bench_unique_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("unique_find");

    for size in [100usize, 10_000] {
        let index = preloaded_person_index(size);
        let probe = (size / 2) as i64;
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(index.find(black_box(&probe))));
        });
    }

    group.finish();
}

/// Benchmark foreign bucket maintenance.
fn bench_foreign_membership(c: &mut Criterion) {
    let mut group = c.benchmark_group("foreign_membership");

    group.bench_function("add_remove_commit", |b| {
        let teams = UniqueIndex::new("team_pk")
            .has_index(|row: &Team| row.id())
            .build();
        let members: Arc<ForeignIndex<i64, Team, Person>> =
            ForeignIndex::new("team_members", Arc::clone(&teams))
                .has_index(|row: &Person| row.team().unwrap_or_default())
                .has_filter(|row: &Person| row.team().is_some())
                .build();
        teams.add(&Team::new(1, "bench")).unwrap();
        teams.commit();
        let person = Person::new(1, "bench@example.com", Some(1));

        b.iter(|| {
            members.add(black_box(&person)).unwrap();
            members.remove(&person).unwrap();
            members.commit();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_unique_add,
    bench_unique_find,
    bench_foreign_membership
);
criterion_main!(benches);
