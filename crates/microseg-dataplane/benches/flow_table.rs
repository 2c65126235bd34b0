//! Session Cache and Policy Table Benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use microseg_common::{Action, FlowKey, PolicyKey, Timestamp};
use microseg_dataplane::{SessionCache, SessionRecord};
use microseg_policy::{
    ExactPolicyRule, ExactPolicyTable, PolicyResolver, WildcardPolicyRule, WildcardPolicyTable,
};
use std::sync::Arc;

fn flow(i: u32) -> FlowKey {
    FlowKey::new(i, 0x08080808, 12345, 443, 6)
}

fn bench_flow_hash(c: &mut Criterion) {
    let key = FlowKey::new(0xC0A80101, 0x08080808, 12345, 443, 6);

    c.bench_function("flow_key_hash", |b| b.iter(|| black_box(key).fnv_hash()));
}

fn bench_session_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_lookup");

    for shards in [1usize, 16] {
        let cache = SessionCache::new(100_000, shards);
        for i in 0..100_000u32 {
            let _ = cache.insert_if_absent(
                flow(i),
                SessionRecord::new(Timestamp::from_nanos(0), 64, Action::Allow, 0),
            );
        }
        let key = flow(50_000);

        group.bench_with_input(BenchmarkId::new("hit_100k", shards), &shards, |b, _| {
            b.iter(|| cache.lookup(black_box(&key)).map(|s| s.cached_action))
        });
    }
    group.finish();
}

fn bench_session_churn(c: &mut Criterion) {
    let cache = SessionCache::new(1024, 1);
    let mut i = 0u32;

    c.bench_function("session_insert_evict", |b| {
        b.iter(|| {
            i = i.wrapping_add(1);
            cache.insert_if_absent(
                flow(i),
                SessionRecord::new(Timestamp::from_nanos(0), 64, Action::Allow, 0),
            )
        })
    });
}

fn bench_policy_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("policy_resolve");

    let exact = Arc::new(ExactPolicyTable::new(10_000));
    for i in 0..10_000u32 {
        let _ = exact.upsert(ExactPolicyRule::allow(PolicyKey::from(flow(i)), i + 1));
    }

    for filled in [10usize, 100, 1000] {
        let wildcard = Arc::new(WildcardPolicyTable::new(1000));
        for slot in 0..filled {
            let rule = WildcardPolicyRule::any(Action::Deny, slot as u16, slot as u32 + 1)
                .with_dst(0x0A000000 + slot as u32, 32);
            let _ = wildcard.set_slot(slot, rule);
        }
        let resolver = PolicyResolver::new(exact.clone(), wildcard, 1000);

        group.bench_with_input(BenchmarkId::new("exact_hit", filled), &filled, |b, _| {
            b.iter(|| resolver.resolve(black_box(&flow(5_000))))
        });
        // Worst case: scan every slot, then default
        group.bench_with_input(BenchmarkId::new("wildcard_miss", filled), &filled, |b, _| {
            b.iter(|| resolver.resolve(black_box(&flow(u32::MAX))))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_flow_hash,
    bench_session_lookup,
    bench_session_churn,
    bench_policy_resolve,
);

criterion_main!(benches);
