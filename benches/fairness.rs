use caseforge::fairness::FairnessEngine;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use uuid::Uuid;

fn fairness_primitives(c: &mut Criterion) {
    let commitment = FairnessEngine::generate_seed();
    let seed = commitment.seed_hex;
    let hash = commitment.hash_hex;
    let pot_id = Uuid::new_v4();
    let battle_id = Uuid::new_v4();

    let mut group = c.benchmark_group("pot_draw");
    for tickets in [10u32, 1_000, 1_000_000] {
        group.bench_function(BenchmarkId::from_parameter(tickets), |b| {
            b.iter(|| {
                FairnessEngine::draw_pot_winner(
                    black_box(&seed),
                    black_box(&hash),
                    pot_id,
                    black_box(tickets),
                )
                .unwrap()
            })
        });
    }
    group.finish();

    c.bench_function("battle_roll", |b| {
        b.iter(|| {
            FairnessEngine::battle_roll(
                black_box(&seed),
                black_box(&hash),
                battle_id,
                black_box("client-seed"),
                2,
                1,
                10_000,
            )
            .unwrap()
        })
    });

    c.bench_function("seed_generation", |b| {
        b.iter(|| black_box(FairnessEngine::generate_seed()))
    });

    c.bench_function("commitment_check", |b| {
        b.iter(|| FairnessEngine::matches_commitment(black_box(&seed), black_box(&hash)))
    });
}

criterion_group!(benches, fairness_primitives);
criterion_main!(benches);
