//! Batch verification benchmarks
//!
//! Compares one shared analysis context across a batch against a fresh
//! context per unit, and measures warm-cache re-verification.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use intent_core::{AnalysisContext, Contract, FailureMode, Unit};

fn units(count: usize) -> Vec<Unit> {
    (0..count)
        .map(|i| Unit {
            id: format!("app.module{}", i),
            purpose: format!("module {}", i),
            contract: Contract {
                requires: vec!["input.email is String".into(), "system.db is reachable".into()],
                on_success: vec!["result.token is issued".into()],
                invariants: vec!["password never logged".into()],
                fails: vec![FailureMode {
                    error_type: "AuthError".into(),
                    handling_strategy: "reject".into(),
                }],
                ..Contract::default()
            },
            implementation_text: format!(
                "import {{ db }} from './module{next}'\n\
                 export async function login{i}({{ email, password }}) {{\n\
                   logger.info('login', email)\n\
                   try {{\n\
                     const user = await db.find(email)\n\
                     if (!(await bcrypt.compare(password, user.hash))) throw new AuthError()\n\
                     return {{ token: sign(user), user }}\n\
                   }} catch (e) {{\n\
                     if (e instanceof AuthError) return {{ error: e.message }}\n\
                     throw e\n\
                   }}\n\
                 }}\n",
                i = i,
                next = (i + 1) % count,
            ),
            implementation_path: None,
        })
        .collect()
}

fn bench_batch(c: &mut Criterion) {
    let root = std::env::temp_dir();
    let mut group = c.benchmark_group("verify_batch");

    for count in [10usize, 50] {
        let batch = units(count);

        group.bench_with_input(BenchmarkId::new("shared_context", count), &batch, |b, batch| {
            b.iter(|| {
                let mut ctx = AnalysisContext::new();
                black_box(ctx.verify_all(batch, &root))
            })
        });

        group.bench_with_input(BenchmarkId::new("context_per_unit", count), &batch, |b, batch| {
            b.iter(|| {
                for unit in batch {
                    let mut ctx = AnalysisContext::new();
                    ctx.set_project_root(&root);
                    black_box(ctx.verify_one(unit));
                }
            })
        });

        let mut warm = AnalysisContext::new();
        warm.verify_all(&batch, &root);
        group.bench_with_input(BenchmarkId::new("warm_cache", count), &batch, |b, batch| {
            b.iter(|| black_box(warm.verify_all(batch, &root)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_batch);
criterion_main!(benches);
