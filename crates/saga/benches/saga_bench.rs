use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use saga::{InMemoryStepInvoker, SagaOrchestrator, StartSaga, StepDefinition};

fn plan(len: usize) -> Vec<StepDefinition> {
    (0..len)
        .map(|i| StepDefinition::new(format!("step-{i}"), "svc", format!("do-{i}"), format!("undo-{i}")))
        .collect()
}

fn bench_complete_saga(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("saga/complete");

    for len in [1, 5, 20] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            let orchestrator =
                SagaOrchestrator::with_system_clock(Arc::new(InMemoryStepInvoker::new()));
            b.iter(|| {
                rt.block_on(async {
                    let id = orchestrator.start(StartSaga::new("bench", plan(len))).unwrap();
                    orchestrator.wait_for_terminal(id).await.unwrap();
                });
            });
        });
    }
    group.finish();
}

fn bench_compensated_saga(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let invoker = InMemoryStepInvoker::new();
    invoker.fail_always("svc", "do-9");
    let orchestrator = SagaOrchestrator::with_system_clock(Arc::new(invoker));

    c.bench_function("saga/compensate_9_steps", |b| {
        b.iter(|| {
            rt.block_on(async {
                let id = orchestrator.start(StartSaga::new("bench", plan(10))).unwrap();
                orchestrator.wait_for_terminal(id).await.unwrap();
            });
        });
    });
}

fn bench_status(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let orchestrator = SagaOrchestrator::with_system_clock(Arc::new(InMemoryStepInvoker::new()));
    let id = rt.block_on(async {
        let id = orchestrator.start(StartSaga::new("bench", plan(5))).unwrap();
        orchestrator.wait_for_terminal(id).await.unwrap();
        id
    });

    c.bench_function("saga/status", |b| {
        b.iter(|| orchestrator.status(id).unwrap());
    });
}

criterion_group!(
    benches,
    bench_complete_saga,
    bench_compensated_saga,
    bench_status
);
criterion_main!(benches);
