use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fairgate::{
    AdmissionGate, DistinguisherMethod, FlowControlConfig, FlowSchema, PolicyRulesWithSubjects, PriorityLevel,
    QueuingConfig, RequestDigest, RequestInfo, Subject, UserInfo,
};
use tokio_util::sync::CancellationToken;

const SCHEMA_COUNTS: &[usize] = &[4, 32, 256];

/// Config with `schemas` user-specific schemas in front of a broad one
fn config(schemas: usize) -> FlowControlConfig {
    let mut flow_schemas: Vec<FlowSchema> = (0..schemas)
        .map(|i| {
            FlowSchema::new(format!("user-{}", i), "workload", 100 + i as u32)
                .with_rule(PolicyRulesWithSubjects::everything_for(vec![Subject::user(format!("user-{}", i))]))
        })
        .collect();
    flow_schemas.push(
        FlowSchema::new("everyone", "workload", 9000)
            .with_distinguisher(DistinguisherMethod::ByUser)
            .with_rule(PolicyRulesWithSubjects::everything_for(vec![Subject::all_authenticated()])),
    );
    FlowControlConfig {
        server_concurrency_limit: 1000,
        priority_levels: vec![PriorityLevel::queuing("workload", 30, QueuingConfig::default())],
        flow_schemas,
        ..Default::default()
    }
    .with_mandatory_objects()
}

fn digest(user: &str) -> RequestDigest {
    RequestDigest::new(
        UserInfo::authenticated(user),
        RequestInfo::resource("list", "", "pods", "default"),
    )
}

/// Benchmark classification against growing schema lists
fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    group.throughput(Throughput::Elements(1));

    for &count in SCHEMA_COUNTS {
        let gate = AdmissionGate::with_config(&config(count)).expect("gate");
        // Falls through every specific schema
        let request = digest("someone-else");
        group.bench_with_input(BenchmarkId::new("worst_case", count), &count, |b, _| {
            b.iter(|| black_box(gate.classify(black_box(&request)).expect("classify")));
        });
    }
    group.finish();
}

/// Benchmark an uncontended admit followed by release
fn bench_admit_release(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    let gate = AdmissionGate::with_config(&config(4)).expect("gate");
    let request = digest("bench-user");
    let cancel = CancellationToken::new();

    let mut group = c.benchmark_group("admission");
    group.throughput(Throughput::Elements(1));
    group.bench_function("admit_release_uncontended", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let result = gate.admit(&request, &cancel).await.expect("admit");
                let seat = result.into_seat().expect("seat");
                seat.release().expect("release");
            })
        });
    });
    group.finish();
}

criterion_group!(benches, bench_classify, bench_admit_release);
criterion_main!(benches);
