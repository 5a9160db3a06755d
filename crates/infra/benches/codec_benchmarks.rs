use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;

use batchstore_core::{ExecutionContext, JobExecution, JobParameter, JobParameters, StepExecution};
use batchstore_infra::codec::{decode_context, encode_context};
use batchstore_infra::job_key::fingerprint;
use batchstore_infra::sequence::next_id;
use batchstore_infra::store::InMemoryDocumentStore;
use batchstore_infra::{
    BatchRepositories, JobExecutionRepository, JobInstanceRepository, SharedStore,
    StepExecutionRepository,
};
use bigdecimal::BigDecimal;
use chrono::Utc;

fn context_of(entries: usize) -> ExecutionContext {
    let mut context = ExecutionContext::new();
    for i in 0..entries {
        match i % 4 {
            0 => context.put(format!("reader.offset.{i}"), i as i64),
            1 => context.put(format!("writer.file.{i}"), format!("/out/part-{i}.csv")),
            2 => context.put(
                format!("total.amount.{i}"),
                format!("{i}.1234").parse::<BigDecimal>().unwrap(),
            ),
            _ => context.put(format!("checkpoint.{i}"), Utc::now()),
        }
    }
    context
}

fn parameters_of(entries: usize) -> JobParameters {
    (0..entries)
        .map(|i| (format!("param.{i}"), JobParameter::from(format!("value-{i}"))))
        .collect()
}

fn bench_context_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("context_codec");

    for entries in [4usize, 32, 256] {
        let context = context_of(entries);
        let encoded = encode_context(&context).unwrap();
        group.throughput(Throughput::Elements(entries as u64));

        group.bench_with_input(BenchmarkId::new("encode", entries), &context, |b, ctx| {
            b.iter(|| encode_context(black_box(ctx)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("decode", entries), &encoded, |b, doc| {
            b.iter(|| decode_context(black_box(doc)).unwrap());
        });
    }

    group.finish();
}

fn bench_job_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_key");

    for entries in [1usize, 8, 64] {
        let params = parameters_of(entries);
        group.bench_with_input(BenchmarkId::new("fingerprint", entries), &params, |b, p| {
            b.iter(|| fingerprint(black_box(p)));
        });
    }

    group.finish();
}

fn bench_repository_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("repository");
    group.sample_size(200);

    group.bench_function("next_id", |b| {
        let store = InMemoryDocumentStore::new();
        b.iter(|| next_id(&store, black_box("JobExecution")).unwrap());
    });

    group.bench_function("run_job_with_one_step", |b| {
        let store: SharedStore = Arc::new(InMemoryDocumentStore::new());
        let repos = BatchRepositories::new(store);
        repos.ensure_indexes().unwrap();
        let mut run = 0i64;

        b.iter(|| {
            run += 1;
            let params = JobParameters::new().with("run.id", run);
            let instance = repos.job_instances.create_job_instance("BenchJob", &params).unwrap();

            let mut execution = JobExecution::new(instance.id, params);
            repos.job_executions.save_job_execution(&mut execution).unwrap();

            let mut step = StepExecution::new("work", execution.id.unwrap());
            repos.step_executions.save_step_execution(&mut step).unwrap();
            step.read_count = 10;
            step.write_count = 10;
            repos.step_executions.update_step_execution(&mut step).unwrap();

            repos.job_executions.update_job_execution(&mut execution).unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_context_codec,
    bench_job_key,
    bench_repository_round_trip
);
criterion_main!(benches);
