//! End-to-end tests of the repositories over a shared in-memory store.
//!
//! Verifies:
//! - Concurrent id allocation never hands out an id twice
//! - Duplicate job instances are rejected, also under concurrent creation
//! - Stale updates are reported as conflicts and leave stored state untouched
//! - Contexts with dotted keys and arbitrary-precision values survive a reload

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use num_bigint::BigInt;

    use batchstore_core::{
        BatchStatus, ContextValue, ExecutionContext, ExitStatus, JobExecution, JobParameters,
        StepExecution,
    };

    use crate::error::RepositoryError;
    use crate::repository::{
        BatchRepositories, ContextOwner, ExecutionContextRepository, JobExecutionRepository,
        JobInstanceRepository, SharedStore, StepExecutionRepository,
    };
    use crate::schema::{collections, fields};
    use crate::sequence::next_id;
    use crate::store::{DocumentStore, Filter, InMemoryDocumentStore, Value};

    fn setup() -> (Arc<InMemoryDocumentStore>, BatchRepositories) {
        batchstore_observability::init();
        let memory = Arc::new(InMemoryDocumentStore::new());
        let store: SharedStore = memory.clone();
        let repositories = BatchRepositories::new(store);
        repositories.ensure_indexes().unwrap();
        (memory, repositories)
    }

    #[test]
    fn concurrent_allocation_yields_distinct_contiguous_ids() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 50;

        let store = Arc::new(InMemoryDocumentStore::new());
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    (0..PER_THREAD)
                        .map(|_| next_id(&*store, "Foo").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        let distinct: BTreeSet<i64> = all.iter().copied().collect();
        let total = (THREADS * PER_THREAD) as i64;
        assert_eq!(distinct.len(), all.len());
        assert_eq!(distinct, (1..=total).collect());
    }

    #[test]
    fn duplicate_instance_is_rejected_and_dotted_key_survives() {
        let (memory, repos) = setup();
        let params = JobParameters::new().with("run.date", "2024-01-01");

        let created = repos
            .job_instances
            .create_job_instance("ImportJob", &params)
            .unwrap();
        let err = repos
            .job_instances
            .create_job_instance("ImportJob", &params)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::UniquenessViolation(_)));

        let raw = memory
            .find_one(
                collections::JOB_INSTANCE,
                &Filter::eq(fields::JOB_INSTANCE_ID, created.id.get()),
            )
            .unwrap()
            .unwrap();
        let stored_params = raw.get(fields::JOB_PARAMETERS).and_then(Value::as_map).unwrap();
        assert!(stored_params.contains_key("run{dot}date"));

        let reloaded = repos
            .job_instances
            .get_job_instance_by_id(created.id)
            .unwrap()
            .unwrap();
        assert!(reloaded.parameters.get("run.date").is_some());
        assert_eq!(reloaded.job_key, created.job_key);
    }

    #[test]
    fn concurrent_creation_of_one_instance_has_a_single_winner() {
        const THREADS: usize = 6;

        let (memory, repos) = setup();
        let repos = Arc::new(repos);
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let repos = repos.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let params = JobParameters::new().with("run.date", "2024-01-01");
                    barrier.wait();
                    repos.job_instances.create_job_instance("ImportJob", &params)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, RepositoryError::UniquenessViolation(_))));
        assert_eq!(
            memory.count(collections::JOB_INSTANCE, &Filter::All).unwrap(),
            1
        );
    }

    #[test]
    fn racing_updates_with_the_same_version_have_a_single_winner() {
        const THREADS: usize = 6;

        let (_, repos) = setup();
        let instance = repos
            .job_instances
            .create_job_instance("ImportJob", &JobParameters::new())
            .unwrap();
        let mut execution = JobExecution::new(instance.id, instance.parameters.clone());
        repos.job_executions.save_job_execution(&mut execution).unwrap();

        let repos = Arc::new(repos);
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|n| {
                let repos = repos.clone();
                let barrier = barrier.clone();
                let mut copy = execution.clone();
                thread::spawn(move || {
                    copy.exit_status = ExitStatus::executing().with_description(format!("writer {n}"));
                    barrier.wait();
                    repos.job_executions.update_job_execution(&mut copy)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, RepositoryError::ConcurrencyConflict { expected: 1, .. })));

        let stored = repos
            .job_executions
            .get_job_execution(execution.id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, Some(2));
    }

    #[test]
    fn stale_update_leaves_stored_execution_unchanged() {
        let (_, repos) = setup();
        let instance = repos
            .job_instances
            .create_job_instance("ImportJob", &JobParameters::new().with("run", 1_i64))
            .unwrap();
        let mut execution = JobExecution::new(instance.id, instance.parameters.clone());
        repos.job_executions.save_job_execution(&mut execution).unwrap();

        execution.status = BatchStatus::Started;
        repos.job_executions.update_job_execution(&mut execution).unwrap();
        let before = repos
            .job_executions
            .get_job_execution(execution.id.unwrap())
            .unwrap()
            .unwrap();

        let mut stale = execution.clone();
        stale.version = Some(execution.version.unwrap() - 1);
        stale.status = BatchStatus::Abandoned;
        let err = repos.job_executions.update_job_execution(&mut stale).unwrap_err();
        assert!(matches!(err, RepositoryError::ConcurrencyConflict { .. }));

        let after = repos
            .job_executions
            .get_job_execution(execution.id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(after, before);
    }

    #[test]
    fn full_lifecycle_survives_a_fresh_repository_set() {
        let (memory, repos) = setup();
        let params = JobParameters::new()
            .with("input.file", "/data/in.csv")
            .with("chunk", 100_i64);
        let instance = repos
            .job_instances
            .create_job_instance("ImportJob", &params)
            .unwrap();

        let mut execution = JobExecution::new(instance.id, params.clone());
        execution.execution_context.put("restart.count", 2_i64);
        repos.job_executions.save_job_execution(&mut execution).unwrap();
        repos
            .execution_contexts
            .save_job_execution_context(&execution)
            .unwrap();

        let mut step = StepExecution::new("load", execution.id.unwrap());
        step.read_count = 10;
        step.write_count = 8;
        step.read_skip_count = 2;
        step.execution_context
            .put("total.amount", "1234.5600".parse::<BigDecimal>().unwrap());
        step.execution_context.put(
            "rows.seen",
            BigInt::parse_bytes(b"98765432109876543210", 10).unwrap(),
        );
        step.execution_context.put("last.seen", Utc::now());
        repos.step_executions.save_step_execution(&mut step).unwrap();
        repos
            .execution_contexts
            .save_step_execution_context(&step)
            .unwrap();

        step.status = BatchStatus::Completed;
        step.end_time = Some(Utc::now());
        repos.step_executions.update_step_execution(&mut step).unwrap();

        execution.status = BatchStatus::Completed;
        execution.end_time = Some(Utc::now());
        repos.job_executions.update_job_execution(&mut execution).unwrap();

        // A second process sharing the same store.
        let store: SharedStore = memory.clone();
        let other = BatchRepositories::new(store);

        let mut loaded = other
            .job_executions
            .get_last_job_execution(&instance)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, execution.id);
        assert_eq!(loaded.status, BatchStatus::Completed);
        assert_eq!(loaded.version, Some(2));
        assert_eq!(loaded.job_parameters, Some(params));

        other.step_executions.add_step_executions(&mut loaded).unwrap();
        assert_eq!(loaded.step_executions.len(), 1);
        let loaded_step = &loaded.step_executions[0];
        assert_eq!(loaded_step.counters(), step.counters());
        assert_eq!(loaded_step.version, Some(2));

        let step_context = other
            .execution_contexts
            .get_step_execution_context(loaded_step)
            .unwrap();
        assert_eq!(step_context, step.execution_context);
        match step_context.get("rows.seen") {
            Some(ContextValue::BigInteger(v)) => assert_eq!(v.to_string(), "98765432109876543210"),
            other => panic!("unexpected {other:?}"),
        }

        let job_context = other
            .execution_contexts
            .get_execution_context(ContextOwner::JobExecution(execution.id.unwrap()))
            .unwrap();
        assert_eq!(job_context, ExecutionContext::new().with("restart.count", 2_i64));

        assert!(other
            .job_executions
            .find_running_job_executions("ImportJob")
            .unwrap()
            .is_empty());
        assert_eq!(
            other
                .step_executions
                .count_step_executions(&instance, "load")
                .unwrap(),
            1
        );
        assert_eq!(
            other
                .job_instances
                .get_job_instance_for_execution(execution.id.unwrap())
                .unwrap()
                .map(|i| i.id),
            Some(instance.id)
        );
    }

    #[test]
    fn ensure_indexes_registers_every_collection() {
        let (memory, repos) = setup();
        repos.ensure_indexes().unwrap();

        assert_eq!(memory.indexes(collections::JOB_INSTANCE).len(), 3);
        assert_eq!(memory.indexes(collections::JOB_EXECUTION).len(), 4);
        assert_eq!(memory.indexes(collections::STEP_EXECUTION).len(), 2);
        assert_eq!(memory.indexes(collections::EXECUTION_CONTEXT).len(), 1);
        assert!(memory
            .indexes(collections::JOB_INSTANCE)
            .iter()
            .any(|index| index.unique));
    }
}
