//! Annotator Integration Tests
//!
//! These tests drive a real in-process cluster end to end: broadcast, prepare,
//! apply, assemble and stats.
//!
//! ## Test Scopes
//! - **Shape & Order**: Rows follow candidate keys, columns follow the function list,
//!   independent of worker count and input order.
//! - **Faults**: Fail-fast errors name the candidate and function; isolated mode abstains.
//! - **Caching**: Repeated runs reuse the cache; stale handles and cancellation.
//! - **Broadcast**: Functions dereference broadcast resources on the workers.
//! - **HTTP**: Handlers called directly with their extractors.

#[cfg(test)]
mod tests {
    use crate::annotator::handlers::{handle_apply, handle_cache_status, handle_list_functions};
    use crate::annotator::protocol::ApplyRequest;
    use crate::annotator::service::Annotator;
    use crate::candidate::source::InMemoryCandidateStore;
    use crate::candidate::types::{Candidate, CandidateKey, CandidateSet, Split, text_between};
    use crate::error::AnnotatorError;
    use crate::executor::registry::LfRegistry;
    use crate::executor::types::{FailureMode, Vote};
    use crate::stats::types::Metric;
    use crate::storage::cache::{CacheKey, StalePolicy};
    use crate::testing::*;
    use axum::http::StatusCode;
    use axum::{Extension, Json};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    /// Votes +1 on keys divisible by 20, -1 on keys divisible by 30, abstains otherwise.
    fn by_key(candidate: &Candidate) -> Vote {
        match candidate.key.0 {
            k if k % 20 == 0 => Vote::POSITIVE,
            k if k % 30 == 0 => Vote::NEGATIVE,
            _ => Vote::ABSTAIN,
        }
    }

    fn keyed_registry() -> Arc<LfRegistry> {
        let registry = constant_registry();
        registry.register("by_key", |candidate, _| Ok(by_key(candidate)));
        registry.register("picky", |candidate, _| {
            if candidate.key == CandidateKey(20) {
                anyhow::bail!("unparseable mention in {}", candidate.key);
            }
            Ok(Vote::POSITIVE)
        });
        registry
    }

    async fn annotator(workers: usize, registry: Arc<LfRegistry>) -> Arc<Annotator> {
        Annotator::connect(test_config(workers), registry)
            .await
            .unwrap()
    }

    // ============================================================
    // TEST 1: Shape and ordering
    // ============================================================

    #[tokio::test]
    async fn test_constant_functions_end_to_end() {
        // ARRANGE
        let annotator = annotator(2, constant_registry()).await;
        let split = Split::train();
        let handle = annotator
            .prepare(&text_set("tokens", &split, 3), &split)
            .await
            .unwrap();

        // ACT
        let run = annotator
            .apply(&handle, &["plus", "minus", "abstain"])
            .await
            .unwrap();
        let stats = annotator.lf_stats(&run.matrix);

        // ASSERT
        assert_eq!(run.matrix.shape(), (3, 3));
        assert_eq!(run.matrix.nnz(), 6);
        assert!(run.faults.is_empty());
        assert_eq!(stats[0].coverage, Metric::Value(1.0));
        assert_eq!(stats[1].conflict, Metric::Value(1.0));
        assert_eq!(stats[2].coverage, Metric::Value(0.0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_matrix_independent_of_workers_and_input_order() {
        // ARRANGE: the same 40 candidates, shuffled differently for every cluster size
        let split = Split::train();
        let mut rng = StdRng::seed_from_u64(42);
        let functions = ["by_key", "plus", "abstain", "minus"];

        let mut matrices = Vec::new();
        for workers in [1, 2, 5] {
            let mut candidates: Vec<Candidate> = text_set("tokens", &split, 40)
                .candidates()
                .to_vec();
            candidates.shuffle(&mut rng);
            let set = CandidateSet::new("tokens", split.clone(), text_schema(), candidates).unwrap();

            let annotator = annotator(workers, keyed_registry()).await;
            let handle = annotator.prepare(&set, &split).await.unwrap();

            // ACT: two runs on each cluster
            let first = annotator.apply(&handle, &functions).await.unwrap();
            let second = annotator.apply(&handle, &functions).await.unwrap();

            assert_eq!(first.matrix, second.matrix);
            matrices.push(first.matrix);
            annotator.shutdown().await.unwrap();
        }

        // ASSERT
        assert_eq!(matrices[0], matrices[1]);
        assert_eq!(matrices[0], matrices[2]);

        let matrix = &matrices[0];
        assert_eq!(matrix.row_keys()[0], CandidateKey(10));
        assert_eq!(matrix.row_keys()[39], CandidateKey(400));
        assert_eq!(matrix.get(1, 0), Vote::POSITIVE);
        assert_eq!(matrix.get(2, 0), Vote::NEGATIVE);
        assert_eq!(matrix.get(0, 0), Vote::ABSTAIN);
    }

    #[tokio::test]
    async fn test_reversed_functions_swap_columns() {
        // ARRANGE
        let annotator = annotator(3, keyed_registry()).await;
        let split = Split::dev();
        let handle = annotator
            .prepare(&text_set("tokens", &split, 12), &split)
            .await
            .unwrap();

        // ACT
        let forward = annotator
            .apply(&handle, &["by_key", "minus", "plus"])
            .await
            .unwrap()
            .matrix;
        let reversed = annotator
            .apply(&handle, &["plus", "minus", "by_key"])
            .await
            .unwrap()
            .matrix;

        // ASSERT
        assert_eq!(forward.column_names(), ["by_key", "minus", "plus"]);
        assert_eq!(reversed.column_names(), ["plus", "minus", "by_key"]);
        for name in ["by_key", "minus", "plus"] {
            assert_eq!(forward.column_by_name(name), reversed.column_by_name(name));
        }
        assert_eq!(forward.column(0), reversed.column(2));
    }

    #[tokio::test]
    async fn test_empty_set_gives_undefined_stats() {
        let annotator = annotator(2, constant_registry()).await;
        let split = Split::test();
        let empty = CandidateSet::new("empty", split.clone(), text_schema(), Vec::new()).unwrap();

        let handle = annotator.prepare(&empty, &split).await.unwrap();
        let run = annotator.apply(&handle, &["plus", "minus"]).await.unwrap();
        let report = annotator.report(&run.matrix, None).unwrap();

        assert_eq!(run.matrix.shape(), (0, 2));
        assert!(report.functions.iter().all(|s| s.coverage.is_undefined()));
        assert!(report.totals.conflict.is_undefined());
    }

    // ============================================================
    // TEST 2: Faults
    // ============================================================

    #[tokio::test]
    async fn test_fail_fast_identifies_candidate_and_function() {
        // ARRANGE
        let annotator = annotator(2, keyed_registry()).await;
        let split = Split::train();
        let handle = annotator
            .prepare(&text_set("tokens", &split, 8), &split)
            .await
            .unwrap();

        // ACT
        let result = annotator.apply(&handle, &["plus", "picky"]).await;

        // ASSERT
        match result {
            Err(AnnotatorError::LfExecution {
                function,
                candidate,
                split: failed_split,
                cache_key,
                message,
            }) => {
                assert_eq!(function, "picky");
                assert_eq!(candidate, CandidateKey(20));
                assert_eq!(failed_split, split);
                assert_eq!(cache_key, CacheKey::new("tokens", Split::train()));
                assert!(message.contains("unparseable mention"));
            }
            other => panic!("expected LfExecution, got {:?}", other.map(|r| r.run_id)),
        }
    }

    #[tokio::test]
    async fn test_fail_fast_reports_lowest_coordinate() {
        // ARRANGE: two faulting candidates on different partitions
        let registry = constant_registry();
        registry.register("fragile", |candidate, _| {
            if candidate.key.0 % 30 == 0 {
                anyhow::bail!("fragile on {}", candidate.key);
            }
            Ok(Vote::NEGATIVE)
        });
        let annotator = annotator(4, registry).await;
        let split = Split::train();
        let handle = annotator
            .prepare(&text_set("tokens", &split, 20), &split)
            .await
            .unwrap();

        for _ in 0..5 {
            // ACT
            let result = annotator.apply(&handle, &["fragile"]).await;

            // ASSERT: always the first faulting row (#30), never #60 or later
            assert!(matches!(
                result,
                Err(AnnotatorError::LfExecution { candidate, .. }) if candidate == CandidateKey(30)
            ));
        }
    }

    #[tokio::test]
    async fn test_isolated_mode_abstains_and_logs_fault() {
        // ARRANGE
        let annotator = annotator(2, keyed_registry()).await;
        let split = Split::train();
        let handle = annotator
            .prepare(&text_set("tokens", &split, 8), &split)
            .await
            .unwrap();

        // ACT
        let run = annotator
            .apply_with_mode(&handle, &["plus", "picky"], FailureMode::Isolated)
            .await
            .unwrap();

        // ASSERT
        let row = run.matrix.row_index(CandidateKey(20)).unwrap();
        assert_eq!(run.matrix.get(row, 1), Vote::ABSTAIN);
        assert_eq!(run.matrix.get(row, 0), Vote::POSITIVE);
        assert_eq!(run.matrix.nnz(), 15);

        assert_eq!(run.faults.len(), 1);
        let fault = run.faults.iter().next().unwrap();
        assert_eq!(fault.function, "picky");
        assert_eq!(fault.candidate, CandidateKey(20));
        assert_eq!(fault.row, row as u64);
    }

    #[tokio::test]
    async fn test_unknown_and_duplicate_functions_are_rejected() {
        let annotator = annotator(1, constant_registry()).await;
        let split = Split::train();
        let handle = annotator
            .prepare(&text_set("tokens", &split, 2), &split)
            .await
            .unwrap();
        let shipments = annotator.transport().function_shipments;

        let unknown = annotator.apply(&handle, &["plus", "LF_nope"]).await;
        let duplicate = annotator.apply(&handle, &["plus", "plus"]).await;

        assert!(matches!(unknown, Err(AnnotatorError::UnknownFunction(name)) if name == "LF_nope"));
        assert!(matches!(duplicate, Err(AnnotatorError::InvalidInput(_))));
        assert_eq!(annotator.transport().function_shipments, shipments);
    }

    #[tokio::test]
    async fn test_vote_bound_is_configurable() {
        let registry = LfRegistry::new();
        registry.register("strong", |_, _| Ok(Vote(3)));
        let config = test_config(1)
            .with_failure_mode(FailureMode::Isolated)
            .with_max_abs_vote(2);
        let annotator = Annotator::connect(config, registry).await.unwrap();
        let split = Split::train();
        let handle = annotator
            .prepare(&text_set("tokens", &split, 2), &split)
            .await
            .unwrap();

        let run = annotator.apply(&handle, &["strong"]).await.unwrap();

        assert_eq!(run.matrix.nnz(), 0);
        assert_eq!(run.faults.len(), 2);
    }

    #[tokio::test]
    async fn test_minimum_vote_is_reported_as_function_failure() {
        // ARRANGE
        let registry = constant_registry();
        registry.register("extreme", |_, _| Ok(Vote(i32::MIN)));
        let annotator = annotator(2, registry).await;
        let split = Split::train();
        let handle = annotator
            .prepare(&text_set("tokens", &split, 2), &split)
            .await
            .unwrap();

        // ACT
        let fail_fast = annotator.apply(&handle, &["extreme"]).await;
        let isolated = annotator
            .apply_with_mode(&handle, &["extreme"], FailureMode::Isolated)
            .await
            .unwrap();

        // ASSERT
        assert!(matches!(
            fail_fast,
            Err(AnnotatorError::LfExecution { function, candidate, .. })
                if function == "extreme" && candidate == CandidateKey(10)
        ));
        assert_eq!(isolated.matrix.nnz(), 0);
        assert_eq!(isolated.faults.len(), 2);
    }

    // ============================================================
    // TEST 3: Caching, staleness and cancellation
    // ============================================================

    #[tokio::test]
    async fn test_repeated_runs_do_not_redistribute() {
        // ARRANGE
        let annotator = annotator(2, keyed_registry()).await;
        let split = Split::train();
        let set = text_set("tokens", &split, 30);
        let handle = annotator.prepare(&set, &split).await.unwrap();
        let partitions_sent = annotator.transport().partitions_sent;

        // ACT
        for functions in [vec!["plus"], vec!["by_key", "minus"], vec!["abstain"]] {
            annotator.apply(&handle, &functions).await.unwrap();
        }
        let again = annotator.prepare(&set, &split).await.unwrap();

        // ASSERT
        assert_eq!(again, handle);
        assert_eq!(annotator.distribution_count(), 1);
        assert_eq!(annotator.transport().partitions_sent, partitions_sent);
        assert_eq!(annotator.transport().function_shipments, 6);
    }

    #[tokio::test]
    async fn test_stale_handle_after_content_change() {
        // ARRANGE
        let registry = constant_registry();
        let config = test_config(2).with_stale_policy(StalePolicy::Invalidate);
        let annotator = Annotator::connect(config, registry).await.unwrap();
        let split = Split::train();
        let old = annotator
            .prepare(&text_set("tokens", &split, 5), &split)
            .await
            .unwrap();

        // ACT: the set grew and was re-prepared
        let new = annotator
            .prepare(&text_set("tokens", &split, 6), &split)
            .await
            .unwrap();
        let stale = annotator.apply(&old, &["plus"]).await;
        let fresh = annotator.apply(&new, &["plus"]).await.unwrap();

        // ASSERT
        assert!(matches!(stale, Err(AnnotatorError::StaleCache { .. })));
        assert_eq!(fresh.matrix.row_count(), 6);
    }

    #[tokio::test]
    async fn test_reprepare_and_cache_miss() {
        let annotator = annotator(2, constant_registry()).await;
        let split = Split::train();
        let set = text_set("tokens", &split, 4);
        let handle = annotator.prepare(&set, &split).await.unwrap();

        let again = annotator.reprepare(&set, &split).await.unwrap();
        assert_eq!(again, handle);
        assert_eq!(annotator.distribution_count(), 2);

        assert!(annotator.invalidate(&handle.key).await.unwrap());
        let missing = annotator.apply(&handle, &["plus"]).await;
        assert!(matches!(missing, Err(AnnotatorError::CacheMiss(_))));
        assert!(annotator.handle_for("tokens", &split).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancelled_run_leaves_cache_usable() {
        // ARRANGE: a function slow enough to be interrupted
        let registry = constant_registry();
        registry.register("slow", |_, _| {
            std::thread::sleep(Duration::from_millis(25));
            Ok(Vote::POSITIVE)
        });
        let annotator = annotator(1, registry).await;
        let split = Split::train();
        let handle = annotator
            .prepare(&text_set("tokens", &split, 40), &split)
            .await
            .unwrap();

        // ACT: abort the slow run
        let aborted =
            tokio::time::timeout(Duration::from_millis(60), annotator.apply(&handle, &["slow"]))
                .await;
        assert!(aborted.is_err());

        // ASSERT: the cached partitions serve the next run without redistribution
        let run = annotator.apply(&handle, &["plus"]).await.unwrap();
        assert_eq!(run.matrix.nnz(), 40);
        assert_eq!(annotator.distribution_count(), 1);

        // ASSERT: the aborted run winds down and leaves no run state behind
        let session = annotator.session();
        for _ in 0..200 {
            let active: usize = session
                .worker_ids()
                .iter()
                .filter_map(|id| session.worker(id))
                .map(|worker| worker.active_runs())
                .sum();
            if active == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("aborted run is still registered on a worker");
    }

    #[tokio::test]
    async fn test_finished_runs_leave_no_state_on_workers() {
        // ARRANGE
        let annotator = annotator(3, keyed_registry()).await;
        let split = Split::train();
        let handle = annotator
            .prepare(&text_set("tokens", &split, 12), &split)
            .await
            .unwrap();

        // ACT: one failed run and one successful run
        let failed = annotator.apply(&handle, &["plus", "picky"]).await;
        let succeeded = annotator.apply(&handle, &["by_key"]).await;

        // ASSERT
        assert!(matches!(failed, Err(AnnotatorError::LfExecution { .. })));
        assert!(succeeded.is_ok());
        let session = annotator.session();
        for worker_id in session.worker_ids() {
            let worker = session.worker(&worker_id).unwrap();
            assert_eq!(worker.active_runs(), 0);
        }
    }

    #[tokio::test]
    async fn test_prepare_from_source() {
        // ARRANGE
        let store = InMemoryCandidateStore::new();
        let split = Split::dev();
        store.extend((1..=6).map(|k| text_candidate(k, &split, "x")));
        store.insert(text_candidate(99, &Split::train(), "other split"));
        let annotator = annotator(2, constant_registry()).await;

        // ACT
        let handle = annotator
            .prepare_from(&store, "tokens", text_schema(), &split)
            .await
            .unwrap();

        // ASSERT
        assert_eq!(handle.row_count, 6);
        assert_eq!(handle.key, CacheKey::new("tokens", Split::dev()));
        assert_eq!(annotator.cached_handles(), vec![handle]);
    }

    #[tokio::test]
    async fn test_apply_after_shutdown_fails() {
        let annotator = annotator(2, constant_registry()).await;
        let split = Split::train();
        let handle = annotator
            .prepare(&text_set("tokens", &split, 4), &split)
            .await
            .unwrap();

        annotator.shutdown().await.unwrap();

        let result = annotator.apply(&handle, &["plus"]).await;
        assert!(matches!(result, Err(AnnotatorError::WorkerUnavailable(_))));
        let broadcast = annotator.broadcast(&vec![1u32, 2, 3]).await;
        assert!(matches!(broadcast, Err(AnnotatorError::BroadcastUnavailable { .. })));
    }

    // ============================================================
    // TEST 4: Broadcast resources inside labeling functions
    // ============================================================

    #[tokio::test]
    async fn test_functions_read_broadcast_knowledge_base() {
        // ARRANGE
        let registry = LfRegistry::new();
        let annotator = annotator(3, registry.clone()).await;
        let kb: HashSet<(String, String)> =
            HashSet::from([("lithium".to_string(), "tremor".to_string())]);
        let kb_handle = annotator.broadcast(&kb).await.unwrap();

        registry.register("in_ctd", move |candidate, ctx| {
            let kb = ctx.get(&kb_handle)?;
            let chemical = candidate.span("chemical").map(|s| s.get_span());
            let disease = candidate.span("disease").map(|s| s.get_span());
            match (chemical, disease) {
                (Some(c), Some(d)) if kb.contains(&(c.to_lowercase(), d.to_lowercase())) => {
                    Ok(Vote::POSITIVE)
                }
                _ => Ok(Vote::ABSTAIN),
            }
        });
        registry.register("causes_between", |candidate, _| {
            let (Some(c), Some(d)) = (candidate.span("chemical"), candidate.span("disease")) else {
                return Ok(Vote::ABSTAIN);
            };
            Ok(if text_between(c, d).contains("causes") {
                Vote::POSITIVE
            } else {
                Vote::NEGATIVE
            })
        });

        let split = Split::train();
        let candidates = vec![
            pair_candidate(1, &split, "Lithium causes tremor", (0, 0), (2, 2)),
            pair_candidate(2, &split, "Aspirin relieves headache", (0, 0), (2, 2)),
            pair_candidate(3, &split, "tremor after lithium", (2, 2), (0, 0)),
        ];
        let set = CandidateSet::new("cdr", split.clone(), pair_schema(), candidates).unwrap();
        let handle = annotator.prepare(&set, &split).await.unwrap();

        // ACT: two runs against the same broadcast
        let run = annotator
            .apply(&handle, &["in_ctd", "causes_between"])
            .await
            .unwrap();
        annotator
            .apply(&handle, &["in_ctd"])
            .await
            .unwrap();

        // ASSERT
        assert_eq!(run.matrix.column(0), vec![Vote(1), Vote(0), Vote(1)]);
        assert_eq!(run.matrix.column(1), vec![Vote(1), Vote(-1), Vote(-1)]);
        assert_eq!(annotator.transport().broadcasts_sent, 3);
        assert_eq!(annotator.broadcasts().len(), 1);

        let session = annotator.session();
        for worker_id in session.worker_ids() {
            let worker = session.worker(&worker_id).unwrap();
            assert!(worker.resources().decode_count() <= 1);
        }
    }

    // ============================================================
    // TEST 5: HTTP handlers
    // ============================================================

    #[tokio::test]
    async fn test_apply_handler_returns_report() {
        // ARRANGE
        let annotator = annotator(2, keyed_registry()).await;
        let split = Split::train();
        annotator
            .prepare(&text_set("tokens", &split, 6), &split)
            .await
            .unwrap();

        // ACT
        let (status, Json(response)) = handle_apply(
            Extension(annotator.clone()),
            Json(ApplyRequest {
                set_name: "tokens".to_string(),
                split: "train".to_string(),
                functions: vec!["plus".to_string(), "picky".to_string()],
                mode: Some(FailureMode::Isolated),
            }),
        )
        .await;

        // ASSERT
        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
        assert!(response.run_id.is_some());
        assert_eq!(response.faults.len(), 1);
        let report = response.report.unwrap();
        assert_eq!(report.row_count, 6);
        assert_eq!(report.functions[1].name, "picky");
    }

    #[tokio::test]
    async fn test_apply_handler_error_statuses() {
        let annotator = annotator(1, keyed_registry()).await;
        let split = Split::train();
        annotator
            .prepare(&text_set("tokens", &split, 3), &split)
            .await
            .unwrap();

        fn request(set_name: &str, functions: &[&str]) -> ApplyRequest {
            ApplyRequest {
                set_name: set_name.to_string(),
                split: "train".to_string(),
                functions: functions.iter().map(|f| f.to_string()).collect(),
                mode: None,
            }
        }

        let (missing, Json(body)) =
            handle_apply(Extension(annotator.clone()), Json(request("nope", &["plus"]))).await;
        assert_eq!(missing, StatusCode::NOT_FOUND);
        assert!(!body.success);

        let (unknown, _) =
            handle_apply(Extension(annotator.clone()), Json(request("tokens", &["zzz"]))).await;
        assert_eq!(unknown, StatusCode::BAD_REQUEST);

        let (failed, Json(body)) =
            handle_apply(Extension(annotator.clone()), Json(request("tokens", &["picky"]))).await;
        assert_eq!(failed, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body.error.unwrap().contains("#20"));
    }

    #[tokio::test]
    async fn test_status_handlers() {
        let annotator = annotator(2, constant_registry()).await;
        let split = Split::train();
        annotator
            .prepare(&text_set("tokens", &split, 4), &split)
            .await
            .unwrap();

        let (status, Json(cache)) = handle_cache_status(Extension(annotator.clone())).await;
        let (_, Json(functions)) = handle_list_functions(Extension(annotator.clone())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache.handles.len(), 1);
        assert_eq!(cache.distributions, 1);
        assert_eq!(cache.transport.partitions_sent, 4);
        assert_eq!(functions.functions, vec!["abstain", "minus", "plus"]);
    }
}
