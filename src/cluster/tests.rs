//! Cluster Module Tests
//!
//! ## Test Scopes
//! - **Lifecycle**: Idle -> Running -> Stopped transitions.
//! - **Messaging**: Request/reply through the encoded mailbox and the transport counters.
//! - **Wire Protocol**: Messages survive the bincode boundary.

#[cfg(test)]
mod tests {
    use crate::cluster::protocol::{WorkerMessage, WorkerReply, decode, encode};
    use crate::cluster::service::ClusterSession;
    use crate::cluster::types::{SessionState, WorkerId, WorkerState};
    use crate::error::AnnotatorError;
    use crate::executor::types::RunId;
    use crate::testing::{constant_registry, test_config};

    // ============================================================
    // TEST 1: Session lifecycle
    // ============================================================

    #[tokio::test]
    async fn test_start_spawns_configured_workers() {
        // ARRANGE
        let session = ClusterSession::new(test_config(3), constant_registry());
        assert_eq!(session.state().await, SessionState::Idle);
        assert!(session.worker_ids().is_empty());

        // ACT
        session.start().await.unwrap();

        // ASSERT
        assert!(session.is_running().await);
        let ids = session.worker_ids();
        assert_eq!(ids.len(), 3);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let infos = session.workers();
        let indices: Vec<usize> = infos.iter().map(|i| i.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let session = ClusterSession::new(test_config(2), constant_registry());

        session.start().await.unwrap();
        session.start().await.unwrap();

        assert_eq!(session.worker_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_workers() {
        // ARRANGE
        let session = ClusterSession::new(test_config(2), constant_registry());
        session.start().await.unwrap();

        // ACT
        session.shutdown().await.unwrap();

        // ASSERT
        assert_eq!(session.state().await, SessionState::Stopped);
        assert!(session.worker_ids().is_empty());
        assert!(
            session
                .workers()
                .iter()
                .all(|info| info.state == WorkerState::Stopped)
        );

        let restart = session.start().await;
        assert!(matches!(restart, Err(AnnotatorError::WorkerUnavailable(_))));
    }

    // ============================================================
    // TEST 2: Messaging
    // ============================================================

    #[tokio::test]
    async fn test_request_round_trip_is_counted() {
        // ARRANGE
        let session = ClusterSession::new(test_config(1), constant_registry());
        session.start().await.unwrap();
        let worker_id = session.worker_ids()[0].clone();
        let before = session.transport().snapshot();

        // ACT
        let reply = session
            .request(
                &worker_id,
                &WorkerMessage::CancelRun {
                    run_id: RunId::new(),
                },
            )
            .await
            .unwrap();

        // ASSERT
        assert!(matches!(reply, WorkerReply::Ack));
        let after = session.transport().snapshot();
        assert_eq!(after.messages_sent, before.messages_sent + 1);
        assert_eq!(after.replies_received, before.replies_received + 1);
        assert!(after.bytes_sent > before.bytes_sent);
    }

    #[tokio::test]
    async fn test_request_to_unknown_worker_fails() {
        let session = ClusterSession::new(test_config(1), constant_registry());
        session.start().await.unwrap();

        let result = session
            .request(&WorkerId::new(), &WorkerMessage::Shutdown)
            .await;

        assert!(matches!(result, Err(AnnotatorError::WorkerUnavailable(_))));
    }

    #[tokio::test]
    async fn test_request_all_replies_in_worker_order() {
        let session = ClusterSession::new(test_config(4), constant_registry());
        session.start().await.unwrap();

        let replies = session
            .request_all(&WorkerMessage::CancelRun {
                run_id: RunId::new(),
            })
            .await
            .unwrap();

        let ids: Vec<WorkerId> = replies.iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(ids, session.worker_ids());
        assert!(replies.iter().all(|(_, r)| matches!(r, WorkerReply::Ack)));
        assert_eq!(session.transport().snapshot().messages_sent, 4);
    }

    #[tokio::test]
    async fn test_cancel_for_idle_run_leaves_no_state() {
        // ARRANGE
        let session = ClusterSession::new(test_config(1), constant_registry());
        session.start().await.unwrap();
        let worker_id = session.worker_ids()[0].clone();
        let run_id = RunId::new();

        // ACT: a late cancel, sent twice
        for _ in 0..2 {
            let reply = session
                .request(
                    &worker_id,
                    &WorkerMessage::CancelRun {
                        run_id: run_id.clone(),
                    },
                )
                .await
                .unwrap();
            assert!(matches!(reply, WorkerReply::Ack));
        }

        // ASSERT
        let worker = session.worker(&worker_id).unwrap();
        assert_eq!(worker.active_runs(), 0);
    }

    // ============================================================
    // TEST 3: Wire protocol
    // ============================================================

    #[test]
    fn test_message_survives_encoding() {
        let run_id = RunId::new();
        let message = WorkerMessage::CancelRun {
            run_id: run_id.clone(),
        };

        let bytes = encode(message.kind(), &message).unwrap();
        let decoded: WorkerMessage = decode("test", &bytes).unwrap();

        match decoded {
            WorkerMessage::CancelRun { run_id: decoded_id } => assert_eq!(decoded_id, run_id),
            other => panic!("unexpected message {}", other.kind()),
        }
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let result: crate::error::Result<WorkerMessage> = decode("garbage", &[0xff, 0xff, 0xff]);

        assert!(matches!(result, Err(AnnotatorError::Serialization { .. })));
    }
}
