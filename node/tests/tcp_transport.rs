//! Integration tests for the TCP collective group
//!
//! Every rank runs as a task in this test process but talks to the
//! coordinator over real loopback sockets.

use matmul_node::{
    connect_worker, run_local, run_rank, GroupContext, NoopListener, RankReport, RunRequest,
    TcpOptions, TcpRendezvous,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn options(run_id: Uuid) -> TcpOptions {
    TcpOptions {
        run_id,
        connect_timeout: Duration::from_secs(10),
        ..TcpOptions::default()
    }
}

async fn run_tcp_group(world_size: usize, request: RunRequest) -> Vec<matmul_node::Result<RankReport>> {
    let run_id = Uuid::new_v4();
    let rendezvous = TcpRendezvous::bind("127.0.0.1:0", options(run_id))
        .await
        .unwrap();
    let addr = rendezvous.local_addr().unwrap().to_string();
    let request = Arc::new(request);

    let mut workers = Vec::new();
    for rank in 1..world_size {
        let addr = addr.clone();
        let request = Arc::clone(&request);
        workers.push(tokio::spawn(async move {
            let ctx = GroupContext::new(rank, world_size).unwrap();
            let mut transport = connect_worker(ctx, &addr, &options(run_id)).await?;
            run_rank(&mut transport, &request, &NoopListener).await
        }));
    }

    let coordinator = tokio::spawn(async move {
        let mut transport = rendezvous.accept_group(world_size).await?;
        run_rank(&mut transport, &request, &NoopListener).await
    });

    let mut outcomes = vec![coordinator.await.unwrap()];
    for worker in workers {
        outcomes.push(worker.await.unwrap());
    }
    outcomes
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_matches_local_transport() {
    let tcp = run_tcp_group(3, RunRequest::random(9, Some(7))).await;
    let local = run_local(3, Arc::new(RunRequest::random(9, Some(7))), Arc::new(NoopListener))
        .await
        .unwrap();

    let tcp_result = tcp[0].as_ref().unwrap().result().unwrap();
    assert_eq!(tcp_result, local.result().unwrap());

    let summary = tcp[0].as_ref().unwrap().summary().unwrap();
    assert_eq!(summary.worker_count, 3);
    assert_eq!(summary.matrix_size, 9);

    for outcome in &tcp[1..] {
        assert!(matches!(outcome, Ok(RankReport::Worker { .. })));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_invalid_partition_on_every_rank() {
    let outcomes = run_tcp_group(4, RunRequest::random(6, Some(1))).await;

    assert_eq!(outcomes.len(), 4);
    for outcome in outcomes {
        assert!(outcome.unwrap_err().is_invalid_partition());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_rank_rejected() {
    let run_id = Uuid::new_v4();
    let rendezvous = TcpRendezvous::bind("127.0.0.1:0", options(run_id))
        .await
        .unwrap();
    let addr = rendezvous.local_addr().unwrap().to_string();

    let mut impostors = Vec::new();
    for _ in 0..2 {
        let addr = addr.clone();
        impostors.push(tokio::spawn(async move {
            let ctx = GroupContext::new(1, 3).unwrap();
            connect_worker(ctx, &addr, &options(run_id)).await
        }));
    }

    let err = rendezvous.accept_group(3).await.err().unwrap();
    assert!(err.to_string().contains("Rank 1 joined twice"));

    for impostor in impostors {
        assert!(impostor.await.unwrap().is_err());
    }
}
