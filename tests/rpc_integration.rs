//! End-to-end RPC tests over real TCP sockets.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dataflow_worker::queue::{InternalQueue, QueueElement};
use dataflow_worker::rpc::{
    ack, procedure, ControlFrame, ProcedureArgs, ProcedureDispatcher, ProcedureHandler, RpcClient,
    RpcServer, RpcServerConfig,
};
use dataflow_worker::WorkerError;
use serde_json::{json, Value};

struct SlowHandler {
    delay: Duration,
}

#[async_trait]
impl ProcedureHandler for SlowHandler {
    async fn invoke(&self, _args: ProcedureArgs) -> anyhow::Result<Value> {
        tokio::time::sleep(self.delay).await;
        Ok(json!("done"))
    }
}

async fn start_server() -> (Arc<InternalQueue>, RpcServer, String) {
    let queue = Arc::new(InternalQueue::new());
    let dispatcher = Arc::new(ProcedureDispatcher::new(Arc::clone(&queue)));

    dispatcher
        .register(
            "add",
            Arc::new(procedure(|args: ProcedureArgs| {
                let a = args.arg(0).and_then(Value::as_i64).unwrap_or(0);
                let b = args.arg(1).and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(a + b))
            })),
        )
        .await
        .unwrap();
    dispatcher
        .register(
            "fail",
            Arc::new(procedure(|_args| anyhow::bail!("handler exploded"))),
        )
        .await
        .unwrap();
    dispatcher
        .register(
            "notify",
            Arc::new(ack(procedure(|_args| Ok(json!({ "ignored": true }))))),
        )
        .await
        .unwrap();
    dispatcher
        .register(
            "slow",
            Arc::new(SlowHandler {
                delay: Duration::from_millis(500),
            }),
        )
        .await
        .unwrap();

    let server = RpcServer::new(
        RpcServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            graceful_shutdown_timeout_ms: 10,
        },
        dispatcher,
    );
    let addr = server.start().await.unwrap();
    (queue, server, addr.to_string())
}

#[tokio::test]
async fn test_call_round_trip() {
    let (_queue, server, addr) = start_server().await;
    let mut client = RpcClient::connect(&addr).await.unwrap();

    let body = client
        .call("add", ProcedureArgs::positional(vec![json!(1), json!(2)]))
        .await
        .unwrap();
    assert_eq!(body, b"3");

    server.stop().await;
}

#[tokio::test]
async fn test_missing_procedure_surfaces_not_found() {
    let (_queue, server, addr) = start_server().await;
    let mut client = RpcClient::connect(&addr).await.unwrap();

    let result = client.call("missing", ProcedureArgs::default()).await;
    assert!(matches!(result, Err(WorkerError::NotFound(name)) if name == "missing"));

    server.stop().await;
}

#[tokio::test]
async fn test_handler_failure_crosses_the_wire() {
    let (_queue, server, addr) = start_server().await;
    let mut client = RpcClient::connect(&addr).await.unwrap();

    match client.call("fail", ProcedureArgs::default()).await {
        Err(WorkerError::RemoteExecutionError { procedure, message }) => {
            assert_eq!(procedure, "fail");
            assert!(message.contains("handler exploded"));
        }
        other => panic!("expected RemoteExecutionError, got {other:?}"),
    }

    // The connection survives the failed call.
    let body = client
        .call("add", ProcedureArgs::positional(vec![json!(2), json!(2)]))
        .await
        .unwrap();
    assert_eq!(body, b"4");

    server.stop().await;
}

#[tokio::test]
async fn test_ack_combinator_over_the_wire() {
    let (_queue, server, addr) = start_server().await;
    let mut client = RpcClient::connect(&addr).await.unwrap();

    let body = client
        .call("notify", ProcedureArgs::positional(vec![json!("payload")]))
        .await
        .unwrap();
    assert_eq!(body, b"ack");

    server.stop().await;
}

#[tokio::test]
async fn test_healthcheck_acks() {
    let (_queue, server, addr) = start_server().await;
    let mut client = RpcClient::connect(&addr).await.unwrap();

    assert_eq!(client.healthcheck().await.unwrap(), b"ack");

    server.stop().await;
}

#[tokio::test]
async fn test_control_call_enqueues_ahead_of_data() {
    let (queue, server, addr) = start_server().await;
    let mut client = RpcClient::connect(&addr).await.unwrap();

    queue.put(QueueElement::InputTuple { payload: json!(1) });
    queue.put(QueueElement::EndMarker);

    let frame = ControlFrame {
        command: json!({ "name": "pause" }),
        sender_id: "controller".to_string(),
    };
    let body = client
        .call_control(serde_json::to_vec(&frame).unwrap())
        .await
        .unwrap();
    assert_eq!(body, b"ack");

    match queue.get().await {
        QueueElement::ControlElement { command, sender_id } => {
            assert_eq!(command.body, json!({ "name": "pause" }));
            assert_eq!(sender_id, "controller");
        }
        other => panic!("expected ControlElement first, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn test_call_times_out_but_connection_survives() {
    let (_queue, server, addr) = start_server().await;
    let mut client = RpcClient::connect_with_timeout(&addr, 50).await.unwrap();

    match client.call("slow", ProcedureArgs::default()).await {
        Err(WorkerError::Timeout {
            procedure,
            timeout_ms,
        }) => {
            assert_eq!(procedure, "slow");
            assert_eq!(timeout_ms, 50);
        }
        other => panic!("expected Timeout, got {other:?}"),
    }

    // Let the slow handler finish so its late response frame is already
    // queued in the stream, then verify the next call still correlates:
    // the stale frame must be discarded, not read as this call's answer.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let body = client
        .call("add", ProcedureArgs::positional(vec![json!(2), json!(2)]))
        .await
        .unwrap();
    assert_eq!(body, b"4");

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_action_tears_down_endpoint() {
    let (_queue, server, addr) = start_server().await;
    let mut client = RpcClient::connect(&addr).await.unwrap();

    assert_eq!(client.shutdown().await.unwrap(), b"ack");

    // The accept loop observes the shutdown broadcast and marks the
    // endpoint stopped.
    let mut stopped = false;
    for _ in 0..50 {
        if !server.is_running().await {
            stopped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(stopped, "endpoint still running after shutdown action");
}

#[tokio::test]
async fn test_closed_client_rejects_further_calls() {
    let (_queue, server, addr) = start_server().await;
    let mut client = RpcClient::connect(&addr).await.unwrap();

    client.close().await;
    let result = client.call("add", ProcedureArgs::default()).await;
    assert!(matches!(result, Err(WorkerError::ShutdownInProgress(_))));

    server.stop().await;
}
