//! End-to-end runs of the tokio driver against a scripted node

use assert_matches::assert_matches;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use solo_rpc_miner::{
    coin::MiningAddress,
    http::Transport,
    metrics::RewardGauge,
    rpc::{Endpoint, FetchRequest, FetchResponse},
    runtime::{self, ClientEvent, Miner},
    BackendId, ClientConfig, ConnectionState, Error, JobId, JobResult, Nonce, Result,
    ShareStatus, SubmitRejection,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

const MINER: &str = "R9NXAVJezHiBnT3ijTpg3JUZre7PxhJWti";
const TARGET: &str = "00000000ffff0000000000000000000000000000000000000000000000000000";
const POLL: Duration = Duration::from_millis(1000);
const JOB_TIMEOUT: Duration = Duration::from_millis(15000);
const RETRY: Duration = Duration::from_millis(5000);

/// In-memory node answering the three RPC methods
struct Node {
    tip: Mutex<(u64, String)>,
    target: Mutex<String>,
    down: AtomicBool,
    advance_on_submit: AtomicBool,
    methods: Mutex<Vec<String>>,
    blocks: Mutex<Vec<String>>,
}

impl Node {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            tip: Mutex::new((100, "aa".repeat(32))),
            target: Mutex::new(TARGET.to_string()),
            down: AtomicBool::new(false),
            advance_on_submit: AtomicBool::new(false),
            methods: Mutex::new(Vec::new()),
            blocks: Mutex::new(Vec::new()),
        })
    }

    fn count(&self, method: &str) -> usize {
        self.methods.lock().iter().filter(|m| *m == method).count()
    }

    fn template(&self) -> Value {
        let (height, prev) = self.tip.lock().clone();
        json!({
            "version": 536870912,
            "previousblockhash": prev,
            "height": height,
            "bits": "1d00ffff",
            "curtime": 1700000000,
            "coinbasevalue": 5000000000u64,
            "target": *self.target.lock(),
            "transactions": [{"data": "0100000000000000000000"}],
        })
    }
}

struct ScriptedTransport(Arc<Node>);

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: FetchRequest) -> Result<FetchResponse> {
        let node = &self.0;
        node.methods.lock().push(request.rpc_method.to_string());

        if node.down.load(Ordering::SeqCst) {
            return Err(Error::network("connection refused"));
        }

        let body: Value = serde_json::from_str(&request.body)?;
        let result = match request.rpc_method {
            "getblocktemplate" => node.template(),
            "submitblock" => {
                let hex = body["params"]["hexdata"].as_str().unwrap_or_default();
                node.blocks.lock().push(hex.to_string());
                if node.advance_on_submit.load(Ordering::SeqCst) {
                    *node.tip.lock() = (101, "bb".repeat(32));
                }
                Value::Null
            }
            "generatetoaddress" => json!(["cc".repeat(32)]),
            other => return Err(Error::rpc(-32601, format!("Method not found: {}", other))),
        };

        Ok(FetchResponse::ok(
            json!({"id": body["id"], "result": result, "error": null}).to_string(),
        ))
    }
}

fn config() -> ClientConfig {
    ClientConfig::new(
        Endpoint::new("127.0.0.1", 10225, false),
        MINER.parse::<MiningAddress>().unwrap(),
    )
    .with_poll_interval(POLL)
    .with_job_timeout(JOB_TIMEOUT)
    .with_retry_pause(RETRY)
}

fn start(node: &Arc<Node>) -> Miner {
    runtime::run(
        config(),
        Arc::new(ScriptedTransport(Arc::clone(node))),
        Arc::new(RewardGauge::new()),
    )
    .unwrap()
}

async fn next_event(miner: &mut Miner) -> ClientEvent {
    timeout(Duration::from_secs(120), miner.events.recv())
        .await
        .expect("no client event")
        .expect("event channel closed")
}

/// Wait for login and the first job
async fn first_job(miner: &mut Miner) -> JobId {
    assert_matches!(next_event(miner).await, ClientEvent::LoginSuccess);
    match next_event(miner).await {
        ClientEvent::Job(job) => job.id.clone(),
        other => panic!("expected a job, got {:?}", other),
    }
}

fn result_for(job_id: JobId, hash: [u8; 32]) -> JobResult {
    JobResult {
        job_id,
        nonce: Nonce::new(0xcafe),
        result: hash,
        diff: 1000,
        actual_diff: 4000,
        backend: BackendId(1),
    }
}

#[tokio::test(start_paused = true)]
async fn connects_and_publishes_job() {
    let node = Node::new();
    let mut miner = start(&node);

    assert_matches!(next_event(&mut miner).await, ClientEvent::LoginSuccess);
    let job = match next_event(&mut miner).await {
        ClientEvent::Job(job) => job,
        other => panic!("expected a job, got {:?}", other),
    };

    assert_eq!(job.id, JobId::from_sequence(1));
    assert_eq!(job.height(), 100);
    assert_eq!(job.algorithm.as_str(), "ghostrider");
    assert_eq!(job.blob().len(), 80);
    assert_eq!(job.partial_target().len(), 64);
    assert_eq!(miner.handle.state().await.unwrap(), ConnectionState::Connected);
    assert_eq!(node.count("getblocktemplate"), 1);
}

#[tokio::test(start_paused = true)]
async fn job_timeout_triggers_exactly_one_refetch() {
    let node = Node::new();
    let mut miner = start(&node);
    let first = first_job(&mut miner).await;

    sleep(POLL * 3).await;
    assert_eq!(node.count("getblocktemplate"), 1);

    sleep(JOB_TIMEOUT - POLL * 3 + POLL / 2 + POLL).await;
    assert_eq!(node.count("getblocktemplate"), 2);

    // the tip is unchanged, so the refetch keeps the job
    assert!(miner.events.try_recv().is_err());

    // the refetch restarted the timeout
    sleep(JOB_TIMEOUT).await;
    assert_eq!(node.count("getblocktemplate"), 2);
    sleep(POLL).await;
    assert_eq!(node.count("getblocktemplate"), 3);
    assert!(miner.events.try_recv().is_err());

    // results for the original job are still current
    let seq = miner.handle.submit(result_for(first, [0u8; 32])).await.unwrap();
    assert_matches!(
        next_event(&mut miner).await,
        ClientEvent::Result { result, status: ShareStatus::Accepted } if result.seq == seq
    );
    assert_eq!(node.blocks.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn accepted_block_moves_to_next_job() {
    let node = Node::new();
    node.advance_on_submit.store(true, Ordering::SeqCst);
    let mut miner = start(&node);
    let job_id = first_job(&mut miner).await;

    let seq = miner
        .handle
        .submit(result_for(job_id.clone(), [0u8; 32]))
        .await
        .unwrap();

    assert_matches!(
        next_event(&mut miner).await,
        ClientEvent::Result { result, status: ShareStatus::Accepted } if result.seq == seq
    );
    match next_event(&mut miner).await {
        ClientEvent::Job(job) => {
            assert_ne!(job.id, job_id);
            assert_eq!(job.height(), 101);
        }
        other => panic!("expected a job, got {:?}", other),
    }

    let blocks = node.blocks.lock().clone();
    assert_eq!(blocks.len(), 1);
    // header with nonce, two transactions
    assert_eq!(&blocks[0][152..160], "feca0000");
    assert_eq!(&blocks[0][160..162], "02");
    assert!(blocks[0].ends_with("0100000000000000000000"));
}

#[tokio::test(start_paused = true)]
async fn stale_and_partial_results_never_reach_node() {
    let node = Node::new();
    let mut miner = start(&node);
    let job_id = first_job(&mut miner).await;

    let stale = miner
        .handle
        .submit(result_for(JobId::from("ffffffff"), [0u8; 32]))
        .await;
    assert_matches!(stale, Err(Error::Submit(SubmitRejection::NotCurrent)));

    let partial = miner.handle.submit(result_for(job_id, [0xff; 32])).await;
    assert_matches!(partial, Err(Error::Submit(SubmitRejection::Partial)));
    assert_matches!(
        next_event(&mut miner).await,
        ClientEvent::Result { status: ShareStatus::Partial, .. }
    );

    assert_eq!(node.count("submitblock"), 0);
}

#[tokio::test(start_paused = true)]
async fn retries_until_node_comes_back() {
    let node = Node::new();
    node.down.store(true, Ordering::SeqCst);
    let mut miner = start(&node);

    assert_matches!(next_event(&mut miner).await, ClientEvent::Closed { failures: 1 });
    assert_matches!(next_event(&mut miner).await, ClientEvent::Closed { failures: 2 });
    assert_eq!(
        miner.handle.state().await.unwrap(),
        ConnectionState::Connecting
    );

    node.down.store(false, Ordering::SeqCst);
    assert_matches!(next_event(&mut miner).await, ClientEvent::LoginSuccess);
    assert_matches!(next_event(&mut miner).await, ClientEvent::Job(_));
    assert_eq!(node.count("getblocktemplate"), 3);
}

#[tokio::test(start_paused = true)]
async fn malformed_target_is_a_template_error() {
    let node = Node::new();
    *node.target.lock() = TARGET[..61].to_string();
    let mut miner = start(&node);

    assert_matches!(next_event(&mut miner).await, ClientEvent::Closed { failures: 1 });

    *node.target.lock() = TARGET.to_string();
    assert_matches!(next_event(&mut miner).await, ClientEvent::LoginSuccess);
    assert_matches!(next_event(&mut miner).await, ClientEvent::Job(_));
}

#[tokio::test(start_paused = true)]
async fn generate_reaches_node() {
    let node = Node::new();
    let mut miner = start(&node);
    first_job(&mut miner).await;

    miner.handle.generate(5).await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(node.count("generatetoaddress"), 1);
    assert_eq!(
        miner.handle.state().await.unwrap(),
        ConnectionState::Connected
    );
}

#[tokio::test(start_paused = true)]
async fn reconfigure_reconnects_with_fresh_job() {
    let node = Node::new();
    let mut miner = start(&node);
    first_job(&mut miner).await;

    miner
        .handle
        .reconfigure(config().with_job_timeout(Duration::from_secs(60)))
        .await
        .unwrap();

    assert_matches!(next_event(&mut miner).await, ClientEvent::LoginSuccess);
    assert_matches!(
        next_event(&mut miner).await,
        ClientEvent::Job(job) if job.id == JobId::from_sequence(2)
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_event_loop() {
    let node = Node::new();
    let mut miner = start(&node);
    let job_id = first_job(&mut miner).await;

    miner.handle.shutdown();
    (&mut miner.task).await.unwrap();

    let after = miner.handle.submit(result_for(job_id, [0u8; 32])).await;
    assert_matches!(after, Err(Error::InvalidState { .. }));
}
