//! Tokio driver for the solo mining client
//!
//! The client is owned by a single event-loop task. Request completions,
//! timer ticks and handle commands all arrive on one channel, so the client
//! is never re-entered from inside one of its own handlers.

use crate::client::{JobListener, SoloClient, Timer};
use crate::config::ClientConfig;
use crate::http::{SpawnedFetch, Transport};
use crate::job::Job;
use crate::metrics::MetricsSink;
use crate::rpc::FetchResponse;
use crate::{ConnectionState, Error, JobResult, Result, ShareStatus, SubmitResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Input of the event loop
#[derive(Debug)]
pub enum Event {
    /// A request finished
    Fetched {
        id: u64,
        result: Result<FetchResponse>,
    },
    /// Timer fired; ticks from a stopped timer carry an old generation
    Tick { generation: u64 },
    Submit {
        result: JobResult,
        reply: oneshot::Sender<Result<u64>>,
    },
    Generate {
        nblocks: u32,
        reply: oneshot::Sender<Result<u64>>,
    },
    Reconfigure {
        config: Box<ClientConfig>,
        reply: oneshot::Sender<Result<()>>,
    },
    State {
        reply: oneshot::Sender<ConnectionState>,
    },
    Connect,
    Disconnect,
}

/// Timer that posts ticks to the event loop
pub struct TokioTimer {
    events: mpsc::UnboundedSender<Event>,
    generation: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl TokioTimer {
    pub fn new(events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            events,
            generation: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    /// Shared generation counter; a tick is live only while it matches
    pub fn generation(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.generation)
    }
}

impl Timer for TokioTimer {
    fn start(&mut self, delay: Duration, repeat: bool) {
        self.stop();

        let generation = self.generation.load(Ordering::SeqCst);
        let events = self.events.clone();

        self.task = Some(tokio::spawn(async move {
            if repeat {
                let mut ticks = interval_at(Instant::now() + delay, delay);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticks.tick().await;
                    if events.send(Event::Tick { generation }).is_err() {
                        break;
                    }
                }
            } else {
                sleep(delay).await;
                let _ = events.send(Event::Tick { generation });
            }
        }));
    }

    fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// What the client tells its mining backends
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Job(Box<Job>),
    Result {
        result: SubmitResult,
        status: ShareStatus,
    },
    LoginSuccess,
    Closed {
        failures: u32,
    },
}

/// Listener forwarding every callback as a [`ClientEvent`]
pub struct ChannelListener {
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelListener {
    pub fn new(events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self { events }
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            trace!("No backend listening for client events");
        }
    }
}

impl JobListener for ChannelListener {
    fn on_job_received(&mut self, job: &Job) {
        self.emit(ClientEvent::Job(Box::new(job.clone())));
    }

    fn on_result(&mut self, result: &SubmitResult, status: ShareStatus) {
        self.emit(ClientEvent::Result {
            result: result.clone(),
            status,
        });
    }

    fn on_login_success(&mut self) {
        self.emit(ClientEvent::LoginSuccess);
    }

    fn on_close(&mut self, failures: u32) {
        self.emit(ClientEvent::Closed { failures });
    }
}

/// Cloneable handle to a running client
#[derive(Debug, Clone)]
pub struct MinerHandle {
    events: mpsc::UnboundedSender<Event>,
    shutdown: CancellationToken,
}

impl MinerHandle {
    fn send(&self, event: Event) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| Error::invalid_state("event loop stopped"))
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Event) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply))?;
        response
            .await
            .map_err(|_| Error::invalid_state("event loop stopped"))
    }

    /// Forward a backend result; resolves to the `submitblock` sequence id
    pub async fn submit(&self, result: JobResult) -> Result<u64> {
        self.request(|reply| Event::Submit { result, reply }).await?
    }

    /// Diagnostic `generatetoaddress` to the mining address
    pub async fn generate(&self, nblocks: u32) -> Result<u64> {
        self.request(|reply| Event::Generate { nblocks, reply })
            .await?
    }

    /// Replace the configuration and reconnect
    pub async fn reconfigure(&self, config: ClientConfig) -> Result<()> {
        self.request(|reply| Event::Reconfigure {
            config: Box::new(config),
            reply,
        })
        .await?
    }

    pub async fn state(&self) -> Result<ConnectionState> {
        self.request(|reply| Event::State { reply }).await
    }

    pub fn connect(&self) -> Result<()> {
        self.send(Event::Connect)
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(Event::Disconnect)
    }

    /// Disconnect and stop the event loop
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// A running client
pub struct Miner {
    pub handle: MinerHandle,
    /// Job and result notifications for the backends
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
    pub task: JoinHandle<()>,
}

/// Build a client over `transport`, connect it and drive it on tokio
pub fn run(
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    metrics: Arc<dyn MetricsSink>,
) -> Result<Miner> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (client_tx, client_rx) = mpsc::unbounded_channel();

    let timer = TokioTimer::new(events_tx.clone());
    let generation = timer.generation();

    let client = SoloClient::new(
        config,
        Box::new(SpawnedFetch::new(transport, events_tx.clone())),
        Box::new(timer),
        Box::new(ChannelListener::new(client_tx)),
    )?
    .with_metrics(metrics);

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(event_loop(client, events_rx, generation, shutdown.clone()));

    Ok(Miner {
        handle: MinerHandle {
            events: events_tx,
            shutdown,
        },
        events: client_rx,
        task,
    })
}

async fn event_loop(
    mut client: SoloClient,
    mut events: mpsc::UnboundedReceiver<Event>,
    generation: Arc<AtomicU64>,
    shutdown: CancellationToken,
) {
    client.connect();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => dispatch(&mut client, event, &generation),
                None => break,
            },
        }
    }

    client.disconnect();
    info!("Client stopped");
}

fn dispatch(client: &mut SoloClient, event: Event, generation: &AtomicU64) {
    match event {
        Event::Fetched { id, result } => client.on_fetch_complete(id, result),
        Event::Tick { generation: tick } => {
            if tick == generation.load(Ordering::SeqCst) {
                client.on_timer();
            } else {
                debug!("Dropping tick from stopped timer");
            }
        }
        Event::Submit { result, reply } => {
            let _ = reply.send(client.submit(result).map_err(Error::from));
        }
        Event::Generate { nblocks, reply } => {
            let _ = reply.send(client.generate(nblocks));
        }
        Event::Reconfigure { config, reply } => {
            let outcome = client.reconfigure(*config);
            if outcome.is_ok() {
                client.connect();
            }
            let _ = reply.send(outcome);
        }
        Event::State { reply } => {
            let _ = reply.send(client.state());
        }
        Event::Connect => client.connect(),
        Event::Disconnect => client.disconnect(),
    }
}
