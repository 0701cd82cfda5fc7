//! Wires the subsystems together and runs the dispatch loop.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use tokio::{
    signal,
    sync::mpsc,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cfg::{self, Network},
    client::ChainClient,
    crypto,
    ingest::Ingester,
    message::ChainEvent,
    pipeline::Pipeline,
    providers::LlmClient,
    store::ContentStore,
    tracker::NodeSet,
};

/// How often the authorized set is re-read even without membership events.
const NODE_SET_REFRESH_INTERVAL: Duration = Duration::from_secs(600);

pub async fn run(network: Network) -> Result<()> {
    let contract_address = network.contract_address()?;
    let signer = crypto::load_or_create_signer(&cfg::wallet_path()?)?;
    info!(
        "node {} watching {contract_address} on {network}",
        signer.address()
    );

    let client = Arc::new(ChainClient::new(network.endpoint(), contract_address, signer).await?);

    let nodes = Arc::new(NodeSet::new(client.clone()));
    nodes
        .refresh()
        .await
        .context("failed to read the authorized node set")?;

    let shutdown = CancellationToken::new();
    let (event_sender, mut events) = mpsc::unbounded_channel();

    let ingester = Ingester::new(
        client.clone(),
        cfg::cursor_path(contract_address)?,
        event_sender,
    )?;
    let mut ingest_task = tokio::spawn(ingester.run());

    let pipeline = Arc::new(Pipeline {
        client,
        store: ContentStore::new(cfg::storage_dir()?),
        llm: LlmClient::new(),
        nodes: nodes.clone(),
        shutdown: shutdown.clone(),
    });

    let mut refresh = interval(NODE_SET_REFRESH_INTERVAL);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
    refresh.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            event = events.recv() => {
                // The sender lives in the ingest task; a closed channel is
                // reported through the join handle below.
                if let Some(event) = event {
                    dispatch(&pipeline, &nodes, event).await;
                }
            }
            _ = refresh.tick() => {
                if let Err(e) = nodes.refresh().await {
                    warn!("periodic node-set refresh failed: {e:#}");
                }
            }
            result = &mut ingest_task => {
                shutdown.cancel();
                return match result {
                    Ok(Ok(())) => Err(anyhow!("event ingestion stopped")),
                    Ok(Err(e)) => Err(e.context("event ingestion failed")),
                    Err(e) => Err(anyhow!(e).context("event ingestion panicked")),
                };
            }
            _ = signal::ctrl_c() => {
                info!("shutting down");
                shutdown.cancel();
                ingest_task.abort();
                return Ok(());
            }
        }
    }
}

async fn dispatch(pipeline: &Arc<Pipeline>, nodes: &Arc<NodeSet>, event: ChainEvent) {
    match event {
        ChainEvent::NewRequest {
            request_id,
            redundancy,
        } => {
            info!("new request {request_id} (redundancy {redundancy})");
            tokio::spawn(pipeline.clone().handle(request_id, redundancy));
        }
        ChainEvent::NodeAdded { node } | ChainEvent::NodeRemoved { node } => {
            debug!("membership change involving {node}");
            if let Err(e) = nodes.refresh().await {
                warn!("node-set refresh failed: {e:#}");
            }
        }
        ChainEvent::Processed {
            request_id,
            success,
        } => {
            debug!("request {request_id} processed, success: {success}");
        }
        ChainEvent::ResultSubmitted { request_id, node } => {
            debug!("request {request_id} answered by {node}");
        }
    }
}
