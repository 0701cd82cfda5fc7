//! Thin wrapper over the coordination contract: typed views, log queries and
//! the one mutating call.

use std::sync::Arc;

use alloy::{
    network::{Ethereum, EthereumWallet},
    primitives::{Address, U256},
    providers::{
        fillers::{
            ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
        },
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    rpc::types::{Filter, Log, TransactionReceipt},
    signers::local::PrivateKeySigner,
    transports::BoxTransport,
};
use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    contracts::ILlmService,
    message::{bytes32_to_string, ChainEvent, LlmRequest, SubmissionStatus},
};

pub type NodeProvider = FillProvider<
    JoinFill<
        JoinFill<JoinFill<JoinFill<Identity, ChainIdFiller>, GasFiller>, NonceFiller>,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider<BoxTransport>,
    BoxTransport,
    Ethereum,
>;

#[derive(Debug)]
pub struct ChainClient {
    pub provider: Arc<NodeProvider>,
    pub contract_address: Address,
    pub node_address: Address,
    /// Whether the endpoint supports `eth_subscribe`.
    pub pubsub: bool,
    send_lock: Mutex<()>,
}

impl ChainClient {
    pub async fn new(
        endpoint: &str,
        contract_address: Address,
        signer: PrivateKeySigner,
    ) -> Result<Self> {
        let node_address = signer.address();
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .filler(ChainIdFiller::default())
            .filler(GasFiller)
            .filler(NonceFiller::default())
            .wallet(wallet)
            .on_builtin(endpoint)
            .await
            .with_context(|| format!("failed to connect to {endpoint}"))?;

        Ok(ChainClient {
            provider: Arc::new(provider),
            contract_address,
            node_address,
            pubsub: endpoint.starts_with("ws"),
            send_lock: Mutex::new(()),
        })
    }

    fn contract(&self) -> ILlmService::ILlmServiceInstance<BoxTransport, NodeProvider> {
        ILlmService::new(self.contract_address, self.provider.as_ref().clone())
    }

    pub async fn authorized_nodes(&self) -> Result<Vec<Address>> {
        Ok(self.contract().getAuthorizedNodes().call().await?.nodes)
    }

    /// Ask the contract whether this node may still submit for `request_id`.
    pub async fn check_submission(&self, request_id: U256) -> Result<SubmissionStatus> {
        let status = self
            .contract()
            .checkSubmission(request_id, self.node_address)
            .call()
            .await?
            .status;
        Ok(SubmissionStatus::from(status.as_str()))
    }

    /// Fetch a request, or `None` when the contract has no entry for the id
    /// (signalled by a zero caller).
    pub async fn request_info(&self, request_id: U256) -> Result<Option<LlmRequest>> {
        let info = self.contract().getRequestInfo(request_id).call().await?;
        if info.caller == Address::ZERO {
            return Ok(None);
        }
        Ok(Some(LlmRequest {
            platform: bytes32_to_string(info.platform),
            model: bytes32_to_string(info.model),
            prompt_hash: hex::encode(info.prompt),
            input: info.input,
            redundancy: info.redundancy,
            return_content_within_result_tag: info.returnContentWithinResultTag,
            store_result_offchain: info.storeResultOffchain,
            caller: info.caller,
            callback: info.callback,
        }))
    }

    pub async fn current_block(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    /// Contract logs in the closed block range, restricted to the event
    /// signatures the node understands.
    pub async fn query_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>> {
        let filter = self.log_filter().from_block(from_block).to_block(to_block);
        Ok(self.provider.get_logs(&filter).await?)
    }

    pub fn log_filter(&self) -> Filter {
        Filter::new()
            .address(self.contract_address)
            .event_signature(ChainEvent::signatures())
    }

    /// Submit this node's answer. Gas is estimated first and the transaction
    /// carries a 20% margin on the estimate. Sends are serialized: the wallet
    /// can only keep one transaction in flight without racing its own nonce.
    pub async fn send_result(
        &self,
        request_id: U256,
        result: &str,
    ) -> Result<TransactionReceipt> {
        let _guard = self.send_lock.lock().await;

        let contract = self.contract();
        let call = contract.sendResult(request_id, result.to_string());
        let estimate = call.estimate_gas().await?;
        debug!("sendResult gas estimate for request {request_id}: {estimate}");

        let receipt = call
            .gas(estimate * 12 / 10)
            .send()
            .await?
            .get_receipt()
            .await?;
        Ok(receipt)
    }
}
