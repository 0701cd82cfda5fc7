//! The per-request task: decide, wait, compute, submit.

use std::sync::Arc;

use alloy::primitives::U256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    client::ChainClient,
    error::TaskError,
    providers::LlmClient,
    resolver, scheduler,
    store::ContentStore,
    tracker::NodeSet,
};

/// Everything a request task needs, shared by all tasks.
pub struct Pipeline {
    pub client: Arc<ChainClient>,
    pub store: ContentStore,
    pub llm: LlmClient,
    pub nodes: Arc<NodeSet>,
    pub shutdown: CancellationToken,
}

/// Progress of a single request task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TaskState {
    Received,
    Waiting,
    Ready,
    Fetching,
    Computing,
    Submitting,
    Done,
    Aborted,
}

fn enter(request_id: U256, state: TaskState) {
    debug!("request {request_id}: {state:?}");
}

impl Pipeline {
    /// Entry point for a `NewRequest` event. Failures stay inside the task:
    /// each is logged according to its kind and the request is left to the
    /// other authorized nodes.
    pub async fn handle(self: Arc<Self>, request_id: U256, redundancy: u8) {
        match self.run(request_id, redundancy).await {
            Ok(()) => enter(request_id, TaskState::Done),
            Err(e) => {
                enter(request_id, TaskState::Aborted);
                match e {
                    TaskError::Unauthorized | TaskError::Stale(_) | TaskError::Cancelled => {
                        debug!("request {request_id} dropped: {e}");
                    }
                    TaskError::RequestAbsent
                    | TaskError::ConfigMissing(_)
                    | TaskError::ConfigInvalid(_)
                    | TaskError::ModelUnspecified => {
                        warn!("request {request_id} dropped: {e}");
                    }
                    TaskError::Provider(_) | TaskError::Submission(_) | TaskError::Chain(_) => {
                        warn!("request {request_id} failed: {e}");
                    }
                }
            }
        }
    }

    async fn run(&self, request_id: U256, redundancy: u8) -> Result<(), TaskError> {
        enter(request_id, TaskState::Received);

        // The round-robin position is pinned to the node-set snapshot current
        // when the event arrived; later membership changes do not move it.
        let view = self.nodes.view();
        let Some(my_index) = view.my_index else {
            return Err(TaskError::Unauthorized);
        };
        let delay = scheduler::submission_delay(request_id, redundancy, my_index, view.node_count);

        enter(request_id, TaskState::Waiting);
        if !scheduler::wait(delay, &self.shutdown).await {
            return Err(TaskError::Cancelled);
        }

        enter(request_id, TaskState::Ready);
        if !delay.is_zero() {
            // This node is a backup: act only when the nodes ahead of it have
            // not already settled the request.
            let status = self.client.check_submission(request_id).await?;
            if !status.is_ok() {
                return Err(TaskError::Stale(status));
            }
        }

        enter(request_id, TaskState::Fetching);
        let request = self
            .client
            .request_info(request_id)
            .await?
            .ok_or(TaskError::RequestAbsent)?;

        let (config, prompt) =
            resolver::resolve_prompt(&self.store, &request.prompt_hash, &request.input).await?;
        let platform = pick(&config.platform, &request.platform)?;
        let model = pick(&config.model, &request.model)?;

        enter(request_id, TaskState::Computing);
        let raw = self.llm.invoke(&platform, &model, &prompt).await?;

        let result = if request.return_content_within_result_tag {
            match extract_result_tag(&raw) {
                Some(content) => content,
                None => {
                    warn!("request {request_id}: response carries no <result> tag");
                    raw
                }
            }
        } else {
            raw
        };

        let result = if request.store_result_offchain {
            self.store.put(result.as_bytes()).await?
        } else {
            result
        };

        let status = self.client.check_submission(request_id).await?;
        if !status.is_ok() {
            return Err(TaskError::Stale(status));
        }

        enter(request_id, TaskState::Submitting);
        let receipt = self
            .client
            .send_result(request_id, &result)
            .await
            .map_err(TaskError::Submission)?;
        info!(
            "request {request_id}: result submitted in tx {} (gas used {})",
            receipt.transaction_hash, receipt.gas_used
        );
        Ok(())
    }
}

/// The stored config wins over the request's own name; an empty name on both
/// sides means the request cannot be served.
fn pick(from_config: &Option<String>, from_request: &str) -> Result<String, TaskError> {
    match from_config {
        Some(name) if !name.is_empty() => Ok(name.clone()),
        _ if !from_request.is_empty() => Ok(from_request.to_string()),
        _ => Err(TaskError::ModelUnspecified),
    }
}

/// Content following the first `<result>` tag, cut at the closing tag when
/// one follows, and trimmed. `None` when the text has no `<result>` at all.
fn extract_result_tag(raw: &str) -> Option<String> {
    let (_, rest) = raw.split_once("<result>")?;
    let content = rest
        .split_once("</result>")
        .map(|(content, _)| content)
        .unwrap_or(rest);
    Some(content.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::{extract_result_tag, pick};
    use crate::{
        error::TaskError,
        store::{content_hash, ContentStore},
    };

    #[test]
    fn extracts_tagged_content() {
        assert_eq!(
            extract_result_tag("<result>X</result>").as_deref(),
            Some("X")
        );
        assert_eq!(
            extract_result_tag("preamble <result>\n  hello\n</result> trailer").as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn open_tag_without_close_takes_the_rest() {
        assert_eq!(
            extract_result_tag("thinking... <result> 42 ").as_deref(),
            Some("42")
        );
    }

    #[test]
    fn untagged_content_is_kept() {
        assert_eq!(extract_result_tag("plain answer"), None);
        assert_eq!(extract_result_tag("</result> only close"), None);
    }

    #[test]
    fn config_names_win_over_request_names() {
        let config = Some("openai".to_string());
        assert_eq!(pick(&config, "gemini").unwrap(), "openai");
        assert_eq!(pick(&None, "gemini").unwrap(), "gemini");
        assert!(matches!(pick(&None, ""), Err(TaskError::ModelUnspecified)));
    }

    #[tokio::test]
    async fn offchain_results_submit_the_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());

        let extracted = extract_result_tag("<result>hello</result>").unwrap();
        let submitted = store.put(extracted.as_bytes()).await.unwrap();

        assert_eq!(submitted, content_hash(b"hello"));
        assert_eq!(store.get(&submitted).await.unwrap().unwrap(), b"hello");
    }
}
