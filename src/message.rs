//! Domain types decoded from the wire.

use std::fmt;

use alloy::{
    primitives::{Address, FixedBytes, U256},
    rpc::types::Log,
    sol_types::SolEvent,
};
use tracing::warn;

use crate::contracts::ILlmService;

/// A decoded contract event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainEvent {
    NewRequest { request_id: U256, redundancy: u8 },
    Processed { request_id: U256, success: bool },
    ResultSubmitted { request_id: U256, node: Address },
    NodeAdded { node: Address },
    NodeRemoved { node: Address },
}

impl ChainEvent {
    /// Signatures of every event the node subscribes to.
    pub fn signatures() -> Vec<FixedBytes<32>> {
        vec![
            ILlmService::NewRequest::SIGNATURE_HASH,
            ILlmService::Processed::SIGNATURE_HASH,
            ILlmService::ResultSubmitted::SIGNATURE_HASH,
            ILlmService::NodeAdded::SIGNATURE_HASH,
            ILlmService::NodeRemoved::SIGNATURE_HASH,
        ]
    }

    /// Decode a raw log. Logs with a foreign signature are ignored; logs that
    /// carry a known signature but fail to decode are reported and dropped.
    pub fn decode(log: &Log) -> Option<ChainEvent> {
        let topic0 = log.topic0()?;
        let decoded = if *topic0 == ILlmService::NewRequest::SIGNATURE_HASH {
            ILlmService::NewRequest::decode_log(&log.inner, true).map(|ev| {
                ChainEvent::NewRequest {
                    request_id: ev.data.requestId,
                    redundancy: ev.data.redundancy,
                }
            })
        } else if *topic0 == ILlmService::Processed::SIGNATURE_HASH {
            ILlmService::Processed::decode_log(&log.inner, true).map(|ev| {
                ChainEvent::Processed {
                    request_id: ev.data.requestId,
                    success: ev.data.success,
                }
            })
        } else if *topic0 == ILlmService::ResultSubmitted::SIGNATURE_HASH {
            ILlmService::ResultSubmitted::decode_log(&log.inner, true).map(|ev| {
                ChainEvent::ResultSubmitted {
                    request_id: ev.data.requestId,
                    node: ev.data.node,
                }
            })
        } else if *topic0 == ILlmService::NodeAdded::SIGNATURE_HASH {
            ILlmService::NodeAdded::decode_log(&log.inner, true)
                .map(|ev| ChainEvent::NodeAdded { node: ev.data.node })
        } else if *topic0 == ILlmService::NodeRemoved::SIGNATURE_HASH {
            ILlmService::NodeRemoved::decode_log(&log.inner, true)
                .map(|ev| ChainEvent::NodeRemoved { node: ev.data.node })
        } else {
            return None;
        };

        match decoded {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(
                    "failed to decode log from block {:?}: {e}",
                    log.block_number
                );
                None
            }
        }
    }
}

/// An inference request as stored on chain.
#[derive(Clone, Debug)]
pub struct LlmRequest {
    /// Platform name; empty means "take it from the stored config".
    pub platform: String,
    /// Model name; empty means "take it from the stored config".
    pub model: String,
    /// Lowercase hex SHA-256 naming the prompt config in the content store.
    pub prompt_hash: String,
    /// JSON object of template inputs; may be empty.
    pub input: String,
    pub redundancy: u8,
    pub return_content_within_result_tag: bool,
    pub store_result_offchain: bool,
    pub caller: Address,
    pub callback: String,
}

/// Decode a null-padded `bytes32` name field as trimmed UTF-8.
pub fn bytes32_to_string(bytes: FixedBytes<32>) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(32);
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// Outcome of `checkSubmission` for this node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionStatus {
    Ok,
    RequestNotFound,
    Submitted,
    NoConsensus,
    Other(String),
}

impl SubmissionStatus {
    pub fn is_ok(&self) -> bool {
        *self == SubmissionStatus::Ok
    }
}

impl From<&str> for SubmissionStatus {
    fn from(status: &str) -> Self {
        match status {
            "OK" => SubmissionStatus::Ok,
            "request not found" => SubmissionStatus::RequestNotFound,
            "submitted" => SubmissionStatus::Submitted,
            "no consensus" => SubmissionStatus::NoConsensus,
            other => SubmissionStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionStatus::Ok => f.write_str("OK"),
            SubmissionStatus::RequestNotFound => f.write_str("request not found"),
            SubmissionStatus::Submitted => f.write_str("submitted"),
            SubmissionStatus::NoConsensus => f.write_str("no consensus"),
            SubmissionStatus::Other(other) => f.write_str(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::{
        primitives::{Address, FixedBytes, LogData, U256},
        rpc::types::Log,
        sol_types::SolEvent,
    };

    use super::{bytes32_to_string, ChainEvent, SubmissionStatus};
    use crate::contracts::ILlmService;

    fn name32(name: &str) -> FixedBytes<32> {
        let mut bytes = [0u8; 32];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        FixedBytes::from(bytes)
    }

    fn wrap(data: LogData) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0xaa),
                data,
            },
            block_hash: None,
            block_number: Some(7),
            block_timestamp: None,
            transaction_hash: None,
            transaction_index: None,
            log_index: Some(3),
            removed: false,
        }
    }

    #[test]
    fn decodes_new_request() {
        let event = ILlmService::NewRequest {
            requestId: U256::from(42),
            redundancy: 2,
        };
        let log = wrap(event.encode_log_data());

        assert_eq!(
            ChainEvent::decode(&log),
            Some(ChainEvent::NewRequest {
                request_id: U256::from(42),
                redundancy: 2,
            })
        );
    }

    #[test]
    fn decodes_membership_events() {
        let node = Address::repeat_byte(0x11);
        let added = wrap(ILlmService::NodeAdded { node }.encode_log_data());
        let removed = wrap(ILlmService::NodeRemoved { node }.encode_log_data());

        assert_eq!(
            ChainEvent::decode(&added),
            Some(ChainEvent::NodeAdded { node })
        );
        assert_eq!(
            ChainEvent::decode(&removed),
            Some(ChainEvent::NodeRemoved { node })
        );
    }

    #[test]
    fn ignores_foreign_events() {
        let data = LogData::new_unchecked(vec![FixedBytes::repeat_byte(0xfe)], Default::default());
        assert_eq!(ChainEvent::decode(&wrap(data)), None);
    }

    #[test]
    fn bytes32_names_stop_at_first_zero() {
        assert_eq!(bytes32_to_string(name32("openai")), "openai");
        assert_eq!(bytes32_to_string(name32("  gemini ")), "gemini");
        assert_eq!(bytes32_to_string(FixedBytes::ZERO), "");

        let full = name32("abcdefghijklmnopqrstuvwxyz123456");
        assert_eq!(bytes32_to_string(full), "abcdefghijklmnopqrstuvwxyz123456");
    }

    #[test]
    fn submission_status_strings() {
        assert!(SubmissionStatus::from("OK").is_ok());
        assert_eq!(
            SubmissionStatus::from("submitted"),
            SubmissionStatus::Submitted
        );
        assert_eq!(
            SubmissionStatus::from("request not found"),
            SubmissionStatus::RequestNotFound
        );
        assert_eq!(
            SubmissionStatus::from("no consensus"),
            SubmissionStatus::NoConsensus
        );
        assert!(!SubmissionStatus::from("pending review").is_ok());
    }
}
