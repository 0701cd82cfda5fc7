//! The deterministic round-robin schedule deciding when this node attempts a
//! request.

use std::time::Duration;

use alloy::primitives::U256;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Spacing between successive backup nodes.
pub const SUBMISSION_DELAY_STEP: Duration = Duration::from_secs(60);

/// How long this node waits before attempting a request.
///
/// The `redundancy` nodes starting at slot `request_id mod node_count` act
/// immediately; every node after them hangs back one more step, so a backup
/// only does work when the nodes ahead of it have not produced consensus.
pub fn submission_delay(
    request_id: U256,
    redundancy: u8,
    my_index: usize,
    node_count: usize,
) -> Duration {
    if node_count == 0 {
        return Duration::ZERO;
    }
    let start = (request_id % U256::from(node_count)).to::<u64>() as usize;
    let position = (my_index + node_count - start) % node_count;
    if position < redundancy as usize {
        Duration::ZERO
    } else {
        SUBMISSION_DELAY_STEP * (position - redundancy as usize + 1) as u32
    }
}

/// Sleep for `delay` unless `token` is cancelled first. Returns `false` when
/// the wait was cut short and the task should abort.
pub async fn wait(delay: Duration, token: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = sleep(delay) => true,
    }
}
