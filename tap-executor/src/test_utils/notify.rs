use std::time::Duration;

use tokio::sync::watch;

use crate::types::RunState;

/// Time tests wait for a condition before giving up.
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Waits until the published run state satisfies `condition` and returns that state.
///
/// # Panics
///
/// Panics if the condition is not met within ten seconds or the run is gone.
pub async fn wait_for_state<F>(state_rx: &mut watch::Receiver<RunState>, condition: F) -> RunState
where
    F: Fn(&RunState) -> bool,
{
    let state = tokio::time::timeout(WAIT_TIMEOUT, state_rx.wait_for(|state| condition(state)))
        .await
        .expect("timed out waiting for the run state")
        .expect("run state channel closed");

    state.clone()
}

/// Waits until the run has committed a bookmark.
pub async fn wait_for_commit(state_rx: &mut watch::Receiver<RunState>) -> RunState {
    wait_for_state(state_rx, |state| state.last_committed_bookmark.is_some()).await
}
