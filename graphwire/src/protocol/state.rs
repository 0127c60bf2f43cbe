//! The per-connection state machine (§4.C). `ServerState` mirrors what the *server* has
//! acknowledged; `ClientState` mirrors what the client has *sent* and can diverge from it while
//! requests are pipelined (§3).

use crate::protocol::tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Connected,
    Authentication,
    Ready,
    Streaming,
    TxReadyOrStreaming,
    Failed,
}

pub type ClientState = ServerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

impl ServerState {
    /// The state this connection moves to when `request_tag` succeeds, or `None` if that message
    /// is not legal from the current state (§4.C table). `has_more` distinguishes a `PULL`/
    /// `DISCARD` success that still owes records (state unchanged) from one that detaches
    /// (transitions to Ready/TxReadyOrStreaming's non-streaming counterpart).
    pub fn on_success(self, request_tag: u8, has_more: bool) -> Option<ServerState> {
        use ServerState::*;
        match (self, request_tag) {
            (Connected, tag::HELLO) => Some(Ready), // v<=5.0; auth-capable path handled by caller
            (Authentication, tag::LOGON) => Some(Ready),
            (Ready, tag::RUN) => Some(Streaming),
            (Ready, tag::BEGIN) => Some(TxReadyOrStreaming),
            (Ready, tag::LOGOFF) => Some(Authentication),
            (Streaming, tag::PULL) | (Streaming, tag::DISCARD) => {
                Some(if has_more { Streaming } else { Ready })
            }
            (TxReadyOrStreaming, tag::RUN)
            | (TxReadyOrStreaming, tag::PULL)
            | (TxReadyOrStreaming, tag::DISCARD) => Some(TxReadyOrStreaming),
            (TxReadyOrStreaming, tag::COMMIT) | (TxReadyOrStreaming, tag::ROLLBACK) => {
                Some(Ready)
            }
            (_, tag::RESET) => Some(Ready),
            _ => None,
        }
    }

    /// Every state accepts `FAILURE` by moving to `Failed`, except `RESET`/handshake failures,
    /// which are always fatal to the connection (the caller closes rather than transitioning).
    pub fn on_failure(self, request_tag: u8) -> Option<ServerState> {
        if request_tag == tag::RESET {
            None
        } else {
            Some(ServerState::Failed)
        }
    }

    /// `server_state == Failed` ⇒ only `RESET` may be sent (invariant 5).
    pub fn may_send(self, request_tag: u8) -> bool {
        if self == ServerState::Failed {
            request_tag == tag::RESET || request_tag == tag::GOODBYE
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_only_accepts_reset() {
        assert!(ServerState::Failed.may_send(tag::RESET));
        assert!(!ServerState::Failed.may_send(tag::RUN));
    }

    #[test]
    fn run_then_pull_final_returns_to_ready() {
        let after_run = ServerState::Ready.on_success(tag::RUN, false).unwrap();
        assert_eq!(after_run, ServerState::Streaming);
        let after_pull = after_run.on_success(tag::PULL, false).unwrap();
        assert_eq!(after_pull, ServerState::Ready);
    }

    #[test]
    fn pull_with_has_more_stays_streaming() {
        let after_run = ServerState::Ready.on_success(tag::RUN, false).unwrap();
        let after_pull = after_run.on_success(tag::PULL, true).unwrap();
        assert_eq!(after_pull, ServerState::Streaming);
    }

    #[test]
    fn tx_lifecycle() {
        let begun = ServerState::Ready.on_success(tag::BEGIN, false).unwrap();
        assert_eq!(begun, ServerState::TxReadyOrStreaming);
        let ran = begun.on_success(tag::RUN, false).unwrap();
        assert_eq!(ran, ServerState::TxReadyOrStreaming);
        let committed = ran.on_success(tag::COMMIT, false).unwrap();
        assert_eq!(committed, ServerState::Ready);
    }
}
