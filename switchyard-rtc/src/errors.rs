// Copyright 2024 Switchyard, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use thiserror::Error;

/// Error reported by a media-stack or sink implementation across the trait
/// seam. `Closed` is the analog of EOF/closed-pipe: workers exit quietly on
/// it instead of logging.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("connection closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn other(msg: impl Into<String>) -> Self {
        EngineError::Other(msg.into())
    }
}

pub type RtcResult<T> = Result<T, RtcError>;

#[derive(Error, Debug)]
pub enum RtcError {
    /// Invalid construction input, fatal at construction.
    #[error("invalid participant configuration: {0}")]
    Configuration(String),
    /// `handle_answer` received an SDP that is not an answer.
    #[error("expected an answer SDP")]
    UnexpectedOffer,
    /// A peer-connection operation failed; `phase` distinguishes which one.
    #[error("could not {phase}: {source}")]
    Transport {
        phase: &'static str,
        #[source]
        source: EngineError,
    },
    /// The participant is not active or the requested channel does not exist.
    #[error("data channel is not available")]
    DataChannelUnavailable,
    /// The signaling sink rejected a write. Never changes participant state.
    #[error("could not send message to participant: {0}")]
    Delivery(#[source] EngineError),
}

impl RtcError {
    pub(crate) fn transport(phase: &'static str, source: EngineError) -> Self {
        RtcError::Transport { phase, source }
    }
}
