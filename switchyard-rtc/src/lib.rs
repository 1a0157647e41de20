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

pub mod config;
pub mod convert;
mod errors;
mod id;
pub mod participant;
pub mod peer_transport;
mod pli_throttle;
pub mod rtc;
pub mod sink;
pub mod telemetry;
pub mod track;

pub use errors::*;
pub use id::*;
pub use participant::{Participant, ParticipantParams};

pub mod proto {
    pub use switchyard_protocol::*;
}

/// `use switchyard_rtc::prelude::*;` to import the common types.
pub mod prelude {
    pub use crate::{
        config::*, errors::*, id::*, participant::*, peer_transport::PeerTransport, rtc::*,
        sink::MessageSink, track::*,
    };
}
