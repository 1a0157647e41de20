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

use switchyard_protocol as proto;

use crate::rtc::{IceCandidateInit, SessionDescription};

pub fn to_proto_session_description(desc: &SessionDescription) -> proto::SessionDescription {
    proto::SessionDescription {
        sdp_type: desc.sdp_type.as_str().to_owned(),
        sdp: desc.sdp.clone(),
    }
}

pub fn to_proto_trickle(
    candidate: &IceCandidateInit,
    target: proto::SignalTarget,
) -> Result<proto::TrickleRequest, serde_json::Error> {
    Ok(proto::TrickleRequest { candidate_init: serde_json::to_string(candidate)?, target })
}

pub fn from_proto_trickle(
    trickle: &proto::TrickleRequest,
) -> Result<IceCandidateInit, serde_json::Error> {
    serde_json::from_str(&trickle.candidate_init)
}
