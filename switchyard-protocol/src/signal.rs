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

use serde::{Deserialize, Serialize};

use crate::{
    ConnectionQualityUpdate, IceServer, ParticipantInfo, Room, SpeakerInfo, TrackInfo, TrackSource,
    TrackType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalTarget {
    Publisher,
    Subscriber,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrickleRequest {
    /// JSON-serialized ICE candidate init.
    pub candidate_init: String,
    pub target: SignalTarget,
}

/// Sent by a client that intends to publish a track; the server answers with
/// [`TrackPublishedResponse`] carrying the assigned sid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddTrackRequest {
    pub cid: String,
    #[serde(rename = "type")]
    pub track_type: TrackType,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub muted: bool,
    pub disable_dtx: bool,
    pub source: TrackSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackPublishedResponse {
    pub cid: String,
    pub track: TrackInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MuteTrackRequest {
    pub sid: String,
    pub muted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub room: Room,
    pub participant: ParticipantInfo,
    pub other_participants: Vec<ParticipantInfo>,
    pub server_version: String,
    pub ice_servers: Vec<IceServer>,
    /// True when both sides agreed to drive the connection through the
    /// subscriber peer connection.
    pub subscriber_primary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantUpdate {
    pub participants: Vec<ParticipantInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeakersChanged {
    pub speakers: Vec<SpeakerInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomUpdate {
    pub room: Room,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamedTrack {
    pub participant_sid: String,
    pub track_sid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamedTracksUpdate {
    pub paused: Vec<StreamedTrack>,
    pub resumed: Vec<StreamedTrack>,
}

/// Every message the server can push to a participant's signaling sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SignalResponse {
    Answer(SessionDescription),
    Offer(SessionDescription),
    Trickle(TrickleRequest),
    Join(JoinResponse),
    Update(ParticipantUpdate),
    SpeakersChanged(SpeakersChanged),
    RoomUpdate(RoomUpdate),
    ConnectionQuality(ConnectionQualityUpdate),
    Mute(MuteTrackRequest),
    TrackPublished(TrackPublishedResponse),
    Leave(LeaveRequest),
    StreamedTracksUpdate(StreamedTracksUpdate),
}

impl SignalResponse {
    /// Stable name of the variant, used for logging and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalResponse::Answer(_) => "answer",
            SignalResponse::Offer(_) => "offer",
            SignalResponse::Trickle(_) => "trickle",
            SignalResponse::Join(_) => "join",
            SignalResponse::Update(_) => "update",
            SignalResponse::SpeakersChanged(_) => "speakers_changed",
            SignalResponse::RoomUpdate(_) => "room_update",
            SignalResponse::ConnectionQuality(_) => "connection_quality",
            SignalResponse::Mute(_) => "mute",
            SignalResponse::TrackPublished(_) => "track_published",
            SignalResponse::Leave(_) => "leave",
            SignalResponse::StreamedTracksUpdate(_) => "streamed_tracks_update",
        }
    }
}
