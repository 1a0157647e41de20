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

//! Contracts for the media stack driven by a participant. The engine that
//! implements ICE/DTLS/SRTP lives behind these traits; the participant only
//! relies on the capabilities listed here.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::track::{RemoteTrack, RtpReceiver, RtpTransceiver};

pub const MIME_TYPE_OPUS: &str = "audio/opus";

pub type RtcpPacket = Box<dyn rtcp::packet::Packet + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SdpType {
    #[default]
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// JSON shape of a trickled candidate, as exchanged with clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    pub sdp_mid: String,
    pub sdp_m_line_index: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OfferOptions {
    pub ice_restart: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataChannelInit {
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
}

/// Candidate is `None` at end of gathering.
pub type OnIceCandidate = Box<dyn FnMut(Option<IceCandidateInit>) + Send + Sync>;
pub type OnIceConnectionStateChange = Box<dyn FnMut(IceConnectionState) + Send + Sync>;
pub type OnTrack = Box<dyn FnMut(Arc<dyn RemoteTrack>, Arc<dyn RtpReceiver>) + Send + Sync>;
pub type OnDataChannel = Box<dyn FnMut(Arc<dyn DataChannel>) + Send + Sync>;
pub type OnMessage = Box<dyn FnMut(&[u8]) + Send + Sync>;

/// One half of a participant's transport pair. Callback setters replace the
/// previous handler; handlers may be invoked from the engine's own threads.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;
    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, EngineError>;
    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), EngineError>;

    fn write_rtcp(&self, packets: &[RtcpPacket]) -> Result<(), EngineError>;
    fn get_transceivers(&self) -> Vec<Arc<dyn RtpTransceiver>>;
    fn connection_state(&self) -> PeerConnectionState;
    fn ice_connection_state(&self) -> IceConnectionState;
    fn signaling_state(&self) -> SignalingState;
    fn remote_description(&self) -> Option<SessionDescription>;
    fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> Result<Arc<dyn DataChannel>, EngineError>;

    fn on_ice_candidate(&self, handler: Option<OnIceCandidate>);
    fn on_ice_connection_state_change(&self, handler: Option<OnIceConnectionStateChange>);
    fn on_track(&self, handler: Option<OnTrack>);
    fn on_data_channel(&self, handler: Option<OnDataChannel>);

    fn close(&self);
}

pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    fn send(&self, data: &[u8]) -> Result<(), EngineError>;
    fn on_message(&self, handler: Option<OnMessage>);
    fn close(&self);
}
