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

//! Contracts between a participant and the media-forwarding engine: published
//! tracks, subscriptions and their down tracks, and congestion feedback.

use std::sync::Arc;

use rtcp::sender_report::SenderReport;
use rtcp::source_description::SourceDescriptionChunk;
use switchyard_protocol as proto;
use tokio::sync::mpsc;

use crate::config::{AudioConfig, ReceiverConfig};
use crate::errors::EngineError;
use crate::id::{ParticipantSid, TrackSid};
use crate::participant::Participant;
use crate::rtc::{RtcpPacket, RtpCodecParameters};

/// A batch of RTCP packets flowing from a receiver to the publisher PC.
pub type RtcpBatch = Vec<RtcpPacket>;

/// An RTP track as announced by the publisher peer connection. `id()` is the
/// media-stream-track id observed in SDP, which may differ from the cid the
/// client used in its publish request.
pub trait RemoteTrack: Send + Sync {
    fn id(&self) -> String;
    fn kind(&self) -> proto::TrackType;
    fn ssrc(&self) -> u32;
    /// Simulcast rid, empty for a single-layer track.
    fn rid(&self) -> String;
}

pub trait RtpReceiver: Send + Sync {
    fn has_track(&self) -> bool;
    fn codec_parameters(&self) -> Vec<RtpCodecParameters>;
}

pub trait RtpTransceiver: Send + Sync {
    fn kind(&self) -> proto::TrackType;
    fn receiver(&self) -> Option<Arc<dyn RtpReceiver>>;
    fn sender_codecs(&self) -> Vec<RtpCodecParameters>;
    /// Replaces every codec on the transceiver.
    fn set_codec_preferences(&self, codecs: Vec<RtpCodecParameters>) -> Result<(), EngineError>;
}

/// A track the participant is publishing into the room.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> TrackSid;
    fn kind(&self) -> proto::TrackType;
    /// Client-supplied id from the publish request.
    fn signal_cid(&self) -> String;
    /// Media-stream-track id observed in SDP.
    fn sdp_cid(&self) -> String;
    fn to_proto(&self) -> proto::TrackInfo;

    fn is_muted(&self) -> bool;
    fn set_muted(&self, muted: bool);

    /// Attaches an RTP receiver; called again for every simulcast layer.
    fn add_receiver(
        &self,
        receiver: Arc<dyn RtpReceiver>,
        track: Arc<dyn RemoteTrack>,
        twcc: Option<Arc<dyn TwccResponder>>,
    );
    fn start(&self);
    /// Invoked once when the underlying media flow ends.
    fn add_on_close(&self, f: Box<dyn FnOnce() + Send>);

    fn add_subscriber(&self, subscriber: &Participant) -> Result<(), EngineError>;
    fn remove_subscriber(&self, participant_sid: &ParticipantSid);
    fn remove_all_subscribers(&self);

    fn publish_loss_percentage(&self) -> u32;
    /// (publishing, registered) simulcast layer counts.
    fn num_up_tracks(&self) -> (u32, u32);
    /// (level, active) from the audio level meter, if the track has one.
    fn audio_level(&self) -> Option<(u8, bool)>;
}

#[derive(Clone)]
pub struct MediaTrackParams {
    pub track_info: proto::TrackInfo,
    pub signal_cid: String,
    pub sdp_cid: String,
    pub participant_sid: ParticipantSid,
    pub participant_identity: String,
    pub rtcp_tx: mpsc::Sender<RtcpBatch>,
    pub receiver_config: ReceiverConfig,
    pub audio_config: AudioConfig,
}

pub trait MediaTrackFactory: Send + Sync {
    fn create_media_track(
        &self,
        remote: Arc<dyn RemoteTrack>,
        params: MediaTrackParams,
    ) -> Arc<dyn MediaTrack>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingStatus {
    Off,
    Partial,
    Optimal,
}

/// Server-to-client leg of a forwarded track.
pub trait DownTrack: Send + Sync {
    fn kind(&self) -> proto::TrackType;
    fn close(&self);
    fn create_sender_report(&self) -> Option<SenderReport>;
    fn create_source_description_chunks(&self) -> Option<Vec<SourceDescriptionChunk>>;
    fn forwarding_status(&self) -> ForwardingStatus;
    fn debug_info(&self) -> serde_json::Value;
}

/// A track this participant receives from another publisher.
pub trait SubscribedTrack: Send + Sync {
    fn id(&self) -> TrackSid;
    fn publisher_identity(&self) -> String;
    fn down_track(&self) -> Arc<dyn DownTrack>;
    fn is_muted(&self) -> bool;
    fn subscribe_loss_percentage(&self) -> u32;
}

/// Transport-wide congestion control responder. A participant owns at most
/// one, created lazily for the first published track.
pub trait TwccResponder: Send + Sync {
    fn on_feedback(&self, handler: Box<dyn Fn(RtcpPacket) + Send + Sync>);
}

pub trait TwccFactory: Send + Sync {
    fn create_responder(&self, ssrc: u32) -> Arc<dyn TwccResponder>;
}

/// Pause/resume report from the subscriber transport's stream allocator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamedTrack {
    pub participant_sid: String,
    pub track_sid: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamedTracksUpdate {
    pub paused: Vec<StreamedTrack>,
    pub resumed: Vec<StreamedTrack>,
}
