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

//! In-memory engine doubles for driving a participant without a media stack.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rtcp::packet::Packet as _;
use rtcp::sender_report::SenderReport;
use rtcp::source_description::SourceDescriptionChunk;
use switchyard_rtc::prelude::*;
use switchyard_rtc::proto;

// ---- signaling sink ----

#[derive(Default)]
pub struct FakeSink {
    pub messages: Mutex<Vec<proto::SignalResponse>>,
    pub close_count: AtomicUsize,
    pub fail_writes: AtomicBool,
}

impl FakeSink {
    pub fn messages(&self) -> Vec<proto::SignalResponse> {
        self.messages.lock().clone()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.messages.lock().iter().filter(|m| m.kind() == kind).count()
    }

    pub fn last_of_kind(&self, kind: &str) -> Option<proto::SignalResponse> {
        self.messages.lock().iter().rev().find(|m| m.kind() == kind).cloned()
    }
}

impl MessageSink for FakeSink {
    fn write_message(&self, msg: proto::SignalResponse) -> Result<(), EngineError> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(EngineError::other("sink write failed"));
        }
        self.messages.lock().push(msg);
        Ok(())
    }

    fn close(&self) {
        self.close_count.fetch_add(1, Ordering::AcqRel);
    }
}

// ---- peer connection ----

pub struct FakePeerConnection {
    pub remote_description: Mutex<Option<SessionDescription>>,
    pub local_description: Mutex<Option<SessionDescription>>,
    pub answer: Mutex<SessionDescription>,
    pub candidates: Mutex<Vec<IceCandidateInit>>,
    pub rtcp_writes: Mutex<Vec<Vec<RtcpPacket>>>,
    pub write_rtcp_error: Mutex<Option<EngineError>>,
    pub connection_state: Mutex<PeerConnectionState>,
    pub ice_state: Mutex<IceConnectionState>,
    pub signaling: Mutex<SignalingState>,
    pub transceivers: Mutex<Vec<Arc<dyn RtpTransceiver>>>,
    pub created_data_channels: Mutex<Vec<Arc<FakeDataChannel>>>,
    pub closed: AtomicBool,

    on_ice_candidate: Mutex<Option<OnIceCandidate>>,
    on_ice_state_change: Mutex<Option<OnIceConnectionStateChange>>,
    on_track: Mutex<Option<OnTrack>>,
    on_data_channel: Mutex<Option<OnDataChannel>>,
}

impl Default for FakePeerConnection {
    fn default() -> Self {
        Self {
            remote_description: Mutex::new(None),
            local_description: Mutex::new(None),
            answer: Mutex::new(SessionDescription {
                sdp_type: SdpType::Answer,
                sdp: "v=0 answer".to_owned(),
            }),
            candidates: Mutex::new(Vec::new()),
            rtcp_writes: Mutex::new(Vec::new()),
            write_rtcp_error: Mutex::new(None),
            connection_state: Mutex::new(PeerConnectionState::New),
            ice_state: Mutex::new(IceConnectionState::New),
            signaling: Mutex::new(SignalingState::Stable),
            transceivers: Mutex::new(Vec::new()),
            created_data_channels: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            on_ice_candidate: Mutex::new(None),
            on_ice_state_change: Mutex::new(None),
            on_track: Mutex::new(None),
            on_data_channel: Mutex::new(None),
        }
    }
}

impl FakePeerConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fire_ice_connection_state(&self, state: IceConnectionState) {
        *self.ice_state.lock() = state;
        if let Some(handler) = self.on_ice_state_change.lock().as_mut() {
            handler(state);
        }
    }

    pub fn fire_ice_candidate(&self, candidate: Option<IceCandidateInit>) {
        if let Some(handler) = self.on_ice_candidate.lock().as_mut() {
            handler(candidate);
        }
    }

    pub fn fire_track(&self, remote: Arc<dyn RemoteTrack>, receiver: Arc<dyn RtpReceiver>) {
        if let Some(handler) = self.on_track.lock().as_mut() {
            handler(remote, receiver);
        }
    }

    pub fn fire_data_channel(&self, dc: Arc<dyn DataChannel>) {
        if let Some(handler) = self.on_data_channel.lock().as_mut() {
            handler(dc);
        }
    }

    pub fn rtcp_write_count(&self) -> usize {
        self.rtcp_writes.lock().len()
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        *self.remote_description.lock() = Some(desc);
        Ok(())
    }

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, EngineError> {
        let sdp = if options.ice_restart { "v=0 offer ice-restart" } else { "v=0 offer" };
        Ok(SessionDescription { sdp_type: SdpType::Offer, sdp: sdp.to_owned() })
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        Ok(self.answer.lock().clone())
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        *self.local_description.lock() = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), EngineError> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    fn write_rtcp(&self, packets: &[RtcpPacket]) -> Result<(), EngineError> {
        if let Some(err) = self.write_rtcp_error.lock().clone() {
            return Err(err);
        }
        self.rtcp_writes.lock().push(packets.iter().map(|p| p.cloned()).collect());
        Ok(())
    }

    fn get_transceivers(&self) -> Vec<Arc<dyn RtpTransceiver>> {
        self.transceivers.lock().clone()
    }

    fn connection_state(&self) -> PeerConnectionState {
        *self.connection_state.lock()
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        *self.ice_state.lock()
    }

    fn signaling_state(&self) -> SignalingState {
        *self.signaling.lock()
    }

    fn remote_description(&self) -> Option<SessionDescription> {
        self.remote_description.lock().clone()
    }

    fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> Result<Arc<dyn DataChannel>, EngineError> {
        let dc = Arc::new(FakeDataChannel::new(label, init));
        self.created_data_channels.lock().push(dc.clone());
        Ok(dc)
    }

    fn on_ice_candidate(&self, handler: Option<OnIceCandidate>) {
        *self.on_ice_candidate.lock() = handler;
    }

    fn on_ice_connection_state_change(&self, handler: Option<OnIceConnectionStateChange>) {
        *self.on_ice_state_change.lock() = handler;
    }

    fn on_track(&self, handler: Option<OnTrack>) {
        *self.on_track.lock() = handler;
    }

    fn on_data_channel(&self, handler: Option<OnDataChannel>) {
        *self.on_data_channel.lock() = handler;
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

// ---- data channel ----

pub struct FakeDataChannel {
    pub label: String,
    pub init: DataChannelInit,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub send_error: Mutex<Option<EngineError>>,
    pub closed: AtomicBool,
    on_message: Mutex<Option<OnMessage>>,
}

impl FakeDataChannel {
    pub fn new(label: &str, init: DataChannelInit) -> Self {
        Self {
            label: label.to_owned(),
            init,
            sent: Mutex::new(Vec::new()),
            send_error: Mutex::new(None),
            closed: AtomicBool::new(false),
            on_message: Mutex::new(None),
        }
    }

    pub fn fire_message(&self, data: &[u8]) {
        if let Some(handler) = self.on_message.lock().as_mut() {
            handler(data);
        }
    }
}

impl DataChannel for FakeDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn send(&self, data: &[u8]) -> Result<(), EngineError> {
        if let Some(err) = self.send_error.lock().clone() {
            return Err(err);
        }
        self.sent.lock().push(data.to_vec());
        Ok(())
    }

    fn on_message(&self, handler: Option<OnMessage>) {
        *self.on_message.lock() = handler;
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

// ---- rtp plumbing ----

pub struct FakeRemoteTrack {
    pub id: String,
    pub kind: proto::TrackType,
    pub ssrc: u32,
    pub rid: String,
}

impl FakeRemoteTrack {
    pub fn new(id: &str, kind: proto::TrackType, ssrc: u32) -> Arc<Self> {
        Arc::new(Self { id: id.to_owned(), kind, ssrc, rid: String::new() })
    }
}

impl RemoteTrack for FakeRemoteTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> proto::TrackType {
        self.kind
    }

    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn rid(&self) -> String {
        self.rid.clone()
    }
}

pub struct FakeRtpReceiver {
    pub has_track: bool,
    pub codecs: Vec<RtpCodecParameters>,
}

impl FakeRtpReceiver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { has_track: false, codecs: Vec::new() })
    }

    pub fn with_codecs(codecs: Vec<RtpCodecParameters>) -> Arc<Self> {
        Arc::new(Self { has_track: false, codecs })
    }
}

impl RtpReceiver for FakeRtpReceiver {
    fn has_track(&self) -> bool {
        self.has_track
    }

    fn codec_parameters(&self) -> Vec<RtpCodecParameters> {
        self.codecs.clone()
    }
}

pub struct FakeTransceiver {
    pub kind: proto::TrackType,
    pub receiver: Option<Arc<FakeRtpReceiver>>,
    pub sender_codecs: Vec<RtpCodecParameters>,
    pub preferences: Mutex<Option<Vec<RtpCodecParameters>>>,
}

impl FakeTransceiver {
    pub fn audio(receiver: Arc<FakeRtpReceiver>) -> Arc<Self> {
        Arc::new(Self {
            kind: proto::TrackType::Audio,
            receiver: Some(receiver),
            sender_codecs: Vec::new(),
            preferences: Mutex::new(None),
        })
    }
}

impl RtpTransceiver for FakeTransceiver {
    fn kind(&self) -> proto::TrackType {
        self.kind
    }

    fn receiver(&self) -> Option<Arc<dyn RtpReceiver>> {
        self.receiver.clone().map(|r| r as Arc<dyn RtpReceiver>)
    }

    fn sender_codecs(&self) -> Vec<RtpCodecParameters> {
        self.sender_codecs.clone()
    }

    fn set_codec_preferences(&self, codecs: Vec<RtpCodecParameters>) -> Result<(), EngineError> {
        *self.preferences.lock() = Some(codecs);
        Ok(())
    }
}

// ---- published tracks ----

pub struct FakeMediaTrack {
    pub sid: TrackSid,
    pub params: MediaTrackParams,
    pub muted: AtomicBool,
    pub started: AtomicBool,
    pub receiver_count: AtomicUsize,
    pub subscribers: Mutex<Vec<String>>,
    pub remove_all_count: AtomicUsize,
    pub add_subscriber_error: Mutex<Option<EngineError>>,
    pub audio_level: Mutex<Option<(u8, bool)>>,
    pub publish_loss: AtomicUsize,
    pub up_tracks: Mutex<(u32, u32)>,
    on_close: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FakeMediaTrack {
    pub fn new(params: MediaTrackParams) -> Arc<Self> {
        let sid = TrackSid::try_from(params.track_info.sid.clone()).expect("track sid");
        Arc::new(Self {
            sid,
            muted: AtomicBool::new(params.track_info.muted),
            params,
            started: AtomicBool::new(false),
            receiver_count: AtomicUsize::new(0),
            subscribers: Mutex::new(Vec::new()),
            remove_all_count: AtomicUsize::new(0),
            add_subscriber_error: Mutex::new(None),
            audio_level: Mutex::new(None),
            publish_loss: AtomicUsize::new(0),
            up_tracks: Mutex::new((0, 0)),
            on_close: Mutex::new(None),
        })
    }

    /// Simulates the underlying media flow ending.
    pub fn trigger_close(&self) {
        if let Some(hook) = self.on_close.lock().take() {
            hook();
        }
    }
}

impl MediaTrack for FakeMediaTrack {
    fn id(&self) -> TrackSid {
        self.sid.clone()
    }

    fn kind(&self) -> proto::TrackType {
        self.params.track_info.track_type
    }

    fn signal_cid(&self) -> String {
        self.params.signal_cid.clone()
    }

    fn sdp_cid(&self) -> String {
        self.params.sdp_cid.clone()
    }

    fn to_proto(&self) -> proto::TrackInfo {
        let mut info = self.params.track_info.clone();
        info.muted = self.is_muted();
        info
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    fn add_receiver(
        &self,
        _receiver: Arc<dyn RtpReceiver>,
        _track: Arc<dyn RemoteTrack>,
        _twcc: Option<Arc<dyn TwccResponder>>,
    ) {
        self.receiver_count.fetch_add(1, Ordering::AcqRel);
    }

    fn start(&self) {
        self.started.store(true, Ordering::Release);
    }

    fn add_on_close(&self, f: Box<dyn FnOnce() + Send>) {
        *self.on_close.lock() = Some(f);
    }

    fn add_subscriber(&self, subscriber: &Participant) -> Result<(), EngineError> {
        if let Some(err) = self.add_subscriber_error.lock().clone() {
            return Err(err);
        }
        self.subscribers.lock().push(subscriber.sid().to_string());
        Ok(())
    }

    fn remove_subscriber(&self, participant_sid: &ParticipantSid) {
        self.subscribers.lock().retain(|sid| sid != participant_sid.as_str());
    }

    fn remove_all_subscribers(&self) {
        self.remove_all_count.fetch_add(1, Ordering::AcqRel);
        self.subscribers.lock().clear();
    }

    fn publish_loss_percentage(&self) -> u32 {
        self.publish_loss.load(Ordering::Acquire) as u32
    }

    fn num_up_tracks(&self) -> (u32, u32) {
        *self.up_tracks.lock()
    }

    fn audio_level(&self) -> Option<(u8, bool)> {
        *self.audio_level.lock()
    }
}

#[derive(Default)]
pub struct FakeMediaTrackFactory {
    pub created: Mutex<Vec<Arc<FakeMediaTrack>>>,
}

impl FakeMediaTrackFactory {
    pub fn last_created(&self) -> Option<Arc<FakeMediaTrack>> {
        self.created.lock().last().cloned()
    }
}

impl MediaTrackFactory for FakeMediaTrackFactory {
    fn create_media_track(
        &self,
        _remote: Arc<dyn RemoteTrack>,
        params: MediaTrackParams,
    ) -> Arc<dyn MediaTrack> {
        let track = FakeMediaTrack::new(params);
        self.created.lock().push(track.clone());
        track
    }
}

// ---- congestion feedback ----

pub struct FakeTwccResponder {
    pub ssrc: u32,
    pub feedback: Mutex<Option<Box<dyn Fn(RtcpPacket) + Send + Sync>>>,
}

impl TwccResponder for FakeTwccResponder {
    fn on_feedback(&self, handler: Box<dyn Fn(RtcpPacket) + Send + Sync>) {
        *self.feedback.lock() = Some(handler);
    }
}

#[derive(Default)]
pub struct FakeTwccFactory {
    pub created: Mutex<Vec<Arc<FakeTwccResponder>>>,
}

impl TwccFactory for FakeTwccFactory {
    fn create_responder(&self, ssrc: u32) -> Arc<dyn TwccResponder> {
        let responder = Arc::new(FakeTwccResponder { ssrc, feedback: Mutex::new(None) });
        self.created.lock().push(responder.clone());
        responder
    }
}

// ---- subscriptions ----

pub struct FakeDownTrack {
    pub kind: proto::TrackType,
    pub closed: AtomicBool,
    pub sender_report: Mutex<Option<SenderReport>>,
    pub chunks: Mutex<Option<Vec<SourceDescriptionChunk>>>,
    pub status: Mutex<ForwardingStatus>,
}

impl FakeDownTrack {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            kind: proto::TrackType::Video,
            closed: AtomicBool::new(false),
            sender_report: Mutex::new(None),
            chunks: Mutex::new(None),
            status: Mutex::new(ForwardingStatus::Optimal),
        })
    }
}

impl DownTrack for FakeDownTrack {
    fn kind(&self) -> proto::TrackType {
        self.kind
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn create_sender_report(&self) -> Option<SenderReport> {
        self.sender_report.lock().clone()
    }

    fn create_source_description_chunks(&self) -> Option<Vec<SourceDescriptionChunk>> {
        self.chunks.lock().clone()
    }

    fn forwarding_status(&self) -> ForwardingStatus {
        *self.status.lock()
    }

    fn debug_info(&self) -> serde_json::Value {
        serde_json::json!({ "kind": format!("{:?}", self.kind) })
    }
}

pub struct FakeSubscribedTrack {
    pub sid: TrackSid,
    pub publisher_identity: String,
    pub down: Arc<FakeDownTrack>,
    pub muted: AtomicBool,
    pub loss: AtomicUsize,
}

impl FakeSubscribedTrack {
    pub fn new(sid: &str, publisher_identity: &str) -> Arc<Self> {
        Arc::new(Self {
            sid: TrackSid::try_from(sid.to_owned()).expect("track sid"),
            publisher_identity: publisher_identity.to_owned(),
            down: FakeDownTrack::new(),
            muted: AtomicBool::new(false),
            loss: AtomicUsize::new(0),
        })
    }
}

impl SubscribedTrack for FakeSubscribedTrack {
    fn id(&self) -> TrackSid {
        self.sid.clone()
    }

    fn publisher_identity(&self) -> String {
        self.publisher_identity.clone()
    }

    fn down_track(&self) -> Arc<dyn DownTrack> {
        self.down.clone()
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    fn subscribe_loss_percentage(&self) -> u32 {
        self.loss.load(Ordering::Acquire) as u32
    }
}

// ---- test harness ----

pub struct TestPeer {
    pub participant: Participant,
    pub sink: Arc<FakeSink>,
    pub publisher_pc: Arc<FakePeerConnection>,
    pub subscriber_pc: Arc<FakePeerConnection>,
    pub track_factory: Arc<FakeMediaTrackFactory>,
    pub twcc_factory: Arc<FakeTwccFactory>,
}

pub fn new_test_peer(identity: &str, protocol_version: proto::ProtocolVersion) -> TestPeer {
    let sink = Arc::new(FakeSink::default());
    let publisher_pc = FakePeerConnection::new();
    let subscriber_pc = FakePeerConnection::new();
    let track_factory = Arc::new(FakeMediaTrackFactory::default());
    let twcc_factory = Arc::new(FakeTwccFactory::default());

    let participant = Participant::new(ParticipantParams {
        identity: identity.to_owned(),
        sink: sink.clone(),
        publisher: publisher_pc.clone(),
        subscriber: subscriber_pc.clone(),
        track_factory: track_factory.clone(),
        twcc_factory: twcc_factory.clone(),
        protocol_version,
        throttle_config: PliThrottleConfig::default(),
        audio_config: AudioConfig::default(),
        receiver_config: ReceiverConfig::default(),
        permission: None,
        hidden: false,
    })
    .expect("participant");

    TestPeer { participant, sink, publisher_pc, subscriber_pc, track_factory, twcc_factory }
}

/// Dual-PC client, the publisher drives the lifecycle.
pub fn publisher_primary_peer(identity: &str) -> TestPeer {
    new_test_peer(identity, proto::ProtocolVersion(2))
}

/// Current-protocol client, the subscriber drives the lifecycle.
pub fn subscriber_primary_peer(identity: &str) -> TestPeer {
    new_test_peer(identity, proto::CURRENT_PROTOCOL)
}

pub fn offer(sdp: &str) -> SessionDescription {
    SessionDescription { sdp_type: SdpType::Offer, sdp: sdp.to_owned() }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}
