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

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use prost::Message;
use rtcp::packet::Packet as _;
use rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use rtcp::sender_report::SenderReport;
use rtcp::source_description::{SourceDescription, SourceDescriptionChunk};
use switchyard_protocol as proto;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::config::{AudioConfig, PliThrottleConfig, ReceiverConfig};
use crate::convert::{to_proto_session_description, to_proto_trickle};
use crate::errors::{EngineError, RtcError, RtcResult};
use crate::id::{ParticipantSid, TrackSid};
use crate::peer_transport::PeerTransport;
use crate::pli_throttle::PliThrottle;
use crate::rtc::{
    DataChannel, DataChannelInit, IceCandidateInit, IceConnectionState, OfferOptions,
    PeerConnection, PeerConnectionState, SdpType, SessionDescription, MIME_TYPE_OPUS,
};
use crate::sink::MessageSink;
use crate::telemetry;
use crate::track::{
    MediaTrack, MediaTrackFactory, MediaTrackParams, RemoteTrack, RtcpBatch, RtpReceiver,
    StreamedTracksUpdate, SubscribedTrack, TwccFactory,
};

pub const LOSSY_DC_LABEL: &str = "_lossy";
pub const RELIABLE_DC_LABEL: &str = "_reliable";

const SD_BATCH_SIZE: usize = 20;
const RTCP_CHANNEL_CAPACITY: usize = 50;
const UPDATE_CACHE_SIZE: usize = 32;
const SILENT_AUDIO_LEVEL: u8 = 127;
const DOWN_TRACK_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Lifecycle of a participant. Transitions are strictly forward; once
/// `Disconnected` nothing moves again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ParticipantState {
    Joining = 0,
    Joined = 1,
    Active = 2,
    Disconnected = 3,
}

impl ParticipantState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ParticipantState::Joining,
            1 => ParticipantState::Joined,
            2 => ParticipantState::Active,
            _ => ParticipantState::Disconnected,
        }
    }
}

impl From<ParticipantState> for proto::ParticipantState {
    fn from(state: ParticipantState) -> Self {
        match state {
            ParticipantState::Joining => proto::ParticipantState::Joining,
            ParticipantState::Joined => proto::ParticipantState::Joined,
            ParticipantState::Active => proto::ParticipantState::Active,
            ParticipantState::Disconnected => proto::ParticipantState::Disconnected,
        }
    }
}

pub struct ParticipantParams {
    pub identity: String,
    pub sink: Arc<dyn MessageSink>,
    pub publisher: Arc<dyn PeerConnection>,
    pub subscriber: Arc<dyn PeerConnection>,
    pub track_factory: Arc<dyn MediaTrackFactory>,
    pub twcc_factory: Arc<dyn TwccFactory>,
    pub protocol_version: proto::ProtocolVersion,
    pub throttle_config: PliThrottleConfig,
    pub audio_config: AudioConfig,
    pub receiver_config: ReceiverConfig,
    pub permission: Option<proto::ParticipantPermission>,
    pub hidden: bool,
}

type TrackHandler = Box<dyn Fn(Participant, Arc<dyn MediaTrack>) + Send + Sync>;
type StateChangeHandler = Box<dyn Fn(Participant, ParticipantState) + Send + Sync>;
type ParticipantHandler = Box<dyn Fn(Participant) + Send + Sync>;
type DataPacketHandler = Box<dyn Fn(Participant, proto::DataPacket) + Send + Sync>;

#[derive(Default)]
struct ParticipantEvents {
    track_published: Mutex<Option<TrackHandler>>,
    track_updated: Mutex<Option<TrackHandler>>,
    state_change: Mutex<Option<StateChangeHandler>>,
    metadata_update: Mutex<Option<ParticipantHandler>>,
    data_packet: Mutex<Option<DataPacketHandler>>,
    close: Mutex<Option<ParticipantHandler>>,
}

/// Guarded by the participant's main RwLock. A track sid lives in
/// `pending_tracks` or `published_tracks`, never both.
struct TrackState {
    pending_tracks: HashMap<String, proto::TrackInfo>,
    published_tracks: HashMap<TrackSid, Arc<dyn MediaTrack>>,
    subscribed_tracks: HashMap<TrackSid, Arc<dyn SubscribedTrack>>,
    twcc: Option<Arc<dyn crate::track::TwccResponder>>,
}

struct ParticipantInner {
    identity: String,
    sid: ParticipantSid,
    connected_at: SystemTime,
    hidden: bool,
    protocol_version: proto::ProtocolVersion,
    audio_config: AudioConfig,
    receiver_config: ReceiverConfig,
    track_factory: Arc<dyn MediaTrackFactory>,
    twcc_factory: Arc<dyn TwccFactory>,
    /// Fixed at construction; decides which PC drives the lifecycle.
    subscriber_primary: bool,

    state: AtomicU8,
    is_closed: AtomicBool,
    metadata: Mutex<String>,
    permission: Mutex<Option<proto::ParticipantPermission>>,
    sink: RwLock<Option<Arc<dyn MessageSink>>>,

    publisher: Arc<PeerTransport>,
    subscriber: Arc<PeerTransport>,

    // publisher-created channels are latched by label from on_data_channel;
    // subscriber-side channels exist only when the subscriber is primary
    reliable_dc: Mutex<Option<Arc<dyn DataChannel>>>,
    lossy_dc: Mutex<Option<Arc<dyn DataChannel>>>,
    reliable_dc_sub: Mutex<Option<Arc<dyn DataChannel>>>,
    lossy_dc_sub: Mutex<Option<Arc<dyn DataChannel>>>,

    rtcp_tx: mpsc::Sender<RtcpBatch>,
    rtcp_rx: Mutex<Option<mpsc::Receiver<RtcpBatch>>>,
    pli_throttle: PliThrottle,
    /// Last updated_at sent per peer sid; the mutex also serializes the
    /// cache-check-then-write sequence.
    update_cache: Mutex<LruCache<String, SystemTime>>,

    tracks: RwLock<TrackState>,
    subscribed_to: RwLock<HashSet<String>>,

    events: Arc<ParticipantEvents>,
    started: Once,
    close_tx: watch::Sender<bool>,
    runtime: Handle,
}

/// Server-side peer of one connected client. Owns the publisher/subscriber
/// peer connections, reconciles track publications, routes RTCP and data
/// packets, and multiplexes every outbound signal through the sink.
///
/// Must be constructed inside a tokio runtime; engine callbacks may otherwise
/// fire on threads with no executor to hand tasks to.
#[derive(Clone)]
pub struct Participant {
    inner: Arc<ParticipantInner>,
}

impl Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("sid", &self.inner.sid)
            .field("identity", &self.inner.identity)
            .field("state", &self.state())
            .finish()
    }
}

impl Participant {
    pub fn new(params: ParticipantParams) -> RtcResult<Self> {
        if params.identity.is_empty() {
            return Err(RtcError::Configuration("identity cannot be empty".to_owned()));
        }

        let can_subscribe = params.permission.as_ref().map_or(true, |p| p.can_subscribe);
        let subscriber_primary = params.protocol_version.subscriber_as_primary() && can_subscribe;

        let (rtcp_tx, rtcp_rx) = mpsc::channel(RTCP_CHANNEL_CAPACITY);
        let (close_tx, _) = watch::channel(false);

        let publisher =
            Arc::new(PeerTransport::new(params.publisher, proto::SignalTarget::Publisher));
        let subscriber =
            Arc::new(PeerTransport::new(params.subscriber, proto::SignalTarget::Subscriber));

        let inner = Arc::new(ParticipantInner {
            identity: params.identity,
            sid: ParticipantSid::new(),
            connected_at: SystemTime::now(),
            hidden: params.hidden,
            protocol_version: params.protocol_version,
            audio_config: params.audio_config,
            receiver_config: params.receiver_config,
            track_factory: params.track_factory,
            twcc_factory: params.twcc_factory,
            subscriber_primary,
            state: AtomicU8::new(ParticipantState::Joining as u8),
            is_closed: AtomicBool::new(false),
            metadata: Mutex::new(String::new()),
            permission: Mutex::new(params.permission),
            sink: RwLock::new(Some(params.sink)),
            publisher,
            subscriber,
            reliable_dc: Mutex::new(None),
            lossy_dc: Mutex::new(None),
            reliable_dc_sub: Mutex::new(None),
            lossy_dc_sub: Mutex::new(None),
            rtcp_tx,
            rtcp_rx: Mutex::new(Some(rtcp_rx)),
            pli_throttle: PliThrottle::new(params.throttle_config),
            update_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(UPDATE_CACHE_SIZE).unwrap(),
            )),
            tracks: RwLock::new(TrackState {
                pending_tracks: HashMap::new(),
                published_tracks: HashMap::new(),
                subscribed_tracks: HashMap::new(),
                twcc: None,
            }),
            subscribed_to: RwLock::new(HashSet::new()),
            events: Arc::new(ParticipantEvents::default()),
            started: Once::new(),
            close_tx,
            runtime: Handle::current(),
        });

        if subscriber_primary {
            let subscriber_pc = inner.subscriber.peer_connection();
            let reliable = subscriber_pc
                .create_data_channel(
                    RELIABLE_DC_LABEL,
                    DataChannelInit { ordered: true, max_retransmits: None },
                )
                .map_err(|err| RtcError::transport("create data channel", err))?;
            let lossy = subscriber_pc
                .create_data_channel(
                    LOSSY_DC_LABEL,
                    DataChannelInit { ordered: true, max_retransmits: Some(0) },
                )
                .map_err(|err| RtcError::transport("create data channel", err))?;
            *inner.reliable_dc_sub.lock() = Some(reliable);
            *inner.lossy_dc_sub.lock() = Some(lossy);
        }

        Self::register_engine_callbacks(&inner);

        Ok(Self { inner })
    }

    fn register_engine_callbacks(inner: &Arc<ParticipantInner>) {
        for transport in [&inner.publisher, &inner.subscriber] {
            let weak = Arc::downgrade(inner);
            let target = transport.target();
            transport.peer_connection().on_ice_candidate(Some(Box::new(move |candidate| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let Some(candidate) = candidate else {
                    return;
                };
                if inner.state() == ParticipantState::Disconnected {
                    return;
                }
                inner.send_ice_candidate(candidate, target);
            })));
        }

        let primary_pc = if inner.subscriber_primary {
            inner.subscriber.peer_connection()
        } else {
            inner.publisher.peer_connection()
        };
        let weak = Arc::downgrade(inner);
        primary_pc.on_ice_connection_state_change(Some(Box::new(move |state| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_primary_ice_state_change(state);
            }
        })));

        let weak = Arc::downgrade(inner);
        inner.publisher.peer_connection().on_track(Some(Box::new(move |remote, receiver| {
            if let Some(inner) = weak.upgrade() {
                inner.on_media_track(remote, receiver);
            }
        })));

        let weak = Arc::downgrade(inner);
        inner.publisher.peer_connection().on_data_channel(Some(Box::new(move |dc| {
            if let Some(inner) = weak.upgrade() {
                inner.on_data_channel(dc);
            }
        })));

        let weak = Arc::downgrade(inner);
        inner.subscriber.on_offer(Some(Box::new(move |offer| {
            if let Some(inner) = weak.upgrade() {
                inner.on_subscriber_offer(offer);
            }
        })));

        let weak = Arc::downgrade(inner);
        inner.subscriber.on_streamed_tracks_change(Some(Box::new(move |update| {
            if let Some(inner) = weak.upgrade() {
                inner.on_streamed_tracks_change(update);
            }
        })));
    }

    pub fn sid(&self) -> ParticipantSid {
        self.inner.sid.clone()
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn state(&self) -> ParticipantState {
        self.inner.state()
    }

    /// JOINED or ACTIVE.
    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    pub fn connected_at(&self) -> SystemTime {
        self.inner.connected_at
    }

    pub fn protocol_version(&self) -> proto::ProtocolVersion {
        self.inner.protocol_version
    }

    pub fn hidden(&self) -> bool {
        self.inner.hidden
    }

    pub fn subscriber_as_primary(&self) -> bool {
        self.inner.subscriber_primary
    }

    pub fn metadata(&self) -> String {
        self.inner.metadata.lock().clone()
    }

    pub fn set_metadata(&self, metadata: String) {
        *self.inner.metadata.lock() = metadata;

        let events = self.inner.events.clone();
        let guard = events.metadata_update.lock();
        if let Some(cb) = guard.as_ref() {
            cb(self.clone());
        }
    }

    pub fn set_permission(&self, permission: Option<proto::ParticipantPermission>) {
        *self.inner.permission.lock() = permission;
    }

    pub fn can_publish(&self) -> bool {
        self.inner.can_publish()
    }

    pub fn can_subscribe(&self) -> bool {
        self.inner.can_subscribe()
    }

    pub fn can_publish_data(&self) -> bool {
        self.inner.permission.lock().as_ref().map_or(true, |p| p.can_publish_data)
    }

    pub fn to_proto(&self) -> proto::ParticipantInfo {
        self.inner.to_proto()
    }

    /// Where receivers push RTCP destined for the publisher PC.
    pub fn rtcp_sender(&self) -> mpsc::Sender<RtcpBatch> {
        self.inner.rtcp_tx.clone()
    }

    pub fn response_sink(&self) -> Option<Arc<dyn MessageSink>> {
        self.inner.sink.read().clone()
    }

    pub fn set_response_sink(&self, sink: Option<Arc<dyn MessageSink>>) {
        *self.inner.sink.write() = sink;
    }

    pub fn publisher(&self) -> Arc<PeerTransport> {
        self.inner.publisher.clone()
    }

    pub fn subscriber(&self) -> Arc<PeerTransport> {
        self.inner.subscriber.clone()
    }

    // observers, invoked by the room

    pub fn on_track_published(
        &self,
        handler: impl Fn(Participant, Arc<dyn MediaTrack>) + Send + Sync + 'static,
    ) {
        *self.inner.events.track_published.lock() = Some(Box::new(handler));
    }

    pub fn on_track_updated(
        &self,
        handler: impl Fn(Participant, Arc<dyn MediaTrack>) + Send + Sync + 'static,
    ) {
        *self.inner.events.track_updated.lock() = Some(Box::new(handler));
    }

    /// Fired from a fresh task with the state the participant left.
    pub fn on_state_change(
        &self,
        handler: impl Fn(Participant, ParticipantState) + Send + Sync + 'static,
    ) {
        *self.inner.events.state_change.lock() = Some(Box::new(handler));
    }

    pub fn on_metadata_update(&self, handler: impl Fn(Participant) + Send + Sync + 'static) {
        *self.inner.events.metadata_update.lock() = Some(Box::new(handler));
    }

    pub fn on_data_packet(
        &self,
        handler: impl Fn(Participant, proto::DataPacket) + Send + Sync + 'static,
    ) {
        *self.inner.events.data_packet.lock() = Some(Box::new(handler));
    }

    pub fn on_close(&self, handler: impl Fn(Participant) + Send + Sync + 'static) {
        *self.inner.events.close.lock() = Some(Box::new(handler));
    }

    // signaling entry points, driven by the room

    /// Answers a publisher offer. On the first successful answer the
    /// participant moves from JOINING to JOINED.
    pub async fn handle_offer(&self, sdp: SessionDescription) -> RtcResult<SessionDescription> {
        self.inner.handle_offer(sdp).await
    }

    /// Client answer for the server-initiated subscriber offer.
    pub async fn handle_answer(&self, sdp: SessionDescription) -> RtcResult<()> {
        self.inner.handle_answer(sdp).await
    }

    /// Records the client's intent to publish and confirms the assigned sid.
    pub fn add_track(&self, req: proto::AddTrackRequest) {
        self.inner.add_track(req);
    }

    pub async fn add_ice_candidate(
        &self,
        candidate: IceCandidateInit,
        target: proto::SignalTarget,
    ) -> RtcResult<()> {
        match target {
            proto::SignalTarget::Publisher => self.inner.publisher.add_ice_candidate(candidate),
            proto::SignalTarget::Subscriber => self.inner.subscriber.add_ice_candidate(candidate),
        }
        .await
    }

    /// Spawns the RTCP workers. Safe to call more than once.
    pub fn start(&self) {
        self.inner.start();
    }

    /// Idempotent teardown; see the ordering contract in the module docs.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Asks the subscriber to produce a fresh offer.
    pub async fn negotiate(&self) -> RtcResult<()> {
        self.inner.subscriber.create_and_send_offer(OfferOptions::default()).await
    }

    /// Restarts subscriber ICE. A no-op until the subscriber has exchanged
    /// descriptions at least once.
    pub async fn ice_restart(&self) -> RtcResult<()> {
        if self.inner.subscriber.peer_connection().remote_description().is_none() {
            return Ok(());
        }
        self.inner.subscriber.create_and_send_offer(OfferOptions { ice_restart: true }).await
    }

    /// Subscribes `op` to everything this participant publishes, returning
    /// the number of tracks subscribed.
    pub fn add_subscriber(&self, op: &Participant) -> RtcResult<usize> {
        let tracks = self.get_published_tracks();
        if tracks.is_empty() {
            return Ok(0);
        }

        log::debug!(
            "subscribing new participant to tracks, publisher: {}, subscriber: {}, count: {}",
            self.identity(),
            op.identity(),
            tracks.len()
        );

        let mut subscribed = 0;
        for track in tracks {
            track.add_subscriber(op).map_err(|err| RtcError::transport("add subscriber", err))?;
            subscribed += 1;
        }
        Ok(subscribed)
    }

    pub fn remove_subscriber(&self, participant_sid: &ParticipantSid) {
        let tracks = self.inner.tracks.read();
        for track in tracks.published_tracks.values() {
            track.remove_subscriber(participant_sid);
        }
    }

    // outbound signal paths

    pub fn send_join_response(
        &self,
        room: proto::Room,
        other_participants: Vec<proto::ParticipantInfo>,
        ice_servers: Vec<proto::IceServer>,
    ) -> RtcResult<()> {
        self.inner.write_message(proto::SignalResponse::Join(proto::JoinResponse {
            room,
            participant: self.to_proto(),
            other_participants,
            server_version: env!("CARGO_PKG_VERSION").to_owned(),
            ice_servers,
            subscriber_primary: self.inner.subscriber_primary,
        }))
    }

    /// Single-peer batches are dropped when a more recent update for that
    /// peer was already sent.
    pub fn send_participant_update(
        &self,
        participants: Vec<proto::ParticipantInfo>,
        updated_at: SystemTime,
    ) -> RtcResult<()> {
        self.inner.send_participant_update(participants, updated_at)
    }

    pub fn send_speaker_update(&self, speakers: Vec<proto::SpeakerInfo>) -> RtcResult<()> {
        if !self.is_ready() {
            return Ok(());
        }
        self.inner
            .write_message(proto::SignalResponse::SpeakersChanged(proto::SpeakersChanged {
                speakers,
            }))
    }

    pub fn send_room_update(&self, room: proto::Room) -> RtcResult<()> {
        self.inner.write_message(proto::SignalResponse::RoomUpdate(proto::RoomUpdate { room }))
    }

    pub fn send_connection_quality_update(
        &self,
        update: proto::ConnectionQualityUpdate,
    ) -> RtcResult<()> {
        self.inner.write_message(proto::SignalResponse::ConnectionQuality(update))
    }

    /// Forwards a data packet to this participant. Only valid while ACTIVE.
    pub fn send_data_packet(&self, packet: proto::DataPacket) -> RtcResult<()> {
        self.inner.send_data_packet(packet)
    }

    pub fn set_track_muted(&self, track_sid: &TrackSid, muted: bool, from_admin: bool) {
        self.inner.set_track_muted(self, track_sid, muted, from_admin);
    }

    /// (level, active) across the participant's audio tracks; lower level is
    /// louder, 127 is silence.
    pub fn get_audio_level(&self) -> (u8, bool) {
        self.inner.get_audio_level()
    }

    pub fn get_connection_quality(&self) -> proto::ConnectionQuality {
        self.inner.get_connection_quality()
    }

    pub fn is_subscribed_to(&self, identity: &str) -> bool {
        self.inner.subscribed_to.read().contains(identity)
    }

    pub fn get_subscribed_participants(&self) -> Vec<String> {
        self.inner.subscribed_to.read().iter().cloned().collect()
    }

    pub fn get_published_track(&self, sid: &TrackSid) -> Option<Arc<dyn MediaTrack>> {
        self.inner.tracks.read().published_tracks.get(sid).cloned()
    }

    pub fn get_published_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.inner.tracks.read().published_tracks.values().cloned().collect()
    }

    pub fn get_subscribed_track(&self, sid: &TrackSid) -> Option<Arc<dyn SubscribedTrack>> {
        self.inner.tracks.read().subscribed_tracks.get(sid).cloned()
    }

    pub fn get_subscribed_tracks(&self) -> Vec<Arc<dyn SubscribedTrack>> {
        self.inner.tracks.read().subscribed_tracks.values().cloned().collect()
    }

    pub fn add_subscribed_track(&self, sub_track: Arc<dyn SubscribedTrack>) {
        self.inner.add_subscribed_track(sub_track);
    }

    pub fn remove_subscribed_track(&self, sub_track: &Arc<dyn SubscribedTrack>) {
        self.inner.remove_subscribed_track(sub_track);
    }

    pub fn debug_info(&self) -> serde_json::Value {
        self.inner.debug_info()
    }
}

impl ParticipantInner {
    fn state(&self) -> ParticipantState {
        ParticipantState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_ready(&self) -> bool {
        matches!(self.state(), ParticipantState::Joined | ParticipantState::Active)
    }

    fn can_publish(&self) -> bool {
        self.permission.lock().as_ref().map_or(true, |p| p.can_publish)
    }

    fn can_subscribe(&self) -> bool {
        self.permission.lock().as_ref().map_or(true, |p| p.can_subscribe)
    }

    fn participant(self: &Arc<Self>) -> Participant {
        Participant { inner: self.clone() }
    }

    fn to_proto(&self) -> proto::ParticipantInfo {
        let tracks = self.tracks.read();
        proto::ParticipantInfo {
            sid: self.sid.to_string(),
            identity: self.identity.clone(),
            state: self.state().into(),
            metadata: self.metadata.lock().clone(),
            joined_at: self
                .connected_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            hidden: self.hidden,
            tracks: tracks.published_tracks.values().map(|t| t.to_proto()).collect(),
        }
    }

    /// Every outbound signal funnels through here. Writes after DISCONNECTED
    /// or without a sink silently succeed; sink failures are returned but
    /// never change state.
    fn write_message(&self, msg: proto::SignalResponse) -> RtcResult<()> {
        if self.state() == ParticipantState::Disconnected {
            return Ok(());
        }
        let Some(sink) = self.sink.read().clone() else {
            return Ok(());
        };

        let kind = msg.kind();
        if let Err(err) = sink.write_message(msg) {
            log::warn!(
                "could not send message to participant, sid: {}, identity: {}, message: {}, error: {}",
                self.sid,
                self.identity,
                kind,
                err
            );
            return Err(RtcError::Delivery(err));
        }
        Ok(())
    }

    /// Moves the state forward; backwards transitions are no-ops. The
    /// observer runs on its own task so an engine callback can never
    /// re-enter itself, and a panicking observer is contained.
    fn update_state(self: &Arc<Self>, state: ParticipantState) {
        let result = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            (state as u8 > current).then_some(state as u8)
        });
        let Ok(old_state) = result.map(ParticipantState::from_u8) else {
            return;
        };

        log::debug!(
            "updating participant state, state: {:?}, participant: {}, sid: {}",
            state,
            self.identity,
            self.sid
        );

        let events = self.events.clone();
        let participant = self.participant();
        self.runtime.spawn(async move {
            let result = catch_unwind(AssertUnwindSafe(|| {
                if let Some(cb) = events.state_change.lock().as_ref() {
                    cb(participant, old_state);
                }
            }));
            if result.is_err() {
                log::error!("state change handler panicked");
            }
        });
    }

    async fn handle_offer(self: &Arc<Self>, sdp: SessionDescription) -> RtcResult<SessionDescription> {
        log::debug!(
            "answering pub offer, state: {:?}, participant: {}, sid: {}",
            self.state(),
            self.identity,
            self.sid
        );

        if let Err(err) = self.publisher.set_remote_description(sdp).await {
            telemetry::count_error("answer", "remote_description");
            return Err(err);
        }

        self.configure_receiver_dtx();

        let publisher_pc = self.publisher.peer_connection();
        let answer = match publisher_pc.create_answer().await {
            Ok(answer) => answer,
            Err(err) => {
                telemetry::count_error("answer", "create");
                return Err(RtcError::transport("create answer", err));
            }
        };
        if let Err(err) = publisher_pc.set_local_description(answer.clone()).await {
            telemetry::count_error("answer", "local_description");
            return Err(RtcError::transport("set local description", err));
        }

        log::debug!("sending answer to client, participant: {}, sid: {}", self.identity, self.sid);
        if let Err(err) = self
            .write_message(proto::SignalResponse::Answer(to_proto_session_description(&answer)))
        {
            telemetry::count_error("answer", "write_message");
            return Err(err);
        }

        if self.state() == ParticipantState::Joining {
            self.update_state(ParticipantState::Joined);
        }
        telemetry::count_success("answer");
        Ok(answer)
    }

    async fn handle_answer(&self, sdp: SessionDescription) -> RtcResult<()> {
        if sdp.sdp_type != SdpType::Answer {
            return Err(RtcError::UnexpectedOffer);
        }
        log::debug!("setting subscriber answer, participant: {}, sid: {}", self.identity, self.sid);
        self.subscriber.set_remote_description(sdp).await
    }

    fn add_track(&self, req: proto::AddTrackRequest) {
        let track_info = {
            let mut tracks = self.tracks.write();

            // already published or pending under this cid, reject
            if tracks.pending_tracks.contains_key(&req.cid)
                || get_published_track_by_signal_cid(&tracks, &req.cid).is_some()
                || get_published_track_by_sdp_cid(&tracks, &req.cid).is_some()
            {
                return;
            }

            if !self.can_publish() {
                log::warn!(
                    "no permission to publish track, participant: {}, sid: {}",
                    self.identity,
                    self.sid
                );
                return;
            }

            let track_info = proto::TrackInfo {
                sid: TrackSid::new().to_string(),
                track_type: req.track_type,
                name: req.name,
                width: req.width,
                height: req.height,
                muted: req.muted,
                disable_dtx: req.disable_dtx,
                simulcast: false,
                source: req.source,
            };
            tracks.pending_tracks.insert(req.cid.clone(), track_info.clone());
            track_info
        };

        let _ = self.write_message(proto::SignalResponse::TrackPublished(
            proto::TrackPublishedResponse { cid: req.cid, track: track_info },
        ));
    }

    fn start(self: &Arc<Self>) {
        if self.is_closed.load(Ordering::Acquire) {
            return;
        }
        self.started.call_once(|| {
            if let Some(rtcp_rx) = self.rtcp_rx.lock().take() {
                let inner = self.clone();
                let close_rx = self.close_tx.subscribe();
                self.runtime.spawn(async move {
                    inner.rtcp_send_worker(rtcp_rx, close_rx).await;
                });
            }

            let inner = self.clone();
            let close_rx = self.close_tx.subscribe();
            self.runtime.spawn(async move {
                inner.down_tracks_rtcp_worker(close_rx).await;
            });
        });
    }

    fn close(self: &Arc<Self>) {
        if self.is_closed.swap(true, Ordering::AcqRel) {
            // already closed
            return;
        }

        let _ = self.write_message(proto::SignalResponse::Leave(proto::LeaveRequest {}));

        // down tracks are closed outside the lock, their close hooks call
        // back into this participant
        let down_tracks_to_close = {
            let tracks = self.tracks.read();
            for track in tracks.published_tracks.values() {
                track.remove_all_subscribers();
            }
            tracks.subscribed_tracks.values().map(|st| st.down_track()).collect::<Vec<_>>()
        };
        for down_track in down_tracks_to_close {
            down_track.close();
        }

        self.update_state(ParticipantState::Disconnected);

        if let Some(sink) = self.sink.read().clone() {
            sink.close();
        }
        let participant = self.participant();
        if let Some(cb) = self.events.close.lock().as_ref() {
            cb(participant);
        }

        self.publisher.close();
        self.subscriber.close();
        let _ = self.close_tx.send(true);
    }

    fn send_participant_update(
        &self,
        participants: Vec<proto::ParticipantInfo>,
        updated_at: SystemTime,
    ) -> RtcResult<()> {
        if participants.len() == 1 {
            // the lock stays held across the write so two racing updates for
            // the same peer cannot cross
            let mut cache = self.update_cache.lock();
            let peer_sid = participants[0].sid.clone();
            if let Some(last_updated_at) = cache.get(&peer_sid) {
                // out of order, a more recent version was already sent
                if *last_updated_at > updated_at {
                    return Ok(());
                }
            }
            cache.put(peer_sid, updated_at);
            return self.write_message(proto::SignalResponse::Update(proto::ParticipantUpdate {
                participants,
            }));
        }

        self.write_message(proto::SignalResponse::Update(proto::ParticipantUpdate {
            participants,
        }))
    }

    fn send_data_packet(&self, packet: proto::DataPacket) -> RtcResult<()> {
        if self.state() != ParticipantState::Active {
            return Err(RtcError::DataChannelUnavailable);
        }

        let kind = packet.kind();
        let data = packet.encode_to_vec();

        let dc = match (kind, self.subscriber_primary) {
            (proto::data_packet::Kind::Reliable, true) => self.reliable_dc_sub.lock().clone(),
            (proto::data_packet::Kind::Reliable, false) => self.reliable_dc.lock().clone(),
            (proto::data_packet::Kind::Lossy, true) => self.lossy_dc_sub.lock().clone(),
            (proto::data_packet::Kind::Lossy, false) => self.lossy_dc.lock().clone(),
        };
        let Some(dc) = dc else {
            return Err(RtcError::DataChannelUnavailable);
        };
        dc.send(&data).map_err(|err| RtcError::transport("send data packet", err))
    }

    fn set_track_muted(
        self: &Arc<Self>,
        participant: &Participant,
        track_sid: &TrackSid,
        muted: bool,
        from_admin: bool,
    ) {
        let (track, is_pending) = {
            let mut tracks = self.tracks.write();
            let mut is_pending = false;
            for info in tracks.pending_tracks.values_mut() {
                if info.sid == track_sid.as_str() {
                    info.muted = muted;
                    is_pending = true;
                }
            }
            (tracks.published_tracks.get(track_sid).cloned(), is_pending)
        };

        let Some(track) = track else {
            if !is_pending {
                log::warn!("could not locate track, sid: {}", track_sid);
            }
            return;
        };

        let current_muted = track.is_muted();
        track.set_muted(muted);

        // when requested by an admin, reflect the change back to the client
        if from_admin {
            let _ = self.write_message(proto::SignalResponse::Mute(proto::MuteTrackRequest {
                sid: track_sid.to_string(),
                muted,
            }));
        }

        if current_muted != track.is_muted() {
            log::debug!(
                "mute status changed, participant: {}, sid: {}, track: {}, muted: {}",
                self.identity,
                self.sid,
                track_sid,
                track.is_muted()
            );
            if let Some(cb) = self.events.track_updated.lock().as_ref() {
                cb(participant.clone(), track);
            }
        }
    }

    fn get_audio_level(&self) -> (u8, bool) {
        let mut level = SILENT_AUDIO_LEVEL;
        let mut active = false;
        let tracks = self.tracks.read();
        for track in tracks.published_tracks.values() {
            let Some((track_level, track_active)) = track.audio_level() else {
                continue;
            };
            if track_active {
                active = true;
                if track_level < level {
                    level = track_level;
                }
            }
        }
        (level, active)
    }

    fn get_connection_quality(&self) -> proto::ConnectionQuality {
        // average loss across all tracks, published weighed the same as
        // subscribed
        let mut pub_loss: u32 = 0;
        let mut reduced_quality_pub = false;
        let mut reduced_quality_sub = false;

        let tracks = self.tracks.read();
        for pub_track in tracks.published_tracks.values() {
            if pub_track.is_muted() {
                continue;
            }
            pub_loss += pub_track.publish_loss_percentage();
            let (publishing, registered) = pub_track.num_up_tracks();
            if registered > 0 && publishing != registered {
                reduced_quality_pub = true;
            }
        }
        let num_tracks = tracks.published_tracks.len() as u32;
        if num_tracks > 0 {
            pub_loss /= num_tracks;
        }

        let mut sub_loss: u32 = 0;
        for sub_track in tracks.subscribed_tracks.values() {
            if sub_track.is_muted() {
                continue;
            }
            if sub_track.down_track().forwarding_status() != crate::track::ForwardingStatus::Optimal
            {
                reduced_quality_sub = true;
            }
            sub_loss += sub_track.subscribe_loss_percentage();
        }
        let num_tracks = tracks.subscribed_tracks.len() as u32;
        if num_tracks > 0 {
            sub_loss /= num_tracks;
        }

        let avg_loss = (pub_loss + sub_loss) / 2;
        if avg_loss >= 4 {
            proto::ConnectionQuality::Poor
        } else if avg_loss <= 2 && !reduced_quality_pub && !reduced_quality_sub {
            proto::ConnectionQuality::Excellent
        } else {
            proto::ConnectionQuality::Good
        }
    }

    fn add_subscribed_track(&self, sub_track: Arc<dyn SubscribedTrack>) {
        log::debug!(
            "added subscribed track, publisher: {}, participant: {}, track: {}",
            sub_track.publisher_identity(),
            self.identity,
            sub_track.id()
        );
        self.tracks.write().subscribed_tracks.insert(sub_track.id(), sub_track.clone());

        self.subscriber.add_track(sub_track.clone());
        self.subscribed_to.write().insert(sub_track.publisher_identity());
    }

    fn remove_subscribed_track(&self, sub_track: &Arc<dyn SubscribedTrack>) {
        log::debug!(
            "removed subscribed track, publisher: {}, participant: {}, track: {}",
            sub_track.publisher_identity(),
            self.identity,
            sub_track.id()
        );

        self.subscriber.remove_track(sub_track);

        let num_remaining = {
            let mut tracks = self.tracks.write();
            tracks.subscribed_tracks.remove(&sub_track.id());
            tracks
                .subscribed_tracks
                .values()
                .filter(|st| st.publisher_identity() == sub_track.publisher_identity())
                .count()
        };
        if num_remaining == 0 {
            self.subscribed_to.write().remove(&sub_track.publisher_identity());
        }
    }

    fn send_ice_candidate(&self, candidate: IceCandidateInit, target: proto::SignalTarget) {
        log::debug!(
            "sending ice candidate, participant: {}, sid: {}, candidate: {}",
            self.identity,
            self.sid,
            candidate.candidate
        );
        match to_proto_trickle(&candidate, target) {
            Ok(trickle) => {
                let _ = self.write_message(proto::SignalResponse::Trickle(trickle));
            }
            Err(err) => log::error!("could not serialize ice candidate: {}", err),
        }
    }

    fn handle_primary_ice_state_change(self: &Arc<Self>, state: IceConnectionState) {
        if state == IceConnectionState::Connected {
            telemetry::count_success("ice_connection");
            self.update_state(ParticipantState::Active);
        } else if state == IceConnectionState::Failed {
            // only close on failed, clients get the opportunity to reconnect;
            // closing inline would re-enter the engine callback
            let inner = self.clone();
            self.runtime.spawn(async move {
                inner.close();
            });
        }
    }

    fn on_subscriber_offer(&self, offer: SessionDescription) {
        if self.state() == ParticipantState::Disconnected {
            log::debug!("skipping server offer, participant: {}, sid: {}", self.identity, self.sid);
            return;
        }

        log::debug!(
            "sending server offer to participant, participant: {}, sid: {}",
            self.identity,
            self.sid
        );
        if self
            .write_message(proto::SignalResponse::Offer(to_proto_session_description(&offer)))
            .is_err()
        {
            telemetry::count_error("offer", "write_message");
        } else {
            telemetry::count_success("offer");
        }
    }

    /// A new RTP track arrived on the publisher PC; match it to the announced
    /// publication, or to an existing one when it is another simulcast layer.
    fn on_media_track(self: &Arc<Self>, remote: Arc<dyn RemoteTrack>, receiver: Arc<dyn RtpReceiver>) {
        if self.state() == ParticipantState::Disconnected {
            return;
        }

        log::debug!(
            "media track added, kind: {:?}, participant: {}, sid: {}, track: {}, rid: {}, ssrc: {}",
            remote.kind(),
            self.identity,
            self.sid,
            remote.id(),
            remote.rid(),
            remote.ssrc()
        );

        if !self.can_publish() {
            log::warn!(
                "no permission to publish media track, participant: {}, sid: {}",
                self.identity,
                self.sid
            );
            return;
        }

        let ssrc = remote.ssrc();
        let (media_track, twcc, is_new) = {
            let mut tracks = self.tracks.write();

            let (media_track, is_new) =
                match get_published_track_by_sdp_cid(&tracks, &remote.id()) {
                    // another layer of an already published simulcast track
                    Some(media_track) => (media_track, false),
                    None => {
                        let Some((signal_cid, track_info)) =
                            get_pending_track(&tracks, &remote.id(), remote.kind())
                        else {
                            log::error!(
                                "track info not published prior to track, client id: {}",
                                remote.id()
                            );
                            return;
                        };

                        let media_track = self.track_factory.create_media_track(
                            remote.clone(),
                            MediaTrackParams {
                                track_info,
                                signal_cid: signal_cid.clone(),
                                sdp_cid: remote.id(),
                                participant_sid: self.sid.clone(),
                                participant_identity: self.identity.clone(),
                                rtcp_tx: self.rtcp_tx.clone(),
                                receiver_config: self.receiver_config.clone(),
                                audio_config: self.audio_config.clone(),
                            },
                        );

                        tracks.published_tracks.insert(media_track.id(), media_track.clone());
                        tracks.pending_tracks.remove(&signal_cid);
                        (media_track, true)
                    }
                };

            self.pli_throttle.add_track(ssrc, &remote.rid());

            // one responder per participant, the first track wins
            if tracks.twcc.is_none() {
                let responder = self.twcc_factory.create_responder(ssrc);
                let publisher_pc = self.publisher.peer_connection();
                responder.on_feedback(Box::new(move |packet| {
                    let _ = publisher_pc.write_rtcp(std::slice::from_ref(&packet));
                }));
                tracks.twcc = Some(responder);
            }

            (media_track, tracks.twcc.clone(), is_new)
        };

        media_track.add_receiver(receiver, remote, twcc);

        if is_new {
            self.handle_track_published(media_track);
        }
    }

    fn handle_track_published(self: &Arc<Self>, track: Arc<dyn MediaTrack>) {
        track.start();

        let weak = Arc::downgrade(self);
        let closing_track = track.clone();
        track.add_on_close(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.tracks.write().published_tracks.remove(&closing_track.id());
            // only notify while the client is in a ready state
            if inner.is_ready() {
                let participant = inner.participant();
                if let Some(cb) = inner.events.track_updated.lock().as_ref() {
                    cb(participant, closing_track);
                }
            }
        }));

        let participant = self.participant();
        if let Some(cb) = self.events.track_published.lock().as_ref() {
            cb(participant, track);
        }
    }

    fn on_data_channel(self: &Arc<Self>, dc: Arc<dyn DataChannel>) {
        if self.state() == ParticipantState::Disconnected {
            return;
        }
        let label = dc.label();
        match label.as_str() {
            RELIABLE_DC_LABEL => {
                let weak = Arc::downgrade(self);
                dc.on_message(Some(Box::new(move |data| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_data_message(proto::data_packet::Kind::Reliable, data);
                    }
                })));
                *self.reliable_dc.lock() = Some(dc);
            }
            LOSSY_DC_LABEL => {
                let weak = Arc::downgrade(self);
                dc.on_message(Some(Box::new(move |data| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_data_message(proto::data_packet::Kind::Lossy, data);
                    }
                })));
                *self.lossy_dc.lock() = Some(dc);
            }
            _ => {
                log::warn!(
                    "unsupported datachannel added, participant: {}, sid: {}, label: {}",
                    self.identity,
                    self.sid,
                    label
                );
            }
        }
    }

    fn handle_data_message(self: &Arc<Self>, kind: proto::data_packet::Kind, data: &[u8]) {
        let mut packet = match proto::DataPacket::decode(data) {
            Ok(packet) => packet,
            Err(err) => {
                log::warn!("could not parse data packet: {}", err);
                return;
            }
        };

        // trust the channel it came in on as the source of truth
        packet.set_kind(kind);

        // only user payloads are forwarded
        match packet.value.as_mut() {
            Some(proto::data_packet::Value::User(user)) => {
                user.participant_sid = self.sid.to_string();
            }
            _ => {
                log::warn!(
                    "received unsupported data packet, participant: {}, sid: {}",
                    self.identity,
                    self.sid
                );
                return;
            }
        }

        let participant = self.participant();
        if let Some(cb) = self.events.data_packet.lock().as_ref() {
            cb(participant, packet);
        }
    }

    fn on_streamed_tracks_change(&self, update: StreamedTracksUpdate) {
        if update.paused.is_empty() && update.resumed.is_empty() {
            return;
        }

        let to_proto = |tracks: Vec<crate::track::StreamedTrack>| {
            tracks
                .into_iter()
                .map(|t| proto::StreamedTrack {
                    participant_sid: t.participant_sid,
                    track_sid: t.track_sid,
                })
                .collect()
        };

        let _ = self.write_message(proto::SignalResponse::StreamedTracksUpdate(
            proto::StreamedTracksUpdate {
                paused: to_proto(update.paused),
                resumed: to_proto(update.resumed),
            },
        ));
    }

    /// Toggles opus DTX on the SDP answer. Runs after the remote description
    /// is set (transceivers exist) but before the answer is created (tracks
    /// are not attached yet), so the pending audio track cannot be matched to
    /// a specific transceiver; the first pending audio track decides for
    /// every track-less audio transceiver. Ambiguous with more than one
    /// concurrently published audio track.
    fn configure_receiver_dtx(&self) {
        let enable_dtx = {
            let tracks = self.tracks.read();
            let Some(pending) = tracks
                .pending_tracks
                .values()
                .find(|t| t.track_type == proto::TrackType::Audio)
            else {
                return;
            };
            !pending.disable_dtx
        };

        for transceiver in self.publisher.peer_connection().get_transceivers() {
            if transceiver.kind() != proto::TrackType::Audio {
                continue;
            }
            let Some(receiver) = transceiver.receiver() else {
                continue;
            };
            if receiver.has_track() {
                continue;
            }

            let mut codecs = receiver.codec_parameters();
            for codec in &mut codecs {
                if codec.mime_type == MIME_TYPE_OPUS {
                    codec.sdp_fmtp_line = toggle_dtx_fmtp(&codec.sdp_fmtp_line, enable_dtx);
                }
            }

            // set_codec_preferences replaces every codec on the transceiver,
            // the sender codecs have to ride along
            codecs.extend(transceiver.sender_codecs());
            if let Err(err) = transceiver.set_codec_preferences(codecs) {
                log::warn!("failed to set codec preferences: {}", err);
            }
        }
    }

    /// Forwards receiver RTCP to the publisher PC, holding keyframe requests
    /// to the per-SSRC throttle. Exits when the channel or participant
    /// closes.
    async fn rtcp_send_worker(
        self: Arc<Self>,
        mut rtcp_rx: mpsc::Receiver<RtcpBatch>,
        mut close_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                batch = rtcp_rx.recv() => {
                    let Some(packets) = batch else {
                        break;
                    };

                    let mut forwarded: RtcpBatch = Vec::with_capacity(packets.len());
                    for packet in packets {
                        let allowed = if let Some(pli) =
                            packet.as_any().downcast_ref::<PictureLossIndication>()
                        {
                            self.pli_throttle.can_send(pli.media_ssrc)
                        } else if let Some(fir) =
                            packet.as_any().downcast_ref::<FullIntraRequest>()
                        {
                            self.pli_throttle.can_send(fir.media_ssrc)
                        } else {
                            true
                        };
                        if allowed {
                            forwarded.push(packet);
                        }
                    }

                    if !forwarded.is_empty() {
                        if let Err(err) = self.publisher.peer_connection().write_rtcp(&forwarded) {
                            log::error!(
                                "could not write RTCP to participant, participant: {}, sid: {}, error: {}",
                                self.identity,
                                self.sid,
                                err
                            );
                        }
                    }
                }
                _ = close_rx.changed() => break,
            }
        }

        log::debug!("rtcp send worker closed, participant: {}, sid: {}", self.identity, self.sid);
    }

    /// Periodically relays sender reports and source descriptions for every
    /// subscribed track to the subscriber PC, in compound batches.
    async fn down_tracks_rtcp_worker(self: Arc<Self>, mut close_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(DOWN_TRACK_REPORT_INTERVAL) => {}
                _ = close_rx.changed() => break,
            }

            if self.state() == ParticipantState::Disconnected {
                break;
            }
            let subscriber_pc = self.subscriber.peer_connection();
            if subscriber_pc.connection_state() != PeerConnectionState::Connected {
                continue;
            }

            let mut sender_reports = Vec::new();
            let mut chunks = Vec::new();
            {
                let tracks = self.tracks.read();
                for sub_track in tracks.subscribed_tracks.values() {
                    let down_track = sub_track.down_track();
                    let (Some(sr), Some(sd)) = (
                        down_track.create_sender_report(),
                        down_track.create_source_description_chunks(),
                    ) else {
                        continue;
                    };
                    sender_reports.push(sr);
                    chunks.extend(sd);
                }
            }

            for batch in batch_down_track_reports(sender_reports, chunks) {
                if let Err(err) = subscriber_pc.write_rtcp(&batch) {
                    if err == EngineError::Closed {
                        return;
                    }
                    log::error!(
                        "could not send downtrack reports, participant: {}, sid: {}, error: {}",
                        self.identity,
                        self.sid,
                        err
                    );
                }
            }
        }

        log::debug!(
            "downtrack rtcp worker closed, participant: {}, sid: {}",
            self.identity,
            self.sid
        );
    }

    fn debug_info(&self) -> serde_json::Value {
        let tracks = self.tracks.read();

        let mut published = serde_json::Map::new();
        for (sid, track) in &tracks.published_tracks {
            published.insert(
                sid.to_string(),
                serde_json::json!({
                    "kind": format!("{:?}", track.kind()),
                    "pub_muted": track.is_muted(),
                }),
            );
        }

        let mut subscribed = serde_json::Map::new();
        for (sid, track) in &tracks.subscribed_tracks {
            let mut info = track.down_track().debug_info();
            if let Some(map) = info.as_object_mut() {
                map.insert("sub_muted".to_owned(), track.is_muted().into());
            }
            subscribed.insert(sid.to_string(), info);
        }

        let mut pending = serde_json::Map::new();
        for (cid, info) in &tracks.pending_tracks {
            pending.insert(
                cid.clone(),
                serde_json::json!({
                    "sid": info.sid,
                    "type": format!("{:?}", info.track_type),
                    "simulcast": info.simulcast,
                }),
            );
        }

        serde_json::json!({
            "sid": self.sid.to_string(),
            "identity": self.identity,
            "state": format!("{:?}", self.state()),
            "published_tracks": published,
            "subscribed_tracks": subscribed,
            "pending_tracks": pending,
        })
    }
}

// lookup helpers, called with the track lock held

fn get_published_track_by_signal_cid(
    tracks: &TrackState,
    client_id: &str,
) -> Option<Arc<dyn MediaTrack>> {
    tracks.published_tracks.values().find(|t| t.signal_cid() == client_id).cloned()
}

fn get_published_track_by_sdp_cid(
    tracks: &TrackState,
    client_id: &str,
) -> Option<Arc<dyn MediaTrack>> {
    tracks.published_tracks.values().find(|t| t.sdp_cid() == client_id).cloned()
}

/// Resolves the publication a remote track belongs to. The media-stream-track
/// id can change between the publish request and the SDP negotiation, so a
/// miss falls back to the first pending entry of the same kind.
fn get_pending_track(
    tracks: &TrackState,
    client_id: &str,
    kind: proto::TrackType,
) -> Option<(String, proto::TrackInfo)> {
    if let Some(info) = tracks.pending_tracks.get(client_id) {
        return Some((client_id.to_owned(), info.clone()));
    }

    tracks
        .pending_tracks
        .iter()
        .find(|(_, info)| info.track_type == kind)
        .map(|(cid, info)| (cid.clone(), info.clone()))
}

fn toggle_dtx_fmtp(fmtp: &str, enable: bool) -> String {
    const FMTP_USE_DTX: &str = "usedtx=1";
    // strip occurrences in the middle, then at the end
    let line = fmtp.replace("usedtx=1;", "").replace(FMTP_USE_DTX, "");
    if enable {
        format!("{line};{FMTP_USE_DTX}")
    } else {
        line
    }
}

/// Packs sender reports and SDES chunks into compound batches of at most
/// [`SD_BATCH_SIZE`] entries: reports first, then as many chunks as the
/// remaining budget of the compound allows, until both queues drain.
fn batch_down_track_reports(
    mut sender_reports: Vec<SenderReport>,
    mut chunks: Vec<SourceDescriptionChunk>,
) -> Vec<RtcpBatch> {
    let mut batches = Vec::new();
    while !sender_reports.is_empty() || !chunks.is_empty() {
        let mut packets: RtcpBatch = Vec::new();

        let num_srs = sender_reports.len().min(SD_BATCH_SIZE);
        for sr in sender_reports.drain(..num_srs) {
            packets.push(Box::new(sr));
        }

        let space_remaining = SD_BATCH_SIZE - num_srs;
        if space_remaining > 0 && !chunks.is_empty() {
            let size = chunks.len().min(space_remaining);
            packets.push(Box::new(SourceDescription {
                chunks: chunks.drain(..size).collect(),
            }));
        }

        batches.push(packets);
    }
    batches
}
