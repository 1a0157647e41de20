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

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use log::{debug, error};
use parking_lot::Mutex;
use switchyard_protocol as proto;
use tokio::sync::Mutex as AsyncMutex;

use crate::errors::{RtcError, RtcResult};
use crate::id::TrackSid;
use crate::rtc::{
    IceCandidateInit, IceConnectionState, OfferOptions, PeerConnection, SessionDescription,
    SignalingState,
};
use crate::track::{StreamedTracksUpdate, SubscribedTrack};

pub type OnOfferCreated = Box<dyn FnMut(SessionDescription) + Send + Sync>;
pub type OnStreamedTracksChange = Box<dyn FnMut(StreamedTracksUpdate) + Send + Sync>;

struct TransportInner {
    pending_candidates: Vec<IceCandidateInit>,
    renegotiate: bool,
}

/// One half of a participant's transport pair: the peer connection plus the
/// negotiation bookkeeping that cannot live in the engine (candidate queueing
/// before the remote description arrives, deferred renegotiation, and the
/// subscriber-side down-track registry).
pub struct PeerTransport {
    target: proto::SignalTarget,
    peer_connection: Arc<dyn PeerConnection>,
    on_offer_handler: Mutex<Option<OnOfferCreated>>,
    on_streamed_tracks_handler: Mutex<Option<OnStreamedTracksChange>>,
    down_tracks: Mutex<HashMap<TrackSid, Arc<dyn SubscribedTrack>>>,
    inner: Arc<AsyncMutex<TransportInner>>,
}

impl Debug for PeerTransport {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.debug_struct("PeerTransport").field("target", &self.target).finish()
    }
}

impl PeerTransport {
    pub fn new(peer_connection: Arc<dyn PeerConnection>, target: proto::SignalTarget) -> Self {
        Self {
            target,
            peer_connection,
            on_offer_handler: Mutex::new(None),
            on_streamed_tracks_handler: Mutex::new(None),
            down_tracks: Mutex::new(HashMap::new()),
            inner: Arc::new(AsyncMutex::new(TransportInner {
                pending_candidates: Vec::default(),
                renegotiate: false,
            })),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.peer_connection.ice_connection_state(),
            IceConnectionState::Connected | IceConnectionState::Completed
        )
    }

    pub fn peer_connection(&self) -> Arc<dyn PeerConnection> {
        self.peer_connection.clone()
    }

    pub fn target(&self) -> proto::SignalTarget {
        self.target
    }

    pub fn on_offer(&self, handler: Option<OnOfferCreated>) {
        *self.on_offer_handler.lock() = handler;
    }

    pub fn on_streamed_tracks_change(&self, handler: Option<OnStreamedTracksChange>) {
        *self.on_streamed_tracks_handler.lock() = handler;
    }

    pub fn close(&self) {
        self.peer_connection.close();
    }

    /// Queues candidates that arrive before the remote description.
    pub async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> RtcResult<()> {
        let mut inner = self.inner.lock().await;

        if self.peer_connection.remote_description().is_some() {
            drop(inner);
            self.peer_connection
                .add_ice_candidate(candidate)
                .await
                .map_err(|err| RtcError::transport("add ice candidate", err))?;

            return Ok(());
        }

        inner.pending_candidates.push(candidate);
        Ok(())
    }

    pub async fn set_remote_description(
        &self,
        remote_description: SessionDescription,
    ) -> RtcResult<()> {
        let mut inner = self.inner.lock().await;

        self.peer_connection
            .set_remote_description(remote_description)
            .await
            .map_err(|err| RtcError::transport("set remote description", err))?;

        for candidate in inner.pending_candidates.drain(..) {
            self.peer_connection
                .add_ice_candidate(candidate)
                .await
                .map_err(|err| RtcError::transport("add ice candidate", err))?;
        }

        if inner.renegotiate {
            inner.renegotiate = false;
            drop(inner);
            self.create_and_send_offer(OfferOptions::default()).await?;
        }

        Ok(())
    }

    /// Requests a fresh offer from the engine and hands it to the offer
    /// handler. A negotiation requested while a local offer is outstanding is
    /// deferred until the answer lands.
    pub async fn create_and_send_offer(&self, options: OfferOptions) -> RtcResult<()> {
        let mut inner = self.inner.lock().await;

        if self.peer_connection.signaling_state() == SignalingState::HaveLocalOffer {
            if options.ice_restart {
                debug!("restarting ICE, target: {:?}", self.target);
                if let Some(remote_description) = self.peer_connection.remote_description() {
                    self.peer_connection
                        .set_remote_description(remote_description)
                        .await
                        .map_err(|err| RtcError::transport("set remote description", err))?;
                } else {
                    error!("trying to restart ICE when the pc doesn't have remote description");
                }
            } else {
                inner.renegotiate = true;
                return Ok(());
            }
        }

        let offer = self
            .peer_connection
            .create_offer(options)
            .await
            .map_err(|err| RtcError::transport("create offer", err))?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|err| RtcError::transport("set local description", err))?;

        if let Some(handler) = self.on_offer_handler.lock().as_mut() {
            handler(offer);
        }

        Ok(())
    }

    pub fn add_track(&self, track: Arc<dyn SubscribedTrack>) {
        self.down_tracks.lock().insert(track.id(), track);
    }

    pub fn remove_track(&self, track: &Arc<dyn SubscribedTrack>) {
        self.down_tracks.lock().remove(&track.id());
    }

    /// Invoked by the engine when forwarding is paused or resumed for any of
    /// the registered down tracks.
    pub fn handle_streamed_tracks_update(&self, update: StreamedTracksUpdate) {
        if let Some(handler) = self.on_streamed_tracks_handler.lock().as_mut() {
            handler(update);
        }
    }
}
