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
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::PliThrottleConfig;

const FULL_RESOLUTION: &str = "f";
const HALF_RESOLUTION: &str = "h";
const QUARTER_RESOLUTION: &str = "q";

struct TrackEntry {
    interval: Duration,
    last_sent: Option<Instant>,
}

/// Rate-limits keyframe requests (PLI/FIR) per SSRC. State is bounded by the
/// number of registered SSRCs; requests for unknown SSRCs pass through.
pub(crate) struct PliThrottle {
    config: PliThrottleConfig,
    tracks: Mutex<HashMap<u32, TrackEntry>>,
}

impl PliThrottle {
    pub(crate) fn new(config: PliThrottleConfig) -> Self {
        Self { config, tracks: Mutex::new(HashMap::new()) }
    }

    pub(crate) fn add_track(&self, ssrc: u32, rid: &str) {
        let interval = match rid {
            QUARTER_RESOLUTION => self.config.low_quality,
            HALF_RESOLUTION => self.config.mid_quality,
            FULL_RESOLUTION => self.config.high_quality,
            _ => self.config.mid_quality,
        };
        self.tracks.lock().insert(ssrc, TrackEntry { interval, last_sent: None });
    }

    pub(crate) fn can_send(&self, ssrc: u32) -> bool {
        let mut tracks = self.tracks.lock();
        let Some(entry) = tracks.get_mut(&ssrc) else {
            return true;
        };

        let now = Instant::now();
        match entry.last_sent {
            Some(last) if now.duration_since(last) <= entry.interval => false,
            _ => {
                entry.last_sent = Some(now);
                true
            }
        }
    }
}
