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

use std::time::Duration;

use serde::Deserialize;

/// Minimum interval between forwarded PLI/FIR per simulcast quality tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PliThrottleConfig {
    pub low_quality: Duration,
    pub mid_quality: Duration,
    pub high_quality: Duration,
}

impl Default for PliThrottleConfig {
    fn default() -> Self {
        Self {
            low_quality: Duration::from_millis(500),
            mid_quality: Duration::from_secs(1),
            high_quality: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Level below which a participant is considered active, 0-127 scale
    /// where lower is louder.
    pub active_level: u8,
    /// Percentile of frames that must be active within an interval.
    pub min_percentile: u8,
    pub update_interval: Duration,
    /// Number of intervals smoothed when reporting levels.
    pub smooth_intervals: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            active_level: 30,
            min_percentile: 40,
            update_interval: Duration::from_millis(400),
            smooth_intervals: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub packet_buffer_size: usize,
    pub max_bitrate: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self { packet_buffer_size: 500, max_bitrate: 3 * 1024 * 1024 }
    }
}
