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

/// Capability vector negotiated at connection time. Clients advertise the
/// highest version they speak; the server only relies on monotonic checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolVersion(pub u32);

/// Highest protocol version this server speaks.
pub const CURRENT_PROTOCOL: ProtocolVersion = ProtocolVersion(3);

impl ProtocolVersion {
    /// Clients at this version or later drive the connection through the
    /// subscriber peer connection.
    pub fn subscriber_as_primary(&self) -> bool {
        self.0 >= 3
    }

    /// Handles its own speaker updates over the data channel.
    pub fn handles_data_packets(&self) -> bool {
        self.0 >= 2
    }
}
