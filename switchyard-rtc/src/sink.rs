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

use switchyard_protocol::SignalResponse;

use crate::errors::EngineError;

/// Outbound signaling channel to one participant. Implementations serialize
/// writes internally; the participant calls `write_message` from many tasks.
pub trait MessageSink: Send + Sync {
    fn write_message(&self, msg: SignalResponse) -> Result<(), EngineError>;
    fn close(&self);
}
