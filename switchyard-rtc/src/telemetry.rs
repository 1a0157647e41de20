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

use std::sync::LazyLock;

use prometheus::{register_counter_vec, CounterVec};

/// Counts signaling operations by (operation, outcome, failure phase).
/// The failure phase is empty on success.
pub static SERVICE_OPERATION_COUNTER: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter_vec!(
        "switchyard_service_operation_total",
        "Signaling operations performed by participants",
        &["type", "status", "error_type"]
    )
    .expect("failed to register SERVICE_OPERATION_COUNTER")
});

pub(crate) fn count_success(operation: &str) {
    SERVICE_OPERATION_COUNTER.with_label_values(&[operation, "success", ""]).inc();
}

pub(crate) fn count_error(operation: &str, phase: &str) {
    SERVICE_OPERATION_COUNTER.with_label_values(&[operation, "error", phase]).inc();
}
