// Copyright 2025 egafetch contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Renders one `indicatif` progress bar per in-flight file under a shared
//! `MultiProgress`, keyed by file id.

use std::{collections::HashMap, sync::Mutex};

use egafetch_engine::{FileStatus, ProgressSink};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Fan-in for the engine's per-chunk byte callbacks, rendered as a bar per
/// file plus an aggregate.
pub struct IndicatifProgress {
    multi: MultiProgress,
    bars:  Mutex<HashMap<String, ProgressBar>>,
    style: ProgressStyle,
}

impl IndicatifProgress {
    #[must_use]
    pub fn new() -> Self {
        let style = ProgressStyle::with_template(
            "{prefix:.bold} {bar:32.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            style,
        }
    }

    fn bar_for(&self, file_id: &str) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        bars.entry(file_id.to_string())
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(0));
                bar.set_style(self.style.clone());
                bar.set_prefix(file_id.to_string());
                bar
            })
            .clone()
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self { Self::new() }
}

impl ProgressSink for IndicatifProgress {
    fn file_started(&self, file_id: &str, file_name: &str, total: u64) {
        let bar = self.bar_for(file_id);
        bar.set_length(total);
        bar.set_position(0);
        bar.set_prefix(file_name.to_string());
    }

    fn bytes_advanced(&self, file_id: &str, delta: u64) {
        let bar = self.bar_for(file_id);
        bar.inc(delta);
    }

    fn file_status_changed(&self, file_id: &str, status: FileStatus) {
        let bar = self.bar_for(file_id);
        bar.set_message(status.to_string());
    }

    fn file_finished(&self, file_id: &str, error: Option<&str>) {
        let mut bars = self.bars.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(bar) = bars.remove(file_id) {
            match error {
                None => bar.finish_with_message("done"),
                Some(message) => bar.abandon_with_message(message.to_string()),
            }
        }
    }

    fn file_skipped(&self, file_id: &str, file_name: &str) {
        let bar = self.bar_for(file_id);
        bar.set_prefix(file_name.to_string());
        bar.finish_with_message("already complete, skipped");
    }
}
