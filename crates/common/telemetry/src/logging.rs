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

use std::{env, io::IsTerminal, sync::Once};

use bon::Builder;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{filter, layer::SubscriberExt as _, prelude::*, EnvFilter, Registry};

/// Global handle for dynamically reloading log levels at runtime, populated
/// once `init_global_logging` runs.
pub static RELOAD_HANDLE: OnceCell<tracing_subscriber::reload::Handle<filter::Targets, Registry>> = OnceCell::new();

/// Configuration for the logging subsystem: where logs go and how they're
/// formatted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for rotated log files. Empty means stdout only.
    #[default = ""]
    pub dir: String,

    /// Filter string (`"info"`, `"debug,reqwest=warn"`, ...). Falls back to
    /// `RUST_LOG`, then `"info"`.
    pub level: Option<String>,

    /// Output format for stdout and file logs.
    pub log_format: LogFormat,

    /// Rotated log files to retain before the oldest is deleted.
    #[default = 168]
    pub max_log_files: usize,

    /// Also log to stdout in addition to any configured file directory.
    #[default = true]
    pub append_stdout: bool,
}

/// Output format for log lines.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Structured JSON, one object per line.
    Json,
    /// Human-readable text.
    #[default]
    Text,
}

const DEFAULT_LOG_TARGETS: &str = "info";

/// Initializes logging with the given options. Guards must be held for the
/// life of the process; dropping them stops the background writer threads.
/// Safe to call more than once: only the first call takes effect.
#[allow(clippy::print_stdout)]
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Vec<WorkerGuard> {
    static START: Once = Once::new();
    let mut guards = vec![];

    START.call_once(|| {
        LogTracer::init().expect("log tracer must be valid");

        let stdout_layer = opts.append_stdout.then(|| {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            guards.push(guard);
            if opts.log_format == LogFormat::Json {
                tracing_subscriber::fmt::Layer::new()
                    .json()
                    .with_writer(writer)
                    .with_ansi(std::io::stdout().is_terminal())
                    .boxed()
            } else {
                tracing_subscriber::fmt::Layer::new()
                    .with_writer(writer)
                    .with_ansi(std::io::stdout().is_terminal())
                    .boxed()
            }
        });

        let file_layer = (!opts.dir.is_empty()).then(|| {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(app_name.to_string())
                .max_log_files(opts.max_log_files)
                .build(&opts.dir)
                .unwrap_or_else(|e| panic!("initializing log directory {} failed: {e}", opts.dir));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            if opts.log_format == LogFormat::Json {
                tracing_subscriber::fmt::Layer::new()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .boxed()
            } else {
                tracing_subscriber::fmt::Layer::new().with_writer(writer).with_ansi(false).boxed()
            }
        });

        let filter = opts
            .level
            .as_deref()
            .or(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
            .unwrap_or(DEFAULT_LOG_TARGETS)
            .parse::<filter::Targets>()
            .expect("error parsing log level string");

        let (dyn_filter, reload_handle) = tracing_subscriber::reload::Layer::new(filter);
        let _ = RELOAD_HANDLE.set(reload_handle);

        let subscriber = Registry::default().with(dyn_filter).with(stdout_layer).with(file_layer);
        tracing::subscriber::set_global_default(subscriber).expect("setting global tracing subscriber failed");
    });

    guards
}

/// Initializes logging with default options: stdout only, text format,
/// `info` level unless `RUST_LOG` says otherwise.
#[must_use]
pub fn init_tracing_subscriber(app_name: &str) -> Vec<WorkerGuard> { init_global_logging(app_name, &LoggingOptions::default()) }
