// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Background driver for channel progress.
//!
//! Each registered channel gets a tokio task that repeatedly progresses it for
//! one work slice and then reaps completed stream fences. A task that found
//! nothing to do sleeps for [`IDLE_INTERVAL`] before trying again.
//!
//! Device errors are not recoverable: the task logs them and aborts the
//! process.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::channel::Channel;
use crate::engine::DmaEngine;
use crate::stream::StreamTable;
use crate::time::TimeLimit;

/// Sleep between polls of an idle channel.
pub const IDLE_INTERVAL: Duration = Duration::from_millis(1);

/// Drives channels on the current tokio runtime.
#[derive(Debug)]
pub struct BackgroundWorkManager {
    streams: Arc<StreamTable>,
    work_slice: Duration,
    cancel_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundWorkManager {
    pub fn new(streams: Arc<StreamTable>, work_slice: Duration) -> Self {
        Self {
            streams,
            work_slice,
            cancel_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// A manager driving every channel of `engine`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(engine: &DmaEngine) -> Self {
        let manager = Self::new(engine.streams().clone(), engine.config().work_slice());
        for channel in engine.channels() {
            manager.register(channel.clone());
        }
        manager
    }

    /// Start driving `channel`.
    pub fn register(&self, channel: Arc<Channel>) {
        let task = tokio::spawn(drive_channel(
            channel,
            self.streams.clone(),
            self.work_slice,
            self.cancel_token.child_token(),
        ));
        self.tasks.lock().push(task);
    }

    /// Stop every task and wait for them to exit.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!("dma background task failed: {e}");
            }
        }
    }
}

impl Drop for BackgroundWorkManager {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn drive_channel(
    channel: Arc<Channel>,
    streams: Arc<StreamTable>,
    work_slice: Duration,
    cancel_token: CancellationToken,
) {
    let mut interval = tokio::time::interval(IDLE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    debug!(channel = %channel.kind(), device = channel.device(), "channel driver started");

    loop {
        let did_work = match channel.progress(&TimeLimit::relative(work_slice)) {
            Ok(did_work) => did_work,
            Err(e) => {
                error!(
                    channel = %channel.kind(),
                    device = channel.device(),
                    "fatal device error during progress: {e}"
                );
                std::process::abort();
            }
        };

        if let Err(e) = streams.reap_completions() {
            error!("fatal device error while polling completions: {e}");
            std::process::abort();
        }

        if did_work {
            tokio::task::yield_now().await;
            if cancel_token.is_cancelled() {
                break;
            }
            continue;
        }

        tokio::select! {
            _ = interval.tick() => {}
            _ = cancel_token.cancelled() => {
                break;
            }
        }
    }

    debug!(channel = %channel.kind(), device = channel.device(), "channel driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DmaConfig;
    use crate::descriptor::DescriptorRequest;
    use crate::device::HostBackend;
    use crate::port::PortSpec;
    use crate::testing;
    use dynamo_memory::{StorageKind, SystemStorage, create_buffer};

    #[tokio::test]
    async fn test_background_progress_completes_transfer() {
        let backend = HostBackend::new(1);
        let config = DmaConfig::builder().min_copy_chunk_bytes(0).build().unwrap();
        let engine = DmaEngine::new(Arc::new(backend), config).unwrap();
        let manager = BackgroundWorkManager::start(&engine);

        let src = create_buffer(SystemStorage::emulating(8192, StorageKind::Pinned).unwrap());
        let dst = create_buffer(SystemStorage::emulating(8192, StorageKind::Device(0)).unwrap());
        testing::fill_sequence(&src);

        let xd = engine
            .create_descriptor(DescriptorRequest::copy(
                PortSpec::whole(src.clone()).unwrap(),
                PortSpec::whole(dst.clone()).unwrap(),
            ))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(10), xd.wait_done())
            .await
            .expect("transfer did not finish");
        assert_eq!(xd.bytes_written(0), 8192);
        assert_eq!(testing::read_bytes(&dst), testing::read_bytes(&src));

        manager.shutdown().await;
    }
}
