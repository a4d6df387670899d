// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! Asynchronous HTTP dispatch to the duty-cycle controller (spec §4.3 "HTTP
//! dispatch", spec §6 "HTTP API consumed by the detector").
//!
//! The audio loop must never block on HTTP (spec §5). Requests are spawned
//! onto a bounded-concurrency pool (4 outstanding at a time, mirroring the
//! original's `FuturesSession(max_workers=4)`) and tracked in a FIFO of
//! `(handle, countdown)` pairs. `tick()` is called once per audio frame: it
//! decrements every countdown and, once the oldest request's deadline has
//! elapsed, inspects (but never *waits on*) its result — by then the
//! `timeout + 1s` margin guarantees the task has already finished.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{error, info};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Maximum number of outstanding controller requests (spec §4.3, §5).
pub const MAX_CONCURRENT_REQUESTS: usize = 4;

/// Maximum number of retries of the single most recent failed request
/// (spec §4.3 "at most 2"; spec §7 "bounded attempts").
pub const MAX_RETRIES: u32 = 2;

/// Attempts made against `/enable` at startup before giving up (spec §4.3:
/// mirrors the original's `attempts_left = 3` startup probe).
const ENABLE_ATTEMPTS: u32 = 3;
const ENABLE_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(2);

type RequestOutcome = Result<u16, String>;

struct Pending {
    handle: JoinHandle<RequestOutcome>,
    countdown: i64,
}

/// Dispatches `setduty`/`enable` requests to the controller without ever
/// blocking the caller's frame loop.
pub struct Dispatcher {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
    base_url: String,
    semaphore: Arc<Semaphore>,
    pending: VecDeque<Pending>,
    countdown_frames: i64,
    attempts_left: u32,
    current_duty: Option<f64>,
}

impl Dispatcher {
    /// `chunk_duration_s` is the duration of one audio frame; the inspection
    /// deadline is `ceil((timeout + 1) / chunk_duration)` frames (spec §4.3).
    pub fn new(base_url: String, timeout_s: u64, chunk_duration_s: f64) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(MAX_CONCURRENT_REQUESTS)
            .enable_all()
            .build()?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_s))
            .build()
            .expect("reqwest client with a fixed timeout never fails to build");
        let countdown_frames = (((timeout_s + 1) as f64) / chunk_duration_s).ceil() as i64;
        Ok(Dispatcher {
            runtime,
            client,
            base_url,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
            pending: VecDeque::new(),
            countdown_frames,
            attempts_left: MAX_RETRIES,
            current_duty: None,
        })
    }

    /// Call `/enable` once at startup, retrying a few times with a short
    /// delay on connection failure (spec §4.3, Open Questions: periodic
    /// re-enable is a deliberate non-requirement, so this runs exactly once
    /// per process lifetime).
    pub fn enable(&self) {
        let url = format!("{}/enable?basic=1", self.base_url);
        let client = self.client.clone();
        self.runtime.block_on(async move {
            let mut attempts = ENABLE_ATTEMPTS;
            loop {
                match client.get(&url).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        info!("successfully enabled the controller");
                        return;
                    }
                    Ok(resp) => {
                        error!("test request to controller failed with status {}", resp.status());
                    }
                    Err(err) => {
                        error!("the controller may be down? {err}");
                    }
                }
                attempts -= 1;
                error!("attempts left: {attempts}");
                if attempts == 0 {
                    break;
                }
                tokio::time::sleep(ENABLE_RETRY_DELAY).await;
            }
        });
    }

    fn spawn_setduty(&mut self, duty: f64) {
        let url = format!("{}/setduty?d={:.2}&basic=1", self.base_url, duty);
        let client = self.client.clone();
        let permit = self.semaphore.clone();
        let handle = self.runtime.spawn(async move {
            let _permit = permit.acquire_owned().await.expect("semaphore is never closed");
            match client.get(&url).send().await {
                Ok(resp) => Ok(resp.status().as_u16()),
                Err(err) => Err(err.to_string()),
            }
        });
        self.pending.push_back(Pending {
            handle,
            countdown: self.countdown_frames,
        });
    }

    /// Queue a `setduty` request for `duty` percent (spec §4.3, §6).
    pub fn request_duty(&mut self, duty: f64) {
        self.current_duty = Some(duty);
        self.attempts_left = MAX_RETRIES;
        self.spawn_setduty(duty);
    }

    /// Advance the per-frame bookkeeping: decrement every pending request's
    /// countdown, and if the oldest one has reached its inspection deadline,
    /// check its result (retrying the most recent duty once on failure, spec
    /// §4.3 "Retry with at-most-once intent"). Call exactly once per frame.
    pub fn tick(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        for p in self.pending.iter_mut() {
            p.countdown -= 1;
        }
        if self.pending.front().map(|p| p.countdown).unwrap_or(1) >= 1 {
            return;
        }
        let finished = self.pending.pop_front().unwrap();
        let outcome = self.runtime.block_on(finished.handle);
        let success = match outcome {
            Ok(Ok(status)) if status == 200 => true,
            Ok(Ok(status)) => {
                error!("request to controller failed with status {status}");
                false
            }
            Ok(Err(err)) => {
                error!("could not connect to controller: {err}");
                false
            }
            Err(join_err) => {
                error!("controller request task panicked: {join_err}");
                false
            }
        };
        if !success && self.pending.is_empty() && self.attempts_left > 0 {
            if let Some(duty) = self.current_duty {
                info!("retrying the request, {} attempts left", self.attempts_left);
                self.attempts_left -= 1;
                self.spawn_setduty(duty);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_frames_rounds_up_from_timeout_plus_one() {
        let d = Dispatcher::new("http://127.0.0.1:1".into(), 4, 1024.0 / 44100.0).unwrap();
        // (4+1) / (1024/44100) = 5 / 0.02322... = 215.33 -> ceil 216
        assert_eq!(d.countdown_frames, 216);
    }
}
