//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use sitewatch::error::{Result, WatchError};
use sitewatch::graph::ChannelId;
use sitewatch::monitor::{ConditionalRequest, HttpProbe, ProbeResponse};
use sitewatch::notify::Deliver;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Per-url queues of canned responses. Clones share the script.
#[derive(Clone, Default)]
pub struct ScriptedProbe {
    responses: Arc<Mutex<HashMap<String, VecDeque<Result<ProbeResponse>>>>>,
    requests: Arc<Mutex<Vec<ConditionalRequest>>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next answer for `url`.
    pub fn respond(&self, url: &str, response: ProbeResponse) {
        self.push(url, Ok(response));
    }

    /// Queue a transport failure for `url`.
    pub fn fail(&self, url: &str) {
        self.push(url, Err(WatchError::Http(format!("{url}: timed out"))));
    }

    fn push(&self, url: &str, response: Result<ProbeResponse>) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<ConditionalRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self, url: &str) -> Option<ConditionalRequest> {
        self.requests().into_iter().rev().find(|r| r.url == url)
    }
}

#[async_trait]
impl HttpProbe for ScriptedProbe {
    async fn fetch(&self, request: &ConditionalRequest) -> Result<ProbeResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .get_mut(&request.url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(WatchError::Http(format!("{}: no script", request.url))))
    }
}

/// Records every delivered message. Clones share the record.
#[derive(Clone, Default)]
pub struct RecordingDelivery {
    sent: Arc<Mutex<Vec<(ChannelId, String)>>>,
    refused: Arc<Mutex<HashSet<ChannelId>>>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries to `channel` fail.
    pub fn refuse(&self, channel: ChannelId) {
        self.refused.lock().unwrap().insert(channel);
    }

    pub fn sent(&self) -> Vec<(ChannelId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<(ChannelId, String)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

#[async_trait]
impl Deliver for RecordingDelivery {
    async fn deliver(&self, channel: ChannelId, text: String) -> Result<()> {
        if self.refused.lock().unwrap().contains(&channel) {
            return Err(WatchError::Delivery(format!("channel {channel} is gone")));
        }
        self.sent.lock().unwrap().push((channel, text));
        Ok(())
    }
}
