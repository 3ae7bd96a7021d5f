//! 피어 테스트용 기록 트랜스포트

use super::transport::{CandidateSink, LocalMedia, MediaTransport, TransportFactory};
use crate::error::TransportError;
use crate::protocol::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
    Attach(String),
    Detach,
    Close,
}

pub struct FakeTransport {
    remote_id: String,
    calls: Mutex<Vec<Call>>,
    offers: AtomicUsize,
    fail_remote: AtomicBool,
}

impl FakeTransport {
    pub fn new(remote_id: &str) -> Self {
        Self {
            remote_id: remote_id.to_string(),
            calls: Mutex::new(Vec::new()),
            offers: AtomicUsize::new(0),
            fail_remote: AtomicBool::new(false),
        }
    }

    pub fn fail_remote_descriptions(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SetRemote(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AddCandidate(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.calls().contains(&Call::Close)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.record(Call::CreateOffer);
        let n = self.offers.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(format!("offer-{}-{n}", self.remote_id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.record(Call::CreateAnswer);
        Ok(SessionDescription::answer(format!("answer-{}", self.remote_id)))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        self.record(Call::SetLocal(description));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(TransportError::new("remote description rejected"));
        }
        self.record(Call::SetRemote(description));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.record(Call::AddCandidate(candidate));
        Ok(())
    }

    fn attach_local_media(&self, media: &LocalMedia) {
        self.record(Call::Attach(media.stream_id.clone()));
    }

    fn detach_local_media(&self) {
        self.record(Call::Detach);
    }

    async fn close(&self) {
        self.record(Call::Close);
    }
}

#[derive(Default)]
pub struct FakeFactory {
    transports: Mutex<HashMap<String, Arc<FakeTransport>>>,
    sinks: Mutex<HashMap<String, CandidateSink>>,
    fail_remote_for: Mutex<Vec<String>>,
    creations: AtomicUsize,
}

impl FakeFactory {
    pub fn transport(&self, remote_id: &str) -> Arc<FakeTransport> {
        self.transports
            .lock()
            .unwrap()
            .get(remote_id)
            .cloned()
            .unwrap_or_else(|| panic!("no transport created for {remote_id}"))
    }

    pub fn sink(&self, remote_id: &str) -> CandidateSink {
        self.sinks.lock().unwrap()[remote_id].clone()
    }

    /// 지금까지 생성된 트랜스포트 수 (중복 포함)
    pub fn created(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    /// `remote_id`용 트랜스포트가 원격 디스크립션을 거부하도록 설정
    pub fn fail_remote_for(&self, remote_id: &str) {
        self.fail_remote_for
            .lock()
            .unwrap()
            .push(remote_id.to_string());
    }
}

impl TransportFactory for FakeFactory {
    fn create(
        &self,
        remote_id: &str,
        candidates: CandidateSink,
    ) -> Result<Arc<dyn MediaTransport>, TransportError> {
        self.creations.fetch_add(1, Ordering::SeqCst);
        let transport = Arc::new(FakeTransport::new(remote_id));
        if self
            .fail_remote_for
            .lock()
            .unwrap()
            .iter()
            .any(|id| id == remote_id)
        {
            transport.fail_remote_descriptions();
        }
        self.transports
            .lock()
            .unwrap()
            .insert(remote_id.to_string(), transport.clone());
        self.sinks
            .lock()
            .unwrap()
            .insert(remote_id.to_string(), candidates);
        Ok(transport)
    }
}
