use crate::config::IceServers;
use crate::logger::dump_candidate;
use crate::peer::types::NetworkCandidate;
use crate::utils::add_ice_url_scheme;
use std::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;

/// Converts configured servers into webrtc ICE servers
pub fn ice_servers(servers: &IceServers) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Remote candidates received before a remote description was set
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: Mutex<Vec<RTCIceCandidateInit>>,
}

impl PendingCandidates {
    pub fn push(&self, candidate: RTCIceCandidateInit) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push(candidate);
        }
    }

    pub fn take(&self) -> Vec<RTCIceCandidateInit> {
        match self.queue.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies all queued candidates once the remote description is in place
pub async fn apply_pending_candidates(pc: &RTCPeerConnection, pending: &PendingCandidates) {
    for candidate in pending.take() {
        debug!(candidate = %candidate.candidate, "applying queued remote candidate");
        if let Err(e) = pc.add_ice_candidate(candidate).await {
            warn!("failed to apply queued candidate: {e}");
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[NetworkCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    info!(
        "candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );

    if summary.relay == 0 {
        warn!("no TURN relay candidates gathered; connections through symmetric NAT may fail");
    }
    summary
}

/// Logs and records a locally gathered candidate
pub fn record_local_candidate(
    gathered: &Mutex<Vec<NetworkCandidate>>,
    candidate: &NetworkCandidate,
) -> usize {
    dump_candidate("LOCAL", candidate);
    match gathered.lock() {
        Ok(mut list) => {
            list.push(candidate.clone());
            list.len()
        }
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IceServerConfig, IceServerKind};

    fn candidate(line: &str) -> NetworkCandidate {
        NetworkCandidate {
            candidate: line.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn counts_candidate_types() {
        let summary = analyze_candidates(&[
            candidate("candidate:1 1 udp 2122260223 10.0.0.2 54400 typ host"),
            candidate("candidate:2 1 udp 1686052607 203.0.113.7 54400 typ srflx raddr 10.0.0.2"),
            candidate("candidate:3 1 udp 1686052607 203.0.113.7 54401 typ srflx raddr 10.0.0.2"),
            candidate("candidate:4 1 udp 41885439 198.51.100.1 3478 typ relay raddr 0.0.0.0"),
        ]);
        assert_eq!(
            summary,
            CandidateSummary {
                host: 1,
                srflx: 2,
                relay: 1
            }
        );
    }

    #[test]
    fn turn_credentials_carried_over() {
        let servers = IceServers(vec![IceServerConfig {
            id: None,
            kind: IceServerKind::Turn,
            url: "turn.example.org:3478".into(),
            username: Some("ana".into()),
            credential: Some("pw".into()),
        }]);
        let converted = ice_servers(&servers);
        assert_eq!(converted[0].urls, vec!["turn:turn.example.org:3478".to_string()]);
        assert_eq!(converted[0].username, "ana");
        assert_eq!(converted[0].credential, "pw");
    }

    #[test]
    fn pending_candidates_drain_in_order() {
        let pending = PendingCandidates::default();
        for n in 0..3 {
            pending.push(RTCIceCandidateInit {
                candidate: format!("candidate:{n}"),
                ..Default::default()
            });
        }
        assert_eq!(pending.len(), 3);
        let drained: Vec<_> = pending.take().into_iter().map(|c| c.candidate).collect();
        assert_eq!(drained, vec!["candidate:0", "candidate:1", "candidate:2"]);
        assert!(pending.is_empty());
    }
}
