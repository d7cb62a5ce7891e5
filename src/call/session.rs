//! Aggregate state of one call

use crate::events::{CallKind, ParticipantId};
use crate::peer::PeerSession;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Who placed an incoming call
#[derive(Debug, Clone)]
pub struct CallerInfo {
    /// Caller identity
    pub id: ParticipantId,
    /// Caller display name
    pub name: String,
}

/// The aggregate root of one call: room, kind, and the peer sessions keyed
/// by participant id.
///
/// Peer sessions are keyed by participant id with replace-on-duplicate
/// semantics; exactly one session exists per `(room, peer)` pair at any time.
/// The map is empty outside the active and ending stages.
pub struct CallSession {
    room_id: String,
    kind: CallKind,
    caller: Option<CallerInfo>,
    roster: Vec<ParticipantId>,
    started_at: Option<Instant>,
    participants: HashMap<ParticipantId, Arc<PeerSession>>,
}

impl CallSession {
    /// A call this side is placing
    pub fn outgoing(room_id: String, kind: CallKind) -> Self {
        Self {
            room_id,
            kind,
            caller: None,
            roster: Vec::new(),
            started_at: None,
            participants: HashMap::new(),
        }
    }

    /// A call announced by the server
    pub fn incoming(
        room_id: String,
        kind: CallKind,
        caller: CallerInfo,
        roster: Vec<ParticipantId>,
    ) -> Self {
        Self {
            room_id,
            kind,
            caller: Some(caller),
            roster,
            started_at: None,
            participants: HashMap::new(),
        }
    }

    /// The room this call lives in. Never empty for a live call.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Audio or video call
    pub fn kind(&self) -> CallKind {
        self.kind
    }

    /// Who placed the call, for incoming calls
    pub fn caller(&self) -> Option<&CallerInfo> {
        self.caller.as_ref()
    }

    /// When the call went active
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Record the transition into the active stage
    pub fn mark_started(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// The participants to create sessions for when accepting: the known
    /// room roster, or just the caller when the server sent none. The local
    /// participant is excluded and duplicates collapse.
    pub fn accept_roster(&self, local_id: &str) -> Vec<ParticipantId> {
        let mut base: Vec<ParticipantId> = if self.roster.is_empty() {
            self.caller.iter().map(|c| c.id.clone()).collect()
        } else {
            self.roster.clone()
        };

        base.retain(|id| id != local_id);
        let mut seen = std::collections::HashSet::new();
        base.retain(|id| seen.insert(id.clone()));
        base
    }

    /// Insert a session for its peer, returning any session it replaced.
    ///
    /// The caller is responsible for closing the replaced session.
    pub fn insert_session(&mut self, session: Arc<PeerSession>) -> Option<Arc<PeerSession>> {
        self.participants
            .insert(session.peer_id().to_string(), session)
    }

    /// Remove the session for a peer
    pub fn remove_session(&mut self, peer_id: &str) -> Option<Arc<PeerSession>> {
        self.participants.remove(peer_id)
    }

    /// The session for a peer, if present
    pub fn session(&self, peer_id: &str) -> Option<&Arc<PeerSession>> {
        self.participants.get(peer_id)
    }

    /// All live sessions
    pub fn sessions(&self) -> Vec<Arc<PeerSession>> {
        self.participants.values().cloned().collect()
    }

    /// All participant ids with a session
    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        self.participants.keys().cloned().collect()
    }

    /// Whether no participants remain
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Number of participants with a session
    pub fn len(&self) -> usize {
        self.participants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PeerError;
    use crate::media::MediaStreamHandle;
    use crate::peer::{LinkEvent, PeerLink, PeerLinkFactory, Role};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc};

    struct NullLink {
        tx: broadcast::Sender<LinkEvent>,
    }

    #[async_trait]
    impl PeerLink for NullLink {
        fn events(&self) -> broadcast::Receiver<LinkEvent> {
            self.tx.subscribe()
        }
        async fn begin_negotiation(&self) -> Result<(), PeerError> {
            Ok(())
        }
        async fn ingest_signal(&self, _payload: serde_json::Value) -> Result<(), PeerError> {
            Ok(())
        }
        async fn replace_video_track(
            &self,
            _track: crate::media::MediaTrack,
        ) -> Result<(), PeerError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), PeerError> {
            Ok(())
        }
    }

    struct NullFactory;

    #[async_trait]
    impl PeerLinkFactory for NullFactory {
        async fn create_link(
            &self,
            _peer_id: &str,
            _role: Role,
            _local_stream: Option<&MediaStreamHandle>,
        ) -> Result<Arc<dyn PeerLink>, PeerError> {
            let (tx, _) = broadcast::channel(8);
            Ok(Arc::new(NullLink { tx }))
        }
    }

    async fn session_for(peer_id: &str) -> Arc<PeerSession> {
        let factory: Arc<dyn PeerLinkFactory> = Arc::new(NullFactory);
        let (tx, _rx) = mpsc::unbounded_channel();
        PeerSession::connect(
            peer_id.to_string(),
            Role::Initiator,
            &factory,
            None,
            Duration::from_secs(30),
            tx,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_replaces_duplicate() {
        let mut call = CallSession::outgoing("r1".to_string(), CallKind::Audio);

        let first = session_for("bob").await;
        let second = session_for("bob").await;

        assert!(call.insert_session(first.clone()).is_none());
        assert_eq!(call.len(), 1);

        let replaced = call.insert_session(second).unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));
        assert_eq!(call.len(), 1);
    }

    #[test]
    fn test_accept_roster_falls_back_to_caller() {
        let call = CallSession::incoming(
            "r1".to_string(),
            CallKind::Video,
            CallerInfo {
                id: "alice".to_string(),
                name: "Alice".to_string(),
            },
            Vec::new(),
        );

        assert_eq!(call.accept_roster("me"), vec!["alice".to_string()]);
    }

    #[test]
    fn test_accept_roster_excludes_self_and_duplicates() {
        let call = CallSession::incoming(
            "r1".to_string(),
            CallKind::Video,
            CallerInfo {
                id: "alice".to_string(),
                name: "Alice".to_string(),
            },
            vec![
                "alice".to_string(),
                "me".to_string(),
                "bob".to_string(),
                "alice".to_string(),
            ],
        );

        assert_eq!(
            call.accept_roster("me"),
            vec!["alice".to_string(), "bob".to_string()]
        );
    }
}
