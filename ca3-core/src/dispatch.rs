//! Random, retry-aware peer selection and connection reuse.

use std::time::Duration;

use rand::Rng;

use crate::collaborators::PeerTransport;
use crate::error::{Error, ErrorKind, Result};
use crate::packet::GeneralPacket;
use crate::roster::Roster;
use crate::types::RosterEntry;

/// Automatic retry cap for "connection unavailable".
const MAX_CONNECTION_RETRIES: u32 = 10;

/// Source of randomness for `random_dispatch`. Production code uses
/// `rand::thread_rng()`; tests inject a seeded RNG for determinism.
pub trait RngSource {
    fn pick_index(&mut self, len: usize) -> usize;
}

/// The default, thread-local RNG.
pub struct ThreadRng;

impl RngSource for ThreadRng {
    fn pick_index(&mut self, len: usize) -> usize {
        rand::thread_rng().gen_range(0, len)
    }
}

/// Result of a `random_dispatch` attempt.
pub enum DispatchOutcome {
    /// A candidate accepted the packet; carries its reply.
    Delivered(GeneralPacket),
    /// Every candidate was tried and failed; the caller must terminal-store
    /// locally.
    Exhausted,
}

/// Sends `packet` to `target`, retrying up to `MAX_CONNECTION_RETRIES`
/// times if the transport reports the connection as unavailable, purging
/// the cached connection before each retry. Any other error bubbles out
/// immediately. On I/O failure `target.abnormal_count` is bumped in the
/// roster.
pub fn unary(
    transport: &dyn PeerTransport,
    roster: &Roster,
    target: &RosterEntry,
    packet: GeneralPacket,
    timeout: Duration,
) -> Result<GeneralPacket> {
    let mut attempts = 0;
    loop {
        match transport.unary(target, packet.clone(), timeout) {
            Ok(reply) => return Ok(reply),
            Err(e) => {
                let is_conn_unavailable = matches!(e.kind(), ErrorKind::ConnectionUnavailable(_));
                if !is_conn_unavailable {
                    roster.record_failure(&target.nodename);
                    return Err(e);
                }
                transport.purge(target);
                attempts += 1;
                if attempts >= MAX_CONNECTION_RETRIES {
                    roster.record_failure(&target.nodename);
                    return Err(e);
                }
            }
        }
    }
}

/// Sends `payload_for` to every roster peer with `allow_outgoing=true`
/// (other than self), aggregating every result — individual errors never
/// abort the broadcast.
pub fn broadcast(
    transport: &dyn PeerTransport,
    roster: &Roster,
    timeout: Duration,
    packet_for: impl Fn(&RosterEntry) -> Result<GeneralPacket>,
) -> Vec<(RosterEntry, Result<GeneralPacket>)> {
    roster
        .outgoing_peers()
        .into_iter()
        .map(|peer| {
            let result = packet_for(&peer).and_then(|packet| unary(transport, roster, &peer, packet, timeout));
            (peer, result)
        })
        .collect()
}

/// Uniformly picks a candidate and sends `packet`; on failure, bumps the
/// candidate's `abnormal_count` and removes it from the candidate list,
/// repeating until either a send succeeds or the list is exhausted.
/// `candidates` is consumed; pass a fresh copy per call.
pub fn random_dispatch(
    transport: &dyn PeerTransport,
    roster: &Roster,
    mut candidates: Vec<RosterEntry>,
    timeout: Duration,
    rng: &mut dyn RngSource,
    packet_for: impl Fn(&RosterEntry) -> Result<GeneralPacket>,
) -> DispatchOutcome {
    while !candidates.is_empty() {
        let idx = rng.pick_index(candidates.len());
        let candidate = candidates[idx].clone();
        let packet = match packet_for(&candidate) {
            Ok(p) => p,
            Err(_) => {
                candidates.remove(idx);
                continue;
            }
        };
        match unary(transport, roster, &candidate, packet, timeout) {
            Ok(reply) => return DispatchOutcome::Delivered(reply),
            Err(_) => {
                candidates.remove(idx);
            }
        }
    }
    DispatchOutcome::Exhausted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketPayload, PayloadType, RequestTag};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct FakeTransport {
        responses: Mutex<HashMap<String, Result<GeneralPacket>>>,
        purged: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            FakeTransport {
                responses: Mutex::new(HashMap::new()),
                purged: Mutex::new(Vec::new()),
            }
        }

        fn set(&self, nodename: &str, outcome: Result<GeneralPacket>) {
            self.responses.lock().insert(nodename.to_string(), outcome);
        }
    }

    fn fake_reply() -> GeneralPacket {
        GeneralPacket::new_request("b", "a", RequestTag::Ping, &"Pong").unwrap()
    }

    impl PeerTransport for FakeTransport {
        fn unary(
            &self,
            target: &RosterEntry,
            _packet: GeneralPacket,
            _timeout: Duration,
        ) -> Result<GeneralPacket> {
            match self.responses.lock().get(&target.nodename) {
                Some(Ok(p)) => Ok(p.clone()),
                Some(Err(_)) => Err(Error::from(ErrorKind::PeerUnreachable(target.nodename.clone()))),
                None => Err(Error::from(ErrorKind::PeerUnreachable(target.nodename.clone()))),
            }
        }

        fn purge(&self, target: &RosterEntry) {
            self.purged.lock().push(target.nodename.clone());
        }
    }

    struct FixedRng(usize);
    impl RngSource for FixedRng {
        fn pick_index(&mut self, len: usize) -> usize {
            self.0 % len
        }
    }

    fn entry(name: &str) -> RosterEntry {
        RosterEntry {
            nodename: name.to_string(),
            host: "127.0.0.1".to_string(),
            rpc_port: 9000,
            allow_outgoing: true,
            abnormal_count: 0,
        }
    }

    #[test]
    fn random_dispatch_splices_out_failures_until_success() {
        let roster = Roster::new("self".into(), 100, vec![entry("self"), entry("b"), entry("c")]);
        let transport = FakeTransport::new();
        transport.set("b", Err(Error::from(ErrorKind::PeerUnreachable("b".into()))));
        transport.set("c", Ok(fake_reply()));

        let mut rng = FixedRng(0);
        let outcome = random_dispatch(
            &transport,
            &roster,
            vec![entry("b"), entry("c")],
            Duration::from_secs(1),
            &mut rng,
            |_| {
                PacketPayload::request(RequestTag::Ping, &"x")
                    .map(|payload| GeneralPacket {
                        version: 4,
                        packet_id: uuid::Uuid::new_v4(),
                        sender: "self".into(),
                        receiver: "peer".into(),
                        prev_id: uuid::Uuid::nil(),
                        payload,
                    })
                    .map_err(|_| Error::from(ErrorKind::MalformedData))
            },
        );
        assert!(matches!(outcome, DispatchOutcome::Delivered(_)));
        assert_eq!(roster.get("b").unwrap().abnormal_count, 1);
    }

    #[test]
    fn random_dispatch_reports_exhausted_when_all_fail() {
        let roster = Roster::new("self".into(), 100, vec![entry("self"), entry("b")]);
        let transport = FakeTransport::new();
        transport.set("b", Err(Error::from(ErrorKind::PeerUnreachable("b".into()))));

        let mut rng = FixedRng(0);
        let outcome = random_dispatch(
            &transport,
            &roster,
            vec![entry("b")],
            Duration::from_secs(1),
            &mut rng,
            |_| {
                PacketPayload::request(RequestTag::Ping, &"x")
                    .map(|payload| GeneralPacket {
                        version: 4,
                        packet_id: uuid::Uuid::new_v4(),
                        sender: "self".into(),
                        receiver: "peer".into(),
                        prev_id: uuid::Uuid::nil(),
                        payload,
                    })
                    .map_err(|_| Error::from(ErrorKind::MalformedData))
            },
        );
        assert!(matches!(outcome, DispatchOutcome::Exhausted));
    }
}
