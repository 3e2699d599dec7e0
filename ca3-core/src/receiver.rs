//! Dispatches an inbound `GeneralPacket` to the right local handler and
//! shapes the reply packet.

use log::{trace, warn};

use crate::packet::{GeneralPacket, PacketPayload, PayloadType, RequestTag, WIRE_VERSION};
use crate::protocol::{
    request_to_add_block_ca3, request_to_declare_block_creation,
    request_to_sign_and_resend_or_store, ProtocolContext,
};
use crate::types::{TravelingBlock, TravelingId};

/// Handles one inbound request packet, returning the packet to reply
/// with. Rejects mismatched protocol versions and packets not addressed
/// to this node or from a peer this node does not allow inbound traffic
/// from.
pub fn handle_packet(ctx: &ProtocolContext, packet: GeneralPacket) -> GeneralPacket {
    if packet.version != WIRE_VERSION {
        warn!(target: "ca3::receiver", "dropping packet at version {} (expected {})", packet.version, WIRE_VERSION);
        return reply_failure(&packet, packet.payload.request, "unsupported protocol version");
    }
    if packet.receiver != ctx.self_nodename {
        warn!(target: "ca3::receiver", "dropping packet addressed to {}, not me", packet.receiver);
        return reply_failure(&packet, packet.payload.request, "not addressed to this node");
    }
    if !ctx.roster.contains_allowed(&packet.sender) && packet.sender != ctx.self_nodename {
        warn!(target: "ca3::receiver", "dropping packet from disallowed sender {}", packet.sender);
        return reply_failure(&packet, packet.payload.request, "sender not in roster");
    }

    trace!(target: "ca3::receiver", "handling {:?} from {}", packet.payload.request, packet.sender);

    match packet.payload.request {
        RequestTag::Ping => reply_success(&packet, RequestTag::Ping, &"pong".to_string()),

        RequestTag::DeclareBlockCreation => match parse::<TravelingId>(&packet) {
            Ok(traveling) => {
                let value = request_to_declare_block_creation(ctx, traveling);
                reply_success(&packet, RequestTag::DeclareBlockCreation, &value)
            }
            Err(reply) => reply,
        },

        RequestTag::SignAndResendOrStore => match parse::<TravelingBlock>(&packet) {
            Ok(traveling) => {
                let sentinel = request_to_sign_and_resend_or_store(ctx, traveling);
                reply_success(&packet, RequestTag::SignAndResendOrStore, &sentinel)
            }
            Err(reply) => reply,
        },

        RequestTag::AddBlockCa3 => match parse::<TravelingBlock>(&packet) {
            Ok(traveling) => match request_to_add_block_ca3(ctx, traveling) {
                Ok(()) => reply_success(&packet, RequestTag::AddBlockCa3, &0i64),
                Err(e) => reply_failure(&packet, RequestTag::AddBlockCa3, &e.to_string()),
            },
            Err(reply) => reply,
        },

        RequestTag::GetBlockHeight | RequestTag::GetPoolHeight => {
            reply_failure(&packet, packet.payload.request, "not wired to a ledger facade")
        }

        RequestTag::AddBlock | RequestTag::ResetTestNode => {
            reply_failure(&packet, packet.payload.request, "legacy request not supported")
        }

        _ => GeneralPacket::unknown_request_terminator(&ctx.self_nodename, &packet.sender),
    }
}

fn parse<T: serde::de::DeserializeOwned>(packet: &GeneralPacket) -> Result<T, GeneralPacket> {
    serde_json::from_str(&packet.payload.data_as_string)
        .map_err(|_| reply_failure(packet, packet.payload.request, "malformed request payload"))
}

fn reply_success(packet: &GeneralPacket, tag: RequestTag, data: &impl serde::Serialize) -> GeneralPacket {
    match PacketPayload::success(tag, data) {
        Ok(payload) => packet.reply(payload),
        Err(_) => reply_failure(packet, tag, "failed to encode reply"),
    }
}

fn reply_failure(packet: &GeneralPacket, tag: RequestTag, detail: &str) -> GeneralPacket {
    let error_json = serde_json::to_string(detail).unwrap_or_else(|_| "\"internal error\"".to_string());
    packet.reply(PacketPayload::failure(tag, error_json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::collaborators::{LedgerFacade, PeerTransport};
    use crate::error::{Error, ErrorKind, Result};
    use crate::registry::TripRegistry;
    use crate::roster::Roster;
    use crate::signature::KeyStore;
    use crate::types::{Block, RosterEntry};
    use std::sync::Arc;
    use std::time::Duration;

    struct NullLedger;
    impl LedgerFacade for NullLedger {
        fn add_block(&self, _block: &Block, _remove_from_pool: bool, _trip_id: &str) -> Result<()> {
            Ok(())
        }
        fn get_last_block(&self, _tenant: &str) -> Result<Option<Block>> {
            Ok(None)
        }
    }

    struct NullKeyStore;
    impl KeyStore for NullKeyStore {
        fn sign(&self, _payload: &[u8]) -> Result<String> {
            Ok("00".to_string())
        }
        fn verify(&self, _payload: &[u8], _sig_hex: &str, _peer_name: &str) -> Result<bool> {
            Ok(true)
        }
    }

    struct NullTransport;
    impl PeerTransport for NullTransport {
        fn unary(
            &self,
            _target: &RosterEntry,
            _packet: GeneralPacket,
            _timeout: Duration,
        ) -> Result<GeneralPacket> {
            Err(Error::from(ErrorKind::PeerUnreachable("none".into())))
        }
        fn purge(&self, _target: &RosterEntry) {}
    }

    fn ctx() -> ProtocolContext {
        let roster = Roster::new(
            "a".to_string(),
            100,
            vec![RosterEntry {
                nodename: "a".to_string(),
                host: "127.0.0.1".to_string(),
                rpc_port: 9000,
                allow_outgoing: true,
                abnormal_count: 0,
            }],
        );
        ProtocolContext::new(
            "a".to_string(),
            1,
            1,
            true,
            Arc::new(TripRegistry::new()),
            Arc::new(roster),
            Arc::new(NullKeyStore),
            Arc::new(NullLedger),
            Arc::new(NullTransport),
            Arc::new(FakeClock::new(0)),
        )
    }

    #[test]
    fn ping_is_answered_with_success() {
        let ctx = ctx();
        let packet = GeneralPacket::new_request("peer", "a", RequestTag::Ping, &"hi".to_string()).unwrap();
        let reply = handle_packet(&ctx, packet);
        assert_eq!(reply.payload.payload_type, PayloadType::ResultSuccess);
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let ctx = ctx();
        let mut packet =
            GeneralPacket::new_request("peer", "a", RequestTag::Ping, &"hi".to_string()).unwrap();
        packet.version = 1;
        let reply = handle_packet(&ctx, packet);
        assert_eq!(reply.payload.payload_type, PayloadType::ResultFailure);
    }

    #[test]
    fn packet_from_unknown_sender_is_rejected() {
        let ctx = ctx();
        let packet =
            GeneralPacket::new_request("stranger", "a", RequestTag::Ping, &"hi".to_string()).unwrap();
        let reply = handle_packet(&ctx, packet);
        assert_eq!(reply.payload.payload_type, PayloadType::ResultFailure);
    }
}
