//! CA3 node binary: loads configuration and keys, wires up the in-memory
//! ledger and TCP transport, and serves the protocol over a blocking
//! accept loop. A `--create` flag additionally drives one block-creation
//! round before settling into serving.

mod keystore;
mod ledger;
mod transport;

use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use clap::{App, Arg};
use log::{error, info, warn};

use ca3_core::clock::SystemClock;
use ca3_core::error::Result;
use ca3_core::packet::GeneralPacket;
use ca3_core::protocol::ProtocolContext;
use ca3_core::receiver::handle_packet;
use ca3_core::registry::TripRegistry;
use ca3_core::retry::create_block;
use ca3_core::roster::Roster;
use ca3_core::types::BlockType;
use ca3_core::Config;

use keystore::FileKeyStore;
use ledger::InMemoryLedger;
use transport::TcpTransport;

fn main() {
    env_logger::init();

    let matches = App::new("ca3-node")
        .about("CA3 collaborative block-creation node")
        .arg(
            Arg::with_name("config")
                .long("config")
                .takes_value(true)
                .required(true)
                .help("Path to the node's TOML configuration file"),
        )
        .arg(
            Arg::with_name("keypair")
                .long("keypair")
                .takes_value(true)
                .help("Path to this node's raw Ed25519 keypair file"),
        )
        .arg(
            Arg::with_name("peers")
                .long("peers")
                .takes_value(true)
                .required(true)
                .help("Path to the TOML file mapping peer nodenames to hex public keys"),
        )
        .arg(
            Arg::with_name("create")
                .long("create")
                .help("Drive one genesis block-creation round, then serve"),
        )
        .get_matches();

    if let Err(e) = run(
        matches.value_of("config").unwrap(),
        matches.value_of("keypair"),
        matches.value_of("peers").unwrap(),
        matches.is_present("create"),
    ) {
        error!(target: "ca3::node", "fatal: {}", e);
        std::process::exit(1);
    }
}

fn run(config_path: &str, keypair_path: Option<&str>, peers_path: &str, do_create: bool) -> Result<()> {
    let config_raw = fs::read_to_string(config_path)
        .map_err(|_| ca3_core::error::Error::from(ca3_core::error::ErrorKind::MalformedData))?;
    let config = Config::from_toml_str(&config_raw)
        .map_err(|_| ca3_core::error::Error::from(ca3_core::error::ErrorKind::MalformedData))?;

    let key_store = Arc::new(FileKeyStore::load(keypair_path, peers_path)?);
    let roster = Arc::new(Roster::new(
        config.nodename.clone(),
        config.abnormal_count_for_judging,
        config.roster.clone(),
    ));
    let ctx = Arc::new(ProtocolContext::new(
        config.nodename.clone(),
        config.min_sign_nodes,
        config.max_sign_nodes,
        config.strict_empty_tx_conflict,
        Arc::new(TripRegistry::new()),
        roster,
        key_store,
        Arc::new(InMemoryLedger::new()),
        Arc::new(TcpTransport::new()),
        Arc::new(SystemClock),
    ));

    if do_create {
        match create_block(
            &ctx,
            BlockType::Genesis,
            config.nodename.clone(),
            vec![],
            config.min_life_time_ms(),
            config.max_life_time_ms(),
        ) {
            Ok(block) => info!(target: "ca3::node", "created block {} at height {}", block.id, block.height),
            Err(e) => warn!(target: "ca3::node", "block creation round failed: {}", e),
        }
    }

    serve(&ctx, config.rpc_port)
}

fn serve(ctx: &Arc<ProtocolContext>, rpc_port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", rpc_port))
        .map_err(|_| ca3_core::error::Error::from(ca3_core::error::ErrorKind::CollaboratorDown("listener".into())))?;
    info!(target: "ca3::node", "{} listening on {}", ctx.self_nodename, rpc_port);

    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(s) => s,
            Err(e) => {
                warn!(target: "ca3::node", "accept failed: {}", e);
                continue;
            }
        };
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            if let Err(e) = handle_connection(&ctx, stream) {
                warn!(target: "ca3::node", "connection handling failed: {}", e);
            }
        });
    }
    Ok(())
}

fn handle_connection(ctx: &Arc<ProtocolContext>, mut stream: TcpStream) -> Result<()> {
    let mut len_bytes = [0u8; 4];
    stream
        .read_exact(&mut len_bytes)
        .map_err(|_| ca3_core::error::Error::from(ca3_core::error::ErrorKind::MalformedData))?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .map_err(|_| ca3_core::error::Error::from(ca3_core::error::ErrorKind::MalformedData))?;
    let packet: GeneralPacket = serde_json::from_slice(&body)
        .map_err(|_| ca3_core::error::Error::from(ca3_core::error::ErrorKind::MalformedData))?;

    let reply = handle_packet(ctx, packet);
    let reply_body = serde_json::to_vec(&reply)
        .map_err(|_| ca3_core::error::Error::from(ca3_core::error::ErrorKind::MalformedData))?;
    stream
        .write_all(&(reply_body.len() as u32).to_be_bytes())
        .map_err(|_| ca3_core::error::Error::from(ca3_core::error::ErrorKind::CollaboratorDown("transport".into())))?;
    stream
        .write_all(&reply_body)
        .map_err(|_| ca3_core::error::Error::from(ca3_core::error::ErrorKind::CollaboratorDown("transport".into())))?;
    Ok(())
}
