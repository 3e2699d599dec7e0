//! Crate-wide error type for the CA3 protocol. Each `ErrorKind` is a
//! distinct failure mode callers can match on instead of parsing strings.

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    errors {
        /// The trip's absolute deadline has passed.
        Timeout(trip_id: String) {
            description("trip deadline exceeded")
            display("trip {} exceeded its deadline", trip_id)
        }

        /// A peer reported that an equivalent trip was already underway.
        /// See `packet::ALREADY_STARTED_CODE` for the wire-boundary
        /// translation of this case.
        AlreadyStarted {
            description("Already started")
            display("Already started")
        }

        /// `verify_all` returned a non-zero status.
        VerifyFailed(status: i32) {
            description("block verification failed")
            display("block verification failed with status {}", status)
        }

        /// Local signing failed (expired trip or missing key).
        SignFailed(reason: String) {
            description("signing failed")
            display("signing failed: {}", reason)
        }

        /// Signature forwarding exhausted the candidate peer list before the
        /// signature budget was satisfied.
        DispatchExhausted {
            description("signature dispatch exhausted candidate peers")
            display("signature dispatch exhausted candidate peers")
        }

        /// A required collaborator (key store, ledger façade, transport) is
        /// not wired up. Fatal for the current call; never retried
        /// internally.
        CollaboratorDown(which: String) {
            description("collaborator module is down")
            display("{} is down", which)
        }

        /// The block assembler could not build a block (e.g. missing
        /// `prev` for a non-genesis block).
        CreateBlock(reason: String) {
            description("block assembly failed")
            display("could not create block: {}", reason)
        }

        /// Input could not be parsed into the expected shape.
        MalformedData {
            description("malformed input data")
            display("malformed input data")
        }

        /// A block's structure failed basic sanity checks.
        MalformedBlock {
            description("malformed block")
            display("malformed block")
        }

        /// The local signing key for this node is absent.
        KeyMissing {
            description("local signing key missing")
            display("local signing key missing")
        }

        /// A peer could not be reached over the transport.
        PeerUnreachable(nodename: String) {
            description("peer unreachable")
            display("peer {} is unreachable", nodename)
        }

        /// The cached connection to a peer was not usable; the dispatcher
        /// purges it and retries.
        ConnectionUnavailable(nodename: String) {
            description("connection unavailable")
            display("connection to {} unavailable", nodename)
        }
    }
}

impl ErrorKind {
    /// The outer verify-status encoding: `-2` malformed input, `-1`
    /// malformed block, `0` good, `3` hash mismatch, multiples of 30 for
    /// signature failures.
    pub fn as_verify_status(&self) -> Option<i32> {
        match self {
            ErrorKind::MalformedData => Some(-2),
            ErrorKind::MalformedBlock => Some(-1),
            ErrorKind::VerifyFailed(status) => Some(*status),
            _ => None,
        }
    }
}
