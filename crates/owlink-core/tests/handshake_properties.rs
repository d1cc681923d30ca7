//! Property tests for the handshake, its digest and the request codec.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use owlink_core::protocol::codec::{read_request, write_request};
use owlink_core::protocol::handshake::{
    challenge_response, client_handshake, server_handshake_with, HandshakeError, CHALLENGE_LEN,
};
use owlink_core::protocol::Request;
use proptest::prelude::*;

/// One end of an in-memory byte pipe.  Reads block until the peer writes
/// and return end of stream once the peer is dropped.
struct PipeEnd {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

fn pipe() -> (PipeEnd, PipeEnd) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    let end = |tx, rx| PipeEnd {
        tx,
        rx,
        pending: VecDeque::new(),
    };
    (end(a_tx, a_rx), end(b_tx, b_rx))
}

impl Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs both halves against each other and returns (server, client).
fn handshake(
    server_secret: Vec<u8>,
    client_secret: &[u8],
    challenge: [u8; CHALLENGE_LEN],
) -> (Result<(), HandshakeError>, Result<(), HandshakeError>) {
    let (mut server_end, mut client_end) = pipe();
    let server = thread::spawn(move || {
        server_handshake_with(&mut server_end, &server_secret, 1, challenge)
    });
    let client = client_handshake(&mut client_end, client_secret, 1);
    drop(client_end);
    (server.join().unwrap(), client)
}

proptest! {
    /// Client and server with the same secret always authenticate.
    #[test]
    fn matching_secrets_complete_the_handshake(
        secret in prop::collection::vec(any::<u8>(), 0..=64),
        challenge in prop::array::uniform8(any::<u8>()),
    ) {
        let (server, client) = handshake(secret.clone(), &secret, challenge);

        prop_assert!(server.is_ok(), "server: {:?}", server);
        prop_assert!(client.is_ok(), "client: {:?}", client);
    }

    /// Different secrets are refused on both ends unless their digests collide.
    #[test]
    fn differing_secrets_are_refused(
        server_secret in prop::collection::vec(any::<u8>(), 0..=32),
        client_secret in prop::collection::vec(any::<u8>(), 0..=32),
        challenge in prop::array::uniform8(any::<u8>()),
    ) {
        prop_assume!(
            challenge_response(&server_secret, &challenge)
                != challenge_response(&client_secret, &challenge)
        );

        let (server, client) = handshake(server_secret, &client_secret, challenge);

        prop_assert!(matches!(server, Err(HandshakeError::BadResponse)));
        prop_assert!(matches!(client, Err(HandshakeError::Rejected(_))));
    }

    /// Flipping any single bit of the secret always changes the digest.
    #[test]
    fn single_bit_secret_change_never_authenticates(
        secret in prop::collection::vec(any::<u8>(), 1..=64),
        challenge in prop::array::uniform8(any::<u8>()),
        bit in any::<prop::sample::Index>(),
    ) {
        let position = bit.index(secret.len() * 8);
        let mut tampered = secret.clone();
        tampered[position / 8] ^= 1 << (position % 8);

        prop_assert_ne!(
            challenge_response(&secret, &challenge),
            challenge_response(&tampered, &challenge)
        );
    }

    /// Arbitrary bytes never panic the request decoder.
    #[test]
    fn request_decoder_survives_garbage(bytes in prop::collection::vec(any::<u8>(), 0..=64)) {
        let _ = read_request(&mut Cursor::new(bytes));
    }

    /// Family lists of any size survive the wire.
    #[test]
    fn family_lists_survive_the_wire(families in prop::collection::vec(any::<u8>(), 0..=32)) {
        let request = Request::TargetFamily(families);
        let mut buf = Vec::new();
        write_request(&mut buf, &request).unwrap();

        let decoded = read_request(&mut Cursor::new(buf)).unwrap();

        prop_assert_eq!(decoded, request);
    }
}

#[test]
fn test_challenge_length_is_eight_bytes() {
    assert_eq!(CHALLENGE_LEN, 8);
}
