//! Chunked streaming encryption.
//!
//! A stream is encrypted under one key and one random base nonce, which is published up front in
//! a [`StreamHeader`]. Each chunk is sealed as its own [`Envelope`], under a nonce derived from the
//! base nonce and the chunk's position:
//!
//! ```text
//! nonce(n) = base_nonce XOR (0..0 || le32(n))
//! ```
//!
//! The counter only ever increases. Once chunk `u32::MAX` has been sealed, the encryptor refuses
//! to go on with [`CryptoError::NonceSpaceExhausted`] rather than repeat a nonce.
//!
//! The last chunk is sealed with a different associated-data marker than the others, so a
//! stream cut short (or with its final chunk moved) fails to verify. Decryption runs the same
//! counter, so chunks must arrive in order; the first chunk that fails to verify ends the
//! stream and nothing after it is decrypted.
//!
//! # Example
//!
//! ```
//! # use envelope_crypto::{algorithm::SymmetricAlgorithm, symmetric::SymmetricCipher, stream};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut csprng = rand::rngs::OsRng;
//! let cipher = SymmetricCipher::new(SymmetricAlgorithm::AesGcm);
//! let key = cipher.generate_key(&mut csprng)?;
//!
//! let chunks = vec![&b"first "[..], &b"second "[..], &b"third"[..]];
//! let (header, sealed) = stream::encrypt_stream(&mut csprng, cipher, chunks, &key)?;
//! let sealed = sealed.collect::<Result<Vec<_>, _>>()?;
//!
//! let plain = stream::decrypt_stream(&header, sealed, &key)
//!     .collect::<Result<Vec<_>, _>>()?
//!     .concat();
//! assert_eq!(&plain[..], b"first second third");
//! # Ok(())
//! # }
//! ```

use byteorder::{ByteOrder, LittleEndian};
use rand_core::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use std::{io::Read, iter::Peekable};

use crate::{
    algorithm::{AlgorithmId, SymmetricAlgorithm},
    envelope::Envelope,
    key::{fill_random, SymmetricKey},
    symmetric::SymmetricCipher,
    CryptoError, Result,
};

const CHUNK_MARKER: &[u8] = &[0x00];
const FINAL_CHUNK_MARKER: &[u8] = &[0x01];
const COUNTER_SIZE: usize = 4;

fn chunk_nonce(base: &[u8], counter: u32) -> Vec<u8> {
    let mut nonce = base.to_vec();
    let mut ctr = [0u8; COUNTER_SIZE];
    LittleEndian::write_u32(&mut ctr, counter);
    let offset = nonce.len() - COUNTER_SIZE;
    for (n, c) in nonce[offset..].iter_mut().zip(ctr.iter()) {
        *n ^= c;
    }
    nonce
}

fn marker(last: bool) -> &'static [u8] {
    if last {
        FINAL_CHUNK_MARKER
    } else {
        CHUNK_MARKER
    }
}

/// Everything besides the key that a decryptor needs before the first chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    algorithm: SymmetricAlgorithm,
    base_nonce: Vec<u8>,
}

impl StreamHeader {
    pub fn new(algorithm: SymmetricAlgorithm, base_nonce: Vec<u8>) -> Self {
        Self { algorithm, base_nonce }
    }

    pub fn algorithm(&self) -> SymmetricAlgorithm {
        self.algorithm
    }

    pub fn base_nonce(&self) -> &[u8] {
        &self.base_nonce
    }
}

/// Sequential chunk encryptor. Each call seals the next chunk in order.
pub struct StreamEncryptor<'k> {
    cipher: SymmetricCipher,
    key: &'k SymmetricKey,
    base_nonce: Vec<u8>,
    next: Option<u32>,
    finished: bool,
}

impl<'k> StreamEncryptor<'k> {
    /// Start a new stream, drawing its base nonce from the CSPRNG.
    pub fn new<R>(csprng: &mut R, cipher: SymmetricCipher, key: &'k SymmetricKey) -> Result<Self>
    where
        R: CryptoRng + RngCore + ?Sized,
    {
        cipher.preflight(key)?;
        let mut base_nonce = vec![0u8; cipher.algorithm().nonce_size()];
        fill_random(csprng, &mut base_nonce)?;
        debug!(algorithm = %cipher.algorithm(), key_id = %key.id(), "started stream");
        Ok(Self {
            cipher,
            key,
            base_nonce,
            next: Some(0),
            finished: false,
        })
    }

    pub fn header(&self) -> StreamHeader {
        StreamHeader::new(self.cipher.algorithm(), self.base_nonce.clone())
    }

    /// Seal the next chunk. `last` must be set on the final chunk, and only on it.
    pub fn encrypt_chunk(&mut self, chunk: &[u8], last: bool) -> Result<Envelope> {
        if self.finished {
            return Err(CryptoError::StreamFinalized);
        }
        let counter = self.next.ok_or(CryptoError::NonceSpaceExhausted)?;
        let nonce = chunk_nonce(&self.base_nonce, counter);
        let (ciphertext, tag) = self.cipher.seal_with_nonce(self.key, &nonce, marker(last), chunk)?;
        self.next = counter.checked_add(1);
        self.finished = last;
        Ok(Envelope::new(self.cipher.algorithm().into(), ciphertext, nonce, tag))
    }

    /// Number of chunks sealed so far.
    pub fn chunks_sealed(&self) -> u64 {
        match self.next {
            Some(n) => n as u64,
            None => u32::MAX as u64 + 1,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[cfg(test)]
    pub(crate) fn skip_to(&mut self, counter: u32) {
        self.next = Some(counter);
    }
}

/// Sequential chunk decryptor, the mirror of [`StreamEncryptor`].
///
/// After any chunk fails to verify, the decryptor is poisoned and rejects everything that
/// follows.
pub struct StreamDecryptor<'k> {
    cipher: SymmetricCipher,
    key: &'k SymmetricKey,
    base_nonce: Vec<u8>,
    next: Option<u32>,
    finished: bool,
    poisoned: bool,
}

impl<'k> StreamDecryptor<'k> {
    pub fn new(header: &StreamHeader, key: &'k SymmetricKey) -> Result<Self> {
        let cipher = SymmetricCipher::new(header.algorithm());
        cipher.preflight(key)?;
        if header.base_nonce().len() != header.algorithm().nonce_size() {
            return Err(CryptoError::MalformedEnvelope(format!(
                "stream base nonce is {} bytes, {} requires {}",
                header.base_nonce().len(),
                header.algorithm(),
                header.algorithm().nonce_size()
            )));
        }
        Ok(Self {
            cipher,
            key,
            base_nonce: header.base_nonce().to_vec(),
            next: Some(0),
            finished: false,
            poisoned: false,
        })
    }

    /// Open the next chunk. `last` must match what the encryptor used.
    pub fn decrypt_chunk(&mut self, chunk: &Envelope, last: bool) -> Result<Vec<u8>> {
        if self.finished {
            return Err(CryptoError::StreamFinalized);
        }
        if self.poisoned {
            return Err(CryptoError::AuthenticationFailed);
        }
        let result = self.open(chunk, last);
        match &result {
            Ok(_) => self.finished = last,
            Err(_) => {
                self.poisoned = true;
                warn!(key_id = %self.key.id(), chunk = ?self.next, "stream chunk failed to verify");
            }
        }
        result
    }

    fn open(&mut self, chunk: &Envelope, last: bool) -> Result<Vec<u8>> {
        let counter = self.next.ok_or(CryptoError::NonceSpaceExhausted)?;
        if chunk.algorithm() != AlgorithmId::from(self.cipher.algorithm()) {
            return Err(CryptoError::AuthenticationFailed);
        }
        let nonce = chunk_nonce(&self.base_nonce, counter);
        if !bool::from(nonce.ct_eq(chunk.nonce())) {
            return Err(CryptoError::AuthenticationFailed);
        }
        let plain = self.cipher.open_with_nonce(
            self.key,
            &nonce,
            marker(last),
            chunk.ciphertext(),
            chunk.tag(),
        )?;
        self.next = counter.checked_add(1);
        Ok(plain)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Anything that can be fed to [`encrypt_stream`] as one chunk.
pub trait IntoChunk {
    fn into_chunk(self) -> Result<Vec<u8>>;
}

impl IntoChunk for Vec<u8> {
    fn into_chunk(self) -> Result<Vec<u8>> {
        Ok(self)
    }
}

impl IntoChunk for &[u8] {
    fn into_chunk(self) -> Result<Vec<u8>> {
        Ok(self.to_vec())
    }
}

impl<const N: usize> IntoChunk for &[u8; N] {
    fn into_chunk(self) -> Result<Vec<u8>> {
        Ok(self.to_vec())
    }
}

impl IntoChunk for std::io::Result<Vec<u8>> {
    fn into_chunk(self) -> Result<Vec<u8>> {
        self.map_err(CryptoError::from)
    }
}

/// Lazily encrypts chunks from an iterator. See [`encrypt_stream`].
pub struct EncryptStream<'k, I: Iterator> {
    encryptor: StreamEncryptor<'k>,
    chunks: Peekable<I>,
    done: bool,
}

impl<'k, I> Iterator for EncryptStream<'k, I>
where
    I: Iterator,
    I::Item: IntoChunk,
{
    type Item = Result<Envelope>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let chunk = match self.chunks.next() {
            Some(chunk) => chunk,
            // An empty input still gets a (empty) final chunk, so that it can't be confused
            // with a truncated stream.
            None if self.encryptor.chunks_sealed() == 0 => {
                self.done = true;
                return Some(self.encryptor.encrypt_chunk(&[], true));
            }
            None => return None,
        };
        let last = self.chunks.peek().is_none();
        let result = chunk
            .into_chunk()
            .and_then(|chunk| self.encryptor.encrypt_chunk(&chunk, last));
        if result.is_err() || last {
            self.done = true;
        }
        Some(result)
    }
}

/// Encrypt a sequence of chunks. Returns the stream header and a lazy iterator of sealed chunks.
/// The iterator stops after the first error.
pub fn encrypt_stream<'k, R, I>(
    csprng: &mut R,
    cipher: SymmetricCipher,
    chunks: I,
    key: &'k SymmetricKey,
) -> Result<(StreamHeader, EncryptStream<'k, I::IntoIter>)>
where
    R: CryptoRng + RngCore + ?Sized,
    I: IntoIterator,
    I::Item: IntoChunk,
{
    let encryptor = StreamEncryptor::new(csprng, cipher, key)?;
    let header = encryptor.header();
    Ok((
        header,
        EncryptStream {
            encryptor,
            chunks: chunks.into_iter().peekable(),
            done: false,
        },
    ))
}

/// Lazily decrypts chunks from an iterator. See [`decrypt_stream`].
pub struct DecryptStream<'k, I: Iterator> {
    decryptor: Result<StreamDecryptor<'k>>,
    chunks: Peekable<I>,
    done: bool,
}

impl<'k, I> Iterator for DecryptStream<'k, I>
where
    I: Iterator<Item = Envelope>,
{
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.decryptor.is_err() {
            self.done = true;
            let err = std::mem::replace(&mut self.decryptor, Err(CryptoError::StreamFinalized));
            return err.err().map(Err);
        }
        let decryptor = match &mut self.decryptor {
            Ok(decryptor) => decryptor,
            Err(_) => return None,
        };
        let chunk = match self.chunks.next() {
            Some(chunk) => chunk,
            None => {
                self.done = true;
                // Ran out of chunks before the final one: truncated.
                return if decryptor.is_finished() {
                    None
                } else {
                    Some(Err(CryptoError::AuthenticationFailed))
                };
            }
        };
        let last = self.chunks.peek().is_none();
        let result = decryptor.decrypt_chunk(&chunk, last);
        if result.is_err() || last {
            self.done = true;
        }
        Some(result)
    }
}

/// Decrypt a sequence of sealed chunks in order. The iterator yields one plaintext per chunk and
/// stops at the first failure.
pub fn decrypt_stream<'k, I>(
    header: &StreamHeader,
    chunks: I,
    key: &'k SymmetricKey,
) -> DecryptStream<'k, I::IntoIter>
where
    I: IntoIterator<Item = Envelope>,
{
    DecryptStream {
        decryptor: StreamDecryptor::new(header, key),
        chunks: chunks.into_iter().peekable(),
        done: false,
    }
}

/// Splits a reader into chunks of a fixed size (the last one may be shorter).
pub struct ReaderChunks<R: Read> {
    reader: R,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> ReaderChunks<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }
}

impl<R: Read> Iterator for ReaderChunks<R> {
    type Item = std::io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        if filled < buf.len() {
            self.done = true;
        }
        if filled == 0 {
            return None;
        }
        buf.truncate(filled);
        Some(Ok(buf))
    }
}
