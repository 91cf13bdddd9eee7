//! Streaming envelope cipher.
//!
//! Blob layout: `[16-byte IV][ciphertext, same length as plaintext]`.
//! AES-256 in OFB mode, so decryption is the same keystream applied again.
//! There is no length header and no integrity tag: a modified ciphertext
//! decrypts to corrupted plaintext without any error.

use aes::Aes256;
use ofb::cipher::{KeyIvInit, StreamCipher};
use ofb::Ofb;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::Zeroize;

use crate::crypto::types::{CipherError, DataKey, DATA_KEY_LEN};

type Aes256Ofb = Ofb<Aes256>;

/// IV prefix length; equal to the AES block size.
pub const IV_LEN: usize = 16;

/// Default read/transform/write chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Size of the encrypted blob for a plaintext of `plaintext_len` bytes.
pub fn ciphertext_len(plaintext_len: u64) -> u64 {
    plaintext_len + IV_LEN as u64
}

/// Stateless streaming encrypt/decrypt with a caller-supplied key.
///
/// Memory use is one chunk regardless of payload length.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCipher {
    chunk_size: usize,
}

impl Default for EnvelopeCipher {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl EnvelopeCipher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Fresh key from the operating system CSPRNG.
    pub fn new_key() -> DataKey {
        let mut bytes = [0u8; DATA_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        let key = DataKey::from_bytes(bytes);
        bytes.zeroize();
        key
    }

    /// Encrypt `reader` into `writer`, prefixing a random IV.
    ///
    /// Returns the number of plaintext bytes consumed. Any IO error aborts
    /// the transfer; the writer may then hold a partial blob.
    pub async fn encrypt<R, W>(
        &self,
        key: &DataKey,
        mut reader: R,
        mut writer: W,
    ) -> Result<u64, CipherError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let mut keystream = keystream(key, &iv)?;

        writer.write_all(&iv).await?;
        let total = self.apply(&mut keystream, &mut reader, &mut writer).await?;
        writer.flush().await?;

        tracing::trace!(bytes = total, "Encrypted stream");
        Ok(total)
    }

    /// Decrypt a blob produced by [`EnvelopeCipher::encrypt`].
    ///
    /// Returns the number of plaintext bytes written.
    pub async fn decrypt<R, W>(
        &self,
        key: &DataKey,
        mut reader: R,
        mut writer: W,
    ) -> Result<u64, CipherError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut iv = [0u8; IV_LEN];
        reader.read_exact(&mut iv).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => CipherError::TruncatedHeader(IV_LEN),
            _ => CipherError::Io(e),
        })?;
        let mut keystream = keystream(key, &iv)?;

        let total = self.apply(&mut keystream, &mut reader, &mut writer).await?;
        writer.flush().await?;

        tracing::trace!(bytes = total, "Decrypted stream");
        Ok(total)
    }

    async fn apply<R, W>(
        &self,
        keystream: &mut Aes256Ofb,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<u64, CipherError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;
        let result = loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break Ok(total),
                Ok(n) => n,
                Err(e) => break Err(CipherError::Io(e)),
            };
            keystream.apply_keystream(&mut buf[..n]);
            if let Err(e) = writer.write_all(&buf[..n]).await {
                break Err(CipherError::Io(e));
            }
            total += n as u64;
        };
        buf.zeroize();
        result
    }
}

/// Encrypt a small in-memory payload. Same layout as the streaming form.
pub fn encrypt_bytes(key: &DataKey, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let mut keystream = keystream(key, &iv)?;

    let mut out = Vec::with_capacity(IV_LEN + plaintext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(plaintext);
    keystream.apply_keystream(&mut out[IV_LEN..]);
    Ok(out)
}

/// Decrypt a small in-memory blob produced by [`encrypt_bytes`] or the streaming form.
pub fn decrypt_bytes(key: &DataKey, blob: &[u8]) -> Result<Vec<u8>, CipherError> {
    if blob.len() < IV_LEN {
        return Err(CipherError::TruncatedHeader(IV_LEN));
    }
    let (iv, body) = blob.split_at(IV_LEN);
    let mut keystream = keystream(key, iv)?;
    let mut out = body.to_vec();
    keystream.apply_keystream(&mut out);
    Ok(out)
}

fn keystream(key: &DataKey, iv: &[u8]) -> Result<Aes256Ofb, CipherError> {
    Aes256Ofb::new_from_slices(key.as_bytes(), iv).map_err(|_| CipherError::InvalidKeyLength {
        expected: DATA_KEY_LEN,
        actual: key.as_bytes().len(),
    })
}
