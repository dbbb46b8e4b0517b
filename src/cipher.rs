//! Block cipher transforms
//!
//! Wraps the RustCrypto block ciphers and modes in a uniform push-style
//! transform: bytes go in through [`CipherTransform::update`] in pieces of
//! any size, and [`CipherTransform::finish`] flushes whatever the mode still
//! holds back.
//!
//! Padding behavior per mode:
//! - CBC encrypt appends PKCS#7 padding on finish, always 1..=block bytes.
//! - CBC decrypt does *not* remove padding; callers strip it themselves.
//!   Ciphertext that is not a whole number of blocks is rejected on finish.
//! - CFB and OFB are stream-like and never pad.

use std::fmt;

use cipher::block_padding::{Padding, Pkcs7};
use cipher::generic_array::GenericArray;
use cipher::typenum::{IsLess, Le, NonZero, U256};
use cipher::{
    Block, BlockCipher, BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyInit, KeyIvInit,
    KeySizeUser, StreamCipher,
};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, ErrorKind, Result, StreamcryptError};

/// Supported block ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherId {
    Aes128,
    Aes192,
    #[default]
    Aes256,
    /// Three-key Triple-DES (EDE3).
    TripleDes,
}

impl CipherId {
    /// Block size of the cipher in bytes.
    pub fn block_size(self) -> usize {
        match self {
            CipherId::Aes128 => aes::Aes128::block_size(),
            CipherId::Aes192 => aes::Aes192::block_size(),
            CipherId::Aes256 => aes::Aes256::block_size(),
            CipherId::TripleDes => des::TdesEde3::block_size(),
        }
    }

    /// Required key length in bytes.
    pub fn key_size(self) -> usize {
        match self {
            CipherId::Aes128 => aes::Aes128::key_size(),
            CipherId::Aes192 => aes::Aes192::key_size(),
            CipherId::Aes256 => aes::Aes256::key_size(),
            CipherId::TripleDes => des::TdesEde3::key_size(),
        }
    }
}

impl fmt::Display for CipherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CipherId::Aes128 => "aes-128",
            CipherId::Aes192 => "aes-192",
            CipherId::Aes256 => "aes-256",
            CipherId::TripleDes => "3des-ede3",
        };
        f.write_str(name)
    }
}

/// Block cipher modes of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Cbc,
    Cfb,
    Ofb,
}

impl Mode {
    /// Whether encryption in this mode appends padding.
    pub fn pads(self) -> bool {
        matches!(self, Mode::Cbc)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Cbc => "cbc",
            Mode::Cfb => "cfb",
            Mode::Ofb => "ofb",
        };
        f.write_str(name)
    }
}

/// IV size, and thus the unit padding is measured in, for a (cipher, mode) pair.
///
/// All supported modes take an IV of exactly one cipher block.
pub fn block_size(cipher: CipherId, mode: Mode) -> usize {
    match mode {
        Mode::Cbc | Mode::Cfb | Mode::Ofb => cipher.block_size(),
    }
}

/// A chunked byte transform in one direction.
pub trait CipherTransform: Send {
    /// Feeds `input` through the transform, appending produced bytes to `output`.
    ///
    /// Block modes may hold back up to one block until more input or
    /// [`finish`](Self::finish) arrives.
    fn update(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()>;

    /// Flushes any held-back bytes (and padding, when encrypting in CBC).
    fn finish(self: Box<Self>, output: &mut Vec<u8>) -> Result<()>;
}

/// Builds an encrypting transform.
pub fn new_encryptor(
    cipher: CipherId,
    mode: Mode,
    key: &[u8],
    iv: &[u8],
) -> Result<Box<dyn CipherTransform>> {
    match cipher {
        CipherId::Aes128 => build::<aes::Aes128>(Direction::Encrypt, mode, key, iv),
        CipherId::Aes192 => build::<aes::Aes192>(Direction::Encrypt, mode, key, iv),
        CipherId::Aes256 => build::<aes::Aes256>(Direction::Encrypt, mode, key, iv),
        CipherId::TripleDes => build::<des::TdesEde3>(Direction::Encrypt, mode, key, iv),
    }
}

/// Builds a decrypting transform.
pub fn new_decryptor(
    cipher: CipherId,
    mode: Mode,
    key: &[u8],
    iv: &[u8],
) -> Result<Box<dyn CipherTransform>> {
    match cipher {
        CipherId::Aes128 => build::<aes::Aes128>(Direction::Decrypt, mode, key, iv),
        CipherId::Aes192 => build::<aes::Aes192>(Direction::Decrypt, mode, key, iv),
        CipherId::Aes256 => build::<aes::Aes256>(Direction::Decrypt, mode, key, iv),
        CipherId::TripleDes => build::<des::TdesEde3>(Direction::Decrypt, mode, key, iv),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Encrypt,
    Decrypt,
}

impl Direction {
    fn category(self) -> ErrorCategory {
        match self {
            Direction::Encrypt => ErrorCategory::Encrypt,
            Direction::Decrypt => ErrorCategory::Decrypt,
        }
    }
}

fn build<C>(direction: Direction, mode: Mode, key: &[u8], iv: &[u8]) -> Result<Box<dyn CipherTransform>>
where
    C: BlockCipher + BlockEncryptMut + BlockDecryptMut + KeyInit + Send + 'static,
    C::BlockSize: IsLess<U256>,
    Le<C::BlockSize, U256>: NonZero,
{
    let category = direction.category();
    if key.len() != C::key_size() {
        return Err(StreamcryptError::with_kind(
            category,
            ErrorKind::InvalidKey,
            format!(
                "key is {} bytes, cipher requires {} bytes",
                key.len(),
                C::key_size()
            ),
        ));
    }
    if iv.len() != C::block_size() {
        return Err(StreamcryptError::with_kind(
            category,
            ErrorKind::InvalidIv,
            format!(
                "IV is {} bytes, cipher requires {} bytes",
                iv.len(),
                C::block_size()
            ),
        ));
    }

    let transform: Box<dyn CipherTransform> = match (mode, direction) {
        (Mode::Cbc, Direction::Encrypt) => Box::new(CbcEncrypt {
            mode: init::<cbc::Encryptor<C>>(category, key, iv)?,
            pending: Vec::new(),
        }),
        (Mode::Cbc, Direction::Decrypt) => Box::new(CbcDecrypt {
            mode: init::<cbc::Decryptor<C>>(category, key, iv)?,
            pending: Vec::new(),
        }),
        (Mode::Cfb, Direction::Encrypt) => Box::new(CfbEncrypt {
            mode: init::<cfb_mode::BufEncryptor<C>>(category, key, iv)?,
        }),
        (Mode::Cfb, Direction::Decrypt) => Box::new(CfbDecrypt {
            mode: init::<cfb_mode::BufDecryptor<C>>(category, key, iv)?,
        }),
        (Mode::Ofb, _) => Box::new(OfbTransform {
            mode: init::<ofb::Ofb<C>>(category, key, iv)?,
            category,
        }),
    };
    Ok(transform)
}

fn init<M: KeyIvInit>(category: ErrorCategory, key: &[u8], iv: &[u8]) -> Result<M> {
    // Lengths were checked against the cipher above.
    M::new_from_slices(key, iv).map_err(|_| {
        StreamcryptError::with_kind(
            category,
            ErrorKind::InternalInvariant,
            "cipher rejected pre-validated key or IV length",
        )
    })
}

/// Splits off the longest prefix of `pending` that is a whole number of blocks.
fn take_whole_blocks(pending: &mut Vec<u8>, block_size: usize) -> Vec<u8> {
    let whole = pending.len() - pending.len() % block_size;
    pending.drain(..whole).collect()
}

struct CbcEncrypt<C>
where
    C: BlockEncryptMut + BlockCipher,
{
    mode: cbc::Encryptor<C>,
    pending: Vec<u8>,
}

impl<C> CbcEncrypt<C>
where
    C: BlockEncryptMut + BlockCipher,
{
    fn encrypt_blocks(&mut self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(C::block_size()) {
            self.mode
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }
}

impl<C> CipherTransform for CbcEncrypt<C>
where
    C: BlockEncryptMut + BlockCipher + Send,
{
    fn update(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        self.pending.extend_from_slice(input);
        let mut blocks = take_whole_blocks(&mut self.pending, C::block_size());
        self.encrypt_blocks(&mut blocks);
        output.extend_from_slice(&blocks);
        Ok(())
    }

    fn finish(self: Box<Self>, output: &mut Vec<u8>) -> Result<()> {
        let mut this = *self;
        // pending is always shorter than a block, so PKCS#7 adds 1..=block bytes.
        let pos = this.pending.len();
        let mut last = Block::<C>::default();
        last[..pos].copy_from_slice(&this.pending);
        <Pkcs7 as Padding<C::BlockSize>>::pad(&mut last, pos);
        this.mode.encrypt_block_mut(&mut last);
        output.extend_from_slice(&last);
        Ok(())
    }
}

struct CbcDecrypt<C>
where
    C: BlockDecryptMut + BlockCipher,
{
    mode: cbc::Decryptor<C>,
    pending: Vec<u8>,
}

impl<C> CipherTransform for CbcDecrypt<C>
where
    C: BlockDecryptMut + BlockCipher + Send,
{
    fn update(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        self.pending.extend_from_slice(input);
        let mut blocks = take_whole_blocks(&mut self.pending, C::block_size());
        for block in blocks.chunks_exact_mut(C::block_size()) {
            self.mode
                .decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        output.extend_from_slice(&blocks);
        Ok(())
    }

    fn finish(self: Box<Self>, _output: &mut Vec<u8>) -> Result<()> {
        if !self.pending.is_empty() {
            return Err(StreamcryptError::with_kind(
                ErrorCategory::Decrypt,
                ErrorKind::Transform,
                format!(
                    "ciphertext length is not a multiple of the {}-byte block size ({} trailing bytes)",
                    C::block_size(),
                    self.pending.len()
                ),
            ));
        }
        Ok(())
    }
}

struct CfbEncrypt<C>
where
    C: BlockEncryptMut + BlockCipher,
{
    mode: cfb_mode::BufEncryptor<C>,
}

impl<C> CipherTransform for CfbEncrypt<C>
where
    C: BlockEncryptMut + BlockCipher + Send,
{
    fn update(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        let start = output.len();
        output.extend_from_slice(input);
        self.mode.encrypt(&mut output[start..]);
        Ok(())
    }

    fn finish(self: Box<Self>, _output: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

struct CfbDecrypt<C>
where
    C: BlockEncryptMut + BlockCipher,
{
    mode: cfb_mode::BufDecryptor<C>,
}

impl<C> CipherTransform for CfbDecrypt<C>
where
    C: BlockEncryptMut + BlockCipher + Send,
{
    fn update(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        let start = output.len();
        output.extend_from_slice(input);
        self.mode.decrypt(&mut output[start..]);
        Ok(())
    }

    fn finish(self: Box<Self>, _output: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

/// OFB is symmetric; the same keystream application encrypts and decrypts.
struct OfbTransform<C>
where
    C: BlockEncryptMut + BlockCipher,
    C::BlockSize: IsLess<U256>,
    Le<C::BlockSize, U256>: NonZero,
{
    mode: ofb::Ofb<C>,
    category: ErrorCategory,
}

impl<C> CipherTransform for OfbTransform<C>
where
    C: BlockEncryptMut + BlockCipher + Send,
    C::BlockSize: IsLess<U256>,
    Le<C::BlockSize, U256>: NonZero,
{
    fn update(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        let start = output.len();
        output.extend_from_slice(input);
        self.mode
            .try_apply_keystream(&mut output[start..])
            .map_err(|_| {
                StreamcryptError::with_kind(
                    self.category,
                    ErrorKind::Transform,
                    "OFB keystream exhausted",
                )
            })
    }

    fn finish(self: Box<Self>, _output: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_256: [u8; 32] = [0x11; 32];
    const IV_16: [u8; 16] = [0x22; 16];

    fn run(transform: Box<dyn CipherTransform>, pieces: &[&[u8]]) -> Vec<u8> {
        let mut transform = transform;
        let mut out = Vec::new();
        for piece in pieces {
            transform.update(piece, &mut out).unwrap();
        }
        transform.finish(&mut out).unwrap();
        out
    }

    #[test]
    fn test_block_sizes() {
        assert_eq!(block_size(CipherId::Aes128, Mode::Cbc), 16);
        assert_eq!(block_size(CipherId::Aes256, Mode::Ofb), 16);
        assert_eq!(block_size(CipherId::TripleDes, Mode::Cbc), 8);
        assert_eq!(block_size(CipherId::TripleDes, Mode::Cfb), 8);
    }

    #[test]
    fn test_key_sizes() {
        assert_eq!(CipherId::Aes128.key_size(), 16);
        assert_eq!(CipherId::Aes192.key_size(), 24);
        assert_eq!(CipherId::Aes256.key_size(), 32);
        assert_eq!(CipherId::TripleDes.key_size(), 24);
    }

    #[test]
    fn test_cbc_pads_to_next_block() {
        let enc = new_encryptor(CipherId::Aes256, Mode::Cbc, &KEY_256, &IV_16).unwrap();
        let ct = run(enc, &[b"hello"]);
        assert_eq!(ct.len(), 16);

        let enc = new_encryptor(CipherId::Aes256, Mode::Cbc, &KEY_256, &IV_16).unwrap();
        let ct = run(enc, &[&[0u8; 16]]);
        assert_eq!(ct.len(), 32, "aligned input gets a full padding block");
    }

    #[test]
    fn test_cbc_decrypt_keeps_padding() {
        let enc = new_encryptor(CipherId::Aes256, Mode::Cbc, &KEY_256, &IV_16).unwrap();
        let ct = run(enc, &[b"hello"]);

        let dec = new_decryptor(CipherId::Aes256, Mode::Cbc, &KEY_256, &IV_16).unwrap();
        let pt = run(dec, &[&ct]);
        assert_eq!(&pt[..5], b"hello");
        assert_eq!(&pt[5..], &[11u8; 11]);
    }

    #[test]
    fn test_cbc_aligned_input_gets_full_pad_block() {
        let enc = new_encryptor(CipherId::TripleDes, Mode::Cbc, &[3u8; 24], &[4u8; 8]).unwrap();
        let ct = run(enc, &[&[0xAAu8; 16]]);
        assert_eq!(ct.len(), 24);

        let dec = new_decryptor(CipherId::TripleDes, Mode::Cbc, &[3u8; 24], &[4u8; 8]).unwrap();
        let pt = run(dec, &[&ct]);
        assert_eq!(&pt[..16], &[0xAAu8; 16]);
        assert_eq!(&pt[16..], &[8u8; 8]);
    }

    #[test]
    fn test_piecewise_input_matches_single_push() {
        let data: Vec<u8> = (0..=255).cycle().take(1000).collect();
        for mode in [Mode::Cbc, Mode::Cfb, Mode::Ofb] {
            let whole = run(
                new_encryptor(CipherId::Aes128, mode, &[7u8; 16], &IV_16).unwrap(),
                &[&data],
            );
            let pieces: Vec<&[u8]> = data.chunks(37).collect();
            let split = run(
                new_encryptor(CipherId::Aes128, mode, &[7u8; 16], &IV_16).unwrap(),
                &pieces,
            );
            assert_eq!(whole, split, "mode {mode}");
        }
    }

    #[test]
    fn test_stream_modes_roundtrip_without_padding() {
        let data = b"an odd number of bytes: 33 total!";
        for mode in [Mode::Cfb, Mode::Ofb] {
            let ct = run(
                new_encryptor(CipherId::TripleDes, mode, &[3u8; 24], &[4u8; 8]).unwrap(),
                &[data],
            );
            assert_eq!(ct.len(), data.len());
            let pt = run(
                new_decryptor(CipherId::TripleDes, mode, &[3u8; 24], &[4u8; 8]).unwrap(),
                &[&ct[..10], &ct[10..]],
            );
            assert_eq!(pt, data);
        }
    }

    #[test]
    fn test_wrong_iv_length() {
        let err = new_decryptor(CipherId::Aes256, Mode::Cbc, &KEY_256, b"2394qsf3-f9")
            .err()
            .expect("expected IV length error");
        assert_eq!(err.category, ErrorCategory::Decrypt);
        assert_eq!(err.kind, Some(ErrorKind::InvalidIv));
    }

    #[test]
    fn test_wrong_key_length() {
        let err = new_encryptor(CipherId::Aes256, Mode::Cbc, b"short", &IV_16)
            .err()
            .expect("expected key length error");
        assert_eq!(err.category, ErrorCategory::Encrypt);
        assert_eq!(err.kind, Some(ErrorKind::InvalidKey));
    }

    #[test]
    fn test_cbc_decrypt_rejects_partial_block() {
        let mut dec = new_decryptor(CipherId::Aes256, Mode::Cbc, &KEY_256, &IV_16).unwrap();
        let mut out = Vec::new();
        dec.update(&[0u8; 20], &mut out).unwrap();
        assert_eq!(out.len(), 16);
        let err = dec.finish(&mut out).expect_err("expected partial block error");
        assert_eq!(err.kind, Some(ErrorKind::Transform));
    }
}
