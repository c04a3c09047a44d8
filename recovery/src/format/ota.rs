// SPDX-FileCopyrightText: 2022-2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    io::{self, Read, Seek, SeekFrom},
    sync::atomic::AtomicBool,
};

use cms::signed_data::SignedData;
use const_oid::{ObjectIdentifier, db::rfc5912};
use memchr::memmem;
use ring::digest::Context;
use thiserror::Error;
use tracing::debug;
use x509_cert::Certificate;

use crate::{
    crypto::{self, RsaPublicKeyExt, SignatureAlgorithm},
    stream::{self, HashingReader},
};

pub const ZIP_EOCD_MAGIC: &[u8; 4] = b"PK\x05\x06";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot find OTA signature footer magic")]
    OtaMagicNotFound,
    #[error("Cannot find EOCD magic")]
    EocdMagicNotFound,
    #[error("EOCD magic found in archive comment")]
    EocdMagicInComment,
    #[error("Zip is too small to contain EOCD")]
    ZipTooSmall,
    #[error("Signature offset exceeds archive comment size")]
    SignatureOffsetTooLarge,
    #[error("Expected exactly one CMS SignerInfo, but found {0}")]
    NotOneCmsSignerInfo(usize),
    #[error("Unsupported digest algorithm: {0}")]
    UnsupportedDigestAlgorithm(ObjectIdentifier),
    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedSignatureAlgorithm(ObjectIdentifier),
    #[error("Signature does not match any of the {0} trusted keys")]
    NoMatchingKey(usize),
    #[error("Crypto error")]
    Crypto(#[from] crypto::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Locate and parse the whole-file signature stored in the zip archive
/// comment. Returns the CMS structure and the number of leading bytes covered
/// by the signature.
pub fn parse_ota_sig(mut reader: impl Read + Seek) -> Result<(SignedData, u64)> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    if file_size < 6 {
        return Err(Error::ZipTooSmall);
    }

    reader.seek(SeekFrom::Current(-6))?;
    let mut footer = [0u8; 6];
    reader.read_exact(&mut footer)?;

    let abs_eoc_offset = u16::from_le_bytes([footer[0], footer[1]]);
    let sig_magic = u16::from_le_bytes([footer[2], footer[3]]);
    let comment_size = u16::from_le_bytes([footer[4], footer[5]]);

    if sig_magic != 0xffff {
        return Err(Error::OtaMagicNotFound);
    }

    // The recovery verifier always assumes a non-zip64 EOCD, so we'll do the
    // same.
    let eocd_size = 22 + u64::from(comment_size);
    if file_size < eocd_size {
        return Err(Error::ZipTooSmall);
    } else if u64::from(abs_eoc_offset) > eocd_size || abs_eoc_offset < 6 {
        return Err(Error::SignatureOffsetTooLarge);
    }

    reader.seek(SeekFrom::Start(file_size - eocd_size))?;
    let mut eocd = vec![0u8; eocd_size as usize];
    reader.read_exact(&mut eocd)?;

    let mut eocd_magic_iter = memmem::find_iter(&eocd, ZIP_EOCD_MAGIC);
    if eocd_magic_iter.next() != Some(0) {
        return Err(Error::EocdMagicNotFound);
    }
    if eocd_magic_iter.next().is_some() {
        return Err(Error::EocdMagicInComment);
    }

    let sig_offset = eocd_size as usize - usize::from(abs_eoc_offset);
    let sd = crypto::parse_cms(&eocd[sig_offset..eocd_size as usize - 6])?;
    // The signature covers everything aside from the archive comment and its
    // length field.
    let hashed_size = file_size - 2 - u64::from(comment_size);

    Ok((sd, hashed_size))
}

/// Verify the whole-file signature of an OTA zip against a set of trusted
/// certificates. Returns the certificate whose key validated the signature.
pub fn verify_ota<'a>(
    mut reader: impl Read + Seek,
    trusted: &'a [Certificate],
    cancel_signal: &AtomicBool,
) -> Result<&'a Certificate> {
    let (sd, hashed_size) = parse_ota_sig(&mut reader)?;

    // Make sure this is a signature scheme we can handle. There's currently no
    // Rust library to verify arbitrary CMS signatures for large files without
    // fully reading them into memory.
    let signer = match sd.signer_infos.0.as_slice() {
        [s] => s,
        s => return Err(Error::NotOneCmsSignerInfo(s.len())),
    };

    if signer.digest_alg.oid != rfc5912::ID_SHA_256 && signer.digest_alg.oid != rfc5912::ID_SHA_1 {
        return Err(Error::UnsupportedDigestAlgorithm(signer.digest_alg.oid));
    } else if signer.signature_algorithm.oid != rfc5912::RSA_ENCRYPTION
        && signer.signature_algorithm.oid != rfc5912::SHA_256_WITH_RSA_ENCRYPTION
    {
        return Err(Error::UnsupportedSignatureAlgorithm(
            signer.signature_algorithm.oid,
        ));
    }

    // Manually hash the parts of the file covered by the signature.
    reader.seek(SeekFrom::Start(0))?;

    // We support SHA1 for verification only.
    let (algorithm, algo) = if signer.digest_alg.oid == rfc5912::ID_SHA_256 {
        (&ring::digest::SHA256, SignatureAlgorithm::Sha256WithRsa)
    } else {
        (
            &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
            SignatureAlgorithm::Sha1WithRsa,
        )
    };

    let mut hashing_reader = HashingReader::new(reader, Context::new(algorithm));

    stream::copy_n(&mut hashing_reader, io::sink(), hashed_size, cancel_signal)?;

    let (_, context) = hashing_reader.finish();
    let digest = context.finish();

    // Like the recovery verifier, try every loaded key in order.
    for (i, cert) in trusted.iter().enumerate() {
        let public_key = match crypto::get_public_key(cert) {
            Ok(k) => k,
            Err(e) => {
                debug!("Skipping unusable key #{i}: {e}");
                continue;
            }
        };

        match public_key.verify_sig(algo, digest.as_ref(), signer.signature.as_bytes()) {
            Ok(()) => {
                debug!("Signature verified with key #{i}");
                return Ok(cert);
            }
            Err(e) => debug!("Key #{i} did not verify signature: {e}"),
        }
    }

    Err(Error::NoMatchingKey(trusted.len()))
}
