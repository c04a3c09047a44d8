// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};

use cms::{content_info::ContentInfo, signed_data::SignedData};
use rsa::{Pkcs1v15Sign, RsaPublicKey, traits::PublicKeyParts};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_cert::{
    Certificate,
    der::{Decode, referenced::OwnedToRef},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("RSA key size ({}) not supported", .0 * 8)]
    UnsupportedKeySize(usize),
    #[error("Invalid digest length ({0} bytes) for {1:?}")]
    InvalidDigestLength(usize, SignatureAlgorithm),
    #[error("No certificates found in: {0:?}")]
    NoCertificates(PathBuf),
    #[error("Failed to load X509 certificates")]
    LoadCert(#[source] x509_cert::der::Error),
    #[error("Failed to load RSA public key")]
    LoadPubKey(#[source] pkcs8::spki::Error),
    #[error("Failed to RSA verify signature")]
    RsaVerify(#[source] Box<rsa::Error>),
    #[error("Failed to parse CMS signature")]
    CmsParse(#[source] x509_cert::der::Error),
    #[error("Failed to read file: {0:?}")]
    ReadFile(PathBuf, #[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureAlgorithm {
    Sha1WithRsa,
    Sha256WithRsa,
}

impl SignatureAlgorithm {
    /// Length of digest required by the signing algorithm.
    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha1WithRsa => Sha1::output_size(),
            Self::Sha256WithRsa => Sha256::output_size(),
        }
    }
}

fn check_key_size(size: usize) -> Result<()> {
    // RustCrypto does not support 8192-bit keys.
    if size > 4096 / 8 {
        return Err(Error::UnsupportedKeySize(size));
    }

    Ok(())
}

pub trait RsaPublicKeyExt {
    fn verify_sig(&self, algo: SignatureAlgorithm, digest: &[u8], signature: &[u8]) -> Result<()>;
}

impl RsaPublicKeyExt for RsaPublicKey {
    /// Verify the signature against the specified key.
    fn verify_sig(&self, algo: SignatureAlgorithm, digest: &[u8], signature: &[u8]) -> Result<()> {
        // Check this explicitly so we can provide a better error message.
        if digest.len() != algo.digest_len() {
            return Err(Error::InvalidDigestLength(digest.len(), algo));
        }

        check_key_size(self.size())?;

        let scheme = match algo {
            SignatureAlgorithm::Sha1WithRsa => Pkcs1v15Sign::new::<Sha1>(),
            SignatureAlgorithm::Sha256WithRsa => Pkcs1v15Sign::new::<Sha256>(),
        };

        self.verify(scheme, digest, signature)
            .map_err(|e| Error::RsaVerify(Box::new(e)))
    }
}

/// Read every PEM-encoded certificate from a reader. Recovery key files
/// commonly contain more than one trusted certificate concatenated together.
pub fn read_pem_certs(path: &Path, mut reader: impl Read) -> Result<Vec<Certificate>> {
    let mut data = vec![];
    reader
        .read_to_end(&mut data)
        .map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    let certs = Certificate::load_pem_chain(&data).map_err(Error::LoadCert)?;
    if certs.is_empty() {
        return Err(Error::NoCertificates(path.to_owned()));
    }

    Ok(certs)
}

/// Read every PEM-encoded certificate from a file.
pub fn read_pem_certs_file(path: &Path) -> Result<Vec<Certificate>> {
    let reader = File::open(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    read_pem_certs(path, reader)
}

/// Get the RSA public key from a certificate.
pub fn get_public_key(cert: &Certificate) -> Result<RsaPublicKey> {
    let public_key =
        RsaPublicKey::try_from(cert.tbs_certificate.subject_public_key_info.owned_to_ref())
            .map_err(Error::LoadPubKey)?;

    Ok(public_key)
}

/// Parse a CMS [`SignedData`] structure from raw DER-encoded data.
pub fn parse_cms(data: &[u8]) -> Result<SignedData> {
    let ci = ContentInfo::from_der(data).map_err(Error::CmsParse)?;
    let sd = ci
        .content
        .decode_as::<SignedData>()
        .map_err(Error::CmsParse)?;

    Ok(sd)
}
