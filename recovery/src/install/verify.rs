// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use thiserror::Error;
use tracing::info;
use x509_cert::Certificate;

use crate::{crypto, format::ota};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open package: {0:?}")]
    Open(PathBuf, #[source] io::Error),
    #[error("Package signature is not valid: {0:?}")]
    Signature(PathBuf, #[source] ota::Error),
}

/// Package signature checking.
pub trait Verifier {
    fn load_keys(&self, path: &Path) -> crypto::Result<Vec<Certificate>>;

    fn verify(
        &self,
        package: &Path,
        keys: &[Certificate],
        cancel_signal: &AtomicBool,
    ) -> Result<(), Error>;
}

/// Verifies the whole-file CMS signature appended to the package's zip
/// comment against PEM certificates.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignatureVerifier;

impl Verifier for SignatureVerifier {
    fn load_keys(&self, path: &Path) -> crypto::Result<Vec<Certificate>> {
        crypto::read_pem_certs_file(path)
    }

    fn verify(
        &self,
        package: &Path,
        keys: &[Certificate],
        cancel_signal: &AtomicBool,
    ) -> Result<(), Error> {
        let file = File::open(package).map_err(|e| Error::Open(package.to_owned(), e))?;

        let cert = ota::verify_ota(BufReader::new(file), keys, cancel_signal)
            .map_err(|e| Error::Signature(package.to_owned(), e))?;

        info!("Package signed by: {}", cert.tbs_certificate.subject);

        Ok(())
    }
}
