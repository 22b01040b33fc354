//! Certificate derivation and signing.
//!
//! Builds an X.509v3 end-entity certificate from a validated request and the
//! root CA's credentials, then records it in the ledger before handing it
//! back. Issuance and the ledger append are one logical transaction from the
//! caller's side: a failed commit means no certificate.
//!
//! Serial numbers are random 128-bit values. Generation alone does not
//! guarantee uniqueness; the ledger's check-then-append does. On a reported
//! collision the signer regenerates the serial and retries the whole
//! build-sign-commit once before giving up.

use std::path::Path;

use chrono::{TimeZone, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::X509;

use crate::error::{DatabaseError, IssueError, SigningError};
use crate::ledger::{LedgerRecord, LedgerStore};
use crate::request::ValidatedRequest;

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const SECS_PER_DAY: i64 = 24 * 60 * 60;
/// Fresh serials tried per issuance before declaring exhaustion.
const SERIAL_ATTEMPTS: u32 = 2;

/// A signed certificate plus the metadata callers and the ledger care about.
///
/// Never mutated after creation; the PEM body is what the front end returns
/// to the submitter.
#[derive(Debug)]
pub struct IssuedCertificate {
    /// PEM encoding of the signed certificate
    pub pem: Vec<u8>,
    /// Subject common name, copied from the request
    pub common_name: String,
    /// Serial number as lowercase hex, no prefix
    pub serial: String,
    /// Start of the validity window, unix seconds
    pub not_before: i64,
    /// End of the validity window, unix seconds
    pub not_after: i64,
    /// Expiry in compact `YYMMDDHHMMSSZ` form, century stripped
    pub expires: String,
    x509: X509,
}

impl IssuedCertificate {
    pub fn x509(&self) -> &X509 {
        &self.x509
    }
}

/// Signs validated requests with the root CA's certificate and key.
pub struct Signer {
    issuer_cert: X509,
    issuer_key: PKey<Private>,
    digest: MessageDigest,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("issuer_cert", &self.issuer_cert)
            .field("issuer_key", &self.issuer_key)
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// Create a signer from already-loaded issuer credentials.
    ///
    /// Signs with SHA-256 unless overridden via [`with_digest`](Self::with_digest).
    pub fn new(issuer_cert: X509, issuer_key: PKey<Private>) -> Self {
        Self {
            issuer_cert,
            issuer_key,
            digest: MessageDigest::sha256(),
        }
    }

    /// Load the issuer certificate and private key from PEM files.
    ///
    /// # Errors
    /// * [`SigningError::CredentialFile`] - a file could not be read
    /// * [`SigningError::Credentials`] - a file did not parse as PEM
    pub fn from_pem_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, SigningError> {
        let cert_pem = read_credential(cert_path.as_ref())?;
        let issuer_cert = X509::from_pem(&cert_pem).map_err(SigningError::Credentials)?;

        let key_pem = read_credential(key_path.as_ref())?;
        let issuer_key =
            PKey::private_key_from_pem(&key_pem).map_err(SigningError::Credentials)?;

        Ok(Self::new(issuer_cert, issuer_key))
    }

    /// Override the signature digest (default SHA-256).
    pub fn with_digest(mut self, digest: MessageDigest) -> Self {
        self.digest = digest;
        self
    }

    /// Issue a certificate for a validated request and record it.
    ///
    /// The validity window starts at the signing instant (no backdating) and
    /// ends exactly `expiry_days * 86400` seconds later. `expiry_days` is
    /// treated as already clamped by the caller. Subject and public key come
    /// verbatim from the request; the issuer DN is the root certificate's
    /// subject.
    ///
    /// The ledger record is committed before the certificate is returned; on
    /// any commit failure no certificate reaches the caller.
    ///
    /// # Errors
    /// * [`IssueError::Signing`] - credential, assembly, or signature
    ///   failure, or serial collisions on two consecutive tries
    /// * [`IssueError::Busy`] - the ledger is locked by another attempt
    /// * [`IssueError::Database`] - ledger scan or append failure
    pub fn sign(
        &self,
        request: &ValidatedRequest,
        ledger: &LedgerStore,
        expiry_days: u32,
    ) -> Result<(IssuedCertificate, LedgerRecord), IssueError> {
        self.sign_with(request, ledger, expiry_days, &mut random_serial)
    }

    /// Issuance loop with an injectable serial source.
    fn sign_with(
        &self,
        request: &ValidatedRequest,
        ledger: &LedgerStore,
        expiry_days: u32,
        next_serial: &mut dyn FnMut() -> Result<BigNum, ErrorStack>,
    ) -> Result<(IssuedCertificate, LedgerRecord), IssueError> {
        for attempt in 1..=SERIAL_ATTEMPTS {
            let serial = next_serial().map_err(SigningError::Build)?;
            let cert = self.build_certificate(request, &serial, expiry_days)?;
            let record = LedgerRecord::new(
                cert.expires.clone(),
                cert.serial.clone(),
                cert.common_name.clone(),
            );

            let guard = ledger.begin_issuance()?;
            match guard.commit(&record) {
                Ok(()) => return Ok((cert, record)),
                Err(DatabaseError::SerialCollision { .. }) if attempt < SERIAL_ATTEMPTS => {
                    continue;
                }
                Err(DatabaseError::SerialCollision { .. }) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Err(SigningError::SerialExhausted.into())
    }

    /// Assemble and sign one X.509v3 certificate.
    fn build_certificate(
        &self,
        request: &ValidatedRequest,
        serial: &BigNum,
        expiry_days: u32,
    ) -> Result<IssuedCertificate, SigningError> {
        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;

        let serial_hex = serial.to_hex_str()?.to_lowercase();
        let asn1_serial = serial.to_asn1_integer()?;
        builder.set_serial_number(&asn1_serial)?;

        builder.set_subject_name(request.subject_name())?;
        builder.set_issuer_name(self.issuer_cert.subject_name())?;

        let public_key = request.public_key()?;
        builder.set_pubkey(&public_key)?;

        // One signing instant for both bounds keeps the window exact in
        // seconds; two "now" reads could straddle a second boundary.
        let not_before = Utc::now().timestamp();
        let not_after = not_before + i64::from(expiry_days) * SECS_PER_DAY;
        let asn1_not_before = Asn1Time::from_unix(not_before)?;
        builder.set_not_before(&asn1_not_before)?;
        let asn1_not_after = Asn1Time::from_unix(not_after)?;
        builder.set_not_after(&asn1_not_after)?;

        // End-entity certificate: must not sign further certificates
        let mut bc = BasicConstraints::new();
        bc.critical();
        builder.append_extension(bc.build()?)?;

        let mut ku = KeyUsage::new();
        ku.critical();
        ku.digital_signature();
        ku.non_repudiation();
        ku.key_encipherment();
        ku.data_encipherment();
        builder.append_extension(ku.build()?)?;

        builder
            .sign(&self.issuer_key, self.digest)
            .map_err(SigningError::Sign)?;

        let x509 = builder.build();
        let pem = x509.to_pem()?;
        let expires = compact_expiry(not_after).ok_or(SigningError::ValidityOutOfRange)?;

        Ok(IssuedCertificate {
            pem,
            common_name: request.common_name().to_string(),
            serial: serial_hex,
            not_before,
            not_after,
            expires,
            x509,
        })
    }
}

/// Random 128-bit serial number.
fn random_serial() -> Result<BigNum, ErrorStack> {
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial)
}

/// Read one credential file, tagging failures with the path.
fn read_credential(path: &Path) -> Result<Vec<u8>, SigningError> {
    std::fs::read(path).map_err(|source| SigningError::CredentialFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Expiry in the ledger's compact form: two-digit year, no century.
fn compact_expiry(not_after: i64) -> Option<String> {
    let expiry = Utc.timestamp_opt(not_after, 0).single()?;
    Some(expiry.format("%y%m%d%H%M%SZ").to_string())
}
