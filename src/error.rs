//! Error types for the issuance pipeline.
//!
//! Every component boundary returns one of four distinct kinds instead of a
//! generic failure, so the front end can map each to a transport response:
//! validation problems are the submitter's to fix, busy and database errors
//! concern the ledger, signing errors concern the CA's own credentials.

use std::path::PathBuf;

use openssl::error::ErrorStack;
use thiserror::Error;

/// Malformed or policy-violating certificate request.
///
/// No ledger mutation has occurred when this is returned; the submitter must
/// correct the CSR and resubmit.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Input did not parse as a PEM-encoded PKCS#10 request
    #[error("malformed CSR: {0}")]
    MalformedCsr(#[source] ErrorStack),

    /// Subject email attribute missing or not under the issuing domain
    #[error("email not found or incorrect: expected [username]{expected_suffix}, got {actual:?}")]
    InvalidSubjectEmail {
        expected_suffix: String,
        actual: Option<String>,
    },

    /// Subject carries no common name, so no ledger entry could be written
    #[error("subject has no common name")]
    MissingCommonName,
}

/// Failure on the CA side: bad credentials, assembly, or signing.
#[derive(Debug, Error)]
pub enum SigningError {
    /// Issuer certificate or private key file could not be read
    #[error("cannot read issuer credential {path}: {source}")]
    CredentialFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Issuer certificate or private key did not parse
    #[error("invalid issuer credentials: {0}")]
    Credentials(#[source] ErrorStack),

    /// Certificate construction failed before the signature step
    #[error("certificate assembly failed: {0}")]
    Build(#[from] ErrorStack),

    /// The signature operation itself failed
    #[error("signing failed: {0}")]
    Sign(#[source] ErrorStack),

    /// Requested validity does not fit the expiry encoding
    #[error("validity window out of range")]
    ValidityOutOfRange,

    /// Freshly generated serials collided with the ledger twice in a row
    #[error("serial number generation exhausted after retry")]
    SerialExhausted,
}

/// The ledger is locked by another in-flight issuance.
///
/// Transient: nothing was mutated and the caller may retry later.
#[derive(Debug, Error)]
#[error("ledger {} currently locked! Please, try later!", path.display())]
pub struct BusyError {
    pub path: PathBuf,
}

/// Ledger scan or append failure.
///
/// Success is only ever reported after a confirmed flush, so any error here
/// means no durable mutation took place.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Candidate serial number already recorded
    #[error("serial number \"{serial}\" in use! Try again!")]
    SerialCollision { serial: String },

    /// Read or append on the ledger file failed
    #[error("ledger I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Any failure of a single issuance attempt.
#[derive(Debug, Error)]
pub enum IssueError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Busy(#[from] BusyError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}
