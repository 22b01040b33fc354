//! CA Ledger - Certificate Authority with an append-only issuance ledger
//!
//! A certificate signing service that issues X.509 certificates from
//! PKCS#10 requests on behalf of a root CA, and durably records every
//! issued certificate in a tamper-evident `index.txt` ledger keyed by
//! serial number.
//!
//! # Overview
//!
//! Issuance is a three-step pipeline:
//!
//! ```text
//! CSR bytes → Validator (parse + subject policy)
//!           → Signer    (derive fields, assign serial, sign)
//!           → Ledger    (uniqueness check + durable append, under lock)
//! ```
//!
//! The ledger file is the only shared mutable resource. Each issuance
//! attempt takes an exclusive, non-blocking advisory lock on it for the
//! duration of a single check-then-append, so serial uniqueness holds
//! across threads and across independent processes sharing the same
//! ledger path. A locked ledger fails the attempt immediately rather
//! than queueing; retry policy belongs to the caller.
//!
//! # Quick Start
//!
//! ```no_run
//! use ca_ledger::ledger::LedgerStore;
//! use ca_ledger::request::ValidatedRequest;
//! use ca_ledger::signer::Signer;
//!
//! # fn main() -> Result<(), ca_ledger::error::IssueError> {
//! let signer = Signer::from_pem_files("certs/root.pem", "certs/root.key")
//!     .map_err(ca_ledger::error::IssueError::Signing)?;
//! let ledger = LedgerStore::new("db/index.txt");
//!
//! # let csr_bytes: Vec<u8> = vec![];
//! let request = ValidatedRequest::from_pem(&csr_bytes, "@domain.com")?;
//! let (cert, record) = signer.sign(&request, &ledger, 30)?;
//!
//! println!("issued {} with serial {}", cert.common_name, record.serial);
//! # Ok(())
//! # }
//! ```
//!
//! # Module Overview
//!
//! - [`request`]: CSR parsing and subject policy (email under the issuing
//!   domain, common name present)
//! - [`signer`]: certificate derivation, serial assignment, signing, and
//!   the commit-before-return contract
//! - [`ledger`]: the append-only `index.txt` store and its lock guard
//! - [`server`]: axum front end mapping issuance outcomes to HTTP responses
//! - [`configs`]: TOML service configuration
//! - [`error`]: the four failure kinds every issuance can surface
//!
//! # Error Handling
//!
//! The core never panics on bad input and never swallows a failure: every
//! operation returns one of four inspectable kinds (validation, signing,
//! busy, database) so callers can decide what is retryable. See
//! [`error::IssueError`].

pub mod configs;
pub mod error;
pub mod ledger;
pub mod request;
pub mod server;
pub mod signer;
