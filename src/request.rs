//! Certificate request parsing and subject policy checks.
//!
//! Validation is purely functional over the submitted bytes: it either
//! yields a [`ValidatedRequest`] the signer can trust, or an error telling
//! the submitter what to fix. Nothing is signed and nothing touches the
//! ledger until a request has passed this step.

use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Public};
use openssl::x509::{X509NameRef, X509Req};

use crate::error::ValidationError;

/// A parsed PKCS#10 request whose subject passed policy.
///
/// Policy: the subject must carry an email attribute under the issuing
/// domain, and a common name for the ledger entry. The wrapped request is
/// immutable once constructed.
pub struct ValidatedRequest {
    req: X509Req,
    common_name: String,
    email: String,
}

impl std::fmt::Debug for ValidatedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedRequest")
            .field("common_name", &self.common_name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl ValidatedRequest {
    /// Parse PEM bytes and enforce subject policy.
    ///
    /// # Arguments
    /// * `csr` - raw PEM-encoded PKCS#10 bytes
    /// * `domain_suffix` - required email suffix, e.g. `@domain.com`
    ///
    /// # Errors
    /// * [`ValidationError::MalformedCsr`] - bytes are not a well-formed CSR
    /// * [`ValidationError::InvalidSubjectEmail`] - email missing or outside
    ///   the issuing domain
    /// * [`ValidationError::MissingCommonName`] - subject has no CN
    pub fn from_pem(csr: &[u8], domain_suffix: &str) -> Result<Self, ValidationError> {
        let req = X509Req::from_pem(csr).map_err(ValidationError::MalformedCsr)?;

        let email = match name_entry(req.subject_name(), Nid::PKCS9_EMAILADDRESS) {
            Some(addr) if addr.ends_with(domain_suffix) => addr,
            other => {
                return Err(ValidationError::InvalidSubjectEmail {
                    expected_suffix: domain_suffix.to_string(),
                    actual: other,
                })
            }
        };

        let common_name = name_entry(req.subject_name(), Nid::COMMONNAME)
            .ok_or(ValidationError::MissingCommonName)?;

        Ok(Self {
            req,
            common_name,
            email,
        })
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Subject distinguished name, copied verbatim into issued certificates.
    pub(crate) fn subject_name(&self) -> &X509NameRef {
        self.req.subject_name()
    }

    /// Public key the certificate will be issued for.
    pub(crate) fn public_key(&self) -> Result<PKey<Public>, ErrorStack> {
        self.req.public_key()
    }
}

/// First UTF-8 value of a subject attribute, if present.
fn name_entry(name: &X509NameRef, nid: Nid) -> Option<String> {
    name.entries_by_nid(nid)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|value| value.to_string())
}

/// Build a PEM CSR with the given subject attributes.
#[cfg(test)]
pub(crate) fn make_csr(cn: Option<&str>, email: Option<&str>) -> Vec<u8> {
    use openssl::hash::MessageDigest;
    use openssl::rsa::Rsa;
    use openssl::x509::X509Name;

    let rsa = Rsa::generate(2048).unwrap();
    let key = PKey::from_rsa(rsa).unwrap();

    let mut name = X509Name::builder().unwrap();
    if let Some(cn) = cn {
        name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    }
    if let Some(email) = email {
        name.append_entry_by_nid(Nid::PKCS9_EMAILADDRESS, email)
            .unwrap();
    }
    let name = name.build();

    let mut req = X509Req::builder().unwrap();
    req.set_subject_name(&name).unwrap();
    req.set_pubkey(&key).unwrap();
    req.sign(&key, MessageDigest::sha256()).unwrap();
    req.build().to_pem().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conformant_request_passes() {
        let csr = make_csr(Some("alice"), Some("alice@domain.com"));
        let validated = ValidatedRequest::from_pem(&csr, "@domain.com").unwrap();

        assert_eq!(validated.common_name(), "alice");
        assert_eq!(validated.email(), "alice@domain.com");
    }

    #[test]
    fn test_foreign_domain_rejected() {
        let csr = make_csr(Some("bob"), Some("bob@other.com"));
        let err = ValidatedRequest::from_pem(&csr, "@domain.com").unwrap_err();

        match err {
            ValidationError::InvalidSubjectEmail {
                expected_suffix,
                actual,
            } => {
                assert_eq!(expected_suffix, "@domain.com");
                assert_eq!(actual.as_deref(), Some("bob@other.com"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_email_rejected() {
        let csr = make_csr(Some("carol"), None);
        let err = ValidatedRequest::from_pem(&csr, "@domain.com").unwrap_err();

        assert!(matches!(
            err,
            ValidationError::InvalidSubjectEmail { actual: None, .. }
        ));
    }

    #[test]
    fn test_missing_common_name_rejected() {
        let csr = make_csr(None, Some("dave@domain.com"));
        let err = ValidatedRequest::from_pem(&csr, "@domain.com").unwrap_err();

        assert!(matches!(err, ValidationError::MissingCommonName));
    }

    #[test]
    fn test_garbage_input_is_malformed() {
        let err = ValidatedRequest::from_pem(b"not a csr at all", "@domain.com").unwrap_err();
        assert!(matches!(err, ValidationError::MalformedCsr(_)));
    }
}
