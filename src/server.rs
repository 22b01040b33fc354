//! HTTP front end for certificate signing requests.
//!
//! Accepts PEM CSRs over `POST /ca/api/v1.0/csr`, clamps the requested
//! validity to the configured maximum, and hands the request to the signing
//! core. The submitter gets the signed certificate body back on success, or
//! a JSON `{"ERROR": ...}` payload with a status code matching the failure
//! kind. Caller authentication is deliberately out of scope here.

use crate::configs::AppConfig;
use crate::error::IssueError;
use crate::ledger::LedgerStore;
use crate::request::ValidatedRequest;
use crate::signer::{IssuedCertificate, Signer};
use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const EXPIRY_HEADER: &str = "Expiry-days";

/// Everything one issuance needs, shared across connections.
pub struct CaService {
    pub signer: Signer,
    pub ledger: LedgerStore,
    pub domain_suffix: String,
    pub max_expiry_days: u32,
    pub new_cert_dir: PathBuf,
}

#[derive(Serialize)]
struct ErrorBody {
    #[serde(rename = "ERROR")]
    error: String,
}

#[derive(Serialize)]
struct StatusBody {
    status: &'static str,
    issued_certificates: usize,
}

/// Start the front end and serve until shutdown.
///
/// Serves HTTPS when both TLS paths are configured, plain HTTP otherwise.
pub fn start_webserver(config: AppConfig, service: CaService) -> Result<()> {
    let service = Arc::new(service);
    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(async {
        let sign_service = Arc::clone(&service);
        let status_service = Arc::clone(&service);
        let app = Router::new()
            .route(
                "/ca/api/v1.0/csr",
                post(move |headers: HeaderMap, body: Bytes| {
                    process_csr(Arc::clone(&sign_service), headers, body)
                }),
            )
            .route(
                "/ca/api/v1.0/status",
                get(move || get_status(Arc::clone(&status_service))),
            );

        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .context("Invalid server address")?;

        match (&config.server.tls_cert_path, &config.server.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let tls = RustlsConfig::from_pem_file(cert_path, key_path)
                    .await
                    .context("Failed to load TLS certificates")?;
                tracing::info!(%addr, "HTTPS server starting");
                axum_server::bind_rustls(addr, tls)
                    .serve(app.into_make_service())
                    .await?;
            }
            _ => {
                tracing::warn!(%addr, "TLS not configured, serving plain HTTP");
                axum_server::bind(addr)
                    .serve(app.into_make_service())
                    .await?;
            }
        }
        Ok(())
    })
}

/// Handle one certificate signing request.
async fn process_csr(service: Arc<CaService>, headers: HeaderMap, body: Bytes) -> Response {
    let days = match requested_days(&headers) {
        Ok(days) => days.min(service.max_expiry_days),
        Err(message) => {
            tracing::error!("{message}");
            return error_response(StatusCode::UNPROCESSABLE_ENTITY, message);
        }
    };

    let request = match ValidatedRequest::from_pem(&body, &service.domain_suffix) {
        Ok(request) => request,
        Err(e) => {
            tracing::error!(error = %e, "certificate request rejected");
            return issue_error_response(IssueError::Validation(e));
        }
    };

    match service.signer.sign(&request, &service.ledger, days) {
        Ok((cert, _record)) => {
            tracing::info!(
                cn = %cert.common_name,
                serial = %cert.serial,
                expires = %cert.expires,
                "certificate generated"
            );
            save_certificate(&service.new_cert_dir, &cert);
            (StatusCode::OK, cert.pem).into_response()
        }
        Err(e) => {
            tracing::error!(cn = %request.common_name(), error = %e, "certificate not generated");
            issue_error_response(e)
        }
    }
}

async fn get_status(service: Arc<CaService>) -> Response {
    match service.ledger.record_count() {
        Ok(count) => (
            StatusCode::OK,
            Json(StatusBody {
                status: "ok",
                issued_certificates: count,
            }),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Extract and parse the mandatory expiry header.
fn requested_days(headers: &HeaderMap) -> Result<u32, String> {
    let value = headers.get(EXPIRY_HEADER).ok_or_else(|| {
        format!("Not all mandatory header params ({EXPIRY_HEADER}) provided! Check request!")
    })?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|days| *days > 0)
        .ok_or_else(|| format!("Header '{EXPIRY_HEADER}' must be a positive number of days"))
}

/// Map each failure kind to its transport status.
fn issue_error_response(err: IssueError) -> Response {
    let status = match &err {
        IssueError::Validation(_) | IssueError::Database(_) => StatusCode::UNPROCESSABLE_ENTITY,
        IssueError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
        IssueError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

/// Persist the signed certificate next to the ledger. Failure to save is
/// logged but does not fail the request; the caller already has the body.
fn save_certificate(dir: &Path, cert: &IssuedCertificate) {
    let path = dir.join(format!("{}.pem", cert.serial));
    if let Err(e) = std::fs::write(&path, &cert.pem) {
        tracing::error!(path = %path.display(), error = %e, "cannot save certificate");
    }
}
