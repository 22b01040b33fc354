//! Root CA signing service.
//!
//! Loads the service configuration, checks that the ledger and root CA
//! credentials are in place, then serves certificate signing requests over
//! HTTP(S). The issuance core lives in the library; this binary only wires
//! it to the outside world.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use ca_ledger::configs::AppConfig;
use ca_ledger::ledger::LedgerStore;
use ca_ledger::server::{self, CaService};
use ca_ledger::signer::Signer;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    // The ledger must be provisioned up front; refusing to start beats
    // silently issuing against a brand-new empty index.
    if !config.ledger.index_path.exists() {
        anyhow::bail!(
            "Cannot start service! Ledger file {} not found!",
            config.ledger.index_path.display()
        );
    }

    std::fs::create_dir_all(&config.ledger.new_cert_dir).context(format!(
        "Failed to create certificate output directory {}",
        config.ledger.new_cert_dir.display()
    ))?;

    let signer = Signer::from_pem_files(&config.ca.root_cert_path, &config.ca.root_key_path)
        .context("Failed to load root CA credentials")?;
    let ledger = LedgerStore::new(&config.ledger.index_path);

    tracing::info!(
        ledger = %config.ledger.index_path.display(),
        domain = %config.ca.domain_suffix,
        max_expiry_days = config.policy.max_expiry_days,
        "certificate authority ready"
    );

    let service = CaService {
        signer,
        ledger,
        domain_suffix: config.ca.domain_suffix.clone(),
        max_expiry_days: config.policy.max_expiry_days,
        new_cert_dir: config.ledger.new_cert_dir.clone(),
    };

    server::start_webserver(config, service)
}
