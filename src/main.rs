//! Certica command-line front end

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use certica::authority_store::{AuthorityStore, CaRequest, CertificateAuthority};
use certica::certificate_store::CertificateStore;
use certica::configs::{AppConfig, DEFAULT_CONFIG_PATH};
use certica::repository::{ArtifactRepository, FsRepository};
use certica::signing::{CertType, SigningRequest};
use certica::system_check;
use certica::templates::{Template, TemplateStore};
use certica::toolkit::{CryptoToolkit, OpensslToolkit};
use certica::trust_store::{
    DirectExecutor, PrivilegedExecutor, SudoExecutor, TrustOutcome, TrustReport,
    TrustStoreInstaller,
};
use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Certica: local Certificate Authority manager
#[derive(Parser, Debug)]
#[command(name = "certica")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Base directory for CA, certificate and template files
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Password fed to sudo for trust-store changes
    #[arg(long, global = true, env = "CERTICA_SUDO_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

/// Subject fields shared by CA creation, signing and templates
#[derive(Args, Debug)]
struct SubjectArgs {
    #[arg(long)]
    organization: Option<String>,
    /// Two-letter country code
    #[arg(long)]
    country: Option<String>,
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    city: Option<String>,
    #[arg(long)]
    validity_days: Option<u32>,
    #[arg(long)]
    key_size: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a self-signed root CA
    CreateCa {
        #[arg(short, long)]
        name: String,
        /// Template to pre-fill subject fields from
        #[arg(short, long)]
        template: Option<String>,
        #[command(flatten)]
        subject: SubjectArgs,
    },
    /// Sign a server or client certificate with an existing CA
    Sign {
        /// Certificate name
        #[arg(short, long)]
        name: String,
        #[arg(long)]
        ca: String,
        /// server or client
        #[arg(long = "type")]
        cert_type: Option<CertType>,
        #[arg(short, long)]
        template: Option<String>,
        #[arg(long)]
        common_name: Option<String>,
        /// DNS subject alternative name (repeatable)
        #[arg(long = "dns")]
        dns_names: Vec<String>,
        /// IP subject alternative name (repeatable)
        #[arg(long = "ip")]
        ip_addresses: Vec<String>,
        #[command(flatten)]
        subject: SubjectArgs,
    },
    /// List complete CAs
    ListCas,
    /// List certificates, optionally for one CA
    ListCerts {
        #[arg(long)]
        ca: Option<String>,
    },
    /// Show a CA certificate, or a leaf certificate with --cert
    Info {
        #[arg(long)]
        ca: String,
        #[arg(long)]
        cert: Option<String>,
    },
    /// Delete a CA and every certificate it signed
    DeleteCa {
        #[arg(short, long)]
        name: String,
    },
    /// Delete one certificate
    DeleteCert {
        #[arg(long)]
        ca: String,
        #[arg(short, long)]
        name: String,
    },
    /// Remove partial entities and leftovers of interrupted operations
    Cleanup,
    /// Save a template of default subject fields
    CreateTemplate {
        #[arg(short, long)]
        name: String,
        #[command(flatten)]
        subject: SubjectArgs,
    },
    /// List saved templates
    ListTemplates,
    /// Install a CA into the system trust store
    Install {
        #[arg(long)]
        ca: String,
    },
    /// Remove a CA from the system trust store
    Remove {
        #[arg(long)]
        ca: String,
    },
    /// Re-run the trust bundle rebuild for an installed CA
    RetryUpdate {
        #[arg(long)]
        ca: String,
    },
    /// Check the crypto library and trust-store tools
    Check,
}

struct App {
    config: AppConfig,
    repository: Arc<dyn ArtifactRepository>,
    toolkit: Arc<dyn CryptoToolkit>,
}

impl App {
    fn authorities(&self) -> AuthorityStore {
        AuthorityStore::new(
            self.config.layout(),
            self.repository.clone(),
            self.toolkit.clone(),
        )
    }

    fn certificates(&self) -> CertificateStore {
        CertificateStore::new(
            self.config.layout(),
            self.repository.clone(),
            self.toolkit.clone(),
        )
    }

    fn templates(&self) -> TemplateStore {
        TemplateStore::new(self.config.layout(), self.repository.clone())
    }

    fn require_ca(&self, name: &str) -> Result<CertificateAuthority> {
        self.authorities()
            .get_ca(name)
            .with_context(|| format!("CA '{name}' does not exist"))
    }

    fn installer(&self, password: Option<String>) -> TrustStoreInstaller {
        let settings = self.config.trust.settings();
        // no sudo on Windows
        let executor: Arc<dyn PrivilegedExecutor> = if self.config.trust.use_sudo
            && settings.platform != "windows"
        {
            Arc::new(SudoExecutor::new(
                password.map(|p| SecretString::new(p.into_boxed_str())),
            ))
        } else {
            Arc::new(DirectExecutor)
        };
        TrustStoreInstaller::new(settings, executor, self.toolkit.clone())
    }
}

fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config file: {}", cli.config.display()))?;
    if let Some(base_dir) = cli.base_dir {
        config.base_dir = base_dir;
    }
    init_tracing(&config.logging.level);

    let app = App {
        config,
        repository: Arc::new(FsRepository::new()),
        toolkit: Arc::new(OpensslToolkit::new()),
    };

    match cli.command {
        Command::CreateCa {
            name,
            template,
            subject,
        } => create_ca(&app, &name, template.as_deref(), subject),
        Command::Sign {
            name,
            ca,
            cert_type,
            template,
            common_name,
            dns_names,
            ip_addresses,
            subject,
        } => {
            let authority = app.require_ca(&ca)?;
            let mut request = app.config.certificate_defaults.request(&name, &ca);
            if let Some(template) = template {
                request = load_template(&app, &template)?.apply_to_signing(request);
            }
            if let Some(cert_type) = cert_type {
                request.cert_type = cert_type;
            }
            if let Some(cn) = common_name {
                request = request.common_name(cn);
            }
            request.dns_names = dns_names;
            request.ip_addresses = ip_addresses;
            let request = apply_subject_to_signing(request, subject);

            let cert = app
                .certificates()
                .sign_certificate(&authority, &request)
                .with_context(|| format!("Failed to sign certificate '{name}'"))?;
            println!("✓ Certificate '{}' signed by CA '{}'", cert.name, cert.ca_name);
            println!("  Common name: {}", request.effective_common_name());
            println!("  Key:         {}", cert.key_path.display());
            println!("  Certificate: {}", cert.cert_path.display());
            Ok(())
        }
        Command::ListCas => {
            let authorities = app.authorities();
            let mut count = 0;
            for ca in authorities.list_cas()? {
                println!("{}\t{}", ca.name, ca.cert_path.display());
                count += 1;
            }
            if count == 0 {
                println!("No CAs found");
            }
            Ok(())
        }
        Command::ListCerts { ca } => {
            let certificates = app.certificates();
            let mut count = 0;
            for cert in certificates.list_certificates(ca.as_deref())? {
                let cert_type = cert
                    .cert_type
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                println!("{}\t{}\t{}", cert.ca_name, cert.name, cert_type);
                count += 1;
            }
            if count == 0 {
                println!("No certificates found");
            }
            Ok(())
        }
        Command::Info { ca, cert } => {
            let text = match cert {
                None => {
                    let authority = app.require_ca(&ca)?;
                    app.authorities().get_ca_info(&authority.cert_path)?
                }
                Some(cert) => {
                    let path = app.config.layout().checked_cert_paths(&ca, &cert)?.cert_path;
                    app.certificates()
                        .get_certificate_info(&path)
                        .with_context(|| format!("Certificate '{cert}' not found under CA '{ca}'"))?
                }
            };
            println!("{text}");
            Ok(())
        }
        Command::DeleteCa { name } => {
            if app.authorities().delete_ca(&name)? {
                println!("✓ CA '{name}' and its certificates deleted");
            } else {
                println!("CA '{name}' does not exist");
            }
            Ok(())
        }
        Command::DeleteCert { ca, name } => {
            if app.certificates().delete_certificate(&ca, &name)? {
                println!("✓ Certificate '{name}' deleted");
            } else {
                println!("Certificate '{name}' does not exist under CA '{ca}'");
            }
            Ok(())
        }
        Command::Cleanup => {
            let mut removed = app.authorities().purge_partial()?;
            removed.extend(app.certificates().purge_partial()?);
            for path in &removed {
                println!("removed {}", path.display());
            }
            println!("✓ Cleanup finished, {} entries removed", removed.len());
            Ok(())
        }
        Command::CreateTemplate { name, subject } => {
            let defaults = Template::default();
            let template = Template {
                organization: subject.organization.unwrap_or(defaults.organization),
                country: subject.country.unwrap_or(defaults.country),
                state: subject.state.unwrap_or(defaults.state),
                city: subject.city.unwrap_or(defaults.city),
                default_validity_days: subject
                    .validity_days
                    .unwrap_or(defaults.default_validity_days),
                default_key_size: subject.key_size.unwrap_or(defaults.default_key_size),
            };
            let path = app.templates().create_template(&name, &template)?;
            println!("✓ Template '{name}' saved to {}", path.display());
            Ok(())
        }
        Command::ListTemplates => {
            let names = app.templates().list_templates()?;
            if names.is_empty() {
                println!("No templates found");
            }
            for name in names {
                println!("{name}");
            }
            Ok(())
        }
        Command::Install { ca } => {
            let authority = app.require_ca(&ca)?;
            let report = app.installer(cli.password).install(&authority);
            finish_trust(report, &ca)
        }
        Command::Remove { ca } => {
            let cert_path = app.authorities().get_ca(&ca).map(|a| a.cert_path);
            let report = app.installer(cli.password).remove(&ca, cert_path.as_deref());
            finish_trust(report, &ca)
        }
        Command::RetryUpdate { ca } => {
            let authority = app.require_ca(&ca)?;
            let report = app.installer(cli.password).update_trust_bundle(&authority);
            finish_trust(report, &ca)
        }
        Command::Check => {
            let report = system_check::run();
            println!("OpenSSL: {}", report.openssl_version);
            for tool in &report.tools {
                match &tool.path {
                    Some(path) => println!("✓ {:<24} {}", tool.name, path.display()),
                    None => println!("✗ {:<24} not found ({})", tool.name, tool.description),
                }
            }
            if !report.has_trust_tool() {
                println!("No trust-update tool found; install/remove will not work on this host");
            }
            Ok(())
        }
    }
}

fn load_template(app: &App, name: &str) -> Result<Template> {
    app.templates()
        .load_template(Some(name))
        .with_context(|| format!("Failed to load template '{name}'"))
}

fn create_ca(app: &App, name: &str, template: Option<&str>, subject: SubjectArgs) -> Result<()> {
    let mut request = app.config.authority_defaults.request(name);
    if let Some(template) = template {
        request = load_template(app, template)?.apply_to_ca(request);
    }
    let request = apply_subject_to_ca(request, subject);

    let created = app
        .authorities()
        .create_root_ca(&request)
        .with_context(|| format!("Failed to create CA '{name}'"))?;
    println!("✓ CA '{name}' created successfully");
    println!("  Common name: {}", created.common_name);
    println!("  Valid for:   {} days", created.validity_days);
    println!("  Key size:    {} bits", created.key_size);
    println!("  Key:         {}", created.authority.key_path.display());
    println!("  Certificate: {}", created.authority.cert_path.display());
    Ok(())
}

fn apply_subject_to_ca(mut request: CaRequest, subject: SubjectArgs) -> CaRequest {
    if let Some(org) = subject.organization {
        request = request.organization(org);
    }
    if let Some(country) = subject.country {
        request = request.country(country);
    }
    if let Some(state) = subject.state {
        request = request.state(state);
    }
    if let Some(city) = subject.city {
        request = request.city(city);
    }
    if let Some(days) = subject.validity_days {
        request = request.validity_days(days);
    }
    if let Some(bits) = subject.key_size {
        request = request.key_size(bits);
    }
    request
}

fn apply_subject_to_signing(mut request: SigningRequest, subject: SubjectArgs) -> SigningRequest {
    if let Some(org) = subject.organization {
        request = request.organization(org);
    }
    if let Some(country) = subject.country {
        request = request.country(country);
    }
    if let Some(state) = subject.state {
        request = request.state(state);
    }
    if let Some(city) = subject.city {
        request = request.city(city);
    }
    if let Some(days) = subject.validity_days {
        request = request.validity_days(days);
    }
    if let Some(bits) = subject.key_size {
        request = request.key_size(bits);
    }
    request
}

fn finish_trust(report: TrustReport, ca: &str) -> Result<()> {
    let visited: Vec<String> = report.visited.iter().map(|s| s.to_string()).collect();
    if let Some(platform) = &report.platform {
        println!("  Platform: {platform}");
    }
    if let Some(anchor) = &report.anchor_path {
        println!("  Anchor: {}", anchor.display());
    }
    println!("  States: {}", visited.join(" -> "));

    match report.outcome {
        TrustOutcome::Installed => {
            println!("✓ CA '{ca}' installed into the system trust store");
            Ok(())
        }
        TrustOutcome::Removed => {
            println!("✓ CA '{ca}' removed from the system trust store");
            Ok(())
        }
        TrustOutcome::Failed {
            error: certica::CerticaError::VerificationFailed(message),
            ..
        } => {
            println!("⚠ Trust store files updated but not confirmed: {message}");
            Ok(())
        }
        TrustOutcome::Failed { state, error } => {
            bail!("trust store operation for CA '{ca}' stopped at {state}: {error}")
        }
    }
}
