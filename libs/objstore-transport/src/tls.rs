//! TLS trust negotiation for the transport.
//!
//! Resolution happens once per build:
//! 1. [`resolve_trust`] decides between validated and permissive trust.
//! 2. The active verifier is wrapped with the hostname policy.
//! 3. [`build_tls_context`] walks the provider fallback chain: pinned
//!    provider, default provider, caller fallback config, none.
//!
//! The OS trust store is read and parsed on first use, then shared by every
//! transport in the process.

use crate::config::{ConnectionConfig, TlsRootConfig};
use crate::error::TransportError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{ResolvesClientCert, WebPkiServerVerifier, verify_server_name};
use rustls::crypto::{CryptoProvider, SecureRandom, WebPkiSupportedAlgorithms};
use rustls::server::ParsedCertificate;
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// OS trust store, parsed once per process.
struct NativeRoots {
    store: Arc<RootCertStore>,
    found: usize,
    ignored: usize,
}

static NATIVE_ROOTS: OnceLock<NativeRoots> = OnceLock::new();

fn native_roots() -> &'static NativeRoots {
    NATIVE_ROOTS.get_or_init(|| {
        let loaded = rustls_native_certs::load_native_certs();
        for err in &loaded.errors {
            tracing::warn!(error = %err, "skipping unreadable native root source");
        }
        let mut store = RootCertStore::empty();
        let found = loaded.certs.len();
        let (added, ignored) = store.add_parsable_certificates(loaded.certs);
        tracing::debug!(found, added, ignored, "parsed native trust store");
        NativeRoots {
            store: Arc::new(store),
            found,
            ignored,
        }
    })
}

/// The process default crypto provider, or `aws-lc-rs` when none is installed.
///
/// Never installs a provider globally.
pub fn default_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Look up a crypto provider by name.
///
/// # Errors
/// Returns `TransportError::UnknownTlsProvider` for names not compiled in.
pub fn provider_by_name(name: &str) -> Result<Arc<CryptoProvider>, TransportError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "aws-lc-rs" | "aws_lc_rs" => Ok(Arc::new(rustls::crypto::aws_lc_rs::default_provider())),
        #[cfg(feature = "ring")]
        "ring" => Ok(Arc::new(rustls::crypto::ring::default_provider())),
        _ => Err(TransportError::UnknownTlsProvider(name.to_owned())),
    }
}

/// Source of client-certificate resolvers (key managers).
pub trait KeyManagerFactory: Send + Sync {
    fn key_managers(&self) -> Vec<Arc<dyn ResolvesClientCert>>;
}

/// Source of server-certificate verifiers (trust managers).
pub trait TrustManagerFactory: Send + Sync {
    fn trust_managers(&self) -> Vec<Arc<dyn ServerCertVerifier>>;
}

/// Caller-supplied hostname check used under strict hostname verification.
pub trait HostnameVerifier: Send + Sync {
    /// Return `true` to accept `end_entity` for `server_name`
    fn verify(&self, server_name: &ServerName<'_>, end_entity: &CertificateDer<'_>) -> bool;
}

/// Trust-manager factory backed by a root certificate store.
pub struct RootStoreTrustManagers {
    roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
}

impl RootStoreTrustManagers {
    #[must_use]
    pub fn new(roots: impl Into<Arc<RootCertStore>>, provider: Arc<CryptoProvider>) -> Self {
        Self {
            roots: roots.into(),
            provider,
        }
    }

    /// Root store of the configured default trust source.
    ///
    /// # Errors
    /// Returns `TransportError::Tls` when the native store has no usable
    /// certificate.
    pub fn from_roots(roots: TlsRootConfig, provider: Arc<CryptoProvider>) -> Result<Self, TransportError> {
        Ok(Self::new(root_store(roots)?, provider))
    }
}

impl TrustManagerFactory for RootStoreTrustManagers {
    fn trust_managers(&self) -> Vec<Arc<dyn ServerCertVerifier>> {
        match WebPkiServerVerifier::builder_with_provider(
            Arc::clone(&self.roots),
            Arc::clone(&self.provider),
        )
        .build()
        {
            Ok(verifier) => vec![verifier as Arc<dyn ServerCertVerifier>],
            Err(e) => {
                tracing::warn!(error = %e, "root store yields no trust manager");
                Vec::new()
            }
        }
    }
}

fn root_store(roots: TlsRootConfig) -> Result<Arc<RootCertStore>, TransportError> {
    match roots {
        TlsRootConfig::WebPki => {
            let mut store = RootCertStore::empty();
            store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Ok(Arc::new(store))
        }
        TlsRootConfig::Native => {
            let native = native_roots();
            if native.store.is_empty() {
                return Err(TransportError::Tls(
                    format!(
                        "native trust store is empty ({} found, {} unparsable)",
                        native.found, native.ignored
                    )
                    .into(),
                ));
            }
            Ok(Arc::clone(&native.store))
        }
    }
}

/// Outcome of trust resolution, fixed for the lifetime of a transport.
#[derive(Clone, Debug)]
pub enum TrustDecision {
    /// Chains are validated by `trust_manager`
    Validated {
        key_managers: Vec<Arc<dyn ResolvesClientCert>>,
        trust_manager: Arc<dyn ServerCertVerifier>,
    },
    /// Every chain is accepted
    Permissive,
}

impl TrustDecision {
    #[must_use]
    pub fn is_permissive(&self) -> bool {
        matches!(self, TrustDecision::Permissive)
    }

    /// Verifier that enforces this decision
    #[must_use]
    pub fn verifier(&self) -> Arc<dyn ServerCertVerifier> {
        match self {
            TrustDecision::Validated { trust_manager, .. } => Arc::clone(trust_manager),
            TrustDecision::Permissive => Arc::new(AcceptAnyServerCert::new(&default_provider())),
        }
    }

    /// First key manager, used for client authentication
    #[must_use]
    pub fn key_manager(&self) -> Option<Arc<dyn ResolvesClientCert>> {
        match self {
            TrustDecision::Validated { key_managers, .. } => key_managers.first().cloned(),
            TrustDecision::Permissive => None,
        }
    }
}

/// Decide how server certificates are trusted.
///
/// # Errors
/// Returns `TransportError::Tls` when validation is on, no factory yields a
/// trust manager, and the default trust store cannot be built.
pub fn resolve_trust(
    config: &ConnectionConfig,
    key_managers: Option<&dyn KeyManagerFactory>,
    trust_managers: Option<&dyn TrustManagerFactory>,
) -> Result<TrustDecision, TransportError> {
    if !config.validate_certificate {
        tracing::warn!(
            target: "objstore_transport::security",
            "certificate validation disabled; every server certificate will be accepted"
        );
        return Ok(TrustDecision::Permissive);
    }

    let key_managers = key_managers.map(|f| f.key_managers()).unwrap_or_default();

    let mut trust = trust_managers.map(|f| f.trust_managers()).unwrap_or_default();
    if trust.is_empty() {
        trust = RootStoreTrustManagers::from_roots(config.tls_roots, default_provider())?.trust_managers();
    }
    let trust_manager = trust
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::Tls("default trust store yields no trust manager".into()))?;

    Ok(TrustDecision::Validated {
        key_managers,
        trust_manager,
    })
}

/// Verifier that accepts every certificate chain.
///
/// Handshake signatures are still checked so the peer must hold the key of
/// the certificate it presents.
#[derive(Debug)]
pub struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyServerCert {
    #[must_use]
    pub fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// How the server name in a certificate is checked.
#[derive(Clone)]
pub enum HostnamePolicy {
    /// Name mismatches are accepted; the chain is still validated
    AcceptAny,
    /// Certificate must match the configured endpoint host
    Endpoint(ServerName<'static>),
    /// Certificate must match the name the connection was opened for
    Peer,
    /// Chain validated without the name, then the caller decides
    Custom(Arc<dyn HostnameVerifier>),
}

impl fmt::Debug for HostnamePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostnamePolicy::AcceptAny => f.write_str("AcceptAny"),
            HostnamePolicy::Endpoint(name) => f.debug_tuple("Endpoint").field(name).finish(),
            HostnamePolicy::Peer => f.write_str("Peer"),
            HostnamePolicy::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl HostnamePolicy {
    /// Policy for `config`, preferring a caller verifier under strict mode.
    #[must_use]
    pub fn from_config(config: &ConnectionConfig, custom: Option<Arc<dyn HostnameVerifier>>) -> Self {
        if !config.strict_hostname_verification {
            tracing::info!("hostname verification relaxed; certificate names are not checked");
            return HostnamePolicy::AcceptAny;
        }
        if let Some(custom) = custom {
            return HostnamePolicy::Custom(custom);
        }
        let Some(host) = config.endpoint_host() else {
            return HostnamePolicy::Peer;
        };
        match ServerName::try_from(host.clone()) {
            Ok(name) => HostnamePolicy::Endpoint(name),
            Err(e) => {
                tracing::warn!(host = %host, error = %e, "endpoint is not a valid server name; checking peer name");
                HostnamePolicy::Peer
            }
        }
    }
}

/// Match the end-entity certificate against `name` regardless of what the
/// trust verifier accepted. A permissive verifier never looks at names.
fn check_name(end_entity: &CertificateDer<'_>, name: &ServerName<'_>) -> Result<(), rustls::Error> {
    let parsed = ParsedCertificate::try_from(end_entity)?;
    verify_server_name(&parsed, name)
}

/// Wraps a verifier and applies a [`HostnamePolicy`] to its name checks.
///
/// Under `Endpoint` and `Peer` the certificate names are checked here as well,
/// so strict verification holds when chain validation is disabled.
#[derive(Debug)]
pub struct HostnameCheckingVerifier {
    inner: Arc<dyn ServerCertVerifier>,
    policy: HostnamePolicy,
}

impl HostnameCheckingVerifier {
    #[must_use]
    pub fn new(inner: Arc<dyn ServerCertVerifier>, policy: HostnamePolicy) -> Self {
        Self { inner, policy }
    }

    fn verify_ignoring_name(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => {
                tracing::debug!(server = ?server_name, "accepting certificate despite name mismatch");
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }
}

impl ServerCertVerifier for HostnameCheckingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match &self.policy {
            HostnamePolicy::AcceptAny => {
                self.verify_ignoring_name(end_entity, intermediates, server_name, ocsp_response, now)
            }
            HostnamePolicy::Endpoint(endpoint) => {
                let verified =
                    self.inner
                        .verify_server_cert(end_entity, intermediates, endpoint, ocsp_response, now)?;
                check_name(end_entity, endpoint)?;
                Ok(verified)
            }
            HostnamePolicy::Peer => {
                let verified =
                    self.inner
                        .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
                check_name(end_entity, server_name)?;
                Ok(verified)
            }
            HostnamePolicy::Custom(verifier) => {
                let verified = self.verify_ignoring_name(
                    end_entity,
                    intermediates,
                    server_name,
                    ocsp_response,
                    now,
                )?;
                if verifier.verify(server_name, end_entity) {
                    Ok(verified)
                } else {
                    Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName))
                }
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }

    fn requires_raw_public_keys(&self) -> bool {
        self.inner.requires_raw_public_keys()
    }

    fn root_hint_subjects(&self) -> Option<&[rustls::DistinguishedName]> {
        self.inner.root_hint_subjects()
    }
}

/// Which stage of the fallback chain produced the installed context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TlsContextSource {
    /// Provider pinned by name in the configuration
    Provider(String),
    /// Process default provider
    Default,
    /// Caller-supplied fallback configuration
    Fallback,
}

/// A ready-to-use TLS client configuration.
#[derive(Clone, Debug)]
pub struct TlsContext {
    pub config: Arc<ClientConfig>,
    pub source: TlsContextSource,
}

/// Provider requested from a context-building attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderChoice<'a> {
    Pinned(&'a str),
    Default,
}

/// Run the fallback chain: pinned provider, default provider, caller
/// fallback, then none. Each failed stage is logged at `error`.
pub fn select_context<F>(
    provider_name: Option<&str>,
    fallback: Option<&Arc<ClientConfig>>,
    verifier: &Arc<dyn ServerCertVerifier>,
    mut attempt: F,
) -> Option<TlsContext>
where
    F: FnMut(ProviderChoice<'_>) -> Result<ClientConfig, TransportError>,
{
    if let Some(name) = provider_name {
        match attempt(ProviderChoice::Pinned(name)) {
            Ok(config) => {
                return Some(TlsContext {
                    config: Arc::new(config),
                    source: TlsContextSource::Provider(name.to_owned()),
                });
            }
            Err(e) => tracing::error!(provider = name, error = %e, "TLS context with pinned provider failed"),
        }
    }

    match attempt(ProviderChoice::Default) {
        Ok(config) => {
            return Some(TlsContext {
                config: Arc::new(config),
                source: TlsContextSource::Default,
            });
        }
        Err(e) => tracing::error!(error = %e, "TLS context with default provider failed"),
    }

    if let Some(fallback) = fallback {
        let mut config = ClientConfig::clone(fallback);
        config.dangerous().set_certificate_verifier(Arc::clone(verifier));
        return Some(TlsContext {
            config: Arc::new(config),
            source: TlsContextSource::Fallback,
        });
    }

    tracing::error!("no TLS context available; https requests will fail");
    None
}

/// Build a client config on `provider` with the given verifier and client
/// certificate resolver.
///
/// # Errors
/// Returns `TransportError::Tls` when the provider supports no safe protocol
/// version.
pub fn client_config(
    provider: Arc<CryptoProvider>,
    secure_random: Option<&'static dyn SecureRandom>,
    verifier: Arc<dyn ServerCertVerifier>,
    key_manager: Option<Arc<dyn ResolvesClientCert>>,
) -> Result<ClientConfig, TransportError> {
    let provider = match secure_random {
        Some(random) => {
            let mut custom = CryptoProvider::clone(&provider);
            custom.secure_random = random;
            Arc::new(custom)
        }
        None => provider,
    };

    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier);

    Ok(match key_manager {
        Some(resolver) => builder.with_client_cert_resolver(resolver),
        None => builder.with_no_client_auth(),
    })
}

/// Caller-supplied TLS inputs collected by the builder.
#[derive(Clone, Default)]
pub struct TlsOptions {
    pub key_managers: Option<Arc<dyn KeyManagerFactory>>,
    pub trust_managers: Option<Arc<dyn TrustManagerFactory>>,
    pub hostname_verifier: Option<Arc<dyn HostnameVerifier>>,
    pub secure_random: Option<&'static dyn SecureRandom>,
    pub fallback: Option<Arc<ClientConfig>>,
}

/// Result of TLS setup. Either field may be absent; the transport keeps
/// working for plain HTTP.
#[derive(Clone, Debug)]
pub struct TlsSetup {
    pub trust: Option<TrustDecision>,
    pub context: Option<TlsContext>,
}

/// Resolve trust, apply the hostname policy and build the TLS context.
///
/// Never fails: every failure is logged and ends with `context: None`.
pub fn build_tls_context(config: &ConnectionConfig, options: &TlsOptions) -> TlsSetup {
    let trust = match resolve_trust(
        config,
        options.key_managers.as_deref(),
        options.trust_managers.as_deref(),
    ) {
        Ok(trust) => trust,
        Err(e) => {
            tracing::error!(error = %e, "trust resolution failed; TLS will not be installed");
            return TlsSetup {
                trust: None,
                context: None,
            };
        }
    };

    let policy = HostnamePolicy::from_config(config, options.hostname_verifier.clone());
    let verifier: Arc<dyn ServerCertVerifier> =
        Arc::new(HostnameCheckingVerifier::new(trust.verifier(), policy));
    let key_manager = trust.key_manager();

    let context = select_context(
        config.tls_provider.as_deref(),
        options.fallback.as_ref(),
        &verifier,
        |choice| {
            let provider = match choice {
                ProviderChoice::Pinned(name) => provider_by_name(name)?,
                ProviderChoice::Default => default_provider(),
            };
            client_config(
                provider,
                options.secure_random,
                Arc::clone(&verifier),
                key_manager.clone(),
            )
        },
    );

    TlsSetup {
        trust: Some(trust),
        context,
    }
}
