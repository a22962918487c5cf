//! Builds remote clients for a record.
//!
//! Resolution of credentials and TLS material is delegated to a
//! [`ConnectionResolver`]; the gateway validates what it gets back and fails
//! with a classified [`ConnectError`] instead of handing out a client that
//! would fail on first use. Clients live for a single pass.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use silo_core::ResourceRecord;

use crate::error::{ConnectError, ResolveError};
use crate::remote::memory::InMemoryControlPlane;
use crate::remote::{AdminPlane, DataPlane};

const PEM_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----";
const PEM_PRIVATE_KEY: &str = "PRIVATE KEY-----";

/// Which client a resource kind needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    /// Buckets and objects.
    Data,
    /// Users, policies and service accounts.
    Admin,
}

impl Plane {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Admin => "admin",
        }
    }
}

/// Optional TLS trust and client certificate bundle.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsMaterial {
    pub ca_pem: Option<String>,
    pub client_cert_pem: Option<String>,
    pub client_key_pem: Option<String>,
    pub insecure_skip_verify: bool,
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_pem", &self.ca_pem.is_some())
            .field("client_cert_pem", &self.client_cert_pem.is_some())
            .field("client_key_pem", &self.client_key_pem.as_ref().map(|_| "<redacted>"))
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

/// Unvalidated connection parameters, as produced by a resolver.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub tls: Option<TlsMaterial>,
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("tls", &self.tls)
            .finish()
    }
}

/// Connection parameters that passed validation.
#[derive(Clone)]
pub struct Connection {
    pub endpoint: Url,
    /// Whether TLS is used. Off only for explicit `http://` endpoints.
    pub secure: bool,
    pub access_key: String,
    pub secret_key: String,
    pub tls: Option<TlsMaterial>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint.as_str())
            .field("secure", &self.secure)
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Validate resolved parameters.
    pub fn validate(params: ConnectionParameters) -> Result<Self, ConnectError> {
        let raw = params.endpoint.trim();
        if raw.is_empty() {
            return Err(ConnectError::malformed_endpoint(raw, "endpoint is empty"));
        }
        let with_scheme = if raw.contains("://") {
            raw.to_owned()
        } else {
            format!("https://{raw}")
        };
        let endpoint = Url::parse(&with_scheme)
            .map_err(|e| ConnectError::malformed_endpoint(raw, e.to_string()))?;
        let secure = match endpoint.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(ConnectError::malformed_endpoint(
                    raw,
                    format!("unsupported scheme '{other}'"),
                ));
            }
        };
        if endpoint.host_str().is_none_or(str::is_empty) {
            return Err(ConnectError::malformed_endpoint(raw, "endpoint has no host"));
        }

        if params.access_key.trim().is_empty() {
            return Err(ConnectError::credentials_unavailable("access key is empty"));
        }
        if params.secret_key.is_empty() {
            return Err(ConnectError::credentials_unavailable("secret key is empty"));
        }

        if let Some(tls) = &params.tls {
            validate_tls(tls, secure)?;
        }

        Ok(Self {
            endpoint,
            secure,
            access_key: params.access_key,
            secret_key: params.secret_key,
            tls: params.tls,
        })
    }
}

fn validate_tls(tls: &TlsMaterial, secure: bool) -> Result<(), ConnectError> {
    if !secure {
        return Err(ConnectError::tls_build(
            "TLS material configured for a plain http endpoint",
        ));
    }
    if let Some(ca) = &tls.ca_pem {
        if !ca.contains(PEM_CERTIFICATE) {
            return Err(ConnectError::tls_build("CA bundle is not a PEM certificate"));
        }
    }
    match (&tls.client_cert_pem, &tls.client_key_pem) {
        (None, None) => Ok(()),
        (Some(cert), Some(key)) => {
            if !cert.contains(PEM_CERTIFICATE) {
                return Err(ConnectError::tls_build(
                    "client certificate is not a PEM certificate",
                ));
            }
            if !key.contains(PEM_PRIVATE_KEY) {
                return Err(ConnectError::tls_build("client key is not a PEM private key"));
            }
            Ok(())
        }
        _ => Err(ConnectError::tls_build(
            "client certificate and key must be configured together",
        )),
    }
}

/// Resolves the connection parameters for a record.
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    async fn resolve(&self, record: &ResourceRecord) -> Result<ConnectionParameters, ResolveError>;
}

/// A named set of connection settings.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub url: String,
    pub access_key: String,
    /// Secret key given inline.
    pub secret_key: Option<String>,
    /// Environment variable holding the secret key.
    pub secret_key_env: Option<String>,
    pub tls: Option<TlsMaterial>,
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("url", &self.url)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("secret_key_env", &self.secret_key_env)
            .field("tls", &self.tls)
            .finish()
    }
}

impl Profile {
    /// A profile with an inline secret and no TLS material.
    pub fn new(
        url: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            access_key: access_key.into(),
            secret_key: Some(secret_key.into()),
            ..Self::default()
        }
    }

    fn secret(&self, name: &str) -> Result<String, ResolveError> {
        if let Some(secret) = self.secret_key.as_ref().filter(|s| !s.is_empty()) {
            return Ok(secret.clone());
        }
        match &self.secret_key_env {
            Some(var) => std::env::var(var).map_err(|e| ResolveError::SecretUnavailable {
                profile: name.to_owned(),
                reason: format!("{var}: {e}"),
            }),
            None => Err(ResolveError::SecretUnavailable {
                profile: name.to_owned(),
                reason: "neither secret_key nor secret_key_env is set".to_owned(),
            }),
        }
    }
}

/// Resolves records against configured profiles.
///
/// A record's `credentials_ref` names its profile; records without one use
/// the default profile.
#[derive(Debug, Clone, Default)]
pub struct ProfileResolver {
    profiles: BTreeMap<String, Profile>,
    default_profile: Option<String>,
}

impl ProfileResolver {
    pub const fn new(profiles: BTreeMap<String, Profile>, default_profile: Option<String>) -> Self {
        Self {
            profiles,
            default_profile,
        }
    }

    /// A resolver with one profile that every record uses.
    pub fn single(profile: Profile) -> Self {
        let name = "default".to_owned();
        Self::new(BTreeMap::from([(name.clone(), profile)]), Some(name))
    }

    /// Name of the profile a record resolves to.
    pub fn profile_name<'a>(&'a self, record: &'a ResourceRecord) -> Result<&'a str, ResolveError> {
        record
            .credentials_ref
            .as_deref()
            .or(self.default_profile.as_deref())
            .ok_or(ResolveError::NoDefaultProfile)
    }
}

#[async_trait]
impl ConnectionResolver for ProfileResolver {
    async fn resolve(&self, record: &ResourceRecord) -> Result<ConnectionParameters, ResolveError> {
        let name = self.profile_name(record)?;
        let profile = self
            .profiles
            .get(name)
            .ok_or_else(|| ResolveError::UnknownProfile {
                profile: name.to_owned(),
            })?;
        Ok(ConnectionParameters {
            endpoint: profile.url.clone(),
            access_key: profile.access_key.clone(),
            secret_key: profile.secret(name)?,
            tls: profile.tls.clone(),
        })
    }
}

/// A remote client for one plane.
#[derive(Clone)]
pub enum Client {
    Data(Arc<dyn DataPlane>),
    Admin(Arc<dyn AdminPlane>),
}

impl Client {
    pub fn into_data(self) -> Result<Arc<dyn DataPlane>, ConnectError> {
        match self {
            Self::Data(client) => Ok(client),
            Self::Admin(_) => Err(ConnectError::PlaneUnavailable {
                plane: Plane::Data.as_str(),
            }),
        }
    }

    pub fn into_admin(self) -> Result<Arc<dyn AdminPlane>, ConnectError> {
        match self {
            Self::Admin(client) => Ok(client),
            Self::Data(_) => Err(ConnectError::PlaneUnavailable {
                plane: Plane::Admin.as_str(),
            }),
        }
    }
}

/// Builds clients from validated connections.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn data_plane(&self, connection: &Connection) -> Result<Arc<dyn DataPlane>, ConnectError>;

    async fn admin_plane(
        &self,
        connection: &Connection,
    ) -> Result<Arc<dyn AdminPlane>, ConnectError>;
}

/// Hands out an [`InMemoryControlPlane`] for every connection.
#[derive(Debug, Clone)]
pub struct MemoryClientFactory {
    plane: Arc<InMemoryControlPlane>,
}

impl MemoryClientFactory {
    pub const fn new(plane: Arc<InMemoryControlPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl ClientFactory for MemoryClientFactory {
    async fn data_plane(&self, _connection: &Connection) -> Result<Arc<dyn DataPlane>, ConnectError> {
        Ok(self.plane.clone())
    }

    async fn admin_plane(
        &self,
        _connection: &Connection,
    ) -> Result<Arc<dyn AdminPlane>, ConnectError> {
        Ok(self.plane.clone())
    }
}

/// The external client gateway.
#[derive(Clone)]
pub struct Gateway {
    resolver: Arc<dyn ConnectionResolver>,
    factory: Arc<dyn ClientFactory>,
}

impl Gateway {
    pub fn new(resolver: Arc<dyn ConnectionResolver>, factory: Arc<dyn ClientFactory>) -> Self {
        Self { resolver, factory }
    }

    /// Produce a client for `record`. The record is not modified.
    pub async fn connect(
        &self,
        record: &ResourceRecord,
        plane: Plane,
    ) -> Result<Client, ConnectError> {
        let params = self.resolver.resolve(record).await?;
        let connection = Connection::validate(params)?;
        tracing::debug!(
            resource = %record.id,
            endpoint = %connection.endpoint,
            secure = connection.secure,
            plane = plane.as_str(),
            "Connecting"
        );
        match plane {
            Plane::Data => self.factory.data_plane(&connection).await.map(Client::Data),
            Plane::Admin => self.factory.admin_plane(&connection).await.map(Client::Admin),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_core::{BucketSpec, ResourceId, ResourceSpec};

    fn params(endpoint: &str) -> ConnectionParameters {
        ConnectionParameters {
            endpoint: endpoint.to_owned(),
            access_key: "minio".to_owned(),
            secret_key: "minio123".to_owned(),
            tls: None,
        }
    }

    fn record() -> ResourceRecord {
        ResourceRecord::new(
            ResourceId::new("logs"),
            ResourceSpec::Bucket(BucketSpec::default()),
        )
    }

    #[test]
    fn test_bare_host_defaults_to_tls() {
        let connection = Connection::validate(params("minio.local:9000"));
        assert!(connection.is_ok_and(|c| c.secure && c.endpoint.port() == Some(9000)));
    }

    #[test]
    fn test_explicit_http_disables_tls() {
        let connection = Connection::validate(params("http://localhost:9000"));
        assert!(connection.is_ok_and(|c| !c.secure));
    }

    #[test]
    fn test_malformed_endpoints() {
        for endpoint in ["", "ftp://host", "https://", "http://exa mple"] {
            let result = Connection::validate(params(endpoint));
            assert!(
                matches!(result, Err(ConnectError::MalformedEndpoint { .. })),
                "{endpoint:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_empty_secret_is_credentials_unavailable() {
        let mut p = params("https://s3.local");
        p.secret_key.clear();
        assert!(matches!(
            Connection::validate(p),
            Err(ConnectError::CredentialsUnavailable { .. })
        ));
    }

    #[test]
    fn test_client_cert_without_key_fails_tls_build() {
        let mut p = params("https://s3.local");
        p.tls = Some(TlsMaterial {
            client_cert_pem: Some(format!("{PEM_CERTIFICATE}\nMIIB\n-----END CERTIFICATE-----")),
            ..TlsMaterial::default()
        });
        assert!(matches!(
            Connection::validate(p),
            Err(ConnectError::TlsBuild { .. })
        ));
    }

    #[test]
    fn test_ca_must_be_pem() {
        let mut p = params("https://s3.local");
        p.tls = Some(TlsMaterial {
            ca_pem: Some("not a certificate".into()),
            ..TlsMaterial::default()
        });
        assert!(matches!(
            Connection::validate(p),
            Err(ConnectError::TlsBuild { .. })
        ));
    }

    #[tokio::test]
    async fn test_credentials_ref_selects_profile() {
        let profiles = BTreeMap::from([
            (
                "prod".to_owned(),
                Profile {
                    url: "https://prod.s3".into(),
                    access_key: "prod".into(),
                    secret_key: Some("p".into()),
                    ..Profile::default()
                },
            ),
            (
                "dev".to_owned(),
                Profile {
                    url: "http://dev.s3".into(),
                    access_key: "dev".into(),
                    secret_key: Some("d".into()),
                    ..Profile::default()
                },
            ),
        ]);
        let resolver = ProfileResolver::new(profiles, Some("dev".into()));

        let default = resolver.resolve(&record()).await;
        assert_eq!(default.map(|p| p.access_key).ok().as_deref(), Some("dev"));

        let prod = resolver
            .resolve(&record().with_credentials_ref("prod"))
            .await;
        assert_eq!(prod.map(|p| p.access_key).ok().as_deref(), Some("prod"));

        let missing = resolver
            .resolve(&record().with_credentials_ref("staging"))
            .await;
        assert!(matches!(missing, Err(ResolveError::UnknownProfile { .. })));
    }

    #[tokio::test]
    async fn test_missing_secret_env_fails_connect() {
        let resolver = ProfileResolver::single(Profile {
            url: "https://s3.local".into(),
            access_key: "minio".into(),
            secret_key_env: Some("SILO_TEST_SECRET_THAT_IS_NEVER_SET".into()),
            ..Profile::default()
        });
        let gateway = Gateway::new(
            Arc::new(resolver),
            Arc::new(MemoryClientFactory::new(InMemoryControlPlane::new_arc())),
        );

        let result = gateway.connect(&record(), Plane::Data).await;
        assert!(matches!(
            result,
            Err(ConnectError::CredentialsUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_returns_requested_plane() {
        let resolver = ProfileResolver::single(Profile {
            url: "http://localhost:9000".into(),
            access_key: "minio".into(),
            secret_key: Some("minio123".into()),
            ..Profile::default()
        });
        let gateway = Gateway::new(
            Arc::new(resolver),
            Arc::new(MemoryClientFactory::new(InMemoryControlPlane::new_arc())),
        );

        let client = gateway.connect(&record(), Plane::Admin).await;
        assert!(client.is_ok_and(|c| c.into_data().is_err()));
    }
}
