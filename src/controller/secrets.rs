//! # Secrets manager
//!
//! Issues and rotates the certificates used for mTLS between the Collector
//! and the Target Allocator. Secrets are owned by a manager identity and
//! carry their rotation bookkeeping as annotations, so the desired state
//! can be derived without parsing certificates back out of the cluster.
//!
//! Rotation policy:
//! - CA: renewed after 80% of its 30 day validity; the previous CA stays in
//!   the served bundle for 24 hours after rotation.
//! - Leaf certificates: renewed in place after 80% of validity, or whenever
//!   the CA they chain to changes.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams};
use kube::{Api, Client};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use thiserror::Error;
use tracing::{debug, info};

use super::managed_resources::{to_typed_manifest, ManagedResourceError};

/// Data key of a leaf certificate.
pub const DATA_KEY_CERTIFICATE: &str = "tls.crt";
/// Data key of a leaf private key.
pub const DATA_KEY_PRIVATE_KEY: &str = "tls.key";
/// Data key of the CA certificate.
pub const DATA_KEY_CA_CERTIFICATE: &str = "ca.crt";
/// Data key of the CA private key.
pub const DATA_KEY_CA_PRIVATE_KEY: &str = "ca.key";
/// Data key of the CA bundle served to clients. Contains the previous CA
/// for a grace period after rotation.
pub const DATA_KEY_CERTIFICATE_BUNDLE: &str = "bundle.crt";

const LABEL_MANAGED_BY: &str = "secrets.gardener.cloud/managed-by";
const LABEL_MANAGED_BY_VALUE: &str = "secrets-manager";
const LABEL_IDENTITY: &str = "secrets.gardener.cloud/manager-identity";

const ANNOTATION_ISSUED_AT: &str = "secrets.gardener.cloud/issued-at";
const ANNOTATION_VALID_UNTIL: &str = "secrets.gardener.cloud/valid-until";
const ANNOTATION_ROTATED_AT: &str = "secrets.gardener.cloud/rotated-at";
const ANNOTATION_CA_ISSUED_AT: &str = "secrets.gardener.cloud/ca-issued-at";

const FIELD_MANAGER: &str = "gardener-extension-otelcol";

/// Validity of issued certificates.
const VALIDITY_DAYS: i64 = 30;
/// Fraction of the validity after which a certificate is renewed.
const RENEW_FRACTION: f64 = 0.8;
/// How long the previous CA stays in the bundle after rotation.
const OLD_CA_RETENTION_HOURS: i64 = 24;

/// Errors raised by the secrets manager.
#[derive(Debug, Error)]
pub enum SecretsError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error("failed generating certificate: {0}")]
    Certificate(#[from] rcgen::Error),
    #[error("secret {secret} is missing required key {key}")]
    MissingData { secret: String, key: String },
    #[error(transparent)]
    Manifest(#[from] ManagedResourceError),
}

/// CA material loaded from or written to the CA secret.
#[derive(Debug, Clone)]
pub struct CaCertificate {
    pub secret_name: String,
    pub common_name: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub bundle_pem: String,
    pub issued_at: DateTime<Utc>,
}

/// Reference to a managed leaf certificate secret.
#[derive(Debug, Clone)]
pub struct ManagedCertificate {
    pub secret_name: String,
}

/// Kind of leaf certificate to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeafKind {
    Server,
    Client,
}

/// Manages generation, rotation and garbage collection of the extension's
/// certificates in a single namespace.
#[derive(Clone)]
pub struct SecretsManager {
    client: Client,
    namespace: String,
    identity: String,
}

impl SecretsManager {
    pub fn new(client: Client, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Ensures a CA certificate secret exists and is within its rotation
    /// policy, issuing or rotating it as needed.
    pub async fn ensure_ca(
        &self,
        name: &str,
        common_name: &str,
    ) -> Result<CaCertificate, SecretsError> {
        let now = Utc::now();
        let existing = self.get_secret(name).await?;

        if let Some(secret) = &existing {
            if let Some(current) = load_ca(secret, name, common_name) {
                if !needs_renewal(current.issued_at, now) {
                    return self.trim_expired_bundle(secret, current, now).await;
                }
            }
        }

        // Issue a new CA. The previous certificate, if any, is retained in
        // the bundle for the rotation grace period.
        let (cert_pem, key_pem) = issue_ca(common_name)?;
        let old_cert = existing.as_ref().and_then(|s| secret_string(s, DATA_KEY_CA_CERTIFICATE));
        let bundle_pem = compose_bundle(&cert_pem, old_cert.as_deref());

        let mut annotations = BTreeMap::from([
            (ANNOTATION_ISSUED_AT.to_string(), now.to_rfc3339()),
            (
                ANNOTATION_VALID_UNTIL.to_string(),
                (now + ChronoDuration::days(VALIDITY_DAYS)).to_rfc3339(),
            ),
        ]);
        if old_cert.is_some() {
            annotations.insert(ANNOTATION_ROTATED_AT.to_string(), now.to_rfc3339());
            info!(secret = name, namespace = %self.namespace, "rotating CA certificate");
        } else {
            info!(secret = name, namespace = %self.namespace, "issuing CA certificate");
        }

        let data = BTreeMap::from([
            (DATA_KEY_CA_CERTIFICATE.to_string(), byte_string(&cert_pem)),
            (DATA_KEY_CA_PRIVATE_KEY.to_string(), byte_string(&key_pem)),
            (DATA_KEY_CERTIFICATE_BUNDLE.to_string(), byte_string(&bundle_pem)),
        ]);
        self.apply_secret(name, data, annotations).await?;

        Ok(CaCertificate {
            secret_name: name.to_string(),
            common_name: common_name.to_string(),
            cert_pem,
            key_pem,
            bundle_pem,
            issued_at: now,
        })
    }

    /// Ensures a server certificate signed by the given CA, renewing it in
    /// place when due or when the CA changed.
    pub async fn ensure_server_certificate(
        &self,
        name: &str,
        common_name: &str,
        dns_names: &[String],
        ca: &CaCertificate,
    ) -> Result<ManagedCertificate, SecretsError> {
        self.ensure_leaf(name, common_name, dns_names, ca, LeafKind::Server)
            .await
    }

    /// Ensures a client certificate signed by the given CA, renewing it in
    /// place when due or when the CA changed.
    pub async fn ensure_client_certificate(
        &self,
        name: &str,
        common_name: &str,
        ca: &CaCertificate,
    ) -> Result<ManagedCertificate, SecretsError> {
        self.ensure_leaf(name, common_name, &[], ca, LeafKind::Client).await
    }

    /// Deletes every secret owned by this manager identity in the
    /// namespace.
    pub async fn cleanup(&self) -> Result<(), SecretsError> {
        debug!(namespace = %self.namespace, identity = %self.identity, "cleaning up managed secrets");

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let selector = format!("{LABEL_IDENTITY}={}", self.identity);
        secrets
            .delete_collection(
                &DeleteParams::default(),
                &ListParams::default().labels(&selector),
            )
            .await?;

        Ok(())
    }

    async fn ensure_leaf(
        &self,
        name: &str,
        common_name: &str,
        dns_names: &[String],
        ca: &CaCertificate,
        kind: LeafKind,
    ) -> Result<ManagedCertificate, SecretsError> {
        let now = Utc::now();
        let ca_issued_at = ca.issued_at.to_rfc3339();

        if let Some(secret) = self.get_secret(name).await? {
            let chained_to_current_ca = annotation(&secret, ANNOTATION_CA_ISSUED_AT)
                .map(|v| v == ca_issued_at)
                .unwrap_or(false);
            let issued_at = annotation(&secret, ANNOTATION_ISSUED_AT).and_then(parse_rfc3339);
            let complete = secret_string(&secret, DATA_KEY_CERTIFICATE).is_some()
                && secret_string(&secret, DATA_KEY_PRIVATE_KEY).is_some();

            if let Some(issued_at) = issued_at {
                if complete && chained_to_current_ca && !needs_renewal(issued_at, now) {
                    return Ok(ManagedCertificate {
                        secret_name: name.to_string(),
                    });
                }
            }
        }

        info!(secret = name, namespace = %self.namespace, "issuing certificate");

        let (cert_pem, key_pem) = issue_leaf(common_name, dns_names, ca, kind)?;
        let data = BTreeMap::from([
            (DATA_KEY_CERTIFICATE.to_string(), byte_string(&cert_pem)),
            (DATA_KEY_PRIVATE_KEY.to_string(), byte_string(&key_pem)),
        ]);
        let annotations = BTreeMap::from([
            (ANNOTATION_ISSUED_AT.to_string(), now.to_rfc3339()),
            (
                ANNOTATION_VALID_UNTIL.to_string(),
                (now + ChronoDuration::days(VALIDITY_DAYS)).to_rfc3339(),
            ),
            (ANNOTATION_CA_ISSUED_AT.to_string(), ca_issued_at),
        ]);
        self.apply_secret(name, data, annotations).await?;

        Ok(ManagedCertificate {
            secret_name: name.to_string(),
        })
    }

    /// Drops the retired CA from the bundle once the rotation grace period
    /// has passed.
    async fn trim_expired_bundle(
        &self,
        secret: &Secret,
        current: CaCertificate,
        now: DateTime<Utc>,
    ) -> Result<CaCertificate, SecretsError> {
        let rotated_at = annotation(secret, ANNOTATION_ROTATED_AT).and_then(parse_rfc3339);
        let overlap_expired = rotated_at
            .map(|at| now > at + ChronoDuration::hours(OLD_CA_RETENTION_HOURS))
            .unwrap_or(false);

        if !overlap_expired || current.bundle_pem == current.cert_pem {
            return Ok(current);
        }

        debug!(secret = %current.secret_name, "dropping retired CA from bundle");

        let mut annotations = secret
            .metadata
            .annotations
            .clone()
            .unwrap_or_default();
        annotations.remove(ANNOTATION_ROTATED_AT);

        let data = BTreeMap::from([
            (DATA_KEY_CA_CERTIFICATE.to_string(), byte_string(&current.cert_pem)),
            (DATA_KEY_CA_PRIVATE_KEY.to_string(), byte_string(&current.key_pem)),
            (
                DATA_KEY_CERTIFICATE_BUNDLE.to_string(),
                byte_string(&current.cert_pem),
            ),
        ]);
        self.apply_secret(&current.secret_name, data, annotations).await?;

        Ok(CaCertificate {
            bundle_pem: current.cert_pem.clone(),
            ..current
        })
    }

    async fn get_secret(&self, name: &str) -> Result<Option<Secret>, SecretsError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        match secrets.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
            Err(err) => Err(SecretsError::Kube(err)),
        }
    }

    async fn apply_secret(
        &self,
        name: &str,
        data: BTreeMap<String, ByteString>,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), SecretsError> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([
                    (LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_VALUE.to_string()),
                    (LABEL_IDENTITY.to_string(), self.identity.clone()),
                ])),
                annotations: Some(annotations),
                ..ObjectMeta::default()
            },
            type_: Some("Opaque".into()),
            data: Some(data),
            ..Secret::default()
        };

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        secrets
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&to_typed_manifest(&secret)?),
            )
            .await?;

        Ok(())
    }
}

/// Whether a certificate issued at the given time is due for renewal.
fn needs_renewal(issued_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let validity_secs = ChronoDuration::days(VALIDITY_DAYS).num_seconds() as f64;
    let renew_after = issued_at + ChronoDuration::seconds((validity_secs * RENEW_FRACTION) as i64);
    now >= renew_after
}

/// Concatenates the current and the retired CA certificate into the served
/// bundle.
fn compose_bundle(current: &str, old: Option<&str>) -> String {
    match old {
        Some(old) if !old.is_empty() && old != current => {
            let mut bundle = String::with_capacity(current.len() + old.len() + 1);
            bundle.push_str(current);
            if !bundle.ends_with('\n') {
                bundle.push('\n');
            }
            bundle.push_str(old);
            bundle
        }
        _ => current.to_string(),
    }
}

/// Issues a self-signed CA certificate, returning certificate and key PEM.
fn issue_ca(common_name: &str) -> Result<(String, String), SecretsError> {
    let key = KeyPair::generate()?;
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(VALIDITY_DAYS);

    let cert = params.self_signed(&key)?;

    Ok((cert.pem(), key.serialize_pem()))
}

/// Issues a leaf certificate signed by the given CA.
fn issue_leaf(
    common_name: &str,
    dns_names: &[String],
    ca: &CaCertificate,
    kind: LeafKind,
) -> Result<(String, String), SecretsError> {
    let (issuer, issuer_key) = rebuild_issuer(ca)?;

    let key = KeyPair::generate()?;
    let mut params = CertificateParams::new(dns_names.to_vec())?;
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![match kind {
        LeafKind::Server => ExtendedKeyUsagePurpose::ServerAuth,
        LeafKind::Client => ExtendedKeyUsagePurpose::ClientAuth,
    }];
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(VALIDITY_DAYS);

    let cert = params.signed_by(&key, &issuer, &issuer_key)?;

    Ok((cert.pem(), key.serialize_pem()))
}

/// Rebuilds the issuer certificate from the stored CA material. Chain
/// verification only depends on the issuer's subject and key, both of which
/// are preserved.
fn rebuild_issuer(ca: &CaCertificate) -> Result<(Certificate, KeyPair), SecretsError> {
    let key = KeyPair::from_pem(&ca.key_pem)?;
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, ca.common_name.as_str());
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let cert = params.self_signed(&key)?;

    Ok((cert, key))
}

/// Loads the CA material out of an existing secret. Returns `None` when the
/// secret is incomplete, which triggers reissuance.
fn load_ca(secret: &Secret, name: &str, common_name: &str) -> Option<CaCertificate> {
    let cert_pem = secret_string(secret, DATA_KEY_CA_CERTIFICATE)?;
    let key_pem = secret_string(secret, DATA_KEY_CA_PRIVATE_KEY)?;
    let bundle_pem = secret_string(secret, DATA_KEY_CERTIFICATE_BUNDLE)?;
    let issued_at = annotation(secret, ANNOTATION_ISSUED_AT).and_then(parse_rfc3339)?;

    Some(CaCertificate {
        secret_name: name.to_string(),
        common_name: common_name.to_string(),
        cert_pem,
        key_pem,
        bundle_pem,
        issued_at,
    })
}

fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
}

fn annotation(secret: &Secret, key: &str) -> Option<String> {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|ann| ann.get(key))
        .cloned()
}

fn parse_rfc3339(raw: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn byte_string(value: &str) -> ByteString {
    ByteString(value.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ca() -> CaCertificate {
        let (cert_pem, key_pem) = issue_ca("otelcol").unwrap();
        CaCertificate {
            secret_name: "ca-otelcol".into(),
            common_name: "otelcol".into(),
            bundle_pem: cert_pem.clone(),
            cert_pem,
            key_pem,
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn issued_ca_is_pem_encoded() {
        let ca = test_ca();
        assert!(ca.cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(ca.key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn leaf_certificates_are_issued_for_both_usages() {
        let ca = test_ca();
        let dns = vec![
            "external-otelcol-targetallocator-https".to_string(),
            "external-otelcol-targetallocator-https.shoot--local--local.svc".to_string(),
        ];

        let (server_cert, server_key) =
            issue_leaf("external-otelcol-targetallocator-https", &dns, &ca, LeafKind::Server)
                .unwrap();
        assert!(server_cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(server_key.contains("PRIVATE KEY"));

        let (client_cert, _) =
            issue_leaf("otelcol-collector-client", &[], &ca, LeafKind::Client).unwrap();
        assert!(client_cert.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn renewal_threshold_is_eighty_percent_of_validity() {
        let issued_at = Utc::now();

        assert!(!needs_renewal(issued_at, issued_at));
        assert!(!needs_renewal(issued_at, issued_at + ChronoDuration::days(23)));
        assert!(needs_renewal(issued_at, issued_at + ChronoDuration::days(24)));
        assert!(needs_renewal(issued_at, issued_at + ChronoDuration::days(31)));
    }

    #[test]
    fn bundle_retains_previous_ca() {
        let current = "-----BEGIN CERTIFICATE-----\nnew\n-----END CERTIFICATE-----\n";
        let old = "-----BEGIN CERTIFICATE-----\nold\n-----END CERTIFICATE-----\n";

        let bundle = compose_bundle(current, Some(old));
        assert!(bundle.starts_with(current));
        assert!(bundle.ends_with(old));

        assert_eq!(compose_bundle(current, None), current);
        assert_eq!(compose_bundle(current, Some(current)), current);
    }
}
