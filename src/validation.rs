/* src/validation.rs */

//! Defaulting and the validation passes a tenant config goes through before it
//! may enter the registry. Each pass stops at the first problem it finds,
//! except the existence check which reports every missing path.

use crate::discovery::ConfigSource;
use crate::error::ConfigError;
use crate::models::{ConfigFile, DEFAULT_CERTIFICATE_DAYS, HostConfig, IssuerInformation};
use crate::path::resolve_relative_path;
use futures::future::join_all;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy)]
enum Kind {
    Boolean,
    Integer,
    Port,
    String,
    StringList,
    Object(&'static [(&'static str, Kind)]),
}

impl Kind {
    fn describe(self) -> &'static str {
        match self {
            Self::Boolean => "a boolean",
            Self::Integer => "an integer",
            Self::Port => "a non-negative integer",
            Self::String => "a string",
            Self::StringList => "an array of strings",
            Self::Object(_) => "an object",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Boolean => value.is_boolean(),
            Self::Integer => value.is_i64(),
            Self::Port => value.as_u64().is_some_and(|v| u32::try_from(v).is_ok()),
            Self::String => value.is_string(),
            Self::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::Object(_) => value.is_object(),
        }
    }
}

const ISSUER_INFORMATION: &[(&str, Kind)] = &[
    ("country", Kind::String),
    ("state", Kind::String),
    ("city", Kind::String),
    ("organization", Kind::String),
    ("organizationUnit", Kind::String),
    ("emailAddress", Kind::String),
    ("commonName", Kind::String),
];

const CERTIFICATE_AUTHORITY: &[(&str, Kind)] = &[
    ("certificateLocation", Kind::String),
    ("keyLocation", Kind::String),
    ("serialLocation", Kind::String),
    ("pathToCertificateChain", Kind::StringList),
];

const GENERATION_ARGUMENTS: &[(&str, Kind)] = &[
    ("certificateGenerationLocation", Kind::String),
    ("days", Kind::Integer),
    ("certificateAuthority", Kind::Object(CERTIFICATE_AUTHORITY)),
    ("issuerInformation", Kind::Object(ISSUER_INFORMATION)),
];

const CUSTOM_CERTIFICATE: &[(&str, Kind)] = &[
    ("certificateLocation", Kind::String),
    ("privateKeyLocation", Kind::String),
    ("CABundle", Kind::String),
];

const HOST_CONFIG: &[(&str, Kind)] = &[
    ("inboundPort", Kind::Port),
    ("hostDomain", Kind::String),
    ("allowHTTP", Kind::Boolean),
    ("allowHTTPS", Kind::Boolean),
    ("redirectToHTTPS", Kind::Boolean),
    ("synchronizeNetlifyDNS", Kind::Boolean),
    ("autoGenerateCertificate", Kind::Boolean),
    (
        "certificateGenerationArguments",
        Kind::Object(GENERATION_ARGUMENTS),
    ),
    ("customCertificate", Kind::Object(CUSTOM_CERTIFICATE)),
];

/// Fields that must be present, keyed by the object they live in.
const REQUIRED: &[(&str, &[&str])] = &[
    ("", &["inboundPort", "hostDomain"]),
    (
        "certificateGenerationArguments",
        &["certificateGenerationLocation", "certificateAuthority"],
    ),
    (
        "certificateGenerationArguments.certificateAuthority",
        &["certificateLocation", "keyLocation", "serialLocation"],
    ),
    (
        "customCertificate",
        &["certificateLocation", "privateKeyLocation"],
    ),
];

const CERTIFICATE_OPTIONS: [&str; 2] = ["certificateGenerationArguments", "customCertificate"];

/// Certificate options are ignored unless `allowHTTPS` is `true`; removes
/// them so incomplete drafts cannot reject an otherwise valid file.
pub fn drop_unused_certificate_options(document: &mut Value) {
    let Some(object) = document.as_object_mut() else {
        return;
    };
    if object.get("allowHTTPS").and_then(Value::as_bool) == Some(true) {
        return;
    }
    for option in CERTIFICATE_OPTIONS {
        object.remove(option);
    }
}

/// Every known option that is present must have its declared type.
pub fn check_types(document: &Value) -> Result<(), ConfigError> {
    let object = document.as_object().ok_or_else(|| ConfigError::WrongType {
        option: "<document>".to_owned(),
        expected: "an object",
    })?;
    check_fields(object, "", HOST_CONFIG)
}

fn check_fields(
    object: &Map<String, Value>,
    prefix: &str,
    schema: &[(&str, Kind)],
) -> Result<(), ConfigError> {
    for (name, kind) in schema {
        let Some(value) = object.get(*name) else {
            continue;
        };
        let option = join_option(prefix, name);
        if !kind.matches(value) {
            return Err(ConfigError::WrongType {
                option,
                expected: kind.describe(),
            });
        }
        if let (Kind::Object(nested), Some(nested_object)) = (kind, value.as_object()) {
            check_fields(nested_object, &option, nested)?;
        }
    }
    Ok(())
}

fn join_option(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Mandatory options, including those of optional sub-objects that are present.
pub fn check_required(document: &Value) -> Result<(), ConfigError> {
    for (parent, fields) in REQUIRED {
        let object = if parent.is_empty() {
            document.as_object()
        } else {
            parent
                .split('.')
                .try_fold(document, |node, key| node.get(key))
                .and_then(Value::as_object)
        };
        let Some(object) = object else {
            continue;
        };
        if let Some(missing) = fields.iter().find(|f| !object.contains_key(**f)) {
            return Err(ConfigError::MissingOption {
                option: join_option(parent, missing),
            });
        }
    }
    Ok(())
}

/// With HTTPS on, exactly one certificate source has to be usable.
pub fn check_certificate_source(config: &HostConfig) -> Result<(), ConfigError> {
    if !config.allow_https {
        return Ok(());
    }
    match (config.generation().is_some(), config.custom_certificate.is_some()) {
        (true, true) => Err(ConfigError::AmbiguousCertificateSource),
        (false, false) => Err(ConfigError::MissingCertificateSource),
        _ => Ok(()),
    }
}

/// Cross-field rules.
pub fn check_logic(config: &HostConfig) -> Result<(), ConfigError> {
    if !(1024..=65535).contains(&config.inbound_port) {
        return Err(ConfigError::PortOutOfRange {
            port: config.inbound_port,
        });
    }
    if !config.allow_http && !config.allow_https {
        return Err(ConfigError::NoProtocolAllowed);
    }
    if config.allow_http && config.redirect_to_https {
        return Err(ConfigError::RedirectWithHttp);
    }
    if !config.allow_https && config.redirect_to_https {
        return Err(ConfigError::RedirectWithoutHttps);
    }
    if has_control_character(&config.host_domain) {
        return Err(ConfigError::ControlCharacter {
            option: "hostDomain",
        });
    }
    if let Some(arguments) = &config.certificate_generation_arguments {
        if let Some(issuer) = &arguments.issuer_information {
            check_issuer_text(issuer)?;
        }
        if let Some(country) = arguments
            .issuer_information
            .as_ref()
            .and_then(|issuer| issuer.country.as_ref())
            .filter(|country| country.chars().count() > 2)
        {
            return Err(ConfigError::CountryCodeTooLong {
                country: country.clone(),
            });
        }
        if arguments.days() <= 0 {
            return Err(ConfigError::NonPositiveDays {
                days: arguments.days(),
            });
        }
    }
    Ok(())
}

fn has_control_character(value: &str) -> bool {
    value.chars().any(char::is_control)
}

/// Issuer values are written line by line into the `openssl req` config.
fn check_issuer_text(issuer: &IssuerInformation) -> Result<(), ConfigError> {
    let fields = [
        ("issuerInformation.country", &issuer.country),
        ("issuerInformation.state", &issuer.state),
        ("issuerInformation.city", &issuer.city),
        ("issuerInformation.organization", &issuer.organization),
        ("issuerInformation.organizationUnit", &issuer.organization_unit),
        ("issuerInformation.emailAddress", &issuer.email_address),
        ("issuerInformation.commonName", &issuer.common_name),
    ];
    match fields
        .into_iter()
        .find(|(_, value)| value.as_deref().is_some_and(has_control_character))
    {
        Some((option, _)) => Err(ConfigError::ControlCharacter { option }),
        None => Ok(()),
    }
}

/// Fills in defaults and turns every path into an absolute one, relative to
/// the config file's directory (or its owner's home for `~/`).
pub fn apply_defaults(file: &mut ConfigFile) {
    let base = file.config_directory_path.clone();
    let home = file.home_path.clone();
    let resolve = |path: &mut PathBuf| *path = resolve_relative_path(path, &base, &home);

    if let Some(arguments) = file.config.certificate_generation_arguments.as_mut() {
        arguments.days.get_or_insert(DEFAULT_CERTIFICATE_DAYS);
        resolve(&mut arguments.certificate_generation_location);
        let authority = &mut arguments.certificate_authority;
        resolve(&mut authority.certificate_location);
        resolve(&mut authority.key_location);
        resolve(&mut authority.serial_location);
        if let Some(chain) = authority.path_to_certificate_chain.as_mut() {
            chain.iter_mut().for_each(resolve);
        }
    }

    if let Some(custom) = file.config.custom_certificate.as_mut() {
        resolve(&mut custom.certificate_location);
        resolve(&mut custom.private_key_location);
        if let Some(bundle) = custom.ca_bundle.as_mut() {
            resolve(bundle);
        }
    }
}

/// Paths the certificate source in use depends on, labelled for diagnostics.
fn referenced_paths(config: &HostConfig) -> Vec<(&'static str, &Path)> {
    let mut paths = Vec::new();
    if !config.allow_https {
        return paths;
    }
    if let Some(arguments) = config.generation() {
        let authority = &arguments.certificate_authority;
        paths.push((
            "certificateAuthority.certificateLocation",
            authority.certificate_location.as_path(),
        ));
        paths.push((
            "certificateAuthority.keyLocation",
            authority.key_location.as_path(),
        ));
        paths.push((
            "certificateAuthority.serialLocation",
            authority.serial_location.as_path(),
        ));
        for link in authority.path_to_certificate_chain.iter().flatten() {
            paths.push(("certificateAuthority.pathToCertificateChain", link.as_path()));
        }
    } else if let Some(custom) = &config.custom_certificate {
        paths.push((
            "customCertificate.certificateLocation",
            custom.certificate_location.as_path(),
        ));
        paths.push((
            "customCertificate.privateKeyLocation",
            custom.private_key_location.as_path(),
        ));
        if let Some(bundle) = &custom.ca_bundle {
            paths.push(("customCertificate.CABundle", bundle.as_path()));
        }
    }
    paths
}

/// Stats every referenced file; returns one error per missing path.
pub async fn check_existence(config: &HostConfig, source: &dyn ConfigSource) -> Vec<ConfigError> {
    let paths = referenced_paths(config);
    let present = join_all(paths.iter().map(|(_, path)| source.exists(path))).await;
    paths
        .into_iter()
        .zip(present)
        .filter(|(_, exists)| !exists)
        .map(|((option, path), _)| ConfigError::MissingFile {
            option,
            path: path.to_path_buf(),
        })
        .collect()
}
