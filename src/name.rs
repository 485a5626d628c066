//! Naming grammar for service addresses and server questions.
//!
//! A service address embeds a full service identity in five DNS labels:
//!
//! ```text
//! <service>.<job>.<env>.<product>.<zone>
//! ```
//!
//! Server questions address the agents backing a zone instead:
//! `ns<N>`, `ns<N>.<zone>`, `<zone>`, or the bare suffix.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("invalid field regex"));

static ZONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{2}$").expect("invalid zone regex"));

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+([\-\.][a-z0-9]+)*\.[a-z]{2,6}$").expect("invalid domain regex")
});

static NAMESERVER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ns[0-9]+$").expect("invalid nameserver regex"));

static SERVICE_QUESTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9-]+\.){4}[A-Za-z0-9]{2}$").expect("invalid service question regex")
});

static SERVER_QUESTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(ns[0-9]+(\.[A-Za-z0-9]{2})?|[A-Za-z0-9]{2})?$")
        .expect("invalid server question regex")
});

/// Errors raised while parsing a service address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    /// The address does not consist of exactly five labels.
    #[error("address {0:?} must be service.job.env.product.zone")]
    WrongFieldCount(String),

    /// A label failed its validator.
    #[error("{field} {value:?} is invalid")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// The five-tuple naming a set of endpoints in the catalog.
///
/// `provider` carries the scheduler tag for outbound catalog writes and
/// stays empty on the read path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Transport or protocol name, e.g. `http`.
    pub service: String,
    /// Workload within the product, e.g. `api`.
    pub job: String,
    /// Environment, e.g. `prod`.
    pub env: String,
    /// Owning application.
    pub product: String,
    /// Two-letter failure-domain code.
    pub zone: String,
    /// Scheduler tag, unused on the read path.
    pub provider: String,
}

impl Identity {
    /// Canonical textual form, `service.job.env.product.zone`.
    ///
    /// An empty zone is omitted; addresses parsed off the wire always
    /// carry one.
    pub fn addr(&self) -> String {
        let mut fields = vec![
            self.service.as_str(),
            self.job.as_str(),
            self.env.as_str(),
            self.product.as_str(),
        ];
        if !self.zone.is_empty() {
            fields.push(&self.zone);
        }
        fields.join(".")
    }

    /// Catalog tags identifying this service, `glimpse:<field>=<value>`.
    ///
    /// The provider tag is only included when the slot is filled.
    pub fn to_tags(&self) -> Vec<String> {
        let mut tags = vec![
            format!("glimpse:env={}", self.env),
            format!("glimpse:job={}", self.job),
            format!("glimpse:product={}", self.product),
            format!("glimpse:service={}", self.service),
        ];
        if !self.provider.is_empty() {
            tags.push(format!("glimpse:provider={}", self.provider));
        }
        tags
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr())
    }
}

/// Parse a service address into an [`Identity`].
///
/// The address must consist of exactly five labels; each is checked
/// against its validator and the first failure is reported with the
/// offending field and value.
pub fn parse_identity(addr: &str) -> Result<Identity, NameError> {
    let fields: Vec<&str> = addr.split('.').collect();
    if fields.len() != 5 {
        return Err(NameError::WrongFieldCount(addr.to_string()));
    }

    let (service, job, env, product, zone) =
        (fields[0], fields[1], fields[2], fields[3], fields[4]);

    for (name, value) in [
        ("service", service),
        ("job", job),
        ("env", env),
        ("product", product),
    ] {
        if !FIELD_RE.is_match(value) {
            return Err(NameError::InvalidField {
                field: name,
                value: value.to_string(),
            });
        }
    }
    if !ZONE_RE.is_match(zone) {
        return Err(NameError::InvalidField {
            field: "zone",
            value: zone.to_string(),
        });
    }

    Ok(Identity {
        service: service.to_string(),
        job: job.to_string(),
        env: env.to_string(),
        product: product.to_string(),
        zone: zone.to_string(),
        provider: String::new(),
    })
}

/// Whether `domain` is a valid zone suffix.
pub fn is_valid_domain(domain: &str) -> bool {
    DOMAIN_RE.is_match(domain)
}

/// Whether `zone` is a valid two-letter zone code.
pub fn is_valid_zone(zone: &str) -> bool {
    ZONE_RE.is_match(zone)
}

/// Shape of a question name once the zone suffix has been stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    /// Five labels matching the identity grammar.
    Service,
    /// Nameserver or zone selector, including the empty name.
    Server,
    /// Under the zone but matching neither grammar.
    Invalid,
}

/// Classify a local (suffix-stripped) question name.
pub fn classify(local: &str) -> QuestionKind {
    if SERVICE_QUESTION_RE.is_match(local) {
        QuestionKind::Service
    } else if SERVER_QUESTION_RE.is_match(local) {
        QuestionKind::Server
    } else {
        QuestionKind::Invalid
    }
}

/// Split a server question into its nameserver and zone parts.
///
/// The caller has already matched `local` against the server grammar:
/// the empty name enumerates all servers, a lone `ns<N>` names one
/// server across all zones, a lone zone pivots the enumeration, and
/// `ns<N>.<zone>` names one server within a zone.
pub fn parse_server_question(local: &str) -> (Option<&str>, &str) {
    if local.is_empty() {
        return (None, "");
    }

    match local.split_once('.') {
        None => {
            if NAMESERVER_RE.is_match(local) {
                (Some(local), "")
            } else {
                (None, local)
            }
        }
        Some((ns, zone)) => (Some(ns), zone),
    }
}
