//! Dataset descriptors: what a dataset is and where it comes from.
//!
//! A descriptor is immutable once registered. The provider-specific locator
//! is a closed enum, so exactly one locator is populated per descriptor and
//! [`DatasetDescriptor::validate`] checks that it matches the provider tag.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::DataError;

/// Backend family responsible for acquiring a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Http,
    Kaggle,
    #[serde(alias = "hf")]
    HuggingFace,
    Uci,
    OpenMl,
    #[serde(alias = "dlt")]
    Pipeline,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::Http,
        ProviderKind::Kaggle,
        ProviderKind::HuggingFace,
        ProviderKind::Uci,
        ProviderKind::OpenMl,
        ProviderKind::Pipeline,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Http => "http",
            ProviderKind::Kaggle => "kaggle",
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::Uci => "uci",
            ProviderKind::OpenMl => "openml",
            ProviderKind::Pipeline => "pipeline",
        }
    }

    /// Whether datasets from this provider need stored secrets.
    pub fn credential_use(self) -> CredentialUse {
        match self {
            ProviderKind::Http | ProviderKind::Uci | ProviderKind::OpenMl => CredentialUse::None,
            ProviderKind::HuggingFace => CredentialUse::Optional,
            ProviderKind::Kaggle | ProviderKind::Pipeline => CredentialUse::Required,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(ProviderKind::Http),
            "kaggle" => Ok(ProviderKind::Kaggle),
            "huggingface" | "hf" => Ok(ProviderKind::HuggingFace),
            "uci" => Ok(ProviderKind::Uci),
            "openml" => Ok(ProviderKind::OpenMl),
            "pipeline" | "dlt" => Ok(ProviderKind::Pipeline),
            other => Err(DataError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// How a provider uses the credential manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialUse {
    None,
    Optional,
    Required,
}

/// Provider-specific location of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    /// A single file URL.
    Url(String),
    /// Several file URLs fetched in parallel.
    Urls(Vec<String>),
    /// Kaggle reference: `owner/slug` for datasets, `c/<name>` for competitions.
    Kaggle(String),
    /// Dataset hub repository id, `owner/name`.
    HubRepo(String),
    UciId(u32),
    #[serde(rename = "openml_id")]
    OpenMlId(u32),
    /// Named REST source and the resources to extract from it.
    Pipeline {
        source: String,
        resources: Vec<String>,
    },
}

impl Locator {
    /// The provider this locator belongs to.
    pub fn provider(&self) -> ProviderKind {
        match self {
            Locator::Url(_) | Locator::Urls(_) => ProviderKind::Http,
            Locator::Kaggle(_) => ProviderKind::Kaggle,
            Locator::HubRepo(_) => ProviderKind::HuggingFace,
            Locator::UciId(_) => ProviderKind::Uci,
            Locator::OpenMlId(_) => ProviderKind::OpenMl,
            Locator::Pipeline { .. } => ProviderKind::Pipeline,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Locator::Url(_) => "url",
            Locator::Urls(_) => "urls",
            Locator::Kaggle(_) => "kaggle",
            Locator::HubRepo(_) => "hub_repo",
            Locator::UciId(_) => "uci_id",
            Locator::OpenMlId(_) => "openml_id",
            Locator::Pipeline { .. } => "pipeline",
        }
    }

    fn check(&self) -> Result<(), String> {
        match self {
            Locator::Url(url) if url.trim().is_empty() => Err("url must not be empty".into()),
            Locator::Urls(urls) if urls.is_empty() => Err("urls must list at least one URL".into()),
            Locator::Urls(urls) if urls.iter().any(|u| u.trim().is_empty()) => {
                Err("urls must not contain empty entries".into())
            }
            Locator::Kaggle(reference) if !reference.contains('/') => Err(format!(
                "kaggle reference '{reference}' must be 'owner/slug' or 'c/<competition>'"
            )),
            Locator::HubRepo(repo) if repo.trim().is_empty() => {
                Err("hub repository must not be empty".into())
            }
            Locator::Pipeline { source, .. } if source.trim().is_empty() => {
                Err("pipeline source must not be empty".into())
            }
            Locator::Pipeline { resources, .. } if resources.is_empty() => {
                Err("pipeline must name at least one resource".into())
            }
            _ => Ok(()),
        }
    }
}

/// A child → parent column relationship used for hierarchical reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyLevel {
    pub child: String,
    pub parent: String,
}

/// A named period such as a promotion or a store refurbishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub id: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub topic_tags: Vec<String>,
    #[serde(default)]
    pub requires_credentials: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub locator: Locator,
    /// Semantic table name (`sales`, `calendar`, ...) → physical file stem.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub standard_mapping: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hierarchies: Vec<HierarchyLevel>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub intervention_windows: BTreeMap<String, TimeWindow>,
}

impl DatasetDescriptor {
    /// Descriptor with the provider implied by the locator and the
    /// credential flag implied by the provider.
    pub fn new(id: impl Into<String>, locator: Locator) -> Self {
        let provider = locator.provider();
        Self {
            id: id.into(),
            provider,
            topic_tags: Vec::new(),
            requires_credentials: provider.credential_use() == CredentialUse::Required,
            license: None,
            description: None,
            locator,
            standard_mapping: BTreeMap::new(),
            hierarchies: Vec::new(),
            intervention_windows: BTreeMap::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topic_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mapping(mut self, semantic: impl Into<String>, physical: impl Into<String>) -> Self {
        self.standard_mapping.insert(semantic.into(), physical.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.topic_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Check the descriptor's internal consistency.
    pub fn validate(&self) -> Result<(), String> {
        validate_dataset_id(&self.id)?;

        if self.locator.provider() != self.provider {
            return Err(format!(
                "locator '{}' does not belong to provider '{}'",
                self.locator.kind_name(),
                self.provider
            ));
        }
        self.locator.check()?;

        match (self.provider.credential_use(), self.requires_credentials) {
            (CredentialUse::Required, false) => {
                return Err(format!(
                    "provider '{}' always needs credentials; set requires_credentials = true",
                    self.provider
                ))
            }
            (CredentialUse::None, true) => {
                return Err(format!(
                    "provider '{}' never uses credentials; requires_credentials must be false",
                    self.provider
                ))
            }
            _ => {}
        }

        for (name, window) in &self.intervention_windows {
            if window.start > window.end {
                return Err(format!(
                    "intervention window '{name}' ends ({}) before it starts ({})",
                    window.end, window.start
                ));
            }
        }
        for level in &self.hierarchies {
            if level.child.is_empty() || level.parent.is_empty() {
                return Err("hierarchy levels need both a child and a parent column".into());
            }
        }
        Ok(())
    }
}

/// Dataset ids double as directory names, so they are restricted to a
/// portable character set.
pub fn validate_dataset_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("dataset id must not be empty".into());
    }
    let portable = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !portable || id.starts_with('.') {
        return Err(format!(
            "dataset id '{id}' may only contain ASCII letters, digits, '_', '-' and '.', and must not start with '.'"
        ));
    }
    Ok(())
}
