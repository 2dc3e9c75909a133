use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("'{0}' is not an AWS region identifier")]
    InvalidRegion(String),
    #[error("check config must list at least one {0}")]
    Empty(&'static str),
    #[error("read check config {path}")]
    Read { path: PathBuf, #[source] source: std::io::Error },
    #[error("parse check config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn region_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z]{2}(-gov)?-[a-z]+-[0-9]+$").expect("region pattern compiles"))
}

/// An AWS region identifier such as `us-east-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Region(String);

impl Region {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl TryFrom<String> for Region {
    type Error = ConfigError;
    fn try_from(s: String) -> Result<Self, ConfigError> {
        // YAML configs may use the symbol spelling `us_east_1`.
        let s = s.trim().to_ascii_lowercase().replace('_', "-");
        if region_pattern().is_match(&s) { Ok(Region(s)) } else { Err(ConfigError::InvalidRegion(s)) }
    }
}

impl FromStr for Region {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, ConfigError> { Region::try_from(s.to_string()) }
}

impl From<Region> for String {
    fn from(r: Region) -> String { r.0 }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.pad(&self.0) }
}

/// Domain status fields copied into each result for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionField { DomainId, Arn, Endpoint, AccessPolicies }

impl InspectionField {
    pub fn key(&self) -> &'static str {
        match self {
            InspectionField::DomainId => "domain_id",
            InspectionField::Arn => "arn",
            InspectionField::Endpoint => "endpoint",
            InspectionField::AccessPolicies => "access_policies",
        }
    }
}

/// Domain attributes that together identify one evaluated resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKey { DomainName, DomainId, Arn }

impl IdentifierKey {
    pub fn key(&self) -> &'static str {
        match self {
            IdentifierKey::DomainName => "domain_name",
            IdentifierKey::DomainId => "domain_id",
            IdentifierKey::Arn => "arn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity { Low, Medium, High, Critical }

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        })
    }
}

const DEFAULT_REGIONS: &[&str] = &[
    "us-east-1", "us-east-2", "us-west-1", "us-west-2", "ap-south-1", "ap-northeast-2",
    "ap-southeast-1", "ap-southeast-2", "ap-northeast-1", "eu-central-1", "eu-west-1", "sa-east-1",
];

/// Declarative settings for the open-access check. Built once at startup and
/// shared read-only with the inspector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    pub name: String,
    pub severity: Severity,
    pub description: String,
    pub resolution: String,
    pub deep_inspection: Vec<InspectionField>,
    pub valid_regions: Vec<Region>,
    pub unique_identifier: Vec<IdentifierKey>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            name: "Elasticsearch Domain with Open Access Policy".to_string(),
            severity: Severity::High,
            description: "Elasticsearch domains control access via an access policy. \
                This check flags access policies that grant open access."
                .to_string(),
            resolution: "Go to the Elasticsearch service in the AWS Console and modify the access \
                policy to a specific permission other than a global permission."
                .to_string(),
            deep_inspection: vec![
                InspectionField::DomainId,
                InspectionField::Arn,
                InspectionField::Endpoint,
                InspectionField::AccessPolicies,
            ],
            valid_regions: DEFAULT_REGIONS.iter().map(|r| Region(r.to_string())).collect(),
            unique_identifier: vec![IdentifierKey::DomainName],
        }
    }
}

impl CheckConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg: CheckConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.valid_regions.is_empty() { return Err(ConfigError::Empty("valid region")); }
        if self.unique_identifier.is_empty() { return Err(ConfigError::Empty("unique identifier")); }
        Ok(())
    }

    pub fn supports(&self, region: &Region) -> bool {
        self.valid_regions.contains(region)
    }
}
