use anyhow::{Context, Result};
use async_trait::async_trait;
use esguard_core::{DomainSource, DomainStatus, Region};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

fn aws() -> Result<PathBuf> {
    which::which("aws").context("aws cli not found in PATH")
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListDomainNamesOutput { #[serde(default)] domain_names: Vec<DomainInfo> }

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainInfo { domain_name: String }

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeDomainsOutput { #[serde(default)] domain_status_list: Vec<DomainStatus> }

pub fn parse_domain_names(out: &[u8]) -> Result<Vec<String>> {
    let parsed: ListDomainNamesOutput = serde_json::from_slice(out).context("decode list-domain-names output")?;
    Ok(parsed.domain_names.into_iter().map(|d| d.domain_name).collect())
}

pub fn parse_domain_statuses(out: &[u8]) -> Result<Vec<DomainStatus>> {
    let parsed: DescribeDomainsOutput = serde_json::from_slice(out).context("decode describe-elasticsearch-domains output")?;
    Ok(parsed.domain_status_list)
}

/// Reads Elasticsearch domains through `aws es ...` subcommands.
#[derive(Debug, Clone)]
pub struct AwsCliSource { bin: PathBuf, profile: Option<String> }

impl AwsCliSource {
    pub fn new(profile: Option<String>) -> Result<Self> {
        Ok(Self { bin: aws()?, profile })
    }

    pub fn with_binary(bin: impl Into<PathBuf>, profile: Option<String>) -> Self {
        Self { bin: bin.into(), profile }
    }

    async fn es(&self, region: &Region, op: &str, extra: &[String]) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("es").arg(op).args(extra)
            .arg("--region").arg(region.as_str())
            .arg("--output").arg("json");
        if let Some(p) = &self.profile { cmd.arg("--profile").arg(p); }
        debug!(%region, op, "running aws es");
        let out = cmd.output().await.with_context(|| format!("spawn aws es {op}"))?;
        if !out.status.success() {
            anyhow::bail!("aws es {op} failed: {}", String::from_utf8_lossy(&out.stderr).trim());
        }
        Ok(out.stdout)
    }
}

#[async_trait]
impl DomainSource for AwsCliSource {
    async fn list_domain_names(&self, region: &Region) -> Result<Vec<String>> {
        let out = self.es(region, "list-domain-names", &[]).await?;
        parse_domain_names(&out)
    }

    async fn describe_domains(&self, region: &Region, names: &[String]) -> Result<Vec<DomainStatus>> {
        let mut extra = vec!["--domain-names".to_string()];
        extra.extend(names.iter().cloned());
        let out = self.es(region, "describe-elasticsearch-domains", &extra).await?;
        parse_domain_statuses(&out)
    }
}
