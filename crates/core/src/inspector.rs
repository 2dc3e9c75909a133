use async_trait::async_trait;
use esguard_policy::PolicyEvaluator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as Json};
use tracing::{debug, info, warn};

use crate::config::{IdentifierKey, InspectionField};
use crate::report::{outcome, CheckResult, Status};
use crate::{CheckConfig, InspectError, Region};

/// The subset of an Elasticsearch domain status the check reads. Field names
/// follow the service API's JSON output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DomainStatus {
    pub domain_name: String,
    #[serde(default)]
    pub domain_id: Option<String>,
    #[serde(rename = "ARN", default)]
    pub arn: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_policies: Option<String>,
}

/// Where domains come from.
#[async_trait]
pub trait DomainSource: Send + Sync {
    async fn list_domain_names(&self, region: &Region) -> anyhow::Result<Vec<String>>;
    async fn describe_domains(&self, region: &Region, names: &[String]) -> anyhow::Result<Vec<DomainStatus>>;
}

pub struct DomainInspector { config: CheckConfig, evaluator: PolicyEvaluator }

impl DomainInspector {
    pub fn new(config: CheckConfig) -> Self { Self { config, evaluator: PolicyEvaluator::new() } }

    pub fn config(&self) -> &CheckConfig { &self.config }

    /// Lists and evaluates every domain in `region`. A domain that cannot be
    /// described or whose policy cannot be parsed gets an error record; only a
    /// failed listing aborts the region.
    pub async fn inspect_region(&self, source: &dyn DomainSource, region: &Region) -> Result<Vec<CheckResult>, InspectError> {
        if !self.config.supports(region) {
            return Err(InspectError::UnsupportedRegion(region.clone()));
        }
        let names = source.list_domain_names(region).await
            .map_err(|e| InspectError::Listing { region: region.clone(), reason: format!("{e:#}") })?;
        info!(%region, domains = names.len(), "listed elasticsearch domains");

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let reason = match source.describe_domains(region, std::slice::from_ref(&name)).await {
                Ok(statuses) if !statuses.is_empty() => {
                    out.extend(statuses.iter().map(|st| self.inspect_domain(region, st)));
                    continue;
                }
                Ok(_) => "describe returned no status".to_string(),
                Err(e) => format!("{e:#}"),
            };
            warn!(%region, domain = %name, error = %reason, "describe failed");
            let message = format!("Elasticsearch domain {name} could not be evaluated: {reason}");
            let status = DomainStatus { domain_name: name, ..Default::default() };
            out.push(self.record(region, &status, Status::Error, message, None));
        }
        Ok(out)
    }

    /// Evaluates one described domain.
    pub fn inspect_domain(&self, region: &Region, status: &DomainStatus) -> CheckResult {
        let name = &status.domain_name;
        match self.evaluator.inspect(status.access_policies.as_deref()) {
            Ok(inspection) => {
                let (st, message) = outcome(name, &inspection.verdict);
                debug!(%region, domain = %name, open = inspection.verdict.open_statement_count,
                    classification = %inspection.verdict.classification(), "evaluated access policy");
                self.record(region, status, st, message, Some(inspection.access_policies.unwrap_or(Json::Null)))
            }
            Err(e) => {
                warn!(%region, domain = %name, error = %e, "malformed access policy");
                let raw = status.access_policies.clone().map(Json::String).unwrap_or(Json::Null);
                self.record(region, status, Status::Error,
                    format!("Elasticsearch domain {name} could not be evaluated: {e}"), Some(raw))
            }
        }
    }

    fn record(&self, region: &Region, status: &DomainStatus, st: Status, message: String, policies: Option<Json>) -> CheckResult {
        let mut data = JsonMap::new();
        for field in &self.config.deep_inspection {
            let v = match field {
                InspectionField::DomainId => json!(status.domain_id),
                InspectionField::Arn => json!(status.arn),
                InspectionField::Endpoint => json!(status.endpoint),
                InspectionField::AccessPolicies => policies.clone().unwrap_or(Json::Null),
            };
            data.insert(field.key().to_string(), v);
        }
        let mut unique_identifier = JsonMap::new();
        for key in &self.config.unique_identifier {
            let v = match key {
                IdentifierKey::DomainName => json!(status.domain_name),
                IdentifierKey::DomainId => json!(status.domain_id),
                IdentifierKey::Arn => json!(status.arn),
            };
            unique_identifier.insert(key.key().to_string(), v);
        }
        CheckResult {
            status: st,
            message,
            resource_id: status.domain_name.clone(),
            region: region.clone(),
            unique_identifier,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const OPEN: &str = r#"{"Statement":[{"Effect":"Allow","Principal":{"AWS":"*"},"Action":"es:*"}]}"#;
    const CLOSED: &str = r#"{"Statement":[{"Effect":"Allow","Principal":{"AWS":"*"},"Action":"es:*","Condition":{"IpAddress":{"aws:SourceIp":"10.0.0.0/8"}}}]}"#;

    #[derive(Default)]
    struct FakeSource {
        domains: BTreeMap<String, Option<String>>,
        broken: Vec<String>,
        vanished: Vec<String>,
        fail_listing: bool,
    }

    impl FakeSource {
        fn with(mut self, name: &str, policy: Option<&str>) -> Self {
            self.domains.insert(name.to_string(), policy.map(str::to_string));
            self
        }
    }

    #[async_trait]
    impl DomainSource for FakeSource {
        async fn list_domain_names(&self, _region: &Region) -> anyhow::Result<Vec<String>> {
            if self.fail_listing { anyhow::bail!("AccessDenied"); }
            Ok(self.domains.keys().chain(&self.broken).chain(&self.vanished).cloned().collect())
        }
        async fn describe_domains(&self, _region: &Region, names: &[String]) -> anyhow::Result<Vec<DomainStatus>> {
            let mut out = Vec::new();
            for n in names {
                if self.broken.contains(n) { anyhow::bail!("throttled describing {n}"); }
                if self.vanished.contains(n) { continue; }
                out.push(DomainStatus {
                    domain_name: n.clone(),
                    domain_id: Some(format!("123456789012/{n}")),
                    arn: Some(format!("arn:aws:es:us-east-1:123456789012:domain/{n}")),
                    endpoint: Some(format!("search-{n}.us-east-1.es.amazonaws.com")),
                    access_policies: self.domains.get(n).cloned().flatten(),
                });
            }
            Ok(out)
        }
    }

    fn region() -> Region { "us-east-1".parse().unwrap() }

    #[tokio::test]
    async fn classifies_each_domain_independently() {
        let src = FakeSource::default()
            .with("a-open", Some(OPEN))
            .with("b-closed", Some(CLOSED))
            .with("c-none", Some(""))
            .with("d-bad", Some("{oops"));
        let results = DomainInspector::new(CheckConfig::default()).inspect_region(&src, &region()).await.unwrap();
        let by_id: BTreeMap<_, _> = results.iter().map(|r| (r.resource_id.as_str(), r)).collect();

        assert_eq!(by_id["a-open"].status, Status::Fail);
        assert_eq!(by_id["a-open"].message, "Elasticsearch domain a-open has an open access policy");
        assert_eq!(by_id["b-closed"].status, Status::Pass);
        assert_eq!(by_id["b-closed"].message, "Elasticsearch domain b-closed has a restricted access policy");
        assert_eq!(by_id["c-none"].message, "Elasticsearch domain c-none has no access policies");
        assert_eq!(by_id["d-bad"].status, Status::Error);
        assert_eq!(by_id["d-bad"].data["access_policies"], json!("{oops"));
    }

    #[tokio::test]
    async fn describe_failure_does_not_abort_region() {
        let src = FakeSource { broken: vec!["flaky".into()], ..Default::default() }.with("fine", Some(OPEN));
        let results = DomainInspector::new(CheckConfig::default()).inspect_region(&src, &region()).await.unwrap();
        assert_eq!(results.len(), 2);
        let flaky = results.iter().find(|r| r.resource_id == "flaky").unwrap();
        assert_eq!(flaky.status, Status::Error);
        assert!(flaky.message.contains("throttled"));
    }

    #[tokio::test]
    async fn empty_describe_yields_error_record() {
        let src = FakeSource { vanished: vec!["ghost".into()], ..Default::default() };
        let results = DomainInspector::new(CheckConfig::default()).inspect_region(&src, &region()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].resource_id, "ghost");
        assert_eq!(results[0].status, Status::Error);
        assert_eq!(results[0].message, "Elasticsearch domain ghost could not be evaluated: describe returned no status");
    }

    #[tokio::test]
    async fn listing_failure_aborts_region() {
        let src = FakeSource { fail_listing: true, ..Default::default() };
        let err = DomainInspector::new(CheckConfig::default()).inspect_region(&src, &region()).await.unwrap_err();
        assert!(matches!(err, InspectError::Listing { .. }));
    }

    #[tokio::test]
    async fn unsupported_region_is_refused() {
        let src = FakeSource::default();
        let err = DomainInspector::new(CheckConfig::default())
            .inspect_region(&src, &"eu-north-1".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, InspectError::UnsupportedRegion(_)));
    }

    #[test]
    fn deep_inspection_captures_configured_fields_only() {
        let cfg = CheckConfig { deep_inspection: vec![InspectionField::Arn, InspectionField::AccessPolicies], ..Default::default() };
        let status = DomainStatus {
            domain_name: "logs".into(),
            domain_id: Some("123456789012/logs".into()),
            arn: Some("arn:aws:es:us-east-1:123456789012:domain/logs".into()),
            endpoint: None,
            access_policies: Some(OPEN.into()),
        };
        let r = DomainInspector::new(cfg).inspect_domain(&region(), &status);
        assert_eq!(r.data.len(), 2);
        assert_eq!(r.data["arn"], json!("arn:aws:es:us-east-1:123456789012:domain/logs"));
        assert_eq!(r.data["access_policies"]["Statement"][0]["Action"], json!("es:*"));
        assert_eq!(r.unique_identifier["domain_name"], json!("logs"));
    }

    #[test]
    fn domain_status_reads_api_field_names() {
        let st: DomainStatus = serde_json::from_value(json!({
            "DomainId": "123456789012/logs",
            "DomainName": "logs",
            "ARN": "arn:aws:es:us-east-1:123456789012:domain/logs",
            "Endpoint": "search-logs.us-east-1.es.amazonaws.com",
            "AccessPolicies": "",
            "Processing": false
        })).unwrap();
        assert_eq!(st.arn.as_deref(), Some("arn:aws:es:us-east-1:123456789012:domain/logs"));
        assert_eq!(st.access_policies.as_deref(), Some(""));
    }
}
