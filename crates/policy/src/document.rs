use serde::{Deserialize, Deserializer};
use serde_json::{Map as JsonMap, Value as Json};

use crate::PolicyError;

/// A resource access policy as attached to an Elasticsearch domain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccessPolicyDocument {
    #[serde(rename = "Version", default)]
    pub version: Option<String>,
    #[serde(rename = "Statement", deserialize_with = "statement_list")]
    pub statements: Vec<PolicyStatement>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Sid", default)]
    pub sid: Option<String>,
    #[serde(rename = "Effect", default)]
    pub effect: Option<String>,
    #[serde(rename = "Principal", default)]
    pub principal: Option<Principal>,
    #[serde(rename = "Action", default)]
    pub action: Option<OneOrMany>,
    #[serde(rename = "Condition", default)]
    pub condition: Option<JsonMap<String, Json>>,
}

/// `"Principal": "*"` or `"Principal": { "AWS": ... }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    Named(String),
    Keyed(JsonMap<String, Json>),
}

/// IAM fields that take either one string or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    /// Lists never collapse to a single literal, even with one element.
    pub fn single(&self) -> Option<&str> {
        match self {
            OneOrMany::One(s) => Some(s.as_str()),
            OneOrMany::Many(_) => None,
        }
    }
}

/// Network-origin restriction carried by a statement's `IpAddress` condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceIp<'a> {
    /// No `IpAddress` condition at all.
    Unrestricted,
    /// `IpAddress` is present but names no `aws:SourceIp`.
    Unspecified,
    Ranges(&'a Json),
}

impl PolicyStatement {
    /// The principal the statement applies to, drilling into `AWS` when keyed.
    pub fn principal_id(&self) -> Option<&str> {
        match self.principal.as_ref()? {
            Principal::Named(s) => Some(s.as_str()),
            Principal::Keyed(m) => m.get("AWS").and_then(Json::as_str),
        }
    }

    pub fn source_ip(&self) -> SourceIp<'_> {
        let Some(ip) = self.condition.as_ref().and_then(|c| c.get("IpAddress")) else {
            return SourceIp::Unrestricted;
        };
        match ip.get("aws:SourceIp") {
            None | Some(Json::Null) => SourceIp::Unspecified,
            Some(v) => SourceIp::Ranges(v),
        }
    }
}

impl AccessPolicyDocument {
    /// URL-decode and parse a raw policy string. Returns the typed document
    /// alongside the decoded JSON so callers can keep it for audit output.
    pub fn decode(raw: &str) -> Result<(Self, Json), PolicyError> {
        let text = urlencoding::decode(raw).map_err(PolicyError::Decode)?;
        let value: Json = serde_json::from_str(&text).map_err(PolicyError::Malformed)?;
        let doc = Self::deserialize(&value).map_err(PolicyError::Schema)?;
        Ok((doc, value))
    }
}

fn statement_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<PolicyStatement>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum List {
        Many(Vec<PolicyStatement>),
        One(Box<PolicyStatement>),
    }
    Ok(match List::deserialize(d)? {
        List::Many(v) => v,
        List::One(s) => vec![*s],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn statement(v: Json) -> PolicyStatement {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn principal_is_drilled_into_aws_key() {
        let st = statement(json!({ "Principal": { "AWS": "*" } }));
        assert_eq!(st.principal_id(), Some("*"));
        let st = statement(json!({ "Principal": "*" }));
        assert_eq!(st.principal_id(), Some("*"));
    }

    #[test]
    fn principal_lists_and_other_keys_have_no_id() {
        let st = statement(json!({ "Principal": { "AWS": ["*"] } }));
        assert_eq!(st.principal_id(), None);
        let st = statement(json!({ "Principal": { "Service": "es.amazonaws.com" } }));
        assert_eq!(st.principal_id(), None);
        assert_eq!(statement(json!({})).principal_id(), None);
    }

    #[test]
    fn source_ip_variants() {
        assert_eq!(statement(json!({})).source_ip(), SourceIp::Unrestricted);
        assert_eq!(
            statement(json!({ "Condition": { "Bool": { "aws:SecureTransport": "true" } } })).source_ip(),
            SourceIp::Unrestricted
        );
        assert_eq!(
            statement(json!({ "Condition": { "IpAddress": {} } })).source_ip(),
            SourceIp::Unspecified
        );
        let st = statement(json!({ "Condition": { "IpAddress": { "aws:SourceIp": "10.0.0.0/8" } } }));
        assert_eq!(st.source_ip(), SourceIp::Ranges(&json!("10.0.0.0/8")));
    }

    #[test]
    fn single_statement_object_is_accepted() {
        let (doc, _) = AccessPolicyDocument::decode(r#"{"Statement":{"Effect":"Allow"}}"#).unwrap();
        assert_eq!(doc.statements.len(), 1);
        assert_eq!(doc.statements[0].effect.as_deref(), Some("Allow"));
    }

    #[test]
    fn missing_statement_key_is_a_schema_error() {
        let err = AccessPolicyDocument::decode(r#"{"Version":"2012-10-17"}"#).unwrap_err();
        assert!(matches!(err, PolicyError::Schema(_)));
    }

    #[test]
    fn percent_escapes_are_decoded() {
        let raw = "%7B%22Statement%22%3A%5B%5D%7D";
        let (doc, value) = AccessPolicyDocument::decode(raw).unwrap();
        assert!(doc.statements.is_empty());
        assert_eq!(value, json!({ "Statement": [] }));
    }
}
