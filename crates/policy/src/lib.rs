use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;
use thiserror::Error;

mod document;

pub use document::{AccessPolicyDocument, OneOrMany, PolicyStatement, Principal, SourceIp};

pub const OPEN_EFFECT: &str = "Allow";
pub const ANY_PRINCIPAL: &str = "*";
pub const FULL_SERVICE_ACTION: &str = "es:*";
pub const ANY_SOURCE: &str = "0.0.0.0/0";

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("access policy is not valid percent-encoded UTF-8")]
    Decode(#[source] std::string::FromUtf8Error),
    #[error("access policy is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("access policy does not match the policy document shape: {0}")]
    Schema(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification { Open, Restricted, Absent }

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Classification::Open => "open",
            Classification::Restricted => "restricted",
            Classification::Absent => "absent",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict { pub policy_present: bool, pub open_statement_count: usize }

impl Verdict {
    pub const ABSENT: Verdict = Verdict { policy_present: false, open_statement_count: 0 };

    pub fn classification(&self) -> Classification {
        if self.open_statement_count > 0 { Classification::Open }
        else if self.policy_present { Classification::Restricted }
        else { Classification::Absent }
    }
}

/// A verdict together with the decoded policy it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection { pub verdict: Verdict, pub access_policies: Option<Json> }

/// Flags statements that allow `es:*` to any principal from anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    pub fn new() -> Self { Self }

    pub fn evaluate(&self, raw_policy: Option<&str>) -> Result<Verdict, PolicyError> {
        self.inspect(raw_policy).map(|i| i.verdict)
    }

    pub fn inspect(&self, raw_policy: Option<&str>) -> Result<Inspection, PolicyError> {
        let raw = match raw_policy {
            Some(r) if !r.is_empty() => r,
            _ => return Ok(Inspection { verdict: Verdict::ABSENT, access_policies: None }),
        };
        let (doc, value) = AccessPolicyDocument::decode(raw)?;
        let open_statement_count = doc.statements.iter().filter(|s| self.is_open(s)).count();
        Ok(Inspection {
            verdict: Verdict { policy_present: true, open_statement_count },
            access_policies: Some(value),
        })
    }

    /// Action and source-IP lists are compared as whole values, so a list
    /// that merely contains `es:*` or `0.0.0.0/0` does not match.
    pub fn is_open(&self, st: &PolicyStatement) -> bool {
        let unrestricted = match st.source_ip() {
            SourceIp::Unrestricted | SourceIp::Unspecified => true,
            SourceIp::Ranges(v) => v.as_str() == Some(ANY_SOURCE),
        };
        st.effect.as_deref() == Some(OPEN_EFFECT)
            && st.principal_id() == Some(ANY_PRINCIPAL)
            && st.action.as_ref().and_then(OneOrMany::single) == Some(FULL_SERVICE_ACTION)
            && unrestricted
    }
}
