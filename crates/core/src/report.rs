use esguard_policy::Verdict;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};
use std::fmt;

use crate::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status { Pass, Fail, Error }

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self { Status::Pass => "PASS", Status::Fail => "FAIL", Status::Error => "ERROR" })
    }
}

/// One record per inspected domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: Status,
    pub message: String,
    pub resource_id: String,
    pub region: Region,
    #[serde(default)]
    pub unique_identifier: JsonMap<String, Json>,
    #[serde(default)]
    pub data: JsonMap<String, Json>,
}

/// Maps a verdict to the status and message reported for a domain.
pub fn outcome(domain_name: &str, verdict: &Verdict) -> (Status, String) {
    if verdict.open_statement_count > 0 {
        (Status::Fail, format!("Elasticsearch domain {domain_name} has an open access policy"))
    } else if !verdict.policy_present {
        (Status::Pass, format!("Elasticsearch domain {domain_name} has no access policies"))
    } else {
        (Status::Pass, format!("Elasticsearch domain {domain_name} has a restricted access policy"))
    }
}

/// Pass/fail/error tallies over a batch of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary { pub pass: usize, pub fail: usize, pub error: usize }

impl Summary {
    pub fn of<'a>(results: impl IntoIterator<Item = &'a CheckResult>) -> Self {
        let mut s = Summary::default();
        for r in results {
            match r.status {
                Status::Pass => s.pass += 1,
                Status::Fail => s.fail += 1,
                Status::Error => s.error += 1,
            }
        }
        s
    }
}
