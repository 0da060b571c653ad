//! Policy model and evaluation
//!
//! Native policies are a closed model: statements over a fixed action
//! enum, `{bucket, prefix}` resources and a small condition sum type.
//! Evaluation is additive with deny precedence. The parser also accepts
//! the terse `"rw"` / `"ro"` aliases and a whitelisted subset of the
//! AWS policy dialect, translated into the native model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;

/// Canonical operation names, shared with routing and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    MetaStats,
    ListBuckets,
    ListV1,
    ListV2,
    ListVersions,
    GetBucketLocation,
    GetBucketVersioning,
    PutBucketVersioning,
    GetBucketPolicy,
    PutBucketPolicy,
    DeleteBucketPolicy,
    CreateBucket,
    HeadBucket,
    DeleteBucket,
    Put,
    Get,
    Head,
    Delete,
    Copy,
    MpuInitiate,
    MpuUploadPart,
    MpuComplete,
    MpuAbort,
    MpuListParts,
    MpuListUploads,
    Options,
    OpsRun,
    ReplOplog,
    ReplOplogApply,
    ReplManifest,
    ReplChunk,
}

impl Action {
    /// The canonical name used for policy documents and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MetaStats => "meta_stats",
            Self::ListBuckets => "list_buckets",
            Self::ListV1 => "list_v1",
            Self::ListV2 => "list_v2",
            Self::ListVersions => "list_versions",
            Self::GetBucketLocation => "get_bucket_location",
            Self::GetBucketVersioning => "get_bucket_versioning",
            Self::PutBucketVersioning => "put_bucket_versioning",
            Self::GetBucketPolicy => "get_bucket_policy",
            Self::PutBucketPolicy => "put_bucket_policy",
            Self::DeleteBucketPolicy => "delete_bucket_policy",
            Self::CreateBucket => "create_bucket",
            Self::HeadBucket => "head_bucket",
            Self::DeleteBucket => "delete_bucket",
            Self::Put => "put",
            Self::Get => "get",
            Self::Head => "head",
            Self::Delete => "delete",
            Self::Copy => "copy",
            Self::MpuInitiate => "mpu_initiate",
            Self::MpuUploadPart => "mpu_upload_part",
            Self::MpuComplete => "mpu_complete",
            Self::MpuAbort => "mpu_abort",
            Self::MpuListParts => "mpu_list_parts",
            Self::MpuListUploads => "mpu_list_uploads",
            Self::Options => "options",
            Self::OpsRun => "ops_run",
            Self::ReplOplog => "repl_oplog",
            Self::ReplOplogApply => "repl_oplog_apply",
            Self::ReplManifest => "repl_manifest",
            Self::ReplChunk => "repl_chunk",
        }
    }

    /// Write-plane actions are gated by maintenance mode and the
    /// in-flight limiter.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(
            self,
            Self::Put
                | Self::Delete
                | Self::Copy
                | Self::CreateBucket
                | Self::DeleteBucket
                | Self::PutBucketVersioning
                | Self::PutBucketPolicy
                | Self::DeleteBucketPolicy
                | Self::MpuInitiate
                | Self::MpuUploadPart
                | Self::MpuComplete
                | Self::MpuAbort
                | Self::ReplOplogApply
        )
    }

    const READ_PLANE: &'static [Self] = &[
        Self::MetaStats,
        Self::ListBuckets,
        Self::ListV1,
        Self::ListV2,
        Self::ListVersions,
        Self::GetBucketLocation,
        Self::GetBucketVersioning,
        Self::GetBucketPolicy,
        Self::HeadBucket,
        Self::Get,
        Self::Head,
        Self::MpuListParts,
        Self::MpuListUploads,
        Self::Options,
    ];
}

/// Policy errors
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid policy json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported policy element: {0}")]
    Unsupported(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("malformed resource: {0}")]
    MalformedResource(String),
}

/// `"*"` or a single concrete action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPattern {
    Any,
    One(Action),
}

impl Serialize for ActionPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Any => serializer.serialize_str("*"),
            Self::One(action) => action.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ActionPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == "*" {
            return Ok(Self::Any);
        }
        serde_json::from_value(serde_json::Value::String(raw.clone()))
            .map(Self::One)
            .map_err(|_| serde::de::Error::custom(format!("unknown action: {raw}")))
    }
}

/// A `{bucket, prefix}` resource; bucket may be `*`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
}

impl Resource {
    fn matches(&self, bucket: &str, key: &str) -> bool {
        (self.bucket == "*" || self.bucket == bucket) && key.starts_with(&self.prefix)
    }
}

/// Statement conditions; all present conditions must hold.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Conditions {
    /// CIDR list the source address must fall in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<Vec<String>>,
    /// Request time must be before this instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<DateTime<Utc>>,
    /// Request time must be after this instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<DateTime<Utc>>,
    /// Lowercased header name -> exact required value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Exact match against the request's `prefix` parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Leading match against the request's `prefix` parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_like: Option<String>,
    /// Exact match against the request's `delimiter` parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    /// Requires (or forbids) TLS transport
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure_transport: Option<bool>,
}

/// Statement effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// One policy statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub effect: Effect,
    pub actions: Vec<ActionPattern>,
    pub resources: Vec<Resource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
}

/// A policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default = "default_version")]
    pub version: u32,
    pub statements: Vec<Statement>,
}

const fn default_version() -> u32 {
    1
}

/// Request context for evaluation.
#[derive(Debug, Clone, Default)]
pub struct RequestCtx<'a> {
    pub source_ip: Option<IpAddr>,
    pub now: Option<DateTime<Utc>>,
    /// Lowercased header name -> value
    pub headers: HashMap<String, String>,
    pub query_prefix: Option<&'a str>,
    pub query_delimiter: Option<&'a str>,
    pub secure_transport: bool,
}

/// The `(allowed, denied)` evaluation tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decision {
    pub allowed: bool,
    pub denied: bool,
}

impl Decision {
    #[must_use]
    pub const fn permits(self) -> bool {
        self.allowed && !self.denied
    }

    /// Union of two policy sources; deny wins across both.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self {
            allowed: self.allowed || other.allowed,
            denied: self.denied || other.denied,
        }
    }
}

impl Policy {
    /// Allow every action on every resource.
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            version: 1,
            statements: vec![Statement {
                effect: Effect::Allow,
                actions: vec![ActionPattern::Any],
                resources: vec![Resource {
                    bucket: "*".to_string(),
                    prefix: String::new(),
                }],
                conditions: None,
            }],
        }
    }

    /// Allow the read plane on every resource.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            version: 1,
            statements: vec![Statement {
                effect: Effect::Allow,
                actions: Action::READ_PLANE.iter().copied().map(ActionPattern::One).collect(),
                resources: vec![Resource {
                    bucket: "*".to_string(),
                    prefix: String::new(),
                }],
                conditions: None,
            }],
        }
    }

    /// Parse any accepted dialect: `"rw"` / `"ro"`, native JSON, or the
    /// AWS dialect (translated).
    pub fn parse(input: &str) -> Result<Self, PolicyError> {
        match input.trim() {
            "rw" => return Ok(Self::allow_all()),
            "ro" => return Ok(Self::read_only()),
            _ => {}
        }
        let value: serde_json::Value = serde_json::from_str(input)?;
        if value.get("Statement").is_some() {
            translate_aws(&value)
        } else {
            Ok(serde_json::from_value(value)?)
        }
    }

    /// Evaluate the policy for `(action, bucket, key)` in `ctx`.
    #[must_use]
    pub fn decide(&self, action: Action, bucket: &str, key: &str, ctx: &RequestCtx<'_>) -> Decision {
        let mut decision = Decision::default();
        for statement in &self.statements {
            if !statement
                .actions
                .iter()
                .any(|p| matches!(p, ActionPattern::Any) || *p == ActionPattern::One(action))
            {
                continue;
            }
            if !statement.resources.iter().any(|r| r.matches(bucket, key)) {
                continue;
            }
            if !conditions_hold(statement.conditions.as_ref(), ctx) {
                continue;
            }
            match statement.effect {
                Effect::Allow => decision.allowed = true,
                Effect::Deny => decision.denied = true,
            }
        }
        decision
    }
}

fn conditions_hold(conditions: Option<&Conditions>, ctx: &RequestCtx<'_>) -> bool {
    let Some(conditions) = conditions else {
        return true;
    };

    if let Some(cidrs) = &conditions.source_ip {
        let Some(ip) = ctx.source_ip else { return false };
        if !cidrs.iter().any(|cidr| ip_in_cidr(ip, cidr)) {
            return false;
        }
    }

    let now = ctx.now.unwrap_or_else(Utc::now);
    if let Some(before) = conditions.before
        && now >= before
    {
        return false;
    }
    if let Some(after) = conditions.after
        && now <= after
    {
        return false;
    }

    if let Some(headers) = &conditions.headers {
        for (name, required) in headers {
            if ctx.headers.get(name) != Some(required) {
                return false;
            }
        }
    }

    if let Some(prefix) = &conditions.prefix
        && ctx.query_prefix != Some(prefix.as_str())
    {
        return false;
    }
    if let Some(prefix_like) = &conditions.prefix_like
        && !ctx
            .query_prefix
            .is_some_and(|p| p.starts_with(prefix_like.as_str()))
    {
        return false;
    }
    if let Some(delimiter) = &conditions.delimiter
        && ctx.query_delimiter != Some(delimiter.as_str())
    {
        return false;
    }

    if let Some(required) = conditions.secure_transport
        && ctx.secure_transport != required
    {
        return false;
    }

    true
}

/// Minimal CIDR containment; a bare address means /32 (/128 for v6).
fn ip_in_cidr(ip: IpAddr, cidr: &str) -> bool {
    let (net, bits) = match cidr.split_once('/') {
        Some((net, bits)) => {
            let Ok(bits) = bits.parse::<u32>() else {
                return false;
            };
            (net, bits)
        }
        None => (cidr, if cidr.contains(':') { 128 } else { 32 }),
    };
    let Ok(net) = net.parse::<IpAddr>() else {
        return false;
    };
    match (ip, net) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            if bits > 32 {
                return false;
            }
            let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
            (u32::from(ip) & mask) == (u32::from(net) & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            if bits > 128 {
                return false;
            }
            let mask = if bits == 0 {
                0
            } else {
                u128::MAX << (128 - bits)
            };
            (u128::from(ip) & mask) == (u128::from(net) & mask)
        }
        _ => false,
    }
}

// --- AWS dialect translation ---------------------------------------------

/// Translate a whitelisted subset of the AWS policy dialect. Anything
/// outside the whitelist is a parse error, never silently ignored.
fn translate_aws(value: &serde_json::Value) -> Result<Policy, PolicyError> {
    let statements_value = value
        .get("Statement")
        .ok_or_else(|| PolicyError::Unsupported("missing Statement".into()))?;
    let list = match statements_value {
        serde_json::Value::Array(list) => list.clone(),
        single @ serde_json::Value::Object(_) => vec![single.clone()],
        _ => return Err(PolicyError::Unsupported("Statement must be object or array".into())),
    };

    let mut statements = Vec::with_capacity(list.len());
    for statement in &list {
        for forbidden in ["NotAction", "NotResource", "NotPrincipal"] {
            if statement.get(forbidden).is_some() {
                return Err(PolicyError::Unsupported(forbidden.to_string()));
            }
        }
        if let Some(principal) = statement.get("Principal")
            && !principal_is_wildcard(principal)
        {
            return Err(PolicyError::Unsupported("non-wildcard Principal".into()));
        }

        let effect = match statement.get("Effect").and_then(|v| v.as_str()) {
            Some("Allow") => Effect::Allow,
            Some("Deny") => Effect::Deny,
            other => {
                return Err(PolicyError::Unsupported(format!("Effect {other:?}")));
            }
        };

        let mut actions = Vec::new();
        for action in string_or_list(statement.get("Action"))? {
            actions.extend(translate_aws_action(&action)?);
        }

        let mut resources = Vec::new();
        for resource in string_or_list(statement.get("Resource"))? {
            resources.push(translate_aws_resource(&resource)?);
        }

        let conditions = match statement.get("Condition") {
            None => None,
            Some(c) => Some(translate_aws_conditions(c)?),
        };

        statements.push(Statement {
            effect,
            actions,
            resources,
            conditions,
        });
    }

    Ok(Policy {
        version: 1,
        statements,
    })
}

fn principal_is_wildcard(principal: &serde_json::Value) -> bool {
    match principal {
        serde_json::Value::String(s) => s == "*",
        serde_json::Value::Object(map) => map
            .get("AWS")
            .is_some_and(|v| v.as_str() == Some("*")),
        _ => false,
    }
}

fn string_or_list(value: Option<&serde_json::Value>) -> Result<Vec<String>, PolicyError> {
    match value {
        Some(serde_json::Value::String(s)) => Ok(vec![s.clone()]),
        Some(serde_json::Value::Array(list)) => list
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| PolicyError::Unsupported("non-string list element".into()))
            })
            .collect(),
        _ => Err(PolicyError::Unsupported("missing Action or Resource".into())),
    }
}

fn translate_aws_action(action: &str) -> Result<Vec<ActionPattern>, PolicyError> {
    let one = |a: Action| vec![ActionPattern::One(a)];
    Ok(match action {
        "*" | "s3:*" => vec![ActionPattern::Any],
        "s3:GetObject" | "s3:GetObjectVersion" => {
            vec![ActionPattern::One(Action::Get), ActionPattern::One(Action::Head)]
        }
        "s3:PutObject" => vec![
            ActionPattern::One(Action::Put),
            ActionPattern::One(Action::Copy),
            ActionPattern::One(Action::MpuInitiate),
            ActionPattern::One(Action::MpuUploadPart),
            ActionPattern::One(Action::MpuComplete),
        ],
        "s3:DeleteObject" | "s3:DeleteObjectVersion" => one(Action::Delete),
        "s3:ListBucket" => vec![
            ActionPattern::One(Action::ListV1),
            ActionPattern::One(Action::ListV2),
            ActionPattern::One(Action::HeadBucket),
        ],
        "s3:ListBucketVersions" => one(Action::ListVersions),
        "s3:ListBucketMultipartUploads" => one(Action::MpuListUploads),
        "s3:ListMultipartUploadParts" => one(Action::MpuListParts),
        "s3:AbortMultipartUpload" => one(Action::MpuAbort),
        "s3:CreateBucket" => one(Action::CreateBucket),
        "s3:DeleteBucket" => one(Action::DeleteBucket),
        "s3:GetBucketLocation" => one(Action::GetBucketLocation),
        "s3:GetBucketVersioning" => one(Action::GetBucketVersioning),
        "s3:PutBucketVersioning" => one(Action::PutBucketVersioning),
        "s3:GetBucketPolicy" => one(Action::GetBucketPolicy),
        "s3:PutBucketPolicy" => one(Action::PutBucketPolicy),
        "s3:DeleteBucketPolicy" => one(Action::DeleteBucketPolicy),
        "s3:ListAllMyBuckets" => one(Action::ListBuckets),
        other => return Err(PolicyError::UnknownAction(other.to_string())),
    })
}

fn translate_aws_resource(resource: &str) -> Result<Resource, PolicyError> {
    if resource == "*" {
        return Ok(Resource {
            bucket: "*".to_string(),
            prefix: String::new(),
        });
    }
    let rest = resource
        .strip_prefix("arn:aws:s3:::")
        .ok_or_else(|| PolicyError::MalformedResource(resource.to_string()))?;
    let (bucket, key_pattern) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(PolicyError::MalformedResource(resource.to_string()));
    }
    // Only a trailing-star key pattern translates to a prefix
    let prefix = key_pattern.strip_suffix('*').unwrap_or(key_pattern);
    if prefix.contains('*') {
        return Err(PolicyError::MalformedResource(resource.to_string()));
    }
    Ok(Resource {
        bucket: bucket.to_string(),
        prefix: prefix.to_string(),
    })
}

fn translate_aws_conditions(value: &serde_json::Value) -> Result<Conditions, PolicyError> {
    let map = value
        .as_object()
        .ok_or_else(|| PolicyError::Unsupported("Condition must be an object".into()))?;
    let mut out = Conditions::default();
    for (operator, keys) in map {
        let keys = keys
            .as_object()
            .ok_or_else(|| PolicyError::Unsupported(format!("condition {operator}")))?;
        for (key, raw) in keys {
            let values: Vec<String> = match raw {
                serde_json::Value::String(s) => vec![s.clone()],
                serde_json::Value::Array(list) => list
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                serde_json::Value::Bool(b) => vec![b.to_string()],
                _ => {
                    return Err(PolicyError::Unsupported(format!(
                        "condition value for {key}"
                    )));
                }
            };
            match (operator.as_str(), key.as_str()) {
                ("IpAddress", "aws:SourceIp") => out.source_ip = Some(values),
                ("DateLessThan", "aws:CurrentTime") => {
                    let raw = values
                        .first()
                        .ok_or_else(|| PolicyError::Unsupported("empty DateLessThan".into()))?;
                    out.before = Some(
                        DateTime::parse_from_rfc3339(raw)
                            .map_err(|_| PolicyError::Unsupported(format!("timestamp {raw}")))?
                            .with_timezone(&Utc),
                    );
                }
                ("DateGreaterThan", "aws:CurrentTime") => {
                    let raw = values
                        .first()
                        .ok_or_else(|| PolicyError::Unsupported("empty DateGreaterThan".into()))?;
                    out.after = Some(
                        DateTime::parse_from_rfc3339(raw)
                            .map_err(|_| PolicyError::Unsupported(format!("timestamp {raw}")))?
                            .with_timezone(&Utc),
                    );
                }
                ("StringEquals", "s3:prefix") => {
                    out.prefix = values.into_iter().next();
                }
                ("StringLike", "s3:prefix") => {
                    out.prefix_like = values
                        .into_iter()
                        .next()
                        .map(|v| v.trim_end_matches('*').to_string());
                }
                ("StringEquals", "s3:delimiter") => {
                    out.delimiter = values.into_iter().next();
                }
                ("Bool", "aws:SecureTransport") => {
                    out.secure_transport = values.first().map(|v| v == "true");
                }
                (op, key) => {
                    return Err(PolicyError::Unsupported(format!("{op}/{key}")));
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestCtx<'static> {
        RequestCtx::default()
    }

    #[test]
    fn test_rw_alias_allows_everything() {
        let policy = Policy::parse("rw").unwrap();
        assert!(policy.decide(Action::Put, "b", "k", &ctx()).permits());
        assert!(policy.decide(Action::DeleteBucket, "b", "", &ctx()).permits());
    }

    #[test]
    fn test_ro_alias_denies_writes() {
        let policy = Policy::parse("ro").unwrap();
        assert!(policy.decide(Action::Get, "b", "k", &ctx()).permits());
        assert!(policy.decide(Action::ListV2, "b", "", &ctx()).permits());
        assert!(!policy.decide(Action::Put, "b", "k", &ctx()).permits());
        assert!(!policy.decide(Action::MpuInitiate, "b", "k", &ctx()).permits());
    }

    #[test]
    fn test_native_policy_prefix_resource() {
        let policy = Policy::parse(
            r#"{
                "version": 1,
                "statements": [
                    {"effect": "allow", "actions": ["get", "head"],
                     "resources": [{"bucket": "data", "prefix": "public/"}]}
                ]
            }"#,
        )
        .unwrap();
        assert!(policy.decide(Action::Get, "data", "public/a.txt", &ctx()).permits());
        assert!(!policy.decide(Action::Get, "data", "private/a.txt", &ctx()).permits());
        assert!(!policy.decide(Action::Get, "other", "public/a.txt", &ctx()).permits());
    }

    #[test]
    fn test_deny_precedence() {
        let policy = Policy::parse(
            r#"{
                "statements": [
                    {"effect": "allow", "actions": ["*"],
                     "resources": [{"bucket": "*"}]},
                    {"effect": "deny", "actions": ["delete"],
                     "resources": [{"bucket": "vault"}]}
                ]
            }"#,
        )
        .unwrap();
        assert!(policy.decide(Action::Delete, "other", "k", &ctx()).permits());
        let decision = policy.decide(Action::Delete, "vault", "k", &ctx());
        assert!(decision.allowed && decision.denied);
        assert!(!decision.permits());
    }

    #[test]
    fn test_determinism() {
        let policy = Policy::parse("ro").unwrap();
        let a = policy.decide(Action::Get, "b", "k", &ctx());
        let b = policy.decide(Action::Get, "b", "k", &ctx());
        assert_eq!(a, b);
    }

    #[test]
    fn test_source_ip_condition() {
        let policy = Policy::parse(
            r#"{
                "statements": [
                    {"effect": "allow", "actions": ["get"],
                     "resources": [{"bucket": "*"}],
                     "conditions": {"source_ip": ["10.0.0.0/8"]}}
                ]
            }"#,
        )
        .unwrap();
        let mut context = ctx();
        context.source_ip = Some("10.1.2.3".parse().unwrap());
        assert!(policy.decide(Action::Get, "b", "k", &context).permits());
        context.source_ip = Some("192.0.2.1".parse().unwrap());
        assert!(!policy.decide(Action::Get, "b", "k", &context).permits());
        context.source_ip = None;
        assert!(!policy.decide(Action::Get, "b", "k", &context).permits());
    }

    #[test]
    fn test_time_window_conditions() {
        let policy = Policy::parse(
            r#"{
                "statements": [
                    {"effect": "allow", "actions": ["get"],
                     "resources": [{"bucket": "*"}],
                     "conditions": {"after": "2024-01-01T00:00:00Z",
                                    "before": "2025-01-01T00:00:00Z"}}
                ]
            }"#,
        )
        .unwrap();
        let mut context = ctx();
        context.now = Some("2024-06-01T00:00:00Z".parse().unwrap());
        assert!(policy.decide(Action::Get, "b", "k", &context).permits());
        context.now = Some("2025-06-01T00:00:00Z".parse().unwrap());
        assert!(!policy.decide(Action::Get, "b", "k", &context).permits());
    }

    #[test]
    fn test_aws_dialect_translation() {
        let policy = Policy::parse(
            r#"{
                "Version": "2012-10-17",
                "Statement": [
                    {"Effect": "Allow", "Principal": "*",
                     "Action": ["s3:GetObject", "s3:ListBucket"],
                     "Resource": ["arn:aws:s3:::data/*", "arn:aws:s3:::data"]}
                ]
            }"#,
        )
        .unwrap();
        assert!(policy.decide(Action::Get, "data", "any/key", &ctx()).permits());
        assert!(policy.decide(Action::ListV2, "data", "", &ctx()).permits());
        assert!(!policy.decide(Action::Put, "data", "k", &ctx()).permits());
    }

    #[test]
    fn test_aws_dialect_rejects_not_action() {
        let err = Policy::parse(
            r#"{"Statement": [{"Effect": "Allow", "NotAction": "s3:GetObject",
                "Resource": "*"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::Unsupported(_)));
    }

    #[test]
    fn test_aws_dialect_rejects_specific_principal() {
        let err = Policy::parse(
            r#"{"Statement": [{"Effect": "Allow",
                "Principal": {"AWS": "arn:aws:iam::123:user/alice"},
                "Action": "s3:GetObject", "Resource": "*"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::Unsupported(_)));
    }

    #[test]
    fn test_aws_dialect_rejects_unknown_condition() {
        let err = Policy::parse(
            r#"{"Statement": [{"Effect": "Allow", "Action": "s3:GetObject",
                "Resource": "*",
                "Condition": {"NumericLessThan": {"s3:max-keys": "10"}}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::Unsupported(_)));
    }

    #[test]
    fn test_aws_dialect_rejects_unknown_action() {
        let err = Policy::parse(
            r#"{"Statement": [{"Effect": "Allow", "Action": "s3:PutBucketTagging",
                "Resource": "*"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::UnknownAction(_)));
    }

    #[test]
    fn test_cidr_matching() {
        let ip: IpAddr = "10.20.30.40".parse().unwrap();
        assert!(ip_in_cidr(ip, "10.0.0.0/8"));
        assert!(ip_in_cidr(ip, "10.20.30.40"));
        assert!(!ip_in_cidr(ip, "10.21.0.0/16"));
        assert!(ip_in_cidr(ip, "0.0.0.0/0"));
        assert!(!ip_in_cidr(ip, "not-a-cidr"));
    }
}
