//! Permission policy documents
//!
//! A generated monitor role carries one inline policy: a fixed baseline
//! derived from the deployment context followed by the descriptor's own
//! statements. Statements are only ever added, never merged or removed.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// Condition operator to key/value pairs, e.g. `StringEquals`
pub type Condition = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub effect: Effect,
    #[serde(deserialize_with = "one_or_many")]
    pub action: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub resource: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: Condition,
}

impl Statement {
    pub fn allow<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            effect: Effect::Allow,
            action: actions.into_iter().map(Into::into).collect(),
            resource: resources.into_iter().map(Into::into).collect(),
            condition: Condition::new(),
        }
    }

    #[must_use]
    pub fn with_condition(mut self, operator: &str, key: &str, value: &str) -> Self {
        self.condition
            .entry(operator.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Statement")]
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    /// Serialize to the compact JSON sent to the identity API
    pub fn render(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Values the baseline statements are derived from
#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub artifact_bucket: String,
    pub region: String,
    pub account_id: String,
    pub vpc: bool,
}

/// Builds the inline policy of a generated role
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    context: PolicyContext,
    statements: Vec<Statement>,
}

impl PolicyBuilder {
    pub fn new(context: PolicyContext) -> Self {
        Self {
            context,
            statements: Vec::new(),
        }
    }

    /// Baseline statements followed by `custom`, in that order
    pub fn build(self, custom: &[Statement]) -> PolicyDocument {
        let vpc = self.context.vpc;
        let mut builder = self
            .artifact_bucket()
            .logs()
            .metrics()
            .parameters()
            .tracing();
        if vpc {
            builder = builder.vpc();
        }
        builder.statements.extend_from_slice(custom);
        builder.finish()
    }

    #[must_use]
    pub fn artifact_bucket(mut self) -> Self {
        let bucket = &self.context.artifact_bucket;
        let statements = [
            Statement::allow(["s3:PutObject"], [format!("arn:aws:s3:::{bucket}/*")]),
            Statement::allow(["s3:GetBucketLocation"], [format!("arn:aws:s3:::{bucket}")]),
            Statement::allow(["s3:ListAllMyBuckets"], ["*"]),
        ];
        self.statements.extend(statements);
        self
    }

    #[must_use]
    pub fn logs(mut self) -> Self {
        let PolicyContext {
            region, account_id, ..
        } = &self.context;
        let resource = format!("arn:aws:logs:{region}:{account_id}:log-group:/aws/lambda/cwsyn-*");
        self.statements.push(Statement::allow(
            ["logs:CreateLogStream", "logs:PutLogEvents", "logs:CreateLogGroup"],
            [resource],
        ));
        self
    }

    #[must_use]
    pub fn metrics(mut self) -> Self {
        self.statements.push(
            Statement::allow(["cloudwatch:PutMetricData"], ["*"]).with_condition(
                "StringEquals",
                "cloudwatch:namespace",
                "CloudWatchSynthetics",
            ),
        );
        self
    }

    #[must_use]
    pub fn parameters(mut self) -> Self {
        let PolicyContext {
            region, account_id, ..
        } = &self.context;
        let resource = format!("arn:aws:ssm:{region}:{account_id}:parameter/cwsyn/*");
        self.statements
            .push(Statement::allow(["ssm:GetParameter*"], [resource]));
        self
    }

    #[must_use]
    pub fn tracing(mut self) -> Self {
        self.statements
            .push(Statement::allow(["xray:PutTraceSegments"], ["*"]));
        self
    }

    #[must_use]
    pub fn vpc(mut self) -> Self {
        self.statements.push(Statement::allow(
            [
                "ec2:CreateNetworkInterface",
                "ec2:DescribeNetworkInterface",
                "ec2:DescribeNetworkInterfaces",
                "ec2:DeleteNetworkInterface",
            ],
            ["*"],
        ));
        self
    }

    pub fn finish(self) -> PolicyDocument {
        PolicyDocument {
            version: POLICY_VERSION.to_string(),
            statement: self.statements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(vpc: bool) -> PolicyContext {
        PolicyContext {
            artifact_bucket: "cw-syn-results-123-eu-west-1".into(),
            region: "eu-west-1".into(),
            account_id: "123".into(),
            vpc,
        }
    }

    fn all_actions(doc: &PolicyDocument) -> Vec<&str> {
        doc.statement
            .iter()
            .flat_map(|s| s.action.iter().map(String::as_str))
            .collect()
    }

    #[test]
    fn test_baseline_order() {
        let doc = PolicyBuilder::new(context(false)).build(&[]);
        assert_eq!(doc.version, "2012-10-17");
        assert_eq!(
            all_actions(&doc),
            vec![
                "s3:PutObject",
                "s3:GetBucketLocation",
                "s3:ListAllMyBuckets",
                "logs:CreateLogStream",
                "logs:PutLogEvents",
                "logs:CreateLogGroup",
                "cloudwatch:PutMetricData",
                "ssm:GetParameter*",
                "xray:PutTraceSegments",
            ]
        );
        assert_eq!(
            doc.statement[0].resource,
            vec!["arn:aws:s3:::cw-syn-results-123-eu-west-1/*"]
        );
        assert_eq!(
            doc.statement[3].resource,
            vec!["arn:aws:logs:eu-west-1:123:log-group:/aws/lambda/cwsyn-*"]
        );
    }

    #[test]
    fn test_vpc_statements_only_when_configured() {
        let without = PolicyBuilder::new(context(false)).build(&[]);
        assert!(!all_actions(&without).contains(&"ec2:CreateNetworkInterface"));

        let with = PolicyBuilder::new(context(true)).build(&[]);
        assert_eq!(with.statement.len(), without.statement.len() + 1);
        assert!(all_actions(&with).contains(&"ec2:DeleteNetworkInterface"));
    }

    #[test]
    fn test_custom_statements_appended_last() {
        let custom = Statement::allow(["dynamodb:GetItem"], ["arn:aws:dynamodb:*:*:table/t"]);
        let doc = PolicyBuilder::new(context(true)).build(std::slice::from_ref(&custom));
        assert_eq!(doc.statement.last(), Some(&custom));
    }

    #[test]
    fn test_render_omits_empty_conditions() {
        let json = PolicyBuilder::new(context(false)).build(&[]).render().unwrap();
        assert!(json.starts_with(r#"{"Version":"2012-10-17","Statement":["#));
        assert_eq!(json.matches("Condition").count(), 1);
        assert!(json.contains(
            r#""Condition":{"StringEquals":{"cloudwatch:namespace":"CloudWatchSynthetics"}}"#
        ));
    }

    #[test]
    fn test_statement_accepts_single_action_string() {
        let statement: Statement =
            serde_json::from_str(r#"{"Effect":"Deny","Action":"s3:DeleteObject","Resource":"*"}"#)
                .unwrap();
        assert_eq!(statement.effect, Effect::Deny);
        assert_eq!(statement.action, vec!["s3:DeleteObject"]);
        assert_eq!(statement.resource, vec!["*"]);
        assert!(statement.condition.is_empty());
    }
}
