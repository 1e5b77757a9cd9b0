//! Execution roles and their inline policy

use std::thread;
use std::time::Duration;

use crate::bucket::EnsureOutcome;
use crate::error::{Error, ProviderResultExt, Result};
use crate::policy::PolicyDocument;
use crate::provider::{CallerIdentity, IdentityApi};

/// Trust document letting the function runtime assume the role
pub const TRUST_POLICY: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"Service":["lambda.amazonaws.com"]},"Action":["sts:AssumeRole"]}]}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub name: String,
    pub arn: String,
    /// Name of the inline policy managed with the role
    pub policy_name: Option<String>,
}

impl Role {
    /// Caller supplied role given as a bare name or a full ARN
    pub fn external(name_or_arn: &str, caller: &CallerIdentity) -> Self {
        if name_or_arn.starts_with("arn:") {
            let name = name_or_arn.rsplit('/').next().unwrap_or(name_or_arn);
            Self {
                name: name.to_string(),
                arn: name_or_arn.to_string(),
                policy_name: None,
            }
        } else {
            Self::named(name_or_arn, caller)
        }
    }

    /// Role generated for a monitor, with its inline policy name
    pub fn generated(monitor: &str, caller: &CallerIdentity) -> Self {
        let mut role = Self::named(&Self::generated_name(monitor, &caller.region), caller);
        role.policy_name = Some(Self::generated_policy_name(monitor, &caller.region));
        role
    }

    pub fn generated_name(monitor: &str, region: &str) -> String {
        format!("CloudWatchSyntheticsRole-{region}-{monitor}")
    }

    pub fn generated_policy_name(monitor: &str, region: &str) -> String {
        format!("CloudWatchSyntheticsPolicy-{region}-{monitor}")
    }

    fn named(name: &str, caller: &CallerIdentity) -> Self {
        Self {
            name: name.to_string(),
            arn: format!("arn:aws:iam::{}:role/{name}", caller.account_id),
            policy_name: None,
        }
    }

    /// Create the role if missing and converge its inline policy to `document`.
    ///
    /// A freshly created role is only returned after `settle` has elapsed.
    pub fn ensure(
        &mut self,
        identity: &dyn IdentityApi,
        document: Option<&PolicyDocument>,
        settle: Duration,
    ) -> Result<EnsureOutcome> {
        let label = format!("role {}", self.name);
        let object = || label.clone();

        let outcome = match identity.get_role(&self.name).deploying(object)? {
            Some(info) => {
                self.arn = info.arn;
                EnsureOutcome::Existing
            }
            None => match identity.create_role(&self.name, TRUST_POLICY) {
                Ok(info) => {
                    log::info!("created role {}", self.name);
                    self.arn = info.arn;
                    EnsureOutcome::Created
                }
                Err(e) if e.is_already_exists() => EnsureOutcome::Existing,
                Err(e) => return Err(Error::dependency(object(), e)),
            },
        };

        if let (Some(policy), Some(document)) = (&self.policy_name, document) {
            let document = document.render()?;
            let current = identity
                .get_role_policy(&self.name, policy)
                .deploying(object)?;
            if current.as_deref() == Some(document.as_str()) {
                log::debug!("policy {policy} unchanged");
            } else {
                identity
                    .put_role_policy(&self.name, policy, &document)
                    .deploying(object)?;
                log::debug!("put policy {policy} on {}", self.name);
            }
        }

        if outcome == EnsureOutcome::Created && !settle.is_zero() {
            log::debug!("waiting {settle:?} for role {} to settle", self.name);
            thread::sleep(settle);
        }

        Ok(outcome)
    }

    /// Delete the inline policy, then the role. Returns `false` when the
    /// role did not exist.
    pub fn remove(&self, identity: &dyn IdentityApi) -> Result<bool> {
        let exists = identity
            .get_role(&self.name)
            .during(|| format!("get role {}", self.name))?
            .is_some();
        if !exists {
            return Ok(false);
        }

        if let Some(policy) = &self.policy_name {
            match identity.delete_role_policy(&self.name, policy) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    return Err(Error::provider(
                        format!("delete policy {policy} of role {}", self.name),
                        e,
                    ));
                }
            }
        }

        match identity.delete_role(&self.name) {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(Error::provider(format!("delete role {}", self.name), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyBuilder, PolicyContext, Statement};
    use crate::sandbox::{Fault, Op, SandboxConfig, SandboxPlatform};

    fn caller() -> CallerIdentity {
        CallerIdentity {
            account_id: "123456789012".into(),
            region: "us-east-1".into(),
        }
    }

    fn policy(extra: &[Statement]) -> PolicyDocument {
        PolicyBuilder::new(PolicyContext {
            artifact_bucket: "b".into(),
            region: "us-east-1".into(),
            account_id: "123456789012".into(),
            vpc: false,
        })
        .build(extra)
    }

    #[test]
    fn test_generated_names() {
        let role = Role::generated("web", &caller());
        assert_eq!(role.name, "CloudWatchSyntheticsRole-us-east-1-web");
        assert_eq!(
            role.arn,
            "arn:aws:iam::123456789012:role/CloudWatchSyntheticsRole-us-east-1-web"
        );
        assert_eq!(
            Role::generated_policy_name("web", "us-east-1"),
            "CloudWatchSyntheticsPolicy-us-east-1-web"
        );
    }

    #[test]
    fn test_external_by_name_or_arn() {
        let by_arn = Role::external("arn:aws:iam::999:role/team/custom", &caller());
        assert_eq!(by_arn.name, "custom");
        assert_eq!(by_arn.arn, "arn:aws:iam::999:role/team/custom");

        let by_name = Role::external("custom", &caller());
        assert_eq!(by_name.arn, "arn:aws:iam::123456789012:role/custom");
    }

    #[test]
    fn test_ensure_creates_then_converges_policy() {
        let platform = SandboxPlatform::new(SandboxConfig::default());
        let mut role = Role::generated("web", &caller());
        let document = policy(&[]);

        assert_eq!(
            role.ensure(&platform, Some(&document), Duration::ZERO).unwrap(),
            EnsureOutcome::Created
        );
        let stored = platform.role_policy(&role.name, "CloudWatchSyntheticsPolicy-us-east-1-web");
        assert_eq!(stored, Some(document.render().unwrap()));

        // Second ensure with the same document writes nothing
        let before = platform.mutating_calls(&role.name).len();
        assert_eq!(
            role.ensure(&platform, Some(&document), Duration::ZERO).unwrap(),
            EnsureOutcome::Existing
        );
        assert_eq!(platform.mutating_calls(&role.name).len(), before);

        // A changed document is replaced
        let changed = policy(&[Statement::allow(["s3:GetObject"], ["*"])]);
        role.ensure(&platform, Some(&changed), Duration::ZERO).unwrap();
        let ops: Vec<Op> = platform.mutating_calls(&role.name).iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![Op::CreateRole, Op::PutRolePolicy, Op::PutRolePolicy]);
    }

    #[test]
    fn test_ensure_failure_names_the_role() {
        let platform = SandboxPlatform::new(SandboxConfig::default());
        let mut role = Role::generated("b", &caller());
        platform.inject(Fault::fail(Op::CreateRole, &role.name, "LimitExceeded"));
        let err = role.ensure(&platform, None, Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::Dependency { .. }));
        assert!(err.to_string().contains("CloudWatchSyntheticsRole-us-east-1-b"));
    }

    #[test]
    fn test_remove_deletes_policy_before_role() {
        let platform = SandboxPlatform::new(SandboxConfig::default());
        let mut role = Role::generated("web", &caller());
        role.ensure(&platform, Some(&policy(&[])), Duration::ZERO).unwrap();

        assert!(role.remove(&platform).unwrap());
        assert!(platform.get_role(&role.name).unwrap().is_none());
        let ops: Vec<Op> = platform.mutating_calls(&role.name).iter().map(|c| c.op).collect();
        assert_eq!(
            ops,
            vec![Op::CreateRole, Op::PutRolePolicy, Op::DeleteRolePolicy, Op::DeleteRole]
        );

        // Already gone
        assert!(!role.remove(&platform).unwrap());
    }
}
