/// A principal granted full access to the `tyger` namespace via RBAC.
///
/// Maps the polymorphic "User vs. Group vs. ServicePrincipal" shape of
/// `ComputeConfig::managementPrincipals` onto a single tagged variant
/// with one `to_subject()` rule.
use serde_derive::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ManagementPrincipal {
    pub kind: PrincipalKind,
    #[serde(rename = "objectId")]
    pub object_id: String,
    #[serde(rename = "userPrincipalName", skip_serializing_if = "Option::is_none")]
    pub user_principal_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrincipalKind {
    User,
    Group,
    ServicePrincipal,
}

/// A Kubernetes RBAC subject: `(kind, name)` as consumed by a `RoleBinding`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct K8sSubject {
    pub kind: K8sSubjectKind,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum K8sSubjectKind {
    User,
    Group,
}

impl ManagementPrincipal {
    /// Derive the Kubernetes RBAC subject for this principal.
    ///
    /// `ServicePrincipal` -> `(User, objectId)`; `Group` -> `(Group, objectId)`;
    /// `User` -> `(User, userPrincipalName)`.
    pub fn to_subject(&self) -> Result<K8sSubject, failure::Error> {
        let subject = match self.kind {
            PrincipalKind::ServicePrincipal => K8sSubject {
                kind: K8sSubjectKind::User,
                name: self.object_id.clone(),
            },
            PrincipalKind::Group => K8sSubject {
                kind: K8sSubjectKind::Group,
                name: self.object_id.clone(),
            },
            PrincipalKind::User => {
                let upn = self.user_principal_name.clone().ok_or_else(|| {
                    failure::format_err!(
                        "management principal {} is a User but has no userPrincipalName",
                        self.object_id
                    )
                })?;
                K8sSubject { kind: K8sSubjectKind::User, name: upn }
            }
        };
        Ok(subject)
    }

    pub fn verify(&self) -> Result<(), failure::Error> {
        if self.object_id.trim().is_empty() {
            failure::bail!("management principal objectId must not be empty");
        }
        if matches!(self.kind, PrincipalKind::User) && self.user_principal_name.is_none() {
            failure::bail!(
                "management principal {} is a User and must set userPrincipalName",
                self.object_id
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_mapping() {
        let sp = ManagementPrincipal {
            kind: PrincipalKind::ServicePrincipal,
            object_id: "sp-oid".into(),
            user_principal_name: None,
        };
        let subj = sp.to_subject().unwrap();
        assert_eq!(subj.kind, K8sSubjectKind::User);
        assert_eq!(subj.name, "sp-oid");

        let group = ManagementPrincipal {
            kind: PrincipalKind::Group,
            object_id: "group-oid".into(),
            user_principal_name: None,
        };
        let subj = group.to_subject().unwrap();
        assert_eq!(subj.kind, K8sSubjectKind::Group);
        assert_eq!(subj.name, "group-oid");

        let user = ManagementPrincipal {
            kind: PrincipalKind::User,
            object_id: "user-oid".into(),
            user_principal_name: Some("me@example.com".into()),
        };
        let subj = user.to_subject().unwrap();
        assert_eq!(subj.kind, K8sSubjectKind::User);
        assert_eq!(subj.name, "me@example.com");
    }

    #[test]
    fn user_without_upn_fails() {
        let user = ManagementPrincipal {
            kind: PrincipalKind::User,
            object_id: "user-oid".into(),
            user_principal_name: None,
        };
        assert!(user.to_subject().is_err());
        assert!(user.verify().is_err());
    }
}
