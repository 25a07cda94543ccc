//! ACL document model: canned-ACL expansion and XML ser/de for
//! `AccessControlPolicy`.

use crate::xml_util;

pub const GROUP_ALL_USERS: &str = "http://acs.amazonaws.com/groups/global/AllUsers";
pub const GROUP_AUTHENTICATED_USERS: &str =
    "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
    ReadAcp,
    WriteAcp,
    FullControl,
}

impl Permission {
    fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "READ",
            Permission::Write => "WRITE",
            Permission::ReadAcp => "READ_ACP",
            Permission::WriteAcp => "WRITE_ACP",
            Permission::FullControl => "FULL_CONTROL",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Grantee {
    CanonicalUser { id: String, display_name: String },
    Group { uri: String },
}

#[derive(Debug, Clone)]
pub struct Grant {
    pub grantee: Grantee,
    pub permission: Permission,
}

#[derive(Debug, Clone)]
pub struct AccessControlPolicy {
    pub owner_id: String,
    pub owner_display_name: String,
    pub grants: Vec<Grant>,
}

impl AccessControlPolicy {
    /// The ACL implied by ownership alone: the owner holds FULL_CONTROL and
    /// nobody else has any access. This is what every bucket/object gets on
    /// creation absent an explicit canned ACL or ACL XML body.
    pub fn private(owner_id: &str, owner_display_name: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            owner_display_name: owner_display_name.to_string(),
            grants: vec![Grant {
                grantee: Grantee::CanonicalUser {
                    id: owner_id.to_string(),
                    display_name: owner_display_name.to_string(),
                },
                permission: Permission::FullControl,
            }],
        }
    }

    /// Expand an `x-amz-acl` canned-ACL token into a full grant set.
    /// Returns `None` for an unrecognized token so the caller can raise
    /// `InvalidArgument`.
    pub fn from_canned(
        canned: &str,
        owner_id: &str,
        owner_display_name: &str,
    ) -> Option<Self> {
        let mut policy = Self::private(owner_id, owner_display_name);
        match canned {
            "private" => {}
            "public-read" => {
                policy.grants.push(Grant {
                    grantee: Grantee::Group {
                        uri: GROUP_ALL_USERS.to_string(),
                    },
                    permission: Permission::Read,
                });
            }
            "public-read-write" => {
                policy.grants.push(Grant {
                    grantee: Grantee::Group {
                        uri: GROUP_ALL_USERS.to_string(),
                    },
                    permission: Permission::Read,
                });
                policy.grants.push(Grant {
                    grantee: Grantee::Group {
                        uri: GROUP_ALL_USERS.to_string(),
                    },
                    permission: Permission::Write,
                });
            }
            "authenticated-read" => {
                policy.grants.push(Grant {
                    grantee: Grantee::Group {
                        uri: GROUP_AUTHENTICATED_USERS.to_string(),
                    },
                    permission: Permission::Read,
                });
            }
            _ => return None,
        }
        Some(policy)
    }

    pub fn is_public_read(&self) -> bool {
        self.grants.iter().any(|g| {
            matches!(g.permission, Permission::Read | Permission::FullControl)
                && matches!(&g.grantee, Grantee::Group { uri } if uri == GROUP_ALL_USERS)
        })
    }

    pub fn to_xml(&self) -> String {
        let mut grants = String::new();
        for grant in &self.grants {
            let grantee_xml = match &grant.grantee {
                Grantee::CanonicalUser { id, display_name } => format!(
                    "<Grantee xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:type=\"CanonicalUser\"><ID>{}</ID><DisplayName>{}</DisplayName></Grantee>",
                    xml_util::escape(id),
                    xml_util::escape(display_name)
                ),
                Grantee::Group { uri } => format!(
                    "<Grantee xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:type=\"Group\"><URI>{}</URI></Grantee>",
                    xml_util::escape(uri)
                ),
            };
            grants.push_str(&format!(
                "<Grant>{}<Permission>{}</Permission></Grant>",
                grantee_xml,
                grant.permission.as_str()
            ));
        }
        format!(
            "<AccessControlPolicy xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\"><Owner><ID>{}</ID><DisplayName>{}</DisplayName></Owner><AccessControlList>{}</AccessControlList></AccessControlPolicy>",
            xml_util::escape(&self.owner_id),
            xml_util::escape(&self.owner_display_name),
            grants
        )
    }

    /// Parse a client-supplied `AccessControlPolicy` body (PutBucketAcl /
    /// PutObjectAcl). Minimal: reads owner + grants, ignoring anything not
    /// surfaced elsewhere (e.g. EmailAddress grantees).
    pub fn from_xml(body: &str) -> Result<Self, String> {
        let owner_id = extract_tag(body, "ID").unwrap_or_default();
        let owner_display_name = extract_tag(body, "DisplayName").unwrap_or_default();
        let mut grants = Vec::new();
        let mut rest = body;
        while let Some(start) = rest.find("<Grant>") {
            let Some(end) = rest[start..].find("</Grant>") else {
                break;
            };
            let block = &rest[start + 7..start + end];
            let permission = extract_tag(block, "Permission").ok_or("missing Permission")?;
            let permission = match permission.as_str() {
                "READ" => Permission::Read,
                "WRITE" => Permission::Write,
                "READ_ACP" => Permission::ReadAcp,
                "WRITE_ACP" => Permission::WriteAcp,
                "FULL_CONTROL" => Permission::FullControl,
                other => return Err(format!("unknown permission {other}")),
            };
            let grantee = if let Some(uri) = extract_tag(block, "URI") {
                Grantee::Group { uri }
            } else {
                let id = extract_tag(block, "ID").ok_or("missing grantee ID")?;
                let display_name = extract_tag(block, "DisplayName").unwrap_or_default();
                Grantee::CanonicalUser { id, display_name }
            };
            grants.push(Grant { grantee, permission });
            rest = &rest[start + end + 8..];
        }
        if grants.is_empty() {
            return Err("ACL must contain at least one grant".to_string());
        }
        Ok(Self {
            owner_id,
            owner_display_name,
            grants,
        })
    }
}

fn extract_tag(body: &str, tag: &str) -> Option<String> {
    let open_prefix = format!("<{tag}>");
    let open_ns = format!("<{tag} ");
    let (start_idx, open_len) = if let Some(i) = body.find(&open_prefix) {
        (i, open_prefix.len())
    } else {
        let i = body.find(&open_ns)?;
        let rel_close = body[i..].find('>')?;
        (i, rel_close + 1)
    };
    let close = format!("</{tag}>");
    let close_idx = body[start_idx..].find(&close)?;
    Some(body[start_idx + open_len..start_idx + close_idx].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_read_grants_all_users_read() {
        let policy = AccessControlPolicy::from_canned("public-read", "owner1", "Owner").unwrap();
        assert!(policy.is_public_read());
    }

    #[test]
    fn private_is_not_public() {
        let policy = AccessControlPolicy::from_canned("private", "owner1", "Owner").unwrap();
        assert!(!policy.is_public_read());
    }

    #[test]
    fn unknown_canned_acl_is_none() {
        assert!(AccessControlPolicy::from_canned("bogus", "owner1", "Owner").is_none());
    }

    #[test]
    fn xml_round_trips_owner_and_grant_count() {
        let policy = AccessControlPolicy::from_canned("public-read", "owner1", "Owner").unwrap();
        let xml = policy.to_xml();
        let parsed = AccessControlPolicy::from_xml(&xml).unwrap();
        assert_eq!(parsed.owner_id, "owner1");
        assert_eq!(parsed.grants.len(), policy.grants.len());
    }
}
