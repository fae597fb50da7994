use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Provider tag the connector factory is keyed on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gmail,
    /// Generic IMAP, including Exchange.
    #[default]
    #[serde(alias = "exchange")]
    Imap,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gmail" => Ok(Self::Gmail),
            "imap" | "exchange" => Ok(Self::Imap),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Well-known folders a provider exposes under its own naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FolderRole {
    Inbox,
    Sent,
    Drafts,
    Trash,
    AllMail,
}

/// Folder naming conventions of one provider family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDialect {
    pub kind: ProviderKind,
    pub delimiter: char,
    inbox: &'static str,
    sent: &'static str,
    drafts: &'static str,
    trash: &'static str,
    all_mail: Option<&'static str>,
    /// Views that only aggregate messages living in concrete folders.
    aggregates: &'static [&'static str],
}

impl ProviderDialect {
    pub fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Gmail => ProviderDialect {
                kind,
                delimiter: '/',
                inbox: "INBOX",
                sent: "[Gmail]/Sent Mail",
                drafts: "[Gmail]/Drafts",
                trash: "[Gmail]/Trash",
                all_mail: Some("[Gmail]/All Mail"),
                aggregates: &["[Gmail]/All Mail", "[Gmail]/Important", "[Gmail]/Starred"],
            },
            ProviderKind::Imap => ProviderDialect {
                kind,
                delimiter: '/',
                inbox: "INBOX",
                sent: "Sent",
                drafts: "Drafts",
                trash: "Trash",
                all_mail: None,
                aggregates: &[],
            },
        }
    }

    pub fn folder_for(&self, role: FolderRole) -> Option<&'static str> {
        match role {
            FolderRole::Inbox => Some(self.inbox),
            FolderRole::Sent => Some(self.sent),
            FolderRole::Drafts => Some(self.drafts),
            FolderRole::Trash => Some(self.trash),
            FolderRole::AllMail => self.all_mail,
        }
    }

    pub fn is_aggregate(&self, folder: &str) -> bool {
        self.aggregates.iter().any(|a| a.eq_ignore_ascii_case(folder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gmail_names_its_special_folders() {
        let d = ProviderDialect::for_kind(ProviderKind::Gmail);
        assert_eq!(d.folder_for(FolderRole::AllMail), Some("[Gmail]/All Mail"));
        assert_eq!(d.folder_for(FolderRole::Sent), Some("[Gmail]/Sent Mail"));
        assert!(d.is_aggregate("[Gmail]/All Mail"));
        assert!(d.is_aggregate("[gmail]/important"));
        assert!(!d.is_aggregate("INBOX"));
    }

    #[test]
    fn generic_imap_has_no_aggregate_views() {
        let d = ProviderDialect::for_kind(ProviderKind::Imap);
        assert_eq!(d.folder_for(FolderRole::Sent), Some("Sent"));
        assert_eq!(d.folder_for(FolderRole::AllMail), None);
        assert!(!d.is_aggregate("All Mail"));
    }

    #[test]
    fn provider_tags_parse() {
        assert_eq!("Gmail".parse::<ProviderKind>(), Ok(ProviderKind::Gmail));
        assert_eq!("exchange".parse::<ProviderKind>(), Ok(ProviderKind::Imap));
        assert!("pop3".parse::<ProviderKind>().is_err());
    }
}
