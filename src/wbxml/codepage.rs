//! WBXML code pages and their tag tables.
//!
//! Each code page is a namespace of page-local tag tokens in
//! `[0x05..0x3F]` (`spec.md` §4.1). Tag codes here follow the EAS
//! code-page convention; `spec.md` §9 explicitly distrusts the
//! source's divergent encoders (`minimal_sync_wbxml`, `iphone_wbxml`,
//! `zpush_wbxml`, `simple_wbxml`, ...) as ground truth, so these
//! tables are written fresh against the normative description rather
//! than copied from any one of them. Only the tags this core actually
//! emits or consumes are listed — calendar/contact fields and other
//! Non-goal surface are intentionally absent.

/// A WBXML code page selector (the byte following `SWITCH_PAGE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodePage {
    AirSync,
    Email,
    Ping,
    Provision,
    FolderHierarchy,
    AirSyncBase,
    GetItemEstimate,
    Settings,
    ComposeMail,
}

impl CodePage {
    #[must_use]
    pub const fn id(self) -> u8 {
        match self {
            Self::AirSync => 0x00,
            Self::Email => 0x02,
            Self::Ping => 0x0D,
            Self::Provision => 0x0E,
            Self::FolderHierarchy => 0x07,
            Self::AirSyncBase => 0x11,
            Self::GetItemEstimate => 0x0B,
            Self::Settings => 0x12,
            Self::ComposeMail => 0x15,
        }
    }

    #[must_use]
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            0x00 => Some(Self::AirSync),
            0x02 => Some(Self::Email),
            0x0D => Some(Self::Ping),
            0x0E => Some(Self::Provision),
            0x07 => Some(Self::FolderHierarchy),
            0x11 => Some(Self::AirSyncBase),
            0x0B => Some(Self::GetItemEstimate),
            0x12 => Some(Self::Settings),
            0x15 => Some(Self::ComposeMail),
            _ => None,
        }
    }

    const fn table(self) -> &'static [(u8, &'static str)] {
        match self {
            Self::AirSync => AIR_SYNC,
            Self::Email => EMAIL,
            Self::Ping => PING,
            Self::Provision => PROVISION,
            Self::FolderHierarchy => FOLDER_HIERARCHY,
            Self::AirSyncBase => AIR_SYNC_BASE,
            Self::GetItemEstimate => GET_ITEM_ESTIMATE,
            Self::Settings => SETTINGS,
            Self::ComposeMail => COMPOSE_MAIL,
        }
    }

    /// Resolve a page-local tag code to its name.
    #[must_use]
    pub fn tag_name(self, code: u8) -> Option<&'static str> {
        self.table()
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, name)| *name)
    }

    /// Resolve a tag name to its page-local code.
    #[must_use]
    pub fn tag_code(self, name: &str) -> Option<u8> {
        self.table()
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(c, _)| *c)
    }
}

// AirSync (0x00): the Sync command envelope.
const AIR_SYNC: &[(u8, &str)] = &[
    (0x05, "Sync"),
    (0x06, "Responses"),
    (0x07, "Add"),
    (0x08, "Change"),
    (0x09, "Delete"),
    (0x0A, "Fetch"),
    (0x0B, "SyncKey"),
    (0x0C, "ClientId"),
    (0x0D, "ServerId"),
    (0x0E, "Status"),
    (0x0F, "Collection"),
    (0x10, "Class"),
    (0x12, "CollectionId"),
    (0x13, "GetChanges"),
    (0x14, "MoreAvailable"),
    (0x15, "WindowSize"),
    (0x16, "Commands"),
    (0x17, "Options"),
    (0x18, "FilterType"),
    (0x1B, "Conflict"),
    (0x1C, "Collections"),
    (0x1D, "ApplicationData"),
    (0x1E, "DeletesAsMoves"),
    (0x20, "Supported"),
    (0x22, "MIMESupport"),
    (0x23, "MIMETruncation"),
    (0x25, "Limit"),
    (0x26, "Partial"),
];

// Email (0x02): message rendering fields.
const EMAIL: &[(u8, &str)] = &[
    (0x05, "Subject"),
    (0x06, "Read"),
    (0x07, "From"),
    (0x08, "To"),
    (0x09, "Cc"),
    (0x0A, "DisplayTo"),
    (0x0B, "ThreadTopic"),
    (0x0C, "Importance"),
    (0x0D, "DateReceived"),
    (0x0E, "MessageClass"),
    (0x0F, "InternetCPID"),
    (0x10, "ContentClass"),
    (0x11, "ConversationId"),
];

// Ping (0x0D): long-poll notification.
const PING: &[(u8, &str)] = &[
    (0x05, "Ping"),
    (0x06, "Status"),
    (0x07, "HeartbeatInterval"),
    (0x08, "Folders"),
    (0x09, "Folder"),
    (0x0A, "Id"),
    (0x0B, "Class"),
    (0x0C, "MaxFolders"),
];

// Provision (0x0E): device policy handshake.
const PROVISION: &[(u8, &str)] = &[
    (0x05, "Provision"),
    (0x06, "Policies"),
    (0x07, "Policy"),
    (0x08, "PolicyType"),
    (0x09, "PolicyKey"),
    (0x0A, "Data"),
    (0x0B, "Status"),
    (0x0C, "RemoteWipe"),
    (0x0D, "EASProvisionDoc"),
    (0x0E, "DevicePasswordEnabled"),
];

// FolderHierarchy (0x07): the static FolderSync tree.
const FOLDER_HIERARCHY: &[(u8, &str)] = &[
    (0x05, "FolderSync"),
    (0x06, "Status"),
    (0x07, "SyncKey"),
    (0x08, "Changes"),
    (0x09, "Count"),
    (0x0A, "Add"),
    (0x0B, "ServerId"),
    (0x0C, "ParentId"),
    (0x0D, "DisplayName"),
    (0x0E, "Type"),
];

// AirSyncBase (0x11): shared body/attachment rendering.
const AIR_SYNC_BASE: &[(u8, &str)] = &[
    (0x05, "BodyPreference"),
    (0x06, "Type"),
    (0x07, "TruncationSize"),
    (0x08, "AllOrNone"),
    (0x0A, "Body"),
    (0x0B, "Data"),
    (0x0C, "EstimatedDataSize"),
    (0x0D, "Truncated"),
    (0x0E, "BodyPreferences"),
];

// GetItemEstimate (0x0B): per-collection pending-change counts.
const GET_ITEM_ESTIMATE: &[(u8, &str)] = &[
    (0x05, "GetItemEstimate"),
    (0x06, "Collections"),
    (0x07, "Collection"),
    (0x08, "CollectionId"),
    (0x09, "Estimate"),
    (0x0A, "Response"),
    (0x0B, "Status"),
];

// Settings (0x12): device/user information echo.
const SETTINGS: &[(u8, &str)] = &[
    (0x05, "Settings"),
    (0x06, "Status"),
    (0x07, "Get"),
    (0x08, "Set"),
    (0x09, "DeviceInformation"),
    (0x0A, "Model"),
    (0x0B, "UserInformation"),
    (0x0C, "EmailAddresses"),
    (0x0D, "SMTPAddress"),
];

// ComposeMail (0x15): outbound mail submission.
const COMPOSE_MAIL: &[(u8, &str)] = &[
    (0x05, "SendMail"),
    (0x06, "ClientId"),
    (0x07, "SaveInSentItems"),
    (0x08, "Mime"),
    (0x09, "Status"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_round_trips() {
        for page in [
            CodePage::AirSync,
            CodePage::Email,
            CodePage::Ping,
            CodePage::Provision,
            CodePage::FolderHierarchy,
            CodePage::AirSyncBase,
            CodePage::GetItemEstimate,
            CodePage::Settings,
            CodePage::ComposeMail,
        ] {
            assert_eq!(CodePage::from_id(page.id()), Some(page));
        }
    }

    #[test]
    fn tag_name_and_code_round_trip() {
        let code = CodePage::AirSync.tag_code("SyncKey").unwrap();
        assert_eq!(CodePage::AirSync.tag_name(code), Some("SyncKey"));
    }

    #[test]
    fn unknown_tag_is_none() {
        assert_eq!(CodePage::Email.tag_code("Location"), None);
        assert_eq!(CodePage::AirSync.tag_name(0x3F), None);
    }
}
