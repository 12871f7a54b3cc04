//! IMAP folder types and detection

/// Role of a remote folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FolderType {
    /// Inbox folder
    Inbox,
    /// Sent messages
    Sent,
    /// Draft messages
    Drafts,
    /// Trash/deleted messages
    Trash,
    /// Spam/junk
    Spam,
    /// Archive
    Archive,
    /// User-created folder
    Other,
}

impl FolderType {
    /// Detect folder type from IMAP special-use attributes (RFC 6154).
    /// Matches with or without the backslash prefix, since some servers
    /// send "Trash" instead of "\Trash".
    pub fn from_attributes(attributes: &[String]) -> Option<Self> {
        for attr in attributes {
            let lower = attr.to_lowercase();
            let normalized = lower.trim_start_matches('\\');
            match normalized {
                "inbox" => return Some(FolderType::Inbox),
                "sent" => return Some(FolderType::Sent),
                "drafts" => return Some(FolderType::Drafts),
                "trash" => return Some(FolderType::Trash),
                "junk" => return Some(FolderType::Spam),
                "archive" | "all" => return Some(FolderType::Archive),
                _ => {}
            }
        }
        None
    }

    /// Detect folder type from the name alone (fallback when the server
    /// advertises no special-use attributes).
    pub fn from_name(name: &str) -> Self {
        let name_lower = name.to_lowercase();
        if name_lower == "inbox" {
            FolderType::Inbox
        } else if name_lower.contains("sent") {
            FolderType::Sent
        } else if name_lower.contains("draft") {
            FolderType::Drafts
        } else if name_lower.contains("trash")
            || name_lower.contains("bin")
            || name_lower.contains("deleted")
        {
            FolderType::Trash
        } else if name_lower.contains("spam") || name_lower.contains("junk") {
            FolderType::Spam
        } else if name_lower.contains("archive") || name_lower.contains("all mail") {
            FolderType::Archive
        } else {
            FolderType::Other
        }
    }

    /// Attributes first, then name.
    pub fn from_attributes_and_name(attributes: &[String], name: &str) -> Self {
        Self::from_attributes(attributes).unwrap_or_else(|| Self::from_name(name))
    }
}

/// A remote folder as reported by LIST
#[derive(Debug, Clone)]
pub struct Folder {
    /// Display name (last path segment)
    pub name: String,
    /// Full path including hierarchy delimiter
    pub full_path: String,
    /// Detected role
    pub folder_type: FolderType,
    /// Hierarchy delimiter
    pub delimiter: Option<char>,
    /// Raw special-use attributes
    pub attributes: Vec<String>,
}

impl Folder {
    pub fn new(
        name: String,
        full_path: String,
        delimiter: Option<char>,
        attributes: Vec<String>,
    ) -> Self {
        let folder_type = FolderType::from_attributes_and_name(&attributes, &full_path);
        Self {
            name,
            full_path,
            folder_type,
            delimiter,
            attributes,
        }
    }

    /// Whether the folder can be SELECTed
    pub fn is_selectable(&self) -> bool {
        !self.attributes.iter().any(|a| {
            let lower = a.to_lowercase();
            lower == "\\noselect" || lower == "\\nonexistent"
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sent_from_special_use_attribute() {
        assert_eq!(
            FolderType::from_attributes_and_name(&["\\Sent".to_string()], "Elementi inviati"),
            FolderType::Sent
        );
    }

    #[test]
    fn detects_gmail_sent_by_name() {
        assert_eq!(
            FolderType::from_attributes_and_name(&[], "[Gmail]/Sent Mail"),
            FolderType::Sent
        );
    }

    #[test]
    fn inbox_is_case_insensitive() {
        assert_eq!(FolderType::from_name("INBOX"), FolderType::Inbox);
        assert_eq!(FolderType::from_name("inbox"), FolderType::Inbox);
    }

    #[test]
    fn noselect_folders_are_not_selectable() {
        let folder = Folder::new(
            "[Gmail]".into(),
            "[Gmail]".into(),
            Some('/'),
            vec!["\\Noselect".into()],
        );
        assert!(!folder.is_selectable());
    }
}
