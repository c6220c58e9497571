//! Folder name reconciliation
//!
//! Maps a source folder path onto the destination's existing folder
//! hierarchy so providers with different naming conventions (localized
//! names, different capitalization, different special-folder labels)
//! end up in the equivalent destination folder instead of a duplicate.
//!
//! Precedence: exact match, case-insensitive match, well-known-role
//! alias match, hierarchical match with leaf normalization, then the
//! source path verbatim.

/// Well-known mailbox roles used for alias matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FolderRole {
    Inbox,
    Sent,
    Trash,
    Spam,
    Drafts,
    Archive,
}

/// Alias table for common folder roles, lowercase. Includes localized
/// alias sets (Turkish, French, German, Spanish) seen in the wild.
fn role_of(name: &str) -> Option<FolderRole> {
    let normalized = name.trim().to_lowercase();
    match normalized.as_str() {
        "inbox" | "gelen kutusu" | "boîte de réception" | "posteingang" | "bandeja de entrada" => {
            Some(FolderRole::Inbox)
        }
        "sent" | "sent items" | "sent messages" | "sent mail" | "gönderilmiş"
        | "gönderilmiş öğeler" | "gönderilenler" | "envoyés" | "éléments envoyés"
        | "gesendet" | "gesendete elemente" | "enviados" => Some(FolderRole::Sent),
        "trash" | "deleted" | "deleted items" | "deleted messages" | "bin" | "çöp kutusu"
        | "silinmiş öğeler" | "corbeille" | "papierkorb" | "papelera" => Some(FolderRole::Trash),
        "spam" | "junk" | "junk e-mail" | "junk email" | "bulk mail" | "istenmeyen"
        | "önemsiz" | "courrier indésirable" | "correo no deseado" => Some(FolderRole::Spam),
        "drafts" | "draft" | "taslaklar" | "brouillons" | "entwürfe" | "borradores" => {
            Some(FolderRole::Drafts)
        }
        "archive" | "archives" | "arşiv" | "archiv" | "archivo" => Some(FolderRole::Archive),
        _ => None,
    }
}

/// Detect the hierarchy separator used by a path
fn detect_separator(path: &str) -> Option<char> {
    if path.contains('/') {
        Some('/')
    } else if path.contains('.') {
        Some('.')
    } else {
        None
    }
}

/// Map a source folder path to the equivalent destination path.
///
/// Returns an existing destination path when one matches; otherwise the
/// source path unchanged, to be created verbatim.
pub fn reconcile(source_path: &str, existing: &[String]) -> String {
    // 1. Exact match
    if existing.iter().any(|e| e == source_path) {
        return source_path.to_string();
    }

    // 2. Case-insensitive match
    let source_lower = source_path.to_lowercase();
    if let Some(hit) = existing.iter().find(|e| e.to_lowercase() == source_lower) {
        return hit.clone();
    }

    // 3. Well-known-role alias match
    if let Some(role) = role_of(source_path) {
        if let Some(hit) = existing.iter().find(|e| role_of(e) == Some(role)) {
            return hit.clone();
        }
    }

    // 4. Hierarchical match: reconcile the parent on its own, then
    //    normalize the leaf against the same alias table.
    if let Some(sep) = detect_separator(source_path) {
        if let Some((parent, leaf)) = source_path.rsplit_once(sep) {
            let parent_reconciled = reconcile(parent, existing);
            let parent_lower = parent_reconciled.to_lowercase();

            let candidate_lower = format!("{parent_lower}{sep}{}", leaf.to_lowercase());
            if let Some(hit) = existing
                .iter()
                .find(|e| e.to_lowercase() == candidate_lower)
            {
                return hit.clone();
            }

            if let Some(leaf_role) = role_of(leaf) {
                if let Some(hit) = existing.iter().find(|e| {
                    e.rsplit_once(sep).is_some_and(|(e_parent, e_leaf)| {
                        e_parent.to_lowercase() == parent_lower && role_of(e_leaf) == Some(leaf_role)
                    })
                }) {
                    return hit.clone();
                }
            }
        }
    }

    // 5. Fallback: create the source path verbatim
    source_path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_match_wins() {
        let existing = paths(&["INBOX", "Sent", "Archive"]);
        assert_eq!(reconcile("Sent", &existing), "Sent");
    }

    #[test]
    fn test_case_insensitive_match() {
        let existing = paths(&["INBOX", "Sent"]);
        assert_eq!(reconcile("inbox", &existing), "INBOX");
        assert_eq!(reconcile("SENT", &existing), "Sent");
    }

    #[test]
    fn test_localized_alias_maps_to_role() {
        let existing = paths(&["INBOX", "Sent", "Trash"]);
        assert_eq!(reconcile("Gönderilmiş", &existing), "Sent");
        assert_eq!(reconcile("Corbeille", &existing), "Trash");
        assert_eq!(reconcile("Junk", &paths(&["INBOX", "Spam"])), "Spam");
    }

    #[test]
    fn test_hierarchical_leaf_normalization() {
        let existing = paths(&["Parent", "Parent.Spam"]);
        assert_eq!(reconcile("Parent.spam", &existing), "Parent.Spam");

        let existing = paths(&["Parent", "Parent.Junk"]);
        assert_eq!(reconcile("Parent.Spam", &existing), "Parent.Junk");
    }

    #[test]
    fn test_hierarchical_with_slash_separator() {
        let existing = paths(&["Clients", "Clients/Archive"]);
        assert_eq!(reconcile("clients/arşiv", &existing), "Clients/Archive");
    }

    #[test]
    fn test_unmatched_path_returned_verbatim() {
        let existing = paths(&["INBOX", "Sent"]);
        assert_eq!(reconcile("Projects.2024", &existing), "Projects.2024");
        assert_eq!(reconcile("Completely New", &existing), "Completely New");
    }

    #[test]
    fn test_empty_destination_listing() {
        assert_eq!(reconcile("INBOX", &[]), "INBOX");
    }
}
