use crate::config::{IceServerConfig, IceServerKind};
use rand::Rng;

/// 16 hex chars of randomness, used for call ids
pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Adds the stun:/turn: scheme to an ICE server URL when it is missing
pub fn add_ice_url_scheme(config: &IceServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
        || config.url.starts_with("stuns:")
    {
        config.url.clone()
    } else {
        let scheme = match config.kind {
            IceServerKind::Turn => "turn:",
            IceServerKind::Stun => "stun:",
        };
        format!("{}{}", scheme, config.url)
    }
}

/// Trimmed copy of a user-supplied field, `None` when blank
pub fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: IceServerKind, url: &str) -> IceServerConfig {
        IceServerConfig {
            id: None,
            kind,
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn scheme_added_from_server_type() {
        assert_eq!(
            add_ice_url_scheme(&server(IceServerKind::Turn, "turn.example.org:3478")),
            "turn:turn.example.org:3478"
        );
        assert_eq!(
            add_ice_url_scheme(&server(IceServerKind::Stun, "stun.example.org:19302")),
            "stun:stun.example.org:19302"
        );
    }

    #[test]
    fn existing_scheme_kept() {
        assert_eq!(
            add_ice_url_scheme(&server(IceServerKind::Turn, "stun:mixed.example.org")),
            "stun:mixed.example.org"
        );
    }

    #[test]
    fn random_ids_are_distinct_hex() {
        let a = random_id();
        let b = random_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn blank_fields() {
        assert_eq!(non_blank("  "), None);
        assert_eq!(non_blank(" Ana "), Some("Ana".to_string()));
    }
}
