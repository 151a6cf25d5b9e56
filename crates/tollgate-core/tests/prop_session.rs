use proptest::prelude::*;
use tollgate_core::{SessionState, SessionUpdate, TokenSet, UserStatus, Version};

fn update(agent_code: &str, expires_at: i64) -> SessionUpdate {
    SessionUpdate {
        tokens: TokenSet {
            access_token: "access".to_string(),
            access_expires_at: expires_at,
            refresh_token: "refresh".to_string(),
            refresh_expires_at: expires_at,
            id_token: "id".to_string(),
            id_expires_at: expires_at,
        },
        username: "alice".to_string(),
        email: String::new(),
        agent_code: agent_code.to_string(),
        secret: String::new(),
        status: UserStatus::Active,
    }
}

proptest! {
    #[test]
    fn tokens_are_visible_only_before_expiry(expires_at in -1_000i64..1_000, now in -1_000i64..1_000) {
        let tokens = update("A", expires_at).tokens;
        prop_assert_eq!(tokens.access_token_at(now).is_some(), now < expires_at);
        prop_assert_eq!(tokens.id_token_at(now).is_some(), now < expires_at);
    }

    #[test]
    fn stale_epoch_never_writes(bumps in 1u64..5) {
        let session = SessionState::new();
        let epoch = session.epoch();
        for _ in 0..bumps {
            session.bump_epoch();
        }
        prop_assert!(session.apply(update("A", i64::MAX), epoch).is_none());
        prop_assert!(session.profile().is_none());
        prop_assert!(session.tokens().access_token.is_empty());
    }

    #[test]
    fn version_order_matches_components(
        a in (0u32..50, 0u32..50, 0u32..50),
        b in (0u32..50, 0u32..50, 0u32..50),
    ) {
        let left = Version::parse(&format!("{}.{}.{}", a.0, a.1, a.2)).expect("left");
        let right = Version::parse(&format!("{}.{}.{}", b.0, b.1, b.2)).expect("right");
        prop_assert_eq!(left.cmp(&right), a.cmp(&b));
    }
}
