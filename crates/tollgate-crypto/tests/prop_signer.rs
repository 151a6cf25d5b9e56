use proptest::collection::btree_map;
use proptest::prelude::*;
use tollgate_crypto::{sign, Params};

fn param_map() -> impl Strategy<Value = Params> {
    btree_map("[a-z]{1,6}", "[ -~]{0,12}", 0..8)
}

proptest! {
    #[test]
    fn signature_ignores_insertion_order(
        (pairs, shuffled) in param_map().prop_flat_map(|map| {
            let pairs: Vec<(String, String)> = map.into_iter().collect();
            (Just(pairs.clone()), Just(pairs).prop_shuffle())
        }),
        form in param_map(),
    ) {
        let forward: Params = pairs.into_iter().collect();
        let backward: Params = shuffled.into_iter().collect();
        prop_assert_eq!(
            sign(b"app-secret", "POST", "/session", &forward, &form),
            sign(b"app-secret", "POST", "/session", &backward, &form)
        );
    }

    #[test]
    fn query_and_form_split_does_not_matter(all in param_map(), split in 0usize..8) {
        let mut queries = Params::new();
        let mut form = Params::new();
        for (index, (key, value)) in all.iter().enumerate() {
            if index < split {
                queries.insert(key.clone(), value.clone());
            } else {
                form.insert(key.clone(), value.clone());
            }
        }
        prop_assert_eq!(
            sign(b"app-secret", "GET", "/auth", &all, &Params::new()),
            sign(b"app-secret", "GET", "/auth", &queries, &form)
        );
    }

    #[test]
    fn any_value_change_changes_signature(all in btree_map("[a-z]{1,6}", "[a-z]{1,8}", 1..6)) {
        let original = sign(b"app-secret", "GET", "/auth", &all, &Params::new());
        let mut changed = all.clone();
        if let Some((key, value)) = all.iter().next() {
            changed.insert(key.clone(), format!("{value}!"));
        }
        prop_assert_ne!(original, sign(b"app-secret", "GET", "/auth", &changed, &Params::new()));
    }
}
