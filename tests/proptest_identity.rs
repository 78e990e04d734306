//! Property-based tests using proptest
//!
//! These tests check identifier parsing and normalization, and that the cache
//! treats names case-insensitively, using randomized inputs.

mod common;

use aztree::resource::registry::{assign_path, lookup_path};
use aztree::resource::{ResourceId, ResourceType};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashSet;

const PG: &str = "Microsoft.DBforPostgreSQL";

fn arb_subscription() -> impl Strategy<Value = String> {
    "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}"
}

fn arb_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_-]{0,23}"
}

/// Identifiers from subscription level down to a nested child resource
fn arb_id() -> impl Strategy<Value = String> {
    (
        arb_subscription(),
        prop::option::of(arb_name()),
        prop::option::of((arb_name(), prop::option::of(arb_name()))),
    )
        .prop_map(|(sub, rg, resource)| {
            let mut id = format!("/subscriptions/{}", sub);
            let Some(rg) = rg else {
                return id;
            };
            id.push_str(&format!("/resourceGroups/{}", rg));
            if let Some((server, database)) = resource {
                id.push_str(&format!("/providers/{}/servers/{}", PG, server));
                if let Some(database) = database {
                    id.push_str(&format!("/databases/{}", database));
                }
            }
            id
        })
}

fn swap_case(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_uppercase() {
                c.to_ascii_lowercase()
            } else {
                c.to_ascii_uppercase()
            }
        })
        .collect()
}

proptest! {
    /// Parsing then displaying reproduces the identifier
    #[test]
    fn parse_display_roundtrip(raw in arb_id()) {
        let id = ResourceId::parse(&raw).unwrap();
        prop_assert_eq!(id.to_string(), raw.clone());
        prop_assert_eq!(ResourceId::parse(&id.to_string()).unwrap(), id);
    }

    /// Identifiers differing only in case are the same resource
    #[test]
    fn equality_ignores_case(raw in arb_id()) {
        let id = ResourceId::parse(&raw).unwrap();
        let swapped = ResourceId::parse(&swap_case(&raw)).unwrap();
        prop_assert_eq!(id.normalized(), swapped.normalized());
        prop_assert_eq!(&id, &swapped);
        prop_assert_eq!(id.resource_type(), swapped.resource_type());
    }

    /// Trailing and doubled slashes never parse into a different resource
    #[test]
    fn trailing_slash_is_ignored(raw in arb_id()) {
        let plain = ResourceId::parse(&raw).unwrap();
        let trailing = ResourceId::parse(&format!("{}/", raw)).unwrap();
        prop_assert_eq!(plain, trailing);
        prop_assert!(ResourceId::parse(&raw.replacen("/subscriptions/", "/subscriptions//", 1)).is_err());
    }

    /// A child's parent is the identifier it was built from
    #[test]
    fn child_then_parent(sub in arb_subscription(), rg in arb_name(), server in arb_name()) {
        let group = ResourceId::resource_group(sub, rg);
        let child = group.child(&ResourceType::new(PG, "servers"), &server).unwrap();
        prop_assert_eq!(child.name(), server.as_str());
        prop_assert_eq!(child.resource_type(), ResourceType::new(PG, "servers"));
        prop_assert_eq!(child.parent(), Some(group));
        prop_assert_eq!(child.ancestors().len(), 3);
    }

    /// Names containing a path separator are rejected
    #[test]
    fn names_with_slashes_are_rejected(sub in arb_subscription(), a in arb_name(), b in arb_name()) {
        let group = ResourceId::resource_group(sub, "rg");
        let name = format!("{}/{}", a, b);
        prop_assert!(group.child(&ResourceType::new(PG, "servers"), &name).is_err());
    }
}

mod dot_path_tests {
    use super::*;

    proptest! {
        /// A value assigned at a path is read back at the same path
        #[test]
        fn assigned_value_is_found(
            segments in prop::collection::vec("[a-zA-Z]{1,8}", 1..5),
            value in any::<i64>()
        ) {
            let path = segments.join(".");
            let mut item = json!({"name": "keep"});
            assign_path(&mut item, &path, json!(value));
            prop_assert_eq!(lookup_path(&item, &path), Some(&json!(value)));
            if segments[0] != "name" {
                prop_assert_eq!(item.get("name"), Some(&Value::from("keep")));
            }
        }
    }
}

mod cache_tests {
    use super::*;
    use crate::common::harness;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Listed resources are cached once per case-insensitive name and later
        /// lookups in any case are served from the cache
        #[test]
        fn cache_is_keyed_case_insensitively(names in prop::collection::vec(arb_name(), 1..12)) {
            let h = harness();
            let distinct: HashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();

            tokio_test::block_on(async {
                let server = h.server("rg", "pg").await;
                for name in &names {
                    h.seed_named("databases", server.id(), name, json!({}));
                }
                let module = h.tree.module_for(&server, "databases").unwrap();

                let listed = module.list().await.unwrap();
                assert_eq!(listed.len(), distinct.len());
                assert_eq!(module.cached().len(), distinct.len());

                for name in &names {
                    let hit = module.get(&swap_case(name), None).await.unwrap();
                    assert!(hit.is_some(), "{} should be cached", name);
                }
                assert_eq!(h.binding("databases").gets(), 0);
            });
        }
    }
}
