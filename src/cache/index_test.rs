#[cfg(test)]
mod tests {
    use super::super::index::StoreIndexes;
    use super::super::StoreIndexSpec;
    use crate::test_utils::labeled_object;

    fn tier_index() -> StoreIndexSpec {
        StoreIndexSpec::new("by-tier", |obj| {
            obj.labels.get("tier").map(|v| vec![v.clone()]).unwrap_or_default()
        })
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut indexes = StoreIndexes::new(vec![tier_index()]);
        let web = labeled_object("/r/w/default/a", "default", "a", 1, &[("tier", "web")]);
        let db = labeled_object("/r/w/default/b", "default", "b", 2, &[("tier", "db")]);
        indexes.insert(&web);
        indexes.insert(&db);

        let keys = indexes.lookup("by-tier", "web").expect("index defined");
        assert_eq!(keys, vec!["/r/w/default/a".to_string()]);
        assert!(indexes.lookup("by-tier", "cache").expect("defined").is_empty());
    }

    #[test]
    fn test_lookup_unknown_index_is_none() {
        let indexes = StoreIndexes::new(vec![tier_index()]);
        assert!(indexes.lookup("by-node", "n1").is_none());
        assert!(indexes.has_index("by-tier"));
        assert!(!indexes.has_index("by-node"));
    }

    #[test]
    fn test_remove_clears_empty_values() {
        let mut indexes = StoreIndexes::new(vec![tier_index()]);
        let web = labeled_object("/r/w/default/a", "default", "a", 1, &[("tier", "web")]);
        indexes.insert(&web);
        indexes.remove(&web);
        assert!(indexes.lookup("by-tier", "web").expect("defined").is_empty());
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let mut indexes = StoreIndexes::new(vec![tier_index()]);
        let old = labeled_object("/r/w/default/old", "default", "old", 1, &[("tier", "web")]);
        indexes.insert(&old);

        let fresh = labeled_object("/r/w/default/new", "default", "new", 2, &[("tier", "web")]);
        indexes.rebuild([&fresh].into_iter());

        let keys = indexes.lookup("by-tier", "web").expect("defined");
        assert_eq!(keys, vec!["/r/w/default/new".to_string()]);
    }

    #[test]
    fn test_object_without_index_value_not_indexed() {
        let mut indexes = StoreIndexes::new(vec![tier_index()]);
        let plain = labeled_object("/r/w/default/p", "default", "p", 1, &[("other", "x")]);
        indexes.insert(&plain);
        assert!(indexes.lookup("by-tier", "x").expect("defined").is_empty());
    }
}
