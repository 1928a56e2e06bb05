#[cfg(test)]
mod engine_tests {
    use crate::core::address::AddressFamily;
    use crate::core::error::Error;
    use crate::core::test_helpers::{V4_SET, V6_SET, test_engine};
    use std::time::Duration;

    #[tokio::test]
    async fn test_append_ipv4_point() {
        let (engine, executor) = test_engine();

        engine.append(["203.0.113.5"]).await.unwrap();

        assert!(engine.check("203.0.113.5"));
        assert!(!engine.check("203.0.113.6"));
        assert_eq!(
            executor.scripts(),
            vec![format!("add element {V4_SET} {{ 203.0.113.5 }}")]
        );
    }

    #[tokio::test]
    async fn test_append_ipv6_aggregates_to_64() {
        let (engine, executor) = test_engine();

        engine.append(["2001:db8:abcd:1234::5"]).await.unwrap();

        assert!(engine.check("2001:db8:abcd:1234::9999"));
        assert!(!engine.check("2001:db8:abcd:9999::5"));
        assert_eq!(
            executor.scripts(),
            vec![format!(
                "add element {V6_SET} {{ 2001:0db8:abcd:1234::/64 }}"
            )]
        );
    }

    #[tokio::test]
    async fn test_append_is_monotonic() {
        let (engine, _executor) = test_engine();

        engine.append(["192.0.2.1", "192.0.2.2"]).await.unwrap();
        engine.append(["192.0.2.3"]).await.unwrap();

        assert!(engine.check("192.0.2.1"));
        assert!(engine.check("192.0.2.2"));
        assert!(engine.check("192.0.2.3"));
        assert_eq!(engine.entry_counts().v4, 3);
    }

    #[tokio::test]
    async fn test_append_sends_only_new_entries() {
        let (engine, executor) = test_engine();

        engine.append(["192.0.2.1"]).await.unwrap();
        executor.take_scripts();

        engine.append(["192.0.2.1", "192.0.2.2"]).await.unwrap();
        assert_eq!(
            executor.scripts(),
            vec![format!("add element {V4_SET} {{ 192.0.2.2 }}")]
        );

        executor.take_scripts();
        engine.append(["192.0.2.2"]).await.unwrap();
        assert!(executor.scripts().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_entries_skipped_without_failing_batch() {
        let (engine, executor) = test_engine();

        engine
            .append(["not-an-ip", "192.0.2.10", "999.1.1.1", "", "::1"])
            .await
            .unwrap();

        assert!(engine.check("192.0.2.10"));
        assert_eq!(executor.scripts().len(), 1);

        executor.take_scripts();
        engine.append(["garbage", "::"]).await.unwrap();
        assert!(executor.scripts().is_empty());
    }

    #[tokio::test]
    async fn test_append_both_families_in_order() {
        let (engine, executor) = test_engine();

        engine
            .append(["2001:db8:1:2::3", "192.0.2.1"])
            .await
            .unwrap();

        let scripts = executor.scripts();
        assert_eq!(scripts.len(), 2);
        assert!(scripts[0].contains(V4_SET));
        assert!(scripts[1].contains(V6_SET));
    }

    #[tokio::test]
    async fn test_replace_is_idempotent() {
        let (engine, executor) = test_engine();
        let bans = ["192.0.2.1", "198.51.100.0/24", "2001:db8:1:2::3"];

        engine.replace(bans).await.unwrap();
        assert_eq!(executor.take_scripts().len(), 2);

        engine.replace(bans).await.unwrap();
        assert!(executor.scripts().is_empty());
        assert!(engine.check("198.51.100.99"));
    }

    #[tokio::test]
    async fn test_replace_deletes_before_adding() {
        let (engine, executor) = test_engine();

        engine.replace(["192.0.2.1", "192.0.2.2"]).await.unwrap();
        executor.take_scripts();

        engine.replace(["192.0.2.2", "192.0.2.3"]).await.unwrap();
        assert_eq!(
            executor.scripts(),
            vec![
                format!("delete element {V4_SET} {{ 192.0.2.1 }}"),
                format!("add element {V4_SET} {{ 192.0.2.3 }}"),
            ]
        );
        assert!(!engine.check("192.0.2.1"));
        assert!(engine.check("192.0.2.2"));
        assert!(engine.check("192.0.2.3"));
    }

    #[tokio::test]
    async fn test_replace_one_family_only_leaves_other_empty() {
        let (engine, executor) = test_engine();

        engine.append(["2001:db8:1:2::3"]).await.unwrap();
        executor.take_scripts();

        engine.replace(["192.0.2.1"]).await.unwrap();

        // The v6 aggregate is no longer in the candidate, so it is deleted
        assert_eq!(
            executor.scripts(),
            vec![
                format!("add element {V4_SET} {{ 192.0.2.1 }}"),
                format!("delete element {V6_SET} {{ 2001:0db8:0001:0002::/64 }}"),
            ]
        );
        assert!(!engine.check("2001:db8:1:2::3"));
    }

    #[tokio::test]
    async fn test_replace_empty_flushes_both_families() {
        let (engine, executor) = test_engine();

        engine.append(["192.0.2.1", "2001:db8:1:2::3"]).await.unwrap();
        executor.take_scripts();

        engine.replace(Vec::<String>::new()).await.unwrap();

        assert_eq!(
            executor.scripts(),
            vec![format!("flush set {V4_SET}"), format!("flush set {V6_SET}")]
        );
        assert!(!engine.check("192.0.2.1"));
        assert!(!engine.check("2001:db8:1:2::3"));
    }

    #[tokio::test]
    async fn test_replace_with_only_malformed_flushes() {
        let (engine, executor) = test_engine();

        engine.replace(["", "junk", "::1"]).await.unwrap();
        assert_eq!(
            executor.scripts(),
            vec![format!("flush set {V4_SET}"), format!("flush set {V6_SET}")]
        );
    }

    #[tokio::test]
    async fn test_flush_clears_everything_once_per_family() {
        let (engine, executor) = test_engine();

        engine
            .append(["192.0.2.1", "198.51.100.0/24", "2001:db8:1:2::3"])
            .await
            .unwrap();
        executor.take_scripts();

        engine.flush().await.unwrap();

        for addr in ["192.0.2.1", "198.51.100.7", "2001:db8:1:2::3"] {
            assert!(!engine.check(addr), "{addr} still banned after flush");
        }
        let scripts = executor.scripts();
        assert_eq!(
            scripts.iter().filter(|s| **s == format!("flush set {V4_SET}")).count(),
            1
        );
        assert_eq!(
            scripts.iter().filter(|s| **s == format!("flush set {V6_SET}")).count(),
            1
        );
        assert_eq!(engine.entry_counts().v4, 0);
        assert_eq!(engine.entry_counts().v6, 0);
    }

    #[tokio::test]
    async fn test_failed_family_is_not_committed() {
        let (engine, executor) = test_engine();
        executor.fail_when_contains(V4_SET);

        let result = engine.append(["192.0.2.1", "2001:db8:1:2::3"]).await;

        assert!(matches!(result, Err(Error::Nftables { .. })));
        // v4 failed and stays at its last good state; v6 committed independently
        assert!(!engine.check("192.0.2.1"));
        assert!(engine.check("2001:db8:1:2::3"));
        assert_eq!(engine.entry_counts().v4, 0);
        assert_eq!(engine.entry_counts().v6, 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_queue() {
        let (engine, executor) = test_engine();
        executor.fail_when_contains("192.0.2.1");

        assert!(engine.append(["192.0.2.1"]).await.is_err());

        executor.clear_failures();
        engine.append(["192.0.2.1"]).await.unwrap();
        assert!(engine.check("192.0.2.1"));

        // The failed attempt was not committed, so the retry sent the entry again
        assert_eq!(executor.scripts().len(), 2);
    }

    #[tokio::test]
    async fn test_replace_failed_add_keeps_committed_delete() {
        let (engine, executor) = test_engine();

        engine.replace(["192.0.2.1"]).await.unwrap();
        executor.fail_when_contains("add element");

        let result = engine.replace(["192.0.2.2"]).await;
        assert!(result.is_err());

        // The delete landed, the add did not
        assert!(!engine.check("192.0.2.1"));
        assert!(!engine.check("192.0.2.2"));

        executor.clear_failures();
        executor.take_scripts();
        engine.replace(["192.0.2.2"]).await.unwrap();
        assert_eq!(
            executor.scripts(),
            vec![format!("add element {V4_SET} {{ 192.0.2.2 }}")]
        );
        assert!(engine.check("192.0.2.2"));
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_family_state() {
        let (engine, executor) = test_engine();

        engine.append(["192.0.2.1", "2001:db8:1:2::3"]).await.unwrap();
        executor.fail_when_contains(&format!("flush set {V6_SET}"));

        assert!(engine.flush().await.is_err());
        assert!(!engine.check("192.0.2.1"));
        assert!(engine.check("2001:db8:1:2::3"));
    }

    #[tokio::test]
    async fn test_concurrent_append_then_replace_is_ordered() {
        let (engine, executor) = test_engine();
        executor.set_delay(Duration::from_millis(20));

        let appender = engine.clone();
        let replacer = engine.clone();
        let (appended, replaced) = tokio::join!(
            appender.append(["192.0.2.1"]),
            replacer.replace(["192.0.2.2"]),
        );
        appended.unwrap();
        replaced.unwrap();

        assert!(!engine.check("192.0.2.1"));
        assert!(engine.check("192.0.2.2"));
        assert_eq!(
            executor.scripts(),
            vec![
                format!("add element {V4_SET} {{ 192.0.2.1 }}"),
                format!("delete element {V4_SET} {{ 192.0.2.1 }}"),
                format!("add element {V4_SET} {{ 192.0.2.2 }}"),
            ]
        );
    }

    #[tokio::test]
    async fn test_operations_never_overlap() {
        let (engine, executor) = test_engine();
        executor.set_delay(Duration::from_millis(5));

        let (a, b, c, d) = tokio::join!(
            engine.append(["192.0.2.1", "2001:db8:1::1"]),
            engine.append(["192.0.2.2"]),
            engine.replace(["192.0.2.3", "2001:db8:2::1"]),
            engine.flush(),
        );
        for result in [a, b, c, d] {
            result.unwrap();
        }

        assert_eq!(executor.max_in_flight(), 1);
        let scripts = executor.scripts();
        assert_eq!(
            scripts,
            vec![
                format!("add element {V4_SET} {{ 192.0.2.1 }}"),
                format!("add element {V6_SET} {{ 2001:0db8:0001:0000::/64 }}"),
                format!("add element {V4_SET} {{ 192.0.2.2 }}"),
                format!("delete element {V4_SET} {{ 192.0.2.1, 192.0.2.2 }}"),
                format!("add element {V4_SET} {{ 192.0.2.3 }}"),
                format!("delete element {V6_SET} {{ 2001:0db8:0001:0000::/64 }}"),
                format!("add element {V6_SET} {{ 2001:0db8:0002:0000::/64 }}"),
                format!("flush set {V4_SET}"),
                format!("flush set {V6_SET}"),
            ]
        );
        assert!(!engine.check("192.0.2.3"));
    }

    #[tokio::test]
    async fn test_append_inside_committed_subnet_sends_nothing() {
        let (engine, executor) = test_engine();

        engine.append(["198.51.100.0/24"]).await.unwrap();
        engine.append(["198.51.100.5"]).await.unwrap();
        engine.replace(["198.51.100.0/24"]).await.unwrap();

        // A delete for the point would cut it out of the merged /24 in the kernel
        assert_eq!(
            executor.scripts(),
            vec![format!("add element {V4_SET} {{ 198.51.100.0/24 }}")]
        );
        assert!(engine.check("198.51.100.5"));
        assert_eq!(engine.entry_counts().v4, 1);
    }

    #[tokio::test]
    async fn test_wider_append_absorbs_committed_entries() {
        let (engine, executor) = test_engine();

        engine.append(["198.51.100.5", "198.51.100.200"]).await.unwrap();
        engine.append(["198.51.100.0/24"]).await.unwrap();
        assert_eq!(engine.entry_counts().v4, 1);
        executor.take_scripts();

        engine.replace(["198.51.100.0/24"]).await.unwrap();
        assert!(executor.scripts().is_empty());
        assert!(engine.check("198.51.100.5"));
        assert!(engine.check("198.51.100.200"));

        engine.replace(["198.51.100.5"]).await.unwrap();
        assert_eq!(
            executor.scripts(),
            vec![
                format!("delete element {V4_SET} {{ 198.51.100.0/24 }}"),
                format!("add element {V4_SET} {{ 198.51.100.5 }}"),
            ]
        );
        assert!(engine.check("198.51.100.5"));
        assert!(!engine.check("198.51.100.200"));
    }

    #[tokio::test]
    async fn test_replace_collapses_nested_and_respelled_entries() {
        let (engine, executor) = test_engine();

        engine
            .replace([
                "198.51.100.0/24",
                "198.51.100.0/024",
                "198.51.100.9",
                "2001:db8::/32",
                "2001:db8::/032",
            ])
            .await
            .unwrap();

        assert_eq!(
            executor.scripts(),
            vec![
                format!("add element {V4_SET} {{ 198.51.100.0/24 }}"),
                format!(
                    "add element {V6_SET} {{ 2001:0db8:0000:0000:0000:0000:0000:0000/32 }}"
                ),
            ]
        );
        let counts = engine.entry_counts();
        assert_eq!(counts.v4, 1);
        assert_eq!(counts.v6, 1);
    }

    #[tokio::test]
    async fn test_check_ignores_garbage_and_cross_family() {
        let (engine, _executor) = test_engine();
        engine.append(["192.0.2.1"]).await.unwrap();

        assert!(!engine.check(""));
        assert!(!engine.check("192.0.2"));
        assert!(!engine.check("::ffff:192.0.2.1"));
        assert!(engine.check(" 192.0.2.1 "));
    }

    #[tokio::test]
    async fn test_entry_counts_track_families() {
        let (engine, _executor) = test_engine();
        engine
            .append(["192.0.2.1", "192.0.2.2", "2001:db8:1:2::3", "2001:db8:1:2::4"])
            .await
            .unwrap();

        let counts = engine.entry_counts();
        assert_eq!(counts[AddressFamily::V4], 2);
        assert_eq!(counts[AddressFamily::V6], 1);
    }
}
