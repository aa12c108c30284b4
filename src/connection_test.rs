#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;

    use bytes::Bytes;
    use tokio::sync::watch;
    use tokio::time::{timeout, Duration};

    use crate::config::{AutoupdateConfig, TopicConfig};
    use crate::connection::Connection;
    use crate::errors::Error;
    use crate::key::Key;
    use crate::service::Service;
    use crate::test_utils::{keys, MemoryDatastore};

    fn key(s: &str) -> Key {
        Key::from_str(s).unwrap()
    }

    fn value(s: &str) -> Option<Bytes> {
        Some(Bytes::copy_from_slice(s.as_bytes()))
    }

    fn service(datastore: Arc<MemoryDatastore>) -> (Service, watch::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let service = Service::new(datastore, &AutoupdateConfig::default(), shutdown_rx);
        (service, shutdown_tx)
    }

    async fn connection(service: &Service, request: &str) -> Connection {
        let builder = service.request_builder(1, request).await.unwrap();
        service.connect(1, builder, 0)
    }

    #[tokio::test]
    async fn first_call_delivers_current_values() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[(
            "user/1/name",
            "\"Hello World\"",
        )]));
        let (service, _shutdown) = service(datastore);
        let mut connection = connection(&service, r#"{"user/1": {"name": null}}"#).await;

        let data = connection.next().await.unwrap();

        assert_eq!(data.len(), 1);
        assert_eq!(data.get(&key("user/1/name")), Some(&value("\"Hello World\"")));
    }

    #[tokio::test]
    async fn next_blocks_without_news() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[(
            "user/1/name",
            "\"Hello World\"",
        )]));
        let (service, _shutdown) = service(datastore);
        let mut connection = connection(&service, r#"{"user/1": {"name": null}}"#).await;
        connection.next().await.unwrap();

        let blocked = timeout(Duration::from_millis(50), connection.next()).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn value_change_is_delivered() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[(
            "user/1/name",
            "\"Hello World\"",
        )]));
        let (service, _shutdown) = service(datastore.clone());
        let mut connection = connection(&service, r#"{"user/1": {"name": null}}"#).await;
        connection.next().await.unwrap();

        datastore.set("user/1/name", "\"new value\"");
        service.publish(keys(&["user/1/name"]));

        let data = connection.next().await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data.get(&key("user/1/name")), Some(&value("\"new value\"")));
    }

    #[tokio::test]
    async fn unchanged_publish_is_filtered() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[(
            "user/1/name",
            "\"Hello World\"",
        )]));
        let (service, _shutdown) = service(datastore);
        let mut connection = connection(&service, r#"{"user/1": {"name": null}}"#).await;
        connection.next().await.unwrap();

        // The key is announced dirty but its restricted value is the same.
        service.publish(keys(&["user/1/name"]));

        let blocked = timeout(Duration::from_millis(50), connection.next()).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn only_the_changed_key_is_delivered() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[
            ("user/1/name", "\"a\""),
            ("user/2/name", "\"b\""),
        ]));
        let (service, _shutdown) = service(datastore.clone());
        let mut connection = connection(
            &service,
            r#"{"user/1": {"name": null}, "user/2": {"name": null}}"#,
        )
        .await;
        connection.next().await.unwrap();

        datastore.set("user/1/name", "\"newname\"");
        service.publish(keys(&["user/1/name", "user/2/name"]));

        let data = connection.next().await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data.get(&key("user/1/name")), Some(&value("\"newname\"")));
    }

    #[tokio::test]
    async fn first_call_skips_invisible_keys() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[("user/1/name", "\"exist\"")]));
        let (service, _shutdown) = service(datastore);
        let mut connection = connection(
            &service,
            r#"{"user/1": {"name": null}, "doesnot/1": {"exist": null}}"#,
        )
        .await;

        let data = connection.next().await.unwrap();
        assert!(data.contains_key(&key("user/1/name")));
        assert!(!data.contains_key(&key("doesnot/1/exist")));
    }

    #[tokio::test]
    async fn invisible_key_staying_invisible_is_filtered() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[("user/1/name", "\"exist\"")]));
        let (service, _shutdown) = service(datastore);
        let mut connection = connection(
            &service,
            r#"{"user/1": {"name": null}, "doesnot/1": {"exist": null}}"#,
        )
        .await;
        connection.next().await.unwrap();

        service.publish(keys(&["doesnot/1/exist"]));

        let blocked = timeout(Duration::from_millis(50), connection.next()).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn key_becoming_visible_is_delivered() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[("user/1/name", "\"exist\"")]));
        let (service, _shutdown) = service(datastore.clone());
        let mut connection = connection(
            &service,
            r#"{"user/1": {"name": null}, "doesnot/1": {"exist": null}}"#,
        )
        .await;
        connection.next().await.unwrap();

        datastore.set("doesnot/1/exist", "\"value\"");
        service.publish(keys(&["user/1/name", "doesnot/1/exist"]));

        let data = connection.next().await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data.get(&key("doesnot/1/exist")), Some(&value("\"value\"")));
    }

    #[tokio::test]
    async fn key_becoming_invisible_is_delivered_as_null_once() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[("user/1/name", "\"exist\"")]));
        let (service, _shutdown) = service(datastore.clone());
        let mut connection = connection(&service, r#"{"user/1": {"name": null}}"#).await;
        connection.next().await.unwrap();

        datastore.remove("user/1/name");
        service.publish(keys(&["user/1/name"]));

        let data = connection.next().await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data.get(&key("user/1/name")), Some(&None));

        // The still absent key must not wake the connection again.
        service.publish(keys(&["user/1/name"]));
        let blocked = timeout(Duration::from_millis(50), connection.next()).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn relation_change_rewires_the_key_set() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[
            ("user/1/group_id", "\"group/4\""),
            ("group/4/name", "\"Old group\""),
            ("group/9/name", "\"New group\""),
        ]));
        let (service, _shutdown) = service(datastore.clone());
        let mut connection = connection(
            &service,
            r#"{"user/1": {"group_id": {"type": "relation", "collection": "group", "fields": {"name": null}}}}"#,
        )
        .await;

        let data = connection.next().await.unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.get(&key("group/4/name")), Some(&value("\"Old group\"")));

        datastore.set("user/1/group_id", "\"group/9\"");
        service.publish(keys(&["user/1/group_id"]));

        let data = connection.next().await.unwrap();
        assert_eq!(
            data.get(&key("user/1/group_id")),
            Some(&value("\"group/9\""))
        );
        assert_eq!(data.get(&key("group/9/name")), Some(&value("\"New group\"")));
        // The old target is no longer observed.
        assert_eq!(data.get(&key("group/4/name")), Some(&None));
        assert_eq!(data.len(), 3);
    }

    #[tokio::test]
    async fn failed_delivery_retries_from_the_same_cursor() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[("user/1/name", "\"a\"")]));
        let (service, _shutdown) = service(datastore.clone());
        let mut connection = connection(&service, r#"{"user/1": {"name": null}}"#).await;
        connection.next().await.unwrap();

        datastore.set("user/1/name", "\"b\"");
        service.publish(keys(&["user/1/name"]));
        datastore.fail_once("datastore down");

        let err = connection.next().await.unwrap_err();
        assert!(matches!(err, Error::LoadData { .. }));

        // The cursor was not advanced, so the same batch is retried.
        let data = connection.next().await.unwrap();
        assert_eq!(data.get(&key("user/1/name")), Some(&value("\"b\"")));
    }

    #[tokio::test]
    async fn lost_cursor_triggers_a_full_resend() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[("user/1/name", "\"a\"")]));
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let _shutdown = shutdown_tx;
        let config = AutoupdateConfig {
            topic: TopicConfig { retention: 1 },
            ..Default::default()
        };
        let service = Service::new(datastore.clone(), &config, shutdown_rx);

        let builder = service
            .request_builder(1, r#"{"user/1": {"name": null}}"#)
            .await
            .unwrap();
        let mut connection = service.connect(1, builder, 0);
        connection.next().await.unwrap();

        // The interesting batch is pruned before the subscriber wakes.
        datastore.set("user/1/name", "\"b\"");
        service.publish(keys(&["user/1/name"]));
        service.publish(keys(&["unrelated/1/field"]));
        service.publish(keys(&["unrelated/1/field"]));

        let data = connection.next().await.unwrap();
        assert_eq!(data.get(&key("user/1/name")), Some(&value("\"b\"")));
    }

    #[tokio::test]
    async fn empty_first_delivery_is_allowed() {
        let datastore = Arc::new(MemoryDatastore::new());
        let (service, _shutdown) = service(datastore);
        let mut connection = connection(&service, r#"{"doesnot/1": {"exist": null}}"#).await;

        let data = connection.next().await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn shutdown_unblocks_next() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[("user/1/name", "\"a\"")]));
        let (service, shutdown) = service(datastore);
        let mut connection = connection(&service, r#"{"user/1": {"name": null}}"#).await;
        connection.next().await.unwrap();

        let waiter = tokio::spawn(async move { connection.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.send(()).unwrap();

        let result = timeout(Duration::from_millis(200), waiter)
            .await
            .expect("next did not wake")
            .unwrap();
        assert!(matches!(result, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn connect_after_shutdown_errors_on_first_next() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[("user/1/name", "\"a\"")]));
        let (service, shutdown) = service(datastore);
        let builder = service
            .request_builder(1, r#"{"user/1": {"name": null}}"#)
            .await
            .unwrap();

        shutdown.send(()).unwrap();

        let mut connection = service.connect(1, builder, 0);
        let result = connection.next().await;
        assert!(matches!(result, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn resumed_cursor_does_not_replay_delivered_values() {
        let datastore = Arc::new(MemoryDatastore::with_data(&[("user/1/name", "\"a\"")]));
        let (service, _shutdown) = service(datastore.clone());

        datastore.set("user/1/name", "\"b\"");
        let resumed_from = service.publish(keys(&["user/1/name"]));

        let builder = service
            .request_builder(1, r#"{"user/1": {"name": null}}"#)
            .await
            .unwrap();
        let mut connection = service.connect(1, builder, resumed_from);

        let data = connection.next().await.unwrap();
        assert_eq!(data.get(&key("user/1/name")), Some(&value("\"b\"")));

        // Nothing new after the resumed cursor; the connection blocks.
        let blocked = timeout(Duration::from_millis(50), connection.next()).await;
        assert!(blocked.is_err());
    }
}
