mod testsupport;

use klient::prelude::*;
use testsupport::{FakeCluster, RecordingPrompter};

#[tokio::test]
async fn it_creates_writes_reads_and_deletes_a_topic() {
    let cluster = FakeCluster::new();
    let mut session = Session::open(cluster.clone(), cluster.bootstrap())
        .await
        .unwrap();

    session.create_topic("t", 1, 1).await.unwrap();

    let options = ProduceOptions {
        topic: "t".to_owned(),
        keyed: true,
        mode: Mode::Unattended,
        delimiter: b'\n',
    };
    session
        .produce(
            &b"v1\nk1\nv2\nk2\n"[..],
            &options,
            &mut RecordingPrompter::default(),
        )
        .await
        .unwrap();

    let mut read = vec![];
    session
        .read("t", ReadStrategy::Exclusive, |message| {
            read.push((message.key, message.value));
            read.len() < 2
        })
        .await
        .unwrap();
    assert_eq!(read, vec![("k1".into(), "v1".into()), ("k2".into(), "v2".into())]);

    session.delete_topic("t").await.unwrap();
    assert!(!session.topics().await.unwrap().contains_key("t"));
    assert!(session.describe().await.unwrap().is_empty());

    session.close().await;
}
