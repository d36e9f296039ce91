#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use shoprpc::*;

#[service(package = "test")]
trait Numbers {
    async fn count(&self, ctx: &Context, to: u32, sink: ResponseSink<u32>) -> Result<()>;

    async fn sum(&self, ctx: &Context, nums: RequestStream<u32>) -> Result<u64>;

    #[rpc(name = "Shout")]
    async fn echo(
        &self,
        ctx: &Context,
        words: RequestStream<String>,
        sink: ResponseSink<String>,
    ) -> Result<()>;

    async fn fail_after(&self, ctx: &Context, n: u32, sink: ResponseSink<u32>) -> Result<()>;

    async fn linger(&self, ctx: &Context, n: u32, sink: ResponseSink<u32>) -> Result<()>;
}

struct NumbersImpl;

impl Numbers for NumbersImpl {
    async fn count(&self, _: &Context, to: u32, sink: ResponseSink<u32>) -> Result<()> {
        for i in 0..to {
            sink.send(&i).await?;
        }
        Ok(())
    }

    async fn sum(&self, _: &Context, mut nums: RequestStream<u32>) -> Result<u64> {
        let mut total = 0;
        while let Some(n) = nums.message().await? {
            total += u64::from(n);
        }
        Ok(total)
    }

    async fn echo(
        &self,
        _: &Context,
        mut words: RequestStream<String>,
        sink: ResponseSink<String>,
    ) -> Result<()> {
        while let Some(word) = words.message().await? {
            sink.send(&word.to_uppercase()).await?;
        }
        Ok(())
    }

    async fn fail_after(&self, _: &Context, n: u32, sink: ResponseSink<u32>) -> Result<()> {
        for i in 0..n {
            sink.send(&i).await?;
        }
        Err(Error::new(ErrorKind::FailedPrecondition, "out of numbers"))
    }

    async fn linger(&self, _: &Context, n: u32, sink: ResponseSink<u32>) -> Result<()> {
        sink.send(&n).await?;
        // a sink clone outliving the handler must not keep the call open.
        let kept = sink.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(kept);
        });
        Ok(())
    }
}

struct NoNumbers;

impl Numbers for NoNumbers {}

fn create_server(service: impl Numbers) -> Server {
    let mut router = Router::default();
    router.add_service(Arc::new(service).bind_service()).unwrap();
    Server::create(router, &ServerConfig::default()).unwrap()
}

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

#[test]
fn test_blocking_server_streaming() {
    let runtime = create_runtime();
    let server = create_server(NumbersImpl);
    let stub = numbers::new_blocking_stub(server.channel(runtime.handle().clone()));

    // more messages than the call buffers, so the handler waits on the reader.
    let values = stub
        .count(&100)
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert_eq!(values, (0..100).collect::<Vec<_>>());

    let items = stub.fail_after(&3).unwrap().collect::<Vec<_>>();
    assert_eq!(items.len(), 4);
    assert_eq!(
        items[..3].iter().map(|r| *r.as_ref().unwrap()).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(
        items[3].as_ref().unwrap_err().kind,
        ErrorKind::FailedPrecondition
    );

    let empty = stub.count(&0).unwrap().collect::<Result<Vec<_>>>().unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_server_streaming_observer() {
    let server = create_server(NumbersImpl);
    let stub = numbers::new_stub(server.channel(tokio::runtime::Handle::current()));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    stub.count(&3, tx);
    let mut events = vec![];
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            StreamEvent::Next(0),
            StreamEvent::Next(1),
            StreamEvent::Next(2),
            StreamEvent::Completed
        ]
    );
}

#[tokio::test]
async fn test_server_streaming_stream() {
    let server = create_server(NumbersImpl);
    let stub = numbers::new_stub(server.channel(tokio::runtime::Handle::current()));

    let mut stream = stub
        .invoker()
        .server_streaming::<u32, u32>(numbers::count_method(), &5)
        .unwrap();
    let mut values = vec![];
    while let Some(value) = stream.message().await.unwrap() {
        values.push(value);
    }
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
    assert_eq!(stream.call_handle().status(), CallStatus::Completed);
}

#[tokio::test]
async fn test_client_streaming() {
    let server = create_server(NumbersImpl);
    let channel = server.channel(tokio::runtime::Handle::current());

    let stub = numbers::new_future_stub(channel.clone());
    let (sink, rsp) = stub.sum();
    for i in 1..=10 {
        sink.send(&i).await.unwrap();
    }
    sink.close();
    assert_eq!(rsp.await.unwrap(), 55);

    let stub = numbers::new_stub(channel);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let sink = stub.sum(tx);
    sink.send(&40).await.unwrap();
    sink.send(&2).await.unwrap();
    drop(sink);
    assert_eq!(rx.recv().await, Some(StreamEvent::Next(42)));
    assert_eq!(rx.recv().await, Some(StreamEvent::Completed));
}

#[tokio::test]
async fn test_bidi_streaming() {
    let server = create_server(NumbersImpl);
    let stub = numbers::new_stub(server.channel(tokio::runtime::Handle::current()));
    assert_eq!(numbers::echo_method().full_name(), "test.Numbers/Shout");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let sink = stub.echo(tx);
    for word in ["red", "green", "blue"] {
        sink.send(&word.to_string()).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Next(word.to_uppercase()))
        );
    }
    sink.close();
    assert_eq!(rx.recv().await, Some(StreamEvent::Completed));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn test_streaming_unimplemented() {
    let server = create_server(NoNumbers);
    let channel = server.channel(tokio::runtime::Handle::current());
    let stub = numbers::new_stub(channel.clone());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<StreamEvent<u32>>();
    stub.count(&3, tx);
    let Some(StreamEvent::Error(error)) = rx.recv().await else {
        panic!("expected an error event");
    };
    assert_eq!(error.kind, ErrorKind::Unimplemented);
    assert_eq!(rx.recv().await, None);

    let (_sink, rsp) = numbers::new_future_stub(channel).sum();
    assert_eq!(rsp.await.unwrap_err().kind, ErrorKind::Unimplemented);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<StreamEvent<String>>();
    let sink = stub.echo(tx);
    let Some(StreamEvent::Error(error)) = rx.recv().await else {
        panic!("expected an error event");
    };
    assert_eq!(error.kind, ErrorKind::Unimplemented);
    assert!(sink.send(&"late".to_string()).await.is_err());
}

#[tokio::test]
async fn test_dropped_stream_cancels_call() {
    let server = create_server(NumbersImpl);
    let stub = numbers::new_stub(server.channel(tokio::runtime::Handle::current()));

    let mut stream = stub
        .invoker()
        .server_streaming::<u32, u32>(numbers::count_method(), &u32::MAX)
        .unwrap();
    assert_eq!(stream.message().await.unwrap(), Some(0));
    let handle = stream.call_handle().clone();
    drop(stream);
    assert_eq!(handle.status(), CallStatus::Cancelled);

    tokio::time::timeout(Duration::from_secs(5), async {
        while server.in_flight_calls() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_stream_ends_when_handler_returns() {
    let server = create_server(NumbersImpl);
    let stub = numbers::new_stub(server.channel(tokio::runtime::Handle::current()));

    let mut stream = stub
        .invoker()
        .server_streaming::<u32, u32>(numbers::linger_method(), &7)
        .unwrap();
    assert_eq!(stream.message().await.unwrap(), Some(7));
    let end = tokio::time::timeout(Duration::from_secs(1), stream.message())
        .await
        .unwrap();
    assert_eq!(end.unwrap(), None);
    assert_eq!(stream.call_handle().status(), CallStatus::Completed);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    stub.linger(&8, tx);
    let mut events = vec![];
    while events.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        events.push(event);
    }
    assert_eq!(events, vec![StreamEvent::Next(8), StreamEvent::Completed]);
}
