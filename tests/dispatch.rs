//! Registry and dispatcher behaviour with an in-memory connection

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use framewire::core::message::Message;
use framewire::error::{ProtocolError, Result};
use framewire::protocol::echo::{self, EchoMessage, ECHO_MESSAGE_NUMBER};
use framewire::protocol::{
    ConnectionRole, Dispatcher, Handler, MessageRegistry, RegistryBuilder, RequestContext,
    WriteCloser,
};

struct MockConn {
    net_id: i64,
    role: ConnectionRole,
    written: Mutex<Vec<Arc<dyn Message>>>,
    closed: CancellationToken,
}

impl MockConn {
    fn new(net_id: i64, role: ConnectionRole) -> Arc<Self> {
        Arc::new(Self {
            net_id,
            role,
            written: Mutex::new(Vec::new()),
            closed: CancellationToken::new(),
        })
    }

    fn written(&self) -> Vec<Arc<dyn Message>> {
        self.written.lock().unwrap().clone()
    }
}

impl WriteCloser for MockConn {
    fn net_id(&self) -> i64 {
        self.net_id
    }

    fn role(&self) -> ConnectionRole {
        self.role
    }

    fn write(&self, msg: Arc<dyn Message>) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.written.lock().unwrap().push(msg);
        Ok(())
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

fn echo_registry() -> Arc<MessageRegistry> {
    let mut builder = MessageRegistry::builder();
    echo::register(&mut builder).unwrap();
    Arc::new(builder.build())
}

fn hello() -> Box<dyn Message> {
    Box::new(EchoMessage::new(2, *b"abcdefghijkl", 0, 12289, "hello, world").unwrap())
}

#[test]
fn test_duplicate_registration_keeps_first() {
    let hits = Arc::new(AtomicUsize::new(0));

    let mut builder = RegistryBuilder::new();
    let first = hits.clone();
    builder
        .register(
            ECHO_MESSAGE_NUMBER,
            echo::deserialize_message,
            move |_ctx, _conn| {
                first.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            echo::message_type_handler,
            echo::message_head_handler,
        )
        .unwrap();

    let second = hits.clone();
    let err = builder
        .register(
            ECHO_MESSAGE_NUMBER,
            echo::deserialize_message,
            move |_ctx, _conn| {
                second.fetch_add(100, Ordering::SeqCst);
                Ok(())
            },
            echo::message_type_handler,
            echo::message_head_handler,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::DuplicateRegistration(ECHO_MESSAGE_NUMBER)
    ));

    let dispatcher = Dispatcher::new(Arc::new(builder.build()));
    let conn: Arc<dyn WriteCloser> = MockConn::new(1, ConnectionRole::Server);
    dispatcher
        .dispatch(hello(), &conn, &CancellationToken::new())
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_server_echoes_message_back() {
    let dispatcher = Dispatcher::new(echo_registry());
    let mock = MockConn::new(7, ConnectionRole::Server);
    let conn: Arc<dyn WriteCloser> = mock.clone();

    let msg = hello();
    let expected = msg.serialize().unwrap();
    dispatcher
        .dispatch(msg, &conn, &CancellationToken::new())
        .unwrap();

    let written = mock.written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].serialize().unwrap(), expected);
}

#[test]
fn test_client_does_not_reply() {
    let dispatcher = Dispatcher::new(echo_registry());
    let mock = MockConn::new(0, ConnectionRole::Client);
    let conn: Arc<dyn WriteCloser> = mock.clone();

    dispatcher
        .dispatch(hello(), &conn, &CancellationToken::new())
        .unwrap();
    assert!(mock.written().is_empty());
}

#[test]
fn test_dispatch_unregistered_type() {
    let dispatcher = Dispatcher::new(Arc::new(MessageRegistry::builder().build()));
    let conn: Arc<dyn WriteCloser> = MockConn::new(1, ConnectionRole::Server);

    let err = dispatcher
        .dispatch(hello(), &conn, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, ProtocolError::UndefinedType(ECHO_MESSAGE_NUMBER)));
}

#[test]
fn test_handler_error_leaves_connection_open() {
    let mut builder = RegistryBuilder::new();
    builder
        .register(
            ECHO_MESSAGE_NUMBER,
            echo::deserialize_message,
            |_ctx, _conn| Err(ProtocolError::Custom("boom".into())),
            echo::message_type_handler,
            echo::message_head_handler,
        )
        .unwrap();
    let dispatcher = Dispatcher::new(Arc::new(builder.build()));
    let conn: Arc<dyn WriteCloser> = MockConn::new(3, ConnectionRole::Server);

    let err = dispatcher
        .dispatch(hello(), &conn, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Custom(ref m) if m == "boom"));
    assert!(!conn.is_closed());
}

struct Inspector {
    seen: Mutex<Option<(i64, Option<ConnectionRole>, bool)>>,
}

impl Handler for Inspector {
    fn handle(&self, ctx: &RequestContext, _conn: &Arc<dyn WriteCloser>) -> Result<()> {
        let net_id = ctx.net_id()?;
        let same_message = ctx.message()?.message_number() == ECHO_MESSAGE_NUMBER;
        ctx.connection()?;
        *self.seen.lock().unwrap() = Some((net_id, ctx.role(), same_message));

        // Cancelling the request leaves the connection token alone
        ctx.cancel();
        assert!(ctx.is_done());
        Ok(())
    }
}

#[test]
fn test_context_carries_dispatch_values() {
    let inspector = Arc::new(Inspector {
        seen: Mutex::new(None),
    });

    struct Shared(Arc<Inspector>);
    impl Handler for Shared {
        fn handle(&self, ctx: &RequestContext, conn: &Arc<dyn WriteCloser>) -> Result<()> {
            self.0.handle(ctx, conn)
        }
    }

    let mut builder = RegistryBuilder::new();
    builder
        .register_handler(
            ECHO_MESSAGE_NUMBER,
            echo::deserialize_message,
            Shared(inspector.clone()),
            echo::message_type_handler,
            echo::message_head_handler,
        )
        .unwrap();
    let dispatcher = Dispatcher::new(Arc::new(builder.build()));
    let conn: Arc<dyn WriteCloser> = MockConn::new(42, ConnectionRole::Client);
    let parent = CancellationToken::new();

    dispatcher.dispatch(hello(), &conn, &parent).unwrap();

    assert_eq!(
        *inspector.seen.lock().unwrap(),
        Some((42, Some(ConnectionRole::Client), true))
    );
    assert!(!parent.is_cancelled());
}

#[test]
fn test_echo_handler_without_role() {
    let ctx = RequestContext::background().with_message(Arc::from(hello()));
    let conn: Arc<dyn WriteCloser> = MockConn::new(1, ConnectionRole::Server);

    let err = echo::process_message(&ctx, &conn).unwrap_err();
    assert!(matches!(err, ProtocolError::MissingContext(_)));
}

#[test]
fn test_echo_handler_follows_context_role() {
    let mock = MockConn::new(5, ConnectionRole::Client);
    let conn: Arc<dyn WriteCloser> = mock.clone();

    // No connection attached, so the role comes only from the context
    let ctx = RequestContext::background()
        .with_message(Arc::from(hello()))
        .with_role(ConnectionRole::Server);
    assert_eq!(ctx.role(), Some(ConnectionRole::Server));

    echo::process_message(&ctx, &conn).unwrap();
    assert_eq!(mock.written().len(), 1);
}
