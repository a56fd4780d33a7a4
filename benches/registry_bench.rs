use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use framewire::core::message::Message;
use framewire::error::{ProtocolError, Result};
use framewire::protocol::{Dispatcher, MessageRegistry, RegistryBuilder, WriteCloser};
use framewire::ConnectionRole;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Tick(u16);

impl Message for Tick {
    fn message_number(&self) -> u16 {
        self.0
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(self.0.to_be_bytes().to_vec())
    }
}

struct NullConn;

impl WriteCloser for NullConn {
    fn net_id(&self) -> i64 {
        1
    }

    fn role(&self) -> ConnectionRole {
        ConnectionRole::Server
    }

    fn write(&self, _msg: Arc<dyn Message>) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}

    fn is_closed(&self) -> bool {
        false
    }
}

#[allow(clippy::unwrap_used)]
fn registry_with(types: u16) -> Arc<MessageRegistry> {
    let mut builder = RegistryBuilder::new();
    for t in 0..types {
        builder
            .register(
                t,
                move |_: &[u8]| -> Result<Box<dyn Message>> { Ok(Box::new(Tick(t))) },
                |_ctx, _conn| Ok(()),
                |_| Ok(0),
                |_| Ok(0),
            )
            .unwrap();
    }
    Arc::new(builder.build())
}

#[allow(clippy::unwrap_used)]
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    for &types in &[1u16, 64, 1024] {
        let registry = registry_with(types);
        group.bench_function(format!("lookup_{types}_types"), |b| {
            let probe = types / 2;
            b.iter(|| {
                let found = registry.get_type_handler_func(black_box(probe)).is_some()
                    && registry.get_head_handler_func(probe).is_some()
                    && registry.get_unmarshal_func(probe).is_some();
                assert!(found);
            })
        });

        let dispatcher = Dispatcher::new(registry.clone());
        let conn: Arc<dyn WriteCloser> = Arc::new(NullConn);
        let parent = CancellationToken::new();
        group.bench_function(format!("dispatch_{types}_types"), |b| {
            b.iter(|| {
                dispatcher
                    .dispatch(Box::new(Tick(types - 1)), &conn, &parent)
                    .unwrap();
            })
        });
    }

    group.bench_function("miss", |b| {
        let registry = registry_with(16);
        b.iter(|| {
            let miss = registry
                .get_handler_func(black_box(0xFFFF))
                .ok_or(ProtocolError::UndefinedType(0xFFFF));
            assert!(miss.is_err());
        })
    });

    group.finish();
}

criterion_group!(benches, bench_registry);
criterion_main!(benches);
