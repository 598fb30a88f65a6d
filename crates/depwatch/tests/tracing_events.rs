//! Structured tracing events emitted by watches, scopes and deep watches.

mod common;

use std::sync::{Arc, Mutex};

use common::{TestObject, counter};
use depwatch::{Expr, Scope, observe, watch_deep_any};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

#[derive(Default)]
struct TraceState {
    messages: Vec<String>,
}

impl TraceState {
    fn saw(&self, message: &str) -> bool {
        self.messages.iter().any(|seen| seen == message)
    }
}

struct TraceCapture {
    state: Arc<Mutex<TraceState>>,
}

impl<S> Layer<S> for TraceCapture
where
    S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        struct Msg {
            message: Option<String>,
        }
        impl tracing::field::Visit for Msg {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = Some(value.to_string());
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.message = Some(format!("{value:?}").trim_matches('"').to_string());
                }
            }
        }
        let mut msg = Msg { message: None };
        event.record(&mut msg);
        if let Some(message) = msg.message {
            self.state.lock().expect("trace lock").messages.push(message);
        }
    }
}

fn capture() -> (Arc<Mutex<TraceState>>, tracing::subscriber::DefaultGuard) {
    let state = Arc::new(Mutex::new(TraceState::default()));
    let subscriber = tracing_subscriber::registry().with(TraceCapture {
        state: Arc::clone(&state),
    });
    (state, tracing::subscriber::set_default(subscriber))
}

#[test]
fn watch_lifecycle_is_traced() {
    let (state, _guard) = capture();
    let object = TestObject::new();
    let (count, bump) = counter();
    let scope = Scope::new(true);
    let _token = scope
        .run(|| observe(&Expr::object(&object).member("Number"), move |_, _| bump()))
        .unwrap()
        .unwrap();

    object.set_number(1);
    scope.dispose();
    assert_eq!(count.get(), 1);

    let snapshot = state.lock().expect("trace lock");
    assert!(snapshot.saw("depwatch.node.changed"), "expected node event");
    assert!(snapshot.saw("depwatch.observer.changed"), "expected changed event");
    assert!(snapshot.saw("depwatch.scope.disposed"), "expected scope event");
}

#[test]
fn deep_watch_creation_is_traced() {
    let (state, _guard) = capture();
    let object = TestObject::with_child();
    let _token = watch_deep_any(object.clone(), || {}).unwrap();

    let snapshot = state.lock().expect("trace lock");
    assert!(snapshot.saw("depwatch.deep.watch"), "expected deep watch event");
    assert!(snapshot.saw("depwatch.deep.subscribed"), "expected node events");
}
