//! Resilience tests
//!
//! Behaviour when the bus transport goes away: failed cancellation and
//! unregistration, late responses, and providers that disappear.

use luna_service_client::{ClientConfig, ClientError, MainContext, ServiceBusClient};
use lunabus::bus::{
    LocalBus, Request, Responder, ERROR_CODE_DUPLICATE_NAME, ERROR_CODE_INVALID_NAME,
    ERROR_CODE_OFFLINE,
};
use luna_service_client::Bus;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn watch_service(bus: &LocalBus, name: &str) -> Arc<Mutex<Vec<Responder>>> {
    let watchers = Arc::new(Mutex::new(Vec::new()));
    let sink = watchers.clone();
    bus.provide(name).method("/watch", move |request: Request| {
        sink.lock().push(request.responder);
    });
    watchers
}

fn counter() -> (Rc<RefCell<Vec<String>>>, impl FnMut(&str) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |payload: &str| sink.borrow_mut().push(payload.to_string()))
}

#[tokio::test]
async fn test_failed_unsubscribe_still_silences_callback() {
    let bus = LocalBus::new();
    let watchers = watch_service(&bus, "com.example.feed");
    let ctx = MainContext::new();
    let mut client = ServiceBusClient::with_context(&bus, ClientConfig::new("com.example.test"), &ctx);
    let (seen, callback) = counter();

    let token = client.subscribe("luna://com.example.feed/watch", "{}", callback).unwrap();
    let responder = watchers.lock().pop().unwrap();

    bus.set_online(false);
    let err = client.unsubscribe(token).unwrap_err();
    assert!(matches!(err, ClientError::Cancellation { .. }));
    assert_eq!(err.bus_error().unwrap().code, ERROR_CODE_OFFLINE);
    assert!(!client.is_subscribed(token));

    // The bus never saw the cancel, so the provider keeps sending.
    assert!(responder.is_active());
    assert!(responder.respond("late"));

    ctx.run_for(Duration::from_millis(30)).await;
    assert!(seen.borrow().is_empty());
}

#[tokio::test]
async fn test_unregister_while_offline_releases_client() {
    let bus = LocalBus::new();
    let watchers = watch_service(&bus, "com.example.feed");
    let ctx = MainContext::new();
    let mut client = ServiceBusClient::with_context(&bus, ClientConfig::new("com.example.test"), &ctx);
    let (seen, callback) = counter();

    client.subscribe("luna://com.example.feed/watch", "{}", callback).unwrap();
    let responder = watchers.lock().pop().unwrap();
    assert_eq!(ctx.source_count(), 1);

    bus.set_online(false);
    let err = client.unregister_service().unwrap_err();
    assert!(matches!(err, ClientError::Unregister(_)));

    assert!(!client.is_registered());
    assert!(client.context().is_none());
    assert_eq!(client.subscription_count(), 0);
    assert_eq!(ctx.source_count(), 0);
    assert_eq!(bus.connection_count(), 0);
    assert!(!responder.is_active());

    bus.set_online(true);
    ctx.run_for(Duration::from_millis(20)).await;
    assert!(seen.borrow().is_empty());

    assert_eq!(
        client.call_async("luna://com.example.feed/watch", "{}"),
        Err(ClientError::NotRegistered)
    );
}

#[tokio::test]
async fn test_response_queued_before_unsubscribe_is_discarded() {
    let bus = LocalBus::new();
    let watchers = watch_service(&bus, "com.example.feed");
    let ctx = MainContext::new();
    let mut client = ServiceBusClient::with_context(&bus, ClientConfig::new("com.example.test"), &ctx);
    let (seen, callback) = counter();

    let token = client.subscribe("luna://com.example.feed/watch", "{}", callback).unwrap();
    let responder = watchers.lock().pop().unwrap();

    // Queued on the loop but not yet dispatched.
    assert!(responder.respond("queued"));
    client.unsubscribe(token).unwrap();

    ctx.run_for(Duration::from_millis(20)).await;
    assert!(seen.borrow().is_empty());
}

#[tokio::test]
async fn test_one_shot_responder_accepts_single_response() {
    let bus = LocalBus::new();
    let kept = Arc::new(Mutex::new(None::<Responder>));
    let sink = kept.clone();
    bus.provide("com.example.echo").method("/echo", move |request: Request| {
        assert!(request.responder.respond(request.payload.clone()));
        assert!(!request.responder.respond("second"));
        *sink.lock() = Some(request.responder);
    });

    let ctx = MainContext::new();
    let mut client = ServiceBusClient::with_context(&bus, ClientConfig::new("com.example.test"), &ctx);
    let (seen, callback) = counter();

    client
        .call_async_with("luna://com.example.echo/echo", r#"{"ping":1}"#, callback)
        .unwrap();
    assert!(ctx.run_until(WAIT, || !seen.borrow().is_empty()).await);

    let responder = kept.lock().take().unwrap();
    assert!(!responder.is_active());
    assert!(!responder.respond("third"));

    ctx.run_for(Duration::from_millis(20)).await;
    assert_eq!(*seen.borrow(), vec![r#"{"ping":1}"#.to_string()]);
}

#[tokio::test]
async fn test_withdrawn_service_answers_with_error() {
    let bus = LocalBus::new();
    watch_service(&bus, "com.example.feed");
    assert!(bus.withdraw("com.example.feed"));
    assert!(!bus.withdraw("com.example.feed"));

    let ctx = MainContext::new();
    let mut client = ServiceBusClient::with_context(&bus, ClientConfig::new("com.example.test"), &ctx);
    let (seen, callback) = counter();

    client
        .call_async_with("luna://com.example.feed/watch", "{}", callback)
        .unwrap();
    assert!(ctx.run_until(WAIT, || !seen.borrow().is_empty()).await);
    assert!(seen.borrow()[0].contains("Service does not exist: com.example.feed."));
}

#[tokio::test]
async fn test_registration_errors() {
    let bus = LocalBus::new();

    let first = bus.register("com.example.one", "app").unwrap();
    let err = bus.register("com.example.one", "app").err().unwrap();
    assert_eq!(err.code, ERROR_CODE_DUPLICATE_NAME);
    assert_eq!(err.function, "LSRegister");

    let err = bus.register("bad name!", "app").err().unwrap();
    assert_eq!(err.code, ERROR_CODE_INVALID_NAME);

    drop(first);
    assert!(!bus.is_registered("com.example.one"));
    assert!(bus.register("com.example.one", "app").is_ok());
}

#[tokio::test]
async fn test_register_returns_error_for_duplicate() {
    let bus = LocalBus::new();
    let ctx = MainContext::new();
    let config = ClientConfig::new("com.example.dup").exact_name();

    let _first = ServiceBusClient::register(&bus, config.clone(), &ctx).unwrap();
    let err = ServiceBusClient::register(&bus, config, &ctx).err().unwrap();

    assert!(matches!(err, ClientError::Registration(_)));
    assert_eq!(err.bus_error().unwrap().code, ERROR_CODE_DUPLICATE_NAME);
    assert_eq!(bus.connection_count(), 1);
}

#[tokio::test]
async fn test_cancel_of_finished_call_is_rejected() {
    let bus = LocalBus::new();
    bus.provide("com.example.echo").method("/echo", |request: Request| {
        request.responder.respond("{}");
    });

    let ctx = MainContext::new();
    let mut connection = bus.register("com.example.raw", "app").unwrap();
    connection.attach(&ctx).unwrap();

    let delivered = Rc::new(RefCell::new(0));
    let sink = delivered.clone();
    let token = connection
        .call_one_reply(
            "luna://com.example.echo/echo",
            "{}",
            Box::new(move |_: &str| *sink.borrow_mut() += 1),
        )
        .ok()
        .unwrap();

    assert!(ctx.run_until(WAIT, || *delivered.borrow() == 1).await);
    let err = connection.cancel(token).unwrap_err();
    assert_eq!(err.code, lunabus::bus::ERROR_CODE_INVALID_TOKEN);

    connection.unregister().unwrap();
    assert_eq!(bus.connection_count(), 0);
}
