use danmaku_overlay::bus::{DanmakuEvent, EventBus, EventKind};
use danmaku_overlay::ingest::{IngestionService, Transport};
use std::cell::RefCell;
use std::io::Write;
use std::net::TcpStream;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tungstenite::Message;

fn collect_spawns(bus: &mut EventBus) -> Rc<RefCell<Vec<String>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    bus.subscribe(EventKind::Spawn, move |event, _| {
        if let DanmakuEvent::Spawn(record) = event {
            sink.borrow_mut().push(record.text.clone());
        }
    });
    seen
}

fn pump_until(bus: &mut EventBus, seen: &Rc<RefCell<Vec<String>>>, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.borrow().len() < count && Instant::now() < deadline {
        bus.dispatch_pending();
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn line_transport_skips_malformed_messages() {
    let mut bus = EventBus::new();
    let seen = collect_spawns(&mut bus);
    let mut handle = IngestionService::new("127.0.0.1:0", Transport::Lines, bus.publisher())
        .start()
        .unwrap();

    let mut stream = TcpStream::connect(handle.local_addr()).unwrap();
    stream
        .write_all(b"{\"text\":\"first\"}\nnot json\n\n{\"text\":\"x\",\"size\":\"big\"}\n{\"text\":\"second\",\"speed\":120}\n")
        .unwrap();
    drop(stream);

    pump_until(&mut bus, &seen, 2);
    assert_eq!(*seen.borrow(), vec!["first".to_string(), "second".to_string()]);
    handle.stop();
}

#[test]
fn line_transport_survives_invalid_utf8() {
    let mut bus = EventBus::new();
    let seen = collect_spawns(&mut bus);
    let mut handle = IngestionService::new("127.0.0.1:0", Transport::Lines, bus.publisher())
        .start()
        .unwrap();

    let mut stream = TcpStream::connect(handle.local_addr()).unwrap();
    stream
        .write_all(b"{\"text\":\"a\"}\n\xff\xfe\n{\"text\":\"b\"}\n")
        .unwrap();
    drop(stream);

    pump_until(&mut bus, &seen, 2);
    assert_eq!(*seen.borrow(), vec!["a".to_string(), "b".to_string()]);
    handle.stop();
}

#[test]
fn websocket_transport_accepts_text_and_binary_frames() {
    let mut bus = EventBus::new();
    let seen = collect_spawns(&mut bus);
    let mut handle = IngestionService::new("127.0.0.1:0", Transport::WebSocket, bus.publisher())
        .start()
        .unwrap();

    let (mut client, _) = tungstenite::connect(format!("ws://{}", handle.local_addr())).unwrap();
    client.send(Message::text(r#"{"text":"over ws"}"#)).unwrap();
    client.send(Message::text("{broken")).unwrap();
    client
        .send(Message::binary(br#"{"text":"binary frame"}"#.to_vec()))
        .unwrap();
    client.close(None).unwrap();

    pump_until(&mut bus, &seen, 2);
    assert_eq!(
        *seen.borrow(),
        vec!["over ws".to_string(), "binary frame".to_string()]
    );
    handle.stop();
}

#[test]
fn independent_connections_are_served_concurrently() {
    let mut bus = EventBus::new();
    let seen = collect_spawns(&mut bus);
    let mut handle = IngestionService::new("127.0.0.1:0", Transport::Lines, bus.publisher())
        .start()
        .unwrap();

    let mut idle = TcpStream::connect(handle.local_addr()).unwrap();
    let mut active = TcpStream::connect(handle.local_addr()).unwrap();
    active.write_all(b"{\"text\":\"while other is idle\"}\n").unwrap();

    pump_until(&mut bus, &seen, 1);
    assert_eq!(*seen.borrow(), vec!["while other is idle".to_string()]);

    idle.write_all(b"{\"text\":\"late\"}\n").unwrap();
    drop(idle);
    drop(active);
    pump_until(&mut bus, &seen, 2);
    assert_eq!(seen.borrow().len(), 2);
    handle.stop();
}

#[test]
fn bind_failure_is_reported() {
    let bus = EventBus::new();
    let first = IngestionService::new("127.0.0.1:0", Transport::Lines, bus.publisher())
        .start()
        .unwrap();
    let taken = first.local_addr().to_string();
    let err = IngestionService::new(taken, Transport::Lines, bus.publisher())
        .start()
        .err()
        .expect("second bind should fail");
    assert!(err.to_string().contains("failed to bind"));
}
