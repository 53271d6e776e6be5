use cgmath::Point2;
use lynx_ui::{Host, HostMessage, ObserverCommand};
use lynx_ui_core::events::{CustomEvent, MultiTouchEvent, TouchEvent};
use lynx_ui_core::layout::LayoutBox;
use lynx_ui_core::operation::LayoutPatch;
use lynx_ui_core::{
    Backend, EventEmitter, MotionAction, MotionEvent, NodeInit, NodeKind, OperationBatchBuilder,
    PageConfig, Props, Rect, Sign,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Default)]
struct TestBackend {
    views: Vec<Sign>,
}

impl Backend for TestBackend {
    type Error = String;

    fn create_view(&mut self, sign: Sign, _tag: &str, _kind: NodeKind) -> Result<(), String> {
        self.views.push(sign);
        Ok(())
    }

    fn insert_view(&mut self, _parent: Sign, _child: Sign, _index: usize) -> Result<(), String> {
        Ok(())
    }

    fn remove_view(&mut self, _parent: Sign, _child: Sign) -> Result<(), String> {
        Ok(())
    }

    fn update_layout(&mut self, _sign: Sign, _layout: &LayoutBox, _origin: Point2<f32>) -> Result<(), String> {
        Ok(())
    }

    fn destroy_view(&mut self, sign: Sign) {
        self.views.retain(|s| *s != sign);
    }

    fn window_rect(&self) -> Rect {
        Rect::from_ltrb(0., 0., 400., 800.)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Touch(String, Sign),
    Custom(String, Sign),
    Global(String, Value),
    Intersection(i32, i32, Value),
}

#[derive(Debug, Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Sent>>>);

impl Recorder {
    fn sent(&self) -> Vec<Sent> {
        self.0.lock().clone()
    }
}

impl EventEmitter for Recorder {
    fn send_touch_event(&mut self, event: &TouchEvent) {
        self.0
            .lock()
            .push(Sent::Touch(event.name.clone(), event.target_sign));
    }

    fn send_multi_touch_event(&mut self, _event: &MultiTouchEvent) {}

    fn send_custom_event(&mut self, event: &CustomEvent) {
        self.0
            .lock()
            .push(Sent::Custom(event.name.clone(), event.target));
    }

    fn send_global_event(&mut self, name: &str, params: Value) {
        self.0.lock().push(Sent::Global(name.to_string(), params));
    }

    fn call_intersection_observer(&mut self, observer_id: i32, callback_id: i32, entry: Value) {
        self.0
            .lock()
            .push(Sent::Intersection(observer_id, callback_id, entry));
    }
}

fn host() -> (Host<TestBackend>, Recorder) {
    let recorder = Recorder::default();
    let mut config = PageConfig::default();
    config.enable_create_view_async = false;
    let host = Host::new(TestBackend::default(), Box::new(recorder.clone()), config);
    (host, recorder)
}

fn patch(sign: Sign, left: f32, top: f32, width: f32, height: f32) -> LayoutPatch {
    LayoutPatch {
        sign,
        layout: LayoutBox::with_frame(left, top, width, height),
        node_index: sign,
    }
}

/// `page#1 > view#2` with #2 at (0, 0)-(100, 100), marked `#box` and exposure id `box`.
fn send_page(host: &Host<TestBackend>) {
    let sender = host.sender();
    let messages = vec![
        HostMessage::CreateNode(NodeInit::new(1, "page")),
        HostMessage::CreateNode(
            NodeInit::new(2, "view").props(
                Props::new()
                    .with("idSelector", "box")
                    .with("exposure-id", "box"),
            ),
        ),
        HostMessage::OperationBatch(
            OperationBatchBuilder::new()
                .insert(1, 2, 0)
                .update_layout_batch(&[patch(1, 0., 0., 400., 800.), patch(2, 0., 0., 100., 100.)])
                .layout_finish(0, 0)
                .build(),
        ),
    ];
    for message in messages {
        sender.send(message).expect("host is alive");
    }
}

#[test]
fn test_batch_builds_tree() {
    let (mut host, _) = host();
    send_page(&host);
    assert_eq!(host.poll(0), 3);
    let owner = host.owner();
    assert_eq!(owner.root(), Some(1));
    assert_eq!(owner.node(2).map(|n| n.parent()), Some(Some(1)));
    assert_eq!(owner.bounds_on_screen(2), Some(Rect::from_ltrb(0., 0., 100., 100.)));
    assert_eq!(owner.backend().views, vec![1, 2]);
}

#[test]
fn test_touch_from_another_thread() {
    let (mut host, recorder) = host();
    send_page(&host);
    host.poll(0);

    let sender = host.sender();
    thread::spawn(move || {
        for (action, t) in &[(MotionAction::Down, 100), (MotionAction::Up, 150)] {
            let event = MotionEvent::single(*action, 50., 50., *t);
            sender.send(HostMessage::Touch(event)).expect("host is alive");
        }
    })
    .join()
    .expect("sender thread");
    assert_eq!(host.poll(150), 2);

    let touches: Vec<_> = recorder
        .sent()
        .into_iter()
        .filter(|s| matches!(s, Sent::Touch(..)))
        .collect();
    assert_eq!(
        touches,
        vec![
            Sent::Touch("touchstart".into(), 2),
            Sent::Touch("touchend".into(), 2),
            Sent::Touch("tap".into(), 2),
        ]
    );
}

#[test]
fn test_props_change_between_touches_suppresses_tap() {
    let (mut host, recorder) = host();
    send_page(&host);
    host.poll(0);
    let sender = host.sender();
    let messages = vec![
        HostMessage::Touch(MotionEvent::single(MotionAction::Down, 50., 50., 100)),
        HostMessage::UpdateProps {
            sign: 2,
            props: Props::new().with("opacity", 0.5),
            tend_to_flatten: false,
            listeners: None,
        },
        HostMessage::Touch(MotionEvent::single(MotionAction::Up, 50., 50., 150)),
    ];
    for message in messages {
        sender.send(message).expect("host is alive");
    }
    assert_eq!(host.poll(150), 3);
    assert!(!recorder.sent().contains(&Sent::Touch("tap".into(), 2)));

    for (action, t) in &[(MotionAction::Down, 200), (MotionAction::Up, 250)] {
        sender
            .send(HostMessage::Touch(MotionEvent::single(*action, 50., 50., *t)))
            .expect("host is alive");
    }
    host.poll(250);
    assert!(recorder.sent().contains(&Sent::Touch("tap".into(), 2)));
}

#[test]
fn test_batch_while_context_free_waits_for_attach() {
    let (mut host, _) = host();
    let sender = host.sender();
    sender
        .send(HostMessage::CreateNode(NodeInit::new(1, "page")))
        .expect("host is alive");
    host.poll(0);
    let messages = vec![
        HostMessage::SetContextFree(true),
        HostMessage::CreateNode(NodeInit::new(2, "view")),
        HostMessage::OperationBatch(OperationBatchBuilder::new().insert(1, 2, 0).build()),
        HostMessage::UpdateLayout {
            sign: 2,
            layout: LayoutBox::with_frame(0., 0., 50., 50.),
        },
    ];
    for message in messages {
        sender.send(message).expect("host is alive");
    }
    host.poll(10);
    assert_eq!(host.owner().node(1).map(|n| n.children().len()), Some(0));

    sender.send(HostMessage::Attach).expect("host is alive");
    host.poll(20);
    let owner = host.owner();
    assert_eq!(owner.node(1).map(|n| n.children().to_vec()), Some(vec![2]));
    assert_eq!(owner.node(2).map(|n| n.layout().width), Some(50.));
}

#[test]
fn test_long_press_fires_on_poll() {
    let (mut host, recorder) = host();
    send_page(&host);
    host.poll(0);
    let sender = host.sender();
    sender
        .send(HostMessage::Touch(MotionEvent::single(MotionAction::Down, 50., 50., 1000)))
        .expect("host is alive");
    host.poll(1000);
    host.poll(1400);
    assert!(!recorder.sent().contains(&Sent::Touch("longpress".into(), 2)));
    host.poll(1500);
    assert!(recorder.sent().contains(&Sent::Touch("longpress".into(), 2)));
}

#[test]
fn test_observers_and_exposure() {
    let (mut host, recorder) = host();
    send_page(&host);
    host.poll(0);

    let sender = host.sender();
    let messages = vec![
        HostMessage::Observer(ObserverCommand::Create {
            id: 3,
            component_id: "-1".into(),
            options: json!({ "thresholds": [0, 1] }),
        }),
        HostMessage::Observer(ObserverCommand::Observe {
            id: 3,
            selector: "#box".into(),
            callback_id: 9,
        }),
        HostMessage::Draw,
    ];
    for message in messages {
        sender.send(message).expect("host is alive");
    }
    host.poll(100);
    assert_eq!(host.observers().len(), 1);

    let sent = recorder.sent();
    let intersections: Vec<_> = sent
        .iter()
        .filter_map(|s| match s {
            Sent::Intersection(id, callback, entry) => Some((*id, *callback, entry["intersectionRatio"].clone())),
            _ => None,
        })
        .collect();
    assert_eq!(intersections, vec![(3, 9, json!(1.0))]);
    let exposure = sent.iter().find_map(|s| match s {
        Sent::Global(name, params) if name == "exposure" => Some(params.clone()),
        _ => None,
    });
    assert_eq!(
        exposure.map(|p| p[0][0]["exposure-id"].clone()),
        Some(json!("box"))
    );

    sender
        .send(HostMessage::Observer(ObserverCommand::Disconnect { id: 3 }))
        .expect("host is alive");
    sender
        .send(HostMessage::StopExposure { send_event: true })
        .expect("host is alive");
    host.poll(200);
    assert!(host.observers().is_empty());
    assert!(host.exposure().is_stopped());
    assert!(recorder
        .sent()
        .iter()
        .any(|s| matches!(s, Sent::Global(name, _) if name == "disexposure")));
}

#[test]
fn test_custom_events_are_forwarded() {
    let (mut host, recorder) = host();
    send_page(&host);
    host.poll(0);
    host.sender()
        .send(HostMessage::CustomEvent(CustomEvent::new(2, "scroll", json!({}))))
        .expect("host is alive");
    host.poll(10);
    assert!(recorder.sent().contains(&Sent::Custom("scroll".into(), 2)));
}

#[test]
fn test_destroy_ignores_later_batches() {
    let (mut host, _) = host();
    send_page(&host);
    host.poll(0);
    let sender = host.sender();
    sender.send(HostMessage::Destroy).expect("host is alive");
    sender
        .send(HostMessage::OperationBatch(
            OperationBatchBuilder::new().destroy(1, 2).build(),
        ))
        .expect("host is alive");
    host.poll(10);
    assert!(host.painting().is_destroyed());
    assert!(host.owner().contains(2));
}
