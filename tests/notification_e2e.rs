use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use lwm2m_notify::ports::{channel, NotificationStream};
use lwm2m_notify::scheduler::Task;
use lwm2m_notify::{
    AttributeName, AttributeSet, AttributeSource, AttributeValue, InMemoryAttributeSource, LwM2mPath,
    LwM2mServer, ManualScheduler, NotificationAttributeTree, NotificationManager, NotificationManagerConfig,
    NotificationSender, ObjectListener, ObserveRequest, ObserveResponse, ScheduledTask, SchedulerError,
    SchedulerOwnership, TaskScheduler, Value,
};

const TEMPERATURE: u16 = 3303;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn server() -> LwM2mServer {
    LwM2mServer::new(1, "coap://127.0.0.1:5683")
}

fn sensor_value() -> ObserveRequest {
    ObserveRequest::new(LwM2mPath::resource(TEMPERATURE, 0, 5700))
}

/// Manager on virtual time, reading a shared value and delivering into a
/// channel.
struct Harness {
    source: Arc<InMemoryAttributeSource>,
    scheduler: Arc<ManualScheduler>,
    value: Arc<Mutex<Value>>,
    sender: Arc<dyn NotificationSender>,
    stream: NotificationStream,
    manager: NotificationManager,
}

impl Harness {
    fn new() -> Self {
        init_logger();
        let source = Arc::new(InMemoryAttributeSource::new());
        source.add_object(TEMPERATURE);
        source.add_object(3304);

        let scheduler = Arc::new(ManualScheduler::new());
        let value = Arc::new(Mutex::new(Value::Float(0.0)));
        let current = Arc::clone(&value);
        let reader = Arc::new(move |_: &LwM2mServer, _: &ObserveRequest| {
            ObserveResponse::success(current.lock().clone())
        });

        let manager = NotificationManager::builder(source.clone(), reader)
            .scheduler(scheduler.clone())
            .build()
            .unwrap();

        let (sender, stream) = channel(1024);
        Self {
            source,
            scheduler,
            value,
            sender: Arc::new(sender),
            stream,
            manager,
        }
    }

    fn observe(&self, request: &ObserveRequest, attributes: &str) {
        self.source
            .write_attributes(&server(), request.path, attributes.parse::<AttributeSet>().unwrap())
            .unwrap();
        let value = self.value.lock().clone();
        self.manager
            .init_relation(&server(), request, &value, &self.sender)
            .unwrap();
    }

    fn set(&self, value: f64) {
        *self.value.lock() = Value::Float(value);
    }

    fn change(&self, value: f64) {
        self.set(value);
        self.manager
            .notification_triggered(&server(), &sensor_value(), &self.sender);
    }

    fn advance_ms(&self, ms: u64) {
        self.scheduler.advance(Duration::from_millis(ms));
    }

    fn sent_values(&self) -> Vec<Value> {
        self.stream
            .drain()
            .into_iter()
            .filter_map(|r| r.content)
            .collect()
    }
}

#[test]
fn pmin_equal_pmax_sends_only_on_the_period() {
    let h = Harness::new();
    h.observe(&sensor_value(), "pmin=5&pmax=5");

    for i in 0..100 {
        h.change(f64::from(i));
        h.advance_ms(40);
    }
    assert!(h.sent_values().is_empty());

    h.advance_ms(1_000);
    assert_eq!(h.sent_values(), vec![Value::Float(99.0)]);
    assert_eq!(h.manager.stats().suppressed, 100);
}

#[test]
fn triggers_inside_pmin_coalesce_into_one_deferred_send() {
    let h = Harness::new();
    h.observe(&sensor_value(), "pmin=10");

    h.advance_ms(1_000);
    h.change(1.0);
    h.advance_ms(1_000);
    h.change(2.0);

    h.advance_ms(7_999);
    assert!(h.sent_values().is_empty());
    h.advance_ms(1);
    assert_eq!(h.sent_values(), vec![Value::Float(2.0)]);
    assert_eq!(h.scheduler.elapsed(), Duration::from_secs(10));
}

#[test]
fn greater_than_threshold_gates_notifications() {
    let h = Harness::new();
    h.set(40.0);
    h.observe(&sensor_value(), "gt=50");

    h.change(45.0);
    assert!(h.sent_values().is_empty());
    let data = h.manager.relation(&server(), &sensor_value()).unwrap();
    assert_eq!(data.last_sent_value(), Some(&Value::Float(40.0)));

    h.change(60.0);
    assert_eq!(h.sent_values(), vec![Value::Float(60.0)]);
    let data = h.manager.relation(&server(), &sensor_value()).unwrap();
    assert_eq!(data.last_sent_value(), Some(&Value::Float(60.0)));

    h.change(70.0);
    assert!(h.sent_values().is_empty());
    h.change(49.0);
    assert_eq!(h.sent_values(), vec![Value::Float(49.0)]);
}

#[test]
fn burst_under_pmin_delivers_latest_value_once() {
    let h = Harness::new();
    h.observe(&sensor_value(), "pmin=2&pmax=20");

    for i in 1..=5 {
        h.advance_ms(200);
        h.change(f64::from(i));
    }
    h.advance_ms(1_000);
    assert!(h.sent_values().is_empty());

    h.advance_ms(500);
    assert_eq!(h.sent_values(), vec![Value::Float(5.0)]);

    h.advance_ms(19_000);
    assert!(h.sent_values().is_empty());
    h.advance_ms(1_000);
    assert_eq!(h.sent_values(), vec![Value::Float(5.0)]);
}

#[test]
fn delivery_to_a_gone_relation_purges_state() {
    let h = Harness::new();
    let (sender, stream) = channel(4);
    let sender: Arc<dyn NotificationSender> = Arc::new(sender);
    h.source
        .write_attributes(&server(), sensor_value().path, "pmax=3".parse().unwrap())
        .unwrap();
    h.manager
        .init_relation(&server(), &sensor_value(), &Value::Float(0.0), &sender)
        .unwrap();
    assert!(h.manager.is_tracked(&server(), &sensor_value()));

    drop(stream);
    h.advance_ms(3_000);

    assert!(!h.manager.is_tracked(&server(), &sensor_value()));
    assert_eq!(h.manager.stats().purged, 1);
    assert_eq!(h.scheduler.pending(), 0);
}

#[test]
fn cancelled_relation_never_runs_its_deferral() {
    let h = Harness::new();
    h.observe(&sensor_value(), "pmin=10");
    h.advance_ms(1_000);
    h.change(1.0);
    assert_eq!(h.scheduler.pending(), 1);

    h.manager.clear_relation(&server(), &sensor_value());
    h.advance_ms(20_000);

    assert!(h.sent_values().is_empty());
    assert_eq!(h.scheduler.pending(), 0);
}

#[test]
fn re_observe_replaces_previous_relation_state() {
    let h = Harness::new();
    h.observe(&sensor_value(), "pmax=10");
    h.observe(&sensor_value(), "pmax=30");

    assert_eq!(h.manager.relation_count(), 1);
    assert_eq!(h.scheduler.pending(), 1);

    h.advance_ms(10_000);
    assert!(h.sent_values().is_empty());
    h.advance_ms(20_000);
    assert_eq!(h.sent_values().len(), 1);
}

#[test]
fn object_removal_purges_relations_under_it() {
    let h = Harness::new();
    let humidity = ObserveRequest::new(LwM2mPath::resource(3304, 0, 5700));
    h.observe(&sensor_value(), "pmax=60");
    h.observe(&humidity, "pmax=60");
    assert_eq!(h.manager.relation_count(), 2);

    assert!(h.source.remove_object(TEMPERATURE));

    assert!(!h.manager.is_tracked(&server(), &sensor_value()));
    assert!(h.manager.is_tracked(&server(), &humidity));
    assert_eq!(h.scheduler.pending(), 1);
}

#[test]
fn inconsistent_attributes_reject_the_observe() {
    let h = Harness::new();
    h.source
        .write_attributes(&server(), LwM2mPath::object_instance(TEMPERATURE, 0), "pmin=30".parse().unwrap())
        .unwrap();
    h.source
        .write_attributes(&server(), sensor_value().path, "pmax=10".parse().unwrap())
        .unwrap();

    let err = h
        .manager
        .init_relation(&server(), &sensor_value(), &Value::Float(0.0), &h.sender)
        .unwrap_err();
    assert!(err.is_attributes());
    assert_eq!(h.manager.relation_count(), 0);
}

#[test]
fn destroy_respects_scheduler_ownership() {
    let h = Harness::new();
    assert_eq!(h.manager.scheduler_ownership(), SchedulerOwnership::Shared);
    h.manager.destroy();
    assert!(!h.scheduler.is_shutdown());

    let reader = Arc::new(|_: &LwM2mServer, _: &ObserveRequest| ObserveResponse::success(Value::Float(1.0)));
    let owned = NotificationManager::builder(h.source.clone(), reader)
        .config(NotificationManagerConfig::default())
        .build()
        .unwrap();
    assert_eq!(owned.scheduler_ownership(), SchedulerOwnership::Owned);
    owned.destroy();

    // With its scheduler gone, a pmax relation cannot be armed and stays a
    // classic observe.
    h.source
        .write_attributes(&server(), sensor_value().path, "pmax=5".parse().unwrap())
        .unwrap();
    owned
        .init_relation(&server(), &sensor_value(), &Value::Float(1.0), &h.sender)
        .unwrap();
    assert!(!owned.is_tracked(&server(), &sensor_value()));
}

#[test]
fn thread_scheduler_delivers_pmax_notifications() {
    init_logger();
    let source = Arc::new(InMemoryAttributeSource::new());
    source.add_object(TEMPERATURE);
    source
        .write_attributes(&server(), sensor_value().path, "pmax=1".parse().unwrap())
        .unwrap();

    let reader = Arc::new(|_: &LwM2mServer, _: &ObserveRequest| ObserveResponse::success(Value::Float(21.5)));
    let manager = NotificationManager::new(source, reader).unwrap();

    let (sender, stream) = channel(16);
    let sender: Arc<dyn NotificationSender> = Arc::new(sender);
    manager
        .init_relation(&server(), &sensor_value(), &Value::Float(21.5), &sender)
        .unwrap();

    let first = stream.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(first.content(), Some(&Value::Float(21.5)));
    let second = stream.recv_timeout(Duration::from_secs(3)).unwrap();
    assert!(second.is_success());
    assert!(manager.stats().sent >= 2);

    drop(manager);
}

#[test]
fn re_observe_during_a_timer_send_keeps_the_new_attributes() {
    init_logger();
    let source = Arc::new(InMemoryAttributeSource::new());
    source.add_object(TEMPERATURE);
    source
        .write_attributes(&server(), sensor_value().path, "pmax=5".parse().unwrap())
        .unwrap();
    let scheduler = Arc::new(ManualScheduler::new());
    let reader = Arc::new(|_: &LwM2mServer, _: &ObserveRequest| ObserveResponse::success(Value::Float(1.0)));
    let manager = Arc::new(
        NotificationManager::builder(source.clone(), reader)
            .scheduler(scheduler.clone())
            .build()
            .unwrap(),
    );

    // The first delivery re-observes the same path with a longer pmax, from
    // inside the send, like a server re-registering its observation.
    let (delivery, stream) = channel(64);
    let this_sender: Arc<Mutex<Option<Arc<dyn NotificationSender>>>> = Arc::new(Mutex::new(None));
    let re_observed = Arc::new(AtomicBool::new(false));
    let sender: Arc<dyn NotificationSender> = {
        let weak = Arc::downgrade(&manager);
        let source = source.clone();
        let this_sender = Arc::clone(&this_sender);
        let re_observed = Arc::clone(&re_observed);
        Arc::new(move |response: ObserveResponse| {
            let delivered = delivery.send_notification(response);
            if !re_observed.swap(true, Ordering::SeqCst) {
                source
                    .write_attributes(&server(), sensor_value().path, "pmax=30".parse().unwrap())
                    .unwrap();
                let me = this_sender.lock().clone();
                if let (Some(manager), Some(me)) = (weak.upgrade(), me) {
                    manager
                        .init_relation(&server(), &sensor_value(), &Value::Float(1.0), &me)
                        .unwrap();
                }
            }
            delivered
        })
    };
    *this_sender.lock() = Some(Arc::clone(&sender));

    manager
        .init_relation(&server(), &sensor_value(), &Value::Float(1.0), &sender)
        .unwrap();

    scheduler.advance(Duration::from_secs(5));
    assert!(re_observed.load(Ordering::SeqCst));
    assert_eq!(stream.drain().len(), 1);

    let data = manager.relation(&server(), &sensor_value()).unwrap();
    assert_eq!(
        data.attributes().value(&sensor_value().path, AttributeName::MaximumPeriod),
        Some(AttributeValue::Period(30))
    );
    assert_eq!(scheduler.pending(), 1);

    // The old 5s period is gone for good: only the new 30s timer sends.
    scheduler.advance(Duration::from_secs(29));
    assert!(stream.drain().is_empty());
    scheduler.advance(Duration::from_secs(1));
    assert_eq!(stream.drain().len(), 1);
}

#[test]
fn re_observe_before_the_timer_fires_sends_once_per_period() {
    let h = Harness::new();
    h.observe(&sensor_value(), "pmax=5");

    // Both relations armed a timer due at t=5s; the replaced one is
    // cancelled and never fires.
    h.observe(&sensor_value(), "pmax=5");
    h.advance_ms(5_000);
    assert_eq!(h.sent_values().len(), 1);
    assert_eq!(h.scheduler.pending(), 1);

    h.advance_ms(5_000);
    assert_eq!(h.sent_values().len(), 1);
}

#[test]
fn zero_pmax_is_rejected_instead_of_spinning() {
    let h = Harness::new();
    let err = h
        .source
        .write_attributes(&server(), sensor_value().path, "pmax=0".parse().unwrap())
        .unwrap_err();
    assert!(err.is_attributes());

    // A source that skips validation still cannot arm a zero period.
    struct Unchecked;
    impl AttributeSource for Unchecked {
        fn attributes_for(&self, _: &LwM2mServer, _: u16) -> Option<NotificationAttributeTree> {
            Some(NotificationAttributeTree::single(
                sensor_value().path,
                AttributeSet::new().with_pmax(0),
            ))
        }

        fn add_listener(&self, _: Arc<dyn ObjectListener>) {}
    }

    let reader = Arc::new(|_: &LwM2mServer, _: &ObserveRequest| ObserveResponse::success(Value::Float(1.0)));
    let manager = NotificationManager::builder(Arc::new(Unchecked), reader)
        .scheduler(h.scheduler.clone())
        .build()
        .unwrap();
    let err = manager
        .init_relation(&server(), &sensor_value(), &Value::Float(1.0), &h.sender)
        .unwrap_err();
    assert!(err.is_attributes());
    assert_eq!(h.scheduler.advance(Duration::from_millis(1)), 0);
    assert!(h.sent_values().is_empty());
}

/// Virtual-time scheduler that can be switched to reject every submission.
struct SaturatedScheduler {
    inner: ManualScheduler,
    refuse: AtomicBool,
}

impl TaskScheduler for SaturatedScheduler {
    fn now(&self) -> Instant {
        self.inner.now()
    }

    fn schedule(&self, delay: Duration, task: Task) -> Result<ScheduledTask, SchedulerError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SchedulerError::QueueFull { capacity: 0 });
        }
        self.inner.schedule(delay, task)
    }

    fn shutdown(&self) {
        self.inner.shutdown();
    }

    fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }
}

#[test]
fn deferral_that_cannot_be_scheduled_sends_immediately() {
    init_logger();
    let source = Arc::new(InMemoryAttributeSource::new());
    source.add_object(TEMPERATURE);
    source
        .write_attributes(&server(), sensor_value().path, "pmin=10".parse().unwrap())
        .unwrap();
    let scheduler = Arc::new(SaturatedScheduler {
        inner: ManualScheduler::new(),
        refuse: AtomicBool::new(false),
    });
    let reader = Arc::new(|_: &LwM2mServer, _: &ObserveRequest| ObserveResponse::success(Value::Float(3.0)));
    let manager = NotificationManager::builder(source, reader)
        .scheduler(scheduler.clone())
        .build()
        .unwrap();
    let (sender, stream) = channel(8);
    let sender: Arc<dyn NotificationSender> = Arc::new(sender);
    manager
        .init_relation(&server(), &sensor_value(), &Value::Float(3.0), &sender)
        .unwrap();

    scheduler.inner.advance(Duration::from_secs(1));
    scheduler.refuse.store(true, Ordering::SeqCst);
    manager.notification_triggered(&server(), &sensor_value(), &sender);

    assert_eq!(stream.drain().len(), 1);
    let stats = manager.stats();
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.deferred, 0);
    let data = manager.relation(&server(), &sensor_value()).unwrap();
    assert!(!data.pmin_task_scheduled());
    assert_eq!(data.last_sending_time(), Some(scheduler.now()));
}
