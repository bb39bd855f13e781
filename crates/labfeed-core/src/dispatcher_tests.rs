    use super::*;
    use labfeed_protocols::{FeedError, SubscriptionSink};
    use parking_lot::Mutex;
    use serde_json::json;

    struct NullSink;

    impl SubscriptionSink for NullSink {
        fn open(&self, _channel: &ChannelKey) {}
        fn close(&self, _channel: &ChannelKey) {}
    }

    fn setup() -> (Arc<ChannelRegistry>, Dispatcher) {
        let registry = Arc::new(ChannelRegistry::new(Arc::new(NullSink)));
        let dispatcher = Dispatcher::new(registry.clone(), Arc::new(LockCoordinator::new()));
        (registry, dispatcher)
    }

    fn visit_42_payload() -> String {
        json!({
            "sysmexResult": { "id": 1, "doctorvisit_id": 42, "wbc": 6.1 },
            "doctorVisit": { "id": 42, "patient_id": 7, "created_at": "2024-01-01T00:00:00Z" },
            "patient": { "id": 7, "name": "A", "result_is_locked": true }
        })
        .to_string()
    }

    /// Listener that appends `tag` to a shared log.
    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Arc<dyn Listener> {
        let log = log.clone();
        let tag = tag.to_string();
        Arc::new(move |envelope: &EventEnvelope| {
            log.lock().push(format!("{tag}:{}", envelope.result.id));
            Ok::<(), ListenerError>(())
        })
    }

    #[test]
    fn test_valid_envelope_delivered_once() {
        let (registry, dispatcher) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _handle = registry
            .subscribe(ChannelKey::visit(42), recorder(&log, "a"))
            .unwrap();

        let report = dispatcher
            .dispatch(&ChannelKey::visit(42), &visit_42_payload())
            .unwrap();

        assert_eq!(report, DispatchReport { delivered: 1, failed: 0 });
        assert_eq!(*log.lock(), vec!["a:1"]);
        assert_eq!(dispatcher.locks().is_locked(7), Some(true));
    }

    #[test]
    fn test_missing_visit_id_is_malformed() {
        let (registry, dispatcher) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _handle = registry
            .subscribe(ChannelKey::visit(42), recorder(&log, "a"))
            .unwrap();

        let mut payload: serde_json::Value = serde_json::from_str(&visit_42_payload()).unwrap();
        payload["doctorVisit"].as_object_mut().unwrap().remove("id");

        let err = dispatcher
            .dispatch(&ChannelKey::visit(42), &payload.to_string())
            .unwrap_err();

        assert_eq!(err, PayloadError::MissingField("doctorVisit.id".to_string()));
        assert!(matches!(FeedError::from(err), FeedError::MalformedPayload(_)));
        assert!(log.lock().is_empty());
        assert_eq!(dispatcher.locks().is_locked(7), None);
        assert_eq!(dispatcher.stats().dropped, 1);
        assert_eq!(dispatcher.stats().dispatched, 0);
    }

    #[test]
    fn test_malformed_leaves_lock_state() {
        let (_registry, dispatcher) = setup();
        dispatcher
            .dispatch(&ChannelKey::visit(42), &visit_42_payload())
            .unwrap();

        assert!(dispatcher.dispatch(&ChannelKey::visit(42), "{not json").is_err());
        assert_eq!(dispatcher.locks().is_locked(7), Some(true));
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let (registry, dispatcher) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = registry.subscribe(ChannelKey::visit(42), recorder(&log, "a")).unwrap();
        let _b = registry.subscribe(ChannelKey::visit(42), recorder(&log, "b")).unwrap();
        let _c = registry.subscribe(ChannelKey::visit(42), recorder(&log, "c")).unwrap();

        dispatcher
            .dispatch(&ChannelKey::visit(42), &visit_42_payload())
            .unwrap();
        assert_eq!(*log.lock(), vec!["a:1", "b:1", "c:1"]);
    }

    #[test]
    fn test_other_channels_not_invoked() {
        let (registry, dispatcher) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _handle = registry
            .subscribe(ChannelKey::visit(43), recorder(&log, "other"))
            .unwrap();

        let report = dispatcher
            .dispatch(&ChannelKey::visit(42), &visit_42_payload())
            .unwrap();
        assert_eq!(report.delivered, 0);
        assert!(log.lock().is_empty());
        // Lock state still follows the dispatched envelope.
        assert_eq!(dispatcher.locks().is_locked(7), Some(true));
    }

    #[test]
    fn test_failing_listener_is_isolated() {
        let (registry, dispatcher) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing: Arc<dyn Listener> =
            Arc::new(|_: &EventEnvelope| Err::<(), _>(ListenerError::failed("render error")));
        let _a = registry.subscribe(ChannelKey::visit(42), failing).unwrap();
        let _b = registry.subscribe(ChannelKey::visit(42), recorder(&log, "b")).unwrap();

        let report = dispatcher
            .dispatch(&ChannelKey::visit(42), &visit_42_payload())
            .unwrap();
        assert_eq!(report, DispatchReport { delivered: 1, failed: 1 });
        assert_eq!(*log.lock(), vec!["b:1"]);
        assert_eq!(dispatcher.stats().listener_failures, 1);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let (registry, dispatcher) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let panicking: Arc<dyn Listener> = Arc::new(|_: &EventEnvelope| -> Result<(), ListenerError> {
            panic!("listener bug")
        });
        let _a = registry.subscribe(ChannelKey::visit(42), panicking).unwrap();
        let _b = registry.subscribe(ChannelKey::visit(42), recorder(&log, "b")).unwrap();

        let report = dispatcher
            .dispatch(&ChannelKey::visit(42), &visit_42_payload())
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(*log.lock(), vec!["b:1"]);
        assert_eq!(dispatcher.locks().is_locked(7), Some(true));
    }

    #[test]
    fn test_panic_message() {
        let listener = |_: &EventEnvelope| -> Result<(), ListenerError> { panic!("boom {}", 1) };
        let envelope = EventEnvelope::parse(&visit_42_payload()).unwrap();
        let err = invoke(&listener, &envelope).unwrap_err();
        assert_eq!(err, ListenerError::Panicked("boom 1".to_string()));
    }

    #[test]
    fn test_listener_may_release_itself() {
        let (registry, dispatcher) = setup();
        let slot: Arc<Mutex<Option<crate::SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0));

        let listener: Arc<dyn Listener> = {
            let slot = slot.clone();
            let calls = calls.clone();
            Arc::new(move |_: &EventEnvelope| {
                *calls.lock() += 1;
                if let Some(handle) = slot.lock().take() {
                    handle.release();
                }
                Ok::<(), ListenerError>(())
            })
        };
        *slot.lock() = Some(registry.subscribe(ChannelKey::visit(42), listener).unwrap());

        dispatcher
            .dispatch(&ChannelKey::visit(42), &visit_42_payload())
            .unwrap();
        dispatcher
            .dispatch(&ChannelKey::visit(42), &visit_42_payload())
            .unwrap();

        assert_eq!(*calls.lock(), 1);
        assert_eq!(registry.listener_count(&ChannelKey::visit(42)), 0);
    }

    #[test]
    fn test_inbound_handler_counts() {
        let (_registry, dispatcher) = setup();
        dispatcher.handle(&ChannelKey::visit(42), "SysmexResultInserted", &visit_42_payload());
        dispatcher.handle(&ChannelKey::visit(42), "SysmexResultInserted", "[]");

        let stats = dispatcher.stats();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.dropped, 1);
    }
