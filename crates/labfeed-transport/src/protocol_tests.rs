    use super::*;

    fn broadcast(app_key: &str, cluster: &str) -> BroadcastConfig {
        BroadcastConfig {
            app_key: app_key.to_string(),
            cluster: cluster.to_string(),
            ..BroadcastConfig::default()
        }
    }

    #[test]
    fn test_endpoint_url_for_cluster() {
        let url = endpoint_url(&broadcast("abc123", "eu")).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("ws-eu.pusher.com"));
        assert_eq!(url.port_or_known_default(), Some(443));
        assert_eq!(url.path(), "/app/abc123");

        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(query[0], ("protocol".to_string(), "7".to_string()));
        assert_eq!(query[1], ("client".to_string(), "labfeed-rs".to_string()));
        assert_eq!(query[2].0, "version");
        assert_eq!(query[3], ("flash".to_string(), "false".to_string()));
    }

    #[test]
    fn test_endpoint_url_with_host_override() {
        let mut config = broadcast("key", "mt1");
        config.host = Some("127.0.0.1".to_string());
        config.port = Some(6001);
        config.force_tls = false;

        let url = endpoint_url(&config).unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.port(), Some(6001));
    }

    #[test]
    fn test_endpoint_url_plaintext_default_port() {
        let mut config = broadcast("key", "ap1");
        config.force_tls = false;

        let url = endpoint_url(&config).unwrap();
        assert_eq!(url.port_or_known_default(), Some(80));
    }

    #[test]
    fn test_outbound_subscribe() {
        let frame = OutboundFrame::Subscribe(ChannelKey::visit(42)).to_json();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "pusher:subscribe");
        assert_eq!(value["data"]["channel"], "visit:42");
    }

    #[test]
    fn test_outbound_ping() {
        let value: Value = serde_json::from_str(&OutboundFrame::Ping.to_json()).unwrap();
        assert_eq!(value["event"], "pusher:ping");
    }

    #[test]
    fn test_parse_connection_established() {
        let text = r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"123.456\",\"activity_timeout\":120}"}"#;
        let frame = InboundFrame::parse(text).unwrap();
        assert_eq!(
            frame,
            InboundFrame::ConnectionEstablished {
                socket_id: "123.456".to_string(),
                activity_timeout: Some(120),
            }
        );
    }

    #[test]
    fn test_parse_connection_established_without_socket_id() {
        let text = r#"{"event":"pusher:connection_established","data":"{}"}"#;
        assert!(matches!(
            InboundFrame::parse(text),
            Err(TransportError::Protocol { code: None, .. })
        ));
    }

    #[test]
    fn test_parse_error_frame() {
        let text = r#"{"event":"pusher:error","data":{"code":4001,"message":"App key not in this cluster"}}"#;
        let frame = InboundFrame::parse(text).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Error {
                code: Some(4001),
                message: "App key not in this cluster".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_error_frame_null_code() {
        let text = r#"{"event":"pusher:error","data":{"code":null,"message":"oops"}}"#;
        let frame = InboundFrame::parse(text).unwrap();
        assert!(matches!(frame, InboundFrame::Error { code: None, .. }));
    }

    #[test]
    fn test_parse_channel_event_string_data() {
        let text = r#"{"event":"SysmexResultInserted","channel":"visit:42","data":"{\"a\":1}"}"#;
        let frame = InboundFrame::parse(text).unwrap();
        assert_eq!(
            frame,
            InboundFrame::ChannelEvent {
                channel: "visit:42".to_string(),
                event: "SysmexResultInserted".to_string(),
                data: r#"{"a":1}"#.to_string(),
            }
        );
    }

    #[test]
    fn test_parse_channel_event_object_data() {
        let text = r#"{"event":"update","channel":"visit:1","data":{"a":1}}"#;
        match InboundFrame::parse(text).unwrap() {
            InboundFrame::ChannelEvent { data, .. } => assert_eq!(data, r#"{"a":1}"#),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_parse_subscription_succeeded() {
        let text = r#"{"event":"pusher_internal:subscription_succeeded","channel":"visit:1","data":"{}"}"#;
        assert_eq!(
            InboundFrame::parse(text).unwrap(),
            InboundFrame::SubscriptionSucceeded {
                channel: "visit:1".to_string()
            }
        );
    }

    #[test]
    fn test_parse_ping_pong_and_other() {
        assert_eq!(
            InboundFrame::parse(r#"{"event":"pusher:ping","data":{}}"#).unwrap(),
            InboundFrame::Ping
        );
        assert_eq!(
            InboundFrame::parse(r#"{"event":"pusher:pong"}"#).unwrap(),
            InboundFrame::Pong
        );
        assert!(matches!(
            InboundFrame::parse(r#"{"event":"pusher_internal:member_added","channel":"presence-x"}"#).unwrap(),
            InboundFrame::Other { .. }
        ));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(InboundFrame::parse("not json").is_err());
        assert!(InboundFrame::parse(r#"{"data":"x"}"#).is_err());
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(4001), ErrorAction::Fatal);
        assert_eq!(classify(4099), ErrorAction::Fatal);
        assert_eq!(classify(4100), ErrorAction::Backoff);
        assert_eq!(classify(4201), ErrorAction::Immediate);
        assert_eq!(classify(4301), ErrorAction::Ignore);
        assert_eq!(classify(1000), ErrorAction::Ignore);
    }
