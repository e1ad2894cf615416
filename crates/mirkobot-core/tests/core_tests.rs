#[cfg(test)]
mod tests {
    use mirkobot_core::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler() -> (Arc<AtomicUsize>, Handler) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = {
            let hits = hits.clone();
            handler(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        (hits, h)
    }

    // ── Bus matching ───────────────────────────────────────────

    #[test]
    fn test_wildcard_message_subscription() {
        let bus = Bus::new();
        let (hits, h) = counting_handler();
        bus.on("channel::*::message::*", h).unwrap();

        assert_eq!(bus.emit("channel::general::message::text", vec![]), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert_eq!(bus.emit("channel::general::action::text", vec![]), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_segment_count_must_match() {
        let bus = Bus::new();
        let (hits, h) = counting_handler();
        bus.on("channel::*", h).unwrap();
        bus.emit("channel::general::send", vec![]);
        bus.emit("channel", vec![]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        bus.emit("channel::general", vec![]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let bus = Bus::new();
        let (hits, h) = counting_handler();
        bus.on("channel::General::send", h).unwrap();
        bus.emit("channel::general::send", vec![]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_args_are_delivered() {
        let bus = Bus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe("channel::*::send", move |env| {
            s.lock().push((env.topic.clone(), env.args.clone()));
            Ok(())
        })
        .unwrap();

        bus.emit("channel::hydepark::send", vec![json!("hello"), json!(1)]);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "channel::hydepark::send");
        assert_eq!(seen[0].1, vec![json!("hello"), json!(1)]);
    }

    // ── Ordering & reentrancy ─────────────────────────────────

    #[test]
    fn test_dispatch_follows_registration_order_across_patterns() {
        let bus = Bus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, pattern) in [
            ("first", "a::*::c"),
            ("second", "a::b::c"),
            ("third", "*::b::*"),
            ("fourth", "a::b::c"),
        ] {
            let order = order.clone();
            bus.subscribe(pattern, move |_| {
                order.lock().push(label);
                Ok(())
            })
            .unwrap();
        }

        assert_eq!(bus.emit("a::b::c", vec![]), 4);
        assert_eq!(*order.lock(), vec!["first", "second", "third", "fourth"]);
    }

    #[test]
    fn test_reentrant_emit_completes_before_outer_returns() {
        let bus = Bus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        {
            let order = order.clone();
            let inner_bus = bus.clone();
            bus.subscribe("outer", move |_| {
                order.lock().push("outer-start");
                inner_bus.emit("inner", vec![]);
                order.lock().push("outer-end");
                Ok(())
            })
            .unwrap();
        }
        {
            let order = order.clone();
            bus.subscribe("inner", move |_| {
                order.lock().push("inner");
                Ok(())
            })
            .unwrap();
        }

        bus.emit("outer", vec![]);
        assert_eq!(*order.lock(), vec!["outer-start", "inner", "outer-end"]);
    }

    #[test]
    fn test_handler_may_subscribe_during_dispatch() {
        let bus = Bus::new();
        let (hits, h) = counting_handler();
        let inner_bus = bus.clone();
        bus.subscribe("register", move |_| {
            inner_bus.on("late", h.clone())?;
            Ok(())
        })
        .unwrap();

        bus.emit("register", vec![]);
        bus.emit("late", vec![]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    // ── Failure isolation ─────────────────────────────────────

    #[test]
    fn test_failing_handler_does_not_block_siblings() {
        let bus = Bus::new();
        let (hits, h) = counting_handler();
        bus.subscribe("topic", |env| {
            Err(MirkobotError::Handler {
                topic: env.topic.clone(),
                reason: "nope".into(),
            })
        })
        .unwrap();
        bus.on("topic", h).unwrap();

        assert_eq!(bus.emit("topic", vec![]), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    // ── Unsubscription ────────────────────────────────────────

    #[test]
    fn test_off_any_removes_handler_from_all_patterns() {
        let bus = Bus::new();
        let (hits, h) = counting_handler();
        let (other_hits, other) = counting_handler();
        bus.on("channel::*::action::*", h.clone()).unwrap();
        bus.on("channel::*::message::*", h.clone()).unwrap();
        bus.on("channel::*::message::*", other).unwrap();

        assert_eq!(bus.off_any(&h), 2);

        bus.emit("channel::general::message::text", vec![]);
        bus.emit("channel::general::action::text", vec![]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(other_hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscription_count(), 1);
    }

    #[test]
    fn test_off_only_touches_given_pattern() {
        let bus = Bus::new();
        let (hits, h) = counting_handler();
        bus.on("a::*", h.clone()).unwrap();
        bus.on("a::b", h.clone()).unwrap();

        assert!(bus.off("a::*", &h));
        bus.emit("a::b", vec![]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_has_subscribers() {
        let bus = Bus::new();
        assert!(!bus.has_subscribers("channel::x::send"));
        bus.subscribe("channel::*::send", |_| Ok(())).unwrap();
        assert!(bus.has_subscribers("channel::x::send"));
        assert!(!bus.has_subscribers("channel::x::send::priority"));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let bus = Bus::new();
        assert!(bus.subscribe("", |_| Ok(())).is_err());
    }

    #[test]
    fn test_empty_segment_rejected() {
        let bus = Bus::new();
        assert!(bus.subscribe("a::::b", |_| Ok(())).is_err());
        assert!(bus.subscribe("::a", |_| Ok(())).is_err());
        assert!(bus.subscribe("a::", |_| Ok(())).is_err());
        assert_eq!(bus.subscription_count(), 0);
    }

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_error_display() {
        let err = MirkobotError::channel("hydepark", "socket closed");
        let s = err.to_string();
        assert!(s.contains("hydepark"));
        assert!(s.contains("socket closed"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MirkobotError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }
}
