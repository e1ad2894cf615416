#[cfg(test)]
mod tests {
    use mirkobot_config::{MirkobotConfig, ModuleSelector, Properties};
    use mirkobot_core::{MirkobotError, topics};
    use mirkobot_kernel::*;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::any::Any;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Scriptable module recording every phase it sees.
    struct Recorder {
        name: String,
        deps: Vec<String>,
        prepared: Option<bool>,
        initialized: Option<bool>,
        ready: Arc<AtomicBool>,
        log: Log,
    }

    impl Recorder {
        fn new(name: &str, log: &Log) -> Self {
            Self {
                name: name.into(),
                deps: Vec::new(),
                prepared: None,
                initialized: None,
                ready: Arc::new(AtomicBool::new(true)),
                log: log.clone(),
            }
        }

        fn record(&self, phase: &str) {
            self.log.lock().push(format!("{phase}:{}", self.name));
        }
    }

    impl Module for Recorder {
        fn dependencies(&self) -> Vec<String> {
            self.deps.clone()
        }

        fn prepare(&self, _args: &[Value]) -> PhaseResult {
            self.record("prepare");
            None
        }

        fn is_prepared(&self) -> PhaseResult {
            self.prepared.and_then(outcome)
        }

        fn init(&self, _args: &[Value]) -> PhaseResult {
            self.record("init");
            None
        }

        fn is_initialized(&self) -> PhaseResult {
            self.initialized.and_then(outcome)
        }

        fn is_ready(&self) -> PhaseResult {
            outcome(self.ready.load(Ordering::SeqCst))
        }

        fn run(&self, _args: &[Value]) -> PhaseResult {
            self.record("run");
            Some(json!("running"))
        }

        fn stop(&self, _args: &[Value]) -> PhaseResult {
            self.record("stop");
            None
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn props() -> Properties {
        Properties::from_config(MirkobotConfig::default())
    }

    fn kernel_with(recorders: Vec<Recorder>) -> Kernel {
        let mut registry = ModuleRegistry::new();
        for recorder in recorders {
            let name = recorder.name.clone();
            registry.register(
                &name,
                format!("test::{name}"),
                ModuleDefinition::instance(Arc::new(recorder)),
            );
        }
        Kernel::new(registry, props())
    }

    fn phases(log: &Log, phase: &str) -> Vec<String> {
        log.lock()
            .iter()
            .filter(|e| e.starts_with(&format!("{phase}:")))
            .cloned()
            .collect()
    }

    // ── Run ────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_run_succeeds_once() {
        let log = Log::default();
        let kernel = kernel_with(vec![Recorder::new("a", &log), Recorder::new("b", &log)]);
        kernel.load_modules(&ModuleSelector::All);

        assert!(!kernel.has_run());
        assert_eq!(kernel.run().await, Ok(()));
        assert!(kernel.has_run());
        assert_eq!(kernel.run().await, Ok(()));

        assert_eq!(phases(&log, "run"), vec!["run:a", "run:b"]);
        assert_eq!(phases(&log, "prepare").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_false_blocks_run_phase() {
        let log = Log::default();
        let mut failing = Recorder::new("b", &log);
        failing.initialized = Some(false);
        let kernel = kernel_with(vec![Recorder::new("a", &log), failing]);
        kernel.load_modules(&ModuleSelector::All);

        assert_eq!(kernel.run().await, Err(StartupError::NotInitialized));
        assert!(!kernel.has_run());
        assert!(phases(&log, "run").is_empty());
        assert_eq!(phases(&log, "init").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_false_skips_init() {
        let log = Log::default();
        let mut failing = Recorder::new("a", &log);
        failing.prepared = Some(false);
        let kernel = kernel_with(vec![failing]);
        kernel.load_modules(&ModuleSelector::All);

        assert_eq!(kernel.run().await, Err(StartupError::NotPrepared));
        assert!(phases(&log, "init").is_empty());
        assert!(phases(&log, "run").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_no_modules() {
        let kernel = Kernel::new(ModuleRegistry::new(), props());
        assert_eq!(kernel.run().await, Ok(()));
    }

    // ── Loading ────────────────────────────────────────────────

    #[test]
    fn test_double_load_returns_same_descriptor() {
        let log = Log::default();
        let kernel = kernel_with(vec![Recorder::new("memo", &log)]);
        let registered = Arc::new(Mutex::new(Vec::new()));
        {
            let registered = registered.clone();
            kernel
                .bus()
                .subscribe(topics::MODULE_REGISTER, move |env| {
                    registered.lock().push(env.args[0].clone());
                    Ok(())
                })
                .unwrap();
        }

        let first = kernel.load_module("memo").unwrap();
        let second = kernel.load_module("MEMO").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let registered = registered.lock();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0]["name"], "memo");
        assert_eq!(registered[0]["path"], "test::memo");
    }

    #[test]
    fn test_unknown_module_is_not_loaded() {
        let kernel = Kernel::new(ModuleRegistry::new(), props());
        assert!(kernel.load_module("ghost").is_none());
        assert!(!kernel.is_loaded_module("ghost"));
    }

    #[test]
    fn test_failed_construction_is_skipped() {
        let log = Log::default();
        let good = Recorder::new("good", &log);
        let registry = ModuleRegistry::new()
            .with(
                "broken",
                "test::broken",
                ModuleDefinition::factory(|_ctx| -> mirkobot_core::Result<Recorder> {
                    Err(MirkobotError::module("broken", "missing credentials"))
                }),
            )
            .with(
                "panicky",
                "test::panicky",
                ModuleDefinition::callable(|_ctx| panic!("constructor exploded")),
            )
            .with("good", "test::good", ModuleDefinition::instance(Arc::new(good)));
        let kernel = Kernel::new(registry, props());

        let loaded = kernel.load_modules(&ModuleSelector::All);
        assert_eq!(loaded, vec!["good".to_string()]);
        assert_eq!(kernel.module_names(), vec!["good".to_string()]);
    }

    #[test]
    fn test_definition_variants() {
        let log = Log::default();
        let seen_name = Arc::new(Mutex::new(String::new()));
        let seen = seen_name.clone();
        let registry = ModuleRegistry::new()
            .with("plain", "test::plain", ModuleDefinition::value(json!({"motd": "hi"})))
            .with(
                "built",
                "test::built",
                ModuleDefinition::factory(move |ctx| {
                    *seen.lock() = ctx.name().to_string();
                    Ok(Recorder::new("built", &log))
                }),
            )
            .with(
                "called",
                "test::called",
                ModuleDefinition::callable(|_ctx| Ok(ModuleInstance::Value(json!(42)))),
            );
        let kernel = Kernel::new(registry, props());
        kernel.load_modules(&ModuleSelector::All);

        assert_eq!(*seen_name.lock(), "built");
        assert_eq!(kernel.descriptor("plain").unwrap().instance.kind(), "value");
        assert_eq!(kernel.descriptor("built").unwrap().instance.kind(), "module");
        assert_eq!(kernel.descriptor("called").unwrap().to_value()["value"], 42);

        let results = kernel.execute(Phase::Run, &[]);
        assert_eq!(results.len(), 3);
        assert_eq!(results["plain"], None);
        assert_eq!(results["called"], None);
        assert_eq!(results["built"], Some(json!("running")));
    }

    #[test]
    fn test_selector_limits_loaded_modules() {
        let log = Log::default();
        let kernel = kernel_with(vec![
            Recorder::new("a", &log),
            Recorder::new("b", &log),
            Recorder::new("c", &log),
        ]);
        let loaded = kernel.load_modules(&ModuleSelector::Only(vec!["C".into(), "a".into()]));
        assert_eq!(loaded, vec!["a".to_string(), "c".to_string()]);
        assert!(!kernel.is_loaded_module("b"));
    }

    #[test]
    fn test_context_exposes_kernel_and_properties() {
        let captured: Arc<Mutex<Option<ModuleContext>>> = Arc::default();
        let slot = captured.clone();
        let log = Log::default();
        let registry = ModuleRegistry::new().with(
            "recorder",
            "test::recorder",
            ModuleDefinition::factory(move |ctx| {
                *slot.lock() = Some(ctx);
                Ok(Recorder::new("recorder", &log))
            }),
        );
        let mut config = MirkobotConfig::default();
        config.token = Some("secret".into());
        let kernel = Kernel::new(registry, Properties::from_config(config));
        kernel.load_module("recorder").unwrap();

        let ctx = captured.lock().clone().unwrap();
        assert_eq!(ctx.property("token"), Some(json!("secret")));
        assert_eq!(ctx.property_or("memo:limit", 3u32), 3);
        let upgraded = ctx.kernel().unwrap();
        assert!(upgraded.is_loaded_module("recorder"));
    }

    #[test]
    fn test_with_module_downcasts() {
        let log = Log::default();
        let kernel = kernel_with(vec![Recorder::new("memo", &log)]);
        kernel.load_module("memo");
        let name = kernel.with_module::<Recorder, _>("memo", |p| p.name.clone());
        assert_eq!(name.as_deref(), Some("memo"));
        assert!(kernel.with_module::<String, _>("memo", |_| ()).is_none());
    }

    // ── Ordering ───────────────────────────────────────────────

    #[test]
    fn test_execute_visits_dependencies_first() {
        let log = Log::default();
        let mut alpha = Recorder::new("alpha", &log);
        alpha.deps = vec!["Zeta".into(), "missing".into()];
        let kernel = kernel_with(vec![alpha, Recorder::new("mid", &log), Recorder::new("zeta", &log)]);
        kernel.load_modules(&ModuleSelector::All);

        kernel.execute(Phase::Prepare, &[]);
        assert_eq!(
            phases(&log, "prepare"),
            vec!["prepare:zeta", "prepare:alpha", "prepare:mid"]
        );

        kernel.stop();
        assert_eq!(phases(&log, "stop"), vec!["stop:mid", "stop:alpha", "stop:zeta"]);
    }

    #[test]
    fn test_dependency_cycle_still_visits_everything() {
        let log = Log::default();
        let mut a = Recorder::new("a", &log);
        a.deps = vec!["b".into()];
        let mut b = Recorder::new("b", &log);
        b.deps = vec!["a".into()];
        let kernel = kernel_with(vec![a, b]);
        kernel.load_modules(&ModuleSelector::All);

        let results = kernel.execute(Phase::Prepare, &[]);
        assert_eq!(results.len(), 2);
        assert_eq!(phases(&log, "prepare").len(), 2);
    }

    #[test]
    fn test_panicking_phase_reports_false() {
        struct Grenade;
        impl Module for Grenade {
            fn is_prepared(&self) -> PhaseResult {
                panic!("boom");
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }
        let registry =
            ModuleRegistry::new().with("grenade", "test", ModuleDefinition::instance(Arc::new(Grenade)));
        let kernel = Kernel::new(registry, props());
        kernel.load_modules(&ModuleSelector::All);
        assert!(!kernel.is_prepared());
    }

    // ── Readiness ──────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_for_readiness_poll() {
        let log = Log::default();
        let recorder = Recorder::new("slow", &log);
        recorder.ready.store(false, Ordering::SeqCst);
        let ready = recorder.ready.clone();
        let kernel = kernel_with(vec![recorder]);
        kernel.load_modules(&ModuleSelector::All);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            ready.store(true, Ordering::SeqCst);
        });

        let start = tokio::time::Instant::now();
        assert_eq!(kernel.run().await, Ok(()));
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(phases(&log, "run"), vec!["run:slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_signal_wakes_run_early() {
        let log = Log::default();
        let ready = Arc::new(AtomicBool::new(false));
        let signal: Arc<Mutex<Option<ReadinessSignal>>> = Arc::default();
        let registry = {
            let ready = ready.clone();
            let signal = signal.clone();
            ModuleRegistry::new().with(
                "slow",
                "test::slow",
                ModuleDefinition::factory(move |ctx| {
                    *signal.lock() = Some(ctx.readiness().clone());
                    let mut recorder = Recorder::new("slow", &log);
                    recorder.ready = ready.clone();
                    Ok(recorder)
                }),
            )
        };
        let mut config = MirkobotConfig::default();
        config.kernel.ready_poll_ms = 60_000;
        let kernel = Kernel::new(registry, Properties::from_config(config));
        kernel.load_modules(&ModuleSelector::All);

        let signal = signal.lock().clone().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            ready.store(true, Ordering::SeqCst);
            signal.notify();
        });

        let start = tokio::time::Instant::now();
        assert_eq!(kernel.run().await, Ok(()));
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_timeout() {
        let log = Log::default();
        let recorder = Recorder::new("stuck", &log);
        recorder.ready.store(false, Ordering::SeqCst);
        let mut registry = ModuleRegistry::new();
        registry.register("stuck", "test", ModuleDefinition::instance(Arc::new(recorder)));
        let mut config = MirkobotConfig::default();
        config.kernel.ready_timeout_secs = 2;
        let kernel = Kernel::new(registry, Properties::from_config(config));
        kernel.load_modules(&ModuleSelector::All);

        assert_eq!(
            kernel.run().await,
            Err(StartupError::ReadinessTimeout(Duration::from_secs(2)))
        );
        assert!(phases(&log, "run").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_run() {
        let log = Log::default();
        let recorder = Recorder::new("stuck", &log);
        recorder.ready.store(false, Ordering::SeqCst);
        let kernel = kernel_with(vec![recorder]);
        kernel.load_modules(&ModuleSelector::All);

        let runner = {
            let kernel = kernel.clone();
            tokio::spawn(async move { kernel.run().await })
        };
        tokio::time::sleep(Duration::from_secs(3)).await;
        kernel.stop();

        assert_eq!(runner.await.unwrap(), Err(StartupError::Cancelled));
        assert!(phases(&log, "run").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_poison_later_run() {
        let log = Log::default();
        let recorder = Recorder::new("slow", &log);
        let ready = recorder.ready.clone();
        ready.store(false, Ordering::SeqCst);
        let kernel = kernel_with(vec![recorder]);
        kernel.load_modules(&ModuleSelector::All);

        let runner = {
            let kernel = kernel.clone();
            tokio::spawn(async move { kernel.run().await })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        kernel.cancel();
        assert_eq!(runner.await.unwrap(), Err(StartupError::Cancelled));

        ready.store(true, Ordering::SeqCst);
        assert_eq!(kernel.run().await, Ok(()));
        assert_eq!(phases(&log, "run"), vec!["run:slow".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_ready_after_run_ignores_modules() {
        let log = Log::default();
        let recorder = Recorder::new("flaky", &log);
        let ready = recorder.ready.clone();
        let kernel = kernel_with(vec![recorder]);
        kernel.load_modules(&ModuleSelector::All);
        kernel.run().await.unwrap();

        ready.store(false, Ordering::SeqCst);
        assert!(kernel.is_ready());
    }

    // ── Stop ───────────────────────────────────────────────────

    #[test]
    fn test_stop_is_idempotent() {
        let log = Log::default();
        let kernel = kernel_with(vec![Recorder::new("a", &log)]);
        kernel.load_modules(&ModuleSelector::All);

        let counter = AtomicUsize::new(0);
        let first = kernel.stop();
        counter.fetch_add(first.len(), Ordering::SeqCst);
        let second = kernel.stop();
        counter.fetch_add(second.len(), Ordering::SeqCst);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(phases(&log, "stop"), vec!["stop:a"]);
    }

    #[test]
    fn test_phase_names_roundtrip() {
        for phase in [
            Phase::Prepare,
            Phase::IsPrepared,
            Phase::Init,
            Phase::IsInitialized,
            Phase::IsReady,
            Phase::Run,
            Phase::Stop,
        ] {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert!("explode".parse::<Phase>().is_err());
    }
}
