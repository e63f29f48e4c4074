// End-to-end dispatches against the in-process mock driver.

#[cfg(feature = "mock")]
mod mock_tests {
    use gpu_compute::backend::mock_driver::{ArtifactKind, MockDriver, MockFaults};
    use gpu_compute::driver::AdapterLimits;
    use gpu_compute::{kernels, ComputeComponent, ComputeConfig, ComputeError, DispatchStage};
    use std::sync::Arc;
    use std::time::Duration;

    fn quiet() -> ComputeConfig {
        ComputeConfig { poll_interval: Duration::from_millis(1), install_log_sink: false, ..ComputeConfig::default() }
    }

    fn setup_with(driver: MockDriver, config: ComputeConfig) -> (Arc<MockDriver>, ComputeComponent<MockDriver>) {
        let driver = Arc::new(driver.with_bundled_emulations());
        (Arc::clone(&driver), ComputeComponent::new(driver, config))
    }

    fn setup() -> (Arc<MockDriver>, ComputeComponent<MockDriver>) {
        setup_with(MockDriver::new(), quiet())
    }

    fn faulty(faults: MockFaults) -> (Arc<MockDriver>, ComputeComponent<MockDriver>) {
        setup_with(MockDriver::new().with_faults(faults), quiet())
    }

    fn assert_nothing_leaked(driver: &MockDriver, compute: &ComputeComponent<MockDriver>) {
        assert_eq!(driver.ledger().live_dispatch_artifacts(), 0, "dispatch artifacts still alive");
        let report = compute.last_report().expect("a dispatch ran");
        assert!(report.is_balanced(), "unbalanced report: {report:?}");
        assert_eq!(report.trace.last(), Some(&DispatchStage::Released));
    }

    #[test]
    fn doubles_each_element() {
        let (driver, mut compute) = setup();
        compute.startup().unwrap();
        assert_eq!(compute.run_dispatch(kernels::DOUBLE, &[1, 2, 3, 4]), vec![2, 4, 6, 8]);
        assert_nothing_leaked(&driver, &compute);
        assert_eq!(compute.last_report().unwrap().final_stage(), DispatchStage::Complete);
    }

    #[test]
    fn collatz_demo_counts_steps() {
        let (_, mut compute) = setup();
        assert_eq!(compute.try_dispatch(kernels::COLLATZ, &[1, 2, 3, 4]).unwrap(), vec![0, 1, 7, 2]);
    }

    #[test]
    fn output_has_input_length() {
        let (_, mut compute) = setup();
        for len in [1_usize, 2, 7, 64] {
            let input: Vec<i32> = (0..).take(len).collect();
            assert_eq!(compute.run_dispatch(kernels::SQUARE, &input).len(), len);
        }
    }

    #[test]
    fn malformed_kernel_returns_empty_and_allocates_nothing() {
        let (driver, mut compute) = setup();
        compute.startup().unwrap();
        assert!(compute.run_dispatch("@compute fn main( {", &[1, 2, 3]).is_empty());

        assert_nothing_leaked(&driver, &compute);
        assert_eq!(driver.ledger().created(ArtifactKind::Buffer), 0);
        assert_eq!(driver.ledger().created(ArtifactKind::ComputePipeline), 0);
        let report = compute.last_report().unwrap();
        assert_eq!(report.final_stage(), DispatchStage::CompileFailed);
        assert!(!report.reached(DispatchStage::Allocating));
    }

    #[test]
    fn malformed_kernel_is_a_compilation_error() {
        let (_, mut compute) = setup();
        let result = compute.try_dispatch("fn main( {", &[1]);
        assert!(matches!(result, Err(ComputeError::Compilation { .. })), "got {result:?}");
    }

    #[test]
    fn incompatible_layout_releases_module_and_buffers() {
        let (driver, mut compute) = setup();
        compute.startup().unwrap();
        let result = compute.try_dispatch(kernels::BAD_BINDING, &[1, 2, 3, 4]);
        assert!(matches!(result, Err(ComputeError::Binding(_))), "got {result:?}");

        assert_nothing_leaked(&driver, &compute);
        assert_eq!(driver.ledger().created(ArtifactKind::Buffer), 2);
        assert_eq!(driver.ledger().released(ArtifactKind::ShaderModule), 1);
        assert_eq!(compute.last_report().unwrap().final_stage(), DispatchStage::Binding);
    }

    #[test]
    fn sequential_dispatches_do_not_share_state() {
        let (driver, mut compute) = setup();
        compute.startup().unwrap();
        assert_eq!(compute.run_dispatch(kernels::DOUBLE, &[1, 2, 3, 4]), vec![2, 4, 6, 8]);
        assert_eq!(driver.ledger().live(ArtifactKind::Buffer), 0);
        assert_eq!(compute.run_dispatch(kernels::SQUARE, &[1, 2, 3, 4]), vec![1, 4, 9, 16]);
        assert_eq!(driver.ledger().created(ArtifactKind::Buffer), 4);
        assert_nothing_leaked(&driver, &compute);
    }

    #[test]
    fn lazy_startup_matches_explicit_startup() {
        let (_, mut explicit) = setup();
        explicit.startup().unwrap();
        let expected = explicit.run_dispatch(kernels::DOUBLE, &[5, -6, 7]);

        let (driver, mut lazy) = setup();
        assert!(!lazy.has_started());
        assert_eq!(lazy.run_dispatch(kernels::DOUBLE, &[5, -6, 7]), expected);
        assert!(lazy.has_started());
        assert_eq!(driver.ledger().created(ArtifactKind::Device), 1);
    }

    #[test]
    fn lifecycle_calls_are_idempotent() {
        let (driver, mut compute) = setup();
        compute.shutdown();
        compute.startup().unwrap();
        compute.startup().unwrap();
        assert_eq!(driver.ledger().created(ArtifactKind::Instance), 1);
        compute.shutdown();
        compute.shutdown();
        assert!(!compute.has_started());
        for kind in [ArtifactKind::Instance, ArtifactKind::Adapter, ArtifactKind::Device, ArtifactKind::Queue] {
            assert_eq!(driver.ledger().live(kind), 0, "{kind:?}");
        }
    }

    #[test]
    fn artifacts_are_released_in_reverse_creation_order() {
        let (driver, mut compute) = setup();
        compute.startup().unwrap();
        driver.ledger().clear_release_log();
        compute.try_dispatch(kernels::DOUBLE, &[1]).unwrap();
        assert_eq!(
            driver.ledger().release_log(),
            vec![
                // consumed by finish and submit
                ArtifactKind::CommandEncoder,
                ArtifactKind::CommandBuffer,
                ArtifactKind::BindGroup,
                ArtifactKind::BindGroupLayout,
                ArtifactKind::ComputePipeline,
                ArtifactKind::Buffer,
                ArtifactKind::Buffer,
                ArtifactKind::ShaderModule,
            ]
        );
        let report = compute.last_report().unwrap();
        assert_eq!(report.artifacts_created, 9);
        assert_eq!(
            report.trace,
            vec![
                DispatchStage::Idle,
                DispatchStage::Compiling,
                DispatchStage::Compiled,
                DispatchStage::Allocating,
                DispatchStage::Binding,
                DispatchStage::Encoding,
                DispatchStage::Submitted,
                DispatchStage::Mapping,
                DispatchStage::Complete,
                DispatchStage::Released,
            ]
        );
    }

    #[test]
    fn uncaptured_error_fails_compilation_and_is_drained() {
        let (driver, mut compute) = faulty(MockFaults { uncaptured_on_compile: true, ..MockFaults::default() });
        let result = compute.try_dispatch(kernels::DOUBLE, &[1, 2]);
        assert!(
            matches!(&result, Err(ComputeError::Compilation { message }) if message.contains("crashed")),
            "got {result:?}"
        );
        assert!(!compute.session().error_sink().is_raised());
        assert_nothing_leaked(&driver, &compute);

        driver.set_faults(MockFaults::default());
        assert_eq!(compute.try_dispatch(kernels::DOUBLE, &[1, 2]).unwrap(), vec![2, 4]);
        assert_eq!(compute.session().error_sink().total(), 1);
    }

    #[test]
    fn null_module_without_error_is_reported_distinctly() {
        let (driver, mut compute) = faulty(MockFaults { null_module: true, ..MockFaults::default() });
        let result = compute.try_dispatch(kernels::DOUBLE, &[1]);
        assert!(matches!(result, Err(ComputeError::ModuleMissing)), "got {result:?}");
        assert_nothing_leaked(&driver, &compute);
        assert_eq!(compute.last_report().unwrap().artifacts_created, 0);
    }

    #[test]
    fn buffer_creation_failure_releases_module() {
        let (driver, mut compute) = faulty(MockFaults { no_buffers: true, ..MockFaults::default() });
        let result = compute.try_dispatch(kernels::DOUBLE, &[1, 2]);
        assert!(matches!(result, Err(ComputeError::BufferCreation(_))), "got {result:?}");
        assert_nothing_leaked(&driver, &compute);
        assert_eq!(driver.ledger().released(ArtifactKind::ShaderModule), 1);
    }

    #[test]
    fn missing_entry_point_is_a_binding_error() {
        let config = ComputeConfig { entry_point: "nope".to_owned(), ..quiet() };
        let (driver, mut compute) = setup_with(MockDriver::new(), config);
        let result = compute.try_dispatch(kernels::DOUBLE, &[1]);
        assert!(
            matches!(&result, Err(ComputeError::Binding(message)) if message.contains("nope")),
            "got {result:?}"
        );
        assert_nothing_leaked(&driver, &compute);
    }

    #[test]
    fn map_error_is_reported_and_artifacts_released() {
        let (driver, mut compute) = faulty(MockFaults { map_error: true, ..MockFaults::default() });
        let result = compute.try_dispatch(kernels::DOUBLE, &[1, 2]);
        assert!(matches!(result, Err(ComputeError::Map(_))), "got {result:?}");
        assert_eq!(compute.last_report().unwrap().final_stage(), DispatchStage::MapFailed);
        assert_nothing_leaked(&driver, &compute);
    }

    #[test]
    fn stalled_map_times_out() {
        let config = ComputeConfig { timeout: Some(Duration::from_millis(50)), ..quiet() };
        let (driver, mut compute) =
            setup_with(MockDriver::new().with_faults(MockFaults { stall_map: true, ..MockFaults::default() }), config);
        let result = compute.try_dispatch(kernels::DOUBLE, &[1, 2]);
        assert!(matches!(result, Err(ComputeError::Timeout { operation: "buffer map", .. })), "got {result:?}");
        assert_nothing_leaked(&driver, &compute);
    }

    #[test]
    fn callbacks_from_another_thread_are_awaited() {
        let (_, mut compute) =
            faulty(MockFaults { callback_latency: Some(Duration::from_millis(15)), ..MockFaults::default() });
        assert_eq!(compute.try_dispatch(kernels::DOUBLE, &[3]).unwrap(), vec![6]);
    }

    #[test]
    fn missing_queue_fails_every_dispatch() {
        let (driver, mut compute) = faulty(MockFaults { no_queue: true, ..MockFaults::default() });
        assert!(compute.run_dispatch(kernels::DOUBLE, &[1]).is_empty());
        assert!(compute.has_started(), "partial session keeps its instance");
        let result = compute.try_dispatch(kernels::DOUBLE, &[1]);
        assert!(matches!(result, Err(ComputeError::SessionUnavailable)), "got {result:?}");
        assert_eq!(driver.ledger().created(ArtifactKind::ShaderModule), 0);

        compute.shutdown();
        assert_eq!(driver.ledger().live(ArtifactKind::Device), 0);
    }

    #[test]
    fn missing_adapter_is_reported() {
        let (_, mut compute) = faulty(MockFaults { no_adapter: true, ..MockFaults::default() });
        assert!(matches!(compute.startup(), Err(ComputeError::AdapterUnavailable(_))));
    }

    #[test]
    fn startup_can_be_retried_once_the_adapter_appears() {
        let (driver, mut compute) = faulty(MockFaults { no_adapter: true, ..MockFaults::default() });
        assert!(matches!(compute.startup(), Err(ComputeError::AdapterUnavailable(_))));

        driver.set_faults(MockFaults::default());
        compute.startup().unwrap();
        assert_eq!(compute.try_dispatch(kernels::DOUBLE, &[3, 4]).unwrap(), vec![6, 8]);
        assert_nothing_leaked(&driver, &compute);
    }

    #[test]
    fn input_beyond_buffer_limit_is_rejected_up_front() {
        let limits =
            AdapterLimits { max_buffer_size: 16, max_storage_buffer_binding_size: 16, ..MockDriver::new().limits() };
        let (driver, mut compute) = setup_with(MockDriver::new().with_limits(limits), quiet());
        let result = compute.try_dispatch(kernels::DOUBLE, &[1, 2, 3, 4, 5]);
        assert!(matches!(result, Err(ComputeError::InputTooLarge { bytes: 20, limit: 16 })), "got {result:?}");
        assert_eq!(driver.ledger().created(ArtifactKind::ShaderModule), 0);
        assert_eq!(compute.try_dispatch(kernels::DOUBLE, &[1, 2, 3, 4]).unwrap(), vec![2, 4, 6, 8]);
    }

    #[test]
    fn input_beyond_workgroup_limit_is_rejected_up_front() {
        let (driver, mut compute) = setup();
        let input = vec![1; 70_000];
        let result = compute.try_dispatch(kernels::DOUBLE, &input);
        assert!(
            matches!(result, Err(ComputeError::TooManyWorkgroups { elements: 70_000, limit: 65_535 })),
            "got {result:?}"
        );
        assert_eq!(driver.ledger().created(ArtifactKind::ShaderModule), 0);
        assert!(compute.last_report().is_some_and(|r| r.artifacts_created == 0 && r.is_balanced()));
    }

    #[test]
    fn lowered_workgroup_limit_caps_input_length() {
        let limits = AdapterLimits { max_compute_workgroups_per_dimension: 4, ..MockDriver::new().limits() };
        let (_, mut compute) = setup_with(MockDriver::new().with_limits(limits), quiet());
        assert_eq!(compute.try_dispatch(kernels::DOUBLE, &[1, 2, 3, 4]).unwrap(), vec![2, 4, 6, 8]);
        let result = compute.try_dispatch(kernels::DOUBLE, &[1, 2, 3, 4, 5]);
        assert!(matches!(result, Err(ComputeError::TooManyWorkgroups { elements: 5, limit: 4 })), "got {result:?}");
    }

    #[test]
    fn kernel_without_emulation_leaves_values_unchanged() {
        let (_, mut compute) = setup();
        let identity = r"
            @group(0) @binding(0) var<storage, read_write> values: array<i32>;
            @compute @workgroup_size(1)
            fn main(@builtin(global_invocation_id) id: vec3<u32>) { values[id.x] = values[id.x]; }
        ";
        assert_eq!(compute.try_dispatch(identity, &[9, 8, 7]).unwrap(), vec![9, 8, 7]);
    }
}
