// Golden-master checks of the wgpu driver against the host versions of the
// bundled kernels. Each test returns early when no adapter is available.

#[cfg(feature = "gpu")]
mod wgpu_tests {
    use gpu_compute::driver::{BufferRole, BufferSpec, ComputeDriver, DeviceRequest, PowerPreference};
    use gpu_compute::{kernels, ComputeComponent, ComputeConfig, ComputeError, WgpuDriver};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    fn component() -> Option<ComputeComponent<WgpuDriver>> {
        let config = ComputeConfig { install_log_sink: false, ..ComputeConfig::default() };
        let mut compute = ComputeComponent::new(Arc::new(WgpuDriver::new()), config);
        match compute.startup() {
            Ok(()) => Some(compute),
            Err(e) => {
                eprintln!("skipping: no usable adapter ({e})");
                None
            }
        }
    }

    fn run_kernel_test(source: &str, input: &[i32], host: impl Fn(i32) -> i32) {
        let Some(mut compute) = component() else { return };
        let expected: Vec<i32> = input.iter().copied().map(host).collect();
        let actual = compute.try_dispatch(source, input).unwrap();
        assert_eq!(expected, actual);
        assert!(compute.last_report().unwrap().is_balanced());
    }

    #[test]
    fn test_double_kernel() {
        run_kernel_test(kernels::DOUBLE, &[1, 2, 3, 4], |x| x * 2);
    }

    #[test]
    fn test_square_kernel() {
        run_kernel_test(kernels::SQUARE, &[-3, 0, 5, 11, 12], |x| x * x);
    }

    #[test]
    fn test_collatz_kernel() {
        run_kernel_test(kernels::COLLATZ, &[1, 2, 3, 4, 27], |x| {
            bytemuck::cast(kernels::collatz_iterations(bytemuck::cast(x)))
        });
    }

    #[test]
    fn test_malformed_kernel_is_a_compilation_error() {
        let Some(mut compute) = component() else { return };
        let result = compute.try_dispatch("@compute fn main( {", &[1]);
        assert!(matches!(result, Err(ComputeError::Compilation { .. })), "got {result:?}");
        assert!(!compute.session().error_sink().is_raised());
        assert_eq!(compute.try_dispatch(kernels::DOUBLE, &[5]).unwrap(), vec![10]);
    }

    #[test]
    fn test_bad_binding_is_a_binding_error() {
        let Some(mut compute) = component() else { return };
        let result = compute.try_dispatch(kernels::BAD_BINDING, &[1, 2]);
        assert!(matches!(result, Err(ComputeError::Binding(_))), "got {result:?}");
        assert!(compute.last_report().unwrap().is_balanced());
    }

    #[test]
    fn test_adapter_report_is_populated() {
        let Some(compute) = component() else { return };
        let report = compute.adapter_report().unwrap();
        assert!(report.limits.max_buffer_size > 0);
        assert!(report.limits.max_compute_workgroup_size_x >= 1);
    }

    #[test]
    fn test_staging_buffer_reads_only_while_mapped() {
        let driver = WgpuDriver::new();
        let Some(instance) = driver.create_instance() else { return };
        let (tx, rx) = mpsc::channel();
        driver.request_adapter(&instance, PowerPreference::default(), Box::new(move |r| tx.send(r).unwrap()));
        let Ok(adapter) = rx.recv().unwrap() else {
            eprintln!("skipping: no usable adapter");
            return;
        };
        let (tx, rx) = mpsc::channel();
        let request = DeviceRequest {
            label: "map test",
            on_uncaptured_error: Arc::new(|e: gpu_compute::DriverError| panic!("uncaptured: {e}")),
        };
        driver.request_device(&adapter, request, Box::new(move |r| tx.send(r).unwrap()));
        let device = rx.recv().unwrap().expect("device");

        let staging = driver
            .create_buffer(&device, &BufferSpec { label: "staging", size: 16, role: BufferRole::Staging })
            .unwrap();
        assert!(driver.read_mapped(&staging, 16).is_none());

        let (tx, rx) = mpsc::channel();
        driver.map_read(&staging, 16, Box::new(move |r| tx.send(r).unwrap()));
        let mapped = (0..2000).find_map(|_| {
            driver.poll(&device);
            rx.recv_timeout(Duration::from_millis(1)).ok()
        });
        assert_eq!(mapped, Some(Ok(())));
        assert_eq!(driver.read_mapped(&staging, 16), Some(vec![0; 16]));

        driver.unmap(&staging);
        assert!(driver.read_mapped(&staging, 16).is_none());
    }
}
