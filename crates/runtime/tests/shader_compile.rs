use std::fs;
use std::path::Path;

// Parses and validates a WGSL file with naga, returning the module.
fn validate_wgsl_shader(shader_path_str: &str) -> naga::Module {
    let shader_path = Path::new(shader_path_str);
    let shader_source = match fs::read_to_string(shader_path) {
        Ok(s) => s,
        Err(e) => panic!("Failed to read shader file {shader_path:?}: {e}"),
    };

    let module = match naga::front::wgsl::parse_str(&shader_source) {
        Ok(m) => m,
        Err(e) => {
            panic!(
                "WGSL parsing error in {shader_path:?}:\n{error_report}",
                error_report = e.emit_to_string(&shader_source)
            );
        }
    };

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );

    match validator.validate(&module) {
        Ok(_) => println!("Successfully parsed and validated {shader_path:?}"),
        Err(e) => {
            panic!(
                "WGSL validation error in {shader_path:?}:\n{error_report}",
                error_report = e.emit_to_string(&shader_source)
            );
        }
    }
    module
}

// (group, binding, read_write) for every resource the module declares.
fn storage_bindings(module: &naga::Module) -> Vec<(u32, u32, bool)> {
    module
        .global_variables
        .iter()
        .filter_map(|(_, global)| {
            let binding = global.binding.as_ref()?;
            let read_write = matches!(
                global.space,
                naga::AddressSpace::Storage { access } if access.contains(naga::StorageAccess::STORE)
            );
            Some((binding.group, binding.binding, read_write))
        })
        .collect()
}

fn assert_dispatchable(name: &str) {
    let module = validate_wgsl_shader(&format!("../../shaders/{name}.wgsl"));
    assert_eq!(storage_bindings(&module), vec![(0, 0, true)], "{name} must declare one read_write buffer at 0/0");

    let main = module.entry_points.iter().find(|ep| ep.name == "main").expect("entry point `main`");
    assert_eq!(main.stage, naga::ShaderStage::Compute);
    assert_eq!(main.workgroup_size, [1, 1, 1]);

    let bundled = gpu_compute::kernels::by_name(name).expect("bundled kernel");
    assert_eq!(bundled, fs::read_to_string(format!("../../shaders/{name}.wgsl")).unwrap());
}

#[test]
fn validate_collatz_shader_compiles() {
    assert_dispatchable("collatz");
}

#[test]
fn validate_double_shader_compiles() {
    assert_dispatchable("double");
}

#[test]
fn validate_square_shader_compiles() {
    assert_dispatchable("square");
}

#[test]
fn validate_bad_binding_shader_compiles_but_declares_two_bindings() {
    let module = validate_wgsl_shader("../../shaders/bad_binding.wgsl");
    assert_eq!(storage_bindings(&module), vec![(0, 0, false), (0, 1, true)]);
}
