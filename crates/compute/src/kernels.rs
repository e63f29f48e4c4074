//! Kernels shipped with the crate, and host versions of what they compute.

/// Collatz step counts over `u32` values, as in the built-in demo.
pub const COLLATZ: &str = include_str!("../../../shaders/collatz.wgsl");
pub const DOUBLE: &str = include_str!("../../../shaders/double.wgsl");
pub const SQUARE: &str = include_str!("../../../shaders/square.wgsl");
/// Declares two bindings; never binds under the single-buffer model.
pub const BAD_BINDING: &str = include_str!("../../../shaders/bad_binding.wgsl");

/// Looks a bundled kernel up by file stem.
#[must_use]
pub fn by_name(name: &str) -> Option<&'static str> {
    match name {
        "collatz" => Some(COLLATZ),
        "double" => Some(DOUBLE),
        "square" => Some(SQUARE),
        "bad_binding" => Some(BAD_BINDING),
        _ => None,
    }
}

/// Number of Collatz steps from `start` to 1, or `u32::MAX` if a step would overflow.
#[must_use]
pub fn collatz_iterations(start: u32) -> u32 {
    let mut n = start;
    let mut steps = 0;
    while n > 1 {
        if n % 2 == 0 {
            n /= 2;
        } else if n >= 0x5555_5555 {
            return u32::MAX;
        } else {
            n = 3 * n + 1;
        }
        steps += 1;
    }
    steps
}

pub type HostKernelFn = fn(i32) -> i32;

fn double_value(x: i32) -> i32 {
    x.wrapping_mul(2)
}

fn square_value(x: i32) -> i32 {
    x.wrapping_mul(x)
}

fn collatz_value(x: i32) -> i32 {
    bytemuck::cast(collatz_iterations(bytemuck::cast(x)))
}

/// Host equivalents keyed by the WGSL helper each bundled kernel declares.
#[must_use]
pub fn host_emulations() -> Vec<(&'static str, HostKernelFn)> {
    let table: [(&'static str, HostKernelFn); 3] = [
        ("double_value", double_value),
        ("square_value", square_value),
        ("collatz_iterations", collatz_value),
    ];
    table.to_vec()
}
