//! Binding slots every dispatched kernel is expected to declare.

pub const BIND_GROUP: u32 = 0;
pub const STORAGE_IO: u32 = 0; // read_write, used as both input and output

/// Size of one element as it travels to and from the GPU.
pub const ELEMENT_SIZE: u64 = std::mem::size_of::<i32>() as u64;

/// Workgroups dispatched along X are one per element; kernels use `@workgroup_size(1)`.
pub const WORKGROUP_SIZE_X: u32 = 1;

const _: () = assert!(ELEMENT_SIZE == 4);

/// Byte length of a buffer holding `elements` values.
#[must_use]
pub const fn byte_size(elements: usize) -> u64 {
    elements as u64 * ELEMENT_SIZE
}

/// Workgroup counts for a one-dimensional dispatch over `elements` values.
#[must_use]
pub fn workgroups_for(elements: usize) -> Option<[u32; 3]> {
    let x = u32::try_from(elements).ok()?.div_ceil(WORKGROUP_SIZE_X);
    Some([x, 1, 1])
}
