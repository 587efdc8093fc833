//! Host kernel ABI.

use std::ops::Range;
use std::sync::Arc;

use super::buffer::HostBuffer;

/// Native implementation of a kernel, run once per workgroup.
///
/// The function iterates the lanes of its workgroup itself (see
/// [`WorkGroup::global_ids`]); this lets a kernel keep workgroup-local
/// scratch in ordinary locals the way a GPU kernel keeps it in shared memory.
pub type HostKernel = fn(&WorkGroup<'_>);

/// An argument bound to a host dispatch.
#[derive(Debug, Clone)]
pub(crate) enum HostArg {
    Buffer(Arc<HostBuffer>),
    U32(u32),
    I32(i32),
    F32(f32),
}

/// View of one workgroup of a host dispatch.
pub struct WorkGroup<'a> {
    pub(crate) group_id: usize,
    pub(crate) local_size: usize,
    pub(crate) num_groups: usize,
    pub(crate) args: &'a [HostArg],
}

impl WorkGroup<'_> {
    /// Index of this workgroup in the dispatch.
    pub fn group_id(&self) -> usize {
        self.group_id
    }

    /// Number of lanes per workgroup.
    pub fn local_size(&self) -> usize {
        self.local_size
    }

    /// Number of workgroups in the dispatch.
    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    /// Total number of lanes in the dispatch (rounded up to whole groups).
    pub fn global_size(&self) -> usize {
        self.num_groups * self.local_size
    }

    /// Global lane indices covered by this workgroup.
    ///
    /// Like a GPU dispatch the last group may run past the logical problem
    /// size; kernels bound-check against their own count argument.
    pub fn global_ids(&self) -> Range<usize> {
        let start = self.group_id * self.local_size;
        start..start + self.local_size
    }

    /// Buffer bound at argument `index`.
    pub fn buffer(&self, index: usize) -> &HostBuffer {
        match &self.args[index] {
            HostArg::Buffer(buffer) => buffer,
            other => unreachable!("argument {index} is not a buffer: {other:?}"),
        }
    }

    /// Unsigned scalar bound at argument `index`.
    pub fn u32(&self, index: usize) -> u32 {
        match self.args[index] {
            HostArg::U32(v) => v,
            HostArg::I32(v) => v as u32,
            ref other => unreachable!("argument {index} is not an integer: {other:?}"),
        }
    }

    /// Signed scalar bound at argument `index`.
    pub fn i32(&self, index: usize) -> i32 {
        match self.args[index] {
            HostArg::I32(v) => v,
            HostArg::U32(v) => v as i32,
            ref other => unreachable!("argument {index} is not an integer: {other:?}"),
        }
    }

    /// Float scalar bound at argument `index`.
    pub fn f32(&self, index: usize) -> f32 {
        match self.args[index] {
            HostArg::F32(v) => v,
            ref other => unreachable!("argument {index} is not a float: {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroup_ranges() {
        let args = [HostArg::U32(7), HostArg::F32(0.5)];
        let group = WorkGroup {
            group_id: 2,
            local_size: 64,
            num_groups: 3,
            args: &args,
        };
        assert_eq!(group.global_ids(), 128..192);
        assert_eq!(group.global_size(), 192);
        assert_eq!(group.u32(0), 7);
        assert_eq!(group.f32(1), 0.5);
    }
}
