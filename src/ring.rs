// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ring-buffered GPU resources.
//!
//! Every mapped buffer cycles through [`BUFFER_RING_SIZE`] slots, one per
//! in-flight frame. A slot becomes writable again only once the frame
//! completion fence recorded against it has signaled. Buffers displaced by
//! a mid-frame resize sit in a purgatory until the frames that may still
//! reference them have completed.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use quill_encoding::gpu::BUFFER_RING_SIZE;
use quill_encoding::MeshBuffer;

/// CPU-side handle for GPU completion of a frame. `wait` blocks until the
/// frame's final submission has finished on the device.
pub struct CompletionFence {
    device: wgpu::Device,
    submission: Mutex<Option<wgpu::SubmissionIndex>>,
}

impl CompletionFence {
    pub(crate) fn new(device: wgpu::Device) -> Self {
        Self {
            device,
            submission: Mutex::new(None),
        }
    }

    pub(crate) fn signal_on(&self, submission: wgpu::SubmissionIndex) {
        *self.submission.lock().unwrap() = Some(submission);
    }

    /// Blocks until the associated submission completes. A fence that was
    /// never attached to a submission is already signaled.
    pub fn wait(&self) {
        let submission = self.submission.lock().unwrap().clone();
        if let Some(submission) = submission {
            let _ = self
                .device
                .poll(wgpu::Maintain::WaitForSubmissionIndex(submission));
        }
    }
}

/// A GPU buffer retired while possibly still referenced by in-flight
/// frames; dropped once `expiration_frame_idx` is reached.
pub(crate) struct PurgatoryResource {
    pub expiration_frame_idx: u64,
    #[allow(dead_code)]
    resource: wgpu::Buffer,
}

#[derive(Default)]
pub(crate) struct ResourcePurgatory {
    resources: VecDeque<PurgatoryResource>,
}

impl ResourcePurgatory {
    pub fn push(&mut self, resource: wgpu::Buffer, current_frame_idx: u64) {
        self.resources.push_back(PurgatoryResource {
            expiration_frame_idx: current_frame_idx + BUFFER_RING_SIZE as u64,
            resource,
        });
    }

    /// Deletes resources no longer referenced by in-flight command
    /// buffers.
    pub fn drain_expired(&mut self, current_frame_idx: u64) {
        while let Some(front) = self.resources.front() {
            if front.expiration_frame_idx > current_frame_idx {
                break;
            }
            self.resources.pop_front();
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.resources.len()
    }
}

/// One ring of device buffers, one slot per in-flight frame. Slots are
/// grown on demand when a flush needs more capacity than the slot's
/// buffer holds.
pub(crate) struct BufferRing {
    label: &'static str,
    usage: wgpu::BufferUsages,
    buffers: [Option<wgpu::Buffer>; BUFFER_RING_SIZE],
    capacities: [u64; BUFFER_RING_SIZE],
    target_size: u64,
}

impl BufferRing {
    pub fn new(label: &'static str, usage: wgpu::BufferUsages) -> Self {
        Self {
            label,
            usage: usage | wgpu::BufferUsages::COPY_DST,
            buffers: [const { None }; BUFFER_RING_SIZE],
            capacities: [0; BUFFER_RING_SIZE],
            target_size: 0,
        }
    }

    /// Requests that the current slot hold at least `size` bytes.
    pub fn require_capacity(&mut self, size: u64) {
        self.target_size = self.target_size.max(size);
    }

    /// Grows the slot's buffer to the ring's target size, retiring any
    /// smaller buffer to the purgatory.
    pub fn synchronize_size_at(
        &mut self,
        device: &wgpu::Device,
        slot: usize,
        purgatory: &mut ResourcePurgatory,
        current_frame_idx: u64,
    ) {
        if self.capacities[slot] >= self.target_size.max(1) {
            return;
        }
        let size = self.target_size.max(1).next_power_of_two();
        log::debug!("resizing buffer ring '{}' slot {slot} to {size} bytes", self.label);
        if let Some(old) = self.buffers[slot].take() {
            purgatory.push(old, current_frame_idx);
        }
        self.buffers[slot] = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(self.label),
            size,
            usage: self.usage,
            mapped_at_creation: false,
        }));
        self.capacities[slot] = size;
    }

    pub fn buffer_at(&self, slot: usize) -> &wgpu::Buffer {
        self.buffers[slot]
            .as_ref()
            .expect("ring slot used before synchronize_size_at")
    }

    /// Writes this flush's bytes into the slot, growing it first when
    /// needed.
    #[allow(clippy::too_many_arguments)]
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        slot: usize,
        offset: u64,
        bytes: &[u8],
        purgatory: &mut ResourcePurgatory,
        current_frame_idx: u64,
    ) {
        if bytes.is_empty() {
            return;
        }
        self.require_capacity(offset + bytes.len() as u64);
        self.synchronize_size_at(device, slot, purgatory, current_frame_idx);
        queue.write_buffer(self.buffer_at(slot), offset, bytes);
    }
}

/// Type of a client-created render buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RenderBufferType {
    Index,
    Vertex,
}

/// Behavior flags for a client-created render buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderBufferFlags(pub u32);

impl RenderBufferFlags {
    pub const NONE: Self = Self(0);
    /// The contents are written once and never remapped.
    pub const MAPPED_ONCE_AT_INITIALIZATION: Self = Self(1 << 0);
}

struct RenderBufferInner {
    buffers: [Option<wgpu::Buffer>; BUFFER_RING_SIZE],
    staging: Vec<u8>,
    /// -1 until the first map.
    slot: isize,
    mapped: bool,
}

/// A mappable vertex or index buffer whose `map` advances a per-buffer
/// ring, so the CPU never scribbles on bytes the GPU is still reading.
pub struct RenderBuffer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffer_type: RenderBufferType,
    flags: RenderBufferFlags,
    size_in_bytes: usize,
    inner: Mutex<RenderBufferInner>,
}

impl RenderBuffer {
    pub(crate) fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        buffer_type: RenderBufferType,
        flags: RenderBufferFlags,
        size_in_bytes: usize,
    ) -> Self {
        Self {
            device,
            queue,
            buffer_type,
            flags,
            size_in_bytes,
            inner: Mutex::new(RenderBufferInner {
                buffers: [const { None }; BUFFER_RING_SIZE],
                staging: vec![0; size_in_bytes],
                slot: -1,
                mapped: false,
            }),
        }
    }

    pub fn buffer_type(&self) -> RenderBufferType {
        self.buffer_type
    }

    pub fn flags(&self) -> RenderBufferFlags {
        self.flags
    }

    /// Maps the next ring slot for writing. The returned guard's contents
    /// upload when it drops.
    pub fn map(&self) -> RenderBufferMap<'_> {
        let mut inner = self.inner.lock().unwrap();
        assert!(!inner.mapped, "render buffer is already mapped");
        inner.slot = (inner.slot + 1) % BUFFER_RING_SIZE as isize;
        inner.mapped = true;
        RenderBufferMap {
            buffer: self,
            inner,
        }
    }

    /// The wgpu buffer for the most recently mapped slot.
    pub(crate) fn front_buffer(&self) -> wgpu::Buffer {
        let inner = self.inner.lock().unwrap();
        assert!(inner.slot >= 0, "map() the buffer before drawing with it");
        inner.buffers[inner.slot as usize]
            .as_ref()
            .expect("mapped slot has a buffer")
            .clone()
    }

    fn unmap(&self, inner: &mut RenderBufferInner) {
        let slot = inner.slot as usize;
        if inner.buffers[slot].is_none() {
            let usage = match self.buffer_type {
                RenderBufferType::Index => wgpu::BufferUsages::INDEX,
                RenderBufferType::Vertex => wgpu::BufferUsages::VERTEX,
            };
            inner.buffers[slot] = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("quill render buffer"),
                size: self.size_in_bytes.max(4) as u64,
                usage: usage | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        self.queue.write_buffer(
            inner.buffers[slot].as_ref().unwrap(),
            0,
            &inner.staging,
        );
        inner.mapped = false;
    }
}

impl MeshBuffer for RenderBuffer {
    fn len_in_bytes(&self) -> usize {
        self.size_in_bytes
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Write guard over a mapped [`RenderBuffer`] slot.
pub struct RenderBufferMap<'a> {
    buffer: &'a RenderBuffer,
    inner: MutexGuard<'a, RenderBufferInner>,
}

impl RenderBufferMap<'_> {
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.inner.staging
    }
}

impl Drop for RenderBufferMap<'_> {
    fn drop(&mut self) {
        self.buffer.unmap(&mut self.inner);
    }
}

/// Downcasts a mesh buffer reference back to the wgpu implementation.
pub(crate) fn as_render_buffer(buffer: &Arc<dyn MeshBuffer>) -> &RenderBuffer {
    buffer
        .as_any()
        .downcast_ref::<RenderBuffer>()
        .expect("mesh buffer from another backend")
}
