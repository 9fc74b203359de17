//! Буфер per-frame репортов от host'а
//!
//! Host (GDScript/XR plugin) пушит meshes и poses по одному за frame,
//! перед tick'ом bridge забирает готовый XrFrame через take_frame().

use super::{DetectedMesh, MeshHandle, Pose, XrFrame};
use std::collections::HashMap;

#[derive(Debug)]
pub struct XrFrameBuilder {
    open: bool,
    sensor_ready: bool,
    meshes: Vec<DetectedMesh>,
    poses: HashMap<MeshHandle, Pose>,
}

impl Default for XrFrameBuilder {
    fn default() -> Self {
        Self {
            open: false,
            sensor_ready: true,
            meshes: Vec::new(),
            poses: HashMap::new(),
        }
    }
}

impl XrFrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Открыть frame (повторный вызов в том же frame сбрасывает накопленное)
    pub fn begin_frame(&mut self) {
        self.open = true;
        self.meshes.clear();
        self.poses.clear();
    }

    pub fn mark_sensor_ready(&mut self, ready: bool) {
        self.sensor_ready = ready;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Повторный report того же handle в frame заменяет предыдущий
    pub fn report_mesh(&mut self, mesh: DetectedMesh) {
        if let Some(existing) = self.meshes.iter_mut().find(|m| m.handle == mesh.handle) {
            *existing = mesh;
        } else {
            self.meshes.push(mesh);
        }
    }

    pub fn report_pose(&mut self, handle: MeshHandle, pose: Pose) {
        self.poses.insert(handle, pose);
    }

    /// None — frame не открывали с прошлого take (нет XR frame в этом tick)
    pub fn take_frame(&mut self) -> Option<XrFrame> {
        if !self.open {
            return None;
        }
        self.open = false;

        let meshes = std::mem::take(&mut self.meshes);
        let poses = std::mem::take(&mut self.poses);

        Some(XrFrame {
            detected_meshes: self.sensor_ready.then_some(meshes),
            poses,
        })
    }
}
