//! XR sensor feed: detected meshes + poses за один frame
//!
//! Всё здесь — read-only снимок того, что host (XR runtime) отдал в этом tick.
//! Session/reference space живут у host'а, сюда приходят уже разрешённые pose.

mod frame_builder;

pub use frame_builder::XrFrameBuilder;

use bevy::prelude::*;
use std::collections::HashMap;

/// Opaque идентификатор detected mesh
///
/// Sensor гарантирует стабильность id для одной физической поверхности между tick'ами.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MeshHandle(pub u64);

/// Геометрия поверхности, как её отдал sensor
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectedMesh {
    pub handle: MeshHandle,
    /// Flat xyz triplets
    pub vertices: Vec<f32>,
    /// Triangle list, u32
    pub indices: Vec<u32>,
    /// Sensor timestamp последнего изменения геометрии
    pub last_changed: f64,
}

impl DetectedMesh {
    pub fn new(handle: MeshHandle, vertices: Vec<f32>, indices: Vec<u32>, last_changed: f64) -> Self {
        Self {
            handle,
            vertices,
            indices,
            last_changed,
        }
    }

    /// Количество полных triplet'ов (хвост < 3 float'ов игнорируется)
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn has_partial_vertex(&self) -> bool {
        self.vertices.len() % 3 != 0
    }

    pub fn positions(&self) -> impl Iterator<Item = [f32; 3]> + '_ {
        self.vertices.chunks_exact(3).map(|v| [v[0], v[1], v[2]])
    }
}

/// Rigid transform поверхности относительно reference space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

impl Pose {
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self { position, orientation }
    }
}

/// Разрешение pose для mesh'а в текущем frame (None — pose недоступна)
pub trait PoseResolver {
    fn resolve_pose(&self, handle: MeshHandle) -> Option<Pose>;
}

impl PoseResolver for HashMap<MeshHandle, Pose> {
    fn resolve_pose(&self, handle: MeshHandle) -> Option<Pose> {
        self.get(&handle).copied()
    }
}

/// Один XR frame
///
/// `detected_meshes == None` — mesh detection ещё не готов (не путать с пустым списком).
#[derive(Debug, Clone, Default)]
pub struct XrFrame {
    pub detected_meshes: Option<Vec<DetectedMesh>>,
    pub poses: HashMap<MeshHandle, Pose>,
}

impl XrFrame {
    pub fn with_meshes(meshes: Vec<DetectedMesh>) -> Self {
        Self {
            detected_meshes: Some(meshes),
            poses: HashMap::new(),
        }
    }

    pub fn with_pose(mut self, handle: MeshHandle, pose: Pose) -> Self {
        self.poses.insert(handle, pose);
        self
    }
}

impl PoseResolver for XrFrame {
    fn resolve_pose(&self, handle: MeshHandle) -> Option<Pose> {
        self.poses.resolve_pose(handle)
    }
}

/// Текущий frame для sync системы
///
/// `frame == None` — нет XR session/frame в этом tick (sync пропускается целиком).
#[derive(Resource, Debug, Default)]
pub struct XrFrameState {
    pub frame: Option<XrFrame>,
}

/// Host delta time (обновляется каждый tick перед app.update())
#[derive(Resource, Debug, Default, Clone, Copy)]
pub struct FrameDelta(pub f32);
