//! Scene host seam — всё, что tracker'у нужно от scene graph движка
//!
//! Render objects принадлежат host'у (scene graph может удалить их сам),
//! tracker держит только opaque id. Реализации:
//! - HeadlessScene — in-memory scene graph + op log (headless/тесты)
//! - GodotSceneHost — MeshInstance3D + ArrayMesh (crate roommesh_godot)

mod headless;

pub use headless::{GeometryBuffers, HeadlessScene, SceneObject, SceneOp};

use bevy::prelude::*;
use serde::Deserialize;
use thiserror::Error;

/// Opaque handle на render object в scene graph host'а
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RenderObjectId(pub u64);

/// Opaque handle на geometry buffer (vertex positions + index buffer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeometryId(pub u64);

/// Ссылка на material, настроенный снаружи (путь ресурса у host'а)
///
/// Tracker передаёт её как есть в attach_geometry, содержимое не трогает.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct MaterialRef(pub String);

impl MaterialRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &str {
        &self.0
    }
}

/// Ширина индекса в index buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    U16,
    #[default]
    U32,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SceneHostError {
    #[error("unknown render object {0:?}")]
    UnknownObject(RenderObjectId),

    #[error("unknown geometry {0:?}")]
    UnknownGeometry(GeometryId),

    #[error("vertex {index} out of range for geometry {geometry:?} ({vertex_count} vertices)")]
    VertexOutOfRange {
        geometry: GeometryId,
        index: usize,
        vertex_count: usize,
    },

    #[error("index {value} does not fit {format:?} index buffer")]
    IndexOverflow { value: u32, format: IndexFormat },

    #[error("material '{0}' unavailable")]
    MaterialUnavailable(String),

    #[error("scene backend failure: {0}")]
    Backend(String),
}

/// Операции scene graph, которые использует MeshSyncTracker
///
/// Main thread only: реализации хранятся как NonSend resource.
pub trait SceneHost {
    /// Новый пустой render object в корне сцены
    fn create_object(&mut self) -> Result<RenderObjectId, SceneHostError>;

    /// Geometry buffer на `vertex_count` вершин (позиции нулевые) с копией index buffer
    fn create_geometry(
        &mut self,
        vertex_count: usize,
        indices: &[u32],
        format: IndexFormat,
    ) -> Result<GeometryId, SceneHostError>;

    /// Mesh component на object: geometry + material (material attach'ится verbatim)
    fn attach_geometry(
        &mut self,
        object: RenderObjectId,
        geometry: GeometryId,
        material: Option<&MaterialRef>,
    ) -> Result<(), SceneHostError>;

    /// Полная замена index buffer
    fn replace_indices(&mut self, geometry: GeometryId, indices: &[u32]) -> Result<(), SceneHostError>;

    fn set_vertex_position(
        &mut self,
        geometry: GeometryId,
        index: usize,
        position: [f32; 3],
    ) -> Result<(), SceneHostError>;

    /// Конец пачки изменений geometry (GPU upload и т.п.)
    fn commit_geometry(&mut self, _geometry: GeometryId) -> Result<(), SceneHostError> {
        Ok(())
    }

    fn reset_transform(&mut self, object: RenderObjectId) -> Result<(), SceneHostError>;

    fn set_rotation_world(&mut self, object: RenderObjectId, rotation: Quat) -> Result<(), SceneHostError>;

    fn set_position_world(&mut self, object: RenderObjectId, position: Vec3) -> Result<(), SceneHostError>;

    fn destroy_object(&mut self, object: RenderObjectId) -> Result<(), SceneHostError>;

    fn destroy_geometry(&mut self, geometry: GeometryId) -> Result<(), SceneHostError>;
}
