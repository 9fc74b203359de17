//! HeadlessScene — in-memory scene graph для headless запуска и тестов
//!
//! Объекты без иерархии (world == local), поэтому Transform хранится один.
//! Каждая мутация пишется в op log — по нему тесты проверяют порядок вызовов.

use super::{
    GeometryId, IndexFormat, MaterialRef, RenderObjectId, SceneHost, SceneHostError,
};
use bevy::prelude::*;
use std::collections::HashMap;

/// Одна мутация сцены (в порядке вызова)
#[derive(Debug, Clone, PartialEq)]
pub enum SceneOp {
    CreateObject(RenderObjectId),
    CreateGeometry {
        geometry: GeometryId,
        vertex_count: usize,
        index_count: usize,
    },
    AttachGeometry {
        object: RenderObjectId,
        geometry: GeometryId,
    },
    ReplaceIndices(GeometryId),
    SetVertexPosition {
        geometry: GeometryId,
        index: usize,
    },
    CommitGeometry(GeometryId),
    ResetTransform(RenderObjectId),
    SetRotationWorld(RenderObjectId, Quat),
    SetPositionWorld(RenderObjectId, Vec3),
    DestroyObject(RenderObjectId),
    DestroyGeometry(GeometryId),
}

impl SceneOp {
    /// Операции, меняющие содержимое geometry buffers
    pub fn is_geometry_mutation(&self) -> bool {
        matches!(
            self,
            SceneOp::CreateGeometry { .. }
                | SceneOp::ReplaceIndices(_)
                | SceneOp::SetVertexPosition { .. }
                | SceneOp::CommitGeometry(_)
                | SceneOp::DestroyGeometry(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeometryBuffers {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub format: IndexFormat,
    /// Сколько раз geometry коммитили (upload count)
    pub revision: u32,
}

impl GeometryBuffers {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub transform: Transform,
    pub geometry: Option<GeometryId>,
    pub material: Option<MaterialRef>,
}

#[derive(Debug, Default)]
pub struct HeadlessScene {
    objects: HashMap<RenderObjectId, SceneObject>,
    geometries: HashMap<GeometryId, GeometryBuffers>,
    next_id: u64,
    ops: Vec<SceneOp>,
}

impl HeadlessScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, id: RenderObjectId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    pub fn geometry(&self, id: GeometryId) -> Option<&GeometryBuffers> {
        self.geometries.get(&id)
    }

    /// Geometry, прикреплённая к object
    pub fn object_geometry(&self, id: RenderObjectId) -> Option<&GeometryBuffers> {
        self.object(id)
            .and_then(|object| object.geometry)
            .and_then(|geometry| self.geometry(geometry))
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn geometry_count(&self) -> usize {
        self.geometries.len()
    }

    pub fn ops(&self) -> &[SceneOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<SceneOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn geometry_mutation_count(&self) -> usize {
        self.ops.iter().filter(|op| op.is_geometry_mutation()).count()
    }

    /// Детерминированный dump сцены (сортировка по id) для сравнения состояний
    pub fn snapshot(&self) -> Vec<u8> {
        let mut snapshot = Vec::new();

        let mut objects: Vec<_> = self.objects.iter().collect();
        objects.sort_by_key(|(id, _)| **id);
        for (id, object) in objects {
            snapshot.extend_from_slice(&id.0.to_le_bytes());
            snapshot.extend_from_slice(format!("{:?}", object).as_bytes());
        }

        let mut geometries: Vec<_> = self.geometries.iter().collect();
        geometries.sort_by_key(|(id, _)| **id);
        for (id, geometry) in geometries {
            snapshot.extend_from_slice(&id.0.to_le_bytes());
            snapshot.extend_from_slice(format!("{:?}", geometry).as_bytes());
        }

        snapshot
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn object_mut(&mut self, id: RenderObjectId) -> Result<&mut SceneObject, SceneHostError> {
        self.objects.get_mut(&id).ok_or(SceneHostError::UnknownObject(id))
    }

    fn geometry_mut(&mut self, id: GeometryId) -> Result<&mut GeometryBuffers, SceneHostError> {
        self.geometries.get_mut(&id).ok_or(SceneHostError::UnknownGeometry(id))
    }
}

fn check_index_width(indices: &[u32], format: IndexFormat) -> Result<(), SceneHostError> {
    if format == IndexFormat::U16 {
        if let Some(&value) = indices.iter().find(|&&i| i > u16::MAX as u32) {
            return Err(SceneHostError::IndexOverflow { value, format });
        }
    }
    Ok(())
}

impl SceneHost for HeadlessScene {
    fn create_object(&mut self) -> Result<RenderObjectId, SceneHostError> {
        let id = RenderObjectId(self.allocate_id());
        self.objects.insert(
            id,
            SceneObject {
                transform: Transform::IDENTITY,
                geometry: None,
                material: None,
            },
        );
        self.ops.push(SceneOp::CreateObject(id));
        Ok(id)
    }

    fn create_geometry(
        &mut self,
        vertex_count: usize,
        indices: &[u32],
        format: IndexFormat,
    ) -> Result<GeometryId, SceneHostError> {
        check_index_width(indices, format)?;

        let id = GeometryId(self.allocate_id());
        self.geometries.insert(
            id,
            GeometryBuffers {
                positions: vec![[0.0; 3]; vertex_count],
                indices: indices.to_vec(),
                format,
                revision: 0,
            },
        );
        self.ops.push(SceneOp::CreateGeometry {
            geometry: id,
            vertex_count,
            index_count: indices.len(),
        });
        Ok(id)
    }

    fn attach_geometry(
        &mut self,
        object: RenderObjectId,
        geometry: GeometryId,
        material: Option<&MaterialRef>,
    ) -> Result<(), SceneHostError> {
        if !self.geometries.contains_key(&geometry) {
            return Err(SceneHostError::UnknownGeometry(geometry));
        }
        let target = self.object_mut(object)?;
        target.geometry = Some(geometry);
        target.material = material.cloned();
        self.ops.push(SceneOp::AttachGeometry { object, geometry });
        Ok(())
    }

    fn replace_indices(&mut self, geometry: GeometryId, indices: &[u32]) -> Result<(), SceneHostError> {
        let buffers = self.geometry_mut(geometry)?;
        check_index_width(indices, buffers.format)?;
        buffers.indices.clear();
        buffers.indices.extend_from_slice(indices);
        self.ops.push(SceneOp::ReplaceIndices(geometry));
        Ok(())
    }

    fn set_vertex_position(
        &mut self,
        geometry: GeometryId,
        index: usize,
        position: [f32; 3],
    ) -> Result<(), SceneHostError> {
        let buffers = self.geometry_mut(geometry)?;
        let vertex_count = buffers.vertex_count();
        let Some(slot) = buffers.positions.get_mut(index) else {
            return Err(SceneHostError::VertexOutOfRange {
                geometry,
                index,
                vertex_count,
            });
        };
        *slot = position;
        self.ops.push(SceneOp::SetVertexPosition { geometry, index });
        Ok(())
    }

    fn commit_geometry(&mut self, geometry: GeometryId) -> Result<(), SceneHostError> {
        self.geometry_mut(geometry)?.revision += 1;
        self.ops.push(SceneOp::CommitGeometry(geometry));
        Ok(())
    }

    fn reset_transform(&mut self, object: RenderObjectId) -> Result<(), SceneHostError> {
        self.object_mut(object)?.transform = Transform::IDENTITY;
        self.ops.push(SceneOp::ResetTransform(object));
        Ok(())
    }

    fn set_rotation_world(&mut self, object: RenderObjectId, rotation: Quat) -> Result<(), SceneHostError> {
        self.object_mut(object)?.transform.rotation = rotation;
        self.ops.push(SceneOp::SetRotationWorld(object, rotation));
        Ok(())
    }

    fn set_position_world(&mut self, object: RenderObjectId, position: Vec3) -> Result<(), SceneHostError> {
        self.object_mut(object)?.transform.translation = position;
        self.ops.push(SceneOp::SetPositionWorld(object, position));
        Ok(())
    }

    fn destroy_object(&mut self, object: RenderObjectId) -> Result<(), SceneHostError> {
        self.objects
            .remove(&object)
            .ok_or(SceneHostError::UnknownObject(object))?;
        self.ops.push(SceneOp::DestroyObject(object));
        Ok(())
    }

    fn destroy_geometry(&mut self, geometry: GeometryId) -> Result<(), SceneHostError> {
        self.geometries
            .remove(&geometry)
            .ok_or(SceneHostError::UnknownGeometry(geometry))?;
        // Отвязываем от объектов, которые ещё на неё ссылаются
        for object in self.objects.values_mut() {
            if object.geometry == Some(geometry) {
                object.geometry = None;
            }
        }
        self.ops.push(SceneOp::DestroyGeometry(geometry));
        Ok(())
    }
}
