//! GodotSceneHost — SceneHost поверх Godot scene tree
//!
//! Render object = MeshInstance3D (child bridge node'а), geometry = ArrayMesh.
//! Godot не умеет патчить index buffer поверхности, поэтому позиции/индексы
//! кэшируются в Packed*Array и surface пересобирается на commit_geometry.
//!
//! NonSend resource — main thread only (Gd<T> не Send+Sync).

use bevy::prelude::{Quat, Vec3};
use godot::classes::mesh::{ArrayType, PrimitiveType};
use godot::classes::{ArrayMesh, Material, Mesh, MeshInstance3D, Node, ResourceLoader};
use godot::obj::EngineEnum;
use godot::prelude::*;
use roommesh_sync::logger;
use roommesh_sync::{GeometryId, IndexFormat, MaterialRef, RenderObjectId, SceneHost, SceneHostError};
use std::collections::HashMap;

/// Mesh.ARRAY_MAX — размер surface arrays
const MESH_ARRAY_MAX: usize = 13;

struct GodotGeometry {
    mesh: Gd<ArrayMesh>,
    positions: PackedVector3Array,
    indices: PackedInt32Array,
}

pub struct GodotSceneHost {
    /// Родитель для всех room mesh nodes
    root: Gd<Node3D>,
    /// Material из inspector'а (когда config не задаёт свой)
    default_material: Option<Gd<Material>>,
    objects: HashMap<RenderObjectId, Gd<MeshInstance3D>>,
    geometries: HashMap<GeometryId, GodotGeometry>,
    material_cache: HashMap<MaterialRef, Gd<Material>>,
    next_id: u64,
}

impl GodotSceneHost {
    pub fn new(root: Gd<Node3D>, default_material: Option<Gd<Material>>) -> Self {
        Self {
            root,
            default_material,
            objects: HashMap::new(),
            geometries: HashMap::new(),
            material_cache: HashMap::new(),
            next_id: 0,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn instance(&mut self, object: RenderObjectId) -> Result<&mut Gd<MeshInstance3D>, SceneHostError> {
        let instance = self
            .objects
            .get_mut(&object)
            .ok_or(SceneHostError::UnknownObject(object))?;
        // Node мог быть удалён сценой (queue_free снаружи)
        if !instance.is_instance_valid() {
            return Err(SceneHostError::UnknownObject(object));
        }
        Ok(instance)
    }

    fn geometry_mut(&mut self, geometry: GeometryId) -> Result<&mut GodotGeometry, SceneHostError> {
        self.geometries
            .get_mut(&geometry)
            .ok_or(SceneHostError::UnknownGeometry(geometry))
    }

    fn resolve_material(&mut self, material: Option<&MaterialRef>) -> Result<Option<Gd<Material>>, SceneHostError> {
        let Some(material) = material else {
            return Ok(self.default_material.clone());
        };

        if let Some(cached) = self.material_cache.get(material) {
            return Ok(Some(cached.clone()));
        }

        let mut loader = ResourceLoader::singleton();
        let loaded = loader
            .load(material.path())
            .and_then(|resource| resource.try_cast::<Material>().ok())
            .ok_or_else(|| SceneHostError::MaterialUnavailable(material.path().to_string()))?;

        logger::log(&format!("🎨 Room mesh material loaded: {}", material.path()));
        self.material_cache.insert(material.clone(), loaded.clone());
        Ok(Some(loaded))
    }
}

/// Godot index buffer — PackedInt32Array
fn to_godot_indices(indices: &[u32]) -> Result<PackedInt32Array, SceneHostError> {
    let converted = indices
        .iter()
        .map(|&value| {
            i32::try_from(value).map_err(|_| SceneHostError::IndexOverflow {
                value,
                format: IndexFormat::U32,
            })
        })
        .collect::<Result<Vec<i32>, _>>()?;
    Ok(PackedInt32Array::from(converted.as_slice()))
}

fn to_vector3(v: Vec3) -> Vector3 {
    Vector3::new(v.x, v.y, v.z)
}

fn to_quaternion(q: Quat) -> Quaternion {
    Quaternion::new(q.x, q.y, q.z, q.w)
}

impl SceneHost for GodotSceneHost {
    fn create_object(&mut self) -> Result<RenderObjectId, SceneHostError> {
        let id = RenderObjectId(self.allocate_id());

        let mut instance = MeshInstance3D::new_alloc();
        let name = format!("RoomMesh_{}", id.0);
        instance.set_name(name.as_str());
        self.root.add_child(&instance.clone().upcast::<Node>());

        self.objects.insert(id, instance);
        Ok(id)
    }

    fn create_geometry(
        &mut self,
        vertex_count: usize,
        indices: &[u32],
        format: IndexFormat,
    ) -> Result<GeometryId, SceneHostError> {
        if format == IndexFormat::U16 {
            if let Some(&value) = indices.iter().find(|&&i| i > u16::MAX as u32) {
                return Err(SceneHostError::IndexOverflow { value, format });
            }
        }

        let mut positions = PackedVector3Array::new();
        positions.resize(vertex_count);

        let id = GeometryId(self.allocate_id());
        self.geometries.insert(
            id,
            GodotGeometry {
                mesh: ArrayMesh::new_gd(),
                positions,
                indices: to_godot_indices(indices)?,
            },
        );
        Ok(id)
    }

    fn attach_geometry(
        &mut self,
        object: RenderObjectId,
        geometry: GeometryId,
        material: Option<&MaterialRef>,
    ) -> Result<(), SceneHostError> {
        let mesh = self.geometry_mut(geometry)?.mesh.clone();
        let material = self.resolve_material(material)?;

        let instance = self.instance(object)?;
        instance.set_mesh(&mesh.upcast::<Mesh>());
        if let Some(material) = material {
            instance.set_material_override(&material);
        }
        Ok(())
    }

    fn replace_indices(&mut self, geometry: GeometryId, indices: &[u32]) -> Result<(), SceneHostError> {
        let indices = to_godot_indices(indices)?;
        self.geometry_mut(geometry)?.indices = indices;
        Ok(())
    }

    fn set_vertex_position(
        &mut self,
        geometry: GeometryId,
        index: usize,
        position: [f32; 3],
    ) -> Result<(), SceneHostError> {
        let buffers = self.geometry_mut(geometry)?;
        let vertex_count = buffers.positions.len();
        let Some(slot) = buffers.positions.as_mut_slice().get_mut(index) else {
            return Err(SceneHostError::VertexOutOfRange {
                geometry,
                index,
                vertex_count,
            });
        };
        *slot = Vector3::new(position[0], position[1], position[2]);
        Ok(())
    }

    fn commit_geometry(&mut self, geometry: GeometryId) -> Result<(), SceneHostError> {
        let buffers = self.geometry_mut(geometry)?;

        buffers.mesh.clear_surfaces();
        // Пустой vertex array Godot не принимает — вырожденный mesh остаётся без surface
        if buffers.positions.is_empty() {
            return Ok(());
        }

        let mut slots = vec![Variant::nil(); MESH_ARRAY_MAX];
        slots[ArrayType::VERTEX.ord() as usize] = buffers.positions.to_variant();
        if !buffers.indices.is_empty() {
            slots[ArrayType::INDEX.ord() as usize] = buffers.indices.to_variant();
        }
        let arrays = VariantArray::from(slots.as_slice());

        buffers.mesh.add_surface_from_arrays(PrimitiveType::TRIANGLES, &arrays);
        Ok(())
    }

    fn reset_transform(&mut self, object: RenderObjectId) -> Result<(), SceneHostError> {
        self.instance(object)?.set_transform(Transform3D::IDENTITY);
        Ok(())
    }

    fn set_rotation_world(&mut self, object: RenderObjectId, rotation: Quat) -> Result<(), SceneHostError> {
        self.instance(object)?
            .set_global_basis(Basis::from_quaternion(to_quaternion(rotation)));
        Ok(())
    }

    fn set_position_world(&mut self, object: RenderObjectId, position: Vec3) -> Result<(), SceneHostError> {
        self.instance(object)?.set_global_position(to_vector3(position));
        Ok(())
    }

    fn destroy_object(&mut self, object: RenderObjectId) -> Result<(), SceneHostError> {
        let mut instance = self
            .objects
            .remove(&object)
            .ok_or(SceneHostError::UnknownObject(object))?;
        if instance.is_instance_valid() {
            instance.queue_free(); // Отложенное удаление (Godot safe)
        }
        Ok(())
    }

    fn destroy_geometry(&mut self, geometry: GeometryId) -> Result<(), SceneHostError> {
        // ArrayMesh — RefCounted, освободится когда MeshInstance3D его отпустит
        self.geometries
            .remove(&geometry)
            .map(|_| ())
            .ok_or(SceneHostError::UnknownGeometry(geometry))
    }
}
