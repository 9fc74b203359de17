//! MeshSyncTracker — detected meshes → render objects
//!
//! Каждый tick:
//! 1. Новый handle → create object + geometry (sequential id по порядку появления)
//! 2. Известный handle с более новым timestamp → rewrite geometry in place
//! 3. Pose есть → reset transform, rotation, потом position (порядок важен)
//! 4. RemovalPolicy::Remove → удалить пропавшие после grace period
//!
//! Tracker ничего не знает о движке: все мутации идут через SceneHost.

#[cfg(test)]
mod tracker_tests;

use crate::config::{MeshSyncConfig, RemovalPolicy};
use crate::host::{GeometryId, IndexFormat, MaterialRef, RenderObjectId, SceneHost, SceneHostError};
use crate::logger;
use crate::xr::{DetectedMesh, MeshHandle, Pose, PoseResolver};
use bevy::prelude::*;
use std::collections::{HashMap, HashSet};

/// Bookkeeping одного tracked mesh
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedMeshEntry {
    pub sequential_id: u32,
    /// Sensor timestamp последней синхронизированной geometry (не убывает)
    pub last_seen_timestamp: f64,
    pub object: RenderObjectId,
    pub geometry: GeometryId,
    pub vertex_count: usize,
    /// Сколько секунд handle подряд отсутствует в feed
    pub missing_for: f32,
}

/// Итог одного synchronize
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub created: Vec<(MeshHandle, u32)>,
    pub updated: Vec<(MeshHandle, u32, f64)>,
    pub posed: usize,
    pub removed: Vec<(MeshHandle, u32)>,
    /// Ошибки host'а по mesh'ам (повтор в следующем tick)
    pub failed: Vec<(MeshHandle, SceneHostError)>,
}

impl SyncReport {
    pub fn is_quiet(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty() && self.failed.is_empty()
    }
}

#[derive(Resource, Debug, Default)]
pub struct MeshSyncTracker {
    entries: HashMap<MeshHandle, TrackedMeshEntry>,
    next_sequential_id: u32,
    removal: RemovalPolicy,
    material: Option<MaterialRef>,
}

impl MeshSyncTracker {
    pub fn new(config: &MeshSyncConfig) -> Self {
        Self {
            entries: HashMap::new(),
            next_sequential_id: 0,
            removal: config.removal,
            material: config.material.clone(),
        }
    }

    pub fn entry(&self, handle: MeshHandle) -> Option<&TrackedMeshEntry> {
        self.entries.get(&handle)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&MeshHandle, &TrackedMeshEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn removal_policy(&self) -> RemovalPolicy {
        self.removal
    }

    /// Один tick синхронизации
    ///
    /// `detected == None` — sensor не готов: no-op, ноль мутаций сцены.
    /// Каждый mesh синхронизируется отдельно: ошибка host'а на одном mesh'е попадает
    /// в `SyncReport::failed`, остальные meshes и removal sweep всё равно отрабатывают.
    /// Entry фиксируется только после успешных вызовов host'а для этого mesh'а.
    pub fn synchronize(
        &mut self,
        detected: Option<&[DetectedMesh]>,
        poses: &dyn PoseResolver,
        host: &mut dyn SceneHost,
        dt: f32,
    ) -> SyncReport {
        let Some(detected) = detected else {
            return SyncReport::default();
        };

        let mut report = SyncReport::default();

        for mesh in detected {
            if let Err(error) = self.sync_mesh(host, mesh, poses, &mut report) {
                report.failed.push((mesh.handle, error));
            }
        }

        if let RemovalPolicy::Remove { grace_secs } = self.removal {
            self.sweep_vanished(host, detected, grace_secs, dt, &mut report);
        }

        report
    }

    fn sync_mesh(
        &mut self,
        host: &mut dyn SceneHost,
        mesh: &DetectedMesh,
        poses: &dyn PoseResolver,
        report: &mut SyncReport,
    ) -> Result<(), SceneHostError> {
        let object = match self.entries.get_mut(&mesh.handle) {
            Some(entry) => {
                entry.missing_for = 0.0;
                if entry.last_seen_timestamp < mesh.last_changed {
                    rewrite_geometry(host, entry, mesh, self.material.as_ref())?;
                    entry.last_seen_timestamp = mesh.last_changed;
                    report
                        .updated
                        .push((mesh.handle, entry.sequential_id, mesh.last_changed));
                }
                entry.object
            }
            None => {
                let entry = self.track_new(host, mesh)?;
                report.created.push((mesh.handle, entry.sequential_id));
                entry.object
            }
        };

        if let Some(pose) = poses.resolve_pose(mesh.handle) {
            apply_pose(host, object, pose)?;
            report.posed += 1;
        }

        Ok(())
    }

    fn track_new(
        &mut self,
        host: &mut dyn SceneHost,
        mesh: &DetectedMesh,
    ) -> Result<&TrackedMeshEntry, SceneHostError> {
        if mesh.has_partial_vertex() {
            logger::log_warning(&format!(
                "⚠️ Mesh {:?}: {} floats is not a multiple of 3, trailing data ignored",
                mesh.handle,
                mesh.vertices.len()
            ));
        }

        let object = host.create_object()?;
        let geometry = match build_geometry(host, mesh) {
            Ok(geometry) => geometry,
            Err(error) => {
                discard_object(host, object);
                return Err(error);
            }
        };
        if let Err(error) = host.attach_geometry(object, geometry, self.material.as_ref()) {
            discard_geometry(host, geometry);
            discard_object(host, object);
            return Err(error);
        }

        let sequential_id = self.next_sequential_id;
        self.next_sequential_id += 1;

        logger::log(&format!(
            "🧱 Room mesh #{} created ({:?}, {} vertices, {} indices)",
            sequential_id,
            mesh.handle,
            mesh.vertex_count(),
            mesh.indices.len()
        ));

        let entry = self.entries.entry(mesh.handle).or_insert(TrackedMeshEntry {
            sequential_id,
            last_seen_timestamp: mesh.last_changed,
            object,
            geometry,
            vertex_count: mesh.vertex_count(),
            missing_for: 0.0,
        });
        Ok(&*entry)
    }

    fn sweep_vanished(
        &mut self,
        host: &mut dyn SceneHost,
        detected: &[DetectedMesh],
        grace_secs: f32,
        dt: f32,
        report: &mut SyncReport,
    ) {
        let reported: HashSet<MeshHandle> = detected.iter().map(|mesh| mesh.handle).collect();

        let mut expired = Vec::new();
        for (handle, entry) in self.entries.iter_mut() {
            if reported.contains(handle) {
                continue;
            }
            entry.missing_for += dt;
            if entry.missing_for >= grace_secs {
                expired.push(*handle);
            }
        }
        // Порядок удаления не зависит от HashMap iteration
        expired.sort_by_key(|handle| self.entries[handle].sequential_id);

        for handle in expired {
            let Some(entry) = self.entries.get(&handle) else {
                continue;
            };
            let (object, geometry) = (entry.object, entry.geometry);

            // Scene graph мог удалить object сам — это не ошибка.
            // Остальные ошибки: entry остаётся, повтор в следующем tick
            let destroyed = ignore_missing(host.destroy_object(object))
                .and_then(|()| ignore_missing(host.destroy_geometry(geometry)));
            if let Err(error) = destroyed {
                report.failed.push((handle, error));
                continue;
            }

            if let Some(entry) = self.entries.remove(&handle) {
                logger::log(&format!(
                    "🗑️ Room mesh #{} removed ({:?} missing for {:.2}s)",
                    entry.sequential_id, handle, entry.missing_for
                ));
                report.removed.push((handle, entry.sequential_id));
            }
        }
    }
}

fn ignore_missing(result: Result<(), SceneHostError>) -> Result<(), SceneHostError> {
    match result {
        Err(SceneHostError::UnknownObject(_)) | Err(SceneHostError::UnknownGeometry(_)) => Ok(()),
        other => other,
    }
}

/// Откат частично созданного object (ошибка отката только логируется)
fn discard_object(host: &mut dyn SceneHost, object: RenderObjectId) {
    if let Err(error) = ignore_missing(host.destroy_object(object)) {
        logger::log_error(&format!("❌ Failed to discard render object {:?}: {}", object, error));
    }
}

fn discard_geometry(host: &mut dyn SceneHost, geometry: GeometryId) {
    if let Err(error) = ignore_missing(host.destroy_geometry(geometry)) {
        logger::log_error(&format!("❌ Failed to discard geometry {:?}: {}", geometry, error));
    }
}

/// Новый geometry buffer, заполненный из sensor buffers
///
/// При ошибке заполнения buffer удаляется — наружу не утекает.
fn build_geometry(host: &mut dyn SceneHost, mesh: &DetectedMesh) -> Result<GeometryId, SceneHostError> {
    let geometry = host.create_geometry(mesh.vertex_count(), &mesh.indices, IndexFormat::U32)?;

    let filled = write_positions(host, geometry, mesh).and_then(|()| host.commit_geometry(geometry));
    if let Err(error) = filled {
        discard_geometry(host, geometry);
        return Err(error);
    }
    Ok(geometry)
}

fn write_positions(
    host: &mut dyn SceneHost,
    geometry: GeometryId,
    mesh: &DetectedMesh,
) -> Result<(), SceneHostError> {
    for (index, position) in mesh.positions().enumerate() {
        host.set_vertex_position(geometry, index, position)?;
    }
    Ok(())
}

/// Rewrite geometry существующего entry
///
/// Vertex count тот же → in place (indices целиком, позиции по одной).
/// Иначе buffer пересоздаётся и перепривязывается к тому же object.
/// Entry всегда указывает на geometry, прикреплённую к object.
fn rewrite_geometry(
    host: &mut dyn SceneHost,
    entry: &mut TrackedMeshEntry,
    mesh: &DetectedMesh,
    material: Option<&MaterialRef>,
) -> Result<(), SceneHostError> {
    if entry.vertex_count == mesh.vertex_count() {
        host.replace_indices(entry.geometry, &mesh.indices)?;
        write_positions(host, entry.geometry, mesh)?;
        host.commit_geometry(entry.geometry)?;
        return Ok(());
    }

    logger::log(&format!(
        "♻️ Room mesh #{} vertex count {} → {}, rebuilding geometry",
        entry.sequential_id,
        entry.vertex_count,
        mesh.vertex_count()
    ));

    let geometry = build_geometry(host, mesh)?;
    if let Err(error) = host.attach_geometry(entry.object, geometry, material) {
        discard_geometry(host, geometry);
        return Err(error);
    }

    let previous = std::mem::replace(&mut entry.geometry, geometry);
    entry.vertex_count = mesh.vertex_count();
    ignore_missing(host.destroy_geometry(previous))
}

/// reset → rotation → position
///
/// Position ставится последней: host может трактовать world position с учётом текущей rotation.
fn apply_pose(host: &mut dyn SceneHost, object: RenderObjectId, pose: Pose) -> Result<(), SceneHostError> {
    host.reset_transform(object)?;
    host.set_rotation_world(object, pose.orientation)?;
    host.set_position_world(object, pose.position)?;
    Ok(())
}
