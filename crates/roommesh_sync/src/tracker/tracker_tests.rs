//! Tests for MeshSyncTracker (HeadlessScene как host).

#[cfg(test)]
mod tests {
    use crate::config::{MeshSyncConfig, RemovalPolicy};
    use crate::host::{HeadlessScene, MaterialRef, SceneOp};
    use crate::tracker::{MeshSyncTracker, SyncReport};
    use crate::xr::{DetectedMesh, MeshHandle, Pose, XrFrame};
    use bevy::prelude::*;

    fn quad(handle: u64, last_changed: f64) -> DetectedMesh {
        DetectedMesh::new(
            MeshHandle(handle),
            vec![
                0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                1.0, 0.0, 1.0, //
                0.0, 0.0, 1.0,
            ],
            vec![0, 1, 2, 0, 2, 3],
            last_changed,
        )
    }

    fn sync(tracker: &mut MeshSyncTracker, scene: &mut HeadlessScene, frame: &XrFrame) {
        let report = tracker.synchronize(frame.detected_meshes.as_deref(), frame, scene, 1.0 / 60.0);
        assert!(report.failed.is_empty(), "host errors: {:?}", report.failed);
    }

    #[test]
    fn test_new_mesh_creates_object_with_sensor_buffers() {
        let mut tracker = MeshSyncTracker::default();
        let mut scene = HeadlessScene::new();
        let frame = XrFrame::with_meshes(vec![quad(10, 1.0)]);

        sync(&mut tracker, &mut scene, &frame);

        let entry = tracker.entry(MeshHandle(10)).unwrap();
        assert_eq!(entry.sequential_id, 0);
        assert_eq!(entry.last_seen_timestamp, 1.0);

        let geometry = scene.object_geometry(entry.object).unwrap();
        assert_eq!(geometry.vertex_count(), 4);
        assert_eq!(geometry.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(geometry.positions[2], [1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_same_handle_never_duplicates_entry() {
        let mut tracker = MeshSyncTracker::default();
        let mut scene = HeadlessScene::new();
        // Один handle дважды в одном frame + повтор в следующем tick
        let frame = XrFrame::with_meshes(vec![quad(1, 1.0), quad(1, 1.0), quad(2, 1.0)]);

        sync(&mut tracker, &mut scene, &frame);
        sync(&mut tracker, &mut scene, &frame);

        assert_eq!(tracker.len(), 2);
        assert_eq!(scene.object_count(), 2);
    }

    #[test]
    fn test_sequential_ids_follow_first_sighting() {
        let mut tracker = MeshSyncTracker::default();
        let mut scene = HeadlessScene::new();

        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![quad(900, 0.0), quad(5, 0.0)]));
        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![quad(42, 0.0), quad(900, 0.0)]));

        assert_eq!(tracker.entry(MeshHandle(900)).unwrap().sequential_id, 0);
        assert_eq!(tracker.entry(MeshHandle(5)).unwrap().sequential_id, 1);
        assert_eq!(tracker.entry(MeshHandle(42)).unwrap().sequential_id, 2);
    }

    #[test]
    fn test_unchanged_timestamp_skips_geometry_work() {
        let mut tracker = MeshSyncTracker::default();
        let mut scene = HeadlessScene::new();
        let frame = XrFrame::with_meshes(vec![quad(1, 3.0)]);

        sync(&mut tracker, &mut scene, &frame);
        scene.take_ops();
        sync(&mut tracker, &mut scene, &frame);

        assert_eq!(scene.geometry_mutation_count(), 0);
        assert!(scene.ops().is_empty(), "no pose → no ops at all: {:?}", scene.ops());
    }

    #[test]
    fn test_newer_timestamp_rewrites_in_place() {
        let mut tracker = MeshSyncTracker::default();
        let mut scene = HeadlessScene::new();
        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![quad(1, 1.0)]));
        let geometry_before = tracker.entry(MeshHandle(1)).unwrap().geometry;
        scene.take_ops();

        let mut moved = quad(1, 2.0);
        moved.vertices[0] = 9.0;
        moved.indices = vec![3, 2, 1, 0, 0, 0];
        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![moved]));

        let entry = tracker.entry(MeshHandle(1)).unwrap();
        assert_eq!(entry.geometry, geometry_before);
        assert_eq!(entry.last_seen_timestamp, 2.0);

        let geometry = scene.geometry(geometry_before).unwrap();
        assert_eq!(geometry.positions[0], [9.0, 0.0, 0.0]);
        assert_eq!(geometry.indices, vec![3, 2, 1, 0, 0, 0]);

        let ops = scene.take_ops();
        assert_eq!(ops[0], SceneOp::ReplaceIndices(geometry_before));
        let vertex_writes = ops
            .iter()
            .filter(|op| matches!(op, SceneOp::SetVertexPosition { .. }))
            .count();
        assert_eq!(vertex_writes, 4);
    }

    #[test]
    fn test_older_timestamp_never_rolls_back() {
        let mut tracker = MeshSyncTracker::default();
        let mut scene = HeadlessScene::new();
        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![quad(1, 5.0)]));
        scene.take_ops();

        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![quad(1, 4.0)]));

        assert_eq!(tracker.entry(MeshHandle(1)).unwrap().last_seen_timestamp, 5.0);
        assert_eq!(scene.geometry_mutation_count(), 0);
    }

    #[test]
    fn test_vertex_count_change_rebuilds_geometry() {
        let mut tracker = MeshSyncTracker::default();
        let mut scene = HeadlessScene::new();
        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![quad(1, 1.0)]));
        let old = tracker.entry(MeshHandle(1)).unwrap().clone();

        let triangle = DetectedMesh::new(
            MeshHandle(1),
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            vec![0, 1, 2],
            2.0,
        );
        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![triangle]));

        let entry = tracker.entry(MeshHandle(1)).unwrap();
        assert_eq!(entry.object, old.object);
        assert_ne!(entry.geometry, old.geometry);
        assert_eq!(entry.vertex_count, 3);
        assert!(scene.geometry(old.geometry).is_none());
        assert_eq!(scene.object_geometry(entry.object).unwrap().indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_zero_vertex_mesh_is_tolerated() {
        let mut tracker = MeshSyncTracker::default();
        let mut scene = HeadlessScene::new();
        let empty = DetectedMesh::new(MeshHandle(3), vec![], vec![], 0.0);

        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![empty]));

        let entry = tracker.entry(MeshHandle(3)).unwrap();
        let geometry = scene.object_geometry(entry.object).unwrap();
        assert_eq!(geometry.vertex_count(), 0);
        assert!(geometry.indices.is_empty());
    }

    #[test]
    fn test_pose_applied_reset_rotation_position() {
        let mut tracker = MeshSyncTracker::default();
        let mut scene = HeadlessScene::new();
        let rotation = Quat::from_xyzw(0.0, 0.7071068, 0.0, 0.7071068);
        let position = Vec3::new(1.0, 1.5, -2.0);
        let frame = XrFrame::with_meshes(vec![quad(1, 1.0)])
            .with_pose(MeshHandle(1), Pose::new(position, rotation));

        sync(&mut tracker, &mut scene, &frame);

        let object = tracker.entry(MeshHandle(1)).unwrap().object;
        let transform_ops: Vec<_> = scene
            .ops()
            .iter()
            .filter(|op| {
                matches!(
                    op,
                    SceneOp::ResetTransform(_) | SceneOp::SetRotationWorld(..) | SceneOp::SetPositionWorld(..)
                )
            })
            .cloned()
            .collect();
        assert_eq!(
            transform_ops,
            vec![
                SceneOp::ResetTransform(object),
                SceneOp::SetRotationWorld(object, rotation),
                SceneOp::SetPositionWorld(object, position),
            ]
        );

        let transform = scene.object(object).unwrap().transform;
        assert_eq!(transform.rotation, rotation);
        assert_eq!(transform.translation, position);
    }

    #[test]
    fn test_pose_reapplied_for_unchanged_mesh() {
        let mut tracker = MeshSyncTracker::default();
        let mut scene = HeadlessScene::new();
        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![quad(1, 1.0)]));
        scene.take_ops();

        let frame = XrFrame::with_meshes(vec![quad(1, 1.0)])
            .with_pose(MeshHandle(1), Pose::new(Vec3::Y, Quat::IDENTITY));
        sync(&mut tracker, &mut scene, &frame);

        assert_eq!(scene.geometry_mutation_count(), 0);
        assert_eq!(scene.ops().len(), 3);
    }

    #[test]
    fn test_missing_pose_leaves_transform_alone() {
        let mut tracker = MeshSyncTracker::default();
        let mut scene = HeadlessScene::new();

        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![quad(1, 1.0)]));

        assert!(!scene
            .ops()
            .iter()
            .any(|op| matches!(op, SceneOp::ResetTransform(_))));
    }

    #[test]
    fn test_sensor_not_ready_is_noop() {
        let mut tracker = MeshSyncTracker::default();
        let mut scene = HeadlessScene::new();

        let report = tracker
            .synchronize(None, &XrFrame::default(), &mut scene, 0.016);

        assert!(report.is_quiet());
        assert!(scene.ops().is_empty());
    }

    #[test]
    fn test_material_attached_verbatim() {
        let config = MeshSyncConfig::default().with_material(MaterialRef::new("res://room.tres"));
        let mut tracker = MeshSyncTracker::new(&config);
        let mut scene = HeadlessScene::new();

        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![quad(1, 1.0)]));

        let object = tracker.entry(MeshHandle(1)).unwrap().object;
        assert_eq!(
            scene.object(object).unwrap().material,
            Some(MaterialRef::new("res://room.tres"))
        );
    }

    #[test]
    fn test_retain_policy_keeps_vanished_meshes() {
        let mut tracker = MeshSyncTracker::default();
        let mut scene = HeadlessScene::new();
        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![quad(1, 1.0), quad(2, 1.0)]));

        for _ in 0..120 {
            sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![quad(2, 1.0)]));
        }

        assert_eq!(tracker.len(), 2);
        assert_eq!(scene.object_count(), 2);
    }

    #[test]
    fn test_remove_policy_waits_for_grace_period() {
        let config = MeshSyncConfig::default().with_removal(RemovalPolicy::Remove { grace_secs: 0.25 });
        let mut tracker = MeshSyncTracker::new(&config);
        let mut scene = HeadlessScene::new();
        let both = vec![quad(1, 1.0), quad(2, 1.0)];
        tracker
            .synchronize(Some(both.as_slice()), &XrFrame::default(), &mut scene, 0.1);

        let only_two = vec![quad(2, 1.0)];
        let report = tracker
            .synchronize(Some(only_two.as_slice()), &XrFrame::default(), &mut scene, 0.1);
        assert!(report.removed.is_empty());

        // Вернулся до истечения grace → счётчик сброшен
        tracker
            .synchronize(Some(both.as_slice()), &XrFrame::default(), &mut scene, 0.1);
        assert_eq!(tracker.entry(MeshHandle(1)).unwrap().missing_for, 0.0);

        let mut removed = Vec::new();
        for _ in 0..3 {
            let report = tracker
                .synchronize(Some(only_two.as_slice()), &XrFrame::default(), &mut scene, 0.1);
            removed.extend(report.removed);
        }

        assert_eq!(removed, vec![(MeshHandle(1), 0)]);
        assert!(tracker.entry(MeshHandle(1)).is_none());
        assert_eq!(scene.object_count(), 1);
        assert_eq!(scene.geometry_count(), 1);
    }

    #[test]
    fn test_reappearing_mesh_after_removal_gets_new_id() {
        let config = MeshSyncConfig::default().with_removal(RemovalPolicy::Remove { grace_secs: 0.0 });
        let mut tracker = MeshSyncTracker::new(&config);
        let mut scene = HeadlessScene::new();

        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![quad(1, 1.0)]));
        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![]));
        assert!(tracker.is_empty());

        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![quad(1, 1.0)]));
        assert_eq!(tracker.entry(MeshHandle(1)).unwrap().sequential_id, 1);
    }

    #[test]
    fn test_removal_tolerates_object_destroyed_by_host() {
        use crate::host::SceneHost;

        let config = MeshSyncConfig::default().with_removal(RemovalPolicy::Remove { grace_secs: 0.0 });
        let mut tracker = MeshSyncTracker::new(&config);
        let mut scene = HeadlessScene::new();
        sync(&mut tracker, &mut scene, &XrFrame::with_meshes(vec![quad(1, 1.0)]));

        let object = tracker.entry(MeshHandle(1)).unwrap().object;
        scene.destroy_object(object).unwrap();

        let report = tracker
            .synchronize(Some(&[][..]), &XrFrame::default(), &mut scene, 0.016);
        assert_eq!(report.removed.len(), 1);
    }

    // ============================================================================
    // Host errors: FlakyHost = HeadlessScene + управляемые отказы
    // ============================================================================

    use crate::host::{GeometryId, IndexFormat, RenderObjectId, SceneHost, SceneHostError};

    #[derive(Default)]
    struct FlakyHost {
        scene: HeadlessScene,
        create_object_calls: usize,
        /// Номер вызова create_object (с 0), который упадёт
        fail_create_object_on: Option<usize>,
        fail_attach: bool,
        /// Сколько set_vertex_position ещё пройдёт (None — без лимита)
        vertex_writes_left: Option<usize>,
    }

    fn backend_error(what: &str) -> SceneHostError {
        SceneHostError::Backend(what.to_string())
    }

    impl SceneHost for FlakyHost {
        fn create_object(&mut self) -> Result<RenderObjectId, SceneHostError> {
            let call = self.create_object_calls;
            self.create_object_calls += 1;
            if self.fail_create_object_on == Some(call) {
                return Err(backend_error("create_object"));
            }
            self.scene.create_object()
        }

        fn create_geometry(
            &mut self,
            vertex_count: usize,
            indices: &[u32],
            format: IndexFormat,
        ) -> Result<GeometryId, SceneHostError> {
            self.scene.create_geometry(vertex_count, indices, format)
        }

        fn attach_geometry(
            &mut self,
            object: RenderObjectId,
            geometry: GeometryId,
            material: Option<&MaterialRef>,
        ) -> Result<(), SceneHostError> {
            if self.fail_attach {
                return Err(SceneHostError::MaterialUnavailable("res://missing.tres".to_string()));
            }
            self.scene.attach_geometry(object, geometry, material)
        }

        fn replace_indices(&mut self, geometry: GeometryId, indices: &[u32]) -> Result<(), SceneHostError> {
            self.scene.replace_indices(geometry, indices)
        }

        fn set_vertex_position(
            &mut self,
            geometry: GeometryId,
            index: usize,
            position: [f32; 3],
        ) -> Result<(), SceneHostError> {
            match self.vertex_writes_left {
                Some(0) => return Err(backend_error("set_vertex_position")),
                Some(left) => self.vertex_writes_left = Some(left - 1),
                None => {}
            }
            self.scene.set_vertex_position(geometry, index, position)
        }

        fn commit_geometry(&mut self, geometry: GeometryId) -> Result<(), SceneHostError> {
            self.scene.commit_geometry(geometry)
        }

        fn reset_transform(&mut self, object: RenderObjectId) -> Result<(), SceneHostError> {
            self.scene.reset_transform(object)
        }

        fn set_rotation_world(&mut self, object: RenderObjectId, rotation: Quat) -> Result<(), SceneHostError> {
            self.scene.set_rotation_world(object, rotation)
        }

        fn set_position_world(&mut self, object: RenderObjectId, position: Vec3) -> Result<(), SceneHostError> {
            self.scene.set_position_world(object, position)
        }

        fn destroy_object(&mut self, object: RenderObjectId) -> Result<(), SceneHostError> {
            self.scene.destroy_object(object)
        }

        fn destroy_geometry(&mut self, geometry: GeometryId) -> Result<(), SceneHostError> {
            self.scene.destroy_geometry(geometry)
        }
    }

    fn sync_flaky(tracker: &mut MeshSyncTracker, host: &mut FlakyHost, meshes: Vec<DetectedMesh>) -> SyncReport {
        let frame = XrFrame::with_meshes(meshes);
        tracker.synchronize(frame.detected_meshes.as_deref(), &frame, host, 1.0 / 60.0)
    }

    #[test]
    fn test_attach_failure_leaves_no_orphans() {
        let mut tracker = MeshSyncTracker::default();
        let mut host = FlakyHost {
            fail_attach: true,
            ..Default::default()
        };

        for _ in 0..5 {
            let report = sync_flaky(&mut tracker, &mut host, vec![quad(1, 1.0)]);
            assert_eq!(report.failed.len(), 1);
            assert!(report.created.is_empty());
        }

        assert!(tracker.is_empty());
        assert_eq!(host.scene.object_count(), 0);
        assert_eq!(host.scene.geometry_count(), 0);

        // Material починили → mesh создаётся с первым sequential id
        host.fail_attach = false;
        let report = sync_flaky(&mut tracker, &mut host, vec![quad(1, 1.0)]);
        assert_eq!(report.created, vec![(MeshHandle(1), 0)]);
        assert_eq!(host.scene.object_count(), 1);
        assert_eq!(host.scene.geometry_count(), 1);
    }

    #[test]
    fn test_failed_vertex_fill_discards_new_object() {
        let mut tracker = MeshSyncTracker::default();
        let mut host = FlakyHost {
            vertex_writes_left: Some(1),
            ..Default::default()
        };

        let report = sync_flaky(&mut tracker, &mut host, vec![quad(1, 1.0)]);

        assert_eq!(report.failed, vec![(MeshHandle(1), backend_error("set_vertex_position"))]);
        assert!(tracker.is_empty());
        assert_eq!(host.scene.object_count(), 0);
        assert_eq!(host.scene.geometry_count(), 0);
    }

    #[test]
    fn test_mid_list_failure_keeps_syncing_other_meshes() {
        let config = MeshSyncConfig::default().with_removal(RemovalPolicy::Remove { grace_secs: 0.0 });
        let mut tracker = MeshSyncTracker::new(&config);
        // create_object #0 — mesh 9, #1 — mesh 1, #2 — mesh 2 (падает), #3 — mesh 3
        let mut host = FlakyHost {
            fail_create_object_on: Some(2),
            ..Default::default()
        };
        sync_flaky(&mut tracker, &mut host, vec![quad(9, 1.0)]);

        let report = sync_flaky(&mut tracker, &mut host, vec![quad(1, 1.0), quad(2, 1.0), quad(3, 1.0)]);

        assert_eq!(report.created, vec![(MeshHandle(1), 1), (MeshHandle(3), 2)]);
        assert_eq!(report.failed, vec![(MeshHandle(2), backend_error("create_object"))]);
        // Removal sweep отработал несмотря на ошибку
        assert_eq!(report.removed, vec![(MeshHandle(9), 0)]);
        assert_eq!(tracker.len(), 2);
        assert_eq!(host.scene.object_count(), 2);

        // Следующий tick: упавший mesh догоняет
        let report = sync_flaky(&mut tracker, &mut host, vec![quad(1, 1.0), quad(2, 1.0), quad(3, 1.0)]);
        assert_eq!(report.created, vec![(MeshHandle(2), 3)]);
        assert!(report.failed.is_empty());
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn test_failed_rewrite_keeps_timestamp_for_retry() {
        let mut tracker = MeshSyncTracker::default();
        let mut host = FlakyHost::default();
        sync_flaky(&mut tracker, &mut host, vec![quad(1, 1.0)]);

        let mut moved = quad(1, 2.0);
        moved.vertices[0] = 7.0;
        host.vertex_writes_left = Some(2);
        let report = sync_flaky(&mut tracker, &mut host, vec![moved.clone()]);

        assert_eq!(report.failed.len(), 1);
        assert!(report.updated.is_empty());
        assert_eq!(tracker.entry(MeshHandle(1)).unwrap().last_seen_timestamp, 1.0);

        host.vertex_writes_left = None;
        let report = sync_flaky(&mut tracker, &mut host, vec![moved]);

        assert_eq!(report.updated, vec![(MeshHandle(1), 0, 2.0)]);
        let entry = tracker.entry(MeshHandle(1)).unwrap();
        assert_eq!(entry.last_seen_timestamp, 2.0);
        assert_eq!(
            host.scene.object_geometry(entry.object).unwrap().positions[0],
            [7.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_failed_rebuild_attach_keeps_previous_geometry() {
        let mut tracker = MeshSyncTracker::default();
        let mut host = FlakyHost::default();
        sync_flaky(&mut tracker, &mut host, vec![quad(1, 1.0)]);
        let before = tracker.entry(MeshHandle(1)).unwrap().clone();

        let triangle = DetectedMesh::new(
            MeshHandle(1),
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            vec![0, 1, 2],
            2.0,
        );
        host.fail_attach = true;
        let report = sync_flaky(&mut tracker, &mut host, vec![triangle]);

        assert_eq!(report.failed.len(), 1);
        assert_eq!(tracker.entry(MeshHandle(1)), Some(&before));
        // Новый buffer удалён, старый по-прежнему на object
        assert_eq!(host.scene.geometry_count(), 1);
        assert_eq!(
            host.scene.object(before.object).unwrap().geometry,
            Some(before.geometry)
        );
    }
}
