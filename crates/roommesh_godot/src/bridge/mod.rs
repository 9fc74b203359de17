//! Мост между Godot XR и room mesh синхронизацией (100% Rust)
//!
//! Архитектура:
//! - XR plugin/GDScript каждый frame пушит detected meshes + poses через #[func]
//! - process(): собранный XrFrame → tick() → GodotSceneHost мутирует MeshInstance3D
//! - Lifecycle события ECS → Godot signals

mod logger;
mod signals;

use crate::scene_host::GodotSceneHost;
use godot::classes::{FileAccess, INode3D, Material};
use godot::prelude::*;
use logger::GodotLogger;
use roommesh_sync::{
    create_headless_app, tick, DetectedMesh, MeshHandle, MeshSyncConfig, MeshSyncTracker, Pose, RemovalPolicy,
    RoomMeshPlugin, XrFrameBuilder,
};

/// RoomMeshBridge: node, под которым живут все room mesh MeshInstance3D
#[derive(GodotClass)]
#[class(base=Node3D)]
pub struct RoomMeshBridge {
    base: Base<Node3D>,

    /// Material для всех room meshes (если config не задаёт material path)
    #[export]
    material: Option<Gd<Material>>,

    /// Удалять meshes, пропавшие из sensor feed
    #[export]
    remove_vanished: bool,

    /// Сколько секунд mesh может отсутствовать до удаления
    #[export]
    removal_grace_secs: f64,

    /// TOML config (res:// или user://); пусто — настройки из inspector'а
    #[export]
    config_path: GString,

    /// Bevy App (tracker + sync система + NonSend GodotSceneHost)
    app: Option<bevy::app::App>,

    frames: XrFrameBuilder,
}

#[godot_api]
impl INode3D for RoomMeshBridge {
    fn init(base: Base<Node3D>) -> Self {
        Self {
            base,
            material: None,
            remove_vanished: false,
            removal_grace_secs: 1.0,
            config_path: GString::new(),
            app: None,
            frames: XrFrameBuilder::new(),
        }
    }

    fn ready(&mut self) {
        GodotLogger::clear_log_file();
        roommesh_sync::set_logger(Box::new(GodotLogger));

        let config = self.load_config();
        roommesh_sync::log_info(&format!("RoomMeshBridge ready (removal: {:?})", config.removal));

        let mut app = create_headless_app();

        // NonSend resource (main thread only), до plugin'а
        let root = self.base().clone();
        app.insert_non_send_resource(GodotSceneHost::new(root, self.material.clone()));
        app.add_plugins(RoomMeshPlugin::<GodotSceneHost>::new(config));

        self.app = Some(app);
    }

    fn process(&mut self, delta: f64) {
        let frame = self.frames.take_frame();

        if let Some(app) = &mut self.app {
            tick(app, frame, delta as f32);
        }

        self.emit_lifecycle_signals();
    }
}

#[godot_api]
impl RoomMeshBridge {
    #[signal]
    fn room_mesh_created(mesh_id: i64, sequential_id: i64);

    #[signal]
    fn room_mesh_updated(mesh_id: i64, sequential_id: i64, last_changed: f64);

    #[signal]
    fn room_mesh_removed(mesh_id: i64, sequential_id: i64);

    /// Начало XR frame — вызывать до report_mesh/report_mesh_pose
    ///
    /// Если в frame не вызвали — tick считается кадром без XR session.
    #[func]
    pub fn begin_mesh_frame(&mut self) {
        self.frames.begin_frame();
    }

    /// false — session есть, но mesh detection ещё не отдаёт данные
    #[func]
    pub fn set_sensor_ready(&mut self, ready: bool) {
        self.frames.mark_sensor_ready(ready);
    }

    #[func]
    pub fn report_mesh(
        &mut self,
        mesh_id: i64,
        vertices: PackedFloat32Array,
        indices: PackedInt32Array,
        last_changed: f64,
    ) {
        if !self.frames.is_open() {
            roommesh_sync::log_warning(&format!(
                "⚠️ report_mesh({}) outside of begin_mesh_frame, ignored",
                mesh_id
            ));
            return;
        }

        let Ok(indices) = indices
            .as_slice()
            .iter()
            .map(|&index| u32::try_from(index))
            .collect::<Result<Vec<u32>, _>>()
        else {
            roommesh_sync::log_error(&format!("❌ Mesh {} has negative indices, skipped", mesh_id));
            return;
        };

        self.frames.report_mesh(DetectedMesh::new(
            MeshHandle(mesh_id as u64),
            vertices.to_vec(),
            indices,
            last_changed,
        ));
    }

    #[func]
    pub fn report_mesh_pose(&mut self, mesh_id: i64, position: Vector3, orientation: Quaternion) {
        if !self.frames.is_open() {
            return;
        }

        let pose = Pose::new(
            bevy::prelude::Vec3::new(position.x, position.y, position.z),
            bevy::prelude::Quat::from_xyzw(orientation.x, orientation.y, orientation.z, orientation.w),
        );
        self.frames.report_pose(MeshHandle(mesh_id as u64), pose);
    }

    #[func]
    pub fn tracked_mesh_count(&self) -> i64 {
        let Some(app) = &self.app else {
            return 0;
        };
        app.world().resource::<MeshSyncTracker>().len() as i64
    }
}

impl RoomMeshBridge {
    /// Config: TOML по config_path, иначе из exported полей
    fn load_config(&self) -> MeshSyncConfig {
        let removal = if self.remove_vanished {
            RemovalPolicy::Remove {
                grace_secs: self.removal_grace_secs.max(0.0) as f32,
            }
        } else {
            RemovalPolicy::Retain
        };
        let inspector_config = MeshSyncConfig::default().with_removal(removal);

        if self.config_path.is_empty() {
            return inspector_config;
        }

        let source = FileAccess::get_file_as_string(&self.config_path);
        if source.is_empty() {
            roommesh_sync::log_error(&format!(
                "❌ Room mesh config {} missing or empty, using inspector settings",
                self.config_path
            ));
            return inspector_config;
        }

        match MeshSyncConfig::from_toml_str(&source.to_string()) {
            Ok(config) => config,
            Err(error) => {
                roommesh_sync::log_error(&format!("❌ {} ({})", error, self.config_path));
                inspector_config
            }
        }
    }
}
