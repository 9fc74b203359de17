//! RoomMesh Sync Core
//!
//! Синхронизация detected room geometry (XR mesh detection) в scene graph движка.
//! ECS-ядро на Bevy 0.16, движок подключается через SceneHost.
//!
//! HYBRID ARCHITECTURE:
//! - ECS = bookkeeping (tracker, config, events, tick)
//! - Host (Godot / headless) = scene graph, rendering, XR session

use bevy::prelude::*;
use std::marker::PhantomData;

pub mod config;
pub mod events;
pub mod host;
pub mod logger;
pub mod systems;
pub mod tracker;
pub mod xr;

pub use config::{ConfigError, MeshSyncConfig, RemovalPolicy};
pub use events::{RoomMeshCreated, RoomMeshRemoved, RoomMeshUpdated};
pub use host::{
    GeometryId, HeadlessScene, IndexFormat, MaterialRef, RenderObjectId, SceneHost, SceneHostError, SceneOp,
};
pub use logger::{log, log_error, log_info, log_warning, set_log_level, set_logger, LogLevel, LogPrinter};
pub use systems::sync_room_meshes_main_thread;
pub use tracker::{MeshSyncTracker, SyncReport, TrackedMeshEntry};
pub use xr::{DetectedMesh, FrameDelta, MeshHandle, Pose, PoseResolver, XrFrame, XrFrameBuilder, XrFrameState};

/// Главный plugin синхронизации
///
/// `H` — scene host, должен быть вставлен как NonSend resource
/// (`app.insert_non_send_resource(host)`) до первого tick.
pub struct RoomMeshPlugin<H> {
    config: MeshSyncConfig,
    _host: PhantomData<fn() -> H>,
}

impl<H> RoomMeshPlugin<H> {
    pub fn new(config: MeshSyncConfig) -> Self {
        Self {
            config,
            _host: PhantomData,
        }
    }
}

impl<H> Default for RoomMeshPlugin<H> {
    fn default() -> Self {
        Self::new(MeshSyncConfig::default())
    }
}

impl<H: SceneHost + 'static> Plugin for RoomMeshPlugin<H> {
    fn build(&self, app: &mut App) {
        logger::set_log_level(self.config.log_level);

        // Config, собранный в коде, мог обойти from_toml_str
        let config = match self.config.validate() {
            Ok(()) => self.config.clone(),
            Err(error) => {
                logger::log_error(&format!("❌ {}, falling back to retain policy", error));
                self.config.clone().with_removal(RemovalPolicy::Retain)
            }
        };

        app.insert_resource(MeshSyncTracker::new(&config))
            .insert_resource(config)
            .init_resource::<XrFrameState>()
            .init_resource::<FrameDelta>();

        app.add_event::<RoomMeshCreated>()
            .add_event::<RoomMeshUpdated>()
            .add_event::<RoomMeshRemoved>();

        app.add_systems(Update, sync_room_meshes_main_thread::<H>);
    }
}

/// Создаёт minimal Bevy App для headless синхронизации
pub fn create_headless_app() -> App {
    let mut app = App::new();
    logger::init_logger();
    app.add_plugins(MinimalPlugins);

    app
}

/// Headless App с HeadlessScene в роли host'а
pub fn create_headless_sync_app(config: MeshSyncConfig) -> App {
    let mut app = create_headless_app();
    app.insert_non_send_resource(HeadlessScene::new());
    app.add_plugins(RoomMeshPlugin::<HeadlessScene>::new(config));

    app
}

/// Один host tick (onTick(dt)): кладём frame + delta и прогоняем schedule
///
/// `frame == None` — нет XR session/frame: sync система ничего не трогает.
pub fn tick(app: &mut App, frame: Option<XrFrame>, dt: f32) {
    let world = app.world_mut();
    world.insert_resource(XrFrameState { frame });
    world.insert_resource(FrameDelta(dt));

    app.update();
}
