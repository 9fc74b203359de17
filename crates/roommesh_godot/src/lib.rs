use godot::prelude::*;

mod bridge;
mod scene_host;

/// GDExtension entry point
struct RoomMeshExtension;

#[gdextension]
unsafe impl ExtensionLibrary for RoomMeshExtension {}
