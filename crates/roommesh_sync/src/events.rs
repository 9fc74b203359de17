//! Lifecycle события room meshes (для host'а: физика, UI, отладка)

use crate::xr::MeshHandle;
use bevy::prelude::*;

/// Новый detected mesh получил render object
#[derive(Event, Debug, Clone, PartialEq)]
pub struct RoomMeshCreated {
    pub handle: MeshHandle,
    pub sequential_id: u32,
}

/// Geometry переписана по более новому sensor timestamp
#[derive(Event, Debug, Clone, PartialEq)]
pub struct RoomMeshUpdated {
    pub handle: MeshHandle,
    pub sequential_id: u32,
    pub last_changed: f64,
}

/// Render object удалён (только RemovalPolicy::Remove)
#[derive(Event, Debug, Clone, PartialEq)]
pub struct RoomMeshRemoved {
    pub handle: MeshHandle,
    pub sequential_id: u32,
}
