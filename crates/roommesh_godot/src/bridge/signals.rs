//! ECS lifecycle events → Godot signals
//!
//! Extension методы для RoomMeshBridge (события текущего frame, после tick).

use super::RoomMeshBridge;
use bevy::prelude::Events;
use godot::prelude::*;
use roommesh_sync::{RoomMeshCreated, RoomMeshRemoved, RoomMeshUpdated};

impl RoomMeshBridge {
    pub(super) fn emit_lifecycle_signals(&mut self) {
        let Some(app) = &self.app else {
            return;
        };

        // Сначала собираем payload'ы (без mutable borrow self)
        let world = app.world();
        let created: Vec<RoomMeshCreated> = world
            .resource::<Events<RoomMeshCreated>>()
            .iter_current_update_events()
            .cloned()
            .collect();
        let updated: Vec<RoomMeshUpdated> = world
            .resource::<Events<RoomMeshUpdated>>()
            .iter_current_update_events()
            .cloned()
            .collect();
        let removed: Vec<RoomMeshRemoved> = world
            .resource::<Events<RoomMeshRemoved>>()
            .iter_current_update_events()
            .cloned()
            .collect();

        for event in created {
            self.base_mut().emit_signal(
                "room_mesh_created",
                &[
                    (event.handle.0 as i64).to_variant(),
                    (event.sequential_id as i64).to_variant(),
                ],
            );
        }

        for event in updated {
            self.base_mut().emit_signal(
                "room_mesh_updated",
                &[
                    (event.handle.0 as i64).to_variant(),
                    (event.sequential_id as i64).to_variant(),
                    event.last_changed.to_variant(),
                ],
            );
        }

        for event in removed {
            self.base_mut().emit_signal(
                "room_mesh_removed",
                &[
                    (event.handle.0 as i64).to_variant(),
                    (event.sequential_id as i64).to_variant(),
                ],
            );
        }
    }
}
