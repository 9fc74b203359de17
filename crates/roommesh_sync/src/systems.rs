//! Sync system — XrFrameState → MeshSyncTracker → SceneHost
//!
//! NAMING: `_main_thread` суффикс = вызовы host scene API (NonSend resources)

use crate::events::{RoomMeshCreated, RoomMeshRemoved, RoomMeshUpdated};
use crate::host::SceneHost;
use crate::logger;
use crate::tracker::MeshSyncTracker;
use crate::xr::{FrameDelta, XrFrameState};
use bevy::prelude::*;

/// Per-tick синхронизация room meshes
///
/// Нет XR frame → выходим до любых вызовов host'а.
/// Ошибки host'а по отдельным meshes логируются, события пишутся по всему, что успело синхронизироваться.
/// Упавшие meshes tracker повторит в следующем tick.
pub fn sync_room_meshes_main_thread<H: SceneHost + 'static>(
    frame_state: Res<XrFrameState>,
    delta: Res<FrameDelta>,
    mut tracker: ResMut<MeshSyncTracker>,
    mut host: NonSendMut<H>,
    mut created_events: EventWriter<RoomMeshCreated>,
    mut updated_events: EventWriter<RoomMeshUpdated>,
    mut removed_events: EventWriter<RoomMeshRemoved>,
) {
    let Some(frame) = frame_state.frame.as_ref() else {
        return;
    };

    let report = tracker.synchronize(frame.detected_meshes.as_deref(), frame, &mut *host, delta.0);

    for (handle, error) in &report.failed {
        logger::log_error(&format!("❌ Room mesh {:?} sync failed: {}", handle, error));
    }

    for (handle, sequential_id) in report.created {
        created_events.write(RoomMeshCreated { handle, sequential_id });
    }
    for (handle, sequential_id, last_changed) in report.updated {
        updated_events.write(RoomMeshUpdated {
            handle,
            sequential_id,
            last_changed,
        });
    }
    for (handle, sequential_id) in report.removed {
        removed_events.write(RoomMeshRemoved { handle, sequential_id });
    }
}
