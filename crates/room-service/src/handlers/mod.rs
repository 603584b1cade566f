//! HTTP request handlers for the room service.

pub mod metrics;
pub mod rooms;

pub use metrics::metrics_handler;
pub use rooms::{
    add_message, create_room, join_room, leave_room, list_rooms, room_action, room_info,
    verify_room,
};
