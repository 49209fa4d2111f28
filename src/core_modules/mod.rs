pub mod config;
pub mod contact_shape;
pub mod entity;
pub mod error;
pub mod event;
pub mod event_log;
pub mod grasp;
pub mod ids;
pub mod movement_buffer;
pub mod pick_and_place;
pub mod reach;
pub mod signal;
pub mod timer;
