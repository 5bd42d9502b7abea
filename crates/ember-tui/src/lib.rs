//! Terminal front-end for Emby/Jellyfin servers: session state machine,
//! caches, views and the tasks that talk to the server and to mpv.

pub mod action;
pub mod app;
pub mod cache;
pub mod components;
pub mod cover;
pub mod nav;
pub mod player;
pub mod probe;
pub mod session;
pub mod tasks;
pub mod theme;
pub mod ui;
pub mod widgets;
